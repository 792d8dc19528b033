use std::fs;

use assert_matches::assert_matches;

use clld_meta::config::{Config, ConfigLoader, DEFAULT_API_URL};
use clld_meta::error::MetaError;

#[test]
fn missing_file_uses_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let resolved = ConfigLoader::resolve(temp.path()).unwrap();
    assert_eq!(resolved.api_url, DEFAULT_API_URL);
    assert!(resolved.communities.contains(&"lexibank".to_string()));
    assert!(resolved.exclude_types.contains(&"presentation".to_string()));
}

#[test]
fn reads_project_config() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(
        temp.path().join("clld-meta.json"),
        r#"{
            "api_url": "https://sandbox.zenodo.org/api/",
            "communities": ["user-dictionaria"],
            "page_size": 100,
            "access_token_env": "SANDBOX_TOKEN",
            "exclude_titles": ["^Draft"]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(temp.path()).unwrap();
    assert_eq!(resolved.api_url, "https://sandbox.zenodo.org/api");
    assert_eq!(resolved.communities, vec!["dictionaria".to_string()]);
    assert_eq!(resolved.page_size, 100);
    assert_eq!(resolved.access_token_env, "SANDBOX_TOKEN");
    assert_eq!(resolved.exclude_titles.len(), 1);
    assert!(resolved.exclude_titles[0].is_match("Draft of a wordlist"));
}

#[test]
fn rejects_bad_values() {
    let err = ConfigLoader::resolve_config(Config {
        page_size: Some(0),
        ..Config::default()
    })
    .unwrap_err();
    assert_matches!(err, MetaError::ConfigValue(_));

    let err = ConfigLoader::resolve_config(Config {
        exclude_titles: Some(vec!["(".to_string()]),
        ..Config::default()
    })
    .unwrap_err();
    assert_matches!(err, MetaError::ConfigValue(_));
}

#[test]
fn rejects_malformed_json() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("clld-meta.json"), "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(temp.path()),
        Err(MetaError::ConfigParse(_))
    );
}
