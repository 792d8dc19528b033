use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MetaError;

pub const CONFIG_FILE: &str = "clld-meta.json";
pub const DEFAULT_API_URL: &str = "https://zenodo.org/api";
pub const DEFAULT_ACCESS_TOKEN_ENV: &str = "CLLD_META_ACCESS_TOKEN";
pub const DEFAULT_PAGE_SIZE: u32 = 25;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub communities: Option<Vec<String>>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub access_token_env: Option<String>,
    #[serde(default)]
    pub exclude_types: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_titles: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub api_url: String,
    pub communities: Vec<String>,
    pub page_size: u32,
    pub access_token_env: String,
    pub exclude_types: Vec<String>,
    pub exclude_titles: Vec<Regex>,
}

impl ResolvedConfig {
    /// Reads the access token from the configured environment variable.
    pub fn access_token(&self) -> Option<String> {
        std::env::var(&self.access_token_env)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `clld-meta.json` from the project root, falling back to the
    /// built-in defaults when the file does not exist.
    pub fn resolve(project_root: &Path) -> Result<ResolvedConfig, MetaError> {
        let config_path = project_root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MetaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MetaError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MetaError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let api_url = config
            .api_url
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let communities = config
            .communities
            .unwrap_or_else(default_communities)
            .into_iter()
            .map(|community| normalize_community(&community))
            .collect::<Vec<_>>();
        if communities.iter().any(|community| community.is_empty()) {
            return Err(MetaError::ConfigValue("empty community name".to_string()));
        }

        let page_size = config.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(MetaError::ConfigValue("page_size must be positive".to_string()));
        }

        let access_token_env = config
            .access_token_env
            .unwrap_or_else(|| DEFAULT_ACCESS_TOKEN_ENV.to_string());

        let exclude_types = config.exclude_types.unwrap_or_else(default_exclude_types);

        let exclude_titles = config
            .exclude_titles
            .unwrap_or_else(default_exclude_titles)
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|err| MetaError::ConfigValue(format!("title pattern {pattern}: {err}")))
            })
            .collect::<Result<Vec<_>, MetaError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            api_url,
            communities,
            page_size,
            access_token_env,
            exclude_types,
            exclude_titles,
        })
    }
}

/// Zenodo used to prefix community sets with `user-` in OAI-PMH; the REST
/// API wants the bare community id.
fn normalize_community(value: &str) -> String {
    let trimmed = value.trim();
    trimmed.strip_prefix("user-").unwrap_or(trimmed).to_string()
}

pub fn default_communities() -> Vec<String> {
    [
        "lexibank",
        "dictionaria",
        "calc",
        "cldf-datasets",
        "clics",
        "clld",
        "diachronica",
        "dighl",
        "digling",
        "tular",
    ]
    .iter()
    .map(|value| value.to_string())
    .collect()
}

pub fn default_exclude_types() -> Vec<String> {
    [
        "lesson",
        "poster",
        "presentation",
        "publication-annotationcollection",
        "publication-article",
        "publication-book",
        "publication-conferencepaper",
        "publication-other",
        "publication-proposal",
        "publication-report",
        "publication-softwaredocumentation",
        "video",
    ]
    .iter()
    .map(|value| value.to_string())
    .collect()
}

/// Titles of tool releases and reference catalogs that live in the same
/// communities as the datasets but are not datasets themselves.
pub fn default_exclude_titles() -> Vec<String> {
    [
        r"^Glottolog database",
        r"^Cross-Linguistic Transcription Systems: Final Version",
        r"^CLTS\. Cross-Linguistic Transcription Systems",
        r"^Cross-Linguistic Transcription Systems$",
        r"^CLLD Concepticon",
        r"^(?:clld/)?(?:clld:)?\s*clld (?:- )?(?:a )?toolkit for",
        r"^PYCLTS\.",
        r"^cldf/cldf:",
        r"^cldf: Baseline for first experiments",
        r"^clics/pyclics:",
        r"^clics/pyclics-clustering:",
        r"^clld/clics: CLLD app",
        r"^CL Toolkit\. A Python Library",
        r"^DAFSA: a Python Library",
        r"^edictor: EDICTOR version",
        r"^EDICTOR\. A web-based interactive tool",
        r"^glottobank/cldf:",
        r"^LingPy[-:. ]",
        r"^lingpy/lingpy:",
        r"^lingpy/lingpy-tutorial: LingPy Tutorial",
        r"^LingRex[:.] Linguistic Reconstruction",
        r"^lingpy/lingrex:",
        r"^paceofchange:",
        r"^PoePy\. A Python library",
        r"^PyBor: A Python library",
        r"^\S*?glottolog\S*?:",
        r"^\S*?clts\S*?:",
        r"^\S*?concepticon\S*?:",
    ]
    .iter()
    .map(|value| value.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.api_url, DEFAULT_API_URL);
        assert_eq!(resolved.communities.len(), 10);
        assert_eq!(resolved.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(resolved.access_token_env, DEFAULT_ACCESS_TOKEN_ENV);
    }

    #[test]
    fn strips_legacy_community_prefix() {
        let config = Config {
            communities: Some(vec!["user-lexibank".to_string()]),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.communities, vec!["lexibank".to_string()]);
    }
}
