use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use assert_matches::assert_matches;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use clld_meta::error::MetaError;
use clld_meta::fs_util::{extract_zip, is_enclosed};

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    fs::write(path, writer.finish().unwrap().into_inner()).unwrap();
}

#[test]
fn extracts_nested_entries() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("dataset.zip");
    write_zip(
        &archive,
        &[("ds-v1/README.md", "readme"), ("ds-v1/cldf/values.csv", "ID\n1\n")],
    );

    let target = temp.path().join("data");
    assert_eq!(extract_zip(&archive, &target).unwrap(), 2);
    assert_eq!(
        fs::read_to_string(target.join("ds-v1/cldf/values.csv")).unwrap(),
        "ID\n1\n"
    );
}

#[test]
fn entries_escaping_the_target_are_refused() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("evil.zip");
    write_zip(&archive, &[("../evil.txt", "gotcha")]);

    let target = temp.path().join("data");
    fs::create_dir_all(&target).unwrap();
    assert_matches!(extract_zip(&archive, &target), Err(MetaError::Zip(_)));
    assert!(!temp.path().join("evil.txt").exists());
    assert!(fs::read_dir(&target).unwrap().next().is_none());
}

#[test]
fn enclosed_paths() {
    assert!(is_enclosed(Path::new("cldf/forms.csv")));
    assert!(is_enclosed(Path::new("./forms.csv")));
    assert!(!is_enclosed(Path::new("")));
    assert!(!is_enclosed(Path::new("../forms.csv")));
    assert!(!is_enclosed(Path::new("cldf/../../forms.csv")));
    assert!(!is_enclosed(Path::new("/etc/passwd")));
}
