use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use serde_json::json;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use clld_meta::catalog::collect_stats;
use clld_meta::cldf::{TERMS_URL, sniff};

fn write_metadata(dir: &Path, name: &str, tables: serde_json::Value, module: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let metadata = json!({
        "@context": "http://www.w3.org/ns/csvw",
        "dc:conformsTo": format!("{TERMS_URL}#{module}"),
        "tables": tables
    });
    fs::write(&path, serde_json::to_vec_pretty(&metadata).unwrap()).unwrap();
    path
}

fn language_table(url: &str) -> serde_json::Value {
    json!({
        "url": url,
        "dc:conformsTo": format!("{TERMS_URL}#LanguageTable"),
        "tableSchema": {"columns": [
            {"name": "ID", "propertyUrl": format!("{TERMS_URL}#id")},
            {"name": "Glottocode", "propertyUrl": format!("{TERMS_URL}#glottocode")},
            {"name": "Comment"}
        ]}
    })
}

#[test]
fn sniff_rejects_non_cldf() {
    let temp = tempfile::tempdir().unwrap();
    let cases = [
        ("array.json", "[1, 2]"),
        ("broken.json", "{ \"dc:conformsTo\": "),
        ("other.json", r#"{"dc:conformsTo": "http://example.org/terms"}"#),
        ("package.json", r#"{"name": "x"}"#),
    ];
    for (name, content) in cases {
        let path = temp.path().join(name);
        fs::write(&path, content).unwrap();
        assert!(sniff(&path).is_none(), "{name}");
    }
    assert!(sniff(&temp.path().join("missing.json")).is_none());
}

#[test]
fn sniff_accepts_bom_and_whitespace() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("Generic-metadata.json");
    let content = format!("\u{feff}\n  {{\"dc:conformsTo\": \"{TERMS_URL}#Generic\"}}");
    fs::write(&path, content).unwrap();

    let metadata = sniff(&path).unwrap();
    assert_eq!(metadata.module(), "Generic");
    assert!(!metadata.has_table("LanguageTable"));
    assert!(metadata.rows("LanguageTable", &["id"]).unwrap().is_empty());
}

#[test]
fn rows_follow_property_urls_and_dialect() {
    let temp = tempfile::tempdir().unwrap();
    let mut table = language_table("languages.tsv");
    table["dialect"] = json!({"delimiter": "\t"});
    let path = write_metadata(temp.path(), "cldf-metadata.json", json!([table]), "Generic");
    fs::write(
        temp.path().join("languages.tsv"),
        "Comment\tGlottocode\tID\nfirst\tstan1295\tdeu\n\t\tnone\n",
    )
    .unwrap();

    let metadata = sniff(&path).unwrap();
    let rows = metadata.rows("LanguageTable", &["id", "glottocode"]).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], "deu");
    assert_eq!(rows[0]["glottocode"], "stan1295");
    assert!(!rows[0].contains_key("Comment"));
    assert!(!rows[1].contains_key("glottocode"));
}

#[test]
fn zipped_tables_are_read() {
    let temp = tempfile::tempdir().unwrap();
    let forms = json!({
        "url": "forms.csv",
        "dc:conformsTo": format!("{TERMS_URL}#FormTable"),
        "tableSchema": {"columns": [
            {"name": "ID", "propertyUrl": format!("{TERMS_URL}#id")},
            {"name": "Language_ID", "propertyUrl": format!("{TERMS_URL}#languageReference")}
        ]}
    });
    let path = write_metadata(
        temp.path(),
        "Wordlist-metadata.json",
        json!([language_table("languages.csv"), forms]),
        "Wordlist",
    );
    fs::write(
        temp.path().join("languages.csv"),
        "ID,Glottocode,Comment\nl1,nort2641,\nl2,,unknown\n",
    )
    .unwrap();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(
            "forms.csv",
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
    writer
        .write_all(b"ID,Language_ID\n1,l1\n2,l1\n3,l2\n4,abcd1234\n")
        .unwrap();
    let archive = writer.finish().unwrap().into_inner();
    fs::write(temp.path().join("forms.csv.zip"), archive).unwrap();

    let metadata = sniff(&path).unwrap();
    assert_eq!(metadata.rows("FormTable", &["languageReference"]).unwrap().len(), 4);

    let stats = collect_stats(&metadata);
    assert_eq!(stats.module, "Wordlist");
    assert_eq!(stats.form_count(), 4);
    assert_eq!(stats.lang_forms["nort2641"], 2);
    assert_eq!(stats.lang_forms["l2"], 1);
    assert_eq!(stats.lang_forms["abcd1234"], 1);
    assert_eq!(stats.languages.len(), 3);
    assert_eq!(stats.glottocode_count(), 2);
}

#[test]
fn unreferenced_languages_are_not_counted() {
    let temp = tempfile::tempdir().unwrap();
    let values = json!({
        "url": "values.csv",
        "dc:conformsTo": format!("{TERMS_URL}#ValueTable"),
        "tableSchema": {"columns": [
            {"name": "ID", "propertyUrl": format!("{TERMS_URL}#id")},
            {"name": "Language_ID", "propertyUrl": format!("{TERMS_URL}#languageReference")},
            {"name": "Parameter_ID", "propertyUrl": format!("{TERMS_URL}#parameterReference")}
        ]}
    });
    let path = write_metadata(
        temp.path(),
        "StructureDataset-metadata.json",
        json!([language_table("languages.csv"), values]),
        "StructureDataset",
    );
    fs::write(
        temp.path().join("languages.csv"),
        "ID,Glottocode,Comment\na,stan1295,\nb,stan1293,listed only\n",
    )
    .unwrap();
    fs::write(temp.path().join("values.csv"), "ID,Language_ID,Parameter_ID\n1,a,p1\n2,a,p2\n").unwrap();

    let stats = collect_stats(&sniff(&path).unwrap());
    assert_eq!(stats.languages.keys().collect::<Vec<_>>(), vec!["stan1295"]);
    assert_eq!(stats.glottocode_count(), 1);
    assert_eq!(stats.value_count, 2);
    assert_eq!(stats.lang_parameters["stan1295"], 2);
}

#[test]
fn table_urls_outside_the_dataset_are_refused() {
    let temp = tempfile::tempdir().unwrap();
    let dataset = temp.path().join("dataset");
    fs::create_dir_all(&dataset).unwrap();
    fs::write(temp.path().join("secret.csv"), "ID,Glottocode,Comment\nx,stan1295,\n").unwrap();

    let path = write_metadata(
        &dataset,
        "cldf-metadata.json",
        json!([language_table("../secret.csv")]),
        "Generic",
    );
    let metadata = sniff(&path).unwrap();
    assert!(metadata.rows("LanguageTable", &["id"]).is_err());
    assert!(collect_stats(&metadata).languages.is_empty());
}
