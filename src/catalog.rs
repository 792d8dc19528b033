use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use csv::WriterBuilder;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};

use crate::cldf::{CldfMetadata, Row, TERMS_URL};
use crate::domain::RecordId;
use crate::error::MetaError;
use crate::metadata::Record;

static GLOTTOCODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{4}[0-9]{4}$").unwrap());
static ISO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z]{3}$").unwrap());

const LIST_SEPARATOR: &str = ";";

pub fn is_glottocode(value: &str) -> bool {
    GLOTTOCODE_RE.is_match(value)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LanguageInfo {
    pub key: String,
    pub glottocode: Option<String>,
    pub iso: Option<String>,
    pub name: Option<String>,
}

impl LanguageInfo {
    fn from_row(row: &Row) -> Option<(String, Self)> {
        let id = row.get("id")?.clone();
        let glottocode = row.get("glottocode").filter(|code| is_glottocode(code)).cloned();
        let iso = row.get("iso639P3code").filter(|code| ISO_RE.is_match(code)).cloned();
        let key = glottocode.clone().or_else(|| iso.clone()).unwrap_or_else(|| id.clone());
        Some((
            id,
            Self {
                key,
                glottocode,
                iso,
                name: row.get("name").cloned(),
            },
        ))
    }

    /// A reference that the dataset's LanguageTable does not resolve.
    fn bare(reference: &str) -> Self {
        Self {
            key: reference.to_string(),
            glottocode: is_glottocode(reference).then(|| reference.to_string()),
            iso: None,
            name: None,
        }
    }
}

/// Per-dataset counts, keyed by language key (glottocode, else ISO code,
/// else the dataset-local id).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetStats {
    pub module: String,
    pub value_count: usize,
    pub languages: BTreeMap<String, LanguageInfo>,
    pub lang_values: BTreeMap<String, usize>,
    pub lang_parameters: BTreeMap<String, usize>,
    pub lang_forms: BTreeMap<String, usize>,
    pub lang_entries: BTreeMap<String, usize>,
    pub lang_examples: BTreeMap<String, usize>,
}

impl DatasetStats {
    pub fn glottocode_count(&self) -> usize {
        self.languages
            .values()
            .filter(|language| language.glottocode.is_some())
            .count()
    }

    pub fn form_count(&self) -> usize {
        self.lang_forms.values().sum()
    }

    pub fn entry_count(&self) -> usize {
        self.lang_entries.values().sum()
    }

    pub fn example_count(&self) -> usize {
        self.lang_examples.values().sum()
    }
}

pub fn collect_stats(dataset: &CldfMetadata) -> DatasetStats {
    let language_table = load_rows(
        dataset,
        "LanguageTable",
        &["id", "glottocode", "iso639P3code", "name"],
    )
    .iter()
    .filter_map(LanguageInfo::from_row)
    .collect::<BTreeMap<_, _>>();

    let mut stats = DatasetStats {
        module: dataset.module(),
        ..DatasetStats::default()
    };

    let mut parameters = BTreeMap::<String, BTreeSet<String>>::new();
    for row in load_rows(
        dataset,
        "ValueTable",
        &["languageReference", "parameterReference"],
    ) {
        let Some(reference) = row.get("languageReference") else {
            continue;
        };
        let key = resolve_language(&language_table, reference, &mut stats.languages);
        stats.value_count += 1;
        *stats.lang_values.entry(key.clone()).or_default() += 1;
        if let Some(parameter) = row.get("parameterReference") {
            parameters.entry(key).or_default().insert(parameter.clone());
        }
    }
    stats.lang_parameters = parameters
        .into_iter()
        .map(|(key, params)| (key, params.len()))
        .collect();

    stats.lang_forms = count_by_language(dataset, "FormTable", &language_table, &mut stats.languages);
    stats.lang_entries =
        count_by_language(dataset, "EntryTable", &language_table, &mut stats.languages);
    stats.lang_examples =
        count_by_language(dataset, "ExampleTable", &language_table, &mut stats.languages);

    stats
}

fn resolve_language(
    language_table: &BTreeMap<String, LanguageInfo>,
    reference: &str,
    seen: &mut BTreeMap<String, LanguageInfo>,
) -> String {
    let info = language_table
        .get(reference)
        .cloned()
        .unwrap_or_else(|| LanguageInfo::bare(reference));
    let key = info.key.clone();
    seen.entry(key.clone()).or_insert(info);
    key
}

fn count_by_language(
    dataset: &CldfMetadata,
    component: &str,
    language_table: &BTreeMap<String, LanguageInfo>,
    seen: &mut BTreeMap<String, LanguageInfo>,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for row in load_rows(dataset, component, &["languageReference"]) {
        let Some(reference) = row.get("languageReference") else {
            continue;
        };
        let key = resolve_language(language_table, reference, seen);
        *counts.entry(key).or_default() += 1;
    }
    counts
}

/// Broken or missing tables are skipped; a dataset with one bad table
/// still contributes the rest.
fn load_rows(dataset: &CldfMetadata, component: &str, terms: &[&str]) -> Vec<Row> {
    match dataset.rows(component, terms) {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!(
                "skipping {component} in {}: {err}",
                dataset.path().display()
            );
            Vec::new()
        }
    }
}

/// One CLDF dataset found inside a downloaded record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogDataset {
    pub id: String,
    pub record: RecordId,
    pub metadata_file: String,
    pub stats: DatasetStats,
}

/// The aggregated catalog, ready to be written as CLDF.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub contributions: Vec<Record>,
    pub datasets: Vec<CatalogDataset>,
}

impl Catalog {
    /// `found` holds `(record, metadata file relative to the dataset folder,
    /// stats)`; dataset ids are numbered per record in path order.
    pub fn build(mut contributions: Vec<Record>, mut found: Vec<(RecordId, String, DatasetStats)>) -> Self {
        contributions.sort_by_key(|record| record.id);
        found.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let mut per_record = BTreeMap::<RecordId, usize>::new();
        let datasets = found
            .into_iter()
            .map(|(record, metadata_file, stats)| {
                let counter = per_record.entry(record).or_default();
                *counter += 1;
                CatalogDataset {
                    id: format!("{record}-{counter}"),
                    record,
                    metadata_file,
                    stats,
                }
            })
            .collect();

        Self {
            contributions,
            datasets,
        }
    }

    /// Every glottocode seen in any dataset, with the first name and ISO
    /// code reported for it.
    pub fn languages(&self) -> BTreeMap<String, LanguageInfo> {
        let mut languages = BTreeMap::<String, LanguageInfo>::new();
        for dataset in &self.datasets {
            for info in dataset.stats.languages.values() {
                let Some(glottocode) = &info.glottocode else {
                    continue;
                };
                let entry = languages
                    .entry(glottocode.clone())
                    .or_insert_with(|| LanguageInfo {
                        key: glottocode.clone(),
                        glottocode: Some(glottocode.clone()),
                        iso: None,
                        name: None,
                    });
                if entry.name.is_none() {
                    entry.name = info.name.clone();
                }
                if entry.iso.is_none() {
                    entry.iso = info.iso.clone();
                }
            }
        }
        languages
    }

    pub fn write(&self, dir: &Path) -> Result<(), MetaError> {
        write_csv(
            &dir.join("contributions.csv"),
            &CONTRIBUTION_COLUMNS,
            self.contributions.iter().map(contribution_row),
        )?;

        write_csv(
            &dir.join("datasets.csv"),
            &DATASET_COLUMNS,
            self.datasets.iter().map(|dataset| {
                let stats = &dataset.stats;
                vec![
                    dataset.id.clone(),
                    dataset.record.to_string(),
                    dataset.metadata_file.clone(),
                    stats.module.clone(),
                    stats.languages.len().to_string(),
                    stats.glottocode_count().to_string(),
                    stats.value_count.to_string(),
                    stats.form_count().to_string(),
                    stats.entry_count().to_string(),
                    stats.example_count().to_string(),
                ]
            }),
        )?;

        write_csv(
            &dir.join("dataset-languages.csv"),
            &DATASET_LANGUAGE_COLUMNS,
            self.datasets.iter().flat_map(|dataset| {
                let stats = &dataset.stats;
                stats.languages.iter().filter_map(move |(key, info)| {
                    let glottocode = info.glottocode.as_ref()?;
                    let count = |map: &BTreeMap<String, usize>| {
                        map.get(key).copied().unwrap_or(0).to_string()
                    };
                    Some(vec![
                        format!("{}-{glottocode}", dataset.id),
                        dataset.id.clone(),
                        glottocode.clone(),
                        count(&stats.lang_values),
                        count(&stats.lang_parameters),
                        count(&stats.lang_forms),
                        count(&stats.lang_entries),
                        count(&stats.lang_examples),
                    ])
                })
            }),
        )?;

        write_csv(
            &dir.join("languages.csv"),
            &LANGUAGE_COLUMNS,
            self.languages().into_values().map(|language| {
                vec![
                    language.key.clone(),
                    language.name.unwrap_or_default(),
                    language.glottocode.unwrap_or_default(),
                    language.iso.unwrap_or_default(),
                ]
            }),
        )?;

        let metadata = serde_json::to_vec_pretty(&catalog_metadata())
            .map_err(|err| MetaError::CatalogWrite(err.to_string()))?;
        std::fs::write(dir.join("Generic-metadata.json"), metadata)
            .map_err(|err| MetaError::CatalogWrite(err.to_string()))?;
        Ok(())
    }
}

const CONTRIBUTION_COLUMNS: [&str; 15] = [
    "ID",
    "Name",
    "Description",
    "Version",
    "Creator",
    "Contributor",
    "DOI",
    "DOI_Related",
    "GitHub_Link",
    "Zenodo_Link",
    "Date",
    "Communities",
    "License",
    "Keywords",
    "Zenodo_Type",
];

const DATASET_COLUMNS: [&str; 10] = [
    "ID",
    "Contribution_ID",
    "Metadata_File",
    "Module",
    "Language_Count",
    "Glottocode_Count",
    "Value_Count",
    "Form_Count",
    "Entry_Count",
    "Example_Count",
];

const DATASET_LANGUAGE_COLUMNS: [&str; 8] = [
    "ID",
    "Dataset_ID",
    "Language_ID",
    "Value_Count",
    "Parameter_Count",
    "Form_Count",
    "Entry_Count",
    "Example_Count",
];

const LANGUAGE_COLUMNS: [&str; 4] = ["ID", "Name", "Glottocode", "ISO639P3code"];

fn contribution_row(record: &Record) -> Vec<String> {
    let opt = |value: &Option<String>| value.clone().unwrap_or_default();
    vec![
        record.id.to_string(),
        record.title.clone(),
        opt(&record.description),
        opt(&record.version),
        record.creators.join(LIST_SEPARATOR),
        record.contributors.join(LIST_SEPARATOR),
        opt(&record.doi),
        record.related_dois.join(LIST_SEPARATOR),
        record.github_links.join(LIST_SEPARATOR),
        record.zenodo_link.clone(),
        opt(&record.publication_date),
        record.communities.join(LIST_SEPARATOR),
        opt(&record.license),
        record.keywords.join(LIST_SEPARATOR),
        opt(&record.resource_type),
    ]
}

fn write_csv<I>(path: &Path, header: &[&str], rows: I) -> Result<(), MetaError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .map_err(|err| MetaError::CatalogWrite(format!("{}: {err}", path.display())))?;
    writer
        .write_record(header)
        .map_err(|err| MetaError::CatalogWrite(err.to_string()))?;
    for row in rows {
        writer
            .write_record(&row)
            .map_err(|err| MetaError::CatalogWrite(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| MetaError::CatalogWrite(err.to_string()))
}

fn column(name: &str, property: Option<&str>, separator: bool) -> Value {
    let mut column = json!({ "name": name, "datatype": "string" });
    if let Some(property) = property {
        column["propertyUrl"] = json!(format!("{TERMS_URL}#{property}"));
    }
    if separator {
        column["separator"] = json!(LIST_SEPARATOR);
    }
    column
}

fn catalog_metadata() -> Value {
    let contribution_columns = vec![
        column("ID", Some("id"), false),
        column("Name", Some("name"), false),
        column("Description", Some("description"), false),
        column("Version", None, false),
        column("Creator", None, true),
        column("Contributor", Some("contributor"), true),
        column("DOI", None, false),
        column("DOI_Related", None, true),
        column("GitHub_Link", None, true),
        column("Zenodo_Link", None, false),
        column("Date", None, false),
        column("Communities", None, true),
        column("License", None, false),
        column("Keywords", None, true),
        column("Zenodo_Type", None, false),
    ];
    let dataset_columns = vec![
        column("ID", Some("id"), false),
        column("Contribution_ID", Some("contributionReference"), false),
        column("Metadata_File", None, false),
        column("Module", None, false),
        column("Language_Count", None, false),
        column("Glottocode_Count", None, false),
        column("Value_Count", None, false),
        column("Form_Count", None, false),
        column("Entry_Count", None, false),
        column("Example_Count", None, false),
    ];
    let dataset_language_columns = vec![
        column("ID", Some("id"), false),
        column("Dataset_ID", None, false),
        column("Language_ID", Some("languageReference"), false),
        column("Value_Count", None, false),
        column("Parameter_Count", None, false),
        column("Form_Count", None, false),
        column("Entry_Count", None, false),
        column("Example_Count", None, false),
    ];
    let language_columns = vec![
        column("ID", Some("id"), false),
        column("Name", Some("name"), false),
        column("Glottocode", Some("glottocode"), false),
        column("ISO639P3code", Some("iso639P3code"), false),
    ];

    json!({
        "@context": ["http://www.w3.org/ns/csvw", {"@language": "en"}],
        "dc:conformsTo": format!("{TERMS_URL}#Generic"),
        "dc:title": "Catalog of CLDF datasets archived on Zenodo",
        "dialect": {"commentPrefix": null},
        "tables": [
            {
                "url": "contributions.csv",
                "dc:conformsTo": format!("{TERMS_URL}#ContributionTable"),
                "tableSchema": {"columns": contribution_columns, "primaryKey": ["ID"]}
            },
            {
                "url": "datasets.csv",
                "tableSchema": {
                    "columns": dataset_columns,
                    "primaryKey": ["ID"],
                    "foreignKeys": [{
                        "columnReference": ["Contribution_ID"],
                        "reference": {"resource": "contributions.csv", "columnReference": ["ID"]}
                    }]
                }
            },
            {
                "url": "dataset-languages.csv",
                "tableSchema": {
                    "columns": dataset_language_columns,
                    "primaryKey": ["ID"],
                    "foreignKeys": [
                        {
                            "columnReference": ["Dataset_ID"],
                            "reference": {"resource": "datasets.csv", "columnReference": ["ID"]}
                        },
                        {
                            "columnReference": ["Language_ID"],
                            "reference": {"resource": "languages.csv", "columnReference": ["ID"]}
                        }
                    ]
                }
            },
            {
                "url": "languages.csv",
                "dc:conformsTo": format!("{TERMS_URL}#LanguageTable"),
                "tableSchema": {"columns": language_columns, "primaryKey": ["ID"]}
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glottocode_shape() {
        assert!(is_glottocode("stan1295"));
        assert!(is_glottocode("nort2641"));
        assert!(!is_glottocode("deu"));
        assert!(!is_glottocode("Stan1295"));
    }

    #[test]
    fn dataset_ids_follow_path_order() {
        let record = RecordId::new(5);
        let catalog = Catalog::build(
            Vec::new(),
            vec![
                (record, "b/cldf/cldf-metadata.json".to_string(), DatasetStats::default()),
                (record, "a/cldf/cldf-metadata.json".to_string(), DatasetStats::default()),
            ],
        );
        assert_eq!(catalog.datasets[0].id, "5-1");
        assert_eq!(catalog.datasets[0].metadata_file, "a/cldf/cldf-metadata.json");
        assert_eq!(catalog.datasets[1].id, "5-2");
    }
}
