use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Checksum, RecordId};
use crate::error::MetaError;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub concept_id: Option<RecordId>,
    #[serde(default)]
    pub doi: Option<String>,
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creators: Vec<String>,
    #[serde(default)]
    pub contributors: Vec<String>,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub communities: Vec<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub zenodo_link: String,
    #[serde(default)]
    pub github_links: Vec<String>,
    #[serde(default)]
    pub related_dois: Vec<String>,
    #[serde(default)]
    pub files: Vec<RecordFile>,
}

impl Record {
    pub fn zip_files(&self) -> impl Iterator<Item = &RecordFile> {
        self.files.iter().filter(|file| file.is_zip())
    }

    pub fn has_zip_files(&self) -> bool {
        self.zip_files().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFile {
    pub key: String,
    pub link: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl RecordFile {
    pub fn is_zip(&self) -> bool {
        self.key.to_lowercase().ends_with(".zip")
    }

    pub fn checksum(&self) -> Result<Option<Checksum>, MetaError> {
        self.checksum
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(str::parse::<Checksum>)
            .transpose()
    }

    /// Last path component of the key; keys may contain folders.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// All records known from the last sync, keyed by record id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataCache {
    pub synced_at: Option<DateTime<Utc>>,
    pub records: BTreeMap<RecordId, Record>,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    records: Vec<Record>,
}

impl MetadataCache {
    pub fn from_records<I: IntoIterator<Item = Record>>(records: I) -> Self {
        Self {
            synced_at: None,
            records: records
                .into_iter()
                .map(|record| (record.id, record))
                .collect(),
        }
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn load(path: &Utf8Path) -> Result<Self, MetaError> {
        if !path.as_std_path().exists() {
            return Err(MetaError::MissingMetadata(path.as_std_path().to_path_buf()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| MetaError::Filesystem(format!("read {path}: {err}")))?;
        let file: CacheFile = serde_json::from_str(&content)
            .map_err(|err| MetaError::MetadataParse(err.to_string()))?;
        let mut cache = Self::from_records(file.records);
        cache.synced_at = file.synced_at;
        Ok(cache)
    }

    pub fn load_or_default(path: &Utf8Path) -> Result<Self, MetaError> {
        match Self::load(path) {
            Err(MetaError::MissingMetadata(_)) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), MetaError> {
        let file = CacheFile {
            synced_at: self.synced_at,
            records: self.records.values().cloned().collect(),
        };
        Store::write_json_atomic(path, &file)
    }
}
