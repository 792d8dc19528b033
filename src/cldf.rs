//! Minimal reader for CLDF datasets described by JSON metadata files.
//!
//! Only what the catalog needs: identify a metadata file, find tables by
//! their component, and pull selected columns (by `propertyUrl`) out of the
//! CSV data, which may also be shipped as `<table>.zip`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use serde_json::Value;

use crate::error::MetaError;
use crate::fs_util::{is_enclosed, read_zip_member};

pub const TERMS_URL: &str = "http://cldf.clld.org/v1.0/terms.rdf";

/// Column values of one table row, keyed by CLDF term.
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct CldfMetadata {
    path: PathBuf,
    json: Value,
}

/// Returns the parsed metadata when `path` is a CLDF JSON metadata file.
///
/// Anything unreadable or unparsable simply is not CLDF.
pub fn sniff(path: &Path) -> Option<CldfMetadata> {
    let mut file = fs::File::open(path).ok()?;
    let mut head = [0u8; 64];
    let read = file.read(&mut head).ok()?;
    let starts_with_brace = head[..read]
        .iter()
        .find(|byte| !byte.is_ascii_whitespace() && !matches!(byte, 0xEF | 0xBB | 0xBF))
        .map(|byte| *byte == b'{')
        .unwrap_or(false);
    if !starts_with_brace {
        return None;
    }

    let content = fs::read(path).ok()?;
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content.as_slice());
    let json: Value = serde_json::from_slice(content).ok()?;
    let conforms_to = json.get("dc:conformsTo").and_then(Value::as_str)?;
    if !conforms_to.starts_with(TERMS_URL) {
        return None;
    }
    Some(CldfMetadata {
        path: path.to_path_buf(),
        json,
    })
}

impl CldfMetadata {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The CLDF module, e.g. `Wordlist` or `StructureDataset`.
    pub fn module(&self) -> String {
        self.json
            .get("dc:conformsTo")
            .and_then(Value::as_str)
            .and_then(|url| url.rsplit('#').next())
            .unwrap_or("Generic")
            .to_string()
    }

    pub fn table(&self, component: &str) -> Option<&Value> {
        let url = format!("{TERMS_URL}#{component}");
        self.json
            .get("tables")
            .and_then(Value::as_array)?
            .iter()
            .find(|table| table.get("dc:conformsTo").and_then(Value::as_str) == Some(url.as_str()))
    }

    pub fn has_table(&self, component: &str) -> bool {
        self.table(component).is_some()
    }

    /// Reads the requested `terms` from every row of the `component` table.
    ///
    /// Cells that are empty or belong to columns not mapped to one of
    /// `terms` are left out of the row. A missing component yields no rows.
    pub fn rows(&self, component: &str, terms: &[&str]) -> Result<Vec<Row>, MetaError> {
        let Some(table) = self.table(component) else {
            return Ok(Vec::new());
        };
        let url = table
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| MetaError::Filesystem(format!("{component} without url")))?;

        let wanted = terms
            .iter()
            .map(|term| (format!("{TERMS_URL}#{term}"), term.to_string()))
            .collect::<HashMap<_, _>>();
        let column_terms = table
            .get("tableSchema")
            .and_then(|schema| schema.get("columns"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|column| {
                let name = column.get("name").and_then(Value::as_str)?;
                let property = column.get("propertyUrl").and_then(Value::as_str)?;
                let term = wanted.get(property)?;
                Some((name.to_string(), term.clone()))
            })
            .collect::<HashMap<_, _>>();

        let content = self.read_table(url)?;
        let delimiter = self.delimiter(table);
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(content.as_slice());

        let headers = reader
            .headers()
            .map_err(|err| MetaError::Filesystem(format!("{url}: {err}")))?
            .clone();
        let positions = headers
            .iter()
            .enumerate()
            .filter_map(|(index, header)| {
                let header = header.trim_start_matches('\u{feff}');
                column_terms.get(header).map(|term| (index, term.clone()))
            })
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| MetaError::Filesystem(format!("{url}: {err}")))?;
            let row = positions
                .iter()
                .filter_map(|(index, term)| {
                    record
                        .get(*index)
                        .filter(|cell| !cell.is_empty())
                        .map(|cell| (term.clone(), cell.to_string()))
                })
                .collect::<Row>();
            rows.push(row);
        }
        Ok(rows)
    }

    fn read_table(&self, url: &str) -> Result<Vec<u8>, MetaError> {
        if !is_enclosed(Path::new(url)) {
            return Err(MetaError::Filesystem(format!(
                "table url {url} points outside {}",
                self.path.display()
            )));
        }
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));
        let table_path = base.join(url);
        if table_path.is_file() {
            return fs::read(&table_path)
                .map_err(|err| MetaError::Filesystem(format!("read {}: {err}", table_path.display())));
        }

        let mut zipped = table_path.clone().into_os_string();
        zipped.push(".zip");
        let zipped = PathBuf::from(zipped);
        let file_name = table_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if zipped.is_file() {
            if let Some(content) = read_zip_member(&zipped, &file_name)? {
                return Ok(content);
            }
        }
        Err(MetaError::Filesystem(format!(
            "table {} not found",
            table_path.display()
        )))
    }

    fn delimiter(&self, table: &Value) -> u8 {
        table
            .get("dialect")
            .or_else(|| self.json.get("dialect"))
            .and_then(|dialect| dialect.get("delimiter"))
            .and_then(Value::as_str)
            .filter(|delimiter| delimiter.len() == 1)
            .map(|delimiter| delimiter.as_bytes()[0])
            .unwrap_or(b',')
    }
}
