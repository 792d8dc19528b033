use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, Trim, WriterBuilder};

use crate::domain::RecordId;
use crate::error::MetaError;
use crate::fs_util::is_enclosed;
use crate::store::Store;

/// A hand-curated list of record ids (`etc/blacklist.csv`,
/// `etc/whitelist.csv`).
///
/// The first column holds the id in any form [`RecordId`] understands;
/// further columns are free-form comments. The tool only ever reads these
/// files.
#[derive(Debug, Clone, Default)]
pub struct CuratedList {
    ids: BTreeMap<RecordId, String>,
}

impl CuratedList {
    pub fn load(path: &Utf8Path) -> Result<Self, MetaError> {
        let mut ids = BTreeMap::new();
        for row in read_rows(path)? {
            let Some(first) = row.first() else {
                continue;
            };
            let id = first.parse::<RecordId>().map_err(|err| MetaError::ListRead {
                path: path.as_std_path().to_path_buf(),
                message: err.to_string(),
            })?;
            let comment = row.get(1).cloned().unwrap_or_default();
            ids.insert(id, comment);
        }
        Ok(Self { ids })
    }

    pub fn from_ids<I: IntoIterator<Item = RecordId>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().map(|id| (id, String::new())).collect(),
        }
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.ids.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.ids.keys().copied()
    }

    pub fn comment(&self, id: RecordId) -> Option<&str> {
        self.ids.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Decides which cached records take part in download and catalog build.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub blacklist: CuratedList,
    pub whitelist: CuratedList,
}

impl Selection {
    pub fn load(store: &Store) -> Result<Self, MetaError> {
        Ok(Self {
            blacklist: CuratedList::load(&store.blacklist_path())?,
            whitelist: CuratedList::load(&store.whitelist_path())?,
        })
    }

    /// Blacklist presence always wins.
    pub fn is_selected(&self, id: RecordId) -> bool {
        !self.blacklist.contains(id)
    }

    /// Whether a record bypasses the automatic record filter during sync.
    pub fn is_forced(&self, id: RecordId) -> bool {
        self.whitelist.contains(id) && !self.blacklist.contains(id)
    }

    /// Ids listed in both files; left for the curator to sort out.
    pub fn conflicts(&self) -> Vec<RecordId> {
        self.whitelist
            .ids()
            .filter(|id| self.blacklist.contains(*id))
            .collect()
    }
}

/// Files known not to contain CLDF metadata (`etc/not-cldf.csv`).
///
/// Entries are `(record, path relative to the dataset folder)` with `/` as
/// separator. Entries pointing outside the dataset folder are dropped on
/// load. The list only grows and is written back sorted.
#[derive(Debug, Clone, Default)]
pub struct NotCldfList {
    path: Utf8PathBuf,
    entries: BTreeSet<(RecordId, String)>,
    added: usize,
}

impl NotCldfList {
    pub fn load(path: &Utf8Path) -> Result<Self, MetaError> {
        let mut entries = BTreeSet::new();
        for row in read_rows(path)? {
            let (Some(id), Some(file)) = (row.first(), row.get(1)) else {
                continue;
            };
            let id = id.parse::<RecordId>().map_err(|err| MetaError::ListRead {
                path: path.as_std_path().to_path_buf(),
                message: err.to_string(),
            })?;
            let file = normalize_file(file);
            if !is_enclosed(Path::new(&file)) {
                tracing::warn!("ignoring {path} entry {id},{file}: not a path inside the dataset folder");
                continue;
            }
            entries.insert((id, file));
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            added: 0,
        })
    }

    pub fn contains(&self, id: RecordId, file: &str) -> bool {
        self.entries.contains(&(id, normalize_file(file)))
    }

    /// Returns `true` when the pair was not known before.
    pub fn insert(&mut self, id: RecordId, file: &str) -> bool {
        let inserted = self.entries.insert((id, normalize_file(file)));
        if inserted {
            self.added += 1;
        }
        inserted
    }

    pub fn entries(&self) -> impl Iterator<Item = (RecordId, &str)> {
        self.entries.iter().map(|(id, file)| (*id, file.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries inserted since loading.
    pub fn added(&self) -> usize {
        self.added
    }

    pub fn save(&self) -> Result<(), MetaError> {
        let write_err = |message: String| MetaError::ListWrite {
            path: self.path.as_std_path().to_path_buf(),
            message,
        };
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer
            .write_record(["ID", "File"])
            .map_err(|err| write_err(err.to_string()))?;
        for (id, file) in &self.entries {
            writer
                .write_record([id.to_string().as_str(), file.as_str()])
                .map_err(|err| write_err(err.to_string()))?;
        }
        let content = writer
            .into_inner()
            .map_err(|err| write_err(err.to_string()))?;
        Store::write_bytes_atomic(&self.path, &content)
    }
}

fn normalize_file(file: &str) -> String {
    file.trim().replace('\\', "/")
}

/// Reads a headed CSV file, skipping blank rows and `#` comment rows. A
/// missing file reads as empty.
fn read_rows(path: &Utf8Path) -> Result<Vec<Vec<String>>, MetaError> {
    if !path.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_path(path.as_std_path())
        .map_err(|err| MetaError::ListRead {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| MetaError::ListRead {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })?;
        let row = record.iter().map(str::to_string).collect::<Vec<_>>();
        if row.first().map(|value| value.is_empty()).unwrap_or(true) {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}
