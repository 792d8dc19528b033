use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::catalog::{Catalog, collect_stats};
use crate::cldf::sniff;
use crate::config::ResolvedConfig;
use crate::curation::{NotCldfList, Selection};
use crate::domain::RecordId;
use crate::error::MetaError;
use crate::fs_util::extract_zip;
use crate::metadata::{MetadataCache, Record};
use crate::store::{Store, walk_files};
use crate::zenodo::{RecordFilter, ZenodoClient, parse_hit};

const PROGRESS_STEP: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub records: usize,
    pub communities: Vec<CommunityHits>,
    pub filtered: Vec<FilteredRecord>,
    pub added: Vec<RecordId>,
    pub removed: Vec<RecordId>,
    pub new_communities: Vec<String>,
    pub cache_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityHits {
    pub community: String,
    pub hits: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilteredRecord {
    pub id: RecordId,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadAction {
    Downloaded,
    Present,
    Blacklisted,
    NoArchive,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    pub id: RecordId,
    pub action: DownloadAction,
    pub files: usize,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub items: Vec<DownloadItem>,
}

impl DownloadResult {
    pub fn count(&self, action: DownloadAction) -> usize {
        self.items.iter().filter(|item| item.action == action).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResult {
    pub contributions: usize,
    pub datasets: usize,
    pub languages: usize,
    pub scanned: usize,
    pub skipped_known: usize,
    pub not_cldf_added: usize,
    pub output_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupResult {
    pub cancelled: bool,
    pub removed_files: Vec<String>,
    pub removed_dirs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn timed(message: impl Into<String>, start: Instant) -> Self {
        Self {
            message: message.into(),
            elapsed: Some(start.elapsed()),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Runs the curation stages against one project.
#[derive(Clone)]
pub struct App<Z: ZenodoClient> {
    store: Store,
    config: ResolvedConfig,
    zenodo: Z,
}

impl<Z: ZenodoClient> App<Z> {
    pub fn new(store: Store, config: ResolvedConfig, zenodo: Z) -> Self {
        Self {
            store,
            config,
            zenodo,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Fetches every record of the configured communities and replaces the
    /// metadata cache with them.
    pub fn update_metadata(&self, sink: &dyn ProgressSink) -> Result<SyncResult, MetaError> {
        let cache_path = self.store.metadata_path();
        sink.event(ProgressEvent::new("reading existing zenodo metadata"));
        let previous = MetadataCache::load_or_default(&cache_path)?;
        let selection = self.load_selection()?;
        let filter = RecordFilter::new(&self.config);

        let mut records = BTreeMap::<RecordId, Record>::new();
        let mut filtered = BTreeMap::<RecordId, FilteredRecord>::new();
        let mut communities = Vec::new();

        for community in &self.config.communities {
            let start = Instant::now();
            sink.event(ProgressEvent::new(format!("searching community {community}")));
            let hits = self.zenodo.list_community(community)?;
            communities.push(CommunityHits {
                community: community.clone(),
                hits: hits.len(),
            });
            sink.event(ProgressEvent::timed(
                format!("{} records in community {community}", hits.len()),
                start,
            ));

            for hit in &hits {
                let mut record = match parse_hit(hit) {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!("skipping search hit: {err}");
                        continue;
                    }
                };
                if !record.communities.contains(community) {
                    record.communities.push(community.clone());
                }

                if let Some(existing) = records.get_mut(&record.id) {
                    merge_communities(existing, &record.communities);
                    continue;
                }
                if filtered.contains_key(&record.id) {
                    continue;
                }
                if let Some(reason) = filter.rejection(&record) {
                    if !selection.is_forced(record.id) {
                        tracing::debug!(id = %record.id, "filtered: {reason}");
                        filtered.insert(
                            record.id,
                            FilteredRecord {
                                id: record.id,
                                title: record.title.clone(),
                                reason,
                            },
                        );
                        continue;
                    }
                    tracing::info!(id = %record.id, "whitelisted record kept despite {reason}");
                }
                records.insert(record.id, record);
            }
        }

        let known = self
            .config
            .communities
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>();
        let new_communities = records
            .values()
            .flat_map(|record| record.communities.iter())
            .filter(|community| !known.contains(*community))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        if !new_communities.is_empty() {
            tracing::info!(
                "additional communities mentioned: {}",
                new_communities.join(", ")
            );
        }

        let added = records
            .keys()
            .filter(|id| previous.get(**id).is_none())
            .copied()
            .collect();
        let removed = previous
            .records
            .keys()
            .filter(|id| !records.contains_key(*id))
            .copied()
            .collect();

        let cache = MetadataCache {
            synced_at: Some(Utc::now()),
            records,
        };
        sink.event(ProgressEvent::new(format!(
            "writing {} records to {cache_path}",
            cache.len()
        )));
        cache.save(&cache_path)?;

        Ok(SyncResult {
            records: cache.len(),
            communities,
            filtered: filtered.into_values().collect(),
            added,
            removed,
            new_communities,
            cache_path: cache_path.to_string(),
        })
    }

    /// Downloads and extracts the zip archives of every selected record
    /// whose dataset folder is missing or empty.
    pub fn download(&self, sink: &dyn ProgressSink) -> Result<DownloadResult, MetaError> {
        let cache = MetadataCache::load(&self.store.metadata_path())?;
        let selection = self.load_selection()?;
        let datasets_dir = self.store.datasets_dir();
        Store::ensure_dir(&datasets_dir)?;

        let mut items = Vec::new();
        let mut pending = Vec::new();
        for record in cache.records.values() {
            let action = if !selection.is_selected(record.id) {
                Some(DownloadAction::Blacklisted)
            } else if !record.has_zip_files() {
                Some(DownloadAction::NoArchive)
            } else if self.store.dataset_present(record.id) {
                Some(DownloadAction::Present)
            } else {
                None
            };
            match action {
                Some(action) => items.push(DownloadItem {
                    id: record.id,
                    action,
                    files: 0,
                    path: (action == DownloadAction::Present)
                        .then(|| self.store.dataset_dir(record.id).to_string()),
                }),
                None => pending.push(record),
            }
        }

        if pending.is_empty() {
            sink.event(ProgressEvent::new("datasets already up-to-date"));
        } else {
            sink.event(ProgressEvent::new(format!(
                "downloading {} datasets",
                pending.len()
            )));
        }

        let start = Instant::now();
        for (index, record) in pending.iter().enumerate() {
            let files = self.download_record(record)?;
            items.push(DownloadItem {
                id: record.id,
                action: DownloadAction::Downloaded,
                files,
                path: Some(self.store.dataset_dir(record.id).to_string()),
            });
            if (index + 1) % PROGRESS_STEP == 0 || index + 1 == pending.len() {
                sink.event(ProgressEvent::timed(
                    format!("downloaded {}/{}", index + 1, pending.len()),
                    start,
                ));
            }
        }

        items.sort_by_key(|item| item.id);
        Ok(DownloadResult { items })
    }

    fn download_record(&self, record: &Record) -> Result<usize, MetaError> {
        let datasets_dir = self.store.datasets_dir();
        let staging = self.store.staging_dir(".clld-meta-download", &datasets_dir)?;
        let archive_dir = staging.path().join("archives");
        let extract_dir = staging.path().join("data");
        fs::create_dir_all(&archive_dir).map_err(|err| MetaError::Filesystem(err.to_string()))?;
        fs::create_dir_all(&extract_dir).map_err(|err| MetaError::Filesystem(err.to_string()))?;

        let mut extracted = 0usize;
        for (index, file) in record.zip_files().enumerate() {
            let archive_path = archive_dir.join(format!("{index}-{}", file.file_name()));
            tracing::debug!(id = %record.id, file = file.key.as_str(), "downloading archive");
            self.zenodo.download_file(&file.link, &archive_path)?;
            if let Some(checksum) = file.checksum()? {
                checksum.verify_file(&archive_path)?;
            } else {
                tracing::warn!(id = %record.id, "{} has no checksum", file.key);
            }
            extracted += extract_zip(&archive_path, &extract_dir)?;
        }

        Store::replace_dir(&extract_dir, &self.store.dataset_dir(record.id))?;
        Ok(extracted)
    }

    /// Scans the downloaded datasets for CLDF metadata and regenerates the
    /// catalog in `cldf/`.
    pub fn make_cldf(&self, sink: &dyn ProgressSink) -> Result<CatalogResult, MetaError> {
        let cache = MetadataCache::load(&self.store.metadata_path())?;
        let selection = self.load_selection()?;
        let mut not_cldf = NotCldfList::load(&self.store.not_cldf_path())?;

        let selected = cache
            .records
            .values()
            .filter(|record| selection.is_selected(record.id))
            .cloned()
            .collect::<Vec<_>>();

        let missing = selected
            .iter()
            .filter(|record| record.has_zip_files() && !self.store.dataset_present(record.id))
            .map(|record| self.store.dataset_dir(record.id).to_string())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(MetaError::MissingDatasets(missing));
        }

        sink.event(ProgressEvent::new("finding cldf datasets"));
        let start = Instant::now();
        let mut found = Vec::new();
        let mut scanned = 0usize;
        let mut skipped_known = 0usize;
        for (index, record) in selected.iter().enumerate() {
            let dataset_dir = self.store.dataset_dir(record.id);
            for path in walk_files(dataset_dir.as_std_path())? {
                if !is_json(&path) {
                    continue;
                }
                let relative = relative_path(&path, dataset_dir.as_std_path());
                if not_cldf.contains(record.id, &relative) {
                    skipped_known += 1;
                    continue;
                }
                scanned += 1;
                match sniff(&path) {
                    Some(metadata) => {
                        tracing::debug!(id = %record.id, file = relative.as_str(), "cldf dataset");
                        found.push((record.id, relative, collect_stats(&metadata)));
                    }
                    None => {
                        tracing::debug!(id = %record.id, file = relative.as_str(), "not cldf");
                        not_cldf.insert(record.id, &relative);
                    }
                }
            }
            if (index + 1) % PROGRESS_STEP == 0 {
                sink.event(ProgressEvent::timed(
                    format!("scanned {}/{} records", index + 1, selected.len()),
                    start,
                ));
            }
        }

        if not_cldf.added() > 0 {
            sink.event(ProgressEvent::new(format!(
                "recording {} files in {}",
                not_cldf.added(),
                self.store.not_cldf_path()
            )));
            not_cldf.save()?;
        }

        sink.event(ProgressEvent::new(format!(
            "assembling catalog from {} cldf datasets",
            found.len()
        )));
        let catalog = Catalog::build(selected, found);
        let languages = catalog.languages().len();

        let cldf_dir = self.store.cldf_dir();
        let staging = self.store.staging_dir(".clld-meta-cldf", self.store.project_root())?;
        let output = staging.path().join("cldf");
        fs::create_dir_all(&output).map_err(|err| MetaError::Filesystem(err.to_string()))?;
        catalog.write(&output)?;
        Store::replace_dir(&output, &cldf_dir)?;

        Ok(CatalogResult {
            contributions: catalog.contributions.len(),
            datasets: catalog.datasets.len(),
            languages,
            scanned,
            skipped_known,
            not_cldf_added: not_cldf.added(),
            output_path: cldf_dir.to_string(),
        })
    }

    /// Deletes downloaded files listed in the not-CLDF list once `confirm`
    /// agrees. Dataset folders themselves are kept so the datasets still
    /// count as downloaded.
    pub fn cleanup<F>(&self, confirm: F, sink: &dyn ProgressSink) -> Result<CleanupResult, MetaError>
    where
        F: FnOnce(&[String]) -> bool,
    {
        let not_cldf = NotCldfList::load(&self.store.not_cldf_path())?;
        let targets = not_cldf
            .entries()
            .map(|(id, file)| (self.store.dataset_dir(id), self.store.dataset_dir(id).join(file)))
            .filter(|(_, path)| path.as_std_path().is_file())
            .collect::<Vec<_>>();

        let mut result = CleanupResult {
            cancelled: false,
            removed_files: Vec::new(),
            removed_dirs: Vec::new(),
        };
        if targets.is_empty() {
            sink.event(ProgressEvent::new("nothing to clean up"));
            return Ok(result);
        }

        let listing = targets
            .iter()
            .map(|(_, path)| path.to_string())
            .collect::<Vec<_>>();
        if !confirm(&listing) {
            result.cancelled = true;
            return Ok(result);
        }

        for (dataset_dir, path) in targets {
            fs::remove_file(path.as_std_path())
                .map_err(|err| MetaError::Filesystem(format!("rm {path}: {err}")))?;
            tracing::info!("rm {path}");
            result.removed_files.push(path.to_string());

            let mut parent = path.parent().map(|parent| parent.to_path_buf());
            while let Some(dir) = parent {
                if dir == dataset_dir || !dir.starts_with(&dataset_dir) {
                    break;
                }
                if crate::store::dir_has_entries(dir.as_std_path()) {
                    break;
                }
                fs::remove_dir(dir.as_std_path())
                    .map_err(|err| MetaError::Filesystem(format!("rmdir {dir}: {err}")))?;
                tracing::info!("rmdir {dir}");
                result.removed_dirs.push(dir.to_string());
                parent = dir.parent().map(|parent| parent.to_path_buf());
            }
        }
        sink.event(ProgressEvent::new(format!(
            "removed {} files",
            result.removed_files.len()
        )));
        Ok(result)
    }

    fn load_selection(&self) -> Result<Selection, MetaError> {
        let selection = Selection::load(&self.store)?;
        for id in selection.conflicts() {
            let reason = selection.blacklist.comment(id).unwrap_or_default();
            tracing::warn!(
                "record {id} is both blacklisted ({reason}) and whitelisted; the blacklist wins"
            );
        }
        Ok(selection)
    }
}

fn merge_communities(record: &mut Record, communities: &[String]) {
    for community in communities {
        if !record.communities.contains(community) {
            record.communities.push(community.clone());
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// `/`-separated path of `path` below `base`.
fn relative_path(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
