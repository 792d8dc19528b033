use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CatalogResult, CleanupResult, DownloadAction, DownloadResult, ProgressEvent, ProgressSink,
    SyncResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_sync(result: &SyncResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_catalog(result: &CatalogResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cleanup(result: &CleanupResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress goes to the log, summaries to stdout.
pub struct HumanOutput;

impl HumanOutput {
    pub fn print_sync(result: &SyncResult) {
        for community in &result.communities {
            println!("{:>6}  {}", community.hits, community.community);
        }
        println!(
            "{} records cached in {} ({} new, {} gone, {} filtered)",
            result.records,
            result.cache_path,
            result.added.len(),
            result.removed.len(),
            result.filtered.len()
        );
        if !result.new_communities.is_empty() {
            println!(
                "additional communities: {}",
                result.new_communities.join(", ")
            );
        }
    }

    pub fn print_download(result: &DownloadResult) {
        for item in &result.items {
            if item.action == DownloadAction::Downloaded {
                println!("{} ({} files)", item.id, item.files);
            }
        }
        println!(
            "{} downloaded, {} present, {} blacklisted, {} without archive",
            result.count(DownloadAction::Downloaded),
            result.count(DownloadAction::Present),
            result.count(DownloadAction::Blacklisted),
            result.count(DownloadAction::NoArchive)
        );
    }

    pub fn print_catalog(result: &CatalogResult) {
        println!(
            "{} contributions, {} cldf datasets, {} languages written to {}",
            result.contributions, result.datasets, result.languages, result.output_path
        );
        if result.not_cldf_added > 0 {
            println!("{} files newly marked as not cldf", result.not_cldf_added);
        }
    }

    pub fn print_cleanup(result: &CleanupResult) {
        if result.cancelled {
            println!("cleanup cancelled");
            return;
        }
        println!(
            "removed {} files and {} empty directories",
            result.removed_files.len(),
            result.removed_dirs.len()
        );
    }
}

impl ProgressSink for HumanOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => tracing::info!("{}", event.message),
        }
    }
}
