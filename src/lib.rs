pub mod app;
pub mod catalog;
pub mod cldf;
pub mod config;
pub mod curation;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod metadata;
pub mod output;
pub mod store;
pub mod zenodo;
