use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::MetaError;

const RECORD_PREFIXES: &[&str] = &[
    "oai:zenodo.org:",
    "https://zenodo.org/records/",
    "https://zenodo.org/record/",
    "http://zenodo.org/records/",
    "http://zenodo.org/record/",
    "https://doi.org/10.5281/zenodo.",
    "doi:10.5281/zenodo.",
    "10.5281/zenodo.",
];

/// Numeric Zenodo record id.
///
/// Accepts bare numbers as well as the forms a record id shows up in
/// curated lists and API payloads: record links, OAI identifiers and
/// Zenodo DOIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn zenodo_link(self) -> String {
        format!("https://zenodo.org/records/{}", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = MetaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let lowered = trimmed.to_lowercase();
        let digits = RECORD_PREFIXES
            .iter()
            .find_map(|prefix| lowered.strip_prefix(prefix))
            .unwrap_or(lowered.as_str())
            .trim_end_matches('/');
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(MetaError::InvalidRecordId(value.to_string()));
        }
        digits
            .parse()
            .map(Self)
            .map_err(|_| MetaError::InvalidRecordId(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

/// An `algorithm:hexdigest` checksum as published by Zenodo
/// (e.g. `md5:6f5902ac237024bdd0c176cb93063dc4`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl Checksum {
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn digest_reader<R: io::Read>(&self, mut reader: R) -> io::Result<String> {
        match self.algorithm {
            ChecksumAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                io::copy(&mut reader, &mut hasher)?;
                Ok(format!("{:x}", hasher.finalize()))
            }
            ChecksumAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                io::copy(&mut reader, &mut hasher)?;
                Ok(format!("{:x}", hasher.finalize()))
            }
        }
    }

    pub fn verify_bytes(&self, name: &str, data: &[u8]) -> Result<(), MetaError> {
        let actual = self
            .digest_reader(data)
            .map_err(|err| MetaError::Filesystem(err.to_string()))?;
        self.compare(name, actual)
    }

    pub fn verify_file(&self, path: &Path) -> Result<(), MetaError> {
        let file = File::open(path)
            .map_err(|err| MetaError::Filesystem(format!("open {}: {err}", path.display())))?;
        let actual = self
            .digest_reader(io::BufReader::new(file))
            .map_err(|err| MetaError::Filesystem(err.to_string()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.compare(&name, actual)
    }

    fn compare(&self, name: &str, actual: String) -> Result<(), MetaError> {
        if actual == self.hex {
            return Ok(());
        }
        Err(MetaError::ChecksumMismatch {
            file: name.to_string(),
            expected: self.to_string(),
            actual: format!("{}:{actual}", self.algorithm),
        })
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Checksum {
    type Err = MetaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = value
            .trim()
            .split_once(':')
            .ok_or_else(|| MetaError::InvalidChecksum(value.to_string()))?;
        let algorithm = match algorithm.to_lowercase().as_str() {
            "md5" => ChecksumAlgorithm::Md5,
            "sha256" => ChecksumAlgorithm::Sha256,
            other => return Err(MetaError::UnsupportedChecksum(other.to_string())),
        };
        let hex = hex.to_lowercase();
        let expected_len = match algorithm {
            ChecksumAlgorithm::Md5 => 32,
            ChecksumAlgorithm::Sha256 => 64,
        };
        if hex.len() != expected_len || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(MetaError::InvalidChecksum(value.to_string()));
        }
        Ok(Self { algorithm, hex })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_from_link() {
        let id: RecordId = "https://zenodo.org/record/3603755".parse().unwrap();
        assert_eq!(id.get(), 3603755);
        let id: RecordId = "oai:zenodo.org:3603755".parse().unwrap();
        assert_eq!(id, RecordId::new(3603755));
    }

    #[test]
    fn md5_of_empty_input() {
        let checksum: Checksum = "md5:d41d8cd98f00b204e9800998ecf8427e".parse().unwrap();
        checksum.verify_bytes("empty", b"").unwrap();
    }
}
