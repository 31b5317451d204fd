// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Per-partition manifest (`meta.json`) and integrity verification.
//!
//! The manifest is a JSON object keyed by filename, rewritten atomically by
//! write-to-temp-and-rename. The rename is the publication point for a
//! partition: readers that loaded the prior manifest keep the prior state.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use core_types::error::ErrorKind;
use core_types::layout::MANIFEST_FILE;
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Bar-ratio floor below which a session is corrupted.
pub const RATIO_CORRUPT_FLOOR: f64 = 0.80;
/// Bar-ratio floor below which a session is merely incomplete.
pub const RATIO_VALID_FLOOR: f64 = 0.95;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest missing: {}", .0.display())]
    Missing(PathBuf),
    #[error("manifest corrupt at {}: {detail}", .path.display())]
    Corrupt { path: PathBuf, detail: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManifestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManifestError::Missing(_) => ErrorKind::ManifestMissing,
            ManifestError::Corrupt { .. } => ErrorKind::ManifestCorrupt,
            ManifestError::Io(_) => ErrorKind::StorageUnavailable,
        }
    }
}

/// One file the partition owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub file_name: String,
    pub record_count: u64,
    pub sha256: String,
    pub symbol: String,
    pub session_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
    pub build_version: String,
}

/// Filename-keyed manifest; a BTreeMap keeps serialization byte-stable.
pub type PartitionManifest = BTreeMap<String, ManifestEntry>;

pub fn manifest_path(partition_dir: &Path) -> PathBuf {
    partition_dir.join(MANIFEST_FILE)
}

pub fn load(partition_dir: &Path) -> Result<PartitionManifest, ManifestError> {
    let path = manifest_path(partition_dir);
    if !path.is_file() {
        return Err(ManifestError::Missing(path));
    }
    let file = File::open(&path)?;
    serde_json::from_reader(file).map_err(|err| ManifestError::Corrupt {
        path,
        detail: err.to_string(),
    })
}

fn load_or_default(partition_dir: &Path) -> Result<PartitionManifest, ManifestError> {
    match load(partition_dir) {
        Ok(manifest) => Ok(manifest),
        Err(ManifestError::Missing(_)) => Ok(PartitionManifest::new()),
        Err(other) => Err(other),
    }
}

/// Atomically rewrite the partition manifest.
pub fn write(partition_dir: &Path, manifest: &PartitionManifest) -> Result<(), ManifestError> {
    std::fs::create_dir_all(partition_dir)?;
    let final_path = manifest_path(partition_dir);
    let temp_path = partition_dir.join(format!("{MANIFEST_FILE}.tmp-{}", Uuid::new_v4()));
    let file = File::create(&temp_path)?;
    serde_json::to_writer_pretty(&file, manifest).map_err(|err| ManifestError::Corrupt {
        path: temp_path.clone(),
        detail: err.to_string(),
    })?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&temp_path, &final_path)?;
    Ok(())
}

/// Record (or replace) one file entry and republish the manifest.
pub fn record_file(partition_dir: &Path, entry: ManifestEntry) -> Result<(), ManifestError> {
    let mut manifest = load_or_default(partition_dir)?;
    manifest.insert(entry.file_name.clone(), entry);
    write(partition_dir, &manifest)
}

/// SHA-256 of a file's content as lowercase hex.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

/// Detail behind a `Corrupted` partition verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// Named in the manifest, absent on disk.
    pub missing_files: Vec<String>,
    /// Present but failing the recorded hash.
    pub corrupted_files: Vec<String>,
    /// On disk but unknown to the manifest.
    pub unexpected_files: Vec<String>,
    pub verified_files: usize,
    pub total_files: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PartitionStatus {
    Valid,
    MetadataMissing,
    Corrupted(IntegrityReport),
}

/// Re-hash every manifest-named file in the partition and cross-check the
/// directory contents. Transient artifacts (temp files, SQLite journals)
/// are ignored.
pub fn verify_partition(partition_dir: &Path) -> Result<PartitionStatus, ManifestError> {
    let manifest = match load(partition_dir) {
        Ok(manifest) => manifest,
        Err(ManifestError::Missing(_)) => return Ok(PartitionStatus::MetadataMissing),
        Err(other) => return Err(other),
    };
    let mut report = IntegrityReport {
        total_files: manifest.len(),
        ..IntegrityReport::default()
    };
    for (name, entry) in &manifest {
        let path = partition_dir.join(name);
        if !path.is_file() {
            report.missing_files.push(name.clone());
            continue;
        }
        let hash = sha256_file(&path)?;
        if hash == entry.sha256 {
            report.verified_files += 1;
        } else {
            warn!(
                "hash mismatch for {}: recorded {} observed {}",
                path.display(),
                entry.sha256,
                hash
            );
            report.corrupted_files.push(name.clone());
        }
    }
    for dir_entry in std::fs::read_dir(partition_dir)? {
        let path = dir_entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == MANIFEST_FILE || is_transient(name) {
            continue;
        }
        if !manifest.contains_key(name) {
            report.unexpected_files.push(name.to_string());
        }
    }
    report.missing_files.sort();
    report.corrupted_files.sort();
    report.unexpected_files.sort();
    if report.missing_files.is_empty()
        && report.corrupted_files.is_empty()
        && report.unexpected_files.is_empty()
    {
        Ok(PartitionStatus::Valid)
    } else {
        Ok(PartitionStatus::Corrupted(report))
    }
}

fn is_transient(name: &str) -> bool {
    name.contains(".tmp-")
        || name.ends_with("-journal")
        || name.ends_with("-wal")
        || name.ends_with("-shm")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Valid,
    Incomplete,
    Corrupted,
}

/// File verification combined with expected-vs-actual minute-bar math.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIntegrityReport {
    pub symbol: String,
    pub session_date: NaiveDate,
    pub status: SessionStatus,
    pub expected_minute_bars: u32,
    pub actual_minute_bars: u64,
    pub bar_ratio: f64,
    pub metadata_missing: bool,
    pub files: Option<IntegrityReport>,
}

/// Downgrade ladder: corrupted files or ratio < 0.80 condemn the session;
/// ratio < 0.95 or missing metadata leave it incomplete. A closed session
/// (expected 0) carries a ratio of 1.
pub fn grade_session(
    partition: &PartitionStatus,
    expected_minute_bars: u32,
    actual_minute_bars: u64,
) -> (SessionStatus, f64) {
    let ratio = if expected_minute_bars == 0 {
        1.0
    } else {
        (actual_minute_bars as f64 / expected_minute_bars as f64).min(1.0)
    };
    let files_damaged = matches!(partition, PartitionStatus::Corrupted(_));
    let metadata_missing = matches!(partition, PartitionStatus::MetadataMissing);
    let status = if files_damaged || ratio < RATIO_CORRUPT_FLOOR {
        SessionStatus::Corrupted
    } else if ratio < RATIO_VALID_FLOOR || metadata_missing {
        SessionStatus::Incomplete
    } else {
        SessionStatus::Valid
    };
    (status, ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn entry(name: &str, sha: &str) -> ManifestEntry {
        ManifestEntry {
            file_name: name.to_string(),
            record_count: 3,
            sha256: sha.to_string(),
            symbol: "SPX".to_string(),
            session_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            created_utc: DateTime::parse_from_rfc3339("2024-01-15T21:05:00Z")
                .unwrap()
                .with_timezone(&Utc),
            build_version: "0.3.0".to_string(),
        }
    }

    fn seed_file(dir: &Path, name: &str, content: &[u8]) -> String {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        sha256_file(&path).unwrap()
    }

    #[test]
    fn manifest_round_trips_with_camel_case_keys() {
        let dir = tempdir().unwrap();
        let mut manifest = PartitionManifest::new();
        manifest.insert("chain_2024-01-15.parquet".to_string(), entry("chain_2024-01-15.parquet", "ab"));
        write(dir.path(), &manifest).unwrap();

        let raw = std::fs::read_to_string(manifest_path(dir.path())).unwrap();
        assert!(raw.contains("\"recordCount\""));
        assert!(raw.contains("\"sessionDate\": \"2024-01-15\""));
        assert!(raw.contains("\"buildVersion\""));

        assert_eq!(load(dir.path()).unwrap(), manifest);
        // No temp file survives the rename.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.unwrap().file_name().into_string().ok())
            .filter(|n| n.contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn verify_reports_the_flipped_file_exactly() {
        let dir = tempdir().unwrap();
        let chain = "chain_2024-01-15.parquet";
        let snaps = "snapshots_2024-01-15.parquet";
        let chain_sha = seed_file(dir.path(), chain, b"columnar chain bytes");
        let snaps_sha = seed_file(dir.path(), snaps, b"columnar snapshot bytes");
        record_file(dir.path(), entry(chain, &chain_sha)).unwrap();
        record_file(dir.path(), entry(snaps, &snaps_sha)).unwrap();
        assert_eq!(verify_partition(dir.path()).unwrap(), PartitionStatus::Valid);

        // Flip one byte in the chain file.
        let mut bytes = std::fs::read(dir.path().join(chain)).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(dir.path().join(chain), &bytes).unwrap();

        match verify_partition(dir.path()).unwrap() {
            PartitionStatus::Corrupted(report) => {
                assert_eq!(report.corrupted_files, vec![chain.to_string()]);
                assert!(report.missing_files.is_empty());
                assert!(report.unexpected_files.is_empty());
                assert_eq!(report.total_files, 2);
                assert_eq!(report.verified_files, report.total_files - 1);
            }
            other => panic!("expected Corrupted, got {other:?}"),
        }
    }

    #[test]
    fn verify_reports_missing_and_unexpected_files() {
        let dir = tempdir().unwrap();
        let named = "chain_2024-01-15.parquet";
        let sha = seed_file(dir.path(), named, b"bytes");
        record_file(dir.path(), entry(named, &sha)).unwrap();
        std::fs::remove_file(dir.path().join(named)).unwrap();
        seed_file(dir.path(), "stray.parquet", b"untracked");
        // Transient artifacts are not flagged.
        seed_file(dir.path(), "bars_1m.sqlite-journal", b"journal");

        match verify_partition(dir.path()).unwrap() {
            PartitionStatus::Corrupted(report) => {
                assert_eq!(report.missing_files, vec![named.to_string()]);
                assert_eq!(report.unexpected_files, vec!["stray.parquet".to_string()]);
                assert!(report.corrupted_files.is_empty());
            }
            other => panic!("expected Corrupted, got {other:?}"),
        }
    }

    #[test]
    fn absent_manifest_is_metadata_missing() {
        let dir = tempdir().unwrap();
        assert_eq!(
            verify_partition(dir.path()).unwrap(),
            PartitionStatus::MetadataMissing
        );
        assert!(matches!(
            load(dir.path()),
            Err(ManifestError::Missing(_))
        ));
    }

    #[test]
    fn unparsable_manifest_is_corrupt() {
        let dir = tempdir().unwrap();
        std::fs::write(manifest_path(dir.path()), b"{ not json").unwrap();
        assert!(matches!(
            load(dir.path()),
            Err(ManifestError::Corrupt { .. })
        ));
    }

    #[test]
    fn session_grade_ladder() {
        let valid = PartitionStatus::Valid;
        assert_eq!(grade_session(&valid, 390, 390).0, SessionStatus::Valid);
        assert_eq!(grade_session(&valid, 390, 371).0, SessionStatus::Valid); // 0.951
        assert_eq!(grade_session(&valid, 390, 350).0, SessionStatus::Incomplete); // 0.897
        assert_eq!(grade_session(&valid, 390, 311).0, SessionStatus::Corrupted); // 0.797
        // Closed session: expected 0 never downgrades on bars.
        assert_eq!(grade_session(&valid, 0, 0).0, SessionStatus::Valid);
        // Missing metadata caps at Incomplete even with full bars.
        let missing = PartitionStatus::MetadataMissing;
        assert_eq!(grade_session(&missing, 390, 390).0, SessionStatus::Incomplete);
        // A corrupted file condemns the session regardless of bars.
        let corrupted = PartitionStatus::Corrupted(IntegrityReport::default());
        assert_eq!(grade_session(&corrupted, 390, 390).0, SessionStatus::Corrupted);
    }
}
