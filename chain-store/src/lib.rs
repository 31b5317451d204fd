// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Parquet column store for daily contract universes and minute snapshots.
//!
//! One file pair per session under the month partition. Writes are atomic:
//! temp file, content hash, rename, then manifest publication.

mod codec;
pub mod reader;
pub mod writer;

use core_types::error::ErrorKind;
use thiserror::Error;

pub use reader::{read_chain, read_snapshots, MoneynessBand, SnapshotFilter};
pub use writer::{write_chain, write_snapshots, SnapshotWriteOptions, WriteResult};

#[derive(Debug, Error)]
pub enum ChainStoreError {
    #[error("column store unavailable: {0}")]
    Unavailable(String),
    #[error("column store schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("row rejected: {0}")]
    RowRejected(String),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("manifest error: {0}")]
    Manifest(#[from] manifest::ManifestError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

impl ChainStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainStoreError::Unavailable(_) => ErrorKind::StorageUnavailable,
            ChainStoreError::SchemaMismatch(_) | ChainStoreError::Arrow(_) => {
                ErrorKind::SchemaMismatch
            }
            ChainStoreError::RowRejected(_) => ErrorKind::InvalidArgument,
            ChainStoreError::Parquet(_) => ErrorKind::StorageUnavailable,
            ChainStoreError::Manifest(err) => err.kind(),
            ChainStoreError::Io(_) => ErrorKind::StorageUnavailable,
            ChainStoreError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
