// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::fmt;

use serde::Serialize;

/// Stable error classification surfaced at the query boundary.
///
/// Every store error maps onto exactly one kind; external collaborators
/// key exit codes and retry decisions off this, never off message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidArgument,
    StorageUnavailable,
    StorageBusy,
    SchemaMismatch,
    ManifestMissing,
    ManifestCorrupt,
    IntegrityViolation,
    NoUnderlying,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::StorageBusy => "storage_busy",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::ManifestMissing => "manifest_missing",
            ErrorKind::ManifestCorrupt => "manifest_corrupt",
            ErrorKind::IntegrityViolation => "integrity_violation",
            ErrorKind::NoUnderlying => "no_underlying",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
