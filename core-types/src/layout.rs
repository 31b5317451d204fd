// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Deterministic partition path derivation and enumeration.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

use crate::types::Symbol;

pub const DATASET_DIR: &str = "alpha";
pub const BARS_FILE: &str = "bars_1m.sqlite";
pub const MANIFEST_FILE: &str = "meta.json";

pub fn chain_file_name(session_date: NaiveDate) -> String {
    format!("chain_{}.parquet", session_date.format("%Y-%m-%d"))
}

pub fn snapshots_file_name(session_date: NaiveDate) -> String {
    format!("snapshots_{}.parquet", session_date.format("%Y-%m-%d"))
}

/// One month of one symbol under the dataset root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    pub symbol: Symbol,
    pub year: i32,
    pub month: u32,
}

impl PartitionId {
    pub fn for_date(symbol: Symbol, date: NaiveDate) -> Self {
        Self {
            symbol,
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:04}/{:02}", self.symbol, self.year, self.month)
    }
}

/// Pure mapping from (symbol, session date) to on-disk paths.
///
/// The data root is threaded in at construction; nothing here touches the
/// filesystem except [`PartitionLayout::enumerate_partitions`].
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    root: PathBuf,
}

impl PartitionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_dir(&self, symbol: &Symbol, year: i32, month: u32) -> PathBuf {
        self.root
            .join(DATASET_DIR)
            .join(symbol.as_str())
            .join(format!("{year:04}"))
            .join(format!("{month:02}"))
    }

    pub fn partition_dir_of(&self, id: &PartitionId) -> PathBuf {
        self.partition_dir(&id.symbol, id.year, id.month)
    }

    pub fn partition_dir_for(&self, symbol: &Symbol, date: NaiveDate) -> PathBuf {
        self.partition_dir(symbol, date.year(), date.month())
    }

    pub fn bars_path(&self, symbol: &Symbol, year: i32, month: u32) -> PathBuf {
        self.partition_dir(symbol, year, month).join(BARS_FILE)
    }

    pub fn bars_path_for(&self, symbol: &Symbol, date: NaiveDate) -> PathBuf {
        self.bars_path(symbol, date.year(), date.month())
    }

    pub fn chain_path(&self, symbol: &Symbol, session_date: NaiveDate) -> PathBuf {
        self.partition_dir_for(symbol, session_date)
            .join(chain_file_name(session_date))
    }

    pub fn snapshots_path(&self, symbol: &Symbol, session_date: NaiveDate) -> PathBuf {
        self.partition_dir_for(symbol, session_date)
            .join(snapshots_file_name(session_date))
    }

    pub fn manifest_path(&self, symbol: &Symbol, year: i32, month: u32) -> PathBuf {
        self.partition_dir(symbol, year, month).join(MANIFEST_FILE)
    }

    /// Walk `{root}/alpha` and list every `symbol/year/month` partition,
    /// sorted. Entries that do not parse as a symbol or a zero-padded
    /// year/month are skipped; an absent root yields an empty list.
    pub fn enumerate_partitions(&self) -> io::Result<Vec<PartitionId>> {
        let dataset = self.root.join(DATASET_DIR);
        if !dataset.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = BTreeSet::new();
        for symbol_entry in std::fs::read_dir(&dataset)? {
            let symbol_path = symbol_entry?.path();
            if !symbol_path.is_dir() {
                continue;
            }
            let Some(symbol) = dir_name(&symbol_path).and_then(|n| Symbol::parse(n).ok()) else {
                continue;
            };
            for year_entry in std::fs::read_dir(&symbol_path)? {
                let year_path = year_entry?.path();
                let Some(year) = dir_name(&year_path).and_then(parse_year) else {
                    continue;
                };
                for month_entry in std::fs::read_dir(&year_path)? {
                    let month_path = month_entry?.path();
                    let Some(month) = dir_name(&month_path).and_then(parse_month) else {
                        continue;
                    };
                    found.insert(PartitionId {
                        symbol: symbol.clone(),
                        year,
                        month,
                    });
                }
            }
        }
        Ok(found.into_iter().collect())
    }
}

fn dir_name(path: &Path) -> Option<&str> {
    if path.is_dir() {
        path.file_name()?.to_str()
    } else {
        None
    }
}

fn parse_year(name: &str) -> Option<i32> {
    if name.len() == 4 {
        name.parse().ok()
    } else {
        None
    }
}

fn parse_month(name: &str) -> Option<u32> {
    if name.len() == 2 {
        name.parse().ok().filter(|m| (1..=12).contains(m))
    } else {
        None
    }
}
