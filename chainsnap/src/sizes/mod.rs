//! Storage growth attribution across the snapshot chain.
//!
//! The input lists every file under the backup root once per snapshot it
//! is visible through. Hardlinked copies share an inode, so each inode's
//! size is charged exactly once, to the earliest snapshot it appears in.
//! Lines are consumed as a stream and grouped into consecutive runs of the
//! same inode; a run is settled as soon as a different inode shows up.

pub mod format;
pub mod report;

use crate::snapshot::SnapshotName;
use crate::utils::{ChainError, Result};
use format::human_size;
use report::SizeRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use tracing::debug;

/// A file first introduced by some snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub size: u64,

    /// Path inside the snapshot
    pub path: String,
}

/// Growth attributed to one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateBucket {
    pub total_bytes: u64,
    pub files: Vec<NewFile>,
}

/// Per-snapshot totals, in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub dates: BTreeMap<SnapshotName, DateBucket>,
}

#[derive(Debug, Serialize)]
struct DateTotal<'a> {
    date: &'a str,
    total_bytes: u64,
    human: String,
}

impl Aggregation {
    pub fn total_for(&self, timestamp: &str) -> u64 {
        SnapshotName::from_timestamp(timestamp)
            .and_then(|name| self.dates.get(&name))
            .map(|bucket| bucket.total_bytes)
            .unwrap_or(0)
    }

    /// One `date<TAB>size` line per snapshot. In verbose mode every snapshot
    /// but the first also lists the files it introduced; the first one is the
    /// initial full backup and would list everything.
    pub fn write_text<W: Write>(&self, out: &mut W, verbose: bool) -> io::Result<()> {
        for (index, (date, bucket)) in self.dates.iter().enumerate() {
            writeln!(out, "{}\t{}", date.timestamp(), human_size(bucket.total_bytes))?;
            if verbose && index > 0 {
                for file in &bucket.files {
                    writeln!(out, "\t{} {}", human_size(file.size), file.path)?;
                }
                writeln!(out)?;
            }
        }
        Ok(())
    }

    pub fn write_json<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let rows: Vec<DateTotal<'_>> = self
            .dates
            .iter()
            .map(|(date, bucket)| DateTotal {
                date: date.timestamp(),
                total_bytes: bucket.total_bytes,
                human: human_size(bucket.total_bytes),
            })
            .collect();
        serde_json::to_writer_pretty(&mut *out, &rows)?;
        writeln!(out)
    }
}

struct InodeRun {
    inode: String,
    size: u64,
    path: String,
    dates: Vec<SnapshotName>,
}

/// Streaming aggregator; feed it records in report order.
#[derive(Default)]
pub struct Aggregator {
    current: Option<InodeRun>,
    result: Aggregation,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: SizeRecord, line_no: usize) -> Result<()> {
        let (date, remainder) = record.locate().ok_or_else(|| ChainError::Report {
            line_no,
            line: format!("{} {} {}", record.inode, record.size, record.raw_path),
            reason: "no backup date",
        })?;

        let same_inode = matches!(&self.current, Some(run) if run.inode == record.inode);
        if !same_inode {
            self.flush();
            self.current = Some(InodeRun {
                inode: record.inode,
                size: record.size,
                path: remainder,
                dates: Vec::new(),
            });
        }
        if let Some(run) = self.current.as_mut() {
            run.dates.push(date);
        }
        Ok(())
    }

    fn flush(&mut self) {
        let Some(run) = self.current.take() else {
            return;
        };
        let Some(earliest) = run.dates.into_iter().min() else {
            return;
        };

        debug!(
            inode = %run.inode,
            date = earliest.timestamp(),
            path = %run.path,
            "Assigning inode"
        );
        let bucket = self.result.dates.entry(earliest).or_default();
        bucket.total_bytes += run.size;
        bucket.files.push(NewFile {
            size: run.size,
            path: run.path,
        });
    }

    pub fn finish(mut self) -> Aggregation {
        self.flush();
        self.result
    }
}

/// Aggregate a whole report.
pub fn aggregate<R: BufRead>(reader: R) -> Result<Aggregation> {
    let mut aggregator = Aggregator::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        if let Some(record) = SizeRecord::parse(&line, line_no)? {
            aggregator.push(record, line_no)?;
        }
    }
    Ok(aggregator.finish())
}
