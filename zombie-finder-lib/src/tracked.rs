use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

const EXPIRY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A tracked prefix and the moment its withdrawal is considered final.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZombieEntry {
    pub expiry: i64,
    pub prefix: String,
}

impl ZombieEntry {
    pub fn new(prefix: impl Into<String>, expiry: i64) -> Self {
        ZombieEntry {
            expiry,
            prefix: prefix.into(),
        }
    }

    /// Output key under which this entry's snapshot is stored.
    pub fn snapshot_key(&self) -> String {
        format!("{}|{}", self.prefix, self.expiry)
    }

    pub fn quarantine(&self, quarantine_secs: u64) -> QuarantineEntry {
        let secs = i64::try_from(quarantine_secs).unwrap_or(i64::MAX);
        QuarantineEntry {
            activation: self.expiry.saturating_sub(secs),
            prefix: self.prefix.clone(),
            expiry: self.expiry,
        }
    }
}

/// Start of the observation window of a [`ZombieEntry`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuarantineEntry {
    pub activation: i64,
    pub prefix: String,
    /// Expiry of the zombie entry this window belongs to.
    pub expiry: i64,
}

/// Column positions (0-based) in a pipe-delimited tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedColumns {
    pub prefix: usize,
    pub expiry: usize,
}

impl Default for TrackedColumns {
    fn default() -> Self {
        // Zombie detector output: id|prefix|time|...
        TrackedColumns {
            prefix: 1,
            expiry: 2,
        }
    }
}

/// Parse an expiry either as `YYYY-MM-DD HH:MM:SS` (UTC) or as epoch seconds.
pub fn parse_expiry(value: &str) -> Result<i64> {
    if let Ok(ts) = value.parse::<i64>() {
        return Ok(ts);
    }
    let dt = NaiveDateTime::parse_from_str(value, EXPIRY_TIME_FORMAT)
        .map_err(|e| anyhow::anyhow!("invalid expiry time '{}': {}", value, e))?;
    Ok(dt.and_utc().timestamp())
}

/// Parse a single non-empty line. Returns `Ok(None)` for blank lines.
pub fn parse_tracked_line(line: &str, columns: TrackedColumns) -> Result<Option<ZombieEntry>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    let needed = columns.prefix.max(columns.expiry) + 1;
    if fields.len() < needed {
        anyhow::bail!(
            "expected at least {} fields, found {}",
            needed,
            fields.len()
        );
    }

    let prefix = fields[columns.prefix];
    if prefix.is_empty() {
        anyhow::bail!("empty prefix field");
    }
    let expiry = parse_expiry(fields[columns.expiry])?;

    Ok(Some(ZombieEntry::new(prefix, expiry)))
}

pub fn parse_tracked<R: BufRead>(reader: R, columns: TrackedColumns) -> Result<Vec<ZombieEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let entry = parse_tracked_line(&line, columns)
            .with_context(|| format!("line {}: '{}'", idx + 1, line))?;
        if let Some(entry) = entry {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Read every tracked file. Any malformed line aborts with the offending location.
pub fn read_tracked_files<P: AsRef<Path>>(
    paths: &[P],
    columns: TrackedColumns,
) -> Result<Vec<ZombieEntry>> {
    let mut entries = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open tracked file {}", path.display()))?;
        let parsed = parse_tracked(BufReader::new(file), columns)
            .with_context(|| format!("malformed tracked file {}", path.display()))?;
        debug!("read {} tracked entries from {}", parsed.len(), path.display());
        entries.extend(parsed);
    }
    Ok(entries)
}
