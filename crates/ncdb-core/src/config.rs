//! Shared guardrails, environment toggles and option structs for writing and merging.

// Merge worker pool
pub const DEFAULT_MERGE_WORKERS: i64 = 4;
pub const MAX_MERGE_WORKERS: i64 = 64;

// Decoder guards
pub const MAX_SCOPE_DEPTH: usize = 4096;
pub const MAX_STRING_LEN: u64 = 1 << 20;

pub const GENERATOR: &str = "ncdb-core";
pub const MERGE_TOOL_CATEGORY: &str = "ncdb-merger";
pub const SQLITE_MERGE_TOOL_CATEGORY: &str = "ncdb-sqlite-merger";
pub const SQUASHED_HISTORY_NAME: &str = "merged_summary";

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

pub fn clamp_workers(value: i64) -> usize {
    clamp_int(value, 1, MAX_MERGE_WORKERS) as usize
}

/// Worker count for the fast merge path. `NCDB_MERGE_WORKERS` overrides the default.
pub fn merge_workers_from_env() -> usize {
    match std::env::var("NCDB_MERGE_WORKERS") {
        Ok(val) => match val.trim().parse::<i64>() {
            Ok(n) => clamp_workers(n),
            Err(_) => clamp_workers(DEFAULT_MERGE_WORKERS),
        },
        Err(_) => clamp_workers(DEFAULT_MERGE_WORKERS),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Deflate,
    Stored,
}

/// `NCDB_COMPRESSION=stored|none|off` disables deflate for container members.
pub fn compression_from_env() -> Compression {
    match std::env::var("NCDB_COMPRESSION") {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            if matches!(v.as_str(), "stored" | "none" | "off" | "0") {
                Compression::Stored
            } else {
                Compression::Deflate
            }
        }
        Err(_) => Compression::Deflate,
    }
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub compression: Compression,
    /// Overrides the manifest `created` timestamp; mainly for reproducible output.
    pub created: Option<String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: compression_from_env(),
            created: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub workers: usize,
    pub create_history: bool,
    pub squash_history: bool,
    pub write: WriteOptions,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            workers: merge_workers_from_env(),
            create_history: true,
            squash_history: false,
            write: WriteOptions::default(),
        }
    }
}

impl MergeOptions {
    pub fn with_workers(mut self, workers: i64) -> Self {
        self.workers = clamp_workers(workers);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_workers_bounds() {
        assert_eq!(clamp_workers(0), 1);
        assert_eq!(clamp_workers(-5), 1);
        assert_eq!(clamp_workers(8), 8);
        assert_eq!(clamp_workers(1000), MAX_MERGE_WORKERS as usize);
    }

    #[test]
    fn test_with_workers_clamps() {
        let opts = MergeOptions::default().with_workers(500);
        assert_eq!(opts.workers, 64);
        assert!(opts.create_history);
        assert!(!opts.squash_history);
    }
}
