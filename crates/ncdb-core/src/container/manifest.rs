//! `manifest.json`: format identity, statistics and the schema hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::GENERATOR;
use crate::errors::{NcdbError, NcdbResult};
use crate::models::CoverageDb;

pub const FORMAT: &str = "NCDB";
pub const FORMAT_VERSION: &str = "1.0";

/// Statistics fields are informational; only `schema_hash` is consulted by
/// the merge engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub format: String,
    pub version: String,
    pub ucis_version: String,
    pub created: String,
    pub path_separator: String,
    pub scope_count: u64,
    pub coveritem_count: u64,
    pub test_count: u64,
    pub total_hits: u64,
    pub covered_bins: u64,
    pub schema_hash: String,
    pub generator: String,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            format: FORMAT.to_string(),
            version: FORMAT_VERSION.to_string(),
            ucis_version: "1.0".to_string(),
            created: String::new(),
            path_separator: "/".to_string(),
            scope_count: 0,
            coveritem_count: 0,
            test_count: 0,
            total_hits: 0,
            covered_bins: 0,
            schema_hash: String::new(),
            generator: GENERATOR.to_string(),
        }
    }
}

pub fn now_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

impl Manifest {
    /// SHA-256 over the uncompressed `scope_tree.bin` bytes.
    pub fn compute_schema_hash(scope_tree: &[u8]) -> String {
        format!("sha256:{:x}", Sha256::digest(scope_tree))
    }

    pub fn build(
        db: &CoverageDb,
        scope_tree: &[u8],
        counts: &[u64],
        scope_count: usize,
        created: Option<&str>,
    ) -> Self {
        Self {
            ucis_version: db.ucis_version.clone(),
            created: created.map(str::to_string).unwrap_or_else(now_utc),
            path_separator: db.path_separator.clone(),
            scope_count: scope_count as u64,
            coveritem_count: counts.len() as u64,
            test_count: db.test_count() as u64,
            total_hits: counts.iter().fold(0u64, |acc, &c| acc.saturating_add(c)),
            covered_bins: counts.iter().filter(|&&c| c > 0).count() as u64,
            schema_hash: Self::compute_schema_hash(scope_tree),
            ..Self::default()
        }
    }

    pub fn is_ncdb(&self) -> bool {
        self.format == FORMAT
    }

    pub fn to_bytes(&self) -> NcdbResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse a manifest; anything that is not an NCDB manifest is `UnknownFormat`.
    pub fn from_bytes(data: &[u8]) -> NcdbResult<Self> {
        let manifest: Manifest = serde_json::from_slice(data)?;
        if !manifest.is_ncdb() {
            return Err(NcdbError::UnknownFormat(format!(
                "manifest format is '{}'",
                manifest.format
            )));
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoryNode;

    #[test]
    fn test_schema_hash_shape() {
        let h = Manifest::compute_schema_hash(b"");
        assert_eq!(
            h,
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(h, Manifest::compute_schema_hash(&[0]));
    }

    #[test]
    fn test_build_statistics() {
        let mut db = CoverageDb::new();
        db.add_history(HistoryNode::test("t1"));
        let m = Manifest::build(&db, &[1, 2], &[5, 0, 10], 4, Some("2024-01-01T00:00:00Z"));
        assert_eq!(m.coveritem_count, 3);
        assert_eq!(m.total_hits, 15);
        assert_eq!(m.covered_bins, 2);
        assert_eq!(m.test_count, 1);
        assert_eq!(m.scope_count, 4);
        assert_eq!(m.created, "2024-01-01T00:00:00Z");
        assert_eq!(m.generator, GENERATOR);
    }

    #[test]
    fn test_round_trip_and_missing_fields() {
        let m = Manifest::build(&CoverageDb::new(), &[], &[], 0, None);
        assert_eq!(Manifest::from_bytes(&m.to_bytes().unwrap()).unwrap(), m);

        let sparse = Manifest::from_bytes(br#"{"format":"NCDB","schema_hash":"sha256:00"}"#).unwrap();
        assert_eq!(sparse.path_separator, "/");
        assert_eq!(sparse.schema_hash, "sha256:00");
    }

    #[test]
    fn test_foreign_format_rejected() {
        assert!(matches!(
            Manifest::from_bytes(br#"{"format":"XML"}"#),
            Err(NcdbError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_timestamp_format() {
        let ts = now_utc();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
    }
}
