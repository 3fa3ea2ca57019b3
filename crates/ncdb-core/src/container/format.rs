//! Telling an NCDB container apart from the SQLite coverage database that
//! shares its file extension.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::container::reader::{manifest_of, open_archive};
use crate::errors::NcdbResult;

pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const ZIP_SIGNATURES: [&[u8; 4]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdbFormat {
    Sqlite,
    Ncdb,
    Unknown,
}

impl CdbFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            CdbFormat::Sqlite => "sqlite",
            CdbFormat::Ncdb => "ncdb",
            CdbFormat::Unknown => "unknown",
        }
    }
}

/// Classify a file by its first 16 bytes. ZIP files only count as NCDB when
/// they carry a manifest whose format field is `NCDB`.
pub fn detect_format(path: &Path) -> NcdbResult<CdbFormat> {
    let mut header = [0u8; 16];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    let header = &header[..filled];

    if header == SQLITE_MAGIC {
        return Ok(CdbFormat::Sqlite);
    }
    if header.len() >= 4 && ZIP_SIGNATURES.iter().any(|sig| header[..4] == sig[..]) {
        let probe = open_archive(path).and_then(|mut zip| manifest_of(&mut zip));
        return Ok(match probe {
            Ok(_) => CdbFormat::Ncdb,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "zip file is not an NCDB container");
                CdbFormat::Unknown
            }
        });
    }
    Ok(CdbFormat::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteOptions;
    use crate::container::writer::{write_container, zip_members};
    use crate::config::Compression;
    use crate::models::CoverageDb;

    #[test]
    fn test_detects_ncdb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cov.cdb");
        write_container(&CoverageDb::new(), &path, &WriteOptions::default()).unwrap();
        assert_eq!(detect_format(&path).unwrap(), CdbFormat::Ncdb);
    }

    #[test]
    fn test_detects_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cov.cdb");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER);").unwrap();
        drop(conn);
        assert_eq!(detect_format(&path).unwrap(), CdbFormat::Sqlite);
    }

    #[test]
    fn test_zip_without_manifest_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.zip");
        let bytes = zip_members(&[("readme.txt".to_string(), b"hi".to_vec())], Compression::Stored).unwrap();
        std::fs::write(&path, bytes).unwrap();
        assert_eq!(detect_format(&path).unwrap(), CdbFormat::Unknown);
    }

    #[test]
    fn test_short_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short");
        std::fs::write(&short, b"PK").unwrap();
        assert_eq!(detect_format(&short).unwrap(), CdbFormat::Unknown);
        let text = dir.path().join("text");
        std::fs::write(&text, b"<?xml version=\"1.0\"?><UCIS/>").unwrap();
        assert_eq!(detect_format(&text).unwrap(), CdbFormat::Unknown);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(detect_format(Path::new("/nonexistent/cov.cdb")).is_err());
    }
}
