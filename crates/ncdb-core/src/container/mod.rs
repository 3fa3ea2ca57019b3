//! The NCDB ZIP container: member layout, writer, reader and lazy loader.

pub mod format;
pub mod history;
pub mod lazy;
pub mod manifest;
pub mod reader;
pub mod sources;
pub mod writer;

pub use format::{detect_format, CdbFormat};
pub use lazy::LazyContainer;
pub use manifest::Manifest;
pub use reader::{read_container, read_container_bytes, read_counts, read_manifest};
pub use writer::{write_container, write_container_bytes};

pub const MEMBER_MANIFEST: &str = "manifest.json";
pub const MEMBER_STRINGS: &str = "strings.bin";
pub const MEMBER_SCOPE_TREE: &str = "scope_tree.bin";
pub const MEMBER_COUNTS: &str = "counts.bin";
pub const MEMBER_HISTORY: &str = "history.json";
pub const MEMBER_SOURCES: &str = "sources.json";

/// Members every container carries, in write order.
pub const REQUIRED_MEMBERS: [&str; 6] = [
    MEMBER_MANIFEST,
    MEMBER_STRINGS,
    MEMBER_SCOPE_TREE,
    MEMBER_COUNTS,
    MEMBER_HISTORY,
    MEMBER_SOURCES,
];
