//! Binary primitives of the NCDB container.

pub mod counts;
pub mod dfs;
pub mod scope_tree;
pub mod string_table;
pub mod varint;

pub use counts::{decode_counts, encode_counts, CountsMode};
pub use dfs::{dfs_scopes, flat_coveritems};
pub use scope_tree::{decode_scope_tree, encode_scope_tree, EncodedTree};
pub use string_table::StringTable;
pub use varint::{decode_varint, decode_varints, encode_varint, encode_varints};
