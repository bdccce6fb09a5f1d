//! Text-to-record parsers for the two connection sources.

pub mod raw_table;
pub mod snapshot;

pub use raw_table::{parse_row, RawTableRow};
pub use snapshot::{parse_line, SnapshotRecord};
