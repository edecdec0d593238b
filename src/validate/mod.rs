//! Schema-driven raw-file validation and partitioning
//!
//! A batch of raw sensor files is checked file-by-file against a declared
//! schema ([`SchemaSpec`]); each file ends up in exactly one of the
//! good/bad partitions, with an append-only audit report of every check
//! that ran. The good partition feeds [`crate::merge`].

pub mod checks;
pub mod partition;
pub mod report;
pub mod schema;

pub use checks::{CheckOutcome, SchemaValidator};
pub use partition::{PartitionSummary, RawDataPartitioner};
pub use report::{ValidationRecord, ValidationReport, ValidationStatus};
pub use schema::{ColumnType, SchemaSpec};
