#![forbid(unsafe_code)]

pub mod common;
pub mod complaint;
pub mod feed;

pub use common::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};
