//! Scanrelay-State: dedup and aggregation storage for scanrelay
//!
//! This crate defines the contract the routing core expects from its
//! persistence collaborator and ships an in-process implementation of it.
//!
//! ## Key Components
//!
//! - `ScanStore`: "last seen" payload tracking per entity, aggregation
//!   buckets, invocation accounting and retention enforcement
//! - `MemoryScanStore`: mutex-guarded in-memory backend, each call atomic
//! - `RetentionLimits`: size/age eviction policy applied by the maintenance timer

mod error;
pub mod memory;
pub mod storage_traits;

pub use error::StorageError;
pub use memory::MemoryScanStore;
pub use storage_traits::{
    BucketItem, LookupOutcome, PayloadDigest, RetentionLimits, ScanStore, StorageResult,
};
