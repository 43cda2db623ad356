//! Domain types shared across the routing core.

pub mod content;
pub mod error;
pub mod scan;

pub use content::{display_value, lookup, Content};
pub use error::{
    ConfigError, GateError, ProcessError, RelayError, RenderError, Result, SendError,
};
pub use scan::{
    AssuranceCheck, AssuranceResults, Resource, ResourceInfo, ScanOptions, ScanRecord,
    Vulnerability, VulnerabilitySummary,
};
