//! Boundary plumbing shared by every dispatch entry.
//!
//! - [`context`]: per-open context registry
//! - [`marshal`]: sized copies into caller buffers
//! - [`listing`]: directory and stream record packing
//! - [`fault`]: panic containment

pub mod context;
pub mod fault;
pub mod listing;
pub mod marshal;

pub use context::{ContextTable, OpenFile};
pub use fault::{contain, guarded, handle_fault, Fault};
pub use marshal::PayloadKind;
