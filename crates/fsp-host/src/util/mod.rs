//! Utility functions shared by the dispatch table and the host.

pub mod filetime;
pub mod wstr;

pub use filetime::{now_filetime, systemtime_to_filetime};
pub use wstr::string_to_wide;
