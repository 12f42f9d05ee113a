//! FILETIME conversion utilities.
//!
//! Native timestamps are 100-nanosecond intervals since January 1, 1601 UTC,
//! carried as a plain `u64`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// FILETIME epoch: January 1, 1601
// Unix epoch: January 1, 1970
const FILETIME_UNIX_DIFF_SECS: u64 = 11644473600;
const INTERVALS_PER_SEC: u64 = 10_000_000;

/// Convert SystemTime to a FILETIME value.
///
/// # Arguments
/// * `time` - System time to convert
///
/// # Returns
/// FILETIME intervals. Times before the Unix epoch clamp to it.
pub fn systemtime_to_filetime(time: SystemTime) -> u64 {
    let duration: Duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);

    duration.as_secs() * INTERVALS_PER_SEC
        + duration.subsec_nanos() as u64 / 100
        + FILETIME_UNIX_DIFF_SECS * INTERVALS_PER_SEC
}

/// Current time as a FILETIME value.
pub fn now_filetime() -> u64 {
    systemtime_to_filetime(SystemTime::now())
}
