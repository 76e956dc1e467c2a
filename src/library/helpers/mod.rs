//! Helper functions that don't belong elsewhere

mod backoff;

pub use backoff::Backoff;

use std::{num::ParseIntError, time::Duration};

/// Parses a Duration from a string containing seconds.
/// Useful for command line parsing
pub fn parse_seconds(src: &str) -> Result<Duration, ParseIntError> {
    let seconds = src.parse::<u64>()?;
    Ok(Duration::from_secs(seconds))
}
