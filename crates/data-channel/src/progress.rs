//! Progress values reported while streaming.

use std::fmt;

/// Progress of one stream copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Whole percent of a known total, `0..=100`.
    Percent(u8),
    /// Bytes moved so far when the total is unknown.
    Bytes(u64),
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent(p) => write!(f, "{p}%"),
            Self::Bytes(n) => f.write_str(&format_bytes(*n)),
        }
    }
}

/// Formats a byte count with one decimal and a 1024-based unit.
pub fn format_bytes(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
