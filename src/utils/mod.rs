//! Utilities module for logging, error handling and formatting helpers

use std::time::Duration;

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{PipelineError, PipelineWarning, Result, SampleError};
pub use logging::{init_logging, EpochLogger, LogConfig};

/// Wall-clock span as `42.0s`, `3m 05s` or `1h 02m`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    match total {
        0..=59 => format!("{:.1}s", elapsed.as_secs_f64()),
        60..=3599 => format!("{}m {:02}s", total / 60, total % 60),
        _ => format!("{}h {:02}m", total / 3600, (total % 3600) / 60),
    }
}

/// Render a horizontal bar proportional to `count / total`
pub fn proportion_bar(count: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return String::new();
    }
    let filled = ((count as f64 / total as f64) * width as f64).round() as usize;
    "█".repeat(filled.min(width))
}
