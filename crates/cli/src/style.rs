//! Shared styling utilities for CLI output.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// A commit id, abbreviated and highlighted.
pub fn commit(hex: &str) -> String {
    let style = Style::new().cyan();
    style.apply_to(&hex[..hex.len().min(12)]).to_string()
}

/// A conflicted path (red).
pub fn conflict(path: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), path)
}
