//! Small helpers shared across the pipeline.

use std::path::Path;

/// Normalize line endings to `\n` so that parsing and hashing are
/// platform-independent.
pub fn normalize_line_endings(source: String) -> String {
    if !source.contains('\r') {
        return source;
    }
    source.replace("\r\n", "\n").replace('\r', "\n")
}

/// Derive a dotted module name from a path relative to a search root.
///
/// `pkg/sub/mod.py` becomes `pkg.sub.mod`; `pkg/__init__.py` becomes `pkg`.
/// Returns `None` when a component is not valid UTF-8.
pub fn module_name_from_relative(relative: &Path) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in relative.components() {
        let os_str = component.as_os_str();
        parts.push(os_str.to_str()?.to_owned());
    }

    let last = parts.pop()?;
    if last == "__init__.py" {
        // The package is named by its directory
    } else if let Some(stem) = last.strip_suffix(".py") {
        parts.push(stem.to_owned());
    } else {
        parts.push(last);
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("."))
    }
}

/// Compute a 1-based (line, column) pair for a byte offset into `source`.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let clamped = offset.min(source.len());
    let prefix = &source[..clamped];
    let line = prefix.bytes().filter(|&b| b == b'\n').count() + 1;
    let column = match prefix.rfind('\n') {
        Some(newline) => clamped - newline,
        None => clamped + 1,
    };
    (line, column)
}
