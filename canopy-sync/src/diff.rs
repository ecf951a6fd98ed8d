//! Unified diff between the store's rendering of an entity and its file.

use std::path::Path;

use similar::TextDiff;

/// Unified diff from `current` (store) to `incoming` (disk), with `a/` and
/// `b/` headers for `relative`. `None` when the texts match after line-ending
/// normalisation.
pub fn unified_diff(relative: &Path, current: &str, incoming: &str) -> Option<String> {
    let current = normalize_line_endings(current);
    let incoming = normalize_line_endings(incoming);
    if current == incoming {
        return None;
    }

    let old_header = format!("a/{}", relative.display());
    let new_header = format!("b/{}", relative.display());
    Some(
        TextDiff::from_lines(&current, &incoming)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string(),
    )
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}
