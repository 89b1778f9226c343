//! Document assembly: merge page bodies into one LaTeX document.

use super::postprocess::wrap_document;

/// Separator placed between consecutive page bodies.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Join page bodies in order and wrap them in the default preamble.
///
/// Bodies are trimmed and empty ones skipped, so the result always holds
/// exactly one preamble and one closing marker. No bodies at all yields the
/// preamble immediately followed by the closing marker.
pub fn assemble<S: AsRef<str>>(bodies: &[S]) -> String {
    let joined = bodies
        .iter()
        .map(|b| b.as_ref().trim())
        .filter(|b| !b.is_empty())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR);
    wrap_document(&joined)
}
