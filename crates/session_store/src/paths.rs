pub const DOCUMENT_EXTENSION: &str = "json";

/// Maps an arbitrary key onto a single path component.
///
/// Separators and parent references collapse to `_`, so a key can never
/// escape the store directory.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    key.trim()
        .replace(['/', '\\'], "_")
        .replace("..", "_")
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect()
}

#[must_use]
pub fn document_file_name(key: &str) -> String {
    format!("{}.{DOCUMENT_EXTENSION}", sanitize_key(key))
}
