//! `Range` / `Content-Range` helpers

/// `Range` header value for `len` bytes starting at `start`
pub(crate) fn range_header(start: u64, len: u64) -> String {
    let end = start.saturating_add(len.max(1)).saturating_sub(1);
    format!("bytes={start}-{end}")
}

/// Complete length from a `Content-Range: bytes a-b/total` value.
///
/// Returns `None` for unsatisfied ranges or an unknown (`*`) length.
pub(crate) fn content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    if range.trim() == "*" {
        return None;
    }
    total.trim().parse().ok()
}
