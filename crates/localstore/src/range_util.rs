//! Byte-string range helpers.
//!
//! Keys are ordered by unsigned lexicographic comparison, which is exactly
//! the `Ord` of `bytes::Bytes`. The empty byte string never appears as a
//! real key; at the API edge `Option<Bytes>` is the explicit unbounded
//! marker (`None` = no bound on that side).

use bytes::Bytes;

/// Smallest byte string strictly greater than `key`.
///
/// Appending a zero byte yields the immediate successor in unsigned
/// lexicographic order, so `[start, upper_bound(k))` includes `k` itself.
pub fn upper_bound(key: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.extend_from_slice(key);
    out.push(0);
    Bytes::from(out)
}

/// Narrowest of two end bounds for hints sharing a start key.
///
/// An unbounded end swallows any bounded one; two bounded ends keep the
/// smaller. The dispatch pass widens again while coalescing.
pub(crate) fn narrowest_end(current: Option<Bytes>, incoming: Option<Bytes>) -> Option<Bytes> {
    match (current, incoming) {
        (Some(cur), Some(inc)) => Some(if inc < cur { inc } else { cur }),
        _ => None,
    }
}

/// Widest of two end bounds, used when fusing overlapping hints.
pub(crate) fn widest_end(current: Option<Bytes>, incoming: Option<Bytes>) -> Option<Bytes> {
    match (current, incoming) {
        (Some(cur), Some(inc)) => Some(if inc > cur { inc } else { cur }),
        _ => None,
    }
}
