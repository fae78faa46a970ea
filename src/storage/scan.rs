//! Cursor-scan helpers over a [`KeyValueStore`].

use super::{KeyValueStore, StorageError};

/// Collect up to `limit` keys matching `pattern`.
///
/// Pages through the keyspace and stops as soon as `limit` keys have been
/// gathered, so with more matches than the cap this yields a best-effort,
/// non-deterministic subset. Empty intermediate pages do not terminate the
/// iteration; only a zero cursor does.
pub async fn first_matching_keys(
    store: &dyn KeyValueStore,
    pattern: &str,
    limit: usize,
) -> Result<Vec<String>, StorageError> {
    let mut keys = Vec::new();
    if limit == 0 {
        return Ok(keys);
    }

    let mut cursor = 0;
    loop {
        let (next, page) = store.scan_page(cursor, pattern).await?;
        keys.extend(page);
        if keys.len() >= limit {
            keys.truncate(limit);
            return Ok(keys);
        }
        if next == 0 {
            return Ok(keys);
        }
        cursor = next;
    }
}

/// Collect every key matching `pattern`.
pub async fn all_matching_keys(
    store: &dyn KeyValueStore,
    pattern: &str,
) -> Result<Vec<String>, StorageError> {
    let mut keys = Vec::new();
    let mut cursor = 0;
    loop {
        let (next, page) = store.scan_page(cursor, pattern).await?;
        keys.extend(page);
        if next == 0 {
            return Ok(keys);
        }
        cursor = next;
    }
}
