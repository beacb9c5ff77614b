use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

/// Deterministic cache key derived from a request path and its query.
///
/// Query pairs are sorted before encoding so that `?a=1&b=2` and `?b=2&a=1`
/// address the same entry. The stored key is the hex SHA-256 digest of
/// `path?query`, which keeps keys fixed-size regardless of the URL length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(SmolStr);

impl CacheKey {
    /// Builds the key for `path` with the given query pairs.
    ///
    /// ```
    /// use waypoint_cache::CacheKey;
    ///
    /// let a = CacheKey::new("/posts", &[("page", "1"), ("sort", "asc")]);
    /// let b = CacheKey::new("/posts", &[("sort", "asc"), ("page", "1")]);
    /// assert_eq!(a, b);
    /// ```
    pub fn new<K, V>(path: &str, query: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        let query = encode_query(query);
        if !query.is_empty() {
            hasher.update(b"?");
            hasher.update(query.as_bytes());
        }
        Self(SmolStr::new(hex::encode(hasher.finalize())))
    }

    /// Key for a path without query parameters.
    pub fn from_path(path: &str) -> Self {
        Self::new::<&str, &str>(path, &[])
    }

    /// Wraps an already-derived storage key.
    pub fn from_raw(raw: impl Into<SmolStr>) -> Self {
        Self(raw.into())
    }

    /// Storage representation of the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn encode_query<K, V>(query: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(&str, &str)> = query
        .iter()
        .map(|(key, value)| (key.as_ref(), value.as_ref()))
        .collect();
    pairs.sort_unstable();
    // string pairs always encode
    serde_urlencoded::to_string(&pairs).unwrap_or_default()
}
