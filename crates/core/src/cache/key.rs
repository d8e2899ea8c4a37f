use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Identity of the remote connection a cache entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheScope(String);

impl CacheScope {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache key derived from `(scope, operation, arguments)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scope: CacheScope,
    body: String,
}

impl CacheKey {
    /// Derive a key from a stable serialization of the operation and its
    /// arguments.
    ///
    /// Arguments that JSON cannot represent (e.g. maps with non-string keys)
    /// fall back to a SHA-256 structural hash of their `Hash` implementation.
    pub fn derive<A>(scope: &CacheScope, operation: &str, args: &A) -> Self
    where
        A: Serialize + Hash + ?Sized,
    {
        let body = match serde_json::to_string(&(operation, args)) {
            Ok(json) => json,
            Err(_) => {
                let mut hasher = Sha256Hasher::default();
                operation.hash(&mut hasher);
                args.hash(&mut hasher);
                format!("hashed:{}:{:x}", operation, hasher.digest.finalize())
            }
        };

        Self {
            scope: scope.clone(),
            body,
        }
    }

    pub fn scope(&self) -> &CacheScope {
        &self.scope
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.scope, self.body)
    }
}

/// Feeds `Hash` output into SHA-256 so fallback keys do not depend on the
/// process-local `DefaultHasher` seed.
#[derive(Default)]
struct Sha256Hasher {
    digest: Sha256,
}

impl Hasher for Sha256Hasher {
    fn finish(&self) -> u64 {
        let bytes = self.digest.clone().finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        u64::from_be_bytes(head)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }
}
