use crate::core::QueryDescriptor;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Which parts of a query feed its cache key.
///
/// `QueryText` hashes the text alone: two fetches with the same text share
/// one entry even when their bound parameters differ, so the second caller
/// receives rows computed for the first caller's parameters. Choose
/// `QueryTextAndParams` for parameterized reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyStrategy {
    #[default]
    QueryText,
    QueryTextAndParams,
}

/// SHA-256 digest of a query, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(query: &QueryDescriptor, strategy: CacheKeyStrategy) -> Self {
        let mut hasher = Sha256::new();

        match strategy {
            CacheKeyStrategy::QueryText => hasher.update(query.sql().as_bytes()),
            CacheKeyStrategy::QueryTextAndParams => {
                // Every part is length-prefixed so no text can imitate a boundary.
                // Type-tagged so Integer(1), Float(1.0) and Text("1") differ.
                update_framed(&mut hasher, query.sql().as_bytes());
                hasher.update((query.params().len() as u64).to_le_bytes());
                for param in query.params() {
                    update_framed(&mut hasher, param.type_name().as_bytes());
                    update_framed(&mut hasher, param.to_string().as_bytes());
                }
            }
        }

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
