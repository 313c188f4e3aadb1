//! JSON entry codec using `serde_json`

use std::collections::BTreeSet;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::entry::{CacheEntry, EntryHeader};
use crate::error::CacheError;

/// Encodes cache entries and tag records as JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct EntryCodec;

impl EntryCodec {
    /// Encode a full entry
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] when the payload cannot be
    /// represented as JSON.
    pub fn encode<T: Serialize>(&self, entry: &CacheEntry<T>) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(entry).map_err(|source| CacheError::Serialization {
            key: entry.key.clone(),
            source,
        })
    }

    /// Decode a full entry with a typed payload
    ///
    /// # Errors
    ///
    /// Fails when the bytes are not an entry or the payload is not a `T`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> serde_json::Result<CacheEntry<T>> {
        serde_json::from_slice(bytes)
    }

    /// Decode everything except the payload
    ///
    /// # Errors
    ///
    /// Fails when the bytes are not an entry.
    pub fn decode_header(&self, bytes: &[u8]) -> serde_json::Result<EntryHeader> {
        serde_json::from_slice(bytes)
    }

    /// Encode the key set of one tag
    ///
    /// # Errors
    ///
    /// Never fails in practice, string sets are always representable.
    pub fn encode_tag_record(&self, keys: &BTreeSet<String>) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(keys)
    }

    /// Decode the key set of one tag
    ///
    /// # Errors
    ///
    /// Fails when the record is not a JSON array of strings.
    pub fn decode_tag_record(&self, bytes: &[u8]) -> serde_json::Result<BTreeSet<String>> {
        serde_json::from_slice(bytes)
    }

    pub fn name(&self) -> &'static str {
        "serde_json"
    }
}
