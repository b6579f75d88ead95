//! Record types for the shard batch-ack pipeline.
//!
//! A [`Record`] is the immutable unit read from one shard of an external
//! partitioned log. Each record carries:
//! - **Payload**: The raw bytes of the record
//! - **Metadata**: String key-value pairs stamped by the pipeline
//!   (stream, shard, sequence token of origin)
//! - **Sequence token**: The external log's position identifier, totally
//!   ordered within the shard, used to resume consumption

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::limits::Limits;
use crate::types::SequenceToken;

/// String key-value metadata attached to a record.
///
/// Entries preserve insertion order; setting an existing key replaces its
/// value in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Sets a metadata value, replacing any existing entry for the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Gets a metadata value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Removes a metadata entry by key.
    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the approximate size of all entries in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

/// A single record read from a shard of the external log.
///
/// Immutable once read: the pipeline stamps metadata at ingest time and
/// never rewrites the payload or sequence token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The record payload.
    pub payload: Bytes,
    /// Key-value metadata.
    pub metadata: Metadata,
    /// The external log's position identifier for this record.
    pub sequence_token: SequenceToken,
}

impl Record {
    /// Creates a new record from a payload and its sequence token.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>, sequence_token: impl Into<SequenceToken>) -> Self {
        Self {
            payload: payload.into(),
            metadata: Metadata::new(),
            sequence_token: sequence_token.into(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }

    /// Returns the approximate size of the record in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len() + self.metadata.size() + self.sequence_token.as_str().len()
    }

    /// Validates the record against limits.
    ///
    /// # Errors
    /// Returns an error if the record exceeds any limits.
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        if self.payload.len() > limits.max_record_bytes as usize {
            return Err(Error::LimitExceeded {
                limit: "record_bytes",
                max: u64::from(limits.max_record_bytes),
                actual: self.payload.len() as u64,
            });
        }

        if self.metadata.len() > limits.max_metadata_entries as usize {
            return Err(Error::LimitExceeded {
                limit: "metadata_entries",
                max: u64::from(limits.max_metadata_entries),
                actual: self.metadata.len() as u64,
            });
        }

        if self.sequence_token.is_empty() {
            return Err(Error::InvalidArgument {
                name: "sequence_token",
                reason: "records read from the log must carry a token",
            });
        }

        Ok(())
    }
}
