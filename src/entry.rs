//! Cache entry model and write options

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::duration_to_millis;

/// A single cached value together with its bookkeeping
///
/// The whole entry is encoded as one blob, so key, data and timestamp are
/// always written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub data: T,
    /// Write time, milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Maximum age in milliseconds, `None` never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, data: T, timestamp: u64, options: &SetOptions) -> Self {
        Self {
            key: key.into(),
            data,
            timestamp,
            ttl: options.ttl.map(duration_to_millis),
            tags: options.tags.iter().cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        is_expired_at(self.timestamp, self.ttl, now)
    }
}

/// Payload-free view of a stored entry
///
/// Decoded when only expiry, tags or size matter, so the payload type does
/// not have to be known.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntryHeader {
    pub key: String,
    pub timestamp: u64,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl EntryHeader {
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        is_expired_at(self.timestamp, self.ttl, now)
    }
}

fn is_expired_at(timestamp: u64, ttl: Option<u64>, now: u64) -> bool {
    ttl.is_some_and(|ttl| now.saturating_sub(timestamp) > ttl)
}

/// TTL presets for common clinic data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Rapidly changing data - 30 seconds
    VeryShort,
    /// 1 minute
    Short,
    /// Schedules and lists - 5 minutes
    Medium,
    /// 10 minutes
    Default,
    /// Patient records - 1 hour
    Long,
    /// 24 hours
    VeryLong,
    /// Static reference data such as templates - 7 days
    Extended,
    Custom(Duration),
    /// Never expires by age
    NoExpiry,
}

impl CacheStrategy {
    #[must_use]
    pub fn to_duration(&self) -> Option<Duration> {
        match self {
            Self::VeryShort => Some(Duration::from_secs(30)),
            Self::Short => Some(Duration::from_secs(60)),
            Self::Medium => Some(Duration::from_secs(300)),
            Self::Default => Some(Duration::from_secs(600)),
            Self::Long => Some(Duration::from_secs(3600)),
            Self::VeryLong => Some(Duration::from_secs(86_400)),
            Self::Extended => Some(Duration::from_secs(604_800)),
            Self::Custom(duration) => Some(*duration),
            Self::NoExpiry => None,
        }
    }
}

/// Options for a single write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    /// Tags cleared before this write commits
    pub invalidate_with_tags: Vec<String>,
}

impl SetOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.ttl = strategy.to_duration();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn invalidate_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidate_with_tags
            .extend(tags.into_iter().map(Into::into));
        self
    }
}

/// One item of a batch write
#[derive(Debug, Clone)]
pub struct BatchEntry<T> {
    pub key: String,
    pub data: T,
    pub options: SetOptions,
}

impl<T> BatchEntry<T> {
    pub fn new(key: impl Into<String>, data: T) -> Self {
        Self {
            key: key.into(),
            data,
            options: SetOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SetOptions) -> Self {
        self.options = options;
        self
    }
}
