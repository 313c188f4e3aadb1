//! Introspection
//!
//! Live entry count and approximate byte size for eviction-pressure
//! decisions, plus request counters and a coarse health report.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use tracing::debug;

use crate::cache_manager::CacheManager;
use crate::traits::Table;

/// Size of the live (non-expired) part of the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    /// Sum of encoded entry lengths, an estimate rather than exact usage
    pub approximate_byte_size: usize,
}

/// Cache Manager request statistics
#[derive(Debug, Clone, Default)]
pub struct CacheManagerStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of requests served from any tier
    pub hit_rate: f64,
    pub promotions: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Recovered tier failures
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health report derived from the request statistics
#[derive(Debug, Clone)]
pub struct CacheHealth {
    pub status: HealthStatus,
    /// Hits over reads, between 0 and 1
    pub hit_ratio: f64,
    /// Tier failures over all operations, between 0 and 1
    pub error_ratio: f64,
    pub recommendations: Vec<String>,
}

struct ScanOutcome {
    live: CacheStats,
    purged: usize,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl CacheManager {
    /// Count live entries and their encoded size
    ///
    /// Expired entries met during the scan are purged and not counted.
    pub async fn get_cache_stats(&self) -> CacheStats {
        self.scan().await.live
    }

    /// Same figures as [`get_cache_stats`](Self::get_cache_stats)
    pub async fn get_cache_size(&self) -> CacheStats {
        self.get_cache_stats().await
    }

    /// Purge every expired entry, returning how many were removed
    ///
    /// Not needed for correctness, expired entries are never returned. It
    /// bounds storage growth for keys that are never read again. Tag
    /// memberships of keys that no tier holds any more (for example after
    /// the memory tier evicted them at capacity) are dropped as well.
    pub async fn sweep_expired(&self) -> usize {
        let purged = self.scan().await.purged;

        let mut orphaned = 0;
        for key in self.tag_index().keys() {
            if self.drop_orphaned_tags(&key).await {
                orphaned += 1;
            }
        }

        if purged > 0 || orphaned > 0 {
            debug!(purged, orphaned, "Swept expired entries");
        }
        purged
    }

    async fn scan(&self) -> ScanOutcome {
        let mut keys = BTreeSet::new();
        for tier in self.tiers() {
            match tier.iterate_keys(Table::Entries).await {
                Ok(tier_keys) => keys.extend(tier_keys),
                Err(e) => self.tier_failed(tier.as_ref(), "iterate", "*", &e),
            }
        }

        let now = self.now();
        let mut outcome = ScanOutcome {
            live: CacheStats::default(),
            purged: 0,
        };

        for key in &keys {
            let Some((_, bytes)) = self.locate(key).await else {
                continue;
            };
            let expired = self
                .codec()
                .decode_header(&bytes)
                .map_or(true, |header| header.is_expired(now));
            if expired {
                self.purge(key).await;
                outcome.purged += 1;
            } else {
                outcome.live.entry_count += 1;
                outcome.live.approximate_byte_size += bytes.len();
            }
        }

        outcome
    }

    /// Snapshot of the request counters
    pub fn get_stats(&self) -> CacheManagerStats {
        let counters = &self.counters;
        let total_requests = counters.total_requests.load(Ordering::Relaxed);
        let hits = counters.hits.load(Ordering::Relaxed);

        CacheManagerStats {
            total_requests,
            hits,
            misses: counters.misses.load(Ordering::Relaxed),
            hit_rate: ratio(hits, total_requests) * 100.0,
            promotions: counters.promotions.load(Ordering::Relaxed),
            sets: counters.sets.load(Ordering::Relaxed),
            deletes: counters.deletes.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter to zero
    pub fn reset_stats(&self) {
        let counters = &self.counters;
        for counter in [
            &counters.total_requests,
            &counters.hits,
            &counters.misses,
            &counters.promotions,
            &counters.sets,
            &counters.deletes,
            &counters.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Classify the cache from its counters
    ///
    /// More than 5% failed operations is unhealthy; a hit ratio under 50% is
    /// degraded once reads have happened.
    pub fn health(&self) -> CacheHealth {
        let stats = self.get_stats();
        let reads = stats.hits + stats.misses;
        let operations = reads + stats.sets + stats.deletes;

        let hit_ratio = ratio(stats.hits, reads);
        let error_ratio = ratio(stats.errors, operations);

        // No reads yet says nothing about the hit ratio
        let low_hit_ratio = reads > 0 && hit_ratio < 0.5;

        let status = if error_ratio > 0.05 {
            HealthStatus::Unhealthy
        } else if low_hit_ratio {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let mut recommendations = Vec::new();
        if low_hit_ratio {
            recommendations.push(
                "Low cache hit ratio: consider longer TTLs or caching more read paths".to_string(),
            );
        }
        if error_ratio > 0.01 {
            recommendations
                .push("Storage tier errors detected: check disk space and permissions".to_string());
        }
        if stats.sets > stats.hits.saturating_mul(10) {
            recommendations
                .push("Many more writes than hits: entries may be expiring too quickly".to_string());
        }

        CacheHealth {
            status,
            hit_ratio,
            error_ratio,
            recommendations,
        }
    }
}
