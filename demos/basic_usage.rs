//! Basic Usage Example
//!
//! Caches a patient list, reads it through the fallback helper, invalidates
//! it by tag after an edit, and prints statistics.
//!
//! Run with: `RUST_LOG=clinic_cache=debug cargo run --example basic_usage`

use clinic_cache::{CacheStrategy, CacheSystem, SetOptions};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Patient {
    id: u64,
    name: String,
}

async fn fetch_patients() -> anyhow::Result<Vec<Patient>> {
    // Stands in for a request to the clinic backend
    Ok(vec![
        Patient {
            id: 1,
            name: "Alice".to_string(),
        },
        Patient {
            id: 2,
            name: "Bob".to_string(),
        },
    ])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Default tiers: Moka + SQLite + file fallback under the local data dir
    let mut cache = CacheSystem::new().await?;
    if cache.health_check().await {
        tracing::info!("Cache system is healthy");
    }

    let manager = cache.cache_manager();
    let list_options = SetOptions::new()
        .with_strategy(CacheStrategy::Medium)
        .with_tags(["patients"]);

    let first = manager
        .get_cache_with_fallback_and_options("patients:list", list_options.clone(), fetch_patients)
        .await;
    tracing::info!(from_cache = first.from_cache, count = first.data.map_or(0, |p| p.len()), "First read");

    let second = manager
        .get_cache_with_fallback_and_options("patients:list", list_options, fetch_patients)
        .await;
    tracing::info!(from_cache = second.from_cache, "Second read");

    // Editing a patient invalidates every list derived from patients
    let edited = Patient {
        id: 2,
        name: "Robert".to_string(),
    };
    manager
        .set_cache(
            "patient:2",
            &edited,
            SetOptions::new()
                .with_strategy(CacheStrategy::Long)
                .invalidate_tags(["patients"]),
        )
        .await?;

    let after_edit: Option<Vec<Patient>> = manager.get_cache("patients:list").await;
    tracing::info!(cleared = after_edit.is_none(), "Patient list after edit");

    // Refresh in the background without waiting for it
    drop(manager.prefetch_cache("patients:list", fetch_patients));

    let size = manager.get_cache_stats().await;
    let stats = manager.get_stats();
    let health = manager.health();
    tracing::info!(
        entries = size.entry_count,
        bytes = size.approximate_byte_size,
        hit_rate = %format!("{:.1}%", stats.hit_rate),
        status = ?health.status,
        "Cache statistics"
    );
    for recommendation in &health.recommendations {
        tracing::info!(%recommendation, "Recommendation");
    }

    cache.shutdown().await;
    Ok(())
}
