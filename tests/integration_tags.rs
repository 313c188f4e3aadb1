//! Tag-based invalidation tests
//!
//! Covers OR semantics, invalidate-on-write, membership replacement and the
//! tag index surviving a restart.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use clinic_cache::{CacheManager, CacheStrategy, MokaTier, SetOptions, StorageTier, Table};
use common::test_data::{Appointment, Patient, patients};
use common::*;
use tempfile::TempDir;

fn tags(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn test_clear_by_tags_uses_or_semantics() {
    let manager = setup_memory_manager(&manual_clock()).await;

    manager
        .set_cache("a", &1u8, SetOptions::new().with_tags(["patients"]))
        .await
        .unwrap();
    manager
        .set_cache("b", &2u8, SetOptions::new().with_tags(["patients", "schedule"]))
        .await
        .unwrap();
    manager
        .set_cache("c", &3u8, SetOptions::new().with_tags(["schedule"]))
        .await
        .unwrap();
    manager
        .set_cache("d", &4u8, SetOptions::new().with_tags(["templates"]))
        .await
        .unwrap();
    manager.set_cache("untagged", &5u8, SetOptions::new()).await.unwrap();

    let removed = manager.clear_by_tags(&["patients", "schedule"]).await;
    assert_eq!(removed, 3);

    for key in ["a", "b", "c"] {
        assert_eq!(manager.get_cache::<u8>(key).await, None, "{key} should be cleared");
    }
    assert_eq!(manager.get_cache::<u8>("d").await, Some(4));
    assert_eq!(manager.get_cache::<u8>("untagged").await, Some(5));
}

#[tokio::test]
async fn test_clear_by_unknown_tag_is_noop() {
    let manager = setup_memory_manager(&manual_clock()).await;
    manager
        .set_cache("k", &1u8, SetOptions::new().with_tags(["patients"]))
        .await
        .unwrap();

    assert_eq!(manager.clear_by_tags(&["billing"]).await, 0);
    let empty: [&str; 0] = [];
    assert_eq!(manager.clear_by_tags(&empty).await, 0);
    assert_eq!(manager.get_cache::<u8>("k").await, Some(1));
}

#[tokio::test]
async fn test_invalidate_with_tags_on_write() {
    let manager = setup_memory_manager(&manual_clock()).await;

    manager
        .set_cache("patients:list", &patients(3), SetOptions::new().with_tags(["patients"]))
        .await
        .unwrap();
    manager
        .set_cache("patients:count", &3u32, SetOptions::new().with_tags(["patients"]))
        .await
        .unwrap();

    // Saving an edited patient drops every derived list in the same call
    let edited = Patient::new(2);
    manager
        .set_cache(
            "patient:2",
            &edited,
            SetOptions::new()
                .with_strategy(CacheStrategy::Long)
                .with_tags(["patient:2"])
                .invalidate_tags(["patients"]),
        )
        .await
        .unwrap();

    assert!(manager.get_cache::<Vec<Patient>>("patients:list").await.is_none());
    assert!(manager.get_cache::<u32>("patients:count").await.is_none());
    assert_eq!(manager.get_cache::<Patient>("patient:2").await, Some(edited));
}

/// A write that invalidates its own tag still lands
#[tokio::test]
async fn test_invalidate_own_tag_keeps_new_value() {
    let manager = setup_memory_manager(&manual_clock()).await;

    manager
        .set_cache("schedule:today", &1u8, SetOptions::new().with_tags(["schedule"]))
        .await
        .unwrap();
    manager
        .set_cache(
            "schedule:today",
            &2u8,
            SetOptions::new()
                .with_tags(["schedule"])
                .invalidate_tags(["schedule"]),
        )
        .await
        .unwrap();

    assert_eq!(manager.get_cache::<u8>("schedule:today").await, Some(2));
    assert_eq!(manager.tags_for_key("schedule:today"), tags(&["schedule"]));
}

#[tokio::test]
async fn test_rewrite_replaces_tag_memberships() {
    let manager = setup_memory_manager(&manual_clock()).await;

    manager
        .set_cache("appt:1", &Appointment::new(1, 7), SetOptions::new().with_tags(["schedule", "patient:7"]))
        .await
        .unwrap();
    manager
        .set_cache("appt:1", &Appointment::new(1, 8), SetOptions::new().with_tags(["schedule", "patient:8"]))
        .await
        .unwrap();

    assert_eq!(manager.tags_for_key("appt:1"), tags(&["patient:8", "schedule"]));

    // The old tag no longer reaches the entry
    assert_eq!(manager.clear_by_tags(&["patient:7"]).await, 0);
    assert!(manager.get_cache::<Appointment>("appt:1").await.is_some());

    assert_eq!(manager.clear_by_tags(&["patient:8"]).await, 1);
    assert!(manager.get_cache::<Appointment>("appt:1").await.is_none());
}

#[tokio::test]
async fn test_delete_drops_tag_memberships() {
    let manager = setup_memory_manager(&manual_clock()).await;

    manager
        .set_cache("k", &1u8, SetOptions::new().with_tags(["patients"]))
        .await
        .unwrap();
    manager.delete_cache("k").await;

    assert!(manager.tags_for_key("k").is_empty());
    assert_eq!(manager.clear_by_tags(&["patients"]).await, 0);
}

#[tokio::test]
async fn test_tag_index_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = manual_clock();

    {
        let manager = setup_disk_manager(dir.path(), &clock).await;
        manager
            .set_cache("patients:list", &patients(2), SetOptions::new().with_tags(["patients"]))
            .await
            .unwrap();
        manager
            .set_cache("templates:all", &vec!["intake"], SetOptions::new().with_tags(["templates"]))
            .await
            .unwrap();
    }

    let manager = setup_disk_manager(dir.path(), &clock).await;
    assert_eq!(manager.tags_for_key("patients:list"), tags(&["patients"]));

    assert_eq!(manager.clear_by_tags(&["patients"]).await, 1);
    assert!(manager.get_cache::<Vec<Patient>>("patients:list").await.is_none());
    assert_eq!(
        manager.get_cache::<Vec<String>>("templates:all").await,
        Some(vec!["intake".to_string()])
    );

    // The cleared tag record is gone from disk as well
    let (sqlite, _) = open_disk_tiers(dir.path());
    assert_eq!(sqlite.iterate_keys(Table::Tags).await.unwrap(), vec!["templates"]);
}

/// Full flow: cache a list, read it, edit a patient, see the list cleared
#[tokio::test]
async fn test_patients_list_end_to_end() {
    let dir = TempDir::new().unwrap();
    let clock = manual_clock();
    let manager = setup_disk_manager(dir.path(), &clock).await;

    let list = patients(5);
    let options = SetOptions::new()
        .with_strategy(CacheStrategy::Medium)
        .with_tags(["patients"]);

    let first = manager
        .get_cache_with_fallback_and_options("patients:list", options.clone(), || async {
            Ok(patients(5))
        })
        .await;
    assert!(!first.from_cache);
    assert_eq!(first.data.as_ref(), Some(&list));

    let second = manager
        .get_cache_with_fallback::<Vec<Patient>, _, _>("patients:list", || async {
            anyhow::bail!("should not be called on a hit")
        })
        .await;
    assert!(second.from_cache);
    assert_eq!(second.data, Some(list.clone()));

    manager
        .set_cache(
            "patient:3",
            &Patient::new(3),
            SetOptions::new().invalidate_tags(["patients"]),
        )
        .await
        .unwrap();

    let after_edit: Option<Vec<Patient>> = manager.get_cache("patients:list").await;
    assert!(after_edit.is_none());
    assert_eq!(manager.get_cache_stats().await.entry_count, 1);
}

#[tokio::test]
async fn test_sweep_drops_tags_of_evicted_entries() {
    let clock = manual_clock();
    let memory = Arc::new(MokaTier::default());
    let tier: Arc<dyn StorageTier> = memory.clone();
    let manager = CacheManager::new(vec![tier], Arc::new(clock.clone())).await.unwrap();

    for key in ["patient:1", "patient:2"] {
        manager
            .set_cache(key, &1u8, SetOptions::new().with_tags(["patients"]))
            .await
            .unwrap();
    }

    // Stands in for the memory tier evicting at capacity
    memory.delete_raw(Table::Entries, "patient:2").await.unwrap();

    assert_eq!(manager.sweep_expired().await, 0);
    assert!(manager.tags_for_key("patient:2").is_empty());
    assert_eq!(manager.tags_for_key("patient:1"), tags(&["patients"]));
    assert_eq!(manager.clear_by_tags(&["patients"]).await, 1);
}
