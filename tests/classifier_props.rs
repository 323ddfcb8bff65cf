use offline_cache::cache::{CacheKey, EvictionCandidate, eviction_floor, plan_eviction};
use offline_cache::domain::strategy::{RuleTable, Strategy, StrategyClassifier};
use proptest::prelude::*;
use url::Url;

fn classifier() -> StrategyClassifier {
    StrategyClassifier::new(&RuleTable::default()).unwrap()
}

fn key(index: usize) -> CacheKey {
    let url = Url::parse("https://game.test")
        .unwrap()
        .join(&format!("/asset/{index}"))
        .unwrap();
    CacheKey::get(&url)
}

proptest! {
    #[test]
    fn high_priority_paths_are_always_cache_first(
        critical in prop::sample::select(vec![
            "/",
            "/index.html",
            "/manifest.json",
            "/src/main.js",
            "/assets/icons/icon-192x192.png",
            "/assets/icons/icon-512x512.png",
        ]),
        other in "/[a-z0-9./_-]{0,40}",
    ) {
        let classifier = classifier();
        prop_assert!(classifier.is_high_priority(critical));
        prop_assert_eq!(classifier.classify(critical), Strategy::CacheFirst);
        if classifier.is_high_priority(&other) {
            prop_assert_eq!(classifier.classify(&other), Strategy::CacheFirst);
        }
    }

    #[test]
    fn core_modules_are_always_revalidated(name in "[A-Za-z][A-Za-z0-9_]{0,24}") {
        let path = format!("/src/core/{name}.js");
        prop_assert_eq!(classifier().classify(&path), Strategy::StaleWhileRevalidate);
    }

    #[test]
    fn api_paths_never_touch_the_cache(rest in "[a-z0-9/]{0,32}") {
        let path = format!("/api/{rest}");
        prop_assert_eq!(classifier().classify(&path), Strategy::NetworkOnly);
    }

    #[test]
    fn unmatched_paths_default_to_network_first(segment in "[a-z]{1,12}") {
        let path = format!("/misc/{segment}.txt");
        prop_assert_eq!(classifier().classify(&path), Strategy::NetworkFirst);
    }

    #[test]
    fn eviction_reaches_the_floor_and_spares_protected_entries(
        entries in prop::collection::vec((1u64..5_000, 0i64..(5 * 86_400_000), any::<bool>()), 1..40),
        limit in 1u64..50_000,
    ) {
        let candidates: Vec<EvictionCandidate> = entries
            .iter()
            .enumerate()
            .map(|(index, (size, cached_at_ms, protected))| EvictionCandidate {
                key: key(index),
                size: *size,
                cached_at_ms: *cached_at_ms,
                protected: *protected,
            })
            .collect();
        let total: u64 = candidates.iter().map(|candidate| candidate.size).sum();
        let unprotected: u64 = candidates
            .iter()
            .filter(|candidate| !candidate.protected)
            .map(|candidate| candidate.size)
            .sum();

        match plan_eviction(candidates, limit) {
            None => prop_assert!(total <= limit),
            Some(plan) => {
                prop_assert!(total > limit);
                prop_assert!(plan.victims.iter().all(|victim| !victim.protected));
                let remaining = total - plan.planned_bytes;
                prop_assert!(remaining <= eviction_floor(limit) || plan.planned_bytes == unprotected);
            }
        }
    }
}
