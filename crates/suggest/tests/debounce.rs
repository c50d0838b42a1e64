#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use piazza_api::MemoryIndex;
use piazza_core::{BusinessSummary, Dropdown, GeoPoint, SuggestionKind};
use piazza_store::{SearchStore, SuggestState};
use piazza_suggest::{SuggestConfig, SuggestEngine};

fn biz(name: &str, category: &str) -> BusinessSummary {
    BusinessSummary {
        id: name.to_lowercase().replace(' ', "-"),
        name: name.into(),
        category: category.into(),
        location: GeoPoint::new(40.7, -74.0),
        rating: None,
        address: None,
    }
}

fn fixtures() -> Vec<BusinessSummary> {
    vec![
        biz("Pizza Palace", "Restaurants"),
        biz("Pizzeria Uno", "Restaurants"),
        biz("Sushi Garden", "Restaurants"),
        biz("Taco Corner", "Food Trucks"),
    ]
}

fn rig() -> (Arc<MemoryIndex>, Arc<SearchStore>, SuggestEngine) {
    let index = Arc::new(MemoryIndex::new(fixtures()));
    let store = Arc::new(SearchStore::new());
    let cfg = SuggestConfig { debounce: Duration::from_millis(300), limit: 5 };
    let engine = SuggestEngine::with_config(index.clone(), store.clone(), cfg);
    (index, store, engine)
}

#[tokio::test(start_paused = true)]
async fn keystroke_burst_produces_one_index_call_for_final_text() {
    let (index, store, engine) = rig();

    for text in ["P", "Pi", "Piz", "Pizz", "Pizza"] {
        engine.on_query_change(text);
        tokio::time::sleep(Duration::from_millis(80)).await;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(index.calls(), 1);
    let snap = store.current();
    match &snap.suggestions {
        SuggestState::Ready(rows) => {
            assert!(rows.iter().any(|r| r.text == "Pizza Palace"));
        }
        other => panic!("expected ready suggestions, got {other:?}"),
    }
    assert_eq!(snap.dropdown, Dropdown::Search);
}

#[tokio::test(start_paused = true)]
async fn pause_shorter_than_debounce_never_fires() {
    let (index, _store, engine) = rig();

    engine.on_query_change("piz");
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.on_query_change("pizza");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(index.calls(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(index.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn previous_rows_stay_visible_while_new_flight_loads() {
    let (index, store, engine) = rig();

    engine.on_query_change("pizza");
    tokio::time::sleep(Duration::from_millis(350)).await;
    let before = store.current().suggestions.visible().to_vec();
    assert!(!before.is_empty());

    index.push_delay(Duration::from_millis(500));
    engine.on_query_change("taco");
    tokio::time::sleep(Duration::from_millis(320)).await;

    let snap = store.current();
    assert!(snap.suggestions.is_loading());
    assert_eq!(snap.suggestions.visible(), before.as_slice());

    tokio::time::sleep(Duration::from_millis(600)).await;
    let snap = store.current();
    assert!(!snap.suggestions.is_loading());
    assert!(snap.suggestions.visible().iter().any(|r| r.text == "Taco Corner"));
}

#[tokio::test(start_paused = true)]
async fn late_response_for_old_text_is_dropped() {
    let (index, store, engine) = rig();

    index.push_delay(Duration::from_secs(1));
    engine.on_query_change("pizza");
    tokio::time::sleep(Duration::from_millis(310)).await;

    engine.on_query_change("sushi");
    tokio::time::sleep(Duration::from_millis(400)).await;
    let rows = store.current().suggestions.visible().to_vec();
    assert!(rows.iter().any(|r| r.text == "Sushi Garden"));

    // The pizza flight's answer would arrive about now; nothing may change.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.current().suggestions.visible(), rows.as_slice());
}

#[tokio::test(start_paused = true)]
async fn blank_text_clears_immediately_without_a_flight() {
    let (index, store, engine) = rig();

    engine.on_query_change("pizza");
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(index.calls(), 1);

    engine.on_query_change("   ");
    let snap = store.current();
    assert_eq!(snap.suggestions, SuggestState::Idle);
    assert_eq!(snap.dropdown, Dropdown::None);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(index.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_flight_keeps_previous_rows_and_sets_notice() {
    let (index, store, engine) = rig();

    engine.on_query_change("pizza");
    tokio::time::sleep(Duration::from_millis(350)).await;
    let before = store.current().suggestions.visible().to_vec();

    index.fail_next();
    engine.on_query_change("taco");
    tokio::time::sleep(Duration::from_millis(350)).await;

    let snap = store.current();
    assert_eq!(snap.suggestions.visible(), before.as_slice());
    assert!(snap.notice.is_some());
}

#[tokio::test(start_paused = true)]
async fn cancel_drops_scheduled_flight() {
    let (index, store, engine) = rig();

    engine.on_query_change("pizza");
    engine.cancel();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(index.calls(), 0);
    assert_eq!(store.current().suggestions, SuggestState::Idle);
}

#[tokio::test(start_paused = true)]
async fn rows_group_businesses_before_categories() {
    let (_index, store, engine) = rig();

    engine.on_query_change("pizza");
    tokio::time::sleep(Duration::from_millis(350)).await;

    let rows = store.current().suggestions.visible().to_vec();
    let first_category = rows.iter().position(|r| r.kind == SuggestionKind::Category);
    if let Some(pos) = first_category {
        assert!(rows[pos..].iter().all(|r| r.kind == SuggestionKind::Category));
    }
}
