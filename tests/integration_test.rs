use staysense::assistant::{Assistant, ToolOutcome};
use staysense::classifier::IntentKind;
use staysense::config::RouterConfig;
use staysense::router::ToolInvocation;
use staysense::store::{MemoryStore, Row};
use std::sync::Arc;

async fn build_assistant() -> (Assistant, Arc<MemoryStore>) {
    let store = MemoryStore::shared("hotel_metrics", "hotel_name");
    store
        .set_entities(&[
            "Vier Jahreszeiten Hamburg",
            "Dolder Grand",
            "Adlon Kempinski Berlin",
        ])
        .await;

    for (hotel, date, revenue) in [
        ("vier jahreszeiten hamburg", "2026-08-23", 176_300.0),
        ("vier jahreszeiten hamburg", "2026-08-24", 182_400.0),
        ("dolder grand", "2026-08-24", 96_750.0),
        ("adlon kempinski berlin", "2026-08-24", 154_300.0),
    ] {
        let mut row = Row::new();
        row.insert("hotel_name".to_string(), serde_json::json!(hotel));
        row.insert("metric_date".to_string(), serde_json::json!(date));
        row.insert("revenue".to_string(), serde_json::json!(revenue));
        store.insert_row(row).await;
    }

    (Assistant::new(store.clone(), RouterConfig::default()), store)
}

#[tokio::test]
async fn weather_question_extracts_location() {
    let (assistant, _) = build_assistant().await;
    let outcome = assistant
        .handle_message("w1", "wie ist das wetter in Hamburg")
        .await;

    assert_eq!(outcome.classification.intent, IntentKind::Weather);
    assert_eq!(
        outcome.classification.extracted_location.as_deref(),
        Some("Hamburg")
    );
    match outcome.invocation {
        ToolInvocation::HttpCall { endpoint, method } => {
            assert!(endpoint.contains("Hamburg"));
            assert_eq!(method, "GET");
        }
        other => panic!("unexpected invocation: {:?}", other),
    }
}

#[tokio::test]
async fn exact_hotel_name_resolves_without_correction() {
    let (assistant, _) = build_assistant().await;
    let outcome = assistant
        .handle_message("b1", "zeige mir Vier Jahreszeiten Hamburg")
        .await;

    assert_eq!(outcome.classification.intent, IntentKind::Business);
    assert_eq!(
        outcome.classification.extracted_entity.as_deref(),
        Some("vier jahreszeiten hamburg")
    );
    assert!(!outcome.classification.spelling_corrected);
}

#[tokio::test]
async fn misspelled_hotel_name_resolves_via_fuzzy_correction() {
    let (assistant, _) = build_assistant().await;
    let outcome = assistant
        .handle_message("b2", "zeige mir vier jahreszeiten hambrug")
        .await;

    assert_eq!(outcome.classification.intent, IntentKind::Business);
    assert_eq!(
        outcome.classification.extracted_entity.as_deref(),
        Some("vier jahreszeiten hamburg")
    );
    assert!(outcome.classification.spelling_corrected);
}

#[tokio::test]
async fn followup_without_entity_uses_context_lookback() {
    let (assistant, _) = build_assistant().await;
    assistant
        .handle_message("c1", "zeige mir die zahlen vom Dolder Grand")
        .await;
    let outcome = assistant
        .handle_message("c1", "fasse die Zahlen zusammen")
        .await;

    assert_eq!(outcome.current_entity.as_deref(), Some("dolder grand"));
    match outcome.invocation {
        ToolInvocation::DataQuery { entity_scope, .. } => {
            assert_eq!(entity_scope.as_deref(), Some("dolder grand"));
        }
        other => panic!("unexpected invocation: {:?}", other),
    }
    match outcome.tool_result {
        Some(ToolOutcome::Query(result)) => {
            assert!(result.error.is_none());
            assert!(result.executed_query.contains("%dolder grand%"));
        }
        other => panic!("unexpected tool result: {:?}", other),
    }
}

#[tokio::test]
async fn scoped_query_results_stay_within_entity() {
    let (assistant, _) = build_assistant().await;
    let outcome = assistant
        .handle_message("s1", "umsatz vom Vier Jahreszeiten Hamburg")
        .await;

    match outcome.tool_result {
        Some(ToolOutcome::Query(result)) => {
            assert_eq!(result.row_count, 2);
            for row in &result.rows {
                assert_eq!(
                    row.get("hotel_name").and_then(|v| v.as_str()),
                    Some("vier jahreszeiten hamburg")
                );
            }
        }
        other => panic!("unexpected tool result: {:?}", other),
    }
}

#[tokio::test]
async fn political_topic_stays_general_despite_business_words() {
    let (assistant, _) = build_assistant().await;
    let outcome = assistant
        .handle_message("g1", "was bedeutet die wahl für die umsatzsteuer")
        .await;

    assert_eq!(outcome.classification.intent, IntentKind::General);
    assert_eq!(outcome.invocation, ToolInvocation::None);
    assert!(outcome.tool_result.is_none());
}

#[tokio::test]
async fn topic_change_clears_scope_then_new_entity_rebinds() {
    let (assistant, _) = build_assistant().await;
    assistant
        .handle_message("t1", "zeige mir die zahlen vom Dolder Grand")
        .await;

    // Off-topic turn drops the entity context entirely.
    let offtopic = assistant
        .handle_message("t1", "kennst du die geschichte der schweiz")
        .await;
    assert_eq!(offtopic.current_entity, None);

    // The next business turn binds a fresh entity.
    let rebound = assistant
        .handle_message("t1", "auslastung vom Adlon Kempinski Berlin")
        .await;
    assert_eq!(
        rebound.current_entity.as_deref(),
        Some("adlon kempinski berlin")
    );
}

#[tokio::test]
async fn store_outage_degrades_classification_gracefully() {
    let (assistant, store) = build_assistant().await;
    // Warm the dictionary, then take the store down.
    assistant
        .handle_message("d1", "zeige mir Dolder Grand")
        .await;
    store.fail_with(Some("connection refused")).await;

    // Classification still works off the cached dictionary; only the query
    // itself reports a structured error.
    let outcome = assistant
        .handle_message("d1", "zeige mir Dolder Grand")
        .await;
    assert_eq!(outcome.classification.intent, IntentKind::Business);
    match outcome.tool_result {
        Some(ToolOutcome::Query(result)) => {
            assert!(result.error.is_some());
        }
        other => panic!("unexpected tool result: {:?}", other),
    }
}
