//! Assistant pipeline
//!
//! The single entry point the surrounding chat layer calls per turn:
//! dictionary refresh, context read, classification, routing, dispatch and
//! context update, strictly in that order. `handle_message` never fails;
//! every stage folds its errors into the structured outcome.

use crate::classifier::{ClassificationResult, IntentClassifier};
use crate::config::RouterConfig;
use crate::context::ConversationContext;
use crate::dictionary::EntityDictionaryCache;
use crate::router::{ToolDispatchRouter, ToolInvocation};
use crate::sandbox::{QueryExecutionResult, SafeQuerySandbox};
use crate::store::{
    CalculationOutcome, Calculator, DataStore, DocumentHits, DocumentSearch, SemanticClassifier,
    SqlGenerator, WeatherClient, WeatherReport,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutcome {
    Query(QueryExecutionResult),
    Weather(WeatherReport),
    Calculation(CalculationOutcome),
    Documents(DocumentHits),
    /// The routed tool has no configured executor, or it failed. Reported,
    /// never thrown.
    Unavailable { tool: String, reason: String },
}

/// Everything the caller gets back for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub thread_id: String,
    pub classification: ClassificationResult,
    pub invocation: ToolInvocation,
    pub tool_result: Option<ToolOutcome>,
    pub current_entity: Option<String>,
}

pub struct Assistant {
    config: Arc<RouterConfig>,
    store: Arc<dyn DataStore>,
    dictionary: EntityDictionaryCache,
    classifier: IntentClassifier,
    sandbox: SafeQuerySandbox,
    contexts: Mutex<HashMap<String, ConversationContext>>,
    weather: Option<Arc<dyn WeatherClient>>,
    calculator: Option<Arc<dyn Calculator>>,
    documents: Option<Arc<dyn DocumentSearch>>,
    sql_generator: Option<Arc<dyn SqlGenerator>>,
}

impl Assistant {
    pub fn new(store: Arc<dyn DataStore>, config: RouterConfig) -> Self {
        let config = Arc::new(config);
        let dictionary = EntityDictionaryCache::new(
            store.clone(),
            Duration::from_secs(config.dictionary_ttl_secs),
        );
        let classifier = IntentClassifier::new(config.clone());
        let sandbox = SafeQuerySandbox::new(store.clone(), config.sandbox.clone());

        Self {
            config,
            store,
            dictionary,
            classifier,
            sandbox,
            contexts: Mutex::new(HashMap::new()),
            weather: None,
            calculator: None,
            documents: None,
            sql_generator: None,
        }
    }

    pub fn with_weather(mut self, client: Arc<dyn WeatherClient>) -> Self {
        self.weather = Some(client);
        self
    }

    pub fn with_calculator(mut self, calculator: Arc<dyn Calculator>) -> Self {
        self.calculator = Some(calculator);
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentSearch>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_sql_generator(mut self, generator: Arc<dyn SqlGenerator>) -> Self {
        self.sql_generator = Some(generator);
        self
    }

    pub fn with_semantic(mut self, semantic: Arc<dyn SemanticClassifier>) -> Self {
        self.classifier = IntentClassifier::new(self.config.clone()).with_semantic(semantic);
        self
    }

    /// Process one user turn end to end.
    pub async fn handle_message(&self, thread_id: &str, message: &str) -> TurnOutcome {
        if let Err(e) = self.dictionary.refresh(Instant::now()).await {
            warn!("Dictionary refresh error (continuing with stale data): {}", e);
        }
        let dictionary = self.dictionary.snapshot().await;

        let classification = self.classifier.classify(message, &dictionary).await;
        info!(
            thread_id,
            "Classified message as {} ({:.2})",
            classification.intent,
            classification.confidence
        );

        // Update the thread context with this turn, then read the entity the
        // conversation is about for routing.
        let context_entity = {
            let mut contexts = self.contexts.lock().await;
            let context = contexts
                .entry(thread_id.to_string())
                .or_insert_with(|| ConversationContext::new(self.config.history_capacity));
            context.observe_user_turn(
                message,
                &dictionary.names_by_specificity(),
                dictionary.keywords(),
                &self.config.offtopic_keywords,
                classification.extracted_entity.as_deref(),
            );
            context.current_entity()
        };

        let invocation = ToolDispatchRouter::route(
            &classification,
            context_entity.as_deref(),
            message,
            &self.config,
        );

        let tool_result = self.dispatch(&invocation).await;

        {
            let mut contexts = self.contexts.lock().await;
            if let Some(context) = contexts.get_mut(thread_id) {
                context.record_assistant_turn(&summarize(&invocation, &tool_result));
            }
        }

        TurnOutcome {
            thread_id: thread_id.to_string(),
            classification,
            invocation,
            tool_result,
            current_entity: context_entity,
        }
    }

    /// Drop all state for a thread (new conversation).
    pub async fn clear_thread(&self, thread_id: &str) {
        if let Some(context) = self.contexts.lock().await.get_mut(thread_id) {
            context.clear();
        }
    }

    async fn dispatch(&self, invocation: &ToolInvocation) -> Option<ToolOutcome> {
        match invocation {
            ToolInvocation::None => None,
            ToolInvocation::HttpCall { endpoint, method } => {
                Some(match &self.weather {
                    Some(client) => match client.call(endpoint, method).await {
                        Ok(report) => ToolOutcome::Weather(report),
                        Err(e) => unavailable("http-call", e.to_string()),
                    },
                    None => unavailable("http-call", "no weather client configured".to_string()),
                })
            }
            ToolInvocation::CalcEval { expression } => {
                Some(match &self.calculator {
                    Some(calc) => match calc.evaluate(expression).await {
                        Ok(outcome) => ToolOutcome::Calculation(outcome),
                        Err(e) => unavailable("calc-eval", e.to_string()),
                    },
                    None => unavailable("calc-eval", "no calculator configured".to_string()),
                })
            }
            ToolInvocation::DocSearch { query } => {
                Some(match &self.documents {
                    Some(docs) => match docs.search(query).await {
                        Ok(hits) => ToolOutcome::Documents(hits),
                        Err(e) => unavailable("doc-search", e.to_string()),
                    },
                    None => unavailable("doc-search", "no document search configured".to_string()),
                })
            }
            ToolInvocation::DataQuery {
                entity_scope,
                raw_intent,
            } => {
                let sql = self
                    .candidate_sql(raw_intent, entity_scope.as_deref())
                    .await;
                let result = self.sandbox.execute(&sql, entity_scope.as_deref()).await;
                Some(ToolOutcome::Query(result))
            }
        }
    }

    /// SQL to feed the sandbox: the generator's output when one is
    /// configured, otherwise a plain recent-records template over the fact
    /// table. The sandbox re-validates either way.
    async fn candidate_sql(&self, raw_intent: &str, entity_scope: Option<&str>) -> String {
        if let Some(generator) = &self.sql_generator {
            match generator.generate_sql(raw_intent, entity_scope).await {
                Ok(sql) => return sql,
                Err(e) => warn!("SQL generator failed, using template query: {}", e),
            }
        }
        format!(
            "SELECT * FROM {} ORDER BY {} DESC LIMIT 100",
            self.config.sandbox.fact_table, self.config.sandbox.date_column
        )
    }

    /// Direct access to the store collaborator (demo binary, diagnostics).
    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }
}

fn unavailable(tool: &str, reason: String) -> ToolOutcome {
    warn!("Tool '{}' unavailable: {}", tool, reason);
    ToolOutcome::Unavailable {
        tool: tool.to_string(),
        reason,
    }
}

fn summarize(invocation: &ToolInvocation, tool_result: &Option<ToolOutcome>) -> String {
    match (invocation, tool_result) {
        (ToolInvocation::DataQuery { .. }, Some(ToolOutcome::Query(result))) => {
            format!("data query returned {} rows", result.row_count)
        }
        (ToolInvocation::HttpCall { .. }, _) => "weather lookup".to_string(),
        (ToolInvocation::CalcEval { .. }, _) => "calculation".to_string(),
        (ToolInvocation::DocSearch { .. }, _) => "document search".to_string(),
        (ToolInvocation::None, _) => "general answer".to_string(),
        (_, Some(ToolOutcome::Unavailable { tool, .. })) => {
            format!("tool {} unavailable", tool)
        }
        _ => "turn handled".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::IntentKind;
    use crate::store::MemoryStore;

    async fn seeded_assistant() -> (Assistant, Arc<MemoryStore>) {
        let store = MemoryStore::shared("hotel_metrics", "hotel_name");
        store
            .set_entities(&[
                "Vier Jahreszeiten Hamburg",
                "Dolder Grand",
                "Adlon Kempinski Berlin",
            ])
            .await;
        for (hotel, revenue) in [
            ("vier jahreszeiten hamburg", 120_000.0),
            ("dolder grand", 95_000.0),
        ] {
            let mut row = crate::store::Row::new();
            row.insert("hotel_name".to_string(), serde_json::json!(hotel));
            row.insert("metric_date".to_string(), serde_json::json!("2026-08-01"));
            row.insert("revenue".to_string(), serde_json::json!(revenue));
            store.insert_row(row).await;
        }
        (
            Assistant::new(store.clone(), RouterConfig::default()),
            store,
        )
    }

    #[tokio::test]
    async fn test_entity_query_is_scoped() {
        let (assistant, _) = seeded_assistant().await;
        let outcome = assistant
            .handle_message("t1", "zeige mir die zahlen vom Dolder Grand")
            .await;
        assert_eq!(outcome.classification.intent, IntentKind::Business);
        match outcome.tool_result {
            Some(ToolOutcome::Query(result)) => {
                assert!(result.executed_query.contains("ILIKE '%dolder grand%'"));
                assert_eq!(result.row_count, 1);
            }
            other => panic!("unexpected tool result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_followup_inherits_context_entity() {
        let (assistant, _) = seeded_assistant().await;
        assistant
            .handle_message("t1", "zeige mir die zahlen vom Dolder Grand")
            .await;
        let outcome = assistant
            .handle_message("t1", "fasse die Zahlen zusammen")
            .await;
        assert_eq!(outcome.current_entity.as_deref(), Some("dolder grand"));
        match outcome.invocation {
            ToolInvocation::DataQuery { entity_scope, .. } => {
                assert_eq!(entity_scope.as_deref(), Some("dolder grand"));
            }
            other => panic!("unexpected invocation: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offtopic_turn_clears_scope() {
        let (assistant, _) = seeded_assistant().await;
        assistant
            .handle_message("t1", "zeige mir die zahlen vom Dolder Grand")
            .await;
        let outcome = assistant
            .handle_message("t1", "hast du ein rezept für lasagne")
            .await;
        assert_eq!(outcome.current_entity, None);
        assert_eq!(outcome.classification.intent, IntentKind::General);
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let (assistant, _) = seeded_assistant().await;
        assistant
            .handle_message("t1", "zeige mir die zahlen vom Dolder Grand")
            .await;
        let outcome = assistant
            .handle_message("t2", "fasse die Zahlen zusammen")
            .await;
        assert_eq!(outcome.current_entity, None);
        match outcome.invocation {
            ToolInvocation::DataQuery { entity_scope, .. } => {
                // No guessing across threads: unscoped rather than wrong.
                assert_eq!(entity_scope, None);
            }
            other => panic!("unexpected invocation: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_weather_without_client_is_reported_not_thrown() {
        let (assistant, _) = seeded_assistant().await;
        let outcome = assistant
            .handle_message("t1", "wie ist das wetter in Hamburg")
            .await;
        assert_eq!(outcome.classification.intent, IntentKind::Weather);
        match outcome.tool_result {
            Some(ToolOutcome::Unavailable { tool, .. }) => assert_eq!(tool, "http-call"),
            other => panic!("unexpected tool result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_thread_resets_entity() {
        let (assistant, _) = seeded_assistant().await;
        assistant
            .handle_message("t1", "zeige mir die zahlen vom Dolder Grand")
            .await;
        assistant.clear_thread("t1").await;
        let outcome = assistant
            .handle_message("t1", "fasse die Zahlen zusammen")
            .await;
        assert_eq!(outcome.current_entity, None);
    }
}
