//! Collaborator seams
//!
//! The router core talks to the outside world through these narrow traits:
//! the entity/data store, the tool executors, and the optional semantic
//! classifier. An in-memory store ships here for the demo binary and tests.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type Row = HashMap<String, serde_json::Value>;

/// Raw result of a read-only query as the store reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRows {
    pub rows: Vec<Row>,
    pub took_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub table: String,
    pub name: String,
    pub data_type: String,
}

/// Read-only schema snapshot used for error triage and empty-result hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaTriage {
    pub schema: String,
    pub tables: Vec<String>,
    pub columns: Vec<ColumnInfo>,
}

/// Data store collaborator. All access is read-only by contract.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Canonical business entity (hotel) names.
    async fn list_entity_names(&self) -> Result<Vec<String>>;

    /// Run a read-only SQL statement under the given deadline.
    async fn run_read_only_query(&self, sql: &str, timeout_ms: u64) -> Result<QueryRows>;

    /// Current schema, tables and columns for triage.
    async fn introspect_schema(&self) -> Result<SchemaTriage>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherReport {
    pub status: u16,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationOutcome {
    pub result: f64,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHits {
    pub hits: Vec<serde_json::Value>,
}

/// Weather HTTP client collaborator.
#[async_trait]
pub trait WeatherClient: Send + Sync {
    async fn call(&self, endpoint: &str, method: &str) -> Result<WeatherReport>;
}

/// Calculator collaborator.
#[async_trait]
pub trait Calculator: Send + Sync {
    async fn evaluate(&self, expression: &str) -> Result<CalculationOutcome>;
}

/// Document search collaborator.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<DocumentHits>;
}

/// Turns a free-text data request into a candidate SQL statement. In
/// production this is the LLM layer; the sandbox validates and repairs
/// whatever comes back, so the generator is never trusted.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate_sql(&self, intent: &str, entity_scope: Option<&str>) -> Result<String>;
}

/// Result of the optional model-based classification layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticVerdict {
    #[serde(rename = "type")]
    pub category: String,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// Optional semantic classifier collaborator. Any error or malformed payload
/// is treated by the caller as "layer not available".
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    async fn classify_semantic(&self, message: &str) -> Result<SemanticVerdict>;
}

/// In-memory store backed by a single fact table. Used by the demo binary and
/// the test suite; real deployments implement [`DataStore`] over Postgres.
pub struct MemoryStore {
    entity_names: RwLock<Vec<String>>,
    fact_table: String,
    entity_column: String,
    rows: RwLock<Vec<Row>>,
    /// When set, every store call fails with this message (test hook).
    failure: RwLock<Option<String>>,
}

impl MemoryStore {
    pub fn new(fact_table: &str, entity_column: &str) -> Self {
        Self {
            entity_names: RwLock::new(Vec::new()),
            fact_table: fact_table.to_string(),
            entity_column: entity_column.to_string(),
            rows: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
        }
    }

    pub fn shared(fact_table: &str, entity_column: &str) -> Arc<Self> {
        Arc::new(Self::new(fact_table, entity_column))
    }

    pub async fn set_entities(&self, names: &[&str]) {
        let mut guard = self.entity_names.write().await;
        *guard = names.iter().map(|n| n.to_string()).collect();
    }

    pub async fn insert_row(&self, row: Row) {
        self.rows.write().await.push(row);
    }

    pub async fn fail_with(&self, message: Option<&str>) {
        *self.failure.write().await = message.map(|m| m.to_string());
    }

    async fn check_failure(&self) -> Result<()> {
        if let Some(msg) = self.failure.read().await.as_ref() {
            return Err(AssistantError::Store(msg.clone()));
        }
        Ok(())
    }

    /// Minimal SELECT evaluation: scans the fact table, honours one
    /// `entity_column ILIKE '%..%'` filter and a trailing LIMIT.
    fn evaluate(&self, sql: &str, rows: &[Row]) -> Result<Vec<Row>> {
        let lowered = sql.to_lowercase();
        if !lowered.contains(&self.fact_table.to_lowercase()) {
            return Err(AssistantError::Store(format!(
                "relation \"{}\" does not exist",
                Self::extract_relation(&lowered).unwrap_or_else(|| "?".to_string())
            )));
        }

        let mut selected: Vec<Row> = rows.to_vec();

        let ilike_pattern = format!(r"{}\s+ilike\s+'%([^%']*)%'", regex::escape(&self.entity_column));
        if let Some(caps) = regex::Regex::new(&ilike_pattern)
            .map_err(|e| AssistantError::Store(e.to_string()))?
            .captures(&lowered)
        {
            let needle = caps[1].to_string();
            selected.retain(|row| {
                row.get(&self.entity_column)
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            });
        }

        if let Some(caps) = regex::Regex::new(r"limit\s+(\d+)")
            .map_err(|e| AssistantError::Store(e.to_string()))?
            .captures(&lowered)
        {
            let limit: usize = caps[1].parse().unwrap_or(usize::MAX);
            selected.truncate(limit);
        }

        Ok(selected)
    }

    fn extract_relation(lowered_sql: &str) -> Option<String> {
        let after = lowered_sql.split(" from ").nth(1)?;
        after.split_whitespace().next().map(|s| s.to_string())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn list_entity_names(&self) -> Result<Vec<String>> {
        self.check_failure().await?;
        Ok(self.entity_names.read().await.clone())
    }

    async fn run_read_only_query(&self, sql: &str, _timeout_ms: u64) -> Result<QueryRows> {
        self.check_failure().await?;
        let start = std::time::Instant::now();
        let rows = self.rows.read().await;
        let selected = self.evaluate(sql, &rows)?;
        Ok(QueryRows {
            rows: selected,
            took_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn introspect_schema(&self) -> Result<SchemaTriage> {
        self.check_failure().await?;
        let rows = self.rows.read().await;
        let mut columns: Vec<ColumnInfo> = Vec::new();
        if let Some(first) = rows.first() {
            let mut names: Vec<&String> = first.keys().collect();
            names.sort();
            for name in names {
                columns.push(ColumnInfo {
                    table: self.fact_table.clone(),
                    name: name.clone(),
                    data_type: "text".to_string(),
                });
            }
        }
        Ok(SchemaTriage {
            schema: "public".to_string(),
            tables: vec![self.fact_table.clone()],
            columns,
        })
    }
}
