//! Safe query builder / sandbox
//!
//! Every data query passes through here before touching the store: statement
//! shape validation, keyword blacklist, best-effort naming repair, entity
//! scope injection, a hard timeout, a row cap, one bounded empty-result
//! fallback, and schema triage on relation/column errors. Nothing past this
//! layer ever throws; every outcome is a structured [`QueryExecutionResult`].

use crate::config::SandboxConfig;
use crate::error::AssistantError;
use crate::store::{DataStore, Row, SchemaTriage};
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryErrorCode {
    InvalidInput,
    ForbiddenOperation,
    ForbiddenKeyword,
    Timeout,
    ResultTruncated,
    RelationNotFound,
    ColumnNotFound,
    SyntaxError,
    InsufficientPrivilege,
    UnknownError,
}

impl fmt::Display for QueryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::ForbiddenOperation => "FORBIDDEN_OPERATION",
            Self::ForbiddenKeyword => "FORBIDDEN_KEYWORD",
            Self::Timeout => "TIMEOUT",
            Self::ResultTruncated => "RESULT_TRUNCATED",
            Self::RelationNotFound => "RELATION_NOT_FOUND",
            Self::ColumnNotFound => "COLUMN_NOT_FOUND",
            Self::SyntaxError => "SYNTAX_ERROR",
            Self::InsufficientPrivilege => "INSUFFICIENT_PRIVILEGE",
            Self::UnknownError => "UNKNOWN_ERROR",
        };
        write!(f, "{}", name)
    }
}

/// One query attempt's outcome. Immutable once built; retries and fallbacks
/// each produce a fresh result and the caller decides which one to surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExecutionResult {
    pub query_id: String,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub executed_query: String,
    pub took_ms: u64,
    pub error: Option<String>,
    pub error_code: Option<QueryErrorCode>,
    pub triage: Option<SchemaTriage>,
    pub hint: Option<String>,
}

impl QueryExecutionResult {
    fn failure(query: &str, code: QueryErrorCode, message: String) -> Self {
        Self {
            query_id: Uuid::new_v4().to_string(),
            rows: Vec::new(),
            row_count: 0,
            executed_query: query.to_string(),
            took_ms: 0,
            error: Some(message),
            error_code: Some(code),
            triage: None,
            hint: None,
        }
    }

    fn success(query: &str, rows: Vec<Row>, took_ms: u64) -> Self {
        Self {
            query_id: Uuid::new_v4().to_string(),
            row_count: rows.len(),
            rows,
            executed_query: query.to_string(),
            took_ms,
            error: None,
            error_code: None,
            triage: None,
            hint: None,
        }
    }
}

pub struct SafeQuerySandbox {
    store: Arc<dyn DataStore>,
    config: SandboxConfig,
    fact_table_ref: Regex,
    scope_filter: Regex,
    where_clause: Regex,
    clause_boundary: Regex,
    forbidden_patterns: Vec<(String, Regex)>,
}

impl SafeQuerySandbox {
    pub fn new(store: Arc<dyn DataStore>, config: SandboxConfig) -> Self {
        let entity_col = regex::escape(&config.entity_column);
        // Existing filter on the entity column, `ILIKE` or plain equality.
        // The literal may contain doubled-quote escapes.
        let scope_filter = Regex::new(&format!(
            r"(?i)\b{}\s*(?:ILIKE|=)\s*'(?:[^']|'')*'",
            entity_col
        ))
        .unwrap();
        let fact_table_ref = Regex::new(&format!(
            r"(?i)\b{}\b",
            regex::escape(&config.fact_table)
        ))
        .unwrap();
        let where_clause = Regex::new(r"(?is)\bWHERE\b(.*?)(\bGROUP\s+BY\b|\bORDER\s+BY\b|\bLIMIT\b|\bHAVING\b|$)").unwrap();
        let clause_boundary =
            Regex::new(r"(?i)\bGROUP\s+BY\b|\bORDER\s+BY\b|\bLIMIT\b|\bHAVING\b").unwrap();
        let forbidden_patterns = config
            .forbidden_keywords
            .iter()
            .map(|keyword| {
                let pattern =
                    Regex::new(&format!(r"\b{}\b", regex::escape(&keyword.to_uppercase())))
                        .expect("forbidden keyword pattern");
                (keyword.clone(), pattern)
            })
            .collect();

        Self {
            store,
            config,
            fact_table_ref,
            scope_filter,
            where_clause,
            clause_boundary,
            forbidden_patterns,
        }
    }

    /// Execute a read-only statement with the full safety pipeline applied.
    pub async fn execute(&self, raw_sql: &str, entity_scope: Option<&str>) -> QueryExecutionResult {
        let safe_sql = match self.build_safe_query(raw_sql, entity_scope) {
            Ok(sql) => sql,
            Err((code, message)) => {
                warn!("Query rejected before execution ({}): {}", code, message);
                return QueryExecutionResult::failure(raw_sql, code, message);
            }
        };

        let mut result = self.run_once(&safe_sql).await;

        // Empty success gets exactly one bounded fallback attempt.
        if result.error.is_none() && result.row_count == 0 {
            let fallback_sql = self.fallback_query(entity_scope);
            info!("Empty result, attempting fallback query: {}", fallback_sql);
            let fallback = self.run_once(&fallback_sql).await;
            if fallback.error.is_none() && fallback.row_count > 0 {
                // Keep both texts so the caller can trace what actually ran.
                return QueryExecutionResult {
                    executed_query: format!("{} ; -- fallback: {}", safe_sql, fallback_sql),
                    ..fallback
                };
            }
            result.hint = Some(self.empty_result_hint().await);
        }

        result
    }

    /// Validation, naming repair and scope injection, without execution.
    ///
    /// Repair and scoping are both fixed points: running the builder on its
    /// own output yields the same statement.
    pub fn build_safe_query(
        &self,
        raw_sql: &str,
        entity_scope: Option<&str>,
    ) -> Result<String, (QueryErrorCode, String)> {
        let trimmed = raw_sql.trim();
        if trimmed.is_empty() {
            return Err((
                QueryErrorCode::InvalidInput,
                "Query text is empty".to_string(),
            ));
        }

        self.validate_shape(trimmed)?;
        let repaired = self.repair_naming(trimmed);
        let scoped = match entity_scope {
            Some(scope) => self.inject_scope(&repaired, scope),
            None => repaired,
        };
        Ok(scoped)
    }

    /// Purely textual checks; run before any rewriting.
    fn validate_shape(&self, sql: &str) -> Result<(), (QueryErrorCode, String)> {
        let first_word = sql
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_uppercase();
        if !matches!(first_word.as_str(), "SELECT" | "WITH" | "EXPLAIN") {
            return Err((
                QueryErrorCode::ForbiddenOperation,
                format!("Only SELECT/WITH/EXPLAIN statements are allowed, got '{}'", first_word),
            ));
        }

        let upper = sql.to_uppercase();
        for (keyword, pattern) in &self.forbidden_patterns {
            if pattern.is_match(&upper) {
                return Err((
                    QueryErrorCode::ForbiddenKeyword,
                    format!("Statement contains forbidden keyword '{}'", keyword),
                ));
            }
        }
        Ok(())
    }

    /// Rewrite known wrong table/column names to their canonical spelling.
    /// Best-effort normalization, not a SQL parser. Synonyms map onto
    /// canonical names only, so a second pass changes nothing.
    fn repair_naming(&self, sql: &str) -> String {
        let mut repaired = sql.to_string();
        for (wrong, canonical) in self.config.naming_synonyms.iter().sorted() {
            let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(wrong)))
                .expect("synonym pattern");
            repaired = pattern.replace_all(&repaired, canonical.as_str()).to_string();
        }
        repaired
    }

    /// Force the resolved scope into the statement. The scope is
    /// authoritative: an existing filter on the entity column is replaced,
    /// whatever literal the raw intent carried.
    fn inject_scope(&self, sql: &str, scope: &str) -> String {
        if !self.fact_table_ref.is_match(sql) {
            return sql.to_string();
        }

        let clause = format!(
            "{} ILIKE '%{}%'",
            self.config.entity_column,
            scope.replace('\'', "''")
        );

        if self.scope_filter.is_match(sql) {
            return self.scope_filter.replace_all(sql, clause.as_str()).to_string();
        }

        if let Some(caps) = self.where_clause.captures(sql) {
            let existing = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if !existing.is_empty() {
                let rewritten = format!("WHERE {} AND ({})", clause, existing);
                return self
                    .where_clause
                    .replace(sql, |c: &regex::Captures| {
                        let tail = c.get(2).map(|m| m.as_str()).unwrap_or("");
                        if tail.is_empty() {
                            rewritten.clone()
                        } else {
                            format!("{} {}", rewritten, tail)
                        }
                    })
                    .to_string();
            }
        }

        // No WHERE clause: insert one before GROUP BY/ORDER BY/LIMIT, or at
        // the end of the statement.
        match self.clause_boundary.find(sql) {
            Some(m) => format!(
                "{} WHERE {} {}",
                sql[..m.start()].trim_end(),
                clause,
                &sql[m.start()..]
            ),
            None => format!("{} WHERE {}", sql.trim_end(), clause),
        }
    }

    /// One store round-trip under the deadline, with error classification.
    async fn run_once(&self, sql: &str) -> QueryExecutionResult {
        let query_id = Uuid::new_v4().to_string();
        let deadline = Duration::from_millis(self.config.query_timeout_ms);
        info!(query_id = %query_id, "Executing sandboxed query: {}", sql);

        let outcome = timeout(
            deadline,
            self.store.run_read_only_query(sql, self.config.query_timeout_ms),
        )
        .await;

        match outcome {
            Err(_) => {
                warn!(query_id = %query_id, "Query timed out after {:?}", deadline);
                QueryExecutionResult::failure(
                    sql,
                    QueryErrorCode::Timeout,
                    format!("Query exceeded {}ms deadline", self.config.query_timeout_ms),
                )
            }
            Ok(Err(e)) => self.classify_store_error(sql, e).await,
            Ok(Ok(raw)) => {
                let mut result = QueryExecutionResult::success(sql, raw.rows, raw.took_ms);
                if result.row_count > self.config.max_rows {
                    // Truncation is reported, not fatal: the first N rows
                    // still come back.
                    result.rows.truncate(self.config.max_rows);
                    result.row_count = self.config.max_rows;
                    result.error_code = Some(QueryErrorCode::ResultTruncated);
                    result.error = Some(format!(
                        "Result truncated to {} rows",
                        self.config.max_rows
                    ));
                }
                result
            }
        }
    }

    /// Map a store-reported failure onto the taxonomy and attach triage for
    /// the schema-error class so a calling layer can self-correct.
    async fn classify_store_error(
        &self,
        sql: &str,
        error: AssistantError,
    ) -> QueryExecutionResult {
        let message = error.to_string();
        let lowered = message.to_lowercase();

        let code = if lowered.contains("relation") && lowered.contains("does not exist") {
            QueryErrorCode::RelationNotFound
        } else if lowered.contains("column") && lowered.contains("does not exist") {
            QueryErrorCode::ColumnNotFound
        } else if lowered.contains("syntax") {
            QueryErrorCode::SyntaxError
        } else if lowered.contains("permission denied") || lowered.contains("privilege") {
            QueryErrorCode::InsufficientPrivilege
        } else {
            QueryErrorCode::UnknownError
        };

        let mut result = QueryExecutionResult::failure(sql, code, message);

        if matches!(
            code,
            QueryErrorCode::RelationNotFound | QueryErrorCode::ColumnNotFound
        ) {
            match self.store.introspect_schema().await {
                Ok(triage) => result.triage = Some(triage),
                Err(e) => warn!("Schema triage failed: {}", e),
            }
        }

        result
    }

    /// The single bounded fallback: most recent record for the scope, or a
    /// small unscoped aggregate when no scope is known.
    fn fallback_query(&self, entity_scope: Option<&str>) -> String {
        match entity_scope {
            Some(scope) => format!(
                "SELECT * FROM {} WHERE {} ILIKE '%{}%' ORDER BY {} DESC LIMIT 1",
                self.config.fact_table,
                self.config.entity_column,
                scope.replace('\'', "''"),
                self.config.date_column
            ),
            None => format!(
                "SELECT COUNT(*) AS total_rows FROM {} LIMIT 1",
                self.config.fact_table
            ),
        }
    }

    async fn empty_result_hint(&self) -> String {
        match self.store.introspect_schema().await {
            Ok(triage) => format!(
                "No matching rows. Available tables in schema '{}': {}",
                triage.schema,
                triage.tables.join(", ")
            ),
            Err(_) => "No matching rows and schema introspection unavailable".to_string(),
        }
    }
}
