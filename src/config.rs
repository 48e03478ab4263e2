//! Router configuration
//!
//! Every keyword table, threshold and limit used by the pipeline lives here so
//! that new categories or entities can be rolled out as data, without code
//! changes. `Default` carries the tuned production values (German + English
//! hotel-domain vocabulary); deployments may override any subset via JSON.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Keywords that mark a message as a weather request.
    pub weather_keywords: Vec<String>,

    /// Cities recognised for weather lookups, lower-cased.
    pub known_cities: Vec<String>,

    /// Location used when a weather keyword fired but no city matched.
    pub fallback_city: String,

    /// Blocklist: a hit here with no entity keyword short-circuits to `general`.
    pub exclusion_keywords: Vec<String>,

    /// Core business vocabulary (KPIs, bookings, rates, ...).
    pub business_core_keywords: Vec<String>,

    /// Weak context words that only count together with an entity/keyword hit.
    pub context_keywords: Vec<String>,

    /// Generic domain words ("hotel", "property") that need a dictionary hit.
    pub generic_domain_keywords: Vec<String>,

    /// Explicit calculation verbs.
    pub calculation_verbs: Vec<String>,

    /// Document / file search vocabulary.
    pub document_keywords: Vec<String>,

    /// Topics that clear the entity context when no entity keyword co-occurs.
    pub offtopic_keywords: Vec<String>,

    /// Fuzzy tolerance as a fraction of the input word length (minimum 1 edit).
    pub fuzzy_tolerance_ratio: f64,

    /// Tokens shorter than this are never fuzzy-corrected.
    pub fuzzy_min_token_len: usize,

    /// Dictionary cache refresh interval.
    pub dictionary_ttl_secs: u64,

    /// Conversation history bound per thread (FIFO eviction).
    pub history_capacity: usize,

    /// Confidence values. Empirically tuned, kept configurable on purpose.
    pub confidence: ConfidenceTable,

    /// Weather endpoint template; `{location}` is substituted.
    pub weather_endpoint_template: String,

    /// Safe query sandbox settings.
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceTable {
    pub weather: f64,
    pub business_with_entity: f64,
    pub business: f64,
    pub calculation_expression: f64,
    pub calculation_verb: f64,
    pub document: f64,
    pub general: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// The business-fact table queries are scoped against.
    pub fact_table: String,

    /// Column holding the canonical entity (hotel) name.
    pub entity_column: String,

    /// Column used by the "most recent record" fallback query.
    pub date_column: String,

    /// DDL/DML keywords that reject a statement outright.
    pub forbidden_keywords: Vec<String>,

    /// Common wrong table/column names mapped to their canonical spelling.
    pub naming_synonyms: HashMap<String, String>,

    /// Hard execution deadline.
    pub query_timeout_ms: u64,

    /// Row cap; results beyond this are truncated, not failed.
    pub max_rows: usize,
}

impl Default for ConfidenceTable {
    fn default() -> Self {
        Self {
            weather: 0.95,
            business_with_entity: 0.95,
            business: 0.85,
            calculation_expression: 0.9,
            calculation_verb: 0.85,
            document: 0.8,
            general: 0.7,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let naming_synonyms: HashMap<String, String> = [
            ("hotels", "hotel_metrics"),
            ("hotel_data", "hotel_metrics"),
            ("hotel_kpis", "hotel_metrics"),
            ("kpi_daily", "hotel_metrics"),
            ("metrics", "hotel_metrics"),
            ("hotelname", "hotel_name"),
            ("hotel_names", "hotel_name"),
            ("property_name", "hotel_name"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            fact_table: "hotel_metrics".to_string(),
            entity_column: "hotel_name".to_string(),
            date_column: "metric_date".to_string(),
            forbidden_keywords: [
                "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE",
                "GRANT", "REVOKE", "COPY", "MERGE", "VACUUM",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            naming_synonyms,
            query_timeout_ms: 30_000,
            max_rows: 5_000,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        fn list(words: &[&str]) -> Vec<String> {
            words.iter().map(|w| w.to_string()).collect()
        }

        Self {
            weather_keywords: list(&[
                "wetter", "weather", "temperatur", "temperature", "regen", "rain",
                "sonnig", "sunny", "vorhersage", "forecast",
            ]),
            known_cities: list(&[
                "hamburg", "berlin", "münchen", "munich", "frankfurt", "köln",
                "cologne", "düsseldorf", "stuttgart", "dresden", "leipzig",
                "zürich", "zurich", "genf", "geneva", "basel", "wien", "vienna",
                "salzburg",
            ]),
            fallback_city: "Hamburg".to_string(),
            exclusion_keywords: list(&[
                "politik", "politics", "wahl", "election", "regierung",
                "government", "bundestag", "partei", "krieg", "war",
            ]),
            business_core_keywords: list(&[
                "umsatz", "revenue", "auslastung", "occupancy", "adr", "revpar",
                "rate", "preis", "price", "buchung", "booking", "zimmer", "room",
                "kennzahl", "kpi", "zahlen",
            ]),
            context_keywords: list(&[
                "alle", "all", "letzte", "last", "zeige", "show", "aktuell",
                "current",
            ]),
            generic_domain_keywords: list(&["hotel", "haus", "property", "betrieb"]),
            calculation_verbs: list(&[
                "berechne", "rechne", "calculate", "compute", "summe",
            ]),
            document_keywords: list(&[
                "dokument", "document", "datei", "file", "pdf", "anhang",
                "attachment", "unterlagen",
            ]),
            offtopic_keywords: list(&[
                "wetter", "weather", "geschichte", "history", "rezept", "recipe",
                "politik", "politics",
            ]),
            fuzzy_tolerance_ratio: 0.3,
            fuzzy_min_token_len: 4,
            dictionary_ttl_secs: 300,
            history_capacity: 20,
            confidence: ConfidenceTable::default(),
            weather_endpoint_template: "https://wttr.in/{location}?format=j1".to_string(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Load a config overlay from a JSON file. Missing fields keep defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: RouterConfig = serde_json::from_str(&raw)
            .map_err(|e| AssistantError::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }
}
