//! Tool dispatch router
//!
//! Maps a classification result plus conversation context to a concrete tool
//! invocation. Pure decision table, no IO.

use crate::classifier::{ClassificationResult, IntentKind};
use crate::config::RouterConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "kebab-case")]
pub enum ToolInvocation {
    HttpCall {
        endpoint: String,
        method: String,
    },
    /// Read-only data query. A `None` scope means the query deliberately runs
    /// unscoped (all entities) rather than guessing a default; presenting one
    /// hotel's numbers as another's is worse than answering broadly.
    DataQuery {
        entity_scope: Option<String>,
        raw_intent: String,
    },
    CalcEval {
        expression: String,
    },
    DocSearch {
        query: String,
    },
    None,
}

pub struct ToolDispatchRouter;

impl ToolDispatchRouter {
    pub fn route(
        classification: &ClassificationResult,
        context_entity: Option<&str>,
        message: &str,
        config: &RouterConfig,
    ) -> ToolInvocation {
        match classification.intent {
            IntentKind::Weather => {
                let location = classification
                    .extracted_location
                    .clone()
                    .unwrap_or_else(|| config.fallback_city.clone());
                ToolInvocation::HttpCall {
                    endpoint: config
                        .weather_endpoint_template
                        .replace("{location}", &location),
                    method: "GET".to_string(),
                }
            }
            IntentKind::Business => {
                let entity_scope = classification
                    .extracted_entity
                    .clone()
                    .or_else(|| context_entity.map(|e| e.to_string()));
                if entity_scope.is_none() {
                    debug!("Business query without resolvable entity, routing unscoped");
                }
                ToolInvocation::DataQuery {
                    entity_scope,
                    raw_intent: message.to_string(),
                }
            }
            IntentKind::Calculation => ToolInvocation::CalcEval {
                expression: message.to_string(),
            },
            IntentKind::Document => ToolInvocation::DocSearch {
                query: message.to_string(),
            },
            IntentKind::General => ToolInvocation::None,
        }
    }
}
