//! Intent classifier
//!
//! Ordered, deterministic rule table over the message text, backed by the
//! entity dictionary and the fuzzy corrector. An optional model-based layer
//! can override category and confidence; any failure there falls back to the
//! rules. Classification never fails: the worst case is `general` at the
//! default confidence.

use crate::config::RouterConfig;
use crate::dictionary::EntityDictionary;
use crate::fuzzy::FuzzyCorrector;
use crate::store::SemanticClassifier;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

lazy_static! {
    /// "wie ist ... in" / "how is ... in" style weather interrogatives.
    static ref WEATHER_QUESTION: Regex =
        Regex::new(r"(?i)\b(wie|how)\b.*\b(ist|is)\b.*\bin\b").unwrap();
    static ref ARITHMETIC_OPERATOR: Regex = Regex::new(r"[+*/%]|\s-\s|\d-\d").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Weather,
    Business,
    Calculation,
    Document,
    General,
}

impl IntentKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "weather" => Some(Self::Weather),
            "business" => Some(Self::Business),
            "calculation" => Some(Self::Calculation),
            "document" => Some(Self::Document),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    /// Tool suggestions for the category, in router dispatch vocabulary.
    pub fn suggested_tools(&self) -> Vec<String> {
        match self {
            Self::Weather => vec!["http-call".to_string()],
            Self::Business => vec!["data-query".to_string()],
            Self::Calculation => vec!["calc-eval".to_string()],
            Self::Document => vec!["doc-search".to_string()],
            Self::General => Vec::new(),
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Weather => "weather",
            Self::Business => "business",
            Self::Calculation => "calculation",
            Self::Document => "document",
            Self::General => "general",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(rename = "type")]
    pub intent: IntentKind,
    pub confidence: f64,
    pub extracted_entity: Option<String>,
    pub extracted_location: Option<String>,
    pub suggested_tools: Vec<String>,
    pub spelling_corrected: bool,
}

impl ClassificationResult {
    fn new(intent: IntentKind, confidence: f64) -> Self {
        Self {
            intent,
            confidence,
            extracted_entity: None,
            extracted_location: None,
            suggested_tools: intent.suggested_tools(),
            spelling_corrected: false,
        }
    }
}

/// Outcome of entity resolution against the dictionary.
struct EntityResolution {
    entity: String,
    corrected: bool,
}

pub struct IntentClassifier {
    config: Arc<RouterConfig>,
    corrector: FuzzyCorrector,
    semantic: Option<Arc<dyn SemanticClassifier>>,
}

impl IntentClassifier {
    pub fn new(config: Arc<RouterConfig>) -> Self {
        let corrector = FuzzyCorrector::new(config.fuzzy_tolerance_ratio);
        Self {
            config,
            corrector,
            semantic: None,
        }
    }

    pub fn with_semantic(mut self, semantic: Arc<dyn SemanticClassifier>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub async fn classify(
        &self,
        message: &str,
        dictionary: &EntityDictionary,
    ) -> ClassificationResult {
        let rule_result = self.classify_by_rules(message, dictionary);

        let Some(semantic) = &self.semantic else {
            return rule_result;
        };

        match semantic.classify_semantic(message).await {
            Ok(verdict) => match IntentKind::parse(&verdict.category) {
                Some(intent) => {
                    debug!(
                        "Semantic layer override: {} -> {} ({:.2})",
                        rule_result.intent, intent, verdict.confidence
                    );
                    ClassificationResult {
                        intent,
                        confidence: verdict.confidence.clamp(0.0, 1.0),
                        suggested_tools: intent.suggested_tools(),
                        ..rule_result
                    }
                }
                None => {
                    warn!(
                        "Semantic classifier returned unknown category '{}', using rules",
                        verdict.category
                    );
                    rule_result
                }
            },
            Err(e) => {
                warn!("Semantic classifier unavailable, using rules: {}", e);
                rule_result
            }
        }
    }

    /// The deterministic rule table. Order matters: weather, exclusion,
    /// business, calculation, document, general.
    fn classify_by_rules(
        &self,
        message: &str,
        dictionary: &EntityDictionary,
    ) -> ClassificationResult {
        let lowered = message.to_lowercase();
        let config = &self.config;

        // 1. Weather
        let weather_keyword = contains_any(&lowered, &config.weather_keywords);
        let city = self.find_city(message, &lowered);
        if weather_keyword || (city.is_some() && WEATHER_QUESTION.is_match(&lowered)) {
            let mut result =
                ClassificationResult::new(IntentKind::Weather, config.confidence.weather);
            result.extracted_location =
                city.or_else(|| Some(config.fallback_city.clone()));
            return result;
        }

        let keyword_hit = dictionary.keyword_hit(&lowered);
        let entity_signal =
            keyword_hit || dictionary.names().iter().any(|n| lowered.contains(n));

        // 2. Exclusion blocklist: domain-adjacent but unrelated topics go to
        // general no matter what else fired.
        if contains_any(&lowered, &config.exclusion_keywords) && !entity_signal {
            return ClassificationResult::new(IntentKind::General, config.confidence.general);
        }

        // 3. Business / entity query
        let resolution = self.resolve_entity(&lowered, dictionary);
        let core_keyword = contains_any(&lowered, &config.business_core_keywords);
        let context_keyword = contains_any(&lowered, &config.context_keywords);
        let generic_keyword = contains_any(&lowered, &config.generic_domain_keywords);

        let is_business = core_keyword
            || (context_keyword && (entity_signal || resolution.is_some()))
            || resolution.is_some()
            || (generic_keyword && keyword_hit);

        if is_business {
            let confidence = if resolution.is_some() {
                config.confidence.business_with_entity
            } else {
                config.confidence.business
            };
            let mut result = ClassificationResult::new(IntentKind::Business, confidence);
            if let Some(resolution) = resolution {
                result.extracted_entity = Some(resolution.entity);
                result.spelling_corrected = resolution.corrected;
            }
            return result;
        }

        // 4. Calculation
        let has_digit = lowered.chars().any(|c| c.is_ascii_digit());
        if has_digit && ARITHMETIC_OPERATOR.is_match(&lowered) {
            return ClassificationResult::new(
                IntentKind::Calculation,
                config.confidence.calculation_expression,
            );
        }
        if contains_any(&lowered, &config.calculation_verbs) {
            return ClassificationResult::new(
                IntentKind::Calculation,
                config.confidence.calculation_verb,
            );
        }

        // 5. Document
        if contains_any(&lowered, &config.document_keywords) {
            return ClassificationResult::new(IntentKind::Document, config.confidence.document);
        }

        // 6. Default
        ClassificationResult::new(IntentKind::General, config.confidence.general)
    }

    /// First known city in the message, returned with the caller's original
    /// casing where the byte ranges line up.
    fn find_city(&self, original: &str, lowered: &str) -> Option<String> {
        for city in &self.config.known_cities {
            if let Some(idx) = lowered.find(city.as_str()) {
                let span = original
                    .get(idx..idx + city.len())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| city.clone());
                return Some(span);
            }
        }
        None
    }

    /// Exact substring match first (most specific alias wins), then one fuzzy
    /// correction pass over tokens of at least `fuzzy_min_token_len` chars.
    fn resolve_entity(
        &self,
        lowered: &str,
        dictionary: &EntityDictionary,
    ) -> Option<EntityResolution> {
        for name in dictionary.names_by_specificity() {
            if lowered.contains(&name) {
                return Some(EntityResolution {
                    entity: name,
                    corrected: false,
                });
            }
        }

        // Candidates in stable order: canonical names, then derived keywords.
        let candidates: Vec<&str> = dictionary
            .names()
            .iter()
            .map(|s| s.as_str())
            .chain(dictionary.keywords().iter().map(|s| s.as_str()))
            .collect();

        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= self.config.fuzzy_min_token_len)
        {
            let Some(correction) = self.corrector.correct(token, candidates.iter().copied())
            else {
                continue;
            };
            if correction.distance == 0 {
                // Token is already an exact keyword; exact matching above
                // would have resolved a full name if one applied.
                continue;
            }

            debug!(
                "Fuzzy corrected '{}' -> '{}' (distance {})",
                token, correction.corrected, correction.distance
            );

            // A correction straight to a canonical name resolves directly.
            if dictionary.names().iter().any(|n| *n == correction.corrected) {
                return Some(EntityResolution {
                    entity: correction.corrected,
                    corrected: true,
                });
            }

            // Otherwise substitute the corrected keyword and retry exact match.
            let repaired = lowered.replace(token, &correction.corrected);
            for name in dictionary.names_by_specificity() {
                if repaired.contains(&name) {
                    return Some(EntityResolution {
                        entity: name,
                        corrected: true,
                    });
                }
            }
        }

        None
    }
}

fn contains_any(lowered: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| lowered.contains(k.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::dictionary::EntityDictionary;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(Arc::new(RouterConfig::default()))
    }

    fn hotels() -> EntityDictionary {
        EntityDictionary::from_names(&[
            "Vier Jahreszeiten Hamburg".to_string(),
            "Dolder Grand".to_string(),
            "Adlon Kempinski Berlin".to_string(),
        ])
    }

    #[tokio::test]
    async fn test_weather_with_city() {
        let result = classifier()
            .classify("wie ist das wetter in Hamburg", &hotels())
            .await;
        assert_eq!(result.intent, IntentKind::Weather);
        assert_eq!(result.extracted_location.as_deref(), Some("Hamburg"));
        assert_eq!(result.suggested_tools, vec!["http-call"]);
    }

    #[tokio::test]
    async fn test_weather_keyword_without_city_uses_fallback() {
        let result = classifier().classify("wird es morgen regen geben", &hotels()).await;
        assert_eq!(result.intent, IntentKind::Weather);
        assert_eq!(result.extracted_location.as_deref(), Some("Hamburg"));
    }

    #[tokio::test]
    async fn test_exact_entity_match() {
        let result = classifier()
            .classify("zeige mir Vier Jahreszeiten Hamburg", &hotels())
            .await;
        assert_eq!(result.intent, IntentKind::Business);
        assert_eq!(
            result.extracted_entity.as_deref(),
            Some("vier jahreszeiten hamburg")
        );
        assert!(!result.spelling_corrected);
        assert_eq!(result.confidence, 0.95);
    }

    #[tokio::test]
    async fn test_fuzzy_entity_match() {
        let result = classifier()
            .classify("zeige mir vier jahreszeiten hambrug", &hotels())
            .await;
        assert_eq!(result.intent, IntentKind::Business);
        assert_eq!(
            result.extracted_entity.as_deref(),
            Some("vier jahreszeiten hamburg")
        );
        assert!(result.spelling_corrected);
    }

    #[tokio::test]
    async fn test_exclusion_beats_business_vocabulary() {
        // "umsatz" is a core business keyword, but the political blocklist
        // wins when no entity keyword is present.
        let result = classifier()
            .classify("wie beeinflusst die wahl den umsatz der branche", &hotels())
            .await;
        assert_eq!(result.intent, IntentKind::General);
    }

    #[tokio::test]
    async fn test_exclusion_does_not_fire_with_entity_keyword() {
        let result = classifier()
            .classify("regierung hin oder her, zeige den umsatz vom dolder grand", &hotels())
            .await;
        assert_eq!(result.intent, IntentKind::Business);
        assert_eq!(result.extracted_entity.as_deref(), Some("dolder grand"));
    }

    #[tokio::test]
    async fn test_business_without_entity_has_lower_confidence() {
        let result = classifier().classify("zeige die auslastung", &hotels()).await;
        assert_eq!(result.intent, IntentKind::Business);
        assert!(result.extracted_entity.is_none());
        assert_eq!(result.confidence, 0.85);
    }

    #[tokio::test]
    async fn test_calculation_expression() {
        let result = classifier().classify("was ist 120 * 4", &hotels()).await;
        assert_eq!(result.intent, IntentKind::Calculation);
        assert_eq!(result.suggested_tools, vec!["calc-eval"]);
    }

    #[tokio::test]
    async fn test_document_search() {
        let result = classifier()
            .classify("durchsuche die unterlagen vom letzten audit", &hotels())
            .await;
        assert_eq!(result.intent, IntentKind::Document);
    }

    #[tokio::test]
    async fn test_general_fallback() {
        let result = classifier()
            .classify("erzähl mir einen witz", &hotels())
            .await;
        assert_eq!(result.intent, IntentKind::General);
        assert_eq!(result.confidence, 0.7);
        assert!(result.suggested_tools.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_failure_falls_back_to_rules() {
        use crate::error::AssistantError;
        use crate::store::{SemanticClassifier, SemanticVerdict};
        use async_trait::async_trait;

        struct Broken;

        #[async_trait]
        impl SemanticClassifier for Broken {
            async fn classify_semantic(
                &self,
                _message: &str,
            ) -> crate::error::Result<SemanticVerdict> {
                Err(AssistantError::Llm("timeout".to_string()))
            }
        }

        let classifier = classifier().with_semantic(Arc::new(Broken));
        let result = classifier
            .classify("zeige mir Dolder Grand", &hotels())
            .await;
        assert_eq!(result.intent, IntentKind::Business);
        assert_eq!(result.extracted_entity.as_deref(), Some("dolder grand"));
    }
}
