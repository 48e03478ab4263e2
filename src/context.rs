//! Conversation context tracker
//!
//! Per-thread rolling state: a bounded turn history and the entity the
//! conversation is currently about. Off-topic detection is the dominant rule;
//! it always wins over stale entity memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub resolved_entity: Option<String>,
    pub is_entity_related: bool,
    pub timestamp: DateTime<Utc>,
}

/// What the tracker decided about a user turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnDisposition {
    /// Off-topic signal fired; entity context was cleared.
    OffTopic,
    /// An entity was detected in this turn.
    EntityDetected(String),
    /// No signal either way; context carries over unchanged.
    Neutral,
}

/// Entity scope of a thread. `Cleared` is distinct from `Unset`: after an
/// off-topic turn the history lookback must not resurrect a stale entity,
/// while a fresh thread may still recover one from restored history.
#[derive(Debug, Clone, PartialEq)]
enum EntityState {
    Unset,
    Cleared,
    Current(String),
}

pub struct ConversationContext {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
    entity_state: EntityState,
    last_turn_entity_related: bool,
}

impl ConversationContext {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            entity_state: EntityState::Unset,
            last_turn_entity_related: false,
        }
    }

    /// Record a user turn and update the entity state.
    ///
    /// `aliases_by_specificity` must be ordered longest-first so a generic
    /// alias never shadows a specific one. `resolved_hint` carries an entity
    /// the classifier already resolved (e.g. via fuzzy correction), which a
    /// plain substring scan would miss.
    pub fn observe_user_turn(
        &mut self,
        message: &str,
        aliases_by_specificity: &[String],
        entity_keywords: &[String],
        offtopic_keywords: &[String],
        resolved_hint: Option<&str>,
    ) -> TurnDisposition {
        let lowered = message.to_lowercase();

        let has_entity_keyword = entity_keywords.iter().any(|k| lowered.contains(k.as_str()))
            || aliases_by_specificity.iter().any(|a| lowered.contains(a.as_str()))
            || resolved_hint.is_some();
        let has_offtopic_keyword =
            offtopic_keywords.iter().any(|k| lowered.contains(k.as_str()));

        // Definitively not about an entity: clear, do not carry stale scope.
        if has_offtopic_keyword && !has_entity_keyword {
            debug!("Off-topic turn, clearing entity context");
            self.entity_state = EntityState::Cleared;
            self.last_turn_entity_related = false;
            self.push_turn(TurnRole::User, message, None, false);
            return TurnDisposition::OffTopic;
        }

        let detected = resolved_hint.map(|h| h.to_lowercase()).or_else(|| {
            aliases_by_specificity
                .iter()
                .find(|alias| lowered.contains(alias.as_str()))
                .cloned()
        });

        match detected {
            Some(entity) => {
                self.entity_state = EntityState::Current(entity.clone());
                self.last_turn_entity_related = true;
                self.push_turn(TurnRole::User, message, Some(entity.clone()), true);
                TurnDisposition::EntityDetected(entity)
            }
            None => {
                self.last_turn_entity_related = false;
                self.push_turn(TurnRole::User, message, None, false);
                TurnDisposition::Neutral
            }
        }
    }

    pub fn record_assistant_turn(&mut self, content: &str) {
        let entity = match &self.entity_state {
            EntityState::Current(e) => Some(e.clone()),
            _ => None,
        };
        let related = entity.is_some();
        self.push_turn(TurnRole::Assistant, content, entity, related);
    }

    /// The entity the thread is currently about. The history lookback only
    /// applies while the scope was never set; an explicit clear is final
    /// until a later turn binds a new entity.
    pub fn current_entity(&self) -> Option<String> {
        match &self.entity_state {
            EntityState::Current(entity) => Some(entity.clone()),
            EntityState::Cleared => None,
            EntityState::Unset => self
                .turns
                .iter()
                .rev()
                .find_map(|turn| turn.resolved_entity.clone()),
        }
    }

    pub fn last_turn_entity_related(&self) -> bool {
        self.last_turn_entity_related
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Reset all state (new conversation). Idempotent.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.entity_state = EntityState::Unset;
        self.last_turn_entity_related = false;
    }

    fn push_turn(
        &mut self,
        role: TurnRole,
        content: &str,
        resolved_entity: Option<String>,
        is_entity_related: bool,
    ) {
        if self.turns.len() == self.capacity {
            // FIFO eviction: capacity is fixed, oldest turn drops silently.
            self.turns.pop_front();
        }
        self.turns.push_back(ConversationTurn {
            role,
            content: content.to_string(),
            resolved_entity,
            is_entity_related,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> Vec<String> {
        vec![
            "adlon kempinski berlin".to_string(),
            "vier jahreszeiten hamburg".to_string(),
            "dolder grand".to_string(),
        ]
    }

    fn keywords() -> Vec<String> {
        vec![
            "adlon".to_string(),
            "kempinski".to_string(),
            "berlin".to_string(),
            "vier".to_string(),
            "jahreszeiten".to_string(),
            "hamburg".to_string(),
            "dolder".to_string(),
            "grand".to_string(),
        ]
    }

    fn offtopic() -> Vec<String> {
        vec!["wetter".to_string(), "rezept".to_string(), "politik".to_string()]
    }

    fn observe(ctx: &mut ConversationContext, message: &str) -> TurnDisposition {
        ctx.observe_user_turn(message, &aliases(), &keywords(), &offtopic(), None)
    }

    #[test]
    fn test_entity_detection_sets_current() {
        let mut ctx = ConversationContext::new(20);
        let disposition = observe(&mut ctx, "zeige mir dolder grand");
        assert_eq!(
            disposition,
            TurnDisposition::EntityDetected("dolder grand".to_string())
        );
        assert_eq!(ctx.current_entity().as_deref(), Some("dolder grand"));
    }

    #[test]
    fn test_offtopic_clears_entity() {
        let mut ctx = ConversationContext::new(20);
        observe(&mut ctx, "zeige mir dolder grand");
        let disposition = observe(&mut ctx, "hast du ein gutes rezept für lasagne");
        assert_eq!(disposition, TurnDisposition::OffTopic);
        assert_eq!(ctx.current_entity(), None);
    }

    #[test]
    fn test_offtopic_loses_against_entity_keyword() {
        let mut ctx = ConversationContext::new(20);
        // "wetter" alone would be off-topic, but the message names a hotel.
        let disposition = observe(&mut ctx, "wetter egal, zahlen vom dolder grand bitte");
        assert_eq!(
            disposition,
            TurnDisposition::EntityDetected("dolder grand".to_string())
        );
    }

    #[test]
    fn test_neutral_turn_keeps_entity() {
        let mut ctx = ConversationContext::new(20);
        observe(&mut ctx, "zeige mir dolder grand");
        let disposition = observe(&mut ctx, "fasse die Zahlen zusammen");
        assert_eq!(disposition, TurnDisposition::Neutral);
        assert_eq!(ctx.current_entity().as_deref(), Some("dolder grand"));
    }

    #[test]
    fn test_lookback_scans_most_recent_first() {
        let mut ctx = ConversationContext::new(20);
        observe(&mut ctx, "zeige mir vier jahreszeiten hamburg");
        observe(&mut ctx, "zeige mir dolder grand");
        // Force the fallback path by unsetting the current marker.
        ctx.entity_state = EntityState::Unset;
        assert_eq!(ctx.current_entity().as_deref(), Some("dolder grand"));
    }

    #[test]
    fn test_cleared_entity_is_not_resurrected_by_lookback() {
        let mut ctx = ConversationContext::new(20);
        observe(&mut ctx, "zeige mir dolder grand");
        ctx.record_assistant_turn("zwei kennzahlen gefunden");
        observe(&mut ctx, "hast du ein gutes rezept für lasagne");
        // History still holds turns that resolved an entity, but the clear
        // bounds the lookback: the stale hotel must not come back.
        assert_eq!(ctx.current_entity(), None);
        observe(&mut ctx, "fasse die Zahlen zusammen");
        assert_eq!(ctx.current_entity(), None);
    }

    #[test]
    fn test_longer_alias_wins_over_shorter() {
        let mut ctx = ConversationContext::new(20);
        let aliases = vec![
            "adlon kempinski berlin".to_string(),
            "adlon".to_string(),
        ];
        let disposition = ctx.observe_user_turn(
            "umsatz vom adlon kempinski berlin",
            &aliases,
            &keywords(),
            &offtopic(),
            None,
        );
        assert_eq!(
            disposition,
            TurnDisposition::EntityDetected("adlon kempinski berlin".to_string())
        );
    }

    #[test]
    fn test_fifo_eviction() {
        let mut ctx = ConversationContext::new(3);
        observe(&mut ctx, "erste nachricht ohne bezug");
        observe(&mut ctx, "zweite nachricht ohne bezug");
        observe(&mut ctx, "dritte nachricht ohne bezug");
        observe(&mut ctx, "vierte nachricht ohne bezug");
        assert_eq!(ctx.len(), 3);
        let contents: Vec<&str> = ctx.turns().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "zweite nachricht ohne bezug",
                "dritte nachricht ohne bezug",
                "vierte nachricht ohne bezug"
            ]
        );
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut ctx = ConversationContext::new(20);
        observe(&mut ctx, "zeige mir dolder grand");
        ctx.clear();
        let once = (ctx.len(), ctx.current_entity(), ctx.last_turn_entity_related());
        ctx.clear();
        let twice = (ctx.len(), ctx.current_entity(), ctx.last_turn_entity_related());
        assert_eq!(once, twice);
        assert_eq!(once, (0, None, false));
    }
}
