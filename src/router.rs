//! Deterministic agent routing.
//!
//! `select_next_agent` is a pure function of the sub-run thread, its flags,
//! and configuration: no I/O, no clocks, no randomness. Given identical
//! inputs it always returns the same decision, which is what makes suspended
//! runs resumable after a state-store round trip.

use crate::config::Text2SqlConfig;
use crate::run_state::{AgentId, CacheHitKind, SubQuestion, TerminationReason};

/// What the run loop should do next for one sub-question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Agent(AgentId),
    /// Await a caller reply; the run is persisted and the stream ends with
    /// a Disambiguation payload.
    Suspend,
    Terminate(TerminationReason),
}

/// Select the next agent for a sub-run. First match wins:
///
/// | last source      | condition                          | next             |
/// |------------------|------------------------------------|------------------|
/// | any              | content contains TERMINATE         | terminate        |
/// | any              | sql + rows resolved and validated  | terminate        |
/// | any              | message budget exhausted           | terminate        |
/// | user             | clarification reply received       | sql_generation   |
/// | user             | otherwise (entry)                  | query_rewrite    |
/// | query_rewrite    | cache enabled, not yet checked     | cache            |
/// | query_rewrite    | otherwise                          | schema_selection |
/// | cache            | hit with pre-run rows              | sql_correction   |
/// | cache            | hit without pre-run rows           | sql_generation   |
/// | cache            | miss                               | schema_selection |
/// | schema_selection | ambiguity detected                 | disambiguation   |
/// | schema_selection | otherwise                          | sql_generation   |
/// | disambiguation   | resolved                           | sql_generation   |
/// | disambiguation   | awaiting caller                    | suspend          |
/// | sql_generation   | always                             | sql_correction   |
/// | sql_correction   | validated                          | answer           |
/// | sql_correction   | correction needed                  | sql_generation   |
/// | sql_correction   | otherwise (gave up)                | terminate        |
/// | answer           | always                             | terminate        |
pub fn select_next_agent(
    sub: &SubQuestion,
    message_count: usize,
    config: &Text2SqlConfig,
) -> RouteDecision {
    if message_count >= config.max_messages {
        return RouteDecision::Terminate(TerminationReason::MaxMessages);
    }

    if let Some(last) = sub.last_message() {
        if last.content.contains("TERMINATE") {
            return RouteDecision::Terminate(TerminationReason::TerminateToken);
        }
    }

    if sub.flags.validated && sub.resolved_sql.is_some() && sub.resolved_rows.is_some() {
        return RouteDecision::Terminate(TerminationReason::AnswerAndSourcesPresent);
    }

    let last_source = sub.last_message().map(|m| m.source);

    match last_source {
        None | Some(AgentId::User) => {
            if sub.flags.disambiguation_resolved {
                RouteDecision::Agent(AgentId::SqlGeneration)
            } else {
                RouteDecision::Agent(AgentId::QueryRewrite)
            }
        }

        Some(AgentId::QueryRewrite) => {
            if config.use_query_cache && !sub.flags.cache_checked {
                RouteDecision::Agent(AgentId::Cache)
            } else {
                RouteDecision::Agent(AgentId::SchemaSelection)
            }
        }

        Some(AgentId::Cache) => match sub.flags.cache_hit {
            Some(CacheHitKind::WithPreRun) => RouteDecision::Agent(AgentId::SqlCorrection),
            Some(CacheHitKind::NoPreRun) => RouteDecision::Agent(AgentId::SqlGeneration),
            None => RouteDecision::Agent(AgentId::SchemaSelection),
        },

        Some(AgentId::SchemaSelection) => {
            if sub.flags.ambiguity_detected && !sub.flags.disambiguation_resolved {
                RouteDecision::Agent(AgentId::Disambiguation)
            } else {
                RouteDecision::Agent(AgentId::SqlGeneration)
            }
        }

        Some(AgentId::Disambiguation) => {
            if sub.flags.disambiguation_resolved {
                RouteDecision::Agent(AgentId::SqlGeneration)
            } else {
                RouteDecision::Suspend
            }
        }

        Some(AgentId::SqlGeneration) => RouteDecision::Agent(AgentId::SqlCorrection),

        Some(AgentId::SqlCorrection) => {
            if sub.flags.validated {
                RouteDecision::Agent(AgentId::Answer)
            } else if sub.flags.correction_needed {
                RouteDecision::Agent(AgentId::SqlGeneration)
            } else {
                RouteDecision::Terminate(TerminationReason::UnrecoverableError)
            }
        }

        Some(AgentId::Answer) => {
            RouteDecision::Terminate(TerminationReason::AnswerAndSourcesPresent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QueryRows;
    use crate::run_state::AgentMessage;
    use uuid::Uuid;

    fn sub_with_last(source: AgentId) -> SubQuestion {
        let mut sub = SubQuestion::new("q", 0, Uuid::new_v4());
        sub.push_message(AgentMessage::new(source, "content"));
        sub
    }

    fn config() -> Text2SqlConfig {
        Text2SqlConfig::default()
    }

    #[test]
    fn test_entry_routes_to_query_rewrite() {
        let sub = SubQuestion::new("q", 0, Uuid::new_v4());
        assert_eq!(
            select_next_agent(&sub, 1, &config()),
            RouteDecision::Agent(AgentId::QueryRewrite)
        );
    }

    #[test]
    fn test_rewrite_routes_to_cache_when_enabled() {
        let sub = sub_with_last(AgentId::QueryRewrite);
        assert_eq!(
            select_next_agent(&sub, 2, &config()),
            RouteDecision::Agent(AgentId::Cache)
        );

        let mut no_cache = config();
        no_cache.use_query_cache = false;
        assert_eq!(
            select_next_agent(&sub, 2, &no_cache),
            RouteDecision::Agent(AgentId::SchemaSelection)
        );
    }

    #[test]
    fn test_cache_outcomes() {
        let mut sub = sub_with_last(AgentId::Cache);
        sub.flags.cache_checked = true;

        sub.flags.cache_hit = Some(CacheHitKind::WithPreRun);
        assert_eq!(
            select_next_agent(&sub, 3, &config()),
            RouteDecision::Agent(AgentId::SqlCorrection)
        );

        sub.flags.cache_hit = Some(CacheHitKind::NoPreRun);
        assert_eq!(
            select_next_agent(&sub, 3, &config()),
            RouteDecision::Agent(AgentId::SqlGeneration)
        );

        sub.flags.cache_hit = None;
        assert_eq!(
            select_next_agent(&sub, 3, &config()),
            RouteDecision::Agent(AgentId::SchemaSelection)
        );
    }

    #[test]
    fn test_schema_selection_to_disambiguation_on_ambiguity() {
        let mut sub = sub_with_last(AgentId::SchemaSelection);
        assert_eq!(
            select_next_agent(&sub, 3, &config()),
            RouteDecision::Agent(AgentId::SqlGeneration)
        );

        sub.flags.ambiguity_detected = true;
        assert_eq!(
            select_next_agent(&sub, 3, &config()),
            RouteDecision::Agent(AgentId::Disambiguation)
        );
    }

    #[test]
    fn test_disambiguation_suspends_until_resolved() {
        let mut sub = sub_with_last(AgentId::Disambiguation);
        assert_eq!(select_next_agent(&sub, 4, &config()), RouteDecision::Suspend);

        sub.flags.disambiguation_resolved = true;
        assert_eq!(
            select_next_agent(&sub, 4, &config()),
            RouteDecision::Agent(AgentId::SqlGeneration)
        );
    }

    #[test]
    fn test_generation_always_hands_to_correction() {
        let sub = sub_with_last(AgentId::SqlGeneration);
        assert_eq!(
            select_next_agent(&sub, 5, &config()),
            RouteDecision::Agent(AgentId::SqlCorrection)
        );
    }

    #[test]
    fn test_correction_outcomes() {
        let mut sub = sub_with_last(AgentId::SqlCorrection);
        sub.flags.validated = true;
        assert_eq!(
            select_next_agent(&sub, 6, &config()),
            RouteDecision::Agent(AgentId::Answer)
        );

        sub.flags.validated = false;
        sub.flags.correction_needed = true;
        assert_eq!(
            select_next_agent(&sub, 6, &config()),
            RouteDecision::Agent(AgentId::SqlGeneration)
        );

        sub.flags.correction_needed = false;
        assert_eq!(
            select_next_agent(&sub, 6, &config()),
            RouteDecision::Terminate(TerminationReason::UnrecoverableError)
        );
    }

    #[test]
    fn test_terminate_token_wins_over_everything() {
        let mut sub = SubQuestion::new("q", 0, Uuid::new_v4());
        sub.push_message(AgentMessage::new(AgentId::SqlGeneration, "TERMINATE"));
        assert_eq!(
            select_next_agent(&sub, 2, &config()),
            RouteDecision::Terminate(TerminationReason::TerminateToken)
        );
    }

    #[test]
    fn test_message_budget_terminates() {
        let sub = sub_with_last(AgentId::QueryRewrite);
        assert_eq!(
            select_next_agent(&sub, 20, &config()),
            RouteDecision::Terminate(TerminationReason::MaxMessages)
        );
    }

    #[test]
    fn test_answer_and_sources_present_terminates() {
        let mut sub = sub_with_last(AgentId::Answer);
        sub.flags.validated = true;
        sub.resolved_sql = Some("SELECT 1".to_string());
        sub.resolved_rows = Some(QueryRows::default());
        assert_eq!(
            select_next_agent(&sub, 7, &config()),
            RouteDecision::Terminate(TerminationReason::AnswerAndSourcesPresent)
        );
    }

    #[test]
    fn test_user_reply_after_disambiguation_resumes_at_generation() {
        let mut sub = sub_with_last(AgentId::User);
        sub.flags.disambiguation_resolved = true;
        assert_eq!(
            select_next_agent(&sub, 5, &config()),
            RouteDecision::Agent(AgentId::SqlGeneration)
        );
    }

    #[test]
    fn test_router_is_deterministic() {
        let mut sub = sub_with_last(AgentId::SchemaSelection);
        sub.flags.ambiguity_detected = true;
        let first = select_next_agent(&sub, 3, &config());
        for _ in 0..10 {
            assert_eq!(select_next_agent(&sub, 3, &config()), first);
        }

        // A state-store round trip must not change the decision.
        let json = serde_json::to_string(&sub).unwrap();
        let restored: SubQuestion = serde_json::from_str(&json).unwrap();
        assert_eq!(select_next_agent(&restored, 3, &config()), first);
    }
}
