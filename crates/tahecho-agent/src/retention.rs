//! Retention window for long-lived conversations
//!
//! Applied just before a checkpoint is written. The oldest messages beyond the
//! window are dropped and counted, and stored executor results are truncated.

use crate::state::ConversationState;

/// Bounds applied to a conversation before it is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many messages; `None` keeps everything
    pub max_messages: Option<usize>,
    /// Stored executor results longer than this are truncated
    pub max_result_chars: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_messages: Some(200),
            max_result_chars: 16_000,
        }
    }
}

impl RetentionPolicy {
    /// No pruning, no truncation
    pub fn unbounded() -> Self {
        Self {
            max_messages: None,
            max_result_chars: usize::MAX,
        }
    }

    /// Apply the policy in place. Returns the number of messages pruned.
    pub fn apply(&self, state: &mut ConversationState) -> usize {
        let mut pruned = 0;
        if let Some(max) = self.max_messages {
            if state.messages.len() > max {
                pruned = state.messages.len() - max;
                state.messages.drain(..pruned);
                state.pruned_messages += pruned;
                tracing::debug!(
                    "Pruned {} old messages ({} total so far)",
                    pruned,
                    state.pruned_messages
                );
            }
        }

        for result in state.agent_results.values_mut() {
            if result.chars().count() > self.max_result_chars {
                *result = truncate_chars(result, self.max_result_chars);
            }
        }
        pruned
    }
}

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskType;

    fn long_state(turns: usize) -> ConversationState {
        let mut state = ConversationState::new(Some("r".into()));
        for i in 0..turns {
            state.begin_turn(&format!("q{}", i));
            state.set_classification(TaskType::General, "t");
            state.finish(format!("a{}", i));
        }
        state
    }

    #[test]
    fn test_truncate_chars_unicode() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel...");
        assert_eq!(truncate_chars("ééééé", 2), "éé...");
    }

    #[test]
    fn test_prunes_oldest_and_counts() {
        let mut state = long_state(4); // 12 messages
        let total_before = state.total_messages();
        let policy = RetentionPolicy {
            max_messages: Some(5),
            ..Default::default()
        };

        assert_eq!(policy.apply(&mut state), 7);
        assert_eq!(state.messages.len(), 5);
        assert_eq!(state.pruned_messages, 7);
        assert_eq!(state.total_messages(), total_before);
        // Most recent entry survives
        assert_eq!(state.messages.last().map(|m| m.content.as_str()), Some("a3"));
    }

    #[test]
    fn test_unbounded_keeps_everything() {
        let mut state = long_state(3);
        state.agent_results.insert("x".into(), "y".repeat(100));
        assert_eq!(RetentionPolicy::unbounded().apply(&mut state), 0);
        assert_eq!(state.messages.len(), 9);
        assert_eq!(state.agent_results["x"].len(), 100);
    }

    #[test]
    fn test_truncates_long_results() {
        let mut state = long_state(1);
        state.agent_results.insert("issue_tracker".into(), "z".repeat(50));
        let policy = RetentionPolicy {
            max_messages: None,
            max_result_chars: 10,
        };
        policy.apply(&mut state);
        assert_eq!(state.agent_results["issue_tracker"], format!("{}...", "z".repeat(10)));
    }
}
