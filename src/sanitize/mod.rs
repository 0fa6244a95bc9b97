//! Pure, idempotent history sanitization enforcing the structural
//! invariants every vendor wire format depends on:
//!
//! - I1: no `system` messages survive (the active system prompt is
//!   injected separately by [`crate::context`]).
//! - I2: every `tool` message's nearest non-tool predecessor must be an
//!   assistant message that issued tool calls.
//! - I3: every assistant-with-tool-calls message must be preceded by a
//!   user or tool message (never start the history, never follow another
//!   assistant turn).

use crate::wire::Message;

/// Drop system messages, then drop any message that violates I2/I3 against
/// the already-filtered sequence built so far.
///
/// For a `tool` message, "immediately preceded" walks back over any other
/// `tool` messages already kept in `out` (a multi-tool-call turn appends
/// several `tool` messages in a row) to find the nearest non-tool kept
/// message, which must be an `assistant` whose `toolCalls` actually
/// contains this message's `toolCallId` — an id that doesn't match, even
/// right after a real tool-call turn, is an orphan and is dropped.
pub fn sanitize(history: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(history.len());

    for msg in history {
        if msg.is_system() {
            continue;
        }

        if let Message::Tool { tool_call_id, .. } = msg {
            let predecessor = out.iter().rev().find(|m| !m.is_tool());
            let valid = matches!(
                predecessor,
                Some(Message::Assistant { tool_calls, .. })
                    if tool_calls.iter().any(|tc| &tc.id == tool_call_id)
            );
            if valid {
                out.push(msg.clone());
            }
            continue;
        }

        if msg.is_assistant_with_tool_calls() {
            let predecessor_ok = match out.last() {
                Some(prev) => prev.is_user() || prev.is_tool(),
                None => false,
            };
            if predecessor_ok {
                out.push(msg.clone());
            }
            continue;
        }

        out.push(msg.clone());
    }

    out
}

/// Drop a trailing history entry that duplicates the message about to be
/// appended as the current turn, so the caller never double-submits the
/// same user message as the one about to be appended.
pub fn trim_trailing_current_user_message(history: &[Message], current: &Message) -> Vec<Message> {
    match history.last() {
        Some(last) if last == current => history[..history.len() - 1].to_vec(),
        _ => history.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ToolCall;
    use std::collections::HashMap;

    fn tc(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "noop".to_string(),
            arguments: HashMap::new(),
        }
    }

    #[test]
    fn drops_system_messages() {
        let history = vec![Message::system("be nice"), Message::user("hi")];
        let cleaned = sanitize(&history);
        assert_eq!(cleaned, vec![Message::user("hi")]);
    }

    #[test]
    fn drops_orphaned_tool_message() {
        let history = vec![Message::user("hi"), Message::tool("c1", "result")];
        let cleaned = sanitize(&history);
        assert_eq!(cleaned, vec![Message::user("hi")]);
    }

    #[test]
    fn keeps_well_formed_tool_round_trip() {
        let history = vec![
            Message::user("read it"),
            Message::assistant_with_tool_calls("", vec![tc("c1")]),
            Message::tool("c1", "contents"),
            Message::assistant("done"),
        ];
        let cleaned = sanitize(&history);
        assert_eq!(cleaned, history);
    }

    #[test]
    fn drops_leading_assistant_with_tool_calls() {
        let history = vec![Message::assistant_with_tool_calls("", vec![tc("c1")]), Message::tool("c1", "x")];
        let cleaned = sanitize(&history);
        assert!(cleaned.is_empty());
    }

    #[test]
    fn drops_back_to_back_assistant_tool_calls() {
        let history = vec![
            Message::user("go"),
            Message::assistant_with_tool_calls("", vec![tc("c1")]),
            Message::assistant_with_tool_calls("", vec![tc("c2")]),
        ];
        let cleaned = sanitize(&history);
        assert_eq!(cleaned, vec![Message::user("go"), Message::assistant_with_tool_calls("", vec![tc("c1")])]);
    }

    #[test]
    fn keeps_every_tool_result_in_a_multi_call_group() {
        let history = vec![
            Message::user("go"),
            Message::assistant_with_tool_calls("", vec![tc("c1"), tc("c2")]),
            Message::tool("c1", "result 1"),
            Message::tool("c2", "result 2"),
        ];
        let cleaned = sanitize(&history);
        assert_eq!(cleaned, history);
    }

    #[test]
    fn drops_tool_message_with_id_not_in_preceding_assistant_tool_calls() {
        let history = vec![
            Message::user("go"),
            Message::assistant_with_tool_calls("", vec![tc("c1")]),
            Message::tool("c1", "result 1"),
            Message::tool("unrelated", "orphaned"),
        ];
        let cleaned = sanitize(&history);
        assert_eq!(
            cleaned,
            vec![
                Message::user("go"),
                Message::assistant_with_tool_calls("", vec![tc("c1")]),
                Message::tool("c1", "result 1"),
            ]
        );
    }

    #[test]
    fn sanitize_is_idempotent() {
        let history = vec![
            Message::system("sys"),
            Message::user("go"),
            Message::tool("orphan", "x"),
            Message::assistant_with_tool_calls("", vec![tc("c1")]),
            Message::tool("c1", "ok"),
        ];
        let once = sanitize(&history);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn trims_duplicate_trailing_user_message() {
        let history = vec![Message::user("hi"), Message::user("same")];
        let current = Message::user("same");
        let trimmed = trim_trailing_current_user_message(&history, &current);
        assert_eq!(trimmed, vec![Message::user("hi")]);
    }

    #[test]
    fn keeps_history_when_no_duplicate() {
        let history = vec![Message::user("hi")];
        let current = Message::user("different");
        let trimmed = trim_trailing_current_user_message(&history, &current);
        assert_eq!(trimmed, history);
    }
}
