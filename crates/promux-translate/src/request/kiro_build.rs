//! Shared CodeWhisperer conversation-state builder. The dialect demands a
//! strictly alternating user/assistant history ending on the current user
//! message, so every source translator flattens its turns into [`KiroTurn`]s
//! and lets this module handle merging and framing.

use promux_protocol::kiro::{
    AssistantResponseMessage, ConversationState, CurrentMessage, HistoryEntry, KiroRequest,
    UserInputMessage, UserInputMessageContext, CHAT_TRIGGER_MANUAL, ORIGIN_AI_EDITOR,
};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

use super::creds_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KiroRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub(crate) struct KiroTurn {
    pub role: KiroRole,
    pub text: String,
}

pub(crate) struct KiroConversation {
    pub model: String,
    pub system: Option<String>,
    pub turns: Vec<KiroTurn>,
    pub tools: Option<Vec<JsonValue>>,
    pub tool_results: Option<Vec<JsonValue>>,
}

pub(crate) fn build(
    conversation: KiroConversation,
    creds: Option<&Map<String, JsonValue>>,
) -> JsonValue {
    let mut merged: Vec<KiroTurn> = Vec::new();
    for turn in conversation.turns {
        if turn.text.is_empty() {
            continue;
        }
        match merged.last_mut() {
            // Consecutive same-role turns are merged by joining with "\n\n".
            Some(last) if last.role == turn.role => {
                last.text.push_str("\n\n");
                last.text.push_str(&turn.text);
            }
            _ => merged.push(turn),
        }
    }

    if let Some(system) = conversation.system.filter(|s| !s.is_empty()) {
        match merged.first_mut() {
            Some(first) if first.role == KiroRole::User => {
                first.text = format!("{system}\n\n{}", first.text);
            }
            _ => merged.insert(
                0,
                KiroTurn {
                    role: KiroRole::User,
                    text: system,
                },
            ),
        }
    }

    if !matches!(merged.last(), Some(turn) if turn.role == KiroRole::User) {
        merged.push(KiroTurn {
            role: KiroRole::User,
            text: "Continue.".to_string(),
        });
    }

    let current_text = merged.pop().map(|turn| turn.text).unwrap_or_default();
    // Drop a leading assistant turn; history must open with a user entry.
    if matches!(merged.first(), Some(turn) if turn.role == KiroRole::Assistant) {
        merged.remove(0);
    }

    let history = merged
        .into_iter()
        .map(|turn| match turn.role {
            KiroRole::User => HistoryEntry::User {
                user_input_message: UserInputMessage {
                    content: turn.text,
                    model_id: conversation.model.clone(),
                    origin: ORIGIN_AI_EDITOR.to_string(),
                    user_input_message_context: None,
                },
            },
            KiroRole::Assistant => HistoryEntry::Assistant {
                assistant_response_message: AssistantResponseMessage {
                    content: turn.text,
                    tool_uses: None,
                },
            },
        })
        .collect();

    let context = build_context(conversation.tools, conversation.tool_results);
    let request = KiroRequest {
        conversation_state: ConversationState {
            chat_trigger_type: CHAT_TRIGGER_MANUAL.to_string(),
            conversation_id: Uuid::new_v4().to_string(),
            current_message: CurrentMessage {
                user_input_message: UserInputMessage {
                    content: current_text,
                    model_id: conversation.model,
                    origin: ORIGIN_AI_EDITOR.to_string(),
                    user_input_message_context: context,
                },
            },
            history,
        },
        profile_arn: creds_str(creds, "profileArn").map(str::to_string),
    };
    serde_json::to_value(request).unwrap_or(JsonValue::Null)
}

fn build_context(
    tools: Option<Vec<JsonValue>>,
    tool_results: Option<Vec<JsonValue>>,
) -> Option<UserInputMessageContext> {
    if tools.is_none() && tool_results.is_none() {
        return None;
    }
    Some(UserInputMessageContext {
        tools,
        tool_results,
    })
}

/// OpenAI-style function definition -> CodeWhisperer tool specification.
pub(crate) fn tool_spec(name: &str, description: Option<&str>, parameters: Option<&JsonValue>) -> JsonValue {
    json!({
        "toolSpecification": {
            "name": name,
            "description": description.unwrap_or(""),
            "inputSchema": {"json": parameters.cloned().unwrap_or(json!({"type": "object"}))},
        }
    })
}

pub(crate) fn tool_result(id: &str, text: String, is_error: bool) -> JsonValue {
    json!({
        "toolResult": {
            "toolUseId": id,
            "content": [{"text": text}],
            "status": if is_error { "error" } else { "success" },
        }
    })
}
