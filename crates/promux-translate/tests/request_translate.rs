use promux_translate::{RequestCtx, TranslateRegistry};
use promux_protocol::WireFormat;
use serde_json::{json, Value as JsonValue};

fn ctx<'a>(model: &'a str, body: &'a JsonValue, stream: bool) -> RequestCtx<'a> {
    RequestCtx {
        model,
        body,
        stream,
        creds: None,
    }
}

#[test]
fn openai_to_claude_carries_system_tools_and_sampling() {
    let registry = TranslateRegistry::new();
    let body = json!({
        "model": "anthropic/claude-sonnet-4-5",
        "messages": [
            {"role": "system", "content": "be terse"},
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello", "tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}}
            ]},
            {"role": "tool", "tool_call_id": "call_1", "content": "42"},
            {"role": "user", "content": "and now?"}
        ],
        "temperature": 0.5,
        "top_p": 0.9,
        "max_tokens": 256,
        "stop": ["END"]
    });
    let out = registry
        .translate_request(
            WireFormat::OpenAI,
            WireFormat::Claude,
            &ctx("claude-sonnet-4-5", &body, true),
        )
        .unwrap();

    assert_eq!(out["model"], "claude-sonnet-4-5");
    assert_eq!(out["system"], "be terse");
    assert_eq!(out["max_tokens"], 256);
    assert_eq!(out["temperature"], 0.5);
    assert_eq!(out["stop_sequences"][0], "END");
    assert_eq!(out["stream"], true);

    let messages = out["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3); // user, assistant, user(tool_result + text merged)
    assert_eq!(messages[1]["role"], "assistant");
    let assistant_blocks = messages[1]["content"].as_array().unwrap();
    assert_eq!(assistant_blocks[1]["type"], "tool_use");
    assert_eq!(assistant_blocks[1]["input"]["q"], "x");
    let merged_user = messages[2]["content"].as_array().unwrap();
    assert_eq!(merged_user[0]["type"], "tool_result");
    assert_eq!(merged_user[0]["tool_use_id"], "call_1");
    assert_eq!(merged_user[1]["type"], "text");
}

#[test]
fn openai_to_claude_defaults_max_tokens() {
    let registry = TranslateRegistry::new();
    let body = json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]});
    let out = registry
        .translate_request(WireFormat::OpenAI, WireFormat::Claude, &ctx("m", &body, false))
        .unwrap();
    assert_eq!(out["max_tokens"], 4096);
}

#[test]
fn claude_to_openai_round_trip_preserves_turns() {
    let registry = TranslateRegistry::new();
    let original = json!({
        "model": "gpt-4o",
        "max_tokens": 100,
        "system": "be helpful",
        "messages": [
            {"role": "user", "content": "first question"},
            {"role": "assistant", "content": "first answer"},
            {"role": "user", "content": [{"type": "text", "text": "second question"}]}
        ]
    });
    let openai = registry
        .translate_request(WireFormat::Claude, WireFormat::OpenAI, &ctx("gpt-4o", &original, false))
        .unwrap();
    let recovered = registry
        .translate_request(WireFormat::OpenAI, WireFormat::Claude, &ctx("gpt-4o", &openai, false))
        .unwrap();

    let original_msgs = original["messages"].as_array().unwrap();
    let recovered_msgs = recovered["messages"].as_array().unwrap();
    assert_eq!(original_msgs.len(), recovered_msgs.len());
    for (a, b) in original_msgs.iter().zip(recovered_msgs) {
        assert_eq!(a["role"], b["role"]);
        assert_eq!(joined_text(a), joined_text(b));
    }
    assert_eq!(recovered["system"], "be helpful");
}

fn joined_text(message: &JsonValue) -> String {
    match &message["content"] {
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[test]
fn openai_to_gemini_maps_roles_and_config() {
    let registry = TranslateRegistry::new();
    let body = json!({
        "model": "g",
        "messages": [
            {"role": "system", "content": "sys"},
            {"role": "user", "content": "q"},
            {"role": "assistant", "content": "a"}
        ],
        "max_tokens": 64,
        "temperature": 0.2
    });
    let out = registry
        .translate_request(WireFormat::OpenAI, WireFormat::Gemini, &ctx("gemini-2.5-pro", &body, false))
        .unwrap();
    assert_eq!(out["systemInstruction"]["parts"][0]["text"], "sys");
    assert_eq!(out["contents"][0]["role"], "user");
    assert_eq!(out["contents"][1]["role"], "model");
    assert_eq!(out["generationConfig"]["maxOutputTokens"], 64);
    assert_eq!(out["generationConfig"]["temperature"], 0.2);
}

#[test]
fn kiro_merges_consecutive_user_turns() {
    let registry = TranslateRegistry::new();
    let body = json!({
        "model": "k",
        "messages": [
            {"role": "user", "content": "part one"},
            {"role": "user", "content": "part two"},
            {"role": "assistant", "content": "reply"},
            {"role": "user", "content": "current"}
        ]
    });
    let creds = json!({"profileArn": "arn:aws:codewhisperer:us-east-1:1:profile/x"});
    let out = registry
        .translate_request(
            WireFormat::OpenAI,
            WireFormat::Kiro,
            &RequestCtx {
                model: "claude-sonnet-4-5",
                body: &body,
                stream: true,
                creds: creds.as_object(),
            },
        )
        .unwrap();

    let state = &out["conversationState"];
    let history = state["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history[0]["userInputMessage"]["content"],
        "part one\n\npart two"
    );
    assert_eq!(history[1]["assistantResponseMessage"]["content"], "reply");
    assert_eq!(state["currentMessage"]["userInputMessage"]["content"], "current");
    assert_eq!(out["profileArn"], "arn:aws:codewhisperer:us-east-1:1:profile/x");
}

#[test]
fn responses_input_items_map_to_openai_messages() {
    let registry = TranslateRegistry::new();
    let body = json!({
        "model": "m",
        "instructions": "obey",
        "input": [
            {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "hello"}]},
            {"type": "function_call", "call_id": "c1", "name": "f", "arguments": "{}"},
            {"type": "function_call_output", "call_id": "c1", "output": "ok"}
        ]
    });
    let out = registry
        .translate_request(WireFormat::OpenAIResponses, WireFormat::OpenAI, &ctx("m", &body, false))
        .unwrap();
    let messages = out["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["content"], "hello");
    assert_eq!(messages[2]["tool_calls"][0]["id"], "c1");
    assert_eq!(messages[3]["role"], "tool");
}

#[test]
fn ollama_options_map_to_openai_sampling() {
    let registry = TranslateRegistry::new();
    let body = json!({
        "model": "m",
        "messages": [{"role": "user", "content": "hi"}],
        "options": {"temperature": 0.1, "num_predict": 32, "stop": ["###"]}
    });
    let out = registry
        .translate_request(WireFormat::Ollama, WireFormat::OpenAI, &ctx("llama", &body, true))
        .unwrap();
    assert_eq!(out["temperature"], 0.1);
    assert_eq!(out["max_tokens"], 32);
    assert_eq!(out["stop"][0], "###");
    assert_eq!(out["stream_options"]["include_usage"], true);
}

#[test]
fn antigravity_wraps_gemini_body() {
    let registry = TranslateRegistry::new();
    let body = json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]});
    let out = registry
        .translate_request(
            WireFormat::OpenAI,
            WireFormat::Antigravity,
            &ctx("gemini-3-pro", &body, true),
        )
        .unwrap();
    assert_eq!(out["model"], "gemini-3-pro");
    assert_eq!(out["request"]["contents"][0]["parts"][0]["text"], "hi");
}
