use std::collections::BTreeMap;

use promux_protocol::WireFormat;

use crate::usage::UsageTally;

/// Per-stream translation state. Translators are pure with respect to this:
/// the same chunk sequence against a fresh state always yields the same
/// client chunks.
#[derive(Debug, Clone)]
pub struct StreamState {
    /// Configured provider dialect.
    pub source: WireFormat,
    /// Client dialect.
    pub target: WireFormat,
    /// Dialect actually observed on the wire, when it differs from `source`.
    pub detected: Option<WireFormat>,
    /// Client-visible message/completion id. Seeded by the caller, replaced
    /// by the upstream id as soon as one is seen.
    pub id: String,
    pub model: String,
    pub created: i64,

    pub content: String,
    pub thinking: String,
    /// Keyed by the source dialect's block/choice index.
    pub tool_calls: BTreeMap<u32, ToolCallState>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageTally>,
    pub usage_estimated: bool,

    // Target-side emission bookkeeping.
    pub role_sent: bool,
    pub message_started: bool,
    pub response_started: bool,
    pub open_block: Option<OpenBlock>,
    pub next_block_index: u32,
    pub finish_sent: bool,
    pub done_seen: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCallState {
    pub id: String,
    pub name: String,
    pub arguments: String,
    /// Position in the order of appearance; OpenAI-style targets index by it.
    pub ordinal: u32,
    /// Whether the target side has already announced this call.
    pub announced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBlock {
    Text,
    Thinking,
    Tool(u32),
}

impl StreamState {
    pub fn new(source: WireFormat, target: WireFormat, model: &str, id: &str, created: i64) -> Self {
        Self {
            source,
            target,
            detected: None,
            id: id.to_string(),
            model: model.to_string(),
            created,
            content: String::new(),
            thinking: String::new(),
            tool_calls: BTreeMap::new(),
            finish_reason: None,
            usage: None,
            usage_estimated: false,
            role_sent: false,
            message_started: false,
            response_started: false,
            open_block: None,
            next_block_index: 0,
            finish_sent: false,
            done_seen: false,
        }
    }

    /// The dialect translators should parse incoming chunks as.
    pub fn effective_source(&self) -> WireFormat {
        self.detected.unwrap_or(self.source)
    }

    pub fn tool_call_mut(&mut self, key: u32) -> &mut ToolCallState {
        let next = self.tool_calls.len() as u32;
        self.tool_calls.entry(key).or_insert_with(|| ToolCallState {
            ordinal: next,
            ..Default::default()
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn merge_usage(&mut self, incoming: UsageTally) {
        match &mut self.usage {
            Some(existing) => existing.merge(incoming),
            None => self.usage = Some(incoming),
        }
    }
}
