//! Accumulation of tool-call arguments that arrive as JSON fragments.
use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::tool_mapper::{normalize_arguments, synthesize_call_id, ToolMappingError};
use crate::message::ToolCall;

#[derive(Debug, Error)]
pub enum StreamParseError {
    #[error("tool call at index {0} never received a name")]
    MissingName(u64),

    #[error(transparent)]
    Arguments(#[from] ToolMappingError),
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// In-flight tool calls keyed by the vendor's block or delta index.
///
/// A call is only turned into a [`ToolCall`] when the vendor signals that it is
/// complete; fragments are never parsed on their own.
#[derive(Debug, Default)]
pub struct PartialToolCalls {
    calls: BTreeMap<u64, PartialToolCall>,
}

impl PartialToolCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fragment. `id` and `name` are kept from whichever delta carries them.
    pub fn push(&mut self, index: u64, id: Option<&str>, name: Option<&str>, fragment: &str) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            call.id = Some(id.to_string());
        }
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            call.name = Some(name.to_string());
        }
        call.arguments.push_str(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Complete the call at `index`, parsing its accumulated arguments.
    pub fn take(&mut self, index: u64) -> Option<Result<ToolCall, StreamParseError>> {
        let call = self.calls.remove(&index)?;
        Some(Self::complete(index, call))
    }

    /// Complete the call at `index`, dropping it with a warning if it can't be parsed.
    pub fn finish(&mut self, index: u64) -> Option<ToolCall> {
        match self.take(index)? {
            Ok(call) => Some(call),
            Err(e) => {
                warn!(index, error = %e, "dropping tool call with unparseable arguments");
                None
            }
        }
    }

    /// Complete every in-flight call in index order.
    pub fn finish_all(&mut self) -> Vec<ToolCall> {
        let indices: Vec<u64> = self.calls.keys().copied().collect();
        indices
            .into_iter()
            .filter_map(|index| self.finish(index))
            .collect()
    }

    /// Forget every in-flight call, e.g. when a stream ends without a boundary.
    pub fn discard(&mut self) -> usize {
        let count = self.calls.len();
        self.calls.clear();
        count
    }

    fn complete(index: u64, call: PartialToolCall) -> Result<ToolCall, StreamParseError> {
        let name = call.name.ok_or(StreamParseError::MissingName(index))?;
        let args = normalize_arguments(&name, Some(Value::String(call.arguments)))?;
        let id = call.id.unwrap_or_else(synthesize_call_id);
        Ok(ToolCall::new(name, id, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fragments_concatenate_before_parsing() {
        let mut partials = PartialToolCalls::new();
        partials.push(0, Some("toolu_1"), Some("foo"), "");
        partials.push(0, None, None, "{\"a");
        partials.push(0, None, None, "\":1");
        partials.push(0, None, None, "}");

        let call = partials.finish(0).unwrap();
        assert_eq!(call, ToolCall::new("foo", "toolu_1", json!({"a": 1})));
        assert!(partials.is_empty());
    }

    #[test]
    fn test_truncated_arguments_are_dropped() {
        let mut partials = PartialToolCalls::new();
        partials.push(0, Some("toolu_1"), Some("foo"), "{\"a\":");

        assert!(matches!(
            partials.take(0),
            Some(Err(StreamParseError::Arguments(_)))
        ));

        partials.push(1, Some("toolu_2"), Some("foo"), "{\"a\":");
        assert!(partials.finish(1).is_none());
    }

    #[test]
    fn test_empty_arguments_become_empty_object() {
        let mut partials = PartialToolCalls::new();
        partials.push(3, Some("call_3"), Some("list_assets"), "");
        assert_eq!(partials.finish(3).unwrap().args, json!({}));
    }

    #[test]
    fn test_interleaved_indices_finish_in_order() {
        let mut partials = PartialToolCalls::new();
        partials.push(1, Some("b"), Some("second"), "{\"x\"");
        partials.push(0, Some("a"), Some("first"), "{}");
        partials.push(1, None, None, ":2}");

        let calls = partials.finish_all();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool_name, "first");
        assert_eq!(calls[1].args, json!({"x": 2}));
    }

    #[test]
    fn test_missing_name() {
        let mut partials = PartialToolCalls::new();
        partials.push(0, Some("a"), None, "{}");
        assert!(matches!(
            partials.take(0),
            Some(Err(StreamParseError::MissingName(0)))
        ));
    }

    #[test]
    fn test_unknown_index_is_none() {
        let mut partials = PartialToolCalls::new();
        assert!(partials.finish(9).is_none());
        assert_eq!(partials.discard(), 0);
    }
}
