//! Execution results and the normalizer that produces them.
//!
//! Every invocation ends in exactly one `ExecutionResult`. Nothing the guest
//! hands back crosses this boundary uninterpreted: fault payloads are parsed
//! best-effort, stripped of control characters and truncated.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::ViolationKind;
use crate::schema::Violation;
use crate::wasm::context::RawOutcome;
use crate::wasm::host::Interrupt;

/// Longest tool-supplied text carried in a result.
pub const MAX_TEXT_CHARS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPhase {
    Input,
    Output,
    /// The tool's capability declaration was malformed.
    Policy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success {
        value: Value,
    },
    ToolFault {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
    PolicyViolation {
        kind: ViolationKind,
        detail: String,
    },
    Timeout {
        elapsed_ms: u64,
    },
    ValidationError {
        phase: ValidationPhase,
        details: Vec<Violation>,
    },
    ResourceExhausted {
        reason: String,
    },
    LoadError {
        message: String,
    },
    Cancelled {
        elapsed_ms: u64,
    },
    NotFound {
        name: String,
        version: String,
    },
}

impl ExecutionResult {
    /// The wire discriminator, for logs and metrics labels.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::ToolFault { .. } => "tool_fault",
            Self::PolicyViolation { .. } => "policy_violation",
            Self::Timeout { .. } => "timeout",
            Self::ValidationError { .. } => "validation_error",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::LoadError { .. } => "load_error",
            Self::Cancelled { .. } => "cancelled",
            Self::NotFound { .. } => "not_found",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub(crate) fn timeout(elapsed: Duration) -> Self {
        Self::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub(crate) fn cancelled(elapsed: Duration) -> Self {
        Self::Cancelled {
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub(crate) fn tool_fault(message: impl AsRef<str>, cause: Option<&str>) -> Self {
        Self::ToolFault {
            message: sanitize(message.as_ref()),
            cause: cause.map(sanitize),
        }
    }
}

/// Map a raw guest outcome onto the result union.
///
/// Output schema checks happen afterwards, in the manager.
pub fn normalize(raw: RawOutcome, elapsed: Duration) -> ExecutionResult {
    match raw {
        RawOutcome::Returned(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => ExecutionResult::Success { value },
            Err(e) => ExecutionResult::tool_fault(
                "tool output is not valid JSON",
                Some(e.to_string().as_str()),
            ),
        },
        RawOutcome::Faulted { payload, code } => fault_from_payload(payload.as_deref(), code),
        RawOutcome::Trapped(message) => {
            ExecutionResult::tool_fault("tool trapped", Some(message.as_str()))
        }
        RawOutcome::Breached(breach) => ExecutionResult::PolicyViolation {
            kind: breach.kind,
            detail: sanitize(&breach.detail),
        },
        RawOutcome::Interrupted(Interrupt::Deadline) => ExecutionResult::timeout(elapsed),
        RawOutcome::Interrupted(Interrupt::Cancelled) => ExecutionResult::cancelled(elapsed),
        RawOutcome::LoadFailed(message) => ExecutionResult::LoadError {
            message: sanitize(&message),
        },
    }
}

/// A fault payload may be plain text or `{"message": ..., "cause": ...}`.
/// Anything else is summarized rather than passed through.
fn fault_from_payload(payload: Option<&[u8]>, code: i32) -> ExecutionResult {
    let Some(bytes) = payload.filter(|b| !b.is_empty()) else {
        return ExecutionResult::tool_fault(format!("tool failed with code {code}"), None);
    };

    if let Ok(Value::Object(obj)) = serde_json::from_slice::<Value>(bytes) {
        if let Some(Value::String(message)) = obj.get("message") {
            let cause = match obj.get("cause") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };
            return ExecutionResult::tool_fault(message, cause.as_deref());
        }
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => ExecutionResult::tool_fault(text, None),
        Err(_) => ExecutionResult::tool_fault(
            format!("tool failed with code {code}"),
            Some(format!("{} bytes of non-UTF-8 fault data", bytes.len()).as_str()),
        ),
    }
}

/// Strip control characters (keeping newline and tab) and cap the length.
pub fn sanitize(text: &str) -> String {
    let mut visible = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t');
    let mut out: String = visible.by_ref().take(MAX_TEXT_CHARS).collect();
    if visible.next().is_some() {
        out.push('…');
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wasm::host::Breach;
    use serde_json::json;

    #[test]
    fn returned_json_is_success() {
        let result = normalize(
            RawOutcome::Returned(br#"{"ok":true}"#.to_vec()),
            Duration::ZERO,
        );
        assert_eq!(
            result,
            ExecutionResult::Success {
                value: json!({"ok": true})
            }
        );
    }

    #[test]
    fn returned_garbage_is_fault() {
        let result = normalize(RawOutcome::Returned(b"{not json".to_vec()), Duration::ZERO);
        match result {
            ExecutionResult::ToolFault { message, cause } => {
                assert!(message.contains("not valid JSON"));
                assert!(cause.is_some());
            }
            other => panic!("expected ToolFault, got: {other:?}"),
        }
    }

    #[test]
    fn structured_fault_payload() {
        let payload = br#"{"message":"quota exceeded","cause":{"retry_after":30}}"#.to_vec();
        let result = normalize(
            RawOutcome::Faulted {
                payload: Some(payload),
                code: 1,
            },
            Duration::ZERO,
        );
        assert_eq!(
            result,
            ExecutionResult::ToolFault {
                message: "quota exceeded".into(),
                cause: Some(r#"{"retry_after":30}"#.into()),
            }
        );
    }

    #[test]
    fn plain_text_fault_is_sanitized() {
        let result = normalize(
            RawOutcome::Faulted {
                payload: Some(b"bad\x1b[31m thing\x07".to_vec()),
                code: 2,
            },
            Duration::ZERO,
        );
        match result {
            ExecutionResult::ToolFault { message, .. } => assert_eq!(message, "bad[31m thing"),
            other => panic!("expected ToolFault, got: {other:?}"),
        }
    }

    #[test]
    fn binary_fault_is_summarized() {
        let result = normalize(
            RawOutcome::Faulted {
                payload: Some(vec![0xff, 0xfe, 0x00]),
                code: 7,
            },
            Duration::ZERO,
        );
        match result {
            ExecutionResult::ToolFault { message, cause } => {
                assert!(message.contains("code 7"));
                assert!(cause.unwrap().contains("non-UTF-8"));
            }
            other => panic!("expected ToolFault, got: {other:?}"),
        }
    }

    #[test]
    fn long_text_is_truncated() {
        let text = "x".repeat(MAX_TEXT_CHARS * 3);
        let out = sanitize(&text);
        assert_eq!(out.chars().count(), MAX_TEXT_CHARS + 1);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn control_characters_do_not_count_toward_the_limit() {
        let text = format!("{}{}", "\u{7}".repeat(MAX_TEXT_CHARS), "y".repeat(10));
        assert_eq!(sanitize(&text), "y".repeat(10));

        let exact = format!("{}\u{1b}", "z".repeat(MAX_TEXT_CHARS));
        assert_eq!(sanitize(&exact), "z".repeat(MAX_TEXT_CHARS));
    }

    #[test]
    fn interrupts_map_to_timeout_and_cancelled() {
        let elapsed = Duration::from_millis(103);
        assert_eq!(
            normalize(RawOutcome::Interrupted(Interrupt::Deadline), elapsed),
            ExecutionResult::Timeout { elapsed_ms: 103 }
        );
        assert_eq!(
            normalize(RawOutcome::Interrupted(Interrupt::Cancelled), elapsed),
            ExecutionResult::Cancelled { elapsed_ms: 103 }
        );
    }

    #[test]
    fn breach_is_policy_violation() {
        let result = normalize(
            RawOutcome::Breached(Breach::new(ViolationKind::NetworkEgress, "egress to 'x'")),
            Duration::ZERO,
        );
        assert_eq!(result.status(), "policy_violation");
    }

    #[test]
    fn wire_format_has_status_tag() {
        let result = ExecutionResult::ValidationError {
            phase: ValidationPhase::Input,
            details: vec![Violation::new("input.name", "required property missing")],
        };
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["status"], "validation_error");
        assert_eq!(wire["phase"], "input");
        assert_eq!(wire["details"][0]["path"], "input.name");

        let back: ExecutionResult = serde_json::from_value(wire).unwrap();
        assert_eq!(back, result);

        let timeout = serde_json::to_value(ExecutionResult::Timeout { elapsed_ms: 100 }).unwrap();
        assert_eq!(timeout, json!({"status": "timeout", "elapsed_ms": 100}));
    }
}
