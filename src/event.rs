use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Register name to value, ordered for stable output.
pub type RegisterSnapshot = BTreeMap<String, u64>;

/// Register name to what its value points at.
pub type RegisterAnalysis = BTreeMap<String, AnalyzedValue>;

/// A register value together with the tracee memory it points to.
///
/// `memory` is absent when the value is not a readable address. The
/// instruction and string views are best-effort readings of the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedValue {
    pub value: u64,
    /// Hex of the bytes at `value`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub as_instruction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub as_string: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TraceEvent {
    Trap(TrapEvent),
    Step(StepEvent),
    Signal(SignalEvent),
    Exit(ExitEvent),
    Output(OutputEvent),
    Summary(TraceSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapPhase {
    /// Registers zeroed, about to call into the payload
    Pre,
    /// Payload returned, result in the return-value register
    Post,
    /// A breakpoint inside the payload itself
    Payload,
}

impl std::fmt::Display for TrapPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrapPhase::Pre => write!(f, "pre"),
            TrapPhase::Post => write!(f, "post"),
            TrapPhase::Payload => write!(f, "payload"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapEvent {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub phase: TrapPhase,
    pub pc: u64,
    pub registers: RegisterSnapshot,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub analysis: RegisterAnalysis,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code_pointer: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub return_value: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub region: Option<RegionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionInfo {
    pub base: u64,
    pub len: usize,
    /// Hex of the bytes read back from the tracee
    pub bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub index: u64,
    pub pc: u64,
    /// Distance from the region base; absent outside the region
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub offset: Option<u64>,
    /// Hex of the bytes at `pc`
    pub bytes: String,
    pub registers: RegisterSnapshot,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub analysis: RegisterAnalysis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub signal: String,
    pub pc: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitEvent {
    Exited {
        timestamp: DateTime<Utc>,
        pid: i32,
        code: i32,
    },
    Signaled {
        timestamp: DateTime<Utc>,
        pid: i32,
        signal: String,
        reason: String,
    },
}

/// Everything the tracee wrote to its stdout and stderr.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEvent {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub timestamp: DateTime<Utc>,
    pub arch: String,
    pub trap_count: u64,
    pub step_count: u64,
    pub steps_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signal: Option<String>,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub base_address: Option<u64>,
    pub duration_ms: u64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_event_tagging() {
        let event = TraceEvent::Trap(TrapEvent {
            timestamp: Utc::now(),
            pid: 42,
            phase: TrapPhase::Pre,
            pc: 0x1000,
            registers: RegisterSnapshot::new(),
            analysis: RegisterAnalysis::new(),
            code_pointer: Some(0x1337_0000),
            return_value: None,
            region: None,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "trap");
        assert_eq!(value["phase"], "pre");
        assert_eq!(value["code_pointer"], 0x1337_0000u64);
        assert!(value.get("return_value").is_none());
        assert!(value.get("analysis").is_none());
    }

    #[test]
    fn test_step_outside_region_has_no_offset() {
        let mut analysis = RegisterAnalysis::new();
        analysis.insert(
            "rsi".into(),
            AnalyzedValue {
                value: 0x1337_0010,
                memory: Some("68656c6c6f00".into()),
                as_instruction: None,
                as_string: Some("hello".into()),
            },
        );
        let event = TraceEvent::Step(StepEvent {
            timestamp: Utc::now(),
            pid: 3,
            index: 0,
            pc: 0x7fff_0000,
            offset: None,
            bytes: "c3".into(),
            registers: RegisterSnapshot::new(),
            analysis,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("offset").is_none());
        assert_eq!(value["analysis"]["rsi"]["as_string"], "hello");
        assert!(value["analysis"]["rsi"].get("as_instruction").is_none());
    }

    #[test]
    fn test_exit_event_kind() {
        let event = TraceEvent::Exit(ExitEvent::Signaled {
            timestamp: Utc::now(),
            pid: 7,
            signal: "SIGALRM".into(),
            reason: "timed out".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "exit");
        assert_eq!(value["kind"], "signaled");
        assert_eq!(value["signal"], "SIGALRM");
    }
}
