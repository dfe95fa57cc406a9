//! Message and reply envelopes.

use chrono::{DateTime, Utc};
use hostalloc_id::RequestId;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Message kind, used for routing and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    AllocateHost,
    ReportHostCapacity,
    ReturnHostCapacity,
    GetCpuMemoryCapacity,
    GetAllocatorStrategies,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::AllocateHost => "allocate_host",
            MessageKind::ReportHostCapacity => "report_host_capacity",
            MessageKind::ReturnHostCapacity => "return_host_capacity",
            MessageKind::GetCpuMemoryCapacity => "get_cpu_memory_capacity",
            MessageKind::GetAllocatorStrategies => "get_allocator_strategies",
        };
        write!(f, "{}", s)
    }
}

/// An inbound request to the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    AllocateHost(AllocateHost),
    ReportHostCapacity(ReportHostCapacity),
    ReturnHostCapacity(ReturnHostCapacity),
    GetCpuMemoryCapacity(GetCpuMemoryCapacity),
    GetAllocatorStrategies,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::AllocateHost(_) => MessageKind::AllocateHost,
            Message::ReportHostCapacity(_) => MessageKind::ReportHostCapacity,
            Message::ReturnHostCapacity(_) => MessageKind::ReturnHostCapacity,
            Message::GetCpuMemoryCapacity(_) => MessageKind::GetCpuMemoryCapacity,
            Message::GetAllocatorStrategies => MessageKind::GetAllocatorStrategies,
        }
    }

    /// Capacity reports and returns are fire-and-forget.
    pub fn expects_reply(&self) -> bool {
        !matches!(
            self,
            Message::ReportHostCapacity(_) | Message::ReturnHostCapacity(_)
        )
    }
}

/// A reply to a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    AllocateHost(AllocateHostReply),
    AllocateHostDryRun(AllocateHostDryRunReply),
    CpuMemoryCapacity(CpuMemoryCapacityReply),
    AllocatorStrategies(AllocatorStrategiesReply),
}

/// A message plus the request metadata the allocator logs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: RequestId,
    pub received_at: DateTime<Utc>,
    pub message: Message,
}

impl RequestEnvelope {
    /// Wraps a message with a fresh request id.
    pub fn new(message: Message) -> Self {
        Self {
            request_id: RequestId::new(),
            received_at: Utc::now(),
            message,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Milliseconds between receipt and `now`, never negative.
    pub fn queued_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.received_at).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use hostalloc_id::HostId;

    use super::*;

    #[test]
    fn test_message_is_tagged_by_kind() {
        let host_id = HostId::new();
        let msg = Message::ReturnHostCapacity(ReturnHostCapacity {
            host_id,
            cpu: 4,
            memory: 8192,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "return_host_capacity");
        assert_eq!(json["host_id"], host_id.to_string());
    }

    #[test]
    fn test_queued_ms_measures_from_receipt() {
        let envelope = RequestEnvelope::new(Message::GetAllocatorStrategies);
        let later = envelope.received_at + chrono::Duration::milliseconds(250);
        assert_eq!(envelope.queued_ms(later), 250);

        let earlier = envelope.received_at - chrono::Duration::seconds(1);
        assert_eq!(envelope.queued_ms(earlier), 0);
    }

    #[test]
    fn test_unit_message_decodes() {
        let msg: Message =
            serde_json::from_str(r#"{"kind":"get_allocator_strategies"}"#).unwrap();
        assert_eq!(msg, Message::GetAllocatorStrategies);
        assert!(msg.expects_reply());
    }

    #[test]
    fn test_reports_and_returns_are_fire_and_forget() {
        let report = Message::ReportHostCapacity(ReportHostCapacity {
            host_id: HostId::new(),
            total_cpu: 8,
            used_cpu: 2,
            total_memory: 16384,
            used_memory: 4096,
        });
        assert!(!report.expects_reply());
        assert_eq!(report.kind().to_string(), "report_host_capacity");
    }

    #[test]
    fn test_envelope_kind() {
        let envelope = RequestEnvelope::new(Message::GetAllocatorStrategies);
        assert_eq!(envelope.kind(), MessageKind::GetAllocatorStrategies);
        assert!(envelope.request_id.to_string().starts_with("req_"));
    }
}
