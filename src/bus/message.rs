use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MonitoringEvent;

/// The finite set of message types carried on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "heartbeat_event")]
    Heartbeat,

    #[serde(rename = "metrics_event")]
    Metrics,
}

impl MessageType {
    pub const ALL: [MessageType; 2] = [MessageType::Heartbeat, MessageType::Metrics];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Heartbeat => "heartbeat_event",
            MessageType::Metrics => "metrics_event",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown message type '{s}'"))
    }
}

/// A message as it travels through a queue: declared type plus opaque bytes
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub queue: String,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(queue: impl Into<String>, message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            queue: queue.into(),
            message_type,
            payload,
            published_at: Utc::now(),
        }
    }

    /// Deserialize the payload as a `MonitoringEvent`
    pub fn decode(&self) -> Result<MonitoringEvent, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}
