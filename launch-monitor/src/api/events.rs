use chrono::{DateTime, Utc};
use serde::Serialize;

/// Typed event kinds fanned out to push-socket clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StateChange,
    WhaleTrade,
    TaxUpdate,
    BuybackUpdate,
    ProjectStart,
    ProjectComplete,
    Error,
}

/// Broadcast envelope. Serialised as `{type, timestamp, data}` with an
/// ISO-8601 UTC timestamp, both on the socket and in the event ring.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "data")]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let event = Event::new(EventKind::WhaleTrade, serde_json::json!({"side": "buy"}));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "whale_trade");
        assert_eq!(json["data"]["side"], "buy");
        // chrono serialises DateTime<Utc> as RFC 3339 / ISO-8601.
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_kind_wire_names() {
        for (kind, wire) in [
            (EventKind::StateChange, "state_change"),
            (EventKind::TaxUpdate, "tax_update"),
            (EventKind::BuybackUpdate, "buyback_update"),
            (EventKind::ProjectStart, "project_start"),
            (EventKind::ProjectComplete, "project_complete"),
            (EventKind::Error, "error"),
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), wire);
        }
    }
}
