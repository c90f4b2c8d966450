//! Envelope types for the JSON admin protocol.
//!
//! Every message on the wire is a top-level JSON object. The envelope fields
//! are the only part of a message this crate interprets:
//!
//! - `transaction` - correlates a reply to its request; absent on events
//! - `ok` - outcome discriminator on replies
//! - `error.code` / `error.reason` - failure details when `ok` is false
//! - `admin_secret` - credential injected into outbound requests
//!
//! Command-specific fields pass through untouched as [`serde_json::Value`].
//!
//! # Example
//!
//! ```
//! use admwire::protocol::Message;
//! use serde_json::json;
//!
//! let reply = Message::from_value(json!({"transaction": "t1", "ok": true}));
//! assert!(matches!(reply, Message::Reply(_)));
//!
//! let event = Message::from_value(json!({"type": "session", "id": 42}));
//! assert!(matches!(event, Message::Event(_)));
//! ```

use serde_json::Value;

use crate::error::{AdminError, Result};

/// Field carrying the correlation token.
pub const TRANSACTION_FIELD: &str = "transaction";

/// Field carrying the injected credential.
pub const SECRET_FIELD: &str = "admin_secret";

/// Outcome discriminator field on replies.
const OK_FIELD: &str = "ok";

/// Error details object on failed replies.
const ERROR_FIELD: &str = "error";

/// A decoded inbound message.
///
/// Discriminated by the presence of the `transaction` field: with it, the
/// message is a [`Reply`] for the correlator; without it, an [`Event`] for
/// the event bus.
#[derive(Debug, Clone)]
pub enum Message {
    /// A reply to a previously sent request.
    Reply(Reply),
    /// An unsolicited notification from the gateway.
    Event(Event),
}

impl Message {
    /// Classify a decoded JSON value into reply or event.
    pub fn from_value(body: Value) -> Self {
        match body.get(TRANSACTION_FIELD).and_then(Value::as_str) {
            Some(tx) => Message::Reply(Reply {
                transaction: tx.to_string(),
                body,
            }),
            None => Message::Event(Event { body }),
        }
    }
}

/// Remote failure details carried by a reply whose outcome is negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFault {
    /// Error code reported by the gateway.
    pub code: i64,
    /// Human-readable reason.
    pub reason: String,
}

/// A reply to a request, still carrying its full JSON body.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Echoed transaction id.
    pub transaction: String,
    /// Complete reply object as received.
    pub body: Value,
}

impl Reply {
    /// Whether the gateway reported success.
    ///
    /// A reply without an outcome discriminator counts as successful; some
    /// commands reply with nothing but the transaction echo.
    pub fn is_ok(&self) -> bool {
        self.body
            .get(OK_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Failure details, if the outcome discriminator signals an error.
    pub fn fault(&self) -> Option<RemoteFault> {
        if self.is_ok() {
            return None;
        }
        let err = self.body.get(ERROR_FIELD);
        Some(RemoteFault {
            code: err
                .and_then(|e| e.get("code"))
                .and_then(Value::as_i64)
                .unwrap_or(0),
            reason: err
                .and_then(|e| e.get("reason"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        })
    }

    /// The command-specific `result` member, if any.
    pub fn result(&self) -> Option<&Value> {
        self.body.get("result")
    }
}

/// An unsolicited message pushed by the gateway.
#[derive(Debug, Clone)]
pub struct Event {
    /// Complete event object as received.
    pub body: Value,
}

/// Inject the envelope fields into an outbound request.
///
/// The payload must be a JSON object; the transaction id and, when
/// configured, the credential are added in place. An existing `transaction`
/// field is overwritten so stale ids can never leak into a new request.
///
/// # Errors
///
/// Returns [`AdminError::Decode`] if the payload is not an object.
pub fn inject_envelope(payload: &mut Value, transaction: &str, secret: Option<&str>) -> Result<()> {
    let obj = payload
        .as_object_mut()
        .ok_or_else(|| AdminError::Decode("request payload must be a JSON object".to_string()))?;

    obj.insert(
        TRANSACTION_FIELD.to_string(),
        Value::String(transaction.to_string()),
    );
    if let Some(secret) = secret {
        obj.insert(SECRET_FIELD.to_string(), Value::String(secret.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_discrimination() {
        let msg = Message::from_value(json!({"transaction": "t1", "ok": true}));
        match msg {
            Message::Reply(reply) => {
                assert_eq!(reply.transaction, "t1");
                assert!(reply.is_ok());
            }
            Message::Event(_) => panic!("expected reply"),
        }
    }

    #[test]
    fn test_event_discrimination() {
        let msg = Message::from_value(json!({"type": "session", "event": "created", "id": 42}));
        match msg {
            Message::Event(event) => {
                assert_eq!(event.body["id"], 42);
            }
            Message::Reply(_) => panic!("expected event"),
        }
    }

    #[test]
    fn test_non_string_transaction_is_event() {
        // A numeric transaction field does not match the envelope contract.
        let msg = Message::from_value(json!({"transaction": 7}));
        assert!(matches!(msg, Message::Event(_)));
    }

    #[test]
    fn test_fault_extraction() {
        let msg = Message::from_value(json!({
            "transaction": "t2",
            "ok": false,
            "error": {"code": 458, "reason": "no such session"}
        }));
        let Message::Reply(reply) = msg else {
            panic!("expected reply");
        };
        assert!(!reply.is_ok());
        let fault = reply.fault().unwrap();
        assert_eq!(fault.code, 458);
        assert_eq!(fault.reason, "no such session");
    }

    #[test]
    fn test_fault_defaults_when_details_missing() {
        let msg = Message::from_value(json!({"transaction": "t3", "ok": false}));
        let Message::Reply(reply) = msg else {
            panic!("expected reply");
        };
        let fault = reply.fault().unwrap();
        assert_eq!(fault.code, 0);
        assert_eq!(fault.reason, "unknown error");
    }

    #[test]
    fn test_missing_outcome_counts_as_success() {
        let msg = Message::from_value(json!({"transaction": "t4"}));
        let Message::Reply(reply) = msg else {
            panic!("expected reply");
        };
        assert!(reply.is_ok());
        assert!(reply.fault().is_none());
    }

    #[test]
    fn test_result_accessor() {
        let msg = Message::from_value(json!({
            "transaction": "t5",
            "ok": true,
            "result": {"name": "X"}
        }));
        let Message::Reply(reply) = msg else {
            panic!("expected reply");
        };
        assert_eq!(reply.result(), Some(&json!({"name": "X"})));
    }

    #[test]
    fn test_inject_envelope() {
        let mut payload = json!({"command": "info"});
        inject_envelope(&mut payload, "t1", Some("s3cret")).unwrap();

        assert_eq!(payload[TRANSACTION_FIELD], "t1");
        assert_eq!(payload[SECRET_FIELD], "s3cret");
        assert_eq!(payload["command"], "info");
    }

    #[test]
    fn test_inject_envelope_without_secret() {
        let mut payload = json!({"command": "info"});
        inject_envelope(&mut payload, "t1", None).unwrap();

        assert_eq!(payload[TRANSACTION_FIELD], "t1");
        assert!(payload.get(SECRET_FIELD).is_none());
    }

    #[test]
    fn test_inject_envelope_overwrites_stale_transaction() {
        let mut payload = json!({"command": "info", "transaction": "old"});
        inject_envelope(&mut payload, "fresh", None).unwrap();
        assert_eq!(payload[TRANSACTION_FIELD], "fresh");
    }

    #[test]
    fn test_inject_envelope_rejects_non_object() {
        let mut payload = json!([1, 2, 3]);
        let result = inject_envelope(&mut payload, "t1", None);
        assert!(matches!(result, Err(AdminError::Decode(_))));
    }
}
