//! Notification parser
//!
//! Classifies each inbound WebSocket text message into a [`ParsedMessage`].
//! Parsing is tolerant: a missing `addedResults`/`removedResults` section (or
//! a section without `results.bindings`) becomes an empty binding list plus a
//! warning, so minor protocol drift between broker versions does not tear
//! down a subscription.
//!
//! Besides the current notification envelope, the legacy broker shapes
//! (`subscribed`/`firstResults` and a bare `results` delta) are accepted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{trace, warn};

/// RDF term kind carried by a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermType {
    Uri,
    #[serde(alias = "typed-literal")]
    Literal,
    Bnode,
}

/// A single bound value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdfTerm {
    #[serde(rename = "type")]
    pub kind: TermType,

    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,

    #[serde(default, rename = "xml:lang", skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

impl RdfTerm {
    pub fn uri(value: impl Into<String>) -> Self {
        Self::new(TermType::Uri, value)
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::new(TermType::Literal, value)
    }

    pub fn bnode(value: impl Into<String>) -> Self {
        Self::new(TermType::Bnode, value)
    }

    fn new(kind: TermType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            datatype: None,
            lang: None,
        }
    }
}

/// One result row: variable name -> bound term
pub type Binding = BTreeMap<String, RdfTerm>;

/// Classification of one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    /// The broker acknowledged an unsubscribe; the session must be torn down
    Unsubscribed { subscription_id: Option<String> },

    /// First message of a session: establishes its identity
    Confirmed {
        subscription_id: String,
        alias: Option<String>,
        initial_added: Vec<Binding>,
    },

    /// Steady-state notification
    Delta {
        sequence: Option<u64>,
        added: Vec<Binding>,
        removed: Vec<Binding>,
    },

    /// Liveness marker, carries no data
    Keepalive,

    /// Anything the parser could not place; handled as an empty delta
    Malformed { reason: String },
}

/// Per-session parser
///
/// Only the first confirmation-shaped message of a session is reported as
/// [`ParsedMessage::Confirmed`]; any later one is [`ParsedMessage::Malformed`]
/// so it can never re-register the session.
#[derive(Debug, Default)]
pub struct NotificationParser {
    confirmed: bool,
}

impl NotificationParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a confirmation has already been seen
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Parse one inbound text message
    pub fn parse(&mut self, raw: &str) -> ParsedMessage {
        match classify(raw) {
            ParsedMessage::Confirmed {
                subscription_id, ..
            } if self.confirmed => ParsedMessage::Malformed {
                reason: format!("repeated confirmation for subscription {}", subscription_id),
            },
            confirmed @ ParsedMessage::Confirmed { .. } => {
                self.confirmed = true;
                confirmed
            }
            other => other,
        }
    }
}

/// Classify a message by shape alone, without session context
pub fn classify(raw: &str) -> ParsedMessage {
    let document: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return malformed(format!("not JSON: {}", e)),
    };
    let Some(object) = document.as_object() else {
        return malformed("not a JSON object".to_string());
    };

    if let Some(notification) = object.get("notification") {
        return classify_notification(notification);
    }

    if let Some(ack) = object.get("unsubscribed") {
        let subscription_id = ack
            .get("spuid")
            .and_then(Value::as_str)
            .map(String::from);
        return ParsedMessage::Unsubscribed { subscription_id };
    }

    if let Some(id) = object.get("subscribed") {
        return classify_legacy_confirmation(id, object);
    }

    if let Some(results) = object.get("results") {
        return ParsedMessage::Delta {
            sequence: None,
            added: result_bindings(
                results
                    .get("addedResults")
                    .or_else(|| results.get("addedresults")),
                "addedResults",
            ),
            removed: result_bindings(
                results
                    .get("removedResults")
                    .or_else(|| results.get("removedresults")),
                "removedResults",
            ),
        };
    }

    if object.contains_key("ping") {
        trace!("Keepalive received");
        return ParsedMessage::Keepalive;
    }

    if let Some(error) = object.get("error") {
        let detail = object
            .get("message")
            .or_else(|| error.get("message"))
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return malformed(format!("broker error: {}", detail));
    }

    malformed("no notification, ping or unsubscribed key".to_string())
}

fn classify_notification(notification: &Value) -> ParsedMessage {
    let Some(sequence) = notification.get("sequence").and_then(Value::as_u64) else {
        return malformed("notification without sequence".to_string());
    };

    let added = notification.get("addedResults");
    let removed = notification.get("removedResults");

    if sequence == 0 {
        return match notification.get("spuid").and_then(Value::as_str) {
            Some(id) => ParsedMessage::Confirmed {
                subscription_id: id.to_string(),
                alias: notification
                    .get("alias")
                    .and_then(Value::as_str)
                    .map(String::from),
                initial_added: result_bindings(added, "addedResults"),
            },
            None => malformed("first notification without spuid".to_string()),
        };
    }

    ParsedMessage::Delta {
        sequence: Some(sequence),
        added: result_bindings(added, "addedResults"),
        removed: result_bindings(removed, "removedResults"),
    }
}

fn classify_legacy_confirmation(id: &Value, object: &Map<String, Value>) -> ParsedMessage {
    match id.as_str() {
        Some(id) => ParsedMessage::Confirmed {
            subscription_id: id.to_string(),
            alias: object.get("alias").and_then(Value::as_str).map(String::from),
            initial_added: result_bindings(object.get("firstResults"), "firstResults"),
        },
        None => malformed("subscribed without a string id".to_string()),
    }
}

/// Extract `results.bindings` from a result-set section
fn result_bindings(section: Option<&Value>, label: &str) -> Vec<Binding> {
    let Some(section) = section else {
        warn!("Notification lacks {}, assuming no bindings", label);
        return Vec::new();
    };

    let Some(rows) = section
        .get("results")
        .and_then(|r| r.get("bindings"))
        .and_then(Value::as_array)
    else {
        warn!("{} lacks results.bindings, assuming no bindings", label);
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| match serde_json::from_value::<Binding>(row.clone()) {
            Ok(binding) => Some(binding),
            Err(e) => {
                warn!("Skipping unreadable binding in {}: {}", label, e);
                None
            }
        })
        .collect()
}

fn malformed(reason: String) -> ParsedMessage {
    warn!("Malformed notification: {}", reason);
    ParsedMessage::Malformed { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIRMATION: &str = r#"{"notification":{"sequence":0,"spuid":"abc123","addedResults":{"results":{"bindings":[{"nome":{"type":"uri","value":"test:Francesco"},"qualcosa":{"type":"literal","value":"Ciao"}}]}}}}"#;

    fn row(pairs: &[(&str, RdfTerm)]) -> Binding {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_confirmation() {
        let mut parser = NotificationParser::new();

        let parsed = parser.parse(CONFIRMATION);

        assert_eq!(
            parsed,
            ParsedMessage::Confirmed {
                subscription_id: "abc123".into(),
                alias: None,
                initial_added: vec![row(&[
                    ("nome", RdfTerm::uri("test:Francesco")),
                    ("qualcosa", RdfTerm::literal("Ciao")),
                ])],
            }
        );
        assert!(parser.is_confirmed());
    }

    #[test]
    fn test_repeated_confirmation_is_malformed() {
        let mut parser = NotificationParser::new();
        parser.parse(CONFIRMATION);

        assert!(matches!(
            parser.parse(CONFIRMATION),
            ParsedMessage::Malformed { .. }
        ));
    }

    #[test]
    fn test_delta() {
        let raw = r#"{"notification":{"spuid":"abc123","sequence":3,
            "addedResults":{"results":{"bindings":[{"s":{"type":"bnode","value":"b0"}}]}},
            "removedResults":{"results":{"bindings":[{"s":{"type":"uri","value":"test:old"}}]}}}}"#;

        assert_eq!(
            classify(raw),
            ParsedMessage::Delta {
                sequence: Some(3),
                added: vec![row(&[("s", RdfTerm::bnode("b0"))])],
                removed: vec![row(&[("s", RdfTerm::uri("test:old"))])],
            }
        );
    }

    #[test]
    fn test_delta_missing_sections_is_empty() {
        let raw = r#"{"notification":{"sequence":7,"addedResults":{"results":{"bindings":[{"x":{"type":"literal","value":"1"}}]}}}}"#;
        match classify(raw) {
            ParsedMessage::Delta { added, removed, .. } => {
                assert_eq!(added.len(), 1);
                assert!(removed.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        let raw = r#"{"notification":{"sequence":8,"removedResults":{"head":{}}}}"#;
        assert_eq!(
            classify(raw),
            ParsedMessage::Delta {
                sequence: Some(8),
                added: vec![],
                removed: vec![],
            }
        );
    }

    #[test]
    fn test_literal_annotations_preserved() {
        let raw = r#"{"notification":{"sequence":1,"addedResults":{"results":{"bindings":[
            {"n":{"type":"typed-literal","value":"5","datatype":"http://www.w3.org/2001/XMLSchema#int"},
             "l":{"type":"literal","value":"ciao","xml:lang":"it"}}]}}}}"#;
        let ParsedMessage::Delta { added, .. } = classify(raw) else {
            panic!("expected delta");
        };
        assert_eq!(added[0]["n"].kind, TermType::Literal);
        assert_eq!(
            added[0]["n"].datatype.as_deref(),
            Some("http://www.w3.org/2001/XMLSchema#int")
        );
        assert_eq!(added[0]["l"].lang.as_deref(), Some("it"));
    }

    #[test]
    fn test_keepalive_and_unsubscribed() {
        assert_eq!(
            classify(r#"{"ping":{"timestamp":"2026-10-19T10:00:00"}}"#),
            ParsedMessage::Keepalive
        );
        assert_eq!(
            classify(r#"{"unsubscribed":{"spuid":"abc123"}}"#),
            ParsedMessage::Unsubscribed {
                subscription_id: Some("abc123".into())
            }
        );
    }

    #[test]
    fn test_legacy_shapes() {
        let raw = r#"{"subscribed":"sepa://subscription/1","alias":"q1",
            "firstResults":{"results":{"bindings":[{"a":{"type":"uri","value":"test:a"}}]}}}"#;
        assert_eq!(
            classify(raw),
            ParsedMessage::Confirmed {
                subscription_id: "sepa://subscription/1".into(),
                alias: Some("q1".into()),
                initial_added: vec![row(&[("a", RdfTerm::uri("test:a"))])],
            }
        );

        let raw = r#"{"results":{"addedresults":{"results":{"bindings":[]}},
            "removedresults":{"results":{"bindings":[{"a":{"type":"uri","value":"test:a"}}]}}}}"#;
        assert_eq!(
            classify(raw),
            ParsedMessage::Delta {
                sequence: None,
                added: vec![],
                removed: vec![row(&[("a", RdfTerm::uri("test:a"))])],
            }
        );
    }

    #[test]
    fn test_malformed_inputs() {
        for raw in [
            "not json",
            "[1,2,3]",
            r#"{"hello":"world"}"#,
            r#"{"notification":{"spuid":"x"}}"#,
            r#"{"notification":{"sequence":0}}"#,
            r#"{"error":"invalid_request","status_code":400,"message":"bad SPARQL"}"#,
        ] {
            assert!(
                matches!(classify(raw), ParsedMessage::Malformed { .. }),
                "{} should be malformed",
                raw
            );
        }
    }

    #[test]
    fn test_broker_error_reason() {
        let raw = r#"{"error":"invalid_request","message":"bad SPARQL"}"#;
        assert_eq!(
            classify(raw),
            ParsedMessage::Malformed {
                reason: "broker error: bad SPARQL".into()
            }
        );
    }
}
