//! Wire format of the bus envelope and its replies.

use crate::error::Error;
use crate::model::{AuthHeader, Command, Domain, DomainPretty, Record, RecordPretty, View};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A request as it crosses the bus. Field names are single letters on
/// the wire; `auth` and `domain` are nullable and their absence is a
/// security failure rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "a")]
    pub auth: Option<AuthHeader>,
    #[serde(rename = "c")]
    pub command: Command,
    #[serde(rename = "d")]
    pub domain: Option<Domain>,
    #[serde(rename = "r", default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<Record>,
    #[serde(rename = "n", default, skip_serializing_if = "String::is_empty")]
    pub new_token: String,
    #[serde(rename = "p", default)]
    pub pretty: bool,
}

impl Envelope {
    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Reply status. The worker emits `SUCCESS` and `ERROR`; `MERGED` is
/// produced by front-ends that combine replies from several workers, and
/// decoding it here keeps the envelope symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "MERGED")]
    Merged,
}

/// One element of a read reply, shaped by the request's pretty flag.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Entity {
    Record(Record),
    RecordPretty(RecordPretty),
    Domain(Domain),
    DomainPretty(DomainPretty),
}

impl Entity {
    #[must_use]
    pub fn record(record: Record, pretty: bool) -> Self {
        if pretty {
            Entity::RecordPretty(record.into())
        } else {
            Entity::Record(record)
        }
    }

    #[must_use]
    pub fn domain(domain: Domain, pretty: bool) -> Self {
        if pretty {
            Entity::DomainPretty(domain.into())
        } else {
            Entity::Domain(domain)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReplyData {
    Failure { error: String },
    Rows { rows: u64 },
    Entities(HashMap<View, Vec<Entity>>),
}

#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub status: Status,
    pub data: ReplyData,
}

impl Reply {
    #[must_use]
    pub fn error(err: &Error) -> Self {
        Reply {
            status: Status::Error,
            data: ReplyData::Failure {
                error: err.to_string(),
            },
        }
    }

    #[must_use]
    pub fn rows(rows: u64) -> Self {
        Reply {
            status: Status::Success,
            data: ReplyData::Rows { rows },
        }
    }

    #[must_use]
    pub fn entities(merged: HashMap<View, Vec<Entity>>) -> Self {
        Reply {
            status: Status::Success,
            data: ReplyData::Entities(merged),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordType;
    use serde_json::json;

    fn sample() -> Envelope {
        Envelope {
            auth: Some(AuthHeader {
                token: "test".to_string(),
                sum: "abcdef".to_string(),
                priority: 0,
            }),
            command: Command::CreateRecord,
            domain: Some(Domain {
                name: "test.com".to_string(),
                view: View::Public,
            }),
            records: vec![Record {
                name: "www".to_string(),
                rtype: RecordType::A,
                data: vec!["192.0.2.1".to_string()],
                ttl: 600,
            }],
            new_token: String::new(),
            pretty: false,
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let envelope = sample();
        let body = serde_json::to_vec(&envelope).unwrap();
        let decoded = Envelope::decode(&body).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            json!({
                "a": {"t": "test", "x": "abcdef"},
                "c": "create_record",
                "d": {"n": "test.com", "v": "public"},
                "r": [{"n": "www", "t": "A", "d": ["192.0.2.1"], "l": 600}],
                "p": false
            })
        );
    }

    #[test]
    fn unknown_command_fails_decode() {
        let body = br#"{"a":null,"c":"drop_zone","d":null}"#;
        assert!(matches!(Envelope::decode(body), Err(Error::Decode(_))));
    }

    #[test]
    fn missing_optional_fields_default() {
        let body = br#"{"c":"list_domains"}"#;
        let envelope = Envelope::decode(body).unwrap();
        assert!(envelope.auth.is_none());
        assert!(envelope.domain.is_none());
        assert!(envelope.records.is_empty());
        assert!(envelope.new_token.is_empty());
        assert!(!envelope.pretty);
    }

    #[test]
    fn error_reply_shape() {
        let reply = Reply::error(&Error::Security("permission denied".to_string()));
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            value,
            json!({"status": "ERROR", "data": {"error": "security: permission denied"}})
        );
    }

    #[test]
    fn rows_reply_shape() {
        let value = serde_json::to_value(Reply::rows(3)).unwrap();
        assert_eq!(value, json!({"status": "SUCCESS", "data": {"rows": 3}}));
    }

    #[test]
    fn entities_reply_groups_by_view() {
        let mut merged = HashMap::new();
        merged.insert(
            View::Public,
            vec![Entity::domain(
                Domain {
                    name: "test.com".to_string(),
                    view: View::Public,
                },
                true,
            )],
        );
        let value = serde_json::to_value(Reply::entities(merged)).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "SUCCESS",
                "data": {"public": [{"name": "test.com", "type": "public"}]}
            })
        );
    }
}
