//! Wire envelopes exchanged with the automation backend.
//!
//! Commands travel client -> backend wrapped in `{"data": ...}`; events come
//! back as flat objects tagged by `event`. Every frame is a JSON text frame.

use crate::credentials::CredentialSet;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Event tag the backend uses to ask for a one-time code.
pub const CODE_REQUESTED: &str = "code";
/// Event tag for the terminal outcome report.
pub const RESULT: &str = "result";

/// Client -> backend command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(CredentialSet),
    CodeReply(String),
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CommandData {
    Tagged(TaggedCommand),
    CodeReply { code: String },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "event", content = "body", rename_all = "lowercase")]
enum TaggedCommand {
    Start(CredentialSet),
}

impl Command {
    /// Short name for logs. Never includes the payload.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::CodeReply(_) => "code-reply",
        }
    }

    pub fn encode(&self) -> Result<String> {
        let data = match self {
            Self::Start(set) => CommandData::Tagged(TaggedCommand::Start(set.clone())),
            Self::CodeReply(code) => CommandData::CodeReply { code: code.clone() },
        };
        Ok(serde_json::to_string(&Envelope { data })?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope<CommandData> = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("malformed command frame: {e}")))?;
        Ok(match envelope.data {
            CommandData::Tagged(TaggedCommand::Start(set)) => Self::Start(set),
            CommandData::CodeReply { code } => Self::CodeReply(code),
        })
    }
}

/// Final outcome the backend may report before closing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Backend -> client event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CodeRequested,
    Result(Outcome),
    /// Any other tag (or none). Carried for logging, otherwise ignored.
    Unrecognized(Option<String>),
}

impl Event {
    /// Only the `event` tag is read up front; `result` frames are then
    /// parsed for their outcome and other fields are left alone.
    pub fn decode(text: &str) -> Result<Self> {
        let frame: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("malformed event frame: {e}")))?;
        if !frame.is_object() {
            return Err(Error::Protocol("event frame is not a JSON object".into()));
        }

        let tag = frame.get("event").and_then(|v| v.as_str()).map(ToString::to_string);
        match tag.as_deref() {
            Some(CODE_REQUESTED) => Ok(Self::CodeRequested),
            Some(RESULT) => serde_json::from_value::<Outcome>(frame)
                .map(Self::Result)
                .map_err(|e| Error::Protocol(format!("malformed result event: {e}"))),
            _ => Ok(Self::Unrecognized(tag)),
        }
    }

    pub fn encode(&self) -> Result<String> {
        let value = match self {
            Self::CodeRequested => serde_json::json!({ "event": CODE_REQUESTED }),
            Self::Result(outcome) => {
                let mut value = serde_json::to_value(outcome)?;
                value["event"] = RESULT.into();
                value
            }
            Self::Unrecognized(Some(tag)) => serde_json::json!({ "event": tag }),
            Self::Unrecognized(None) => serde_json::json!({}),
        };
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn sample() -> CredentialSet {
        CredentialSet::new("a@b.com", "p", "engineer", "remote").unwrap()
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_start_frame_shape() {
        let text = Command::Start(sample()).encode().unwrap();
        assert_eq!(
            parse(&text),
            json!({
                "data": {
                    "event": "start",
                    "body": {
                        "email": "a@b.com",
                        "password": "p",
                        "what": "engineer",
                        "where": "remote",
                    }
                }
            })
        );
    }

    #[test]
    fn test_code_reply_frame_shape() {
        let text = Command::CodeReply("123456".into()).encode().unwrap();
        assert_eq!(text, r#"{"data":{"code":"123456"}}"#);
    }

    #[test]
    fn test_start_body_survives_decode() {
        let set = CredentialSet::new("x@y.org", "p@ss \"quoted\"", "rust dev", "Cairo, EG").unwrap();
        let text = Command::Start(set.clone()).encode().unwrap();
        assert_eq!(Command::decode(&text).unwrap(), Command::Start(set));
    }

    #[test]
    fn test_decode_code_reply() {
        let cmd = Command::decode(r#"{"data":{"code":"42"}}"#).unwrap();
        assert_eq!(cmd, Command::CodeReply("42".into()));
    }

    #[test]
    fn test_decode_command_without_data() {
        assert!(matches!(
            Command::decode(r#"{"event":"start"}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_kind_never_leaks_payload() {
        assert_eq!(Command::Start(sample()).kind(), "start");
        assert_eq!(Command::CodeReply("999".into()).kind(), "code-reply");
    }

    #[test]
    fn test_code_event_ignores_extra_fields() {
        let event = Event::decode(r#"{"event":"code","attempt":2,"hint":"sms"}"#).unwrap();
        assert_eq!(event, Event::CodeRequested);
    }

    #[test]
    fn test_code_event_ignores_typed_extra_fields() {
        assert_eq!(
            Event::decode(r#"{"event":"code","message":{"text":"check sms"}}"#).unwrap(),
            Event::CodeRequested
        );
        assert_eq!(
            Event::decode(r#"{"event":"code","success":"pending"}"#).unwrap(),
            Event::CodeRequested
        );
    }

    #[test]
    fn test_result_event_with_bad_message_type() {
        assert!(matches!(
            Event::decode(r#"{"event":"result","success":true,"message":42}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_result_event() {
        let event = Event::decode(r#"{"event":"result","success":false,"message":"bad password"}"#)
            .unwrap();
        assert_eq!(
            event,
            Event::Result(Outcome {
                success: false,
                message: Some("bad password".into()),
            })
        );
    }

    #[test]
    fn test_result_event_requires_success_flag() {
        assert!(matches!(
            Event::decode(r#"{"event":"result"}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_unrecognized_events() {
        assert_eq!(
            Event::decode(r#"{"event":"progress","page":3}"#).unwrap(),
            Event::Unrecognized(Some("progress".into()))
        );
        assert_eq!(Event::decode("{}").unwrap(), Event::Unrecognized(None));
    }

    #[test]
    fn test_malformed_event() {
        assert!(matches!(Event::decode("not json"), Err(Error::Protocol(_))));
        assert!(matches!(Event::decode("[1,2]"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_event_encode_matches_wire() {
        assert_eq!(Event::CodeRequested.encode().unwrap(), r#"{"event":"code"}"#);
        let result = Event::Result(Outcome {
            success: true,
            message: None,
        });
        assert_eq!(
            parse(&result.encode().unwrap()),
            json!({"event": "result", "success": true})
        );
    }
}
