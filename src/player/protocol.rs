//! Line-delimited JSON spoken over the player's control endpoint.
//!
//! Requests look like `{"command": ["get_property", "time-pos"], "request_id": 1}`,
//! replies echo the `request_id` next to an `error` status and optional `data`,
//! and unsolicited events carry an `event` name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed correlation table: each id maps to exactly one session field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestId {
    FireAndForget,
    TimePos,
    Duration,
}

impl RequestId {
    pub fn as_u64(self) -> u64 {
        match self {
            Self::FireAndForget => 0,
            Self::TimePos => 1,
            Self::Duration => 2,
        }
    }

    pub fn from_u64(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::FireAndForget),
            1 => Some(Self::TimePos),
            2 => Some(Self::Duration),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    command: &'a [Value],
    request_id: u64,
}

/// Serialises one command, newline terminated.
pub fn encode_command(command: &[Value], id: RequestId) -> serde_json::Result<Vec<u8>> {
    let mut payload = serde_json::to_vec(&Request {
        command,
        request_id: id.as_u64(),
    })?;
    payload.push(b'\n');
    Ok(payload)
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    request_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Response {
        request_id: u64,
        result: Result<Option<Value>, String>,
    },
    Event {
        name: String,
    },
    Other,
}

pub fn parse_message(line: &str) -> serde_json::Result<Message> {
    let raw: RawMessage = serde_json::from_str(line)?;
    if let Some(name) = raw.event {
        return Ok(Message::Event { name });
    }
    let Some(status) = raw.error else {
        return Ok(Message::Other);
    };
    let result = if status == "success" {
        Ok(raw.data)
    } else {
        Err(status)
    };
    Ok(Message::Response {
        request_id: raw.request_id.unwrap_or(0),
        result,
    })
}

/// Accumulates raw reads and yields complete lines; partial lines wait for the next read.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_command_with_request_id_and_newline() {
        let payload = encode_command(&[json!("get_property"), json!("time-pos")], RequestId::TimePos)
            .expect("encode");
        let text = String::from_utf8(payload).expect("utf8");
        assert!(text.ends_with('\n'));
        let value: Value = serde_json::from_str(text.trim_end()).expect("valid json");
        assert_eq!(value, json!({"command": ["get_property", "time-pos"], "request_id": 1}));
    }

    #[test]
    fn parses_success_error_and_event_messages() {
        assert_eq!(
            parse_message(r#"{"error":"success","data":42,"request_id":1}"#).expect("parse"),
            Message::Response {
                request_id: 1,
                result: Ok(Some(json!(42)))
            }
        );
        assert_eq!(
            parse_message(r#"{"error":"property unavailable","request_id":2}"#).expect("parse"),
            Message::Response {
                request_id: 2,
                result: Err("property unavailable".to_string())
            }
        );
        assert_eq!(
            parse_message(r#"{"event":"end-file","reason":"quit"}"#).expect("parse"),
            Message::Event {
                name: "end-file".to_string()
            }
        );
        assert_eq!(parse_message(r#"{"foo":1}"#).expect("parse"), Message::Other);
        assert!(parse_message("{not json").is_err());
    }

    #[test]
    fn framer_keeps_partial_lines_across_reads() {
        let mut framer = LineFramer::default();
        assert!(framer.push(br#"{"error":"succ"#).is_empty());
        assert!(framer.pending_len() > 0);

        let lines = framer.push(b"ess\",\"data\":42,\"request_id\":1}\n{\"event\":\"end-file\"}\n");
        assert_eq!(
            lines,
            vec![
                r#"{"error":"success","data":42,"request_id":1}"#.to_string(),
                r#"{"event":"end-file"}"#.to_string(),
            ]
        );
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn framer_does_not_split_multibyte_characters() {
        let mut framer = LineFramer::default();
        let line = "{\"event\":\"ファイル\"}\n".as_bytes();
        let (head, tail) = line.split_at(12);

        assert!(framer.push(head).is_empty());
        assert_eq!(framer.push(tail), vec!["{\"event\":\"ファイル\"}".to_string()]);
    }

    #[test]
    fn framer_skips_blank_lines() {
        let mut framer = LineFramer::default();
        assert!(framer.push(b"\n\r\n  \n").is_empty());
    }
}
