//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Every WebSocket text frame carries one Engine.IO packet. Engine.IO `message`
//! packets (`4`) wrap one Socket.IO packet, so an event on the default namespace
//! looks like `42["command_result",{...}]`. Binary attachments are not supported.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::WsError;

/// The default Socket.IO namespace. Omitted from encoded packets.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Payload of the Engine.IO `open` packet sent by the server after the upgrade.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// How long the connection may stay silent before it is considered dead.
    #[must_use]
    pub fn ping_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        name: String,
        data: Value,
        ack: Option<u64>,
    },
    Ack {
        namespace: String,
        id: u64,
        data: Value,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl Packet {
    /// An event on `namespace` without an acknowledgement id.
    #[must_use]
    pub fn event(namespace: &str, name: &str, data: Value) -> Self {
        Self::Event {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            data,
            ack: None,
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Self::Close => "1".to_owned(),
            Self::Ping => "2".to_owned(),
            Self::Pong => "3".to_owned(),
            Self::Noop => "6".to_owned(),
            Self::Connect { namespace, data } => {
                let body = data.as_ref().map(Value::to_string).unwrap_or_default();
                format!("40{}{body}", namespace_prefix(namespace))
            }
            Self::Disconnect { namespace } => format!("41{}", namespace_prefix(namespace)),
            Self::Event {
                namespace,
                name,
                data,
                ack,
            } => {
                let ack = ack.map(|id| id.to_string()).unwrap_or_default();
                let body = match data {
                    Value::Null => json!([name]),
                    _ => json!([name, data]),
                };
                format!("42{}{ack}{body}", namespace_prefix(namespace))
            }
            Self::Ack {
                namespace,
                id,
                data,
            } => format!("43{}{id}{}", namespace_prefix(namespace), json!([data])),
            Self::ConnectError { namespace, message } => format!(
                "44{}{}",
                namespace_prefix(namespace),
                json!({ "message": message })
            ),
        }
    }

    pub fn decode(text: &str) -> Result<Self, WsError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| WsError::InvalidMessage("empty frame".to_owned()))?;
        let rest = chars.as_str();

        match kind {
            '0' => {
                let handshake = serde_json::from_str(rest).map_err(WsError::MessageParse)?;
                Ok(Self::Open(handshake))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => decode_socket_packet(rest),
            '6' => Ok(Self::Noop),
            other => Err(WsError::InvalidMessage(format!(
                "unsupported engine.io packet type {other:?}"
            ))),
        }
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace.is_empty() || namespace == DEFAULT_NAMESPACE {
        String::new()
    } else {
        format!("{namespace},")
    }
}

fn decode_socket_packet(text: &str) -> Result<Packet, WsError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| WsError::InvalidMessage("empty socket.io packet".to_owned()))?;
    let (namespace, rest) = split_namespace(chars.as_str());
    let (ack, body) = split_ack_id(rest)?;

    match kind {
        '0' => Ok(Packet::Connect {
            namespace,
            data: parse_optional(body)?,
        }),
        '1' => Ok(Packet::Disconnect { namespace }),
        '2' => {
            let (name, data) = parse_event_body(body)?;
            Ok(Packet::Event {
                namespace,
                name,
                data,
                ack,
            })
        }
        '3' => {
            let id = ack.ok_or_else(|| WsError::InvalidMessage("ack without id".to_owned()))?;
            let data = match parse_optional(body)? {
                Some(Value::Array(mut args)) if args.len() == 1 => args.remove(0),
                Some(other) => other,
                None => Value::Null,
            };
            Ok(Packet::Ack {
                namespace,
                id,
                data,
            })
        }
        '4' => {
            let message = match parse_optional(body)? {
                Some(Value::Object(map)) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("connection refused")
                    .to_owned(),
                Some(Value::String(message)) => message,
                _ => "connection refused".to_owned(),
            };
            Ok(Packet::ConnectError { namespace, message })
        }
        '5' | '6' => Err(WsError::InvalidMessage(
            "binary packets are not supported".to_owned(),
        )),
        other => Err(WsError::InvalidMessage(format!(
            "unsupported socket.io packet type {other:?}"
        ))),
    }
}

fn split_namespace(text: &str) -> (String, &str) {
    if !text.starts_with('/') {
        return (DEFAULT_NAMESPACE.to_owned(), text);
    }

    match text.split_once(',') {
        Some((namespace, rest)) => (namespace.to_owned(), rest),
        None => (text.to_owned(), ""),
    }
}

fn split_ack_id(text: &str) -> Result<(Option<u64>, &str), WsError> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, rest) = text.split_at(end);

    if digits.is_empty() {
        return Ok((None, rest));
    }

    digits
        .parse()
        .map(|id| (Some(id), rest))
        .map_err(|e| WsError::InvalidMessage(format!("bad ack id {digits:?}: {e}")))
}

fn parse_optional(body: &str) -> Result<Option<Value>, WsError> {
    if body.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(body)
        .map(Some)
        .map_err(WsError::MessageParse)
}

/// `["name"]`, `["name", data]` or `["name", a, b, ...]` (extra args become an array).
fn parse_event_body(body: &str) -> Result<(String, Value), WsError> {
    let Some(Value::Array(mut args)) = parse_optional(body)? else {
        return Err(WsError::InvalidMessage(format!(
            "event payload is not an array: {body}"
        )));
    };

    if args.is_empty() {
        return Err(WsError::InvalidMessage("event without a name".to_owned()));
    }

    let Value::String(name) = args.remove(0) else {
        return Err(WsError::InvalidMessage(
            "event name is not a string".to_owned(),
        ));
    };

    let data = match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    };

    Ok((name, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_open_should_read_handshake() {
        let packet = Packet::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();

        let Packet::Open(handshake) = packet else {
            panic!("expected open packet, got {packet:?}");
        };
        assert_eq!(handshake.sid, "abc");
        assert_eq!(handshake.ping_deadline(), Duration::from_secs(45));
        assert_eq!(handshake.max_payload, Some(1_000_000));
    }

    #[test]
    fn decode_event_on_default_namespace() {
        let packet =
            Packet::decode(r#"42["command_result",{"success":true,"output":"hi"}]"#).unwrap();

        assert_eq!(
            packet,
            Packet::Event {
                namespace: "/".to_owned(),
                name: "command_result".to_owned(),
                data: json!({ "success": true, "output": "hi" }),
                ack: None,
            }
        );
    }

    #[test]
    fn decode_event_with_namespace_and_ack() {
        let packet = Packet::decode(r#"42/terminal,17["file_sync",{"refresh":true}]"#).unwrap();

        assert_eq!(
            packet,
            Packet::Event {
                namespace: "/terminal".to_owned(),
                name: "file_sync".to_owned(),
                data: json!({ "refresh": true }),
                ack: Some(17),
            }
        );
    }

    #[test]
    fn decode_event_with_extra_args_collects_them() {
        let Packet::Event { data, .. } = Packet::decode(r#"42["multi",1,2]"#).unwrap() else {
            panic!("expected event");
        };

        assert_eq!(data, json!([1, 2]));
    }

    #[test]
    fn decode_connect_error_reads_message() {
        let packet = Packet::decode(r#"44{"message":"Not authorized"}"#).unwrap();

        assert_eq!(
            packet,
            Packet::ConnectError {
                namespace: "/".to_owned(),
                message: "Not authorized".to_owned(),
            }
        );
    }

    #[test]
    fn decode_control_packets() {
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::decode("3").unwrap(), Packet::Pong);
        assert_eq!(Packet::decode("1").unwrap(), Packet::Close);
        assert_eq!(Packet::decode("6").unwrap(), Packet::Noop);
        assert_eq!(
            Packet::decode("41").unwrap(),
            Packet::Disconnect {
                namespace: "/".to_owned()
            }
        );
    }

    #[test]
    fn decode_rejects_binary_and_garbage() {
        Packet::decode(r#"451-["upload",{"_placeholder":true,"num":0}]"#).unwrap_err();
        Packet::decode("").unwrap_err();
        Packet::decode("9").unwrap_err();
        Packet::decode("42not json").unwrap_err();
        Packet::decode(r#"42{"not":"array"}"#).unwrap_err();
    }

    #[test]
    fn encode_event_matches_wire_format() {
        let packet = Packet::event("/", "bash_command", json!({ "command": "ls" }));
        assert_eq!(packet.encode(), r#"42["bash_command",{"command":"ls"}]"#);

        let packet = Packet::event("/terminal", "join_workspace", Value::Null);
        assert_eq!(packet.encode(), r#"42/terminal,["join_workspace"]"#);
    }

    #[test]
    fn encode_connect_and_disconnect() {
        let connect = Packet::Connect {
            namespace: "/".to_owned(),
            data: None,
        };
        assert_eq!(connect.encode(), "40");

        let disconnect = Packet::Disconnect {
            namespace: "/admin".to_owned(),
        };
        assert_eq!(disconnect.encode(), "41/admin,");
        assert_eq!(Packet::Pong.encode(), "3");
    }

    #[test]
    fn ack_round_trips_single_argument() {
        let ack = Packet::Ack {
            namespace: "/".to_owned(),
            id: 4,
            data: json!({ "ok": true }),
        };

        assert_eq!(ack.encode(), r#"434[{"ok":true}]"#);
        assert_eq!(Packet::decode(&ack.encode()).unwrap(), ack);
    }
}
