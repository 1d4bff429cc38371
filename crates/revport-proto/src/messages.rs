//! Protocol message types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tunnel protocol requested by the client.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// HTTP-mode tunnels are routed by subdomain rather than by port.
    pub fn is_http(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown protocol: {0} (expected tcp, http or https)")]
pub struct ProtocolParseError(String);

impl FromStr for Protocol {
    type Err = ProtocolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(ProtocolParseError(other.to_string())),
        }
    }
}

/// Parameters of a tunnel request, encoded as query parameters on the
/// control-channel upgrade. Immutable for the lifetime of the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TunnelRequest {
    #[serde(default)]
    pub protocol: Protocol,
    /// Requested subdomain (HTTP mode only). Auto-generated when absent.
    #[serde(default)]
    pub subdomain: Option<String>,
    /// Requested public port (TCP mode only). Auto-allocated when absent
    /// or zero.
    #[serde(default)]
    pub port: Option<u16>,
    /// Opaque string passed through to the relay's hook scripts.
    #[serde(default)]
    pub data: Option<String>,
}

/// A message on the control channel.
///
/// One control channel carries an unbounded ordered sequence of these as
/// JSON text frames. Tags the relay does not know yet deserialize to
/// [`ControlMessage::Unknown`] so old peers tolerate new message types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Relay asks the client to reverse-dial a fresh connection tagged
    /// with `key`.
    NewConnection { key: String },
    /// Informational text surfaced to the operator.
    Message { body: String },
    /// The public address of the tunnel, `host:port` for TCP or a full
    /// hostname for HTTP.
    RemoteAddress { body: String },
    /// Keepalive, ignored by the receiver.
    Idle,
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message_json_shape() {
        let msg = ControlMessage::NewConnection {
            key: "s1:42".to_string(),
        };
        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"{"type":"new_connection","key":"s1:42"}"#);
        assert_eq!(ControlMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_idle_round_trip() {
        let json = ControlMessage::Idle.to_json().unwrap();
        assert_eq!(json, r#"{"type":"idle"}"#);
        assert_eq!(
            ControlMessage::from_json(&json).unwrap(),
            ControlMessage::Idle
        );
    }

    #[test]
    fn test_unknown_tag_is_tolerated() {
        let msg = ControlMessage::from_json(r#"{"type":"shiny_new_thing","key":"x"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Unknown);
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("https".parse::<Protocol>().unwrap(), Protocol::Https);
        assert!("quic".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_request_query_defaults() {
        // The relay deserializes the request from /ws query parameters.
        let req: TunnelRequest = serde_urlencoded_like("protocol=tcp&port=9000");
        assert_eq!(req.protocol, Protocol::Tcp);
        assert_eq!(req.port, Some(9000));
        assert_eq!(req.subdomain, None);

        let req: TunnelRequest = serde_urlencoded_like("");
        assert_eq!(req.protocol, Protocol::Http);
    }

    fn serde_urlencoded_like(query: &str) -> TunnelRequest {
        // JSON stands in for the query-string deserializer here; field
        // defaults behave identically under both.
        let mut map = serde_json::Map::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap();
            let value = match k {
                "port" => serde_json::json!(v.parse::<u16>().unwrap()),
                _ => serde_json::json!(v),
            };
            map.insert(k.to_string(), value);
        }
        serde_json::from_value(serde_json::Value::Object(map)).unwrap()
    }
}
