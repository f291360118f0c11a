//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Every WebSocket text frame is one Engine.IO packet: a single type digit
//! followed by an optional payload. Message packets (`4`) carry one Socket.IO
//! packet, which has its own type digit, an optional namespace, an optional
//! ack id and a JSON body:
//!
//! ```text
//! 42["task:created",{"_id":"t2"}]
//! │└─ socket packet type (2 = event)
//! └── engine packet type (4 = message)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SyncError;

/// Namespace used when a packet carries none.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Handshake data carried by the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// One Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, SyncError> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| SyncError::MalformedPacket("empty engine frame".to_string()))?;
        let body = chars.as_str();

        match kind {
            '0' => serde_json::from_str::<OpenInfo>(body)
                .map(EnginePacket::Open)
                .map_err(|e| SyncError::MalformedPacket(format!("bad open packet: {}", e))),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(SyncError::MalformedPacket(format!(
                "unknown engine packet type '{}'",
                other
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(info) => {
                // OpenInfo only holds strings and integers; serialization cannot fail.
                format!("0{}", serde_json::to_string(info).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(body) => format!("4{}", body),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// One Socket.IO packet, carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Value,
    },
}

impl SocketPacket {
    /// Connect request for the default namespace.
    pub fn connect() -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    /// Event on the default namespace with a single argument.
    pub fn event(name: &str, payload: Value) -> Self {
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn is_default_namespace(&self) -> bool {
        self.namespace() == DEFAULT_NAMESPACE
    }

    pub fn decode(body: &str) -> Result<Self, SyncError> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .ok_or_else(|| SyncError::MalformedPacket("empty socket packet".to_string()))?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(SyncError::MalformedPacket(
                "binary socket packets are not supported".to_string(),
            ));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let id = if digits > 0 {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|e| SyncError::MalformedPacket(format!("bad ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(parsed)
        } else {
            None
        };

        let json = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|e| SyncError::MalformedPacket(format!("bad packet body: {}", e)))?,
            )
        };

        match kind {
            '0' => Ok(SocketPacket::Connect {
                namespace,
                data: json,
            }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let (name, args) = split_event_array(json)?;
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => {
                let id = id.ok_or_else(|| {
                    SyncError::MalformedPacket("ack packet without id".to_string())
                })?;
                let args = match json {
                    Some(Value::Array(args)) => args,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                Ok(SocketPacket::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            '4' => Ok(SocketPacket::ConnectError {
                namespace,
                data: json.unwrap_or(Value::Null),
            }),
            other => Err(SyncError::MalformedPacket(format!(
                "unknown socket packet type '{}'",
                other
            ))),
        }
    }

    pub fn encode(&self) -> String {
        let (kind, namespace, id, body) = match self {
            SocketPacket::Connect { namespace, data } => ('0', namespace, None, data.clone()),
            SocketPacket::Disconnect { namespace } => ('1', namespace, None, None),
            SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                ('2', namespace, *id, Some(Value::Array(items)))
            }
            SocketPacket::Ack {
                namespace,
                id,
                args,
            } => ('3', namespace, Some(*id), Some(Value::Array(args.clone()))),
            SocketPacket::ConnectError { namespace, data } => {
                ('4', namespace, None, Some(data.clone()))
            }
        };

        let mut out = String::new();
        out.push(kind);
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(body) = body {
            out.push_str(&body.to_string());
        }
        out
    }
}

fn split_event_array(json: Option<Value>) -> Result<(String, Vec<Value>), SyncError> {
    let Some(Value::Array(mut items)) = json else {
        return Err(SyncError::MalformedPacket(
            "event packet body must be an array".to_string(),
        ));
    };
    if items.is_empty() {
        return Err(SyncError::MalformedPacket("event packet without name".to_string()));
    }
    match items.remove(0) {
        Value::String(name) => Ok((name, items)),
        other => Err(SyncError::MalformedPacket(format!(
            "event name must be a string, got {}",
            other
        ))),
    }
}

/// Full WebSocket frame for an event on the default namespace.
pub fn event_frame(name: &str, payload: Value) -> String {
    EnginePacket::Message(SocketPacket::event(name, payload).encode()).encode()
}

/// Full WebSocket frame requesting a connection to the default namespace.
pub fn connect_frame() -> String {
    EnginePacket::Message(SocketPacket::connect().encode()).encode()
}

/// Socket.IO endpoint for an http(s) or ws(s) base URL.
///
/// `http://localhost:5000` becomes
/// `ws://localhost:5000/socket.io/?EIO=4&transport=websocket`.
pub fn endpoint_url(base: &str) -> Result<String, SyncError> {
    let base = base.trim().trim_end_matches('/');
    let rest = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(SyncError::InvalidEndpoint(base.to_string()));
    };
    Ok(format!("{}/socket.io/?EIO=4&transport=websocket", rest))
}
