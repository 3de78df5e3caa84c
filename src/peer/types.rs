use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of a negotiation document
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// Opaque offer/answer document. The body is passed through unmodified.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub kind: SdpType,
    pub body: String,
}

impl Description {
    pub fn new(kind: SdpType, body: impl Into<String>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn offer(body: impl Into<String>) -> Self {
        Self::new(SdpType::Offer, body)
    }

    pub fn answer(body: impl Into<String>) -> Self {
        Self::new(SdpType::Answer, body)
    }
}

/// ICE candidate for the connection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl Candidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Description plus the frozen candidate set, exchanged out of band
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBundle {
    pub id: String,
    pub ts: i64,
    pub description: Description,
    pub candidates: Vec<Candidate>,
}

/// ICE server configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }
}

/// What the engine needs to open a session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub name: String,
    pub ice_servers: Vec<ServerConfig>,
}

/// One channel payload, text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Bytes,
    pub is_binary: bool,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: Bytes::from(text.into()),
            is_binary: false,
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            payload: data.into(),
            is_binary: true,
        }
    }
}
