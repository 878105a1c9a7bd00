use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::document::{Action, Attributes, ClientId, Operation};
use crate::{SyncError, SyncResult};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Join a document and request its current content
    #[serde(rename_all = "camelCase")]
    Connect {
        document_id: String,
        #[serde(default)]
        page_number: i64,
    },
    /// Apply one or more operations
    ///
    /// `revision` is the revision of the envelope's page the ops were computed
    /// against. When it is missing the ops are taken to be based on the latest
    /// revision. Ops on other pages carry their own `revision`.
    #[serde(rename_all = "camelCase")]
    Operation {
        document_id: String,
        #[serde(default)]
        page_number: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<u64>,
        ops: Vec<WireOp>,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Current content of every page (sent in response to Connect)
    #[serde(rename_all = "camelCase")]
    Initial {
        document_id: String,
        pages: Vec<PageSnapshot>,
    },
    /// Adjusted operations applied by another client
    #[serde(rename_all = "camelCase")]
    Operation {
        document_id: String,
        page_number: u32,
        revision: u64,
        ops: Vec<WireOp>,
    },
    /// Acknowledgment of the sender's own operation
    #[serde(rename_all = "camelCase")]
    Ack {
        document_id: String,
        page_number: u32,
        revision: u64,
    },
    /// Error message
    Error { message: String },
}

/// Content and revision of one page at the time of a join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub page_number: u32,
    pub content: String,
    pub revision: u64,
}

/// An operation as it travels on the wire
///
/// Numeric fields are signed so that malformed input can be clamped or
/// rejected here instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOp {
    pub action: Action,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
    /// Revision of this op's page it was computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl WireOp {
    /// Convert into an [`Operation`] owned by `origin`
    ///
    /// The op's own page number wins over the envelope's `default_page`.
    /// Negative positions and lengths clamp to zero; a page number outside
    /// `u32` is rejected.
    pub fn into_operation(self, default_page: i64, origin: ClientId) -> SyncResult<Operation> {
        let page = self.page_number.unwrap_or(default_page);
        let page_number = page_number(page)?;

        Ok(Operation {
            action: self.action,
            content: self.content,
            position: non_negative(self.position),
            length: non_negative(self.length),
            page_number,
            attributes: self.attributes,
            origin,
        })
    }

    /// Revision this op was computed against
    ///
    /// The op's own `revision` wins. The envelope's revision only describes
    /// the envelope's page, so an op that moves to another page without a
    /// revision of its own is rejected when the envelope carries one.
    pub fn base_revision(
        &self,
        default_page: i64,
        default_revision: Option<u64>,
    ) -> SyncResult<Option<u64>> {
        if self.revision.is_some() {
            return Ok(self.revision);
        }

        match (self.page_number, default_revision) {
            (Some(page), Some(_)) if page != default_page => Err(SyncError::InvalidOperation {
                message: format!("op on page {} needs its own revision", page),
            }),
            _ => Ok(default_revision),
        }
    }
}

impl From<&Operation> for WireOp {
    fn from(op: &Operation) -> Self {
        Self {
            action: op.action,
            content: op.content.clone(),
            position: op.position as i64,
            length: op.length as i64,
            page_number: Some(i64::from(op.page_number)),
            revision: None,
            attributes: op.attributes.clone(),
        }
    }
}

/// Validate a page number received from a client
pub fn page_number(raw: i64) -> SyncResult<u32> {
    u32::try_from(raw).map_err(|_| SyncError::InvalidOperation {
        message: format!("page number out of range: {}", raw),
    })
}

fn non_negative(value: i64) -> usize {
    if value < 0 {
        0
    } else {
        usize::try_from(value).unwrap_or(usize::MAX)
    }
}

/// How outbound messages are framed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Plain JSON in text frames
    #[default]
    Text,
    /// JSON wrapped in a lib0 string, in binary frames
    Binary,
}

/// A single transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Encode a message into a frame of the requested kind
pub fn encode_frame<T: Serialize>(message: &T, framing: Framing) -> SyncResult<Frame> {
    match framing {
        Framing::Text => Ok(Frame::Text(serde_json::to_string(message)?)),
        Framing::Binary => Ok(Frame::Binary(encode_message(message)?)),
    }
}

/// Decode a message from either kind of frame
pub fn decode_frame<T: DeserializeOwned>(frame: &Frame) -> SyncResult<T> {
    match frame {
        Frame::Text(text) => Ok(serde_json::from_str(text)?),
        Frame::Binary(data) => decode_message(data),
    }
}

/// Encode a message using lib0 format
pub fn encode_message<T: Serialize>(message: &T) -> SyncResult<Vec<u8>> {
    let json = serde_json::to_string(message)?;
    let mut encoder = Vec::new();
    lib0::encoding::Write::write_string(&mut encoder, &json);
    Ok(encoder)
}

/// Decode a message from lib0 format
pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> SyncResult<T> {
    let mut decoder = lib0::decoding::Cursor::new(data);
    let json = lib0::decoding::Read::read_string(&mut decoder).map_err(|e| SyncError::Protocol {
        message: format!("Failed to decode lib0 string: {}", e),
    })?;

    let message = serde_json::from_str(json)?;
    Ok(message)
}
