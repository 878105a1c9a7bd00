use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// Identifier of a connected client
pub type ClientId = Uuid;

/// Opaque formatting attributes carried alongside an operation
pub type Attributes = Map<String, JsonValue>;

/// Kind of edit an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Insert,
    Delete,
}

/// An insert or delete intent at a character offset within one page
///
/// Positions and lengths count `char`s, not bytes. `content` is only meaningful
/// for inserts and `length` only for deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub action: Action,
    pub content: String,
    pub position: usize,
    pub length: usize,
    pub page_number: u32,
    pub attributes: Attributes,
    pub origin: ClientId,
}

impl Operation {
    /// Insert `content` at `position` on `page_number`
    pub fn insert(page_number: u32, position: usize, content: impl Into<String>) -> Self {
        Self {
            action: Action::Insert,
            content: content.into(),
            position,
            length: 0,
            page_number,
            attributes: Attributes::new(),
            origin: Uuid::nil(),
        }
    }

    /// Delete `length` characters starting at `position` on `page_number`
    pub fn delete(page_number: u32, position: usize, length: usize) -> Self {
        Self {
            action: Action::Delete,
            content: String::new(),
            position,
            length,
            page_number,
            attributes: Attributes::new(),
            origin: Uuid::nil(),
        }
    }

    pub fn with_origin(mut self, origin: ClientId) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Number of characters this operation inserts (zero for deletes)
    pub fn inserted_len(&self) -> usize {
        match self.action {
            Action::Insert => self.content.chars().count(),
            Action::Delete => 0,
        }
    }

    /// Whether applying this operation leaves the page content unchanged
    pub fn is_noop(&self) -> bool {
        match self.action {
            Action::Insert => self.content.is_empty(),
            Action::Delete => self.length == 0,
        }
    }
}
