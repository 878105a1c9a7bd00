use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use super::DocumentSession;

/// Thread-safe lookup of document sessions by ID
///
/// The registry is the entry point for document management. Build one at
/// startup and share it with every connection; sessions are created on first
/// reference and live for the rest of the process.
pub struct DocumentRegistry {
    sessions: DashMap<String, Arc<DocumentSession>>,
}

impl DocumentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Get the session for a document, creating it on first use
    ///
    /// Concurrent callers asking for the same new ID all receive the same
    /// session: the check and the insert happen under one shard lock.
    pub fn get_or_create(&self, document_id: &str) -> Arc<DocumentSession> {
        if let Some(session) = self.get(document_id) {
            return session;
        }

        self.sessions
            .entry(document_id.to_string())
            .or_insert_with(|| {
                info!("Creating new document session: {}", document_id);
                Arc::new(DocumentSession::new(document_id))
            })
            .clone()
    }

    /// Get an existing session by document ID
    pub fn get(&self, document_id: &str) -> Option<Arc<DocumentSession>> {
        self.sessions
            .get(document_id)
            .map(|entry| entry.value().clone())
    }

    /// List all document IDs
    pub fn list_documents(&self) -> Vec<String> {
        self.sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Get the number of documents
    pub fn document_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
