//! Document collaborator: display metadata for notifications
//!
//! The engine only holds an opaque `DocumentRef`. It asks the catalog
//! for a title when building notifications and never touches document
//! content or state.

use approval_types::DocumentRef;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Display metadata for a document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_ref: DocumentRef,
    pub title: String,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document service unreachable: {0}")]
    Unreachable(String),
}

/// Read-only lookup of document metadata
#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    async fn describe(&self, document: &DocumentRef)
        -> Result<Option<DocumentSummary>, DocumentError>;
}

/// In-memory catalog for development and testing
#[derive(Debug, Default)]
pub struct InMemoryDocumentCatalog {
    titles: RwLock<HashMap<DocumentRef, String>>,
}

impl InMemoryDocumentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, document: DocumentRef, title: impl Into<String>) {
        self.titles.write().insert(document, title.into());
    }
}

#[async_trait]
impl DocumentCatalog for InMemoryDocumentCatalog {
    async fn describe(
        &self,
        document: &DocumentRef,
    ) -> Result<Option<DocumentSummary>, DocumentError> {
        Ok(self
            .titles
            .read()
            .get(document)
            .map(|title| DocumentSummary {
                document_ref: document.clone(),
                title: title.clone(),
            }))
    }
}
