//! Opaque handle table
//!
//! Native pointers never leave the instance that owns them. Everything a
//! caller holds is a random token; this module maps tokens back to pointers.
//!
//! # Layout
//!
//! ```text
//! HandleTable
//! ├── documents: DocumentRef → DocumentHandle
//! │                            ├── native, retained bytes
//! │                            ├── current page (at most one)
//! │                            └── children: kind → token → NativePtr
//! └── owners:    token → (kind, DocumentRef)
//! ```
//!
//! The global owner index lets a lookup reject a token that belongs to
//! another document, or to another kind, before touching the per-document
//! table. Both tables are always updated together.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::engine::NativePtr;
use crate::error::{Error, Result};

pub mod references;

pub use references::*;

/// The page currently resident for index-based page access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedPage {
    pub index: i32,
    pub native: NativePtr,
}

/// An open document and the children registered under it
#[derive(Debug)]
pub struct DocumentHandle {
    native: NativePtr,
    /// Source bytes; must outlive `native`
    data: Option<Arc<[u8]>>,
    pub(crate) current_page: Option<LoadedPage>,
    children: HashMap<HandleKind, HashMap<String, NativePtr>>,
}

impl DocumentHandle {
    pub fn native(&self) -> NativePtr {
        self.native
    }

    pub fn current_page(&self) -> Option<LoadedPage> {
        self.current_page
    }

    /// Number of live children of one kind
    pub fn child_count(&self, kind: HandleKind) -> usize {
        self.children.get(&kind).map(|m| m.len()).unwrap_or(0)
    }

    /// Whether any child of `kind` points at `native`
    pub fn contains_native(&self, kind: HandleKind, native: NativePtr) -> bool {
        self.children
            .get(&kind)
            .map(|m| m.values().any(|p| *p == native))
            .unwrap_or(false)
    }
}

/// What the instance must close after a document leaves the table
#[derive(Debug)]
pub struct ReleasedDocument {
    pub native: NativePtr,
    pub current_page: Option<NativePtr>,
    /// Children in close order; see [`HandleKind::CLOSE_ORDER`]
    pub children: Vec<(HandleKind, NativePtr)>,
    pub data: Option<Arc<[u8]>>,
}

/// Token → native pointer tables for one instance
#[derive(Debug, Default)]
pub struct HandleTable {
    documents: HashMap<DocumentRef, DocumentHandle>,
    owners: HashMap<String, (HandleKind, DocumentRef)>,
}

fn new_token() -> String {
    Uuid::new_v4().to_string()
}

fn not_found(kind: &str, token: &str) -> Error {
    Error::HandleNotFound(format!("{} {} not found", kind, token))
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly loaded document
    pub fn insert_document(&mut self, native: NativePtr, data: Option<Vec<u8>>) -> DocumentRef {
        let document = DocumentRef::new(new_token());
        self.documents.insert(
            document.clone(),
            DocumentHandle {
                native,
                data: data.map(Arc::from),
                current_page: None,
                children: HashMap::new(),
            },
        );
        tracing::debug!(document = %document, "Registered document");
        document
    }

    pub fn document(&self, document: &DocumentRef) -> Result<&DocumentHandle> {
        self.documents
            .get(document)
            .ok_or_else(|| not_found("document", document.token()))
    }

    pub fn document_mut(&mut self, document: &DocumentRef) -> Result<&mut DocumentHandle> {
        self.documents
            .get_mut(document)
            .ok_or_else(|| not_found("document", document.token()))
    }

    pub fn document_refs(&self) -> Vec<DocumentRef> {
        self.documents.keys().cloned().collect()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Total live child tokens across all documents
    pub fn child_count(&self) -> usize {
        self.owners.len()
    }

    /// Issue a new token for `native` under `document`
    pub fn register<R: Reference>(&mut self, document: &DocumentRef, native: NativePtr) -> Result<R> {
        let handle = self.document_mut(document)?;
        let token = new_token();
        handle
            .children
            .entry(R::KIND)
            .or_default()
            .insert(token.clone(), native);
        self.owners.insert(token.clone(), (R::KIND, document.clone()));
        Ok(R::from_token(token))
    }

    /// Map a token back to its pointer
    ///
    /// Unknown tokens, tokens of another kind and tokens owned by another
    /// document all fail with [`Error::HandleNotFound`].
    pub fn resolve<R: Reference>(&self, document: &DocumentRef, reference: &R) -> Result<NativePtr> {
        let token = reference.token();
        match self.owners.get(token) {
            Some((kind, owner)) if *kind == R::KIND && owner == document => {}
            _ => return Err(not_found(R::KIND.as_str(), token)),
        }
        self.document(document)?
            .children
            .get(&R::KIND)
            .and_then(|m| m.get(token))
            .copied()
            .ok_or_else(|| not_found(R::KIND.as_str(), token))
    }

    /// Drop a token from both tables and hand back its pointer
    pub fn release<R: Reference>(&mut self, document: &DocumentRef, reference: &R) -> Result<NativePtr> {
        let native = self.resolve(document, reference)?;
        let token = reference.token();
        self.owners.remove(token);
        if let Some(map) = self
            .documents
            .get_mut(document)
            .and_then(|h| h.children.get_mut(&R::KIND))
        {
            map.remove(token);
        }
        Ok(native)
    }

    /// Remove a document and every child registered under it
    pub fn remove_document(&mut self, document: &DocumentRef) -> Result<ReleasedDocument> {
        let mut handle = self
            .documents
            .remove(document)
            .ok_or_else(|| not_found("document", document.token()))?;

        let mut children = Vec::new();
        for kind in HandleKind::CLOSE_ORDER {
            if let Some(map) = handle.children.remove(&kind) {
                for (token, native) in map {
                    self.owners.remove(&token);
                    children.push((kind, native));
                }
            }
        }

        let current_page = handle.current_page.take().map(|p| p.native);
        tracing::debug!(
            document = %document,
            children = children.len(),
            "Released document"
        );

        Ok(ReleasedDocument {
            native: handle.native,
            current_page,
            children,
            data: handle.data,
        })
    }
}
