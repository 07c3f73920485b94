//! Typed handle references
//!
//! Every reference is a UUID string on the wire. The Rust type carries the
//! kind, so a [`PageRef`] can never be passed where a [`SearchRef`] is
//! expected; the handle table still checks the kind at resolve time because
//! tokens arrive from the other side of a process boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of native resource behind a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Page,
    TextPage,
    Search,
    Bookmark,
    Dest,
    Action,
    Link,
    Annotation,
    Attachment,
    Signature,
    Form,
    StructTree,
}

impl HandleKind {
    /// Child kinds in the order they are closed when their document goes away
    ///
    /// Kinds that depend on a page come before pages. The last five have no
    /// native close call and are only forgotten.
    pub const CLOSE_ORDER: [HandleKind; 12] = [
        HandleKind::Search,
        HandleKind::TextPage,
        HandleKind::Annotation,
        HandleKind::StructTree,
        HandleKind::Form,
        HandleKind::Page,
        HandleKind::Bookmark,
        HandleKind::Dest,
        HandleKind::Action,
        HandleKind::Link,
        HandleKind::Attachment,
        HandleKind::Signature,
    ];

    /// Whether the engine needs an explicit close call for this kind
    pub fn needs_close(self) -> bool {
        matches!(
            self,
            HandleKind::Search
                | HandleKind::TextPage
                | HandleKind::Annotation
                | HandleKind::StructTree
                | HandleKind::Form
                | HandleKind::Page
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HandleKind::Page => "page",
            HandleKind::TextPage => "text page",
            HandleKind::Search => "search",
            HandleKind::Bookmark => "bookmark",
            HandleKind::Dest => "destination",
            HandleKind::Action => "action",
            HandleKind::Link => "link",
            HandleKind::Annotation => "annotation",
            HandleKind::Attachment => "attachment",
            HandleKind::Signature => "signature",
            HandleKind::Form => "form",
            HandleKind::StructTree => "structure tree",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed token for a child resource of a document
pub trait Reference: Clone + fmt::Debug + Send + 'static {
    const KIND: HandleKind;

    fn from_token(token: String) -> Self;
    fn token(&self) -> &str;
}

macro_rules! references {
    ($($(#[$meta:meta])* $name:ident => $kind:ident;)+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(String);

            impl Reference for $name {
                const KIND: HandleKind = HandleKind::$kind;

                fn from_token(token: String) -> Self {
                    Self(token)
                }

                fn token(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )+
    };
}

references! {
    /// A page loaded with `LoadPage`
    PageRef => Page;
    TextPageRef => TextPage;
    /// An in-progress text search
    SearchRef => Search;
    BookmarkRef => Bookmark;
    DestRef => Dest;
    ActionRef => Action;
    LinkRef => Link;
    AnnotationRef => Annotation;
    AttachmentRef => Attachment;
    SignatureRef => Signature;
    /// A form fill environment
    FormRef => Form;
    StructTreeRef => StructTree;
}

/// Token of an open document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentRef(String);

impl DocumentRef {
    pub(crate) fn new(token: String) -> Self {
        Self(token)
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
