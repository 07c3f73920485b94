//! Request types, one per operation
//!
//! Every struct serializes as a JSON object, including the empty ones, so a
//! request always flattens cleanly next to its document token on the wire.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::enums::AnnotationSubtype;
use crate::handles::{
    ActionRef, AnnotationRef, AttachmentRef, BookmarkRef, DestRef, DocumentRef, FormRef, LinkRef,
    PageRef, SearchRef, SignatureRef, StructTreeRef, TextPageRef,
};

/// Where an opened document's bytes come from, once they can cross a process boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenSource {
    Bytes(#[serde(with = "crate::rpc::base64_bytes")] Vec<u8>),
    Path(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDocument {
    pub source: OpenSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseDocument {
    pub document: DocumentRef,
}

/// Which page an operation acts on
///
/// `Index` goes through the document's single resident page: asking for the
/// same index again reuses it, another index replaces it. `Reference` uses a
/// page loaded explicitly with [`LoadPage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSelector {
    Index(i32),
    Reference(PageRef),
}

impl From<i32> for PageSelector {
    fn from(index: i32) -> Self {
        PageSelector::Index(index)
    }
}

impl From<PageRef> for PageSelector {
    fn from(page: PageRef) -> Self {
        PageSelector::Reference(page)
    }
}

impl From<&PageRef> for PageSelector {
    fn from(page: &PageRef) -> Self {
        PageSelector::Reference(page.clone())
    }
}

// --- document ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetPageCount {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetFileVersion {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDocPermissions {}

/// Look up an info dictionary entry such as `Title` or `Author`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMetadata {
    pub tag: String,
}

// --- pages ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPage {
    pub index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePage {
    pub page: PageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageSize {
    pub page: PageSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageRotation {
    pub page: PageSelector,
}

// --- text ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTextPage {
    pub page: PageSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseTextPage {
    pub text_page: TextPageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountChars {
    pub text_page: TextPageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTextRange {
    pub text_page: TextPageRef,
    pub start: i32,
    pub count: i32,
}

// --- search ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSearch {
    pub text_page: TextPageRef,
    pub query: String,
    #[serde(default)]
    pub match_case: bool,
    #[serde(default)]
    pub match_whole_word: bool,
    #[serde(default)]
    pub start_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNext {
    pub search: SearchRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSearch {
    pub search: SearchRef,
}

// --- bookmarks, destinations, actions ---

/// First child of `parent`, or the first top-level bookmark
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetFirstBookmark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<BookmarkRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNextBookmark {
    pub bookmark: BookmarkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBookmarkTitle {
    pub bookmark: BookmarkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBookmarkDest {
    pub bookmark: BookmarkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBookmarkAction {
    pub bookmark: BookmarkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDestPageIndex {
    pub dest: DestRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetActionType {
    pub action: ActionRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetActionDest {
    pub action: ActionRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetActionUri {
    pub action: ActionRef,
}

// --- links ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageLinks {
    pub page: PageSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLinkDest {
    pub link: LinkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLinkAction {
    pub link: LinkRef,
}

// --- annotations ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAnnotCount {
    pub page: PageSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAnnot {
    pub page: PageSelector,
    pub index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAnnotSubtype {
    pub annotation: AnnotationRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseAnnot {
    pub annotation: AnnotationRef,
}

// --- attachments ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetAttachmentCount {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttachment {
    pub index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttachmentName {
    pub attachment: AttachmentRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttachmentFile {
    pub attachment: AttachmentRef,
}

// --- signatures ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetSignatureCount {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignature {
    pub index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignatureReason {
    pub signature: SignatureRef,
}

// --- form fill environment ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitFormFillEnvironment {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitFormFillEnvironment {
    pub form: FormRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetFocusableAnnotSubtypes {
    pub form: FormRef,
    pub subtypes: Vec<AnnotationSubtype>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFocusableAnnotSubtypes {
    pub form: FormRef,
}

// --- structure tree ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStructTree {
    pub page: PageSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountStructTreeChildren {
    pub struct_tree: StructTreeRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseStructTree {
    pub struct_tree: StructTreeRef,
}
