//! Response types, one per operation

use serde::{Deserialize, Serialize};

use crate::enums::{ActionType, AnnotationSubtype, PageRotation};
use crate::handles::{
    ActionRef, AnnotationRef, AttachmentRef, BookmarkRef, DestRef, DocumentRef, FormRef, LinkRef,
    PageRef, SearchRef, SignatureRef, StructTreeRef, TextPageRef,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDocument {
    pub document: DocumentRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseDocument {}

// --- document ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageCount {
    pub page_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileVersion {
    /// `14` for PDF 1.4; `None` when the file does not say
    pub version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDocPermissions {
    pub permissions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMetadata {
    pub tag: String,
    pub value: Option<String>,
}

// --- pages ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPage {
    pub index: i32,
    pub page: PageRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClosePage {}

/// Page size in points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageSize {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageRotation {
    pub rotation: PageRotation,
}

// --- text ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTextPage {
    pub text_page: TextPageRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseTextPage {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountChars {
    pub count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTextRange {
    pub text: String,
}

// --- search ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSearch {
    pub search: SearchRef,
}

/// A hit, in characters of the text page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub index: i32,
    pub count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNext {
    pub found: Option<SearchMatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseSearch {}

// --- bookmarks, destinations, actions ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFirstBookmark {
    pub bookmark: Option<BookmarkRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNextBookmark {
    pub bookmark: Option<BookmarkRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBookmarkTitle {
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBookmarkDest {
    pub dest: Option<DestRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBookmarkAction {
    pub action: Option<ActionRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDestPageIndex {
    pub index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetActionType {
    pub action_type: ActionType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetActionDest {
    pub dest: Option<DestRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetActionUri {
    pub uri: Option<String>,
}

// --- links ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageLinks {
    pub links: Vec<LinkRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLinkDest {
    pub dest: Option<DestRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLinkAction {
    pub action: Option<ActionRef>,
}

// --- annotations ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAnnotCount {
    pub count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAnnot {
    pub annotation: AnnotationRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAnnotSubtype {
    pub subtype: AnnotationSubtype,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseAnnot {}

// --- attachments ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttachmentCount {
    pub count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttachment {
    pub attachment: AttachmentRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttachmentName {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttachmentFile {
    #[serde(with = "crate::rpc::base64_bytes")]
    pub data: Vec<u8>,
}

// --- signatures ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignatureCount {
    pub count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignature {
    pub signature: SignatureRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignatureReason {
    pub reason: Option<String>,
}

// --- form fill environment ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitFormFillEnvironment {
    pub form: FormRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitFormFillEnvironment {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetFocusableAnnotSubtypes {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFocusableAnnotSubtypes {
    pub subtypes: Vec<AnnotationSubtype>,
}

// --- structure tree ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStructTree {
    pub struct_tree: StructTreeRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountStructTreeChildren {
    pub count: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseStructTree {}
