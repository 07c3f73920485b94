//! RPC bridge between a host and a worker process
//!
//! Newline-delimited JSON over a local TCP connection. A connection starts
//! with a [`protocol::Handshake`]; nothing is dispatched until the server has
//! accepted it. After that every frame is one request and one reply.
//!
//! ```text
//! host                                   worker
//!  │  {"protocol_version":1,"magic_cookie":…}  │
//!  │ ─────────────────────────────────────────▶│
//!  │  {"status":"accepted","engine":"memory"}  │
//!  │ ◀─────────────────────────────────────────│
//!  │  {"id":1,"call":{"method":"Ping"}}        │
//!  │ ─────────────────────────────────────────▶│
//!  │  {"id":1,"outcome":{"Ok":{…}}}            │
//!  │ ◀─────────────────────────────────────────│
//! ```

pub mod client;
pub mod codec;
pub mod protocol;
pub mod server;

pub use client::RpcClient;
pub use protocol::{Operation, Request, Response};

/// Invoke `$callback!` with every document operation as `Name => method,`
///
/// The list drives the wire enums, server dispatch and the typed methods on
/// [`crate::Document`], so adding an operation here and to [`crate::Instance`]
/// is all it takes to expose it.
macro_rules! for_each_operation {
    ($callback:ident) => {
        $callback! {
            GetPageCount => get_page_count,
            GetFileVersion => get_file_version,
            GetDocPermissions => get_doc_permissions,
            GetMetadata => get_metadata,
            LoadPage => load_page,
            ClosePage => close_page,
            GetPageSize => get_page_size,
            GetPageRotation => get_page_rotation,
            LoadTextPage => load_text_page,
            CloseTextPage => close_text_page,
            CountChars => count_chars,
            GetTextRange => get_text_range,
            StartSearch => start_search,
            FindNext => find_next,
            CloseSearch => close_search,
            GetFirstBookmark => get_first_bookmark,
            GetNextBookmark => get_next_bookmark,
            GetBookmarkTitle => get_bookmark_title,
            GetBookmarkDest => get_bookmark_dest,
            GetBookmarkAction => get_bookmark_action,
            GetDestPageIndex => get_dest_page_index,
            GetActionType => get_action_type,
            GetActionDest => get_action_dest,
            GetActionUri => get_action_uri,
            GetPageLinks => get_page_links,
            GetLinkDest => get_link_dest,
            GetLinkAction => get_link_action,
            GetAnnotCount => get_annot_count,
            GetAnnot => get_annot,
            GetAnnotSubtype => get_annot_subtype,
            CloseAnnot => close_annot,
            GetAttachmentCount => get_attachment_count,
            GetAttachment => get_attachment,
            GetAttachmentName => get_attachment_name,
            GetAttachmentFile => get_attachment_file,
            GetSignatureCount => get_signature_count,
            GetSignature => get_signature,
            GetSignatureReason => get_signature_reason,
            InitFormFillEnvironment => init_form_fill_environment,
            ExitFormFillEnvironment => exit_form_fill_environment,
            SetFocusableAnnotSubtypes => set_focusable_annot_subtypes,
            GetFocusableAnnotSubtypes => get_focusable_annot_subtypes,
            GetStructTree => get_struct_tree,
            CountStructTreeChildren => count_struct_tree_children,
            CloseStructTree => close_struct_tree,
        }
    };
}

pub(crate) use for_each_operation;

/// Serde adapter: bytes as a base64 string
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
