//! Native engine seam
//!
//! The engine is modelled the way its C API looks: opaque pointers, a
//! last-error code after a failed load, and explicit close calls for the
//! resources that need them. Nothing above [`crate::instance`] ever sees a
//! [`NativePtr`]; callers only get tokens from the handle table.
//!
//! # Threading
//!
//! Engines are **not** reentrant. An [`Engine`] value is only ever touched by
//! the instance that owns it, under that instance's mutex. `Send` is required
//! so the owning instance can be moved to the thread that serves it.
//!
//! # Backends
//!
//! - [`memory::MemoryEngine`]: complete call surface over a serialized
//!   document description. No native library needed.
//! - `mupdf::MupdfEngine` (feature `mupdf`): documents, pages, metadata,
//!   outlines, text and search through MuPDF.

use std::fmt;
use std::path::Path;

use thiserror::Error;

pub mod memory;
#[cfg(feature = "mupdf")]
pub mod mupdf;

/// Last-error codes reported by a failed document load
pub mod codes {
    pub const ERR_SUCCESS: u32 = 0;
    pub const ERR_UNKNOWN: u32 = 1;
    pub const ERR_FILE: u32 = 2;
    pub const ERR_FORMAT: u32 = 3;
    pub const ERR_PASSWORD: u32 = 4;
    pub const ERR_SECURITY: u32 = 5;
    pub const ERR_PAGE: u32 = 6;
}

/// Search flags understood by [`Engine::find_start`]
pub mod search_flags {
    pub const MATCH_CASE: u32 = 0x1;
    pub const MATCH_WHOLE_WORD: u32 = 0x2;
}

/// Opaque native resource pointer
///
/// Only meaningful to the engine that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativePtr(pub(crate) u64);

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr({:#x})", self.0)
    }
}

/// Failure of a single native call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Raw engine error code (classified by the instance)
    #[error("engine error code {0}")]
    Code(u32),

    /// The backend does not implement this part of the call surface
    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),

    /// A pointer the engine does not know (double close, foreign pointer)
    #[error("invalid native pointer {0:?}")]
    InvalidPointer(NativePtr),

    /// Any other failure reported by the engine
    #[error("{0}")]
    Failed(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Position of the first match of `query` in `chars` at or after `from`
pub(crate) fn next_match(chars: &[char], query: &[char], flags: u32, from: usize) -> Option<usize> {
    let match_case = flags & search_flags::MATCH_CASE != 0;
    let whole_word = flags & search_flags::MATCH_WHOLE_WORD != 0;
    let eq = |a: char, b: char| {
        if match_case {
            a == b
        } else {
            a.to_lowercase().eq(b.to_lowercase())
        }
    };

    let len = query.len();
    if len == 0 {
        return None;
    }
    (from..=chars.len().saturating_sub(len))
        .filter(|&pos| pos + len <= chars.len())
        .find(|&pos| {
            let hit = chars[pos..pos + len]
                .iter()
                .zip(query.iter())
                .all(|(a, b)| eq(*a, *b));
            let bounded = !whole_word
                || ((pos == 0 || !chars[pos - 1].is_alphanumeric())
                    && (pos + len == chars.len() || !chars[pos + len].is_alphanumeric()));
            hit && bounded
        })
}

/// Process-wide library lifecycle
///
/// Called by [`crate::instance::LibraryGuard`] only: `init` when the first
/// instance of the process appears, `destroy` when the last one goes away.
pub trait NativeLibrary: 'static {
    fn init_library();
    fn destroy_library();
}

/// The native call surface
///
/// Methods with a default body are optional capabilities; backends that lack
/// them report [`EngineError::Unsupported`].
pub trait Engine: NativeLibrary + Send + Sized {
    /// Short backend name, reported in the RPC handshake
    const NAME: &'static str;

    fn create() -> Self;

    /// Error code of the last failed load
    fn last_error(&self) -> u32;

    // --- documents ---

    fn load_mem_document(&mut self, data: &[u8], password: Option<&str>) -> Option<NativePtr>;
    fn load_document(&mut self, path: &Path, password: Option<&str>) -> Option<NativePtr>;
    fn close_document(&mut self, document: NativePtr) -> EngineResult<()>;
    fn page_count(&mut self, document: NativePtr) -> EngineResult<i32>;
    fn metadata(&mut self, document: NativePtr, tag: &str) -> EngineResult<Option<String>>;

    fn file_version(&mut self, _document: NativePtr) -> EngineResult<Option<i32>> {
        Err(EngineError::Unsupported("file version"))
    }

    fn doc_permissions(&mut self, _document: NativePtr) -> EngineResult<u32> {
        Err(EngineError::Unsupported("document permissions"))
    }

    // --- pages ---

    /// Load a page; an out-of-range index fails with `Code(ERR_PAGE)`
    fn load_page(&mut self, document: NativePtr, index: i32) -> EngineResult<NativePtr>;
    fn close_page(&mut self, page: NativePtr) -> EngineResult<()>;
    fn page_size(&mut self, page: NativePtr) -> EngineResult<(f32, f32)>;

    fn page_rotation(&mut self, _page: NativePtr) -> EngineResult<i32> {
        Err(EngineError::Unsupported("page rotation"))
    }

    // --- text ---

    fn load_text_page(&mut self, page: NativePtr) -> EngineResult<NativePtr>;
    fn close_text_page(&mut self, text_page: NativePtr) -> EngineResult<()>;
    fn text_count_chars(&mut self, text_page: NativePtr) -> EngineResult<i32>;
    fn text_range(&mut self, text_page: NativePtr, start: i32, count: i32) -> EngineResult<String>;

    // --- search ---

    fn find_start(
        &mut self,
        text_page: NativePtr,
        query: &str,
        flags: u32,
        start_index: i32,
    ) -> EngineResult<NativePtr>;

    /// Next match as `(char index, char count)`
    fn find_next(&mut self, search: NativePtr) -> EngineResult<Option<(i32, i32)>>;
    fn find_close(&mut self, search: NativePtr) -> EngineResult<()>;

    // --- bookmarks, destinations, actions ---

    fn bookmark_first_child(
        &mut self,
        document: NativePtr,
        parent: Option<NativePtr>,
    ) -> EngineResult<Option<NativePtr>>;
    fn bookmark_next_sibling(
        &mut self,
        document: NativePtr,
        bookmark: NativePtr,
    ) -> EngineResult<Option<NativePtr>>;
    fn bookmark_title(&mut self, bookmark: NativePtr) -> EngineResult<String>;
    fn bookmark_dest(
        &mut self,
        document: NativePtr,
        bookmark: NativePtr,
    ) -> EngineResult<Option<NativePtr>>;

    fn bookmark_action(&mut self, _bookmark: NativePtr) -> EngineResult<Option<NativePtr>> {
        Err(EngineError::Unsupported("bookmark actions"))
    }

    fn dest_page_index(&mut self, document: NativePtr, dest: NativePtr) -> EngineResult<i32>;

    fn action_type(&mut self, _action: NativePtr) -> EngineResult<u32> {
        Err(EngineError::Unsupported("actions"))
    }

    fn action_dest(
        &mut self,
        _document: NativePtr,
        _action: NativePtr,
    ) -> EngineResult<Option<NativePtr>> {
        Err(EngineError::Unsupported("actions"))
    }

    fn action_uri(&mut self, _document: NativePtr, _action: NativePtr) -> EngineResult<Option<String>> {
        Err(EngineError::Unsupported("actions"))
    }

    // --- links ---

    /// Link enumeration: returns the link at or after `start_pos` and the next position
    fn link_enumerate(
        &mut self,
        _page: NativePtr,
        _start_pos: i32,
    ) -> EngineResult<Option<(i32, NativePtr)>> {
        Err(EngineError::Unsupported("links"))
    }

    fn link_dest(&mut self, _document: NativePtr, _link: NativePtr) -> EngineResult<Option<NativePtr>> {
        Err(EngineError::Unsupported("links"))
    }

    fn link_action(&mut self, _link: NativePtr) -> EngineResult<Option<NativePtr>> {
        Err(EngineError::Unsupported("links"))
    }

    // --- annotations ---

    fn annot_count(&mut self, _page: NativePtr) -> EngineResult<i32> {
        Err(EngineError::Unsupported("annotations"))
    }

    fn annot(&mut self, _page: NativePtr, _index: i32) -> EngineResult<NativePtr> {
        Err(EngineError::Unsupported("annotations"))
    }

    fn annot_subtype(&mut self, _annot: NativePtr) -> EngineResult<u32> {
        Err(EngineError::Unsupported("annotations"))
    }

    fn close_annot(&mut self, _annot: NativePtr) -> EngineResult<()> {
        Err(EngineError::Unsupported("annotations"))
    }

    // --- attachments ---

    fn attachment_count(&mut self, _document: NativePtr) -> EngineResult<i32> {
        Err(EngineError::Unsupported("attachments"))
    }

    fn attachment(&mut self, _document: NativePtr, _index: i32) -> EngineResult<NativePtr> {
        Err(EngineError::Unsupported("attachments"))
    }

    fn attachment_name(&mut self, _attachment: NativePtr) -> EngineResult<String> {
        Err(EngineError::Unsupported("attachments"))
    }

    fn attachment_file(&mut self, _attachment: NativePtr) -> EngineResult<Vec<u8>> {
        Err(EngineError::Unsupported("attachments"))
    }

    // --- signatures ---

    fn signature_count(&mut self, _document: NativePtr) -> EngineResult<i32> {
        Err(EngineError::Unsupported("signatures"))
    }

    fn signature(&mut self, _document: NativePtr, _index: i32) -> EngineResult<NativePtr> {
        Err(EngineError::Unsupported("signatures"))
    }

    fn signature_reason(&mut self, _signature: NativePtr) -> EngineResult<Option<String>> {
        Err(EngineError::Unsupported("signatures"))
    }

    // --- form fill environment ---

    fn form_init(&mut self, _document: NativePtr) -> EngineResult<NativePtr> {
        Err(EngineError::Unsupported("form fill"))
    }

    fn form_exit(&mut self, _form: NativePtr) -> EngineResult<()> {
        Err(EngineError::Unsupported("form fill"))
    }

    fn form_set_focusable_subtypes(&mut self, _form: NativePtr, _subtypes: &[u32]) -> EngineResult<()> {
        Err(EngineError::Unsupported("form fill"))
    }

    /// Read-only accessor for the focusable annotation subtypes
    fn form_focusable_subtypes(&mut self, _form: NativePtr) -> EngineResult<Vec<u32>> {
        Err(EngineError::Unsupported("form fill"))
    }

    // --- structure tree ---

    fn struct_tree(&mut self, _page: NativePtr) -> EngineResult<NativePtr> {
        Err(EngineError::Unsupported("structure trees"))
    }

    fn struct_tree_close(&mut self, _tree: NativePtr) -> EngineResult<()> {
        Err(EngineError::Unsupported("structure trees"))
    }

    fn struct_tree_count_children(&mut self, _tree: NativePtr) -> EngineResult<i32> {
        Err(EngineError::Unsupported("structure trees"))
    }
}
