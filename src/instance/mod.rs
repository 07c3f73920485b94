//! Engine instance
//!
//! One [`Instance`] owns one engine, its open documents and their handle
//! tables. Every native call runs under the instance mutex, so concurrent
//! callers interleave instead of entering the engine together.

use parking_lot::Mutex;

use crate::engine::{Engine, EngineResult, NativePtr};
use crate::error::{Error, NativeError, Result};
use crate::handles::{DocumentRef, HandleKind, HandleTable, ReleasedDocument};
use crate::requests::{self, OpenSource};
use crate::responses;

mod library;
mod operations;

pub use library::LibraryGuard;

/// Serialized access to one native engine
pub struct Instance<E: Engine> {
    state: Mutex<InstanceState<E>>,
    // Dropped after `state`, so the engine is gone before library teardown.
    _library: LibraryGuard<E>,
}

pub(crate) struct InstanceState<E: Engine> {
    pub(crate) engine: E,
    pub(crate) handles: HandleTable,
    closed: bool,
}

impl<E: Engine> Instance<E> {
    pub fn new() -> Self {
        let library = LibraryGuard::acquire();
        Self {
            state: Mutex::new(InstanceState {
                engine: E::create(),
                handles: HandleTable::new(),
                closed: false,
            }),
            _library: library,
        }
    }

    /// Run `f` with the lock held; fails once the instance is closed
    pub(crate) fn with_state<T>(
        &self,
        f: impl FnOnce(&mut InstanceState<E>) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::InvalidState("instance is closed".into()));
        }
        f(&mut state)
    }

    /// Like [`Self::with_state`], with the document's native pointer resolved
    pub(crate) fn with_document<T>(
        &self,
        document: &DocumentRef,
        f: impl FnOnce(&mut InstanceState<E>, NativePtr) -> Result<T>,
    ) -> Result<T> {
        self.with_state(|state| {
            let native = state.handles.document(document)?.native();
            f(state, native)
        })
    }

    /// Logical liveness check
    pub fn ping(&self) -> Result<String> {
        self.with_state(|_| Ok("Pong".to_string()))
    }

    pub fn open(&self, request: requests::OpenDocument) -> Result<responses::OpenDocument> {
        self.with_state(|state| {
            let password = request.password.as_deref();
            let (native, data) = match request.source {
                OpenSource::Bytes(data) => {
                    let native = state.engine.load_mem_document(&data, password);
                    (native, Some(data))
                }
                OpenSource::Path(path) => (state.engine.load_document(&path, password), None),
            };

            let native = native.ok_or_else(|| NativeError::from_code(state.engine.last_error()))?;
            let document = state.handles.insert_document(native, data);
            tracing::info!(document = %document, engine = E::NAME, "Opened document");
            Ok(responses::OpenDocument { document })
        })
    }

    /// Close a document and everything opened from it
    pub fn close_document(&self, document: &DocumentRef) -> Result<()> {
        self.with_state(|state| {
            let released = state.handles.remove_document(document)?;
            state.close_released(released)
        })
    }

    /// Close every open document, keeping the instance usable
    ///
    /// This is what a pooled worker does between borrowers.
    pub fn reset(&self) -> Result<()> {
        self.with_state(|state| state.close_all())
    }

    /// Close every open document; the instance is unusable afterwards
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::InvalidState("instance is already closed".into()));
        }
        state.closed = true;
        state.close_all()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn document_count(&self) -> usize {
        self.state.lock().handles.document_count()
    }

    /// Inspect the engine under the lock
    pub fn with_engine<T>(&self, f: impl FnOnce(&E) -> T) -> T {
        f(&self.state.lock().engine)
    }
}

impl<E: Engine> Default for Instance<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> Drop for Instance<E> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.closed {
            state.closed = true;
            if let Err(e) = state.close_all() {
                tracing::warn!("Error closing documents on drop: {}", e);
            }
        }
    }
}

impl<E: Engine> InstanceState<E> {
    fn close_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for document in self.handles.document_refs() {
            let result = self
                .handles
                .remove_document(&document)
                .and_then(|released| self.close_released(released));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Close the native side of a document removed from the handle table
    ///
    /// Children first, then the resident page, then the document, then the
    /// bytes it was loaded from. Keeps going after a failure and reports the
    /// first one.
    pub(crate) fn close_released(&mut self, released: ReleasedDocument) -> Result<()> {
        let mut first_error: Option<Error> = None;

        for (kind, native) in released.children {
            if let Err(e) = self.close_child(kind, native) {
                tracing::warn!(kind = %kind, "Failed to close child handle: {}", e);
                first_error.get_or_insert(e.into());
            }
        }

        if let Some(page) = released.current_page {
            if let Err(e) = self.engine.close_page(page) {
                tracing::warn!("Failed to close resident page: {}", e);
                first_error.get_or_insert(e.into());
            }
        }

        if let Err(e) = self.engine.close_document(released.native) {
            tracing::warn!("Failed to close document: {}", e);
            first_error.get_or_insert(e.into());
        }
        drop(released.data);

        first_error.map_or(Ok(()), Err)
    }

    fn close_child(&mut self, kind: HandleKind, native: NativePtr) -> EngineResult<()> {
        match kind {
            HandleKind::Search => self.engine.find_close(native),
            HandleKind::TextPage => self.engine.close_text_page(native),
            HandleKind::Annotation => self.engine.close_annot(native),
            HandleKind::StructTree => self.engine.struct_tree_close(native),
            HandleKind::Form => self.engine.form_exit(native),
            HandleKind::Page => self.engine.close_page(native),
            HandleKind::Bookmark
            | HandleKind::Dest
            | HandleKind::Action
            | HandleKind::Link
            | HandleKind::Attachment
            | HandleKind::Signature => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{
        MemoryAttachment, MemoryBookmark, MemoryDocument, MemoryEngine, MemoryLink,
    };
    use crate::enums::{ActionType, AnnotationSubtype};
    use crate::requests::PageSelector;

    fn sample() -> Vec<u8> {
        let mut doc = MemoryDocument::new()
            .with_page(612.0, 792.0, "The quick brown fox")
            .with_page(300.0, 400.0, "jumps over the lazy dog")
            .with_metadata("Title", "Sample");
        doc.pages[0].annotations = vec!["highlight".into(), "widget".into()];
        doc.pages[0].struct_elements = 3;
        doc.pages[0].links = vec![
            MemoryLink {
                page: Some(1),
                uri: None,
            },
            MemoryLink {
                page: None,
                uri: Some("https://example.com".into()),
            },
        ];
        doc.bookmarks = vec![MemoryBookmark {
            title: "Chapter 1".into(),
            page: Some(1),
            ..Default::default()
        }];
        doc.attachments = vec![MemoryAttachment {
            name: "notes.txt".into(),
            data: b"hello".to_vec(),
        }];
        doc.to_bytes()
    }

    fn open(instance: &Instance<MemoryEngine>, data: Vec<u8>, password: Option<&str>) -> Result<DocumentRef> {
        instance
            .open(requests::OpenDocument {
                source: OpenSource::Bytes(data),
                password: password.map(str::to_string),
            })
            .map(|r| r.document)
    }

    #[test]
    fn test_open_and_read_document() {
        let instance = Instance::<MemoryEngine>::new();
        let doc = open(&instance, sample(), None).unwrap();

        let count = instance
            .get_page_count(&doc, requests::GetPageCount {})
            .unwrap();
        assert_eq!(count.page_count, 2);

        let title = instance
            .get_metadata(&doc, requests::GetMetadata { tag: "Title".into() })
            .unwrap();
        assert_eq!(title.value.as_deref(), Some("Sample"));

        let size = instance
            .get_page_size(&doc, requests::GetPageSize { page: 1.into() })
            .unwrap();
        assert_eq!((size.width, size.height), (300.0, 400.0));
    }

    #[test]
    fn test_open_classifies_native_errors() {
        let instance = Instance::<MemoryEngine>::new();
        let locked = MemoryDocument::new()
            .with_page(10.0, 10.0, "")
            .with_password("hunter2")
            .to_bytes();

        let err = open(&instance, locked.clone(), None).unwrap_err();
        assert!(matches!(err, Error::NativeOpen(NativeError::Password)));
        assert!(open(&instance, locked, Some("hunter2")).is_ok());

        let err = open(&instance, b"not a document".to_vec(), None).unwrap_err();
        assert!(matches!(err, Error::NativeOpen(NativeError::Format)));
    }

    #[test]
    fn test_open_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.memdoc");
        std::fs::write(&path, sample()).unwrap();

        let instance = Instance::<MemoryEngine>::new();
        let doc = instance
            .open(requests::OpenDocument {
                source: OpenSource::Path(path),
                password: None,
            })
            .unwrap()
            .document;
        assert_eq!(
            instance
                .get_page_count(&doc, requests::GetPageCount {})
                .unwrap()
                .page_count,
            2
        );
    }

    #[test]
    fn test_resident_page_reused_for_same_index() {
        let instance = Instance::<MemoryEngine>::new();
        let doc = open(&instance, sample(), None).unwrap();
        let resident = |instance: &Instance<MemoryEngine>| {
            instance
                .state
                .lock()
                .handles
                .document(&doc)
                .unwrap()
                .current_page()
                .unwrap()
        };

        instance
            .get_page_size(&doc, requests::GetPageSize { page: 0.into() })
            .unwrap();
        let first = resident(&instance);
        let live = instance.with_engine(|e| e.live_objects());

        instance
            .get_page_rotation(&doc, requests::GetPageRotation { page: 0.into() })
            .unwrap();
        assert_eq!(resident(&instance), first);
        assert_eq!(instance.with_engine(|e| e.live_objects()), live);

        instance
            .get_page_size(&doc, requests::GetPageSize { page: 1.into() })
            .unwrap();
        let second = resident(&instance);
        assert_eq!(second.index, 1);
        assert_ne!(second.native, first.native);
        // The evicted page was closed, not leaked
        assert_eq!(instance.with_engine(|e| e.live_objects()), live);
    }

    #[test]
    fn test_resident_page_kept_when_its_close_fails() {
        let instance = Instance::<MemoryEngine>::new();
        let doc = open(&instance, sample(), None).unwrap();

        instance
            .get_page_size(&doc, requests::GetPageSize { page: 0.into() })
            .unwrap();
        let first = instance
            .state
            .lock()
            .handles
            .document(&doc)
            .unwrap()
            .current_page()
            .unwrap();

        // Release the native page behind the table's back so the eviction fails
        instance
            .with_state(|state| state.engine.close_page(first.native).map_err(Error::from))
            .unwrap();

        assert!(instance
            .get_page_size(&doc, requests::GetPageSize { page: 1.into() })
            .is_err());
        let resident = instance
            .state
            .lock()
            .handles
            .document(&doc)
            .unwrap()
            .current_page();
        assert_eq!(resident, Some(first));
    }

    #[test]
    fn test_page_index_out_of_range() {
        let instance = Instance::<MemoryEngine>::new();
        let doc = open(&instance, sample(), None).unwrap();
        let err = instance
            .load_page(&doc, requests::LoadPage { index: 9 })
            .unwrap_err();
        assert!(matches!(err, Error::NativeOpen(NativeError::Page)));
    }

    #[test]
    fn test_close_document_cascades() {
        let instance = Instance::<MemoryEngine>::new();
        let doc = open(&instance, sample(), None).unwrap();

        let page = instance
            .load_page(&doc, requests::LoadPage { index: 0 })
            .unwrap()
            .page;
        let text_page = instance
            .load_text_page(&doc, requests::LoadTextPage { page: (&page).into() })
            .unwrap()
            .text_page;
        let search = instance
            .start_search(
                &doc,
                requests::StartSearch {
                    text_page: text_page.clone(),
                    query: "fox".into(),
                    match_case: false,
                    match_whole_word: false,
                    start_index: 0,
                },
            )
            .unwrap()
            .search;
        let annotation = instance
            .get_annot(&doc, requests::GetAnnot { page: 0.into(), index: 0 })
            .unwrap()
            .annotation;
        let tree = instance
            .get_struct_tree(&doc, requests::GetStructTree { page: (&page).into() })
            .unwrap()
            .struct_tree;
        let form = instance
            .init_form_fill_environment(&doc, requests::InitFormFillEnvironment {})
            .unwrap()
            .form;
        let bookmark = instance
            .get_first_bookmark(&doc, requests::GetFirstBookmark::default())
            .unwrap()
            .bookmark
            .unwrap();

        instance.close_document(&doc).unwrap();
        assert_eq!(instance.with_engine(|e| e.live_objects()), 0);
        assert_eq!(instance.state.lock().handles.child_count(), 0);

        let not_found = |r: Result<()>| matches!(r, Err(Error::HandleNotFound(_)));
        assert!(not_found(
            instance
                .close_page(&doc, requests::ClosePage { page })
                .map(|_| ())
        ));
        assert!(not_found(
            instance
                .count_chars(&doc, requests::CountChars { text_page })
                .map(|_| ())
        ));
        assert!(not_found(
            instance.find_next(&doc, requests::FindNext { search }).map(|_| ())
        ));
        assert!(not_found(
            instance
                .get_annot_subtype(&doc, requests::GetAnnotSubtype { annotation })
                .map(|_| ())
        ));
        assert!(not_found(
            instance
                .count_struct_tree_children(&doc, requests::CountStructTreeChildren { struct_tree: tree })
                .map(|_| ())
        ));
        assert!(not_found(
            instance
                .get_focusable_annot_subtypes(&doc, requests::GetFocusableAnnotSubtypes { form })
                .map(|_| ())
        ));
        assert!(not_found(
            instance
                .get_bookmark_title(&doc, requests::GetBookmarkTitle { bookmark })
                .map(|_| ())
        ));
        assert!(not_found(instance.close_document(&doc)));
    }

    #[test]
    fn test_handles_do_not_cross_documents() {
        let instance = Instance::<MemoryEngine>::new();
        let a = open(&instance, sample(), None).unwrap();
        let b = open(&instance, sample(), None).unwrap();

        let page = instance
            .load_page(&a, requests::LoadPage { index: 0 })
            .unwrap()
            .page;
        let err = instance
            .get_page_size(&b, requests::GetPageSize { page: page.into() })
            .unwrap_err();
        assert!(matches!(err, Error::HandleNotFound(_)));
    }

    #[test]
    fn test_search_text_page() {
        let instance = Instance::<MemoryEngine>::new();
        let doc = open(&instance, sample(), None).unwrap();
        let text_page = instance
            .load_text_page(&doc, requests::LoadTextPage { page: 1.into() })
            .unwrap()
            .text_page;

        let search = instance
            .start_search(
                &doc,
                requests::StartSearch {
                    text_page: text_page.clone(),
                    query: "THE".into(),
                    match_case: false,
                    match_whole_word: true,
                    start_index: 0,
                },
            )
            .unwrap()
            .search;
        let hit = instance
            .find_next(&doc, requests::FindNext { search: search.clone() })
            .unwrap()
            .found
            .unwrap();
        assert_eq!((hit.index, hit.count), (11, 3));

        let text = instance
            .get_text_range(
                &doc,
                requests::GetTextRange {
                    text_page,
                    start: hit.index,
                    count: hit.count,
                },
            )
            .unwrap()
            .text;
        assert_eq!(text, "the");

        assert!(instance
            .find_next(&doc, requests::FindNext { search: search.clone() })
            .unwrap()
            .found
            .is_none());
        instance
            .close_search(&doc, requests::CloseSearch { search })
            .unwrap();
    }

    #[test]
    fn test_links_and_actions() {
        let instance = Instance::<MemoryEngine>::new();
        let doc = open(&instance, sample(), None).unwrap();

        let links = instance
            .get_page_links(&doc, requests::GetPageLinks { page: 0.into() })
            .unwrap()
            .links;
        assert_eq!(links.len(), 2);

        let dest = instance
            .get_link_dest(&doc, requests::GetLinkDest { link: links[0].clone() })
            .unwrap()
            .dest
            .unwrap();
        let index = instance
            .get_dest_page_index(&doc, requests::GetDestPageIndex { dest })
            .unwrap()
            .index;
        assert_eq!(index, 1);

        let action = instance
            .get_link_action(&doc, requests::GetLinkAction { link: links[1].clone() })
            .unwrap()
            .action
            .unwrap();
        let kind = instance
            .get_action_type(&doc, requests::GetActionType { action: action.clone() })
            .unwrap()
            .action_type;
        assert_eq!(kind, ActionType::Uri);
        let uri = instance
            .get_action_uri(&doc, requests::GetActionUri { action })
            .unwrap()
            .uri;
        assert_eq!(uri.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_attachments() {
        let instance = Instance::<MemoryEngine>::new();
        let doc = open(&instance, sample(), None).unwrap();

        assert_eq!(
            instance
                .get_attachment_count(&doc, requests::GetAttachmentCount {})
                .unwrap()
                .count,
            1
        );
        let attachment = instance
            .get_attachment(&doc, requests::GetAttachment { index: 0 })
            .unwrap()
            .attachment;
        let name = instance
            .get_attachment_name(&doc, requests::GetAttachmentName { attachment: attachment.clone() })
            .unwrap()
            .name;
        let file = instance
            .get_attachment_file(&doc, requests::GetAttachmentFile { attachment })
            .unwrap()
            .data;
        assert_eq!(name, "notes.txt");
        assert_eq!(file, b"hello");
    }

    #[test]
    fn test_get_focusable_subtypes_is_read_only() {
        let instance = Instance::<MemoryEngine>::new();
        let doc = open(&instance, sample(), None).unwrap();
        let form = instance
            .init_form_fill_environment(&doc, requests::InitFormFillEnvironment {})
            .unwrap()
            .form;

        let initial = instance
            .get_focusable_annot_subtypes(&doc, requests::GetFocusableAnnotSubtypes { form: form.clone() })
            .unwrap()
            .subtypes;
        assert_eq!(initial, vec![AnnotationSubtype::Widget]);

        instance
            .set_focusable_annot_subtypes(
                &doc,
                requests::SetFocusableAnnotSubtypes {
                    form: form.clone(),
                    subtypes: vec![AnnotationSubtype::Highlight, AnnotationSubtype::Link],
                },
            )
            .unwrap();

        for _ in 0..2 {
            let subtypes = instance
                .get_focusable_annot_subtypes(&doc, requests::GetFocusableAnnotSubtypes { form: form.clone() })
                .unwrap()
                .subtypes;
            assert_eq!(subtypes, vec![AnnotationSubtype::Highlight, AnnotationSubtype::Link]);
        }
    }

    #[test]
    fn test_close_twice_is_invalid_state() {
        let instance = Instance::<MemoryEngine>::new();
        open(&instance, sample(), None).unwrap();
        assert_eq!(instance.ping().unwrap(), "Pong");

        instance.close().unwrap();
        assert_eq!(instance.document_count(), 0);
        assert!(matches!(instance.close(), Err(Error::InvalidState(_))));
        assert!(matches!(instance.ping(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_concurrent_callers_interleave() {
        let instance = std::sync::Arc::new(Instance::<MemoryEngine>::new());
        let doc = open(&instance, sample(), None).unwrap();

        let threads: Vec<_> = (0..4)
            .map(|i| {
                let instance = instance.clone();
                let doc = doc.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let page = PageSelector::Index(i % 2);
                        instance
                            .get_page_size(&doc, requests::GetPageSize { page })
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(instance.document_count(), 1);
    }
}
