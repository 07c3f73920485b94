//! In-memory engine
//!
//! Implements the whole [`Engine`] surface over a serialized
//! [`MemoryDocument`]: a `%MEMDOC-1` header line followed by JSON. It keeps
//! the native engine's rules where they matter to the layers above:
//!
//! - pointers are opaque and die with [`Engine::close_document`];
//! - a document cannot be closed while pages, text pages, searches,
//!   annotations, forms or structure trees opened from it are still alive;
//! - loads fail with the same last-error codes a native engine reports.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{codes, next_match, Engine, EngineError, EngineResult, NativeLibrary, NativePtr};
use crate::enums::{ActionType, AnnotationSubtype};

/// Header every serialized memory document starts with
pub const MAGIC: &[u8] = b"%MEMDOC-1\n";

static LIBRARY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Serialized document description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDocument {
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default = "all_permissions")]
    pub permissions: u32,
    /// User password; `None` means unencrypted
    #[serde(default)]
    pub password: Option<String>,
    /// Encryption handler name; anything but `"standard"` is rejected
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub pages: Vec<MemoryPage>,
    #[serde(default)]
    pub bookmarks: Vec<MemoryBookmark>,
    #[serde(default)]
    pub attachments: Vec<MemoryAttachment>,
    #[serde(default)]
    pub signatures: Vec<MemorySignature>,
}

fn all_permissions() -> u32 {
    0xFFFF_FFFC
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryPage {
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub rotation: i32,
    #[serde(default)]
    pub text: String,
    /// Annotation subtype names, e.g. `"highlight"`
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub links: Vec<MemoryLink>,
    #[serde(default)]
    pub struct_elements: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryLink {
    #[serde(default)]
    pub page: Option<i32>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryBookmark {
    pub title: String,
    #[serde(default)]
    pub page: Option<i32>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub children: Vec<MemoryBookmark>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryAttachment {
    pub name: String,
    #[serde(with = "crate::rpc::base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySignature {
    #[serde(default)]
    pub reason: Option<String>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self {
            permissions: all_permissions(),
            ..Default::default()
        }
    }

    /// Append a page with the given size and text
    pub fn with_page(mut self, width: f32, height: f32, text: impl Into<String>) -> Self {
        self.pages.push(MemoryPage {
            width,
            height,
            text: text.into(),
            ..Default::default()
        });
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self.encryption = Some("standard".into());
        self
    }

    pub fn with_metadata(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(tag.into(), value.into());
        self
    }

    /// Serialize into the byte form accepted by [`MemoryEngine`]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        // Serializing plain data into a Vec cannot fail
        bytes.extend(serde_json::to_vec(self).unwrap_or_default());
        bytes
    }

    fn parse(data: &[u8]) -> Result<Self, u32> {
        let body = data.strip_prefix(MAGIC).ok_or(codes::ERR_FORMAT)?;
        serde_json::from_slice(body).map_err(|_| codes::ERR_FORMAT)
    }

    fn bookmark(&self, path: &[usize]) -> Option<&MemoryBookmark> {
        let (first, rest) = path.split_first()?;
        let mut node = self.bookmarks.get(*first)?;
        for idx in rest {
            node = node.children.get(*idx)?;
        }
        Some(node)
    }

    fn siblings(&self, parent: &[usize]) -> Option<&[MemoryBookmark]> {
        if parent.is_empty() {
            return Some(&self.bookmarks);
        }
        self.bookmark(parent).map(|b| b.children.as_slice())
    }
}

#[derive(Debug, Clone)]
enum Action {
    Goto(i32),
    Uri(String),
}

#[derive(Debug)]
enum Object {
    Document(Arc<MemoryDocument>),
    Page { index: usize },
    TextPage { chars: Vec<char> },
    Search {
        chars: Vec<char>,
        query: Vec<char>,
        flags: u32,
        next: usize,
    },
    Bookmark { path: Vec<usize> },
    Dest { page: i32 },
    Action(Action),
    Link { page: usize, index: usize },
    Annotation { subtype: u32 },
    Attachment { index: usize },
    Signature { index: usize },
    Form { focusable: Vec<u32> },
    StructTree { children: i32 },
}

impl Object {
    /// Objects the caller must close explicitly before the document
    fn needs_close(&self) -> bool {
        matches!(
            self,
            Object::Page { .. }
                | Object::TextPage { .. }
                | Object::Search { .. }
                | Object::Annotation { .. }
                | Object::Form { .. }
                | Object::StructTree { .. }
        )
    }
}

struct Slot {
    document: u64,
    object: Object,
}

/// Engine over [`MemoryDocument`]s
pub struct MemoryEngine {
    objects: HashMap<u64, Slot>,
    next_ptr: u64,
    last_error: u32,
}

impl MemoryEngine {
    /// Whether the process-wide library state is currently initialized
    pub fn library_initialized() -> bool {
        LIBRARY_INITIALIZED.load(Ordering::SeqCst)
    }

    /// Number of native objects still alive
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    fn alloc(&mut self, document: u64, object: Object) -> NativePtr {
        self.next_ptr += 0x10;
        self.objects.insert(self.next_ptr, Slot { document, object });
        NativePtr(self.next_ptr)
    }

    fn slot(&self, ptr: NativePtr) -> EngineResult<&Slot> {
        self.objects.get(&ptr.0).ok_or(EngineError::InvalidPointer(ptr))
    }

    fn model(&self, document: NativePtr) -> EngineResult<Arc<MemoryDocument>> {
        match &self.slot(document)?.object {
            Object::Document(model) => Ok(Arc::clone(model)),
            _ => Err(EngineError::InvalidPointer(document)),
        }
    }

    /// Document model and page index behind a page pointer
    fn page(&self, page: NativePtr) -> EngineResult<(u64, Arc<MemoryDocument>, usize)> {
        let slot = self.slot(page)?;
        match slot.object {
            Object::Page { index } => {
                let model = self.model(NativePtr(slot.document))?;
                Ok((slot.document, model, index))
            }
            _ => Err(EngineError::InvalidPointer(page)),
        }
    }

    fn close_kind(&mut self, ptr: NativePtr, matches: fn(&Object) -> bool) -> EngineResult<()> {
        match self.objects.get(&ptr.0) {
            Some(slot) if matches(&slot.object) => {
                self.objects.remove(&ptr.0);
                Ok(())
            }
            _ => Err(EngineError::InvalidPointer(ptr)),
        }
    }

    fn bookmark_path(&self, bookmark: NativePtr) -> EngineResult<Vec<usize>> {
        match &self.slot(bookmark)?.object {
            Object::Bookmark { path } => Ok(path.clone()),
            _ => Err(EngineError::InvalidPointer(bookmark)),
        }
    }

    fn action(&self, action: NativePtr) -> EngineResult<Action> {
        match &self.slot(action)?.object {
            Object::Action(action) => Ok(action.clone()),
            _ => Err(EngineError::InvalidPointer(action)),
        }
    }

    fn load(&mut self, data: &[u8], password: Option<&str>) -> Option<NativePtr> {
        let model = match MemoryDocument::parse(data) {
            Ok(model) => model,
            Err(code) => {
                self.last_error = code;
                return None;
            }
        };

        if let Some(scheme) = model.encryption.as_deref() {
            if scheme != "standard" {
                self.last_error = codes::ERR_SECURITY;
                return None;
            }
        }

        if let Some(expected) = model.password.as_deref() {
            if password != Some(expected) {
                self.last_error = codes::ERR_PASSWORD;
                return None;
            }
        }

        self.last_error = codes::ERR_SUCCESS;
        let ptr = self.alloc(0, Object::Document(Arc::new(model)));
        // A document owns itself for cleanup purposes
        if let Some(slot) = self.objects.get_mut(&ptr.0) {
            slot.document = ptr.0;
        }
        Some(ptr)
    }
}

impl NativeLibrary for MemoryEngine {
    fn init_library() {
        LIBRARY_INITIALIZED.store(true, Ordering::SeqCst);
    }

    fn destroy_library() {
        LIBRARY_INITIALIZED.store(false, Ordering::SeqCst);
    }
}

impl Engine for MemoryEngine {
    const NAME: &'static str = "memory";

    fn create() -> Self {
        Self {
            objects: HashMap::new(),
            next_ptr: 0x1000,
            last_error: codes::ERR_SUCCESS,
        }
    }

    fn last_error(&self) -> u32 {
        self.last_error
    }

    fn load_mem_document(&mut self, data: &[u8], password: Option<&str>) -> Option<NativePtr> {
        self.load(data, password)
    }

    fn load_document(&mut self, path: &Path, password: Option<&str>) -> Option<NativePtr> {
        match std::fs::read(path) {
            Ok(data) => self.load(&data, password),
            Err(_) => {
                self.last_error = codes::ERR_FILE;
                None
            }
        }
    }

    fn close_document(&mut self, document: NativePtr) -> EngineResult<()> {
        self.model(document)?;

        let open = self
            .objects
            .iter()
            .filter(|(ptr, slot)| {
                **ptr != document.0 && slot.document == document.0 && slot.object.needs_close()
            })
            .count();
        if open > 0 {
            return Err(EngineError::Failed(format!(
                "document still has {} open resources",
                open
            )));
        }

        self.objects.retain(|_, slot| slot.document != document.0);
        Ok(())
    }

    fn page_count(&mut self, document: NativePtr) -> EngineResult<i32> {
        Ok(self.model(document)?.pages.len() as i32)
    }

    fn metadata(&mut self, document: NativePtr, tag: &str) -> EngineResult<Option<String>> {
        Ok(self.model(document)?.metadata.get(tag).cloned())
    }

    fn file_version(&mut self, document: NativePtr) -> EngineResult<Option<i32>> {
        Ok(self.model(document)?.version)
    }

    fn doc_permissions(&mut self, document: NativePtr) -> EngineResult<u32> {
        Ok(self.model(document)?.permissions)
    }

    fn load_page(&mut self, document: NativePtr, index: i32) -> EngineResult<NativePtr> {
        let model = self.model(document)?;
        if index < 0 || index as usize >= model.pages.len() {
            return Err(EngineError::Code(codes::ERR_PAGE));
        }
        Ok(self.alloc(
            document.0,
            Object::Page {
                index: index as usize,
            },
        ))
    }

    fn close_page(&mut self, page: NativePtr) -> EngineResult<()> {
        self.close_kind(page, |o| matches!(o, Object::Page { .. }))
    }

    fn page_size(&mut self, page: NativePtr) -> EngineResult<(f32, f32)> {
        let (_, model, index) = self.page(page)?;
        let page = &model.pages[index];
        Ok((page.width, page.height))
    }

    fn page_rotation(&mut self, page: NativePtr) -> EngineResult<i32> {
        let (_, model, index) = self.page(page)?;
        Ok(model.pages[index].rotation)
    }

    fn load_text_page(&mut self, page: NativePtr) -> EngineResult<NativePtr> {
        let (document, model, index) = self.page(page)?;
        let chars = model.pages[index].text.chars().collect();
        Ok(self.alloc(document, Object::TextPage { chars }))
    }

    fn close_text_page(&mut self, text_page: NativePtr) -> EngineResult<()> {
        self.close_kind(text_page, |o| matches!(o, Object::TextPage { .. }))
    }

    fn text_count_chars(&mut self, text_page: NativePtr) -> EngineResult<i32> {
        match &self.slot(text_page)?.object {
            Object::TextPage { chars } => Ok(chars.len() as i32),
            _ => Err(EngineError::InvalidPointer(text_page)),
        }
    }

    fn text_range(&mut self, text_page: NativePtr, start: i32, count: i32) -> EngineResult<String> {
        match &self.slot(text_page)?.object {
            Object::TextPage { chars } => {
                if start < 0 || count < 0 || start as usize > chars.len() {
                    return Err(EngineError::Failed(format!(
                        "text range {}+{} out of bounds",
                        start, count
                    )));
                }
                let end = (start as usize + count as usize).min(chars.len());
                Ok(chars[start as usize..end].iter().collect())
            }
            _ => Err(EngineError::InvalidPointer(text_page)),
        }
    }

    fn find_start(
        &mut self,
        text_page: NativePtr,
        query: &str,
        flags: u32,
        start_index: i32,
    ) -> EngineResult<NativePtr> {
        let slot = self.slot(text_page)?;
        let document = slot.document;
        let chars = match &slot.object {
            Object::TextPage { chars } => chars.clone(),
            _ => return Err(EngineError::InvalidPointer(text_page)),
        };
        if query.is_empty() {
            return Err(EngineError::Failed("empty search query".into()));
        }
        Ok(self.alloc(
            document,
            Object::Search {
                chars,
                query: query.chars().collect(),
                flags,
                next: start_index.max(0) as usize,
            },
        ))
    }

    fn find_next(&mut self, search: NativePtr) -> EngineResult<Option<(i32, i32)>> {
        let slot = self
            .objects
            .get_mut(&search.0)
            .ok_or(EngineError::InvalidPointer(search))?;
        let Object::Search {
            chars,
            query,
            flags,
            next,
        } = &mut slot.object
        else {
            return Err(EngineError::InvalidPointer(search));
        };

        match next_match(chars, query, *flags, *next) {
            Some(pos) => {
                *next = pos + 1;
                Ok(Some((pos as i32, query.len() as i32)))
            }
            None => {
                *next = chars.len();
                Ok(None)
            }
        }
    }

    fn find_close(&mut self, search: NativePtr) -> EngineResult<()> {
        self.close_kind(search, |o| matches!(o, Object::Search { .. }))
    }

    fn bookmark_first_child(
        &mut self,
        document: NativePtr,
        parent: Option<NativePtr>,
    ) -> EngineResult<Option<NativePtr>> {
        let model = self.model(document)?;
        let parent_path = match parent {
            Some(parent) => self.bookmark_path(parent)?,
            None => Vec::new(),
        };
        let has_child = model
            .siblings(&parent_path)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !has_child {
            return Ok(None);
        }
        let mut path = parent_path;
        path.push(0);
        Ok(Some(self.alloc(document.0, Object::Bookmark { path })))
    }

    fn bookmark_next_sibling(
        &mut self,
        document: NativePtr,
        bookmark: NativePtr,
    ) -> EngineResult<Option<NativePtr>> {
        let model = self.model(document)?;
        let mut path = self.bookmark_path(bookmark)?;
        let Some(last) = path.pop() else {
            return Ok(None);
        };
        let count = model.siblings(&path).map(|s| s.len()).unwrap_or(0);
        if last + 1 >= count {
            return Ok(None);
        }
        path.push(last + 1);
        Ok(Some(self.alloc(document.0, Object::Bookmark { path })))
    }

    fn bookmark_title(&mut self, bookmark: NativePtr) -> EngineResult<String> {
        let document = self.slot(bookmark)?.document;
        let path = self.bookmark_path(bookmark)?;
        let model = self.model(NativePtr(document))?;
        model
            .bookmark(&path)
            .map(|b| b.title.clone())
            .ok_or(EngineError::InvalidPointer(bookmark))
    }

    fn bookmark_dest(
        &mut self,
        document: NativePtr,
        bookmark: NativePtr,
    ) -> EngineResult<Option<NativePtr>> {
        let model = self.model(document)?;
        let path = self.bookmark_path(bookmark)?;
        let page = model.bookmark(&path).and_then(|b| b.page);
        Ok(page.map(|page| self.alloc(document.0, Object::Dest { page })))
    }

    fn bookmark_action(&mut self, bookmark: NativePtr) -> EngineResult<Option<NativePtr>> {
        let document = self.slot(bookmark)?.document;
        let path = self.bookmark_path(bookmark)?;
        let model = self.model(NativePtr(document))?;
        let action = model.bookmark(&path).and_then(|b| match (&b.uri, b.page) {
            (Some(uri), _) => Some(Action::Uri(uri.clone())),
            (None, Some(page)) => Some(Action::Goto(page)),
            (None, None) => None,
        });
        Ok(action.map(|action| self.alloc(document, Object::Action(action))))
    }

    fn dest_page_index(&mut self, _document: NativePtr, dest: NativePtr) -> EngineResult<i32> {
        match &self.slot(dest)?.object {
            Object::Dest { page } => Ok(*page),
            _ => Err(EngineError::InvalidPointer(dest)),
        }
    }

    fn action_type(&mut self, action: NativePtr) -> EngineResult<u32> {
        Ok(match self.action(action)? {
            Action::Goto(_) => ActionType::Goto.code(),
            Action::Uri(_) => ActionType::Uri.code(),
        })
    }

    fn action_dest(&mut self, document: NativePtr, action: NativePtr) -> EngineResult<Option<NativePtr>> {
        match self.action(action)? {
            Action::Goto(page) => Ok(Some(self.alloc(document.0, Object::Dest { page }))),
            Action::Uri(_) => Ok(None),
        }
    }

    fn action_uri(&mut self, _document: NativePtr, action: NativePtr) -> EngineResult<Option<String>> {
        match self.action(action)? {
            Action::Uri(uri) => Ok(Some(uri)),
            Action::Goto(_) => Ok(None),
        }
    }

    fn link_enumerate(&mut self, page: NativePtr, start_pos: i32) -> EngineResult<Option<(i32, NativePtr)>> {
        let (document, model, index) = self.page(page)?;
        let pos = start_pos.max(0) as usize;
        if pos >= model.pages[index].links.len() {
            return Ok(None);
        }
        let link = self.alloc(document, Object::Link { page: index, index: pos });
        Ok(Some((pos as i32 + 1, link)))
    }

    fn link_dest(&mut self, document: NativePtr, link: NativePtr) -> EngineResult<Option<NativePtr>> {
        let model = self.model(document)?;
        let target = match &self.slot(link)?.object {
            Object::Link { page, index } => model.pages[*page].links[*index].page,
            _ => return Err(EngineError::InvalidPointer(link)),
        };
        Ok(target.map(|page| self.alloc(document.0, Object::Dest { page })))
    }

    fn link_action(&mut self, link: NativePtr) -> EngineResult<Option<NativePtr>> {
        let slot = self.slot(link)?;
        let document = slot.document;
        let (page, index) = match slot.object {
            Object::Link { page, index } => (page, index),
            _ => return Err(EngineError::InvalidPointer(link)),
        };
        let model = self.model(NativePtr(document))?;
        let uri = model.pages[page].links[index].uri.clone();
        Ok(uri.map(|uri| self.alloc(document, Object::Action(Action::Uri(uri)))))
    }

    fn annot_count(&mut self, page: NativePtr) -> EngineResult<i32> {
        let (_, model, index) = self.page(page)?;
        Ok(model.pages[index].annotations.len() as i32)
    }

    fn annot(&mut self, page: NativePtr, index: i32) -> EngineResult<NativePtr> {
        let (document, model, page_index) = self.page(page)?;
        let name = usize::try_from(index)
            .ok()
            .and_then(|i| model.pages[page_index].annotations.get(i))
            .ok_or_else(|| EngineError::Failed(format!("no annotation at index {}", index)))?;
        let subtype = AnnotationSubtype::from_name(name).code();
        Ok(self.alloc(document, Object::Annotation { subtype }))
    }

    fn annot_subtype(&mut self, annot: NativePtr) -> EngineResult<u32> {
        match &self.slot(annot)?.object {
            Object::Annotation { subtype } => Ok(*subtype),
            _ => Err(EngineError::InvalidPointer(annot)),
        }
    }

    fn close_annot(&mut self, annot: NativePtr) -> EngineResult<()> {
        self.close_kind(annot, |o| matches!(o, Object::Annotation { .. }))
    }

    fn attachment_count(&mut self, document: NativePtr) -> EngineResult<i32> {
        Ok(self.model(document)?.attachments.len() as i32)
    }

    fn attachment(&mut self, document: NativePtr, index: i32) -> EngineResult<NativePtr> {
        let model = self.model(document)?;
        if index < 0 || index as usize >= model.attachments.len() {
            return Err(EngineError::Failed(format!("no attachment at index {}", index)));
        }
        Ok(self.alloc(
            document.0,
            Object::Attachment {
                index: index as usize,
            },
        ))
    }

    fn attachment_name(&mut self, attachment: NativePtr) -> EngineResult<String> {
        let slot = self.slot(attachment)?;
        let Object::Attachment { index } = slot.object else {
            return Err(EngineError::InvalidPointer(attachment));
        };
        Ok(self.model(NativePtr(slot.document))?.attachments[index].name.clone())
    }

    fn attachment_file(&mut self, attachment: NativePtr) -> EngineResult<Vec<u8>> {
        let slot = self.slot(attachment)?;
        let Object::Attachment { index } = slot.object else {
            return Err(EngineError::InvalidPointer(attachment));
        };
        Ok(self.model(NativePtr(slot.document))?.attachments[index].data.clone())
    }

    fn signature_count(&mut self, document: NativePtr) -> EngineResult<i32> {
        Ok(self.model(document)?.signatures.len() as i32)
    }

    fn signature(&mut self, document: NativePtr, index: i32) -> EngineResult<NativePtr> {
        let model = self.model(document)?;
        if index < 0 || index as usize >= model.signatures.len() {
            return Err(EngineError::Failed(format!("no signature at index {}", index)));
        }
        Ok(self.alloc(
            document.0,
            Object::Signature {
                index: index as usize,
            },
        ))
    }

    fn signature_reason(&mut self, signature: NativePtr) -> EngineResult<Option<String>> {
        let slot = self.slot(signature)?;
        let Object::Signature { index } = slot.object else {
            return Err(EngineError::InvalidPointer(signature));
        };
        Ok(self.model(NativePtr(slot.document))?.signatures[index].reason.clone())
    }

    fn form_init(&mut self, document: NativePtr) -> EngineResult<NativePtr> {
        self.model(document)?;
        Ok(self.alloc(
            document.0,
            Object::Form {
                focusable: vec![AnnotationSubtype::Widget.code()],
            },
        ))
    }

    fn form_exit(&mut self, form: NativePtr) -> EngineResult<()> {
        self.close_kind(form, |o| matches!(o, Object::Form { .. }))
    }

    fn form_set_focusable_subtypes(&mut self, form: NativePtr, subtypes: &[u32]) -> EngineResult<()> {
        match self.objects.get_mut(&form.0).map(|s| &mut s.object) {
            Some(Object::Form { focusable }) => {
                *focusable = subtypes.to_vec();
                Ok(())
            }
            _ => Err(EngineError::InvalidPointer(form)),
        }
    }

    fn form_focusable_subtypes(&mut self, form: NativePtr) -> EngineResult<Vec<u32>> {
        match &self.slot(form)?.object {
            Object::Form { focusable } => Ok(focusable.clone()),
            _ => Err(EngineError::InvalidPointer(form)),
        }
    }

    fn struct_tree(&mut self, page: NativePtr) -> EngineResult<NativePtr> {
        let (document, model, index) = self.page(page)?;
        let children = model.pages[index].struct_elements;
        Ok(self.alloc(document, Object::StructTree { children }))
    }

    fn struct_tree_close(&mut self, tree: NativePtr) -> EngineResult<()> {
        self.close_kind(tree, |o| matches!(o, Object::StructTree { .. }))
    }

    fn struct_tree_count_children(&mut self, tree: NativePtr) -> EngineResult<i32> {
        match &self.slot(tree)?.object {
            Object::StructTree { children } => Ok(*children),
            _ => Err(EngineError::InvalidPointer(tree)),
        }
    }
}
