//! MuPDF backend
//!
//! Covers documents, pages, metadata, outlines, text and search. Links,
//! annotations, attachments, signatures, forms and structure trees report
//! [`EngineError::Unsupported`].

use std::collections::HashMap;
use std::path::Path;

use mupdf::{Document, MetadataName, Page};

use super::{codes, next_match, Engine, EngineError, EngineResult, NativeLibrary, NativePtr};

struct OutlineNode {
    title: String,
    page: Option<i32>,
    first_child: Option<usize>,
    next_sibling: Option<usize>,
}

enum Object {
    Document {
        document: Document,
        outline: Vec<OutlineNode>,
        first: Option<usize>,
    },
    Page(Page),
    TextPage {
        chars: Vec<char>,
    },
    Search {
        chars: Vec<char>,
        query: Vec<char>,
        flags: u32,
        next: usize,
    },
    Bookmark(usize),
    Dest(i32),
}

struct Slot {
    /// Owning document pointer; equal to the key for documents
    document: u64,
    object: Object,
}

pub struct MupdfEngine {
    objects: HashMap<u64, Slot>,
    next_ptr: u64,
    last_error: u32,
}

// SAFETY: MuPDF objects are not thread-safe, but an engine is only reachable
// through the mutex of the instance that owns it, so it is never used from
// two threads at once.
unsafe impl Send for MupdfEngine {}

impl NativeLibrary for MupdfEngine {
    fn init_library() {
        tracing::debug!("MuPDF library initialized");
    }

    fn destroy_library() {
        tracing::debug!("MuPDF library destroyed");
    }
}

fn flatten(outlines: &[mupdf::Outline], nodes: &mut Vec<OutlineNode>) -> Option<usize> {
    let mut first = None;
    let mut previous: Option<usize> = None;

    for outline in outlines {
        let index = nodes.len();
        nodes.push(OutlineNode {
            title: outline.title.clone(),
            page: outline.page.map(|p| p as i32),
            first_child: None,
            next_sibling: None,
        });
        let child = flatten(&outline.down, nodes);
        nodes[index].first_child = child;

        match previous {
            Some(prev) => nodes[prev].next_sibling = Some(index),
            None => first = Some(index),
        }
        previous = Some(index);
    }
    first
}

fn metadata_name(tag: &str) -> Option<MetadataName> {
    Some(match tag {
        "Title" => MetadataName::Title,
        "Author" => MetadataName::Author,
        "Subject" => MetadataName::Subject,
        "Keywords" => MetadataName::Keywords,
        "Creator" => MetadataName::Creator,
        "Producer" => MetadataName::Producer,
        "CreationDate" => MetadataName::CreationDate,
        "ModDate" => MetadataName::ModDate,
        _ => return None,
    })
}

impl MupdfEngine {
    fn alloc(&mut self, document: Option<u64>, object: Object) -> NativePtr {
        let ptr = self.next_ptr;
        self.next_ptr += 1;
        self.objects.insert(
            ptr,
            Slot {
                document: document.unwrap_or(ptr),
                object,
            },
        );
        NativePtr(ptr)
    }

    fn slot(&self, ptr: NativePtr) -> EngineResult<&Slot> {
        self.objects.get(&ptr.0).ok_or(EngineError::InvalidPointer(ptr))
    }

    fn document(&self, ptr: NativePtr) -> EngineResult<&Document> {
        match &self.slot(ptr)?.object {
            Object::Document { document, .. } => Ok(document),
            _ => Err(EngineError::InvalidPointer(ptr)),
        }
    }

    fn page(&self, ptr: NativePtr) -> EngineResult<&Page> {
        match &self.slot(ptr)?.object {
            Object::Page(page) => Ok(page),
            _ => Err(EngineError::InvalidPointer(ptr)),
        }
    }

    fn outline(&self, document: NativePtr) -> EngineResult<(&[OutlineNode], Option<usize>)> {
        match &self.slot(document)?.object {
            Object::Document { outline, first, .. } => Ok((outline, *first)),
            _ => Err(EngineError::InvalidPointer(document)),
        }
    }

    fn bookmark_node(&self, bookmark: NativePtr) -> EngineResult<usize> {
        match self.slot(bookmark)?.object {
            Object::Bookmark(node) => Ok(node),
            _ => Err(EngineError::InvalidPointer(bookmark)),
        }
    }

    fn remove(&mut self, ptr: NativePtr, is_kind: fn(&Object) -> bool) -> EngineResult<()> {
        match self.objects.get(&ptr.0) {
            Some(slot) if is_kind(&slot.object) => {
                self.objects.remove(&ptr.0);
                Ok(())
            }
            _ => Err(EngineError::InvalidPointer(ptr)),
        }
    }

    fn finish_load(&mut self, mut document: Document, password: Option<&str>) -> Option<NativePtr> {
        match document.needs_password() {
            Ok(true) => {
                let unlocked = match password {
                    Some(pw) => document.authenticate(pw).unwrap_or(false),
                    None => false,
                };
                if !unlocked {
                    self.last_error = codes::ERR_PASSWORD;
                    return None;
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::debug!("MuPDF password check failed: {}", e);
                self.last_error = codes::ERR_SECURITY;
                return None;
            }
        }

        let mut outline = Vec::new();
        let first = match document.outlines() {
            Ok(outlines) => flatten(&outlines, &mut outline),
            Err(e) => {
                tracing::debug!("Failed to read outline: {}", e);
                None
            }
        };

        self.last_error = codes::ERR_SUCCESS;
        Some(self.alloc(
            None,
            Object::Document {
                document,
                outline,
                first,
            },
        ))
    }
}

impl Engine for MupdfEngine {
    const NAME: &'static str = "mupdf";

    fn create() -> Self {
        Self {
            objects: HashMap::new(),
            next_ptr: 1,
            last_error: codes::ERR_SUCCESS,
        }
    }

    fn last_error(&self) -> u32 {
        self.last_error
    }

    fn load_mem_document(&mut self, data: &[u8], password: Option<&str>) -> Option<NativePtr> {
        match Document::from_bytes(data, "application/pdf") {
            Ok(document) => self.finish_load(document, password),
            Err(e) => {
                tracing::debug!("MuPDF rejected document: {}", e);
                self.last_error = codes::ERR_FORMAT;
                None
            }
        }
    }

    fn load_document(&mut self, path: &Path, password: Option<&str>) -> Option<NativePtr> {
        if !path.is_file() {
            self.last_error = codes::ERR_FILE;
            return None;
        }
        let path_str = path.to_string_lossy();
        match Document::open(&*path_str) {
            Ok(document) => self.finish_load(document, password),
            Err(e) => {
                tracing::debug!("MuPDF rejected {}: {}", path.display(), e);
                self.last_error = codes::ERR_FORMAT;
                None
            }
        }
    }

    fn close_document(&mut self, document: NativePtr) -> EngineResult<()> {
        self.document(document)?;
        self.objects.retain(|_, slot| slot.document != document.0);
        Ok(())
    }

    fn page_count(&mut self, document: NativePtr) -> EngineResult<i32> {
        self.document(document)?
            .page_count()
            .map_err(|e| EngineError::Failed(e.to_string()))
    }

    fn metadata(&mut self, document: NativePtr, tag: &str) -> EngineResult<Option<String>> {
        let document = self.document(document)?;
        let Some(name) = metadata_name(tag) else {
            return Ok(None);
        };
        Ok(document.metadata(name).ok().filter(|value| !value.is_empty()))
    }

    fn load_page(&mut self, document: NativePtr, index: i32) -> EngineResult<NativePtr> {
        let doc = self.document(document)?;
        let count = doc
            .page_count()
            .map_err(|e| EngineError::Failed(e.to_string()))?;
        if index < 0 || index >= count {
            return Err(EngineError::Code(codes::ERR_PAGE));
        }
        let page = doc
            .load_page(index)
            .map_err(|e| EngineError::Failed(e.to_string()))?;
        Ok(self.alloc(Some(document.0), Object::Page(page)))
    }

    fn close_page(&mut self, page: NativePtr) -> EngineResult<()> {
        self.remove(page, |o| matches!(o, Object::Page(_)))
    }

    fn page_size(&mut self, page: NativePtr) -> EngineResult<(f32, f32)> {
        let bounds = self
            .page(page)?
            .bounds()
            .map_err(|e| EngineError::Failed(e.to_string()))?;
        Ok((bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
    }

    fn load_text_page(&mut self, page: NativePtr) -> EngineResult<NativePtr> {
        let document = self.slot(page)?.document;
        let text = self
            .page(page)?
            .to_text()
            .map_err(|e| EngineError::Failed(e.to_string()))?;
        Ok(self.alloc(
            Some(document),
            Object::TextPage {
                chars: text.chars().collect(),
            },
        ))
    }

    fn close_text_page(&mut self, text_page: NativePtr) -> EngineResult<()> {
        self.remove(text_page, |o| matches!(o, Object::TextPage { .. }))
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
        let Object::TextPage { chars } = &slot.object else {
            return Err(EngineError::InvalidPointer(text_page));
        };
        if query.is_empty() {
            return Err(EngineError::Failed("empty search query".into()));
        }
        let search = Object::Search {
            chars: chars.clone(),
            query: query.chars().collect(),
            flags,
            next: start_index.max(0) as usize,
        };
        Ok(self.alloc(Some(document), search))
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
        self.remove(search, |o| matches!(o, Object::Search { .. }))
    }

    fn bookmark_first_child(
        &mut self,
        document: NativePtr,
        parent: Option<NativePtr>,
    ) -> EngineResult<Option<NativePtr>> {
        let (nodes, first) = self.outline(document)?;
        let child = match parent {
            Some(parent) => {
                let node = self.bookmark_node(parent)?;
                nodes.get(node).and_then(|n| n.first_child)
            }
            None => first,
        };
        Ok(child.map(|node| self.alloc(Some(document.0), Object::Bookmark(node))))
    }

    fn bookmark_next_sibling(
        &mut self,
        document: NativePtr,
        bookmark: NativePtr,
    ) -> EngineResult<Option<NativePtr>> {
        let (nodes, _) = self.outline(document)?;
        let node = self.bookmark_node(bookmark)?;
        let sibling = nodes.get(node).and_then(|n| n.next_sibling);
        Ok(sibling.map(|node| self.alloc(Some(document.0), Object::Bookmark(node))))
    }

    fn bookmark_title(&mut self, bookmark: NativePtr) -> EngineResult<String> {
        let node = self.bookmark_node(bookmark)?;
        let document = NativePtr(self.slot(bookmark)?.document);
        let (nodes, _) = self.outline(document)?;
        nodes
            .get(node)
            .map(|n| n.title.clone())
            .ok_or(EngineError::InvalidPointer(bookmark))
    }

    fn bookmark_dest(
        &mut self,
        document: NativePtr,
        bookmark: NativePtr,
    ) -> EngineResult<Option<NativePtr>> {
        let node = self.bookmark_node(bookmark)?;
        let (nodes, _) = self.outline(document)?;
        let page = nodes.get(node).and_then(|n| n.page);
        Ok(page.map(|page| self.alloc(Some(document.0), Object::Dest(page))))
    }

    fn dest_page_index(&mut self, _document: NativePtr, dest: NativePtr) -> EngineResult<i32> {
        match self.slot(dest)?.object {
            Object::Dest(page) => Ok(page),
            _ => Err(EngineError::InvalidPointer(dest)),
        }
    }
}
