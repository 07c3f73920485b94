//! Document operations
//!
//! Each method resolves the tokens in its request, makes the native calls
//! under the instance lock and registers any new native objects as tokens.

use crate::engine::{search_flags, Engine, NativePtr};
use crate::enums::{ActionType, AnnotationSubtype, PageRotation};
use crate::error::{Error, Result};
use crate::handles::{
    ActionRef, AnnotationRef, AttachmentRef, BookmarkRef, DestRef, DocumentRef, FormRef, LinkRef,
    LoadedPage, PageRef, SearchRef, SignatureRef, StructTreeRef, TextPageRef,
};
use crate::requests::{self, PageSelector};
use crate::responses::{self, SearchMatch};

use super::{Instance, InstanceState};

impl<E: Engine> InstanceState<E> {
    /// Native page for a selector, loading or swapping the resident page if needed
    pub(crate) fn page(&mut self, document: &DocumentRef, selector: &PageSelector) -> Result<NativePtr> {
        match selector {
            PageSelector::Reference(page) => self.handles.resolve(document, page),
            PageSelector::Index(index) => self.resident_page(document, *index),
        }
    }

    fn resident_page(&mut self, document: &DocumentRef, index: i32) -> Result<NativePtr> {
        let handle = self.handles.document(document)?;
        let doc = handle.native();
        if let Some(loaded) = handle.current_page() {
            if loaded.index == index {
                return Ok(loaded.native);
            }
            // Stays resident if the close fails, so it is still released with the document
            self.engine.close_page(loaded.native)?;
            self.handles.document_mut(document)?.current_page = None;
        }

        let native = self.engine.load_page(doc, index)?;
        self.handles.document_mut(document)?.current_page = Some(LoadedPage { index, native });
        tracing::trace!(document = %document, index, "Loaded resident page");
        Ok(native)
    }
}

impl<E: Engine> Instance<E> {
    // --- document ---

    pub fn get_page_count(
        &self,
        document: &DocumentRef,
        _request: requests::GetPageCount,
    ) -> Result<responses::GetPageCount> {
        self.with_document(document, |state, doc| {
            let page_count = state.engine.page_count(doc)?;
            Ok(responses::GetPageCount { page_count })
        })
    }

    pub fn get_file_version(
        &self,
        document: &DocumentRef,
        _request: requests::GetFileVersion,
    ) -> Result<responses::GetFileVersion> {
        self.with_document(document, |state, doc| {
            let version = state.engine.file_version(doc)?;
            Ok(responses::GetFileVersion { version })
        })
    }

    pub fn get_doc_permissions(
        &self,
        document: &DocumentRef,
        _request: requests::GetDocPermissions,
    ) -> Result<responses::GetDocPermissions> {
        self.with_document(document, |state, doc| {
            let permissions = state.engine.doc_permissions(doc)?;
            Ok(responses::GetDocPermissions { permissions })
        })
    }

    pub fn get_metadata(
        &self,
        document: &DocumentRef,
        request: requests::GetMetadata,
    ) -> Result<responses::GetMetadata> {
        self.with_document(document, |state, doc| {
            let value = state.engine.metadata(doc, &request.tag)?;
            Ok(responses::GetMetadata {
                tag: request.tag,
                value,
            })
        })
    }

    // --- pages ---

    /// Load a page that stays open until `ClosePage` or document close
    pub fn load_page(
        &self,
        document: &DocumentRef,
        request: requests::LoadPage,
    ) -> Result<responses::LoadPage> {
        self.with_document(document, |state, doc| {
            let native = state.engine.load_page(doc, request.index)?;
            let page = state.handles.register::<PageRef>(document, native)?;
            Ok(responses::LoadPage {
                index: request.index,
                page,
            })
        })
    }

    pub fn close_page(
        &self,
        document: &DocumentRef,
        request: requests::ClosePage,
    ) -> Result<responses::ClosePage> {
        self.with_state(|state| {
            let native = state.handles.release(document, &request.page)?;
            state.engine.close_page(native)?;
            Ok(responses::ClosePage {})
        })
    }

    pub fn get_page_size(
        &self,
        document: &DocumentRef,
        request: requests::GetPageSize,
    ) -> Result<responses::GetPageSize> {
        self.with_state(|state| {
            let page = state.page(document, &request.page)?;
            let (width, height) = state.engine.page_size(page)?;
            Ok(responses::GetPageSize { width, height })
        })
    }

    pub fn get_page_rotation(
        &self,
        document: &DocumentRef,
        request: requests::GetPageRotation,
    ) -> Result<responses::GetPageRotation> {
        self.with_state(|state| {
            let page = state.page(document, &request.page)?;
            let code = state.engine.page_rotation(page)?;
            let rotation = PageRotation::from_code(code)
                .ok_or_else(|| Error::Engine(format!("unexpected page rotation {}", code)))?;
            Ok(responses::GetPageRotation { rotation })
        })
    }

    // --- text ---

    pub fn load_text_page(
        &self,
        document: &DocumentRef,
        request: requests::LoadTextPage,
    ) -> Result<responses::LoadTextPage> {
        self.with_state(|state| {
            let page = state.page(document, &request.page)?;
            let native = state.engine.load_text_page(page)?;
            let text_page = state.handles.register::<TextPageRef>(document, native)?;
            Ok(responses::LoadTextPage { text_page })
        })
    }

    pub fn close_text_page(
        &self,
        document: &DocumentRef,
        request: requests::CloseTextPage,
    ) -> Result<responses::CloseTextPage> {
        self.with_state(|state| {
            let native = state.handles.release(document, &request.text_page)?;
            state.engine.close_text_page(native)?;
            Ok(responses::CloseTextPage {})
        })
    }

    pub fn count_chars(
        &self,
        document: &DocumentRef,
        request: requests::CountChars,
    ) -> Result<responses::CountChars> {
        self.with_state(|state| {
            let text_page = state.handles.resolve(document, &request.text_page)?;
            let count = state.engine.text_count_chars(text_page)?;
            Ok(responses::CountChars { count })
        })
    }

    pub fn get_text_range(
        &self,
        document: &DocumentRef,
        request: requests::GetTextRange,
    ) -> Result<responses::GetTextRange> {
        self.with_state(|state| {
            let text_page = state.handles.resolve(document, &request.text_page)?;
            let text = state
                .engine
                .text_range(text_page, request.start, request.count)?;
            Ok(responses::GetTextRange { text })
        })
    }

    // --- search ---

    pub fn start_search(
        &self,
        document: &DocumentRef,
        request: requests::StartSearch,
    ) -> Result<responses::StartSearch> {
        self.with_state(|state| {
            let text_page = state.handles.resolve(document, &request.text_page)?;
            let mut flags = 0;
            if request.match_case {
                flags |= search_flags::MATCH_CASE;
            }
            if request.match_whole_word {
                flags |= search_flags::MATCH_WHOLE_WORD;
            }
            let native = state
                .engine
                .find_start(text_page, &request.query, flags, request.start_index)?;
            let search = state.handles.register::<SearchRef>(document, native)?;
            Ok(responses::StartSearch { search })
        })
    }

    pub fn find_next(
        &self,
        document: &DocumentRef,
        request: requests::FindNext,
    ) -> Result<responses::FindNext> {
        self.with_state(|state| {
            let search = state.handles.resolve(document, &request.search)?;
            let found = state
                .engine
                .find_next(search)?
                .map(|(index, count)| SearchMatch { index, count });
            Ok(responses::FindNext { found })
        })
    }

    pub fn close_search(
        &self,
        document: &DocumentRef,
        request: requests::CloseSearch,
    ) -> Result<responses::CloseSearch> {
        self.with_state(|state| {
            let native = state.handles.release(document, &request.search)?;
            state.engine.find_close(native)?;
            Ok(responses::CloseSearch {})
        })
    }

    // --- bookmarks, destinations, actions ---

    pub fn get_first_bookmark(
        &self,
        document: &DocumentRef,
        request: requests::GetFirstBookmark,
    ) -> Result<responses::GetFirstBookmark> {
        self.with_document(document, |state, doc| {
            let parent = request
                .parent
                .as_ref()
                .map(|p| state.handles.resolve(document, p))
                .transpose()?;
            let bookmark = match state.engine.bookmark_first_child(doc, parent)? {
                Some(native) => Some(state.handles.register::<BookmarkRef>(document, native)?),
                None => None,
            };
            Ok(responses::GetFirstBookmark { bookmark })
        })
    }

    pub fn get_next_bookmark(
        &self,
        document: &DocumentRef,
        request: requests::GetNextBookmark,
    ) -> Result<responses::GetNextBookmark> {
        self.with_document(document, |state, doc| {
            let current = state.handles.resolve(document, &request.bookmark)?;
            let bookmark = match state.engine.bookmark_next_sibling(doc, current)? {
                Some(native) => Some(state.handles.register::<BookmarkRef>(document, native)?),
                None => None,
            };
            Ok(responses::GetNextBookmark { bookmark })
        })
    }

    pub fn get_bookmark_title(
        &self,
        document: &DocumentRef,
        request: requests::GetBookmarkTitle,
    ) -> Result<responses::GetBookmarkTitle> {
        self.with_state(|state| {
            let bookmark = state.handles.resolve(document, &request.bookmark)?;
            let title = state.engine.bookmark_title(bookmark)?;
            Ok(responses::GetBookmarkTitle { title })
        })
    }

    pub fn get_bookmark_dest(
        &self,
        document: &DocumentRef,
        request: requests::GetBookmarkDest,
    ) -> Result<responses::GetBookmarkDest> {
        self.with_document(document, |state, doc| {
            let bookmark = state.handles.resolve(document, &request.bookmark)?;
            let dest = match state.engine.bookmark_dest(doc, bookmark)? {
                Some(native) => Some(state.handles.register::<DestRef>(document, native)?),
                None => None,
            };
            Ok(responses::GetBookmarkDest { dest })
        })
    }

    pub fn get_bookmark_action(
        &self,
        document: &DocumentRef,
        request: requests::GetBookmarkAction,
    ) -> Result<responses::GetBookmarkAction> {
        self.with_state(|state| {
            let bookmark = state.handles.resolve(document, &request.bookmark)?;
            let action = match state.engine.bookmark_action(bookmark)? {
                Some(native) => Some(state.handles.register::<ActionRef>(document, native)?),
                None => None,
            };
            Ok(responses::GetBookmarkAction { action })
        })
    }

    pub fn get_dest_page_index(
        &self,
        document: &DocumentRef,
        request: requests::GetDestPageIndex,
    ) -> Result<responses::GetDestPageIndex> {
        self.with_document(document, |state, doc| {
            let dest = state.handles.resolve(document, &request.dest)?;
            let index = state.engine.dest_page_index(doc, dest)?;
            Ok(responses::GetDestPageIndex { index })
        })
    }

    pub fn get_action_type(
        &self,
        document: &DocumentRef,
        request: requests::GetActionType,
    ) -> Result<responses::GetActionType> {
        self.with_state(|state| {
            let action = state.handles.resolve(document, &request.action)?;
            let action_type = ActionType::from_code(state.engine.action_type(action)?);
            Ok(responses::GetActionType { action_type })
        })
    }

    pub fn get_action_dest(
        &self,
        document: &DocumentRef,
        request: requests::GetActionDest,
    ) -> Result<responses::GetActionDest> {
        self.with_document(document, |state, doc| {
            let action = state.handles.resolve(document, &request.action)?;
            let dest = match state.engine.action_dest(doc, action)? {
                Some(native) => Some(state.handles.register::<DestRef>(document, native)?),
                None => None,
            };
            Ok(responses::GetActionDest { dest })
        })
    }

    pub fn get_action_uri(
        &self,
        document: &DocumentRef,
        request: requests::GetActionUri,
    ) -> Result<responses::GetActionUri> {
        self.with_document(document, |state, doc| {
            let action = state.handles.resolve(document, &request.action)?;
            let uri = state.engine.action_uri(doc, action)?;
            Ok(responses::GetActionUri { uri })
        })
    }

    // --- links ---

    pub fn get_page_links(
        &self,
        document: &DocumentRef,
        request: requests::GetPageLinks,
    ) -> Result<responses::GetPageLinks> {
        self.with_state(|state| {
            let page = state.page(document, &request.page)?;
            let mut links = Vec::new();
            let mut pos = 0;
            while let Some((next, native)) = state.engine.link_enumerate(page, pos)? {
                links.push(state.handles.register::<LinkRef>(document, native)?);
                pos = next;
            }
            Ok(responses::GetPageLinks { links })
        })
    }

    pub fn get_link_dest(
        &self,
        document: &DocumentRef,
        request: requests::GetLinkDest,
    ) -> Result<responses::GetLinkDest> {
        self.with_document(document, |state, doc| {
            let link = state.handles.resolve(document, &request.link)?;
            let dest = match state.engine.link_dest(doc, link)? {
                Some(native) => Some(state.handles.register::<DestRef>(document, native)?),
                None => None,
            };
            Ok(responses::GetLinkDest { dest })
        })
    }

    pub fn get_link_action(
        &self,
        document: &DocumentRef,
        request: requests::GetLinkAction,
    ) -> Result<responses::GetLinkAction> {
        self.with_state(|state| {
            let link = state.handles.resolve(document, &request.link)?;
            let action = match state.engine.link_action(link)? {
                Some(native) => Some(state.handles.register::<ActionRef>(document, native)?),
                None => None,
            };
            Ok(responses::GetLinkAction { action })
        })
    }

    // --- annotations ---

    pub fn get_annot_count(
        &self,
        document: &DocumentRef,
        request: requests::GetAnnotCount,
    ) -> Result<responses::GetAnnotCount> {
        self.with_state(|state| {
            let page = state.page(document, &request.page)?;
            let count = state.engine.annot_count(page)?;
            Ok(responses::GetAnnotCount { count })
        })
    }

    pub fn get_annot(
        &self,
        document: &DocumentRef,
        request: requests::GetAnnot,
    ) -> Result<responses::GetAnnot> {
        self.with_state(|state| {
            let page = state.page(document, &request.page)?;
            let native = state.engine.annot(page, request.index)?;
            let annotation = state.handles.register::<AnnotationRef>(document, native)?;
            Ok(responses::GetAnnot { annotation })
        })
    }

    pub fn get_annot_subtype(
        &self,
        document: &DocumentRef,
        request: requests::GetAnnotSubtype,
    ) -> Result<responses::GetAnnotSubtype> {
        self.with_state(|state| {
            let annotation = state.handles.resolve(document, &request.annotation)?;
            let subtype = AnnotationSubtype::from_code(state.engine.annot_subtype(annotation)?);
            Ok(responses::GetAnnotSubtype { subtype })
        })
    }

    pub fn close_annot(
        &self,
        document: &DocumentRef,
        request: requests::CloseAnnot,
    ) -> Result<responses::CloseAnnot> {
        self.with_state(|state| {
            let native = state.handles.release(document, &request.annotation)?;
            state.engine.close_annot(native)?;
            Ok(responses::CloseAnnot {})
        })
    }

    // --- attachments ---

    pub fn get_attachment_count(
        &self,
        document: &DocumentRef,
        _request: requests::GetAttachmentCount,
    ) -> Result<responses::GetAttachmentCount> {
        self.with_document(document, |state, doc| {
            let count = state.engine.attachment_count(doc)?;
            Ok(responses::GetAttachmentCount { count })
        })
    }

    pub fn get_attachment(
        &self,
        document: &DocumentRef,
        request: requests::GetAttachment,
    ) -> Result<responses::GetAttachment> {
        self.with_document(document, |state, doc| {
            let native = state.engine.attachment(doc, request.index)?;
            let attachment = state.handles.register::<AttachmentRef>(document, native)?;
            Ok(responses::GetAttachment { attachment })
        })
    }

    pub fn get_attachment_name(
        &self,
        document: &DocumentRef,
        request: requests::GetAttachmentName,
    ) -> Result<responses::GetAttachmentName> {
        self.with_state(|state| {
            let attachment = state.handles.resolve(document, &request.attachment)?;
            let name = state.engine.attachment_name(attachment)?;
            Ok(responses::GetAttachmentName { name })
        })
    }

    pub fn get_attachment_file(
        &self,
        document: &DocumentRef,
        request: requests::GetAttachmentFile,
    ) -> Result<responses::GetAttachmentFile> {
        self.with_state(|state| {
            let attachment = state.handles.resolve(document, &request.attachment)?;
            let data = state.engine.attachment_file(attachment)?;
            Ok(responses::GetAttachmentFile { data })
        })
    }

    // --- signatures ---

    pub fn get_signature_count(
        &self,
        document: &DocumentRef,
        _request: requests::GetSignatureCount,
    ) -> Result<responses::GetSignatureCount> {
        self.with_document(document, |state, doc| {
            let count = state.engine.signature_count(doc)?;
            Ok(responses::GetSignatureCount { count })
        })
    }

    pub fn get_signature(
        &self,
        document: &DocumentRef,
        request: requests::GetSignature,
    ) -> Result<responses::GetSignature> {
        self.with_document(document, |state, doc| {
            let native = state.engine.signature(doc, request.index)?;
            let signature = state.handles.register::<SignatureRef>(document, native)?;
            Ok(responses::GetSignature { signature })
        })
    }

    pub fn get_signature_reason(
        &self,
        document: &DocumentRef,
        request: requests::GetSignatureReason,
    ) -> Result<responses::GetSignatureReason> {
        self.with_state(|state| {
            let signature = state.handles.resolve(document, &request.signature)?;
            let reason = state.engine.signature_reason(signature)?;
            Ok(responses::GetSignatureReason { reason })
        })
    }

    // --- form fill environment ---

    pub fn init_form_fill_environment(
        &self,
        document: &DocumentRef,
        _request: requests::InitFormFillEnvironment,
    ) -> Result<responses::InitFormFillEnvironment> {
        self.with_document(document, |state, doc| {
            let native = state.engine.form_init(doc)?;
            let form = state.handles.register::<FormRef>(document, native)?;
            Ok(responses::InitFormFillEnvironment { form })
        })
    }

    pub fn exit_form_fill_environment(
        &self,
        document: &DocumentRef,
        request: requests::ExitFormFillEnvironment,
    ) -> Result<responses::ExitFormFillEnvironment> {
        self.with_state(|state| {
            let native = state.handles.release(document, &request.form)?;
            state.engine.form_exit(native)?;
            Ok(responses::ExitFormFillEnvironment {})
        })
    }

    pub fn set_focusable_annot_subtypes(
        &self,
        document: &DocumentRef,
        request: requests::SetFocusableAnnotSubtypes,
    ) -> Result<responses::SetFocusableAnnotSubtypes> {
        self.with_state(|state| {
            let form = state.handles.resolve(document, &request.form)?;
            let codes: Vec<u32> = request.subtypes.iter().map(|s| s.code()).collect();
            state.engine.form_set_focusable_subtypes(form, &codes)?;
            Ok(responses::SetFocusableAnnotSubtypes {})
        })
    }

    /// Reads the configured subtypes without writing them back
    pub fn get_focusable_annot_subtypes(
        &self,
        document: &DocumentRef,
        request: requests::GetFocusableAnnotSubtypes,
    ) -> Result<responses::GetFocusableAnnotSubtypes> {
        self.with_state(|state| {
            let form = state.handles.resolve(document, &request.form)?;
            let subtypes = state
                .engine
                .form_focusable_subtypes(form)?
                .into_iter()
                .map(AnnotationSubtype::from_code)
                .collect();
            Ok(responses::GetFocusableAnnotSubtypes { subtypes })
        })
    }

    // --- structure tree ---

    pub fn get_struct_tree(
        &self,
        document: &DocumentRef,
        request: requests::GetStructTree,
    ) -> Result<responses::GetStructTree> {
        self.with_state(|state| {
            let page = state.page(document, &request.page)?;
            let native = state.engine.struct_tree(page)?;
            let struct_tree = state.handles.register::<StructTreeRef>(document, native)?;
            Ok(responses::GetStructTree { struct_tree })
        })
    }

    pub fn count_struct_tree_children(
        &self,
        document: &DocumentRef,
        request: requests::CountStructTreeChildren,
    ) -> Result<responses::CountStructTreeChildren> {
        self.with_state(|state| {
            let tree = state.handles.resolve(document, &request.struct_tree)?;
            let count = state.engine.struct_tree_count_children(tree)?;
            Ok(responses::CountStructTreeChildren { count })
        })
    }

    pub fn close_struct_tree(
        &self,
        document: &DocumentRef,
        request: requests::CloseStructTree,
    ) -> Result<responses::CloseStructTree> {
        self.with_state(|state| {
            let native = state.handles.release(document, &request.struct_tree)?;
            state.engine.struct_tree_close(native)?;
            Ok(responses::CloseStructTree {})
        })
    }
}
