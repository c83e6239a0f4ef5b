//! Incremental revision appender
//!
//! Loads a document twice from the same bytes: a read-only baseline and a
//! working copy that accumulates edits. On [`Appender::write`] the working
//! copy is compared against the baseline and only the differences, plus any
//! new objects, are written after the untouched original bytes.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, info, instrument, warn};

use crate::arena::{Arena, ForeignArena, Graphs, Handle};
use crate::assemble::{page_list_unchanged, rebuild_page_tree, Numbering};
use crate::collect::{ChangeSet, Collector};
use crate::config::AppendOptions;
use crate::error::{AppendError, Result};
use crate::import::{duplicate_page, Importer};
use crate::pages::{catalog_id, enumerate_pages, inherited_attributes, page_tree_root};
use crate::provenance::Tracker;
use crate::revision::{locate_startxref, RevisionLayout, RevisionWriter, TrailerInfo, XrefFormat};
use crate::signature::field::{acroform_with, field_names, unique_field_name};
use crate::signature::orchestrator::{PendingSignature, SigningSession};
use crate::signature::{pdf_date, text_string, PdfSignature, SignatureField};

/// What a call to [`Appender::write`] produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    /// Objects written under an existing number
    pub replaced: usize,
    /// Objects written under a new number
    pub fresh: usize,
    pub signatures: usize,
    pub xref_format: XrefFormat,
    pub original_len: usize,
    pub total_len: usize,
}

impl WriteSummary {
    pub fn objects_written(&self) -> usize {
        self.replaced + self.fresh
    }

    pub fn revision_len(&self) -> usize {
        self.total_len - self.original_len
    }
}

pub struct Appender {
    original: Vec<u8>,
    baseline: Document,
    working: Document,
    foreign: ForeignArena,
    options: AppendOptions,
    /// Greatest object number in use when the document was loaded
    greatest: u32,
    prev_size: u32,
    startxref: usize,
    xref_format: XrefFormat,
    baseline_pages: Vec<ObjectId>,
    pages: Vec<Handle>,
    /// Foreign objects written under an existing number
    explicit: HashMap<Handle, ObjectId>,
    touched: Vec<Handle>,
    acroform: Option<Handle>,
    signatures: Vec<(Handle, PdfSignature)>,
    written: bool,
}

impl Appender {
    /// Parse `bytes` into a baseline and a working copy
    pub fn load(bytes: Vec<u8>) -> Result<Self> {
        Self::load_with_options(bytes, AppendOptions::default())
    }

    pub fn load_with_options(bytes: Vec<u8>, options: AppendOptions) -> Result<Self> {
        let baseline =
            Document::load_mem(&bytes).map_err(|e| AppendError::ParseError(e.to_string()))?;
        if baseline.trailer.has(b"Encrypt") {
            return Err(AppendError::Unsupported(
                "encrypted documents cannot be appended to".into(),
            ));
        }
        let working =
            Document::load_mem(&bytes).map_err(|e| AppendError::ParseError(e.to_string()))?;

        catalog_id(&baseline)?;
        let startxref = locate_startxref(&bytes)?;
        let xref_format = XrefFormat::detect(&bytes, startxref);

        let prev_size = baseline
            .trailer
            .get(b"Size")
            .and_then(Object::as_i64)
            .ok()
            .and_then(|size| u32::try_from(size).ok())
            .unwrap_or(baseline.max_id + 1);
        let greatest = working.max_id.max(prev_size.saturating_sub(1));

        let baseline_pages = enumerate_pages(&baseline)?;
        let pages = baseline_pages.iter().copied().map(Handle::baseline).collect();

        debug!(
            len = bytes.len(),
            pages = baseline_pages.len(),
            greatest,
            ?xref_format,
            "loaded document"
        );

        Ok(Self {
            original: bytes,
            baseline,
            working,
            foreign: ForeignArena::new(),
            options,
            greatest,
            prev_size,
            startxref,
            xref_format,
            baseline_pages,
            pages,
            explicit: HashMap::new(),
            touched: Vec::new(),
            acroform: None,
            signatures: Vec::new(),
            written: false,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(fs::read(path)?)
    }

    pub fn options(&self) -> &AppendOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: AppendOptions) {
        self.options = options;
    }

    pub fn original(&self) -> &[u8] {
        &self.original
    }

    pub fn baseline(&self) -> &Document {
        &self.baseline
    }

    pub fn working(&self) -> &Document {
        &self.working
    }

    fn graphs(&self) -> Graphs<'_> {
        Graphs::new(&self.baseline, &self.working, &self.foreign)
    }

    // === Pages ===

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Handle of 1-based page `number`
    pub fn page(&self, number: u32) -> Result<Handle> {
        self.page_index(number).map(|index| self.pages[index])
    }

    fn page_index(&self, number: u32) -> Result<usize> {
        let index = number as usize;
        if index == 0 || index > self.pages.len() {
            return Err(AppendError::PageOutOfRange {
                page: index,
                count: self.pages.len(),
            });
        }
        Ok(index - 1)
    }

    /// Append pages; a page already in the list is added as a copy
    pub fn add_pages(&mut self, pages: &[Handle]) -> Result<()> {
        for &handle in pages {
            self.object(handle)?
                .as_dict()
                .map_err(|_| AppendError::InvalidPageTree(format!("{:?} is not a page", handle)))?;
            let handle = if self.pages.contains(&handle) {
                self.duplicate(handle)?
            } else {
                handle
            };
            self.pages.push(handle);
        }
        Ok(())
    }

    /// Deep-copy 1-based pages of `source` and append them
    pub fn import_pages(&mut self, source: &Document, numbers: &[u32]) -> Result<Vec<Handle>> {
        let handles =
            Importer::new(source).import_pages(numbers, &mut self.working, &mut self.foreign)?;
        self.pages.extend(handles.iter().copied());
        Ok(handles)
    }

    /// Append a blank page with an empty content stream
    pub fn new_page(&mut self, media_box: [f32; 4]) -> Handle {
        let content = self.add_object(Stream::new(Dictionary::new(), Vec::new()));

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set(
            "MediaBox",
            Object::Array(media_box.iter().map(|&v| Object::Real(v)).collect()),
        );
        page.set("Resources", Object::Dictionary(Dictionary::new()));
        page.set("Contents", content.reference());

        let handle = self.add_object(page);
        self.pages.push(handle);
        handle
    }

    /// Remove 1-based page `number` from the page list
    pub fn remove_page(&mut self, number: u32) -> Result<Handle> {
        let index = self.page_index(number)?;
        Ok(self.pages.remove(index))
    }

    /// Put a copy of `page` in place of page `number`, keeping its object number
    pub fn replace_page(&mut self, number: u32, page: Handle) -> Result<()> {
        let index = self.page_index(number)?;
        let old = self.pages[index];
        let copy = self.duplicate(page)?;

        let number = match old.arena {
            Arena::Foreign => self.explicit.remove(&old),
            Arena::Baseline | Arena::Working => Some(old.id),
        };
        if let Some(id) = number {
            self.explicit.insert(copy, id);
        }
        self.pages[index] = copy;
        Ok(())
    }

    fn duplicate(&mut self, page: Handle) -> Result<Handle> {
        let (dict, inherited) = {
            let graphs = self.graphs();
            let dict = graphs
                .resolve_required(page)?
                .as_dict()
                .map_err(|_| AppendError::InvalidPageTree(format!("{:?} is not a page", page)))?
                .clone();
            let inherited = match page.arena {
                Arena::Baseline => inherited_attributes(&self.baseline, page.id),
                Arena::Working => inherited_attributes(&self.working, page.id),
                Arena::Foreign => Vec::new(),
            };
            (dict, inherited)
        };
        Ok(duplicate_page(
            &dict,
            inherited,
            &mut self.working,
            &mut self.foreign,
        ))
    }

    /// Draw `page` on top of page `number`
    ///
    /// The incoming page becomes a Form XObject; the existing content is
    /// wrapped in `q`/`Q` so its graphics state cannot leak into the overlay.
    pub fn merge_page_with(&mut self, number: u32, page: Handle) -> Result<()> {
        let target = self.page(number)?.editable();
        let form = self.page_as_form(page)?;
        let form = self.add_object(form);

        let (contents, resources) = {
            let graphs = self.graphs();
            let target_dict = graphs
                .resolve_required(target)?
                .as_dict()
                .map_err(|_| AppendError::InvalidPageTree(format!("{:?} is not a page", target)))?;

            let contents = match target_dict.get(b"Contents") {
                Ok(Object::Array(items)) => items.clone(),
                Ok(reference @ Object::Reference(_)) => vec![reference.clone()],
                _ => Vec::new(),
            };
            let resources = self.inlined_resources(target, target_dict);
            (contents, resources)
        };

        let mut resources = resources;
        let mut xobjects = match resources.get(b"XObject") {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(id)) => self
                .graphs()
                .resolve(self.graphs().child(target.arena, *id))
                .and_then(|object| object.as_dict().ok())
                .cloned()
                .unwrap_or_default(),
            _ => Dictionary::new(),
        };
        let name = (1..)
            .map(|n| format!("Mrg{}", n))
            .find(|name| !xobjects.has(name.as_bytes()))
            .unwrap_or_else(|| "Mrg".to_string());
        xobjects.set(name.as_bytes().to_vec(), form.reference());
        resources.set("XObject", Object::Dictionary(xobjects));

        let open = self.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let close = self.add_object(Stream::new(
            Dictionary::new(),
            format!("\nQ\nq /{} Do Q\n", name).into_bytes(),
        ));
        let mut new_contents = vec![open.reference()];
        new_contents.extend(contents);
        new_contents.push(close.reference());

        let target_dict = self
            .object_mut(target)?
            .as_dict_mut()
            .map_err(|_| AppendError::InvalidPageTree(format!("{:?} is not a page", target)))?;
        target_dict.set("Contents", Object::Array(new_contents));
        target_dict.set("Resources", Object::Dictionary(resources));
        Ok(())
    }

    /// Form XObject drawing the content of `page`
    fn page_as_form(&self, page: Handle) -> Result<Stream> {
        let graphs = self.graphs();
        let dict = graphs
            .resolve_required(page)?
            .as_dict()
            .map_err(|_| AppendError::InvalidPageTree(format!("{:?} is not a page", page)))?;

        let mut content = Vec::new();
        let streams: Vec<&Object> = match dict.get(b"Contents") {
            Ok(Object::Array(items)) => items.iter().collect(),
            Ok(other) => vec![other],
            Err(_) => Vec::new(),
        };
        for item in streams {
            let (_, object) = graphs.deref(page.arena, item);
            if let Some(Object::Stream(stream)) = object {
                let bytes = if stream.dict.has(b"Filter") {
                    stream.decompressed_content().map_err(|e| {
                        AppendError::Unsupported(format!("cannot decode page content: {}", e))
                    })?
                } else {
                    stream.content.clone()
                };
                content.extend_from_slice(&bytes);
                content.push(b'\n');
            }
        }

        let media_box = match page.arena {
            Arena::Baseline => crate::pages::media_box(&self.baseline, page.id),
            Arena::Working => crate::pages::media_box(&self.working, page.id),
            Arena::Foreign => dict
                .get(b"MediaBox")
                .and_then(Object::as_array)
                .ok()
                .and_then(|values| {
                    let numbers: Vec<f32> =
                        values.iter().filter_map(crate::pages::number).collect();
                    numbers.try_into().ok()
                }),
        }
        .unwrap_or([0.0, 0.0, 612.0, 792.0]);

        let mut form = Dictionary::new();
        form.set("Type", Object::Name(b"XObject".to_vec()));
        form.set("Subtype", Object::Name(b"Form".to_vec()));
        form.set(
            "BBox",
            Object::Array(media_box.iter().map(|&v| Object::Real(v)).collect()),
        );
        form.set(
            "Resources",
            Object::Dictionary(self.inlined_resources(page, dict)),
        );
        Ok(Stream::new(form, content))
    }

    /// Page resources as a direct dictionary, following references and
    /// inheritance
    fn inlined_resources(&self, page: Handle, dict: &Dictionary) -> Dictionary {
        let graphs = self.graphs();
        let inherited;
        let value = match dict.get(b"Resources") {
            Ok(value) => value,
            Err(_) => {
                let doc = match page.arena {
                    Arena::Baseline => &self.baseline,
                    _ => &self.working,
                };
                inherited = inherited_attributes(doc, page.id)
                    .into_iter()
                    .find(|(key, _)| key.as_slice() == b"Resources")
                    .map(|(_, value)| value);
                match &inherited {
                    Some(value) => value,
                    None => return Dictionary::new(),
                }
            }
        };
        let (_, resolved) = graphs.deref(page.arena, value);
        resolved
            .and_then(|object| object.as_dict().ok())
            .cloned()
            .unwrap_or_default()
    }

    // === Objects ===

    /// Add a new object to the foreign arena
    pub fn add_object(&mut self, object: impl Into<Object>) -> Handle {
        let id = self.working.new_object_id();
        self.foreign.insert(id, object.into());
        Handle::foreign(id)
    }

    pub fn object(&self, handle: Handle) -> Result<&Object> {
        self.graphs().resolve_required(handle)
    }

    /// Mutable access; baseline handles are redirected to the working copy
    ///
    /// Edited working objects are written if they differ from the baseline.
    pub fn object_mut(&mut self, handle: Handle) -> Result<&mut Object> {
        let handle = handle.editable();
        match handle.arena {
            Arena::Foreign => self
                .foreign
                .get_mut(handle.id)
                .ok_or(AppendError::ObjectNotFound(handle.id.0, handle.id.1)),
            _ => {
                if !self.working.objects.contains_key(&handle.id) {
                    return Err(AppendError::ReadOnlyObject(handle.id.0, handle.id.1));
                }
                self.update_object(handle);
                self.working
                    .objects
                    .get_mut(&handle.id)
                    .ok_or(AppendError::ObjectNotFound(handle.id.0, handle.id.1))
            }
        }
    }

    /// Make sure `handle` is considered when writing
    pub fn update_object(&mut self, handle: Handle) {
        let handle = handle.editable();
        if !self.touched.contains(&handle) {
            self.touched.push(handle);
        }
    }

    fn catalog_mut(&mut self) -> Result<&mut Dictionary> {
        let id = catalog_id(&self.working)?;
        self.object_mut(Handle::working(id))?
            .as_dict_mut()
            .map_err(|_| AppendError::InvalidCatalog("catalog is not a dictionary".into()))
    }

    /// Install `acroform` as the interactive form dictionary
    ///
    /// An existing indirect AcroForm keeps its object number.
    pub fn replace_acroform(&mut self, acroform: Handle) -> Result<()> {
        self.object(acroform)?
            .as_dict()
            .map_err(|_| AppendError::InvalidCatalog("AcroForm is not a dictionary".into()))?;

        let current = {
            let id = catalog_id(&self.working)?;
            self.working
                .get_object(id)
                .and_then(Object::as_dict)
                .ok()
                .and_then(|catalog| catalog.get(b"AcroForm").ok())
                .and_then(|value| value.as_reference().ok())
        };

        match (current, acroform.arena) {
            (Some(id), Arena::Foreign) => {
                self.explicit.insert(acroform, id);
            }
            _ => {
                self.catalog_mut()?
                    .set("AcroForm", acroform.reference());
            }
        }
        self.acroform = Some(acroform);
        Ok(())
    }

    // === Signatures ===

    /// Place a signature field on page `number`; signed during [`Self::write`]
    pub fn sign(&mut self, number: u32, mut field: SignatureField) -> Result<Handle> {
        let signature = field.signature.take().ok_or(AppendError::MissingSignature)?;
        let page = self.page(number)?;

        let signer = signature
            .info()
            .name
            .clone()
            .unwrap_or_else(|| "Unknown Signer".to_string());
        let appearance = field.appearance_stream(&signer, signature.info().reason.as_deref());

        let sig_handle = self.add_object(signature.dictionary());
        let appearance = self.add_object(appearance);

        field.name = unique_field_name(&field.name, &self.existing_field_names());
        let widget = field.widget(sig_handle.id, appearance.id, page.id);
        let widget = self.add_object(widget);

        self.append_to_annots(page, widget)?;
        self.append_to_acroform(widget)?;

        debug!(page = number, field = %field.name, "signature field placed");
        self.signatures.push((sig_handle, signature));
        Ok(widget)
    }

    fn append_to_annots(&mut self, page: Handle, widget: Handle) -> Result<()> {
        let page = page.editable();
        let annots = self
            .object(page)?
            .as_dict()
            .map_err(|_| AppendError::InvalidPageTree(format!("{:?} is not a page", page)))?
            .get(b"Annots")
            .ok()
            .cloned();

        let annots = match annots {
            Some(Object::Reference(id)) => {
                let handle = self.graphs().child(page.arena, id).editable();
                match self.object_mut(handle)? {
                    Object::Array(items) => items.push(widget.reference()),
                    other => {
                        warn!(?handle, "Annots is not an array, replacing it");
                        *other = Object::Array(vec![widget.reference()]);
                    }
                }
                return Ok(());
            }
            Some(Object::Array(mut items)) => {
                items.push(widget.reference());
                items
            }
            _ => vec![widget.reference()],
        };

        self.object_mut(page)?
            .as_dict_mut()
            .map_err(|_| AppendError::InvalidPageTree(format!("{:?} is not a page", page)))?
            .set("Annots", Object::Array(annots));
        Ok(())
    }

    /// Where AcroForm edits go: a registered replacement or the catalog's
    /// indirect AcroForm; `None` for a direct or missing one
    fn acroform_handle(&self) -> Result<Option<Handle>> {
        if let Some(handle) = self.acroform {
            return Ok(Some(handle.editable()));
        }
        let catalog = self
            .working
            .get_object(catalog_id(&self.working)?)
            .and_then(Object::as_dict)
            .map_err(|_| AppendError::InvalidCatalog("catalog is not a dictionary".into()))?;
        Ok(match catalog.get(b"AcroForm") {
            Ok(Object::Reference(id)) => Some(self.graphs().child(Arena::Working, *id)),
            _ => None,
        })
    }

    fn has_direct_acroform(&self) -> Result<bool> {
        let catalog = self
            .working
            .get_object(catalog_id(&self.working)?)
            .and_then(Object::as_dict)
            .map_err(|_| AppendError::InvalidCatalog("catalog is not a dictionary".into()))?;
        Ok(matches!(catalog.get(b"AcroForm"), Ok(Object::Dictionary(_))))
    }

    fn acroform_mut(&mut self, handle: Option<Handle>) -> Result<&mut Dictionary> {
        let acroform = match handle {
            Some(handle) => self.object_mut(handle)?,
            None => self
                .catalog_mut()?
                .get_mut(b"AcroForm")
                .map_err(|_| AppendError::InvalidCatalog("AcroForm is missing".into()))?,
        };
        acroform
            .as_dict_mut()
            .map_err(|_| AppendError::InvalidCatalog("AcroForm is not a dictionary".into()))
    }

    fn append_to_acroform(&mut self, widget: Handle) -> Result<()> {
        let handle = self.acroform_handle()?;
        if handle.is_none() && !self.has_direct_acroform()? {
            let acroform = self.add_object(acroform_with(widget.id));
            self.catalog_mut()?.set("AcroForm", acroform.reference());
            return Ok(());
        }

        let indirect_fields = {
            let acroform = self.acroform_mut(handle)?;
            acroform.set("SigFlags", Object::Integer(3));
            let fields = acroform.get(b"Fields").ok().cloned();
            match fields {
                Some(Object::Reference(id)) => Some(id),
                Some(Object::Array(mut items)) => {
                    items.push(widget.reference());
                    acroform.set("Fields", Object::Array(items));
                    None
                }
                _ => {
                    acroform.set("Fields", Object::Array(vec![widget.reference()]));
                    None
                }
            }
        };

        if let Some(id) = indirect_fields {
            let owner = handle.map_or(Arena::Working, |h| h.arena);
            let fields = self.graphs().child(owner, id).editable();
            match self.object_mut(fields)? {
                Object::Array(items) => items.push(widget.reference()),
                other => {
                    warn!(handle = ?fields, "Fields is not an array, replacing it");
                    *other = Object::Array(vec![widget.reference()]);
                }
            }
        }
        Ok(())
    }

    /// `T` values of the fields already registered in the AcroForm
    fn existing_field_names(&self) -> Vec<Vec<u8>> {
        let graphs = self.graphs();
        let (owner, acroform) = match self.acroform_handle() {
            Ok(Some(handle)) => (handle.arena, graphs.resolve(handle)),
            _ => (
                Arena::Working,
                catalog_id(&self.working)
                    .ok()
                    .and_then(|id| self.working.get_object(id).ok())
                    .and_then(|catalog| catalog.as_dict().ok())
                    .and_then(|catalog| catalog.get(b"AcroForm").ok()),
            ),
        };
        let Some(acroform) = acroform.and_then(|o| o.as_dict().ok()) else {
            return Vec::new();
        };
        let fields = match acroform.get(b"Fields") {
            Ok(value) => graphs.deref(owner, value).1,
            Err(_) => None,
        };
        let Some(Object::Array(fields)) = fields else {
            return Vec::new();
        };
        field_names(
            fields
                .iter()
                .filter_map(|field| graphs.deref(owner, field).1)
                .filter_map(|field| field.as_dict().ok()),
        )
    }

    // === Writing ===

    /// Stamp `Producer` and `ModDate` into the Info dictionary
    fn stamp_info(&mut self) -> Result<Option<Handle>> {
        let now = pdf_date(&Utc::now());
        let producer = text_string(&self.options.producer);

        match self.working.trailer.get(b"Info").and_then(Object::as_reference) {
            Ok(id) => {
                let handle = Handle::working(id);
                if let Ok(info) = self.object_mut(handle)?.as_dict_mut() {
                    info.set("Producer", producer);
                    info.set("ModDate", Object::String(now.into_bytes(), StringFormat::Literal));
                }
                Ok(Some(handle))
            }
            Err(_) => {
                let mut info = Dictionary::new();
                info.set("Producer", producer);
                info.set("ModDate", Object::String(now.into_bytes(), StringFormat::Literal));
                Ok(Some(self.add_object(info)))
            }
        }
    }

    /// Render the revision without touching any sink
    fn render(&mut self) -> Result<(RevisionLayout, WriteSummary)> {
        let info = if self.options.stamp_info {
            self.stamp_info()?
        } else {
            self.working
                .trailer
                .get(b"Info")
                .and_then(Object::as_reference)
                .ok()
                .map(Handle::working)
        };

        let catalog = Handle::working(catalog_id(&self.working)?);
        let pages_root = page_tree_root(&self.working)?;
        let working_pages = enumerate_pages(&self.working)?;

        let mut changes = ChangeSet::with_replacements(&self.explicit);
        if page_list_unchanged(&self.pages, &self.baseline_pages, &working_pages) {
            changes.ignore.insert(Handle::working(pages_root));
        } else {
            rebuild_page_tree(
                &mut self.working,
                &mut self.foreign,
                pages_root,
                &mut self.pages,
            )?;
        }

        let mut roots = vec![catalog];
        roots.extend(info);
        roots.push(Handle::working(pages_root));
        roots.extend(self.pages.iter().map(|page| page.editable()));
        roots.extend(self.touched.iter().copied());
        roots.extend(self.acroform);
        roots.extend(self.signatures.iter().map(|(handle, _)| *handle));

        let graphs = self.graphs();
        let tracker = Tracker::new(graphs, self.greatest, &self.explicit);
        let mut collector = Collector::new(tracker, changes);
        for root in roots {
            collector.collect(root);
        }
        let changes = collector.finish();

        let numbering = Numbering::assign(&changes, self.greatest);
        let mut objects = numbering.render(&graphs)?;

        let size = numbering
            .max_number()
            .map_or(0, |n| n + 1)
            .max(self.prev_size)
            .max(self.greatest + 1);
        let final_id = |handle: Handle| numbering.map.get(&handle).copied().unwrap_or(handle.id);
        let trailer = TrailerInfo {
            root: final_id(catalog),
            info: info.map(final_id),
            id: self.working.trailer.get(b"ID").ok().cloned(),
            prev: self.startxref,
            size,
        };

        let writer = RevisionWriter::new(self.xref_format, self.options.compress_xref_stream);
        let layout = if self.signatures.is_empty() {
            writer.write(&self.original, &objects, &BTreeSet::new(), &trailer)?
        } else {
            let pending = self
                .signatures
                .iter()
                .map(|(handle, signature)| {
                    let object = numbering
                        .map
                        .get(handle)
                        .copied()
                        .ok_or(AppendError::ObjectNotFound(handle.id.0, handle.id.1))?;
                    Ok(PendingSignature { object, signature })
                })
                .collect::<Result<Vec<_>>>()?;
            SigningSession::new(pending).run(&writer, &self.original, &mut objects, &trailer)?
        };

        let replaced = numbering
            .order
            .iter()
            .filter(|(handle, _)| changes.replace.contains_key(handle))
            .count();
        let summary = WriteSummary {
            replaced,
            fresh: numbering.order.len() - replaced,
            signatures: self.signatures.len(),
            xref_format: self.xref_format,
            original_len: self.original.len(),
            total_len: layout.total_len(),
        };
        Ok((layout, summary))
    }

    /// Write the original bytes followed by the new revision
    ///
    /// Everything is rendered before the first byte reaches `sink`, so on
    /// error the sink is left untouched. An appender can be written once:
    /// rendering edits the working copy, so after any failure, including a
    /// recoverable one such as `SignatureTooLarge`, later calls return
    /// `AlreadyWritten` and the document has to be loaded again.
    #[instrument(skip_all)]
    pub fn write<W: Write>(&mut self, sink: &mut W) -> Result<WriteSummary> {
        if self.written {
            return Err(AppendError::AlreadyWritten);
        }
        self.written = true;

        let (layout, summary) = self.render()?;
        sink.write_all(&self.original)?;
        sink.write_all(&layout.bytes)?;
        sink.flush()?;

        info!(
            replaced = summary.replaced,
            fresh = summary.fresh,
            signatures = summary.signatures,
            revision_len = summary.revision_len(),
            "revision appended"
        );
        Ok(summary)
    }

    /// Write to `path` through a `.partial` file renamed on success
    pub fn write_to_file(&mut self, path: impl AsRef<Path>) -> Result<WriteSummary> {
        let path = path.as_ref();
        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");

        let result = File::create(&partial)
            .map_err(AppendError::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                let summary = self.write(&mut writer)?;
                writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
                Ok(summary)
            });

        match result {
            Ok(summary) => {
                fs::rename(&partial, path)?;
                Ok(summary)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial) {
                    debug!(error = %cleanup, "could not remove partial file");
                }
                Err(e)
            }
        }
    }
}
