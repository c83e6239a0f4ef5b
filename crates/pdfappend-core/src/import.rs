//! Copying pages from other documents
//!
//! Imported objects land in the foreign arena under ids drawn from the
//! working document, so they can be referenced from working objects right
//! away. Back-links into the source page tree are dropped: they would pull
//! the entire source document into the revision.

use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::arena::{ForeignArena, Handle};
use crate::error::{AppendError, Result};
use crate::pages::{enumerate_pages, flatten_into, inherited_attributes};

/// Deep-copies objects out of one source document
///
/// Objects shared between several imported pages are copied once.
pub struct Importer<'a> {
    source: &'a Document,
    map: HashMap<ObjectId, ObjectId>,
}

impl<'a> Importer<'a> {
    pub fn new(source: &'a Document) -> Self {
        Self {
            source,
            map: HashMap::new(),
        }
    }

    /// Import 1-based page numbers, in the order given
    pub fn import_pages(
        &mut self,
        numbers: &[u32],
        working: &mut Document,
        foreign: &mut ForeignArena,
    ) -> Result<Vec<Handle>> {
        let pages = enumerate_pages(self.source)?;

        let mut source_ids = Vec::with_capacity(numbers.len());
        for &number in numbers {
            let id = (number as usize)
                .checked_sub(1)
                .and_then(|index| pages.get(index))
                .ok_or(AppendError::PageOutOfRange {
                    page: number as usize,
                    count: pages.len(),
                })?;
            source_ids.push(*id);
        }

        source_ids
            .into_iter()
            .map(|id| self.import_page(id, working, foreign))
            .collect()
    }

    fn import_page(
        &mut self,
        page_id: ObjectId,
        working: &mut Document,
        foreign: &mut ForeignArena,
    ) -> Result<Handle> {
        let mut page = self
            .source
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|_| AppendError::InvalidPageTree(format!("page {:?} is not a dictionary", page_id)))?
            .clone();
        flatten_into(&mut page, inherited_attributes(self.source, page_id));
        page.remove(b"Parent");

        let new_id = working.new_object_id();
        let mut pending = Vec::new();
        let page = self.remap(Object::Dictionary(page), working, &mut pending);
        foreign.insert(new_id, page);

        while let Some((old_id, new_id)) = pending.pop() {
            let object = match self.source.objects.get(&old_id) {
                Some(object) => object.clone(),
                None => {
                    warn!(id = ?old_id, "dangling reference in imported page");
                    Object::Null
                }
            };
            let object = self.remap(object, working, &mut pending);
            foreign.insert(new_id, object);
        }

        debug!(source = ?page_id, id = ?new_id, "imported page");
        Ok(Handle::foreign(new_id))
    }

    fn remap(
        &mut self,
        object: Object,
        working: &mut Document,
        pending: &mut Vec<(ObjectId, ObjectId)>,
    ) -> Object {
        match object {
            Object::Reference(id) => {
                let new_id = match self.map.get(&id) {
                    Some(&new_id) => new_id,
                    None => {
                        let new_id = working.new_object_id();
                        self.map.insert(id, new_id);
                        pending.push((id, new_id));
                        new_id
                    }
                };
                Object::Reference(new_id)
            }
            Object::Array(items) => Object::Array(
                items
                    .into_iter()
                    .map(|item| self.remap(item, working, pending))
                    .collect(),
            ),
            Object::Dictionary(dict) => {
                Object::Dictionary(self.remap_dict(dict, working, pending))
            }
            Object::Stream(mut stream) => {
                stream.dict = self.remap_dict(stream.dict, working, pending);
                Object::Stream(stream)
            }
            other => other,
        }
    }

    fn remap_dict(
        &mut self,
        dict: Dictionary,
        working: &mut Document,
        pending: &mut Vec<(ObjectId, ObjectId)>,
    ) -> Dictionary {
        let mut remapped = Dictionary::new();
        for (key, value) in dict.iter() {
            if self.is_page_tree_back_link(key, value) {
                continue;
            }
            remapped.set(key.clone(), self.remap(value.clone(), working, pending));
        }
        remapped
    }

    /// `Parent` / `P` entries pointing at a page or page tree node
    fn is_page_tree_back_link(&self, key: &[u8], value: &Object) -> bool {
        if key != b"Parent" && key != b"P" {
            return false;
        }
        let Ok(target) = value.as_reference() else {
            return false;
        };
        matches!(
            self.source
                .get_object(target)
                .and_then(Object::as_dict)
                .and_then(|dict| dict.get(b"Type"))
                .and_then(Object::as_name),
            Ok(b"Page") | Ok(b"Pages")
        )
    }
}

/// Shallow copy of a page into the foreign arena
///
/// References inside the copy keep pointing at the original objects.
pub fn duplicate_page(
    page: &Dictionary,
    inherited: Vec<(Vec<u8>, Object)>,
    working: &mut Document,
    foreign: &mut ForeignArena,
) -> Handle {
    let mut copy = page.clone();
    flatten_into(&mut copy, inherited);
    copy.remove(b"Parent");

    let id = working.new_object_id();
    foreign.insert(id, Object::Dictionary(copy));
    Handle::foreign(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Stream;
    use pretty_assertions::assert_eq;

    fn name(n: &str) -> Object {
        Object::Name(n.as_bytes().to_vec())
    }

    /// Two pages sharing one font, page 2 carries an annotation pointing back
    fn source() -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", name("Font")),
            ("BaseFont", name("Helvetica")),
        ])));
        let resources = Dictionary::from_iter(vec![(
            "Font",
            Object::Dictionary(Dictionary::from_iter(vec![("F1", Object::Reference(font_id))])),
        )]);

        let mut kids = Vec::new();
        for text in ["one", "two"] {
            let content = doc.add_object(Stream::new(
                Dictionary::new(),
                format!("BT ({}) Tj ET", text).into_bytes(),
            ));
            let page_id = doc.add_object(Dictionary::from_iter(vec![
                ("Type", name("Page")),
                ("Parent", Object::Reference(pages_id)),
                ("Contents", Object::Reference(content)),
            ]));
            kids.push(Object::Reference(page_id));
        }

        let annot = doc.add_object(Dictionary::from_iter(vec![
            ("Type", name("Annot")),
            ("Subtype", name("Text")),
            ("P", kids[1].clone()),
        ]));
        if let Ok(Object::Dictionary(page)) = doc.get_object_mut(kids[1].as_reference().unwrap()) {
            page.set("Annots", Object::Array(vec![Object::Reference(annot)]));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter(vec![
                ("Type", name("Pages")),
                ("Count", Object::Integer(2)),
                ("Kids", Object::Array(kids)),
                ("Resources", Object::Dictionary(resources)),
                (
                    "MediaBox",
                    Object::Array(vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(300),
                        Object::Integer(400),
                    ]),
                ),
            ])),
        );
        let catalog = doc.add_object(Dictionary::from_iter(vec![
            ("Type", name("Catalog")),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog));
        doc
    }

    fn target() -> Document {
        let mut doc = Document::with_version("1.5");
        doc.max_id = 50;
        doc
    }

    #[test]
    fn test_import_flattens_and_drops_back_links() {
        let source = source();
        let mut working = target();
        let mut foreign = ForeignArena::new();

        let handles = Importer::new(&source)
            .import_pages(&[2], &mut working, &mut foreign)
            .unwrap();
        assert_eq!(handles.len(), 1);

        let page = foreign.get(handles[0].id).unwrap().as_dict().unwrap();
        assert!(!page.has(b"Parent"));
        assert!(page.has(b"MediaBox"));
        assert!(page.has(b"Resources"));
        assert!(handles[0].id.0 > 50);

        let annots = page.get(b"Annots").unwrap().as_array().unwrap();
        let annot = foreign
            .get(annots[0].as_reference().unwrap())
            .unwrap()
            .as_dict()
            .unwrap();
        assert!(!annot.has(b"P"));
    }

    #[test]
    fn test_nested_dictionary_references_are_remapped() {
        let source = source();
        let mut working = target();
        let mut foreign = ForeignArena::new();

        let handles = Importer::new(&source)
            .import_pages(&[1], &mut working, &mut foreign)
            .unwrap();

        let page = foreign.get(handles[0].id).unwrap().as_dict().unwrap();
        let fonts = page
            .get(b"Resources")
            .and_then(Object::as_dict)
            .and_then(|resources| resources.get(b"Font"))
            .and_then(Object::as_dict)
            .unwrap();
        let font_id = fonts.get(b"F1").unwrap().as_reference().unwrap();
        assert!(font_id.0 > 50);
        let font = foreign.get(font_id).unwrap().as_dict().unwrap();
        assert_eq!(font.get(b"BaseFont").unwrap().as_name().unwrap(), b"Helvetica");
    }

    #[test]
    fn test_shared_objects_are_copied_once() {
        let source = source();
        let mut working = target();
        let mut foreign = ForeignArena::new();

        Importer::new(&source)
            .import_pages(&[1, 2], &mut working, &mut foreign)
            .unwrap();

        let fonts = (51..=working.max_id)
            .filter_map(|n| foreign.get((n, 0)))
            .filter(|object| {
                object
                    .as_dict()
                    .and_then(|d| d.get(b"Type"))
                    .and_then(Object::as_name)
                    .map(|n| n == b"Font")
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(fonts, 1);
    }

    #[test]
    fn test_out_of_range_page() {
        let source = source();
        let mut working = target();
        let mut foreign = ForeignArena::new();

        let result = Importer::new(&source).import_pages(&[3], &mut working, &mut foreign);
        assert!(matches!(
            result,
            Err(AppendError::PageOutOfRange { page: 3, count: 2 })
        ));

        let result = Importer::new(&source).import_pages(&[0], &mut working, &mut foreign);
        assert!(matches!(result, Err(AppendError::PageOutOfRange { .. })));
    }

    #[test]
    fn test_duplicate_page_keeps_references() {
        let mut working = target();
        let mut foreign = ForeignArena::new();
        let page = Dictionary::from_iter(vec![
            ("Type", name("Page")),
            ("Parent", Object::Reference((2, 0))),
            ("Contents", Object::Reference((7, 0))),
        ]);

        let handle = duplicate_page(&page, Vec::new(), &mut working, &mut foreign);
        let copy = foreign.get(handle.id).unwrap().as_dict().unwrap();
        assert!(!copy.has(b"Parent"));
        assert_eq!(copy.get(b"Contents").unwrap().as_reference().unwrap(), (7, 0));
    }
}
