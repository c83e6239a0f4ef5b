//! Page tree walking and flattening

use std::collections::HashSet;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::warn;

use crate::error::{AppendError, Result};

/// Attributes a page may inherit from its ancestors
pub const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Resolve the catalog dictionary id from the trailer
pub fn catalog_id(doc: &Document) -> Result<ObjectId> {
    doc.trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| AppendError::InvalidTrailer("Root is missing or not a reference".into()))
}

/// Resolve the page tree root from the catalog
pub fn page_tree_root(doc: &Document) -> Result<ObjectId> {
    let catalog = doc
        .get_object(catalog_id(doc)?)
        .and_then(Object::as_dict)
        .map_err(|_| AppendError::InvalidCatalog("catalog is not a dictionary".into()))?;

    catalog
        .get(b"Pages")
        .and_then(Object::as_reference)
        .map_err(|_| AppendError::InvalidCatalog("Pages is missing or not a reference".into()))
}

/// Leaf pages in document order
///
/// Cycles in `Kids` are broken with a warning rather than an error.
pub fn enumerate_pages(doc: &Document) -> Result<Vec<ObjectId>> {
    let root = page_tree_root(doc)?;
    let root_dict = doc
        .get_object(root)
        .and_then(Object::as_dict)
        .map_err(|_| AppendError::InvalidPageTree("page tree root is not a dictionary".into()))?;
    if root_dict.get(b"Kids").and_then(Object::as_array).is_err() {
        return Err(AppendError::InvalidPageTree("root Kids is not an array".into()));
    }

    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            warn!(?id, "page tree cycle skipped");
            continue;
        }
        let Ok(node) = doc.get_object(id).and_then(Object::as_dict) else {
            warn!(?id, "page tree node is not a dictionary");
            continue;
        };

        match node.get(b"Kids").and_then(Object::as_array) {
            Ok(kids) if !is_leaf(node) => {
                let children = kids.iter().filter_map(|kid| kid.as_reference().ok());
                let children: Vec<_> = children.collect();
                stack.extend(children.into_iter().rev());
            }
            _ => {
                if id == root {
                    continue;
                }
                pages.push(id);
            }
        }
    }

    Ok(pages)
}

fn is_leaf(node: &Dictionary) -> bool {
    matches!(node.get(b"Type").and_then(Object::as_name), Ok(b"Page"))
}

/// Inheritable attributes the page lacks but an ancestor defines
///
/// Walks `Parent` links upward, nearest ancestor first. A cycle in the
/// parent chain ends the walk.
pub fn inherited_attributes(doc: &Document, page: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let Ok(page_dict) = doc.get_object(page).and_then(Object::as_dict) else {
        return Vec::new();
    };

    let mut missing: Vec<&[u8]> = INHERITABLE
        .iter()
        .copied()
        .filter(|key| !page_dict.has(key))
        .collect();
    let mut found = Vec::new();
    let mut visited = HashSet::from([page]);
    let mut parent = page_dict.get(b"Parent").and_then(Object::as_reference).ok();

    while let Some(id) = parent {
        if missing.is_empty() || !visited.insert(id) {
            break;
        }
        let Ok(node) = doc.get_object(id).and_then(Object::as_dict) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                found.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    found
}

/// Copy inherited attributes down into a page dictionary
pub fn flatten_into(page: &mut Dictionary, inherited: Vec<(Vec<u8>, Object)>) {
    for (key, value) in inherited {
        if !page.has(&key) {
            page.set(key, value);
        }
    }
}

/// Media box of a page, including inherited values
pub fn media_box(doc: &Document, page: ObjectId) -> Option<[f32; 4]> {
    let page_dict = doc.get_object(page).and_then(Object::as_dict).ok()?;
    let value = match page_dict.get(b"MediaBox") {
        Ok(value) => value.clone(),
        Err(_) => inherited_attributes(doc, page)
            .into_iter()
            .find(|(key, _)| key.as_slice() == b"MediaBox")?
            .1,
    };
    let numbers: Vec<f32> = value
        .as_array()
        .ok()?
        .iter()
        .filter_map(number)
        .collect();
    numbers.try_into().ok()
}

pub(crate) fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(n) => Some(*n as f32),
        Object::Real(n) => Some(*n),
        _ => None,
    }
}
