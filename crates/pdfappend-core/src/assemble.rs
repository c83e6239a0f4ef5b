//! Revision assembly
//!
//! Turns a collected [`ChangeSet`] into numbered objects ready for the
//! revision writer, and reconciles the page list with the page tree.

use std::collections::HashMap;

use lopdf::{Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::arena::{Arena, ForeignArena, Graphs, Handle};
use crate::collect::ChangeSet;
use crate::error::{AppendError, Result};
use crate::pages::{flatten_into, inherited_attributes};

/// Final numbers for every collected object
#[derive(Debug, Default, Clone)]
pub struct Numbering {
    /// Emission order
    pub order: Vec<(Handle, ObjectId)>,
    pub map: HashMap<Handle, ObjectId>,
}

impl Numbering {
    /// Replacements keep their number; everything else counts up from
    /// `greatest + 1` in emission order
    pub fn assign(changes: &ChangeSet, greatest: u32) -> Self {
        let mut claims: HashMap<ObjectId, Handle> = HashMap::new();
        for handle in &changes.new_objects {
            let Some(&id) = changes.replace.get(handle) else {
                continue;
            };
            match claims.get(&id) {
                None => {
                    claims.insert(id, *handle);
                }
                Some(previous) => {
                    // Explicit replacements (foreign objects) take the number
                    let winner = if handle.arena == Arena::Foreign && previous.arena != Arena::Foreign {
                        *handle
                    } else {
                        *previous
                    };
                    warn!(?id, kept = ?winner, "two objects replace the same number");
                    claims.insert(id, winner);
                }
            }
        }

        let mut numbering = Numbering::default();
        let mut next = greatest;
        for handle in &changes.new_objects {
            match changes.replace.get(handle) {
                Some(&id) => {
                    numbering.map.insert(*handle, id);
                    if claims.get(&id) == Some(handle) {
                        numbering.order.push((*handle, id));
                    }
                }
                None => {
                    next += 1;
                    let id = (next, 0);
                    numbering.map.insert(*handle, id);
                    numbering.order.push((*handle, id));
                }
            }
        }
        numbering
    }

    /// Greatest number used by this revision, if any
    pub fn max_number(&self) -> Option<u32> {
        self.order.iter().map(|(_, id)| id.0).max()
    }

    /// Resolve and renumber every emitted object
    pub fn render(&self, graphs: &Graphs) -> Result<Vec<(ObjectId, Object)>> {
        self.order
            .iter()
            .map(|(handle, id)| {
                let object = graphs.resolve_required(*handle)?;
                Ok((*id, self.renumber(object, handle.arena, graphs)))
            })
            .collect()
    }

    /// Copy of `object` with references rewritten to final numbers
    pub fn renumber(&self, object: &Object, owner: Arena, graphs: &Graphs) -> Object {
        match object {
            Object::Reference(id) => {
                let handle = graphs.child(owner, *id);
                match self.map.get(&handle) {
                    Some(&final_id) => Object::Reference(final_id),
                    None => {
                        if handle.arena == Arena::Foreign {
                            warn!(?handle, "reference to an uncollected foreign object");
                        }
                        Object::Reference(*id)
                    }
                }
            }
            Object::Array(items) => Object::Array(
                items
                    .iter()
                    .map(|item| self.renumber(item, owner, graphs))
                    .collect(),
            ),
            Object::Dictionary(dict) => {
                let mut dict = dict.clone();
                for (_, value) in dict.iter_mut() {
                    *value = self.renumber(value, owner, graphs);
                }
                Object::Dictionary(dict)
            }
            Object::Stream(stream) => {
                let mut stream = stream.clone();
                for (_, value) in stream.dict.iter_mut() {
                    *value = self.renumber(value, owner, graphs);
                }
                Object::Stream(stream)
            }
            other => other.clone(),
        }
    }
}

/// Whether the page list still matches the page tree
///
/// Each entry must be the baseline or the working page at its position.
pub fn page_list_unchanged(pages: &[Handle], baseline: &[ObjectId], working: &[ObjectId]) -> bool {
    pages.len() == baseline.len()
        && pages.len() == working.len()
        && pages.iter().enumerate().all(|(i, handle)| {
            *handle == Handle::baseline(baseline[i]) || *handle == Handle::working(working[i])
        })
}

/// Rebuild the page tree root as a flat list of `pages`
///
/// Pages taken out of intermediate nodes have their inherited attributes
/// copied down first. Handles of pages edited here are switched to the
/// working arena.
pub fn rebuild_page_tree(
    working: &mut Document,
    foreign: &mut ForeignArena,
    root: ObjectId,
    pages: &mut [Handle],
) -> Result<()> {
    for handle in pages.iter_mut() {
        match handle.arena {
            Arena::Foreign => {
                let page = foreign
                    .get_mut(handle.id)
                    .and_then(|object| object.as_dict_mut().ok())
                    .ok_or_else(|| {
                        AppendError::InvalidPageTree(format!("page {:?} is not a dictionary", handle.id))
                    })?;
                page.set("Parent", Object::Reference(root));
            }
            Arena::Baseline | Arena::Working => {
                let parent = working
                    .get_object(handle.id)
                    .and_then(Object::as_dict)
                    .map_err(|_| {
                        AppendError::InvalidPageTree(format!("page {:?} is not a dictionary", handle.id))
                    })?
                    .get(b"Parent")
                    .and_then(Object::as_reference)
                    .ok();
                if parent == Some(root) {
                    continue;
                }

                let inherited = inherited_attributes(working, handle.id);
                if let Ok(Object::Dictionary(page)) = working.get_object_mut(handle.id) {
                    flatten_into(page, inherited);
                    page.set("Parent", Object::Reference(root));
                }
                debug!(page = ?handle.id, "moved page under the page tree root");
                *handle = Handle::working(handle.id);
            }
        }
    }

    let root_dict = working
        .get_object_mut(root)
        .and_then(Object::as_dict_mut)
        .map_err(|_| AppendError::InvalidPageTree("page tree root is not a dictionary".into()))?;
    root_dict.set(
        "Kids",
        Object::Array(pages.iter().map(|handle| handle.reference()).collect()),
    );
    root_dict.set("Count", Object::Integer(pages.len() as i64));
    Ok(())
}
