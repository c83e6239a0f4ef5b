//! Arena-qualified object handles
//!
//! The appender works on three object graphs at once: the read-only
//! baseline parse, the mutable working parse of the same bytes, and an arena
//! of foreign objects (constructed by the caller or imported from another
//! document). A [`Handle`] names an object together with the graph it lives
//! in, so identity is always `(arena, id)` and never a bare object number.

use std::collections::BTreeMap;

use lopdf::{Document, Object, ObjectId};

use crate::error::{AppendError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arena {
    Baseline,
    Working,
    Foreign,
}

/// An object reference qualified by its owning graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    pub arena: Arena,
    pub id: ObjectId,
}

impl Handle {
    pub fn baseline(id: ObjectId) -> Self {
        Self {
            arena: Arena::Baseline,
            id,
        }
    }

    pub fn working(id: ObjectId) -> Self {
        Self {
            arena: Arena::Working,
            id,
        }
    }

    pub fn foreign(id: ObjectId) -> Self {
        Self {
            arena: Arena::Foreign,
            id,
        }
    }

    /// The same object number in the working graph
    ///
    /// Baseline handles are read-only; edits go to the working copy.
    pub fn editable(self) -> Self {
        match self.arena {
            Arena::Baseline => Self::working(self.id),
            _ => self,
        }
    }

    /// A reference usable inside objects of the working or foreign graphs
    pub fn reference(self) -> Object {
        Object::Reference(self.id)
    }
}

/// Objects that exist in neither parse of the original bytes
///
/// Ids are temporary: they are drawn from the working document's id counter
/// so they never collide with working objects, and they are replaced by
/// final numbers when the revision is assembled.
#[derive(Debug, Default, Clone)]
pub struct ForeignArena {
    objects: BTreeMap<ObjectId, Object>,
}

impl ForeignArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ObjectId, object: Object) {
        self.objects.insert(id, object);
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Read access to all three graphs with arena-aware reference resolution
#[derive(Clone, Copy)]
pub struct Graphs<'a> {
    pub baseline: &'a Document,
    pub working: &'a Document,
    pub foreign: &'a ForeignArena,
}

impl<'a> Graphs<'a> {
    pub fn new(baseline: &'a Document, working: &'a Document, foreign: &'a ForeignArena) -> Self {
        Self {
            baseline,
            working,
            foreign,
        }
    }

    /// Look up the object behind a handle
    pub fn resolve(&self, handle: Handle) -> Option<&'a Object> {
        match handle.arena {
            Arena::Baseline => self.baseline.objects.get(&handle.id),
            Arena::Working => self.working.objects.get(&handle.id),
            Arena::Foreign => self.foreign.get(handle.id),
        }
    }

    pub fn resolve_required(&self, handle: Handle) -> Result<&'a Object> {
        self.resolve(handle)
            .ok_or(AppendError::ObjectNotFound(handle.id.0, handle.id.1))
    }

    /// Handle for a reference found inside an object owned by `parent`
    ///
    /// Baseline objects only ever point into the baseline. Working and
    /// foreign objects share one id space: foreign ids are never handed out
    /// to working objects, so membership in the arena decides.
    pub fn child(&self, parent: Arena, id: ObjectId) -> Handle {
        match parent {
            Arena::Baseline => Handle::baseline(id),
            Arena::Working | Arena::Foreign => {
                if self.foreign.contains(id) {
                    Handle::foreign(id)
                } else {
                    Handle::working(id)
                }
            }
        }
    }

    /// Follow a reference one level, returning the direct object and the
    /// handle it came from (if it was indirect)
    pub fn deref(&self, owner: Arena, object: &'a Object) -> (Option<Handle>, Option<&'a Object>) {
        match object {
            Object::Reference(id) => {
                let handle = self.child(owner, *id);
                (Some(handle), self.resolve(handle))
            }
            direct => (None, Some(direct)),
        }
    }
}
