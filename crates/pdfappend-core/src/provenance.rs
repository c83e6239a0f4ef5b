//! Change classification
//!
//! Decides, per object handle, whether the object has to be written to the
//! new revision and under which number.

use std::collections::HashMap;

use lopdf::{Object, ObjectId};
use tracing::{debug, warn};

use crate::arena::{Arena, Graphs, Handle};
use crate::serialize::object_bytes;

/// Where an object came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Part of the read-only parse of the original bytes
    BaselineOnly,
    /// Part of the mutable parse of the original bytes
    WorkingCopy,
    /// Created or imported after loading
    Foreign,
}

impl From<Arena> for Provenance {
    fn from(arena: Arena) -> Self {
        match arena {
            Arena::Baseline => Provenance::BaselineOnly,
            Arena::Working => Provenance::WorkingCopy,
            Arena::Foreign => Provenance::Foreign,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    /// Identical to the original, nothing to write
    Unchanged,
    /// Must be written under an existing object number
    Replaced(ObjectId),
    /// Must be written under a newly allocated number
    Fresh,
}

impl ChangeStatus {
    pub fn is_unchanged(self) -> bool {
        matches!(self, ChangeStatus::Unchanged)
    }
}

pub struct Tracker<'a> {
    graphs: Graphs<'a>,
    /// Greatest object number at construction time
    greatest: u32,
    explicit: &'a HashMap<Handle, ObjectId>,
}

impl<'a> Tracker<'a> {
    pub fn new(graphs: Graphs<'a>, greatest: u32, explicit: &'a HashMap<Handle, ObjectId>) -> Self {
        Self {
            graphs,
            greatest,
            explicit,
        }
    }

    pub fn graphs(&self) -> Graphs<'a> {
        self.graphs
    }

    pub fn classify(&self, handle: Handle) -> ChangeStatus {
        let status = match Provenance::from(handle.arena) {
            Provenance::BaselineOnly => ChangeStatus::Unchanged,
            Provenance::WorkingCopy => self.classify_working(handle.id),
            Provenance::Foreign => match self.explicit.get(&handle) {
                Some(&id) => ChangeStatus::Replaced(id),
                None => ChangeStatus::Fresh,
            },
        };
        debug!(?handle, ?status, "classified object");
        status
    }

    fn classify_working(&self, id: ObjectId) -> ChangeStatus {
        if id.0 > self.greatest {
            return ChangeStatus::Fresh;
        }

        let Some(current) = self.graphs.working.objects.get(&id) else {
            warn!(id = ?id, "working object disappeared, treating as changed");
            return ChangeStatus::Replaced(id);
        };

        // Compressed-object containers are rebuilt by readers, never by us
        if is_container_stream(current) {
            return ChangeStatus::Unchanged;
        }

        match self.graphs.baseline.objects.get(&id) {
            Some(original) if object_bytes(original) == object_bytes(current) => {
                ChangeStatus::Unchanged
            }
            Some(_) => ChangeStatus::Replaced(id),
            None => {
                warn!(id = ?id, "no baseline counterpart, treating as changed");
                ChangeStatus::Replaced(id)
            }
        }
    }
}

/// Object streams and cross-reference streams
pub fn is_container_stream(object: &Object) -> bool {
    match object {
        Object::Stream(stream) => matches!(
            stream.dict.get(b"Type").and_then(Object::as_name),
            Ok(b"ObjStm") | Ok(b"XRef")
        ),
        _ => false,
    }
}
