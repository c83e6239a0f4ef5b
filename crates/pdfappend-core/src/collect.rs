//! Change collection
//!
//! Walks the object graph from a set of roots and gathers every object that
//! has to be written to the new revision. The walk stops at unchanged
//! objects: anything only reachable through them is already present in the
//! original bytes under the same number.

use std::collections::{HashMap, HashSet};

use lopdf::{Object, ObjectId};
use tracing::{debug, warn};

use crate::arena::{Arena, Handle};
use crate::provenance::{is_container_stream, ChangeStatus, Tracker};

/// Objects that make up the new revision
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    /// Discovery order, which is also emission order
    pub new_objects: Vec<Handle>,
    members: HashSet<Handle>,
    /// Objects written under an existing number
    pub replace: HashMap<Handle, ObjectId>,
    /// Roots that must never be walked
    pub ignore: HashSet<Handle>,
}

impl ChangeSet {
    /// Start from the explicit replacements registered on the appender
    pub fn with_replacements(explicit: &HashMap<Handle, ObjectId>) -> Self {
        Self {
            replace: explicit.clone(),
            ..Self::default()
        }
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.members.contains(handle)
    }

    pub fn len(&self) -> usize {
        self.new_objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new_objects.is_empty()
    }

    fn push(&mut self, handle: Handle) {
        if self.members.insert(handle) {
            self.new_objects.push(handle);
        }
    }
}

enum Work<'a> {
    Indirect(Handle),
    Direct(Arena, &'a Object),
}

pub struct Collector<'a> {
    tracker: Tracker<'a>,
    visited: HashSet<Handle>,
    changes: ChangeSet,
}

impl<'a> Collector<'a> {
    pub fn new(tracker: Tracker<'a>, changes: ChangeSet) -> Self {
        Self {
            tracker,
            visited: HashSet::new(),
            changes,
        }
    }

    /// Walk one root; the visited set is shared across calls
    pub fn collect(&mut self, root: Handle) {
        let graphs = self.tracker.graphs();
        let mut stack = vec![Work::Indirect(root)];

        while let Some(work) = stack.pop() {
            let (owner, object) = match work {
                Work::Direct(owner, object) => (owner, object),
                Work::Indirect(handle) => {
                    if self.changes.ignore.contains(&handle) || !self.visited.insert(handle) {
                        continue;
                    }
                    let Some(object) = graphs.resolve(handle) else {
                        warn!(?handle, "dangling reference skipped");
                        continue;
                    };
                    if matches!(object, Object::Null) {
                        continue;
                    }

                    match self.tracker.classify(handle) {
                        ChangeStatus::Unchanged => continue,
                        ChangeStatus::Replaced(id) => {
                            self.changes.replace.entry(handle).or_insert(id);
                            self.changes.push(handle);
                        }
                        ChangeStatus::Fresh => self.changes.push(handle),
                    }
                    debug!(?handle, "collected");
                    (handle.arena, object)
                }
            };

            let mut children = Vec::new();
            push_children(owner, object, &mut children, |id| {
                graphs.child(owner, id)
            });
            // Reversed so the first child is processed first
            stack.extend(children.into_iter().rev());
        }
    }

    pub fn finish(self) -> ChangeSet {
        self.changes
    }
}

fn push_children<'a>(
    owner: Arena,
    object: &'a Object,
    out: &mut Vec<Work<'a>>,
    child: impl Fn(ObjectId) -> Handle,
) {
    let mut visit = |value: &'a Object| match value {
        Object::Reference(id) => out.push(Work::Indirect(child(*id))),
        Object::Array(_) | Object::Dictionary(_) | Object::Stream(_) => {
            out.push(Work::Direct(owner, value))
        }
        _ => {}
    };

    match object {
        Object::Reference(_) => visit(object),
        Object::Array(items) => items.iter().for_each(&mut visit),
        Object::Dictionary(dict) => dict.iter().for_each(|(_, value)| visit(value)),
        Object::Stream(stream) => {
            // Existing containers only hold objects we already account for
            if is_container_stream(object) && owner != Arena::Foreign {
                return;
            }
            stream.dict.iter().for_each(|(_, value)| visit(value));
        }
        _ => {}
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::arena::{ForeignArena, Graphs};
    use lopdf::{Dictionary, Document};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: any reference graph terminates and collects each object at most once
        #[test]
        fn arbitrary_graphs_terminate(edges in prop::collection::vec((1u32..20, 1u32..20), 0..60)) {
            let mut working = Document::with_version("1.5");
            for id in 1..20u32 {
                working.objects.insert((id, 0), Object::Dictionary(Dictionary::new()));
            }
            for (from, to) in &edges {
                if let Some(Object::Dictionary(d)) = working.objects.get_mut(&(*from, 0)) {
                    let mut kids = d.get(b"Kids").and_then(Object::as_array).cloned().unwrap_or_default();
                    kids.push(Object::Reference((*to, 0)));
                    d.set("Kids", Object::Array(kids));
                }
            }
            let baseline = Document::with_version("1.5");
            let foreign = ForeignArena::new();
            let explicit = HashMap::new();
            let tracker = Tracker::new(Graphs::new(&baseline, &working, &foreign), 0, &explicit);
            let mut collector = Collector::new(tracker, ChangeSet::default());
            collector.collect(Handle::working((1, 0)));
            let changes = collector.finish();

            let unique: HashSet<_> = changes.new_objects.iter().collect();
            prop_assert_eq!(unique.len(), changes.new_objects.len());
            prop_assert!(changes.new_objects.len() < 20);
        }
    }
}
