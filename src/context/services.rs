//! Which boundaries a context dispatches to, in tree order.

use indexmap::{IndexMap, IndexSet};

use crate::ids::BoundaryId;
use crate::tree::Tree;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    Data,
    Signals,
}

/// Interest registry of one context. Each boundary maps to the names it
/// uses for this context; a context can be reachable under different
/// names from different boundaries.
#[derive(Clone, Debug, Default)]
pub struct ContextServices {
    data_components: IndexMap<BoundaryId, IndexSet<String>>,
    signal_components: IndexMap<BoundaryId, IndexSet<String>>,
    data_dirty: bool,
    signals_dirty: bool,
}

impl ContextServices {
    pub fn data_components(&self) -> &IndexMap<BoundaryId, IndexSet<String>> {
        &self.data_components
    }

    pub fn signal_components(&self) -> &IndexMap<BoundaryId, IndexSet<String>> {
        &self.signal_components
    }

    pub fn is_dirty(&self) -> bool {
        self.data_dirty || self.signals_dirty
    }

    fn slot(&mut self, interest: Interest) -> (&mut IndexMap<BoundaryId, IndexSet<String>>, &mut bool) {
        match interest {
            Interest::Data => (&mut self.data_components, &mut self.data_dirty),
            Interest::Signals => (&mut self.signal_components, &mut self.signals_dirty),
        }
    }

    /// Returns whether the name was newly registered.
    pub(crate) fn on_interest(&mut self, interest: Interest, b: BoundaryId, name: &str) -> bool {
        let (components, dirty) = self.slot(interest);
        let names = components.entry(b).or_insert_with(|| {
            *dirty = true;
            IndexSet::new()
        });
        names.insert(name.to_owned())
    }

    /// Returns whether the name was registered.
    pub(crate) fn on_disinterest(&mut self, interest: Interest, b: BoundaryId, name: &str) -> bool {
        let (components, _) = self.slot(interest);
        let Some(names) = components.get_mut(&b) else {
            return false;
        };
        let removed = names.shift_remove(name);
        if names.is_empty() {
            components.shift_remove(&b);
        }
        removed
    }

    pub(crate) fn set_interest(&mut self, b: BoundaryId, name: &str, data: bool, signals: bool) {
        for (interest, wanted) in [(Interest::Data, data), (Interest::Signals, signals)] {
            if wanted {
                self.on_interest(interest, b, name);
            } else {
                self.on_disinterest(interest, b, name);
            }
        }
    }

    /// The boundary changed position; dispatch order must follow.
    pub(crate) fn on_move(&mut self, b: BoundaryId) {
        self.data_dirty |= self.data_components.contains_key(&b);
        self.signals_dirty |= self.signal_components.contains_key(&b);
    }

    pub(crate) fn forget(&mut self, b: BoundaryId) {
        self.data_components.shift_remove(&b);
        self.signal_components.shift_remove(&b);
    }

    pub(crate) fn sort_if_dirty(&mut self, tree: &Tree) {
        if self.data_dirty {
            self.data_components.sort_by(|a, _, b, _| tree.path_key(*a).cmp(&tree.path_key(*b)));
            self.data_dirty = false;
        }
        if self.signals_dirty {
            self.signal_components.sort_by(|a, _, b, _| tree.path_key(*a).cmp(&tree.path_key(*b)));
            self.signals_dirty = false;
        }
    }
}
