//! Update requests, pending-update bookkeeping and the change records an
//! update pass produces.

use std::rc::Rc;

use indexmap::IndexSet;

use crate::def::Def;
use crate::ids::{BoundaryId, HostId, TreeNodeId};
use crate::value::Value;

/// How hard an update is forced past the should-update check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ForceUpdate {
    #[default]
    None,
    /// Update this boundary regardless of comparisons.
    This,
    /// Update this boundary and force every nested boundary too.
    All,
}

impl ForceUpdate {
    pub fn is_forced(self) -> bool {
        self != ForceUpdate::None
    }
}

/// An update request, as handed to
/// [`Runtime::absorb_updates`](crate::Runtime::absorb_updates).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Updates {
    pub props: Option<Value>,
    pub state: Option<Value>,
    pub force: ForceUpdate,
}

impl Updates {
    pub fn props(props: Value) -> Self {
        Updates {
            props: Some(props),
            ..Self::default()
        }
    }

    pub fn state(state: Value) -> Self {
        Updates {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn forced() -> Self {
        Updates {
            force: ForceUpdate::This,
            ..Self::default()
        }
    }

    pub fn with_force(mut self, force: ForceUpdate) -> Self {
        self.force = force;
        self
    }
}

/// The "before" side of everything that changed on a boundary since its
/// last update. Each field records its snapshot on the first touch in a
/// batch only.
#[derive(Clone, Debug, Default)]
pub struct PreUpdates {
    pub props: Option<Rc<Value>>,
    pub state: Option<Rc<Value>>,
    /// Child defs as they were before new content was passed in.
    pub children: Option<Vec<Rc<Def>>>,
    /// Stream output as it was before the stream's content changed.
    pub streamed: Option<Vec<Rc<Def>>>,
    /// Context names whose data listeners must be rebuilt.
    pub contextual: Option<IndexSet<String>>,
    /// Context names whose effective context changed for descendants.
    pub cascade: Option<IndexSet<String>>,
    /// The host's settings changed.
    pub host: bool,
    /// The boundary moved within the tree.
    pub moved: bool,
    pub force: ForceUpdate,
}

impl PreUpdates {
    pub fn is_empty(&self) -> bool {
        self.props.is_none()
            && self.state.is_none()
            && self.children.is_none()
            && self.streamed.is_none()
            && self.contextual.is_none()
            && self.cascade.is_none()
            && !self.host
            && !self.moved
            && !self.force.is_forced()
    }

    pub(crate) fn add_contextual(&mut self, names: impl IntoIterator<Item = String>) {
        self.contextual.get_or_insert_with(IndexSet::new).extend(names);
    }

    pub(crate) fn add_cascade(&mut self, names: impl IntoIterator<Item = String>) {
        self.cascade.get_or_insert_with(IndexSet::new).extend(names);
    }
}

/// The "after" side of an update: the current values of the fields that
/// changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateSnapshot {
    pub props: Option<Rc<Value>>,
    pub state: Option<Rc<Value>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Mounted,
    Updated,
    Moved,
    Destroyed,
}

/// One lifecycle change of one boundary.
#[derive(Clone, Debug)]
pub struct BoundaryChange {
    pub boundary: BoundaryId,
    pub kind: ChangeKind,
    pub updates: Option<UpdateSnapshot>,
    pub prev: Option<PreUpdates>,
    /// The host whose render flush makes the call. Taken from the
    /// boundary when unset.
    pub host: Option<HostId>,
}

impl BoundaryChange {
    pub fn new(boundary: BoundaryId, kind: ChangeKind) -> Self {
        BoundaryChange {
            boundary,
            kind,
            updates: None,
            prev: None,
            host: None,
        }
    }

    pub fn for_host(mut self, host: HostId) -> Self {
        self.host = Some(host);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOp {
    Create,
    Update,
    Move,
    Remove,
}

/// One instruction for the renderer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderInfo {
    pub tree_node: TreeNodeId,
    pub op: RenderOp,
    pub boundary: Option<BoundaryId>,
    /// The host whose renderer receives it. Taken from `boundary` when
    /// unset.
    pub host: Option<HostId>,
}

impl RenderInfo {
    pub fn new(tree_node: TreeNodeId, op: RenderOp) -> Self {
        RenderInfo {
            tree_node,
            op,
            boundary: None,
            host: None,
        }
    }

    pub fn for_boundary(mut self, boundary: BoundaryId) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn for_host(mut self, host: HostId) -> Self {
        self.host = Some(host);
        self
    }
}

/// Render instructions plus boundary changes, accumulated across an
/// update pass.
#[derive(Clone, Debug, Default)]
pub struct Changes {
    pub render_infos: Vec<RenderInfo>,
    pub boundary_changes: Vec<BoundaryChange>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.render_infos.is_empty() && self.boundary_changes.is_empty()
    }

    pub fn merge(&mut self, other: Changes) {
        self.render_infos.extend(other.render_infos);
        self.boundary_changes.extend(other.boundary_changes);
    }

    pub fn merge_opt(&mut self, other: Option<Changes>) {
        if let Some(other) = other {
            self.merge(other);
        }
    }

    /// Sends everything not already tied to a host to `host`.
    pub fn assign_host(&mut self, host: HostId) {
        for info in self.render_infos.iter_mut().filter(|i| i.host.is_none()) {
            info.host = Some(host);
        }
        for change in self.boundary_changes.iter_mut().filter(|c| c.host.is_none()) {
            change.host = Some(host);
        }
    }

    /// `None` stands for "nothing happened", as opposed to an empty but
    /// present result.
    pub fn into_option(self) -> Option<Changes> {
        (!self.is_empty()).then_some(self)
    }
}
