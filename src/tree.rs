//! The live boundary tree and the rendered tree nodes boundaries sit on.
//!
//! Boundaries are addressed by [`BoundaryId`] and never hold references
//! to each other; parent/child links are ids. Tree order (parent before
//! descendant, siblings in order) is derived from those links on demand.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::changes::PreUpdates;
use crate::component::{Component, ComponentKind};
use crate::content::{ClosureRef, ContentClosure, PendingRefresh};
use crate::context::ContextApi;
use crate::def::Envelope;
use crate::ids::{BoundaryId, HostId, IdCounter, TreeNodeId};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountState {
    /// Created, not rendered yet.
    Unmounted,
    Mounted,
    /// Torn down; every operation on it is a no-op.
    Destroyed,
}

/// Re-entrancy guard of a boundary's update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    /// Between the before-update hook and the should-update decision.
    Updating,
    /// Inside the apply engine.
    Rendering,
    /// Received updates while rendering; renders again right after.
    ReUpdated,
}

pub struct Boundary {
    pub(crate) id: BoundaryId,
    pub(crate) host: HostId,
    pub(crate) parent: Option<BoundaryId>,
    pub(crate) inner: Vec<BoundaryId>,
    pub(crate) kind: ComponentKind,
    pub(crate) component: Box<dyn Component>,
    pub(crate) props: Rc<Value>,
    pub(crate) state: Rc<Value>,
    pub(crate) mount: MountState,
    pub(crate) render_state: RenderState,
    pub(crate) pre_updates: PreUpdates,
    pub(crate) closure: ContentClosure,
    pub(crate) context_api: ContextApi,
    pub(crate) tree_node: Option<TreeNodeId>,
    pub(crate) pending_content: Vec<PendingRefresh>,
    /// Closures this boundary reads content from.
    pub(crate) reading: Vec<ClosureRef>,
    pub(crate) wired: Vec<BoundaryId>,
    /// The envelope a content pass boundary renders.
    pub(crate) content: Option<Envelope>,
}

impl Boundary {
    pub fn id(&self) -> BoundaryId {
        self.id
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    pub fn parent(&self) -> Option<BoundaryId> {
        self.parent
    }

    pub fn inner_boundaries(&self) -> &[BoundaryId] {
        &self.inner
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn props(&self) -> &Rc<Value> {
        &self.props
    }

    pub fn state(&self) -> &Rc<Value> {
        &self.state
    }

    pub fn mount_state(&self) -> MountState {
        self.mount
    }

    pub fn render_state(&self) -> RenderState {
        self.render_state
    }

    pub fn pre_updates(&self) -> &PreUpdates {
        &self.pre_updates
    }

    pub fn closure(&self) -> &ContentClosure {
        &self.closure
    }

    pub fn context_api(&self) -> &ContextApi {
        &self.context_api
    }

    pub fn tree_node(&self) -> Option<TreeNodeId> {
        self.tree_node
    }

    /// The envelope a content pass boundary currently renders.
    pub fn content(&self) -> Option<&Envelope> {
        self.content.as_ref()
    }

    /// A stream instance's `importance` prop; `0` when absent.
    pub fn importance(&self) -> f64 {
        self.props.get("importance").and_then(Value::as_f64).unwrap_or(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeNodeKind {
    Root,
    Dom,
    Boundary,
    Pass,
    Host,
}

#[derive(Clone, Debug)]
pub struct TreeNode {
    pub id: TreeNodeId,
    pub kind: TreeNodeKind,
    pub parent: Option<TreeNodeId>,
    pub children: Vec<TreeNodeId>,
    pub boundary: Option<BoundaryId>,
    /// Handle of the realised DOM node, if any.
    pub dom: Option<u64>,
}

#[derive(Default)]
pub struct Tree {
    boundaries: IndexMap<BoundaryId, Boundary>,
    nodes: IndexMap<TreeNodeId, TreeNode>,
    boundary_ids: IdCounter,
    node_ids: IdCounter,
}

impl Tree {
    pub(crate) fn insert_boundary(
        &mut self,
        host: HostId,
        parent: Option<BoundaryId>,
        kind: ComponentKind,
        component: Box<dyn Component>,
        props: Value,
    ) -> BoundaryId {
        let id = BoundaryId(self.boundary_ids.next());
        let mut closure = ContentClosure::new(Some(id));
        closure.stream = kind.stream();
        self.boundaries.insert(
            id,
            Boundary {
                id,
                host,
                parent,
                inner: Vec::new(),
                kind,
                component,
                props: Rc::new(props),
                state: Rc::new(Value::Null),
                mount: MountState::Unmounted,
                render_state: RenderState::Idle,
                pre_updates: PreUpdates::default(),
                closure,
                context_api: ContextApi::default(),
                tree_node: None,
                pending_content: Vec::new(),
                reading: Vec::new(),
                wired: Vec::new(),
                content: None,
            },
        );
        if let Some(parent) = parent.and_then(|p| self.boundaries.get_mut(&p)) {
            parent.inner.push(id);
        }
        id
    }

    /// Removes a boundary and unlinks it from its parent. Its own inner
    /// boundaries are left to the caller.
    pub(crate) fn remove_boundary(&mut self, id: BoundaryId) -> Option<Boundary> {
        let boundary = self.boundaries.shift_remove(&id)?;
        if let Some(parent) = boundary.parent.and_then(|p| self.boundaries.get_mut(&p)) {
            parent.inner.retain(|b| *b != id);
        }
        Some(boundary)
    }

    pub fn get(&self, id: BoundaryId) -> Option<&Boundary> {
        self.boundaries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: BoundaryId) -> Option<&mut Boundary> {
        self.boundaries.get_mut(&id)
    }

    /// A boundary that exists and is not torn down.
    pub fn is_live(&self, id: BoundaryId) -> bool {
        self.get(id).is_some_and(|b| b.mount != MountState::Destroyed)
    }

    pub fn parent(&self, id: BoundaryId) -> Option<BoundaryId> {
        self.get(id).and_then(|b| b.parent)
    }

    pub fn inner(&self, id: BoundaryId) -> &[BoundaryId] {
        self.get(id).map(|b| b.inner.as_slice()).unwrap_or_default()
    }

    /// Moves `id` to `index` among its siblings.
    pub(crate) fn reorder(&mut self, id: BoundaryId, index: usize) {
        let Some(parent) = self.parent(id).and_then(|p| self.boundaries.get_mut(&p)) else {
            return;
        };
        parent.inner.retain(|b| *b != id);
        let index = index.min(parent.inner.len());
        parent.inner.insert(index, id);
    }

    /// Position of a boundary in tree order, as comparable path of
    /// sibling indices from its root down.
    pub fn path_key(&self, id: BoundaryId) -> Vec<u64> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            let index = self.inner(parent).iter().position(|b| *b == current).unwrap_or(usize::MAX);
            path.push(index as u64);
            current = parent;
        }
        path.push(current.0);
        path.reverse();
        path
    }

    /// Sorts ids so that every boundary comes after its ancestors and
    /// siblings keep their tree order.
    pub fn sort_in_tree_order(&self, ids: &mut [BoundaryId]) {
        ids.sort_by_cached_key(|id| self.path_key(*id));
    }

    /// Every boundary under `root` (excluding it), in tree order.
    pub fn boundaries_within(&self, root: BoundaryId) -> Vec<BoundaryId> {
        let mut out = Vec::new();
        let mut stack: Vec<BoundaryId> = self.inner(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.inner(id).iter().rev().copied());
        }
        out
    }

    pub fn create_node(&mut self, parent: Option<TreeNodeId>, kind: TreeNodeKind, boundary: Option<BoundaryId>) -> TreeNodeId {
        let id = TreeNodeId(self.node_ids.next());
        self.nodes.insert(
            id,
            TreeNode {
                id,
                kind,
                parent,
                children: Vec::new(),
                boundary,
                dom: None,
            },
        );
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.push(id);
        }
        if let Some(boundary) = boundary.and_then(|b| self.boundaries.get_mut(&b)) {
            boundary.tree_node.get_or_insert(id);
        }
        id
    }

    pub fn node(&self, id: TreeNodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: TreeNodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(&id)
    }

    /// Moves `id` with everything below it to the end of `parent`'s
    /// children.
    pub fn reparent_node(&mut self, id: TreeNodeId, parent: TreeNodeId) {
        if id == parent || !self.nodes.contains_key(&parent) {
            return;
        }
        let Some(old) = self.nodes.get_mut(&id).map(|node| node.parent.replace(parent)) else {
            return;
        };
        if let Some(old) = old.and_then(|p| self.nodes.get_mut(&p)) {
            old.children.retain(|c| *c != id);
        }
        if let Some(new) = self.nodes.get_mut(&parent) {
            new.children.push(id);
        }
    }

    /// Removes a node and everything below it.
    pub fn remove_node(&mut self, id: TreeNodeId) {
        let Some(node) = self.nodes.shift_remove(&id) else {
            return;
        };
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        for child in node.children {
            self.remove_node(child);
        }
    }

    /// The topmost DOM nodes at or under `node`, in order.
    ///
    /// Unrealised DOM nodes are only included with `include_empty`. With
    /// `break_on_boundary`, nested boundary nodes are not entered.
    pub fn root_dom_tree_nodes(&self, node: TreeNodeId, include_empty: bool, break_on_boundary: bool) -> Vec<TreeNodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let Some(current) = self.nodes.get(&id) else {
                continue;
            };
            match current.kind {
                TreeNodeKind::Dom => {
                    if include_empty || current.dom.is_some() {
                        out.push(id);
                    }
                }
                TreeNodeKind::Boundary if break_on_boundary && id != node => {}
                _ => stack.extend(current.children.iter().rev().copied()),
            }
        }
        out
    }
}
