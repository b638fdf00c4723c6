//! Content closures: routing the children a boundary received to the
//! places in its output where they are grounded.
//!
//! Every boundary owns one [`ContentClosure`]; every stream owns the one
//! on its output side. A closure is addressed by [`ClosureRef`] so that
//! both kinds go through the same operations.

use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use crate::apply::Apply;
use crate::changes::{Changes, ForceUpdate, RenderInfo, RenderOp};
use crate::component::ComponentKind;
use crate::def::{Def, Envelope, PassMode};
use crate::ids::{BoundaryId, DefId, StreamId, TreeNodeId};
use crate::runtime::Runtime;
use crate::tree::TreeNodeKind;
use crate::value::Value;

/// Addresses a content closure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClosureRef {
    /// The closure of a boundary's received children.
    Boundary(BoundaryId),
    /// The output side of a stream.
    Stream(StreamId),
}

/// What a content boundary materialises.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentPass {
    pub closure: ClosureRef,
    /// The grounding def this boundary renders content for.
    pub grounding: DefId,
    /// Whether it references the original defs rather than a copy.
    pub true_pass: bool,
}

/// What the apply engine did with a grounding def.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefAction {
    Mounted,
    Moved,
    Updated,
}

/// One place where a closure's content is grounded.
#[derive(Clone, Debug)]
pub struct Grounding {
    pub boundary: BoundaryId,
    pub tree_node: TreeNodeId,
    pub mode: PassMode,
    pub content_boundary: Option<BoundaryId>,
}

/// The content a boundary (or a stream) received and where it is
/// grounded.
#[derive(Clone, Debug, Default)]
pub struct ContentClosure {
    pub(crate) thru_boundary: Option<BoundaryId>,
    pub(crate) source_boundary: Option<BoundaryId>,
    pub(crate) envelope: Option<Envelope>,
    pub(crate) grounded: IndexMap<DefId, Grounding>,
    pub(crate) true_pass_def: Option<DefId>,
    pub(crate) content_links: IndexSet<BoundaryId>,
    /// Set on a stream instance: the closure feeds that stream.
    pub(crate) stream: Option<StreamId>,
}

impl ContentClosure {
    pub(crate) fn new(thru_boundary: Option<BoundaryId>) -> Self {
        ContentClosure {
            thru_boundary,
            ..Self::default()
        }
    }

    /// The boundary whose output the content flows through; `None` on a
    /// stream's output side.
    pub fn thru_boundary(&self) -> Option<BoundaryId> {
        self.thru_boundary
    }

    /// The boundary that handed the content over.
    pub fn source_boundary(&self) -> Option<BoundaryId> {
        self.source_boundary
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// The grounding def holding the original defs, if any.
    pub fn true_pass_def(&self) -> Option<DefId> {
        self.true_pass_def
    }

    pub fn grounding(&self, def: DefId) -> Option<&Grounding> {
        self.grounded.get(&def)
    }

    /// Grounding defs in registration order.
    pub fn grounded_defs(&self) -> impl Iterator<Item = DefId> + '_ {
        self.grounded.keys().copied()
    }

    /// Boundaries reading this content.
    pub fn content_links(&self) -> &IndexSet<BoundaryId> {
        &self.content_links
    }

    /// The stream a stream instance's closure feeds.
    pub fn stream(&self) -> Option<StreamId> {
        self.stream
    }

    /// See [`Runtime::has_content`].
    pub fn has_content(&self) -> bool {
        self.envelope.as_ref().is_some_and(Envelope::has_content)
    }

    pub fn read_content(&self) -> Option<Vec<Rc<Def>>> {
        self.has_content().then(|| self.children())
    }

    pub(crate) fn children(&self) -> Vec<Rc<Def>> {
        self.envelope.as_ref().map(|e| e.children().to_vec()).unwrap_or_default()
    }
}

/// The hand-off between the two phases of a content refresh.
///
/// Returned by [`Runtime::pre_refresh`] and consumed by
/// [`Runtime::apply_refresh`].
#[derive(Clone, Debug, Default)]
pub struct PendingRefresh {
    pub(crate) closure: Option<ClosureRef>,
    pub(crate) interested: IndexSet<BoundaryId>,
    pub(crate) pending: IndexSet<DefId>,
}

impl PendingRefresh {
    /// Boundaries that read the refreshed content.
    pub fn interested(&self) -> &IndexSet<BoundaryId> {
        &self.interested
    }

    pub fn closure(&self) -> Option<ClosureRef> {
        self.closure
    }

    pub fn is_empty(&self) -> bool {
        self.closure.is_none()
    }

    fn absorb(&mut self, other: PendingRefresh) {
        self.interested.extend(other.interested);
        self.pending.extend(other.pending);
    }
}

impl Runtime {
    /// The closure `cref` points at, while its owner lives.
    pub fn closure(&self, cref: ClosureRef) -> Option<&ContentClosure> {
        match cref {
            ClosureRef::Boundary(b) => self.tree.get(b).map(|b| &b.closure),
            ClosureRef::Stream(s) => self.streams.get(s).map(|s| &s.closure),
        }
    }

    pub(crate) fn closure_mut(&mut self, cref: ClosureRef) -> Option<&mut ContentClosure> {
        match cref {
            ClosureRef::Boundary(b) => self.tree.get_mut(b).map(|b| &mut b.closure),
            ClosureRef::Stream(s) => self.streams.get_mut(s).map(|s| &mut s.closure),
        }
    }

    /// True unless the closure holds no envelope, a disabled one or an
    /// empty fragment.
    pub fn has_content(&self, cref: ClosureRef) -> bool {
        self.closure(cref).is_some_and(ContentClosure::has_content)
    }

    /// The content's child defs, or `None` without content.
    pub fn read_content(&self, cref: ClosureRef) -> Option<Vec<Rc<Def>>> {
        self.closure(cref).and_then(ContentClosure::read_content)
    }

    /// The boundaries that read the closure's content and must update
    /// when it changes.
    ///
    /// With `by_stream`, these are the readers linked to that stream's
    /// output. Otherwise the closure's own readers plus the readers found
    /// walking down from its boundary; a branch is only entered through a
    /// boundary that has readers itself.
    pub fn collect_interested(&self, cref: ClosureRef, by_stream: Option<StreamId>) -> IndexSet<BoundaryId> {
        let mut interested = IndexSet::new();
        if let Some(stream) = by_stream {
            if let Some(state) = self.streams.get(stream) {
                interested.extend(state.closure.content_links.iter().copied().filter(|b| self.tree.is_live(*b)));
            }
            return interested;
        }
        let Some(closure) = self.closure(cref) else {
            return interested;
        };
        interested.extend(closure.content_links.iter().copied().filter(|b| self.tree.is_live(*b)));
        let Some(thru) = closure.thru_boundary else {
            return interested;
        };
        let mut queue: VecDeque<BoundaryId> = self.tree.inner(thru).iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            let Some(inner) = self.tree.get(id) else {
                continue;
            };
            if inner.closure.content_links.is_empty() {
                continue;
            }
            interested.extend(inner.closure.content_links.iter().copied().filter(|b| self.tree.is_live(*b)));
            queue.extend(inner.inner.iter().copied());
        }
        interested
    }

    /// Registers a grounding point for the closure's content.
    ///
    /// A new grounding gets the content applied right away. An existing
    /// one only tracks its tree node, and emits a move for its content
    /// when `action` is [`DefAction::Moved`].
    #[allow(clippy::too_many_arguments)]
    pub fn content_grounded(
        &mut self,
        apply: &mut dyn Apply,
        cref: ClosureRef,
        def: DefId,
        action: DefAction,
        grounding_boundary: BoundaryId,
        tree_node: TreeNodeId,
        mode: PassMode,
    ) -> Changes {
        let Some(closure) = self.closure_mut(cref) else {
            return Changes::default();
        };
        if let Some(grounding) = closure.grounded.get_mut(&def) {
            grounding.tree_node = tree_node;
            let content_boundary = grounding.content_boundary;
            let mut changes = Changes::default();
            if action == DefAction::Moved {
                let moved = content_boundary.and_then(|cb| Some((cb, self.tree.get(cb)?.tree_node?)));
                if let Some((cb, node)) = moved {
                    self.tree.reparent_node(node, tree_node);
                    for dom in self.tree.root_dom_tree_nodes(node, true, false) {
                        changes.render_infos.push(RenderInfo::new(dom, RenderOp::Move).for_boundary(cb));
                    }
                }
            }
            return changes;
        }
        closure.grounded.insert(
            def,
            Grounding {
                boundary: grounding_boundary,
                tree_node,
                mode,
                content_boundary: None,
            },
        );
        trace!(?cref, %def, "content grounded");
        self.apply_content_defs(apply, cref, &[def], false)
    }

    /// Removes a grounding point and tears down its content. A def that
    /// was never grounded here is ignored.
    pub fn content_ungrounded(&mut self, apply: &mut dyn Apply, cref: ClosureRef, def: DefId) -> Changes {
        let Some(closure) = self.closure_mut(cref) else {
            return Changes::default();
        };
        let Some(grounding) = closure.grounded.shift_remove(&def) else {
            return Changes::default();
        };
        if closure.true_pass_def == Some(def) {
            closure.true_pass_def = None;
        }
        let Some(cb) = grounding.content_boundary else {
            return Changes::default();
        };
        let host = self.tree.get(cb).map(|cb| cb.host);
        let mut changes = apply.destroy_boundary(self, cb, true);
        if let Some(host) = host {
            changes.assign_host(host);
        }
        changes
    }

    /// First phase of a content refresh: swaps in `envelope` and stamps
    /// the interested boundaries with the content they saw before.
    ///
    /// A stream instance's closure keeps the envelope and, while the
    /// instance is the stream's source, hands the refresh over to the
    /// stream. Nothing is updated or rendered here; the caller decides
    /// when the returned interested boundaries run.
    pub fn pre_refresh(
        &mut self,
        cref: ClosureRef,
        envelope: Option<Envelope>,
        by_stream: Option<StreamId>,
        skip_interests: bool,
    ) -> PendingRefresh {
        if let ClosureRef::Boundary(b) = cref {
            let stream = self.closure(cref).and_then(|c| c.stream);
            if let Some(stream) = stream {
                if let Some(closure) = self.closure_mut(cref) {
                    closure.envelope = envelope.clone();
                }
                return if self.can_refresh_stream(stream, b) {
                    self.pre_refresh(ClosureRef::Stream(stream), envelope, Some(stream), skip_interests)
                } else {
                    PendingRefresh::default()
                };
            }
        }
        let Some(old) = self.closure(cref).map(ContentClosure::children) else {
            return PendingRefresh::default();
        };
        let interested = if skip_interests {
            IndexSet::new()
        } else {
            self.collect_interested(cref, by_stream)
        };
        for id in &interested {
            if let Some(boundary) = self.tree.get_mut(*id) {
                let stamp = if by_stream.is_some() {
                    &mut boundary.pre_updates.streamed
                } else {
                    &mut boundary.pre_updates.children
                };
                stamp.get_or_insert_with(|| old.clone());
            }
        }
        let Some(closure) = self.closure_mut(cref) else {
            return PendingRefresh::default();
        };
        closure.envelope = envelope;
        PendingRefresh {
            closure: Some(cref),
            interested,
            pending: closure.grounded.keys().copied().collect(),
        }
    }

    /// Second phase of a content refresh: applies the new envelope to
    /// every grounding point still pending in `token`.
    pub fn apply_refresh(&mut self, apply: &mut dyn Apply, token: PendingRefresh, force: bool) -> Changes {
        let Some(cref) = token.closure else {
            return Changes::default();
        };
        let defs: Vec<DefId> = token.pending.into_iter().collect();
        self.apply_content_defs(apply, cref, &defs, force)
    }

    /// Both phases at once, updating the interested boundaries in
    /// between.
    pub fn apply_envelope(
        &mut self,
        apply: &mut dyn Apply,
        cref: ClosureRef,
        envelope: Option<Envelope>,
        by_stream: Option<StreamId>,
    ) -> Changes {
        let mut token = self.pre_refresh(cref, envelope, by_stream, false);
        let interested = std::mem::take(&mut token.interested);
        let mut changes = Changes::default();
        if !interested.is_empty() {
            changes.merge_opt(self.update_interested(apply, interested, false));
        }
        changes.merge(self.apply_refresh(apply, token, false));
        changes
    }

    fn apply_content_defs(&mut self, apply: &mut dyn Apply, cref: ClosureRef, defs: &[DefId], force: bool) -> Changes {
        let mut changes = Changes::default();
        let force = if force { ForceUpdate::This } else { ForceUpdate::None };
        for def in defs {
            let def = *def;
            let Some(closure) = self.closure(cref) else {
                break;
            };
            let Some(grounding) = closure.grounded.get(&def).cloned() else {
                continue;
            };
            let envelope = closure
                .envelope
                .clone()
                .filter(|e| e.has_content() && closure.source_boundary.is_some());

            let Some(envelope) = envelope else {
                if let Some(cb) = grounding.content_boundary {
                    if let Some(closure) = self.closure_mut(cref) {
                        if let Some(entry) = closure.grounded.get_mut(&def) {
                            entry.content_boundary = None;
                        }
                        if closure.true_pass_def == Some(def) {
                            closure.true_pass_def = None;
                        }
                    }
                    let (node, host) = match self.tree.get(cb) {
                        Some(cb) => (cb.tree_node, Some(cb.host)),
                        None => (None, None),
                    };
                    let mut removal = apply.destroy_boundary(self, cb, false);
                    if let Some(host) = host {
                        removal.assign_host(host);
                    }
                    changes.merge(removal);
                    if let Some(node) = node {
                        self.tree.remove_node(node);
                    }
                }
                continue;
            };

            let true_pass = grounding.mode == PassMode::Pass && closure.true_pass_def.map_or(true, |held| held == def);
            let content = if true_pass { envelope } else { envelope.copied() };

            let cb = match grounding.content_boundary.filter(|cb| self.tree.is_live(*cb)) {
                Some(cb) => {
                    if let Some(boundary) = self.tree.get_mut(cb) {
                        let old = boundary.content.as_ref().map(|e| e.children().to_vec()).unwrap_or_default();
                        boundary.pre_updates.children.get_or_insert(old);
                        boundary.content = Some(content);
                    }
                    cb
                }
                None => {
                    let Some(host) = self.tree.get(grounding.boundary).map(|g| g.host) else {
                        continue;
                    };
                    let kind = ComponentKind::ContentPass(ContentPass {
                        closure: cref,
                        grounding: def,
                        true_pass,
                    });
                    let cb = self.tree.insert_boundary(host, Some(grounding.boundary), kind, Box::new(()), Value::Null);
                    self.tree.create_node(Some(grounding.tree_node), TreeNodeKind::Pass, Some(cb));
                    if let Some(boundary) = self.tree.get_mut(cb) {
                        boundary.content = Some(content);
                    }
                    if let Some(entry) = self.closure_mut(cref).and_then(|c| c.grounded.get_mut(&def)) {
                        entry.content_boundary = Some(cb);
                    }
                    cb
                }
            };
            if true_pass {
                if let Some(closure) = self.closure_mut(cref) {
                    closure.true_pass_def = Some(def);
                }
            }
            let force = if true_pass { ForceUpdate::This } else { force };
            changes.merge_opt(self.update_boundary(apply, cb, force, None, false));
        }
        changes
    }

    /// A parent handed new children to `b`.
    ///
    /// The content is swapped in right away; `b` and every boundary
    /// reading the content are scheduled, and `b`'s next update grounds
    /// it.
    pub fn pass_content(&mut self, apply: &mut dyn Apply, b: BoundaryId, envelope: Option<Envelope>) {
        let Some(boundary) = self.tree.get_mut(b) else {
            return;
        };
        let source = boundary.parent.unwrap_or(b);
        boundary.closure.source_boundary = Some(source);
        let old = boundary.closure.children();
        let token = self.pre_refresh(ClosureRef::Boundary(b), envelope, None, false);
        let interested = token.interested.clone();
        if let Some(boundary) = self.tree.get_mut(b) {
            boundary.pre_updates.children.get_or_insert(old);
            if !token.is_empty() {
                match boundary.pending_content.iter_mut().find(|t| t.closure == token.closure) {
                    Some(existing) => existing.absorb(token),
                    None => boundary.pending_content.push(token),
                }
            }
        }
        self.request_update(apply, b, None);
        for id in interested {
            self.request_update(apply, id, None);
        }
    }

    /// Links `reader` to the closure: it updates whenever the content
    /// changes.
    pub fn link_content(&mut self, cref: ClosureRef, reader: BoundaryId) -> bool {
        if !self.tree.is_live(reader) {
            return false;
        }
        let Some(closure) = self.closure_mut(cref) else {
            return false;
        };
        let added = closure.content_links.insert(reader);
        if let Some(boundary) = self.tree.get_mut(reader) {
            if !boundary.reading.contains(&cref) {
                boundary.reading.push(cref);
            }
        }
        added
    }

    /// Undoes [`link_content`](Self::link_content).
    pub fn unlink_content(&mut self, cref: ClosureRef, reader: BoundaryId) -> bool {
        if let Some(boundary) = self.tree.get_mut(reader) {
            boundary.reading.retain(|r| *r != cref);
        }
        self.closure_mut(cref).is_some_and(|c| c.content_links.shift_remove(&reader))
    }

    /// Drops the grounding a discarded content boundary stood for, unless
    /// the closure already moved on from it.
    pub(crate) fn forget_content_boundary(&mut self, cb: BoundaryId, pass: &ContentPass) {
        let Some(closure) = self.closure_mut(pass.closure) else {
            return;
        };
        if closure.grounded.get(&pass.grounding).and_then(|g| g.content_boundary) != Some(cb) {
            return;
        }
        closure.grounded.shift_remove(&pass.grounding);
        if closure.true_pass_def == Some(pass.grounding) {
            closure.true_pass_def = None;
        }
    }
}
