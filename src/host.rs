//! Hosts and their update scheduler.
//!
//! A host batches boundary updates into one update pass and the render
//! instructions and lifecycle calls those updates produce into one later
//! render flush.

use std::collections::VecDeque;
use std::mem;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, instrument, trace, warn};

use crate::apply::Apply;
use crate::changes::{BoundaryChange, ChangeKind, Changes, ForceUpdate, PreUpdates, RenderInfo, RenderOp, UpdateSnapshot, Updates};
use crate::component::{Component, ComponentKind};
use crate::content::ClosureRef;
use crate::def::{child_defs_equal, Def};
use crate::error::Error;
use crate::ids::{BoundaryId, ContextId, HostId, RefreshId, StreamId, TreeNodeId};
use crate::runtime::Runtime;
use crate::scheduler::Debounced;
use crate::settings::{HostSettings, UpdateMode, UpdateModes};
use crate::tree::{Boundary, MountState, RenderState, TreeNodeKind};
use crate::value::{are_equal, Value};

/// Work sequenced after a host's update pass or render flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostHook {
    /// Re-run a stream's source election.
    RefreshStream(StreamId),
    /// This host has rendered what a context refresh cycle caused.
    ReleaseRefresh(RefreshId),
}

/// A host's scheduler state: the update queue, both timers, the queues
/// of the next render flush and the one-shot hooks.
#[derive(Debug, Default)]
pub struct HostServices {
    pub(crate) updates_pending: IndexSet<BoundaryId>,
    pub(crate) update_timer: Debounced,
    pub(crate) render_timer: Debounced,
    pub(crate) post_render_infos: Vec<RenderInfo>,
    pub(crate) post_boundary_calls: Vec<BoundaryChange>,
    pub(crate) on_update: Vec<HostHook>,
    pub(crate) on_render: Vec<HostHook>,
    pub(crate) updating: bool,
}

impl HostServices {
    /// Boundaries waiting for the next update pass.
    pub fn updates_pending(&self) -> &IndexSet<BoundaryId> {
        &self.updates_pending
    }

    pub fn update_timer(&self) -> &Debounced {
        &self.update_timer
    }

    pub fn render_timer(&self) -> &Debounced {
        &self.render_timer
    }

    /// Render instructions waiting for the next flush.
    pub fn post_render_infos(&self) -> &[RenderInfo] {
        &self.post_render_infos
    }

    /// Lifecycle calls waiting for the next flush.
    pub fn post_boundary_calls(&self) -> &[BoundaryChange] {
        &self.post_boundary_calls
    }

    /// True while an update pass runs.
    pub fn is_updating(&self) -> bool {
        self.updating
    }

    /// Anything waiting for this host's next update pass or render.
    pub(crate) fn has_work(&self) -> bool {
        !self.updates_pending.is_empty()
            || self.updating
            || self.update_timer.is_scheduled()
            || self.render_timer.is_scheduled()
            || !self.post_render_infos.is_empty()
            || !self.post_boundary_calls.is_empty()
    }
}

/// One independently rendered root of the boundary tree.
#[derive(Debug)]
pub struct Host {
    pub(crate) id: HostId,
    pub(crate) settings: HostSettings,
    pub(crate) root: Option<BoundaryId>,
    /// The boundary a nested host is mounted in.
    pub(crate) parent: Option<BoundaryId>,
    pub(crate) contexts: IndexMap<String, ContextId>,
    pub(crate) services: HostServices,
    pub(crate) tree_node: TreeNodeId,
}

impl Host {
    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// The root boundary, once created.
    pub fn root(&self) -> Option<BoundaryId> {
        self.root
    }

    /// The boundary a nested host is mounted in.
    pub fn parent(&self) -> Option<BoundaryId> {
        self.parent
    }

    /// Contexts every boundary of the host inherits, by name.
    pub fn contexts(&self) -> &IndexMap<String, ContextId> {
        &self.contexts
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// The `Root` or `Host` tree node the host renders under.
    pub fn tree_node(&self) -> TreeNodeId {
        self.tree_node
    }
}

fn changed_by(mode: &UpdateMode, differs: impl FnOnce(i32) -> bool) -> bool {
    match mode.depth() {
        depth if depth < -2 => false,
        -2 => true,
        depth => differs(depth),
    }
}

/// The comparison-driven should-update decision. `seen` is the content
/// the boundary renders now, compared against a children stamp.
pub(crate) fn should_update_by(modes: &UpdateModes, boundary: &Boundary, pre: &PreUpdates, seen: &[Rc<Def>]) -> bool {
    pre.host
        || pre
            .props
            .as_ref()
            .is_some_and(|old| changed_by(&modes.props, |depth| !are_equal(old, &boundary.props, depth)))
        || pre
            .state
            .as_ref()
            .is_some_and(|old| changed_by(&modes.state, |depth| !are_equal(old, &boundary.state, depth)))
        || pre
            .children
            .as_ref()
            .is_some_and(|old| changed_by(&modes.children, |depth| !child_defs_equal(old, seen, depth)))
        || (pre.streamed.is_some() && modes.streamed.depth() >= -2)
}

impl Runtime {
    /// Creates a host, optionally nested inside the boundary `parent`.
    pub fn create_host(&mut self, settings: HostSettings, parent: Option<BoundaryId>) -> Result<HostId, Error> {
        let node = match parent {
            Some(parent) => {
                if !self.tree.is_live(parent) {
                    return Err(Error::UnknownBoundary(parent));
                }
                let outer = self.ensure_tree_node(parent);
                self.tree.create_node(outer, TreeNodeKind::Host, None)
            }
            None => self.tree.create_node(None, TreeNodeKind::Root, None),
        };
        let id = HostId(self.host_ids.next());
        self.hosts.insert(
            id,
            Host {
                id,
                settings,
                root: None,
                parent,
                contexts: IndexMap::new(),
                services: HostServices::default(),
                tree_node: node,
            },
        );
        debug!(host = %id, "host created");
        Ok(id)
    }

    /// A live host.
    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    /// Replaces a host's settings and updates every boundary in it.
    pub fn set_host_settings(&mut self, apply: &mut dyn Apply, host: HostId, settings: HostSettings) -> Result<(), Error> {
        let entry = self.hosts.get_mut(&host).ok_or(Error::UnknownHost(host))?;
        entry.settings = settings;
        let Some(root) = entry.root else {
            return Ok(());
        };
        let mut all = vec![root];
        all.extend(self.tree.boundaries_within(root));
        for id in all {
            if let Some(boundary) = self.tree.get_mut(id).filter(|b| b.host == host) {
                boundary.pre_updates.host = true;
                self.request_update(apply, id, None);
            }
        }
        Ok(())
    }

    /// Adds a boundary to the tree. A boundary without a parent becomes
    /// its host's root. Nothing is rendered until it is updated.
    pub fn create_boundary(
        &mut self,
        host: HostId,
        parent: Option<BoundaryId>,
        kind: ComponentKind,
        component: Box<dyn Component>,
        props: Value,
    ) -> Result<BoundaryId, Error> {
        if !self.hosts.contains_key(&host) {
            return Err(Error::UnknownHost(host));
        }
        if let Some(parent) = parent.filter(|p| !self.tree.is_live(*p)) {
            return Err(Error::UnknownBoundary(parent));
        }
        if let Some(stream) = kind.stream().filter(|s| !self.is_stream(*s)) {
            return Err(Error::UnknownStream(stream));
        }
        let id = self.tree.insert_boundary(host, parent, kind, component, props);
        if parent.is_none() {
            if let Some(entry) = self.hosts.get_mut(&host) {
                entry.root = Some(id);
            }
        }
        trace!(boundary = %id, "boundary created");
        Ok(id)
    }

    /// The boundary's tree node, created under its parent's (or its
    /// host's) node on first use.
    pub fn ensure_tree_node(&mut self, b: BoundaryId) -> Option<TreeNodeId> {
        let boundary = self.tree.get(b)?;
        if let Some(node) = boundary.tree_node {
            return Some(node);
        }
        let (parent, host) = (boundary.parent, boundary.host);
        let outer = match parent {
            Some(parent) => self.ensure_tree_node(parent),
            None => self.hosts.get(&host).map(|h| h.tree_node),
        };
        Some(self.tree.create_node(outer, TreeNodeKind::Boundary, Some(b)))
    }

    /// Ties `target`'s props to `wrapper`: every update of the wrapper
    /// rebuilds them through [`Apply::build_wired_props`].
    pub fn wire(&mut self, wrapper: BoundaryId, target: BoundaryId) -> Result<(), Error> {
        if !self.tree.is_live(target) {
            return Err(Error::UnknownBoundary(target));
        }
        let boundary = self.tree.get_mut(wrapper).ok_or(Error::UnknownBoundary(wrapper))?;
        if !boundary.wired.contains(&target) {
            boundary.wired.push(target);
        }
        Ok(())
    }

    /// Records an update request on `b`.
    ///
    /// Repeated requests before the next pass accumulate: each field keeps
    /// the value it had before the first request. A boundary that is
    /// rendering right now renders again as soon as it finishes.
    pub fn absorb_updates(
        &mut self,
        apply: &mut dyn Apply,
        b: BoundaryId,
        updates: Updates,
        refresh: bool,
        force_timeout: Option<Option<u32>>,
    ) {
        let Some(boundary) = self.tree.get_mut(b).filter(|b| b.mount != MountState::Destroyed) else {
            return;
        };
        if let Some(props) = updates.props {
            let old = mem::replace(&mut boundary.props, props.into());
            boundary.pre_updates.props.get_or_insert(old);
        }
        if let Some(state) = updates.state {
            let old = mem::replace(&mut boundary.state, state.into());
            boundary.pre_updates.state.get_or_insert(old);
        }
        boundary.pre_updates.force = boundary.pre_updates.force.max(updates.force);
        match boundary.render_state {
            RenderState::Rendering | RenderState::ReUpdated => {
                boundary.render_state = RenderState::ReUpdated;
                return;
            }
            RenderState::Updating => return,
            RenderState::Idle => {}
        }
        if refresh {
            self.request_update(apply, b, force_timeout);
        }
    }

    /// Queues `b` for its host's next update pass.
    pub fn request_update(&mut self, apply: &mut dyn Apply, b: BoundaryId, force_timeout: Option<Option<u32>>) {
        let Some(host) = self.tree.get(b).filter(|b| b.mount != MountState::Destroyed).map(|b| b.host) else {
            return;
        };
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        entry.services.updates_pending.insert(b);
        self.trigger_updates(apply, host, force_timeout);
    }

    /// Removes `b` from its host's queue.
    pub fn cancel_updates(&mut self, b: BoundaryId) -> bool {
        let Some(host) = self.tree.get(b).map(|b| b.host) else {
            return false;
        };
        self.hosts
            .get_mut(&host)
            .is_some_and(|h| h.services.updates_pending.shift_remove(&b))
    }

    /// Schedules the host's update pass, or runs it now when the timeout
    /// says so or a render flush is already pending.
    pub fn trigger_updates(&mut self, apply: &mut dyn Apply, host: HostId, force_timeout: Option<Option<u32>>) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        if entry.services.updating {
            return;
        }
        if entry.services.render_timer.is_scheduled() {
            self.run_updates(apply, host);
            return;
        }
        let now = self.now;
        if entry.services.update_timer.refresh(now, entry.settings.update_timeout, force_timeout) {
            self.run_updates(apply, host);
        }
    }

    /// Drains the host's queue in tree order until it stays empty, then
    /// runs the update hooks and schedules the render flush.
    #[instrument(level = "debug", skip(self, apply))]
    pub fn run_updates(&mut self, apply: &mut dyn Apply, host: HostId) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        if entry.services.updating {
            return;
        }
        entry.services.updating = true;
        entry.services.update_timer.cancel();
        loop {
            let Some(entry) = self.hosts.get_mut(&host) else {
                return;
            };
            if entry.services.updates_pending.is_empty() {
                break;
            }
            let mut pending: Vec<BoundaryId> = entry.services.updates_pending.drain(..).collect();
            if pending.len() >= 2 {
                self.tree.sort_in_tree_order(&mut pending);
            }
            trace!(count = pending.len(), "update round");
            for b in pending {
                if let Some(changes) = self.update_boundary(apply, b, ForceUpdate::None, None, true) {
                    self.queue_changes(apply, host, changes);
                }
            }
        }
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        entry.services.updating = false;
        let hooks = mem::take(&mut entry.services.on_update);
        if !hooks.is_empty() && !entry.services.post_render_infos.is_empty() {
            self.run_render(apply, host);
        }
        for hook in hooks {
            self.fire_hook(apply, host, hook);
        }
        let pending_render = self
            .hosts
            .get(&host)
            .is_some_and(|h| !h.services.post_render_infos.is_empty() || !h.services.post_boundary_calls.is_empty() || !h.services.on_render.is_empty());
        if pending_render {
            self.trigger_render(apply, host, None);
        }
    }

    /// Updates one boundary now.
    ///
    /// Mounts it if it never rendered. Otherwise runs its before-update
    /// hook and the should-update decision, then the apply engine, then
    /// everything the update makes interested: pending content, wired
    /// components, descendants affected by context changes and any
    /// `interested` boundaries passed in. Returns `None` when nothing
    /// changed.
    pub fn update_boundary(
        &mut self,
        apply: &mut dyn Apply,
        b: BoundaryId,
        force: ForceUpdate,
        interested: Option<IndexSet<BoundaryId>>,
        are_ordered: bool,
    ) -> Option<Changes> {
        let boundary = self.tree.get_mut(b)?;
        match boundary.render_state {
            RenderState::Idle => {}
            RenderState::Rendering | RenderState::ReUpdated => {
                boundary.render_state = RenderState::ReUpdated;
                boundary.pre_updates.force = boundary.pre_updates.force.max(force);
                return None;
            }
            RenderState::Updating => return None,
        }
        if boundary.mount == MountState::Destroyed {
            return None;
        }
        let host = boundary.host;
        let kind = boundary.kind.clone();
        let tokens = mem::take(&mut boundary.pending_content);
        let settings = self.hosts.get(&host)?.settings.clone();

        let mut changes = Changes::default();
        let mut interested = interested.unwrap_or_default();
        let given = interested.len();
        let mut force = force;
        let mut updated = false;

        if boundary.mount == MountState::Unmounted {
            boundary.pre_updates = PreUpdates::default();
            if let Some(stream) = kind.stream() {
                if let Some(state) = self.streams.get_mut(stream) {
                    state.sources.insert(b);
                }
            }
            self.ensure_tree_node(b);
            changes.merge(self.render_boundary(apply, b, force, settings.max_re_renders));
            if let Some(boundary) = self.tree.get_mut(b) {
                boundary.mount = MountState::Mounted;
            }
            changes.boundary_changes.push(BoundaryChange::new(b, ChangeKind::Mounted));
            updated = true;
            trace!(boundary = %b, "mounted");
        } else {
            boundary.render_state = RenderState::Updating;
            {
                let Boundary { component, pre_updates, .. } = &mut *boundary;
                component.before_update(pre_updates);
            }
            boundary.render_state = RenderState::Idle;
            let pre = mem::take(&mut boundary.pre_updates);
            force = force.max(pre.force);

            if pre.moved {
                changes.merge(self.apply_move(b));
            }
            let should = force.is_forced() || {
                let seen = self.seen_children(b);
                let boundary = self.tree.get(b)?;
                boundary
                    .component
                    .should_update(&pre)
                    .unwrap_or_else(|| should_update_by(&settings.should_update_with, boundary, &pre, &seen))
            };
            trace!(boundary = %b, should, "should update");
            if should {
                changes.merge(self.render_boundary(apply, b, force, settings.max_re_renders));
                if let Some(boundary) = self.tree.get(b) {
                    let snapshot = UpdateSnapshot {
                        props: pre.props.as_ref().map(|_| boundary.props.clone()),
                        state: pre.state.as_ref().map(|_| boundary.state.clone()),
                    };
                    changes.boundary_changes.push(BoundaryChange {
                        boundary: b,
                        kind: ChangeKind::Updated,
                        updates: Some(snapshot),
                        prev: Some(pre.clone()),
                        host: None,
                    });
                }
                updated = true;
            }
            if let Some(names) = &pre.contextual {
                self.call_data_listeners(apply, b, Some(names));
            }
            if let Some(names) = &pre.cascade {
                interested.extend(self.after_outer_contexts(b, names));
            }
        }

        for token in tokens {
            changes.merge(self.apply_refresh(apply, token, force.is_forced()));
        }

        if updated && kind == ComponentKind::Wrapper {
            let wired = self.tree.get(b).map(|w| w.wired.clone()).unwrap_or_default();
            for target in wired {
                let Some(props) = apply.build_wired_props(self, target, b) else {
                    continue;
                };
                if let Some(boundary) = self.tree.get_mut(target).filter(|t| t.mount != MountState::Destroyed) {
                    let old = mem::replace(&mut boundary.props, props.into());
                    boundary.pre_updates.props.get_or_insert(old);
                    interested.insert(target);
                }
            }
        }

        if updated {
            if let Some(stream) = kind.stream() {
                self.refresh_stream(apply, stream, None);
            }
        }

        interested.shift_remove(&b);
        if !interested.is_empty() {
            let ordered = are_ordered && interested.len() == given;
            changes.merge_opt(self.update_interested(apply, interested, ordered));
        }
        changes.into_option()
    }

    /// Updates each boundary in tree order, unless told they already are.
    pub fn update_interested(
        &mut self,
        apply: &mut dyn Apply,
        interested: IndexSet<BoundaryId>,
        are_ordered: bool,
    ) -> Option<Changes> {
        let mut ids: Vec<BoundaryId> = interested.into_iter().collect();
        if !are_ordered {
            self.tree.sort_in_tree_order(&mut ids);
        }
        let mut changes = Changes::default();
        for id in ids {
            changes.merge_opt(self.update_boundary(apply, id, ForceUpdate::None, None, true));
        }
        changes.into_option()
    }

    /// Descendants of `b` whose effective context for any of `names`
    /// changed and who listen to its data. A descendant overriding a name
    /// shields its own branch from it; nested hosts are entered only when
    /// they welcome outer contexts.
    pub fn after_outer_contexts(&mut self, b: BoundaryId, names: &IndexSet<String>) -> IndexSet<BoundaryId> {
        let mut found = IndexSet::new();
        let mut queue: VecDeque<(BoundaryId, IndexSet<String>)> =
            self.context_children(b).into_iter().map(|id| (id, names.clone())).collect();
        while let Some((id, names)) = queue.pop_front() {
            let Some(boundary) = self.tree.get(id) else {
                continue;
            };
            let remaining: IndexSet<String> = names
                .into_iter()
                .filter(|name| !boundary.context_api.overridden.contains_key(name))
                .collect();
            if remaining.is_empty() {
                continue;
            }
            for name in &remaining {
                if self.help_update_context(id, name) && self.needs_data(id, name) {
                    if let Some(boundary) = self.tree.get_mut(id) {
                        boundary.pre_updates.add_contextual([name.clone()]);
                    }
                    found.insert(id);
                }
            }
            queue.extend(self.context_children(id).into_iter().map(|child| (child, remaining.clone())));
        }
        found
    }

    /// The content `b` renders: what was handed to it, plus what it reads
    /// through content links.
    fn seen_children(&self, b: BoundaryId) -> Vec<Rc<Def>> {
        let Some(boundary) = self.tree.get(b) else {
            return Vec::new();
        };
        if let Some(envelope) = &boundary.content {
            return envelope.children().to_vec();
        }
        let mut seen = boundary.closure.children();
        for cref in &boundary.reading {
            seen.extend(self.closure(*cref).map(|c| c.children()).unwrap_or_default());
        }
        seen
    }

    /// Inner boundaries plus the roots of nested hosts that welcome outer
    /// contexts.
    fn context_children(&self, b: BoundaryId) -> Vec<BoundaryId> {
        let mut children = self.tree.inner(b).to_vec();
        children.extend(
            self.hosts
                .values()
                .filter(|h| h.parent == Some(b) && h.settings.welcome_contexts_up_root)
                .filter_map(|h| h.root),
        );
        children
    }

    fn run_apply(&mut self, apply: &mut dyn Apply, b: BoundaryId, force: ForceUpdate) -> Changes {
        let true_pass = match self.tree.get(b).map(|b| &b.kind) {
            None => return Changes::default(),
            Some(ComponentKind::ContentPass(pass)) => pass.true_pass,
            Some(_) => false,
        };
        if true_pass {
            apply.run_content_pass_update(self, b, force.is_forced())
        } else {
            apply.run_boundary_update(self, b, force == ForceUpdate::All)
        }
    }

    /// Runs the apply engine, rendering again while updates keep arriving
    /// mid-render, up to the host's limit.
    fn render_boundary(&mut self, apply: &mut dyn Apply, b: BoundaryId, force: ForceUpdate, max_re_renders: u8) -> Changes {
        if let Some(boundary) = self.tree.get_mut(b) {
            boundary.render_state = RenderState::Rendering;
        }
        let mut changes = self.run_apply(apply, b, force);
        let mut renders = 0u8;
        loop {
            let Some(boundary) = self.tree.get_mut(b) else {
                break;
            };
            if boundary.render_state != RenderState::ReUpdated {
                boundary.render_state = RenderState::Idle;
                break;
            }
            if renders >= max_re_renders {
                warn!(boundary = %b, renders, "re-render limit reached, deferring to next pass");
                boundary.render_state = RenderState::Idle;
                self.request_update(apply, b, None);
                break;
            }
            boundary.render_state = RenderState::Rendering;
            let nested = mem::take(&mut boundary.pre_updates).force;
            changes.merge(self.run_apply(apply, b, force.max(nested)));
            renders += 1;
        }
        changes
    }

    fn apply_move(&mut self, b: BoundaryId) -> Changes {
        let mut changes = Changes::default();
        if let Some(node) = self.tree.get(b).and_then(|b| b.tree_node) {
            for dom in self.tree.root_dom_tree_nodes(node, true, true) {
                changes.render_infos.push(RenderInfo::new(dom, RenderOp::Move).for_boundary(b));
            }
        }
        let mut moved = vec![b];
        moved.extend(self.tree.boundaries_within(b));
        for id in moved {
            let registered: Vec<ContextId> = self
                .tree
                .get(id)
                .map(|x| x.context_api.registered.values().copied().collect())
                .unwrap_or_default();
            for ctx in registered {
                if let Some(context) = self.contexts.get_mut(&ctx) {
                    context.services.on_move(id);
                }
            }
        }
        changes.boundary_changes.push(BoundaryChange::new(b, ChangeKind::Moved));
        changes
    }

    /// Flags `b` as moved in the tree and schedules it.
    pub fn mark_moved(&mut self, apply: &mut dyn Apply, b: BoundaryId) {
        if let Some(boundary) = self.tree.get_mut(b) {
            boundary.pre_updates.moved = true;
            self.request_update(apply, b, None);
        }
    }

    /// Moves `b` to `index` among its siblings and flags it as moved.
    pub fn move_boundary(&mut self, apply: &mut dyn Apply, b: BoundaryId, index: usize) {
        self.tree.reorder(b, index);
        self.mark_moved(apply, b);
    }

    /// Queues changes for the host's render flush and schedules it.
    pub fn absorb_changes(&mut self, apply: &mut dyn Apply, host: HostId, changes: Changes, force_render_timeout: Option<Option<u32>>) {
        if changes.is_empty() {
            return;
        }
        self.queue_changes(apply, host, changes);
        if self.hosts.get(&host).is_some_and(|h| !h.services.updating) {
            self.trigger_render(apply, host, force_render_timeout);
        }
    }

    /// Queues each part of `changes` on the host it belongs to. Parts for
    /// other hosts also schedule their render flush.
    fn queue_changes(&mut self, apply: &mut dyn Apply, host: HostId, changes: Changes) {
        for (target, part) in self.split_by_host(host, changes) {
            self.queue_on(target, part);
            if target != host && self.hosts.get(&target).is_some_and(|h| !h.services.updating) {
                self.trigger_render(apply, target, None);
            }
        }
    }

    /// Groups changes by the host whose flush carries them: the host they
    /// are tied to, else their boundary's host, else `default`.
    pub(crate) fn split_by_host(&self, default: HostId, changes: Changes) -> IndexMap<HostId, Changes> {
        let mut parts: IndexMap<HostId, Changes> = IndexMap::new();
        parts.insert(default, Changes::default());
        for info in changes.render_infos {
            let host = self.flush_host(default, info.host, info.boundary);
            parts.entry(host).or_default().render_infos.push(info);
        }
        for change in changes.boundary_changes {
            let host = self.flush_host(default, change.host, Some(change.boundary));
            parts.entry(host).or_default().boundary_changes.push(change);
        }
        parts.retain(|_, part| !part.is_empty());
        parts
    }

    /// The hosts [`split_by_host`](Self::split_by_host) would queue
    /// `changes` on.
    pub(crate) fn hosts_of(&self, default: HostId, changes: &Changes) -> IndexSet<HostId> {
        let infos = changes.render_infos.iter().map(|i| self.flush_host(default, i.host, i.boundary));
        let calls = changes
            .boundary_changes
            .iter()
            .map(|c| self.flush_host(default, c.host, Some(c.boundary)));
        infos.chain(calls).collect()
    }

    fn flush_host(&self, default: HostId, tied: Option<HostId>, boundary: Option<BoundaryId>) -> HostId {
        tied.or_else(|| boundary.and_then(|b| self.tree.get(b)).map(|b| b.host))
            .filter(|h| self.hosts.contains_key(h))
            .unwrap_or(default)
    }

    fn queue_on(&mut self, host: HostId, changes: Changes) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        entry.services.post_render_infos.extend(changes.render_infos);
        if entry.settings.use_immediate_calls {
            for change in &changes.boundary_changes {
                self.call_lifecycle(change);
            }
        } else {
            entry.services.post_boundary_calls.extend(changes.boundary_changes);
        }
    }

    /// Schedules the host's render flush, or runs it now without a
    /// timeout.
    pub fn trigger_render(&mut self, apply: &mut dyn Apply, host: HostId, force_timeout: Option<Option<u32>>) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        let now = self.now;
        if entry.services.render_timer.refresh(now, entry.settings.render_timeout, force_timeout) {
            self.run_render(apply, host);
        }
    }

    /// Hands queued render infos to the renderer as one batch, then makes
    /// the queued lifecycle calls and runs the render hooks.
    #[instrument(level = "debug", skip(self, apply))]
    pub fn run_render(&mut self, apply: &mut dyn Apply, host: HostId) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        entry.services.render_timer.cancel();
        let infos = mem::take(&mut entry.services.post_render_infos);
        let calls = mem::take(&mut entry.services.post_boundary_calls);
        let hooks = mem::take(&mut entry.services.on_render);
        if !infos.is_empty() {
            debug!(count = infos.len(), "applying render infos");
            self.renderer.apply_to_dom(host, infos);
        }
        for change in &calls {
            self.call_lifecycle(change);
        }
        for hook in hooks {
            self.fire_hook(apply, host, hook);
        }
        self.process_commands(apply);
    }

    fn call_lifecycle(&mut self, change: &BoundaryChange) {
        let Some(boundary) = self.tree.get_mut(change.boundary).filter(|b| b.mount == MountState::Mounted) else {
            return;
        };
        match change.kind {
            ChangeKind::Mounted => boundary.component.did_mount(),
            ChangeKind::Updated => boundary.component.did_update(change),
            ChangeKind::Moved => boundary.component.did_move(),
            ChangeKind::Destroyed => {}
        }
    }

    /// Runs `hook` at the end of the host's next update pass.
    pub fn add_update_hook(&mut self, apply: &mut dyn Apply, host: HostId, hook: HostHook) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        entry.services.on_update.push(hook);
        self.trigger_updates(apply, host, None);
    }

    /// Runs `hook` at the end of the host's next render flush.
    pub fn add_render_hook(&mut self, apply: &mut dyn Apply, host: HostId, hook: HostHook) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        entry.services.on_render.push(hook);
        if !entry.services.updating {
            self.trigger_render(apply, host, None);
        }
    }

    fn fire_hook(&mut self, apply: &mut dyn Apply, host: HostId, hook: HostHook) {
        debug!(%host, ?hook, "host hook");
        match hook {
            HostHook::RefreshStream(stream) => {
                self.refresh_stream(apply, stream, None);
            }
            HostHook::ReleaseRefresh(refresh) => self.release_refresh(apply, refresh, host),
        }
    }

    /// Settles the host's timers: flushes pending work, or with `forget`
    /// drops it.
    pub fn clear_timers(&mut self, apply: &mut dyn Apply, host: HostId, forget: bool) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        let services = &mut entry.services;
        if forget {
            services.update_timer.cancel();
            services.render_timer.cancel();
            services.updates_pending.clear();
            services.post_render_infos.clear();
            services.post_boundary_calls.clear();
            return;
        }
        if services.update_timer.flush() || !services.updates_pending.is_empty() {
            self.run_updates(apply, host);
        }
        let render = self
            .hosts
            .get_mut(&host)
            .is_some_and(|h| h.services.render_timer.flush() || h.services.has_work());
        if render {
            self.run_render(apply, host);
        }
    }

    /// Flushes the host, tears its tree down and removes it.
    pub fn destroy_host(&mut self, apply: &mut dyn Apply, host: HostId) {
        self.clear_timers(apply, host, false);
        let Some(root) = self.hosts.get(&host).and_then(|h| h.root) else {
            self.remove_host(host);
            return;
        };
        let changes = self.discard_boundary(apply, root);
        self.queue_changes(apply, host, changes);
        self.run_render(apply, host);
        self.remove_host(host);
    }

    fn remove_host(&mut self, host: HostId) {
        if let Some(entry) = self.hosts.shift_remove(&host) {
            self.tree.remove_node(entry.tree_node);
            debug!(%host, "host destroyed");
        }
    }

    /// Tears down `b` and everything under it, children first.
    pub fn discard_boundary(&mut self, apply: &mut dyn Apply, b: BoundaryId) -> Changes {
        let mut changes = Changes::default();
        if !self.tree.is_live(b) {
            return changes;
        }
        let Some((top_node, top_host)) = self.tree.get(b).map(|b| (b.tree_node, b.host)) else {
            return changes;
        };
        let mut ids = vec![b];
        ids.extend(self.tree.boundaries_within(b));

        for &id in ids.iter().rev() {
            let Some(boundary) = self.tree.get_mut(id).filter(|x| x.mount != MountState::Destroyed) else {
                continue;
            };
            boundary.component.will_unmount();
            boundary.mount = MountState::Destroyed;
            let host = boundary.host;
            let kind = boundary.kind.clone();
            let registered = mem::take(&mut boundary.context_api.registered);
            let reading = mem::take(&mut boundary.reading);
            let grounded: Vec<_> = boundary.closure.grounded.keys().copied().collect();
            self.cancel_updates(id);

            for ctx in registered.values() {
                if let Some(context) = self.contexts.get_mut(ctx) {
                    context.services.forget(id);
                }
            }
            for cref in reading {
                if let Some(closure) = self.closure_mut(cref) {
                    closure.content_links.shift_remove(&id);
                }
            }
            match &kind {
                ComponentKind::Stream(stream) => changes.merge_opt(self.remove_source(apply, *stream, id, true)),
                ComponentKind::ContentPass(pass) => self.forget_content_boundary(id, pass),
                _ => {}
            }
            for def in grounded {
                changes.merge(self.content_ungrounded(apply, ClosureRef::Boundary(id), def));
            }
            for stream in self.streams.iter_mut() {
                let closure = &mut stream.closure;
                closure.grounded.retain(|_, g| g.boundary != id);
                if closure.true_pass_def.is_some_and(|d| !closure.grounded.contains_key(&d)) {
                    closure.true_pass_def = None;
                }
            }
            let nested: Vec<HostId> = self.hosts.values().filter(|h| h.parent == Some(id)).map(|h| h.id).collect();
            for host in nested {
                self.destroy_host(apply, host);
            }
            changes.boundary_changes.push(BoundaryChange::new(id, ChangeKind::Destroyed).for_host(host));
        }

        if let Some(node) = top_node {
            changes.render_infos.push(RenderInfo::new(node, RenderOp::Remove).for_boundary(b).for_host(top_host));
        }
        for &id in ids.iter().rev() {
            if let Some(boundary) = self.tree.remove_boundary(id) {
                if let Some(node) = boundary.tree_node {
                    self.tree.remove_node(node);
                }
                if boundary.parent.is_none() {
                    if let Some(entry) = self.hosts.get_mut(&boundary.host).filter(|h| h.root == Some(id)) {
                        entry.root = None;
                    }
                }
            }
        }
        trace!(boundary = %b, count = ids.len(), "discarded");
        changes
    }
}
