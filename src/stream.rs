//! Streams: named content channels fed by one elected source instance.

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, instrument};

use crate::apply::Apply;
use crate::changes::Changes;
use crate::content::{ClosureRef, ContentClosure};
use crate::def::Def;
use crate::error::Error;
use crate::host::HostHook;
use crate::ids::{BoundaryId, HostId, IdCounter, StreamId};
use crate::runtime::Runtime;

/// The shared state of one stream: its candidate sources and its output
/// closure.
#[derive(Debug)]
pub struct StreamState {
    pub(crate) name: String,
    pub(crate) source: Option<BoundaryId>,
    pub(crate) sources: IndexSet<BoundaryId>,
    pub(crate) closure: ContentClosure,
    /// Hosts holding an outgoing source's teardown; flushed before the
    /// next source is installed.
    pub(crate) removal_hosts: IndexSet<HostId>,
}

impl StreamState {
    /// The name the stream was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instance feeding the stream, if any.
    pub fn source(&self) -> Option<BoundaryId> {
        self.source
    }

    /// Every candidate, in registration order.
    pub fn sources(&self) -> &IndexSet<BoundaryId> {
        &self.sources
    }

    /// The output side, grounded wherever the stream's content is read.
    pub fn closure(&self) -> &ContentClosure {
        &self.closure
    }

    /// Always true on a real stream.
    pub fn is_stream(&self) -> bool {
        true
    }
}

/// Every stream of a runtime, by id.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: IndexMap<StreamId, StreamState>,
    ids: IdCounter,
}

impl StreamRegistry {
    pub fn get(&self, id: StreamId) -> Option<&StreamState> {
        self.streams.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: StreamId) -> Option<&mut StreamState> {
        self.streams.get_mut(&id)
    }

    fn create(&mut self, name: &str) -> StreamId {
        let id = StreamId(self.ids.next());
        self.streams.insert(
            id,
            StreamState {
                name: name.to_owned(),
                source: None,
                sources: IndexSet::new(),
                closure: ContentClosure::new(None),
                removal_hosts: IndexSet::new(),
            },
        );
        id
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut StreamState> {
        self.streams.values_mut()
    }
}

/// Picks the candidate with the strictly greatest importance; among
/// equals the first one seen wins.
pub(crate) fn elect(candidates: impl IntoIterator<Item = (BoundaryId, f64)>) -> Option<BoundaryId> {
    let mut best: Option<(BoundaryId, f64)> = None;
    for (id, importance) in candidates {
        match best {
            Some((_, top)) if importance <= top => {}
            _ => best = Some((id, importance)),
        }
    }
    best.map(|(id, _)| id)
}

impl Runtime {
    /// Registers a new, unsourced stream.
    pub fn create_stream(&mut self, name: &str) -> StreamId {
        self.streams.create(name)
    }

    /// The state of a registered stream.
    pub fn stream(&self, id: StreamId) -> Option<&StreamState> {
        self.streams.get(id)
    }

    /// False for ids this runtime never handed out.
    pub fn is_stream(&self, id: StreamId) -> bool {
        self.streams.get(id).is_some_and(StreamState::is_stream)
    }

    /// Adds a candidate source. Election only happens on
    /// [`refresh_stream`](Self::refresh_stream).
    pub fn add_source(&mut self, stream: StreamId, b: BoundaryId) -> Result<bool, Error> {
        if !self.tree.is_live(b) {
            return Err(Error::UnknownBoundary(b));
        }
        let state = self.streams.get_mut(stream).ok_or(Error::UnknownStream(stream))?;
        Ok(state.sources.insert(b))
    }

    /// Removes a candidate. When it was the active source, its content is
    /// torn down and, with `with_refresh`, a new source is elected once
    /// its host has rendered.
    pub fn remove_source(
        &mut self,
        apply: &mut dyn Apply,
        stream: StreamId,
        b: BoundaryId,
        with_refresh: bool,
    ) -> Option<Changes> {
        let state = self.streams.get_mut(stream)?;
        state.sources.shift_remove(&b);
        if state.source != Some(b) {
            return None;
        }
        let changes = self.unset_source(apply, stream);
        if let Some(host) = self.tree.get(b).map(|b| b.host) {
            self.note_removal(stream, host, &changes);
            if with_refresh {
                self.add_render_hook(apply, host, HostHook::RefreshStream(stream));
            }
        }
        Some(changes)
    }

    /// The candidate that should be the source right now.
    pub fn best_stream_source(&self, stream: StreamId) -> Option<BoundaryId> {
        let state = self.streams.get(stream)?;
        elect(
            state
                .sources
                .iter()
                .filter_map(|id| self.tree.get(*id))
                .map(|b| (b.id, b.importance())),
        )
    }

    /// Re-runs the election. Returns whether the source changed or a
    /// change was scheduled.
    ///
    /// When the outgoing source's teardown produced changes, the new
    /// source is installed only after the outgoing host's update pass, so
    /// the removal and the addition never render in one batch.
    #[instrument(level = "debug", skip(self, apply))]
    pub fn refresh_stream(&mut self, apply: &mut dyn Apply, stream: StreamId, force_render_timeout: Option<Option<u32>>) -> bool {
        let Some(current) = self.streams.get(stream).map(|s| s.source) else {
            return false;
        };
        let best = self.best_stream_source(stream);
        if best == current {
            return false;
        }
        debug!(?current, ?best, "stream source changing");
        if let Some(old) = current {
            let removal = self.unset_source(apply, stream);
            if !removal.is_empty() {
                if let Some(host) = self.tree.get(old).map(|b| b.host) {
                    self.note_removal(stream, host, &removal);
                    self.absorb_changes(apply, host, removal, force_render_timeout);
                    self.add_update_hook(apply, host, HostHook::RefreshStream(stream));
                    return true;
                }
            }
        }
        if let Some(new) = best {
            let changes = self.install_source(apply, stream, new);
            if let Some(host) = self.tree.get(new).map(|b| b.host) {
                self.absorb_changes(apply, host, changes, force_render_timeout);
            }
        }
        true
    }

    /// Makes `candidate` the source right away.
    ///
    /// An existing source is only replaced with `fully` and when the
    /// candidate is strictly more important. The incumbent's teardown
    /// stays with its own host when the hosts differ.
    pub fn reattach_source_by(
        &mut self,
        apply: &mut dyn Apply,
        stream: StreamId,
        candidate: BoundaryId,
        fully: bool,
    ) -> Option<Changes> {
        let incumbent = self.streams.get(stream)?.source;
        let candidate_importance = self.tree.get(candidate)?.importance();
        let mut changes = Changes::default();
        if let Some(incumbent) = incumbent {
            if incumbent == candidate {
                return None;
            }
            let incumbent_importance = self.tree.get(incumbent).map_or(0.0, |b| b.importance());
            if !fully || candidate_importance <= incumbent_importance {
                return None;
            }
            let removal = self.unset_source(apply, stream);
            let incumbent_host = self.tree.get(incumbent).map(|b| b.host);
            let candidate_host = self.tree.get(candidate).map(|b| b.host);
            match incumbent_host {
                Some(host) if incumbent_host != candidate_host => self.absorb_changes(apply, host, removal, None),
                _ => changes.merge(removal),
            }
        }
        if let Some(state) = self.streams.get_mut(stream) {
            state.sources.insert(candidate);
        }
        changes.merge(self.install_source(apply, stream, candidate));
        Some(changes)
    }

    /// Whether `b` is the instance currently feeding the stream.
    pub fn can_refresh_stream(&self, stream: StreamId, b: BoundaryId) -> bool {
        self.streams.get(stream).is_some_and(|s| s.source == Some(b))
    }

    /// Links `reader` to the stream's output and returns the current
    /// content.
    pub fn with_stream_content(&mut self, stream: StreamId, reader: BoundaryId) -> Option<Vec<Rc<Def>>> {
        self.link_content(ClosureRef::Stream(stream), reader);
        self.read_content(ClosureRef::Stream(stream))
    }

    fn note_removal(&mut self, stream: StreamId, host: HostId, removal: &Changes) {
        let hosts = self.hosts_of(host, removal);
        if let Some(state) = self.streams.get_mut(stream) {
            state.removal_hosts.extend(hosts);
        }
    }

    /// Installs `b` as the source. Hosts still holding the previous
    /// source's teardown render it first.
    fn install_source(&mut self, apply: &mut dyn Apply, stream: StreamId, b: BoundaryId) -> Changes {
        debug!(%stream, source = %b, "installing stream source");
        let envelope = self.tree.get(b).and_then(|b| b.closure.envelope.clone());
        let Some(state) = self.streams.get_mut(stream) else {
            return Changes::default();
        };
        let removal_hosts: Vec<HostId> = state.removal_hosts.drain(..).collect();
        for host in removal_hosts {
            if self.hosts.get(&host).is_some_and(|h| !h.services.post_render_infos.is_empty()) {
                self.run_render(apply, host);
            }
        }
        let Some(state) = self.streams.get_mut(stream) else {
            return Changes::default();
        };
        state.source = Some(b);
        state.closure.source_boundary = Some(b);
        self.apply_envelope(apply, ClosureRef::Stream(stream), envelope, Some(stream))
    }

    /// Clears the output and leaves the stream unsourced. Readers are
    /// scheduled rather than updated in place, as this runs mid-teardown.
    fn unset_source(&mut self, apply: &mut dyn Apply, stream: StreamId) -> Changes {
        let mut token = self.pre_refresh(ClosureRef::Stream(stream), None, Some(stream), false);
        if let Some(state) = self.streams.get_mut(stream) {
            state.source = None;
            state.closure.source_boundary = None;
        }
        let interested = std::mem::take(&mut token.interested);
        let changes = self.apply_refresh(apply, token, false);
        for id in interested {
            self.request_update(apply, id, None);
        }
        changes
    }
}
