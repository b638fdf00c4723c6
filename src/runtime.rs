//! The runtime that owns every boundary, host, context and stream, and
//! the driver that moves its logical clock.

use flume::Receiver;
use indexmap::IndexMap;
use tracing::{trace, warn};

use crate::apply::Apply;
use crate::context::{Context, Release};
use crate::emitter::{Command, Emitter};
use crate::host::Host;
use crate::ids::{ContextId, HostId, IdCounter, RefreshId};
use crate::renderer::Renderer;
use crate::stream::StreamRegistry;
use crate::tree::Tree;

/// Flushing stops after this many timer firings, as timers that keep
/// rescheduling each other would otherwise never settle.
const MAX_FLUSH_FIRINGS: usize = 10_000;

/// A scheduled task of the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerTarget {
    ContextRefresh(ContextId),
    HostUpdate(HostId),
    HostRender(HostId),
}

/// The component runtime.
///
/// Everything here is single-threaded: passes run on the caller's stack,
/// either synchronously when a timeout is `None` or when the logical
/// clock reaches their due time through a [`Driver`].
///
/// Listener callbacks reach back into the runtime through the
/// [`Emitter`] returned by [`emitter`](Self::emitter).
pub struct Runtime {
    pub(crate) tree: Tree,
    pub(crate) hosts: IndexMap<HostId, Host>,
    pub(crate) contexts: IndexMap<ContextId, Context>,
    pub(crate) streams: StreamRegistry,
    pub(crate) now: u64,
    pub(crate) renderer: Box<dyn Renderer>,
    emitter: Emitter,
    commands: Receiver<Command>,
    pub(crate) host_ids: IdCounter,
    pub(crate) context_ids: IdCounter,
    pub(crate) refresh_ids: IdCounter,
    pub(crate) releases: IndexMap<RefreshId, Release>,
}

impl Runtime {
    pub fn new(renderer: Box<dyn Renderer>) -> Self {
        let (sender, commands) = flume::unbounded();
        Runtime {
            tree: Tree::default(),
            hosts: IndexMap::new(),
            contexts: IndexMap::new(),
            streams: StreamRegistry::default(),
            now: 0,
            renderer,
            emitter: Emitter::new(sender),
            commands,
            host_ids: IdCounter::default(),
            context_ids: IdCounter::default(),
            refresh_ids: IdCounter::default(),
            releases: IndexMap::new(),
        }
    }

    /// The logical clock, in milliseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// For the apply engine, which builds the rendered part of the tree.
    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Runs every queued command, including those queued meanwhile.
    pub fn process_commands(&mut self, apply: &mut dyn Apply) {
        while let Ok(command) = self.commands.try_recv() {
            trace!(?command, "processing command");
            let result = match command {
                Command::Absorb { boundary, updates } => {
                    self.absorb_updates(apply, boundary, updates, true, None);
                    Ok(())
                }
                Command::SetInData {
                    context,
                    path,
                    value,
                    extend,
                } => self.set_in_context(apply, context, &path, value, extend, true, None),
                Command::RefreshData { context, keys } => {
                    let keys: Option<Vec<&str>> = keys.as_ref().map(|keys| keys.iter().map(String::as_str).collect());
                    self.refresh_context(apply, context, keys.as_deref(), None)
                }
                Command::SendSignal {
                    context,
                    name,
                    args,
                    timing,
                } => self.send_signal_as(apply, context, timing, &name, args),
            };
            if let Err(e) = result {
                warn!(error = %e, "command dropped");
            }
        }
    }

    /// The earliest scheduled task. Ties go to context refreshes, then
    /// host updates, then host renders, each in creation order.
    pub fn next_due(&self) -> Option<(u64, TimerTarget)> {
        let contexts = self
            .contexts
            .values()
            .filter_map(|c| Some((c.refresh_timer.due()?, TimerTarget::ContextRefresh(c.id))));
        let updates = self
            .hosts
            .values()
            .filter_map(|h| Some((h.services.update_timer.due()?, TimerTarget::HostUpdate(h.id))));
        let renders = self
            .hosts
            .values()
            .filter_map(|h| Some((h.services.render_timer.due()?, TimerTarget::HostRender(h.id))));
        contexts.chain(updates).chain(renders).fold(None, |best, (due, target)| match best {
            Some((top, _)) if due >= top => best,
            _ => Some((due, target)),
        })
    }

    /// Runs `target` if it is due now. Returns whether it ran.
    pub fn fire_timer(&mut self, apply: &mut dyn Apply, target: TimerTarget) -> bool {
        let now = self.now;
        let due = match target {
            TimerTarget::ContextRefresh(id) => self.contexts.get_mut(&id).is_some_and(|c| c.refresh_timer.fire(now)),
            TimerTarget::HostUpdate(id) => self.hosts.get_mut(&id).is_some_and(|h| h.services.update_timer.fire(now)),
            TimerTarget::HostRender(id) => self.hosts.get_mut(&id).is_some_and(|h| h.services.render_timer.fire(now)),
        };
        if !due {
            return false;
        }
        trace!(?target, now, "timer fired");
        match target {
            TimerTarget::ContextRefresh(id) => self.run_context_refresh(apply, id),
            TimerTarget::HostUpdate(id) => self.run_updates(apply, id),
            TimerTarget::HostRender(id) => self.run_render(apply, id),
        }
        true
    }
}

/// Drives a [`Runtime`] together with its [`Apply`] engine.
///
/// The driver is the embedding application's loop handle: it moves the
/// logical clock, fires due timers in order and processes the commands
/// listeners emit in between.
pub struct Driver<A: Apply> {
    runtime: Runtime,
    apply: A,
}

impl<A: Apply> Driver<A> {
    pub fn new(runtime: Runtime, apply: A) -> Self {
        Driver { runtime, apply }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn apply(&self) -> &A {
        &self.apply
    }

    pub fn apply_mut(&mut self) -> &mut A {
        &mut self.apply
    }

    pub fn into_parts(self) -> (Runtime, A) {
        (self.runtime, self.apply)
    }

    /// Runs `f` with both halves borrowed, for calls that need the
    /// apply engine.
    pub fn with<R>(&mut self, f: impl FnOnce(&mut Runtime, &mut A) -> R) -> R {
        f(&mut self.runtime, &mut self.apply)
    }

    pub fn process_commands(&mut self) {
        self.runtime.process_commands(&mut self.apply);
    }

    /// Moves the clock forward by `ms`, firing every task that falls due
    /// on the way.
    pub fn advance(&mut self, ms: u64) {
        let until = self.runtime.now + ms;
        loop {
            self.process_commands();
            match self.runtime.next_due() {
                Some((due, target)) if due <= until => {
                    self.runtime.now = self.runtime.now.max(due);
                    self.runtime.fire_timer(&mut self.apply, target);
                }
                _ => break,
            }
        }
        self.runtime.now = until;
    }

    /// Advances until nothing is scheduled.
    pub fn flush(&mut self) {
        for _ in 0..MAX_FLUSH_FIRINGS {
            self.process_commands();
            let Some((due, target)) = self.runtime.next_due() else {
                return;
            };
            self.runtime.now = self.runtime.now.max(due);
            self.runtime.fire_timer(&mut self.apply, target);
        }
        warn!(firings = MAX_FLUSH_FIRINGS, "flush gave up with timers still scheduled");
    }
}
