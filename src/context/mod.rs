//! Contexts: named data and signal containers shared across boundaries.
//!
//! A boundary reaches a context by name through its [`ContextApi`]. Each
//! context keeps its interested boundaries in [`ContextServices`] and
//! dispatches to them in tree order, then to its direct listeners.

mod api;
mod services;

pub use api::{ContextApi, ContextOverride, ContextRefresh, DataListener};
pub use services::{ContextServices, Interest};

use std::mem;

use bitflags::bitflags;
use indexmap::IndexSet;
use tracing::{debug, instrument, trace};

use crate::apply::Apply;
use crate::error::Error;
use crate::host::HostHook;
use crate::ids::{ContextId, HostId, RefreshId};
use crate::runtime::Runtime;
use crate::scheduler::Debounced;
use crate::settings::ContextSettings;
use crate::signal::{invoke_all, Callback, ListenerFlags, PendingCall, SignalMan};
use crate::value::{get_in, paths_overlap, set_in, split_context_key, Value};

bitflags! {
    /// Which resolution tiers [`Runtime::get_context`] may use. The tier
    /// priority is fixed: overridden, then parent, then cascading.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ContextFlags: u8 {
        const CASCADING = 1;
        const PARENT = 2;
        const OVERRIDDEN = 4;
        const ALL = Self::CASCADING.bits() | Self::PARENT.bits() | Self::OVERRIDDEN.bits();
    }
}

/// When a signal sent through a context is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalTiming {
    Immediate,
    /// When the context's next refresh cycle runs.
    PreDelay,
    /// After every host updated by that refresh cycle has rendered.
    Delay,
}

/// Data keys waiting for the next refresh cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingKeys {
    All,
    Keys(IndexSet<String>),
}

impl PendingKeys {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PendingKeys::All => true,
            PendingKeys::Keys(keys) => keys.iter().any(|key| paths_overlap(path, key)),
        }
    }

    fn add(&mut self, keys: Option<&[&str]>) {
        match (self, keys) {
            (PendingKeys::All, _) => {}
            (this, None) => *this = PendingKeys::All,
            (PendingKeys::Keys(pending), Some(keys)) => pending.extend(keys.iter().map(|k| (*k).to_owned())),
        }
    }
}

/// Resolves once a context refresh cycle has run (pre-delay) or once its
/// effects have been rendered everywhere (full delay).
#[derive(Debug)]
pub struct RefreshWaiter {
    rx: flume::Receiver<()>,
}

impl RefreshWaiter {
    pub fn is_resolved(&self) -> bool {
        !self.rx.is_empty()
    }

    pub async fn resolved(self) {
        let _ = self.rx.recv_async().await;
    }

    /// Blocks the current thread until resolved. Only useful when the
    /// runtime is driven from elsewhere, or when already resolved.
    #[cfg(feature = "futures")]
    pub fn wait_blocking(self) {
        futures::executor::block_on(self.resolved())
    }
}

/// A data listener registered directly on a context. Needs are paths
/// within the context's data.
#[derive(Clone)]
pub struct DirectDataListener {
    pub callback: Callback,
    pub needs: Vec<String>,
}

pub struct Context {
    pub(crate) id: ContextId,
    pub(crate) name: String,
    pub(crate) data: Value,
    pub(crate) settings: ContextSettings,
    pub(crate) signals: SignalMan,
    pub(crate) data_listeners: Vec<DirectDataListener>,
    pub(crate) services: ContextServices,
    pub(crate) refresh_timer: Debounced,
    pub(crate) pending_keys: Option<PendingKeys>,
    pub(crate) pre_delay_signals: Vec<(String, Vec<Value>)>,
    pub(crate) delay_signals: Vec<(String, Vec<Value>)>,
    pub(crate) waiters: Vec<(SignalTiming, flume::Sender<()>)>,
}

impl Context {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub fn services(&self) -> &ContextServices {
        &self.services
    }

    pub fn refresh_timer(&self) -> &Debounced {
        &self.refresh_timer
    }

    pub fn pending_keys(&self) -> Option<&PendingKeys> {
        self.pending_keys.as_ref()
    }
}

/// A refresh cycle's delayed signals and waiters, held until every host
/// in `hosts` has rendered.
pub(crate) struct Release {
    pub(crate) context: ContextId,
    pub(crate) hosts: IndexSet<HostId>,
    pub(crate) signals: Vec<(String, Vec<Value>)>,
    pub(crate) waiters: Vec<flume::Sender<()>>,
}

fn resolve(waiters: Vec<flume::Sender<()>>) {
    for tx in waiters {
        let _ = tx.try_send(());
    }
}

impl Runtime {
    pub fn create_context(&mut self, name: &str, data: Value, settings: ContextSettings) -> ContextId {
        let id = ContextId(self.context_ids.next());
        self.contexts.insert(
            id,
            Context {
                id,
                name: name.to_owned(),
                data,
                settings,
                signals: SignalMan::default(),
                data_listeners: Vec::new(),
                services: ContextServices::default(),
                refresh_timer: Debounced::default(),
                pending_keys: None,
                pre_delay_signals: Vec::new(),
                delay_signals: Vec::new(),
                waiters: Vec::new(),
            },
        );
        id
    }

    pub fn context(&self, id: ContextId) -> Option<&Context> {
        self.contexts.get(&id)
    }

    pub fn get_in_context(&self, id: ContextId, path: &str) -> Option<&Value> {
        get_in(&self.contexts.get(&id)?.data, path)
    }

    /// Writes `value` at `path` and, with `refresh`, schedules a refresh
    /// of that path.
    #[allow(clippy::too_many_arguments)]
    pub fn set_in_context(
        &mut self,
        apply: &mut dyn Apply,
        id: ContextId,
        path: &str,
        value: Value,
        extend: bool,
        refresh: bool,
        force_timeout: Option<Option<u32>>,
    ) -> Result<(), Error> {
        let context = self.contexts.get_mut(&id).ok_or(Error::UnknownContext(id))?;
        set_in(&mut context.data, path, value, extend);
        if refresh {
            self.refresh_context(apply, id, Some(&[path]), force_timeout)?;
        }
        Ok(())
    }

    /// Marks `keys` (everything, with `None`) as changed and schedules
    /// the refresh cycle. `Some(&[])` schedules a cycle that calls no
    /// data listener, which still releases delayed signals.
    pub fn refresh_context(
        &mut self,
        apply: &mut dyn Apply,
        id: ContextId,
        keys: Option<&[&str]>,
        force_timeout: Option<Option<u32>>,
    ) -> Result<(), Error> {
        let now = self.now;
        let context = self.contexts.get_mut(&id).ok_or(Error::UnknownContext(id))?;
        context
            .pending_keys
            .get_or_insert_with(|| PendingKeys::Keys(IndexSet::new()))
            .add(keys);
        if context.refresh_timer.refresh(now, context.settings.refresh_timeout, force_timeout) {
            self.run_context_refresh(apply, id);
        }
        Ok(())
    }

    /// Runs one refresh cycle: data listeners in tree order, then direct
    /// listeners, then pre-delay signals. Delay signals and full waiters
    /// go out once every host with pending work has rendered.
    #[instrument(level = "debug", skip(self, apply))]
    pub fn run_context_refresh(&mut self, apply: &mut dyn Apply, id: ContextId) {
        let Some(context) = self.contexts.get_mut(&id) else {
            return;
        };
        context.refresh_timer.cancel();
        let keys = context.pending_keys.take();
        context.services.sort_if_dirty(&self.tree);
        let pre_delay = mem::take(&mut context.pre_delay_signals);
        let delay = mem::take(&mut context.delay_signals);
        let (pre_waiters, full_waiters): (Vec<_>, Vec<_>) = mem::take(&mut context.waiters)
            .into_iter()
            .partition(|(timing, _)| *timing == SignalTiming::PreDelay);

        if let Some(keys) = keys {
            let calls = self.data_calls(id, &keys);
            trace!(count = calls.len(), "context data calls");
            invoke_all(calls);
            self.process_commands(apply);
        }

        for (name, args) in pre_delay {
            self.dispatch_signal(apply, id, &name, &args);
        }
        resolve(pre_waiters.into_iter().map(|(_, tx)| tx).collect());

        let full_waiters: Vec<_> = full_waiters.into_iter().map(|(_, tx)| tx).collect();
        if delay.is_empty() && full_waiters.is_empty() {
            return;
        }
        let busy: IndexSet<HostId> = self
            .hosts
            .values()
            .filter(|h| h.services.has_work())
            .map(|h| h.id)
            .collect();
        if busy.is_empty() {
            for (name, args) in delay {
                self.dispatch_signal(apply, id, &name, &args);
            }
            resolve(full_waiters);
            return;
        }
        let refresh = RefreshId(self.refresh_ids.next());
        debug!(%refresh, hosts = busy.len(), "holding delayed signals until render");
        for host in &busy {
            if let Some(entry) = self.hosts.get_mut(host) {
                entry.services.on_render.push(HostHook::ReleaseRefresh(refresh));
            }
        }
        self.releases.insert(
            refresh,
            Release {
                context: id,
                hosts: busy,
                signals: delay,
                waiters: full_waiters,
            },
        );
    }

    fn data_calls(&self, id: ContextId, keys: &PendingKeys) -> Vec<PendingCall> {
        let Some(context) = self.contexts.get(&id) else {
            return Vec::new();
        };
        let mut calls = Vec::new();
        for (b, names) in context.services.data_components() {
            let Some(boundary) = self.tree.get(*b) else {
                continue;
            };
            for listener in &boundary.context_api.data_listeners {
                let wanted = listener.needs.iter().any(|need| {
                    let (name, path) = split_context_key(need);
                    names.contains(name) && keys.matches(path)
                });
                if wanted {
                    let args = self.build_data_args_by(*b, &listener.needs, &listener.fallback);
                    calls.push(PendingCall::new(listener.callback.clone(), args));
                }
            }
        }
        for listener in &context.data_listeners {
            if listener.needs.iter().any(|need| keys.matches(need)) {
                let args = listener
                    .needs
                    .iter()
                    .map(|need| get_in(&context.data, need).cloned().unwrap_or(Value::Null))
                    .collect();
                calls.push(PendingCall::new(listener.callback.clone(), args));
            }
        }
        calls
    }

    /// One host has rendered on behalf of a held refresh cycle.
    pub(crate) fn release_refresh(&mut self, apply: &mut dyn Apply, refresh: RefreshId, host: HostId) {
        let Some(release) = self.releases.get_mut(&refresh) else {
            return;
        };
        release.hosts.shift_remove(&host);
        if !release.hosts.is_empty() {
            return;
        }
        let Some(release) = self.releases.shift_remove(&refresh) else {
            return;
        };
        debug!(%refresh, "releasing delayed signals");
        for (name, args) in release.signals {
            self.dispatch_signal(apply, release.context, &name, &args);
        }
        resolve(release.waiters);
    }

    /// Sends `name` to every boundary listening through this context, in
    /// tree order, then to the direct listeners.
    pub fn dispatch_signal(&mut self, apply: &mut dyn Apply, id: ContextId, name: &str, args: &[Value]) {
        let Some(context) = self.contexts.get_mut(&id) else {
            return;
        };
        context.services.sort_if_dirty(&self.tree);
        let components: Vec<_> = context
            .services
            .signal_components()
            .iter()
            .map(|(b, names)| (*b, names.clone()))
            .collect();
        let mut calls = Vec::new();
        let mut emptied = Vec::new();
        for (b, names) in components {
            let Some(boundary) = self.tree.get_mut(b) else {
                continue;
            };
            for used in names {
                let Some(man) = boundary.context_api.signals_by.get_mut(&used) else {
                    continue;
                };
                calls.extend(man.take_calls(name, args));
                if man.is_empty() {
                    boundary.context_api.signals_by.shift_remove(&used);
                    emptied.push((b, used));
                }
            }
        }
        for (b, used) in emptied {
            self.help_update_context(b, &used);
        }
        if let Some(context) = self.contexts.get_mut(&id) {
            calls.extend(context.signals.take_calls(name, args));
        }
        if calls.is_empty() {
            return;
        }
        trace!(context = %id, signal = name, count = calls.len(), "dispatching signal");
        invoke_all(calls);
        self.process_commands(apply);
    }

    /// Sends a signal now, or holds it for the next refresh cycle.
    pub fn send_signal_as(
        &mut self,
        apply: &mut dyn Apply,
        id: ContextId,
        timing: SignalTiming,
        name: &str,
        args: Vec<Value>,
    ) -> Result<(), Error> {
        let context = self.contexts.get_mut(&id).ok_or(Error::UnknownContext(id))?;
        match timing {
            SignalTiming::Immediate => {
                self.dispatch_signal(apply, id, name, &args);
                return Ok(());
            }
            SignalTiming::PreDelay => context.pre_delay_signals.push((name.to_owned(), args)),
            SignalTiming::Delay => context.delay_signals.push((name.to_owned(), args)),
        }
        self.refresh_context(apply, id, Some(&[]), None)
    }

    /// A waiter for the context's next refresh cycle, which this call
    /// schedules.
    pub fn after_signal_refresh(
        &mut self,
        apply: &mut dyn Apply,
        id: ContextId,
        full_delay: bool,
        force_timeout: Option<Option<u32>>,
    ) -> Result<RefreshWaiter, Error> {
        let context = self.contexts.get_mut(&id).ok_or(Error::UnknownContext(id))?;
        let (tx, rx) = flume::bounded(1);
        let timing = if full_delay { SignalTiming::Delay } else { SignalTiming::PreDelay };
        context.waiters.push((timing, tx));
        self.refresh_context(apply, id, Some(&[]), force_timeout)?;
        Ok(RefreshWaiter { rx })
    }

    /// Listens to a signal directly on a context, outside any boundary.
    pub fn listen_to_context(
        &mut self,
        id: ContextId,
        name: &str,
        callback: Callback,
        extra_args: Vec<Value>,
        flags: ListenerFlags,
    ) -> Result<(), Error> {
        let context = self.contexts.get_mut(&id).ok_or(Error::UnknownContext(id))?;
        context.signals.listen_to(name, callback, extra_args, flags, None);
        Ok(())
    }

    pub fn unlisten_to_context(&mut self, id: ContextId, name: Option<&str>, callback: Option<&Callback>) -> bool {
        self.contexts
            .get_mut(&id)
            .is_some_and(|context| context.signals.unlisten_to(name, callback, None))
    }

    /// Listens to paths of a context's data directly. Direct listeners
    /// are called after every boundary listener of the same cycle.
    pub fn listen_to_context_data(
        &mut self,
        apply: &mut dyn Apply,
        id: ContextId,
        needs: &[&str],
        callback: Callback,
        call_immediately: bool,
    ) -> Result<(), Error> {
        let context = self.contexts.get_mut(&id).ok_or(Error::UnknownContext(id))?;
        let needs: Vec<String> = needs.iter().map(|n| (*n).to_owned()).collect();
        match context.data_listeners.iter_mut().find(|l| std::rc::Rc::ptr_eq(&l.callback, &callback)) {
            Some(existing) => existing.needs = needs.clone(),
            None => context.data_listeners.push(DirectDataListener {
                callback: callback.clone(),
                needs: needs.clone(),
            }),
        }
        if call_immediately {
            let args = needs
                .iter()
                .map(|need| get_in(&context.data, need).cloned().unwrap_or(Value::Null))
                .collect();
            invoke_all(vec![PendingCall::new(callback, args)]);
            self.process_commands(apply);
        }
        Ok(())
    }

    pub fn unlisten_to_context_data(&mut self, id: ContextId, callback: &Callback) -> bool {
        let Some(context) = self.contexts.get_mut(&id) else {
            return false;
        };
        let before = context.data_listeners.len();
        context.data_listeners.retain(|l| !std::rc::Rc::ptr_eq(&l.callback, callback));
        context.data_listeners.len() != before
    }
}
