//! The per-boundary side of the context layer: data listeners, signal
//! listeners and context resolution.

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::apply::Apply;
use crate::context::ContextFlags;
use crate::error::Error;
use crate::ids::{BoundaryId, ContextId, HostId};
use crate::runtime::Runtime;
use crate::signal::{invoke_all, Callback, ListenerFlags, PendingCall, SignalMan};
use crate::value::{get_in, split_context_key, Value};

/// A boundary's data listener.
#[derive(Clone)]
pub struct DataListener {
    pub callback: Callback,
    /// Dotted `"ctxName.path"` keys; one argument per need.
    pub needs: Vec<String>,
    /// Arguments used where a need cannot be resolved.
    pub fallback: Vec<Value>,
}

/// A local override of a context name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextOverride {
    Set(ContextId),
    /// Resolve the name to no context at all.
    Null,
    /// Remove the override.
    Clear,
}

/// What to do when a context change affects data listeners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContextRefresh {
    No,
    #[default]
    Scheduled,
    Immediate,
}

#[derive(Clone, Default)]
pub struct ContextApi {
    pub(crate) data_listeners: Vec<DataListener>,
    pub(crate) signals_by: IndexMap<String, SignalMan>,
    pub(crate) overridden: IndexMap<String, Option<ContextId>>,
    pub(crate) parent_contexts: IndexMap<String, ContextId>,
    /// The context each name is registered with, for names in use.
    pub(crate) registered: IndexMap<String, ContextId>,
}

impl ContextApi {
    pub fn data_listeners(&self) -> &[DataListener] {
        &self.data_listeners
    }

    pub fn overridden(&self) -> &IndexMap<String, Option<ContextId>> {
        &self.overridden
    }

    pub fn registered(&self) -> &IndexMap<String, ContextId> {
        &self.registered
    }

    pub(crate) fn needs_data(&self, name: &str) -> bool {
        self.data_listeners
            .iter()
            .any(|l| l.needs.iter().any(|need| split_context_key(need).0 == name))
    }

    fn needs_signals(&self, name: &str) -> bool {
        self.signals_by.get(name).is_some_and(|man| !man.is_empty())
    }

    fn data_names(&self) -> IndexSet<String> {
        self.data_listeners
            .iter()
            .flat_map(|l| l.needs.iter().map(|need| split_context_key(need).0.to_owned()))
            .collect()
    }
}

fn parse_key(key: &str) -> Result<(&str, &str), Error> {
    let (name, path) = split_context_key(key);
    if name.is_empty() {
        return Err(Error::MalformedKey(key.to_owned()));
    }
    Ok((name, path))
}

impl Runtime {
    /// Registers `callback` to be called with the values of `needs`
    /// whenever any of them is refreshed.
    ///
    /// Registering the same callback again replaces its needs.
    pub fn listen_to_data(
        &mut self,
        apply: &mut dyn Apply,
        b: BoundaryId,
        needs: &[&str],
        callback: Callback,
        fallback: Vec<Value>,
        call_immediately: bool,
    ) -> Result<(), Error> {
        for need in needs {
            parse_key(need)?;
        }
        let boundary = self.tree.get_mut(b).ok_or(Error::UnknownBoundary(b))?;
        let listener = DataListener {
            callback: callback.clone(),
            needs: needs.iter().map(|n| (*n).to_owned()).collect(),
            fallback,
        };
        let listeners = &mut boundary.context_api.data_listeners;
        match listeners.iter_mut().find(|l| Rc::ptr_eq(&l.callback, &callback)) {
            Some(existing) => *existing = listener,
            None => listeners.push(listener),
        }
        let names: IndexSet<&str> = needs.iter().map(|n| split_context_key(n).0).collect();
        for name in names {
            self.help_update_context(b, name);
        }
        if call_immediately {
            let Some(listener) = self
                .tree
                .get(b)
                .and_then(|x| x.context_api.data_listeners.iter().find(|l| Rc::ptr_eq(&l.callback, &callback)))
                .cloned()
            else {
                return Ok(());
            };
            let args = self.build_data_args_by(b, &listener.needs, &listener.fallback);
            invoke_all(vec![PendingCall::new(listener.callback, args)]);
            self.process_commands(apply);
        }
        Ok(())
    }

    /// Returns whether a listener was removed.
    pub fn unlisten_to_data(&mut self, b: BoundaryId, callback: &Callback) -> bool {
        let Some(boundary) = self.tree.get_mut(b) else {
            return false;
        };
        let listeners = &mut boundary.context_api.data_listeners;
        let Some(index) = listeners.iter().position(|l| Rc::ptr_eq(&l.callback, callback)) else {
            return false;
        };
        let removed = listeners.remove(index);
        let names: IndexSet<String> = removed.needs.iter().map(|n| split_context_key(n).0.to_owned()).collect();
        for name in names {
            self.help_update_context(b, &name);
        }
        true
    }

    /// Listens to `"ctxName.signalName"`.
    pub fn listen_to(
        &mut self,
        b: BoundaryId,
        key: &str,
        callback: Callback,
        extra_args: Vec<Value>,
        flags: ListenerFlags,
        group: Option<String>,
    ) -> Result<(), Error> {
        let (name, signal) = parse_key(key)?;
        if signal.is_empty() {
            return Err(Error::MalformedKey(key.to_owned()));
        }
        let boundary = self.tree.get_mut(b).ok_or(Error::UnknownBoundary(b))?;
        boundary
            .context_api
            .signals_by
            .entry(name.to_owned())
            .or_default()
            .listen_to(signal, callback, extra_args, flags, group);
        self.help_update_context(b, name);
        Ok(())
    }

    /// Removes signal listeners. `key` may name one signal
    /// (`"ctx.signal"`), every signal of a context (`"ctx"`) or, as
    /// `None`, everything.
    pub fn unlisten_to(&mut self, b: BoundaryId, key: Option<&str>, callback: Option<&Callback>, group: Option<&str>) -> bool {
        let Some(boundary) = self.tree.get_mut(b) else {
            return false;
        };
        let (only_name, signal) = match key.map(split_context_key) {
            Some((name, signal)) => (Some(name), (!signal.is_empty()).then_some(signal)),
            None => (None, None),
        };
        let mut removed = false;
        let mut touched = Vec::new();
        for (name, man) in boundary.context_api.signals_by.iter_mut() {
            if only_name.is_some_and(|only| only != name.as_str()) {
                continue;
            }
            if man.unlisten_to(signal, callback, group) {
                removed = true;
                touched.push(name.clone());
            }
        }
        boundary.context_api.signals_by.retain(|_, man| !man.is_empty());
        for name in touched {
            self.help_update_context(b, &name);
        }
        removed
    }

    pub fn is_listening(&self, b: BoundaryId, key: Option<&str>, callback: Option<&Callback>) -> bool {
        let Some(boundary) = self.tree.get(b) else {
            return false;
        };
        let (only_name, signal) = match key.map(split_context_key) {
            Some((name, signal)) => (Some(name), (!signal.is_empty()).then_some(signal)),
            None => (None, None),
        };
        boundary
            .context_api
            .signals_by
            .iter()
            .filter(|(name, _)| only_name.map_or(true, |only| only == name.as_str()))
            .any(|(_, man)| man.is_listening(signal, callback))
    }

    /// Reads `"ctxName.path"` through the boundary's effective context.
    pub fn get_in_data(&self, b: BoundaryId, key: &str) -> Option<Value> {
        let (name, path) = split_context_key(key);
        let context = self.contexts.get(&self.get_context(b, name, ContextFlags::ALL)?)?;
        get_in(&context.data, path).cloned()
    }

    /// Writes `"ctxName.path"` through the boundary's effective context.
    /// Returns whether the context was found.
    #[allow(clippy::too_many_arguments)]
    pub fn set_in_data(
        &mut self,
        apply: &mut dyn Apply,
        b: BoundaryId,
        key: &str,
        value: Value,
        extend: bool,
        refresh: bool,
        force_timeout: Option<Option<u32>>,
    ) -> Result<bool, Error> {
        let (name, path) = parse_key(key)?;
        let Some(context) = self.get_context(b, name, ContextFlags::ALL) else {
            return Ok(false);
        };
        self.set_in_context(apply, context, path, value, extend, refresh, force_timeout)?;
        Ok(true)
    }

    /// Refreshes dotted keys, grouped per context.
    pub fn refresh_data(
        &mut self,
        apply: &mut dyn Apply,
        b: BoundaryId,
        keys: &[&str],
        force_timeout: Option<Option<u32>>,
    ) -> Result<(), Error> {
        let mut by_name: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for key in keys {
            let (name, path) = parse_key(key)?;
            by_name.entry(name).or_default().push(path);
        }
        for (name, paths) in by_name {
            self.refresh_data_by(apply, b, name, Some(&paths), force_timeout)?;
        }
        Ok(())
    }

    /// Refreshes paths of one context name; `None` refreshes all of it.
    /// Returns whether the context was found.
    pub fn refresh_data_by(
        &mut self,
        apply: &mut dyn Apply,
        b: BoundaryId,
        name: &str,
        paths: Option<&[&str]>,
        force_timeout: Option<Option<u32>>,
    ) -> Result<bool, Error> {
        let Some(context) = self.get_context(b, name, ContextFlags::ALL) else {
            return Ok(false);
        };
        self.refresh_context(apply, context, paths, force_timeout)?;
        Ok(true)
    }

    /// Resolves `name` for `b`. Overridden wins over parent-attached,
    /// which wins over cascading, whatever subset of `flags` is given.
    pub fn get_context(&self, b: BoundaryId, name: &str, flags: ContextFlags) -> Option<ContextId> {
        let api = &self.tree.get(b)?.context_api;
        if flags.contains(ContextFlags::OVERRIDDEN) {
            if let Some(entry) = api.overridden.get(name) {
                return *entry;
            }
        }
        if flags.contains(ContextFlags::PARENT) {
            if let Some(id) = api.parent_contexts.get(name) {
                return Some(*id);
            }
        }
        if flags.contains(ContextFlags::CASCADING) {
            return self.cascading_context(b, name);
        }
        None
    }

    /// Resolves every known name, or just `names`.
    pub fn get_contexts(&self, b: BoundaryId, names: Option<&[&str]>, flags: ContextFlags) -> IndexMap<String, Option<ContextId>> {
        let names: IndexSet<String> = match names {
            Some(names) => names.iter().map(|n| (*n).to_owned()).collect(),
            None => self.known_context_names(b),
        };
        names
            .into_iter()
            .map(|name| {
                let id = self.get_context(b, &name, flags);
                (name, id)
            })
            .collect()
    }

    fn known_context_names(&self, b: BoundaryId) -> IndexSet<String> {
        let mut names = IndexSet::new();
        let mut current = Some(b);
        while let Some(id) = current {
            let Some(boundary) = self.tree.get(id) else {
                break;
            };
            names.extend(boundary.context_api.overridden.keys().cloned());
            if id == b {
                names.extend(boundary.context_api.parent_contexts.keys().cloned());
            }
            current = match boundary.parent {
                Some(parent) => Some(parent),
                None => {
                    let host = self.hosts.get(&boundary.host);
                    names.extend(host.into_iter().flat_map(|h| h.contexts.keys().cloned()));
                    host.filter(|h| h.settings.welcome_contexts_up_root).and_then(|h| h.parent)
                }
            };
        }
        names
    }

    /// Walks up from `b`: the nearest ancestor override wins, then the
    /// host's contexts, then the outer tree of a nested host that
    /// welcomes it.
    fn cascading_context(&self, b: BoundaryId, name: &str) -> Option<ContextId> {
        let mut current = b;
        loop {
            let boundary = self.tree.get(current)?;
            let next = match boundary.parent {
                Some(parent) => parent,
                None => {
                    let host = self.hosts.get(&boundary.host)?;
                    if let Some(id) = host.contexts.get(name) {
                        return Some(*id);
                    }
                    host.parent.filter(|_| host.settings.welcome_contexts_up_root)?
                }
            };
            if let Some(entry) = self.tree.get(next)?.context_api.overridden.get(name) {
                return *entry;
            }
            current = next;
        }
    }

    /// Sets, nulls or clears a local override of `name` on `b`.
    ///
    /// Descendants of `b` resolve through the override too; they are
    /// reached on `b`'s next update. Returns whether `b`'s own effective
    /// context changed.
    pub fn override_context(
        &mut self,
        apply: &mut dyn Apply,
        b: BoundaryId,
        name: &str,
        value: ContextOverride,
        refresh: ContextRefresh,
    ) -> bool {
        let old = self.get_context(b, name, ContextFlags::ALL);
        let Some(boundary) = self.tree.get_mut(b) else {
            return false;
        };
        let overridden = &mut boundary.context_api.overridden;
        let before = overridden.get(name).copied();
        match value {
            ContextOverride::Set(id) => {
                overridden.insert(name.to_owned(), Some(id));
            }
            ContextOverride::Null => {
                overridden.insert(name.to_owned(), None);
            }
            ContextOverride::Clear => {
                overridden.shift_remove(name);
            }
        }
        let cascades = overridden.get(name).copied() != before;
        if cascades {
            boundary.pre_updates.add_cascade([name.to_owned()]);
        }
        let changed = old != self.get_context(b, name, ContextFlags::ALL);
        self.help_update_context(b, name);
        self.after_context_change(apply, b, name, changed, cascades, refresh);
        changed
    }

    /// Attaches `context` (or detaches, with `None`) as `b`'s
    /// parent-given context for `name`. Does not cascade.
    pub fn attach_context(
        &mut self,
        apply: &mut dyn Apply,
        b: BoundaryId,
        name: &str,
        context: Option<ContextId>,
        refresh: ContextRefresh,
    ) -> bool {
        let old = self.get_context(b, name, ContextFlags::ALL);
        let Some(boundary) = self.tree.get_mut(b) else {
            return false;
        };
        match context {
            Some(id) => boundary.context_api.parent_contexts.insert(name.to_owned(), id),
            None => boundary.context_api.parent_contexts.shift_remove(name),
        };
        let changed = old != self.get_context(b, name, ContextFlags::ALL);
        self.help_update_context(b, name);
        self.after_context_change(apply, b, name, changed, false, refresh);
        changed
    }

    fn after_context_change(
        &mut self,
        apply: &mut dyn Apply,
        b: BoundaryId,
        name: &str,
        changed: bool,
        cascades: bool,
        refresh: ContextRefresh,
    ) {
        if refresh == ContextRefresh::No {
            return;
        }
        let immediate = refresh == ContextRefresh::Immediate;
        if changed && self.needs_data(b, name) {
            self.ask_data_build_by(apply, b, Some(&[name]), immediate);
        }
        if cascades {
            self.request_update(apply, b, immediate.then_some(None));
        }
    }

    /// Sets (or with `None` removes) a context at host level, reaching
    /// every boundary of the host that does not override the name.
    pub fn set_host_context(
        &mut self,
        apply: &mut dyn Apply,
        host: HostId,
        name: &str,
        context: Option<ContextId>,
    ) -> Result<(), Error> {
        if let Some(id) = context.filter(|id| !self.contexts.contains_key(id)) {
            return Err(Error::UnknownContext(id));
        }
        let entry = self.hosts.get_mut(&host).ok_or(Error::UnknownHost(host))?;
        match context {
            Some(id) => entry.contexts.insert(name.to_owned(), id),
            None => entry.contexts.shift_remove(name),
        };
        let Some(root) = entry.root else {
            return Ok(());
        };
        if self.help_update_context(root, name) && self.needs_data(root, name) {
            if let Some(boundary) = self.tree.get_mut(root) {
                boundary.pre_updates.add_contextual([name.to_owned()]);
            }
        }
        if let Some(boundary) = self.tree.get_mut(root) {
            boundary.pre_updates.add_cascade([name.to_owned()]);
        }
        self.request_update(apply, root, None);
        Ok(())
    }

    /// Rebuilds the data listeners needing `names` (all when `None`):
    /// right now with `immediate`, otherwise on `b`'s next update.
    pub fn ask_data_build_by(&mut self, apply: &mut dyn Apply, b: BoundaryId, names: Option<&[&str]>, immediate: bool) {
        let names: IndexSet<String> = match names {
            Some(names) => names.iter().map(|n| (*n).to_owned()).collect(),
            None => match self.tree.get(b) {
                Some(boundary) => boundary.context_api.data_names(),
                None => return,
            },
        };
        if immediate {
            self.call_data_listeners(apply, b, Some(&names));
            return;
        }
        if let Some(boundary) = self.tree.get_mut(b) {
            boundary.pre_updates.add_contextual(names);
            self.request_update(apply, b, None);
        }
    }

    /// Sends `"ctxName.signalName"` through `b`'s effective context.
    /// Returns whether the context was found.
    pub fn send_signal(&mut self, apply: &mut dyn Apply, b: BoundaryId, key: &str, args: &[Value]) -> Result<bool, Error> {
        let (name, signal) = parse_key(key)?;
        let Some(context) = self.get_context(b, name, ContextFlags::ALL) else {
            return Ok(false);
        };
        self.dispatch_signal(apply, context, signal, args);
        Ok(true)
    }

    /// Brings `b`'s registration for `name` in line with what it
    /// resolves to now. Idempotent. Returns whether the registered
    /// context changed.
    pub fn help_update_context(&mut self, b: BoundaryId, name: &str) -> bool {
        let resolved = self.get_context(b, name, ContextFlags::ALL);
        let Some(boundary) = self.tree.get(b) else {
            return false;
        };
        let api = &boundary.context_api;
        let (data, signals) = (api.needs_data(name), api.needs_signals(name));
        let target = resolved.filter(|id| (data || signals) && self.contexts.contains_key(id));
        let old = api.registered.get(name).copied();
        if let Some(old) = old.filter(|old| Some(*old) != target) {
            if let Some(context) = self.contexts.get_mut(&old) {
                context.services.set_interest(b, name, false, false);
            }
        }
        if let Some(id) = target {
            if let Some(context) = self.contexts.get_mut(&id) {
                context.services.set_interest(b, name, data, signals);
            }
        }
        if let Some(boundary) = self.tree.get_mut(b) {
            match target {
                Some(id) => boundary.context_api.registered.insert(name.to_owned(), id),
                None => boundary.context_api.registered.shift_remove(name),
            };
        }
        old != target
    }

    /// One argument per need, falling back element-wise.
    pub fn build_data_args_by(&self, b: BoundaryId, needs: &[String], fallback: &[Value]) -> Vec<Value> {
        needs
            .iter()
            .enumerate()
            .map(|(i, need)| {
                let (name, path) = split_context_key(need);
                self.get_context(b, name, ContextFlags::ALL)
                    .and_then(|id| self.contexts.get(&id))
                    .and_then(|context| get_in(&context.data, path))
                    .or_else(|| fallback.get(i))
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect()
    }

    pub(crate) fn needs_data(&self, b: BoundaryId, name: &str) -> bool {
        self.tree.get(b).is_some_and(|x| x.context_api.needs_data(name))
    }

    /// Calls `b`'s data listeners needing any of `names` (all when
    /// `None`) with fresh values.
    pub(crate) fn call_data_listeners(&mut self, apply: &mut dyn Apply, b: BoundaryId, names: Option<&IndexSet<String>>) {
        let Some(boundary) = self.tree.get(b) else {
            return;
        };
        let calls: Vec<PendingCall> = boundary
            .context_api
            .data_listeners
            .iter()
            .filter(|l| names.map_or(true, |names| l.needs.iter().any(|n| names.contains(split_context_key(n).0))))
            .map(|l| PendingCall::new(l.callback.clone(), self.build_data_args_by(b, &l.needs, &l.fallback)))
            .collect();
        if calls.is_empty() {
            return;
        }
        invoke_all(calls);
        self.process_commands(apply);
    }
}
