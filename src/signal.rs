//! Signal listener registries.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use bitflags::bitflags;
use indexmap::IndexMap;
use tracing::error;

use crate::error::Error;
use crate::value::Value;

/// A signal or data listener. Listeners receive their arguments only;
/// to act on the runtime they emit commands through an
/// [`Emitter`](crate::Emitter).
pub type Callback = Rc<dyn Fn(&[Value])>;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ListenerFlags: u8 {
        /// Remove the listener after its first call.
        const ONE_SHOT = 1;
    }
}

#[derive(Clone)]
pub struct SignalListener {
    pub callback: Callback,
    pub extra_args: Vec<Value>,
    pub flags: ListenerFlags,
    pub group: Option<String>,
}

/// A listener call ready to be made, detached from any registry borrow.
pub(crate) struct PendingCall {
    pub(crate) callback: Callback,
    pub(crate) args: Vec<Value>,
}

impl PendingCall {
    pub(crate) fn new(callback: Callback, args: Vec<Value>) -> Self {
        PendingCall { callback, args }
    }
}

/// Named signal listeners. Registering the same callback twice for the
/// same signal updates the existing entry in place.
#[derive(Clone, Default)]
pub struct SignalMan {
    listeners: IndexMap<String, Vec<SignalListener>>,
}

impl SignalMan {
    pub fn listen_to(
        &mut self,
        name: &str,
        callback: Callback,
        extra_args: Vec<Value>,
        flags: ListenerFlags,
        group: Option<String>,
    ) {
        let listeners = self.listeners.entry(name.to_owned()).or_default();
        let listener = SignalListener {
            callback,
            extra_args,
            flags,
            group,
        };
        match listeners.iter_mut().find(|l| Rc::ptr_eq(&l.callback, &listener.callback)) {
            Some(existing) => *existing = listener,
            None => listeners.push(listener),
        }
    }

    /// Removes matching listeners. `None` criteria match everything.
    /// Returns whether anything was removed.
    pub fn unlisten_to(&mut self, name: Option<&str>, callback: Option<&Callback>, group: Option<&str>) -> bool {
        let mut removed = false;
        for (signal, listeners) in self.listeners.iter_mut() {
            if name.is_some_and(|name| name != signal.as_str()) {
                continue;
            }
            let before = listeners.len();
            listeners.retain(|l| {
                !(callback.map_or(true, |cb| Rc::ptr_eq(cb, &l.callback))
                    && group.map_or(true, |g| l.group.as_deref() == Some(g)))
            });
            removed |= listeners.len() != before;
        }
        self.listeners.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    pub fn is_listening(&self, name: Option<&str>, callback: Option<&Callback>) -> bool {
        self.listeners.iter().any(|(signal, listeners)| {
            name.map_or(true, |name| name == signal.as_str())
                && listeners.iter().any(|l| callback.map_or(true, |cb| Rc::ptr_eq(cb, &l.callback)))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Prepares the calls for one send of `name`, dropping one-shot
    /// listeners from the registry.
    pub(crate) fn take_calls(&mut self, name: &str, args: &[Value]) -> Vec<PendingCall> {
        let Some(listeners) = self.listeners.get_mut(name) else {
            return Vec::new();
        };
        let calls = listeners
            .iter()
            .map(|l| {
                let mut all = args.to_vec();
                all.extend(l.extra_args.iter().cloned());
                PendingCall::new(l.callback.clone(), all)
            })
            .collect();
        listeners.retain(|l| !l.flags.contains(ListenerFlags::ONE_SHOT));
        if listeners.is_empty() {
            self.listeners.shift_remove(name);
        }
        calls
    }
}

/// Runs a listener, containing a panic to that one listener.
pub(crate) fn invoke(call: &PendingCall) -> Result<(), Error> {
    catch_unwind(AssertUnwindSafe(|| (call.callback)(&call.args))).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Error::ListenerPanicked(message)
    })
}

/// Runs every call in order, logging isolated failures.
pub(crate) fn invoke_all(calls: Vec<PendingCall>) {
    for call in &calls {
        if let Err(e) = invoke(call) {
            error!(error = %e, "listener failed");
        }
    }
}
