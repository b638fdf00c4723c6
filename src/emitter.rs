//! Command emitter for listener callbacks.

use flume::Sender;

use crate::changes::Updates;
use crate::context::SignalTiming;
use crate::ids::{BoundaryId, ContextId};
use crate::value::Value;

/// Work a listener asks the runtime to do.
///
/// Listeners run while the runtime is mid-dispatch, so they never touch
/// it directly. Commands are processed once the current batch of
/// listener calls has finished.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Absorb {
        boundary: BoundaryId,
        updates: Updates,
    },
    SetInData {
        context: ContextId,
        path: String,
        value: Value,
        extend: bool,
    },
    /// `None` refreshes every key.
    RefreshData {
        context: ContextId,
        keys: Option<Vec<String>>,
    },
    SendSignal {
        context: ContextId,
        name: String,
        args: Vec<Value>,
        timing: SignalTiming,
    },
}

/// Command emitter that can be captured by listener callbacks.
///
/// `Emitter` wraps a channel sender, making it cheap to clone.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
/// use oxide_vdom::{Command, Runtime, TestRenderer, Updates, Value};
///
/// let runtime = Runtime::new(TestRenderer::new().boxed());
/// let emitter = runtime.emitter();
/// # let boundary = None;
/// let on_theme = Rc::new(move |args: &[Value]| {
///     if let Some(boundary) = boundary {
///         emitter.emit(Command::Absorb { boundary, updates: Updates::state(args[0].clone()) });
///     }
/// });
/// # let _ = on_theme;
/// ```
pub struct Emitter(pub(crate) Sender<Command>);

impl Clone for Emitter {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Emitter {
    pub(crate) fn new(sender: Sender<Command>) -> Self {
        Self(sender)
    }

    /// Queues a command for the runtime.
    pub fn emit(&self, command: Command) {
        self.0.send(command).ok();
    }
}
