//! Update scheduling, content passing and context propagation for
//! virtual-DOM component trees.
//!
//! The crate is the orchestration core of a component framework. A def
//! diffing engine (behind [`Apply`]) decides what a boundary renders into;
//! this runtime decides when boundaries update, in which order, how passed
//! content reaches the spots it is grounded at, and who hears about
//! context data and signals. Render instructions go out in batches through
//! a [`Renderer`].
//!
//! - [`ContentClosure`]: routes the children a parent passes in to the
//!   grounding points of the receiving boundary.
//! - Streams: named content channels whose single source is elected by
//!   importance ([`Runtime::refresh_stream`]).
//! - Contexts: named data and signal containers, reached by name through
//!   overrides, parent attachments and host-level cascading.
//! - Hosts: per-root update schedulers that coalesce updates into passes
//!   and passes into render flushes ([`HostServices`]).
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use oxide_vdom::{
//!     Apply, BoundaryId, Changes, ComponentKind, ContextSettings, Driver, HostSettings, Runtime,
//!     TestRenderer, Value,
//! };
//!
//! struct NoopApply;
//!
//! impl Apply for NoopApply {
//!     fn run_boundary_update(&mut self, _: &mut Runtime, _: BoundaryId, _: bool) -> Changes {
//!         Changes::default()
//!     }
//!     fn run_content_pass_update(&mut self, _: &mut Runtime, _: BoundaryId, _: bool) -> Changes {
//!         Changes::default()
//!     }
//!     fn destroy_boundary(&mut self, rt: &mut Runtime, b: BoundaryId, _: bool) -> Changes {
//!         rt.discard_boundary(self, b)
//!     }
//! }
//!
//! let renderer = TestRenderer::new();
//! let mut driver = Driver::new(Runtime::new(renderer.boxed()), NoopApply);
//!
//! let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! driver.with(|rt, apply| {
//!     let host = rt.create_host(HostSettings::default(), None).unwrap();
//!     let settings = rt.create_context("settings", serde_json::json!({"theme": "light"}), ContextSettings::default());
//!     rt.set_host_context(apply, host, "settings", Some(settings)).unwrap();
//!     let app = rt.create_boundary(host, None, ComponentKind::Plain, Box::new(()), Value::Null).unwrap();
//!     let on_theme = Rc::new(move |args: &[Value]| sink.borrow_mut().push(args[0].clone()));
//!     rt.listen_to_data(apply, app, &["settings.theme"], on_theme, vec![], false).unwrap();
//!     rt.request_update(apply, app, None);
//!     rt.set_in_data(apply, app, "settings.theme", "dark".into(), false, true, None).unwrap();
//! });
//! driver.flush();
//!
//! assert_eq!(*seen.borrow(), vec![Value::from("dark")]);
//! ```

mod apply;
mod changes;
mod component;
mod content;
mod context;
mod def;
mod emitter;
mod error;
mod host;
mod ids;
mod renderer;
mod runtime;
mod scheduler;
mod settings;
mod signal;
mod stream;
mod tree;
pub mod value;

// Public re-exports
pub use apply::Apply;
pub use changes::{BoundaryChange, ChangeKind, Changes, ForceUpdate, PreUpdates, RenderInfo, RenderOp, UpdateSnapshot, Updates};
pub use component::{Component, ComponentKind};
pub use content::{ClosureRef, ContentClosure, ContentPass, DefAction, Grounding, PendingRefresh};
pub use context::{
    Context, ContextApi, ContextFlags, ContextOverride, ContextRefresh, ContextServices, DataListener, DirectDataListener,
    Interest, PendingKeys, RefreshWaiter, SignalTiming,
};
pub use def::{child_defs_equal, Def, DefKind, Envelope, PassMode};
pub use emitter::{Command, Emitter};
pub use error::Error;
pub use host::{Host, HostHook, HostServices};
pub use ids::{BoundaryId, ContextId, DefId, HostId, RefreshId, StreamId, TreeNodeId};
pub use renderer::Renderer;
pub use runtime::{Driver, Runtime, TimerTarget};
pub use scheduler::Debounced;
pub use settings::{ContextSettings, HostSettings, UpdateMode, UpdateModes};
pub use signal::{Callback, ListenerFlags, SignalListener, SignalMan};
pub use stream::{StreamRegistry, StreamState};
pub use tree::{Boundary, MountState, RenderState, Tree, TreeNode, TreeNodeKind};
pub use value::Value;

// Test utilities (only available with 'testing' feature or during tests)
#[cfg(any(test, feature = "testing"))]
pub use renderer::{RenderBatch, TestRenderer};
