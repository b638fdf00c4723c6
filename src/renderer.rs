//! Renderer abstraction for applying render instructions.

#[cfg(any(test, feature = "testing"))]
use portable_atomic_util::Arc;
#[cfg(any(test, feature = "testing"))]
use spin::Mutex;

use crate::changes::RenderInfo;
use crate::ids::HostId;

/// Applies batched render instructions to a real output.
///
/// Implement this trait to connect the runtime to a DOM, a terminal or
/// any other backend. Each call carries everything one host's render
/// flush produced, in order.
///
/// # Example
///
/// ```rust
/// use oxide_vdom::{HostId, RenderInfo, Renderer};
///
/// struct LogRenderer;
///
/// impl Renderer for LogRenderer {
///     fn apply_to_dom(&mut self, host: HostId, infos: Vec<RenderInfo>) {
///         println!("{host}: {} instructions", infos.len());
///     }
/// }
/// ```
pub trait Renderer {
    fn apply_to_dom(&mut self, host: HostId, infos: Vec<RenderInfo>);
}

/// One render flush as seen by a [`TestRenderer`].
#[cfg(any(test, feature = "testing"))]
#[derive(Clone, Debug, PartialEq)]
pub struct RenderBatch {
    pub host: HostId,
    pub infos: Vec<RenderInfo>,
}

#[cfg(any(test, feature = "testing"))]
/// Test renderer that captures every batch for assertions.
///
/// Only available with the `testing` feature.
///
/// # Example
///
/// ```rust
/// use oxide_vdom::{Runtime, TestRenderer};
///
/// let renderer = TestRenderer::new();
/// let runtime = Runtime::new(renderer.boxed());
///
/// assert_eq!(renderer.count(), 0);
/// renderer.with_batches(|batches| assert!(batches.is_empty()));
/// # let _ = runtime;
/// ```
pub struct TestRenderer {
    batches: Arc<Mutex<Vec<RenderBatch>>>,
}

#[cfg(any(test, feature = "testing"))]
struct InternalTestRenderer {
    batches: Arc<Mutex<Vec<RenderBatch>>>,
}

#[cfg(any(test, feature = "testing"))]
impl Renderer for InternalTestRenderer {
    fn apply_to_dom(&mut self, host: HostId, infos: Vec<RenderInfo>) {
        self.batches.lock().push(RenderBatch { host, infos });
    }
}

#[cfg(any(test, feature = "testing"))]
impl Clone for TestRenderer {
    fn clone(&self) -> Self {
        Self {
            batches: self.batches.clone(),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl Renderer for TestRenderer {
    fn apply_to_dom(&mut self, host: HostId, infos: Vec<RenderInfo>) {
        self.batches.lock().push(RenderBatch { host, infos });
    }
}

#[cfg(any(test, feature = "testing"))]
impl Default for TestRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "testing"))]
impl TestRenderer {
    pub fn new() -> Self {
        Self {
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A boxed renderer sharing this one's capture storage.
    pub fn boxed(&self) -> Box<dyn Renderer> {
        Box::new(InternalTestRenderer {
            batches: self.batches.clone(),
        })
    }

    /// Number of batches applied so far.
    pub fn count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Access the captured batches with a closure.
    pub fn with_batches<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Vec<RenderBatch>) -> R,
    {
        let batches = self.batches.lock();
        f(&batches)
    }
}
