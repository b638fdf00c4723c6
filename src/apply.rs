//! The def-diff engine seam.

use crate::changes::Changes;
use crate::ids::BoundaryId;
use crate::runtime::Runtime;
use crate::value::Value;

/// The engine that pairs a boundary's rendered defs with its live tree.
///
/// The runtime decides *when* a boundary renders; the engine decides
/// *what* changes. It receives the runtime back so it can create, ground
/// and discard boundaries while it works.
///
/// Implement this trait to plug a def-diffing engine into the runtime.
#[cfg_attr(test, mockall::automock)]
pub trait Apply {
    /// Renders `boundary` and reconciles its output. With `force_nested`
    /// every nested boundary is updated as well.
    fn run_boundary_update(&mut self, runtime: &mut Runtime, boundary: BoundaryId, force_nested: bool) -> Changes;

    /// Reconciles passed content at a true-pass content boundary.
    fn run_content_pass_update(&mut self, runtime: &mut Runtime, boundary: BoundaryId, force: bool) -> Changes;

    /// Tears down whatever the engine built for `boundary`. Implementations
    /// normally end with [`Runtime::discard_boundary`].
    fn destroy_boundary(&mut self, runtime: &mut Runtime, boundary: BoundaryId, nullify_defs: bool) -> Changes;

    /// New props for the wired `target` after its wrapper `from` updated.
    fn build_wired_props(&mut self, _runtime: &Runtime, _target: BoundaryId, _from: BoundaryId) -> Option<Value> {
        None
    }
}
