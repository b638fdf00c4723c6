//! The lifecycle surface a boundary's component exposes to the scheduler.

use crate::changes::{BoundaryChange, PreUpdates};
use crate::ids::StreamId;

/// Lifecycle hooks of a component instance.
///
/// Rendering itself belongs to the apply engine; the scheduler only asks
/// a component whether it wants to update and tells it what happened.
/// Every hook has an inert default.
pub trait Component {
    /// Called before the should-update decision of a mounted boundary.
    /// The hook may add further pending updates; they are taken into
    /// account by the decision that follows.
    fn before_update(&mut self, _pending: &mut PreUpdates) {}

    /// `Some` overrides the comparison-based decision.
    fn should_update(&self, _pending: &PreUpdates) -> Option<bool> {
        None
    }

    fn did_mount(&mut self) {}

    fn did_update(&mut self, _change: &BoundaryChange) {}

    fn did_move(&mut self) {}

    fn will_unmount(&mut self) {}
}

impl Component for () {}

/// What a boundary is, fixed when it is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    Plain,
    /// An instance competing to be the source of a stream.
    Stream(StreamId),
    /// A component whose updates rebuild the props of its wired
    /// components.
    Wrapper,
    /// A boundary materialising passed content at one grounding point.
    ContentPass(crate::content::ContentPass),
}

impl ComponentKind {
    pub fn stream(&self) -> Option<StreamId> {
        match self {
            ComponentKind::Stream(stream) => Some(*stream),
            _ => None,
        }
    }
}
