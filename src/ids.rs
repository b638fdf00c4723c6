//! Copyable handles for everything the runtime owns.

use core::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// The raw numeric value, stable for the lifetime of the runtime.
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// A node in the live component tree.
    BoundaryId,
    "b"
);
id_type!(
    /// A host: one root of the live tree with its own update scheduler.
    HostId,
    "h"
);
id_type!(
    /// A named pub/sub data and signal container.
    ContextId,
    "ctx"
);
id_type!(
    /// A single-active-source broadcast content channel.
    StreamId,
    "s"
);
id_type!(
    /// A node of the rendered tree, as produced by the apply engine.
    TreeNodeId,
    "n"
);
id_type!(
    /// An applied def, as produced by the apply engine.
    DefId,
    "d"
);
id_type!(
    /// One scheduled context refresh cycle awaiting host renders.
    RefreshId,
    "r"
);

impl DefId {
    /// Applied def ids are handed out by the apply engine, not the runtime.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Monotonic id source. Ids are never reused.
#[derive(Debug, Default)]
pub(crate) struct IdCounter(u64);

impl IdCounter {
    pub(crate) fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}
