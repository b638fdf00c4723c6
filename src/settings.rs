//! Host and context configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

/// Comparison depth for one kind of update, either numeric or named.
///
/// Depth `< -2` never updates for that kind, `-2` always does, `-1`
/// compares deeply, `0` by reference and `n > 0` structurally down to
/// `n` levels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateMode {
    Depth(i32),
    Named(String),
}

const NAMED_DEPTHS: &[(&str, i32)] = &[
    ("never", -3),
    ("always", -2),
    ("deep", -1),
    ("changed", 0),
    ("shallow", 1),
    ("double", 2),
];

impl UpdateMode {
    pub fn named(name: &str) -> Self {
        UpdateMode::Named(name.to_owned())
    }

    pub fn depth(&self) -> i32 {
        match self {
            UpdateMode::Depth(depth) => *depth,
            UpdateMode::Named(name) => NAMED_DEPTHS
                .iter()
                .find(|(known, _)| known == name)
                .map(|(_, depth)| *depth)
                .unwrap_or_else(|| {
                    warn!(mode = %name, "unknown update mode, comparing by reference");
                    0
                }),
        }
    }
}

/// Per update-kind comparison modes used by the should-update check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateModes {
    pub props: UpdateMode,
    pub state: UpdateMode,
    pub children: UpdateMode,
    pub streamed: UpdateMode,
}

impl Default for UpdateModes {
    fn default() -> Self {
        UpdateModes {
            props: UpdateMode::named("shallow"),
            state: UpdateMode::named("changed"),
            children: UpdateMode::named("changed"),
            streamed: UpdateMode::named("changed"),
        }
    }
}

/// Settings of one host.
///
/// Timeouts are in milliseconds of the runtime clock; `None` runs the
/// pass synchronously at the moment it is triggered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub update_timeout: Option<u32>,
    pub render_timeout: Option<u32>,
    /// Call did-mount/did-update/did-move right at update time instead of
    /// after the render flush.
    pub use_immediate_calls: bool,
    /// Let context changes from an outer host flow into this host when it
    /// is nested inside another.
    pub welcome_contexts_up_root: bool,
    pub should_update_with: UpdateModes,
    /// How many times a boundary re-renders within one update when it
    /// receives updates during its own render.
    pub max_re_renders: u8,
}

impl Default for HostSettings {
    fn default() -> Self {
        HostSettings {
            update_timeout: Some(0),
            render_timeout: Some(0),
            use_immediate_calls: false,
            welcome_contexts_up_root: true,
            should_update_with: UpdateModes::default(),
            max_re_renders: 8,
        }
    }
}

impl HostSettings {
    /// Everything runs synchronously as soon as it is triggered.
    pub fn immediate() -> Self {
        HostSettings {
            update_timeout: None,
            render_timeout: None,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::InvalidSettings(e.to_string()))
    }
}

/// Settings of one context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub refresh_timeout: Option<u32>,
}

impl Default for ContextSettings {
    fn default() -> Self {
        ContextSettings { refresh_timeout: Some(0) }
    }
}

impl ContextSettings {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::InvalidSettings(e.to_string()))
    }
}
