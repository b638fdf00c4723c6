//! Declarative defs and the content envelopes that carry them.
//!
//! A [`Def`] describes a desired DOM node or component. The apply engine
//! matches target defs against applied ones; this crate only reads the
//! shape of a def (kind, children, disabled flag) to route content.

use std::rc::Rc;

use crate::ids::{DefId, StreamId};
use crate::value::{are_equal, Value};

/// How a content placeholder wants to receive its content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassMode {
    /// Receive the original defs if no other grounding point already does.
    Pass,
    /// Always receive an independent copy, optionally keyed.
    Copy(Option<String>),
}

/// What a def stands for.
#[derive(Clone, Debug, PartialEq)]
pub enum DefKind {
    /// A DOM element by tag name.
    Dom(String),
    /// A text node.
    Text(String),
    /// A group of children with no node of its own.
    Fragment,
    /// A component instantiation, named by component type.
    Boundary(String),
    /// A placeholder grounding content: the enclosing boundary's own
    /// content, or a stream's output when `stream` is set.
    Pass {
        stream: Option<StreamId>,
        mode: PassMode,
    },
    /// A nested host mounted inside the tree.
    Host,
}

/// A target def.
#[derive(Clone, Debug, PartialEq)]
pub struct Def {
    pub kind: DefKind,
    pub key: Option<String>,
    pub props: Value,
    pub child_defs: Vec<Rc<Def>>,
    pub disabled: bool,
}

impl Def {
    pub fn new(kind: DefKind) -> Self {
        Def {
            kind,
            key: None,
            props: Value::Null,
            child_defs: Vec::new(),
            disabled: false,
        }
    }

    pub fn dom(tag: impl Into<String>) -> Self {
        Self::new(DefKind::Dom(tag.into()))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(DefKind::Text(text.into()))
    }

    /// Wraps received children into a fragment def, as a parent hands
    /// them to a child boundary.
    pub fn from_content(children: Vec<Rc<Def>>) -> Rc<Def> {
        Rc::new(Self::new(DefKind::Fragment).with_children(children))
    }

    /// Grounds the enclosing boundary's content by reference when possible.
    pub fn content() -> Self {
        Self::new(DefKind::Pass {
            stream: None,
            mode: PassMode::Pass,
        })
    }

    /// Grounds an independent copy of the enclosing boundary's content.
    pub fn content_copy(key: Option<String>) -> Self {
        Self::new(DefKind::Pass {
            stream: None,
            mode: PassMode::Copy(key),
        })
    }

    /// Grounds the output of a stream.
    pub fn stream_content(stream: StreamId) -> Self {
        Self::new(DefKind::Pass {
            stream: Some(stream),
            mode: PassMode::Pass,
        })
    }

    /// Grounds a copy of the output of a stream.
    pub fn stream_content_copy(stream: StreamId, key: Option<String>) -> Self {
        Self::new(DefKind::Pass {
            stream: Some(stream),
            mode: PassMode::Copy(key),
        })
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_props(mut self, props: Value) -> Self {
        self.props = props;
        self
    }

    pub fn with_children(mut self, children: Vec<Rc<Def>>) -> Self {
        self.child_defs = children;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// A fragment with no children only marks a spot; it carries nothing.
    pub fn is_placeholder(&self) -> bool {
        self.disabled || (self.kind == DefKind::Fragment && self.child_defs.is_empty())
    }

    /// Copies the whole def tree so that no node is shared with `self`.
    pub fn deep_copy(&self) -> Rc<Def> {
        Rc::new(Def {
            kind: self.kind.clone(),
            key: self.key.clone(),
            props: self.props.clone(),
            child_defs: self.child_defs.iter().map(|child| child.deep_copy()).collect(),
            disabled: self.disabled,
        })
    }
}

/// The content currently flowing through a closure.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// The fragment whose children are the content.
    pub target: Rc<Def>,
    /// The applied counterpart, once the apply engine has matched it.
    pub applied: Option<DefId>,
}

impl Envelope {
    pub fn new(target: Rc<Def>) -> Self {
        Envelope { target, applied: None }
    }

    pub fn from_children(children: Vec<Rc<Def>>) -> Self {
        Self::new(Def::from_content(children))
    }

    pub fn has_content(&self) -> bool {
        !self.target.is_placeholder()
    }

    pub fn children(&self) -> &[Rc<Def>] {
        &self.target.child_defs
    }

    /// An envelope whose defs can be updated independently of this one.
    pub fn copied(&self) -> Self {
        Envelope {
            target: self.target.deep_copy(),
            applied: None,
        }
    }
}

/// Compares two child def lists down to `depth`, with the same depth
/// semantics as [`are_equal`]: depth `0` compares by reference.
pub fn child_defs_equal(a: &[Rc<Def>], b: &[Rc<Def>], depth: i32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| def_equal(x, y, depth))
}

fn def_equal(a: &Rc<Def>, b: &Rc<Def>, depth: i32) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    depth != 0
        && a.kind == b.kind
        && a.key == b.key
        && a.disabled == b.disabled
        && are_equal(&a.props, &b.props, depth - 1)
        && child_defs_equal(&a.child_defs, &b.child_defs, depth - 1)
}
