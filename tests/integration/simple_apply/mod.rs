use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use oxide_vdom::{
    Apply, BoundaryChange, BoundaryId, Changes, ClosureRef, Component, ComponentKind, DefAction, DefId, Envelope,
    ForceUpdate, PassMode, PreUpdates, RenderInfo, RenderOp, Runtime, StreamId, TreeNodeId, TreeNodeKind, Value,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ApplyCall {
    Render(BoundaryId),
    ContentPass(BoundaryId),
    Destroy(BoundaryId),
}

/// A child the planned component renders on mount.
#[derive(Clone)]
pub(crate) struct ChildSpec {
    pub(crate) kind: ComponentKind,
    pub(crate) props: Value,
    pub(crate) content: Option<Vec<Rc<oxide_vdom::Def>>>,
}

/// What a component named by its `"name"` prop renders on mount.
#[derive(Clone, Default)]
pub(crate) struct Plan {
    pub(crate) children: Vec<ChildSpec>,
    /// Content placeholders: a stream's output when a stream is given,
    /// the component's own content otherwise.
    pub(crate) groundings: Vec<(DefId, Option<StreamId>, PassMode)>,
}

/// A stand-in def-diff engine. Every boundary renders one DOM node;
/// planned children and content placeholders are created on mount.
#[derive(Default)]
pub(crate) struct SimpleApply {
    plans: HashMap<String, Plan>,
    pub(crate) calls: Vec<ApplyCall>,
    dom: HashMap<BoundaryId, TreeNodeId>,
    children: HashMap<BoundaryId, Vec<BoundaryId>>,
}

impl SimpleApply {
    pub(crate) fn new(plans: Vec<(&str, Plan)>) -> Self {
        SimpleApply {
            plans: plans.into_iter().map(|(name, plan)| (name.to_owned(), plan)).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn children_of(&self, b: BoundaryId) -> Vec<BoundaryId> {
        self.children.get(&b).cloned().unwrap_or_default()
    }

    pub(crate) fn dom_of(&self, b: BoundaryId) -> Option<TreeNodeId> {
        self.dom.get(&b).copied()
    }

    pub(crate) fn renders_of(&self, b: BoundaryId) -> usize {
        self.calls.iter().filter(|c| **c == ApplyCall::Render(b)).count()
    }

    fn render_dom(&mut self, rt: &mut Runtime, b: BoundaryId) -> Option<TreeNodeId> {
        let node = rt.ensure_tree_node(b)?;
        let dom = rt.tree_mut().create_node(Some(node), TreeNodeKind::Dom, None);
        self.dom.insert(b, dom);
        Some(dom)
    }
}

fn name_of(rt: &Runtime, b: BoundaryId) -> String {
    rt.tree()
        .get(b)
        .and_then(|x| x.props().get("name").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_default()
}

impl Apply for SimpleApply {
    fn run_boundary_update(&mut self, rt: &mut Runtime, b: BoundaryId, force_nested: bool) -> Changes {
        self.calls.push(ApplyCall::Render(b));
        let mut changes = Changes::default();
        if let Some(dom) = self.dom_of(b) {
            changes.render_infos.push(RenderInfo::new(dom, RenderOp::Update).for_boundary(b));
            if force_nested {
                for child in self.children_of(b) {
                    changes.merge_opt(rt.update_boundary(self, child, ForceUpdate::All, None, false));
                }
            }
            return changes;
        }
        let Some(dom) = self.render_dom(rt, b) else {
            return changes;
        };
        changes.render_infos.push(RenderInfo::new(dom, RenderOp::Create).for_boundary(b));
        let Some(host) = rt.tree().get(b).map(|x| x.host()) else {
            return changes;
        };
        let plan = self.plans.get(&name_of(rt, b)).cloned().unwrap_or_default();
        for (def, stream, mode) in plan.groundings {
            let cref = match stream {
                Some(stream) => {
                    rt.link_content(ClosureRef::Stream(stream), b);
                    ClosureRef::Stream(stream)
                }
                None => ClosureRef::Boundary(b),
            };
            changes.merge(rt.content_grounded(self, cref, def, DefAction::Mounted, b, dom, mode));
        }
        for spec in plan.children {
            let Ok(child) = rt.create_boundary(host, Some(b), spec.kind, Box::new(()), spec.props) else {
                continue;
            };
            self.children.entry(b).or_default().push(child);
            match spec.content {
                Some(content) => rt.pass_content(self, child, Some(Envelope::from_children(content))),
                None => rt.request_update(self, child, None),
            }
        }
        changes
    }

    fn run_content_pass_update(&mut self, rt: &mut Runtime, b: BoundaryId, _force: bool) -> Changes {
        self.calls.push(ApplyCall::ContentPass(b));
        let op = if self.dom_of(b).is_some() {
            RenderOp::Update
        } else {
            RenderOp::Create
        };
        let dom = match self.dom_of(b) {
            Some(dom) => Some(dom),
            None => self.render_dom(rt, b),
        };
        let mut changes = Changes::default();
        if let Some(dom) = dom {
            changes.render_infos.push(RenderInfo::new(dom, op).for_boundary(b));
        }
        changes
    }

    fn destroy_boundary(&mut self, rt: &mut Runtime, b: BoundaryId, _nullify_defs: bool) -> Changes {
        self.calls.push(ApplyCall::Destroy(b));
        let mut gone = vec![b];
        gone.extend(rt.tree().boundaries_within(b));
        for id in &gone {
            self.dom.remove(id);
            self.children.remove(id);
        }
        if let Some(parent) = rt.tree().parent(b) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|c| *c != b);
            }
        }
        rt.discard_boundary(self, b)
    }

    fn build_wired_props(&mut self, rt: &Runtime, target: BoundaryId, from: BoundaryId) -> Option<Value> {
        let value = rt.tree().get(from)?.props().get("value")?.clone();
        let mut props = rt.tree().get(target)?.props().as_ref().clone();
        props.as_object_mut()?.insert("value".into(), value);
        Some(props)
    }
}

#[cfg_attr(test, mockall::automock)]
pub(crate) trait LifecycleObserver {
    fn mounted(&self);
    fn updated(&self);
    fn moved(&self);
    fn unmounting(&self);
}

/// A component reporting its lifecycle to an observer.
pub(crate) struct Observed {
    pub(crate) observer: Box<dyn LifecycleObserver>,
}

impl Component for Observed {
    fn did_mount(&mut self) {
        self.observer.mounted();
    }

    fn did_update(&mut self, _change: &BoundaryChange) {
        self.observer.updated();
    }

    fn did_move(&mut self) {
        self.observer.moved();
    }

    fn will_unmount(&mut self) {
        self.observer.unmounting();
    }
}

/// A component keeping every update record it is handed.
pub(crate) struct Recording {
    pub(crate) updates: Rc<RefCell<Vec<BoundaryChange>>>,
}

impl Component for Recording {
    fn did_update(&mut self, change: &BoundaryChange) {
        self.updates.borrow_mut().push(change.clone());
    }
}

/// A component that never re-renders on its own account.
pub(crate) struct Static;

impl Component for Static {
    fn should_update(&self, _pending: &PreUpdates) -> Option<bool> {
        Some(false)
    }
}
