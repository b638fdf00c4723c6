mod simple_apply;

use std::cell::RefCell;
use std::rc::Rc;

use oxide_vdom::{
    BoundaryId, Callback, ComponentKind, Def, Driver, HostId, HostSettings, Runtime, TestRenderer, Value,
};
use serde_json::json;
pub(crate) use simple_apply::*;

mod context_tests;
mod stream_tests;

pub(crate) type TestDriver = Driver<SimpleApply>;

pub(crate) fn given_plans(plans: Vec<(&str, Plan)>) -> (TestDriver, TestRenderer) {
    let renderer = TestRenderer::new();
    let driver = Driver::new(Runtime::new(renderer.boxed()), SimpleApply::new(plans));
    (driver, renderer)
}

pub(crate) fn given_no_plans() -> (TestDriver, TestRenderer) {
    given_plans(vec![])
}

/// Creates a host with a root boundary and mounts it.
pub(crate) fn given_a_mounted_root(driver: &mut TestDriver, settings: HostSettings, props: Value) -> (HostId, BoundaryId) {
    let (host, root) = driver.with(|rt, apply| {
        let host = rt.create_host(settings, None).unwrap();
        let root = rt.create_boundary(host, None, ComponentKind::Plain, Box::new(()), props).unwrap();
        rt.request_update(apply, root, None);
        (host, root)
    });
    driver.flush();
    (host, root)
}

pub(crate) fn named(name: &str) -> Value {
    json!({ "name": name })
}

pub(crate) fn text(content: &str) -> Rc<Def> {
    Rc::new(Def::text(content))
}

pub(crate) fn child(kind: ComponentKind, props: Value) -> ChildSpec {
    ChildSpec {
        kind,
        props,
        content: None,
    }
}

pub(crate) fn recorder() -> (Callback, Rc<RefCell<Vec<Vec<Value>>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let sink = calls.clone();
    (Rc::new(move |args: &[Value]| sink.borrow_mut().push(args.to_vec())), calls)
}
