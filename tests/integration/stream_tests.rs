use oxide_vdom::{Apply, ClosureRef, ComponentKind, DefId, Envelope, HostSettings, PassMode, RenderOp};
use serde_json::json;

use super::*;

const READER_SLOT: DefId = DefId::new(1);

fn stream_instance(name: &str, importance: f64) -> Value {
    json!({ "name": name, "importance": importance })
}

#[test]
fn given_an_incumbent_source_when_a_more_important_instance_mounts_should_remove_old_content_in_an_earlier_batch() {
    let (mut driver, renderer) = given_no_plans();
    let stream = driver.with(|rt, _| rt.create_stream("sidebar"));
    let app_plan = Plan {
        children: vec![
            child(ComponentKind::Plain, named("reader")),
            ChildSpec {
                kind: ComponentKind::Stream(stream),
                props: stream_instance("a", 0.0),
                content: Some(vec![text("from a")]),
            },
        ],
        groundings: vec![],
    };
    let reader_plan = Plan {
        children: vec![],
        groundings: vec![(READER_SLOT, Some(stream), PassMode::Pass)],
    };
    *driver.apply_mut() = SimpleApply::new(vec![("app", app_plan), ("reader", reader_plan)]);
    let (host, app) = given_a_mounted_root(&mut driver, HostSettings::default(), named("app"));

    let a = driver.apply().children_of(app)[1];
    let content_of_a = driver
        .runtime()
        .closure(ClosureRef::Stream(stream))
        .and_then(|c| c.grounding(READER_SLOT))
        .and_then(|g| g.content_boundary)
        .unwrap();
    assert_eq!(driver.runtime().stream(stream).unwrap().source(), Some(a));
    let batches_before = renderer.count();

    let b = driver.with(|rt, apply| {
        let b = rt
            .create_boundary(host, Some(app), ComponentKind::Stream(stream), Box::new(()), stream_instance("b", 10.0))
            .unwrap();
        rt.pass_content(apply, b, Some(Envelope::from_children(vec![text("from b")])));
        b
    });
    driver.flush();

    assert_eq!(driver.runtime().stream(stream).unwrap().source(), Some(b));
    let content_of_b = driver
        .runtime()
        .closure(ClosureRef::Stream(stream))
        .and_then(|c| c.grounding(READER_SLOT))
        .and_then(|g| g.content_boundary)
        .unwrap();
    assert_ne!(content_of_a, content_of_b);
    renderer.with_batches(|batches| {
        let later = &batches[batches_before..];
        let removal = later
            .iter()
            .position(|batch| batch.infos.iter().any(|i| i.op == RenderOp::Remove && i.boundary == Some(content_of_a)))
            .unwrap();
        let addition = later
            .iter()
            .position(|batch| batch.infos.iter().any(|i| i.op == RenderOp::Create && i.boundary == Some(content_of_b)))
            .unwrap();
        assert!(removal < addition);
    });
}

#[test]
fn given_equal_importances_should_elect_the_first_of_the_maxima_and_keep_it() {
    let (mut driver, _renderer) = given_no_plans();
    let (host, app) = given_a_mounted_root(&mut driver, HostSettings::default(), named("app"));

    driver.with(|rt, apply| {
        let stream = rt.create_stream("toolbar");
        let mut instances = Vec::new();
        for importance in [3.0, 5.0, 5.0] {
            let b = rt
                .create_boundary(host, Some(app), ComponentKind::Stream(stream), Box::new(()), stream_instance("s", importance))
                .unwrap();
            rt.add_source(stream, b).unwrap();
            instances.push(b);
        }
        assert_eq!(rt.best_stream_source(stream), Some(instances[1]));
        assert!(rt.refresh_stream(apply, stream, None));
        assert_eq!(rt.stream(stream).unwrap().source(), Some(instances[1]));

        let late = rt
            .create_boundary(host, Some(app), ComponentKind::Stream(stream), Box::new(()), stream_instance("s", 5.0))
            .unwrap();
        rt.add_source(stream, late).unwrap();

        assert!(!rt.refresh_stream(apply, stream, None));
        assert_eq!(rt.stream(stream).unwrap().source(), Some(instances[1]));
    });
}

#[test]
fn given_the_source_is_destroyed_should_elect_the_next_candidate_after_render() {
    let (mut driver, _renderer) = given_no_plans();
    let stream = driver.with(|rt, _| rt.create_stream("footer"));
    let app_plan = Plan {
        children: vec![
            child(ComponentKind::Stream(stream), stream_instance("main", 5.0)),
            child(ComponentKind::Stream(stream), stream_instance("backup", 1.0)),
        ],
        groundings: vec![],
    };
    *driver.apply_mut() = SimpleApply::new(vec![("app", app_plan)]);
    let (host, app) = given_a_mounted_root(&mut driver, HostSettings::default(), named("app"));
    let (main, backup) = {
        let children = driver.apply().children_of(app);
        (children[0], children[1])
    };
    assert_eq!(driver.runtime().stream(stream).unwrap().source(), Some(main));

    driver.with(|rt, apply| {
        let changes = apply.destroy_boundary(rt, main, true);
        rt.absorb_changes(apply, host, changes, None);
        assert_eq!(rt.stream(stream).unwrap().source(), None);
    });
    driver.flush();

    assert_eq!(driver.runtime().stream(stream).unwrap().source(), Some(backup));
    assert!(!driver.runtime().stream(stream).unwrap().sources().contains(&main));
}

#[test]
fn given_a_source_when_reattaching_a_less_important_candidate_should_keep_the_incumbent() {
    let (mut driver, _renderer) = given_no_plans();
    let (host, app) = given_a_mounted_root(&mut driver, HostSettings::default(), named("app"));

    driver.with(|rt, apply| {
        let stream = rt.create_stream("aside");
        let strong = rt
            .create_boundary(host, Some(app), ComponentKind::Stream(stream), Box::new(()), stream_instance("s", 4.0))
            .unwrap();
        let weak = rt
            .create_boundary(host, Some(app), ComponentKind::Stream(stream), Box::new(()), stream_instance("w", 2.0))
            .unwrap();
        assert!(rt.reattach_source_by(apply, stream, strong, false).is_some());

        assert!(rt.reattach_source_by(apply, stream, weak, true).is_none());
        assert!(rt.can_refresh_stream(stream, strong));
        assert!(!rt.can_refresh_stream(stream, weak));
    });
}

fn stream_content_boundary(driver: &TestDriver, stream: oxide_vdom::StreamId) -> Option<BoundaryId> {
    driver
        .runtime()
        .closure(ClosureRef::Stream(stream))
        .and_then(|c| c.grounding(READER_SLOT))
        .and_then(|g| g.content_boundary)
}

#[test]
fn given_a_source_in_another_host_should_render_the_content_with_the_reader() {
    let (mut driver, renderer) = given_no_plans();
    let stream = driver.with(|rt, _| rt.create_stream("panel"));
    let reader_plan = Plan {
        children: vec![],
        groundings: vec![(READER_SLOT, Some(stream), PassMode::Pass)],
    };
    let source_plan = Plan {
        children: vec![ChildSpec {
            kind: ComponentKind::Stream(stream),
            props: stream_instance("s", 1.0),
            content: Some(vec![text("shared")]),
        }],
        groundings: vec![],
    };
    *driver.apply_mut() = SimpleApply::new(vec![("reader", reader_plan), ("source app", source_plan)]);
    let (reader_host, reader) = given_a_mounted_root(&mut driver, HostSettings::default(), named("reader"));
    let (source_host, _) = given_a_mounted_root(&mut driver, HostSettings::default(), named("source app"));

    let content = stream_content_boundary(&driver, stream).unwrap();
    assert_eq!(driver.runtime().tree().get(content).unwrap().host(), reader_host);
    renderer.with_batches(|batches| {
        let creates: Vec<HostId> = batches
            .iter()
            .filter(|batch| batch.infos.iter().any(|i| i.op == RenderOp::Create && i.boundary == Some(content)))
            .map(|batch| batch.host)
            .collect();
        assert_eq!(creates, vec![reader_host]);
        assert!(batches
            .iter()
            .filter(|batch| batch.host == source_host)
            .all(|batch| batch.infos.iter().all(|i| i.boundary != Some(content) && i.boundary != Some(reader))));
    });
}

#[test]
fn given_a_more_important_candidate_in_another_host_should_take_over_fully() {
    let (mut driver, renderer) = given_no_plans();
    let stream = driver.with(|rt, _| rt.create_stream("banner"));
    let app_plan = Plan {
        children: vec![ChildSpec {
            kind: ComponentKind::Stream(stream),
            props: stream_instance("incumbent", 1.0),
            content: Some(vec![text("old")]),
        }],
        groundings: vec![(READER_SLOT, Some(stream), PassMode::Pass)],
    };
    *driver.apply_mut() = SimpleApply::new(vec![("app", app_plan)]);
    let (app_host, app) = given_a_mounted_root(&mut driver, HostSettings::default(), named("app"));
    let incumbent = driver.apply().children_of(app)[0];
    let old_content = stream_content_boundary(&driver, stream).unwrap();
    assert_eq!(driver.runtime().stream(stream).unwrap().source(), Some(incumbent));
    let batches_before = renderer.count();

    let (other_host, candidate) = driver.with(|rt, apply| {
        let other_host = rt.create_host(HostSettings::default(), None).unwrap();
        let candidate = rt
            .create_boundary(other_host, None, ComponentKind::Stream(stream), Box::new(()), stream_instance("candidate", 5.0))
            .unwrap();
        rt.pass_content(apply, candidate, Some(Envelope::from_children(vec![text("new")])));
        let changes = rt.reattach_source_by(apply, stream, candidate, true).unwrap();
        rt.absorb_changes(apply, other_host, changes, None);
        (other_host, candidate)
    });
    driver.flush();

    assert_eq!(driver.runtime().stream(stream).unwrap().source(), Some(candidate));
    assert!(!driver.runtime().tree().is_live(old_content));
    assert!(driver.runtime().tree().is_live(incumbent));
    let new_content = stream_content_boundary(&driver, stream).unwrap();
    assert_ne!(new_content, old_content);
    renderer.with_batches(|batches| {
        let later = &batches[batches_before..];
        let host_of = |op: RenderOp, b: BoundaryId| {
            later
                .iter()
                .find(|batch| batch.infos.iter().any(|i| i.op == op && i.boundary == Some(b)))
                .map(|batch| batch.host)
        };
        assert_eq!(host_of(RenderOp::Remove, old_content), Some(app_host));
        assert_eq!(host_of(RenderOp::Create, new_content), Some(app_host));
        assert!(later
            .iter()
            .filter(|batch| batch.host == other_host)
            .all(|batch| batch.infos.iter().all(|i| i.boundary != Some(old_content) && i.boundary != Some(new_content))));
    });
}
