use std::rc::Rc;

use oxide_vdom::{
    Callback, Command, ContextFlags, ContextId, ContextOverride, ContextRefresh, ContextSettings, Error, HostSettings,
    ListenerFlags, SignalTiming, Updates,
};
use serde_json::json;

use super::*;

/// An `app` root rendering one `leaf` child, with a `theme` context set
/// at host level.
fn given_app_with_leaf(settings: HostSettings) -> (TestDriver, HostId, BoundaryId, BoundaryId, ContextId) {
    let app = Plan {
        children: vec![child(ComponentKind::Plain, named("leaf"))],
        groundings: vec![],
    };
    let (mut driver, _renderer) = given_plans(vec![("app", app)]);
    let (host, root) = given_a_mounted_root(&mut driver, settings, named("app"));
    let leaf = driver.apply().children_of(root)[0];
    let theme = driver.with(|rt, apply| {
        let theme = rt.create_context("theme", json!({"color": "red"}), ContextSettings::default());
        rt.set_host_context(apply, host, "theme", Some(theme)).unwrap();
        theme
    });
    driver.flush();
    (driver, host, root, leaf, theme)
}

fn blue_theme(driver: &mut TestDriver) -> ContextId {
    driver.with(|rt, _| rt.create_context("theme", json!({"color": "blue"}), ContextSettings::default()))
}

#[test]
fn given_a_data_listener_when_its_path_is_set_should_be_called_once_with_the_new_value() {
    let (mut driver, _renderer) = given_no_plans();
    let (host, root) = given_a_mounted_root(&mut driver, HostSettings::default(), named("app"));
    let (cb, calls) = recorder();

    driver.with(|rt, apply| {
        let settings = rt.create_context("settings", json!({"theme": "light"}), ContextSettings::default());
        rt.set_host_context(apply, host, "settings", Some(settings)).unwrap();
    });
    driver.flush();
    driver.with(|rt, apply| {
        rt.listen_to_data(apply, root, &["settings.theme"], cb, vec![], false).unwrap();
        rt.set_in_data(apply, root, "settings.theme", json!("dark"), false, true, None).unwrap();
    });
    driver.flush();

    assert_eq!(*calls.borrow(), vec![vec![json!("dark")]]);
}

#[test]
fn given_call_immediately_should_call_with_fallbacks_for_missing_paths() {
    let (mut driver, _host, _root, leaf, _theme) = given_app_with_leaf(HostSettings::default());
    let (cb, calls) = recorder();

    driver.with(|rt, apply| {
        rt.listen_to_data(apply, leaf, &["theme.color", "theme.size", "user.name"], cb, vec![json!(0), json!(12), json!("anon")], true)
            .unwrap();
    });

    assert_eq!(*calls.borrow(), vec![vec![json!("red"), json!(12), json!("anon")]]);
}

#[test]
fn given_malformed_keys_should_refuse_to_listen() {
    let (mut driver, _host, _root, leaf, _theme) = given_app_with_leaf(HostSettings::default());
    let (cb, _calls) = recorder();

    driver.with(|rt, apply| {
        assert_eq!(
            rt.listen_to_data(apply, leaf, &[".color"], cb.clone(), vec![], false),
            Err(Error::MalformedKey(".color".into()))
        );
        assert!(matches!(
            rt.listen_to(leaf, "theme", cb, vec![], ListenerFlags::empty(), None),
            Err(Error::MalformedKey(_))
        ));
    });
}

#[test]
fn given_every_tier_should_resolve_override_then_parent_then_cascading() {
    let (mut driver, _host, _root, leaf, theme) = given_app_with_leaf(HostSettings::default());
    let attached = blue_theme(&mut driver);
    let local = blue_theme(&mut driver);

    driver.with(|rt, apply| {
        assert_eq!(rt.get_context(leaf, "theme", ContextFlags::ALL), Some(theme));

        rt.attach_context(apply, leaf, "theme", Some(attached), ContextRefresh::No);
        assert_eq!(rt.get_context(leaf, "theme", ContextFlags::ALL), Some(attached));

        rt.override_context(apply, leaf, "theme", ContextOverride::Set(local), ContextRefresh::No);
        assert_eq!(rt.get_context(leaf, "theme", ContextFlags::ALL), Some(local));
        assert_eq!(rt.get_context(leaf, "theme", ContextFlags::PARENT), Some(attached));
        assert_eq!(rt.get_context(leaf, "theme", ContextFlags::CASCADING), Some(theme));

        rt.override_context(apply, leaf, "theme", ContextOverride::Null, ContextRefresh::No);
        assert_eq!(rt.get_context(leaf, "theme", ContextFlags::ALL), None);

        rt.override_context(apply, leaf, "theme", ContextOverride::Clear, ContextRefresh::No);
        assert_eq!(rt.get_context(leaf, "theme", ContextFlags::ALL), Some(attached));
    });
}

#[test]
fn given_an_ancestor_override_should_reach_descendants_by_cascading() {
    let (mut driver, _host, root, leaf, _theme) = given_app_with_leaf(HostSettings::default());
    let blue = blue_theme(&mut driver);

    driver.with(|rt, apply| {
        rt.override_context(apply, root, "theme", ContextOverride::Set(blue), ContextRefresh::No);
    });

    assert_eq!(driver.runtime().get_context(leaf, "theme", ContextFlags::CASCADING), Some(blue));
    assert_eq!(driver.runtime().get_in_data(leaf, "theme.color"), Some(json!("blue")));
    let contexts = driver.runtime().get_contexts(leaf, None, ContextFlags::ALL);
    assert_eq!(contexts.get("theme"), Some(&Some(blue)));
}

#[test]
fn given_a_nested_host_should_see_outer_contexts_only_when_welcoming_them() {
    for welcome in [true, false] {
        let (mut driver, _host, _root, leaf, theme) = given_app_with_leaf(HostSettings::default());
        let inner_root = driver.with(|rt, _| {
            let settings = HostSettings {
                welcome_contexts_up_root: welcome,
                ..HostSettings::default()
            };
            let inner = rt.create_host(settings, Some(leaf)).unwrap();
            rt.create_boundary(inner, None, ComponentKind::Plain, Box::new(()), named("inner")).unwrap()
        });

        let expected = welcome.then_some(theme);
        assert_eq!(driver.runtime().get_context(inner_root, "theme", ContextFlags::ALL), expected);
    }
}

#[test]
fn given_a_nested_host_with_its_own_context_should_prefer_it() {
    let (mut driver, _host, _root, leaf, _theme) = given_app_with_leaf(HostSettings::default());
    let blue = blue_theme(&mut driver);

    let inner_root = driver.with(|rt, apply| {
        let inner = rt.create_host(HostSettings::default(), Some(leaf)).unwrap();
        let inner_root = rt.create_boundary(inner, None, ComponentKind::Plain, Box::new(()), named("inner")).unwrap();
        rt.set_host_context(apply, inner, "theme", Some(blue)).unwrap();
        inner_root
    });

    assert_eq!(driver.runtime().get_context(inner_root, "theme", ContextFlags::ALL), Some(blue));
}

#[test]
fn given_a_parent_that_skips_rendering_when_it_overrides_a_context_should_still_refresh_descendant_data() {
    let (mut driver, _renderer) = given_no_plans();
    let (host, root) = given_a_mounted_root(&mut driver, HostSettings::default(), named("app"));
    let (cb, calls) = recorder();
    let (mid, leaf) = driver.with(|rt, apply| {
        let red = rt.create_context("theme", json!({"color": "red"}), ContextSettings::default());
        rt.set_host_context(apply, host, "theme", Some(red)).unwrap();
        let mid = rt.create_boundary(host, Some(root), ComponentKind::Plain, Box::new(Static), named("mid")).unwrap();
        let leaf = rt.create_boundary(host, Some(mid), ComponentKind::Plain, Box::new(()), named("leaf")).unwrap();
        rt.request_update(apply, mid, None);
        rt.request_update(apply, leaf, None);
        (mid, leaf)
    });
    driver.flush();
    driver.with(|rt, apply| rt.listen_to_data(apply, leaf, &["theme.color"], cb, vec![], false).unwrap());
    let blue = blue_theme(&mut driver);

    driver.with(|rt, apply| {
        rt.override_context(apply, mid, "theme", ContextOverride::Set(blue), ContextRefresh::Scheduled);
    });
    driver.flush();

    assert_eq!(*calls.borrow(), vec![vec![json!("blue")]]);
    assert_eq!(driver.apply().renders_of(mid), 1);
    assert_eq!(driver.runtime().tree().get(leaf).unwrap().context_api().registered().get("theme"), Some(&blue));
}

#[test]
fn given_an_attached_context_should_rebuild_data_on_the_next_update() {
    let (mut driver, _host, _root, leaf, _theme) = given_app_with_leaf(HostSettings::default());
    let (cb, calls) = recorder();
    let blue = blue_theme(&mut driver);
    driver.with(|rt, apply| rt.listen_to_data(apply, leaf, &["theme.color"], cb, vec![], false).unwrap());

    let changed = driver.with(|rt, apply| rt.attach_context(apply, leaf, "theme", Some(blue), ContextRefresh::Scheduled));
    assert!(changed);
    assert!(calls.borrow().is_empty());
    driver.flush();

    assert_eq!(*calls.borrow(), vec![vec![json!("blue")]]);
}

#[test]
fn given_signal_listeners_should_append_extra_args_and_drop_one_shots() {
    let (mut driver, _host, root, leaf, theme) = given_app_with_leaf(HostSettings::default());
    let (steady, steady_calls) = recorder();
    let (once, once_calls) = recorder();

    driver.with(|rt, apply| {
        rt.listen_to(leaf, "theme.ping", steady.clone(), vec![json!("extra")], ListenerFlags::empty(), None)
            .unwrap();
        rt.listen_to(root, "theme.ping", once.clone(), vec![], ListenerFlags::ONE_SHOT, None).unwrap();

        assert!(rt.send_signal(apply, leaf, "theme.ping", &[json!(1)]).unwrap());
        assert!(rt.send_signal(apply, leaf, "theme.ping", &[json!(2)]).unwrap());
    });

    assert_eq!(
        *steady_calls.borrow(),
        vec![vec![json!(1), json!("extra")], vec![json!(2), json!("extra")]]
    );
    assert_eq!(*once_calls.borrow(), vec![vec![json!(1)]]);
    let rt = driver.runtime();
    assert!(rt.is_listening(leaf, Some("theme.ping"), Some(&steady)));
    assert!(!rt.is_listening(root, Some("theme.ping"), Some(&once)));
    let components = rt.context(theme).unwrap().services().signal_components();
    assert!(components.contains_key(&leaf));
    assert!(!components.contains_key(&root));
}

#[test]
fn given_an_unlistened_signal_should_drop_the_context_interest() {
    let (mut driver, _host, _root, leaf, theme) = given_app_with_leaf(HostSettings::default());
    let (cb, calls) = recorder();

    driver.with(|rt, apply| {
        rt.listen_to(leaf, "theme.ping", cb.clone(), vec![], ListenerFlags::empty(), Some("menu".into()))
            .unwrap();
        assert!(rt.unlisten_to(leaf, None, None, Some("menu")));
        rt.send_signal(apply, leaf, "theme.ping", &[]).unwrap();
    });

    assert!(calls.borrow().is_empty());
    assert!(!driver.runtime().context(theme).unwrap().services().signal_components().contains_key(&leaf));
}

#[test]
fn given_a_delayed_signal_should_wait_for_the_render_it_caused() {
    let settings = HostSettings {
        render_timeout: Some(10),
        ..HostSettings::default()
    };
    let (mut driver, _host, root, leaf, theme) = given_app_with_leaf(settings);
    let (cb, calls) = recorder();

    let (pre, full) = driver.with(|rt, apply| {
        rt.listen_to(leaf, "theme.done", cb, vec![], ListenerFlags::empty(), None).unwrap();
        rt.absorb_updates(apply, root, Updates::state(json!({"busy": true})), true, None);
        rt.send_signal_as(apply, theme, SignalTiming::Delay, "done", vec![json!("late")]).unwrap();
        let pre = rt.after_signal_refresh(apply, theme, false, None).unwrap();
        let full = rt.after_signal_refresh(apply, theme, true, None).unwrap();
        (pre, full)
    });

    driver.advance(0);
    assert!(pre.is_resolved());
    assert!(!full.is_resolved());
    assert!(calls.borrow().is_empty());

    driver.advance(10);
    assert!(full.is_resolved());
    assert_eq!(*calls.borrow(), vec![vec![json!("late")]]);
    full.wait_blocking();
    pre.wait_blocking();
}

#[test]
fn given_nothing_to_render_should_release_delayed_signals_with_the_cycle() {
    let (mut driver, _host, _root, leaf, theme) = given_app_with_leaf(HostSettings::default());
    let (cb, calls) = recorder();

    let full = driver.with(|rt, apply| {
        rt.listen_to(leaf, "theme.done", cb, vec![], ListenerFlags::empty(), None).unwrap();
        rt.send_signal_as(apply, theme, SignalTiming::Delay, "done", vec![]).unwrap();
        rt.after_signal_refresh(apply, theme, true, None).unwrap()
    });
    driver.advance(0);

    assert!(full.is_resolved());
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn given_a_listener_emitting_a_command_should_update_the_boundary() {
    let (mut driver, _host, root, _leaf, theme) = given_app_with_leaf(HostSettings::default());
    let emitter = driver.runtime().emitter();
    let on_color: Callback = Rc::new(move |args: &[Value]| {
        emitter.emit(Command::Absorb {
            boundary: root,
            updates: Updates::state(json!({ "color": args[0] })),
        });
    });

    driver.with(|rt, apply| {
        rt.listen_to_data(apply, root, &["theme.color"], on_color, vec![], false).unwrap();
        rt.set_in_context(apply, theme, "color", json!("green"), false, true, None).unwrap();
    });
    driver.flush();

    let state = driver.runtime().tree().get(root).unwrap().state().clone();
    assert_eq!(*state, json!({"color": "green"}));
    assert_eq!(driver.apply().renders_of(root), 2);
}

#[test]
fn given_a_panicking_listener_should_still_call_the_others() {
    let (mut driver, _host, root, leaf, theme) = given_app_with_leaf(HostSettings::default());
    let exploding: Callback = Rc::new(|args: &[Value]| {
        assert!(args.is_empty(), "listener blew up on {args:?}");
    });
    let (cb, calls) = recorder();

    driver.with(|rt, apply| {
        rt.listen_to_data(apply, root, &["theme.color"], exploding, vec![], false).unwrap();
        rt.listen_to_data(apply, leaf, &["theme.color"], cb, vec![], false).unwrap();
        rt.set_in_context(apply, theme, "color", json!("black"), false, true, None).unwrap();
    });
    driver.flush();

    assert_eq!(*calls.borrow(), vec![vec![json!("black")]]);
}

#[test]
fn given_direct_context_listeners_should_hear_data_and_signals() {
    let (mut driver, _host, _root, _leaf, theme) = given_app_with_leaf(HostSettings::default());
    let (on_data, data_calls) = recorder();
    let (on_signal, signal_calls) = recorder();

    driver.with(|rt, apply| {
        rt.listen_to_context_data(apply, theme, &["color"], on_data.clone(), true).unwrap();
        rt.listen_to_context(theme, "ping", on_signal, vec![], ListenerFlags::empty()).unwrap();
        rt.set_in_context(apply, theme, "color", json!("teal"), false, true, None).unwrap();
        rt.send_signal_as(apply, theme, SignalTiming::Immediate, "ping", vec![json!(true)]).unwrap();
    });
    driver.flush();

    assert_eq!(*data_calls.borrow(), vec![vec![json!("red")], vec![json!("teal")]]);
    assert_eq!(*signal_calls.borrow(), vec![vec![json!(true)]]);
    assert!(driver.with(|rt, _| rt.unlisten_to_context_data(theme, &on_data)));
}
