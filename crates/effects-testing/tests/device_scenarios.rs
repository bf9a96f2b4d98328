use std::time::Duration;

use effects_core::{
    Derived, DerivedOptions, Leaf, LifecycleError, LifecycleOptions, NodeKey, Resolution,
};
use effects_testing::{EffectProbe, ProbeEvent, TestRoot};

const GRACE: Duration = Duration::from_millis(2000);

struct Devices {
    root: TestRoot,
    probe: EffectProbe,
    devices: Leaf<Vec<String>>,
    scanners: Leaf<Vec<String>>,
    select_devices: Derived<Vec<String>>,
}

fn devices_state(root: TestRoot) -> Devices {
    let probe = EffectProbe::new();
    let devices = root.leaf(probe.leaf("devices", Vec::<String>::new()));
    let scanners = root.leaf(probe.leaf("scanners", Vec::<String>::new()));
    let (d, s) = (devices.clone(), scanners.clone());
    let select_devices = root.derived("select_devices", move |scope| {
        let mut all = scope.get(&d);
        all.extend(scope.get(&s));
        all
    });
    Devices {
        root,
        probe,
        devices,
        scanners,
        select_devices,
    }
}

#[test]
fn two_consumers_in_the_same_tick_mount_once() {
    let state = devices_state(TestRoot::new());

    let (_, first) = state.root.subscribe(&state.devices).unwrap();
    let (_, second) = state.root.subscribe(&state.devices).unwrap();
    assert_eq!(state.probe.mounts("devices"), 1);
    assert_eq!(state.root.coordinator().refcount(state.devices.key()), Some(2));

    first.release();
    second.release();
    assert_eq!(state.probe.unmounts("devices"), 0);

    state.root.advance_by(GRACE);
    assert_eq!(state.probe.unmounts("devices"), 1);
}

#[test]
fn selector_reattached_within_grace_keeps_leaves_mounted() {
    let state = devices_state(TestRoot::new());

    let (_, subscription) = state.root.subscribe(&state.select_devices).unwrap();
    assert_eq!(subscription.resolution(), Resolution::Derived);
    assert_eq!(state.probe.total_mounts(), 2);

    subscription.release();
    state.root.advance_by(Duration::from_millis(100));

    let (_, again) = state.root.subscribe(&state.select_devices).unwrap();
    state.root.advance_by(GRACE * 2);

    assert_eq!(state.probe.total_mounts(), 2);
    assert_eq!(state.probe.total_unmounts(), 0);
    assert!(state.root.coordinator().is_mounted(state.devices.key()));
    assert!(state.root.coordinator().is_mounted(state.scanners.key()));

    drop(again);
    state.root.advance_by(GRACE);
    assert_eq!(state.probe.total_unmounts(), 2);
}

#[test]
fn consumer_reevaluated_three_times_attaches_and_detaches_once() {
    let state = devices_state(TestRoot::new());
    let scope = state.root.consumer_scope();

    for round in 0..3 {
        state.devices.set(vec![format!("printer-{round}")]);
        let seen = scope.use_node(&state.select_devices).unwrap();
        assert_eq!(seen, vec![format!("printer-{round}")]);
    }
    assert_eq!(state.probe.total_mounts(), 2);
    assert_eq!(state.root.coordinator().refcount(state.devices.key()), Some(1));

    drop(scope);
    state.root.advance_by(GRACE);
    assert_eq!(state.probe.mounts("devices"), 1);
    assert_eq!(state.probe.unmounts("devices"), 1);
    assert_eq!(state.probe.mounts("scanners"), 1);
    assert_eq!(state.probe.unmounts("scanners"), 1);
}

#[test]
fn transitive_selectors_reach_the_leaf() {
    let state = devices_state(TestRoot::new());
    let all = state.select_devices.clone();
    let count = state.root.derived("device_count", move |scope| scope.get(&all).len());

    let (value, subscription) = state.root.subscribe(&count).unwrap();
    assert_eq!(value, 0);
    assert_eq!(state.probe.total_mounts(), 2);

    subscription.release();
    state.root.advance_by(GRACE);
    assert_eq!(state.probe.total_unmounts(), 2);
}

#[test]
fn n_attaches_need_n_detaches() {
    let state = devices_state(TestRoot::new());
    let subscriptions: Vec<_> = (0..5)
        .map(|_| state.root.subscribe(&state.scanners).unwrap().1)
        .collect();
    assert_eq!(state.probe.mounts("scanners"), 1);

    let mut remaining = subscriptions;
    while remaining.len() > 1 {
        remaining.pop().unwrap().release();
        state.root.advance_by(GRACE);
        assert_eq!(state.probe.unmounts("scanners"), 0);
    }

    remaining.pop().unwrap().release();
    state.root.advance_by(GRACE);
    assert_eq!(state.probe.unmounts("scanners"), 1);
}

#[test]
fn unmount_waits_for_the_whole_grace_period() {
    let state = devices_state(TestRoot::new());
    let (_, subscription) = state.root.subscribe(&state.devices).unwrap();
    subscription.release();
    assert_eq!(state.root.now_millis(), 0);

    state.root.advance_by(Duration::from_millis(1999));
    assert_eq!(state.probe.unmounts("devices"), 0);
    assert!(state.root.coordinator().has_pending_unmount(state.devices.key()));

    state.root.advance_by(Duration::from_millis(1));
    assert_eq!(state.probe.unmounts("devices"), 1);
    assert!(!state.root.coordinator().is_mounted(state.devices.key()));
}

#[test]
fn mount_after_completed_unmount_runs_mount_again() {
    let state = devices_state(TestRoot::new());

    let (_, subscription) = state.root.subscribe(&state.devices).unwrap();
    subscription.release();
    state.root.run_until_idle();

    let (_, subscription) = state.root.subscribe(&state.devices).unwrap();
    subscription.release();
    state.root.run_until_idle();

    assert_eq!(
        state.probe.events(),
        vec![
            ProbeEvent::Mount("devices".into()),
            ProbeEvent::Unmount("devices".into()),
            ProbeEvent::Mount("devices".into()),
            ProbeEvent::Unmount("devices".into()),
        ]
    );
}

#[test]
fn custom_grace_period_is_honoured() {
    let state = devices_state(TestRoot::with_options(
        LifecycleOptions::default().with_grace_period(Duration::from_millis(50)),
    ));
    let (_, subscription) = state.root.subscribe(&state.devices).unwrap();
    subscription.release();

    assert_eq!(state.root.scheduler().last_request(), Some(50));
    state.root.advance_by(Duration::from_millis(49));
    assert_eq!(state.probe.unmounts("devices"), 0);
    state.root.advance_by(Duration::from_millis(1));
    assert_eq!(state.probe.unmounts("devices"), 1);
}

#[test]
fn plain_key_subscription_is_inert() {
    let root = TestRoot::new();
    let subscription = root
        .coordinator()
        .subscribe(&NodeKey::new("untracked"))
        .unwrap();
    assert_eq!(subscription.resolution(), Resolution::NotTracked);
    assert!(!subscription.is_active());
    subscription.release();
    assert!(!root.runtime().has_pending_tasks());
}

#[test]
fn failed_mount_surfaces_the_callback_error() {
    let state = devices_state(TestRoot::new());
    state.probe.fail_mounts(true);

    let failure = match state.root.subscribe(&state.devices) {
        Err(failure) => failure,
        Ok(_) => panic!("mount should fail"),
    };
    assert_eq!(failure.subscription().held_leaves(), [state.devices.key().clone()]);
    let (err, subscription) = failure.into_parts();
    match err {
        LifecycleError::Effect { key, .. } => assert_eq!(key.name(), "devices"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(state.root.coordinator().refcount(state.devices.key()), Some(1));
    assert!(state.root.coordinator().is_mounted(state.devices.key()));

    subscription.release();
    state.root.advance_by(GRACE);
    assert_eq!(state.root.coordinator().refcount(state.devices.key()), Some(0));
    assert_eq!(state.probe.unmounts("devices"), 1);
}

#[test]
fn failed_attach_is_not_retried_by_later_evaluations() {
    let state = devices_state(TestRoot::new());
    state.probe.fail_mounts(true);
    let scope = state.root.consumer_scope();

    assert!(scope.use_node(&state.devices).is_err());
    state.probe.fail_mounts(false);
    assert!(scope.use_node(&state.devices).is_ok());
    assert!(scope.use_node(&state.devices).is_ok());

    assert!(scope.is_attached(state.devices.key()));
    assert_eq!(state.probe.mounts("devices"), 1);
    assert_eq!(state.root.coordinator().refcount(state.devices.key()), Some(1));

    scope.dispose();
    state.root.advance_by(GRACE * 3);
    assert_eq!(state.root.coordinator().refcount(state.devices.key()), Some(0));
    assert_eq!(state.probe.unmounts("devices"), 1);
}

#[test]
fn detach_releases_the_leaves_taken_at_attach() {
    let root = TestRoot::new();
    let probe = EffectProbe::new();
    let use_first = root.leaf(effects_core::LeafOptions::new("use_first", true, |_| Ok(())));
    let first = root.leaf(probe.leaf("first", 1));
    let second = root.leaf(probe.leaf("second", 2));
    let (flag, a, b) = (use_first.clone(), first.clone(), second.clone());
    let chosen = root.derived("chosen", move |scope| {
        if scope.get(&flag) {
            scope.get(&a)
        } else {
            scope.get(&b)
        }
    });

    let (_, other_consumer) = root.subscribe(&second).unwrap();
    assert_eq!(chosen.get(), 1);
    let (_, subscription) = root.subscribe(&chosen).unwrap();
    assert_eq!(
        subscription.held_leaves(),
        [use_first.key().clone(), first.key().clone()]
    );

    use_first.set(false);
    assert_eq!(chosen.get(), 2);
    subscription.release();
    root.advance_by(GRACE);

    let coordinator = root.coordinator();
    assert_eq!(coordinator.refcount(first.key()), Some(0));
    assert_eq!(probe.unmounts("first"), 1);
    assert_eq!(coordinator.refcount(second.key()), Some(1));
    assert_eq!(probe.unmounts("second"), 0);

    drop(other_consumer);
    root.advance_by(GRACE);
    assert_eq!(probe.unmounts("second"), 1);
}

#[test]
fn writable_selector_writes_through_to_its_leaves() {
    let state = devices_state(TestRoot::new());
    let (d, s) = (state.devices.clone(), state.scanners.clone());
    let (wd, ws) = (state.devices.clone(), state.scanners.clone());
    let (rd, rs) = (state.devices.clone(), state.scanners.clone());
    let all = state.root.derived_with_options(
        DerivedOptions::new("all_devices", move |scope| {
            let mut all = scope.get(&d);
            all.extend(scope.get(&s));
            all
        })
        .with_set(move |scope, value: Vec<String>| {
            let (scanners, devices): (Vec<String>, Vec<String>) =
                value.into_iter().partition(|name| name.starts_with("scanner"));
            scope.set(&wd, devices);
            scope.set(&ws, scanners);
        })
        .with_reset(move |scope| {
            scope.reset(&rd);
            scope.reset(&rs);
        }),
    );
    assert!(all.is_writable());
    assert!(!state.select_devices.is_writable());

    let scope = state.root.consumer_scope();
    let (value, set_all) = scope.use_state(&all).unwrap();
    assert!(value.is_empty());
    assert_eq!(state.probe.total_mounts(), 2);

    set_all.set(vec!["printer-1".into(), "scanner-1".into()]);
    assert_eq!(state.devices.get(), vec!["printer-1".to_string()]);
    assert_eq!(state.scanners.get(), vec!["scanner-1".to_string()]);
    assert_eq!(scope.use_node(&all).unwrap().len(), 2);

    set_all.update(|current| {
        let mut next = current.clone();
        next.push("printer-2".into());
        next
    });
    assert_eq!(state.devices.with(Vec::len), 2);

    set_all.reset();
    assert!(all.get().is_empty());

    assert!(!state.select_devices.set(vec!["ignored".into()]));
    assert!(state.devices.get().is_empty());
}

#[test]
fn use_state_on_a_leaf_returns_its_setter() {
    let state = devices_state(TestRoot::new());
    let scope = state.root.consumer_scope();

    let (value, set_devices) = scope.use_state(&state.devices).unwrap();
    assert!(value.is_empty());
    set_devices.set(vec!["printer-9".into()]);

    let (value, _) = scope.use_state(&state.devices).unwrap();
    assert_eq!(value, vec!["printer-9".to_string()]);
    assert_eq!(state.probe.mounts("devices"), 1);
    assert_eq!(state.root.coordinator().refcount(state.devices.key()), Some(1));
}

#[test]
fn leaf_values_written_by_mount_are_visible_to_consumers() {
    let root = TestRoot::new();
    let devices = root.leaf(
        effects_core::LeafOptions::new("devices", Vec::<String>::new(), |setter| {
            setter.set(vec!["scanner-1".into(), "printer-1".into()]);
            Ok(())
        })
        .with_unmount(|setter| {
            setter.reset();
            Ok(())
        }),
    );

    let scope = root.consumer_scope();
    scope.use_node(&devices).unwrap();
    assert_eq!(devices.get().len(), 2);

    scope.dispose();
    root.advance_by(GRACE);
    assert!(devices.get().is_empty());
}

#[test]
fn excess_detaches_unmount_at_most_once() {
    let state = devices_state(TestRoot::new());
    let coordinator = state.root.coordinator();
    let key = state.devices.key();

    coordinator.resolve_and_mount(key).unwrap();
    for _ in 0..3 {
        coordinator.resolve_and_unmount(key).unwrap();
    }
    assert_eq!(coordinator.refcount(key), Some(0));
    assert_eq!(state.root.runtime().next_deadline(), Some(2000));

    state.root.run_until_idle();
    coordinator.resolve_and_unmount(key).unwrap();
    state.root.run_until_idle();

    assert_eq!(state.probe.unmounts("devices"), 1);
    assert_eq!(coordinator.refcount(key), Some(0));
}
