use std::time::Duration;

use effects_core::{EffectsRoot, LeafOptions, LifecycleOptions};
use effects_runtime_std::StdRuntime;

const GRACE_PERIOD: Duration = Duration::from_millis(300);

fn main() {
    env_logger::init();

    println!("=== Effects-RS Device Example ===");
    println!("Watch the mount/unmount lines:");
    println!("  - Two consumers of one leaf share a single mount");
    println!("  - A selector re-attached inside the grace period keeps its leaves mounted");
    println!("  - Unmount runs once the last consumer has been gone for {GRACE_PERIOD:?}");
    println!();

    let runtime = StdRuntime::new();
    let root = runtime.root_with_options(LifecycleOptions::default().with_grace_period(GRACE_PERIOD));

    let devices = root.leaf(
        LeafOptions::new("devices", Vec::<String>::new(), |setter| {
            println!("[devices] mount: starting discovery");
            setter.set(vec!["printer-1".into(), "printer-2".into()]);
            Ok(())
        })
        .with_unmount(|setter| {
            println!("[devices] unmount: stopping discovery");
            setter.reset();
            Ok(())
        })
        .with_effect(|context| {
            let key = context.key().clone();
            context.on_set(move |new, old| {
                log::info!("`{key}` changed from {} to {} entries", old.len(), new.len());
            });
        }),
    );
    let scanners = root.leaf(
        LeafOptions::new("scanners", Vec::<String>::new(), |setter| {
            println!("[scanners] mount: starting discovery");
            setter.set(vec!["scanner-1".into()]);
            Ok(())
        })
        .with_unmount(|setter| {
            println!("[scanners] unmount: stopping discovery");
            setter.reset();
            Ok(())
        }),
    );

    let (d, s) = (devices.clone(), scanners.clone());
    let select_devices = root.derived("select_devices", move |scope| {
        let mut all = scope.get(&d);
        all.extend(scope.get(&s));
        all
    });

    if let Err(err) = run(&runtime, &root, &devices, &select_devices) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run(
    runtime: &StdRuntime,
    root: &EffectsRoot,
    devices: &effects_core::Leaf<Vec<String>>,
    select_devices: &effects_core::Derived<Vec<String>>,
) -> Result<(), effects_core::LifecycleError> {
    println!("-- two consumers attach to `devices`");
    let (first_value, first) = root.subscribe(devices)?;
    let (_, second) = root.subscribe(devices)?;
    println!("   first consumer read {first_value:?}");
    first.release();
    second.release();
    runtime.run_for(GRACE_PERIOD * 2);

    println!("-- a screen shows `select_devices`, then is rebuilt 100ms later");
    let screen = root.consumer_scope();
    for _ in 0..3 {
        let shown = screen.use_node(select_devices)?;
        println!("   screen shows {shown:?}");
    }
    screen.dispose();
    runtime.run_for(Duration::from_millis(100));

    let rebuilt = root.consumer_scope();
    let shown = rebuilt.use_node(select_devices)?;
    println!("   rebuilt screen shows {shown:?} without remounting");

    println!("-- the rebuilt screen adds a device by hand");
    let (_, set_devices) = rebuilt.use_state(devices)?;
    set_devices.update(|current| {
        let mut next = current.clone();
        next.push("printer-3".into());
        next
    });
    println!("   screen shows {:?}", rebuilt.use_node(select_devices)?);

    println!("-- the rebuilt screen closes");
    let scheduler = runtime.scheduler();
    scheduler.take_wakeup();
    rebuilt.dispose();
    if let Some(deadline) = scheduler.take_wakeup() {
        println!("   host asked to wake up at t={deadline}ms");
    }
    let executed = runtime.run_until_idle();
    println!("   {executed} delayed unmount(s) ran");
    Ok(())
}
