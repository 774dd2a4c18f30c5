use moonpool_des::{LeastOccupied, SelectorConfig, SimWorld, SimulationError};

use crate::{Log, init_tracing, log};

#[test]
fn higher_priority_waiter_is_served_first() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let grants: Log<(&'static str, f64)> = log();

    let (d, g) = (desk.clone(), grants.clone());
    sim.spawn("P1", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        g.borrow_mut().push(("P1", ctx.now()?.as_f64()));
        ctx.advance(5.0).await?;
        ctx.release(&d)
    })
    .unwrap();

    for (name, priority, arrival) in [("P3", 0, 1.0), ("P2", 1, 2.0)] {
        let (d, g) = (desk.clone(), grants.clone());
        sim.spawn_in(arrival, name, move |ctx| async move {
            ctx.acquire(&d, priority).await?;
            g.borrow_mut().push((name, ctx.now()?.as_f64()));
            ctx.advance(1.0).await?;
            ctx.release(&d)
        })
        .unwrap();
    }

    sim.run().unwrap();
    assert_eq!(
        *grants.borrow(),
        vec![("P1", 0.0), ("P2", 5.0), ("P3", 6.0)]
    );
}

#[test]
fn release_grants_waiter_at_the_same_instant() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let times: Log<(&'static str, f64)> = log();

    let (d, t) = (desk.clone(), times.clone());
    sim.spawn("holder", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        ctx.advance(3.5).await?;
        ctx.release(&d)?;
        t.borrow_mut().push(("released", ctx.now()?.as_f64()));
        Ok(())
    })
    .unwrap();

    let (d, t) = (desk.clone(), times.clone());
    let waiter = sim
        .spawn("waiter", move |ctx| async move {
            ctx.acquire(&d, 0).await?;
            t.borrow_mut().push(("granted", ctx.now()?.as_f64()));
            ctx.release(&d)
        })
        .unwrap();

    sim.run_for(1.0).unwrap();
    assert_eq!(desk.waiting_processes().unwrap(), vec![waiter]);

    sim.run().unwrap();
    assert_eq!(
        *times.borrow(),
        vec![("released", 3.5), ("granted", 3.5)]
    );
    let snap = desk.snapshot().unwrap();
    assert_eq!(snap.in_use, 0);
    assert_eq!(snap.total_grants, 2);
}

#[test]
fn capacity_reduction_waits_for_holders() {
    init_tracing();
    let mut sim = SimWorld::new();
    let agents = sim.create_resource("agents", 2).unwrap();
    let times: Log<(&'static str, f64)> = log();

    for (name, service) in [("h1", 4.0), ("h2", 6.0)] {
        let (a, t) = (agents.clone(), times.clone());
        sim.spawn(name, move |ctx| async move {
            ctx.acquire(&a, 0).await?;
            ctx.advance(service).await?;
            t.borrow_mut().push((name, ctx.now()?.as_f64()));
            ctx.release(&a)
        })
        .unwrap();
    }

    let off_duty = agents.clone();
    sim.schedule_at(1.0, move |_| off_duty.set_capacity(1).unwrap())
        .unwrap();

    let (a, t) = (agents.clone(), times.clone());
    sim.spawn_in(1.5, "late", move |ctx| async move {
        ctx.acquire(&a, 0).await?;
        t.borrow_mut().push(("late", ctx.now()?.as_f64()));
        ctx.release(&a)
    })
    .unwrap();

    sim.run_for(5.0).unwrap();
    let snap = agents.snapshot().unwrap();
    assert_eq!(snap.capacity, 1);
    assert_eq!(snap.in_use, 1);
    assert_eq!(snap.waiting, 1);

    sim.run().unwrap();
    assert_eq!(
        *times.borrow(),
        vec![("h1", 4.0), ("h2", 6.0), ("late", 6.0)]
    );
}

#[test]
fn capacity_increase_grants_immediately() {
    init_tracing();
    let mut sim = SimWorld::new();
    let lane = sim.create_resource("lane", 1).unwrap();
    let times: Log<f64> = log();

    let l = lane.clone();
    sim.spawn("blocker", move |ctx| async move {
        ctx.acquire(&l, 0).await?;
        ctx.advance(100.0).await?;
        ctx.release(&l)
    })
    .unwrap();

    let (l, t) = (lane.clone(), times.clone());
    sim.spawn("traveler", move |ctx| async move {
        ctx.acquire(&l, 0).await?;
        t.borrow_mut().push(ctx.now()?.as_f64());
        ctx.release(&l)
    })
    .unwrap();

    let opened = lane.clone();
    sim.schedule_at(2.0, move |_| opened.set_capacity(2).unwrap())
        .unwrap();

    sim.run().unwrap();
    assert_eq!(*times.borrow(), vec![2.0]);
}

#[test]
fn outage_to_zero_and_back() {
    init_tracing();
    let mut sim = SimWorld::new();
    let belt = sim.create_resource("belt", 1).unwrap();
    let times: Log<f64> = log();

    let down = belt.clone();
    sim.schedule_at(0.0, move |_| down.set_capacity(0).unwrap())
        .unwrap();
    let up = belt.clone();
    sim.schedule_at(8.0, move |_| up.set_capacity(1).unwrap())
        .unwrap();

    let (b, t) = (belt.clone(), times.clone());
    sim.spawn_in(1.0, "parcel", move |ctx| async move {
        ctx.acquire(&b, 0).await?;
        t.borrow_mut().push(ctx.now()?.as_f64());
        ctx.release(&b)
    })
    .unwrap();

    sim.run().unwrap();
    assert_eq!(*times.borrow(), vec![8.0]);
}

#[test]
fn units_of_finished_process_are_reclaimed() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let times: Log<f64> = log();

    let d = desk.clone();
    let forgetful = sim
        .spawn("forgetful", move |ctx| async move {
            ctx.acquire(&d, 0).await?;
            ctx.advance(2.0).await
        })
        .unwrap();

    let (d, t) = (desk.clone(), times.clone());
    sim.spawn("patient", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        t.borrow_mut().push(ctx.now()?.as_f64());
        ctx.release(&d)
    })
    .unwrap();

    sim.run().unwrap();
    assert_eq!(*times.borrow(), vec![2.0]);
    assert_eq!(desk.holds(forgetful).unwrap(), 0);
    assert_eq!(desk.snapshot().unwrap().in_use, 0);
}

#[test]
fn selector_routes_to_least_occupied_belt() {
    init_tracing();
    let mut sim = SimWorld::new();
    let belts: Vec<_> = (0..3)
        .map(|n| sim.create_resource(format!("belt-{n}"), 1).unwrap())
        .collect();
    let routed: Log<String> = log();

    // Occupy belt 0 with a holder and a waiter, belt 1 with a holder.
    for (n, belt) in [(0, &belts[0]), (1, &belts[0]), (2, &belts[1])] {
        let b = belt.clone();
        sim.spawn(format!("parcel-{n}"), move |ctx| async move {
            ctx.acquire(&b, 0).await?;
            ctx.advance(10.0).await?;
            ctx.release(&b)
        })
        .unwrap();
    }

    let selector = LeastOccupied::from(SelectorConfig {
        visibility_threshold: 2,
    });
    let candidates = belts.clone();
    let r = routed.clone();
    sim.schedule_at(1.0, move |world| {
        let chosen = world.select_resource(&selector, &candidates).unwrap();
        if let Some(belt) = chosen {
            r.borrow_mut().push(belt.name().unwrap());
        }
        let saturated = world
            .select_resource(&selector, &candidates[..1])
            .unwrap();
        assert!(saturated.is_none());
    })
    .unwrap();

    sim.run().unwrap();
    assert_eq!(*routed.borrow(), vec!["belt-2".to_string()]);
}

#[test]
fn large_request_at_the_head_holds_back_the_line() {
    init_tracing();
    let mut sim = SimWorld::new();
    let bay = sim.create_resource("loading-bay", 3).unwrap();
    let grants: Log<(&'static str, f64)> = log();

    let (b, g) = (bay.clone(), grants.clone());
    sim.spawn("crew", move |ctx| async move {
        ctx.acquire_units(&b, 2, 0).await?;
        g.borrow_mut().push(("crew", ctx.now()?.as_f64()));
        ctx.advance(4.0).await?;
        ctx.release_units(&b, 2)
    })
    .unwrap();

    for (name, units, arrival) in [("truck", 3, 1.0), ("van", 1, 2.0)] {
        let (b, g) = (bay.clone(), grants.clone());
        sim.spawn_in(arrival, name, move |ctx| async move {
            ctx.acquire_units(&b, units, 0).await?;
            g.borrow_mut().push((name, ctx.now()?.as_f64()));
            ctx.advance(1.0).await?;
            ctx.release_units(&b, units)
        })
        .unwrap();
    }

    sim.run_for(3.0).unwrap();
    let snap = bay.snapshot().unwrap();
    assert_eq!(snap.in_use, 2);
    assert_eq!(snap.available(), 1);
    assert_eq!(snap.waiting, 2);

    sim.run().unwrap();
    assert_eq!(
        *grants.borrow(),
        vec![("crew", 0.0), ("truck", 4.0), ("van", 5.0)]
    );
    let snap = bay.snapshot().unwrap();
    assert_eq!(snap.in_use, 0);
    assert_eq!(snap.total_grants, 6);
}

#[test]
fn malformed_unit_counts_are_misuse() {
    init_tracing();
    let mut sim = SimWorld::new();
    let bay = sim.create_resource("loading-bay", 2).unwrap();
    let checks: Log<(&'static str, bool)> = log();

    let (b, c) = (bay.clone(), checks.clone());
    let worker = sim
        .spawn("worker", move |ctx| async move {
            let misuse = |result: Result<(), SimulationError>| {
                matches!(result, Err(SimulationError::ResourceMisuse { .. }))
            };
            let zero = ctx.acquire_units(&b, 0, 0).await;
            let too_many = ctx.acquire_units(&b, 3, 0).await;
            c.borrow_mut().push(("zero", misuse(zero)));
            c.borrow_mut().push(("too many", misuse(too_many)));

            ctx.acquire_units(&b, 2, 0).await?;
            let over = ctx.release_units(&b, 3);
            c.borrow_mut().push(("over-release", misuse(over)));
            c.borrow_mut().push(("still held", b.holds(ctx.id())? == 2));
            ctx.release_units(&b, 2)
        })
        .unwrap();

    sim.run().unwrap();
    assert_eq!(
        *checks.borrow(),
        vec![
            ("zero", true),
            ("too many", true),
            ("over-release", true),
            ("still held", true)
        ]
    );
    assert_eq!(bay.holds(worker).unwrap(), 0);
}

#[test]
fn requests_during_an_outage_wait_for_nominal_capacity() {
    init_tracing();
    let mut sim = SimWorld::new();
    let bay = sim.create_resource("loading-bay", 2).unwrap();
    bay.set_capacity(0).unwrap();
    let times: Log<f64> = log();

    let (b, t) = (bay.clone(), times.clone());
    sim.spawn("truck", move |ctx| async move {
        ctx.acquire_units(&b, 2, 0).await?;
        t.borrow_mut().push(ctx.now()?.as_f64());
        ctx.release_units(&b, 2)
    })
    .unwrap();

    let b = bay.clone();
    sim.schedule_at(3.0, move |_| b.set_capacity(2).unwrap())
        .unwrap();

    sim.run().unwrap();
    assert_eq!(*times.borrow(), vec![3.0]);
}

#[test]
fn hold_returns_units_on_drop_or_release() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 2).unwrap();
    let grants: Log<(&'static str, f64)> = log();

    let (d, g) = (desk.clone(), grants.clone());
    sim.spawn("scoped", move |ctx| async move {
        {
            let hold = ctx.hold(&d, 2, 0).await?;
            assert_eq!(hold.units(), 2);
            assert_eq!(hold.resource().id(), d.id());
            g.borrow_mut().push(("scoped", ctx.now()?.as_f64()));
            ctx.advance(2.0).await?;
        }
        ctx.advance(10.0).await
    })
    .unwrap();

    let (d, g) = (desk.clone(), grants.clone());
    sim.spawn_in(1.0, "explicit", move |ctx| async move {
        let hold = ctx.hold(&d, 2, 0).await?;
        g.borrow_mut().push(("explicit", ctx.now()?.as_f64()));
        ctx.advance(1.0).await?;
        hold.release()?;
        let again = ctx.release(&d);
        assert!(matches!(again, Err(SimulationError::ResourceMisuse { .. })));
        g.borrow_mut().push(("released", ctx.now()?.as_f64()));
        Ok(())
    })
    .unwrap();

    sim.run().unwrap();
    assert_eq!(
        *grants.borrow(),
        vec![("scoped", 0.0), ("explicit", 2.0), ("released", 3.0)]
    );
    let snap = desk.snapshot().unwrap();
    assert_eq!(snap.in_use, 0);
    assert_eq!(snap.total_grants, 4);
}

#[test]
fn hold_of_faulted_process_is_returned_once() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let served: Log<f64> = log();

    let d = desk.clone();
    let broken = sim
        .spawn("broken", move |ctx| async move {
            let _desk = ctx.hold(&d, 1, 0).await?;
            ctx.advance(1.0).await?;
            Err(SimulationError::InvalidState("printer jammed".into()))
        })
        .unwrap();

    let (d, s) = (desk.clone(), served.clone());
    sim.spawn("next", move |ctx| async move {
        let _desk = ctx.hold(&d, 1, 0).await?;
        s.borrow_mut().push(ctx.now()?.as_f64());
        ctx.advance(1.0).await
    })
    .unwrap();

    assert!(sim.run().is_err());
    assert_eq!(desk.holds(broken).unwrap(), 0);
    assert_eq!(desk.snapshot().unwrap().in_use, 1);

    sim.run().unwrap();
    assert_eq!(*served.borrow(), vec![1.0]);
    let snap = desk.snapshot().unwrap();
    assert_eq!(snap.in_use, 0);
    assert_eq!(snap.total_grants, 2);
}
