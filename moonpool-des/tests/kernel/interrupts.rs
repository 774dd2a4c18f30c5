use futures::future::{Either, select};
use moonpool_des::{ProcessStatus, SimWorld, SimulationError, SimulationResult};

use crate::{Log, init_tracing, log};

#[test]
fn interrupt_withdraws_waiting_request_once() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let outcome: Log<(SimulationResult<()>, f64)> = log();

    let d = desk.clone();
    sim.spawn("holder", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        ctx.advance(5.0).await?;
        ctx.release(&d)
    })
    .unwrap();

    let (d, o) = (desk.clone(), outcome.clone());
    let waiter = sim
        .spawn("waiter", move |ctx| async move {
            let result = ctx.acquire(&d, 0).await;
            o.borrow_mut().push((result, ctx.now()?.as_f64()));
            Ok(())
        })
        .unwrap();

    let flags: Log<bool> = log();
    let f = flags.clone();
    sim.schedule_at(1.0, move |world| {
        f.borrow_mut().push(world.interrupt(waiter));
        f.borrow_mut().push(world.interrupt(waiter));
    })
    .unwrap();

    sim.run().unwrap();
    assert_eq!(*flags.borrow(), vec![true, false]);

    let outcome = outcome.borrow();
    assert_eq!(outcome.len(), 1);
    assert_eq!(
        outcome[0],
        (Err(SimulationError::Interrupted { process: waiter }), 1.0)
    );
    assert!(outcome[0].0.as_ref().unwrap_err().is_interrupted());
    assert_eq!(desk.holds(waiter).unwrap(), 0);
    let snap = desk.snapshot().unwrap();
    assert_eq!(snap.in_use, 0);
    assert_eq!(snap.waiting, 0);
    assert_eq!(snap.total_grants, 1);
}

#[test]
fn grant_in_flight_wins_over_interrupt() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let outcome: Log<SimulationResult<()>> = log();

    let (d, o) = (desk.clone(), outcome.clone());
    let waiter = sim
        .spawn_in(0.5, "waiter", move |ctx| async move {
            let result = ctx.acquire(&d, 0).await;
            let granted = result.is_ok();
            o.borrow_mut().push(result);
            if granted {
                ctx.release(&d)?;
            }
            Ok(())
        })
        .unwrap();

    let flags: Log<bool> = log();
    let (d, f) = (desk.clone(), flags.clone());
    sim.spawn("holder", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        ctx.advance(2.0).await?;
        ctx.release(&d)?;
        // The waiter has been granted but has not run yet.
        f.borrow_mut().push(ctx.interrupt(waiter)?);
        Ok(())
    })
    .unwrap();

    sim.run().unwrap();
    assert_eq!(*flags.borrow(), vec![false]);
    assert_eq!(*outcome.borrow(), vec![Ok(())]);
    assert_eq!(desk.snapshot().unwrap().in_use, 0);
}

#[test]
fn interrupted_waiter_may_retry() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let attempts: Log<(u32, f64)> = log();

    let d = desk.clone();
    sim.spawn("holder", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        ctx.advance(4.0).await?;
        ctx.release(&d)
    })
    .unwrap();

    let (d, a) = (desk.clone(), attempts.clone());
    let retrier = sim
        .spawn("retrier", move |ctx| async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match ctx.acquire(&d, 0).await {
                    Ok(()) => break,
                    Err(e) if e.is_interrupted() => {
                        a.borrow_mut().push((attempt, ctx.now()?.as_f64()));
                        ctx.advance(0.5).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            a.borrow_mut().push((attempt, ctx.now()?.as_f64()));
            ctx.release(&d)
        })
        .unwrap();

    sim.schedule_at(1.0, move |world| {
        world.interrupt(retrier);
    })
    .unwrap();

    sim.run().unwrap();
    assert_eq!(*attempts.borrow(), vec![(1, 1.0), (2, 4.0)]);
}

#[test]
fn advance_is_not_interruptible() {
    init_tracing();
    let mut sim = SimWorld::new();
    let woke: Log<f64> = log();

    let w = woke.clone();
    let sleeper = sim
        .spawn("sleeper", move |ctx| async move {
            ctx.advance(5.0).await?;
            w.borrow_mut().push(ctx.now()?.as_f64());
            Ok(())
        })
        .unwrap();

    let flags: Log<bool> = log();
    let f = flags.clone();
    sim.schedule_at(1.0, move |world| f.borrow_mut().push(world.interrupt(sleeper)))
        .unwrap();

    sim.run().unwrap();
    assert_eq!(*flags.borrow(), vec![false]);
    assert_eq!(*woke.borrow(), vec![5.0]);
}

#[test]
fn pause_until_resumed_or_interrupted() {
    init_tracing();
    let mut sim = SimWorld::new();
    let outcome: Log<(&'static str, SimulationResult<()>, f64)> = log();

    let o = outcome.clone();
    let resumed = sim
        .spawn("resumed", move |ctx| async move {
            let result = ctx.pause().await;
            o.borrow_mut().push(("resumed", result, ctx.now()?.as_f64()));
            Ok(())
        })
        .unwrap();

    let o = outcome.clone();
    let interrupted = sim
        .spawn("interrupted", move |ctx| async move {
            let result = ctx.pause().await;
            o.borrow_mut().push(("interrupted", result, ctx.now()?.as_f64()));
            Ok(())
        })
        .unwrap();

    sim.run().unwrap();
    assert_eq!(sim.process_status(resumed), Some(ProcessStatus::Suspended));
    assert!(outcome.borrow().is_empty());
    assert!(sim.resume(resumed));

    sim.schedule_in(2.0, move |world| {
        world.interrupt(interrupted);
    })
    .unwrap();
    sim.run().unwrap();

    assert_eq!(
        *outcome.borrow(),
        vec![
            ("resumed", Ok(()), 0.0),
            (
                "interrupted",
                Err(SimulationError::Interrupted {
                    process: interrupted
                }),
                2.0
            ),
        ]
    );
    assert!(!sim.resume(resumed));
}

#[test]
fn abandoned_grant_passes_to_next_waiter() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let served: Log<(&'static str, f64)> = log();

    let d = desk.clone();
    sim.spawn("holder", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        ctx.advance(1.0).await?;
        ctx.release(&d)
    })
    .unwrap();

    // The release at t=1 grants the desk to this process, but its timeout
    // fires at the same instant and the grant is never observed.
    let (d, s) = (desk.clone(), served.clone());
    let impatient = sim
        .spawn("impatient", move |ctx| async move {
            let outcome = select(Box::pin(ctx.advance(1.0)), Box::pin(ctx.acquire(&d, 0))).await;
            let timed_out = matches!(outcome, Either::Left(_));
            drop(outcome);
            if timed_out {
                s.borrow_mut().push(("timeout", ctx.now()?.as_f64()));
            } else {
                ctx.release(&d)?;
            }
            Ok(())
        })
        .unwrap();

    let (d, s) = (desk.clone(), served.clone());
    sim.spawn("patient", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        s.borrow_mut().push(("patient", ctx.now()?.as_f64()));
        ctx.release(&d)
    })
    .unwrap();

    sim.run().unwrap();
    assert_eq!(*served.borrow(), vec![("timeout", 1.0), ("patient", 1.0)]);
    assert_eq!(desk.holds(impatient).unwrap(), 0);
    let snap = desk.snapshot().unwrap();
    assert_eq!(snap.in_use, 0);
    assert_eq!(snap.waiting, 0);
    assert_eq!(snap.total_grants, 3);
}

#[test]
fn dropped_pending_request_leaves_the_line() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let gave_up: Log<f64> = log();

    let d = desk.clone();
    sim.spawn("holder", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        ctx.advance(5.0).await?;
        ctx.release(&d)
    })
    .unwrap();

    let (d, g) = (desk.clone(), gave_up.clone());
    sim.spawn("impatient", move |ctx| async move {
        let outcome = select(Box::pin(ctx.advance(1.0)), Box::pin(ctx.acquire(&d, 0))).await;
        if let Either::Left((result, pending)) = outcome {
            drop(pending);
            result?;
            g.borrow_mut().push(ctx.now()?.as_f64());
        }
        Ok(())
    })
    .unwrap();

    sim.run_for(2.0).unwrap();
    assert_eq!(*gave_up.borrow(), vec![1.0]);
    assert!(desk.waiting_processes().unwrap().is_empty());
    assert_eq!(desk.snapshot().unwrap().waiting, 0);

    sim.run().unwrap();
    let snap = desk.snapshot().unwrap();
    assert_eq!(snap.in_use, 0);
    assert_eq!(snap.total_grants, 1);
}
