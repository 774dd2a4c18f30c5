use moonpool_des::{
    ProcessStatus, RunState, SimWorld, SimulationConfig, SimulationError, SimulationResult,
};

use crate::{Log, init_tracing, log};

fn jam(reason: &str) -> SimulationResult<()> {
    panic!("{reason}")
}

#[test]
fn error_escaping_a_process_aborts_the_run() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();

    let d = desk.clone();
    let clumsy = sim
        .spawn("clumsy", move |ctx| async move {
            ctx.advance(1.0).await?;
            ctx.release(&d)
        })
        .unwrap();

    let err = sim.run().unwrap_err();
    match err {
        SimulationError::ActorFault {
            process,
            name,
            message,
        } => {
            assert_eq!(process, clumsy);
            assert_eq!(name, "clumsy");
            assert!(message.contains("does not hold"), "message: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(sim.run_state(), RunState::Stopped);
    assert_eq!(sim.process_status(clumsy), Some(ProcessStatus::Terminated));
    assert_eq!(sim.extract_metrics().faults, 1);
}

#[test]
fn panic_is_reported_and_other_processes_continue() {
    init_tracing();
    let mut sim = SimWorld::new();
    let ticks: Log<f64> = log();

    let faulty = sim
        .spawn_in(1.0, "faulty", |_ctx| async move { jam("conveyor jammed") })
        .unwrap();

    let t = ticks.clone();
    sim.spawn("steady", move |ctx| async move {
        for _ in 0..3 {
            ctx.advance(1.0).await?;
            t.borrow_mut().push(ctx.now()?.as_f64());
        }
        Ok(())
    })
    .unwrap();

    let err = sim.run().unwrap_err();
    assert_eq!(
        err,
        SimulationError::ActorFault {
            process: faulty,
            name: "faulty".into(),
            message: "conveyor jammed".into(),
        }
    );
    assert_eq!(sim.now(), 1.0);
    assert!(ticks.borrow().is_empty());

    assert_eq!(sim.run().unwrap(), RunState::Drained);
    assert_eq!(*ticks.borrow(), vec![1.0, 2.0, 3.0]);
    assert_eq!(sim.process_status(faulty), Some(ProcessStatus::Terminated));
}

#[test]
fn faulted_holder_frees_its_unit() {
    init_tracing();
    let mut sim = SimWorld::new();
    let desk = sim.create_resource("desk", 1).unwrap();
    let served: Log<f64> = log();

    let d = desk.clone();
    sim.spawn("broken", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        ctx.advance(2.0).await?;
        Err(SimulationError::InvalidState("scanner offline".into()))
    })
    .unwrap();

    let (d, s) = (desk.clone(), served.clone());
    sim.spawn("next", move |ctx| async move {
        ctx.acquire(&d, 0).await?;
        s.borrow_mut().push(ctx.now()?.as_f64());
        ctx.release(&d)
    })
    .unwrap();

    assert!(matches!(
        sim.run(),
        Err(SimulationError::ActorFault { ref message, .. }) if message.contains("scanner offline")
    ));
    sim.run().unwrap();
    assert_eq!(*served.borrow(), vec![2.0]);
}

#[test]
#[should_panic(expected = "unguarded")]
fn panics_propagate_when_capture_is_disabled() {
    let mut sim = SimWorld::with_config(SimulationConfig {
        catch_panics: false,
        ..Default::default()
    })
    .unwrap();
    sim.spawn("raw", |_ctx| async move { jam("unguarded") })
        .unwrap();
    let _ = sim.run();
}
