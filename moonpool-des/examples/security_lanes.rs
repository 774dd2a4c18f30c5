//! Security Lanes Example - routing travelers across screening lanes.
//!
//! Travelers arrive on a fixed schedule, pick the least occupied lane and
//! hold it while being screened. Lane A breaks down for a while, so its
//! capacity drops to zero and the queue shifts to the other lanes.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p moonpool-des --example security_lanes
//! RUST_LOG=moonpool_des=debug cargo run -p moonpool-des --example security_lanes
//! ```

use std::{cell::RefCell, rc::Rc};

use moonpool_des::{
    LeastOccupied, ProcessContext, RunState, SelectorConfig, SimWorld, SimulationConfig,
    SimulationError, SimulationResult,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCREENING_TIME: f64 = 4.0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let mut sim = SimWorld::with_config(SimulationConfig {
        horizon: Some(120.0),
        ..Default::default()
    })?;

    let lanes = vec![
        sim.create_resource("lane-a", 1)?,
        sim.create_resource("lane-b", 1)?,
        sim.create_resource("lane-c", 1)?,
    ];
    let selector = Rc::new(LeastOccupied::from(SelectorConfig {
        visibility_threshold: 4,
    }));
    let turned_away = Rc::new(RefCell::new(Vec::new()));

    let arrivals = std::iter::repeat_n(1.5, 24);
    {
        let lanes = lanes.clone();
        let turned_away = turned_away.clone();
        sim.spawn_recurring("traveler", arrivals, move |ctx: ProcessContext| {
            let lanes = lanes.clone();
            let selector = selector.clone();
            let turned_away = turned_away.clone();
            async move {
                let choice = ctx
                    .world()
                    .upgrade()?
                    .select_resource(selector.as_ref(), &lanes)?;
                let Some(lane) = choice else {
                    turned_away.borrow_mut().push(ctx.name()?);
                    return Ok(());
                };
                ctx.set_tag("lane", lane.name()?)?;
                let _screening = ctx.hold(&lane, 1, 0).await?;
                ctx.advance(SCREENING_TIME).await
            }
        })?;
    }

    let lane_a = lanes[0].clone();
    sim.schedule_at(10.0, move |_| {
        info!("lane-a out of service");
        if let Err(e) = lane_a.set_capacity(0) {
            warn!(error = %e, "could not close lane-a");
        }
    })?;
    let lane_a = lanes[0].clone();
    sim.schedule_at(22.0, move |_| {
        info!("lane-a back in service");
        if let Err(e) = lane_a.set_capacity(1) {
            warn!(error = %e, "could not reopen lane-a");
        }
    })?;

    let state = sim.run()?;
    if state != RunState::Drained {
        return Err(SimulationError::InvalidState(format!(
            "lanes did not clear before the horizon ({state:?})"
        ))
        .into());
    }

    let snapshots = lanes
        .iter()
        .map(|lane| lane.snapshot())
        .collect::<SimulationResult<Vec<_>>>()?;
    let summary = serde_json::json!({
        "lanes": snapshots,
        "turned_away": *turned_away.borrow(),
        "metrics": sim.extract_metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
