use std::{sync::Arc, time::Duration};

use {
    anyhow::{Result, bail},
    ebike_flow_api::{ActivitySummary, BikeSnapshot},
    ebike_flow_poller::{
        Availability, BikeStatusSource, Coordinator, CoordinatorStatus, PollExit, PollState,
    },
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use crate::context::AppContext;

pub async fn list_bikes(ctx: &AppContext, json: bool) -> Result<()> {
    let bikes = ctx.api.list_bikes().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&bikes)?);
        return Ok(());
    }
    if bikes.is_empty() {
        println!("No bikes registered on this account.");
    }
    for bike in &bikes {
        println!("{}  {}", bike.id, bike.display_name());
    }
    Ok(())
}

pub async fn show_status(
    ctx: &AppContext,
    bike: Option<String>,
    no_live: bool,
    json: bool,
) -> Result<()> {
    let bike_id = ctx.resolve_bike(bike).await?;
    let include_live = ctx.config.poll.include_live && !no_live;
    let snapshot = ctx.api.fetch_snapshot(&bike_id, include_live).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

pub async fn watch(ctx: &AppContext, bike: Option<String>, interval: Option<u64>) -> Result<()> {
    let bike_id = ctx.resolve_bike(bike).await?;
    let interval = interval.map_or_else(|| ctx.config.poll.interval(), Duration::from_secs);
    let source = BikeStatusSource::new(Arc::clone(&ctx.api), bike_id.clone())
        .with_live_data(ctx.config.poll.include_live);
    let coordinator = Arc::new(Coordinator::new(source, interval));

    let mut updates = coordinator.subscribe();
    let cancel = CancellationToken::new();
    let mut handle = Arc::clone(&coordinator).spawn(cancel.clone());
    info!(bike_id = %bike_id, interval_secs = interval.as_secs(), "watching bike, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            },
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                print_update(&status);
            },
            exit = &mut handle => {
                return match exit? {
                    PollExit::NeedsReconfiguration => {
                        bail!("session is no longer valid, run `ebike-flow auth login`")
                    },
                    PollExit::Cancelled => Ok(()),
                };
            },
        }
    }

    handle.await?;
    Ok(())
}

pub async fn activities(ctx: &AppContext, bike: Option<String>, all: bool, json: bool) -> Result<()> {
    let bike_id = ctx.resolve_bike(bike).await?;
    let activities = if all {
        ctx.api.all_activities(&bike_id).await?
    } else {
        ctx.api.recent_activities(&bike_id).await?
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&activities)?);
        return Ok(());
    }
    if activities.is_empty() {
        println!("No activities recorded for {bike_id}.");
    }
    for activity in &activities {
        println!("{}", format_activity(activity));
    }
    Ok(())
}

fn print_update(status: &CoordinatorStatus) {
    match (status.state, status.availability) {
        (PollState::Polling, _) => {},
        (_, Availability::NeedsReconfiguration) => {
            println!("Polling halted: {}", status.last_error.as_deref().unwrap_or("authentication lost"));
        },
        _ if status.consecutive_failures > 0 => {
            println!(
                "Poll failed ({} in a row): {}",
                status.consecutive_failures,
                status.last_error.as_deref().unwrap_or("unknown error")
            );
        },
        _ => {
            if let Some(snapshot) = &status.snapshot {
                print_snapshot(snapshot);
            }
        },
    }
}

fn print_snapshot(s: &BikeSnapshot) {
    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

    println!("Bike {}", s.bike_id);
    println!(
        "  Battery:      {}{}",
        or_dash(s.battery_level.map(|l| format!("{l:.0}%"))),
        match (s.charging, s.charger_connected) {
            (Some(true), _) => " (charging)",
            (_, Some(true)) => " (charger connected)",
            _ => "",
        }
    );
    println!(
        "  Energy:       {} / {} Wh",
        or_dash(s.remaining_energy_wh.map(|e| format!("{e:.0}"))),
        or_dash(s.total_capacity_wh.map(|e| format!("{e:.0}")))
    );
    println!(
        "  Range:        {}",
        match (s.max_range_km(), s.min_range_km()) {
            (Some(max), Some(min)) => format!("{min}-{max} km"),
            _ => "-".to_string(),
        }
    );
    for estimate in &s.range_estimates {
        println!("    {:<8} {} km", estimate.mode, estimate.distance_km);
    }
    println!(
        "  Odometer:     {}",
        or_dash(s.odometer_km().map(|km| format!("{km:.2} km")))
    );
    println!(
        "  Charge cycles: {}",
        or_dash(s.charge_cycles.map(|c| format!("{c:.1}")))
    );
    println!(
        "  Locked:       {}",
        or_dash(s.lock.is_locked.map(|l| l.to_string()))
    );
    println!(
        "  Live data:    {}",
        match (s.live_data_available, s.last_update) {
            (true, Some(at)) => format!("yes, updated {}", at.format("%Y-%m-%d %H:%M UTC")),
            (true, None) => "yes".to_string(),
            (false, _) => "no (bike offline)".to_string(),
        }
    );
}

fn format_activity(activity: &ActivitySummary) -> String {
    let start = activity
        .start_time
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown start".to_string());
    let distance = activity
        .attributes
        .get("distance")
        .and_then(serde_json::Value::as_f64)
        .map(|m| format!("{:.2} km", m / 1000.0))
        .unwrap_or_default();
    format!("{}  {start}  {distance}", activity.id)
}
