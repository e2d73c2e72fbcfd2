//! `play`: stream a demo effect to the selected entertainment area.
//!
//! A base color covers every light while bursts expand from alternating
//! corners of the room.

use std::time::Duration;

use hueflux_core::{
    Area, Color, ConnectionResult, Controller, Effect, EffectId, Location, StreamStatsSnapshot,
};
use serde::Serialize;

use crate::cli::{GlobalOpts, PlayArgs};
use crate::error::CliError;
use crate::output;

use super::util::{self, FeedbackPrinter};

const BASE: &str = "base";
const BURST: &str = "burst";
const BURST_RADIUS: f64 = 1.6;

const BURST_ORIGINS: [Location; 4] = [
    Location::new(-1.0, 1.0, 0.0),
    Location::new(1.0, -1.0, 0.0),
    Location::new(1.0, 1.0, 0.0),
    Location::new(-1.0, -1.0, 0.0),
];

#[derive(Debug, Serialize)]
struct PlayReport {
    area: String,
    seconds: f64,
    bursts: u64,
    frames_sent: u64,
    frames_skipped: u64,
    send_errors: u64,
}

fn report_detail(r: &PlayReport) -> String {
    output::detail_lines(&[
        ("Area", r.area.clone()),
        ("Duration", format!("{:.1}s", r.seconds)),
        ("Bursts", r.bursts.to_string()),
        ("Frames sent", r.frames_sent.to_string()),
        ("Frames skipped", r.frames_skipped.to_string()),
        ("Send errors", r.send_errors.to_string()),
    ])
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: PlayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (resolved, controller) = util::controller(global, Some(false)).await?;
    let address = util::first_use_address(&controller, &resolved.profile);
    util::connect_and_wait(&controller, address, false, args.group.is_some(), global).await?;

    let printer = FeedbackPrinter::attach(controller.feedback(), global);
    let result = play(&controller, &args).await;
    let reason = printer.detach().await;
    if let Err(CliError::Stream { message }) = &result {
        tracing::warn!(%message, "streaming ended early");
        if let Some(reason) = reason {
            tracing::debug!(id = %reason.id, "last feedback: {}", reason.debug_message);
        }
    }

    let report = result?;
    let out = output::render_single(&global.output, &report, report_detail, |r| {
        r.frames_sent.to_string()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn play(controller: &Controller, args: &PlayArgs) -> Result<PlayReport, CliError> {
    if let Some(group) = &args.group {
        let state = controller.select_group(group).await?;
        util::require_ready(state, None)?;
    }
    controller.start().await?;
    let started = tokio::time::Instant::now();
    // Stops the stream if the bridge goes away or another app takes over.
    let monitor = controller.monitor()?;

    let mixer = controller.mixer();
    mixer.lock().add_effect(Effect::area(
        BASE,
        0,
        vec![Area::ALL],
        args.color.with_alpha(0.7),
    ));

    let outcome = drive(controller, args).await;
    monitor.stop().await;

    let stats = controller.stream_stats().unwrap_or_default();
    controller.stop().await?;
    {
        let mut guard = mixer.lock();
        guard.remove_effect(&EffectId::from(BASE));
        guard.remove_effect(&EffectId::from(BURST));
    }

    let bursts = outcome?;
    let area = controller
        .bridge()
        .selected_group()
        .map(|g| g.name.clone())
        .unwrap_or_default();
    Ok(report(area, started.elapsed(), bursts, stats))
}

/// Add bursts until the time is up, Ctrl-C is pressed or the stream dies.
async fn drive(controller: &Controller, args: &PlayArgs) -> Result<u64, CliError> {
    let mixer = controller.mixer();
    let mut state = controller.watch_state();
    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(deadline, ctrl_c);
    let mut bursts = tokio::time::interval(args.burst_every);
    let mut count = 0u64;

    loop {
        tokio::select! {
            () = &mut deadline => return Ok(count),
            _ = &mut ctrl_c => return Ok(count),
            changed = state.changed() => {
                let current = *state.borrow_and_update();
                if changed.is_err() || current != ConnectionResult::Streaming {
                    return Err(CliError::Stream {
                        message: format!("stream left Streaming (now {current})"),
                    });
                }
            }
            _ = bursts.tick() => {
                let origin = burst_origin(count);
                // Replacing the previous burst restarts it at the new origin.
                mixer.lock().add_effect(Effect::explosion(
                    BURST,
                    1,
                    origin,
                    Color::WHITE,
                    BURST_RADIUS,
                    args.burst_every,
                ));
                count += 1;
            }
        }
    }
}

fn burst_origin(n: u64) -> Location {
    let i = usize::try_from(n % 4).unwrap_or_default();
    BURST_ORIGINS.get(i).copied().unwrap_or_default()
}

fn report(area: String, elapsed: Duration, bursts: u64, stats: StreamStatsSnapshot) -> PlayReport {
    PlayReport {
        area,
        seconds: elapsed.as_secs_f64(),
        bursts,
        frames_sent: stats.frames_sent,
        frames_skipped: stats.frames_skipped,
        send_errors: stats.send_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_cycle_through_the_corners() {
        assert_eq!(burst_origin(0), BURST_ORIGINS[0]);
        assert_eq!(burst_origin(5), BURST_ORIGINS[1]);
        assert_eq!(burst_origin(7), BURST_ORIGINS[3]);
    }

    #[test]
    fn report_lists_stream_counters() {
        let stats = StreamStatsSnapshot {
            frames_sent: 500,
            frames_skipped: 2,
            send_errors: 0,
        };
        let r = report("Living room".into(), Duration::from_secs(10), 10, stats);
        let text = report_detail(&r);
        assert!(text.contains("Frames sent     500"));
        assert!(text.contains("Duration        10.0s"));
    }
}
