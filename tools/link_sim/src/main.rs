mod trace;
mod world;

use std::{fs, path::PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use iotlink::{
    BeginOutcome, BusEndpoint, ConnectionStats, Orchestrator, PortalIdentity, RestartReason,
};
use tracing_subscriber::{fmt, EnvFilter};

use trace::TraceAction;
use world::{SharedWorld, SimBus, SimClock, SimDevice, SimLink, SimPortal, SimStore, World};

type SimOrchestrator = Orchestrator<SimStore, SimLink, SimBus, SimPortal, SimDevice, SimClock>;

#[derive(Debug, Parser)]
#[command(name = "link_sim")]
#[command(about = "Replays a link/bus/portal trace against the connection orchestrator")]
struct Cli {
    trace: PathBuf,
    /// Boot with a confirmed profile already in flash.
    #[arg(long)]
    stored: bool,
    #[arg(long = "until-ms", default_value_t = 60_000)]
    until_ms: u64,
    #[arg(long = "max-restarts", default_value_t = 3)]
    max_restarts: u32,
}

enum RunEnd {
    Finished,
    Restarted(RestartReason),
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    run(cli)
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .without_time()
        .try_init()
        .map_err(|err| anyhow!(err))
}

fn run(cli: Cli) -> Result<()> {
    let text = fs::read_to_string(&cli.trace)
        .with_context(|| format!("reading {}", cli.trace.display()))?;
    let events = trace::parse_trace(&text)?;
    let stored = if cli.stored {
        Some(world::sample_profile().ok_or_else(|| anyhow!("sample profile does not fit"))?)
    } else {
        None
    };
    let world = World::shared(events, stored, cli.until_ms);
    let endpoint = BusEndpoint::from_build_env().unwrap_or(BusEndpoint::new("broker.sim", 1883));

    let mut restarts = 0u32;
    loop {
        let mut orchestrator = boot(&world, endpoint);
        let end = match orchestrator.begin(PortalIdentity::default()) {
            BeginOutcome::Restarting(reason) => RunEnd::Restarted(reason),
            BeginOutcome::Ready => {
                stamp(&world, &format!("ready client_id={}", orchestrator.client_id()));
                drive(&world, &mut orchestrator, cli.until_ms)
            }
        };
        match end {
            RunEnd::Finished => {
                print_stats(&orchestrator.stats());
                return Ok(());
            }
            RunEnd::Restarted(reason) => {
                stamp(&world, &format!("device restart reason={}", reason.as_str()));
                restarts += 1;
                if restarts > cli.max_restarts {
                    bail!("gave up after {} restarts", restarts);
                }
                world.borrow_mut().reboot();
            }
        }
    }
}

fn boot(world: &SharedWorld, endpoint: BusEndpoint) -> SimOrchestrator {
    let mut orchestrator = Orchestrator::new(
        SimStore(world.clone()),
        SimLink(world.clone()),
        SimBus(world.clone()),
        SimPortal(world.clone()),
        SimDevice(world.clone()),
        SimClock(world.clone()),
        endpoint,
    );

    let clock = world.clone();
    orchestrator.on_connection_change(move |up| {
        stamp(&clock, if up { "connection up" } else { "connection down" });
    });
    let clock = world.clone();
    orchestrator.on_message(move |topic, payload| {
        stamp(
            &clock,
            &format!(
                "message topic={} payload={}",
                topic,
                String::from_utf8_lossy(payload)
            ),
        );
    });
    orchestrator
}

fn drive(world: &SharedWorld, orchestrator: &mut SimOrchestrator, until_ms: u64) -> RunEnd {
    let mut mode = orchestrator.mode();
    while world.borrow().now_ms() < until_ms {
        let actions = world.borrow_mut().take_app_actions();
        for action in actions {
            apply_app_action(world, orchestrator, action);
        }

        let wait = orchestrator.tick();
        if orchestrator.mode() != mode {
            mode = orchestrator.mode();
            stamp(world, &format!("mode {}", mode.as_str()));
        }
        if let Some(reason) = world.borrow_mut().take_restart() {
            return RunEnd::Restarted(reason);
        }
        world.borrow_mut().idle(wait);
    }
    RunEnd::Finished
}

fn apply_app_action(world: &SharedWorld, orchestrator: &mut SimOrchestrator, action: TraceAction) {
    match action {
        TraceAction::ResetConfig => {
            stamp(world, "app reset-config");
            orchestrator.reset_config();
        }
        TraceAction::Publish { topic, payload } => {
            match orchestrator.publish(&topic, payload.as_bytes(), false) {
                Ok(()) => stamp(world, &format!("app publish ok topic={topic}")),
                Err(err) => stamp(
                    world,
                    &format!("app publish refused topic={} err={}", topic, err.as_str()),
                ),
            }
        }
        _ => {}
    }
}

fn stamp(world: &SharedWorld, message: &str) {
    println!("[{:>7} ms] {}", world.borrow().now_ms(), message);
}

fn print_stats(stats: &ConnectionStats) {
    println!("-- stats");
    println!(
        "link connects={} failures={} reconnect_kicks={}",
        stats.link_connect_attempts, stats.link_connect_failures, stats.link_reconnect_kicks
    );
    println!(
        "bus connects={} failures={} gate_rejections={}",
        stats.bus_connect_attempts, stats.bus_connect_failures, stats.gate_rejections
    );
    println!(
        "notifications up={} down={} reprovisions={} restarts={}",
        stats.notifications_up,
        stats.notifications_down,
        stats.reprovisions,
        stats.restarts_requested
    );
}
