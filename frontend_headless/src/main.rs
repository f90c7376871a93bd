mod settings;

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use enginelink_core::engine::{EngineState, Scene};
use enginelink_core::rpc::{CapacityPolicy, DrainReport, HandlerRegistry, RpcServer};
use enginelink_core::tickable::{Tickable, Ticks};
use log::*;

use settings::HostSettings;

/// Interval between periodic statistics lines
const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(
    about = "EngineLink headless host - runs an in-memory scene controllable over TCP",
    long_about = None)]
struct Args {
    /// Settings file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Main-thread invocations executed per tick at most
    #[arg(long)]
    budget: Option<usize>,

    /// Main loop frequency in Hz
    #[arg(long)]
    tick_rate: Option<u32>,

    /// Client connection limit
    #[arg(long)]
    max_connections: Option<usize>,

    /// Close the oldest client instead of rejecting new ones when full
    #[arg(long)]
    evict_oldest: bool,

    /// Start without a loaded world
    #[arg(long)]
    no_world: bool,

    /// Exit after this many ticks
    #[arg(long)]
    ticks: Option<Ticks>,

    /// Write the effective settings to this file and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

impl Args {
    fn settings(&self) -> Result<HostSettings> {
        let mut settings = match &self.config {
            Some(path) => HostSettings::load(path)?,
            None => HostSettings::default(),
        };

        if let Some(host) = &self.host {
            settings.rpc.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.rpc.port = port;
        }
        if let Some(budget) = self.budget {
            settings.rpc.max_invocations_per_tick = budget;
        }
        if let Some(rate) = self.tick_rate {
            settings.tick_rate_hz = rate;
        }
        if let Some(max) = self.max_connections {
            settings.rpc.max_connections = max;
        }
        if self.evict_oldest {
            settings.rpc.capacity_policy = CapacityPolicy::EvictOldest;
        }

        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Default)]
struct Stats {
    executed: usize,
    failed: usize,
    discarded: usize,
}

impl Stats {
    fn add(&mut self, report: &DrainReport) {
        self.executed += report.executed;
        self.failed += report.failed;
        self.discarded += report.discarded;
    }
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let settings = args.settings()?;

    if let Some(path) = &args.dump_config {
        settings.save(path)?;
        info!("Settings written to {}", path.display());
        return Ok(());
    }

    let mut scene = if args.no_world {
        Scene::without_world()
    } else {
        Scene::new()
    };

    let mut server = RpcServer::start(settings.rpc.clone(), HandlerRegistry::with_builtin_commands())?;
    info!(
        "{} commands registered, ticking at {} Hz",
        server.registry().len(),
        settings.tick_rate_hz
    );

    let period = Duration::from_secs(1) / settings.tick_rate_hz;
    let mut stats = Stats::default();
    let mut last_stats = Instant::now();

    loop {
        let tick_start = Instant::now();

        scene.tick(1)?;
        let report = server.bridge().drain(&mut scene);
        if report.executed > 0 {
            debug!(
                "Tick {}: executed {} ({} failed, {} discarded), {} deferred",
                scene.current_tick(),
                report.executed,
                report.failed,
                report.discarded,
                report.deferred
            );
        }
        stats.add(&report);

        if last_stats.elapsed() >= STATS_INTERVAL {
            info!(
                "Tick {}: {} actor(s), {} client(s), {} invocation(s) executed ({} failed, {} discarded)",
                scene.current_tick(),
                scene.actor_count(),
                server.connections().len(),
                stats.executed,
                stats.failed,
                stats.discarded
            );
            last_stats = Instant::now();
        }

        if args.ticks.is_some_and(|t| scene.current_tick() >= t) {
            break;
        }

        if let Some(remaining) = period.checked_sub(tick_start.elapsed()) {
            thread::sleep(remaining);
        }
    }

    server.stop();
    info!("Host exiting after {} ticks", scene.current_tick());
    Ok(())
}
