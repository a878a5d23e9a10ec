#![forbid(unsafe_code)]

use std::env;
use std::ops::Range;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use drp_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "drp-sim",
    version,
    about = "Deterministic convergence simulator for DRP objects"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(
        about = "Simulate one seed and check every invariant",
        after_help = "EXAMPLES:\n    drp-sim run --seed 7\n    drp-sim run --seed 7 --trace"
    )]
    Run {
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Print the full event trace as JSON lines.
        #[arg(long)]
        trace: bool,
        #[command(flatten)]
        shape: Shape,
    },
    #[command(
        about = "Simulate a range of seeds and report the first failure",
        after_help = "EXAMPLES:\n    drp-sim campaign --seeds 0..100\n    \
                      drp-sim campaign --seeds 0..1000 --json"
    )]
    Campaign {
        /// Half-open seed range, `START..END`.
        #[arg(long, value_parser = parse_seed_range, default_value = "0..100")]
        seeds: Range<u64>,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        shape: Shape,
    },
}

#[derive(Args, Debug)]
struct Shape {
    #[arg(long, default_value_t = 4)]
    replicas: usize,
    #[arg(long, default_value_t = 24)]
    rounds: u64,
    #[arg(long, default_value_t = 2)]
    fanout: usize,
    /// Drop probability in percent.
    #[arg(long)]
    drop: Option<u8>,
    /// Partition toggle probability per round in percent.
    #[arg(long)]
    partition: Option<u8>,
}

impl Shape {
    fn campaign(&self, seeds: Range<u64>) -> CampaignConfig {
        let mut config = CampaignConfig {
            seed_range: seeds,
            replica_count: self.replicas,
            rounds: self.rounds,
            fanout: self.fanout,
            ..CampaignConfig::default()
        };
        if let Some(drop) = self.drop {
            config.fault.drop_rate_percent = drop;
        }
        if let Some(partition) = self.partition {
            config.fault.partition_rate_percent = partition;
        }
        config
    }
}

fn parse_seed_range(text: &str) -> Result<Range<u64>> {
    let (start, end) = text
        .split_once("..")
        .with_context(|| format!("expected START..END, got `{text}`"))?;
    let start: u64 = start.trim().parse().context("invalid range start")?;
    let end: u64 = end.trim().parse().context("invalid range end")?;
    if start >= end {
        bail!("seed range `{text}` is empty");
    }
    Ok(start..end)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DRP_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "drp_sim=debug,drp_core=debug,info"
        } else {
            "drp_sim=info,warn"
        })
    });

    let format = env::var("DRP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
        }
    }
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { seed, trace, shape } => {
            let config = shape.campaign(seed..seed.saturating_add(1));
            let run = replay_seed(seed, &config)?;
            if trace {
                for event in &run.result.trace {
                    println!("{}", serde_json::to_string(event)?);
                }
            }
            println!(
                "seed {seed}: events={} anti_entropy_passes={} interesting={} passed={}",
                run.result.trace.len(),
                run.result.anti_entropy_passes,
                run.result.interesting_state_reached,
                run.oracle.passed
            );
            for violation in &run.oracle.violations {
                println!("  {violation}");
            }
            Ok(if run.oracle.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Campaign { seeds, json, shape } => {
            let report = run_campaign(&shape.campaign(seeds))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "seeds run: {}  passed: {}  interesting: {}",
                    report.seeds_run, report.seeds_passed, report.interesting_states_reached
                );
                if let Some(seed) = report.first_failure {
                    println!(
                        "first failure: seed {seed} (replay with `drp-sim run --seed {seed}`)"
                    );
                }
                for failure in &report.failures {
                    for violation in &failure.violations {
                        println!("  seed {}: {violation}", failure.seed);
                    }
                }
            }
            Ok(if report.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
