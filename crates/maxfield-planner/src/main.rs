//! Maxfield CLI.
//!
//! Generate portal scenarios and plan multi-agent field operations over them.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use field_kernel::{PlannerConfig, Portal, RouteObjective};
use maxfield_planner::{Planner, PlanReport, PortalScenario, PortalScenarioConfig};

#[derive(Parser)]
#[command(name = "maxfield")]
#[command(about = "Plan maximum-field operations for one or more agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random portal set as JSON.
    Generate {
        /// Size: small, medium, large
        #[arg(short, long, default_value = "medium")]
        size: String,
        /// Override the portal count of the size preset
        #[arg(short, long)]
        count: Option<usize>,
        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Fraction of portals with boosted outbound capacity
        #[arg(long)]
        boosted_fraction: Option<f64>,
        /// Output file (stdout when absent)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Plan an operation over a portal file.
    Plan {
        /// Portal list (JSON array of portals)
        #[arg(short, long)]
        portals: PathBuf,
        /// Planner configuration (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of agents
        #[arg(short, long)]
        agents: Option<usize>,
        /// Number of generator trials
        #[arg(short, long)]
        trials: Option<usize>,
        /// Worker threads for trials (0 = all available)
        #[arg(long)]
        parallelism: Option<usize>,
        /// Run seed
        #[arg(long)]
        seed: Option<u64>,
        /// Route objective: max_distance, total_distance
        #[arg(long)]
        objective: Option<String>,
        /// Candidate limit for the route solver
        #[arg(long)]
        route_candidates: Option<usize>,
        /// Time limit for the route solver (seconds)
        #[arg(long)]
        route_runtime: Option<u64>,
        /// Output file for the plan report (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_size(s: &str) -> PortalScenarioConfig {
    match s.to_lowercase().as_str() {
        "small" => PortalScenarioConfig::small(),
        "medium" => PortalScenarioConfig::medium(),
        "large" => PortalScenarioConfig::large(),
        _ => {
            eprintln!("Unknown size: {}. Using 'medium'.", s);
            PortalScenarioConfig::medium()
        }
    }
}

fn parse_objective(s: &str) -> Option<RouteObjective> {
    match s.to_lowercase().replace('-', "_").as_str() {
        "max_distance" | "maxdistance" => Some(RouteObjective::MaxDistance),
        "total_distance" | "totaldistance" => Some(RouteObjective::TotalDistance),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Generate {
            size,
            count,
            seed,
            boosted_fraction,
            output,
        } => {
            let mut config = parse_size(&size);
            if let Some(count) = count {
                config.count = count;
            }
            if let Some(fraction) = boosted_fraction {
                config.boosted_fraction = fraction.clamp(0.0, 1.0);
            }
            let portals = PortalScenario::new(config, seed).generate();
            let json = serde_json::to_string_pretty(&portals)?;

            match output {
                Some(output) => {
                    std::fs::create_dir_all(output.parent().unwrap_or(&PathBuf::from(".")))?;
                    std::fs::write(&output, json)?;
                    info!(portals = portals.len(), path = %output.display(), "Portal set written");
                }
                None => println!("{}", json),
            }
        }

        Commands::Plan {
            portals,
            config,
            agents,
            trials,
            parallelism,
            seed,
            objective,
            route_candidates,
            route_runtime,
            output,
        } => {
            let mut planner_config = match config {
                Some(path) => PlannerConfig::load(path)?,
                None => PlannerConfig::default(),
            };
            if let Some(agents) = agents {
                planner_config.agents = agents;
            }
            if let Some(trials) = trials {
                planner_config.trials = trials;
            }
            if let Some(parallelism) = parallelism {
                planner_config.parallelism = parallelism;
            }
            if seed.is_some() {
                planner_config.seed = seed;
            }
            if let Some(objective) = objective {
                planner_config.routing.objective = parse_objective(&objective)
                    .with_context(|| format!("unknown route objective: {}", objective))?;
            }
            if let Some(candidates) = route_candidates {
                planner_config.routing.max_candidates = candidates;
            }
            if let Some(secs) = route_runtime {
                planner_config.routing.time_budget_secs = secs;
            }

            let text = std::fs::read_to_string(&portals)
                .with_context(|| format!("reading portals {}", portals.display()))?;
            let portal_list: Vec<Portal> = serde_json::from_str(&text)
                .with_context(|| format!("parsing portals {}", portals.display()))?;

            let outcome = Planner::new(planner_config).run(portal_list).await?;
            let report = PlanReport::from_outcome(&outcome);

            println!("\n=== Plan Complete ===");
            println!("{}", report);

            println!("\nKeys:");
            for key in report.keys.iter().filter(|k| k.needed > 0) {
                println!(
                    "  {:<32} need {:>2}  have {:>2}  farm {:>2}",
                    key.name, key.needed, key.have, key.remaining
                );
            }

            println!("\nLinks:");
            for entry in &report.timeline {
                println!(
                    "  {:>3}. agent {} {} -> {}{}{}",
                    entry.position + 1,
                    entry.agent + 1,
                    entry.origin,
                    entry.destination,
                    if entry.fields_completed > 0 {
                        format!("  (+{} field)", entry.fields_completed)
                    } else {
                        String::new()
                    },
                    if entry.early_eligible { "  *" } else { "" }
                );
            }

            if let Some(output) = output {
                std::fs::create_dir_all(output.parent().unwrap_or(&PathBuf::from(".")))?;
                report.save(&output)?;
                println!("\nReport written to: {}", output.display());
            }
        }
    }

    Ok(())
}
