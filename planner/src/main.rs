use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hashwatt_core::{InstanceId, MachineId, Objective, RatioKind, RatioTarget, SiteId};
use hashwatt_planner::config::Config;
use hashwatt_planner::{metrics, Planner};

#[derive(Parser, Debug)]
#[command(name = "hashwatt", version, about = "Power-ratio planner for mining fleets")]
struct Cli {
    /// Config file (TOML). Defaults to $HASHWATT_CONFIG or ./hashwatt.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dataset file, overrides the configured path.
    #[arg(short, long, global = true)]
    dataset: Option<PathBuf>,

    /// Coin price in fiat, overrides config and dataset.
    #[arg(long, global = true)]
    price: Option<Decimal>,

    /// FPPS reward rate (coin per TH/s per day), overrides config and dataset.
    #[arg(long, global = true)]
    fpps_rate: Option<Decimal>,

    /// Print prometheus counters to stderr after the command.
    #[arg(long, global = true, default_value_t = false)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Best operating ratio for a machine under the default tariff.
    Optimal {
        #[arg(long)]
        machine: MachineId,

        #[arg(long, value_enum, default_value_t = ObjectiveArg::Profit)]
        objective: ObjectiveArg,
    },

    /// Metrics at every ratio from 0.50 to 1.50 in steps of 0.05.
    Analysis {
        #[arg(long)]
        machine: MachineId,
    },

    /// Ratio range the machine's curve supports.
    Ratios {
        #[arg(long)]
        machine: MachineId,
    },

    /// Hashrate, power and economics at one ratio.
    Ratio {
        #[arg(long)]
        machine: MachineId,

        #[arg(long)]
        ratio: Decimal,
    },

    /// Operating point at an absolute power draw.
    Power {
        #[arg(long)]
        machine: MachineId,

        /// Target draw in watts.
        #[arg(long)]
        watts: Decimal,
    },

    /// Allocate a site's machines against its shared tier-1 budget.
    Site {
        #[arg(long)]
        site: SiteId,

        #[arg(long, value_enum, default_value_t = ObjectiveArg::Profit)]
        objective: ObjectiveArg,
    },

    /// Nameplate totals for a site.
    Stats {
        #[arg(long)]
        site: SiteId,
    },

    /// Record a ratio on a site or a single instance.
    Apply {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long)]
        ratio: Decimal,

        #[arg(long, value_enum, default_value_t = KindArg::Manual)]
        kind: KindArg,
    },

    /// Record each machine's optimal ratio on a site or a single instance.
    ApplyOptimal {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long, value_enum, default_value_t = ObjectiveArg::Profit)]
        objective: ObjectiveArg,
    },
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Every instance on this site.
    #[arg(long, conflicts_with = "instance")]
    site: Option<SiteId>,

    /// A single instance.
    #[arg(long)]
    instance: Option<InstanceId>,
}

impl TargetArgs {
    fn target(&self) -> Result<RatioTarget> {
        match (self.site, self.instance) {
            (Some(site), None) => Ok(RatioTarget::Site(site)),
            (None, Some(instance)) => Ok(RatioTarget::Instance(instance)),
            _ => bail!("exactly one of --site or --instance is required"),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ObjectiveArg {
    Profit,
    TechnicalEfficiency,
    SatsPerHour,
}

impl From<ObjectiveArg> for Objective {
    fn from(arg: ObjectiveArg) -> Self {
        match arg {
            ObjectiveArg::Profit => Objective::Profit,
            ObjectiveArg::TechnicalEfficiency => Objective::TechnicalEfficiency,
            ObjectiveArg::SatsPerHour => Objective::SatsPerHour,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Manual,
    Nominal,
}

impl From<KindArg> for RatioKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Manual => RatioKind::Manual,
            KindArg::Nominal => RatioKind::Nominal,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to encode output")?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.dataset {
        cfg.dataset.path = path;
    }
    if let Some(price) = cli.price {
        cfg.market.price_per_coin = Some(price);
    }
    if let Some(rate) = cli.fpps_rate {
        cfg.market.reward_rate_per_th_per_day = Some(rate);
    }
    cfg.sanitise();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Loading dataset {}", cfg.dataset.path.display());
    let planner = Planner::from_config(&cfg)?;

    match cli.command {
        Command::Optimal { machine, objective } => print_json(&planner.optimal_ratio(machine, objective.into())?)?,
        Command::Analysis { machine } => print_json(&planner.ratio_analysis(machine)?)?,
        Command::Ratios { machine } => print_json(&planner.available_ratios(machine)?)?,
        Command::Ratio { machine, ratio } => print_json(&planner.efficiency_at_ratio(machine, ratio)?)?,
        Command::Power { machine, watts } => print_json(&planner.efficiency_at_power(machine, watts)?)?,
        Command::Site { site, objective } => print_json(&planner.site_allocation(site, objective.into())?)?,
        Command::Stats { site } => print_json(&planner.site_statistics(site)?)?,
        Command::Apply { target, ratio, kind } => {
            print_json(&planner.apply_ratio(target.target()?, ratio, kind.into())?)?
        }
        Command::ApplyOptimal { target, objective } => {
            print_json(&planner.apply_optimal(target.target()?, objective.into())?)?
        }
    }

    if cli.metrics {
        eprint!("{}", metrics::render());
    }

    Ok(())
}
