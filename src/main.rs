use clap::Parser;
use std::io;
use std::time::Instant;
use switchyard::command::Script;
use switchyard::config::{ModelKind, SimConfig, XChargeModel};
use switchyard::output;
use switchyard::sim::Simulator;

/// Switch-level MOS timing simulator
#[derive(Parser)]
#[command(name = "switchyard", version)]
struct Cli {
    /// `.sim` network file
    netlist: String,

    /// Delay model: rc or switch
    #[arg(long, default_value = "rc")]
    model: ModelKind,

    /// Command script to run after loading
    #[arg(long)]
    commands: Option<String>,

    /// Microns per lambda
    #[arg(long)]
    lambda: Option<f64>,

    /// Decay time of undriven charge, ns (0 disables)
    #[arg(long)]
    decay: Option<f64>,

    /// Fixed delay for every transition, ns (0 disables)
    #[arg(long)]
    unit_delay: Option<f64>,

    /// Delay of driven nodes settling to X: min or diff
    #[arg(long, default_value = "min")]
    x_charge: XChargeModel,

    /// Print performance stats to stderr
    #[arg(long)]
    stats: bool,

    /// Write transition histories as CSV to this file
    #[arg(long)]
    history: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = SimConfig { model: cli.model, x_charge: cli.x_charge, ..SimConfig::default() };
    if let Some(lambda) = cli.lambda {
        config.lambda = lambda;
    }
    if let Some(decay) = cli.decay {
        config.decay = decay;
    }
    if let Some(unit_delay) = cli.unit_delay {
        config.unit_delay = unit_delay;
    }

    let mut sim = Simulator::open(&cli.netlist, config).unwrap_or_else(|e| {
        eprintln!("Load error: {}", e);
        std::process::exit(1);
    });
    if !sim.diagnostics().is_empty() {
        eprintln!("{} error(s) in {}", sim.diagnostics().len(), cli.netlist);
    }

    let mut stdout = io::stdout();
    let mut failed = false;

    if let Some(path) = &cli.commands {
        let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
            eprintln!("Error reading {}: {}", path, e);
            std::process::exit(1);
        });
        let (script, errors) = Script::parse(path, &text);
        for e in &errors {
            eprintln!("{}", e);
        }

        let start = Instant::now();
        let failures = script.run(&mut sim, &mut stdout).unwrap_or_else(|e| {
            eprintln!("Simulation error: {}", e);
            std::process::exit(1);
        });
        sim.stats_mut().add_phase("script", start.elapsed());
        for f in &failures {
            eprintln!("{}", f);
        }
        failed = !errors.is_empty() || !failures.is_empty();
    }

    let watched = sim.watched();
    if !watched.is_empty() {
        output::write_values_csv(&watched, &mut stdout).unwrap_or_else(|e| {
            eprintln!("Output error: {}", e);
            std::process::exit(1);
        });
    }

    if let Some(path) = &cli.history {
        let nodes: Vec<String> = if watched.is_empty() {
            sim.node_names()
        } else {
            watched.iter().map(|(n, _)| n.clone()).collect()
        };
        let mut file = std::fs::File::create(path).unwrap_or_else(|e| {
            eprintln!("Error creating {}: {}", path, e);
            std::process::exit(1);
        });
        output::write_history_csv(&sim, &nodes, &mut file).unwrap_or_else(|e| {
            eprintln!("Output error: {}", e);
            std::process::exit(1);
        });
    }

    if cli.stats {
        sim.stats().display();
    }

    if failed {
        std::process::exit(2);
    }
}
