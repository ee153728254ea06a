//! # nx-check
//!
//! Runs a model on the host or the accelerator and checks its output
//! against the reference evaluator.
//!
//! ```bash
//! nx-check ./models/resnet50 ON
//! nx-check --synthesize --repeat 10 /tmp/tiny OFF
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nx_check::{run_check, CheckConfig, CheckReport, DataSources};
use nx_model::{residual_cnn, SynthConfig};
use nx_tensor::Target;

#[derive(Parser)]
#[command(
    name = "nx-check",
    about = "Check nx-runtime output against a reference evaluation",
    version
)]
struct Cli {
    /// Path to a TOML harness configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for the random input.
    #[arg(long)]
    seed: Option<u64>,

    /// Timed runs after the preheat run.
    #[arg(long)]
    repeat: Option<usize>,

    /// Absolute tolerance.
    #[arg(long)]
    atol: Option<f32>,

    /// Load one parameter file per tensor instead of a combined `params`.
    #[arg(long)]
    separate_params: bool,

    /// Parameter container holding the input tensor.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Parameter container holding a reference output to compare against.
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Write a synthetic residual CNN into MODEL_DIR before checking.
    #[arg(long)]
    synthesize: bool,

    /// Enable verbose logging (repeat for more: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Model directory holding `model.json` and its parameters.
    model_dir: PathBuf,

    /// Run on the accelerator (ON) or the host (OFF).
    #[arg(value_parser = parse_switch)]
    accelerator: bool,
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s.to_ascii_uppercase().as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("expected ON or OFF, got '{}'", s)),
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

impl Cli {
    fn check_config(&self) -> anyhow::Result<CheckConfig> {
        let mut config = match &self.config {
            Some(path) => CheckConfig::from_file(path)?,
            None => CheckConfig::default(),
        };
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(repeat) = self.repeat {
            config.repeat = repeat;
        }
        if let Some(atol) = self.atol {
            config.atol = atol;
        }
        if self.separate_params {
            config.combined = false;
        }
        config.validate()?;
        Ok(config)
    }

    fn synthesize(&self, config: &mut CheckConfig) -> anyhow::Result<()> {
        let synth = SynthConfig {
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            ..SynthConfig::default()
        };
        // The synthetic network is small; the configured shape rarely fits it.
        config.input_shape = synth.input_shape.to_vec();
        residual_cnn(&synth, config.seed.unwrap_or(0))?.write_to(&self.model_dir)?;
        println!("Synthesized model into {}", self.model_dir.display());
        Ok(())
    }
}

fn print_report(report: &CheckReport) {
    println!("Target: {}", report.target);
    println!("Model: {}", report.model_dir.display());
    if let Some(seed) = report.seed {
        println!("Input seed: {}", seed);
    }
    println!(
        "Ops: {} -> {} ({} batch norms folded, {} activations fused)",
        report.stats.ops_before,
        report.stats.ops_after,
        report.stats.folded_batch_norms,
        report.stats.fused_activations
    );
    println!("Load time: {:.3} ms", report.load_time.as_secs_f64() * 1e3);
    println!("Preheat time: {:.3} ms", report.preheat_time.as_secs_f64() * 1e3);
    println!("Average time: {:.3} ms", report.average_time.as_secs_f64() * 1e3);

    let cmp = &report.comparison;
    if !cmp.shapes_match() {
        println!(
            "Error! output shape {:?} does not match target shape {:?}",
            cmp.actual_dims, cmp.expected_dims
        );
    }
    for m in &cmp.mismatches {
        println!("{}", m);
    }
    if !report.deterministic {
        println!("Error! repeated runs produced different outputs");
    }
    println!("Max diff: {}", cmp.max_diff);
    println!("{}", if report.passed() { "PASSED" } else { "FAILED" });
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = cli.check_config()?;
    if cli.synthesize {
        cli.synthesize(&mut config)?;
    }
    let sources = DataSources {
        input: cli.input.clone(),
        reference: cli.reference.clone(),
    };

    let report = run_check(&cli.model_dir, Target::select(cli.accelerator), &config, &sources)?;
    print_report(&report);
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
