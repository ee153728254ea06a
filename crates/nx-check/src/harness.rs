use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;

use nx_exec::{reference, ExecStats, Executor};
use nx_tensor::{Shape, Target, Tensor};

use crate::compare::{compare, Comparison};
use crate::config::CheckConfig;
use crate::input::{random_input, read_tensor, resolve_seed};

/// Where input data and the expected output come from when not generated.
#[derive(Debug, Clone, Default)]
pub struct DataSources {
    /// Parameter container holding the input tensor.
    pub input: Option<PathBuf>,
    /// Parameter container holding an externally computed reference output.
    pub reference: Option<PathBuf>,
}

/// Everything one harness run measured.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub target: Target,
    pub model_dir: PathBuf,
    /// Seed of the random input; `None` when the input was read from a file.
    pub seed: Option<u64>,
    pub load_time: Duration,
    pub preheat_time: Duration,
    pub average_time: Duration,
    pub stats: ExecStats,
    pub output: Tensor,
    pub comparison: Comparison,
    /// Every timed run reproduced the preheat output bit for bit.
    pub deterministic: bool,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.deterministic && self.comparison.passed()
    }
}

/// Loads the model in `model_dir` on `target`, runs it on one input and
/// compares the bound output with the reference.
pub fn run_check(
    model_dir: &Path,
    target: Target,
    config: &CheckConfig,
    sources: &DataSources,
) -> anyhow::Result<CheckReport> {
    config.validate()?;
    let mut executor = Executor::with_options(target.clone(), config.compile.clone())?;
    executor.bind_input(&config.input_name, Shape::from_slice(&config.input_shape))?;
    executor.bind_output(&config.output_name)?;

    let start = Instant::now();
    executor
        .load_model(model_dir, config.combined)
        .with_context(|| format!("failed to load model from '{}'", model_dir.display()))?;
    let load_time = start.elapsed();
    if !executor.fetch_names()?.iter().any(|n| n == &config.output_name) {
        tracing::warn!(output = %config.output_name, "checked output is not a fetch target");
    }

    let (input, seed) = match &sources.input {
        Some(path) => (read_tensor(path, &config.input_name)?, None),
        None => {
            let seed = resolve_seed(config.seed);
            tracing::info!(seed, "generated random input");
            (random_input(&config.input_shape, seed), Some(seed))
        }
    };
    executor
        .load_data(&config.input_name, input.data(), &target)
        .with_context(|| format!("failed to load input '{}'", config.input_name))?;

    let start = Instant::now();
    executor.run().context("preheat run failed")?;
    let preheat_time = start.elapsed();
    let output = executor.read_output(&config.output_name)?;

    let repeat = config.repeat.max(1);
    let mut deterministic = true;
    let mut total = Duration::ZERO;
    for i in 0..repeat {
        let start = Instant::now();
        executor.run().with_context(|| format!("run {} failed", i + 1))?;
        total += start.elapsed();
        if executor.read_output(&config.output_name)? != output {
            tracing::warn!(run = i + 1, "output differs from the preheat run");
            deterministic = false;
        }
    }
    let average_time = total / repeat as u32;

    let expected = match &sources.reference {
        Some(path) => read_tensor(path, &config.output_name)?,
        None => {
            let graph = &executor.model()?.graph;
            let mut values = reference::evaluate(graph, &[(config.input_name.clone(), input)])
                .context("reference evaluation failed")?;
            values
                .remove(&config.output_name)
                .with_context(|| format!("reference did not compute '{}'", config.output_name))?
        }
    };

    let comparison = compare(&output, &expected, config.atol, config.rtol);
    tracing::info!(
        max_diff = comparison.max_diff,
        mismatches = comparison.mismatches.len(),
        deterministic,
        "comparison done"
    );
    Ok(CheckReport {
        target,
        model_dir: model_dir.to_path_buf(),
        seed,
        load_time,
        preheat_time,
        average_time,
        stats: executor.stats()?.clone(),
        output,
        comparison,
        deterministic,
    })
}
