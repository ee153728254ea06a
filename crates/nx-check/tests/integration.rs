//! End-to-end harness runs on a synthetic residual CNN.

use std::path::Path;

use approx::assert_abs_diff_eq;
use tempfile::{tempdir, TempDir};

use nx_check::{run_check, CheckConfig, DataSources};
use nx_exec::CompileOptions;
use nx_model::{residual_cnn, ParamsWriter, SynthConfig};
use nx_tensor::{Target, Tensor};

fn synth_dir(seed: u64) -> TempDir {
    let dir = tempdir().unwrap();
    residual_cnn(&SynthConfig::default(), seed)
        .unwrap()
        .write_to(dir.path())
        .unwrap();
    dir
}

fn config() -> CheckConfig {
    CheckConfig {
        input_shape: vec![1, 3, 32, 32],
        seed: Some(42),
        repeat: 3,
        ..CheckConfig::default()
    }
}

fn check(dir: &Path, target: Target, config: &CheckConfig) -> nx_check::CheckReport {
    run_check(dir, target, config, &DataSources::default()).unwrap()
}

#[test]
fn test_host_matches_reference() {
    let dir = synth_dir(1);
    let report = check(dir.path(), Target::default_host(), &config());
    assert!(report.passed(), "max diff {}", report.comparison.max_diff);
    assert_eq!(report.output.shape().dims(), &[1, 10]);
    assert_abs_diff_eq!(report.output.data().iter().sum::<f32>(), 1.0, epsilon = 1e-4);
    assert!(report.stats.folded_batch_norms > 0);
}

#[test]
fn test_accelerator_matches_reference() {
    let dir = synth_dir(2);
    let target = Target::default_accelerator().with_max_threads(4);
    let report = check(dir.path(), target, &config());
    assert!(report.passed(), "max diff {}", report.comparison.max_diff);
    assert!(report.deterministic);
}

#[test]
fn test_targets_agree() {
    let dir = synth_dir(3);
    let host = check(dir.path(), Target::default_host(), &config());
    let accel = check(dir.path(), Target::default_accelerator(), &config());
    assert_eq!(host.output.shape(), accel.output.shape());
    for (a, b) in host.output.data().iter().zip(accel.output.data()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
    }
}

#[test]
fn test_separate_params_match_combined() {
    let dir = synth_dir(4);
    let combined = check(dir.path(), Target::default_host(), &config());
    let separate = check(
        dir.path(),
        Target::default_host(),
        &CheckConfig {
            combined: false,
            ..config()
        },
    );
    assert_eq!(combined.output, separate.output);
}

#[test]
fn test_uncompiled_plan_still_passes() {
    let dir = synth_dir(5);
    let config = CheckConfig {
        compile: CompileOptions::none(),
        ..config()
    };
    let report = check(dir.path(), Target::default_accelerator(), &config);
    assert!(report.passed());
    assert_eq!(report.stats.folded_batch_norms, 0);
    assert_eq!(report.stats.fused_activations, 0);
}

#[test]
fn test_same_seed_same_output() {
    let dir = synth_dir(6);
    let a = check(dir.path(), Target::default_host(), &config());
    let b = check(dir.path(), Target::default_host(), &config());
    assert_eq!(a.seed, Some(42));
    assert_eq!(a.output, b.output);
}

#[test]
fn test_stored_reference_mismatch_fails() {
    let dir = synth_dir(7);
    let good = check(dir.path(), Target::default_host(), &config());

    let mut wrong = good.output.clone();
    wrong.data_mut()[3] += 0.5;
    let reference = dir.path().join("expected");
    ParamsWriter::default()
        .write_combined(&reference, [("save_infer_model/scale_0", &wrong)])
        .unwrap();

    let sources = DataSources {
        input: None,
        reference: Some(reference),
    };
    let report = run_check(dir.path(), Target::default_host(), &config(), &sources).unwrap();
    assert!(!report.passed());
    assert_eq!(report.comparison.mismatches.len(), 1);
    assert_eq!(report.comparison.mismatches[0].index, 3);
}

#[test]
fn test_input_from_file() {
    let dir = synth_dir(8);
    let input = dir.path().join("input");
    let image = Tensor::full([1, 3, 32, 32], 0.25);
    ParamsWriter::default()
        .write_combined(&input, [("image", &image)])
        .unwrap();

    let sources = DataSources {
        input: Some(input),
        reference: None,
    };
    let report = run_check(dir.path(), Target::default_accelerator(), &config(), &sources).unwrap();
    assert_eq!(report.seed, None);
    assert!(report.passed());
}

#[test]
fn test_missing_model_is_error() {
    let dir = tempdir().unwrap();
    let result = run_check(dir.path(), Target::default_host(), &config(), &DataSources::default());
    assert!(result.is_err());
}
