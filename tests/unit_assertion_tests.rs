mod common;

use std::path::PathBuf;

use common::*;
use optest::core::assertion::{AssertionRequest, compare};
use optest::core::plan::{AssertionSpec, Metric, Params};
use optest::core::reference::{self, Tensor, Tolerance};
use optest::core::registry::Registry;
use optest::core::tensor::{self, DType};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const TOL: Tolerance = Tolerance {
    rtol: 1e-3,
    atol: 1e-3,
};

fn t(shape: &[usize], data: &[f64]) -> Tensor {
    Tensor::new(shape.to_vec(), data.to_vec())
}

/// The metric is diagnostic: switching it never flips the verdict.
///
/// 指标仅用于诊断：切换指标永远不会改变判定结果。
#[test]
fn test_metric_does_not_change_verdict() {
    let actual = [t(&[4], &[1.0, 2.0, 3.0, 4.5])];
    let expected = [t(&[4], &[1.0, 2.0, 3.0, 4.0])];

    let max = compare(&actual, &expected, TOL, Metric::MaxAbs);
    let mean = compare(&actual, &expected, TOL, Metric::MeanAbs);

    assert!(!max.ok);
    assert_eq!(max.ok, mean.ok);
    assert_eq!(max.metrics.get("max_abs"), Some(&0.5));
    assert_eq!(mean.metrics.get("mean_abs"), Some(&0.125));
    assert!(max.details.contains("1 of 4 elements outside tolerance"));
    assert!(max.details.contains("first at index 3: got 4.5, expected 4"));
}

#[test]
fn test_relative_tolerance_scales_with_expected() {
    let expected = [t(&[2], &[1000.0, 0.0])];
    let close = [t(&[2], &[1000.9, 0.0009])];
    let far = [t(&[2], &[1000.0, 0.002])];

    assert!(compare(&close, &expected, TOL, Metric::MaxAbs).ok);
    assert!(!compare(&far, &expected, TOL, Metric::MaxAbs).ok);
}

#[test]
fn test_infinities_match_only_themselves() {
    let inf = [t(&[1], &[f64::INFINITY])];
    assert!(compare(&inf, &inf, TOL, Metric::MaxAbs).ok);
    assert!(!compare(&[t(&[1], &[f64::NEG_INFINITY])], &inf, TOL, Metric::MaxAbs).ok);
}

/// A finite value never lies within tolerance of an infinite reference, and
/// the broken elements show up in both metrics.
///
/// 有限值永远不在无穷参考值的容差范围内，且这些错误元素会体现在两种指标中。
#[test]
fn test_finite_output_against_infinite_reference_fails() {
    let expected = [t(&[3], &[f64::INFINITY, f64::NEG_INFINITY, 1.0])];
    let actual = [t(&[3], &[0.0, 123.0, 1.0])];

    let max = compare(&actual, &expected, TOL, Metric::MaxAbs);
    assert!(!max.ok);
    assert!(max.details.contains("2 of 3 elements outside tolerance"), "{}", max.details);
    assert_eq!(max.metrics.get("max_abs"), Some(&f64::INFINITY));

    let mean = compare(&actual, &expected, TOL, Metric::MeanAbs);
    assert!(!mean.ok);
    assert_eq!(mean.metrics.get("mean_abs"), Some(&f64::INFINITY));

    let nan = [t(&[1], &[f64::NAN])];
    assert!(!compare(&nan, &[t(&[1], &[f64::INFINITY])], TOL, Metric::MaxAbs).ok);
}

#[test]
fn test_output_count_and_size_mismatch_fail() {
    let one = [t(&[2], &[1.0, 2.0])];
    let two = [t(&[2], &[1.0, 2.0]), t(&[1], &[0.0])];
    let out = compare(&one, &two, TOL, Metric::MaxAbs);
    assert!(!out.ok);
    assert!(out.details.contains("output count mismatch"));

    let out = compare(&[t(&[3], &[1.0, 2.0, 3.0])], &one, TOL, Metric::MaxAbs);
    assert!(!out.ok);
    assert!(out.details.contains("shape mismatch"));
}

#[test]
fn test_reference_operators() {
    let none = Params::new();
    let add = reference::lookup("elementwise_add").unwrap();
    let out = add
        .compute(&[t(&[2, 2], &[1.0, 2.0, 3.0, 4.0]), t(&[2], &[10.0, 20.0])], &none)
        .unwrap();
    assert_eq!(out[0].data, vec![11.0, 22.0, 13.0, 24.0]);

    let softmax = reference::lookup("softmax").unwrap();
    let out = softmax.compute(&[t(&[2], &[0.0, 0.0])], &none).unwrap();
    assert_eq!(out[0].data, vec![0.5, 0.5]);

    let leaky = reference::lookup("leaky_relu").unwrap();
    let out = leaky
        .compute(&[t(&[2], &[-1.0, 2.0])], &[("alpha".to_string(), json!(0.5))].into_iter().collect())
        .unwrap();
    assert_eq!(out[0].data, vec![-0.5, 2.0]);

    let dot = reference::lookup("vector_dot").unwrap();
    let out = dot.compute(&[t(&[3], &[1.0, 2.0, 3.0]), t(&[3], &[4.0, 5.0, 6.0])], &none).unwrap();
    assert_eq!(out[0].data, vec![32.0]);

    let mm = reference::matmul(&t(&[2, 2], &[1.0, 2.0, 3.0, 4.0]), &t(&[2], &[1.0, 1.0])).unwrap();
    assert_eq!(mm.shape, vec![2]);
    assert_eq!(mm.data, vec![3.0, 7.0]);

    assert!(reference::lookup("conv2d").unwrap().tolerance().rtol > reference::DEFAULT_TOLERANCE.rtol);
}

#[test]
fn test_operator_tolerances() {
    for name in ["matmul", "gemm", "elementwise_add"] {
        assert_eq!(reference::lookup(name).unwrap().tolerance(), reference::DEFAULT_TOLERANCE, "{name}");
    }
    assert_eq!(
        reference::lookup("conv2d").unwrap().tolerance(),
        Tolerance { rtol: 1e-3, atol: 1e-3 }
    );
}

/// End to end through files: the reference assertion reads inputs and outputs
/// with their dtypes and compares.
///
/// 通过文件端到端：参考断言按数据类型读取输入和输出并进行比较。
#[tokio::test]
async fn test_reference_assertion_over_files() {
    let dir = setup_test_environment();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("b.bin");
    let c = dir.path().join("c.bin");
    tensor::write_tensor(&a, DType::Int32, &[1.0, 2.0, 3.0]).unwrap();
    tensor::write_tensor(&b, DType::Int32, &[3.0, 2.0, 1.0]).unwrap();
    tensor::write_tensor(&c, DType::Bool, &[0.0, 1.0, 0.0]).unwrap();

    let mut registry = Registry::with_builtins();
    let spec = AssertionSpec {
        name: "builtin.equal".to_string(),
        ..AssertionSpec::default()
    };
    let assertion = registry.resolve_assertion(&spec).unwrap();
    let inputs: Vec<PathBuf> = vec![a, b];
    let outputs: Vec<PathBuf> = vec![c.clone()];
    let shapes = vec![vec![3], vec![3]];
    let out_shapes = vec![vec![3]];
    let empty = Params::new();
    let request = AssertionRequest {
        input_paths: &inputs,
        output_paths: &outputs,
        input_shapes: &shapes,
        output_shapes: &out_shapes,
        dtypes: &[DType::Int32, DType::Int32],
        output_dtypes: &[DType::Bool],
        params: &empty,
        rtol: None,
        atol: None,
        metric: Metric::MaxAbs,
    };
    let cancel = CancellationToken::new();

    let outcome = assertion.invoke(&request, None, &cancel).await.unwrap();
    assert!(outcome.ok, "{}", outcome.details);

    tensor::write_tensor(&c, DType::Bool, &[1.0, 1.0, 1.0]).unwrap();
    let outcome = assertion.invoke(&request, None, &cancel).await.unwrap();
    assert!(!outcome.ok);
    assert_eq!(outcome.metrics.get("max_abs"), Some(&1.0));

    std::fs::write(&c, [1u8]).unwrap();
    let err = assertion.invoke(&request, None, &cancel).await.unwrap_err();
    assert!(err.to_string().contains("holds 1 bytes, expected 3"), "{err}");
}
