//! # Reference Operators Module / 参考算子模块
//!
//! Higher-precision (`f64`) reference implementations of the builtin
//! operators. Builtin assertions feed the generated inputs through one of
//! these and compare the result with what the backend produced.
//!
//! 内置算子的高精度（`f64`）参考实现。内置断言将生成的输入送入这些实现，
//! 并将结果与后端产生的输出进行比较。
//!
//! Tensors are dense, row-major. Pooling and convolution use NCHW layout and
//! OIHW weights.

use crate::core::plan::Params;
use crate::core::tensor::numel;

/// A dense row-major tensor of `f64` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Self {
        debug_assert_eq!(numel(&shape), data.len());
        Self { shape, data }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        Tensor::new(self.shape.clone(), self.data.iter().map(|&x| f(x)).collect())
    }
}

/// Relative and absolute tolerance of the elementwise acceptance rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

pub const DEFAULT_TOLERANCE: Tolerance = Tolerance {
    rtol: 1e-5,
    atol: 1e-4,
};

type Compute = fn(&[Tensor], &Params) -> Result<Vec<Tensor>, String>;

/// A builtin operator: name, input count and reference function.
pub struct ReferenceOp {
    pub name: &'static str,
    /// `None` accepts any number of inputs.
    pub arity: Option<usize>,
    /// Overrides `DEFAULT_TOLERANCE` when set.
    pub tolerance: Option<Tolerance>,
    compute: Compute,
}

impl std::fmt::Debug for ReferenceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceOp")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl ReferenceOp {
    pub fn tolerance(&self) -> Tolerance {
        self.tolerance.unwrap_or(DEFAULT_TOLERANCE)
    }

    /// Computes the expected outputs for `inputs`.
    pub fn compute(&self, inputs: &[Tensor], params: &Params) -> Result<Vec<Tensor>, String> {
        if let Some(arity) = self.arity {
            if inputs.len() != arity {
                return Err(format!(
                    "operator '{}' takes {arity} input(s), the case declares {}",
                    self.name,
                    inputs.len()
                ));
            }
        }
        (self.compute)(inputs, params).map_err(|e| format!("{}: {e}", self.name))
    }
}

const fn op(name: &'static str, arity: Option<usize>, compute: Compute) -> ReferenceOp {
    ReferenceOp {
        name,
        arity,
        tolerance: None,
        compute,
    }
}

const CONV_TOLERANCE: Tolerance = Tolerance {
    rtol: 1e-3,
    atol: 1e-3,
};

pub static OPERATORS: &[ReferenceOp] = &[
    op("identity", None, |inputs, _| Ok(inputs.to_vec())),
    op("elementwise_add", Some(2), |i, _| binary(i, |a, b| a + b)),
    op("elementwise_sub", Some(2), |i, _| binary(i, |a, b| a - b)),
    op("elementwise_mul", Some(2), |i, _| binary(i, |a, b| a * b)),
    op("elementwise_div", Some(2), |i, _| binary(i, |a, b| a / b)),
    op("equal", Some(2), |i, _| binary(i, |a, b| flag(a == b))),
    op("greater", Some(2), |i, _| binary(i, |a, b| flag(a > b))),
    op("less", Some(2), |i, _| binary(i, |a, b| flag(a < b))),
    op("less_equal", Some(2), |i, _| binary(i, |a, b| flag(a <= b))),
    op("greater_equal", Some(2), |i, _| binary(i, |a, b| flag(a >= b))),
    op("relu", Some(1), |i, _| Ok(vec![i[0].map(|x| x.max(0.0))])),
    op("leaky_relu", Some(1), leaky_relu),
    op("sigmoid", Some(1), |i, _| {
        Ok(vec![i[0].map(|x| 1.0 / (1.0 + (-x).exp()))])
    }),
    op("tanh", Some(1), |i, _| Ok(vec![i[0].map(f64::tanh)])),
    op("sinh", Some(1), |i, _| Ok(vec![i[0].map(f64::sinh)])),
    op("softmax", Some(1), softmax),
    op("reduce_sum", Some(1), |i, p| reduce_op(i, p, Reduction::Sum)),
    op("reduce_mean", Some(1), |i, p| reduce_op(i, p, Reduction::Mean)),
    op("vector_dot", Some(2), vector_dot),
    op("vector_norm", Some(1), |i, _| {
        let sum_sq: f64 = i[0].data.iter().map(|x| x * x).sum();
        Ok(vec![Tensor::scalar(sum_sq.sqrt())])
    }),
    op("vector_sum", Some(1), |i, _| {
        Ok(vec![Tensor::scalar(i[0].data.iter().sum())])
    }),
    op("matmul", Some(2), |i, _| Ok(vec![matmul(&i[0], &i[1])?])),
    op("gemm", Some(2), gemm),
    op("broadcast_to", Some(1), broadcast_to_op),
    op("maxpool2d", Some(1), |i, p| Ok(vec![pool2d(&i[0], p, Pool::Max)?])),
    op("avgpool2d", Some(1), |i, p| Ok(vec![pool2d(&i[0], p, Pool::Avg)?])),
    ReferenceOp {
        tolerance: Some(CONV_TOLERANCE),
        ..op("conv2d", Some(2), conv2d)
    },
];

/// Looks up a builtin operator by normalized name.
pub fn lookup(name: &str) -> Option<&'static ReferenceOp> {
    OPERATORS.iter().find(|op| op.name == name)
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

// ---------------------------------------------------------------------------
// Parameter helpers
// ---------------------------------------------------------------------------

fn param_f64(params: &Params, key: &str, default: f64) -> Result<f64, String> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| format!("param '{key}' must be a number, got {value}")),
    }
}

fn param_bool(params: &Params, key: &str) -> Result<bool, String> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(false),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(serde_json::Value::Number(n)) => Ok(n.as_f64().is_some_and(|x| x != 0.0)),
        Some(value) => Err(format!("param '{key}' must be a boolean, got {value}")),
    }
}

fn as_int(value: &serde_json::Value, key: &str) -> Result<i64, String> {
    value
        .as_i64()
        .ok_or_else(|| format!("param '{key}' must hold integers, got {value}"))
}

fn as_dim(value: &serde_json::Value, key: &str) -> Result<usize, String> {
    usize::try_from(as_int(value, key)?).map_err(|_| format!("param '{key}' must be non-negative"))
}

fn param_pair(params: &Params, key: &str, default: (usize, usize)) -> Result<(usize, usize), String> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(serde_json::Value::Array(items)) if items.len() == 2 => {
            Ok((as_dim(&items[0], key)?, as_dim(&items[1], key)?))
        }
        Some(value @ serde_json::Value::Number(_)) => {
            let n = as_dim(value, key)?;
            Ok((n, n))
        }
        Some(value) => Err(format!("param '{key}' must be an integer or a pair, got {value}")),
    }
}

fn normalize_axis(axis: i64, rank: usize) -> Result<usize, String> {
    let rank_i = rank as i64;
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    if resolved < 0 || resolved >= rank_i {
        return Err(format!("axis {axis} is out of range for rank {rank}"));
    }
    Ok(resolved as usize)
}

// ---------------------------------------------------------------------------
// Broadcasting
// ---------------------------------------------------------------------------

fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, String> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return Err(format!("shapes {a:?} and {b:?} cannot be broadcast together")),
        };
    }
    Ok(out)
}

fn broadcast_to(t: &Tensor, target: &[usize]) -> Result<Tensor, String> {
    if t.shape == target {
        return Ok(t.clone());
    }
    if broadcast_shape(&t.shape, target)? != target {
        return Err(format!("cannot broadcast {:?} to {target:?}", t.shape));
    }
    let offset = target.len() - t.rank();
    let mut src_strides = vec![0usize; target.len()];
    let mut stride = 1;
    for i in (0..t.rank()).rev() {
        src_strides[i + offset] = if t.shape[i] == 1 { 0 } else { stride };
        stride *= t.shape[i];
    }
    let total = numel(target);
    let mut data = Vec::with_capacity(total);
    for flat in 0..total {
        let mut rem = flat;
        let mut src = 0;
        for axis in (0..target.len()).rev() {
            let coord = rem % target[axis];
            rem /= target[axis];
            src += coord * src_strides[axis];
        }
        data.push(t.data[src]);
    }
    Ok(Tensor::new(target.to_vec(), data))
}

fn binary(inputs: &[Tensor], f: impl Fn(f64, f64) -> f64) -> Result<Vec<Tensor>, String> {
    let shape = broadcast_shape(&inputs[0].shape, &inputs[1].shape)?;
    let a = broadcast_to(&inputs[0], &shape)?;
    let b = broadcast_to(&inputs[1], &shape)?;
    let data = a.data.iter().zip(&b.data).map(|(&x, &y)| f(x, y)).collect();
    Ok(vec![Tensor::new(shape, data)])
}

fn broadcast_to_op(inputs: &[Tensor], params: &Params) -> Result<Vec<Tensor>, String> {
    let target = match params.get("shape") {
        Some(serde_json::Value::Array(dims)) => dims
            .iter()
            .map(|d| as_dim(d, "shape"))
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err("requires a 'shape' list param".to_string()),
    };
    Ok(vec![broadcast_to(&inputs[0], &target)?])
}

// ---------------------------------------------------------------------------
// Activations and reductions
// ---------------------------------------------------------------------------

fn leaky_relu(inputs: &[Tensor], params: &Params) -> Result<Vec<Tensor>, String> {
    let alpha = param_f64(params, "alpha", 0.01)?;
    Ok(vec![inputs[0].map(|x| if x > 0.0 { x } else { alpha * x })])
}

fn softmax(inputs: &[Tensor], params: &Params) -> Result<Vec<Tensor>, String> {
    let x = &inputs[0];
    let axis_value = match params.get("axis") {
        None | Some(serde_json::Value::Null) => -1,
        Some(v) => as_int(v, "axis")?,
    };
    if x.rank() == 0 {
        return Ok(vec![x.map(|_| 1.0)]);
    }
    let axis = normalize_axis(axis_value, x.rank())?;
    let outer: usize = x.shape[..axis].iter().product();
    let n = x.shape[axis];
    let inner: usize = x.shape[axis + 1..].iter().product();
    let mut out = vec![0.0; x.len()];
    for o in 0..outer {
        for i in 0..inner {
            let at = |k: usize| (o * n + k) * inner + i;
            let max = (0..n).map(|k| x.data[at(k)]).fold(f64::NEG_INFINITY, f64::max);
            let mut sum = 0.0;
            for k in 0..n {
                let e = (x.data[at(k)] - max).exp();
                out[at(k)] = e;
                sum += e;
            }
            for k in 0..n {
                out[at(k)] /= sum;
            }
        }
    }
    Ok(vec![Tensor::new(x.shape.clone(), out)])
}

#[derive(Clone, Copy)]
enum Reduction {
    Sum,
    Mean,
}

fn parse_axes(params: &Params, rank: usize) -> Result<Option<Vec<usize>>, String> {
    let axes = match params.get("axis") {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| normalize_axis(as_int(v, "axis")?, rank))
            .collect::<Result<Vec<_>, _>>()?,
        Some(v) => vec![normalize_axis(as_int(v, "axis")?, rank)?],
    };
    Ok(Some(axes))
}

fn reduce(x: &Tensor, axes: Option<&[usize]>, keepdims: bool, how: Reduction) -> Tensor {
    let reduced: Vec<bool> = (0..x.rank())
        .map(|d| axes.is_none_or(|list| list.contains(&d)))
        .collect();
    let kept_shape: Vec<usize> = x
        .shape
        .iter()
        .zip(&reduced)
        .map(|(&dim, &r)| if r { 1 } else { dim })
        .collect();
    let out_len = numel(&kept_shape);
    let mut sums = vec![0.0; out_len];
    let mut counts = vec![0usize; out_len];
    for (flat, &value) in x.data.iter().enumerate() {
        let mut rem = flat;
        let mut out_index = 0;
        let mut out_stride = 1;
        for axis in (0..x.rank()).rev() {
            let coord = rem % x.shape[axis];
            rem /= x.shape[axis];
            if !reduced[axis] {
                out_index += coord * out_stride;
            }
            out_stride *= kept_shape[axis];
        }
        sums[out_index] += value;
        counts[out_index] += 1;
    }
    if let Reduction::Mean = how {
        for (sum, &count) in sums.iter_mut().zip(&counts) {
            *sum /= count.max(1) as f64;
        }
    }
    let shape = if keepdims {
        kept_shape
    } else {
        x.shape
            .iter()
            .zip(&reduced)
            .filter(|(_, r)| !**r)
            .map(|(&d, _)| d)
            .collect()
    };
    Tensor::new(shape, sums)
}

fn reduce_op(inputs: &[Tensor], params: &Params, how: Reduction) -> Result<Vec<Tensor>, String> {
    let x = &inputs[0];
    let axes = parse_axes(params, x.rank())?;
    let keepdims = param_bool(params, "keepdims")?;
    Ok(vec![reduce(x, axes.as_deref(), keepdims, how)])
}

fn vector_dot(inputs: &[Tensor], _: &Params) -> Result<Vec<Tensor>, String> {
    let product = binary(inputs, |a, b| a * b)?.remove(0);
    if product.rank() == 0 {
        return Ok(vec![product]);
    }
    let last = product.rank() - 1;
    Ok(vec![reduce(&product, Some([last].as_slice()), false, Reduction::Sum)])
}

// ---------------------------------------------------------------------------
// Matrix products
// ---------------------------------------------------------------------------

fn swap_last_two(t: &Tensor) -> Result<Tensor, String> {
    let r = t.rank();
    if r < 2 {
        return Err(format!("cannot transpose a tensor of rank {r}"));
    }
    let (rows, cols) = (t.shape[r - 2], t.shape[r - 1]);
    let batch = t.len() / (rows * cols).max(1);
    let mut data = vec![0.0; t.len()];
    for b in 0..batch {
        let base = b * rows * cols;
        for i in 0..rows {
            for j in 0..cols {
                data[base + j * rows + i] = t.data[base + i * cols + j];
            }
        }
    }
    let mut shape = t.shape.clone();
    shape.swap(r - 2, r - 1);
    Ok(Tensor::new(shape, data))
}

pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor, String> {
    if a.rank() == 0 || b.rank() == 0 {
        return Err("matmul operands must have at least one dimension".to_string());
    }
    let a_vec = a.rank() == 1;
    let b_vec = b.rank() == 1;
    let a2 = if a_vec {
        Tensor::new(vec![1, a.shape[0]], a.data.clone())
    } else {
        a.clone()
    };
    let b2 = if b_vec {
        Tensor::new(vec![b.shape[0], 1], b.data.clone())
    } else {
        b.clone()
    };
    let (ra, rb) = (a2.rank(), b2.rank());
    let (m, k) = (a2.shape[ra - 2], a2.shape[ra - 1]);
    let (kb, n) = (b2.shape[rb - 2], b2.shape[rb - 1]);
    if k != kb {
        return Err(format!(
            "inner dimensions differ: {:?} x {:?}",
            a.shape, b.shape
        ));
    }
    let batch = broadcast_shape(&a2.shape[..ra - 2], &b2.shape[..rb - 2])?;
    let mut a_target = batch.clone();
    a_target.extend([m, k]);
    let mut b_target = batch.clone();
    b_target.extend([k, n]);
    let a3 = broadcast_to(&a2, &a_target)?;
    let b3 = broadcast_to(&b2, &b_target)?;

    let batches = numel(&batch);
    let mut data = vec![0.0; batches * m * n];
    for bi in 0..batches {
        let (ao, bo, oo) = (bi * m * k, bi * k * n, bi * m * n);
        for i in 0..m {
            for p in 0..k {
                let av = a3.data[ao + i * k + p];
                for j in 0..n {
                    data[oo + i * n + j] += av * b3.data[bo + p * n + j];
                }
            }
        }
    }
    let mut shape = batch;
    if !a_vec {
        shape.push(m);
    }
    if !b_vec {
        shape.push(n);
    }
    Ok(Tensor::new(shape, data))
}

fn gemm(inputs: &[Tensor], params: &Params) -> Result<Vec<Tensor>, String> {
    let a = if param_bool(params, "trans_a")? {
        swap_last_two(&inputs[0])?
    } else {
        inputs[0].clone()
    };
    let b = if param_bool(params, "trans_b")? {
        swap_last_two(&inputs[1])?
    } else {
        inputs[1].clone()
    };
    Ok(vec![matmul(&a, &b)?])
}

// ---------------------------------------------------------------------------
// Pooling and convolution (NCHW)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Pool {
    Max,
    Avg,
}

/// Top, bottom, left, right.
type Padding = (usize, usize, usize, usize);

fn parse_padding(
    params: &Params,
    input_hw: (usize, usize),
    stride: (usize, usize),
    dilation: (usize, usize),
    kernel_hw: (usize, usize),
) -> Result<Padding, String> {
    use serde_json::Value;
    match params.get("padding") {
        None | Some(Value::Null) => Ok((0, 0, 0, 0)),
        Some(Value::String(mode)) => match mode.to_ascii_lowercase().as_str() {
            "valid" => Ok((0, 0, 0, 0)),
            "same" => Ok(same_padding(input_hw, stride, dilation, kernel_hw)),
            other => Err(format!("unsupported padding '{other}'")),
        },
        Some(value @ Value::Number(_)) => {
            let p = as_dim(value, "padding")?;
            Ok((p, p, p, p))
        }
        Some(Value::Array(items)) => {
            let v = items
                .iter()
                .map(|x| as_dim(x, "padding"))
                .collect::<Result<Vec<_>, _>>()?;
            match v.as_slice() {
                [h, w] => Ok((*h, *h, *w, *w)),
                [t, b, l, r] => Ok((*t, *b, *l, *r)),
                _ => Err(format!("padding list must have 2 or 4 entries, got {}", v.len())),
            }
        }
        Some(value) => Err(format!("unsupported padding {value}")),
    }
}

fn same_padding(
    input_hw: (usize, usize),
    stride: (usize, usize),
    dilation: (usize, usize),
    kernel_hw: (usize, usize),
) -> Padding {
    let pad = |dim: usize, s: usize, d: usize, k: usize| {
        let effective = (k.max(1) - 1) * d + 1;
        let out = dim.div_ceil(s.max(1));
        let needed = ((out.max(1) - 1) * s + effective).saturating_sub(dim);
        (needed / 2, needed - needed / 2)
    };
    let (top, bottom) = pad(input_hw.0, stride.0, dilation.0, kernel_hw.0);
    let (left, right) = pad(input_hw.1, stride.1, dilation.1, kernel_hw.1);
    (top, bottom, left, right)
}

fn nchw(t: &Tensor, what: &str) -> Result<(usize, usize, usize, usize), String> {
    match t.shape.as_slice() {
        [n, c, h, w] => Ok((*n, *c, *h, *w)),
        other => Err(format!("{what} must be 4-D (NCHW), got shape {other:?}")),
    }
}

/// Zero-pads the spatial dimensions.
fn pad_spatial(x: &Tensor, pad: Padding) -> Result<Tensor, String> {
    let (n, c, h, w) = nchw(x, "input")?;
    let (top, bottom, left, right) = pad;
    let (ph, pw) = (h + top + bottom, w + left + right);
    let mut data = vec![0.0; n * c * ph * pw];
    for plane in 0..n * c {
        for i in 0..h {
            for j in 0..w {
                data[plane * ph * pw + (i + top) * pw + (j + left)] = x.data[plane * h * w + i * w + j];
            }
        }
    }
    Ok(Tensor::new(vec![n, c, ph, pw], data))
}

fn output_extent(padded: usize, window: usize, stride: usize) -> Result<usize, String> {
    if stride == 0 {
        return Err("stride must be positive".to_string());
    }
    if window > padded {
        return Err(format!("window {window} is larger than padded input {padded}"));
    }
    Ok((padded - window) / stride + 1)
}

fn pool2d(x: &Tensor, params: &Params, mode: Pool) -> Result<Tensor, String> {
    let (_, _, h, w) = nchw(x, "input")?;
    let kernel = param_pair(params, "kernel_size", (2, 2))?;
    let stride = param_pair(params, "stride", kernel)?;
    let pad = parse_padding(params, (h, w), stride, (1, 1), kernel)?;
    let padded = pad_spatial(x, pad)?;
    let (n, c, ph, pw) = nchw(&padded, "input")?;
    let out_h = output_extent(ph, kernel.0, stride.0)?;
    let out_w = output_extent(pw, kernel.1, stride.1)?;
    let window = (kernel.0 * kernel.1).max(1) as f64;

    let mut data = Vec::with_capacity(n * c * out_h * out_w);
    for plane in 0..n * c {
        let base = plane * ph * pw;
        for oh in 0..out_h {
            for ow in 0..out_w {
                let cells = (0..kernel.0).flat_map(|kh| {
                    (0..kernel.1).map(move |kw| (oh * stride.0 + kh) * pw + ow * stride.1 + kw)
                });
                let value = match mode {
                    Pool::Max => cells
                        .map(|at| padded.data[base + at])
                        .fold(f64::NEG_INFINITY, f64::max),
                    Pool::Avg => cells.map(|at| padded.data[base + at]).sum::<f64>() / window,
                };
                data.push(value);
            }
        }
    }
    Ok(Tensor::new(vec![n, c, out_h, out_w], data))
}

fn conv2d(inputs: &[Tensor], params: &Params) -> Result<Vec<Tensor>, String> {
    let (x, weight) = (&inputs[0], &inputs[1]);
    let (_, c_in, h, w) = nchw(x, "input")?;
    let (c_out, c_in_per_group, kh, kw) = nchw(weight, "weight")?;
    let stride = param_pair(params, "stride", (1, 1))?;
    let dilation = param_pair(params, "dilation", (1, 1))?;
    let groups = match params.get("groups") {
        None | Some(serde_json::Value::Null) => 1,
        Some(v) => as_dim(v, "groups")?.max(1),
    };
    if c_in % groups != 0 || c_out % groups != 0 || c_in / groups != c_in_per_group {
        return Err(format!(
            "channels do not divide into {groups} group(s): input {c_in}, weight {:?}",
            weight.shape
        ));
    }
    let pad = parse_padding(params, (h, w), stride, dilation, (kh, kw))?;
    let padded = pad_spatial(x, pad)?;
    let (n, _, ph, pw) = nchw(&padded, "input")?;
    let out_h = output_extent(ph, (kh.max(1) - 1) * dilation.0 + 1, stride.0)?;
    let out_w = output_extent(pw, (kw.max(1) - 1) * dilation.1 + 1, stride.1)?;
    let c_out_per_group = c_out / groups;

    let mut out = vec![0.0; n * c_out * out_h * out_w];
    for b in 0..n {
        for g in 0..groups {
            for oc in 0..c_out_per_group {
                let out_channel = g * c_out_per_group + oc;
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut acc = 0.0;
                        for ic in 0..c_in_per_group {
                            let in_channel = g * c_in_per_group + ic;
                            for i in 0..kh {
                                for j in 0..kw {
                                    let ih = oh * stride.0 + i * dilation.0;
                                    let iw = ow * stride.1 + j * dilation.1;
                                    let xv = padded.data[((b * c_in + in_channel) * ph + ih) * pw + iw];
                                    let wv = weight.data[((out_channel * c_in_per_group + ic) * kh + i) * kw + j];
                                    acc += xv * wv;
                                }
                            }
                        }
                        out[((b * c_out + out_channel) * out_h + oh) * out_w + ow] = acc;
                    }
                }
            }
        }
    }
    Ok(vec![Tensor::new(vec![n, c_out, out_h, out_w], out)])
}
