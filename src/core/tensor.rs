//! # Tensor File Module / 张量文件模块
//!
//! Dtypes and the headerless binary tensor format shared with operator
//! binaries: little-endian, row-major, tightly packed scalars of the declared
//! dtype, one file per tensor. Values travel through the engine as `f64` so
//! references are computed at higher precision than the operator under test.
//!
//! 数据类型以及与算子二进制共享的无头二进制张量格式：小端、行优先、
//! 按声明的数据类型紧密排列，每个张量一个文件。

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::core::error::TensorError;

/// Scalar element type of a tensor file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float16,
    BFloat16,
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    Bool,
}

impl DType {
    pub const ALL: [DType; 10] = [
        DType::Float16,
        DType::BFloat16,
        DType::Float32,
        DType::Float64,
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::UInt8,
        DType::Bool,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Float16 => "float16",
            DType::BFloat16 => "bfloat16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::Bool => "bool",
        }
    }

    /// Size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Int8 | DType::UInt8 | DType::Bool => 1,
            DType::Float16 | DType::BFloat16 | DType::Int16 => 2,
            DType::Float32 | DType::Int32 => 4,
            DType::Float64 | DType::Int64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DType::Float16 | DType::BFloat16 | DType::Float32 | DType::Float64
        )
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s.trim().to_ascii_lowercase().as_str() {
            "float16" | "fp16" | "f16" | "half" => DType::Float16,
            "bfloat16" | "bf16" => DType::BFloat16,
            "float32" | "fp32" | "f32" | "float" => DType::Float32,
            "float64" | "fp64" | "f64" | "double" => DType::Float64,
            "int8" | "i8" => DType::Int8,
            "int16" | "i16" => DType::Int16,
            "int32" | "i32" => DType::Int32,
            "int64" | "i64" => DType::Int64,
            "uint8" | "u8" => DType::UInt8,
            "bool" => DType::Bool,
            other => {
                let known: Vec<&str> = DType::ALL.iter().map(|d| d.as_str()).collect();
                return Err(format!(
                    "unsupported dtype '{other}', expected one of: {}",
                    known.join(", ")
                ));
            }
        };
        Ok(dtype)
    }
}

/// Number of elements described by a shape.
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Exact byte length of a tensor file with this shape and dtype.
pub fn byte_len(shape: &[usize], dtype: DType) -> u64 {
    (numel(shape) * dtype.size_in_bytes()) as u64
}

/// Encodes values into the little-endian file layout. Float-to-int casts
/// truncate toward zero and saturate, like a C cast clamped to range.
pub fn encode(dtype: DType, values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * dtype.size_in_bytes());
    for &v in values {
        match dtype {
            DType::Float16 => bytes.extend_from_slice(&f16::from_f64(v).to_le_bytes()),
            DType::BFloat16 => bytes.extend_from_slice(&bf16::from_f64(v).to_le_bytes()),
            DType::Float32 => bytes.extend_from_slice(&(v as f32).to_le_bytes()),
            DType::Float64 => bytes.extend_from_slice(&v.to_le_bytes()),
            DType::Int8 => bytes.extend_from_slice(&(v as i8).to_le_bytes()),
            DType::Int16 => bytes.extend_from_slice(&(v as i16).to_le_bytes()),
            DType::Int32 => bytes.extend_from_slice(&(v as i32).to_le_bytes()),
            DType::Int64 => bytes.extend_from_slice(&(v as i64).to_le_bytes()),
            DType::UInt8 => bytes.push(v as u8),
            DType::Bool => bytes.push(u8::from(v != 0.0)),
        }
    }
    bytes
}

/// Decodes a little-endian buffer. Trailing bytes that do not form a whole
/// element are ignored; callers check the length first.
pub fn decode(dtype: DType, bytes: &[u8]) -> Vec<f64> {
    let size = dtype.size_in_bytes();
    bytes
        .chunks_exact(size)
        .map(|chunk| match dtype {
            DType::Float16 => f16::from_le_bytes([chunk[0], chunk[1]]).to_f64(),
            DType::BFloat16 => bf16::from_le_bytes([chunk[0], chunk[1]]).to_f64(),
            DType::Float32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            DType::Float64 => f64::from_le_bytes(chunk.try_into().unwrap_or([0; 8])),
            DType::Int8 => chunk[0] as i8 as f64,
            DType::Int16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            DType::Int32 => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            DType::Int64 => i64::from_le_bytes(chunk.try_into().unwrap_or([0; 8])) as f64,
            DType::UInt8 => chunk[0] as f64,
            DType::Bool => f64::from(u8::from(chunk[0] != 0)),
        })
        .collect()
}

/// Writes a tensor file, creating parent directories as needed.
pub fn write_tensor(path: &Path, dtype: DType, values: &[f64]) -> Result<(), TensorError> {
    let io_err = |source| TensorError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, encode(dtype, values)).map_err(io_err)
}

/// Reads a tensor file and checks its size against `shape` and `dtype`.
pub fn read_tensor(path: &Path, dtype: DType, shape: &[usize]) -> Result<Vec<f64>, TensorError> {
    let bytes = fs::read(path).map_err(|source| TensorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let expected = byte_len(shape, dtype);
    if bytes.len() as u64 != expected {
        return Err(TensorError::SizeMismatch {
            path: path.to_path_buf(),
            dtype: dtype.to_string(),
            elements: numel(shape),
            expected,
            actual: bytes.len() as u64,
        });
    }
    Ok(decode(dtype, &bytes))
}

/// True when `path` exists and has exactly the size a tensor of this shape
/// and dtype would have.
pub fn matches_size(path: &Path, dtype: DType, shape: &[usize]) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() == byte_len(shape, dtype))
        .unwrap_or(false)
}
