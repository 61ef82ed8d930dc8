//! TOML test manifests.
//!
//! A manifest describes one function call, the buffers to load before it
//! and the expected output.
//!
//! # Example Manifest
//!
//! ```toml
//! [test]
//! name = "vector_add_3"
//! description = "Elementwise add of two length-3 vectors"
//!
//! [call]
//! function = "vector_add"
//! op0_addr = 0
//! op1_addr = 256
//! output_addr = 512
//! size = 3
//!
//! [buffers.op0]
//! memory = "relay"
//! addr = 0
//! element_type = "f32"
//! values = [1.0, 2.0, 3.0]
//!
//! [buffers.op1]
//! memory = "relay"
//! addr = 256
//! element_type = "f32"
//! size = 3
//!
//! [buffers.op1.pattern]
//! type = "sequential"
//! start = 10.0
//! step = 10.0
//!
//! [expected]
//! type = "reference"
//! ```
//!
//! Tensor-memory addresses are word addresses; vector-memory addresses are
//! byte addresses, matching the call arguments.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::relay::{FunctionCall, FunctionId, VectorOpKind};

/// Test manifest defining a single test case.
#[derive(Debug, Clone, Deserialize)]
pub struct TestManifest {
    pub test: TestInfo,
    pub call: CallDef,
    #[serde(default)]
    pub buffers: BTreeMap<String, BufferDef>,
    pub expected: ExpectedDef,
}

/// Basic test metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct TestInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Function to call and its arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct CallDef {
    pub function: String,
    #[serde(flatten)]
    pub args: toml::Table,
}

/// Which memory a buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// 8-bit tensor memory, word addresses.
    Tensor,
    /// 32-bit vector memory, byte addresses.
    Relay,
}

/// Element encoding of buffer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// Raw 8-bit word.
    U8,
    /// Raw 32-bit word.
    U32,
    /// IEEE-754 single, stored as its bit pattern.
    F32,
}

impl ElementType {
    /// Encode a manifest number as a memory word.
    pub fn encode(self, value: f64) -> u32 {
        match self {
            ElementType::U8 => value as i64 as u8 as u32,
            ElementType::U32 => value as i64 as u32,
            ElementType::F32 => (value as f32).to_bits(),
        }
    }
}

/// Buffer loaded before the call.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferDef {
    pub memory: MemoryKind,
    pub addr: u32,
    pub element_type: ElementType,
    /// Element count; required with a pattern.
    #[serde(default)]
    pub size: usize,
    #[serde(default)]
    pub pattern: Option<PatternDef>,
    /// Explicit values, used instead of a pattern.
    #[serde(default)]
    pub values: Option<Vec<f64>>,
}

/// Pattern for generating input data.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternDef {
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    #[serde(default)]
    pub start: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default)]
    pub value: f64,
    /// Values wrap around this modulus when non-zero (sequential only).
    #[serde(default)]
    pub modulo: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Sequential,
    Constant,
    Zeros,
}

fn default_step() -> f64 {
    1.0
}

/// Expected output definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedDef {
    #[serde(rename = "type")]
    pub expected_type: ExpectedType,
    #[serde(default)]
    pub values: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedType {
    /// Computed by the reference operators from the loaded buffers.
    Reference,
    /// Listed explicitly in `values`.
    Values,
}

impl TestManifest {
    /// Load a manifest from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    /// Parse a manifest from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The function call described by `[call]`.
    pub fn function_call(&self) -> Result<FunctionCall> {
        let func = FunctionId::from_name(&self.call.function)
            .ok_or_else(|| anyhow!("unknown function '{}'", self.call.function))?;
        let args = toml::Value::Table(self.call.args.clone());
        let call = match func {
            FunctionId::MaxPool2d => FunctionCall::MaxPool2d(args.try_into()?),
            FunctionId::NnDense => FunctionCall::Dense(args.try_into()?),
            FunctionId::Lstm => FunctionCall::Lstm(args.try_into()?),
            FunctionId::VectorAdd | FunctionId::VectorMultiply | FunctionId::VectorSigmoid | FunctionId::VectorTanh => {
                let kind = VectorOpKind::from_function(func)
                    .ok_or_else(|| anyhow!("'{}' is not a vector function", self.call.function))?;
                FunctionCall::Vector(kind, args.try_into()?)
            }
        };
        Ok(call)
    }

    /// Words to load for `buffer_name`.
    pub fn generate_input(&self, buffer_name: &str) -> Result<Vec<u32>> {
        let buffer = self
            .buffers
            .get(buffer_name)
            .ok_or_else(|| anyhow!("no buffer named '{}'", buffer_name))?;
        buffer.generate()
    }

    /// Explicit expected values encoded as words of `element_type`.
    pub fn expected_values(&self, element_type: ElementType) -> Result<Vec<u32>> {
        let values = self
            .expected
            .values
            .as_ref()
            .ok_or_else(|| anyhow!("expected type 'values' needs a values list"))?;
        Ok(values.iter().map(|&v| element_type.encode(v)).collect())
    }
}

impl BufferDef {
    /// Words of this buffer.
    pub fn generate(&self) -> Result<Vec<u32>> {
        if self.memory == MemoryKind::Tensor && self.element_type != ElementType::U8 {
            bail!("tensor memory buffers must be u8");
        }
        if let Some(values) = &self.values {
            return Ok(values.iter().map(|&v| self.element_type.encode(v)).collect());
        }
        let pattern = self
            .pattern
            .as_ref()
            .ok_or_else(|| anyhow!("buffer needs either values or a pattern"))?;

        let words = (0..self.size)
            .map(|i| {
                let value = match pattern.pattern_type {
                    PatternType::Sequential => {
                        let v = pattern.start + i as f64 * pattern.step;
                        if pattern.modulo > 0.0 {
                            v.rem_euclid(pattern.modulo)
                        } else {
                            v
                        }
                    }
                    PatternType::Constant => pattern.value,
                    PatternType::Zeros => 0.0,
                };
                self.element_type.encode(value)
            })
            .collect();
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{MaxPoolArgs, VectorArgs};

    const VECTOR_ADD: &str = r#"
[test]
name = "vector_add_3"

[call]
function = "vector_add"
op0_addr = 0
op1_addr = 256
output_addr = 512
size = 3

[buffers.op0]
memory = "relay"
addr = 0
element_type = "f32"
values = [1.0, 2.0, 3.0]

[buffers.op1]
memory = "relay"
addr = 256
element_type = "f32"
size = 3

[buffers.op1.pattern]
type = "sequential"
start = 10.0
step = 10.0

[expected]
type = "values"
values = [11.0, 22.0, 33.0]
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = TestManifest::parse(VECTOR_ADD).unwrap();
        assert_eq!(manifest.test.name, "vector_add_3");
        assert_eq!(manifest.buffers.len(), 2);
        assert_eq!(
            manifest.function_call().unwrap(),
            FunctionCall::Vector(
                VectorOpKind::Add,
                VectorArgs {
                    op0_addr: 0,
                    op1_addr: 256,
                    output_addr: 512,
                    size: 3
                }
            )
        );
    }

    #[test]
    fn test_generate_inputs() {
        let manifest = TestManifest::parse(VECTOR_ADD).unwrap();
        let op1 = manifest.generate_input("op1").unwrap();
        let expected: Vec<u32> = [10.0f32, 20.0, 30.0].iter().map(|v| v.to_bits()).collect();
        assert_eq!(op1, expected);
        assert_eq!(
            manifest.expected_values(ElementType::F32).unwrap(),
            [11.0f32, 22.0, 33.0].iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
        assert!(manifest.generate_input("missing").is_err());
    }

    #[test]
    fn test_maxpool_call_and_modulo_pattern() {
        let manifest = TestManifest::parse(
            r#"
[test]
name = "pool"

[call]
function = "max_pool2d"
height = 4
width = 4
pool_y = 2
pool_x = 2
stride_y = 2
stride_x = 2

[buffers.input]
memory = "tensor"
addr = 0
element_type = "u8"
size = 6

[buffers.input.pattern]
type = "sequential"
start = 0
step = 3
modulo = 8

[expected]
type = "reference"
"#,
        )
        .unwrap();
        let call = manifest.function_call().unwrap();
        assert!(matches!(call, FunctionCall::MaxPool2d(MaxPoolArgs { height: 4, .. })));
        assert_eq!(manifest.generate_input("input").unwrap(), vec![0, 3, 6, 1, 4, 7]);
    }

    #[test]
    fn test_rejects_bad_manifests() {
        let missing_arg = VECTOR_ADD.replace("function = \"vector_add\"", "function = \"max_pool2d\"");
        let manifest = TestManifest::parse(&missing_arg).unwrap();
        assert!(manifest.function_call().is_err());

        let unknown = VECTOR_ADD.replace("vector_add\"", "conv2d\"");
        let manifest = TestManifest::parse(&unknown).unwrap();
        assert!(manifest.function_call().is_err());

        let f32_tensor = BufferDef {
            memory: MemoryKind::Tensor,
            addr: 0,
            element_type: ElementType::F32,
            size: 1,
            pattern: None,
            values: Some(vec![1.0]),
        };
        assert!(f32_tensor.generate().is_err());
    }

    #[test]
    fn test_element_encoding() {
        assert_eq!(ElementType::U8.encode(300.0), 44);
        assert_eq!(ElementType::U32.encode(-1.0), u32::MAX);
        assert_eq!(ElementType::F32.encode(1.5), 1.5f32.to_bits());
    }
}
