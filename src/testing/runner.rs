//! Manifest-driven test execution.
//!
//! The runner builds a fresh accelerator per manifest, loads its buffers,
//! issues the call, runs to idle and compares the output region word for
//! word against either explicit values or the [`reference`](super::reference)
//! operators evaluated on the same inputs.

use std::path::Path;

use anyhow::{bail, Context, Result};

use super::manifest::{BufferDef, ElementType, ExpectedType, MemoryKind, TestManifest};
use super::reference::{self, LstmWeights};
use crate::config::Config;
use crate::primitives::{Ieee754Ops, PrimitiveOps, SharedOps};
use crate::relay::{FunctionCall, RelayAccelerator};

/// Result of running a test.
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub correct_count: usize,
    pub total_count: usize,
    pub steps: u64,
    pub first_mismatch: Option<MismatchInfo>,
    pub error: Option<String>,
    /// Final register state, when the runner was asked to dump it.
    pub state: Option<String>,
}

/// Information about a mismatched output word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MismatchInfo {
    pub index: usize,
    pub expected: u32,
    pub actual: u32,
}

impl TestResult {
    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            correct_count: 0,
            total_count: 0,
            steps: 0,
            first_mismatch: None,
            error: Some(error),
            state: None,
        }
    }

    /// One-line summary for console output.
    pub fn summary(&self) -> String {
        if let Some(err) = &self.error {
            return format!("FAIL {}: {}", self.name, err);
        }
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut line = format!(
            "{} {}: {}/{} words match ({} steps)",
            status, self.name, self.correct_count, self.total_count, self.steps
        );
        if let Some(m) = &self.first_mismatch {
            line.push_str(&format!(
                ", first mismatch at {}: expected {:#010x}, got {:#010x}",
                m.index, m.expected, m.actual
            ));
        }
        line
    }
}

/// Operand data captured before the call, since max-pooling writes in place.
enum Operands {
    Tensor(Vec<u8>),
    Words(Vec<Vec<u32>>),
}

/// Test runner that executes manifest-based tests.
pub struct ManifestRunner {
    config: Config,
    ops: SharedOps,
    dump_state: bool,
}

impl ManifestRunner {
    /// Runner using the global configuration and the IEEE-754 backend.
    pub fn new() -> Self {
        Self {
            config: Config::get().clone(),
            ops: Ieee754Ops::shared(),
            dump_state: false,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Replace the primitive backend used by both model and reference.
    pub fn with_ops(mut self, ops: SharedOps) -> Self {
        self.ops = ops;
        self
    }

    /// Keep the final register state in each [`TestResult`].
    pub fn with_dump_state(mut self, dump_state: bool) -> Self {
        self.dump_state = dump_state;
        self
    }

    /// Load and run a manifest file. Load errors are reported in the result.
    pub fn run_file(&self, path: &Path) -> TestResult {
        match TestManifest::from_file(path) {
            Ok(manifest) => self.run(&manifest),
            Err(e) => {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                TestResult::failed(&name, format!("{:#}", e))
            }
        }
    }

    /// Run a parsed manifest.
    pub fn run(&self, manifest: &TestManifest) -> TestResult {
        match self.try_run(manifest) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("{}: {:#}", manifest.test.name, e);
                TestResult::failed(&manifest.test.name, format!("{:#}", e))
            }
        }
    }

    fn try_run(&self, manifest: &TestManifest) -> Result<TestResult> {
        let call = manifest.function_call()?;
        let mut acc = RelayAccelerator::new(&self.config, self.ops.clone())?;

        for (name, buffer) in &manifest.buffers {
            load_buffer(&mut acc, buffer).with_context(|| format!("buffer '{}'", name))?;
        }
        let operands = capture_operands(&acc, &call)?;

        let summary = acc.call(&call).with_context(|| format!("running {}", call))?;
        if !summary.reached_idle {
            bail!("{} did not finish within {} steps", call, acc.max_steps());
        }

        let expected = match manifest.expected.expected_type {
            ExpectedType::Values => manifest.expected_values(output_element_type(&call))?,
            ExpectedType::Reference => evaluate_reference(self.ops.as_ref(), &call, &operands),
        };
        let actual = read_output(&acc, &call)?;
        if expected.len() != actual.len() {
            bail!("expected {} output words, model produced {}", expected.len(), actual.len());
        }

        let mut correct_count = 0;
        let mut first_mismatch = None;
        for (index, (&e, &a)) in expected.iter().zip(&actual).enumerate() {
            if e == a {
                correct_count += 1;
            } else if first_mismatch.is_none() {
                first_mismatch = Some(MismatchInfo {
                    index,
                    expected: e,
                    actual: a,
                });
            }
        }

        Ok(TestResult {
            name: manifest.test.name.clone(),
            passed: correct_count == expected.len(),
            correct_count,
            total_count: expected.len(),
            steps: summary.steps,
            first_mismatch,
            error: None,
            state: self.dump_state.then(|| acc.state_dump()),
        })
    }
}

impl Default for ManifestRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn load_buffer(acc: &mut RelayAccelerator, buffer: &BufferDef) -> Result<()> {
    let words = buffer.generate()?;
    match buffer.memory {
        MemoryKind::Tensor => {
            let bytes: Vec<u8> = words.iter().map(|&w| w as u8).collect();
            acc.load_tensor(buffer.addr as u64, &bytes)?;
        }
        MemoryKind::Relay => acc.load_words(buffer.addr, &words)?,
    }
    Ok(())
}

fn output_element_type(call: &FunctionCall) -> ElementType {
    match call {
        FunctionCall::MaxPool2d(_) => ElementType::U8,
        _ => ElementType::F32,
    }
}

fn capture_operands(acc: &RelayAccelerator, call: &FunctionCall) -> Result<Operands> {
    let operands = match call {
        FunctionCall::MaxPool2d(a) => {
            let len = a.height as usize * a.width as usize;
            Operands::Tensor(acc.read_tensor(0, len)?)
        }
        FunctionCall::Vector(kind, a) => {
            let len = a.size as usize;
            let mut words = vec![acc.read_words(a.op0_addr, len)?];
            if kind.is_binary() {
                words.push(acc.read_words(a.op1_addr, len)?);
            }
            Operands::Words(words)
        }
        FunctionCall::Dense(a) => {
            let (n_in, n_out) = (a.input_size as usize, a.output_size as usize);
            Operands::Words(vec![
                acc.read_words(a.weight_addr, n_in * n_out)?,
                acc.read_words(a.bias_addr, n_out)?,
                acc.read_words(a.input_addr, n_in)?,
            ])
        }
        FunctionCall::Lstm(a) => {
            let (n_in, h) = (a.input_size as usize, a.hidden_size as usize);
            Operands::Words(vec![
                acc.read_words(a.input_addr, n_in)?,
                acc.read_words(a.hidden_addr, h)?,
                acc.read_words(a.cell_addr, h)?,
                acc.read_words(a.i2h_weight_addr, 4 * h * n_in)?,
                acc.read_words(a.i2h_bias_addr, 4 * h)?,
                acc.read_words(a.h2h_weight_addr, 4 * h * h)?,
                acc.read_words(a.h2h_bias_addr, 4 * h)?,
            ])
        }
    };
    Ok(operands)
}

fn evaluate_reference(ops: &dyn PrimitiveOps, call: &FunctionCall, operands: &Operands) -> Vec<u32> {
    match (call, operands) {
        (FunctionCall::MaxPool2d(a), Operands::Tensor(input)) => reference::max_pool2d(ops, input, a)
            .into_iter()
            .map(u32::from)
            .collect(),
        (FunctionCall::Vector(kind, _), Operands::Words(w)) => {
            let b = w.get(1).map(Vec::as_slice).unwrap_or(&[]);
            reference::vector(ops, *kind, &w[0], b)
        }
        (FunctionCall::Dense(a), Operands::Words(w)) => reference::dense(
            ops,
            &w[0],
            &w[1],
            &w[2],
            a.input_size as usize,
            a.output_size as usize,
        ),
        (FunctionCall::Lstm(_), Operands::Words(w)) => {
            let weights = LstmWeights {
                w_ih: &w[3],
                b_ih: &w[4],
                w_hh: &w[5],
                b_hh: &w[6],
            };
            let (mut hidden, cell) = reference::lstm_cell(ops, &weights, &w[0], &w[1], &w[2]);
            hidden.extend(cell);
            hidden
        }
        _ => Vec::new(),
    }
}

/// Output region of `call`. LSTM reports the next hidden state followed by
/// the next cell state.
fn read_output(acc: &RelayAccelerator, call: &FunctionCall) -> Result<Vec<u32>> {
    let words = match call {
        FunctionCall::MaxPool2d(a) => {
            let (oh, ow) = a.output_dims();
            acc.read_tensor(0, (oh * ow) as usize)?
                .into_iter()
                .map(u32::from)
                .collect()
        }
        FunctionCall::Vector(_, a) => acc.read_words(a.output_addr, a.size as usize)?,
        FunctionCall::Dense(a) => acc.read_words(a.output_addr, a.output_size as usize)?,
        FunctionCall::Lstm(a) => {
            let h = a.hidden_size as usize;
            let mut words = acc.read_words(a.next_hidden_addr, h)?;
            words.extend(acc.read_words(a.next_cell_addr, h)?);
            words
        }
    };
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ManifestRunner {
        ManifestRunner::new().with_config(Config {
            tensor_mem_depth: Some(4096),
            relay_mem_depth: Some(8192),
            max_steps: Some(100_000),
            ..Config::default()
        })
    }

    fn run(toml: &str) -> TestResult {
        runner().run(&TestManifest::parse(toml).unwrap())
    }

    #[test]
    fn test_maxpool_against_reference() {
        let result = run(r#"
[test]
name = "maxpool_6x6"

[call]
function = "max_pool2d"
height = 6
width = 6
pool_y = 3
pool_x = 2
stride_y = 3
stride_x = 2

[buffers.input]
memory = "tensor"
addr = 0
element_type = "u8"
size = 36

[buffers.input.pattern]
type = "sequential"
start = 7
step = 13
modulo = 100

[expected]
type = "reference"
"#);
        assert!(result.passed, "{}", result.summary());
        assert_eq!(result.total_count, 6);
        assert!(result.state.is_none());
    }

    #[test]
    fn test_vector_values_and_mismatch() {
        let manifest = r#"
[test]
name = "vector_mul"

[call]
function = "vector_multiply"
op0_addr = 0
op1_addr = 64
output_addr = 128
size = 3

[buffers.a]
memory = "relay"
addr = 0
element_type = "f32"
values = [1.0, 2.0, 3.0]

[buffers.b]
memory = "relay"
addr = 64
element_type = "f32"
size = 3

[buffers.b.pattern]
type = "constant"
value = 2.0

[expected]
type = "values"
values = [2.0, 4.0, 6.0]
"#;
        let result = runner()
            .with_dump_state(true)
            .run(&TestManifest::parse(manifest).unwrap());
        assert!(result.passed, "{}", result.summary());
        assert_eq!(result.steps, 4);
        assert!(result.state.unwrap().contains("relay.relay_vector_op_size = 0x3"));

        let result = run(&manifest.replace("[2.0, 4.0, 6.0]", "[2.0, 5.0, 6.0]"));
        assert!(!result.passed);
        assert_eq!(result.correct_count, 2);
        assert_eq!(
            result.first_mismatch,
            Some(MismatchInfo {
                index: 1,
                expected: 5.0f32.to_bits(),
                actual: 4.0f32.to_bits(),
            })
        );
        assert!(result.summary().starts_with("FAIL vector_mul"));
    }

    #[test]
    fn test_dense_and_lstm_against_reference() {
        let dense = run(r#"
[test]
name = "dense_3x2"

[call]
function = "dense"
input_size = 3
output_size = 2
weight_addr = 0
bias_addr = 64
input_addr = 128
output_addr = 192

[buffers.w]
memory = "relay"
addr = 0
element_type = "f32"
size = 6

[buffers.w.pattern]
type = "sequential"
start = -1.0
step = 0.5

[buffers.bias]
memory = "relay"
addr = 64
element_type = "f32"
values = [0.25, -0.25]

[buffers.x]
memory = "relay"
addr = 128
element_type = "f32"
values = [1.0, 2.0, 3.0]

[expected]
type = "reference"
"#);
        assert!(dense.passed, "{}", dense.summary());

        let lstm = run(r#"
[test]
name = "lstm_2x2"

[call]
function = "lstm"
input_size = 2
hidden_size = 2
input_addr = 0
hidden_addr = 64
cell_addr = 128
next_hidden_addr = 192
next_cell_addr = 256
i2h_weight_addr = 512
i2h_bias_addr = 1024
h2h_weight_addr = 1536
h2h_bias_addr = 2048
temp0_addr = 2560
temp1_addr = 3072
temp2_addr = 3584

[buffers.x]
memory = "relay"
addr = 0
element_type = "f32"
values = [0.5, -1.0]

[buffers.hidden]
memory = "relay"
addr = 64
element_type = "f32"
values = [0.1, 0.2]

[buffers.cell]
memory = "relay"
addr = 128
element_type = "f32"
values = [-0.3, 0.4]

[buffers.w_ih]
memory = "relay"
addr = 512
element_type = "f32"
size = 16

[buffers.w_ih.pattern]
type = "sequential"
start = -0.8
step = 0.1

[buffers.b_ih]
memory = "relay"
addr = 1024
element_type = "f32"
size = 8

[buffers.b_ih.pattern]
type = "constant"
value = 0.05

[buffers.w_hh]
memory = "relay"
addr = 1536
element_type = "f32"
size = 16

[buffers.w_hh.pattern]
type = "sequential"
start = 0.4
step = -0.05

[buffers.b_hh]
memory = "relay"
addr = 2048
element_type = "f32"
size = 8

[buffers.b_hh.pattern]
type = "zeros"

[expected]
type = "reference"
"#);
        assert!(lstm.passed, "{}", lstm.summary());
        assert_eq!(lstm.total_count, 4);
    }

    #[test]
    fn test_errors_reported_in_result() {
        let result = run(r#"
[test]
name = "bad_stride"

[call]
function = "max_pool2d"
height = 4
width = 4
pool_y = 2
pool_x = 2
stride_y = 0
stride_x = 2

[expected]
type = "reference"
"#);
        assert!(!result.passed);
        assert!(result.error.is_some());

        let missing = runner().run_file(Path::new("/nonexistent/manifest.toml"));
        assert_eq!(missing.name, "manifest");
        assert!(missing.error.unwrap().contains("Failed to read manifest"));
    }
}
