use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::TreeError;

/// Selection kept around each listed term by the filter operation.
pub const FILTER_SELECTION: &str = "self ancestors descendants annotations";

/// One blocking call into the external reasoning engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOperation {
    Construct {
        dataset: Utf8PathBuf,
        query: Utf8PathBuf,
        output: Utf8PathBuf,
    },
    Filter {
        input: Utf8PathBuf,
        term_file: Utf8PathBuf,
        output: Utf8PathBuf,
    },
    Merge {
        base: Utf8PathBuf,
        addition: Utf8PathBuf,
        output: Utf8PathBuf,
    },
}

impl EngineOperation {
    pub fn name(&self) -> &'static str {
        match self {
            EngineOperation::Construct { .. } => "construct",
            EngineOperation::Filter { .. } => "filter",
            EngineOperation::Merge { .. } => "merge",
        }
    }

    pub fn output(&self) -> &Utf8Path {
        match self {
            EngineOperation::Construct { output, .. }
            | EngineOperation::Filter { output, .. }
            | EngineOperation::Merge { output, .. } => output,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stderr: String,
}

impl EngineStatus {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            code: Some(code),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    fn describe(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        };
        let stderr = self.stderr.lines().last().unwrap_or("").trim();
        if stderr.is_empty() {
            status
        } else {
            format!("{status}: {stderr}")
        }
    }
}

pub trait ReasoningEngine {
    /// Runs the operation to completion. `Err` means the engine could not be
    /// started at all.
    fn execute(&self, operation: &EngineOperation) -> Result<EngineStatus, TreeError>;
}

impl<E: ReasoningEngine + ?Sized> ReasoningEngine for &E {
    fn execute(&self, operation: &EngineOperation) -> Result<EngineStatus, TreeError> {
        (**self).execute(operation)
    }
}

/// ROBOT driven through a single external process per operation.
#[derive(Debug, Clone)]
pub struct RobotEngine {
    program: String,
    args: Vec<String>,
    prefixes: BTreeMap<String, String>,
}

impl RobotEngine {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            prefixes: config.prefixes.clone(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn command_args(&self, operation: &EngineOperation) -> Vec<String> {
        let mut args = self.args.clone();
        match operation {
            EngineOperation::Construct {
                dataset,
                query,
                output,
            } => {
                args.extend([
                    "query".to_string(),
                    "--tdb".to_string(),
                    "true".to_string(),
                    "--input".to_string(),
                    dataset.to_string(),
                    "--query".to_string(),
                    query.to_string(),
                    output.to_string(),
                ]);
            }
            EngineOperation::Filter {
                input,
                term_file,
                output,
            } => {
                for (prefix, base) in &self.prefixes {
                    args.push("--prefix".to_string());
                    args.push(format!("{prefix}: {base}"));
                }
                args.extend([
                    "filter".to_string(),
                    "--input".to_string(),
                    input.to_string(),
                    "--term-file".to_string(),
                    term_file.to_string(),
                    "--select".to_string(),
                    FILTER_SELECTION.to_string(),
                    "--output".to_string(),
                    output.to_string(),
                ]);
            }
            EngineOperation::Merge {
                base,
                addition,
                output,
            } => {
                args.extend([
                    "merge".to_string(),
                    "--input".to_string(),
                    base.to_string(),
                    "--input".to_string(),
                    addition.to_string(),
                    "--output".to_string(),
                    output.to_string(),
                ]);
            }
        }
        args
    }
}

impl ReasoningEngine for RobotEngine {
    fn execute(&self, operation: &EngineOperation) -> Result<EngineStatus, TreeError> {
        let args = self.command_args(operation);
        debug!(program = %self.program, ?args, "running reasoning engine");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|err| TreeError::EngineSpawn {
                program: self.program.clone(),
                message: err.to_string(),
            })?;
        Ok(EngineStatus {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    pub attempts: u32,
    pub cause: String,
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.attempts {
            0 | 1 => write!(f, "{}", self.cause),
            attempts => write!(f, "{} (after {attempts} attempts)", self.cause),
        }
    }
}

/// Bounded retry around engine calls. The default allows one retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

impl RetryPolicy {
    /// Returns the number of attempts used on success.
    pub fn run<E: ReasoningEngine + ?Sized>(
        &self,
        engine: &E,
        operation: &EngineOperation,
    ) -> Result<u32, EngineFailure> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let cause = match engine.execute(operation) {
                Ok(status) if status.is_success() => return Ok(attempt),
                Ok(status) => status.describe(),
                Err(err) => err.to_string(),
            };
            if attempt >= max_attempts {
                return Err(EngineFailure {
                    attempts: attempt,
                    cause,
                });
            }
            warn!(operation = operation.name(), attempt, %cause, "engine call failed, retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Scripted {
        codes: RefCell<Vec<i32>>,
        calls: RefCell<u32>,
    }

    impl Scripted {
        fn new(codes: &[i32]) -> Self {
            Self {
                codes: RefCell::new(codes.iter().rev().copied().collect()),
                calls: RefCell::new(0),
            }
        }
    }

    impl ReasoningEngine for Scripted {
        fn execute(&self, _operation: &EngineOperation) -> Result<EngineStatus, TreeError> {
            *self.calls.borrow_mut() += 1;
            let code = self.codes.borrow_mut().pop().unwrap_or(0);
            Ok(EngineStatus::exit(code))
        }
    }

    fn construct() -> EngineOperation {
        EngineOperation::Construct {
            dataset: Utf8PathBuf::from("b/dataset.rdf"),
            query: Utf8PathBuf::from("b/build-subtree.rq"),
            output: Utf8PathBuf::from("b/subtree.partial.ttl"),
        }
    }

    #[test]
    fn succeeds_on_retry() {
        let engine = Scripted::new(&[1, 0]);
        assert_eq!(RetryPolicy::default().run(&engine, &construct()), Ok(2));
        assert_eq!(*engine.calls.borrow(), 2);
    }

    #[test]
    fn gives_up_after_second_failure() {
        let engine = Scripted::new(&[1, 3, 0]);
        let failure = RetryPolicy::default().run(&engine, &construct()).unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.cause, "exit status 3");
        assert_eq!(*engine.calls.borrow(), 2);
    }

    #[test]
    fn filter_arguments_carry_prefixes_and_selection() {
        let engine = RobotEngine::from_config(&EngineConfig::default());
        let args = engine.command_args(&EngineOperation::Filter {
            input: Utf8PathBuf::from("b/subtree.ttl"),
            term_file: Utf8PathBuf::from("b/active-terms.txt"),
            output: Utf8PathBuf::from("b/subtree.partial.ttl"),
        });
        assert_eq!(&args[..3], ["-Xmx8G", "-jar", "util/robot.jar"]);
        assert!(args.contains(&"UniProt: http://www.uniprot.org/uniprot/".to_string()));
        let select = args.iter().position(|arg| arg == "--select").unwrap();
        assert_eq!(args[select + 1], FILTER_SELECTION);
        assert_eq!(args.last().map(String::as_str), Some("b/subtree.partial.ttl"));
    }

    #[test]
    fn construct_arguments_end_with_output() {
        let engine = RobotEngine::from_config(&EngineConfig::default());
        let args = engine.command_args(&construct());
        let query = args.iter().position(|arg| arg == "query").unwrap();
        assert_eq!(
            &args[query..],
            [
                "query",
                "--tdb",
                "true",
                "--input",
                "b/dataset.rdf",
                "--query",
                "b/build-subtree.rq",
                "b/subtree.partial.ttl"
            ]
        );
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let engine = RobotEngine::from_config(&EngineConfig {
            program: "protein-tree-no-such-engine".to_string(),
            args: Vec::new(),
            prefixes: BTreeMap::new(),
        });
        let err = engine.execute(&construct()).unwrap_err();
        assert!(matches!(err, TreeError::EngineSpawn { .. }));
    }
}
