use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::access::DataAccess;
use crate::config::EvalConfig;
use crate::error::{format_error, EvalError, EvalErrorInfo};
use crate::interpreter::Interpreter;

/// A script and the arguments it is invoked with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRequest {
    pub script_body: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl EvalRequest {
    pub fn new(script_body: impl Into<String>) -> Self {
        Self {
            script_body: script_body.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

/// Result of one script run together with everything it printed
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub result: Result<Value, EvalError>,
    pub logs: Vec<String>,
    pub elapsed: Duration,
}

impl Evaluation {
    /// Serializable form; `source` resolves error spans to line numbers
    pub fn outcome(&self, source: &str) -> EvalOutcome {
        match &self.result {
            Ok(value) => EvalOutcome {
                value: Some(value.clone()),
                logs: self.logs.clone(),
                error: None,
            },
            Err(err) => EvalOutcome {
                value: None,
                logs: self.logs.clone(),
                error: Some(format_error(err, source)),
            },
        }
    }
}

/// Serializable outcome of an evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub value: Option<Value>,
    pub logs: Vec<String>,
    pub error: Option<EvalErrorInfo>,
}

/// Parses and runs scripts against a [`DataAccess`]
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    config: EvalConfig,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Run a script once. Data-access calls made before a failure stay applied.
    pub fn evaluate(&self, access: &dyn DataAccess, request: &EvalRequest) -> Evaluation {
        let started = Instant::now();
        let script = match docket_parser::parse(&request.script_body) {
            Ok(script) => script,
            Err(err) => {
                debug!(error = %err, "eval.parse.failed");
                return Evaluation {
                    result: Err(err.into()),
                    logs: Vec::new(),
                    elapsed: started.elapsed(),
                };
            }
        };

        let mut interpreter = Interpreter::new(access, &self.config);
        let result = interpreter.run(&script, &request.args);
        let logs = interpreter.into_logs();
        let elapsed = started.elapsed();
        debug!(
            db = access.db_name(),
            ok = result.is_ok(),
            micros = elapsed.as_micros() as u64,
            "eval.finished"
        );
        Evaluation {
            result,
            logs,
            elapsed,
        }
    }
}
