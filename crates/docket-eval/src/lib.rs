//! docket-eval: sandboxed server-side scripts
//!
//! Scripts are a small JavaScript subset, parsed by `docket-parser` and run
//! by a tree-walking interpreter. The only way a script reaches stored data
//! is the global `db`, backed by a [`DataAccess`] supplied by the caller.

mod access;
mod config;
mod error;
mod executor;
mod interpreter;
mod value;

pub use access::{AccessError, DataAccess};
pub use config::EvalConfig;
pub use error::{format_error, EvalError, EvalErrorInfo};
pub use executor::{EvalOutcome, EvalRequest, Evaluation, Evaluator};
pub use value::{format_float, Object, ScriptValue};
