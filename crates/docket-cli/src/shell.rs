//! Line-oriented shell: dot-commands plus script evaluation

use docket_db::{Database, DbError};
use docket_eval::EvalRequest;
use docket_store::FindRequest;
use serde_json::{json, Value};
use thiserror::Error;

use crate::render::render_eval_error;

pub const HELP: &str = "\
.profile <0|1|2> [slowms]   set the profiling level, print the previous state
.status                     profiling level, threshold and log counters
.log [n]                    newest n profile records (default 5)
.insert <coll> <json>       insert a document
.find <coll> [json]         list documents matching a filter
.drop <coll>                drop a collection
.collections                list collections
.help                       this text
.quit                       leave the shell
anything else is evaluated as a script, e.g. db.t.findOne()";

const DEFAULT_LOG_LINES: usize = 5;

#[derive(Debug, PartialEq)]
pub enum Reply {
    Output(String),
    Quit,
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown command '.{0}', try .help")]
    UnknownCommand(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("error: {0}")]
    Db(#[from] DbError),

    /// A failed script, already rendered
    #[error("{0}")]
    Script(String),
}

pub struct Shell {
    db: Database,
    color: bool,
    json: bool,
}

impl Shell {
    /// `json` switches script results to serialized evaluation outcomes
    pub fn new(db: Database, color: bool, json: bool) -> Self {
        Self { db, color, json }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn execute(&self, input: &str) -> Result<Reply, ShellError> {
        let line = input.trim();
        if line.is_empty() {
            return Ok(Reply::Output(String::new()));
        }
        match line.strip_prefix('.') {
            Some(command) => self.command(command),
            None => self.evaluate(line),
        }
    }

    fn command(&self, command: &str) -> Result<Reply, ShellError> {
        let (name, rest) = split_word(command);
        match name {
            "quit" | "exit" => Ok(Reply::Quit),
            "help" => Ok(Reply::Output(HELP.to_string())),
            "profile" => {
                const USAGE: &str = ".profile <0|1|2> [slowms]";
                let mut parts = rest.split_whitespace();
                let level = parts
                    .next()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or(ShellError::Usage(USAGE))?;
                let slow_ms = match parts.next() {
                    Some(ms) => Some(ms.parse::<u64>().map_err(|_| ShellError::Usage(USAGE))?),
                    None => None,
                };
                let status = self.db.set_profiling_level(level, slow_ms)?;
                Ok(Reply::Output(serde_json::to_string(&status)?))
            }
            "status" => {
                let status = self.db.profiling_status();
                let profiler = self.db.profiler();
                let report = json!({
                    "db": self.db.name(),
                    "level": status.was,
                    "slowms": status.slow_ms,
                    "written": profiler.records_written(),
                    "failures": profiler.write_failures(),
                });
                Ok(Reply::Output(report.to_string()))
            }
            "log" => {
                let limit = if rest.is_empty() {
                    DEFAULT_LOG_LINES
                } else {
                    rest.parse()
                        .map_err(|_| ShellError::Usage(".log [n]"))?
                };
                let lines = self
                    .db
                    .profile_log(Some(limit))?
                    .iter()
                    .map(serde_json::to_string)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Reply::Output(lines.join("\n")))
            }
            "insert" => {
                let (coll, doc) = split_word(rest);
                if coll.is_empty() || doc.is_empty() {
                    return Err(ShellError::Usage(".insert <coll> <json>"));
                }
                let doc: Value = serde_json::from_str(doc)?;
                let id = self.db.insert(coll, doc)?;
                Ok(Reply::Output(format!("inserted {}", id)))
            }
            "find" => {
                let (coll, filter) = split_word(rest);
                if coll.is_empty() {
                    return Err(ShellError::Usage(".find <coll> [json]"));
                }
                let filter: Value = if filter.is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(filter)?
                };
                let result = self
                    .db
                    .find(coll, &FindRequest::new().with_filter(filter))?;
                let lines = result
                    .documents
                    .iter()
                    .map(serde_json::to_string)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Reply::Output(lines.join("\n")))
            }
            "drop" => {
                if rest.is_empty() {
                    return Err(ShellError::Usage(".drop <coll>"));
                }
                let dropped = self.db.drop_collection(rest)?;
                Ok(Reply::Output(
                    if dropped { "dropped" } else { "no such collection" }.to_string(),
                ))
            }
            "collections" => Ok(Reply::Output(self.db.collection_names().join("\n"))),
            other => Err(ShellError::UnknownCommand(other.to_string())),
        }
    }

    fn evaluate(&self, source: &str) -> Result<Reply, ShellError> {
        let evaluation = self.db.eval_request(&EvalRequest::new(source));
        if self.json {
            let outcome = serde_json::to_string(&evaluation.outcome(source))?;
            return match evaluation.result {
                Ok(_) => Ok(Reply::Output(outcome)),
                Err(_) => Err(ShellError::Script(outcome)),
            };
        }

        let mut lines = evaluation.logs;
        match evaluation.result {
            Ok(Value::Null) => Ok(Reply::Output(lines.join("\n"))),
            Ok(value) => {
                lines.push(serde_json::to_string_pretty(&value)?);
                Ok(Reply::Output(lines.join("\n")))
            }
            Err(err) => {
                lines.push(render_eval_error(source, &err, self.color));
                Err(ShellError::Script(lines.join("\n")))
            }
        }
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (s, ""),
    }
}

/// Whether `source` has unclosed brackets, so the shell should read another line
pub fn is_incomplete(source: &str) -> bool {
    let mut depth = 0i64;
    let mut quote: Option<char> = None;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            match c {
                '\\' => {
                    chars.next();
                }
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '/' if chars.peek() == Some(&'/') => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_db::DbConfig;

    fn shell() -> Shell {
        Shell::new(Database::open(DbConfig::default()).unwrap(), false, false)
    }

    fn output(shell: &Shell, input: &str) -> String {
        match shell.execute(input) {
            Ok(Reply::Output(text)) => text,
            other => panic!("{input}: unexpected {other:?}"),
        }
    }

    #[test]
    fn test_profiling_session() {
        let shell = shell();
        output(&shell, ".insert evalb {\"x\": 3}");
        assert_eq!(output(&shell, "db.evalb.findOne().x"), "3");
        assert_eq!(output(&shell, ".profile 2"), "{\"was\":0,\"slowms\":100}");
        assert_eq!(output(&shell, "db.evalb.findOne().x"), "3");

        let log = output(&shell, ".log 1");
        let record: Value = serde_json::from_str(&log).unwrap();
        assert_eq!(record["op"], "eval");
        assert!(record["info"].as_str().unwrap().contains("findOne().x"));

        assert_eq!(output(&shell, ".profile 0"), "{\"was\":2,\"slowms\":100}");
        let status: Value = serde_json::from_str(&output(&shell, ".status")).unwrap();
        assert_eq!(status["level"], 0);
        assert_eq!(status["written"], 2);
    }

    #[test]
    fn test_find_and_drop() {
        let shell = shell();
        output(&shell, ".insert t {\"a\": 1}");
        output(&shell, ".insert t {\"a\": 2}");
        let found = output(&shell, ".find t {\"a\": 2}");
        assert_eq!(found, "{\"_id\":2,\"a\":2}");
        assert_eq!(output(&shell, ".collections"), "t");
        assert_eq!(output(&shell, ".drop t"), "dropped");
        assert_eq!(output(&shell, ".drop t"), "no such collection");
    }

    #[test]
    fn test_print_output_precedes_value() {
        let shell = shell();
        assert_eq!(output(&shell, "print('hi'); 1 + 1"), "hi\n2");
        assert_eq!(output(&shell, "print('only')"), "only");
    }

    #[test]
    fn test_errors() {
        let shell = shell();
        assert!(matches!(shell.execute(".profile 7"), Err(ShellError::Db(DbError::InvalidProfilingLevel(7)))));
        assert!(matches!(shell.execute(".profile"), Err(ShellError::Usage(_))));
        assert!(matches!(shell.execute(".insert t {"), Err(ShellError::Json(_))));
        assert!(matches!(shell.execute(".bogus"), Err(ShellError::UnknownCommand(_))));
        match shell.execute("throw 'no'") {
            Err(ShellError::Script(text)) => assert!(text.contains("uncaught exception: no")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(shell.execute(".quit").unwrap(), Reply::Quit);
    }

    #[test]
    fn test_json_outcomes() {
        let shell = Shell::new(Database::open(DbConfig::default()).unwrap(), false, true);
        let ok: Value = serde_json::from_str(&output(&shell, "print('p'); [1]")).unwrap();
        assert_eq!(ok, json!({"value": [1], "logs": ["p"], "error": null}));
        match shell.execute("var = 1") {
            Err(ShellError::Script(text)) => {
                let outcome: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(outcome["error"]["error_type"], "parse");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_input() {
        assert!(is_incomplete("function() {"));
        assert!(is_incomplete("db.t.find({a: [1,"));
        assert!(!is_incomplete("db.t.find({a: '{'})"));
        assert!(!is_incomplete("1 // trailing {"));
        assert!(!is_incomplete("var s = \"\\\"(\";"));
    }
}
