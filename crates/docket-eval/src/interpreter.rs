//! Tree-walking interpreter over the script AST
//!
//! All variables live in one flat scope per run; `var`, `let` and `const`
//! behave alike. The deadline and operation budget are checked before every
//! statement, on every loop iteration and around every host call.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use docket_ast::{BinaryOp, Expr, ExprKind, LogicalOp, Script, Span, Stmt, StmtKind, UnaryOp};
use serde_json::{json, Value};
use tracing::trace;

use crate::access::{AccessError, DataAccess};
use crate::config::EvalConfig;
use crate::error::EvalError;
use crate::value::{Builtin, Cursor, Links, Object, ScriptValue};

/// Why execution stopped early
enum Fault {
    Error { message: String, span: Span },
    Thrown { value: ScriptValue, span: Span },
    Timeout,
}

type Exec<T> = Result<T, Fault>;

enum Flow {
    Normal,
    Return(ScriptValue),
}

fn fail<T>(message: impl Into<String>, span: Span) -> Exec<T> {
    Err(Fault::Error {
        message: message.into(),
        span,
    })
}

pub(crate) struct Interpreter<'a> {
    access: &'a dyn DataAccess,
    config: &'a EvalConfig,
    deadline: Option<Instant>,
    operations: u64,
    vars: HashMap<String, ScriptValue>,
    logs: Vec<String>,
    /// Value of the latest expression statement; the result of a bare body without `return`
    last_value: ScriptValue,
    /// Emptied when the interpreter is dropped, which frees reference cycles
    links: Links,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(access: &'a dyn DataAccess, config: &'a EvalConfig) -> Self {
        let mut vars = HashMap::new();
        vars.insert("db".to_string(), ScriptValue::Db);
        vars.insert("print".to_string(), ScriptValue::Builtin(Builtin::Print));
        vars.insert("tojson".to_string(), ScriptValue::Builtin(Builtin::ToJson));
        Self {
            access,
            config,
            deadline: Instant::now().checked_add(config.timeout),
            operations: 0,
            vars,
            logs: Vec::new(),
            last_value: ScriptValue::Undefined,
            links: Links::default(),
        }
    }

    pub(crate) fn run(&mut self, script: &Script, args: &[Value]) -> Result<Value, EvalError> {
        let arg_values: Vec<ScriptValue> = args.iter().map(ScriptValue::from_json).collect();
        if let Script::Function { params, .. } = script {
            for (i, param) in params.iter().enumerate() {
                let value = arg_values.get(i).cloned().unwrap_or(ScriptValue::Undefined);
                self.vars.insert(param.clone(), value);
            }
        }
        self.vars
            .insert("args".to_string(), ScriptValue::array(arg_values));

        let value = match self.exec_block(script.statements()) {
            Ok(Flow::Return(value)) => value,
            Ok(Flow::Normal) => match script {
                Script::Function { .. } => ScriptValue::Undefined,
                Script::Body { .. } => std::mem::replace(&mut self.last_value, ScriptValue::Undefined),
            },
            Err(fault) => return Err(self.fault_error(fault)),
        };
        value.to_json().map_err(|message| EvalError::Runtime {
            message,
            span: Some(script.span()),
        })
    }

    pub(crate) fn into_logs(self) -> Vec<String> {
        self.logs
    }

    fn fault_error(&self, fault: Fault) -> EvalError {
        match fault {
            Fault::Error { message, span } => EvalError::Runtime {
                message,
                span: Some(span),
            },
            Fault::Thrown { value, span } => EvalError::Runtime {
                message: format!("uncaught exception: {}", value.display_string()),
                span: Some(span),
            },
            Fault::Timeout => EvalError::Timeout {
                ms: u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
            },
        }
    }

    fn check_deadline(&self) -> Exec<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Fault::Timeout),
            _ => Ok(()),
        }
    }

    fn tick(&mut self, span: Span) -> Exec<()> {
        self.operations += 1;
        if self.operations > self.config.max_operations {
            return fail(
                format!("operation limit of {} exceeded", self.config.max_operations),
                span,
            );
        }
        self.check_deadline()
    }

    // ===== Statements =====

    fn exec_block(&mut self, stmts: &[Stmt]) -> Exec<Flow> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec_stmt(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Exec<Flow> {
        self.tick(stmt.span)?;
        match &stmt.kind {
            StmtKind::Var { name, init } => {
                match init {
                    Some(init) => {
                        let value = self.eval(init)?;
                        self.vars.insert(name.clone(), value);
                    }
                    None => {
                        self.vars
                            .entry(name.clone())
                            .or_insert(ScriptValue::Undefined);
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                self.last_value = self.eval(expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => ScriptValue::Undefined,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Throw(expr) => {
                let value = self.eval(expr)?;
                Err(Fault::Thrown {
                    value,
                    span: stmt.span,
                })
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond)?.truthy() {
                    self.exec_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    self.tick(stmt.span)?;
                    if !self.eval(cond)?.truthy() {
                        break;
                    }
                    if let Flow::Return(value) = self.exec_block(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.exec_stmt(init)?;
                }
                loop {
                    self.tick(stmt.span)?;
                    if let Some(cond) = cond {
                        if !self.eval(cond)?.truthy() {
                            break;
                        }
                    }
                    if let Flow::Return(value) = self.exec_block(body)? {
                        return Ok(Flow::Return(value));
                    }
                    if let Some(step) = step {
                        self.eval(step)?;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Block(stmts) => self.exec_block(stmts),
            StmtKind::Empty => Ok(Flow::Normal),
        }
    }

    // ===== Expressions =====

    fn eval(&mut self, expr: &Expr) -> Exec<ScriptValue> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Null => Ok(ScriptValue::Null),
            ExprKind::Undefined => Ok(ScriptValue::Undefined),
            ExprKind::Bool(b) => Ok(ScriptValue::Bool(*b)),
            ExprKind::Int(n) => Ok(ScriptValue::Int(*n)),
            ExprKind::Float(f) => Ok(ScriptValue::Float(*f)),
            ExprKind::String(s) => Ok(ScriptValue::string(s)),
            ExprKind::Ident(name) => match self.vars.get(name) {
                Some(value) => Ok(value.clone()),
                None => fail(format!("{} is not defined", name), span),
            },
            ExprKind::Array(items) => {
                if items.len() > self.config.max_array_size {
                    return fail("array too large", span);
                }
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                let nests = values.iter().any(ScriptValue::is_container);
                let array = ScriptValue::array(values);
                if nests {
                    self.links.note(&array);
                }
                Ok(array)
            }
            ExprKind::Object(fields) => {
                let mut obj = Object::new();
                let mut nests = false;
                for (key, value) in fields {
                    let value = self.eval(value)?;
                    nests |= value.is_container();
                    obj.set(key.clone(), value);
                }
                let object = ScriptValue::object(obj);
                if nests {
                    self.links.note(&object);
                }
                Ok(object)
            }
            ExprKind::Member { object, property } => {
                let object = self.eval(object)?;
                self.get_property(&object, property, span)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.get_index(&object, &index, span)
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, span),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(ScriptValue::Bool(!value.truthy())),
                    UnaryOp::Neg => match value {
                        ScriptValue::Int(n) => Ok(n
                            .checked_neg()
                            .map(ScriptValue::Int)
                            .unwrap_or(ScriptValue::Float(-(n as f64)))),
                        ScriptValue::Float(f) => Ok(ScriptValue::Float(-f)),
                        other => fail(format!("cannot negate a {}", other.type_name()), span),
                    },
                }
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right, span)
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            ExprKind::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value.clone())?;
                Ok(value)
            }
        }
    }

    fn get_property(&self, object: &ScriptValue, name: &str, span: Span) -> Exec<ScriptValue> {
        match object {
            ScriptValue::Db => Ok(ScriptValue::Collection(Rc::from(name))),
            ScriptValue::Collection(coll) => {
                Ok(ScriptValue::Collection(Rc::from(format!("{}.{}", coll, name))))
            }
            ScriptValue::Object(obj) => Ok(obj
                .borrow()
                .get(name)
                .cloned()
                .unwrap_or(ScriptValue::Undefined)),
            ScriptValue::Array(items) if name == "length" => {
                Ok(ScriptValue::Int(items.borrow().len() as i64))
            }
            ScriptValue::String(s) if name == "length" => {
                Ok(ScriptValue::Int(s.chars().count() as i64))
            }
            ScriptValue::Undefined | ScriptValue::Null => fail(
                format!("cannot read property '{}' of {}", name, object.type_name()),
                span,
            ),
            _ => Ok(ScriptValue::Undefined),
        }
    }

    fn get_index(&self, object: &ScriptValue, index: &ScriptValue, span: Span) -> Exec<ScriptValue> {
        match (object, index) {
            (ScriptValue::Array(items), _) => match index.as_index() {
                Some(i) => Ok(items.borrow().get(i).cloned().unwrap_or(ScriptValue::Undefined)),
                None => Ok(ScriptValue::Undefined),
            },
            (ScriptValue::String(s), _) => match index.as_index().and_then(|i| s.chars().nth(i)) {
                Some(c) => Ok(ScriptValue::string(c.to_string())),
                None => Ok(ScriptValue::Undefined),
            },
            (ScriptValue::Undefined | ScriptValue::Null, _) => fail(
                format!("cannot index into {}", object.type_name()),
                span,
            ),
            (_, ScriptValue::String(key)) => self.get_property(object, key, span),
            (_, ScriptValue::Int(_) | ScriptValue::Float(_)) => {
                self.get_property(object, &index.display_string(), span)
            }
            _ => Ok(ScriptValue::Undefined),
        }
    }

    fn assign(&mut self, target: &Expr, value: ScriptValue) -> Exec<()> {
        let span = target.span;
        match &target.kind {
            ExprKind::Ident(name) => match self.vars.get_mut(name) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => fail(format!("{} is not defined", name), span),
            },
            ExprKind::Member { object, property } => {
                let object = self.eval(object)?;
                self.set_property(&object, property, value, span)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                match (&object, &index) {
                    (ScriptValue::Array(items), _) => {
                        let Some(i) = index.as_index() else {
                            return fail("array index must be a non-negative integer", span);
                        };
                        if i >= self.config.max_array_size {
                            return fail("array too large", span);
                        }
                        let nests = value.is_container();
                        {
                            let mut items = items.borrow_mut();
                            if i >= items.len() {
                                items.resize(i + 1, ScriptValue::Undefined);
                            }
                            items[i] = value;
                        }
                        if nests {
                            self.links.note(&object);
                        }
                        Ok(())
                    }
                    (_, ScriptValue::String(key)) => self.set_property(&object, key, value, span),
                    (_, ScriptValue::Int(_) | ScriptValue::Float(_)) => {
                        self.set_property(&object, &index.display_string(), value, span)
                    }
                    _ => fail(
                        format!("cannot index into {} with {}", object.type_name(), index.type_name()),
                        span,
                    ),
                }
            }
            _ => fail("invalid assignment target", span),
        }
    }

    fn set_property(
        &mut self,
        object: &ScriptValue,
        name: &str,
        value: ScriptValue,
        span: Span,
    ) -> Exec<()> {
        match object {
            ScriptValue::Object(obj) => {
                let nests = value.is_container();
                obj.borrow_mut().set(name, value);
                if nests {
                    self.links.note(object);
                }
                Ok(())
            }
            other => fail(
                format!("cannot set property '{}' on {}", name, other.type_name()),
                span,
            ),
        }
    }

    fn binary(&self, op: BinaryOp, left: &ScriptValue, right: &ScriptValue, span: Span) -> Exec<ScriptValue> {
        match op {
            BinaryOp::Add => {
                if matches!(left, ScriptValue::String(_)) || matches!(right, ScriptValue::String(_)) {
                    let joined = format!("{}{}", left.display_string(), right.display_string());
                    if joined.len() > self.config.max_string_size {
                        return fail("string too large", span);
                    }
                    return Ok(ScriptValue::string(joined));
                }
                arithmetic(op, left, right, span)
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                arithmetic(op, left, right, span)
            }
            BinaryOp::Eq => Ok(ScriptValue::Bool(loose_equals(left, right))),
            BinaryOp::Ne => Ok(ScriptValue::Bool(!loose_equals(left, right))),
            BinaryOp::StrictEq => Ok(ScriptValue::Bool(strict_equals(left, right))),
            BinaryOp::StrictNe => Ok(ScriptValue::Bool(!strict_equals(left, right))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = match (left, right) {
                    (ScriptValue::Int(a), ScriptValue::Int(b)) => Some(a.cmp(b)),
                    (ScriptValue::String(a), ScriptValue::String(b)) => Some(a.cmp(b)),
                    _ => match (left.as_f64(), right.as_f64()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => {
                            return fail(
                                format!(
                                    "cannot compare {} with {}",
                                    left.type_name(),
                                    right.type_name()
                                ),
                                span,
                            )
                        }
                    },
                };
                let result = ordering.is_some_and(|ord| match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                });
                Ok(ScriptValue::Bool(result))
            }
        }
    }

    // ===== Calls =====

    fn eval_args(&mut self, args: &[Expr]) -> Exec<Vec<ScriptValue>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        Ok(values)
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Exec<ScriptValue> {
        if let ExprKind::Member { object, property } = &callee.kind {
            let receiver = self.eval(object)?;
            let args = self.eval_args(args)?;
            return self.call_method(receiver, property, args, span);
        }
        let function = self.eval(callee)?;
        let args = self.eval_args(args)?;
        match function {
            ScriptValue::Builtin(builtin) => self.call_builtin(builtin, &args),
            _ => fail(format!("{} is not a function", describe(callee)), span),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: &[ScriptValue]) -> Exec<ScriptValue> {
        match builtin {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(ScriptValue::display_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                trace!(%line, "eval.print");
                if self.logs.len() < self.config.max_log_lines {
                    self.logs.push(line);
                }
                Ok(ScriptValue::Undefined)
            }
            Builtin::ToJson => Ok(ScriptValue::string(match args.first() {
                Some(ScriptValue::Undefined) | None => "undefined".to_string(),
                Some(value) => value.to_json_string(),
            })),
        }
    }

    fn call_method(
        &mut self,
        receiver: ScriptValue,
        name: &str,
        args: Vec<ScriptValue>,
        span: Span,
    ) -> Exec<ScriptValue> {
        match receiver {
            ScriptValue::Db => self.db_method(name, &args, span),
            ScriptValue::Collection(coll) => self.collection_method(&coll, name, &args, span),
            ScriptValue::Cursor(cursor) => self.cursor_method(cursor, name, &args, span),
            ScriptValue::Array(items) => self.array_method(&items, name, args, span),
            ScriptValue::String(s) => string_method(&s, name, &args, span),
            ScriptValue::Object(obj) => {
                let field = obj.borrow().get(name).cloned();
                match field {
                    Some(ScriptValue::Builtin(builtin)) => self.call_builtin(builtin, &args),
                    _ => fail(format!("{} is not a function", name), span),
                }
            }
            ScriptValue::Undefined | ScriptValue::Null => fail(
                format!("cannot call method '{}' of {}", name, receiver.type_name()),
                span,
            ),
            other => fail(format!("{} has no method '{}'", other.type_name(), name), span),
        }
    }

    fn db_method(&mut self, name: &str, args: &[ScriptValue], span: Span) -> Exec<ScriptValue> {
        match name {
            "getCollection" => match args.first() {
                Some(ScriptValue::String(coll)) if !coll.is_empty() => {
                    Ok(ScriptValue::Collection(coll.clone()))
                }
                _ => fail("getCollection requires a collection name", span),
            },
            "getName" => Ok(ScriptValue::string(self.access.db_name())),
            _ => fail(format!("unknown database method '{}'", name), span),
        }
    }

    /// Run a data-access call between two deadline checks
    fn host<T>(&self, span: Span, call: impl FnOnce(&dyn DataAccess) -> Result<T, AccessError>) -> Exec<T> {
        self.check_deadline()?;
        let result = call(self.access).map_err(|err| Fault::Error {
            message: err.to_string(),
            span,
        })?;
        self.check_deadline()?;
        Ok(result)
    }

    fn collection_method(
        &mut self,
        coll: &str,
        name: &str,
        args: &[ScriptValue],
        span: Span,
    ) -> Exec<ScriptValue> {
        match name {
            "find" => {
                let filter = json_arg(args, 0, span)?;
                let cursor = Cursor::new(coll.to_string(), filter);
                Ok(ScriptValue::Cursor(Rc::new(RefCell::new(cursor))))
            }
            "findOne" => {
                let filter = json_arg(args, 0, span)?;
                let doc = self.host(span, |db| db.find_one(coll, &filter))?;
                Ok(doc
                    .map(|doc| ScriptValue::from_document(&doc))
                    .unwrap_or(ScriptValue::Null))
            }
            "count" => {
                let filter = json_arg(args, 0, span)?;
                let n = self.host(span, |db| db.count(coll, &filter))?;
                Ok(ScriptValue::Int(saturating_i64(n)))
            }
            "insert" => {
                let docs = match args.first() {
                    Some(ScriptValue::Array(items)) => items.borrow().clone(),
                    Some(doc @ ScriptValue::Object(_)) => vec![doc.clone()],
                    _ => return fail("insert requires a document or an array of documents", span),
                };
                let mut inserted = 0i64;
                for doc in docs {
                    if !matches!(doc, ScriptValue::Object(_)) {
                        return fail("insert requires a document or an array of documents", span);
                    }
                    let doc = to_json(&doc, span)?;
                    self.host(span, |db| db.insert(coll, doc))?;
                    inserted += 1;
                }
                Ok(write_result(&[("nInserted", inserted)]))
            }
            "save" => {
                let doc = match args.first() {
                    Some(doc @ ScriptValue::Object(_)) => to_json(doc, span)?,
                    _ => return fail("save requires a document", span),
                };
                if let Some(id) = doc.get("_id").cloned() {
                    let filter = json!({ "_id": id });
                    let result = self.host(span, |db| db.update(coll, &filter, &doc, false))?;
                    if result.matched > 0 {
                        return Ok(write_result(&[
                            ("nMatched", saturating_i64(result.matched)),
                            ("nModified", saturating_i64(result.modified)),
                        ]));
                    }
                }
                self.host(span, |db| db.insert(coll, doc))?;
                Ok(write_result(&[("nInserted", 1)]))
            }
            "update" => {
                let filter = json_arg(args, 0, span)?;
                let update = match args.get(1) {
                    Some(update @ ScriptValue::Object(_)) => to_json(update, span)?,
                    _ => return fail("update requires an update document", span),
                };
                let (upsert, multi) = update_flags(args);
                if upsert {
                    return fail("upsert is not supported", span);
                }
                let result = self.host(span, |db| db.update(coll, &filter, &update, multi))?;
                Ok(write_result(&[
                    ("nMatched", saturating_i64(result.matched)),
                    ("nModified", saturating_i64(result.modified)),
                ]))
            }
            "remove" => {
                let filter = json_arg(args, 0, span)?;
                let n = self.host(span, |db| db.remove(coll, &filter))?;
                Ok(write_result(&[("nRemoved", saturating_i64(n))]))
            }
            "drop" => Ok(ScriptValue::Bool(
                self.host(span, |db| db.drop_collection(coll))?,
            )),
            "getName" => Ok(ScriptValue::string(coll)),
            "getFullName" => Ok(ScriptValue::string(format!(
                "{}.{}",
                self.access.db_name(),
                coll
            ))),
            _ => fail(format!("unknown collection method '{}'", name), span),
        }
    }

    fn cursor_method(
        &mut self,
        cursor: Rc<RefCell<Cursor>>,
        name: &str,
        args: &[ScriptValue],
        span: Span,
    ) -> Exec<ScriptValue> {
        match name {
            "sort" | "limit" | "skip" => {
                if cursor.borrow().started() {
                    return fail(format!("cannot call {} on a cursor already read from", name), span);
                }
                {
                    let mut state = cursor.borrow_mut();
                    match name {
                        "sort" => state.request.sort = Some(json_arg(args, 0, span)?),
                        "limit" => {
                            // limit(0) means no limit
                            let n = index_arg(args, span)?;
                            state.request.limit = (n > 0).then_some(n);
                        }
                        _ => state.request.skip = index_arg(args, span)?,
                    }
                }
                Ok(ScriptValue::Cursor(cursor))
            }
            "next" => {
                self.fetch(&cursor, span)?;
                let doc = cursor
                    .borrow_mut()
                    .buffer
                    .as_mut()
                    .and_then(|buffer| buffer.pop_front());
                match doc {
                    Some(doc) => Ok(ScriptValue::from_document(&doc)),
                    None => fail("cursor has no more results", span),
                }
            }
            "hasNext" => {
                self.fetch(&cursor, span)?;
                let has_next = cursor
                    .borrow()
                    .buffer
                    .as_ref()
                    .is_some_and(|buffer| !buffer.is_empty());
                Ok(ScriptValue::Bool(has_next))
            }
            "toArray" => {
                self.fetch(&cursor, span)?;
                let docs: Vec<ScriptValue> = cursor
                    .borrow_mut()
                    .buffer
                    .as_mut()
                    .map(|buffer| buffer.drain(..).map(|d| ScriptValue::from_document(&d)).collect())
                    .unwrap_or_default();
                Ok(ScriptValue::array(docs))
            }
            "count" => {
                let (coll, filter) = {
                    let state = cursor.borrow();
                    (state.collection.clone(), state.request.filter.clone())
                };
                let n = self.host(span, |db| db.count(&coll, &filter))?;
                Ok(ScriptValue::Int(saturating_i64(n)))
            }
            _ => fail(format!("unknown cursor method '{}'", name), span),
        }
    }

    /// Execute the cursor's query on first read
    fn fetch(&self, cursor: &Rc<RefCell<Cursor>>, span: Span) -> Exec<()> {
        if cursor.borrow().started() {
            return Ok(());
        }
        let (coll, request) = {
            let state = cursor.borrow();
            (state.collection.clone(), state.request.clone())
        };
        let result = self.host(span, |db| db.find(&coll, &request))?;
        cursor.borrow_mut().buffer = Some(result.documents.into());
        Ok(())
    }

    fn array_method(
        &mut self,
        items: &Rc<RefCell<Vec<ScriptValue>>>,
        name: &str,
        args: Vec<ScriptValue>,
        span: Span,
    ) -> Exec<ScriptValue> {
        match name {
            "push" => {
                let nests = args.iter().any(ScriptValue::is_container);
                let len = {
                    let mut items = items.borrow_mut();
                    if items.len() + args.len() > self.config.max_array_size {
                        return fail("array too large", span);
                    }
                    items.extend(args);
                    items.len()
                };
                if nests {
                    self.links.note(&ScriptValue::Array(items.clone()));
                }
                Ok(ScriptValue::Int(len as i64))
            }
            "indexOf" => {
                let needle = args.first().cloned().unwrap_or(ScriptValue::Undefined);
                let position = items.borrow().iter().position(|v| strict_equals(v, &needle));
                Ok(ScriptValue::Int(position.map(|p| p as i64).unwrap_or(-1)))
            }
            "join" => {
                let separator = match args.first() {
                    Some(ScriptValue::String(s)) => s.to_string(),
                    _ => ",".to_string(),
                };
                let joined = items
                    .borrow()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.display_string() })
                    .collect::<Vec<_>>()
                    .join(&separator);
                Ok(ScriptValue::string(joined))
            }
            _ => fail(format!("unknown array method '{}'", name), span),
        }
    }
}

fn string_method(s: &str, name: &str, args: &[ScriptValue], span: Span) -> Exec<ScriptValue> {
    let needle = || match args.first() {
        Some(ScriptValue::String(n)) => Ok(n.clone()),
        _ => fail(format!("{} requires a string argument", name), span),
    };
    match name {
        "indexOf" => {
            let needle = needle()?;
            let position = s.find(&*needle).map(|byte| s[..byte].chars().count() as i64);
            Ok(ScriptValue::Int(position.unwrap_or(-1)))
        }
        "includes" => Ok(ScriptValue::Bool(s.contains(&*needle()?))),
        "toUpperCase" => Ok(ScriptValue::string(s.to_uppercase())),
        "toLowerCase" => Ok(ScriptValue::string(s.to_lowercase())),
        _ => fail(format!("unknown string method '{}'", name), span),
    }
}

fn arithmetic(op: BinaryOp, left: &ScriptValue, right: &ScriptValue, span: Span) -> Exec<ScriptValue> {
    if let (ScriptValue::Int(a), ScriptValue::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinaryOp::Rem => a.checked_rem(b),
            _ => None,
        };
        if let Some(n) = exact {
            return Ok(ScriptValue::Int(n));
        }
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return fail(
            format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
            span,
        );
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    Ok(ScriptValue::Float(result))
}

pub(crate) fn strict_equals(left: &ScriptValue, right: &ScriptValue) -> bool {
    match (left, right) {
        (ScriptValue::Undefined, ScriptValue::Undefined) | (ScriptValue::Null, ScriptValue::Null) => true,
        (ScriptValue::Bool(a), ScriptValue::Bool(b)) => a == b,
        (ScriptValue::Int(a), ScriptValue::Int(b)) => a == b,
        (ScriptValue::String(a), ScriptValue::String(b)) => a == b,
        (ScriptValue::Array(a), ScriptValue::Array(b)) => Rc::ptr_eq(a, b),
        (ScriptValue::Object(a), ScriptValue::Object(b)) => Rc::ptr_eq(a, b),
        (ScriptValue::Cursor(a), ScriptValue::Cursor(b)) => Rc::ptr_eq(a, b),
        (ScriptValue::Db, ScriptValue::Db) => true,
        (ScriptValue::Collection(a), ScriptValue::Collection(b)) => a == b,
        (ScriptValue::Builtin(a), ScriptValue::Builtin(b)) => a == b,
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// `==`: like `===`, except `null == undefined` and numbers compare with numeric strings
fn loose_equals(left: &ScriptValue, right: &ScriptValue) -> bool {
    match (left, right) {
        (a, b) if a.is_nullish() && b.is_nullish() => true,
        (ScriptValue::String(s), n) | (n, ScriptValue::String(s)) if n.as_f64().is_some() => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        _ => strict_equals(left, right),
    }
}

fn describe(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Ident(name) => name.clone(),
        ExprKind::Member { object, property } => format!("{}.{}", describe(object), property),
        _ => "expression".to_string(),
    }
}

fn to_json(value: &ScriptValue, span: Span) -> Exec<Value> {
    value
        .to_json()
        .map_err(|message| Fault::Error { message, span })
}

/// Document argument at `index`; absent or `undefined` means the empty filter
fn json_arg(args: &[ScriptValue], index: usize, span: Span) -> Exec<Value> {
    match args.get(index) {
        None | Some(ScriptValue::Undefined) => Ok(json!({})),
        Some(value) => to_json(value, span),
    }
}

fn index_arg(args: &[ScriptValue], span: Span) -> Exec<usize> {
    match args.first().and_then(ScriptValue::as_index) {
        Some(n) => Ok(n),
        None => fail("expected a non-negative integer", span),
    }
}

/// `update(filter, doc, upsert, multi)` or `update(filter, doc, { upsert, multi })`
fn update_flags(args: &[ScriptValue]) -> (bool, bool) {
    match args.get(2) {
        Some(ScriptValue::Object(opts)) => {
            let opts = opts.borrow();
            let flag = |key| opts.get(key).is_some_and(ScriptValue::truthy);
            (flag("upsert"), flag("multi"))
        }
        Some(upsert) => (
            upsert.truthy(),
            args.get(3).is_some_and(ScriptValue::truthy),
        ),
        None => (false, false),
    }
}

fn write_result(fields: &[(&str, i64)]) -> ScriptValue {
    let mut obj = Object::new();
    for (key, n) in fields {
        obj.set(*key, ScriptValue::Int(*n));
    }
    ScriptValue::object(obj)
}

fn saturating_i64<N: TryInto<i64>>(n: N) -> i64 {
    n.try_into().unwrap_or(i64::MAX)
}
