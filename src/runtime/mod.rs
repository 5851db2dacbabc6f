use std::collections::HashMap;
use std::fmt;

use crate::analyzer::{self, ExprError, ValueSource};
use crate::command::Body;

#[derive(Debug)]
pub struct RuntimeError {
    pub message: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Runtime error: {}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

fn runtime_error(message: String) -> RuntimeError {
    RuntimeError { message }
}

// ── Run configuration ───────────────────────────────────────────────────

/// How a function parameter is bound to its call-site argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallConvention {
    Cbv,
    Cbr,
    Cbvr,
    Cbneed,
    Cbname,
}

impl fmt::Display for CallConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallConvention::Cbv => "CBV",
            CallConvention::Cbr => "CBR",
            CallConvention::Cbvr => "CBVR",
            CallConvention::Cbneed => "CBNEED",
            CallConvention::Cbname => "CBNAME",
        };
        write!(f, "{}", name)
    }
}

/// Which name-resolution discipline the run uses. Kept as its own type so
/// it can never be transposed with the calling convention when wiring a
/// front end to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    Static,
    Dynamic,
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeMode::Static => write!(f, "static"),
            ScopeMode::Dynamic => write!(f, "dynamic"),
        }
    }
}

// ── Values and bindings ─────────────────────────────────────────────────

/// A function value: created when a `DeclareFunc` command executes, stored
/// as a binding in the declaring frame. `decl_frame` is the index of that
/// frame at the moment of declaration; static resolution starts its second
/// scan there.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Body,
    pub decl_frame: usize,
}

/// What a name is bound to inside one activation record. Deferred bindings
/// hold unevaluated argument text and are produced by the CBR, CBNEED and
/// CBNAME conventions.
#[derive(Debug, Clone)]
pub enum Binding {
    Unset,
    Value(i64),
    Deferred(String),
    Func(Function),
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Unset => write!(f, "?"),
            Binding::Value(v) => write!(f, "{}", v),
            Binding::Deferred(expr) => write!(f, "{}", expr),
            Binding::Func(_) => write!(f, "{{}}"),
        }
    }
}

// ── Activation records ──────────────────────────────────────────────────

/// One lexical frame. Entries keep insertion order: declaration order is
/// the basis of the static-scoping visibility rule, so a plain map would
/// lose information the resolver needs.
#[derive(Debug, Clone)]
pub struct ActivationRecord {
    pub convention: CallConvention,
    entries: Vec<(String, Binding)>,
}

impl ActivationRecord {
    pub fn new(convention: CallConvention) -> Self {
        Self {
            convention,
            entries: Vec::new(),
        }
    }

    /// Declare `name` unset. Redeclaring keeps the original position.
    pub fn declare(&mut self, name: &str) {
        match self.position(name) {
            Some(i) => self.entries[i].1 = Binding::Unset,
            None => self.entries.push((name.to_string(), Binding::Unset)),
        }
    }

    pub fn insert(&mut self, name: &str, binding: Binding) {
        match self.position(name) {
            Some(i) => self.entries[i].1 = binding,
            None => self.entries.push((name.to_string(), binding)),
        }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    /// Position of `name`, but only among entries declared before the entry
    /// for `stop`. Used by the second phase of static resolution: a function
    /// body may only close over names declared before the function itself.
    pub fn position_before(&self, name: &str, stop: &str) -> Option<usize> {
        for (i, (n, _)) in self.entries.iter().enumerate() {
            if n == stop {
                return None;
            }
            if n == name {
                return Some(i);
            }
        }
        None
    }

    pub fn binding_at(&self, index: usize) -> &Binding {
        &self.entries[index].1
    }

    pub fn set_at(&mut self, index: usize, binding: Binding) {
        self.entries[index].1 = binding;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ActivationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, (name, binding)) in self.entries.iter().rev().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, binding)?;
        }
        write!(f, ">")
    }
}

// ── Runtime stack ───────────────────────────────────────────────────────

/// One in-flight function invocation. `frame` is the index of the record
/// pushed for the call; `decl_frame` the index recorded when the callee was
/// declared.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub decl_frame: usize,
    pub frame: usize,
    pub name: String,
}

const MAX_EVAL_DEPTH: usize = 256;

/// The ordered collection of live activation records, the parallel call
/// stack, the single pending-return slot, and the call-result table that
/// quoted result tokens read from.
pub struct RuntimeStack {
    pub mode: ScopeMode,
    pub convention: CallConvention,
    records: Vec<ActivationRecord>,
    call_frames: Vec<CallFrame>,
    pending_return: Option<i64>,
    call_results: HashMap<String, i64>,
    eval_depth: usize,
}

impl RuntimeStack {
    pub fn new(mode: ScopeMode, convention: CallConvention) -> Self {
        Self {
            mode,
            convention,
            records: Vec::new(),
            call_frames: Vec::new(),
            pending_return: None,
            call_results: HashMap::new(),
            eval_depth: 0,
        }
    }

    // ── Frame bookkeeping ───────────────────────────────────────────────

    pub fn push_record(&mut self, record: ActivationRecord) {
        self.records.push(record);
    }

    pub fn pop_record(&mut self) -> Result<ActivationRecord, RuntimeError> {
        self.records
            .pop()
            .ok_or_else(|| runtime_error("scope close with no open scope".to_string()))
    }

    /// Register a call whose frame is the current top record.
    pub fn push_call(&mut self, decl_frame: usize, name: &str) {
        let frame = self.records.len().saturating_sub(1);
        self.call_frames.push(CallFrame {
            decl_frame,
            frame,
            name: name.to_string(),
        });
    }

    pub fn pop_call(&mut self) -> Result<CallFrame, RuntimeError> {
        self.call_frames
            .pop()
            .ok_or_else(|| runtime_error("function scope close with no active call".to_string()))
    }

    pub fn push_call_frame(&mut self, frame: CallFrame) {
        self.call_frames.push(frame);
    }

    pub fn in_function(&self) -> bool {
        !self.call_frames.is_empty()
    }

    pub fn call_depth(&self) -> usize {
        self.call_frames.len()
    }

    pub fn records(&self) -> &[ActivationRecord] {
        &self.records
    }

    // ── Return plumbing ─────────────────────────────────────────────────

    pub fn set_return(&mut self, value: i64) {
        self.pending_return = Some(value);
    }

    pub fn pending_return(&self) -> Option<i64> {
        self.pending_return
    }

    /// Move the pending return value (if any) into the call-result table.
    pub fn store_call_result(&mut self, token: &str) {
        if let Some(value) = self.pending_return.take() {
            self.call_results.insert(token.to_string(), value);
        }
    }

    pub fn call_result(&self, token: &str) -> Result<i64, RuntimeError> {
        self.call_results.get(token).copied().ok_or_else(|| {
            runtime_error(format!(
                "no stored result for call token '{}' (the call may not have returned a value)",
                token
            ))
        })
    }

    // ── Declaration ─────────────────────────────────────────────────────

    /// Declare is always local to the innermost frame; it never searches.
    pub fn declare(&mut self, name: &str) -> Result<(), RuntimeError> {
        match self.records.last_mut() {
            Some(record) => {
                record.declare(name);
                Ok(())
            }
            None => Err(runtime_error(format!(
                "declaration of '{}' outside any scope",
                name
            ))),
        }
    }

    pub fn bind_top(&mut self, name: &str, binding: Binding) -> Result<(), RuntimeError> {
        match self.records.last_mut() {
            Some(record) => {
                record.insert(name, binding);
                Ok(())
            }
            None => Err(runtime_error(format!(
                "binding of '{}' outside any scope",
                name
            ))),
        }
    }

    // ── Name resolution ─────────────────────────────────────────────────

    /// Every (record, entry) pair whose name matches, in resolution order.
    ///
    /// Dynamic scoping (or no active call): scan records from the top down.
    ///
    /// Static scoping with an active call: first the frames created inside
    /// the function body (top down to the call's own frame), then the chain
    /// enclosing the declaration site (the call's `decl_frame` down to the
    /// base), where each record is cut off at the entry for the function's
    /// own name.
    fn search_order(&self, name: &str) -> Vec<(usize, usize)> {
        let mut order = Vec::new();
        match (self.mode, self.call_frames.last()) {
            (ScopeMode::Static, Some(active)) => {
                for i in (active.frame..self.records.len()).rev() {
                    if let Some(entry) = self.records[i].position(name) {
                        order.push((i, entry));
                    }
                }
                let decl_top = active.decl_frame.min(self.records.len().saturating_sub(1));
                for i in (0..=decl_top).rev() {
                    if let Some(entry) = self.records[i].position_before(name, &active.name) {
                        order.push((i, entry));
                    }
                }
            }
            _ => {
                for i in (0..self.records.len()).rev() {
                    if let Some(entry) = self.records[i].position(name) {
                        order.push((i, entry));
                    }
                }
            }
        }
        order
    }

    /// Resolve and read `name`. Unset bindings do not satisfy a read; the
    /// search continues outward past them. Returns `Ok(None)` when no
    /// binding with a value is found.
    pub fn get_value(&mut self, name: &str) -> Result<Option<i64>, RuntimeError> {
        for (record, entry) in self.search_order(name) {
            match self.records[record].binding_at(entry).clone() {
                Binding::Unset => continue,
                Binding::Value(value) => return Ok(Some(value)),
                Binding::Deferred(expr) => {
                    let value = self.eval(&expr)?;
                    // Call-by-need: the first read replaces the deferred
                    // expression with its value.
                    if self.records[record].convention == CallConvention::Cbneed {
                        self.records[record].set_at(entry, Binding::Value(value));
                    }
                    return Ok(Some(value));
                }
                Binding::Func(_) => {
                    return Err(runtime_error(format!(
                        "'{}' is a function and cannot be read as a value",
                        name
                    )))
                }
            }
        }
        Ok(None)
    }

    /// Resolve `name` and assign into the first matching binding, unset or
    /// not. Returns false when no binding matches.
    pub fn set_value(&mut self, name: &str, value: i64) -> bool {
        match self.search_order(name).first() {
            Some(&(record, entry)) => {
                self.records[record].set_at(entry, Binding::Value(value));
                true
            }
            None => false,
        }
    }

    pub fn lookup_function(&self, name: &str) -> Result<Function, RuntimeError> {
        for (record, entry) in self.search_order(name) {
            match self.records[record].binding_at(entry) {
                Binding::Unset => continue,
                Binding::Func(function) => return Ok(function.clone()),
                _ => {
                    return Err(runtime_error(format!("'{}' is not a function", name)))
                }
            }
        }
        Err(runtime_error(format!("undefined function '{}'", name)))
    }

    // ── Expression evaluation ───────────────────────────────────────────

    /// Evaluate expression text against the current stack state. Deferred
    /// bindings re-enter here, so the depth guard turns self-referential
    /// argument expressions into an error instead of exhausting the stack.
    pub fn eval(&mut self, expr: &str) -> Result<i64, RuntimeError> {
        if self.eval_depth >= MAX_EVAL_DEPTH {
            return Err(runtime_error(format!(
                "evaluation depth limit ({}) exceeded while evaluating '{}' (circular deferred binding?)",
                MAX_EVAL_DEPTH, expr
            )));
        }
        self.eval_depth += 1;
        let result = analyzer::eval_expr(expr, self);
        self.eval_depth -= 1;
        result.map_err(|e| runtime_error(format!("cannot evaluate '{}': {}", expr, e.message)))
    }
}

impl ValueSource for RuntimeStack {
    fn value_of(&mut self, name: &str) -> Result<i64, ExprError> {
        match self.get_value(name) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ExprError {
                message: format!("undefined variable '{}'", name),
            }),
            Err(e) => Err(ExprError { message: e.message }),
        }
    }

    fn call_result(&mut self, token: &str) -> Result<i64, ExprError> {
        RuntimeStack::call_result(self, token).map_err(|e| ExprError { message: e.message })
    }
}

impl fmt::Display for RuntimeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.in_function() {
            if let Some(value) = self.pending_return {
                write!(f, "Ret: {} ", value)?;
            }
        }
        write!(f, "[")?;
        for (i, record) in self.records.iter().rev().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", record)?;
        }
        write!(f, "]")
    }
}
