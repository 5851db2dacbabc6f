use std::fmt;

use serde::Serialize;

use crate::analyzer;
use crate::command::{Body, Command, CondOp};
use crate::runtime::{
    ActivationRecord, Binding, CallConvention, Function, RuntimeError, RuntimeStack, ScopeMode,
};

// ── Trace events ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TracePhase {
    Before,
    After,
}

/// One step of the teaching trace. `Before` events fire ahead of a function
/// call or conditional, `After` events once every command of a source line
/// has run. `line` is 1-based; `stack` is the rendered runtime stack at the
/// moment of the event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub phase: TracePhase,
    pub line: usize,
    pub depth: usize,
    pub label: Option<String>,
    pub stack: String,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "    ".repeat(self.depth);
        match self.phase {
            TracePhase::Before => write!(
                f,
                "{} Before {} -> {} #{}",
                indent,
                self.label.as_deref().unwrap_or(""),
                self.stack,
                self.line
            ),
            TracePhase::After => {
                write!(f, "{} {} After #{}", indent, self.stack, self.line)
            }
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────────

const MAX_CALL_DEPTH: usize = 256;

/// Walks a command sequence against the runtime stack, dispatching each
/// command to its effect and appending trace events at the granularity the
/// line index specifies.
pub struct Engine {
    stack: RuntimeStack,
    events: Vec<TraceEvent>,
}

impl Engine {
    pub fn new(convention: CallConvention, mode: ScopeMode) -> Self {
        Self {
            stack: RuntimeStack::new(mode, convention),
            events: Vec::new(),
        }
    }

    pub fn stack(&self) -> &RuntimeStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut RuntimeStack {
        &mut self.stack
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Run a whole program. A base frame is pushed first so top-level
    /// declarations have a home even when the program is not wrapped in
    /// braces; it is left in place so callers can inspect final bindings.
    pub fn run(&mut self, program: &Body) -> Result<(), RuntimeError> {
        self.stack
            .push_record(ActivationRecord::new(self.stack.convention));
        self.execute(program)
    }

    /// Execute one command sequence, emitting a `Before` event ahead of
    /// every call and conditional and an `After` event once the last
    /// command of a source line has run.
    fn execute(&mut self, body: &Body) -> Result<(), RuntimeError> {
        let mut i = 0;
        for entry in &body.lines {
            for _ in 0..entry.command_count {
                let command = &body.commands[i];
                match command {
                    Command::FuncCall { name, .. } => {
                        self.trace_before(name.clone(), entry.line);
                    }
                    Command::Conditional { left, op, right, .. } => {
                        self.trace_before(format!("if {} {} {}", left, op, right), entry.line);
                    }
                    _ => {}
                }
                self.apply(command, entry.line)?;
                if entry.last_command == i && !matches!(command, Command::Conditional { .. }) {
                    self.trace_after(entry.line);
                }
                i += 1;
            }
        }
        Ok(())
    }

    fn apply(&mut self, command: &Command, line: usize) -> Result<(), RuntimeError> {
        match command {
            Command::ScopeOpen => {
                self.stack
                    .push_record(ActivationRecord::new(self.stack.convention));
                Ok(())
            }
            Command::ScopeClose { function } => {
                if *function {
                    self.stack.pop_call().map_err(|e| self.at_line(e, line))?;
                }
                self.stack.pop_record().map_err(|e| self.at_line(e, line))?;
                Ok(())
            }
            Command::DeclareVar { name } => {
                self.stack.declare(name).map_err(|e| self.at_line(e, line))
            }
            Command::DeclareFunc { name, params, body } => {
                let function = Function {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                    decl_frame: self.stack.records().len().saturating_sub(1),
                };
                self.stack
                    .bind_top(name, Binding::Func(function))
                    .map_err(|e| self.at_line(e, line))
            }
            Command::AssignVar { name, expr } => {
                let value = self.eval_at(expr, line)?;
                if self.stack.set_value(name, value) {
                    Ok(())
                } else {
                    Err(self.error(format!("assignment to undeclared variable '{}'", name), line))
                }
            }
            Command::FuncCall { name, args } => self.call_function(name, args, line),
            Command::Return { expr } => {
                let value = self.eval_at(expr, line)?;
                self.stack.set_return(value);
                Ok(())
            }
            Command::StoreCallResult { token } => {
                self.stack.store_call_result(token);
                Ok(())
            }
            Command::CopyBackResults { name, args } => {
                if self.stack.convention == CallConvention::Cbvr {
                    self.copy_back(name, args, line)
                } else {
                    Ok(())
                }
            }
            Command::Conditional { left, op, right, then_body, else_body } => {
                self.conditional(left, *op, right, then_body, else_body, line)
            }
        }
    }

    // ── Function calls ──────────────────────────────────────────────────

    /// Bind arguments per the run's convention, push the callee frame and
    /// call-stack entry, and descend into the body. The matching pops are
    /// separate commands emitted by the call-evaluation plan.
    fn call_function(
        &mut self,
        name: &str,
        args: &[String],
        line: usize,
    ) -> Result<(), RuntimeError> {
        if self.stack.call_depth() >= MAX_CALL_DEPTH {
            return Err(self.error(
                format!("maximum call depth ({}) exceeded calling '{}'", MAX_CALL_DEPTH, name),
                line,
            ));
        }
        let function = self
            .stack
            .lookup_function(name)
            .map_err(|e| self.at_line(e, line))?;
        if function.params.len() != args.len() {
            return Err(self.error(
                format!(
                    "'{}' expects {} argument(s), got {}",
                    name,
                    function.params.len(),
                    args.len()
                ),
                line,
            ));
        }

        let mut record = ActivationRecord::new(self.stack.convention);
        for (param, arg) in function.params.iter().zip(args) {
            match self.stack.convention {
                // Deferred conventions capture the argument text and
                // evaluate it on read, against the then-current state.
                CallConvention::Cbr | CallConvention::Cbneed | CallConvention::Cbname => {
                    record.insert(param, Binding::Deferred(arg.clone()));
                }
                // Value conventions evaluate now, in the caller's frame.
                CallConvention::Cbv | CallConvention::Cbvr => {
                    let value = self.eval_at(arg, line)?;
                    record.insert(param, Binding::Value(value));
                }
            }
        }

        self.stack.push_record(record);
        self.stack.push_call(function.decl_frame, &function.name);
        self.execute(&function.body)
    }

    /// Call-by-value-result write-back. The callee frame and call entry are
    /// popped while the parameter values are copied into the caller's
    /// argument variables, then restored; the following function scope
    /// close performs the real pop. Only plain-identifier arguments receive
    /// a copy; literals and compound expressions are skipped.
    fn copy_back(&mut self, name: &str, args: &[String], line: usize) -> Result<(), RuntimeError> {
        let call = self.stack.pop_call().map_err(|e| self.at_line(e, line))?;
        let record = self.stack.pop_record().map_err(|e| self.at_line(e, line))?;

        let function = self
            .stack
            .lookup_function(name)
            .map_err(|e| self.at_line(e, line))?;
        for (param, arg) in function.params.iter().zip(args) {
            if !analyzer::is_identifier(arg) {
                continue;
            }
            if let Some(entry) = record.position(param) {
                if let Binding::Value(value) = record.binding_at(entry) {
                    self.stack.set_value(arg, *value);
                }
            }
        }

        self.stack.push_record(record);
        self.stack.push_call_frame(call);
        Ok(())
    }

    // ── Conditionals ────────────────────────────────────────────────────

    /// Evaluate the comparison, push a fresh frame, run exactly one branch
    /// in it, and pop the frame once the branch completes.
    fn conditional(
        &mut self,
        left: &str,
        op: CondOp,
        right: &str,
        then_body: &Body,
        else_body: &Body,
        line: usize,
    ) -> Result<(), RuntimeError> {
        let lhs = self.eval_at(left, line)?;
        let rhs = self.eval_at(right, line)?;
        let branch = if op.compare(lhs, rhs) { then_body } else { else_body };

        self.stack
            .push_record(ActivationRecord::new(self.stack.convention));
        let result = self.execute(branch);
        self.stack.pop_record().map_err(|e| self.at_line(e, line))?;
        result
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn eval_at(&mut self, expr: &str, line: usize) -> Result<i64, RuntimeError> {
        self.stack.eval(expr).map_err(|e| self.at_line(e, line))
    }

    fn error(&self, message: String, line: usize) -> RuntimeError {
        RuntimeError {
            message: format!("line {}: {}", line + 1, message),
        }
    }

    fn at_line(&self, error: RuntimeError, line: usize) -> RuntimeError {
        RuntimeError {
            message: format!("line {}: {}", line + 1, error.message),
        }
    }

    fn trace_before(&mut self, label: String, line: usize) {
        self.events.push(TraceEvent {
            phase: TracePhase::Before,
            line: line + 1,
            depth: self.stack.call_depth(),
            label: Some(label),
            stack: self.stack.to_string(),
        });
    }

    fn trace_after(&mut self, line: usize) {
        self.events.push(TraceEvent {
            phase: TracePhase::After,
            line: line + 1,
            depth: self.stack.call_depth(),
            label: None,
            stack: self.stack.to_string(),
        });
    }
}
