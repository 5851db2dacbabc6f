use std::fmt;

// ── Comparison operators ────────────────────────────────────────────────

/// The six normalized comparison kinds a conditional can use. The surface
/// syntax accepts several spellings per kind (`=`, `==`; `!=`, `\=`, `/=`;
/// `=<`, `<=`; `=>`, `>=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CondOp {
    pub fn from_symbol(symbol: &str) -> Option<CondOp> {
        match symbol {
            "=" | "==" => Some(CondOp::Eq),
            "!=" | "\\=" | "/=" => Some(CondOp::Ne),
            "<" => Some(CondOp::Lt),
            ">" => Some(CondOp::Gt),
            "<=" | "=<" => Some(CondOp::Le),
            ">=" | "=>" => Some(CondOp::Ge),
            _ => None,
        }
    }

    pub fn compare(self, left: i64, right: i64) -> bool {
        match self {
            CondOp::Eq => left == right,
            CondOp::Ne => left != right,
            CondOp::Lt => left < right,
            CondOp::Gt => left > right,
            CondOp::Le => left <= right,
            CondOp::Ge => left >= right,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CondOp::Eq => "==",
            CondOp::Ne => "!=",
            CondOp::Lt => "<",
            CondOp::Gt => ">",
            CondOp::Le => "<=",
            CondOp::Ge => ">=",
        }
    }
}

impl fmt::Display for CondOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

// ── Line index ──────────────────────────────────────────────────────────

/// One source line's worth of commands. `last_command` is the index of the
/// final command the line produced, `command_count` how many it produced,
/// and `line` the absolute 0-based source line number. The entries of a
/// body partition its command sequence contiguously and monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub last_command: usize,
    pub command_count: usize,
    pub line: usize,
}

/// An executable command sequence plus the line index that drives trace
/// snapshots. Function bodies and if/else bodies are nested `Body` values.
#[derive(Debug, Clone, Default)]
pub struct Body {
    pub commands: Vec<Command>,
    pub lines: Vec<LineEntry>,
}

impl Body {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// ── Commands ────────────────────────────────────────────────────────────

/// The instruction set shared between the statement parser and the
/// execution engine. Expressions are carried as rewritten source text in
/// which extracted nested calls appear as double-quoted result tokens.
#[derive(Debug, Clone)]
pub enum Command {
    DeclareVar {
        name: String,
    },
    DeclareFunc {
        name: String,
        params: Vec<String>,
        body: Body,
    },
    AssignVar {
        name: String,
        expr: String,
    },
    FuncCall {
        name: String,
        args: Vec<String>,
    },
    Return {
        expr: String,
    },
    /// Move the pending return value into the call-result table.
    StoreCallResult {
        token: String,
    },
    /// Copy parameter values back into caller arguments. A no-op unless the
    /// run's calling convention is call-by-value-result.
    CopyBackResults {
        name: String,
        args: Vec<String>,
    },
    ScopeOpen,
    ScopeClose {
        function: bool,
    },
    Conditional {
        left: String,
        op: CondOp,
        right: String,
        then_body: Body,
        else_body: Body,
    },
}

impl Command {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "    ".repeat(indent);
        match self {
            Command::DeclareVar { name } => writeln!(f, "{}DECLARE_VAR {}", pad, name),
            Command::DeclareFunc { name, params, body } => {
                writeln!(f, "{}DECLARE_FUNC {}({})", pad, name, params.join(", "))?;
                for command in &body.commands {
                    command.fmt_indented(f, indent + 1)?;
                }
                Ok(())
            }
            Command::AssignVar { name, expr } => {
                writeln!(f, "{}ASSIGN_VAR {} = {}", pad, name, expr)
            }
            Command::FuncCall { name, args } => {
                writeln!(f, "{}FUNC_CALL {}({})", pad, name, args.join(", "))
            }
            Command::Return { expr } => writeln!(f, "{}RETURN {}", pad, expr),
            Command::StoreCallResult { token } => {
                writeln!(f, "{}STORE_CALL_RESULT {}", pad, token)
            }
            Command::CopyBackResults { name, args } => {
                writeln!(f, "{}COPY_BACK_RESULTS {}({})", pad, name, args.join(", "))
            }
            Command::ScopeOpen => writeln!(f, "{}SCOPE_OPEN", pad),
            Command::ScopeClose { function } => {
                writeln!(f, "{}SCOPE_CLOSE{}", pad, if *function { " (function)" } else { "" })
            }
            Command::Conditional { left, op, right, then_body, else_body } => {
                writeln!(f, "{}CONDITIONAL if {} {} {}", pad, left, op, right)?;
                for command in &then_body.commands {
                    command.fmt_indented(f, indent + 1)?;
                }
                if !else_body.is_empty() {
                    writeln!(f, "{}else", pad)?;
                    for command in &else_body.commands {
                        command.fmt_indented(f, indent + 1)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
