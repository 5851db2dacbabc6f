use std::fmt;

use regex::Regex;

use crate::analyzer::ExprAnalyzer;
use crate::command::{Body, Command, CondOp, LineEntry};

#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    /// 1-based source line number of the offending line.
    pub line: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

// ── Source splitting ────────────────────────────────────────────────────

/// Normalize raw program text into the line-per-statement form the parser
/// consumes: `;` becomes a line break, every `{` and `}` lands on its own
/// line boundary, and blank lines are dropped.
pub fn split_source(source: &str) -> Vec<String> {
    source
        .replace(';', "\n")
        .replace('{', "{\n")
        .replace('}', "\n}\n")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Statement parser ────────────────────────────────────────────────────

/// Turns pre-split source lines into a flat, line-indexed command
/// sequence, recursing into function and if/else bodies. Declared "types"
/// in the surface syntax are cosmetic and discarded here.
pub struct StatementParser {
    analyzer: ExprAnalyzer,
    re_func_decl: Regex,
    re_return: Regex,
    re_if: Regex,
    re_decl_assign: Regex,
    re_decl: Regex,
    re_assign: Regex,
    re_call_stmt: Regex,
    re_param: Regex,
}

const NAME: &str = "[A-Za-z_][A-Za-z0-9_]*";

impl StatementParser {
    pub fn new() -> Self {
        let name = NAME;
        Self {
            analyzer: ExprAnalyzer::new(),
            re_func_decl: Regex::new(&format!(
                r"^{name}\s+({name})\s*\(([^()]*)\)\s*\{{$"
            ))
            .unwrap(),
            re_return: Regex::new(r"^return\s+(.+)$").unwrap(),
            // Longest condition spellings first so `=<` is not read as `=`.
            re_if: Regex::new(
                r"^if\s+(.+?)\s*(==|!=|\\=|/=|<=|=<|>=|=>|=|<|>)\s*(.+?)\s*\{$",
            )
            .unwrap(),
            re_decl_assign: Regex::new(&format!(r"^{name}\s+({name})\s*:?=\s*(.+)$")).unwrap(),
            re_decl: Regex::new(&format!(r"^{name}\s+({name})$")).unwrap(),
            re_assign: Regex::new(&format!(r"^({name})\s*:?=\s*(.+)$")).unwrap(),
            re_call_stmt: Regex::new(&format!(r"^{name}\s*\(.*\)$")).unwrap(),
            re_param: Regex::new(&format!(r"^{name}\s+({name})$")).unwrap(),
        }
    }

    /// Parse a whole program.
    pub fn parse(&mut self, lines: &[String]) -> Result<Body, ParseError> {
        self.parse_block(lines, 0)
    }

    /// Parse one block of lines. `base_line` is the absolute source line
    /// number of the block's first line, so nested bodies report absolute
    /// line numbers in trace output.
    fn parse_block(&mut self, lines: &[String], base_line: usize) -> Result<Body, ParseError> {
        let mut commands: Vec<Command> = Vec::new();
        let mut index: Vec<LineEntry> = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let j = i;
            let before = commands.len();
            let line = lines[i].as_str();

            if line == "{" {
                commands.push(Command::ScopeOpen);
            } else if line == "}" {
                commands.push(Command::ScopeClose { function: false });
            } else if let Some(caps) = self.re_func_decl.captures(line) {
                let name = caps[1].to_string();
                let params = self.parse_params(&caps[2], base_line + j)?;
                let (end, mut body_lines) = collect_block(lines, i, base_line + j)?;
                // The closing brace is not part of the body; the function
                // scope close is emitted by the call-evaluation plan.
                body_lines.pop();
                let body = self.parse_block(&body_lines, base_line + j + 1)?;
                commands.push(Command::DeclareFunc { name, params, body });
                i = end;
            } else if let Some(caps) = self.re_return.captures(line) {
                let expr = self.call_plan(&caps[1], &mut commands, base_line + j)?;
                commands.push(Command::Return { expr });
            } else if let Some(caps) = self.re_if.captures(line) {
                let left = caps[1].trim().to_string();
                let symbol = caps[2].to_string();
                let right = caps[3].trim().to_string();
                let op = CondOp::from_symbol(&symbol).ok_or_else(|| ParseError {
                    message: format!("unknown comparison operator '{}'", symbol),
                    line: base_line + j + 1,
                })?;

                let (then_end, mut then_lines) = collect_block(lines, i, base_line + j)?;
                let then_raw_len = then_lines.len();
                then_lines.pop();
                let then_body = self.parse_block(&then_lines, base_line + j + 1)?;

                let mut end = then_end;
                let mut else_body = Body::default();
                if end + 1 < lines.len() && is_else_header(&lines[end + 1]) {
                    let (else_end, mut else_lines) = collect_block(lines, end + 1, base_line + j)?;
                    else_lines.pop();
                    else_body =
                        self.parse_block(&else_lines, base_line + j + then_raw_len + 2)?;
                    end = else_end;
                }

                commands.push(Command::Conditional {
                    left,
                    op,
                    right,
                    then_body,
                    else_body,
                });
                i = end;
            } else if let Some(caps) = self.re_decl_assign.captures(line) {
                let name = caps[1].to_string();
                let expr = self.call_plan(&caps[2], &mut commands, base_line + j)?;
                commands.push(Command::DeclareVar { name: name.clone() });
                commands.push(Command::AssignVar { name, expr });
            } else if let Some(caps) = self.re_decl.captures(line) {
                commands.push(Command::DeclareVar {
                    name: caps[1].to_string(),
                });
            } else if let Some(caps) = self.re_assign.captures(line) {
                let name = caps[1].to_string();
                let expr = self.call_plan(&caps[2], &mut commands, base_line + j)?;
                commands.push(Command::AssignVar { name, expr });
            } else if self.re_call_stmt.is_match(line) {
                // Expression statement: the call plan runs for its effects,
                // the result token is simply never referenced.
                self.call_plan(line, &mut commands, base_line + j)?;
            } else {
                return Err(ParseError {
                    message: format!("unrecognized statement: '{}'", line),
                    line: base_line + j + 1,
                });
            }

            index.push(LineEntry {
                last_command: commands.len() - 1,
                command_count: commands.len() - before,
                line: base_line + j,
            });
            i += 1;
        }
        Ok(Body {
            commands,
            lines: index,
        })
    }

    /// Run call extraction on an expression, append the call-evaluation
    /// plan (one call/store/copy-back/scope-close quadruple per extracted
    /// call, inner calls first), and return the rewritten expression text.
    fn call_plan(
        &mut self,
        expr: &str,
        commands: &mut Vec<Command>,
        line: usize,
    ) -> Result<String, ParseError> {
        let (rewritten, calls) =
            self.analyzer
                .extract_calls(expr.trim())
                .map_err(|e| ParseError {
                    message: e.message,
                    line: line + 1,
                })?;
        for call in calls {
            commands.push(Command::FuncCall {
                name: call.name.clone(),
                args: call.args.clone(),
            });
            commands.push(Command::StoreCallResult {
                token: call.token.clone(),
            });
            commands.push(Command::CopyBackResults {
                name: call.name,
                args: call.args,
            });
            commands.push(Command::ScopeClose { function: true });
        }
        Ok(rewritten)
    }

    fn parse_params(&self, text: &str, line: usize) -> Result<Vec<String>, ParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let mut params = Vec::new();
        for part in text.split(',') {
            let part = part.trim();
            match self.re_param.captures(part) {
                Some(caps) => params.push(caps[1].to_string()),
                None => {
                    return Err(ParseError {
                        message: format!("malformed parameter '{}'", part),
                        line: line + 1,
                    })
                }
            }
        }
        Ok(params)
    }
}

impl Default for StatementParser {
    fn default() -> Self {
        Self::new()
    }
}

/// True only for a real else header (`else {` after source splitting),
/// never for a statement whose leading identifier merely starts with
/// "else".
fn is_else_header(line: &str) -> bool {
    match line.strip_prefix("else") {
        Some(rest) => rest.trim() == "{",
        None => false,
    }
}

/// Collect the lines of a scoped body by brace-depth counting, starting
/// just past the header line at `start`. The returned slice includes the
/// closing-brace line; callers that manage the frame themselves pop it.
fn collect_block(
    lines: &[String],
    start: usize,
    header_line: usize,
) -> Result<(usize, Vec<String>), ParseError> {
    let mut collected = Vec::new();
    let mut depth = 1;
    let mut i = start;
    while depth > 0 {
        i += 1;
        if i >= lines.len() {
            return Err(ParseError {
                message: "unterminated block".to_string(),
                line: header_line + 1,
            });
        }
        let line = &lines[i];
        if line.ends_with('{') {
            depth += 1;
        } else if line.ends_with('}') {
            depth -= 1;
        }
        collected.push(line.clone());
    }
    Ok((i, collected))
}
