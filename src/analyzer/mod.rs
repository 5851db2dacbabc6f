use std::fmt;

use regex::Regex;

#[derive(Debug)]
pub struct ExprError {
    pub message: String,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExprError {}

fn expr_error(message: String) -> ExprError {
    ExprError { message }
}

// ── Call extraction ─────────────────────────────────────────────────────

/// One function call lifted out of an expression. `args` is the argument
/// text list with any nested calls already rewritten to quoted result
/// tokens; `token` names the slot its return value will be stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCall {
    pub name: String,
    pub args: Vec<String>,
    pub token: String,
}

#[derive(Debug, Clone)]
struct CallSpan {
    start: usize,
    end: usize,
    token: String,
}

/// Finds and rewrites function-call sub-expressions. Result tokens are
/// unique for the lifetime of one analyzer, so a statement parser that
/// owns a single analyzer gets program-wide uniqueness.
pub struct ExprAnalyzer {
    call_head: Regex,
    next_token: u32,
}

impl ExprAnalyzer {
    pub fn new() -> Self {
        Self {
            call_head: Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\s*\(").unwrap(),
            next_token: 0,
        }
    }

    fn fresh_token(&mut self) -> String {
        let token = format!("r{}", self.next_token);
        self.next_token += 1;
        token
    }

    /// Lift every function call out of `expr`, innermost first. Returns the
    /// rewritten expression (top-level calls replaced by quoted tokens) and
    /// the ordered call-evaluation plan: a call nested inside another call's
    /// argument list always precedes its enclosing call, and each plan
    /// entry's own argument text refers to deeper calls by token.
    pub fn extract_calls(
        &mut self,
        expr: &str,
    ) -> Result<(String, Vec<ExtractedCall>), ExprError> {
        let mut spans = self.find_call_spans(expr)?;
        // Ascending end offset puts inner calls before the calls that
        // contain them; spans are balanced so ties cannot occur.
        spans.sort_by_key(|span| span.end);

        let mut calls = Vec::with_capacity(spans.len());
        for (i, span) in spans.iter().enumerate() {
            let children = direct_children(&spans, i);
            let text = substitute(expr, span.start, span.end, &spans, &children);
            let (name, args) = split_call(&text)?;
            calls.push(ExtractedCall {
                name,
                args,
                token: span.token.clone(),
            });
        }

        let top_level = top_level_spans(&spans);
        let rewritten = substitute(expr, 0, expr.len(), &spans, &top_level);
        Ok((rewritten, calls))
    }

    fn find_call_spans(&mut self, expr: &str) -> Result<Vec<CallSpan>, ExprError> {
        let bytes = expr.as_bytes();
        let mut spans = Vec::new();
        let mut i = 0;
        while i < expr.len() {
            let head = match self.call_head.find(&expr[i..]) {
                Some(m) => m,
                None => {
                    // Advance a whole character, not a byte, so non-ASCII
                    // text reaches the tokenizer's error path intact.
                    i += expr[i..].chars().next().map_or(1, char::len_utf8);
                    continue;
                }
            };
            // Depth-count from just past the opening parenthesis so nested
            // calls inside the argument list are found on later iterations.
            let mut depth = 1;
            let mut j = i + head.end();
            while depth > 0 {
                if j >= expr.len() {
                    return Err(expr_error(format!(
                        "unbalanced parentheses in expression '{}'",
                        expr
                    )));
                }
                match bytes[j] {
                    b'(' => depth += 1,
                    b')' => depth -= 1,
                    _ => {}
                }
                j += 1;
            }
            let token = self.fresh_token();
            spans.push(CallSpan { start: i, end: j, token });
            i += head.end();
        }
        Ok(spans)
    }
}

impl Default for ExprAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Spans strictly inside `spans[target]` that are not inside any other span
/// that is itself inside the target.
fn direct_children(spans: &[CallSpan], target: usize) -> Vec<usize> {
    let outer = &spans[target];
    let inside = |s: &CallSpan| s.start > outer.start && s.end < outer.end;
    (0..spans.len())
        .filter(|&j| j != target && inside(&spans[j]))
        .filter(|&j| {
            !(0..spans.len()).any(|k| {
                k != j
                    && k != target
                    && inside(&spans[k])
                    && spans[k].start <= spans[j].start
                    && spans[j].end <= spans[k].end
            })
        })
        .collect()
}

/// Spans not contained in any other span.
fn top_level_spans(spans: &[CallSpan]) -> Vec<usize> {
    (0..spans.len())
        .filter(|&j| {
            !(0..spans.len()).any(|k| {
                k != j && spans[k].start <= spans[j].start && spans[j].end <= spans[k].end
            })
        })
        .collect()
}

/// Rebuild `expr[start..end]` with each listed span replaced by its quoted
/// result token. Replacement runs right to left so offsets stay valid.
fn substitute(
    expr: &str,
    start: usize,
    end: usize,
    spans: &[CallSpan],
    replace: &[usize],
) -> String {
    let mut text = expr[start..end].to_string();
    let mut ordered: Vec<&CallSpan> = replace.iter().map(|&j| &spans[j]).collect();
    ordered.sort_by_key(|span| span.start);
    for span in ordered.iter().rev() {
        text.replace_range(
            span.start - start..span.end - start,
            &format!("\"{}\"", span.token),
        );
    }
    text
}

/// Split a rewritten call text into its callee name and argument texts.
/// Arguments are separated at depth-zero commas.
fn split_call(text: &str) -> Result<(String, Vec<String>), ExprError> {
    let open = text
        .find('(')
        .ok_or_else(|| expr_error(format!("malformed call text '{}'", text)))?;
    let name = text[..open].trim().to_string();
    let inner = text[open + 1..text.len() - 1].trim();
    if inner.is_empty() {
        return Ok((name, Vec::new()));
    }
    let mut args = Vec::new();
    let mut depth = 0;
    let mut arg_start = 0;
    for (i, b) in inner.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                args.push(inner[arg_start..i].trim().to_string());
                arg_start = i + 1;
            }
            _ => {}
        }
    }
    args.push(inner[arg_start..].trim().to_string());
    Ok((name, args))
}

/// True when the text is a plain identifier, the only shape that
/// call-by-value-result copy-back is allowed to write into.
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── Expression tokens ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprToken {
    Number(i64),
    Ident(String),
    /// A double-quoted call-result token left behind by call extraction.
    CallRef(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

pub fn tokenize_expr(expr: &str) -> Result<Vec<ExprToken>, ExprError> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' => i += 1,
            b'+' => {
                tokens.push(ExprToken::Plus);
                i += 1;
            }
            b'-' => {
                tokens.push(ExprToken::Minus);
                i += 1;
            }
            b'*' => {
                tokens.push(ExprToken::Star);
                i += 1;
            }
            b'/' => {
                tokens.push(ExprToken::Slash);
                i += 1;
            }
            b'(' => {
                tokens.push(ExprToken::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(ExprToken::RParen);
                i += 1;
            }
            b'"' => {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != b'"' {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(expr_error(format!(
                        "unterminated result token in '{}'",
                        expr
                    )));
                }
                tokens.push(ExprToken::CallRef(expr[start..j].to_string()));
                i = j + 1;
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let literal = &expr[start..i];
                let value = literal.parse::<i64>().map_err(|_| {
                    expr_error(format!("numeric literal '{}' out of range", literal))
                })?;
                tokens.push(ExprToken::Number(value));
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(ExprToken::Ident(expr[start..i].to_string()));
            }
            _ => {
                return Err(expr_error(format!(
                    "unexpected character '{}' in expression '{}'",
                    b as char, expr
                )));
            }
        }
    }
    Ok(tokens)
}

// ── Evaluation ──────────────────────────────────────────────────────────

/// Where identifier and call-result reads come from during evaluation.
/// The runtime stack implements this; reads may mutate it (call-by-need
/// memoization happens on first read of a deferred binding).
pub trait ValueSource {
    fn value_of(&mut self, name: &str) -> Result<i64, ExprError>;
    fn call_result(&mut self, token: &str) -> Result<i64, ExprError>;
}

/// Evaluate an arithmetic expression against the given source. Supports
/// `+ - * /`, unary sign, parentheses, numeric literals, identifiers, and
/// quoted call-result tokens.
pub fn eval_expr(expr: &str, source: &mut dyn ValueSource) -> Result<i64, ExprError> {
    let tokens = tokenize_expr(expr)?;
    if tokens.is_empty() {
        return Err(expr_error("empty expression".to_string()));
    }
    let mut eval = Evaluator {
        tokens: &tokens,
        pos: 0,
        source,
    };
    let value = eval.expression()?;
    if eval.pos != tokens.len() {
        return Err(expr_error(format!("trailing input in expression '{}'", expr)));
    }
    Ok(value)
}

struct Evaluator<'a> {
    tokens: &'a [ExprToken],
    pos: usize,
    source: &'a mut dyn ValueSource,
}

impl<'a> Evaluator<'a> {
    fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.pos)
    }

    fn expression(&mut self) -> Result<i64, ExprError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(ExprToken::Plus) => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    value = value
                        .checked_add(rhs)
                        .ok_or_else(|| expr_error("arithmetic overflow".to_string()))?;
                }
                Some(ExprToken::Minus) => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    value = value
                        .checked_sub(rhs)
                        .ok_or_else(|| expr_error("arithmetic overflow".to_string()))?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<i64, ExprError> {
        let mut value = self.factor()?;
        loop {
            match self.peek() {
                Some(ExprToken::Star) => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    value = value
                        .checked_mul(rhs)
                        .ok_or_else(|| expr_error("arithmetic overflow".to_string()))?;
                }
                Some(ExprToken::Slash) => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    if rhs == 0 {
                        return Err(expr_error("division by zero".to_string()));
                    }
                    value = value
                        .checked_div(rhs)
                        .ok_or_else(|| expr_error("arithmetic overflow".to_string()))?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<i64, ExprError> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| expr_error("unexpected end of expression".to_string()))?;
        match token {
            ExprToken::Number(n) => {
                self.pos += 1;
                Ok(n)
            }
            ExprToken::Ident(name) => {
                self.pos += 1;
                self.source.value_of(&name)
            }
            ExprToken::CallRef(token) => {
                self.pos += 1;
                self.source.call_result(&token)
            }
            ExprToken::Minus => {
                self.pos += 1;
                let value = self.factor()?;
                value
                    .checked_neg()
                    .ok_or_else(|| expr_error("arithmetic overflow".to_string()))
            }
            ExprToken::Plus => {
                self.pos += 1;
                self.factor()
            }
            ExprToken::LParen => {
                self.pos += 1;
                let value = self.expression()?;
                match self.peek() {
                    Some(ExprToken::RParen) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err(expr_error("expected ')'".to_string())),
                }
            }
            other => Err(expr_error(format!("unexpected token {:?}", other))),
        }
    }
}
