//! Statement parser tests: line dispatch, nesting, line accounting

use erwig_lang::command::{Body, Command, CondOp};
use erwig_lang::parser::{split_source, StatementParser};

fn parse(source: &str) -> Body {
    let lines = split_source(source);
    StatementParser::new().parse(&lines).unwrap()
}

fn parse_err(source: &str) -> erwig_lang::parser::ParseError {
    let lines = split_source(source);
    StatementParser::new().parse(&lines).unwrap_err()
}

// ── Source splitting ────────────────────────────────────────

#[test]
fn split_puts_braces_on_their_own_lines() {
    let lines = split_source("int f(int n) { return n }");
    assert_eq!(lines, vec!["int f(int n) {", "return n", "}"]);
}

#[test]
fn split_honors_semicolons() {
    let lines = split_source("int x = 1; x = 2");
    assert_eq!(lines, vec!["int x = 1", "x = 2"]);
}

#[test]
fn split_drops_blank_lines() {
    let lines = split_source("int x\n\n   \nx = 1");
    assert_eq!(lines, vec!["int x", "x = 1"]);
}

// ── Statement shapes ────────────────────────────────────────

#[test]
fn declaration_with_initializer() {
    let body = parse("int x = 3");
    assert_eq!(body.commands.len(), 2);
    assert!(matches!(&body.commands[0], Command::DeclareVar { name } if name == "x"));
    assert!(
        matches!(&body.commands[1], Command::AssignVar { name, expr } if name == "x" && expr == "3")
    );
}

#[test]
fn declaration_without_initializer() {
    let body = parse("int x");
    assert_eq!(body.commands.len(), 1);
    assert!(matches!(&body.commands[0], Command::DeclareVar { name } if name == "x"));
}

#[test]
fn walrus_assignment_is_accepted() {
    let body = parse("int x = 1\nx := 2");
    assert!(
        matches!(&body.commands[2], Command::AssignVar { name, expr } if name == "x" && expr == "2")
    );
}

#[test]
fn bare_braces_open_and_close_scopes() {
    let body = parse("{ int x }");
    assert!(matches!(body.commands[0], Command::ScopeOpen));
    assert!(matches!(
        body.commands[2],
        Command::ScopeClose { function: false }
    ));
}

#[test]
fn function_declaration_extracts_name_and_parameters() {
    let body = parse("int add(int a, int b) { return a + b }");
    assert_eq!(body.commands.len(), 1);
    match &body.commands[0] {
        Command::DeclareFunc { name, params, body } => {
            assert_eq!(name, "add");
            assert_eq!(params, &["a".to_string(), "b".to_string()]);
            assert_eq!(body.commands.len(), 1);
            assert!(matches!(&body.commands[0], Command::Return { expr } if expr == "a + b"));
        }
        other => panic!("expected DeclareFunc, got {:?}", other),
    }
}

#[test]
fn function_with_no_parameters() {
    let body = parse("int f() { return 1 }");
    match &body.commands[0] {
        Command::DeclareFunc { params, .. } => assert!(params.is_empty()),
        other => panic!("expected DeclareFunc, got {:?}", other),
    }
}

#[test]
fn call_in_initializer_emits_the_plan_quadruple() {
    let body = parse("int r = f(5)");
    assert_eq!(body.commands.len(), 6);
    let token = match &body.commands[1] {
        Command::StoreCallResult { token } => token.clone(),
        other => panic!("expected StoreCallResult, got {:?}", other),
    };
    assert!(
        matches!(&body.commands[0], Command::FuncCall { name, args } if name == "f" && args == &["5".to_string()])
    );
    assert!(
        matches!(&body.commands[2], Command::CopyBackResults { name, .. } if name == "f")
    );
    assert!(matches!(
        body.commands[3],
        Command::ScopeClose { function: true }
    ));
    assert!(matches!(&body.commands[4], Command::DeclareVar { name } if name == "r"));
    assert!(
        matches!(&body.commands[5], Command::AssignVar { expr, .. } if *expr == format!("\"{}\"", token))
    );
}

#[test]
fn nested_call_plans_are_ordered_inner_first() {
    let body = parse("int r = g(f(3))");
    let names: Vec<&str> = body
        .commands
        .iter()
        .filter_map(|c| match c {
            Command::FuncCall { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["f", "g"]);
}

#[test]
fn expression_statement_emits_only_the_plan() {
    let body = parse("int a = 1; inc(a)");
    assert_eq!(body.commands.len(), 6);
    assert!(
        matches!(&body.commands[2], Command::FuncCall { name, args } if name == "inc" && args == &["a".to_string()])
    );
    assert!(matches!(
        body.commands[5],
        Command::ScopeClose { function: true }
    ));
}

#[test]
fn return_with_expression() {
    let body = parse("int f() { return 2 * 3 }");
    match &body.commands[0] {
        Command::DeclareFunc { body, .. } => {
            assert!(matches!(&body.commands[0], Command::Return { expr } if expr == "2 * 3"));
        }
        other => panic!("expected DeclareFunc, got {:?}", other),
    }
}

// ── Conditionals ────────────────────────────────────────────

#[test]
fn conditional_with_else() {
    let body = parse("int x = 5\nif x > 3 { x = 1 } else { x = 2 }");
    match &body.commands[2] {
        Command::Conditional { left, op, right, then_body, else_body } => {
            assert_eq!(left, "x");
            assert_eq!(*op, CondOp::Gt);
            assert_eq!(right, "3");
            assert_eq!(then_body.commands.len(), 1);
            assert_eq!(else_body.commands.len(), 1);
        }
        other => panic!("expected Conditional, got {:?}", other),
    }
}

#[test]
fn conditional_without_else_has_empty_else_body() {
    let body = parse("int x = 5\nif x > 3 { x = 1 }");
    match &body.commands[2] {
        Command::Conditional { else_body, .. } => assert!(else_body.is_empty()),
        other => panic!("expected Conditional, got {:?}", other),
    }
}

#[test]
fn condition_spellings_normalize_to_six_kinds() {
    let cases = [
        ("=", CondOp::Eq),
        ("==", CondOp::Eq),
        ("!=", CondOp::Ne),
        ("\\=", CondOp::Ne),
        ("/=", CondOp::Ne),
        ("<", CondOp::Lt),
        (">", CondOp::Gt),
        ("<=", CondOp::Le),
        ("=<", CondOp::Le),
        (">=", CondOp::Ge),
        ("=>", CondOp::Ge),
    ];
    for (symbol, expected) in cases {
        let body = parse(&format!("int x = 1\nif x {} 2 {{ x = 0 }}", symbol));
        match &body.commands[2] {
            Command::Conditional { op, .. } => assert_eq!(*op, expected, "symbol {}", symbol),
            other => panic!("expected Conditional, got {:?}", other),
        }
    }
}

#[test]
fn identifier_starting_with_else_is_not_an_else_clause() {
    let body = parse("int elsewhere = 1\nint x = 1\nif x > 0 {\nx = 2\n}\nelsewhere := 5");
    match &body.commands[4] {
        Command::Conditional { else_body, .. } => assert!(else_body.is_empty()),
        other => panic!("expected Conditional, got {:?}", other),
    }
    assert!(
        matches!(&body.commands[5], Command::AssignVar { name, expr } if name == "elsewhere" && expr == "5")
    );
}

#[test]
fn non_ascii_expression_text_parses_and_is_carried_through() {
    let body = parse("int x = é + 1");
    assert!(matches!(&body.commands[1], Command::AssignVar { expr, .. } if expr == "é + 1"));
}

// ── Line accounting ─────────────────────────────────────────

fn assert_contiguous(body: &Body) {
    let mut total = 0;
    for entry in &body.lines {
        total += entry.command_count;
        assert_eq!(entry.last_command + 1, total);
    }
    assert_eq!(total, body.commands.len());
}

#[test]
fn line_entries_partition_the_command_sequence() {
    let body = parse("int x = 3\nint y\ny = x + 1\nint z = f(y)");
    assert_contiguous(&body);
    assert_eq!(body.lines.len(), 4);
    assert_eq!(body.lines[0].command_count, 2);
    assert_eq!(body.lines[1].command_count, 1);
    assert_eq!(body.lines[3].command_count, 6);
}

#[test]
fn nested_bodies_report_absolute_line_numbers() {
    let body = parse("int x\nint f(int n) {\nint y\ny = n\nreturn y\n}");
    match &body.commands[1] {
        Command::DeclareFunc { body, .. } => {
            assert_contiguous(body);
            let lines: Vec<usize> = body.lines.iter().map(|e| e.line).collect();
            assert_eq!(lines, vec![2, 3, 4]);
        }
        other => panic!("expected DeclareFunc, got {:?}", other),
    }
}

#[test]
fn else_body_lines_account_for_the_then_block() {
    let body = parse("int x = 1\nif x > 0 {\nx = 2\n}\nelse {\nx = 3\n}");
    match &body.commands[2] {
        Command::Conditional { then_body, else_body, .. } => {
            assert_eq!(then_body.lines[0].line, 2);
            assert_eq!(else_body.lines[0].line, 5);
        }
        other => panic!("expected Conditional, got {:?}", other),
    }
}

#[test]
fn one_entry_per_source_statement() {
    let body = parse("int x = 5\nif x > 3 { x = 1 } else { x = 2 }\nx = 9");
    // The whole if/else contributes a single line entry for its header.
    assert_eq!(body.lines.len(), 3);
    assert_contiguous(&body);
}

// ── Errors ──────────────────────────────────────────────────

#[test]
fn unrecognized_statement_is_fatal_with_line_number() {
    let err = parse_err("int x = 1\n???");
    assert_eq!(err.line, 2);
    assert!(err.message.contains("???"));
}

#[test]
fn unterminated_block_is_fatal() {
    let err = parse_err("int f(int n) {\nreturn n");
    assert!(err.message.contains("unterminated"));
}

#[test]
fn unbalanced_call_in_expression_is_fatal() {
    let err = parse_err("int x = f(1");
    assert!(err.message.contains("unbalanced"));
}

#[test]
fn malformed_parameter_is_fatal() {
    let err = parse_err("int f(int) { return 1 }");
    assert!(err.message.contains("parameter"));
}
