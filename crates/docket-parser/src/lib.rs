//! Docket Parser - Recursive descent parser
//!
//! Parses evaluator scripts into an AST.
//! Key parsing rules:
//! - A script that starts with `function` must be exactly one function literal
//! - Semicolons are optional statement terminators
//! - A `{` in statement position opens a block, never an object literal

mod error;
mod parser;

pub use error::*;
pub use parser::*;

use docket_ast::Script;
use docket_lexer::tokenize;

/// Parse a source string into a Script AST
pub fn parse(source: &str) -> Result<Script, ParseError> {
    let tokens = tokenize(source);
    let mut parser = Parser::new(source, tokens);
    parser.parse_script()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_ast::{BinaryOp, ExprKind, StmtKind};

    fn body(source: &str) -> Vec<docket_ast::Stmt> {
        match parse(source) {
            Ok(Script::Body { stmts, .. }) => stmts,
            other => panic!("Expected statement body, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_eval_function() {
        let source = "function(){ return db.evalb.findOne().x; }";
        let script = parse(source).unwrap();
        let Script::Function { params, body, .. } = script else {
            panic!("Expected function literal");
        };
        assert!(params.is_empty());
        assert_eq!(body.len(), 1);
        let StmtKind::Return(Some(expr)) = &body[0].kind else {
            panic!("Expected return statement");
        };
        let ExprKind::Member { object, property } = &expr.kind else {
            panic!("Expected member access");
        };
        assert_eq!(property, "x");
        assert!(matches!(object.kind, ExprKind::Call { .. }));
    }

    #[test]
    fn test_parse_function_params() {
        let script = parse("function (a, b) { return a + b }").unwrap();
        let Script::Function { params, .. } = script else {
            panic!("Expected function literal");
        };
        assert_eq!(params, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_parse_bare_return() {
        let stmts = body("return collection.findOne().x");
        assert_eq!(stmts.len(), 1);
        assert!(matches!(stmts[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_precedence() {
        let stmts = body("1 + 2 * 3");
        let StmtKind::Expr(expr) = &stmts[0].kind else {
            panic!("Expected expression statement");
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("Expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_control_flow() {
        let source = r#"
            var total = 0;
            for (var i = 0; i < 10; i = i + 1) {
                if (i % 2 == 0) total = total + i; else { continue_sum = 1 }
            }
            while (total > 100) { total = total - 1 }
            return total;
        "#;
        let stmts = body(source);
        assert_eq!(stmts.len(), 4);
        assert!(matches!(stmts[1].kind, StmtKind::For { .. }));
        assert!(matches!(stmts[2].kind, StmtKind::While { .. }));
    }

    #[test]
    fn test_parse_object_and_array_literals() {
        let stmts = body(r#"x = { a: 1, "b c": [1, 2.5, 'x'], $gt: null, };"#);
        let StmtKind::Expr(expr) = &stmts[0].kind else {
            panic!("Expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("Expected assignment");
        };
        let ExprKind::Object(fields) = &value.kind else {
            panic!("Expected object literal");
        };
        let keys: Vec<_> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b c", "$gt"]);
    }

    #[test]
    fn test_string_escapes() {
        let stmts = body(r#""tab\there A""#);
        let StmtKind::Expr(expr) = &stmts[0].kind else {
            panic!("Expected expression statement");
        };
        assert_eq!(expr.kind, ExprKind::String("tab\there A".into()));
    }

    #[test]
    fn test_large_int_becomes_float() {
        let stmts = body("99999999999999999999");
        let StmtKind::Expr(expr) = &stmts[0].kind else {
            panic!("Expected expression statement");
        };
        assert!(matches!(expr.kind, ExprKind::Float(_)));
    }

    // === Error Cases ===

    #[test]
    fn test_missing_closing_brace() {
        let err = parse("function() { return 1;").unwrap_err();
        assert!(matches!(err, ParseError::Unexpected { .. }), "{:?}", err);
        assert!(err.to_string().contains("'}'"));
    }

    #[test]
    fn test_trailing_input_after_function() {
        let err = parse("function() { return 1 } 2").unwrap_err();
        assert!(matches!(err, ParseError::Unexpected { .. }));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse("1 = 2").unwrap_err();
        assert!(matches!(err, ParseError::InvalidAssignTarget { .. }));
    }

    #[test]
    fn test_invalid_token_reports_span() {
        let err = parse("var x = @;").unwrap_err();
        assert!(matches!(err, ParseError::InvalidToken { .. }));
        assert_eq!(err.span().start, 8);
    }

    #[test]
    fn test_bad_escape() {
        let err = parse(r#""\q""#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidEscape { .. }));
    }

    #[test]
    fn test_empty_script() {
        let stmts = body("");
        assert!(stmts.is_empty());
    }

    #[test]
    fn test_exponent_literals() {
        let stmts = body("1e30; 2E-3; 1.5e2");
        let values: Vec<f64> = stmts
            .iter()
            .map(|stmt| match &stmt.kind {
                StmtKind::Expr(expr) => match expr.kind {
                    ExprKind::Float(f) => f,
                    ref other => panic!("Expected float, got {:?}", other),
                },
                other => panic!("Expected expression, got {:?}", other),
            })
            .collect();
        assert_eq!(values, vec![1e30, 0.002, 150.0]);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let parens = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let negations = format!("{}true", "!".repeat(20_000));
        let blocks = format!("{}{}", "{".repeat(20_000), "}".repeat(20_000));
        let chain = format!("{}1", "a = ".repeat(20_000));
        let array = format!("{}{}", "[".repeat(20_000), "]".repeat(20_000));
        for source in [parens, negations, blocks, chain, array] {
            let err = parse(&source).unwrap_err();
            assert!(matches!(err, ParseError::TooDeep { .. }), "{err:?}");
        }
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let source = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(body(&source).len(), 1);
        let source = format!("if (x) {{ {} }}", "{ ".repeat(40) + &"} ".repeat(40));
        assert_eq!(body(&source).len(), 1);

        let source = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(parse(&source).unwrap_err().to_string(), "script nested too deeply");
    }
}
