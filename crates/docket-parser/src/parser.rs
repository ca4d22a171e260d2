use docket_ast::{
    BinaryOp, Expr, ExprKind, LogicalOp, Script, Span, Stmt, StmtKind, UnaryOp,
};
use docket_lexer::{Token, TokenKind};

use crate::error::ParseError;

/// Deepest nesting of statements and expressions a script may use
pub const MAX_NESTING: usize = 100;

/// Recursive descent parser over a token stream
pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse a whole script: either a single function literal or a statement list
    pub fn parse_script(&mut self) -> Result<Script, ParseError> {
        let start = self.peek().span;

        if self.check(TokenKind::Function) {
            let (params, body, span) = self.parse_function_literal()?;
            self.eat(TokenKind::Semicolon);
            self.expect(TokenKind::Eof)?;
            return Ok(Script::Function { params, body, span });
        }

        let mut stmts = Vec::new();
        while !self.check(TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
        }
        let end = self.peek().span;
        Ok(Script::Body {
            stmts,
            span: start.merge(end),
        })
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_function_literal(&mut self) -> Result<(Vec<String>, Vec<Stmt>, Span), ParseError> {
        let start = self.expect(TokenKind::Function)?.span;
        // `function name(...)` is accepted; the name is not bound anywhere
        if self.check(TokenKind::Ident) {
            self.advance();
        }
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) {
            let tok = self.expect(TokenKind::Ident)?;
            params.push(tok.text(self.source).to_string());
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let (body, body_span) = self.parse_block()?;
        Ok((params, body, start.merge(body_span)))
    }

    fn parse_block(&mut self) -> Result<(Vec<Stmt>, Span), ParseError> {
        let start = self.expect(TokenKind::LBrace)?.span;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
        }
        let end = self.expect(TokenKind::RBrace)?.span;
        Ok((stmts, start.merge(end)))
    }

    /// Block or single statement, as used by `if`/`while`/`for` bodies
    fn parse_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.check(TokenKind::LBrace) {
            Ok(self.parse_block()?.0)
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    pub fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        self.nested(Self::parse_single_statement)
    }

    fn parse_single_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek().span;
        let kind = match self.peek().kind {
            TokenKind::Var | TokenKind::Let | TokenKind::Const => {
                let kind = self.parse_var_decl()?;
                self.eat(TokenKind::Semicolon);
                kind
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.eat(TokenKind::Semicolon);
                StmtKind::Return(value)
            }
            TokenKind::Throw => {
                self.advance();
                let value = self.parse_expression()?;
                self.eat(TokenKind::Semicolon);
                StmtKind::Throw(value)
            }
            TokenKind::If => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                let then_branch = self.parse_body()?;
                let else_branch = if self.eat(TokenKind::Else) {
                    Some(self.parse_body()?)
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                let body = self.parse_body()?;
                StmtKind::While { cond, body }
            }
            TokenKind::For => self.parse_for()?,
            TokenKind::LBrace => StmtKind::Block(self.parse_block()?.0),
            TokenKind::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            _ => {
                let expr = self.parse_expression()?;
                self.eat(TokenKind::Semicolon);
                StmtKind::Expr(expr)
            }
        };
        let end = self.previous_span();
        Ok(Stmt {
            kind,
            span: start.merge(end),
        })
    }

    fn parse_var_decl(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let name = self.expect(TokenKind::Ident)?.text(self.source).to_string();
        let init = if self.eat(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(StmtKind::Var { name, init })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;

        let init = if self.check(TokenKind::Semicolon) {
            None
        } else {
            let start = self.peek().span;
            let kind = match self.peek().kind {
                TokenKind::Var | TokenKind::Let | TokenKind::Const => self.parse_var_decl()?,
                _ => StmtKind::Expr(self.parse_expression()?),
            };
            Some(Box::new(Stmt {
                kind,
                span: start.merge(self.previous_span()),
            }))
        };
        self.expect(TokenKind::Semicolon)?;

        let cond = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon)?;

        let step = if self.check(TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::RParen)?;

        let body = self.parse_body()?;
        Ok(StmtKind::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        )
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_assignment)
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_or()?;
        if !self.check(TokenKind::Assign) {
            return Ok(target);
        }
        self.advance();
        if !matches!(
            target.kind,
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            return Err(ParseError::InvalidAssignTarget { span: target.span });
        }
        let value = self.parse_expression()?;
        let span = target.span.merge(value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(TokenKind::OrOr) {
            let right = self.parse_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.eat(TokenKind::AndAnd) {
            let right = self.parse_equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                TokenKind::EqEqEq => BinaryOp::StrictEq,
                TokenKind::NeEq => BinaryOp::StrictNe,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        let start = self.advance().span;
        let operand = self.nested(Self::parse_unary)?;
        let span = start.merge(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let tok = self.advance();
                    if tok.kind != TokenKind::Ident && !tok.kind.is_keyword() {
                        return Err(self.unexpected("property name", &tok));
                    }
                    let property = tok.text(self.source).to_string();
                    let span = expr.span.merge(tok.span);
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            property,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    let end = self.expect(TokenKind::RBracket)?.span;
                    let span = expr.span.merge(end);
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    while !self.check(TokenKind::RParen) {
                        args.push(self.parse_expression()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                    let end = self.expect(TokenKind::RParen)?.span;
                    let span = expr.span.merge(end);
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.advance();
        let span = tok.span;
        let kind = match tok.kind {
            TokenKind::Int => {
                let text = tok.text(self.source);
                match text.parse::<i64>() {
                    Ok(n) => ExprKind::Int(n),
                    // Too large for i64: keep it as a float like JavaScript does
                    Err(_) => ExprKind::Float(self.parse_float(&tok)?),
                }
            }
            TokenKind::Float => ExprKind::Float(self.parse_float(&tok)?),
            TokenKind::String => ExprKind::String(unescape(tok.text(self.source), span)?),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::Null => ExprKind::Null,
            TokenKind::Undefined => ExprKind::Undefined,
            TokenKind::Ident => ExprKind::Ident(tok.text(self.source).to_string()),
            TokenKind::LParen => {
                let inner = self.parse_expression()?;
                let end = self.expect(TokenKind::RParen)?.span;
                return Ok(Expr::new(inner.kind, span.merge(end)));
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.check(TokenKind::RBracket) {
                    items.push(self.parse_expression()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                let end = self.expect(TokenKind::RBracket)?.span;
                return Ok(Expr::new(ExprKind::Array(items), span.merge(end)));
            }
            TokenKind::LBrace => {
                let mut fields = Vec::new();
                while !self.check(TokenKind::RBrace) {
                    let key = self.parse_object_key()?;
                    self.expect(TokenKind::Colon)?;
                    let value = self.parse_expression()?;
                    fields.push((key, value));
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                let end = self.expect(TokenKind::RBrace)?.span;
                return Ok(Expr::new(ExprKind::Object(fields), span.merge(end)));
            }
            TokenKind::Error => {
                return Err(ParseError::InvalidToken {
                    text: tok.text(self.source).to_string(),
                    span,
                })
            }
            _ => return Err(self.unexpected("expression", &tok)),
        };
        Ok(Expr::new(kind, span))
    }

    fn parse_object_key(&mut self) -> Result<String, ParseError> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Ident | TokenKind::Int => Ok(tok.text(self.source).to_string()),
            TokenKind::String => unescape(tok.text(self.source), tok.span),
            kind if kind.is_keyword() => Ok(tok.text(self.source).to_string()),
            _ => Err(self.unexpected("object key", &tok)),
        }
    }

    fn parse_float(&self, tok: &Token) -> Result<f64, ParseError> {
        let text = tok.text(self.source);
        text.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
            text: text.to_string(),
            span: tok.span,
        })
    }

    /// Run `parse` one level deeper, failing once `MAX_NESTING` is reached
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::TooDeep {
                span: self.peek().span,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn peek(&self) -> &Token {
        // The token stream always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            self.peek().span
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek().clone();
            Err(self.unexpected(kind.describe(), &tok))
        }
    }

    fn unexpected(&self, expected: &str, found: &Token) -> ParseError {
        if found.kind == TokenKind::Error {
            return ParseError::InvalidToken {
                text: found.text(self.source).to_string(),
                span: found.span,
            };
        }
        let found_text = match found.kind {
            TokenKind::Eof => "end of input".to_string(),
            _ => format!("'{}'", found.text(self.source)),
        };
        ParseError::Unexpected {
            expected: expected.to_string(),
            found: found_text,
            span: found.span,
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

/// Strip quotes and resolve escape sequences of a string literal
fn unescape(raw: &str, span: Span) -> Result<String, ParseError> {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let ch = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or(ParseError::InvalidEscape { span })?;
                out.push(ch);
            }
            _ => return Err(ParseError::InvalidEscape { span }),
        }
    }
    Ok(out)
}
