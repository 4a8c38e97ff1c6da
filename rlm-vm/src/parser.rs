//! # Parser
//!
//! Recursive-descent parser from tokens to the syntax tree. Constructs
//! the sandbox does not support (imports, function definitions, dict
//! literals, attribute access, ...) are rejected here with an
//! `Unsupported` error naming the feature and line.

use crate::ast::{BoolOp, Expr, FPart, Stmt, StmtKind, Target};
use crate::error::{self, Error, Result};
use crate::lexer::{self, Spanned, Token};
use crate::opcode::{BinaryOp, CompareOp, UnaryOp};

/// Python keywords with no meaning in the sandbox
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "import", "from", "def", "class", "lambda", "return", "try", "except", "finally", "with",
    "global", "nonlocal", "del", "yield", "raise", "assert", "async", "await",
];

/// Deepest nesting of blocks, brackets and operator chains a program may use.
/// Parsing and compiling recurse once per level.
pub const MAX_NESTING_DEPTH: usize = 100;

/// Parse a whole program
pub fn parse(source: &str) -> Result<Vec<Stmt>> {
    let tokens = lexer::tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    parser.program()
}

/// Parse a single expression (used for f-string placeholders)
fn parse_expression(text: &str, line: usize, depth: usize) -> Result<Expr> {
    let mut tokens = lexer::tokenize(text.trim()).map_err(|e| e.at_line(line))?;
    for token in &mut tokens {
        token.line = line;
    }
    let mut parser = Parser { tokens, pos: 0, depth };
    let expr = parser.expr_list()?;
    parser.eat(&Token::Newline);
    parser.expect(&Token::Eof, "end of f-string expression")?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Current nesting level, bounded by `MAX_NESTING_DEPTH`
    depth: usize,
}

impl Parser {
    // =========================================================================
    // Token helpers
    // =========================================================================

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> Error {
        error::parse_error(
            self.line(),
            format!("expected {}, found {}", what, self.peek().describe()),
        )
    }

    /// Go one nesting level deeper; callers restore `depth` when done
    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(error::parse_error(
                self.line(),
                format!("program is nested more than {} levels deep", MAX_NESTING_DEPTH),
            ));
        }
        Ok(())
    }

    fn expect_name(&mut self, what: &str) -> Result<String> {
        match self.peek().clone() {
            Token::Name(name) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            Token::Name(_)
                | Token::Int(_)
                | Token::Str(_)
                | Token::FStr(_)
                | Token::True
                | Token::False
                | Token::None
                | Token::LParen
                | Token::LBracket
                | Token::LBrace
                | Token::Minus
                | Token::Plus
                | Token::Not
        )
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn program(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.check(&Token::Eof) {
            if self.eat(&Token::Newline) {
                continue;
            }
            stmts.extend(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>> {
        match self.peek() {
            Token::If => Ok(vec![self.if_stmt()?]),
            Token::For => Ok(vec![self.for_stmt()?]),
            Token::While => Ok(vec![self.while_stmt()?]),
            Token::Indent => Err(error::parse_error(self.line(), "unexpected indent")),
            _ => self.simple_line(),
        }
    }

    /// One or more `;`-separated simple statements ending the line
    fn simple_line(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = vec![self.simple_stmt()?];
        while self.eat(&Token::Semicolon) {
            if self.check(&Token::Newline) {
                break;
            }
            stmts.push(self.simple_stmt()?);
        }
        self.expect(&Token::Newline, "end of line")?;
        Ok(stmts)
    }

    fn simple_stmt(&mut self) -> Result<Stmt> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Token::Pass => {
                self.advance();
                StmtKind::Pass
            }
            Token::Break => {
                self.advance();
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                StmtKind::Continue
            }
            Token::Name(name) if UNSUPPORTED_KEYWORDS.contains(&name.as_str()) => {
                return Err(error::unsupported_feature(line, format!("'{}'", name)));
            }
            _ => self.assignment_or_expr(line)?,
        };
        Ok(Stmt { kind, line })
    }

    fn assignment_or_expr(&mut self, line: usize) -> Result<StmtKind> {
        let first = self.expr_list()?;

        let op = match self.peek() {
            Token::PlusEq => Some(BinaryOp::Add),
            Token::MinusEq => Some(BinaryOp::Sub),
            Token::StarEq => Some(BinaryOp::Mul),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let name = match first {
                Expr::Name(name) => name,
                Expr::Index { .. } | Expr::Slice { .. } => {
                    return Err(error::unsupported_feature(line, "item assignment"));
                }
                _ => {
                    return Err(error::parse_error(line, "illegal target for augmented assignment"));
                }
            };
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign { name, op, value });
        }

        if !self.check(&Token::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut targets = vec![to_target(first, line)?];
        let value = loop {
            self.advance();
            let rhs = self.expr_list()?;
            if self.check(&Token::Assign) {
                targets.push(to_target(rhs, line)?);
            } else {
                break rhs;
            }
        };
        Ok(StmtKind::Assign { targets, value })
    }

    fn if_stmt(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let cond = self.expr()?;
        self.expect(&Token::Colon, "':' after if condition")?;
        let body = self.suite()?;
        let mut branches = vec![(cond, body)];

        let mut orelse = Vec::new();
        loop {
            if self.eat(&Token::Elif) {
                let cond = self.expr()?;
                self.expect(&Token::Colon, "':' after elif condition")?;
                branches.push((cond, self.suite()?));
            } else if self.eat(&Token::Else) {
                self.expect(&Token::Colon, "':' after else")?;
                orelse = self.suite()?;
                break;
            } else {
                break;
            }
        }

        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn for_stmt(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let target = self.target_list()?;
        self.expect(&Token::In, "'in' in for statement")?;
        let iter = self.expr_list()?;
        self.expect(&Token::Colon, "':' after for clause")?;
        let body = self.suite()?;
        if self.check(&Token::Else) {
            return Err(error::unsupported_feature(self.line(), "for-else"));
        }
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line,
        })
    }

    fn while_stmt(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let cond = self.expr()?;
        self.expect(&Token::Colon, "':' after while condition")?;
        let body = self.suite()?;
        if self.check(&Token::Else) {
            return Err(error::unsupported_feature(self.line(), "while-else"));
        }
        Ok(Stmt {
            kind: StmtKind::While { cond, body },
            line,
        })
    }

    /// Indented block, or simple statements on the same line
    fn suite(&mut self) -> Result<Vec<Stmt>> {
        if !self.eat(&Token::Newline) {
            return self.simple_line();
        }
        self.expect(&Token::Indent, "an indented block")?;
        let base = self.depth;
        self.enter()?;
        let mut body = Vec::new();
        while !self.check(&Token::Dedent) && !self.check(&Token::Eof) {
            body.extend(self.statement()?);
        }
        self.eat(&Token::Dedent);
        self.depth = base;
        Ok(body)
    }

    fn target_list(&mut self) -> Result<Target> {
        let first = self.target_atom()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::In) || self.check(&Token::RParen) || self.check(&Token::RBracket) {
                break;
            }
            items.push(self.target_atom()?);
        }
        Ok(Target::Tuple(items))
    }

    fn target_atom(&mut self) -> Result<Target> {
        let close = if self.eat(&Token::LParen) {
            (Token::RParen, "')'")
        } else if self.eat(&Token::LBracket) {
            (Token::RBracket, "']'")
        } else {
            return Ok(Target::Name(self.expect_name("a loop variable")?));
        };
        let base = self.depth;
        self.enter()?;
        let inner = self.target_list()?;
        self.expect(&close.0, close.1)?;
        self.depth = base;
        Ok(inner)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// `a, b, c` becomes a tuple; a single expression is returned as is
    fn expr_list(&mut self) -> Result<Expr> {
        let first = self.expr()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if !self.starts_expr() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Conditional expression: `a if cond else b`
    fn expr(&mut self) -> Result<Expr> {
        let base = self.depth;
        self.enter()?;
        let expr = self.conditional()?;
        self.depth = base;
        Ok(expr)
    }

    fn conditional(&mut self) -> Result<Expr> {
        let then = self.or_test()?;
        if !self.eat(&Token::If) {
            return Ok(then);
        }
        let cond = self.or_test()?;
        self.expect(&Token::Else, "'else' in conditional expression")?;
        let orelse = self.expr()?;
        Ok(Expr::IfElse {
            cond: Box::new(cond),
            then: Box::new(then),
            orelse: Box::new(orelse),
        })
    }

    fn or_test(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.and_test()?;
        while self.eat(&Token::Or) {
            self.enter()?;
            let right = self.and_test()?;
            left = Expr::Logical {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = base;
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.not_test()?;
        while self.eat(&Token::And) {
            self.enter()?;
            let right = self.not_test()?;
            left = Expr::Logical {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = base;
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            let base = self.depth;
            self.enter()?;
            let operand = self.not_test()?;
            self.depth = base;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match (self.peek().clone(), self.peek_at(1).clone()) {
                (Token::EqEq, _) => CompareOp::Eq,
                (Token::NotEq, _) => CompareOp::NotEq,
                (Token::Lt, _) => CompareOp::Lt,
                (Token::Le, _) => CompareOp::Le,
                (Token::Gt, _) => CompareOp::Gt,
                (Token::Ge, _) => CompareOp::Ge,
                (Token::In, _) => CompareOp::In,
                (Token::Not, Token::In) => {
                    self.advance();
                    CompareOp::NotIn
                }
                (Token::Is, Token::Not) => {
                    self.advance();
                    CompareOp::IsNot
                }
                (Token::Is, _) => CompareOp::Is,
                _ => break,
            };
            self.advance();
            rest.push((op, self.arith()?));
        }

        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn arith(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = base;
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::DoubleSlash => BinaryOp::FloorDiv,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let right = self.factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = base;
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            _ => return self.postfix(),
        };
        self.advance();
        let base = self.depth;
        self.enter()?;
        let operand = self.factor()?;
        self.depth = base;
        match (op, operand) {
            (UnaryOp::Neg, Expr::Int(i)) => Ok(Expr::Int(-i)),
            (op, operand) => Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            }),
        }
    }

    fn postfix(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut expr = self.atom()?;
        loop {
            let line = self.line();
            if matches!(self.peek(), Token::LParen | Token::LBracket | Token::Dot) {
                self.enter()?;
            }
            match self.peek() {
                Token::LParen => {
                    let func = match expr {
                        Expr::Name(name) => name,
                        _ => {
                            return Err(error::parse_error(line, "only named functions can be called"));
                        }
                    };
                    let (args, kwargs) = self.call_args()?;
                    expr = Expr::Call { func, args, kwargs };
                }
                Token::LBracket => {
                    self.advance();
                    expr = self.subscript(expr)?;
                }
                Token::Dot => {
                    self.advance();
                    let method = self.expect_name("a method name")?;
                    if !self.check(&Token::LParen) {
                        return Err(error::unsupported_feature(
                            line,
                            format!("attribute access '.{}'", method),
                        ));
                    }
                    let (args, kwargs) = self.call_args()?;
                    expr = Expr::MethodCall {
                        receiver: Box::new(expr),
                        method,
                        args,
                        kwargs,
                    };
                }
                _ => {
                    self.depth = base;
                    return Ok(expr);
                }
            }
        }
    }

    /// After `[`: an index or a `start:end` slice
    fn subscript(&mut self, value: Expr) -> Result<Expr> {
        let start = if self.check(&Token::Colon) {
            None
        } else {
            let first = self.expr()?;
            if !self.check(&Token::Colon) {
                self.expect(&Token::RBracket, "']'")?;
                return Ok(Expr::Index {
                    value: Box::new(value),
                    index: Box::new(first),
                });
            }
            Some(Box::new(first))
        };

        self.expect(&Token::Colon, "':'")?;
        let end = if self.check(&Token::RBracket) || self.check(&Token::Colon) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        if self.check(&Token::Colon) {
            return Err(error::unsupported_feature(self.line(), "slice steps"));
        }
        self.expect(&Token::RBracket, "']'")?;
        Ok(Expr::Slice {
            value: Box::new(value),
            start,
            end,
        })
    }

    /// Parenthesized call arguments, starting at `(`
    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        while !self.eat(&Token::RParen) {
            let line = self.line();
            match (self.peek().clone(), self.peek_at(1).clone()) {
                (Token::Name(name), Token::Assign) => {
                    self.pos += 2;
                    kwargs.push((name, self.expr()?));
                }
                (Token::Star, _) => {
                    return Err(error::unsupported_feature(line, "argument unpacking"));
                }
                _ => {
                    if !kwargs.is_empty() {
                        return Err(error::parse_error(
                            line,
                            "positional argument follows keyword argument",
                        ));
                    }
                    let arg = self.expr()?;
                    // A bare generator argument is evaluated as a list
                    if self.check(&Token::For) {
                        args.push(self.comprehension(arg)?);
                    } else {
                        args.push(arg);
                    }
                }
            }

            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen, "',' or ')' in call")?;
                break;
            }
        }

        Ok((args, kwargs))
    }

    fn atom(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.peek().clone() {
            Token::Int(i) => {
                self.advance();
                Ok(Expr::Int(i))
            }
            Token::Str(_) | Token::FStr(_) => self.strings(),
            Token::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::None => {
                self.advance();
                Ok(Expr::None)
            }
            Token::Name(name) => {
                if UNSUPPORTED_KEYWORDS.contains(&name.as_str()) {
                    return Err(error::unsupported_feature(line, format!("'{}'", name)));
                }
                self.advance();
                Ok(Expr::Name(name))
            }
            Token::LParen => {
                self.advance();
                if self.eat(&Token::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expr()?;
                let expr = if self.check(&Token::For) {
                    self.comprehension(first)?
                } else if self.check(&Token::Comma) {
                    let mut items = vec![first];
                    while self.eat(&Token::Comma) {
                        if self.check(&Token::RParen) {
                            break;
                        }
                        items.push(self.expr()?);
                    }
                    Expr::Tuple(items)
                } else {
                    first
                };
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expr()?;
                if self.check(&Token::For) {
                    let comp = self.comprehension(first)?;
                    self.expect(&Token::RBracket, "']'")?;
                    return Ok(comp);
                }
                let mut items = vec![first];
                while self.eat(&Token::Comma) {
                    if self.check(&Token::RBracket) {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect(&Token::RBracket, "',' or ']' in list")?;
                Ok(Expr::List(items))
            }
            Token::LBrace => Err(error::unsupported_feature(line, "dict and set literals")),
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// `element for target in iter [if cond]...`
    fn comprehension(&mut self, element: Expr) -> Result<Expr> {
        self.expect(&Token::For, "'for'")?;
        let target = self.target_list()?;
        self.expect(&Token::In, "'in' in comprehension")?;
        let iter = self.or_test()?;
        let mut conditions = Vec::new();
        while self.eat(&Token::If) {
            conditions.push(self.or_test()?);
        }
        if self.check(&Token::For) {
            return Err(error::unsupported_feature(self.line(), "nested comprehension loops"));
        }
        Ok(Expr::ListComp {
            element: Box::new(element),
            target,
            iter: Box::new(iter),
            conditions,
        })
    }

    /// Adjacent string literals concatenate, f-strings included
    fn strings(&mut self) -> Result<Expr> {
        let line = self.line();
        let mut parts = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Token::Str(s) => {
                    self.advance();
                    parts.push(FPart::Literal(s));
                }
                Token::FStr(body) => {
                    self.advance();
                    formatted = true;
                    parts.extend(parse_fstring(&body, line, self.depth)?);
                }
                _ => break,
            }
        }

        if !formatted {
            let text = parts
                .into_iter()
                .map(|p| match p {
                    FPart::Literal(s) => s,
                    FPart::Value { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Str(text));
        }
        Ok(Expr::FString(merge_literals(parts)))
    }
}

fn to_target(expr: Expr, line: usize) -> Result<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
            items
                .into_iter()
                .map(|item| to_target(item, line))
                .collect::<Result<_>>()?,
        )),
        Expr::Index { .. } | Expr::Slice { .. } => {
            Err(error::unsupported_feature(line, "item assignment"))
        }
        Expr::Call { .. } | Expr::MethodCall { .. } => {
            Err(error::parse_error(line, "cannot assign to function call"))
        }
        _ => Err(error::parse_error(line, "cannot assign to expression")),
    }
}

fn merge_literals(parts: Vec<FPart>) -> Vec<FPart> {
    let mut out: Vec<FPart> = Vec::with_capacity(parts.len());
    for part in parts {
        match (out.last_mut(), part) {
            (Some(FPart::Literal(prev)), FPart::Literal(next)) => prev.push_str(&next),
            (_, FPart::Literal(next)) if next.is_empty() => {}
            (_, part) => out.push(part),
        }
    }
    out
}

/// Split an f-string body into literal text and `{expr[!r]}` placeholders
fn parse_fstring(body: &str, line: usize, depth: usize) -> Result<Vec<FPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(error::parse_error(line, "single '}' is not allowed in f-string"));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }

        if !literal.is_empty() {
            parts.push(FPart::Literal(std::mem::take(&mut literal)));
        }

        let start = i + 1;
        let mut j = start;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut conversion: Option<usize> = None;
        let mut spec: Option<usize> = None;
        while j < chars.len() {
            let ch = chars[j];
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                j += 1;
                continue;
            }
            match ch {
                '\'' | '"' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth == 0 => break,
                '}' => depth -= 1,
                '!' if depth == 0 && chars.get(j + 1) != Some(&'=') && conversion.is_none() => {
                    conversion = Some(j)
                }
                ':' if depth == 0 && spec.is_none() => spec = Some(j),
                _ => {}
            }
            j += 1;
        }
        if j >= chars.len() {
            return Err(error::parse_error(line, "unterminated '{' in f-string"));
        }
        if spec.is_some() {
            return Err(error::unsupported_feature(line, "format specifications in f-strings"));
        }

        let expr_end = conversion.unwrap_or(j);
        let repr = match conversion {
            None => false,
            Some(at) => match chars[at + 1..j].iter().collect::<String>().as_str() {
                "r" => true,
                "s" => false,
                other => {
                    return Err(error::parse_error(
                        line,
                        format!("invalid f-string conversion '!{}'", other),
                    ));
                }
            },
        };

        let inner: String = chars[start..expr_end].iter().collect();
        if inner.trim().is_empty() {
            return Err(error::parse_error(line, "empty expression in f-string"));
        }
        parts.push(FPart::Value {
            expr: parse_expression(&inner, line, depth)?,
            repr,
        });
        i = j + 1;
    }

    if !literal.is_empty() {
        parts.push(FPart::Literal(literal));
    }
    Ok(parts)
}
