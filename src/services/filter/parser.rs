//! Recursive-descent parser producing [`Expr`] trees.
//!
//! Operator precedence, loosest first: `|`, `,`, `//`, `or`, `and`,
//! comparisons, `+ -`, `* / %`, unary minus, postfix (`.x`, `[..]`, `?`).
//! `TERM as $name | BODY` binds at the postfix level and extends as far
//! right as possible.

use serde_json::Value;

use super::ast::{ArithOp, CmpOp, Expr, ObjectEntry, ObjectKey, StrSegment};
use super::builtins;
use super::lexer::{Lexer, Spanned, StrPart, Token};
use super::value_ops::num;
use super::FilterError;

/// Bracket and keyword nesting accepted by the parser.
const MAX_DEPTH: usize = 32;

/// Longest accepted filter source, in bytes. Bounds the size of any tree the
/// parser can build, string interpolations included.
pub(super) const MAX_SOURCE_BYTES: usize = 4096;

/// Tallest accepted expression tree. Long pipe and comma chains count here.
pub(super) const MAX_TREE_HEIGHT: usize = 256;

const FORMATS: &[&str] = &[
    "text", "json", "base64", "base64d", "html", "uri", "csv", "tsv", "sh",
];

const KEYWORDS: &[&str] = &[
    "if", "then", "elif", "else", "end", "as", "reduce", "foreach", "try", "catch", "and",
    "or", "def", "label", "import", "include",
];

pub fn parse(src: &str) -> Result<Expr, FilterError> {
    if src.len() > MAX_SOURCE_BYTES {
        return Err(FilterError::new(
            format!("filter is longer than {MAX_SOURCE_BYTES} bytes"),
            MAX_SOURCE_BYTES,
        ));
    }
    let tokens = Lexer::new(src, 0).tokenize()?;
    let mut parser = Parser::new(tokens, Vec::new(), 0);
    let expr = parser.parse_pipe()?;
    parser.expect_eof()?;

    let shape = expr.shape();
    if shape.height > MAX_TREE_HEIGHT {
        return Err(FilterError::new(
            format!("filter is too complex ({} levels, at most {MAX_TREE_HEIGHT})", shape.height),
            0,
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    scope: Vec<String>,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, scope: Vec<String>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
            scope,
        }
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        self.tokens
            .get(self.pos + ahead)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.offset)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> FilterError {
        FilterError::new(message, self.offset())
    }

    fn unexpected(&self, expected: &str) -> FilterError {
        self.error(format!(
            "unexpected {}, expected {expected}",
            describe(self.peek())
        ))
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<(), FilterError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), FilterError> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{word}'")))
        }
    }

    fn expect_eof(&self) -> Result<(), FilterError> {
        match self.peek() {
            Token::Eof => Ok(()),
            Token::Assign(op) => Err(self.error(format!(
                "assignment operator '{op}' is not supported"
            ))),
            _ => Err(self.unexpected("end of filter")),
        }
    }

    fn enter(&mut self) -> Result<(), FilterError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("filter nesting exceeds {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expect_var(&mut self) -> Result<String, FilterError> {
        match self.advance() {
            Token::Var(name) => Ok(name),
            other => {
                self.pos -= 1;
                Err(self.error(format!(
                    "unexpected {}, expected a $variable",
                    describe(&other)
                )))
            }
        }
    }

    fn with_var<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<T, FilterError>,
    ) -> Result<T, FilterError> {
        self.scope.push(name.to_string());
        let result = f(self);
        self.scope.pop();
        result
    }

    fn parse_pipe(&mut self) -> Result<Expr, FilterError> {
        self.enter()?;
        let result = self.pipe_chain(Self::parse_comma);
        self.leave();
        result
    }

    /// Pipe chain whose stages cannot contain a bare comma (object values).
    fn parse_pipe_no_comma(&mut self) -> Result<Expr, FilterError> {
        self.enter()?;
        let result = self.pipe_chain(Self::parse_alt);
        self.leave();
        result
    }

    fn pipe_chain(
        &mut self,
        stage: fn(&mut Self) -> Result<Expr, FilterError>,
    ) -> Result<Expr, FilterError> {
        let mut stages = vec![stage(self)?];
        while self.eat(&Token::Pipe) {
            stages.push(stage(self)?);
        }
        let mut expr = stages.pop().unwrap_or(Expr::Identity);
        while let Some(lhs) = stages.pop() {
            expr = Expr::pipe(lhs, expr);
        }
        Ok(expr)
    }

    fn parse_comma(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.parse_alt()?;
        while self.eat(&Token::Comma) {
            let rhs = self.parse_alt()?;
            lhs = Expr::Comma(lhs.boxed(), rhs.boxed());
        }
        Ok(lhs)
    }

    fn parse_alt(&mut self) -> Result<Expr, FilterError> {
        let mut operands = vec![self.parse_or()?];
        while self.eat(&Token::Alt) {
            operands.push(self.parse_or()?);
        }
        if let Token::Assign(op) = self.peek() {
            return Err(self.error(format!("assignment operator '{op}' is not supported")));
        }
        let mut expr = operands.pop().unwrap_or(Expr::Identity);
        while let Some(lhs) = operands.pop() {
            expr = Expr::Alt(lhs.boxed(), expr.boxed());
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(lhs.boxed(), rhs.boxed());
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(lhs.boxed(), rhs.boxed());
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, FilterError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Token::Eq => CmpOp::Eq,
            Token::Ne => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_additive()?;
        if matches!(
            self.peek(),
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge
        ) {
            return Err(self.error("comparison operators cannot be chained"));
        }
        Ok(Expr::Compare(op, lhs.boxed(), rhs.boxed()))
    }

    fn parse_additive(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => ArithOp::Add,
                Token::Minus => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Arith(op, lhs.boxed(), rhs.boxed());
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => ArithOp::Mul,
                Token::Slash => ArithOp::Div,
                Token::Percent => ArithOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Arith(op, lhs.boxed(), rhs.boxed());
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, FilterError> {
        if self.eat(&Token::Minus) {
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return Ok(Expr::Neg(operand?.boxed()));
        }
        self.parse_postfix(true)
    }

    fn parse_postfix(&mut self, allow_bind: bool) -> Result<Expr, FilterError> {
        let mut term = self.parse_primary()?;
        loop {
            match self.peek().clone() {
                Token::Field(name) => {
                    self.pos += 1;
                    term = Expr::index(term, Expr::Literal(Value::String(name)));
                }
                Token::Dot => match self.peek_at(1).clone() {
                    Token::Str(parts) => {
                        self.pos += 2;
                        let key = self.string_expr(None, parts)?;
                        term = Expr::index(term, key);
                    }
                    Token::LBracket => {
                        self.pos += 2;
                        term = self.parse_bracket_suffix(term)?;
                    }
                    _ => return Err(self.unexpected("field name or '[' after '.'")),
                },
                Token::LBracket => {
                    self.pos += 1;
                    term = self.parse_bracket_suffix(term)?;
                }
                Token::Question => {
                    self.pos += 1;
                    term = Expr::Try {
                        body: term.boxed(),
                        handler: None,
                    };
                }
                _ => break,
            }
        }

        if allow_bind && self.eat_keyword("as") {
            let var = self.expect_var()?;
            self.expect(Token::Pipe, "'|' after variable binding")?;
            let body = self.with_var(&var, Self::parse_pipe)?;
            return Ok(Expr::Bind {
                source: term.boxed(),
                var,
                body: body.boxed(),
            });
        }
        Ok(term)
    }

    /// Everything after the opening `[` of `.[ ]`, `.[i]`, `.[a:b]`.
    fn parse_bracket_suffix(&mut self, target: Expr) -> Result<Expr, FilterError> {
        if self.eat(&Token::RBracket) {
            return Ok(Expr::Iterate(target.boxed()));
        }
        if self.eat(&Token::Colon) {
            let to = self.parse_pipe()?;
            self.expect(Token::RBracket, "']'")?;
            return Ok(Expr::Slice {
                target: target.boxed(),
                from: None,
                to: Some(to.boxed()),
            });
        }
        let first = self.parse_pipe()?;
        if self.eat(&Token::Colon) {
            let to = if self.peek() == &Token::RBracket {
                None
            } else {
                Some(self.parse_pipe()?.boxed())
            };
            self.expect(Token::RBracket, "']'")?;
            return Ok(Expr::Slice {
                target: target.boxed(),
                from: Some(first.boxed()),
                to,
            });
        }
        self.expect(Token::RBracket, "']'")?;
        Ok(Expr::index(target, first))
    }

    fn parse_primary(&mut self) -> Result<Expr, FilterError> {
        let offset = self.offset();
        match self.advance() {
            Token::Dot => {
                if let Token::Str(parts) = self.peek().clone() {
                    self.pos += 1;
                    let key = self.string_expr(None, parts)?;
                    return Ok(Expr::index(Expr::Identity, key));
                }
                Ok(Expr::Identity)
            }
            Token::DotDot => Ok(Expr::RecurseAll),
            Token::Field(name) => Ok(Expr::field(name)),
            Token::Number(n) => Ok(Expr::Literal(num(n))),
            Token::Str(parts) => self.string_expr(None, parts),
            Token::Format(name) => {
                if !FORMATS.contains(&name.as_str()) {
                    return Err(FilterError::new(format!("unknown format @{name}"), offset));
                }
                if let Token::Str(parts) = self.peek().clone() {
                    self.pos += 1;
                    return self.string_expr(Some(name), parts);
                }
                Ok(Expr::Format(name))
            }
            Token::Var(name) => {
                if self.scope.iter().rev().any(|v| *v == name) {
                    Ok(Expr::Var(name))
                } else {
                    Err(FilterError::new(
                        format!("variable ${name} is not defined"),
                        offset,
                    ))
                }
            }
            Token::LParen => {
                let inner = self.parse_pipe()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::Array(None));
                }
                let inner = self.parse_pipe()?;
                self.expect(Token::RBracket, "']'")?;
                Ok(Expr::Array(Some(inner.boxed())))
            }
            Token::LBrace => self.parse_object(),
            Token::Ident(name) => self.parse_word(name, offset),
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {}", describe(&other))))
            }
        }
    }

    fn parse_word(&mut self, name: String, offset: usize) -> Result<Expr, FilterError> {
        match name.as_str() {
            "null" => Ok(Expr::Literal(Value::Null)),
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "if" => self.parse_if(),
            "try" => {
                let body = self.parse_postfix(false)?;
                let handler = if self.eat_keyword("catch") {
                    Some(self.parse_postfix(false)?.boxed())
                } else {
                    None
                };
                Ok(Expr::Try {
                    body: body.boxed(),
                    handler,
                })
            }
            "reduce" => {
                let source = self.parse_postfix(false)?;
                self.expect_keyword("as")?;
                let var = self.expect_var()?;
                self.expect(Token::LParen, "'('")?;
                let init = self.parse_pipe()?;
                self.expect(Token::Semicolon, "';'")?;
                let update = self.with_var(&var, Self::parse_pipe)?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::Reduce {
                    source: source.boxed(),
                    var,
                    init: init.boxed(),
                    update: update.boxed(),
                })
            }
            "foreach" => {
                let source = self.parse_postfix(false)?;
                self.expect_keyword("as")?;
                let var = self.expect_var()?;
                self.expect(Token::LParen, "'('")?;
                let init = self.parse_pipe()?;
                self.expect(Token::Semicolon, "';'")?;
                let (update, extract) = self.with_var(&var, |p| {
                    let update = p.parse_pipe()?;
                    let extract = if p.eat(&Token::Semicolon) {
                        Some(p.parse_pipe()?.boxed())
                    } else {
                        None
                    };
                    Ok((update, extract))
                })?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::Foreach {
                    source: source.boxed(),
                    var,
                    init: init.boxed(),
                    update: update.boxed(),
                    extract,
                })
            }
            "def" | "label" | "import" | "include" => Err(FilterError::new(
                format!("'{name}' is not supported"),
                offset,
            )),
            _ if KEYWORDS.contains(&name.as_str()) => Err(FilterError::new(
                format!("unexpected keyword '{name}'"),
                offset,
            )),
            _ if name.contains("::") => Err(FilterError::new(
                format!("module references are not supported: {name}"),
                offset,
            )),
            _ => self.parse_call(name, offset),
        }
    }

    fn parse_call(&mut self, name: String, offset: usize) -> Result<Expr, FilterError> {
        let mut args = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                args.push(self.parse_pipe()?);
                if self.eat(&Token::Semicolon) {
                    continue;
                }
                self.expect(Token::RParen, "';' or ')'")?;
                break;
            }
        }
        let arity = args.len();
        builtins::resolve(&name, args).ok_or_else(|| {
            FilterError::new(format!("{name}/{arity} is not defined"), offset)
        })
    }

    fn parse_if(&mut self) -> Result<Expr, FilterError> {
        let mut branches = Vec::new();
        let cond = self.parse_pipe()?;
        self.expect_keyword("then")?;
        let body = self.parse_pipe()?;
        branches.push((cond, body));
        loop {
            if self.eat_keyword("elif") {
                let cond = self.parse_pipe()?;
                self.expect_keyword("then")?;
                let body = self.parse_pipe()?;
                branches.push((cond, body));
            } else if self.eat_keyword("else") {
                let otherwise = self.parse_pipe()?;
                self.expect_keyword("end")?;
                return Ok(Expr::If {
                    branches,
                    otherwise: Some(otherwise.boxed()),
                });
            } else {
                self.expect_keyword("end")?;
                return Ok(Expr::If {
                    branches,
                    otherwise: None,
                });
            }
        }
    }

    fn parse_object(&mut self) -> Result<Expr, FilterError> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Object(entries));
        }
        loop {
            let offset = self.offset();
            let key = match self.advance() {
                Token::Ident(name) => ObjectKey::Name(name),
                Token::Var(name) => {
                    if !self.scope.iter().rev().any(|v| *v == name) {
                        return Err(FilterError::new(
                            format!("variable ${name} is not defined"),
                            offset,
                        ));
                    }
                    ObjectKey::Var(name)
                }
                Token::Str(parts) => match self.string_expr(None, parts)? {
                    Expr::Literal(Value::String(s)) => ObjectKey::Name(s),
                    computed => ObjectKey::Computed(computed),
                },
                Token::Format(name) => {
                    let Token::Str(parts) = self.advance() else {
                        return Err(FilterError::new("expected string after format", offset));
                    };
                    ObjectKey::Computed(self.string_expr(Some(name), parts)?)
                }
                Token::LParen => {
                    let key = self.parse_pipe()?;
                    self.expect(Token::RParen, "')'")?;
                    ObjectKey::Computed(key)
                }
                other => {
                    self.pos -= 1;
                    return Err(self.error(format!(
                        "unexpected {} in object key",
                        describe(&other)
                    )));
                }
            };

            let value = if self.eat(&Token::Colon) {
                Some(self.parse_pipe_no_comma()?)
            } else {
                match key {
                    ObjectKey::Computed(_) => {
                        return Err(FilterError::new(
                            "computed object key requires a value",
                            offset,
                        ))
                    }
                    _ => None,
                }
            };
            entries.push(ObjectEntry { key, value });

            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RBrace, "',' or '}'")?;
            return Ok(Expr::Object(entries));
        }
    }

    fn string_expr(
        &mut self,
        format: Option<String>,
        parts: Vec<StrPart>,
    ) -> Result<Expr, FilterError> {
        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StrPart::Text(text) => segments.push(StrSegment::Text(text)),
                StrPart::Interp { source, offset } => {
                    self.enter()?;
                    let tokens = Lexer::new(&source, offset).tokenize();
                    let inner = tokens.and_then(|tokens| {
                        let mut sub = Parser::new(tokens, self.scope.clone(), self.depth);
                        let expr = sub.parse_pipe()?;
                        sub.expect_eof()?;
                        Ok(expr)
                    });
                    self.leave();
                    segments.push(StrSegment::Interp(inner?));
                }
            }
        }

        if format.is_none() {
            if let [StrSegment::Text(text)] = segments.as_slice() {
                return Ok(Expr::Literal(Value::String(text.clone())));
            }
        }
        Ok(Expr::Str {
            format,
            parts: segments,
        })
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Dot => "'.'".into(),
        Token::DotDot => "'..'".into(),
        Token::Field(name) => format!("'.{name}'"),
        Token::Ident(name) => format!("'{name}'"),
        Token::Var(name) => format!("'${name}'"),
        Token::Format(name) => format!("'@{name}'"),
        Token::Number(n) => format!("number {n}"),
        Token::Str(_) => "string literal".into(),
        Token::LBracket => "'['".into(),
        Token::RBracket => "']'".into(),
        Token::LBrace => "'{'".into(),
        Token::RBrace => "'}'".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::Pipe => "'|'".into(),
        Token::Comma => "','".into(),
        Token::Colon => "':'".into(),
        Token::Semicolon => "';'".into(),
        Token::Question => "'?'".into(),
        Token::Plus => "'+'".into(),
        Token::Minus => "'-'".into(),
        Token::Star => "'*'".into(),
        Token::Slash => "'/'".into(),
        Token::Percent => "'%'".into(),
        Token::Eq => "'=='".into(),
        Token::Ne => "'!='".into(),
        Token::Lt => "'<'".into(),
        Token::Le => "'<='".into(),
        Token::Gt => "'>'".into(),
        Token::Ge => "'>='".into(),
        Token::Alt => "'//'".into(),
        Token::Assign(op) => format!("'{op}'"),
        Token::Eof => "end of filter".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_chain() {
        let expr = parse(".a.b").unwrap();
        assert_eq!(
            expr,
            Expr::index(Expr::field("a"), Expr::Literal(Value::String("b".into())))
        );
    }

    #[test]
    fn test_pipe_binds_looser_than_comma() {
        let expr = parse(".a, .b | .c").unwrap();
        match expr {
            Expr::Pipe(lhs, _) => assert!(matches!(*lhs, Expr::Comma(_, _))),
            other => panic!("expected pipe, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Arith(ArithOp::Add, _, rhs) => {
                assert!(matches!(*rhs, Expr::Arith(ArithOp::Mul, _, _)))
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_undefined_variable_is_rejected() {
        let err = parse(".a | $missing").unwrap_err();
        assert!(err.message.contains("$missing"));
        assert_eq!(err.position, 5);
    }

    #[test]
    fn test_bound_variable_is_visible_in_body_only() {
        assert!(parse(".a as $x | $x + 1").is_ok());
        assert!(parse("(.a as $x | $x) | $x").is_err());
        assert!(parse("reduce .[] as $i (0; . + $i)").is_ok());
        assert!(parse("reduce .[] as $i ($i; .)").is_err());
    }

    #[test]
    fn test_unknown_function_is_rejected() {
        let err = parse("frobnicate(1)").unwrap_err();
        assert!(err.message.contains("frobnicate/1"));
        assert!(parse("map").is_err());
    }

    #[test]
    fn test_object_construction_forms() {
        assert!(parse("{a, b: .c, \"d\": 1, (.k): 2, \"x\\(.y)\": 3}").is_ok());
        assert!(parse(".x as $v | {$v}").is_ok());
        assert!(parse("{(.k)}").is_err());
    }

    #[test]
    fn test_slices_and_optional() {
        assert!(parse(".[1:], .[:2], .[1:2], .a[]?, .\"key\"?").is_ok());
    }

    #[test]
    fn test_if_reduce_foreach_try() {
        assert!(parse("if . then 1 elif .a then 2 else 3 end").is_ok());
        assert!(parse("if . then 1 end").is_ok());
        assert!(parse("foreach .[] as $x (0; . + $x; [$x, .])").is_ok());
        assert!(parse("try error(\"x\") catch .").is_ok());
    }

    #[test]
    fn test_unsupported_constructs() {
        assert!(parse("def f: .; f").is_err());
        assert!(parse(".a = 1").is_err());
        assert!(parse(".a |= 1").is_err());
        assert!(parse("@bogus").is_err());
    }

    #[test]
    fn test_syntax_errors() {
        for bad in ["", ".[", "{", "(.a", ".a |", "1 +", "if . then 1", ".a ]"] {
            assert!(parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}.{}", "(".repeat(MAX_DEPTH + 10), ")".repeat(MAX_DEPTH + 10));
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nesting"));

        let nested = format!("{}.{}", "(".repeat(MAX_DEPTH - 2), ")".repeat(MAX_DEPTH - 2));
        assert!(parse(&nested).is_ok());
    }

    #[test]
    fn test_long_chains_are_bounded() {
        let pipes = vec!["."; MAX_TREE_HEIGHT + 10].join("|");
        let err = parse(&pipes).unwrap_err();
        assert!(err.message.contains("too complex"), "{}", err.message);

        let commas = vec!["1"; MAX_TREE_HEIGHT + 10].join(",");
        assert!(parse(&commas).is_err());

        let postfix = format!(".{}", "[0]".repeat(MAX_TREE_HEIGHT + 10));
        assert!(parse(&postfix).is_err());

        let interpolated = format!("\"\\({})\"", vec!["."; MAX_TREE_HEIGHT + 10].join("|"));
        assert!(parse(&interpolated).is_err());

        assert!(parse(&vec!["."; 100].join("|")).is_ok());
    }

    #[test]
    fn test_source_length_limit() {
        let huge = vec!["."; 200_000].join("|");
        let err = parse(&huge).unwrap_err();
        assert!(err.message.contains("longer than"));
    }
}
