//! Tokenizer for filter expressions.
//!
//! String literals are tokenized eagerly; interpolated sections (`\(...)`)
//! are kept as raw source and handed back to the parser, which parses them
//! recursively.

use super::FilterError;

#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Text(String),
    Interp { source: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Dot,
    DotDot,
    /// `.name` written without a space between the dot and the identifier
    Field(String),
    Ident(String),
    Var(String),
    Format(String),
    Number(f64),
    Str(Vec<StrPart>),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Pipe,
    Comma,
    Colon,
    Semicolon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Alt,
    /// Any assignment operator; recognised only so it can be rejected clearly
    Assign(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    base: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, base: usize) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            base,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, FilterError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let offset = self.offset();
            let Some(c) = self.peek() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    offset,
                });
                return Ok(tokens);
            };
            let token = self.next_token(c)?;
            tokens.push(Spanned { token, offset });
        }
    }

    fn offset(&self) -> usize {
        self.base
            + self
                .chars
                .get(self.pos)
                .map(|(i, _)| *i)
                .unwrap_or(self.src.len())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn error(&self, message: impl Into<String>) -> FilterError {
        FilterError::new(message, self.offset())
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self, c: char) -> Result<Token, FilterError> {
        let two = |lexer: &mut Self, tok: Token| {
            lexer.pos += 2;
            Ok(tok)
        };
        let one = |lexer: &mut Self, tok: Token| {
            lexer.pos += 1;
            Ok(tok)
        };
        let next = self.peek_at(1);

        match c {
            '.' => {
                if next == Some('.') {
                    return two(self, Token::DotDot);
                }
                if next.is_some_and(is_ident_start) {
                    self.pos += 1;
                    return Ok(Token::Field(self.ident()));
                }
                one(self, Token::Dot)
            }
            '$' => {
                self.pos += 1;
                if !self.peek().is_some_and(is_ident_start) {
                    return Err(self.error("expected variable name after '$'"));
                }
                Ok(Token::Var(self.ident()))
            }
            '@' => {
                self.pos += 1;
                if !self.peek().is_some_and(is_ident_start) {
                    return Err(self.error("expected format name after '@'"));
                }
                Ok(Token::Format(self.ident()))
            }
            '"' => self.string().map(Token::Str),
            '[' => one(self, Token::LBracket),
            ']' => one(self, Token::RBracket),
            '{' => one(self, Token::LBrace),
            '}' => one(self, Token::RBrace),
            '(' => one(self, Token::LParen),
            ')' => one(self, Token::RParen),
            ',' => one(self, Token::Comma),
            ':' => one(self, Token::Colon),
            ';' => one(self, Token::Semicolon),
            '?' => {
                if next == Some('/') && self.peek_at(2) == Some('/') {
                    return Err(self.error("destructuring alternative '?//' is not supported"));
                }
                one(self, Token::Question)
            }
            '|' => match next {
                Some('=') => two(self, Token::Assign("|=".into())),
                _ => one(self, Token::Pipe),
            },
            '+' | '-' | '*' | '%' if next == Some('=') => {
                two(self, Token::Assign(format!("{c}=")))
            }
            '+' => one(self, Token::Plus),
            '-' => one(self, Token::Minus),
            '*' => one(self, Token::Star),
            '%' => one(self, Token::Percent),
            '/' => match next {
                Some('/') if self.peek_at(2) == Some('=') => {
                    self.pos += 3;
                    Ok(Token::Assign("//=".into()))
                }
                Some('/') => two(self, Token::Alt),
                Some('=') => two(self, Token::Assign("/=".into())),
                _ => one(self, Token::Slash),
            },
            '=' => match next {
                Some('=') => two(self, Token::Eq),
                _ => one(self, Token::Assign("=".into())),
            },
            '!' => match next {
                Some('=') => two(self, Token::Ne),
                _ => Err(self.error("unexpected '!'")),
            },
            '<' => match next {
                Some('=') => two(self, Token::Le),
                _ => one(self, Token::Lt),
            },
            '>' => match next {
                Some('=') => two(self, Token::Ge),
                _ => one(self, Token::Gt),
            },
            c if c.is_ascii_digit() => self.number(),
            c if is_ident_start(c) => Ok(Token::Ident(self.ident())),
            other => Err(self.error(format!("unexpected character '{other}'"))),
        }
    }

    fn ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                name.push(c);
                self.pos += 1;
            } else if c == ':' && self.peek_at(1) == Some(':') {
                // module paths (`mod::fn`) are kept intact so the parser can reject them
                name.push_str("::");
                self.pos += 2;
            } else {
                break;
            }
        }
        name
    }

    fn number(&mut self) -> Result<Token, FilterError> {
        let start = self.pos;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.pos += 1;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mut exp = String::from("e");
            let mut lookahead = 1;
            if let Some(sign @ ('+' | '-')) = self.peek_at(1) {
                exp.push(sign);
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += lookahead;
                text.push_str(&exp);
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
        }
        text.parse::<f64>().map(Token::Number).map_err(|_| {
            self.pos = start;
            self.error(format!("invalid number literal '{text}'"))
        })
    }

    fn string(&mut self) -> Result<Vec<StrPart>, FilterError> {
        let open = self.offset();
        self.pos += 1;
        let mut parts = Vec::new();
        let mut text = String::new();

        loop {
            let Some(c) = self.bump() else {
                return Err(FilterError::new("unterminated string literal", open));
            };
            match c {
                '"' => break,
                '\\' => {
                    let escape_at = self.offset();
                    let Some(e) = self.bump() else {
                        return Err(FilterError::new("unterminated string literal", open));
                    };
                    match e {
                        '"' => text.push('"'),
                        '\\' => text.push('\\'),
                        '/' => text.push('/'),
                        'b' => text.push('\u{8}'),
                        'f' => text.push('\u{c}'),
                        'n' => text.push('\n'),
                        'r' => text.push('\r'),
                        't' => text.push('\t'),
                        'u' => text.push(self.unicode_escape(escape_at)?),
                        '(' => {
                            if !text.is_empty() {
                                parts.push(StrPart::Text(std::mem::take(&mut text)));
                            }
                            let offset = self.offset();
                            let source = self.interpolation(escape_at)?;
                            parts.push(StrPart::Interp { source, offset });
                        }
                        other => {
                            return Err(FilterError::new(
                                format!("invalid escape '\\{other}' in string literal"),
                                escape_at,
                            ))
                        }
                    }
                }
                other => text.push(other),
            }
        }

        if !text.is_empty() || parts.is_empty() {
            parts.push(StrPart::Text(text));
        }
        Ok(parts)
    }

    fn hex4(&mut self, at: usize) -> Result<u32, FilterError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| FilterError::new("invalid \\u escape", at))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn unicode_escape(&mut self, at: usize) -> Result<char, FilterError> {
        let high = self.hex4(at)?;
        if (0xD800..0xDC00).contains(&high) {
            if self.peek() == Some('\\') && self.peek_at(1) == Some('u') {
                self.pos += 2;
                let low = self.hex4(at)?;
                if (0xDC00..0xE000).contains(&low) {
                    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    return char::from_u32(code)
                        .ok_or_else(|| FilterError::new("invalid surrogate pair", at));
                }
            }
            return Err(FilterError::new("unpaired surrogate in \\u escape", at));
        }
        char::from_u32(high).ok_or_else(|| FilterError::new("invalid \\u escape", at))
    }

    /// Captures the raw source of `\( ... )` up to the matching parenthesis,
    /// skipping over nested string literals.
    fn interpolation(&mut self, at: usize) -> Result<String, FilterError> {
        let mut depth = 1usize;
        let mut source = String::new();
        let mut in_string = false;

        while let Some(c) = self.bump() {
            if in_string {
                source.push(c);
                match c {
                    '\\' => {
                        if let Some(e) = self.bump() {
                            source.push(e);
                        }
                    }
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(source);
                    }
                }
                _ => {}
            }
            source.push(c);
        }

        Err(FilterError::new("unterminated string interpolation", at))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        Lexer::new(src, 0)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_field_access_and_pipes() {
        assert_eq!(
            tokens(".foo | .[] // 1"),
            vec![
                Token::Field("foo".into()),
                Token::Pipe,
                Token::Dot,
                Token::LBracket,
                Token::RBracket,
                Token::Alt,
                Token::Number(1.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_string_interpolation_keeps_nested_source() {
        let toks = tokens(r#""id: \(.a | tostring) \("x")""#);
        match &toks[0] {
            Token::Str(parts) => {
                assert_eq!(parts.len(), 4);
                assert_eq!(parts[0], StrPart::Text("id: ".into()));
                assert!(matches!(&parts[1], StrPart::Interp { source, .. } if source == ".a | tostring"));
                assert!(matches!(&parts[3], StrPart::Interp { source, .. } if source == "\"x\""));
            }
            other => panic!("expected string token, got {other:?}"),
        }
    }

    #[test]
    fn test_comments_and_numbers() {
        assert_eq!(
            tokens("1.5e2 # trailing comment\n, 3"),
            vec![Token::Number(150.0), Token::Comma, Token::Number(3.0), Token::Eof]
        );
    }

    #[test]
    fn test_unterminated_string_is_rejected() {
        let err = Lexer::new("\"abc", 0).tokenize().unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_assignment_operators_are_recognised() {
        assert_eq!(tokens(".a |= 1")[1], Token::Assign("|=".into()));
        assert_eq!(tokens(".a = 1")[1], Token::Assign("=".into()));
    }
}
