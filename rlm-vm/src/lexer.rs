//! # Lexer
//!
//! Turns sandbox program text into tokens. Indentation is significant:
//! the lexer emits `Indent`/`Dedent` tokens the way Python does, and
//! ignores newlines inside brackets.

use crate::error::{self, Result};

/// A lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Int(i64),
    Str(String),
    /// f-string body with escapes already processed
    FStr(String),

    // Keywords
    If,
    Elif,
    Else,
    For,
    In,
    While,
    Break,
    Continue,
    Pass,
    And,
    Or,
    Not,
    Is,
    True,
    False,
    None,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    PlusEq,
    MinusEq,
    StarEq,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl Token {
    /// Human-readable rendering for error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Name(n) => format!("name '{}'", n),
            Token::Int(i) => format!("integer {}", i),
            Token::Str(_) | Token::FStr(_) => "string literal".to_string(),
            Token::Newline => "end of line".to_string(),
            Token::Indent => "indent".to_string(),
            Token::Dedent => "dedent".to_string(),
            Token::Eof => "end of program".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::If => "if",
            Token::Elif => "elif",
            Token::Else => "else",
            Token::For => "for",
            Token::In => "in",
            Token::While => "while",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Pass => "pass",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::Is => "is",
            Token::True => "True",
            Token::False => "False",
            Token::None => "None",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::DoubleSlash => "//",
            Token::Percent => "%",
            Token::PlusEq => "+=",
            Token::MinusEq => "-=",
            Token::StarEq => "*=",
            Token::Assign => "=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Dot => ".",
            _ => "?",
        }
    }
}

/// A token with the source line it starts on (1-based)
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "if" => Token::If,
        "elif" => Token::Elif,
        "else" => Token::Else,
        "for" => Token::For,
        "in" => Token::In,
        "while" => Token::While,
        "break" => Token::Break,
        "continue" => Token::Continue,
        "pass" => Token::Pass,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "is" => Token::Is,
        "True" => Token::True,
        "False" => Token::False,
        "None" => Token::None,
        _ => return None,
    })
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
    tokens: Vec<Spanned>,
}

/// Tokenize a whole program
pub fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        at_line_start: true,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, token: Token) {
        self.tokens.push(Spanned { token, line: self.line });
    }

    fn last_is_layout(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.token),
            None | Some(Token::Newline) | Some(Token::Indent) | Some(Token::Dedent)
        )
    }

    fn run(&mut self) -> Result<()> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.depth == 0 {
                self.handle_indentation()?;
                continue;
            }

            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };

            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        if !self.last_is_layout() {
                            self.push(Token::Newline);
                        }
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                c if c.is_ascii_digit() => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.word()?,
                '"' | '\'' => {
                    let text = self.string(c, true)?;
                    self.push(Token::Str(text));
                }
                _ => self.operator()?,
            }
        }

        if !self.last_is_layout() {
            self.push(Token::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Token::Dedent);
        }
        self.push(Token::Eof);
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    /// Measure leading whitespace of a logical line and emit Indent/Dedent
    fn handle_indentation(&mut self) -> Result<()> {
        let mut width = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }

        // Blank and comment-only lines do not affect indentation
        match self.peek() {
            None => {
                self.at_line_start = false;
                return Ok(());
            }
            Some('\n') | Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(());
            }
            _ => {}
        }

        self.at_line_start = false;
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Token::Indent);
        } else if width < current {
            while self.indents.last().copied().unwrap_or(0) > width {
                self.indents.pop();
                self.push(Token::Dedent);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(error::parse_error(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(())
    }

    fn number(&mut self) -> Result<()> {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
            } else if c != '_' {
                break;
            }
            self.pos += 1;
        }

        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            return Err(error::parse_error(
                self.line,
                "floating point numbers are not supported; use integers",
            ));
        }
        if self.peek().is_some_and(|c| c.is_alphabetic()) {
            return Err(error::parse_error(self.line, "invalid numeric literal"));
        }

        let value = digits
            .parse::<i64>()
            .map_err(|_| error::parse_error(self.line, format!("integer literal {} is too large", digits)))?;
        self.push(Token::Int(value));
        Ok(())
    }

    fn word(&mut self) -> Result<()> {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }

        // String prefixes: f"", r"", rf""
        if let Some(quote @ ('"' | '\'')) = self.peek() {
            match word.to_ascii_lowercase().as_str() {
                "f" => {
                    let text = self.string(quote, true)?;
                    self.push(Token::FStr(text));
                    return Ok(());
                }
                "r" => {
                    let text = self.string(quote, false)?;
                    self.push(Token::Str(text));
                    return Ok(());
                }
                "rf" | "fr" => {
                    let text = self.string(quote, false)?;
                    self.push(Token::FStr(text));
                    return Ok(());
                }
                "b" | "rb" | "br" | "u" => {
                    return Err(error::parse_error(
                        self.line,
                        format!("string prefix '{}' is not supported", word),
                    ));
                }
                _ => {}
            }
        }

        match keyword(&word) {
            Some(token) => self.push(token),
            None => self.push(Token::Name(word)),
        }
        Ok(())
    }

    /// Read a quoted string starting at the opening quote
    fn string(&mut self, quote: char, escapes: bool) -> Result<String> {
        let start_line = self.line;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => {
                    return Err(error::parse_error(start_line, "unterminated string literal"));
                }
            };

            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(error::parse_error(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }

            if c == '\\' {
                let next = self.peek_at(1);
                if !escapes {
                    out.push('\\');
                    if let Some(n) = next {
                        out.push(n);
                        if n == '\n' {
                            self.line += 1;
                        }
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                    continue;
                }
                match next {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('\n') => self.line += 1,
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => {
                        return Err(error::parse_error(start_line, "unterminated string literal"));
                    }
                }
                self.pos += 2;
                continue;
            }

            out.push(c);
            self.pos += 1;
        }
    }

    fn operator(&mut self) -> Result<()> {
        let c = self.peek().unwrap_or('\0');
        let next = self.peek_at(1);

        let (token, width) = match (c, next) {
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('+', Some('=')) => (Token::PlusEq, 2),
            ('-', Some('=')) => (Token::MinusEq, 2),
            ('*', Some('=')) => (Token::StarEq, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('*', Some('*')) => {
                return Err(error::parse_error(self.line, "the '**' operator is not supported"));
            }
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('=', _) => (Token::Assign, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            (';', _) => (Token::Semicolon, 1),
            ('.', _) => (Token::Dot, 1),
            (other, _) => {
                return Err(error::parse_error(
                    self.line,
                    format!("unexpected character '{}'", other),
                ));
            }
        };

        match token {
            Token::LParen | Token::LBracket | Token::LBrace => self.depth += 1,
            Token::RParen | Token::RBracket | Token::RBrace => {
                self.depth = self.depth.saturating_sub(1);
            }
            _ => {}
        }

        self.push(token);
        self.pos += width;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("x = 4_000"),
            vec![
                Token::Name("x".into()),
                Token::Assign,
                Token::Int(4000),
                Token::Newline,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_indent_dedent() {
        let tokens = kinds("for i in range(3):\n    x = i\n\n    # note\ny = 1\n");
        assert!(tokens.contains(&Token::Indent));
        let indent = tokens.iter().position(|t| *t == Token::Indent).unwrap();
        let dedent = tokens.iter().position(|t| *t == Token::Dedent).unwrap();
        assert!(indent < dedent);
        assert_eq!(tokens.iter().filter(|t| **t == Token::Dedent).count(), 1);
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let tokens = kinds("x = ask_llm(\n    a,\n    b\n)\n");
        assert_eq!(tokens.iter().filter(|t| **t == Token::Newline).count(), 1);
        assert!(!tokens.contains(&Token::Indent));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds(r#"'a\nb'"#)[0], Token::Str("a\nb".into()));
        assert_eq!(kinds(r#"r'a\nb'"#)[0], Token::Str("a\\nb".into()));
        assert_eq!(kinds("f\"chunk {i}\"")[0], Token::FStr("chunk {i}".into()));
        assert_eq!(kinds("\"\"\"two\nlines\"\"\"")[0], Token::Str("two\nlines".into()));
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("a = 1\n\nb = 2\n").unwrap();
        let b = tokens.iter().find(|t| t.token == Token::Name("b".into())).unwrap();
        assert_eq!(b.line, 3);
    }

    #[test]
    fn test_errors() {
        assert!(tokenize("x = 1.5").is_err());
        assert!(tokenize("x = 'open").is_err());
        assert!(tokenize("x = 2 ** 3").is_err());
        assert!(tokenize("x = $").is_err());
        assert!(tokenize("if x:\n        a = 1\n    b = 2\n").is_err());
    }
}
