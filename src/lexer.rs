use crate::error::{CmmError, Span, Warning};
use crate::source::SourceReader;
use std::fmt;

/// Characters that open a user-defined infix operator token.
pub const INFIX_LEAD_CHARS: [char; 7] = ['`', '?', ':', '$', '#', '\\', '@'];

/// Fraction digits stop accumulating once the scale reaches this value.
const MAX_FRACTION_SCALE: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    For,
    While,
    Do,
    Break,
    Continue,
    Return,
    Int,
    Double,
    Bool,
    Void,
    String,
    Infix,
}

impl Keyword {
    pub fn lookup(text: &str) -> Option<Keyword> {
        let keyword = match text {
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "for" => Keyword::For,
            "while" => Keyword::While,
            "do" => Keyword::Do,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "return" => Keyword::Return,
            "int" => Keyword::Int,
            "double" => Keyword::Double,
            "bool" => Keyword::Bool,
            "void" => Keyword::Void,
            "string" => Keyword::String,
            "infix" => Keyword::Infix,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::For => "for",
            Keyword::While => "while",
            Keyword::Do => "do",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Return => "return",
            Keyword::Int => "int",
            Keyword::Double => "double",
            Keyword::Bool => "bool",
            Keyword::Void => "void",
            Keyword::String => "string",
            Keyword::Infix => "infix",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Single-character tokens
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Tilde,

    // Operators with an optional trailing '='
    Plus,
    PlusEqual,
    Minus,
    MinusEqual,
    Star,
    StarEqual,
    Slash,
    SlashEqual,
    Percent,
    PercentEqual,
    Caret,
    CaretEqual,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,

    // Doubled operators
    Amp,
    AmpAmp,
    AmpEqual,
    Pipe,
    PipePipe,
    PipeEqual,
    Less,
    LessEqual,
    LessLess,
    LessLessEqual,
    Greater,
    GreaterEqual,
    GreaterGreater,
    GreaterGreaterEqual,

    // Literals
    Identifier(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    String(String),

    /// User-defined infix operator symbol, e.g. `` `*` `` or `$+$`.
    InfixOp(String),
    Keyword(Keyword),

    // Special
    Error(String),
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: String, span: Span) -> Self {
        Self {
            token_type,
            lexeme,
            span,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.token_type, TokenType::Eof)
    }

    /// Short human description used in parse errors.
    pub fn describe(&self) -> String {
        match self.token_type {
            TokenType::Eof => "end of input".to_string(),
            _ => format!("'{}'", self.lexeme),
        }
    }
}

/// Decode the character after a backslash. `None` for unknown escapes.
fn unescape(c: char) -> Option<char> {
    let decoded = match c {
        'a' => '\u{07}',
        'b' => '\u{08}',
        'f' => '\u{0C}',
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'v' => '\u{0B}',
        '?' => '?',
        '0' => '\0',
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        _ => return None,
    };
    Some(decoded)
}

/// On-demand tokenizer. Each call to [`Lexer::next_token`] skips whitespace
/// and comments, then produces exactly one token.
pub struct Lexer {
    reader: SourceReader,
    start: usize,
    warnings: Vec<Warning>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            reader: SourceReader::new(source),
            start: 0,
            warnings: Vec::new(),
        }
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Lex the whole input. The first error token is turned into an error.
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, CmmError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            if let TokenType::Error(message) = &token.token_type {
                return Err(CmmError::lex_error(token.span, message.clone()));
            }
            let done = token.is_eof();
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        loop {
            self.start = self.reader.position();
            let Some(c) = self.reader.get() else {
                return self.make_token(TokenType::Eof);
            };

            let token_type = match c {
                c if c.is_whitespace() || c.is_control() => continue,
                '/' => {
                    if self.reader.eat('/') {
                        self.skip_line_comment();
                        continue;
                    }
                    if self.reader.eat('*') {
                        match self.skip_block_comment() {
                            Ok(()) => continue,
                            Err(token) => return token,
                        }
                    }
                    self.with_equal(TokenType::Slash, TokenType::SlashEqual)
                }
                '\'' => return self.char_literal(),
                '"' => return self.string_literal(),
                '(' => TokenType::LeftParen,
                ')' => TokenType::RightParen,
                '[' => TokenType::LeftBracket,
                ']' => TokenType::RightBracket,
                '{' => TokenType::LeftBrace,
                '}' => TokenType::RightBrace,
                ';' => TokenType::Semicolon,
                ',' => TokenType::Comma,
                '~' => TokenType::Tilde,
                '+' => self.with_equal(TokenType::Plus, TokenType::PlusEqual),
                '-' => self.with_equal(TokenType::Minus, TokenType::MinusEqual),
                '*' => self.with_equal(TokenType::Star, TokenType::StarEqual),
                '%' => self.with_equal(TokenType::Percent, TokenType::PercentEqual),
                '^' => self.with_equal(TokenType::Caret, TokenType::CaretEqual),
                '=' => self.with_equal(TokenType::Equal, TokenType::EqualEqual),
                '!' => self.with_equal(TokenType::Bang, TokenType::BangEqual),
                '&' => {
                    if self.reader.eat('&') {
                        TokenType::AmpAmp
                    } else {
                        self.with_equal(TokenType::Amp, TokenType::AmpEqual)
                    }
                }
                '|' => {
                    if self.reader.eat('|') {
                        TokenType::PipePipe
                    } else {
                        self.with_equal(TokenType::Pipe, TokenType::PipeEqual)
                    }
                }
                '<' => {
                    if self.reader.eat('<') {
                        self.with_equal(TokenType::LessLess, TokenType::LessLessEqual)
                    } else {
                        self.with_equal(TokenType::Less, TokenType::LessEqual)
                    }
                }
                '>' => {
                    if self.reader.eat('>') {
                        self.with_equal(TokenType::GreaterGreater, TokenType::GreaterGreaterEqual)
                    } else {
                        self.with_equal(TokenType::Greater, TokenType::GreaterEqual)
                    }
                }
                c if c.is_ascii_digit() => {
                    self.reader.unget();
                    return self.number();
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    self.reader.unget();
                    return self.identifier();
                }
                c if INFIX_LEAD_CHARS.contains(&c) => return self.infix_op(c),
                c => return self.error(format!("unknown character '{}'", c)),
            };

            return self.make_token(token_type);
        }
    }

    fn with_equal(&mut self, plain: TokenType, with_equal: TokenType) -> TokenType {
        if self.reader.eat('=') {
            with_equal
        } else {
            plain
        }
    }

    fn current_span(&self) -> Span {
        Span::new(self.start, self.reader.position())
    }

    fn make_token(&self, token_type: TokenType) -> Token {
        let span = self.current_span();
        Token::new(
            token_type,
            self.reader.slice(span.start, span.end),
            span,
        )
    }

    fn error(&self, message: String) -> Token {
        tracing::debug!(start = self.start, error = message.as_str(), "lexical error");
        self.make_token(TokenType::Error(message))
    }

    fn warn(&mut self, span: Span, message: impl Into<String>) {
        let warning = Warning::new(span, message);
        tracing::debug!(start = span.start, warning = warning.message.as_str(), "lexer warning");
        self.warnings.push(warning);
    }

    fn skip_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.reader.peek().is_some_and(&pred) {
            self.reader.get();
        }
    }

    // The leading "//" is already consumed.
    fn skip_line_comment(&mut self) {
        self.skip_while(|c| c != '\n' && c != '\r');
    }

    // The leading "/*" is already consumed.
    fn skip_block_comment(&mut self) -> Result<(), Token> {
        let mut depth = 1usize;
        while depth > 0 {
            let at = self.reader.position();
            match self.reader.get() {
                None => return Err(self.error("unterminated /* comment".to_string())),
                Some('/') if self.reader.peek() == Some('*') => {
                    self.reader.get();
                    self.warn(Span::new(at, at + 2), "block comments can't be nested");
                    depth += 1;
                }
                Some('*') if self.reader.eat('/') => depth -= 1,
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn identifier(&mut self) -> Token {
        self.skip_while(|c| c.is_ascii_alphanumeric() || c == '_');
        let text = self.reader.slice(self.start, self.reader.position());

        let token_type = if let Some(keyword) = Keyword::lookup(&text) {
            TokenType::Keyword(keyword)
        } else if text == "true" {
            TokenType::Boolean(true)
        } else if text == "false" {
            TokenType::Boolean(false)
        } else {
            if text.ends_with('_') {
                self.warn(self.current_span(), "identifier ends with '_'");
            }
            TokenType::Identifier(text)
        };

        self.make_token(token_type)
    }

    // The opening quote is already consumed.
    fn char_literal(&mut self) -> Token {
        let Some(mut value) = self.reader.get() else {
            return self.error("end of file in char constant".to_string());
        };

        if value == '\'' {
            self.warn(
                self.current_span(),
                "no character in single quote, treat as '\\0'",
            );
            return self.make_token(TokenType::Integer(0));
        }

        if value == '\\' {
            let escape_start = self.reader.position() - 1;
            let Some(escaped) = self.reader.get() else {
                return self.error("end of file in char constant".to_string());
            };
            value = match unescape(escaped) {
                Some(decoded) => decoded,
                None => {
                    self.warn(
                        Span::new(escape_start, self.reader.position()),
                        format!("\\{} is an invalid escaping character", escaped),
                    );
                    escaped
                }
            };
        }

        loop {
            let at = self.reader.position();
            match self.reader.get() {
                Some('\'') => break,
                Some(_) => self.warn(Span::single(at), "extra character in single quote"),
                None => return self.error("end of file in char constant".to_string()),
            }
        }

        self.make_token(TokenType::Integer(value as i64))
    }

    // The opening quote is already consumed.
    fn string_literal(&mut self) -> Token {
        let mut value = String::new();
        loop {
            match self.reader.get() {
                None => return self.error("end of file in string constant".to_string()),
                Some('"') => return self.make_token(TokenType::String(value)),
                Some('\\') => {
                    let escape_start = self.reader.position() - 1;
                    let Some(escaped) = self.reader.get() else {
                        return self.error("end of file in string constant after \\".to_string());
                    };
                    match unescape(escaped) {
                        Some(decoded) => value.push(decoded),
                        None => {
                            self.warn(
                                Span::new(escape_start, self.reader.position()),
                                format!(
                                    "\\{} is an invalid escaping sequence in string literal",
                                    escaped
                                ),
                            );
                            value.push('\\');
                            value.push(escaped);
                        }
                    }
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn number(&mut self) -> Token {
        if self.reader.eat('0') {
            if matches!(self.reader.peek(), Some('x' | 'X')) {
                self.reader.get();
                return self.hex_number();
            }
            self.reader.unget();
        }

        let mut value: i64 = 0;
        while let Some(digit) = self.reader.peek().and_then(|c| c.to_digit(10)) {
            self.reader.get();
            match value
                .checked_mul(10)
                .and_then(|v| v.checked_add(i64::from(digit)))
            {
                Some(next) => value = next,
                None => {
                    self.warn(self.current_span(), "decimal integer literal is too large");
                    self.skip_while(|c| c.is_ascii_digit());
                    break;
                }
            }
        }

        if !self.reader.eat('.') {
            return self.make_token(TokenType::Integer(value));
        }

        let mut frac: u64 = 0;
        let mut scale: u64 = 1;
        while let Some(digit) = self.reader.peek().and_then(|c| c.to_digit(10)) {
            if scale >= MAX_FRACTION_SCALE {
                self.warn(self.current_span(), "long floating number may lose precision");
                self.skip_while(|c| c.is_ascii_digit());
                break;
            }
            self.reader.get();
            frac = 10 * frac + u64::from(digit);
            scale *= 10;
        }

        let value = value as f64 + frac as f64 / scale as f64;
        self.make_token(TokenType::Double(value))
    }

    // "0x" is already consumed.
    fn hex_number(&mut self) -> Token {
        if !self.reader.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            return self.error("hexadecimal literal has no digits".to_string());
        }

        let mut value: i64 = 0;
        while let Some(digit) = self.reader.peek().and_then(|c| c.to_digit(16)) {
            self.reader.get();
            match value
                .checked_mul(16)
                .and_then(|v| v.checked_add(i64::from(digit)))
            {
                Some(next) => value = next,
                None => {
                    self.warn(
                        self.current_span(),
                        "hexadecimal integer literal is too large",
                    );
                    self.skip_while(|c| c.is_ascii_hexdigit());
                    break;
                }
            }
        }

        self.make_token(TokenType::Integer(value))
    }

    // Greedy: stops before whitespace, alphanumerics or end of input, and
    // stops after a repeat of the lead character.
    fn infix_op(&mut self, lead: char) -> Token {
        let mut symbol = String::from(lead);
        while let Some(c) = self.reader.peek() {
            if c.is_whitespace() || c.is_ascii_alphanumeric() {
                break;
            }
            self.reader.get();
            symbol.push(c);
            if c == lead {
                break;
            }
        }
        self.make_token(TokenType::InfixOp(symbol))
    }
}
