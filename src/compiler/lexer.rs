use thiserror::Error;

use crate::compiler::source::{SourcePosition, SourceRange};

use self::token::{Token, TokenKind};

pub mod token;

#[derive(Error, Debug, PartialEq)]
pub enum LexerError {
    #[error("unexpected character {1:?} at {0}")]
    UnexpectedCharacter(SourcePosition, char),
    #[error("unterminated {1} literal at {0}")]
    Unterminated(SourcePosition, &'static str),
    #[error("unknown escape sequence `\\{1}` at {0}")]
    UnknownEscape(SourcePosition, char),
    #[error("integer literal overflow at {0}")]
    IntOverflow(SourcePosition),
}

impl LexerError {
    pub fn position(&self) -> SourcePosition {
        match self {
            LexerError::UnexpectedCharacter(position, _)
            | LexerError::Unterminated(position, _)
            | LexerError::UnknownEscape(position, _)
            | LexerError::IntOverflow(position) => *position,
        }
    }
}

/// Lexer is used to tokenize source code.
#[derive(Debug)]
pub struct Lexer {
    /// Source code to lex
    src: Vec<char>,
    /// Index of current position in source code (points to current char)
    position: usize,
    /// Index of current reading position in source code (after current char)
    read_position: usize,
    /// Current char under examination
    ch: Option<char>,
    /// Source position of the current char
    location: SourcePosition,
}

impl Lexer {
    pub fn new(src: &str) -> Self {
        let mut lexer = Self {
            src: src.chars().collect(),
            position: 0,
            read_position: 0,
            ch: None,
            location: SourcePosition::default(),
        };
        lexer.read_char();
        lexer
    }

    fn read_char(&mut self) {
        match self.ch {
            Some('\n') => self.location.increment_line(),
            Some(_) => self.location.increment_column(),
            None => (),
        }
        self.ch = self.src.get(self.read_position).copied();
        self.position = self.read_position;
        self.read_position += 1;
    }

    fn peek_char(&self) -> Option<char> {
        self.src.get(self.read_position).copied()
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.ch {
                Some(c) if c.is_whitespace() => self.read_char(),
                Some('/') if self.peek_char() == Some('/') => {
                    while self.ch.is_some() && self.ch != Some('\n') {
                        self.read_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_while_condition(&mut self, condition: fn(char) -> bool) -> String {
        let start = self.position;
        while let Some(c) = self.ch {
            if !condition(c) {
                break;
            }
            self.read_char();
        }
        self.src[start..self.position].iter().collect()
    }

    fn read_word(&mut self) -> String {
        self.read_while_condition(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    fn read_number(&mut self) -> Result<i32, LexerError> {
        let start = self.location;
        let (radix, digits) = if self.ch == Some('0') && matches!(self.peek_char(), Some('x' | 'X'))
        {
            self.read_char();
            self.read_char();
            (16, self.read_while_condition(|c| c.is_ascii_hexdigit()))
        } else if self.ch == Some('0') && matches!(self.peek_char(), Some('b' | 'B')) {
            self.read_char();
            self.read_char();
            (2, self.read_while_condition(|c| c == '0' || c == '1'))
        } else {
            (10, self.read_while_condition(|c| c.is_ascii_digit()))
        };

        i32::from_str_radix(&digits, radix).map_err(|_| LexerError::IntOverflow(start))
    }

    fn read_escape(&mut self) -> Result<char, LexerError> {
        let position = self.location;
        self.read_char(); // consume the backslash
        let escaped = match self.ch {
            Some('n') => '\n',
            Some('0') => '\0',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            Some(other) => return Err(LexerError::UnknownEscape(position, other)),
            None => return Err(LexerError::Unterminated(position, "string")),
        };
        self.read_char();
        Ok(escaped)
    }

    fn read_string(&mut self) -> Result<String, LexerError> {
        let start = self.location;
        self.read_char(); // consume the opening quote
        let mut text = String::new();
        loop {
            match self.ch {
                Some('"') => {
                    self.read_char();
                    return Ok(text);
                }
                Some('\\') => text.push(self.read_escape()?),
                Some(c) => {
                    text.push(c);
                    self.read_char();
                }
                None => return Err(LexerError::Unterminated(start, "string")),
            }
        }
    }

    fn read_char_literal(&mut self) -> Result<char, LexerError> {
        let start = self.location;
        self.read_char(); // consume the opening quote
        let value = match self.ch {
            Some('\\') => self.read_escape()?,
            Some(c) => {
                self.read_char();
                c
            }
            None => return Err(LexerError::Unterminated(start, "character")),
        };
        match self.ch {
            Some('\'') => {
                self.read_char();
                Ok(value)
            }
            _ => Err(LexerError::Unterminated(start, "character")),
        }
    }

    /// Consume the current char and, when the next one is `next`, that too.
    /// Returns `two` in that case and `one` otherwise.
    fn one_or_two(&mut self, next: char, one: TokenKind, two: TokenKind) -> TokenKind {
        self.read_char();
        if self.ch == Some(next) {
            self.read_char();
            two
        } else {
            one
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace_and_comments();
        let start = self.location;

        let kind = match self.ch {
            None => TokenKind::Eof,
            Some('"') => TokenKind::Str(self.read_string()?),
            Some('\'') => TokenKind::Char(self.read_char_literal()?),
            Some(c) if c.is_ascii_digit() => TokenKind::Integer(self.read_number()?),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let word = self.read_word();
                TokenKind::keyword(&word).unwrap_or(TokenKind::Identifier(word))
            }
            Some('(') => self.single(TokenKind::ParenLeft),
            Some(')') => self.single(TokenKind::ParenRight),
            Some('{') => self.single(TokenKind::BraceLeft),
            Some('}') => self.single(TokenKind::BraceRight),
            Some('[') => self.single(TokenKind::BracketLeft),
            Some(']') => self.single(TokenKind::BracketRight),
            Some(',') => self.single(TokenKind::Comma),
            Some(';') => self.single(TokenKind::Semicolon),
            Some(':') => self.single(TokenKind::Colon),
            Some('.') => self.single(TokenKind::Dot),
            Some('@') => self.single(TokenKind::At),
            Some('=') => self.one_or_two('=', TokenKind::Assign, TokenKind::Eq),
            Some('!') => self.one_or_two('=', TokenKind::Bang, TokenKind::Ne),
            Some('^') => self.one_or_two('=', TokenKind::Caret, TokenKind::CaretAssign),
            Some('%') => self.single(TokenKind::Percent),
            Some('+') => match self.peek_char() {
                Some('+') => self.double(TokenKind::PlusPlus),
                Some('=') => self.double(TokenKind::PlusAssign),
                _ => self.single(TokenKind::Plus),
            },
            Some('-') => match self.peek_char() {
                Some('-') => self.double(TokenKind::MinusMinus),
                Some('=') => self.double(TokenKind::MinusAssign),
                _ => self.single(TokenKind::Minus),
            },
            Some('*') => self.one_or_two('=', TokenKind::Star, TokenKind::StarAssign),
            Some('/') => self.one_or_two('=', TokenKind::Slash, TokenKind::SlashAssign),
            Some('&') => match self.peek_char() {
                Some('&') => self.double(TokenKind::AndAnd),
                Some('=') => self.double(TokenKind::AmpAssign),
                _ => self.single(TokenKind::Amp),
            },
            Some('|') => match self.peek_char() {
                Some('|') => self.double(TokenKind::OrOr),
                Some('=') => self.double(TokenKind::PipeAssign),
                _ => self.single(TokenKind::Pipe),
            },
            Some('<') => match self.peek_char() {
                Some('=') => self.double(TokenKind::Le),
                Some('<') => {
                    self.read_char();
                    self.one_or_two('=', TokenKind::Shl, TokenKind::ShlAssign)
                }
                _ => self.single(TokenKind::Lt),
            },
            Some('>') => match self.peek_char() {
                Some('=') => self.double(TokenKind::Ge),
                Some('>') => {
                    self.read_char();
                    self.one_or_two('=', TokenKind::Shr, TokenKind::ShrAssign)
                }
                _ => self.single(TokenKind::Gt),
            },
            Some(c) => {
                // Consume the offending character so scanning can resume.
                self.read_char();
                return Err(LexerError::UnexpectedCharacter(start, c));
            }
        };

        Ok(Token::new(kind, SourceRange::new(start, self.location)))
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.read_char();
        kind
    }

    fn double(&mut self, kind: TokenKind) -> TokenKind {
        self.read_char();
        self.read_char();
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token.kind == TokenKind::Eof {
                return out;
            }
            out.push(token.kind);
        }
    }

    #[test]
    fn test_numbers() {
        let tests = vec![
            ("0", 0),
            ("42", 42),
            ("0x10", 16),
            ("0xD26F", 0xD26F),
            ("0b101", 5),
        ];
        for (input, expected) in tests {
            assert_eq!(kinds(input), vec![TokenKind::Integer(expected)]);
        }
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("var x while whale"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier("x".to_string()),
                TokenKind::While,
                TokenKind::Identifier("whale".to_string()),
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a += b << 2 >= c && !d"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::PlusAssign,
                TokenKind::Identifier("b".to_string()),
                TokenKind::Shl,
                TokenKind::Integer(2),
                TokenKind::Ge,
                TokenKind::Identifier("c".to_string()),
                TokenKind::AndAnd,
                TokenKind::Bang,
                TokenKind::Identifier("d".to_string()),
            ]
        );
        assert_eq!(kinds("<<="), vec![TokenKind::ShlAssign]);
        assert_eq!(kinds("x++"), vec![
            TokenKind::Identifier("x".to_string()),
            TokenKind::PlusPlus,
        ]);
    }

    #[test]
    fn test_string_and_char() {
        assert_eq!(
            kinds("\"hi\" 'a' '\\0'"),
            vec![
                TokenKind::Str("hi".to_string()),
                TokenKind::Char('a'),
                TokenKind::Char('\0'),
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("a // the rest\nb"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Identifier("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let mut lexer = Lexer::new("a\n  b");
        let a = lexer.next_token().unwrap();
        let b = lexer.next_token().unwrap();
        assert_eq!(a.range.start, SourcePosition::new(1, 1));
        assert_eq!(b.range.start, SourcePosition::new(2, 3));
    }

    #[test]
    fn test_bad_character() {
        let mut lexer = Lexer::new("#");
        assert_eq!(
            lexer.next_token(),
            Err(LexerError::UnexpectedCharacter(SourcePosition::new(1, 1), '#'))
        );
    }
}
