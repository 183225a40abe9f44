// Expression Lexer
// Tokenizes workflow expressions found inside ${{ }}

use std::fmt;

/// Token types for workflow expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    String(String),

    // Identifiers and references
    Identifier(String),

    // Operators
    Eq,   // ==
    Ne,   // !=
    Lt,   // <
    Le,   // <=
    Gt,   // >
    Ge,   // >=
    And,  // &&
    Or,   // ||
    Not,  // !
    Dot,  // .
    Star, // *
    Comma,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Null => write!(f, "null"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::Dot => write!(f, "."),
            Token::Star => write!(f, "*"),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Eof => write!(f, "EOF"),
        }
    }
}

/// Lexer error
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for LexError {}

/// Lexer for workflow expressions
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }

        Ok(tokens)
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        self.position = pos;

        match ch {
            '.' => self.single(Token::Dot),
            ',' => self.single(Token::Comma),
            '*' => self.single(Token::Star),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),

            '=' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Eq)
                } else {
                    Err(LexError {
                        message: "expected '==' operator".to_string(),
                        position: pos,
                    })
                }
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Ne)
                } else {
                    Ok(Token::Not)
                }
            }
            '<' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Le)
                } else {
                    Ok(Token::Lt)
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(Token::Ge)
                } else {
                    Ok(Token::Gt)
                }
            }
            '&' => {
                self.advance();
                if self.peek_char() == Some('&') {
                    self.advance();
                    Ok(Token::And)
                } else {
                    Err(LexError {
                        message: "expected '&&' operator".to_string(),
                        position: pos,
                    })
                }
            }
            '|' => {
                self.advance();
                if self.peek_char() == Some('|') {
                    self.advance();
                    Ok(Token::Or)
                } else {
                    Err(LexError {
                        message: "expected '||' operator".to_string(),
                        position: pos,
                    })
                }
            }

            '\'' => self.read_string(),

            '0'..='9' | '-' => self.read_number(),

            'a'..='z' | 'A'..='Z' | '_' => Ok(self.read_identifier()),

            _ => Err(LexError {
                message: format!("unexpected character: '{}'", ch),
                position: pos,
            }),
        }
    }

    fn single(&mut self, token: Token) -> Result<Token, LexError> {
        self.advance();
        Ok(token)
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let start = self.position;
        self.advance(); // opening quote

        let mut value = String::new();

        loop {
            match self.chars.peek() {
                Some(&(_, '\'')) => {
                    self.advance();
                    // '' is an escaped quote
                    if self.peek_char() == Some('\'') {
                        value.push('\'');
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(&(_, ch)) => {
                    value.push(ch);
                    self.advance();
                }
                None => {
                    return Err(LexError {
                        message: "unterminated string".to_string(),
                        position: start,
                    });
                }
            }
        }

        Ok(Token::String(value))
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.position;
        let mut num_str = String::new();

        if self.peek_char() == Some('-') {
            num_str.push('-');
            self.advance();
        }

        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_ascii_digit() || ch == '.' {
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| LexError {
                message: format!("invalid number: {}", num_str),
                position: start,
            })
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();

        // Step ids and input names may contain dashes
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.to_lowercase().as_str() {
            "null" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Identifier(ident),
        }
    }
}

/// A piece of text that may contain `${{ }}` expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Expression body between `${{` and `}}`, trimmed
    Expression(String),
    /// Literal text
    Text(String),
}

/// Split a string into literal text and `${{ }}` expression segments
pub fn extract_segments(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("${{") {
        let body_start = start + 3;
        let Some(len) = find_closing(&rest[body_start..]) else {
            break;
        };

        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        segments.push(Segment::Expression(
            rest[body_start..body_start + len].trim().to_string(),
        ));
        rest = &rest[body_start + len + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }

    segments
}

/// Byte offset of the closing `}}`, ignoring braces inside string literals
fn find_closing(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }

    None
}

/// Whether the text contains at least one `${{ }}` expression
pub fn contains_expression(input: &str) -> bool {
    extract_segments(input)
        .iter()
        .any(|s| matches!(s, Segment::Expression(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input).tokenize().unwrap()
    }

    #[test]
    fn test_lexer_reference() {
        assert_eq!(
            lex("matrix.experimental"),
            vec![
                Token::Identifier("matrix".to_string()),
                Token::Dot,
                Token::Identifier("experimental".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_operators() {
        assert_eq!(
            lex("== != < <= > >= && || !"),
            vec![
                Token::Eq,
                Token::Ne,
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge,
                Token::And,
                Token::Or,
                Token::Not,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_escaped_string() {
        assert_eq!(
            lex("'it''s'"),
            vec![Token::String("it's".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_lexer_numbers() {
        assert_eq!(lex("42"), vec![Token::Number(42.0), Token::Eof]);
        assert_eq!(lex("-1.5"), vec![Token::Number(-1.5), Token::Eof]);
    }

    #[test]
    fn test_lexer_keywords_are_case_insensitive() {
        assert_eq!(lex("TRUE"), vec![Token::True, Token::Eof]);
        assert_eq!(lex("Null"), vec![Token::Null, Token::Eof]);
    }

    #[test]
    fn test_lexer_dashed_identifier() {
        assert_eq!(
            lex("steps.build-fw.outcome")[2],
            Token::Identifier("build-fw".to_string())
        );
    }

    #[test]
    fn test_lexer_rejects_single_equals() {
        let err = Lexer::new("a = b").tokenize().unwrap_err();
        assert_eq!(err.position, 2);
    }

    #[test]
    fn test_extract_segments_mixed() {
        let segments = extract_segments("build (${{ matrix.rust }}, ${{ matrix.target }})");
        assert_eq!(
            segments,
            vec![
                Segment::Text("build (".to_string()),
                Segment::Expression("matrix.rust".to_string()),
                Segment::Text(", ".to_string()),
                Segment::Expression("matrix.target".to_string()),
                Segment::Text(")".to_string()),
            ]
        );
    }

    #[test]
    fn test_extract_segments_braces_in_string() {
        let segments = extract_segments("${{ format('{0}}}', 'x') }}");
        assert_eq!(
            segments,
            vec![Segment::Expression("format('{0}}}', 'x')".to_string())]
        );
    }

    #[test]
    fn test_extract_segments_unterminated_is_text() {
        let segments = extract_segments("echo ${{ matrix.rust");
        assert_eq!(segments, vec![Segment::Text("echo ${{ matrix.rust".to_string())]);
        assert!(!contains_expression("echo ${{ matrix.rust"));
    }
}
