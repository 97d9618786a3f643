//! Lexer for Topaz source text.

use crate::error::CoreError;
use crate::span::SourceId;

/// Kind of a token produced by the lexer.
///
/// The lexer only recognizes keywords, literal shapes and operators.
/// It attaches no meaning to identifiers; the parser and the analyzer
/// decide what they refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Primitive type keywords
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Bool,
    Noth,

    // Control keywords
    Let,
    Fun,
    If,
    Else,
    For,
    While,
    Const,
    Return,

    Ident,

    // Literals
    CharLiteral,
    ShortLiteral,
    IntLiteral,
    LongLiteral,
    FloatLiteral,
    DoubleLiteral,
    BoolLiteral, // true / false
    StringLiteral,

    // Arithmetic
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %

    // Assignment and compound assignment
    Assign,    // =
    PlusEq,    // +=
    MinusEq,   // -=
    StarEq,    // *=
    SlashEq,   // /=
    PercentEq, // %=

    // Increment / decrement
    Inc,       // ++
    Dec,       // --

    // Comparison
    EqEq,      // ==
    NotEq,     // !=
    Greater,   // >
    GreaterEq, // >=
    Less,      // <
    LessEq,    // <=

    // Logical
    Not,       // !
    AndAnd,    // &&
    OrOr,      // ||

    // Structural punctuation
    Comma,     // ,
    Dot,       // .
    Colon,     // :
    Semi,      // ;
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Question,  // ?
    Arrow,     // ->
}

impl TokenKind {
    /// Returns true for every reserved word, type keywords included.
    pub fn is_keyword(self) -> bool {
        self.is_type_keyword()
            || matches!(
                self,
                TokenKind::Let
                    | TokenKind::Fun
                    | TokenKind::If
                    | TokenKind::Else
                    | TokenKind::For
                    | TokenKind::While
                    | TokenKind::Const
                    | TokenKind::Return
            )
    }

    pub fn is_type_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::Char
                | TokenKind::Short
                | TokenKind::Int
                | TokenKind::Long
                | TokenKind::Float
                | TokenKind::Double
                | TokenKind::Bool
                | TokenKind::Noth
        )
    }
}

/// A single token.
///
/// For string and character literals `lexeme` holds the decoded
/// content; for numeric literals it holds the digits (and decimal
/// point) with separators and the suffix removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
    pub column: u32,
    pub source: SourceId,
}

/// Lex a source string into tokens.
///
/// Lexing stops at the first error. Calling this twice on the same
/// input yields the same tokens.
pub fn tokenize(source: &str, source_id: &SourceId) -> Result<Vec<Token>, CoreError> {
    let mut lexer = Lexer {
        source_id: source_id.clone(),
        chars: source.as_bytes(),
        index: 0,
        line: 1,
        column: 1,
    };
    lexer.run()
}

struct Lexer<'src> {
    source_id: SourceId,
    chars: &'src [u8],
    index: usize,
    line: u32,
    column: u32,
}

impl<'src> Lexer<'src> {
    fn run(&mut self) -> Result<Vec<Token>, CoreError> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.current() {
            if is_whitespace(ch) {
                self.advance()?;
                continue;
            }

            let token = match ch {
                b'/' if self.peek(1)? == b'/' => {
                    self.skip_comment()?;
                    continue;
                }
                b'"' => self.lex_string()?,
                b'\'' => self.lex_character()?,
                b'0'..=b'9' => self.lex_number()?,
                _ if ch.is_ascii_alphabetic() => self.lex_ident_or_keyword()?,
                _ => self.lex_operator()?,
            };
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn token(&self, kind: TokenKind, lexeme: impl Into<String>, line: u32, column: u32) -> Token {
        Token {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
            source: self.source_id.clone(),
        }
    }

    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::lex(&self.source_id, self.line, message)
    }

    fn skip_comment(&mut self) -> Result<(), CoreError> {
        self.advance()?; // '/'
        self.advance()?; // '/'
        while let Some(ch) = self.current() {
            if ch == b'\n' {
                break;
            }
            self.advance()?;
        }
        Ok(())
    }

    fn lex_ident_or_keyword(&mut self) -> Result<Token, CoreError> {
        let (line, column) = (self.line, self.column);
        let start = self.index;
        while let Some(ch) = self.current() {
            if is_ident_continue(ch) {
                self.advance()?;
            } else {
                break;
            }
        }

        // Identifiers are ASCII, so this slice is always valid UTF-8.
        let text = String::from_utf8_lossy(&self.chars[start..self.index]).into_owned();
        let kind = keyword(&text).unwrap_or(match text.as_str() {
            "true" | "false" => TokenKind::BoolLiteral,
            _ => TokenKind::Ident,
        });
        Ok(self.token(kind, text, line, column))
    }

    fn lex_number(&mut self) -> Result<Token, CoreError> {
        let (line, column) = (self.line, self.column);
        let mut digits = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current() {
            match ch {
                b'_' => {
                    self.advance()?;
                }
                b'.' => {
                    if has_dot {
                        return Err(self.error("invalid number literal: second decimal point"));
                    }
                    let next = self.peek(1)?;
                    if next == b'_' {
                        return Err(
                            self.error("invalid number literal: '_' cannot follow the decimal point")
                        );
                    }
                    if !next.is_ascii_digit() {
                        return Err(
                            self.error("invalid number literal: decimal point cannot end a literal")
                        );
                    }
                    has_dot = true;
                    digits.push(self.advance()? as char);
                }
                b'0'..=b'9' => digits.push(self.advance()? as char),
                _ => break,
            }
        }

        let kind = match self.current().map(|ch| ch.to_ascii_lowercase()) {
            Some(b'f') => {
                self.advance()?;
                TokenKind::FloatLiteral
            }
            Some(suffix @ (b's' | b'l')) => {
                if has_dot {
                    return Err(self.error(format!(
                        "invalid number literal: suffix '{}' does not match a floating point literal",
                        suffix as char
                    )));
                }
                self.advance()?;
                if suffix == b's' {
                    TokenKind::ShortLiteral
                } else {
                    TokenKind::LongLiteral
                }
            }
            _ if has_dot => TokenKind::DoubleLiteral,
            _ => TokenKind::IntLiteral,
        };

        Ok(self.token(kind, digits, line, column))
    }

    fn lex_string(&mut self) -> Result<Token, CoreError> {
        let (line, column) = (self.line, self.column);
        let content = self.lex_quoted(b'"', "string")?;
        Ok(self.token(TokenKind::StringLiteral, content, line, column))
    }

    fn lex_character(&mut self) -> Result<Token, CoreError> {
        let (line, column) = (self.line, self.column);
        let content = self.lex_quoted(b'\'', "character")?;
        if content.len() != 1 {
            return Err(self.error("invalid character literal: length must be exactly 1"));
        }
        Ok(self.token(TokenKind::CharLiteral, content, line, column))
    }

    /// Consume a delimited literal and return its decoded content.
    fn lex_quoted(&mut self, delimiter: u8, what: &str) -> Result<String, CoreError> {
        self.advance()?; // opening delimiter

        let mut bytes = Vec::new();
        while let Some(ch) = self.current() {
            if ch == delimiter {
                break;
            }
            let ch = self.advance()?;
            if ch == b'\\' {
                bytes.push(self.escape_sequence()?);
            } else {
                bytes.push(ch);
            }
        }
        if self.current().is_none() {
            return Err(self.error(format!(
                "unterminated {what} literal: missing closing {}",
                delimiter as char
            )));
        }
        self.advance()?; // closing delimiter

        String::from_utf8(bytes)
            .map_err(|_| self.error(format!("invalid {what} literal: not valid UTF-8")))
    }

    fn escape_sequence(&mut self) -> Result<u8, CoreError> {
        let ch = self.advance()?;
        let decoded = match ch {
            b'n' => b'\n',
            b't' => b'\t',
            b'v' => 0x0b,
            b'b' => 0x08,
            b'r' => b'\r',
            b'f' => 0x0c,
            b'a' => 0x07,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'?' => b'?',
            other => {
                return Err(self.error(format!(
                    "unsupported escape sequence '\\{}'",
                    other as char
                )));
            }
        };
        Ok(decoded)
    }

    fn lex_operator(&mut self) -> Result<Token, CoreError> {
        let (line, column) = (self.line, self.column);
        let ch = self.advance()?;

        let (kind, lexeme) = match ch {
            b'+' => match self.peek(0)? {
                b'=' => self.pair(TokenKind::PlusEq, "+=")?,
                b'+' => self.pair(TokenKind::Inc, "++")?,
                _ => (TokenKind::Plus, "+"),
            },
            b'-' => match self.peek(0)? {
                b'=' => self.pair(TokenKind::MinusEq, "-=")?,
                b'-' => self.pair(TokenKind::Dec, "--")?,
                b'>' => self.pair(TokenKind::Arrow, "->")?,
                _ => (TokenKind::Minus, "-"),
            },
            b'*' => match self.peek(0)? {
                b'=' => self.pair(TokenKind::StarEq, "*=")?,
                _ => (TokenKind::Star, "*"),
            },
            b'/' => match self.peek(0)? {
                b'=' => self.pair(TokenKind::SlashEq, "/=")?,
                _ => (TokenKind::Slash, "/"),
            },
            b'%' => match self.peek(0)? {
                b'=' => self.pair(TokenKind::PercentEq, "%=")?,
                _ => (TokenKind::Percent, "%"),
            },
            b'=' => match self.peek(0)? {
                b'=' => self.pair(TokenKind::EqEq, "==")?,
                _ => (TokenKind::Assign, "="),
            },
            b'!' => match self.peek(0)? {
                b'=' => self.pair(TokenKind::NotEq, "!=")?,
                _ => (TokenKind::Not, "!"),
            },
            b'>' => match self.peek(0)? {
                b'=' => self.pair(TokenKind::GreaterEq, ">=")?,
                _ => (TokenKind::Greater, ">"),
            },
            b'<' => match self.peek(0)? {
                b'=' => self.pair(TokenKind::LessEq, "<=")?,
                _ => (TokenKind::Less, "<"),
            },
            b'&' => match self.peek(0)? {
                b'&' => self.pair(TokenKind::AndAnd, "&&")?,
                _ => return Err(self.error("unsupported operator '&' (bitwise and)")),
            },
            b'|' => match self.peek(0)? {
                b'|' => self.pair(TokenKind::OrOr, "||")?,
                _ => return Err(self.error("unsupported operator '|' (bitwise or)")),
            },
            b',' => (TokenKind::Comma, ","),
            b'.' => (TokenKind::Dot, "."),
            b':' => (TokenKind::Colon, ":"),
            b';' => (TokenKind::Semi, ";"),
            b'(' => (TokenKind::LParen, "("),
            b')' => (TokenKind::RParen, ")"),
            b'{' => (TokenKind::LBrace, "{"),
            b'}' => (TokenKind::RBrace, "}"),
            b'[' => (TokenKind::LBracket, "["),
            b']' => (TokenKind::RBracket, "]"),
            b'?' => (TokenKind::Question, "?"),
            other => {
                return Err(self.error(format!(
                    "unsupported operator '{}'",
                    char::from(other).escape_default()
                )));
            }
        };

        Ok(self.token(kind, lexeme, line, column))
    }

    /// Consume the second character of a two-character operator.
    fn pair(
        &mut self,
        kind: TokenKind,
        lexeme: &'static str,
    ) -> Result<(TokenKind, &'static str), CoreError> {
        self.advance()?;
        Ok((kind, lexeme))
    }

    fn current(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    /// Look `offset` bytes ahead. Reading past the end is an error.
    fn peek(&self, offset: usize) -> Result<u8, CoreError> {
        let position = self.index + offset;
        self.chars.get(position).copied().ok_or_else(|| {
            self.error(format!(
                "index out of range: {}/{}",
                position,
                self.chars.len()
            ))
        })
    }

    fn advance(&mut self) -> Result<u8, CoreError> {
        let ch = self.peek(0)?;
        self.index += 1;
        self.column += 1;
        if ch == b'\n' {
            self.line += 1;
            self.column = 1;
        }
        Ok(ch)
    }
}

fn keyword(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "char" => TokenKind::Char,
        "short" => TokenKind::Short,
        "int" => TokenKind::Int,
        "long" => TokenKind::Long,
        "float" => TokenKind::Float,
        "double" => TokenKind::Double,
        "bool" => TokenKind::Bool,
        "noth" => TokenKind::Noth,
        "let" => TokenKind::Let,
        "fun" => TokenKind::Fun,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "while" => TokenKind::While,
        "const" => TokenKind::Const,
        "return" => TokenKind::Return,
        _ => return None,
    };
    Some(kind)
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\n' | b'\t' | b'\r')
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Result<Vec<Token>, CoreError> {
        tokenize(source, &SourceId::new("test.tp"))
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source)
            .expect("lex")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn two_character_operators_are_single_tokens() {
        let cases = [
            ("+= ", TokenKind::PlusEq),
            ("++ ", TokenKind::Inc),
            ("-= ", TokenKind::MinusEq),
            ("-- ", TokenKind::Dec),
            ("-> ", TokenKind::Arrow),
            ("*= ", TokenKind::StarEq),
            ("/= ", TokenKind::SlashEq),
            ("%= ", TokenKind::PercentEq),
            ("== ", TokenKind::EqEq),
            ("!= ", TokenKind::NotEq),
            (">= ", TokenKind::GreaterEq),
            ("<= ", TokenKind::LessEq),
            ("&& ", TokenKind::AndAnd),
            ("|| ", TokenKind::OrOr),
        ];
        for (source, expected) in cases {
            let tokens = lex(source).expect("lex");
            assert_eq!(tokens.len(), 1, "operator {source:?}");
            assert_eq!(tokens[0].kind, expected);
            assert_eq!(tokens[0].lexeme, source.trim_end());
        }
    }

    #[test]
    fn numeric_suffixes_select_literal_kind() {
        assert_eq!(kinds("3s"), vec![TokenKind::ShortLiteral]);
        assert_eq!(kinds("3l"), vec![TokenKind::LongLiteral]);
        assert_eq!(kinds("3L"), vec![TokenKind::LongLiteral]);
        assert_eq!(kinds("3f"), vec![TokenKind::FloatLiteral]);
        assert_eq!(kinds("3.5F"), vec![TokenKind::FloatLiteral]);
        assert_eq!(kinds("3.0"), vec![TokenKind::DoubleLiteral]);
        assert_eq!(kinds("3"), vec![TokenKind::IntLiteral]);
    }

    #[test]
    fn rejects_suffix_after_decimal_point() {
        assert!(matches!(lex("3.s"), Err(CoreError::LexError { .. })));
        assert!(matches!(lex("3.0s"), Err(CoreError::LexError { .. })));
        assert!(matches!(lex("3.0l"), Err(CoreError::LexError { .. })));
    }

    #[test]
    fn rejects_malformed_decimal_points() {
        let err = lex("1.2.3").unwrap_err();
        assert!(err.message().contains("second decimal point"));
        let err = lex("1._5").unwrap_err();
        assert!(err.message().contains("'_'"));
        let err = lex("1.;").unwrap_err();
        assert!(err.message().contains("cannot end"));
    }

    #[test]
    fn underscores_are_digit_separators() {
        let tokens = lex("1_000_000l").expect("lex");
        assert_eq!(tokens[0].kind, TokenKind::LongLiteral);
        assert_eq!(tokens[0].lexeme, "1000000");
    }

    #[test]
    fn recognizes_keywords_booleans_and_identifiers() {
        assert_eq!(
            kinds("let fun const return noth true false value_1"),
            vec![
                TokenKind::Let,
                TokenKind::Fun,
                TokenKind::Const,
                TokenKind::Return,
                TokenKind::Noth,
                TokenKind::BoolLiteral,
                TokenKind::BoolLiteral,
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn decodes_escape_sequences() {
        let tokens = lex(r#""a\tb\n\"q\"" '\\'"#).expect("lex");
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].lexeme, "a\tb\n\"q\"");
        assert_eq!(tokens[1].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[1].lexeme, "\\");
    }

    #[test]
    fn rejects_unknown_escape() {
        let err = lex(r#""\q""#).unwrap_err();
        assert!(err.message().contains("escape"));
    }

    #[test]
    fn rejects_unterminated_literals() {
        assert!(lex("\"abc").unwrap_err().message().contains("unterminated"));
        assert!(lex("'a").unwrap_err().message().contains("unterminated"));
    }

    #[test]
    fn rejects_character_literal_of_wrong_length() {
        assert!(lex("'ab'").unwrap_err().message().contains("length"));
        assert!(lex("''").unwrap_err().message().contains("length"));
    }

    #[test]
    fn rejects_single_ampersand_and_pipe() {
        assert!(lex("a & b").unwrap_err().message().contains("bitwise and"));
        assert!(lex("a | b").unwrap_err().message().contains("bitwise or"));
        assert!(lex("a # b").unwrap_err().message().contains("unsupported operator"));
    }

    #[test]
    fn truncated_operator_at_end_of_input_is_an_error() {
        let err = lex("1 +").unwrap_err();
        assert!(err.message().contains("index out of range"));
    }

    #[test]
    fn skips_comments_and_tracks_lines() {
        let tokens = lex("let // ignored ; tokens\n  int").expect("lex");
        assert_eq!(tokens.len(), 2);
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn lexing_is_deterministic() {
        let source = "fun f(a: int) -> int { return a * 2; }";
        assert_eq!(lex(source).expect("lex"), lex(source).expect("lex"));
    }

    #[test]
    fn diagnostics_carry_source_and_line() {
        let err = lex("let\n\n  @").unwrap_err();
        let location = err.location().expect("location");
        assert_eq!(location.line, 3);
        assert_eq!(location.source.as_str(), "test.tp");
    }
}
