// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The lexer implementation using logos.

use logos::Logos;
use lus_ast::token::{Token, TokenKind};
use lus_ast::Span;

/// Raw token type for logos - literal values are parsed in a second
/// pass.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum RawToken {
    // === Keywords ===
    #[token("and")]
    And,
    #[token("break")]
    Break,
    #[token("do")]
    Do,
    #[token("else")]
    Else,
    #[token("elseif")]
    Elseif,
    #[token("end")]
    End,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("function")]
    Function,
    #[token("if")]
    If,
    #[token("in")]
    In,
    #[token("local")]
    Local,
    #[token("nil")]
    Nil,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("repeat")]
    Repeat,
    #[token("return")]
    Return,
    #[token("then")]
    Then,
    #[token("true")]
    True,
    #[token("until")]
    Until,
    #[token("while")]
    While,

    // === Comments: `--` to end of line, `--[[ ... ]]` block ===
    #[token("--", comment)]
    Comment,

    // === Operators (longer first) ===
    #[token("==")]
    EqEq,
    #[token("~=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("..")]
    DotDot,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("#")]
    Hash,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Eq,

    // === Delimiters ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // === Literals ===
    #[regex(r"0[xX][0-9a-fA-F]+")]
    HexInt,
    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?")]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+")]
    Float,
    #[regex(r"[0-9]+")]
    DecInt,

    #[regex(r#""([^"\\\n]|\\.)*""#)]
    #[regex(r#"'([^'\\\n]|\\.)*'"#)]
    Str,

    // === Identifier (after keywords) ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

/// Skip a comment. The leading `--` is already consumed; `[[` opens a
/// block comment closed by `]]`, anything else runs to the newline.
fn comment(lexer: &mut logos::Lexer<RawToken>) -> logos::Skip {
    let rest = lexer.remainder();
    if let Some(body) = rest.strip_prefix("[[") {
        match body.find("]]") {
            Some(close) => lexer.bump(2 + close + 2),
            None => lexer.bump(rest.len()), // unterminated: swallow the rest
        }
    } else {
        match rest.find('\n') {
            Some(nl) => lexer.bump(nl),
            None => lexer.bump(rest.len()),
        }
    }
    logos::Skip
}

/// Lexer errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LexError {
    #[error("unexpected character '{ch}'")]
    UnexpectedChar { ch: char, span: Span },
    #[error("malformed number '{text}'")]
    MalformedNumber { text: String, span: Span },
    #[error("invalid escape sequence '\\{ch}'")]
    BadEscape { ch: char, span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. } => *span,
            LexError::MalformedNumber { span, .. } => *span,
            LexError::BadEscape { span, .. } => *span,
        }
    }
}

/// Tokenize Lus source. Stops at the first error.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut lexer = RawToken::lexer(source);

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(range.start, range.end);
        let slice = lexer.slice();

        let raw = result.map_err(|()| {
            let ch = source[range.start..].chars().next().unwrap_or('?');
            LexError::UnexpectedChar { ch, span }
        })?;
        tokens.push(Token {
            kind: convert(raw, slice, span)?,
            span,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(source.len(), source.len()),
    });
    Ok(tokens)
}

fn convert(raw: RawToken, slice: &str, span: Span) -> Result<TokenKind, LexError> {
    Ok(match raw {
        RawToken::And => TokenKind::And,
        RawToken::Break => TokenKind::Break,
        RawToken::Do => TokenKind::Do,
        RawToken::Else => TokenKind::Else,
        RawToken::Elseif => TokenKind::Elseif,
        RawToken::End => TokenKind::End,
        RawToken::False => TokenKind::False,
        RawToken::For => TokenKind::For,
        RawToken::Function => TokenKind::Function,
        RawToken::If => TokenKind::If,
        RawToken::In => TokenKind::In,
        RawToken::Local => TokenKind::Local,
        RawToken::Nil => TokenKind::Nil,
        RawToken::Not => TokenKind::Not,
        RawToken::Or => TokenKind::Or,
        RawToken::Repeat => TokenKind::Repeat,
        RawToken::Return => TokenKind::Return,
        RawToken::Then => TokenKind::Then,
        RawToken::True => TokenKind::True,
        RawToken::Until => TokenKind::Until,
        RawToken::While => TokenKind::While,
        RawToken::Comment => unreachable!("comments are skipped"),
        RawToken::EqEq => TokenKind::EqEq,
        RawToken::NotEq => TokenKind::NotEq,
        RawToken::LtEq => TokenKind::LtEq,
        RawToken::GtEq => TokenKind::GtEq,
        RawToken::DotDot => TokenKind::DotDot,
        RawToken::Plus => TokenKind::Plus,
        RawToken::Minus => TokenKind::Minus,
        RawToken::Star => TokenKind::Star,
        RawToken::Slash => TokenKind::Slash,
        RawToken::Percent => TokenKind::Percent,
        RawToken::Caret => TokenKind::Caret,
        RawToken::Hash => TokenKind::Hash,
        RawToken::Lt => TokenKind::Lt,
        RawToken::Gt => TokenKind::Gt,
        RawToken::Eq => TokenKind::Eq,
        RawToken::LParen => TokenKind::LParen,
        RawToken::RParen => TokenKind::RParen,
        RawToken::LBrace => TokenKind::LBrace,
        RawToken::RBrace => TokenKind::RBrace,
        RawToken::LBracket => TokenKind::LBracket,
        RawToken::RBracket => TokenKind::RBracket,
        RawToken::Semi => TokenKind::Semi,
        RawToken::Colon => TokenKind::Colon,
        RawToken::Comma => TokenKind::Comma,
        RawToken::Dot => TokenKind::Dot,
        RawToken::HexInt => {
            let digits = &slice[2..];
            let value = i64::from_str_radix(digits, 16).map_err(|_| LexError::MalformedNumber {
                text: slice.to_string(),
                span,
            })?;
            TokenKind::Int(value)
        }
        RawToken::DecInt => match slice.parse::<i64>() {
            Ok(value) => TokenKind::Int(value),
            // Too large for an integer: fall back to float, as Lua does.
            Err(_) => {
                let value = slice.parse::<f64>().map_err(|_| LexError::MalformedNumber {
                    text: slice.to_string(),
                    span,
                })?;
                TokenKind::Float(value)
            }
        },
        RawToken::Float => {
            let value = slice.parse::<f64>().map_err(|_| LexError::MalformedNumber {
                text: slice.to_string(),
                span,
            })?;
            TokenKind::Float(value)
        }
        RawToken::Str => TokenKind::Str(unescape(&slice[1..slice.len() - 1], span)?),
        RawToken::Ident => TokenKind::Ident(slice.to_string()),
    })
}

/// Process escape sequences in a string literal body.
fn unescape(body: &str, span: Span) -> Result<String, LexError> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0C'),
            Some('v') => out.push('\x0B'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('0') => out.push('\0'),
            Some(ch) => return Err(LexError::BadEscape { ch, span }),
            None => return Err(LexError::BadEscape { ch: ' ', span }),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lus_ast::token::TokenKind as T;

    fn kinds(source: &str) -> Vec<T> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("local x = nil"),
            vec![T::Local, T::Ident("x".into()), T::Eq, T::Nil, T::Eof]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("1 42 3.5 0x1F 1e3 .25"),
            vec![
                T::Int(1),
                T::Int(42),
                T::Float(3.5),
                T::Int(31),
                T::Float(1000.0),
                T::Float(0.25),
                T::Eof
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            kinds(r#""a\nb" 'c'"#),
            vec![T::Str("a\nb".into()), T::Str("c".into()), T::Eof]
        );
    }

    #[test]
    fn operators_longest_match() {
        assert_eq!(
            kinds("a ~= b .. c"),
            vec![
                T::Ident("a".into()),
                T::NotEq,
                T::Ident("b".into()),
                T::DotDot,
                T::Ident("c".into()),
                T::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("x -- trailing\n--[[ block\ncomment ]] y"),
            vec![T::Ident("x".into()), T::Ident("y".into()), T::Eof]
        );
    }

    #[test]
    fn unexpected_character() {
        assert!(matches!(
            tokenize("x @ y"),
            Err(LexError::UnexpectedChar { ch: '@', .. })
        ));
    }
}
