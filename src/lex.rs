//! Análisis léxico.
//!
//! Primera fase del compilador: descompone el código fuente en
//! tokens. Los espacios en blanco y los comentarios de línea (`//`)
//! se descartan. Cada token conserva el número de línea en que
//! aparece, lo cual permite rastrear errores en las fases
//! posteriores.
//!
//! El lenguaje distingue mayúsculas de minúsculas y solo admite
//! literales enteros no negativos en base diez; los valores
//! negativos surgen únicamente de expresiones.

use std::fmt::{self, Display};
use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream at line {1}")]
    BadChar(char, u32),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow at line {0}")]
    IntOverflow(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(String),

    /// Literal de entero.
    Int(i64),

    /// Palabra clave.
    Keyword(Keyword),

    /// `=`
    Assign,

    /// `==`
    Equal,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Star,

    /// `/`
    Slash,

    /// `<`
    Less,

    /// `>`
    Greater,

    /// `&`
    Ampersand,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `;`
    Semicolon,

    /// `,`
    Comma,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Int,
    Void,
    Return,
    If,
    Else,
    While,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "`{}`", id),
            Int(value) => write!(fmt, "`{}`", value),
            Keyword(keyword) => write!(fmt, "`{:?}`", keyword),
            Assign => fmt.write_str("`=`"),
            Equal => fmt.write_str("`==`"),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Star => fmt.write_str("`*`"),
            Slash => fmt.write_str("`/`"),
            Less => fmt.write_str("`<`"),
            Greater => fmt.write_str("`>`"),
            Ampersand => fmt.write_str("`&`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            OpenCurly => fmt.write_str("`{`"),
            CloseCurly => fmt.write_str("`}`"),
            Semicolon => fmt.write_str("`;`"),
            Comma => fmt.write_str("`,`"),
        }
    }
}

/// Token junto con su línea de origen.
#[derive(Debug, Clone)]
pub struct Lexeme {
    pub token: Token,
    pub line: u32,
}

/// Escanea un programa completo.
pub fn lex(source: &str) -> Result<Vec<Lexeme>, LexerError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        let token = match c {
            '\n' => {
                line += 1;
                continue;
            }

            c if c.is_whitespace() => continue,

            '/' if chars.peek() == Some(&'/') => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }

                    chars.next();
                }

                continue;
            }

            '=' if chars.peek() == Some(&'=') => {
                chars.next();
                Token::Equal
            }

            '=' => Token::Assign,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '<' => Token::Less,
            '>' => Token::Greater,
            '&' => Token::Ampersand,
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            '{' => Token::OpenCurly,
            '}' => Token::CloseCurly,
            ';' => Token::Semicolon,
            ',' => Token::Comma,

            c if c.is_ascii_digit() => {
                let mut value = i64::from(c as u8 - b'0');
                while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                    value = value
                        .checked_mul(10)
                        .and_then(|value| value.checked_add(i64::from(digit)))
                        .ok_or(LexerError::IntOverflow(line))?;

                    chars.next();
                }

                Token::Int(value)
            }

            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                word.push(c);

                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }

                match word.as_str() {
                    "int" => Token::Keyword(Keyword::Int),
                    "void" => Token::Keyword(Keyword::Void),
                    "return" => Token::Keyword(Keyword::Return),
                    "if" => Token::Keyword(Keyword::If),
                    "else" => Token::Keyword(Keyword::Else),
                    "while" => Token::Keyword(Keyword::While),
                    _ => Token::Id(word),
                }
            }

            c => return Err(LexerError::BadChar(c, line)),
        };

        tokens.push(Lexeme { token, line });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_operators_and_keywords() {
        let tokens = lex("int x = a == 2; // comentario\nwhile").unwrap();
        let tokens = tokens.into_iter().map(|l| l.token).collect::<Vec<_>>();

        assert_eq!(
            tokens,
            vec![
                Token::Keyword(Keyword::Int),
                Token::Id(String::from("x")),
                Token::Assign,
                Token::Id(String::from("a")),
                Token::Equal,
                Token::Int(2),
                Token::Semicolon,
                Token::Keyword(Keyword::While),
            ]
        );
    }

    #[test]
    fn tracks_lines() {
        let tokens = lex("a\nb\n\nc").unwrap();
        let lines = tokens.iter().map(|l| l.line).collect::<Vec<_>>();
        assert_eq!(lines, vec![1, 2, 4]);
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(matches!(lex("int $"), Err(LexerError::BadChar('$', 1))));
    }

    #[test]
    fn rejects_overflowing_literals() {
        assert!(matches!(
            lex("99999999999999999999"),
            Err(LexerError::IntOverflow(1))
        ));
    }
}
