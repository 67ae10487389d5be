use crate::store::error;
use ledger_core::{Cause, Result};
use std::{iter::Peekable, str::CharIndices};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// Keyword or bare identifier, keywords are matched case insensitively.
    Word(String),
    /// `"quoted"` or `` `quoted` `` identifier, never a keyword.
    Quoted(String),
    String(String),
    Integer(i64),
    Float(f64),
    /// `?` placeholder.
    Parameter,
    Symbol(&'static str),
}

impl Token {
    pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(v) if v.eq_ignore_ascii_case(keyword))
    }
}

pub(crate) struct Lexer<'a> {
    src: &'a str,
    iter: Peekable<CharIndices<'a>>,
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while self.iter.next_if(|(_, c)| c.is_whitespace()).is_some() {}
            // Line comments
            if self.src[self.position()..].starts_with("--") {
                while self.iter.next_if(|(_, c)| *c != '\n').is_some() {}
                continue;
            }
            break;
        }
        let &(i, c) = self.iter.peek()?;
        Some(match c {
            '\'' => self.scan_string(),
            '"' | '`' => self.scan_quoted(c),
            '0'..='9' => self.scan_number(),
            c if c.is_alphabetic() || c == '_' => Ok(self.scan_word()),
            _ => self.scan_symbol().ok_or_else(|| {
                error(
                    Cause::Syntax,
                    format!("Unexpected character `{c}` at position {i}"),
                )
            }),
        })
    }
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self {
            src,
            iter: src.char_indices().peekable(),
        }
    }

    fn position(&mut self) -> usize {
        self.iter.peek().map(|(i, _)| *i).unwrap_or(self.src.len())
    }

    fn scan_string(&mut self) -> Result<Token> {
        self.iter.next();
        let mut value = String::new();
        while let Some((_, c)) = self.iter.next() {
            match c {
                '\'' => match self.iter.peek() {
                    // Escaped single quote
                    Some((_, '\'')) => {
                        self.iter.next();
                        value.push('\'');
                    }
                    _ => return Ok(Token::String(value)),
                },
                _ => value.push(c),
            }
        }
        Err(error(Cause::Syntax, "Unterminated string literal"))
    }

    fn scan_quoted(&mut self, quote: char) -> Result<Token> {
        self.iter.next();
        let mut value = String::new();
        for (_, c) in self.iter.by_ref() {
            if c == quote {
                return Ok(Token::Quoted(value));
            }
            value.push(c);
        }
        Err(error(Cause::Syntax, "Unterminated quoted identifier"))
    }

    fn scan_number(&mut self) -> Result<Token> {
        let begin = self.position();
        while self.iter.next_if(|(_, c)| c.is_ascii_digit()).is_some() {}
        let mut is_float = false;
        if self.iter.next_if(|(_, c)| *c == '.').is_some() {
            is_float = true;
            while self.iter.next_if(|(_, c)| c.is_ascii_digit()).is_some() {}
        }
        let text = &self.src[begin..self.position()];
        if is_float {
            text.parse()
                .map(Token::Float)
                .map_err(|e| error(Cause::Syntax, format!("Invalid number `{text}`: {e}")))
        } else {
            text.parse()
                .map(Token::Integer)
                .map_err(|e| error(Cause::Syntax, format!("Invalid integer `{text}`: {e}")))
        }
    }

    fn scan_word(&mut self) -> Token {
        let begin = self.position();
        while self
            .iter
            .next_if(|(_, c)| c.is_alphanumeric() || *c == '_')
            .is_some()
        {}
        Token::Word(self.src[begin..self.position()].to_string())
    }

    fn scan_symbol(&mut self) -> Option<Token> {
        let (_, c) = self.iter.next()?;
        let next = self.iter.peek().map(|(_, c)| *c);
        let symbol = match (c, next) {
            ('<', Some('=')) => "<=",
            ('<', Some('>')) => "<>",
            ('>', Some('=')) => ">=",
            ('!', Some('=')) => "!=",
            ('=', Some('=')) => "==",
            ('|', Some('|')) => "||",
            _ => {
                return Some(match c {
                    '?' => Token::Parameter,
                    '(' => Token::Symbol("("),
                    ')' => Token::Symbol(")"),
                    ',' => Token::Symbol(","),
                    ';' => Token::Symbol(";"),
                    '.' => Token::Symbol("."),
                    '*' => Token::Symbol("*"),
                    '+' => Token::Symbol("+"),
                    '-' => Token::Symbol("-"),
                    '/' => Token::Symbol("/"),
                    '%' => Token::Symbol("%"),
                    '=' => Token::Symbol("="),
                    '<' => Token::Symbol("<"),
                    '>' => Token::Symbol(">"),
                    _ => return None,
                });
            }
        };
        self.iter.next();
        Some(Token::Symbol(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input).collect::<Result<_>>().unwrap()
    }

    #[test]
    fn scan_string() {
        assert_eq!(
            tokens("'abc''DEF'"),
            [Token::String("abc'DEF".into())]
        );
        assert!(Lexer::new("'abc").next().unwrap().is_err());
    }

    #[test]
    fn scan_statement() {
        assert_eq!(
            tokens("SELECT id, \"name\" FROM users -- comment\nWHERE id >= ? AND score <> 2.5;"),
            [
                Token::Word("SELECT".into()),
                Token::Word("id".into()),
                Token::Symbol(","),
                Token::Quoted("name".into()),
                Token::Word("FROM".into()),
                Token::Word("users".into()),
                Token::Word("WHERE".into()),
                Token::Word("id".into()),
                Token::Symbol(">="),
                Token::Parameter,
                Token::Word("AND".into()),
                Token::Word("score".into()),
                Token::Symbol("<>"),
                Token::Float(2.5),
                Token::Symbol(";"),
            ]
        );
    }

    #[test]
    fn unexpected_character() {
        let error = Lexer::new("SELECT #").nth(1).unwrap().unwrap_err();
        assert_eq!(error.to_string(), "Unexpected character `#` at position 7");
    }
}
