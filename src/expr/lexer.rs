//! Lexer for the pointcut expression language

use logos::Logos;

use crate::common::error::{Error, Result};

/// Token types for pointcut expressions. Keywords (`call`, `within`, boolean
/// word aliases, modifier words) are ordinary words here; the parser decides
/// their role from the lexeme, so a package or class may reuse them freely.
#[derive(Logos, Debug, PartialEq, Clone)]
pub enum Token {
    #[token("&&")]
    AmpAmp,
    #[token("||")]
    PipePipe,
    #[token("!")]
    Bang,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("..")]
    DotDot,
    #[token(".")]
    Dot,
    #[token("@")]
    At,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    /// Identifier-shaped word, possibly containing `*` wildcards.
    #[regex(r"[A-Za-z0-9_$*]+")]
    Word,

    #[regex(r"[ \t\r\n]+")]
    Whitespace,
}

/// Lexical token with its source text and offset.
#[derive(Debug, Clone)]
pub struct LexicalToken {
    pub token: Token,
    pub lexeme: String,
    pub offset: usize,
}

impl LexicalToken {
    pub fn is(&self, token: &Token) -> bool {
        std::mem::discriminant(&self.token) == std::mem::discriminant(token)
    }
}

/// Tokenize an expression, dropping whitespace.
pub fn tokenize(source: &str) -> Result<Vec<LexicalToken>> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(Token::Whitespace) => {}
            Ok(token) => tokens.push(LexicalToken {
                token,
                lexeme: lexer.slice().to_string(),
                offset: span.start,
            }),
            Err(_) => {
                return Err(Error::expression(format!(
                    "invalid character '{}' at offset {} in expression '{}'",
                    &source[span.start..span.end.min(source.len())],
                    span.start,
                    source
                )))
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_expression() {
        let tokens = tokenize("call(void pkg.Target.foo()) && !within(test..*)").unwrap();
        assert!(tokens[0].is(&Token::Word));
        assert_eq!(tokens[0].lexeme, "call");
        assert!(tokens[1].is(&Token::LParen));
        let bang = tokens.iter().find(|t| t.is(&Token::Bang)).unwrap();
        assert_eq!(bang.lexeme, "!");
        let deep = tokens.iter().filter(|t| t.is(&Token::DotDot)).count();
        assert_eq!(deep, 1);
    }

    #[test]
    fn test_wildcard_words() {
        let tokens = tokenize("get* *Name* ..").unwrap();
        assert_eq!(tokens[0].lexeme, "get*");
        assert_eq!(tokens[1].lexeme, "*Name*");
        assert!(tokens[2].is(&Token::DotDot));
    }

    #[test]
    fn test_invalid_character_rejected() {
        assert!(tokenize("call(void pkg.T.foo()) # comment").is_err());
    }
}
