use std::fmt;

use super::token::{Token, TokenKind};
use crate::expr::{BinOp, Expr};

/// Parse failure. No recovery is attempted; the offending lexeme is kept
/// for the message where one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input the lexer could not classify (`1 + abc`).
    UnknownToken(String),
    /// A token that cannot start an atom (`* 2`).
    UnexpectedToken(String),
    /// Ran out of input where an operand was required (`1 +`).
    UnexpectedEnd,
    /// A parenthesized sub-expression without its `)`.
    UnmatchedParen,
    /// Tokens left over after a complete expression (`1 2`).
    TrailingInput,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnknownToken(text) => write!(f, "unknown token '{}'", text),
            ParseError::UnexpectedToken(text) => write!(f, "unexpected token '{}'", text),
            ParseError::UnexpectedEnd => write!(f, "unexpected end of expression"),
            ParseError::UnmatchedParen => write!(f, "unmatched parentheses"),
            ParseError::TrailingInput => write!(f, "excess part of expression"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Recursive-descent parser over the grammar, lowest to highest
/// precedence:
///
/// ```text
/// expr   := term (('+'|'-') term)*
/// term   := factor (('*'|'/') factor)*
/// factor := ('+'|'-')? power
/// power  := atom ('^' unary)*
/// unary  := ('+'|'-')? atom
/// atom   := Number | '(' expr ')'
/// ```
///
/// `+ - * /` and `^` all fold left-associatively. A sign at the start of a
/// factor wraps the whole power chain (`-3^2` is `-(3^2)`); a sign after
/// `^` binds only its atom (`2^-3` is `2^(-3)`). Unary `±x` is
/// represented as `0 ± x`; there is no dedicated unary node.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        // The lexer always terminates the stream; enforce the same shape
        // for hand-built token vectors.
        if tokens.last().map(|t| t.kind) != Some(TokenKind::End) {
            tokens.push(Token::bare(TokenKind::End));
        }
        Parser { tokens, pos: 0 }
    }

    /// Parse the token sequence into an expression tree, consuming every
    /// token up to and including the final `End`.
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        let expr = self.expr()?;

        if !self.accept(TokenKind::End) {
            return Err(ParseError::TrailingInput);
        }

        Ok(expr)
    }

    fn current(&self) -> &Token {
        // `End` is never consumed, so `pos` cannot pass the final token.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.term()?;

        loop {
            if self.accept(TokenKind::Plus) {
                node = Expr::binary(BinOp::Add, node, self.term()?);
            } else if self.accept(TokenKind::Minus) {
                node = Expr::binary(BinOp::Sub, node, self.term()?);
            } else {
                return Ok(node);
            }
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.factor()?;

        loop {
            if self.accept(TokenKind::Star) {
                node = Expr::binary(BinOp::Mul, node, self.factor()?);
            } else if self.accept(TokenKind::Slash) {
                node = Expr::binary(BinOp::Div, node, self.factor()?);
            } else {
                return Ok(node);
            }
        }
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        if self.accept(TokenKind::Plus) {
            Ok(Expr::binary(BinOp::Add, Expr::number(0.0), self.power()?))
        } else if self.accept(TokenKind::Minus) {
            Ok(Expr::binary(BinOp::Sub, Expr::number(0.0), self.power()?))
        } else {
            self.power()
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.atom()?;

        while self.accept(TokenKind::Caret) {
            node = Expr::binary(BinOp::Pow, node, self.unary()?);
        }

        Ok(node)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.accept(TokenKind::Plus) {
            Ok(Expr::binary(BinOp::Add, Expr::number(0.0), self.atom()?))
        } else if self.accept(TokenKind::Minus) {
            Ok(Expr::binary(BinOp::Sub, Expr::number(0.0), self.atom()?))
        } else {
            self.atom()
        }
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        if self.check(TokenKind::Number) {
            // Lexemes are digit runs with at most one dot, all of which
            // f64 parsing accepts (a trailing dot included).
            let value: f64 = self
                .current()
                .text
                .parse()
                .map_err(|_| ParseError::UnknownToken(self.current().text.clone()))?;
            self.pos += 1;
            return Ok(Expr::number(value));
        }

        if self.accept(TokenKind::LParen) {
            let node = self.expr()?;

            if !self.accept(TokenKind::RParen) {
                return Err(ParseError::UnmatchedParen);
            }

            return Ok(node);
        }

        match self.current().kind {
            TokenKind::Unknown => Err(ParseError::UnknownToken(self.current().text.clone())),
            TokenKind::End => Err(ParseError::UnexpectedEnd),
            kind => Err(ParseError::UnexpectedToken(lexeme_for(kind).to_string())),
        }
    }
}

/// Source spelling of an operator kind, for error messages.
fn lexeme_for(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::Caret => "^",
        TokenKind::LParen => "(",
        TokenKind::RParen => ")",
        TokenKind::Number | TokenKind::Unknown | TokenKind::End => "",
    }
}
