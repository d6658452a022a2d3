use super::token::{Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.current() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Maximal digit run, optionally followed by `.` and another (possibly
    /// empty) digit run. `12.` lexes as one number token.
    fn read_number(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.current(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.current() == Some(b'.') {
            self.pos += 1;
            while matches!(self.current(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        Token::new(TokenKind::Number, &self.input[start..self.pos])
    }

    /// Maximal alphanumeric run. The language has no identifiers, so the
    /// whole word is surfaced as `Unknown` and rejected by the parser.
    fn read_word(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.current(), Some(b) if b.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        Token::new(TokenKind::Unknown, &self.input[start..self.pos])
    }

    /// Tokenize the whole input. The returned sequence always ends in
    /// exactly one `End` token; malformed input becomes `Unknown` tokens
    /// rather than an error here.
    pub fn lex(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            let b = match self.current() {
                Some(b) => b,
                None => {
                    tokens.push(Token::bare(TokenKind::End));
                    return tokens;
                }
            };

            if b.is_ascii_digit() {
                tokens.push(self.read_number());
                continue;
            }
            if b.is_ascii_alphabetic() {
                tokens.push(self.read_word());
                continue;
            }

            let kind = match b {
                b'+' => Some(TokenKind::Plus),
                b'-' => Some(TokenKind::Minus),
                b'*' => Some(TokenKind::Star),
                b'/' => Some(TokenKind::Slash),
                b'^' => Some(TokenKind::Caret),
                b'(' => Some(TokenKind::LParen),
                b')' => Some(TokenKind::RParen),
                _ => None,
            };

            match kind {
                Some(kind) => {
                    self.pos += 1;
                    tokens.push(Token::bare(kind));
                }
                None => {
                    // Any other byte: emit the full character as Unknown so
                    // the parser can report it verbatim.
                    let ch = self.input[self.pos..]
                        .chars()
                        .next()
                        .unwrap_or(b as char);
                    self.pos += ch.len_utf8();
                    tokens.push(Token::new(TokenKind::Unknown, ch.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input).lex().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lex_operators() {
        assert_eq!(
            kinds("+ - * / ^ ( )"),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Caret,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_lex_numbers() {
        let tokens = Lexer::new("12 3.5 12. 0.25").lex();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["12", "3.5", "12.", "0.25", ""]);
        assert!(tokens[..4].iter().all(|t| t.kind == TokenKind::Number));
    }

    #[test]
    fn test_lex_words_are_unknown() {
        let tokens = Lexer::new("abc1").lex();
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
        assert_eq!(tokens[0].text, "abc1");
    }

    #[test]
    fn test_lex_stray_byte_is_unknown() {
        let tokens = Lexer::new("1 # 2").lex();
        assert_eq!(tokens[1].kind, TokenKind::Unknown);
        assert_eq!(tokens[1].text, "#");
    }

    #[test]
    fn test_lex_empty_input() {
        assert_eq!(kinds(""), vec![TokenKind::End]);
        assert_eq!(kinds("   "), vec![TokenKind::End]);
    }

    #[test]
    fn test_lex_ends_in_exactly_one_end() {
        for input in ["", "1", "1 + 2", "((("] {
            let tokens = Lexer::new(input).lex();
            let ends = tokens
                .iter()
                .filter(|t| t.kind == TokenKind::End)
                .count();
            assert_eq!(ends, 1);
            assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::End));
        }
    }
}
