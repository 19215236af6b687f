use crate::lexer::cursor::Cursor;
use crate::span::{Idx, Span};

pub mod cursor;

/// A 'light' token that only carries its kind and where it sits in the source. Values are read
/// back out of the source by the parser.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LiteralKind {
    /// `x1F`, `x-1`, `0x1F`
    Hex,
    /// `#12`, `#-12`, `12`
    Dec,
    Str { terminated: bool },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Label, mnemonic, register or symbol reference
    Ident,
    Lit(LiteralKind),
    Comment,
    Direc,
    /// Optional label terminator
    Colon,
    /// Ends an assembly line
    Newline,
    /// Also includes commas
    Whitespace,
    Unknown,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Ident => "identifier",
            TokenKind::Lit(LiteralKind::Hex) => "hex literal",
            TokenKind::Lit(LiteralKind::Dec) => "decimal literal",
            TokenKind::Lit(LiteralKind::Str { .. }) => "string literal",
            TokenKind::Comment => "comment",
            TokenKind::Direc => "directive",
            TokenKind::Colon => "colon",
            TokenKind::Newline => "end of line",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Unknown => "unknown token",
            TokenKind::Eof => "end of file",
        };
        f.write_str(name)
    }
}

/// Lazily tokenize the whole input. Mostly useful for debugging and tests; the parser drives
/// [`Cursor::advance_token`] itself so that nothing past `.END` is lexed.
pub fn tokenize(input: &str) -> impl Iterator<Item = Token> + '_ {
    let mut cursor = Cursor::new(input);
    std::iter::from_fn(move || {
        let token = cursor.advance_token();
        if token.kind != TokenKind::Eof {
            Some(token)
        } else {
            None
        }
    })
}

/// Test if a character separates tokens on the same line.
pub(crate) fn is_whitespace(c: char) -> bool {
    // Commas are essentially whitespace in LC3
    matches!(c, ' ' | '\t' | '\r' | ',')
}

/// Test if a character is considered an LC3 identifier character.
pub(crate) fn is_id(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
}

impl Cursor<'_> {
    pub fn advance_token(&mut self) -> Token {
        let start = self.token_start();
        let first_char = match self.bump() {
            Some(c) => c,
            None => return Token::new(TokenKind::Eof, Span::new(Idx(start as u32), 0)),
        };
        let token_kind = match first_char {
            ';' => {
                self.take_while(|c| c != '\n');
                TokenKind::Comment
            }
            '\n' => TokenKind::Newline,
            c if is_whitespace(c) => {
                self.take_while(is_whitespace);
                TokenKind::Whitespace
            }
            ':' => TokenKind::Colon,
            // Hex literals, unless the `x` starts a plain identifier like `xor_mask`
            'x' | 'X' if self.first().is_ascii_hexdigit() || self.first() == '-' => {
                if self.first() == '-' {
                    self.bump();
                }
                self.take_while(is_id);
                TokenKind::Lit(LiteralKind::Hex)
            }
            '0' if matches!(self.first(), 'x' | 'X') => {
                self.bump();
                self.take_while(is_id);
                TokenKind::Lit(LiteralKind::Hex)
            }
            // Bare decimal literal
            c if c.is_ascii_digit() => {
                self.take_while(is_id);
                TokenKind::Lit(LiteralKind::Dec)
            }
            // Identifiers should be checked after everything else that overlaps.
            c if is_id(c) => {
                self.take_while(is_id);
                TokenKind::Ident
            }
            // Decimal literal
            '#' => {
                if matches!(self.first(), '-' | '+') {
                    self.bump();
                }
                self.take_while(is_id);
                TokenKind::Lit(LiteralKind::Dec)
            }
            // Directive
            '.' => {
                self.take_while(is_id);
                TokenKind::Direc
            }
            // String literal, stops at the end of the line if unterminated
            '"' => {
                let mut terminated = false;
                while let Some(c) = self.bump() {
                    match c {
                        '"' => {
                            terminated = true;
                            break;
                        }
                        '\\' if !matches!(self.first(), '\n') => {
                            self.bump();
                        }
                        _ => {}
                    }
                    if self.first() == '\n' {
                        break;
                    }
                }
                TokenKind::Lit(LiteralKind::Str { terminated })
            }
            _ => TokenKind::Unknown,
        };
        let len = self.pos_in_token();
        self.reset_pos();
        Token::new(token_kind, Span::new(Idx(start as u32), len))
    }
}
