use std::borrow::Cow;

use tracing::trace;

use crate::{
    air::{Air, AirKind, AirStmt, Operand, OperandKind},
    error::{self, AsmError},
    lexer::{cursor::Cursor, is_id, LiteralKind, Token, TokenKind},
    span::{Idx, Span},
    symbol::{DirKind, InstrKind, Register, SymbolTable},
    word,
};

/// Replaces the escape sequences `\n`, `\t`, `\r`, `\\` and `\"`. Anything else after a
/// backslash is kept as written.
fn unescape(s: &str) -> Cow<str> {
    if !s.contains('\\') {
        return Cow::Borrowed(s);
    }
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some(c) => {
                    result.push('\\');
                    result.push(c);
                }
                // Trailing backslash; include it as is
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }
    Cow::Owned(result)
}

/// `xFOO` lexes as a hex literal but is a perfectly good label.
fn is_hex_shaped_label(text: &str) -> bool {
    text.starts_with(['x', 'X'])
        && text.chars().all(is_id)
        && text[1..].chars().any(|c| !c.is_ascii_hexdigit())
}

/// First pass of the assembler. Lays statements out from the origin and fills the symbol table,
/// leaving operands unresolved.
///
/// Input is lexed one line at a time, so nothing after `.END` is ever looked at.
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    cur: Cursor<'a>,
    at_eof: bool,
    /// Tracker for current line, 1-based
    line: usize,
    orig: Option<u16>,
    /// Location counter. Wider than an address so that running off the end of memory is
    /// reported instead of wrapping.
    lc: u32,
    stmts: Vec<AirStmt>,
    symbols: SymbolTable,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            src,
            cur: Cursor::new(src),
            at_eof: false,
            line: 0,
            orig: None,
            lc: 0,
            stmts: Vec::new(),
            symbols: SymbolTable::new(),
        }
    }

    fn text(&self, tok: Token) -> &'a str {
        &self.src[tok.span.as_range()]
    }

    /// Token kind with hex-shaped labels turned back into identifiers.
    fn kind(&self, tok: Token) -> TokenKind {
        match tok.kind {
            TokenKind::Lit(LiteralKind::Hex) if is_hex_shaped_label(self.text(tok)) => {
                TokenKind::Ident
            }
            kind => kind,
        }
    }

    fn eof_span(&self) -> Span {
        Span::new(Idx(self.src.len() as u32), 0)
    }

    /// Significant tokens of the next line. `None` once the input is exhausted.
    fn next_line(&mut self) -> Option<Vec<Token>> {
        if self.at_eof {
            return None;
        }
        self.line += 1;
        let mut toks = Vec::new();
        loop {
            let tok = self.cur.advance_token();
            match tok.kind {
                TokenKind::Whitespace | TokenKind::Comment => {}
                TokenKind::Newline => return Some(toks),
                TokenKind::Eof => {
                    self.at_eof = true;
                    return Some(toks);
                }
                _ => toks.push(tok),
            }
        }
    }

    /// Create AIR out of the source
    pub fn parse(mut self) -> Result<Air, AsmError> {
        while let Some(toks) = self.next_line() {
            if self.parse_line(&toks)? {
                break;
            }
        }
        let Some(orig) = self.orig else {
            return Err(error::syntax(
                "Missing .ORIG directive",
                Some("programs start with a line like `.ORIG x3000`"),
                self.line,
                self.eof_span(),
            ));
        };
        Ok(Air {
            orig,
            stmts: self.stmts,
            symbols: self.symbols,
        })
    }

    /// Handle one line. Returns true once `.END` is reached.
    fn parse_line(&mut self, toks: &[Token]) -> Result<bool, AsmError> {
        let mut rest = toks;

        // Prefix label, with an optional trailing colon
        let mut label = None;
        if let [first, tail @ ..] = rest {
            if self.kind(*first) == TokenKind::Ident {
                let text = self.text(*first);
                if text.parse::<InstrKind>().is_err() {
                    if text.parse::<Register>().is_ok() {
                        return Err(error::syntax(
                            format!("Register {text} cannot be used as a label"),
                            None,
                            self.line,
                            first.span,
                        ));
                    }
                    label = Some(*first);
                    rest = tail;
                    if let [colon, tail @ ..] = rest {
                        if colon.kind == TokenKind::Colon {
                            rest = tail;
                        }
                    }
                }
            }
        }

        let Some((&head, operands)) = rest.split_first() else {
            if let Some(label) = label {
                self.require_orig(label)?;
                self.define(label, self.lc)?;
            }
            return Ok(false);
        };

        match self.kind(head) {
            TokenKind::Ident => {
                let text = self.text(head);
                let Ok(kind) = text.parse::<InstrKind>() else {
                    return Err(error::syntax(
                        format!("Unknown instruction `{text}`"),
                        Some("a line is an optional label, then an instruction or directive"),
                        self.line,
                        head.span,
                    ));
                };
                self.require_orig(head)?;
                let operands = operands
                    .iter()
                    .map(|tok| self.operand(*tok))
                    .collect::<Result<Vec<_>, _>>()?;
                self.push(label, head, AirKind::Instr { kind, operands })?;
                Ok(false)
            }
            TokenKind::Direc => {
                let text = self.text(head);
                let Ok(dir) = text.parse::<DirKind>() else {
                    return Err(error::syntax(
                        format!("Unknown directive `{text}`"),
                        Some("directives are .ORIG, .FILL, .BLKW, .STRINGZ and .END"),
                        self.line,
                        head.span,
                    ));
                };
                if dir != DirKind::Orig {
                    self.require_orig(head)?;
                }
                self.parse_dir(dir, label, head, operands)
            }
            kind => Err(error::syntax(
                format!("Unexpected {kind}"),
                Some("lines should start with a label, instruction, or directive"),
                self.line,
                head.span,
            )),
        }
    }

    fn parse_dir(
        &mut self,
        dir: DirKind,
        label: Option<Token>,
        head: Token,
        operands: &[Token],
    ) -> Result<bool, AsmError> {
        match dir {
            DirKind::Orig => {
                if self.orig.is_some() {
                    return Err(error::syntax(
                        "Origin set twice",
                        Some("a program has exactly one .ORIG"),
                        self.line,
                        head.span,
                    ));
                }
                let tok = self.single(head, operands)?;
                let value = self.literal(tok)?;
                let orig = u16::try_from(value).map_err(|_| {
                    error::range_overflow(".ORIG", value.into(), (0, 0xFFFF), self.line, tok.span)
                })?;
                self.orig = Some(orig);
                self.lc = orig.into();
                if let Some(label) = label {
                    self.define(label, self.lc)?;
                }
            }
            DirKind::End => {
                if let Some(tok) = operands.first() {
                    return Err(self.unexpected(*tok));
                }
                if let Some(label) = label {
                    self.define(label, self.lc)?;
                }
                return Ok(true);
            }
            DirKind::Fill => {
                let tok = self.single(head, operands)?;
                let op = self.operand(tok)?;
                if let OperandKind::Reg(_) = op.kind {
                    return Err(error::syntax(
                        ".FILL expects a literal or a label",
                        None,
                        self.line,
                        tok.span,
                    ));
                }
                self.push(label, head, AirKind::Fill(op))?;
            }
            DirKind::Blkw => {
                let tok = self.single(head, operands)?;
                if !matches!(tok.kind, TokenKind::Lit(LiteralKind::Hex | LiteralKind::Dec))
                    || self.kind(tok) == TokenKind::Ident
                {
                    return Err(error::syntax(
                        ".BLKW expects a numeric literal",
                        None,
                        self.line,
                        tok.span,
                    ));
                }
                let value = self.literal(tok)?;
                let count = u16::try_from(value).map_err(|_| {
                    error::range_overflow(".BLKW", value.into(), (0, 0xFFFF), self.line, tok.span)
                })?;
                self.push(label, head, AirKind::Blkw(count))?;
            }
            DirKind::Stringz => {
                let tok = self.single(head, operands)?;
                let chars = self.string(tok)?;
                self.push(label, head, AirKind::Stringz(chars))?;
            }
        }
        Ok(false)
    }

    fn require_orig(&self, tok: Token) -> Result<(), AsmError> {
        if self.orig.is_none() {
            return Err(error::syntax(
                "Expected .ORIG before the first statement",
                Some("only comments and blank lines may come before .ORIG"),
                self.line,
                tok.span,
            ));
        }
        Ok(())
    }

    fn unexpected(&self, tok: Token) -> AsmError {
        error::syntax(
            format!("Unexpected {}", tok.kind),
            Some("check the number of operands for this directive"),
            self.line,
            tok.span,
        )
    }

    /// The one and only operand of a directive.
    fn single(&self, head: Token, operands: &[Token]) -> Result<Token, AsmError> {
        match operands {
            [tok] => Ok(*tok),
            [] => Err(error::syntax(
                format!("Expected an operand after {}", self.text(head)),
                None,
                self.line,
                head.span,
            )),
            [_, extra, ..] => Err(self.unexpected(*extra)),
        }
    }

    fn define(&mut self, label: Token, addr: u32) -> Result<(), AsmError> {
        let name = self.text(label);
        let addr = u16::try_from(addr).map_err(|_| {
            error::range_overflow("address", addr.into(), (0, 0xFFFF), self.line, label.span)
        })?;
        self.symbols
            .insert(name, addr)
            .map_err(|first| error::duplicate_symbol(name, first, self.line, label.span))?;
        trace!(label = name, addr = %word::to_hex(addr), "define symbol");
        Ok(())
    }

    /// Lay out a statement at the location counter and advance past it.
    fn push(&mut self, label: Option<Token>, head: Token, kind: AirKind) -> Result<(), AsmError> {
        if let Some(label) = label {
            self.define(label, self.lc)?;
        }
        let addr = u16::try_from(self.lc).map_err(|_| {
            error::range_overflow("address", self.lc.into(), (0, 0xFFFF), self.line, head.span)
        })?;
        let stmt = AirStmt {
            line: self.line,
            addr,
            span: head.span,
            kind,
        };
        let end = self.lc + stmt.size();
        if end > 0x10000 {
            return Err(error::range_overflow(
                "address",
                i64::from(end) - 1,
                (0, 0xFFFF),
                self.line,
                head.span,
            ));
        }
        self.lc = end;
        self.stmts.push(stmt);
        Ok(())
    }

    fn operand(&self, tok: Token) -> Result<Operand, AsmError> {
        let kind = match self.kind(tok) {
            TokenKind::Ident => {
                let text = self.text(tok);
                match text.parse::<Register>() {
                    Ok(reg) => OperandKind::Reg(reg),
                    Err(()) => OperandKind::Symbol(text.to_string()),
                }
            }
            TokenKind::Lit(LiteralKind::Hex | LiteralKind::Dec) => {
                OperandKind::Imm(self.literal(tok)?)
            }
            TokenKind::Lit(LiteralKind::Str { .. }) => {
                return Err(error::syntax(
                    "String literals are only allowed after .STRINGZ",
                    None,
                    self.line,
                    tok.span,
                ))
            }
            _ => {
                return Err(error::syntax(
                    format!("Unexpected {}", tok.kind),
                    Some("operands are registers, literals, or labels"),
                    self.line,
                    tok.span,
                ))
            }
        };
        Ok(Operand {
            kind,
            span: tok.span,
        })
    }

    /// Value of a hex or decimal literal, sign included.
    fn literal(&self, tok: Token) -> Result<i32, AsmError> {
        let text = self.text(tok);
        let (body, radix) = match tok.kind {
            TokenKind::Lit(LiteralKind::Hex) => {
                let body = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .or_else(|| text.strip_prefix(['x', 'X']))
                    .unwrap_or(text);
                (body, 16)
            }
            TokenKind::Lit(LiteralKind::Dec) => (text.strip_prefix('#').unwrap_or(text), 10),
            _ => {
                return Err(error::syntax(
                    format!("Expected a numeric literal, found {}", tok.kind),
                    None,
                    self.line,
                    tok.span,
                ))
            }
        };
        let (negative, digits) = match body.strip_prefix('-') {
            Some(digits) => (true, digits),
            None => (false, body.strip_prefix('+').unwrap_or(body)),
        };
        let magnitude = word::parse_digits(digits, radix).map_err(|err| {
            error::syntax(
                format!("Invalid literal `{text}`: {err}"),
                Some("literals are written like #10, 10, x1F or 0x1F"),
                self.line,
                tok.span,
            )
        })?;
        let value = if negative { -magnitude } else { magnitude };
        i32::try_from(value).map_err(|_| {
            error::range_overflow(
                "literal",
                value,
                (i32::MIN.into(), i32::MAX.into()),
                self.line,
                tok.span,
            )
        })
    }

    /// Characters of a `.STRINGZ` operand, escapes applied.
    fn string(&self, tok: Token) -> Result<Vec<u16>, AsmError> {
        let TokenKind::Lit(LiteralKind::Str { terminated }) = tok.kind else {
            return Err(error::syntax(
                format!(".STRINGZ expects a string literal, found {}", tok.kind),
                None,
                self.line,
                tok.span,
            ));
        };
        if !terminated {
            return Err(error::syntax(
                "Unterminated string literal",
                Some("close the string with `\"` on the same line"),
                self.line,
                tok.span,
            ));
        }
        let Some(body) = self
            .text(tok)
            .strip_prefix('"')
            .and_then(|text| text.strip_suffix('"'))
        else {
            return Err(error::syntax("Malformed string literal", None, self.line, tok.span));
        };
        unescape(body)
            .chars()
            .map(|c| {
                u16::try_from(u32::from(c)).map_err(|_| {
                    error::range_overflow(
                        ".STRINGZ character",
                        u32::from(c).into(),
                        (0, 0xFFFF),
                        self.line,
                        tok.span,
                    )
                })
            })
            .collect()
    }
}
