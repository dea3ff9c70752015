use miette::Result;

use crate::error::*;
use crate::lexer::{LiteralKind, Token, TokenKind, TokenStream};
use crate::ops::{AddrMode, Indexed, Mnemonic, OffsetReg, OpClass, PostOp};
use crate::program::{DebugRecord, OutputKind, Program};
use crate::symbol::{LabelTable, Register};

/// Options for one assembly run.
#[derive(Clone, Copy, Debug)]
pub struct AsmOptions {
    /// Base load address of the image.
    pub origin: u16,
    pub output: OutputKind,
    /// Emit a debug record per encoded instruction.
    pub debug_info: bool,
    pub dual_monitor: bool,
}

impl Default for AsmOptions {
    fn default() -> Self {
        AsmOptions {
            origin: 0x1000,
            output: OutputKind::Executable,
            debug_info: false,
            dual_monitor: false,
        }
    }
}

/// Successful output of [`assemble`]: the image plus the resolved labels.
#[derive(Debug)]
pub struct Assembly {
    pub program: Program,
    pub labels: LabelTable,
    pub output: OutputKind,
}

/// Assemble B33 source into a program image.
///
/// Two passes over the same token stream: the first records label addresses
/// by walking instruction sizes, the second validates operands and emits
/// bytes. Any violation aborts with a diagnostic naming the 1-based source
/// line; no partial image is returned.
pub fn assemble(src: &str, opts: AsmOptions) -> Result<Assembly> {
    Assembler::new(src, opts).run()
}

/// One logical source line: optional label, optional instruction, operands.
struct Line {
    label: Option<Token>,
    instr: Option<(Mnemonic, Token)>,
    operands: Vec<Token>,
    /// 1-based source line number.
    number: u32,
}

struct Assembler<'a> {
    src: &'a str,
    opts: AsmOptions,
    labels: LabelTable,
    out: Vec<u8>,
    debug: Vec<DebugRecord>,
    exec_addr: Option<u16>,
}

impl<'a> Assembler<'a> {
    fn new(src: &'a str, opts: AsmOptions) -> Self {
        Assembler {
            src,
            opts,
            labels: LabelTable::new(),
            out: Vec::new(),
            debug: Vec::new(),
            exec_addr: None,
        }
    }

    fn run(mut self) -> Result<Assembly> {
        self.scan_labels()?;
        self.encode()?;

        let program = Program {
            origin: self.opts.origin,
            exec_addr: self.exec_addr.unwrap_or(self.opts.origin),
            dual_monitor: self.opts.dual_monitor,
            code: self.out,
            debug_records: self.debug,
        };
        Ok(Assembly {
            program,
            labels: self.labels,
            output: self.opts.output,
        })
    }

    fn slice(&self, tok: Token) -> &'a str {
        &self.src[tok.span.as_range()]
    }

    /// Gather the next logical line from the stream, skipping blanks and
    /// comments. Both passes walk lines through this single reader so their
    /// views of the source are identical by construction.
    fn next_line(&self, stream: &mut TokenStream<'a>, line_no: &mut u32) -> Option<Line> {
        loop {
            let tok = stream.next();
            match tok.kind {
                TokenKind::Whitespace | TokenKind::Comment => continue,
                TokenKind::Newline => {
                    *line_no += 1;
                    continue;
                }
                TokenKind::Eof => return None,
                _ => {
                    let number = *line_no;
                    let mut label = None;
                    let mut instr = None;
                    let mut operands = Vec::new();
                    let mut cur = tok;
                    loop {
                        match cur.kind {
                            TokenKind::Ident
                                if label.is_none() && instr.is_none() && operands.is_empty() =>
                            {
                                label = Some(cur)
                            }
                            TokenKind::Instr(m) if instr.is_none() && operands.is_empty() => {
                                instr = Some((m, cur))
                            }
                            TokenKind::Whitespace | TokenKind::Comment => {}
                            TokenKind::Newline => {
                                *line_no += 1;
                                break;
                            }
                            TokenKind::Eof => break,
                            _ => operands.push(cur),
                        }
                        cur = stream.next();
                    }
                    return Some(Line {
                        label,
                        instr,
                        operands,
                        number,
                    });
                }
            }
        }
    }

    // Pass 1: record label addresses. Operands are not validated here, only
    // measured, so forward references resolve before pass 2 needs them.
    fn scan_labels(&mut self) -> Result<()> {
        let mut stream = TokenStream::new(self.src);
        let mut line_no = 1u32;
        let mut addr = self.opts.origin;

        while let Some(line) = self.next_line(&mut stream, &mut line_no) {
            if let Some(label) = line.label {
                if !self.labels.insert(self.slice(label), addr) {
                    return Err(asm_duplicate_label(label.span, line.number, self.src));
                }
            }
            if let Some((mnemonic, _)) = line.instr {
                addr = addr.wrapping_add(self.line_size(mnemonic, &line.operands));
            }
        }
        Ok(())
    }

    /// Encoded size of an instruction line, including the opcode byte.
    /// Tolerant of malformed operands: pass 2 reports those, and once it
    /// does, no address computed after the bad line is ever observable.
    fn line_size(&self, mnemonic: Mnemonic, ops: &[Token]) -> u16 {
        let imm = ops.first().is_some_and(|tok| tok.kind == TokenKind::Hash);
        match mnemonic.class() {
            OpClass::Load(reg) => {
                if imm {
                    1 + reg.imm_width()
                } else {
                    3
                }
            }
            OpClass::Store(_) | OpClass::Jump | OpClass::Call | OpClass::Tfr | OpClass::MulDiv => 3,
            OpClass::Compare(reg) | OpClass::Alu(reg) => {
                if imm {
                    1 + reg.imm_width()
                } else if self.single_register(ops).is_some() {
                    2
                } else {
                    3
                }
            }
            OpClass::Inherent | OpClass::DirEnd | OpClass::DirChr => 1,
            OpClass::PushPop | OpClass::Shift => 2,
            OpClass::DirStr => ops
                .first()
                .map(|tok| self.str_content(*tok).len() as u16)
                .unwrap_or(0),
            OpClass::DirRmb => ops
                .first()
                .and_then(|tok| self.literal_value(*tok).ok())
                .unwrap_or(0) as u16,
        }
    }

    /// The single bare-register operand of a register-form instruction.
    fn single_register(&self, ops: &[Token]) -> Option<Register> {
        match ops {
            [tok] if tok.kind == TokenKind::Ident => self.slice(*tok).parse().ok(),
            _ => None,
        }
    }

    /// String literal bytes, quotes stripped.
    fn str_content(&self, tok: Token) -> &'a str {
        let text = self.slice(tok);
        match tok.kind {
            TokenKind::Lit(LiteralKind::Str { terminated: true }) => &text[1..text.len() - 1],
            TokenKind::Lit(LiteralKind::Str { terminated: false }) => &text[1..],
            _ => "",
        }
    }

    /// Raw numeric value of a literal token in any base.
    fn literal_value(&self, tok: Token) -> Result<u32, ()> {
        let text = self.slice(tok);
        match tok.kind {
            TokenKind::Lit(LiteralKind::Dec) => text.parse().map_err(|_| ()),
            TokenKind::Lit(LiteralKind::Hex) => {
                u32::from_str_radix(&text[1..], 16).map_err(|_| ())
            }
            TokenKind::Lit(LiteralKind::Bin) => u32::from_str_radix(&text[1..], 2).map_err(|_| ()),
            _ => Err(()),
        }
    }

    // Pass 2: re-walk the stream, validate and emit.
    fn encode(&mut self) -> Result<()> {
        let mut stream = TokenStream::new(self.src);
        let mut line_no = 1u32;

        while let Some(line) = self.next_line(&mut stream, &mut line_no) {
            let Some((mnemonic, itok)) = line.instr else {
                if let Some(stray) = line.operands.first() {
                    return Err(asm_unexpected_token(
                        stray.span,
                        line.number,
                        "an instruction",
                        &stray.kind.to_string(),
                        self.src,
                    ));
                }
                continue;
            };
            let record_addr = self.addr();
            self.encode_line(mnemonic, itok, &line)?;
            if self.opts.debug_info && self.addr() != record_addr {
                let end = line
                    .operands
                    .last()
                    .map(|tok| tok.span.end())
                    .unwrap_or(itok.span.end());
                self.debug.push(DebugRecord {
                    address: record_addr,
                    source_line: self.src[itok.span.offs()..end].trim_end().to_string(),
                });
            }
        }
        Ok(())
    }

    fn addr(&self) -> u16 {
        self.opts.origin.wrapping_add(self.out.len() as u16)
    }

    fn emit_op(&mut self, mnemonic: Mnemonic, itok: Token, line: u32, mode: AddrMode) -> Result<u8> {
        match mnemonic.opcode(mode) {
            Some(code) => {
                self.out.push(code);
                Ok(code)
            }
            None => {
                let mode = match mode {
                    AddrMode::Imm => "immediate",
                    AddrMode::Ext => "extended",
                    AddrMode::Idx => "indexed",
                    AddrMode::Reg => "register",
                };
                Err(asm_mode_unsupported(
                    itok.span,
                    line,
                    &mnemonic.to_string(),
                    mode,
                    self.src,
                ))
            }
        }
    }

    fn encode_line(&mut self, mnemonic: Mnemonic, itok: Token, line: &Line) -> Result<()> {
        let ops = line.operands.as_slice();
        let n = line.number;
        match mnemonic.class() {
            OpClass::Load(reg) => self.encode_rmw(mnemonic, itok, line, reg, false),
            OpClass::Store(_) => self.encode_rmw(mnemonic, itok, line, Register::A, true),
            OpClass::Compare(reg) | OpClass::Alu(reg) => {
                if let Some(other) = self.single_register(ops) {
                    let needs_wide = matches!(mnemonic.class(), OpClass::Compare(r) if r.is_wide());
                    if other.is_wide() != needs_wide {
                        return Err(asm_width_mismatch(ops[0].span, n, self.src));
                    }
                    self.emit_op(mnemonic, itok, n, AddrMode::Reg)?;
                    self.out.push(other.selector());
                    Ok(())
                } else {
                    self.encode_rmw(mnemonic, itok, line, reg, false)
                }
            }
            OpClass::Jump | OpClass::Call => {
                self.emit_op(mnemonic, itok, n, AddrMode::Ext)?;
                let target = self.expect_address(itok, ops, n)?;
                self.out.extend_from_slice(&target.to_le_bytes());
                self.expect_consumed(&ops[1..], n)
            }
            OpClass::Inherent => {
                let code = match mnemonic {
                    Mnemonic::Ret => crate::ops::op::RET,
                    Mnemonic::Hlt => crate::ops::op::HLT,
                    Mnemonic::Brk => crate::ops::op::BRK,
                    Mnemonic::Nop => crate::ops::op::NOP,
                    _ => unreachable!(),
                };
                self.out.push(code);
                self.expect_consumed(ops, n)
            }
            OpClass::PushPop => {
                let code = if mnemonic == Mnemonic::Push {
                    crate::ops::op::PUSH
                } else {
                    crate::ops::op::POP
                };
                let mask = self.expect_register_list(itok, ops, n)?;
                self.out.push(code);
                self.out.push(mask);
                Ok(())
            }
            OpClass::Tfr => {
                let (first, second) = self.expect_register_pair(itok, ops, n)?;
                if first.is_wide() != second.is_wide() {
                    return Err(asm_width_mismatch(ops[0].span, n, self.src));
                }
                self.out.push(crate::ops::op::TFR);
                self.out.push(first.selector());
                self.out.push(second.selector());
                Ok(())
            }
            OpClass::MulDiv => {
                let (dst, src) = self.expect_register_pair(itok, ops, n)?;
                let code = if mnemonic == Mnemonic::Mul {
                    crate::ops::op::MUL
                } else {
                    crate::ops::op::DIV
                };
                self.out.push(code);
                self.out.push(dst.selector());
                self.out.push(src.selector());
                Ok(())
            }
            OpClass::Shift => {
                let code = if mnemonic == Mnemonic::Shl {
                    crate::ops::op::SHL
                } else {
                    crate::ops::op::SHR
                };
                let reg = match self.single_register(ops) {
                    Some(reg) => reg,
                    None => {
                        let tok = self.op_or_eol(itok, ops, 0, n, "a register")?;
                        return Err(asm_invalid_register(tok.span, n, self.src));
                    }
                };
                self.out.push(code);
                self.out.push(reg.selector());
                Ok(())
            }
            OpClass::DirStr => {
                let tok = self.op_or_eol(itok, ops, 0, n, "a string literal")?;
                match tok.kind {
                    TokenKind::Lit(LiteralKind::Str { terminated: true }) => {
                        let bytes = self.str_content(tok).as_bytes().to_vec();
                        self.out.extend_from_slice(&bytes);
                        self.expect_consumed(&ops[1..], n)
                    }
                    TokenKind::Lit(LiteralKind::Str { terminated: false }) => {
                        Err(asm_unterminated_string(tok.span, n, self.src))
                    }
                    other => Err(asm_unexpected_token(
                        tok.span,
                        n,
                        "a string literal",
                        &other.to_string(),
                        self.src,
                    )),
                }
            }
            OpClass::DirChr => {
                let hash = self.op_or_eol(itok, ops, 0, n, "`#`")?;
                if hash.kind != TokenKind::Hash {
                    return Err(asm_unexpected_token(
                        hash.span,
                        n,
                        "`#`",
                        &hash.kind.to_string(),
                        self.src,
                    ));
                }
                let val = self.expect_literal(itok, ops, 1, n, 8)?;
                self.out.push(val as u8);
                self.expect_consumed(&ops[2..], n)
            }
            OpClass::DirRmb => {
                let count = self.expect_literal(itok, ops, 0, n, 16)?;
                self.out.extend(std::iter::repeat(0u8).take(count as usize));
                self.expect_consumed(&ops[1..], n)
            }
            OpClass::DirEnd => {
                let tok = self.op_or_eol(itok, ops, 0, n, "a label")?;
                if tok.kind != TokenKind::Ident {
                    return Err(asm_unexpected_token(
                        tok.span,
                        n,
                        "a label",
                        &tok.kind.to_string(),
                        self.src,
                    ));
                }
                let name = self.slice(tok);
                let addr = self
                    .labels
                    .get(name)
                    .ok_or_else(|| asm_undefined_label(tok.span, n, name, self.src))?;
                self.exec_addr = Some(addr);
                self.out.push(crate::ops::op::HLT);
                self.expect_consumed(&ops[1..], n)
            }
        }
    }

    /// Encode a load/store/compare/ALU memory form: immediate (`#lit`),
    /// extended (literal or label), or indexed (`[A|B],X|Y|D[+|++|-|--]`).
    fn encode_rmw(
        &mut self,
        mnemonic: Mnemonic,
        itok: Token,
        line: &Line,
        reg: Register,
        is_store: bool,
    ) -> Result<()> {
        let ops = line.operands.as_slice();
        let n = line.number;
        let first = self.op_or_eol(itok, ops, 0, n, "an operand")?;
        match first.kind {
            TokenKind::Hash => {
                if is_store {
                    return Err(asm_mode_unsupported(
                        itok.span,
                        n,
                        &mnemonic.to_string(),
                        "immediate",
                        self.src,
                    ));
                }
                let bits = if reg.is_wide() { 16 } else { 8 };
                let val = self.expect_literal(itok, ops, 1, n, bits)?;
                self.emit_op(mnemonic, itok, n, AddrMode::Imm)?;
                if reg.is_wide() {
                    self.out.extend_from_slice(&(val as u16).to_le_bytes());
                } else {
                    self.out.push(val as u8);
                }
                self.expect_consumed(&ops[2..], n)
            }
            TokenKind::Comma => {
                let idx = self.expect_indexed(itok, ops, 0, n, OffsetReg::None)?;
                self.emit_op(mnemonic, itok, n, AddrMode::Idx)?;
                self.out.extend_from_slice(&idx.encode());
                Ok(())
            }
            TokenKind::Ident => {
                // One token of lookahead separates `B,X` from a bare label.
                if ops.get(1).is_some_and(|tok| tok.kind == TokenKind::Comma) {
                    let offset = match self.slice(first).parse::<Register>() {
                        Ok(Register::A) => OffsetReg::A,
                        Ok(Register::B) => OffsetReg::B,
                        Ok(_) => return Err(asm_width_mismatch(first.span, n, self.src)),
                        Err(_) => return Err(asm_invalid_register(first.span, n, self.src)),
                    };
                    let idx = self.expect_indexed(itok, &ops[1..], 0, n, offset)?;
                    self.emit_op(mnemonic, itok, n, AddrMode::Idx)?;
                    self.out.extend_from_slice(&idx.encode());
                    Ok(())
                } else {
                    self.emit_op(mnemonic, itok, n, AddrMode::Ext)?;
                    let addr = self.expect_address(itok, ops, n)?;
                    self.out.extend_from_slice(&addr.to_le_bytes());
                    self.expect_consumed(&ops[1..], n)
                }
            }
            TokenKind::Lit(_) => {
                self.emit_op(mnemonic, itok, n, AddrMode::Ext)?;
                let addr = self.expect_address(itok, ops, n)?;
                self.out.extend_from_slice(&addr.to_le_bytes());
                self.expect_consumed(&ops[1..], n)
            }
            other => Err(asm_unexpected_token(
                first.span,
                n,
                "an operand",
                &other.to_string(),
                self.src,
            )),
        }
    }

    /// Parse `,INDEX[+|++|-|--]` starting at the comma in `ops[at]`.
    fn expect_indexed(
        &self,
        itok: Token,
        ops: &[Token],
        at: usize,
        line: u32,
        offset: OffsetReg,
    ) -> Result<Indexed> {
        let reg_tok = self.op_or_eol(itok, ops, at + 1, line, "an index register")?;
        if reg_tok.kind != TokenKind::Ident {
            return Err(asm_unexpected_token(
                reg_tok.span,
                line,
                "an index register",
                &reg_tok.kind.to_string(),
                self.src,
            ));
        }
        let index = self
            .slice(reg_tok)
            .parse::<Register>()
            .map_err(|_| asm_invalid_register(reg_tok.span, line, self.src))?;
        if !index.is_wide() {
            return Err(asm_width_mismatch(reg_tok.span, line, self.src));
        }

        let rest = &ops[at + 2..];
        let post = match rest {
            [] => PostOp::None,
            [a] if a.kind == TokenKind::Plus => PostOp::Inc,
            [a, b] if a.kind == TokenKind::Plus && b.kind == TokenKind::Plus => PostOp::IncInc,
            [a] if a.kind == TokenKind::Minus => PostOp::Dec,
            [a, b] if a.kind == TokenKind::Minus && b.kind == TokenKind::Minus => PostOp::DecDec,
            [stray, ..] => {
                return Err(asm_unexpected_token(
                    stray.span,
                    line,
                    "`+`, `++`, `-` or `--`",
                    &stray.kind.to_string(),
                    self.src,
                ))
            }
        };
        Ok(Indexed {
            offset,
            index,
            post,
        })
    }

    /// A 16-bit address operand: numeric literal or label reference.
    fn expect_address(&self, itok: Token, ops: &[Token], line: u32) -> Result<u16> {
        let tok = self.op_or_eol(itok, ops, 0, line, "an address or label")?;
        match tok.kind {
            TokenKind::Lit(LiteralKind::Dec | LiteralKind::Hex | LiteralKind::Bin) => {
                let val = self
                    .literal_value(tok)
                    .map_err(|_| asm_bad_literal(tok.span, line, self.src))?;
                if val > u16::MAX as u32 {
                    return Err(asm_literal_range(tok.span, line, val, 16, self.src));
                }
                Ok(val as u16)
            }
            TokenKind::Ident => {
                let name = self.slice(tok);
                self.labels
                    .get(name)
                    .ok_or_else(|| asm_undefined_label(tok.span, line, name, self.src))
            }
            other => Err(asm_unexpected_token(
                tok.span,
                line,
                "an address or label",
                &other.to_string(),
                self.src,
            )),
        }
    }

    /// A range-checked numeric literal at `ops[at]`.
    fn expect_literal(
        &self,
        itok: Token,
        ops: &[Token],
        at: usize,
        line: u32,
        bits: u8,
    ) -> Result<u32> {
        let tok = self.op_or_eol(itok, ops, at, line, "a numeric literal")?;
        if !matches!(
            tok.kind,
            TokenKind::Lit(LiteralKind::Dec | LiteralKind::Hex | LiteralKind::Bin)
        ) {
            return Err(asm_unexpected_token(
                tok.span,
                line,
                "a numeric literal",
                &tok.kind.to_string(),
                self.src,
            ));
        }
        let val = self
            .literal_value(tok)
            .map_err(|_| asm_bad_literal(tok.span, line, self.src))?;
        if val >= 1u32 << bits {
            return Err(asm_literal_range(tok.span, line, val, bits, self.src));
        }
        Ok(val)
    }

    /// A comma-separated register list, OR'd into a selector mask.
    fn expect_register_list(&self, itok: Token, ops: &[Token], line: u32) -> Result<u8> {
        let mut mask = 0u8;
        let mut want_reg = true;
        let mut i = 0;
        loop {
            match (want_reg, ops.get(i)) {
                (true, Some(tok)) if tok.kind == TokenKind::Ident => {
                    let reg = self
                        .slice(*tok)
                        .parse::<Register>()
                        .map_err(|_| asm_invalid_register(tok.span, line, self.src))?;
                    mask |= reg.selector();
                    want_reg = false;
                }
                (false, Some(tok)) if tok.kind == TokenKind::Comma => want_reg = true,
                (false, None) => return Ok(mask),
                (true, None) => {
                    return Err(self
                        .op_or_eol(itok, ops, i, line, "a register")
                        .unwrap_err())
                }
                (_, Some(tok)) => {
                    return Err(asm_unexpected_token(
                        tok.span,
                        line,
                        "a register list",
                        &tok.kind.to_string(),
                        self.src,
                    ))
                }
            }
            i += 1;
        }
    }

    /// Exactly `REG , REG`.
    fn expect_register_pair(
        &self,
        itok: Token,
        ops: &[Token],
        line: u32,
    ) -> Result<(Register, Register)> {
        let first = self.expect_one_register(itok, ops, 0, line)?;
        let comma = self.op_or_eol(itok, ops, 1, line, "`,`")?;
        if comma.kind != TokenKind::Comma {
            return Err(asm_unexpected_token(
                comma.span,
                line,
                "`,`",
                &comma.kind.to_string(),
                self.src,
            ));
        }
        let second = self.expect_one_register(itok, ops, 2, line)?;
        self.expect_consumed(&ops[3..], line)?;
        Ok((first, second))
    }

    fn expect_one_register(
        &self,
        itok: Token,
        ops: &[Token],
        at: usize,
        line: u32,
    ) -> Result<Register> {
        let tok = self.op_or_eol(itok, ops, at, line, "a register")?;
        if tok.kind != TokenKind::Ident {
            return Err(asm_unexpected_token(
                tok.span,
                line,
                "a register",
                &tok.kind.to_string(),
                self.src,
            ));
        }
        self.slice(tok)
            .parse()
            .map_err(|_| asm_invalid_register(tok.span, line, self.src))
    }

    /// Operand token at `at`, or an end-of-line diagnostic anchored to the
    /// instruction.
    fn op_or_eol(
        &self,
        itok: Token,
        ops: &[Token],
        at: usize,
        line: u32,
        expected: &str,
    ) -> Result<Token> {
        ops.get(at).copied().ok_or_else(|| {
            asm_unexpected_token(itok.span, line, expected, "end of line", self.src)
        })
    }

    /// No tokens may remain after a fully parsed operand list.
    fn expect_consumed(&self, rest: &[Token], line: u32) -> Result<()> {
        match rest.first() {
            None => Ok(()),
            Some(stray) => Err(asm_unexpected_token(
                stray.span,
                line,
                "end of line",
                &stray.kind.to_string(),
                self.src,
            )),
        }
    }
}
