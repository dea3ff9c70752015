use std::fmt;
use std::io;

use miette::{miette, LabeledSpan, Report, Severity};

use crate::span::Span;

// Assembly errors. Every diagnostic names the 1-based source line and
// aborts the run; no partial image is ever returned.

pub fn asm_duplicate_label(span: Span, line: u32, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::duplicate_label",
        help = "labels may only be declared once per program",
        labels = vec![LabeledSpan::at(span, "duplicate label")],
        "Duplicate label declaration on line {line}",
    )
    .with_source_code(src.to_string())
}

pub fn asm_undefined_label(span: Span, line: u32, name: &str, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::undefined_label",
        help = "declare the label at the start of a line before or after this use.",
        labels = vec![LabeledSpan::at(span, "undefined label")],
        "Reference to undefined label `{name}` on line {line}",
    )
    .with_source_code(src.to_string())
}

pub fn asm_unexpected_token(span: Span, line: u32, expected: &str, found: &str, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::unexpected_token",
        help = "check the operands allowed for this instruction.",
        labels = vec![LabeledSpan::at(span, "unexpected token")],
        "Expected {expected}, found {found} on line {line}",
    )
    .with_source_code(src.to_string())
}

pub fn asm_invalid_register(span: Span, line: u32, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::invalid_register",
        help = "valid register names are A, B, D, X and Y.",
        labels = vec![LabeledSpan::at(span, "not a register")],
        "Invalid register name on line {line}",
    )
    .with_source_code(src.to_string())
}

pub fn asm_bad_literal(span: Span, line: u32, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::bad_literal",
        help = "numeric literals are decimal, $hex or %binary.",
        labels = vec![LabeledSpan::at(span, "invalid literal")],
        "Could not parse numeric literal on line {line}",
    )
    .with_source_code(src.to_string())
}

pub fn asm_literal_range(span: Span, line: u32, val: u32, bits: u8, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::literal_range",
        help = format!("this operand must fit in {bits} bits"),
        labels = vec![LabeledSpan::at(span, "out-of-range literal")],
        "Literal {val} does not fit the operand width on line {line}",
    )
    .with_source_code(src.to_string())
}

pub fn asm_mode_unsupported(span: Span, line: u32, mnemonic: &str, mode: &str, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::addressing_mode",
        help = "check which addressing modes this instruction accepts.",
        labels = vec![LabeledSpan::at(span, "unsupported operand form")],
        "{mnemonic} does not accept {mode} addressing on line {line}",
    )
    .with_source_code(src.to_string())
}

pub fn asm_width_mismatch(span: Span, line: u32, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::register_width",
        help = "8-bit and 16-bit registers cannot be mixed here.",
        labels = vec![LabeledSpan::at(span, "wrong register width")],
        "Register width mismatch on line {line}",
    )
    .with_source_code(src.to_string())
}

pub fn asm_unterminated_string(span: Span, line: u32, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::str_lit",
        help = "close string literals with a \" character.",
        labels = vec![LabeledSpan::at(span, "unterminated literal")],
        "Unterminated string literal on line {line}",
    )
    .with_source_code(src.to_string())
}

/// Fatal faults raised by the execution engine. No fault is recoverable;
/// the worker thread stops and hands the fault to the host.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Fault {
    /// Pop from the empty 8-bit value stack.
    ByteStackUnderflow,
    /// Pop from the empty 16-bit value stack.
    WordStackUnderflow,
    /// RET with no pending CALL.
    CallStackUnderflow,
    DivideByZero { at: u16 },
    IllegalOpcode { opcode: u8, at: u16 },
    /// Malformed indexed postbytes in the instruction stream.
    BadIndexedOperand { at: u16 },
    /// Selector byte naming no register.
    BadRegisterSelector { at: u16 },
    /// Access past the end of the 65,535-byte memory array.
    MemoryOutOfRange { addr: u16 },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::ByteStackUnderflow => write!(f, "8-bit value stack underflow"),
            Fault::WordStackUnderflow => write!(f, "16-bit value stack underflow"),
            Fault::CallStackUnderflow => write!(f, "call stack underflow"),
            Fault::DivideByZero { at } => write!(f, "division by zero at {at:#06x}"),
            Fault::IllegalOpcode { opcode, at } => {
                write!(f, "illegal opcode {opcode:#04x} at {at:#06x}")
            }
            Fault::BadIndexedOperand { at } => {
                write!(f, "malformed indexed operand at {at:#06x}")
            }
            Fault::BadRegisterSelector { at } => {
                write!(f, "invalid register selector at {at:#06x}")
            }
            Fault::MemoryOutOfRange { addr } => {
                write!(f, "memory access out of range at {addr:#06x}")
            }
        }
    }
}

impl std::error::Error for Fault {}

/// Failures while reading a program file, distinct from assembly errors.
#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    /// File does not begin with the `B33` magic.
    BadMagic,
    /// File ends inside the header or debug table.
    Truncated,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(err) => write!(f, "IO error: {err}"),
            LoadError::BadMagic => write!(f, "not a B33 executable (bad magic)"),
            LoadError::Truncated => write!(f, "file is truncated"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(err: io::Error) -> LoadError {
        LoadError::Io(err)
    }
}
