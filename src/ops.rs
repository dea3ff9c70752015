use std::fmt;
use std::str::FromStr;

use crate::symbol::Register;

/// Opcode byte values. 16-bit operands follow little-endian.
pub mod op {
    pub const HLT: u8 = 0x00;
    pub const LDA_IMM: u8 = 0x01;
    pub const LDA_EXT: u8 = 0x02;
    pub const LDA_IDX: u8 = 0x03;
    pub const BRK: u8 = 0x04;
    pub const NOP: u8 = 0x05;
    pub const STA_EXT: u8 = 0x06;
    pub const STA_IDX: u8 = 0x07;
    pub const LDB_IMM: u8 = 0x08;
    pub const LDB_EXT: u8 = 0x09;
    pub const LDB_IDX: u8 = 0x0A;
    pub const STB_EXT: u8 = 0x0B;
    pub const STB_IDX: u8 = 0x0C;
    pub const LDD_IMM: u8 = 0x0D;
    pub const LDD_EXT: u8 = 0x0E;
    pub const LDD_IDX: u8 = 0x0F;
    pub const STD_EXT: u8 = 0x10;
    pub const STD_IDX: u8 = 0x11;
    pub const LDX_IMM: u8 = 0x12;
    pub const LDX_EXT: u8 = 0x13;
    pub const LDX_IDX: u8 = 0x14;
    pub const STX_EXT: u8 = 0x15;
    pub const STX_IDX: u8 = 0x16;
    pub const LDY_IMM: u8 = 0x17;
    pub const LDY_EXT: u8 = 0x18;
    pub const LDY_IDX: u8 = 0x19;
    pub const STY_EXT: u8 = 0x1A;
    pub const STY_IDX: u8 = 0x1B;
    pub const CMPA_IMM: u8 = 0x1C;
    pub const CMPA_EXT: u8 = 0x1D;
    pub const CMPA_REG: u8 = 0x1E;
    pub const CMPB_IMM: u8 = 0x1F;
    pub const CMPB_EXT: u8 = 0x20;
    pub const CMPB_REG: u8 = 0x21;
    pub const CMPD_IMM: u8 = 0x22;
    pub const CMPD_EXT: u8 = 0x23;
    pub const CMPD_REG: u8 = 0x24;
    pub const CMPX_IMM: u8 = 0x25;
    pub const CMPX_EXT: u8 = 0x26;
    pub const CMPX_REG: u8 = 0x27;
    pub const CMPY_IMM: u8 = 0x28;
    pub const CMPY_EXT: u8 = 0x29;
    pub const CMPY_REG: u8 = 0x2A;
    pub const JMP: u8 = 0x2B;
    pub const JEQ: u8 = 0x2C;
    pub const JNE: u8 = 0x2D;
    pub const JGT: u8 = 0x2E;
    pub const JLT: u8 = 0x2F;
    pub const JGE: u8 = 0x30;
    pub const JLE: u8 = 0x31;
    pub const JCS: u8 = 0x32;
    pub const JCC: u8 = 0x33;
    pub const CALL: u8 = 0x34;
    pub const RET: u8 = 0x35;
    pub const PUSH: u8 = 0x36;
    pub const POP: u8 = 0x37;
    pub const TFR: u8 = 0x38;
    pub const ADDA_IMM: u8 = 0x39;
    pub const ADDA_EXT: u8 = 0x3A;
    pub const ADDA_REG: u8 = 0x3B;
    pub const ADDB_IMM: u8 = 0x3C;
    pub const ADDB_EXT: u8 = 0x3D;
    pub const ADDB_REG: u8 = 0x3E;
    pub const SUBA_IMM: u8 = 0x3F;
    pub const SUBA_EXT: u8 = 0x40;
    pub const SUBA_REG: u8 = 0x41;
    pub const SUBB_IMM: u8 = 0x42;
    pub const SUBB_EXT: u8 = 0x43;
    pub const SUBB_REG: u8 = 0x44;
    pub const ANDA_IMM: u8 = 0x45;
    pub const ANDA_EXT: u8 = 0x46;
    pub const ANDA_REG: u8 = 0x47;
    pub const ANDB_IMM: u8 = 0x48;
    pub const ANDB_EXT: u8 = 0x49;
    pub const ANDB_REG: u8 = 0x4A;
    pub const ORA_IMM: u8 = 0x4B;
    pub const ORA_EXT: u8 = 0x4C;
    pub const ORA_REG: u8 = 0x4D;
    pub const ORB_IMM: u8 = 0x4E;
    pub const ORB_EXT: u8 = 0x4F;
    pub const ORB_REG: u8 = 0x50;
    pub const XORA_IMM: u8 = 0x51;
    pub const XORA_EXT: u8 = 0x52;
    pub const XORA_REG: u8 = 0x53;
    pub const XORB_IMM: u8 = 0x54;
    pub const XORB_EXT: u8 = 0x55;
    pub const XORB_REG: u8 = 0x56;
    pub const MUL: u8 = 0x57;
    pub const DIV: u8 = 0x58;
    pub const SHL: u8 = 0x59;
    pub const SHR: u8 = 0x5A;
}

/// Addressing-mode families an instruction may encode with.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddrMode {
    /// `#` literal, sized to the destination register.
    Imm,
    /// Absolute 16-bit address or label.
    Ext,
    /// Index register with optional offset register and post-adjust.
    Idx,
    /// Bare register operand encoded as a selector byte.
    Reg,
}

/// Every instruction and directive word the lexer recognizes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mnemonic {
    Lda,
    Ldb,
    Ldd,
    Ldx,
    Ldy,
    Sta,
    Stb,
    Std,
    Stx,
    Sty,
    Cmpa,
    Cmpb,
    Cmpd,
    Cmpx,
    Cmpy,
    Jmp,
    Jeq,
    Jne,
    Jgt,
    Jlt,
    Jge,
    Jle,
    Jcs,
    Jcc,
    Call,
    Ret,
    Push,
    Pop,
    Tfr,
    Adda,
    Addb,
    Suba,
    Subb,
    Anda,
    Andb,
    Ora,
    Orb,
    Xora,
    Xorb,
    Mul,
    Div,
    Shl,
    Shr,
    Hlt,
    Brk,
    Nop,
    /// Emit raw ASCII bytes, no terminator.
    Str,
    /// Emit one raw byte.
    Chr,
    /// Reserve zeroed bytes.
    Rmb,
    /// Declare the entry point and emit a halt.
    End,
}

/// Broad shape of an instruction, used to drive operand parsing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpClass {
    /// Load into a register: immediate, extended or indexed.
    Load(Register),
    /// Store from a register: extended or indexed.
    Store(Register),
    /// Compare a register: immediate, extended or register form.
    Compare(Register),
    /// ALU op against an 8-bit accumulator: immediate, extended or register.
    Alu(Register),
    /// Conditional or unconditional jump to an absolute target.
    Jump,
    Call,
    /// One opcode byte, no operands.
    Inherent,
    /// Register-mask operand.
    PushPop,
    /// Two selector bytes: source then destination.
    Tfr,
    /// Two selector bytes: destination then source.
    MulDiv,
    /// One selector byte.
    Shift,
    DirStr,
    DirChr,
    DirRmb,
    DirEnd,
}

impl Mnemonic {
    pub fn class(self) -> OpClass {
        use Mnemonic::*;
        use Register as R;
        match self {
            Lda => OpClass::Load(R::A),
            Ldb => OpClass::Load(R::B),
            Ldd => OpClass::Load(R::D),
            Ldx => OpClass::Load(R::X),
            Ldy => OpClass::Load(R::Y),
            Sta => OpClass::Store(R::A),
            Stb => OpClass::Store(R::B),
            Std => OpClass::Store(R::D),
            Stx => OpClass::Store(R::X),
            Sty => OpClass::Store(R::Y),
            Cmpa => OpClass::Compare(R::A),
            Cmpb => OpClass::Compare(R::B),
            Cmpd => OpClass::Compare(R::D),
            Cmpx => OpClass::Compare(R::X),
            Cmpy => OpClass::Compare(R::Y),
            Adda => OpClass::Alu(R::A),
            Addb => OpClass::Alu(R::B),
            Suba => OpClass::Alu(R::A),
            Subb => OpClass::Alu(R::B),
            Anda => OpClass::Alu(R::A),
            Andb => OpClass::Alu(R::B),
            Ora => OpClass::Alu(R::A),
            Orb => OpClass::Alu(R::B),
            Xora => OpClass::Alu(R::A),
            Xorb => OpClass::Alu(R::B),
            Jmp | Jeq | Jne | Jgt | Jlt | Jge | Jle | Jcs | Jcc => OpClass::Jump,
            Call => OpClass::Call,
            Ret | Hlt | Brk | Nop => OpClass::Inherent,
            Push | Pop => OpClass::PushPop,
            Tfr => OpClass::Tfr,
            Mul | Div => OpClass::MulDiv,
            Shl | Shr => OpClass::Shift,
            Str => OpClass::DirStr,
            Chr => OpClass::DirChr,
            Rmb => OpClass::DirRmb,
            End => OpClass::DirEnd,
        }
    }

    /// Opcode for this mnemonic in the given addressing mode, if the
    /// instruction accepts that mode.
    pub fn opcode(self, mode: AddrMode) -> Option<u8> {
        use AddrMode::*;
        use Mnemonic::*;
        let code = match (self, mode) {
            (Lda, Imm) => op::LDA_IMM,
            (Lda, Ext) => op::LDA_EXT,
            (Lda, Idx) => op::LDA_IDX,
            (Ldb, Imm) => op::LDB_IMM,
            (Ldb, Ext) => op::LDB_EXT,
            (Ldb, Idx) => op::LDB_IDX,
            (Ldd, Imm) => op::LDD_IMM,
            (Ldd, Ext) => op::LDD_EXT,
            (Ldd, Idx) => op::LDD_IDX,
            (Ldx, Imm) => op::LDX_IMM,
            (Ldx, Ext) => op::LDX_EXT,
            (Ldx, Idx) => op::LDX_IDX,
            (Ldy, Imm) => op::LDY_IMM,
            (Ldy, Ext) => op::LDY_EXT,
            (Ldy, Idx) => op::LDY_IDX,
            (Sta, Ext) => op::STA_EXT,
            (Sta, Idx) => op::STA_IDX,
            (Stb, Ext) => op::STB_EXT,
            (Stb, Idx) => op::STB_IDX,
            (Std, Ext) => op::STD_EXT,
            (Std, Idx) => op::STD_IDX,
            (Stx, Ext) => op::STX_EXT,
            (Stx, Idx) => op::STX_IDX,
            (Sty, Ext) => op::STY_EXT,
            (Sty, Idx) => op::STY_IDX,
            (Cmpa, Imm) => op::CMPA_IMM,
            (Cmpa, Ext) => op::CMPA_EXT,
            (Cmpa, Reg) => op::CMPA_REG,
            (Cmpb, Imm) => op::CMPB_IMM,
            (Cmpb, Ext) => op::CMPB_EXT,
            (Cmpb, Reg) => op::CMPB_REG,
            (Cmpd, Imm) => op::CMPD_IMM,
            (Cmpd, Ext) => op::CMPD_EXT,
            (Cmpd, Reg) => op::CMPD_REG,
            (Cmpx, Imm) => op::CMPX_IMM,
            (Cmpx, Ext) => op::CMPX_EXT,
            (Cmpx, Reg) => op::CMPX_REG,
            (Cmpy, Imm) => op::CMPY_IMM,
            (Cmpy, Ext) => op::CMPY_EXT,
            (Cmpy, Reg) => op::CMPY_REG,
            (Jmp, Ext) => op::JMP,
            (Jeq, Ext) => op::JEQ,
            (Jne, Ext) => op::JNE,
            (Jgt, Ext) => op::JGT,
            (Jlt, Ext) => op::JLT,
            (Jge, Ext) => op::JGE,
            (Jle, Ext) => op::JLE,
            (Jcs, Ext) => op::JCS,
            (Jcc, Ext) => op::JCC,
            (Call, Ext) => op::CALL,
            (Adda, Imm) => op::ADDA_IMM,
            (Adda, Ext) => op::ADDA_EXT,
            (Adda, Reg) => op::ADDA_REG,
            (Addb, Imm) => op::ADDB_IMM,
            (Addb, Ext) => op::ADDB_EXT,
            (Addb, Reg) => op::ADDB_REG,
            (Suba, Imm) => op::SUBA_IMM,
            (Suba, Ext) => op::SUBA_EXT,
            (Suba, Reg) => op::SUBA_REG,
            (Subb, Imm) => op::SUBB_IMM,
            (Subb, Ext) => op::SUBB_EXT,
            (Subb, Reg) => op::SUBB_REG,
            (Anda, Imm) => op::ANDA_IMM,
            (Anda, Ext) => op::ANDA_EXT,
            (Anda, Reg) => op::ANDA_REG,
            (Andb, Imm) => op::ANDB_IMM,
            (Andb, Ext) => op::ANDB_EXT,
            (Andb, Reg) => op::ANDB_REG,
            (Ora, Imm) => op::ORA_IMM,
            (Ora, Ext) => op::ORA_EXT,
            (Ora, Reg) => op::ORA_REG,
            (Orb, Imm) => op::ORB_IMM,
            (Orb, Ext) => op::ORB_EXT,
            (Orb, Reg) => op::ORB_REG,
            (Xora, Imm) => op::XORA_IMM,
            (Xora, Ext) => op::XORA_EXT,
            (Xora, Reg) => op::XORA_REG,
            (Xorb, Imm) => op::XORB_IMM,
            (Xorb, Ext) => op::XORB_EXT,
            (Xorb, Reg) => op::XORB_REG,
            _ => return None,
        };
        Some(code)
    }
}

impl FromStr for Mnemonic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Mnemonic::*;
        let m = match s.to_ascii_uppercase().as_str() {
            "LDA" => Lda,
            "LDB" => Ldb,
            "LDD" => Ldd,
            "LDX" => Ldx,
            "LDY" => Ldy,
            "STA" => Sta,
            "STB" => Stb,
            "STD" => Std,
            "STX" => Stx,
            "STY" => Sty,
            "CMPA" => Cmpa,
            "CMPB" => Cmpb,
            "CMPD" => Cmpd,
            "CMPX" => Cmpx,
            "CMPY" => Cmpy,
            "JMP" => Jmp,
            "JEQ" => Jeq,
            "JNE" => Jne,
            "JGT" => Jgt,
            "JLT" => Jlt,
            "JGE" => Jge,
            "JLE" => Jle,
            "JCS" => Jcs,
            "JCC" => Jcc,
            "CALL" => Call,
            "RET" => Ret,
            "PUSH" => Push,
            "POP" => Pop,
            "TFR" => Tfr,
            "ADDA" => Adda,
            "ADDB" => Addb,
            "SUBA" => Suba,
            "SUBB" => Subb,
            "ANDA" => Anda,
            "ANDB" => Andb,
            "ORA" => Ora,
            "ORB" => Orb,
            "XORA" => Xora,
            "XORB" => Xorb,
            "MUL" => Mul,
            "DIV" => Div,
            "SHL" => Shl,
            "SHR" => Shr,
            "HLT" => Hlt,
            "BRK" => Brk,
            "NOP" => Nop,
            "STR" => Str,
            "CHR" => Chr,
            "RMB" => Rmb,
            "END" => End,
            _ => return Err(()),
        };
        Ok(m)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format!("{self:?}").to_ascii_uppercase())
    }
}

/// Optional 8-bit offset register of an indexed operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OffsetReg {
    None,
    A,
    B,
}

impl OffsetReg {
    pub fn encode(self) -> u8 {
        match self {
            OffsetReg::None => 0,
            OffsetReg::A => 1,
            OffsetReg::B => 2,
        }
    }

    pub fn decode(val: u8) -> Option<OffsetReg> {
        match val {
            0 => Some(OffsetReg::None),
            1 => Some(OffsetReg::A),
            2 => Some(OffsetReg::B),
            _ => None,
        }
    }
}

/// Post-access adjustment applied to the index register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PostOp {
    None,
    Inc,
    IncInc,
    Dec,
    DecDec,
}

/// Index-postbyte flag bits, OR'd with the index register selector.
const FLAG_INC: u8 = 32;
const FLAG_DEC: u8 = 64;
const FLAG_DOUBLE: u8 = 128;

impl PostOp {
    fn flags(self) -> u8 {
        match self {
            PostOp::None => 0,
            PostOp::Inc => FLAG_INC,
            PostOp::IncInc => FLAG_INC | FLAG_DOUBLE,
            PostOp::Dec => FLAG_DEC,
            PostOp::DecDec => FLAG_DEC | FLAG_DOUBLE,
        }
    }

    /// Signed amount added to the index register after the access.
    pub fn step(self) -> i32 {
        match self {
            PostOp::None => 0,
            PostOp::Inc => 1,
            PostOp::IncInc => 2,
            PostOp::Dec => -1,
            PostOp::DecDec => -2,
        }
    }
}

/// Fully decoded indexed operand: `[A|B|,]X|Y|D[+|++|-|--]`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Indexed {
    pub offset: OffsetReg,
    /// One of D, X, Y.
    pub index: Register,
    pub post: PostOp,
}

impl Indexed {
    /// Two operand bytes: offset-register selector, then the index bitfield.
    pub fn encode(self) -> [u8; 2] {
        [self.offset.encode(), self.index.selector() | self.post.flags()]
    }

    pub fn decode(bytes: [u8; 2]) -> Option<Indexed> {
        let offset = OffsetReg::decode(bytes[0])?;
        let index = Register::from_selector(bytes[1] & 0b0001_1100)?;
        if !index.is_wide() {
            return None;
        }
        let post = match (
            bytes[1] & FLAG_INC != 0,
            bytes[1] & FLAG_DEC != 0,
            bytes[1] & FLAG_DOUBLE != 0,
        ) {
            (false, false, false) => PostOp::None,
            (true, false, false) => PostOp::Inc,
            (true, false, true) => PostOp::IncInc,
            (false, true, false) => PostOp::Dec,
            (false, true, true) => PostOp::DecDec,
            _ => return None,
        };
        Some(Indexed {
            offset,
            index,
            post,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_fixed_opcodes() {
        // These byte values are part of the executable-format contract.
        assert_eq!(Mnemonic::Lda.opcode(AddrMode::Imm), Some(0x01));
        assert_eq!(Mnemonic::Sta.opcode(AddrMode::Ext), Some(0x06));
        assert_eq!(op::HLT, 0x00);
    }

    #[test]
    fn stores_reject_immediate() {
        assert_eq!(Mnemonic::Sta.opcode(AddrMode::Imm), None);
        assert_eq!(Mnemonic::Stx.opcode(AddrMode::Imm), None);
    }

    #[test]
    fn jumps_only_extended() {
        assert_eq!(Mnemonic::Jeq.opcode(AddrMode::Idx), None);
        assert!(Mnemonic::Jeq.opcode(AddrMode::Ext).is_some());
    }

    #[test]
    fn opcodes_are_unique() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        let modes = [AddrMode::Imm, AddrMode::Ext, AddrMode::Idx, AddrMode::Reg];
        let all = [
            Mnemonic::Lda,
            Mnemonic::Ldb,
            Mnemonic::Ldd,
            Mnemonic::Ldx,
            Mnemonic::Ldy,
            Mnemonic::Sta,
            Mnemonic::Stb,
            Mnemonic::Std,
            Mnemonic::Stx,
            Mnemonic::Sty,
            Mnemonic::Cmpa,
            Mnemonic::Cmpb,
            Mnemonic::Cmpd,
            Mnemonic::Cmpx,
            Mnemonic::Cmpy,
            Mnemonic::Jmp,
            Mnemonic::Jeq,
            Mnemonic::Jne,
            Mnemonic::Jgt,
            Mnemonic::Jlt,
            Mnemonic::Jge,
            Mnemonic::Jle,
            Mnemonic::Jcs,
            Mnemonic::Jcc,
            Mnemonic::Call,
            Mnemonic::Adda,
            Mnemonic::Addb,
            Mnemonic::Suba,
            Mnemonic::Subb,
            Mnemonic::Anda,
            Mnemonic::Andb,
            Mnemonic::Ora,
            Mnemonic::Orb,
            Mnemonic::Xora,
            Mnemonic::Xorb,
        ];
        for m in all {
            for mode in modes {
                if let Some(code) = m.opcode(mode) {
                    assert!(seen.insert(code), "duplicate opcode {code:#04x}");
                }
            }
        }
    }

    #[test]
    fn indexed_postbyte_roundtrip() {
        let cases = [
            Indexed {
                offset: OffsetReg::None,
                index: Register::X,
                post: PostOp::Inc,
            },
            Indexed {
                offset: OffsetReg::A,
                index: Register::Y,
                post: PostOp::DecDec,
            },
            Indexed {
                offset: OffsetReg::B,
                index: Register::D,
                post: PostOp::None,
            },
        ];
        for case in cases {
            assert_eq!(Indexed::decode(case.encode()), Some(case));
        }
    }

    #[test]
    fn indexed_postbyte_bit_values() {
        // `,X+` encodes as offset 0, X (8) + post-increment (32).
        let enc = Indexed {
            offset: OffsetReg::None,
            index: Register::X,
            post: PostOp::Inc,
        }
        .encode();
        assert_eq!(enc, [0, 8 + 32]);

        // `B,D--`: offset B (2), D (4) + dec (64) + double (128).
        let enc = Indexed {
            offset: OffsetReg::B,
            index: Register::D,
            post: PostOp::DecDec,
        }
        .encode();
        assert_eq!(enc, [2, 4 + 64 + 128]);
    }

    #[test]
    fn indexed_decode_rejects_conflicting_flags() {
        assert_eq!(Indexed::decode([0, 8 + 32 + 64]), None);
        // Double modifier without a direction is meaningless.
        assert_eq!(Indexed::decode([0, 8 + 128]), None);
        // Narrow register as index.
        assert_eq!(Indexed::decode([0, 1]), None);
    }
}
