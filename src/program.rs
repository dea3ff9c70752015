use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::LoadError;

/// File magic for the self-describing executable format.
pub const MAGIC: [u8; 3] = *b"B33";

/// Magic + origin + exec address + debug-table address + dual-monitor flag.
pub const HEADER_LEN: usize = 10;

/// Output formats the assembler can produce.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OutputKind {
    /// Header + code + optional debug table.
    Executable,
    /// Code bytes only.
    Raw,
}

/// An (address, source-line-text) pair for symbolic tracing.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DebugRecord {
    pub address: u16,
    pub source_line: String,
}

/// A compiled program image: created by the assembler, consumed by the
/// loader, replaced wholesale on reload.
#[derive(Clone, Debug, Default)]
pub struct Program {
    /// Base load address.
    pub origin: u16,
    /// Address execution begins at, and resumes at after halt.
    pub exec_addr: u16,
    pub dual_monitor: bool,
    pub code: Vec<u8>,
    pub debug_records: Vec<DebugRecord>,
}

impl Program {
    /// Raw image with explicit start and execution addresses.
    pub fn from_bytes(code: &[u8], origin: u16, exec_addr: u16) -> Program {
        Program {
            origin,
            exec_addr,
            dual_monitor: false,
            code: code.to_vec(),
            debug_records: Vec::new(),
        }
    }

    /// In the executable image, the debug table begins where the code ends.
    fn debug_addr(&self) -> u16 {
        if self.debug_records.is_empty() {
            0
        } else {
            self.origin.wrapping_add(self.code.len() as u16)
        }
    }

    /// Serialize for the given output kind.
    pub fn to_bytes(&self, kind: OutputKind) -> Vec<u8> {
        match kind {
            OutputKind::Raw => self.code.clone(),
            OutputKind::Executable => {
                let mut out = Vec::with_capacity(HEADER_LEN + self.code.len());
                out.extend_from_slice(&MAGIC);
                out.extend_from_slice(&self.origin.to_le_bytes());
                out.extend_from_slice(&self.exec_addr.to_le_bytes());
                out.extend_from_slice(&self.debug_addr().to_le_bytes());
                out.push(self.dual_monitor as u8);
                out.extend_from_slice(&self.code);
                for rec in &self.debug_records {
                    out.extend_from_slice(&rec.address.to_le_bytes());
                    out.extend_from_slice(rec.source_line.as_bytes());
                    out.push(0);
                }
                out
            }
        }
    }

    pub fn write_file(&self, path: impl AsRef<Path>, kind: OutputKind) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(&self.to_bytes(kind))
    }

    /// Cheap validity gate: does the file begin with the `B33` magic?
    pub fn is_valid_file(path: impl AsRef<Path>) -> bool {
        let Ok(mut file) = File::open(path) else {
            return false;
        };
        let mut magic = [0u8; 3];
        file.read_exact(&mut magic).is_ok() && magic == MAGIC
    }

    pub fn read_file(path: impl AsRef<Path>) -> Result<Program, LoadError> {
        let mut buffer = Vec::new();
        File::open(path)?.read_to_end(&mut buffer)?;
        Program::parse(&buffer)
    }

    /// Parse the executable format.
    pub fn parse(bytes: &[u8]) -> Result<Program, LoadError> {
        if bytes.len() < 3 || bytes[..3] != MAGIC {
            return Err(LoadError::BadMagic);
        }
        if bytes.len() < HEADER_LEN {
            return Err(LoadError::Truncated);
        }
        let origin = u16::from_le_bytes([bytes[3], bytes[4]]);
        let exec_addr = u16::from_le_bytes([bytes[5], bytes[6]]);
        let debug_addr = u16::from_le_bytes([bytes[7], bytes[8]]);
        let dual_monitor = bytes[9] != 0;

        let body = &bytes[HEADER_LEN..];
        // A non-zero debug address marks where code ends and the table begins.
        let (code, mut table) = if debug_addr != 0 {
            let code_len = debug_addr.wrapping_sub(origin) as usize;
            if code_len > body.len() {
                return Err(LoadError::Truncated);
            }
            body.split_at(code_len)
        } else {
            (body, &[][..])
        };

        let mut debug_records = Vec::new();
        while table.len() >= 2 {
            let address = u16::from_le_bytes([table[0], table[1]]);
            if address == 0 {
                break;
            }
            let rest = &table[2..];
            let nul = rest.iter().position(|&b| b == 0).ok_or(LoadError::Truncated)?;
            debug_records.push(DebugRecord {
                address,
                source_line: String::from_utf8_lossy(&rest[..nul]).into_owned(),
            });
            table = &rest[nul + 1..];
        }

        Ok(Program {
            origin,
            exec_addr,
            dual_monitor,
            code: code.to_vec(),
            debug_records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program {
            origin: 0x1000,
            exec_addr: 0x1000,
            dual_monitor: false,
            code: vec![0x01, 0x05, 0x06, 0x00, 0x20, 0x00],
            debug_records: Vec::new(),
        }
    }

    #[test]
    fn header_layout() {
        let bytes = sample().to_bytes(OutputKind::Executable);
        assert_eq!(&bytes[..3], b"B33");
        assert_eq!(&bytes[3..5], &[0x00, 0x10]); // origin LE
        assert_eq!(&bytes[5..7], &[0x00, 0x10]); // exec LE
        assert_eq!(&bytes[7..9], &[0x00, 0x00]); // no debug table
        assert_eq!(bytes[9], 0);
        assert_eq!(&bytes[HEADER_LEN..], &[0x01, 0x05, 0x06, 0x00, 0x20, 0x00]);
    }

    #[test]
    fn raw_kind_is_code_only() {
        let prog = sample();
        assert_eq!(prog.to_bytes(OutputKind::Raw), prog.code);
    }

    #[test]
    fn parse_roundtrip() {
        let prog = sample();
        let parsed = Program::parse(&prog.to_bytes(OutputKind::Executable)).unwrap();
        assert_eq!(parsed.origin, prog.origin);
        assert_eq!(parsed.exec_addr, prog.exec_addr);
        assert_eq!(parsed.code, prog.code);
        assert!(parsed.debug_records.is_empty());
    }

    #[test]
    fn debug_table_roundtrip() {
        let mut prog = sample();
        prog.debug_records = vec![
            DebugRecord {
                address: 0x1000,
                source_line: "LDA #$05".into(),
            },
            DebugRecord {
                address: 0x1002,
                source_line: "STA $2000".into(),
            },
        ];
        let bytes = prog.to_bytes(OutputKind::Executable);
        // Debug address points just past the code.
        assert_eq!(&bytes[7..9], &(0x1006u16).to_le_bytes());

        let parsed = Program::parse(&bytes).unwrap();
        assert_eq!(parsed.debug_records, prog.debug_records);
        assert_eq!(parsed.code, prog.code);
    }

    #[test]
    fn from_bytes_takes_explicit_addresses() {
        let prog = Program::from_bytes(&[0x05, 0x00], 0x4000, 0x4000);
        assert_eq!(prog.origin, 0x4000);
        assert_eq!(prog.exec_addr, 0x4000);
        assert_eq!(prog.code, vec![0x05, 0x00]);
        assert!(prog.debug_records.is_empty());
    }

    #[test]
    fn parse_rejects_bad_magic() {
        assert!(matches!(
            Program::parse(b"ELF\x00\x00\x00\x00\x00\x00\x00"),
            Err(LoadError::BadMagic)
        ));
    }

    #[test]
    fn parse_rejects_short_header() {
        assert!(matches!(
            Program::parse(b"B33\x00\x10"),
            Err(LoadError::Truncated)
        ));
    }

    #[test]
    fn zero_address_terminates_debug_table() {
        let mut bytes = sample().to_bytes(OutputKind::Executable);
        // Hand-append a table: one record, then an all-zero terminator.
        let table_addr = 0x1006u16;
        bytes[7..9].copy_from_slice(&table_addr.to_le_bytes());
        bytes.extend_from_slice(&0x1000u16.to_le_bytes());
        bytes.extend_from_slice(b"LDA #$05\0");
        bytes.extend_from_slice(&[0, 0]);
        let parsed = Program::parse(&bytes).unwrap();
        assert_eq!(parsed.debug_records.len(), 1);
    }
}
