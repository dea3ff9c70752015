use std::fmt;
use std::str::FromStr;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Represents the CPU registers visible to programs.
///
/// `D` is not independent storage: it reads and writes as the big-endian
/// concatenation of `A` (high) and `B` (low).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Register {
    A,
    B,
    D,
    X,
    Y,
}

impl Register {
    /// Canonical ordering used by PUSH; POP walks it in reverse.
    pub const CANONICAL: [Register; 5] = [
        Register::A,
        Register::B,
        Register::D,
        Register::X,
        Register::Y,
    ];

    /// Selector byte value, shared by PUSH/POP/TFR/register-form encodings.
    pub fn selector(self) -> u8 {
        match self {
            Register::A => 1,
            Register::B => 2,
            Register::D => 4,
            Register::X => 8,
            Register::Y => 16,
        }
    }

    pub fn from_selector(val: u8) -> Option<Register> {
        Register::CANONICAL
            .into_iter()
            .find(|reg| reg.selector() == val)
    }

    /// True for the 16-bit registers.
    pub fn is_wide(self) -> bool {
        matches!(self, Register::D | Register::X | Register::Y)
    }

    /// Width of an immediate operand for this register, in bytes.
    pub fn imm_width(self) -> u16 {
        if self.is_wide() {
            2
        } else {
            1
        }
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(Register::A),
            "B" => Ok(Register::B),
            "D" => Ok(Register::D),
            "X" => Ok(Register::X),
            "Y" => Ok(Register::Y),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::A => "A",
            Register::B => "B",
            Register::D => "D",
            Register::X => "X",
            Register::Y => "Y",
        };
        f.write_str(name)
    }
}

/// Symbol table of uppercased label -> resolved address.
///
/// Owned by a single assembly run: built during the label scan, read-only
/// while encoding, dropped with the run.
#[derive(Debug, Default)]
pub struct LabelTable {
    map: FxMap<String, u16>,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable {
            map: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Record a label declaration. Returns `false` if already defined.
    pub fn insert(&mut self, name: &str, addr: u16) -> bool {
        let key = name.to_ascii_uppercase();
        if self.map.contains_key(&key) {
            return false;
        }
        self.map.insert(key, addr);
        true
    }

    /// Look up a label, case-insensitively.
    pub fn get(&self, name: &str) -> Option<u16> {
        self.map.get(&name.to_ascii_uppercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Labels in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.map.iter().map(|(name, addr)| (name.as_str(), *addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_selectors_roundtrip() {
        for reg in Register::CANONICAL {
            assert_eq!(Register::from_selector(reg.selector()), Some(reg));
        }
        assert_eq!(Register::from_selector(3), None);
    }

    #[test]
    fn label_table_case_folds() {
        let mut table = LabelTable::new();
        assert!(table.insert("start", 0x1000));
        assert_eq!(table.get("START"), Some(0x1000));
        assert_eq!(table.get("Start"), Some(0x1000));
    }

    #[test]
    fn label_table_rejects_duplicates() {
        let mut table = LabelTable::new();
        assert!(table.insert("loop", 0x1000));
        assert!(!table.insert("LOOP", 0x2000));
        assert_eq!(table.get("loop"), Some(0x1000));
    }
}
