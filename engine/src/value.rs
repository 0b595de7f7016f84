//! Registry values and the ANSI/Unicode wire conversion.
//!
//! String kinds are held as UTF-16LE, NUL terminated, exactly as the registry
//! stores them. The ANSI code path sees a single-byte rendition instead.

use std::fmt;

/// `REG_*` type code. Unknown codes are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueType(pub u32);

impl ValueType {
    pub const NONE: ValueType = ValueType(0);
    pub const SZ: ValueType = ValueType(1);
    pub const EXPAND_SZ: ValueType = ValueType(2);
    pub const BINARY: ValueType = ValueType(3);
    pub const DWORD: ValueType = ValueType(4);
    pub const DWORD_BIG_ENDIAN: ValueType = ValueType(5);
    pub const LINK: ValueType = ValueType(6);
    pub const MULTI_SZ: ValueType = ValueType(7);
    pub const QWORD: ValueType = ValueType(11);

    /// Kinds whose payload is text and which the alteration pipeline touches.
    pub fn is_string(self) -> bool {
        matches!(self, Self::SZ | Self::EXPAND_SZ | Self::MULTI_SZ)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::NONE => "REG_NONE",
            Self::SZ => "REG_SZ",
            Self::EXPAND_SZ => "REG_EXPAND_SZ",
            Self::BINARY => "REG_BINARY",
            Self::DWORD => "REG_DWORD",
            Self::DWORD_BIG_ENDIAN => "REG_DWORD_BIG_ENDIAN",
            Self::LINK => "REG_LINK",
            Self::MULTI_SZ => "REG_MULTI_SZ",
            Self::QWORD => "REG_QWORD",
            ValueType(other) => return write!(f, "REG_TYPE({other})"),
        };
        f.write_str(name)
    }
}

/// Which entry point the caller came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringMode {
    Ansi,
    #[default]
    Unicode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegValue {
    pub kind: ValueType,
    pub data: Vec<u8>,
}

impl RegValue {
    pub fn new(kind: ValueType, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn dword(value: u32) -> Self {
        Self::new(ValueType::DWORD, value.to_le_bytes().to_vec())
    }

    pub fn binary(data: &[u8]) -> Self {
        Self::new(ValueType::BINARY, data.to_vec())
    }

    /// `REG_SZ` / `REG_EXPAND_SZ` from text, NUL terminated.
    pub fn string(kind: ValueType, text: &str) -> Self {
        let mut units: Vec<u16> = text.encode_utf16().collect();
        units.push(0);
        Self::new(kind, units_to_bytes(&units))
    }

    pub fn sz(text: &str) -> Self {
        Self::string(ValueType::SZ, text)
    }

    /// `REG_MULTI_SZ`: each item NUL terminated, plus the closing NUL.
    pub fn multi_sz<S: AsRef<str>>(items: &[S]) -> Self {
        let mut units = Vec::new();
        for item in items {
            units.extend(item.as_ref().encode_utf16());
            units.push(0);
        }
        units.push(0);
        Self::new(ValueType::MULTI_SZ, units_to_bytes(&units))
    }

    pub fn as_dword(&self) -> Option<u32> {
        match self.kind {
            ValueType::DWORD => self.data.get(..4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ValueType::DWORD_BIG_ENDIAN => {
                self.data.get(..4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            _ => None,
        }
    }

    /// Text of a `REG_SZ`/`REG_EXPAND_SZ`, trailing NULs dropped.
    pub fn as_string(&self) -> Option<String> {
        if !matches!(self.kind, ValueType::SZ | ValueType::EXPAND_SZ) {
            return None;
        }
        let units = bytes_to_units(&self.data);
        let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
        Some(String::from_utf16_lossy(&units[..end]))
    }

    /// Items of a `REG_MULTI_SZ`.
    pub fn as_multi_string(&self) -> Option<Vec<String>> {
        if self.kind != ValueType::MULTI_SZ {
            return None;
        }
        let units = bytes_to_units(&self.data);
        Some(
            units
                .split(|&u| u == 0)
                .filter(|item| !item.is_empty())
                .map(String::from_utf16_lossy)
                .collect(),
        )
    }

    /// Payload as the caller's entry point expects it.
    pub fn to_wire(&self, mode: StringMode) -> Vec<u8> {
        match mode {
            StringMode::Ansi if self.kind.is_string() => {
                bytes_to_units(&self.data).into_iter().map(unit_to_ansi).collect()
            }
            _ => self.data.clone(),
        }
    }

    /// Builds the stored form from the caller's payload.
    pub fn from_wire(kind: ValueType, data: &[u8], mode: StringMode) -> Self {
        match mode {
            StringMode::Ansi if kind.is_string() => {
                let units: Vec<u16> = data.iter().map(|&b| u16::from(b)).collect();
                Self::new(kind, units_to_bytes(&units))
            }
            _ => Self::new(kind, data.to_vec()),
        }
    }
}

fn unit_to_ansi(unit: u16) -> u8 {
    u8::try_from(unit).unwrap_or(b'?')
}

/// Odd trailing bytes are dropped, as a truncated UTF-16 unit carries no text.
pub(crate) fn bytes_to_units(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub(crate) fn units_to_bytes(units: &[u16]) -> Vec<u8> {
    units.iter().flat_map(|u| u.to_le_bytes()).collect()
}
