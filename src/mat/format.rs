//! Level 5 MAT-file layout: header, data element tags, type and class codes

use crate::error::{Result, TfceError};

pub const HEADER_LEN: usize = 128;
pub const HEADER_TEXT_LEN: usize = 116;
pub const VERSION_5: u16 = 0x0100;
pub const VERSION_73: u16 = 0x0200;

// Data element types
pub const MI_INT8: u32 = 1;
pub const MI_UINT8: u32 = 2;
pub const MI_INT16: u32 = 3;
pub const MI_UINT16: u32 = 4;
pub const MI_INT32: u32 = 5;
pub const MI_UINT32: u32 = 6;
pub const MI_SINGLE: u32 = 7;
pub const MI_DOUBLE: u32 = 9;
pub const MI_INT64: u32 = 12;
pub const MI_UINT64: u32 = 13;
pub const MI_MATRIX: u32 = 14;
pub const MI_COMPRESSED: u32 = 15;

// Array classes
pub const MX_CELL: u8 = 1;
pub const MX_STRUCT: u8 = 2;
pub const MX_OBJECT: u8 = 3;
pub const MX_CHAR: u8 = 4;
pub const MX_SPARSE: u8 = 5;
pub const MX_DOUBLE: u8 = 6;
pub const MX_UINT64: u8 = 15;

// Array flag bits
pub const FLAG_COMPLEX: u32 = 0x0800;

/// Byte order of a MAT-file, from the header's endian indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// `IM` on disk means the writer was little-endian
    pub fn from_indicator(bytes: [u8; 2]) -> Result<Self> {
        match &bytes {
            b"IM" => Ok(Self::Little),
            b"MI" => Ok(Self::Big),
            _ => Err(TfceError::MatFormat(format!(
                "bad endian indicator {bytes:02x?}"
            ))),
        }
    }

    #[must_use]
    pub fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes(b),
            Self::Big => u16::from_be_bytes(b),
        }
    }

    #[must_use]
    pub fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(b),
            Self::Big => u32::from_be_bytes(b),
        }
    }

    #[must_use]
    pub fn u64(self, b: [u8; 8]) -> u64 {
        match self {
            Self::Little => u64::from_le_bytes(b),
            Self::Big => u64::from_be_bytes(b),
        }
    }
}

/// Size in bytes of one value of a numeric data element type
#[must_use]
pub fn type_size(data_type: u32) -> Option<usize> {
    match data_type {
        MI_INT8 | MI_UINT8 => Some(1),
        MI_INT16 | MI_UINT16 => Some(2),
        MI_INT32 | MI_UINT32 | MI_SINGLE => Some(4),
        MI_DOUBLE | MI_INT64 | MI_UINT64 => Some(8),
        _ => None,
    }
}

/// Human-readable name of an array class, for error messages
#[must_use]
pub fn class_name(class: u8) -> &'static str {
    match class {
        MX_CELL => "cell",
        MX_STRUCT => "struct",
        MX_OBJECT => "object",
        MX_CHAR => "char",
        MX_SPARSE => "sparse",
        MX_DOUBLE => "double",
        7 => "single",
        8 => "int8",
        9 => "uint8",
        10 => "int16",
        11 => "uint16",
        12 => "int32",
        13 => "uint32",
        14 => "int64",
        MX_UINT64 => "uint64",
        _ => "unknown",
    }
}

/// Round `n` up to the 8-byte element alignment
#[must_use]
pub const fn padded(n: usize) -> usize {
    (n + 7) & !7
}
