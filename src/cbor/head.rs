// CBOR item heads: initial byte (major type + additional info) and argument.
//
// Additional info 0..=23 carries the argument inline; 24..=27 announce a
// 1/2/4/8 byte big-endian argument; 28..=30 are reserved; 31 marks an
// indefinite length (major types 2..=5) or the break stop code (major 7).

use super::reader::ReadError;

/// Additional info value for a one-byte argument.
pub const AI_ONE_BYTE: u8 = 24;
/// Additional info value for a two-byte argument.
pub const AI_TWO_BYTES: u8 = 25;
/// Additional info value for a four-byte argument.
pub const AI_FOUR_BYTES: u8 = 26;
/// Additional info value for an eight-byte argument.
pub const AI_EIGHT_BYTES: u8 = 27;
/// Additional info value for indefinite lengths and the break stop code.
pub const AI_INDEFINITE: u8 = 31;

/// The break stop code (`major 7, ai 31`).
pub const BREAK: u8 = 0xFF;

// ---------------------------------------------------------------------------
// Major type
// ---------------------------------------------------------------------------

/// The eight CBOR major types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Major {
    Unsigned,
    Negative,
    Bytes,
    Text,
    Array,
    Map,
    Tag,
    /// Floats, simple values and the break code.
    Simple,
}

impl Major {
    #[inline]
    pub fn from_initial(byte: u8) -> Self {
        match byte >> 5 {
            0 => Self::Unsigned,
            1 => Self::Negative,
            2 => Self::Bytes,
            3 => Self::Text,
            4 => Self::Array,
            5 => Self::Map,
            6 => Self::Tag,
            _ => Self::Simple,
        }
    }

    /// Numeric value of the major type (0..=7).
    #[inline]
    pub fn bits(self) -> u8 {
        match self {
            Self::Unsigned => 0,
            Self::Negative => 1,
            Self::Bytes => 2,
            Self::Text => 3,
            Self::Array => 4,
            Self::Map => 5,
            Self::Tag => 6,
            Self::Simple => 7,
        }
    }

    /// Whether additional info 31 means "indefinite length" for this type.
    #[inline]
    pub fn allows_indefinite(self) -> bool {
        matches!(self, Self::Bytes | Self::Text | Self::Array | Self::Map)
    }
}

// ---------------------------------------------------------------------------
// Argument
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argument {
    Value(u64),
    Indefinite,
}

/// A parsed item head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub major: Major,
    /// Raw additional info (low five bits of the initial byte).
    pub info: u8,
    pub arg: Argument,
    /// Total bytes occupied by the head (initial byte + argument bytes).
    pub len: usize,
}

impl Head {
    /// Parse the head at the start of `data`.
    ///
    /// For major type 7 with additional info 25..=27 the "argument" is the
    /// raw float bit pattern; callers must not treat it as a length.
    pub fn parse(data: &[u8]) -> Result<Self, ReadError> {
        let &initial = data.first().ok_or(ReadError::UnexpectedEof)?;
        let major = Major::from_initial(initial);
        let info = initial & 0x1F;

        let (arg, len) = match info {
            0..=23 => (Argument::Value(u64::from(info)), 1),
            AI_ONE_BYTE => (Argument::Value(be_arg::<1>(data)?), 2),
            AI_TWO_BYTES => (Argument::Value(be_arg::<2>(data)?), 3),
            AI_FOUR_BYTES => (Argument::Value(be_arg::<4>(data)?), 5),
            AI_EIGHT_BYTES => (Argument::Value(be_arg::<8>(data)?), 9),
            28..=30 => return Err(ReadError::ReservedAdditionalInfo(initial)),
            _ => {
                if major == Major::Simple {
                    return Err(ReadError::UnexpectedBreak);
                }
                if !major.allows_indefinite() {
                    return Err(ReadError::ReservedAdditionalInfo(initial));
                }
                (Argument::Indefinite, 1)
            }
        };

        Ok(Self {
            major,
            info,
            arg,
            len,
        })
    }

    /// Whether the argument uses the shortest possible encoding.
    ///
    /// Float heads (major 7, ai 25..=27) are always considered minimal here;
    /// float width is a value-level choice.
    pub fn is_minimal(&self) -> bool {
        if self.major == Major::Simple && (AI_TWO_BYTES..=AI_EIGHT_BYTES).contains(&self.info) {
            return true;
        }
        match (self.info, self.arg) {
            (AI_ONE_BYTE, Argument::Value(v)) => v >= 24,
            (AI_TWO_BYTES, Argument::Value(v)) => v > 0xFF,
            (AI_FOUR_BYTES, Argument::Value(v)) => v > 0xFFFF,
            (AI_EIGHT_BYTES, Argument::Value(v)) => v > 0xFFFF_FFFF,
            _ => true,
        }
    }
}

/// Read an `N`-byte big-endian argument following the initial byte.
#[inline]
fn be_arg<const N: usize>(data: &[u8]) -> Result<u64, ReadError> {
    let bytes = data.get(1..1 + N).ok_or(ReadError::UnexpectedEof)?;
    Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_argument() {
        let head = Head::parse(&[0x17]).unwrap();
        assert_eq!(head.major, Major::Unsigned);
        assert_eq!(head.arg, Argument::Value(23));
        assert_eq!(head.len, 1);
    }

    #[test]
    fn multi_byte_arguments() {
        assert_eq!(Head::parse(&[0x18, 0x2A]).unwrap().arg, Argument::Value(42));
        assert_eq!(
            Head::parse(&[0x19, 0x01, 0x00]).unwrap().arg,
            Argument::Value(256)
        );
        assert_eq!(
            Head::parse(&[0x1A, 0x00, 0x01, 0x00, 0x00]).unwrap().arg,
            Argument::Value(65536)
        );
        let head = Head::parse(&[0x3B, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(head.major, Major::Negative);
        assert_eq!(head.arg, Argument::Value(u64::MAX));
        assert_eq!(head.len, 9);
    }

    #[test]
    fn truncated_argument_is_eof() {
        assert_eq!(Head::parse(&[0x18]), Err(ReadError::UnexpectedEof));
        assert_eq!(Head::parse(&[0x1A, 0x00]), Err(ReadError::UnexpectedEof));
        assert_eq!(Head::parse(&[]), Err(ReadError::UnexpectedEof));
    }

    #[test]
    fn reserved_additional_info() {
        for ai in 28u8..=30 {
            let initial = 0xC0 | ai;
            assert_eq!(
                Head::parse(&[initial]),
                Err(ReadError::ReservedAdditionalInfo(initial))
            );
        }
        // 0xDE 0xAD 0xBE 0xEF: tag with reserved ai 30.
        assert!(Head::parse(&[0xDE, 0xAD, 0xBE, 0xEF]).is_err());
    }

    #[test]
    fn indefinite_only_for_containers_and_strings() {
        assert_eq!(Head::parse(&[0x9F]).unwrap().arg, Argument::Indefinite);
        assert_eq!(Head::parse(&[0x5F]).unwrap().arg, Argument::Indefinite);
        assert!(matches!(
            Head::parse(&[0x1F]),
            Err(ReadError::ReservedAdditionalInfo(0x1F))
        ));
        assert!(matches!(
            Head::parse(&[0xDF]),
            Err(ReadError::ReservedAdditionalInfo(0xDF))
        ));
        assert_eq!(Head::parse(&[BREAK]), Err(ReadError::UnexpectedBreak));
    }

    #[test]
    fn minimal_encoding_detection() {
        assert!(Head::parse(&[0x18, 0x18]).unwrap().is_minimal());
        assert!(!Head::parse(&[0x18, 0x17]).unwrap().is_minimal());
        assert!(!Head::parse(&[0x19, 0x00, 0xFF]).unwrap().is_minimal());
        // Half-precision float is not an integer argument.
        assert!(Head::parse(&[0xF9, 0x00, 0x00]).unwrap().is_minimal());
    }
}
