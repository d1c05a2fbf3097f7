// Nested CBOR item validation.
//
// Walks exactly one data item, checking structure, lengths, UTF-8 and
// nesting depth. Nothing is allocated for values; strict mode allocates a
// small key set per map to detect duplicates.
//
// Non-strict mode is the profile exported as `cbor_from_slice`: any
// well-formed item is accepted, including non-minimal arguments, duplicate
// map keys, unassigned simple values and trailing bytes after the item.

use std::collections::HashSet;

use thiserror::Error;

use super::MAX_NESTING_LEVEL;
use super::head::{AI_ONE_BYTE, Argument, BREAK, Head, Major};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("reserved additional info in initial byte {0:#04X}")]
    ReservedAdditionalInfo(u8),
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),
    #[error("text string is not valid UTF-8")]
    InvalidUtf8,
    #[error("break code outside an indefinite-length item")]
    UnexpectedBreak,
    #[error("invalid chunk in indefinite-length string")]
    InvalidChunk,
    #[error("argument not in shortest form")]
    NonMinimalEncoding,
    #[error("indefinite-length item not allowed")]
    IndefiniteLength,
    #[error("duplicate map key")]
    DuplicateKey,
    #[error("simple value {0} not supported")]
    UnsupportedSimple(u8),
    #[error("{0} bytes of extraneous data")]
    ExtraneousData(usize),
    #[error("length does not fit in memory")]
    LengthOverflow,
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Acceptance profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Accept any well-formed item.
    #[default]
    NonStrict,
    /// Additionally require shortest-form arguments, definite lengths,
    /// unique map keys, assigned simple values and no trailing data.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of nested arrays, maps and tags.
    pub max_depth: usize,
    pub strictness: Strictness,
}

impl Limits {
    pub const fn non_strict() -> Self {
        Self {
            max_depth: MAX_NESTING_LEVEL,
            strictness: Strictness::NonStrict,
        }
    }

    pub const fn strict() -> Self {
        Self {
            max_depth: MAX_NESTING_LEVEL,
            strictness: Strictness::Strict,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::non_strict()
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Validate the first data item in `data`.
///
/// Returns the number of bytes the item occupies. In strict mode any bytes
/// after the item are an error.
pub fn read(data: &[u8], limits: &Limits) -> Result<usize, ReadError> {
    let mut reader = Reader::new(data, *limits);
    reader.read_item(0)?;
    let consumed = reader.position();
    if limits.strictness == Strictness::Strict && consumed != data.len() {
        return Err(ReadError::ExtraneousData(data.len() - consumed));
    }
    Ok(consumed)
}

/// Cursor over an encoded buffer.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    limits: Limits,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], limits: Limits) -> Self {
        Self {
            data,
            pos: 0,
            limits,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    fn strict(&self) -> bool {
        self.limits.strictness == Strictness::Strict
    }

    fn next_head(&mut self) -> Result<Head, ReadError> {
        let head = Head::parse(&self.data[self.pos..])?;
        if self.strict() && !head.is_minimal() {
            return Err(ReadError::NonMinimalEncoding);
        }
        self.pos += head.len;
        Ok(head)
    }

    /// Consume `len` bytes, returning them.
    fn take(&mut self, len: u64) -> Result<&'a [u8], ReadError> {
        let len = usize::try_from(len).map_err(|_| ReadError::LengthOverflow)?;
        if len > self.remaining() {
            return Err(ReadError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Consume a break code if one is next.
    fn eat_break(&mut self) -> Result<bool, ReadError> {
        match self.data.get(self.pos) {
            Some(&BREAK) => {
                self.pos += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ReadError::UnexpectedEof),
        }
    }

    fn enter(&self, depth: usize) -> Result<usize, ReadError> {
        if depth >= self.limits.max_depth {
            return Err(ReadError::NestingTooDeep(self.limits.max_depth));
        }
        Ok(depth + 1)
    }

    /// Validate one complete item. `depth` counts enclosing containers.
    pub fn read_item(&mut self, depth: usize) -> Result<(), ReadError> {
        let head = self.next_head()?;
        match head.major {
            Major::Unsigned | Major::Negative => Ok(()),
            Major::Bytes | Major::Text => self.read_string(head),
            Major::Array => {
                let depth = self.enter(depth)?;
                match head.arg {
                    Argument::Value(count) => {
                        // Every element occupies at least one byte.
                        if count > self.remaining() as u64 {
                            return Err(ReadError::UnexpectedEof);
                        }
                        for _ in 0..count {
                            self.read_item(depth)?;
                        }
                        Ok(())
                    }
                    Argument::Indefinite => {
                        self.check_indefinite()?;
                        while !self.eat_break()? {
                            self.read_item(depth)?;
                        }
                        Ok(())
                    }
                }
            }
            Major::Map => {
                let depth = self.enter(depth)?;
                self.read_map(head.arg, depth)
            }
            Major::Tag => {
                let depth = self.enter(depth)?;
                self.read_item(depth)
            }
            Major::Simple => self.read_simple(head),
        }
    }

    fn check_indefinite(&self) -> Result<(), ReadError> {
        if self.strict() {
            return Err(ReadError::IndefiniteLength);
        }
        Ok(())
    }

    fn read_string(&mut self, head: Head) -> Result<(), ReadError> {
        match head.arg {
            Argument::Value(len) => {
                let bytes = self.take(len)?;
                if head.major == Major::Text {
                    std::str::from_utf8(bytes).map_err(|_| ReadError::InvalidUtf8)?;
                }
                Ok(())
            }
            Argument::Indefinite => {
                self.check_indefinite()?;
                while !self.eat_break()? {
                    let chunk = self.next_head()?;
                    if chunk.major != head.major {
                        return Err(ReadError::InvalidChunk);
                    }
                    match chunk.arg {
                        Argument::Value(_) => self.read_string(chunk)?,
                        Argument::Indefinite => return Err(ReadError::InvalidChunk),
                    }
                }
                Ok(())
            }
        }
    }

    fn read_map(&mut self, arg: Argument, depth: usize) -> Result<(), ReadError> {
        let mut keys: Option<HashSet<&'a [u8]>> = self.strict().then(HashSet::new);

        match arg {
            Argument::Value(count) => {
                // Every entry occupies at least two bytes.
                if count.saturating_mul(2) > self.remaining() as u64 {
                    return Err(ReadError::UnexpectedEof);
                }
                for _ in 0..count {
                    self.read_entry(depth, keys.as_mut())?;
                }
            }
            Argument::Indefinite => {
                self.check_indefinite()?;
                while !self.eat_break()? {
                    self.read_entry(depth, keys.as_mut())?;
                }
            }
        }
        Ok(())
    }

    fn read_entry(
        &mut self,
        depth: usize,
        keys: Option<&mut HashSet<&'a [u8]>>,
    ) -> Result<(), ReadError> {
        let start = self.pos;
        self.read_item(depth)?;
        if let Some(keys) = keys {
            // Strict items are definite and shortest-form, so equal keys
            // have equal encodings.
            if !keys.insert(&self.data[start..self.pos]) {
                return Err(ReadError::DuplicateKey);
            }
        }
        self.read_item(depth)
    }

    fn read_simple(&mut self, head: Head) -> Result<(), ReadError> {
        match (head.info, head.arg) {
            // false, true, null, undefined
            (20..=23, _) => Ok(()),
            (0..=19, Argument::Value(v)) if !self.strict() => {
                log::trace!("unassigned simple value {v}");
                Ok(())
            }
            (AI_ONE_BYTE, Argument::Value(v)) => {
                let v = v as u8;
                // Two-byte encodings of values below 32 are not well-formed.
                if v < 32 || self.strict() {
                    return Err(ReadError::UnsupportedSimple(v));
                }
                Ok(())
            }
            (0..=19, Argument::Value(v)) => Err(ReadError::UnsupportedSimple(v as u8)),
            // Half, single and double precision floats.
            _ => Ok(()),
        }
    }
}
