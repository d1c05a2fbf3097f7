// Reference decoder adapter.
//
// Wraps `ciborium`, decoding into its dynamic `Value`. Every failure mode
// collapses to `Outcome::Rejected`; the error itself only reaches the trace
// log.
//
// `ciborium` accepts the two-byte form of simple values below 32 (`F8 00`
// through `F8 1F`), which is not well-formed CBOR. Accepted items are walked
// once more at the header level to reject that encoding.

use ciborium::Value;
use ciborium_ll::{Decoder as HeaderDecoder, Header};

use crate::oracle::{Decoder, Outcome};

/// Default recursion limit for the reference decoder.
///
/// Kept below the implementation under test's limit so depth alone never
/// makes the reference the more permissive side.
pub const DEFAULT_REFERENCE_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct ReferenceDecoder {
    max_depth: usize,
}

impl ReferenceDecoder {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl Default for ReferenceDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_DEPTH)
    }
}

impl Decoder for ReferenceDecoder {
    fn name(&self) -> &str {
        "reference"
    }

    fn decode(&self, input: &[u8]) -> Outcome {
        let mut rest = input;
        match ciborium::de::from_reader_with_recursion_limit::<Value, _>(&mut rest, self.max_depth)
        {
            Ok(_) if !rest.is_empty() => {
                log::trace!("reference: {} bytes of trailing data", rest.len());
                Outcome::Rejected
            }
            Ok(_) => match find_long_form_simple(input) {
                Some(offset) => {
                    log::trace!("reference: two-byte simple value below 32 at offset {offset}");
                    Outcome::Rejected
                }
                None => Outcome::Accepted,
            },
            Err(e) => {
                log::trace!("reference: {e:?}");
                Outcome::Rejected
            }
        }
    }
}

/// Offset of the first `F8 nn` head with `nn < 32` in a well-formed item.
fn find_long_form_simple(input: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while pos < input.len() {
        let mut decoder = HeaderDecoder::from(&input[pos..]);
        let header = decoder.pull().ok()?;
        let head_len = decoder.offset();
        match header {
            Header::Simple(v) if v < 32 && head_len == 2 => return Some(pos),
            Header::Bytes(Some(len)) | Header::Text(Some(len)) => {
                pos = pos.saturating_add(head_len).saturating_add(len);
            }
            _ => pos += head_len,
        }
        if head_len == 0 {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(input: &[u8]) -> Outcome {
        ReferenceDecoder::default().decode(input)
    }

    #[test]
    fn accepts_seed_encodings() {
        assert_eq!(decode(&[0x81, 0x18, 0x2A]), Outcome::Accepted);
        assert_eq!(decode(&[0x18, 0x2A]), Outcome::Accepted);
        assert_eq!(
            decode(&[0xA1, 0x63, 0x66, 0x6F, 0x6F, 0x0A]),
            Outcome::Accepted
        );
    }

    #[test]
    fn rejects_garbage_truncation_and_empty() {
        assert_eq!(decode(&[0xDE, 0xAD, 0xBE, 0xEF]), Outcome::Rejected);
        assert_eq!(decode(&[0x18]), Outcome::Rejected);
        assert_eq!(decode(&[]), Outcome::Rejected);
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert_eq!(decode(&[0x18, 0x2A, 0x00]), Outcome::Rejected);
    }

    #[test]
    fn rejects_two_byte_simple_below_32() {
        // false, null and undefined in their two-byte form
        assert_eq!(decode(&[0xF8, 0x14]), Outcome::Rejected);
        assert_eq!(decode(&[0xF8, 0x16]), Outcome::Rejected);
        assert_eq!(decode(&[0xF8, 0x17]), Outcome::Rejected);
        // nested inside a map value
        assert_eq!(
            decode(&[0xA1, 0xF8, 0x16, 0x43, 0x66, 0x6F, 0x0A]),
            Outcome::Rejected
        );
        assert_eq!(decode(&[0xF4]), Outcome::Accepted);
        assert_eq!(decode(&[0x82, 0xF6, 0xF7]), Outcome::Accepted);
    }

    #[test]
    fn string_payloads_are_not_scanned_as_heads() {
        // F8 14 appears inside a byte string and a text chunk
        assert_eq!(decode(&[0x42, 0xF8, 0x14]), Outcome::Accepted);
        assert_eq!(
            decode(&[0x5F, 0x42, 0xF8, 0x14, 0x41, 0x00, 0xFF]),
            Outcome::Accepted
        );
        assert_eq!(find_long_form_simple(&[0x82, 0x00, 0xF8, 0x14]), Some(2));
    }

    #[test]
    fn recursion_limit_applies() {
        let mut deep = vec![0x81; 200];
        deep.push(0x00);
        assert_eq!(decode(&deep), Outcome::Rejected);
        assert_eq!(
            ReferenceDecoder::new(256).decode(&deep),
            Outcome::Accepted
        );
    }
}
