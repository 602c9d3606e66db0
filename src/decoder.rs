use crate::config::OddLengthPolicy;
use crate::error::{DecodeError, Result};

/// Bytes decoded from the hex argument, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCodeBuffer {
    bytes: Vec<u8>,
}

impl RawCodeBuffer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// Decode a hex string into a code buffer.
///
/// Byte `i` is the value of the two digits at offset `2i`. An odd trailing
/// nibble is rejected unless `policy` is [`OddLengthPolicy::Truncate`].
pub fn decode(input: &str, policy: OddLengthPolicy) -> Result<RawCodeBuffer> {
    let digits = input.as_bytes();

    let even = if digits.len() % 2 == 1 {
        match policy {
            OddLengthPolicy::Reject => {
                return Err(DecodeError::OddLength {
                    length: digits.len(),
                }
                .into())
            }
            OddLengthPolicy::Truncate => {
                log::warn!(
                    "Odd-length hex input ({} digits), dropping the final nibble",
                    digits.len()
                );
                &digits[..digits.len() - 1]
            }
        }
    } else {
        digits
    };

    if even.is_empty() {
        return Err(DecodeError::Empty.into());
    }

    let bytes = hex::decode(even).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => DecodeError::InvalidInput {
            character: c,
            index,
        },
        hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => {
            DecodeError::OddLength {
                length: even.len(),
            }
        }
    })?;

    log::debug!("Decoded {} bytes of code", bytes.len());
    Ok(RawCodeBuffer { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    fn decode_err(input: &str, policy: OddLengthPolicy) -> DecodeError {
        match decode(input, policy) {
            Err(HarnessError::Decode(e)) => e,
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_pairs_in_order() {
        let buf = decode("31c0c3", OddLengthPolicy::Reject).unwrap();
        assert_eq!(buf.as_bytes(), &[0x31, 0xc0, 0xc3]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_byte_matches_digit_pair_at_offset() {
        let input = "00017f80feFF0a";
        let buf = decode(input, OddLengthPolicy::Reject).unwrap();
        assert_eq!(buf.len(), input.len() / 2);
        for (i, byte) in buf.as_bytes().iter().enumerate() {
            let pair = &input[2 * i..2 * i + 2];
            assert_eq!(*byte, u8::from_str_radix(pair, 16).unwrap(), "pair {}", pair);
        }
    }

    #[test]
    fn test_decode_mixed_case() {
        let buf = decode("CcaBcD", OddLengthPolicy::Reject).unwrap();
        assert_eq!(buf.as_bytes(), &[0xcc, 0xab, 0xcd]);
    }

    #[test]
    fn test_odd_length_rejected_by_default() {
        assert_eq!(
            decode_err("31c0c", OddLengthPolicy::Reject),
            DecodeError::OddLength { length: 5 }
        );
    }

    #[test]
    fn test_odd_length_truncated_on_request() {
        let buf = decode("31c0c", OddLengthPolicy::Truncate).unwrap();
        assert_eq!(buf.as_bytes(), &[0x31, 0xc0]);
    }

    #[test]
    fn test_single_nibble_truncates_to_empty() {
        assert_eq!(decode_err("c", OddLengthPolicy::Truncate), DecodeError::Empty);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(decode_err("", OddLengthPolicy::Reject), DecodeError::Empty);
    }

    #[test]
    fn test_invalid_character_reports_offset() {
        assert_eq!(
            decode_err("31zz", OddLengthPolicy::Reject),
            DecodeError::InvalidInput {
                character: 'z',
                index: 2
            }
        );
    }

    #[test]
    fn test_truncation_never_splits_multibyte_char() {
        // 'é' is two bytes, so the input length is odd and the cut lands mid-char
        let err = decode_err("0é", OddLengthPolicy::Truncate);
        assert!(matches!(err, DecodeError::InvalidInput { index: 1, .. }));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let a = decode("b82a000000c3", OddLengthPolicy::Reject).unwrap();
        let b = decode("b82a000000c3", OddLengthPolicy::Reject).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), "b82a000000c3");
    }
}
