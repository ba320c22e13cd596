//! Stop-bit variable-length integers and length-prefixed string codecs
//! (spec §4.6), implemented over the [`crate::bytes::Bytes`] cursor.

use crate::bytes::Bytes;
use crate::error::{BytesError, Result};

const NULL_MARKER: u8 = 0x80;

/// Writes `n` using stop-bit encoding.
///
/// - `(n & !0x7F) == 0`: single byte `n`.
/// - `n` a small negative (`(!n & !0x7F) == 0`, i.e. representable by the
///   low 7 bits of its complement): `0x80 | !n` followed by a `0x00`
///   terminator.
/// - `(n & !0x3FFF) == 0`: `(n & 0x7F) | 0x80`, then `n >> 7`.
/// - Otherwise: seven bits at a time LSB-first of `|n|`, high bit set on
///   every byte but the last; if `n` was negative, an extra `0x80 |
///   final_septet` byte followed by a `0x00` terminator.
pub fn write_stop_bit(bytes: &mut Bytes, n: i64) -> Result<()> {
    if n & !0x7F == 0 {
        bytes.write_u8(n as u8)?;
        return Ok(());
    }

    if !n & !0x7F == 0 {
        bytes.write_u8(NULL_MARKER | (!n as u8 & 0x7F))?;
        bytes.write_u8(0x00)?;
        return Ok(());
    }

    if n & !0x3FFF == 0 {
        bytes.write_u8((n as u8 & 0x7F) | NULL_MARKER)?;
        bytes.write_u8((n >> 7) as u8)?;
        return Ok(());
    }

    let negative = n < 0;
    let mut value = if negative {
        n.checked_neg().map(|v| v as u64).unwrap_or(n as u64)
    } else {
        n as u64
    };

    loop {
        let septet = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            if negative {
                bytes.write_u8(NULL_MARKER | septet)?;
                bytes.write_u8(0x00)?;
            } else {
                bytes.write_u8(septet)?;
            }
            break;
        }
        bytes.write_u8(NULL_MARKER | septet)?;
    }

    Ok(())
}

/// Writes a non-negative `n` using the same stop-bit scheme as
/// [`write_stop_bit`], specialized to unsigned input (spec §6's "unsigned
/// var-int ≥ 0" wire element).
pub fn write_stop_bit_u64(bytes: &mut Bytes, n: u64) -> Result<()> {
    if n > i64::MAX as u64 {
        return Err(BytesError::InvalidArgument(format!(
            "{n} does not fit in the signed stop-bit range"
        )));
    }
    write_stop_bit(bytes, n as i64)
}

/// Decodes a stop-bit-encoded integer, reversing [`write_stop_bit`].
/// Consuming more than 10 continuation bytes signals *runtime*.
pub fn read_stop_bit(bytes: &mut Bytes) -> Result<i64> {
    let first = bytes.read_u8()?;

    if first & NULL_MARKER == 0 {
        return Ok(first as i64);
    }

    let mut value: i64 = (first & 0x7F) as i64;
    let mut shift = 7;
    let mut continuations = 0;
    let mut septets = 1;

    loop {
        let b = bytes.read_u8()?;
        continuations += 1;
        if continuations > 10 {
            return Err(BytesError::Runtime(
                "stop-bit decode exceeded 10 continuation bytes".into(),
            ));
        }

        if b == 0x00 {
            // Two distinct negative encodings collapse to this terminator:
            // a lone septet (small-negative case) holds `!n` directly, so
            // the bitwise complement recovers `n`; two or more septets
            // (general negative case) hold `n`'s magnitude, so arithmetic
            // negation recovers `n`. `wrapping_neg` handles i64::MIN, whose
            // magnitude's bit pattern already equals i64::MIN itself.
            return Ok(if septets == 1 {
                !value
            } else {
                value.wrapping_neg()
            });
        }

        if shift < 64 {
            value |= ((b & 0x7F) as i64) << shift;
        }
        septets += 1;

        if b & NULL_MARKER == 0 {
            return Ok(value);
        }

        shift += 7;
    }
}

/// Decodes a non-negative stop-bit-encoded integer.
pub fn read_stop_bit_u64(bytes: &mut Bytes) -> Result<u64> {
    let n = read_stop_bit(bytes)?;
    if n < 0 {
        return Err(BytesError::InvalidArgument(format!(
            "decoded stop-bit value {n} is negative"
        )));
    }
    Ok(n as u64)
}

/// Writes `Some(s)` as a var-int length followed by the low 8 bits of each
/// character (characters above `0xFF` become `'?'`), or the two-byte null
/// marker for `None`.
pub fn write_8bit_string(bytes: &mut Bytes, s: Option<&str>) -> Result<()> {
    match s {
        None => write_stop_bit(bytes, -1)?,
        Some(s) => {
            let chars: Vec<u8> = s
                .chars()
                .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
                .collect();
            write_stop_bit(bytes, chars.len() as i64)?;
            bytes.write_bytes(&chars)?;
        }
    }
    Ok(())
}

/// Reads an 8-bit length-prefixed string, or `None` for the null marker.
pub fn read_8bit_string(bytes: &mut Bytes) -> Result<Option<String>> {
    let len = read_stop_bit(bytes)?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(BytesError::InvalidArgument(
            "8-bit string length must be non-negative".into(),
        ));
    }
    let len = len as usize;
    let mut buf = vec![0u8; len];
    bytes.read_bytes(&mut buf)?;
    Ok(Some(buf.into_iter().map(|b| b as char).collect()))
}

/// Writes `Some(s)` as a var-int UTF-8 byte length followed by the UTF-8
/// bytes, or the two-byte null marker for `None`.
///
/// BMP-only contract (spec §9 open question 1, resolved): code points
/// outside `U+0000..=U+FFFF` never arise from a `char`-by-`char` encode of
/// a well-formed Rust `str` the same way the source's 1/2/3-byte-only
/// decoder would reject them, so encoding is plain UTF-8; decoding rejects
/// any 4-byte lead byte rather than silently truncating or accepting it.
pub fn write_utf8_string(bytes: &mut Bytes, s: Option<&str>) -> Result<()> {
    match s {
        None => write_stop_bit(bytes, -1)?,
        Some(s) => {
            let utf8 = s.as_bytes();
            write_stop_bit(bytes, utf8.len() as i64)?;
            bytes.write_bytes(utf8)?;
        }
    }
    Ok(())
}

/// Reads a UTF-8 length-prefixed string, or `None` for the null marker.
/// Rejects a 4-byte lead byte (`0xF0..=0xF7`) with a decode error rather
/// than silently truncating or extending to full Unicode.
pub fn read_utf8_string(bytes: &mut Bytes) -> Result<Option<String>> {
    let len = read_stop_bit(bytes)?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(BytesError::InvalidArgument(
            "UTF-8 string length must be non-negative".into(),
        ));
    }
    let len = len as usize;
    let mut buf = vec![0u8; len];
    bytes.read_bytes(&mut buf)?;

    if let Some(&lead) = buf.iter().find(|&&b| (0xF0..=0xF7).contains(&b)) {
        return Err(BytesError::Unsupported(format!(
            "4-byte UTF-8 sequence (lead byte 0x{lead:02x}) is outside the BMP-only contract"
        )));
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| BytesError::InvalidArgument(format!("invalid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BytesStore;

    fn roundtrip(n: i64) -> i64 {
        let mut bytes = Bytes::new(BytesStore::native_elastic(16).unwrap());
        write_stop_bit(&mut bytes, n).unwrap();
        bytes.set_read_position(0).unwrap();
        read_stop_bit(&mut bytes).unwrap()
    }

    #[test]
    fn stop_bit_boundary_table() {
        for &n in &[
            i64::MIN,
            -16384,
            -1,
            0,
            1,
            63,
            64,
            127,
            128,
            16383,
            16384,
            i64::MAX,
        ] {
            assert_eq!(roundtrip(n), n, "round-trip failed for {n}");
        }
    }

    #[test]
    fn null_marker_is_two_bytes() {
        let mut bytes = Bytes::new(BytesStore::native_elastic(16).unwrap());
        write_8bit_string(&mut bytes, None).unwrap();
        assert_eq!(bytes.write_position(), 2);
        bytes.set_read_position(0).unwrap();
        assert_eq!(read_8bit_string(&mut bytes).unwrap(), None);
    }

    #[test]
    fn utf8_round_trip_s2() {
        let s = "h\u{e9}llo, \u{4e16}\u{754c}";
        let mut bytes = Bytes::new(BytesStore::native_elastic(32).unwrap());
        write_utf8_string(&mut bytes, Some(s)).unwrap();
        bytes.set_read_position(0).unwrap();
        let utf8_len = read_stop_bit_prefix_len(&mut bytes);
        assert_eq!(utf8_len, s.as_bytes().len() as i64);

        bytes.set_read_position(0).unwrap();
        assert_eq!(read_utf8_string(&mut bytes).unwrap().as_deref(), Some(s));
    }

    fn read_stop_bit_prefix_len(bytes: &mut Bytes) -> i64 {
        read_stop_bit(bytes).unwrap()
    }

    #[test]
    fn utf8_rejects_four_byte_sequence() {
        let mut bytes = Bytes::new(BytesStore::native_elastic(16).unwrap());
        // U+1F600 GRINNING FACE, a 4-byte sequence, written raw (bypassing
        // the encoder, which would never emit it from a `char` this way,
        // to exercise the decoder's rejection path directly).
        let utf8 = "\u{1F600}".as_bytes().to_vec();
        write_stop_bit(&mut bytes, utf8.len() as i64).unwrap();
        bytes.write_bytes(&utf8).unwrap();

        bytes.set_read_position(0).unwrap();
        assert!(read_utf8_string(&mut bytes).is_err());
    }

    #[test]
    fn eight_bit_string_replaces_non_latin1_with_question_mark() {
        let mut bytes = Bytes::new(BytesStore::native_elastic(16).unwrap());
        write_8bit_string(&mut bytes, Some("a\u{4e16}b")).unwrap();
        bytes.set_read_position(0).unwrap();
        assert_eq!(read_8bit_string(&mut bytes).unwrap().as_deref(), Some("a?b"));
    }

    #[test]
    fn too_many_continuation_bytes_is_runtime_error() {
        let mut bytes = Bytes::new(BytesStore::native_elastic(16).unwrap());
        for _ in 0..12 {
            bytes.write_u8(0xFF).unwrap();
        }
        bytes.write_u8(0x01).unwrap();
        bytes.set_read_position(0).unwrap();
        assert!(matches!(read_stop_bit(&mut bytes), Err(BytesError::Runtime(_))));
    }
}
