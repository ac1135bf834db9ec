//! Outside chunk identifiers.
//!
//! An outside chunk is named `XXXXZZZZo`: the grid x and z coordinates as
//! 16-bit two's complement values written as four lowercase hex digits each.
//! Inside chunks use any other name (conventionally ending in `i`).

/// Errors decoding a chunk identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentError {
    #[error("identifier {0:?} is too short to hold a grid position")]
    TooShort(String),
    #[error("identifier {0:?} is not an outside chunk")]
    NotOutside(String),
    #[error("identifier {0:?} contains a non-hex digit")]
    BadDigit(String),
}

/// Whether the identifier names an outside chunk.
pub fn is_outside_identifier(identifier: &str) -> bool {
    identifier.ends_with('o')
}

/// Encode a grid position as an outside chunk identifier.
pub fn outside_chunk_identifier(x: i16, z: i16) -> String {
    format!("{:04x}{:04x}o", x as u16, z as u16)
}

/// Decode the grid position from an outside chunk identifier.
///
/// Only the last nine characters are examined, so directory prefixes are
/// tolerated. Upper and lower case hex digits are both accepted.
pub fn grid_from_chunk_name(identifier: &str) -> Result<(i16, i16), IdentError> {
    let bytes = identifier.as_bytes();
    if bytes.len() < 9 {
        return Err(IdentError::TooShort(identifier.to_string()));
    }
    let tail = &bytes[bytes.len() - 9..];
    if tail[8] != b'o' {
        return Err(IdentError::NotOutside(identifier.to_string()));
    }
    let x = decode_hex16(&tail[0..4]).ok_or_else(|| IdentError::BadDigit(identifier.to_string()))?;
    let z = decode_hex16(&tail[4..8]).ok_or_else(|| IdentError::BadDigit(identifier.to_string()))?;
    Ok((x as i16, z as i16))
}

fn decode_hex16(digits: &[u8]) -> Option<u16> {
    digits.iter().try_fold(0u16, |acc, &c| {
        let v = (c as char).to_digit(16)?;
        Some((acc << 4) | v as u16)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_use_twos_complement_hex() {
        assert_eq!(outside_chunk_identifier(0, 0), "00000000o");
        assert_eq!(outside_chunk_identifier(-1, 2), "ffff0002o");
        assert_eq!(outside_chunk_identifier(i16::MIN, i16::MAX), "80007fffo");
    }

    #[test]
    fn every_grid_position_round_trips() {
        for x in (i16::MIN..=i16::MAX).step_by(97) {
            for z in [i16::MIN, -4096, -1, 0, 1, 255, 4095, i16::MAX] {
                let name = outside_chunk_identifier(x, z);
                assert_eq!(grid_from_chunk_name(&name), Ok((x, z)));
            }
        }
        assert_eq!(grid_from_chunk_name("7fff8000o"), Ok((i16::MAX, i16::MIN)));
    }

    #[test]
    fn decoding_accepts_upper_case_and_prefixes() {
        assert_eq!(grid_from_chunk_name("FFFE000Ao"), Ok((-2, 10)));
        assert_eq!(grid_from_chunk_name("sub/dir/0001ffffo"), Ok((1, -1)));
    }

    #[test]
    fn decoding_rejects_malformed_names() {
        assert!(matches!(grid_from_chunk_name("abc"), Err(IdentError::TooShort(_))));
        assert!(matches!(
            grid_from_chunk_name("00000000i"),
            Err(IdentError::NotOutside(_))
        ));
        assert!(matches!(
            grid_from_chunk_name("0000g000o"),
            Err(IdentError::BadDigit(_))
        ));
        assert!(is_outside_identifier("00010002o"));
        assert!(!is_outside_identifier("hall0001i"));
    }
}
