//! Code page 437, the legacy 8-bit text encoding spoken by servers without unicode support.
//!
//! Bytes below `0x80` are plain ASCII; the upper half maps through [`HIGH_HALF`].

const HIGH_HALF: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

pub fn decode_byte(byte: u8) -> char {
    if byte < 0x80 {
        byte as char
    } else {
        HIGH_HALF[(byte - 0x80) as usize]
    }
}

pub fn encode_char(c: char) -> Option<u8> {
    if c.is_ascii() {
        return Some(c as u8);
    }
    HIGH_HALF
        .iter()
        .position(|&candidate| candidate == c)
        .map(|index| 0x80 + index as u8)
}

pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| decode_byte(b)).collect()
}

/// Encodes `text`, substituting `fallback` for characters outside the code page.
/// Returns the bytes and whether any substitution happened.
pub fn encode(text: &str, fallback: u8) -> (Vec<u8>, bool) {
    let mut lossy = false;
    let bytes = text
        .chars()
        .map(|c| {
            encode_char(c).unwrap_or_else(|| {
                lossy = true;
                fallback
            })
        })
        .collect();
    (bytes, lossy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(decode(b"Hello, world"), "Hello, world");
        assert_eq!(encode("Hello", b'?'), (b"Hello".to_vec(), false));
    }

    #[test]
    fn upper_half_maps_both_ways() {
        for byte in 0x80..=0xFFu8 {
            let c = decode_byte(byte);
            assert_eq!(encode_char(c), Some(byte));
        }
    }

    #[test]
    fn unrepresentable_text_uses_fallback() {
        let (bytes, lossy) = encode("a日b", b'?');
        assert!(lossy);
        assert_eq!(bytes, b"a?b");
    }
}
