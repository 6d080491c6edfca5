//! DVB-SI text fields (EN 300 468 annex A).
//!
//! A leading byte below 0x20 selects the character table for the rest of the
//! field. Anything else is decoded whole with the default table, which here is
//! ISO-8859-9 (Latin-5, Turkish) as broadcast on Türksat.

use encoding_rs::Encoding;

const CR_LF: u8 = 0x8A;

fn table_for(selector: u8) -> &'static Encoding {
    match selector {
        0x01 => encoding_rs::ISO_8859_5,
        0x02 => encoding_rs::ISO_8859_6,
        0x03 => encoding_rs::ISO_8859_7,
        0x04 => encoding_rs::ISO_8859_8,
        0x05 => default_table(),
        0x09 => encoding_rs::ISO_8859_13,
        // ISO-8859-1 is decoded as its superset windows-1252
        0x10 => encoding_rs::WINDOWS_1252,
        0x11 => encoding_rs::UTF_16BE,
        0x15 => encoding_rs::UTF_8,
        _ => default_table(),
    }
}

/// ISO-8859-9 is decoded as its superset windows-1254.
fn default_table() -> &'static Encoding {
    encoding_rs::WINDOWS_1254
}

fn is_single_byte(encoding: &'static Encoding) -> bool {
    encoding != encoding_rs::UTF_8 && encoding != encoding_rs::UTF_16BE
}

/// Decode a DVB text field. Invalid sequences become U+FFFD; this never fails.
pub fn decode_text(data: &[u8]) -> String {
    let Some(&first) = data.first() else {
        return String::new();
    };

    let (encoding, body) = if first < 0x20 {
        (table_for(first), &data[1..])
    } else {
        (default_table(), data)
    };

    let mut text = if is_single_byte(encoding) {
        // 0x80..=0x9F are DVB control codes in the single-byte tables, not
        // the glyphs the windows code pages put there.
        let mut bytes = Vec::with_capacity(body.len());
        for &b in body {
            match b {
                CR_LF => bytes.push(b'\n'),
                0x80..=0x9F => {}
                _ => bytes.push(b),
            }
        }
        encoding.decode_without_bom_handling(&bytes).0.into_owned()
    } else {
        encoding.decode_without_bom_handling(body).0.into_owned()
    };

    text.retain(|c| {
        let cp = c as u32;
        if cp == 0x0A {
            return true;
        }
        !(cp <= 0x1F
            || cp == 0x7F
            || (0x80..=0x9F).contains(&cp)
            || (0xE080..=0xE09F).contains(&cp))
    });
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(decode_text(&[]), "");
        assert_eq!(decode_text(&[0x05]), "");
    }

    #[test]
    fn test_default_table_is_turkish() {
        // 0xDD = İ, 0xFE = ş, 0xF0 = ğ in ISO-8859-9
        assert_eq!(decode_text(&[0xDD, b'z', b'm', b'i', b'r']), "İzmir");
        assert_eq!(decode_text(b"Da\xf0 ba\xfe\xfd"), "Dağ başı");
    }

    #[test]
    fn test_unknown_selector_uses_default_table() {
        assert_eq!(decode_text(&[0x0B, 0xDD]), "İ");
    }

    #[test]
    fn test_cyrillic() {
        // 0xBF 0xE0 0xD8 = "При" in ISO-8859-5
        assert_eq!(decode_text(&[0x01, 0xBF, 0xE0, 0xD8]), "При");
    }

    #[test]
    fn test_greek() {
        // 0xC1 = Α in ISO-8859-7
        assert_eq!(decode_text(&[0x03, 0xC1]), "Α");
    }

    #[test]
    fn test_arabic() {
        // 0xC7 = ا, 0xE4 = ل in ISO-8859-6
        assert_eq!(decode_text(&[0x02, 0xC7, 0xE4]), "ال");
    }

    #[test]
    fn test_hebrew() {
        // 0xE0 = א, 0xE1 = ב in ISO-8859-8
        assert_eq!(decode_text(&[0x04, 0xE0, 0xE1]), "אב");
    }

    #[test]
    fn test_explicit_latin5_selector() {
        assert_eq!(decode_text(&[0x05, 0xDD, b'z', b'm', b'i', b'r']), "İzmir");
        assert_eq!(decode_text(&[0x05, b'D', b'a', 0xF0]), "Dağ");
    }

    #[test]
    fn test_baltic() {
        // 0xD0 = Š in ISO-8859-13, where ISO-8859-9 has Ğ
        let mut data = vec![0x09, 0xD0];
        data.extend_from_slice(b"iauliai");
        assert_eq!(decode_text(&data), "Šiauliai");
    }

    #[test]
    fn test_latin1() {
        assert_eq!(decode_text(&[0x10, b'c', b'a', b'f', 0xE9]), "café");
    }

    #[test]
    fn test_utf8() {
        let mut data = vec![0x15];
        data.extend_from_slice("Gönül Dağı".as_bytes());
        assert_eq!(decode_text(&data), "Gönül Dağı");
    }

    #[test]
    fn test_utf8_invalid_is_replaced() {
        assert_eq!(decode_text(&[0x15, b'A', 0xFF, b'B']), "A\u{FFFD}B");
    }

    #[test]
    fn test_utf16_be() {
        assert_eq!(decode_text(&[0x11, 0x00, 0x48, 0x01, 0x5F]), "Hş");
    }

    #[test]
    fn test_utf16_odd_length_is_lossy() {
        let text = decode_text(&[0x11, 0x00, 0x41, 0x00]);
        assert!(text.starts_with('A'));
    }

    #[test]
    fn test_control_codes_removed() {
        // 0x86/0x87 emphasis on/off, 0x8A line break
        let data = [b'A', 0x86, b'B', 0x87, 0x8A, b'C'];
        assert_eq!(decode_text(&data), "AB\nC");
    }

    #[test]
    fn test_c0_controls_removed_and_trimmed() {
        assert_eq!(decode_text(&[0x15, b' ', b'A', 0x09, b'B', b' ']), "AB");
    }
}
