use std::collections::HashMap;

use lazy_static::lazy_static;

/// Code stored after the last character of every pooled string.
pub const STRING_TERMINATOR: u16 = 0;

/// A mapper between printable characters and their 6-bit display codes.
///
/// String literals are lowered through this table before they are placed in
/// the literal pool, and the keyboard handler of the external emulator feeds
/// scancodes through the reverse direction. Letters are case-insensitive.
#[derive(Debug)]
pub struct CharsetMapping {
    forward_map: HashMap<char, u16>,
    reverse_map: HashMap<u16, char>,
}

impl CharsetMapping {
    /// Find the display code of a character, if it has one.
    pub fn encode(&self, c: char) -> Option<u16> {
        self.forward_map.get(&c.to_ascii_lowercase()).copied()
    }

    /// Find the character a display code stands for.
    pub fn decode(&self, code: u16) -> Option<char> {
        self.reverse_map.get(&code).copied()
    }

    fn new() -> Self {
        let mut forward_map = HashMap::new();
        let mut reverse_map = HashMap::new();

        let mut mappings = vec![(' ', 0)];
        // Letters occupy 13..=38, digits 39..=48.
        mappings.extend(('a'..='z').zip(13..));
        mappings.extend(('0'..='9').zip(39..));
        mappings.extend([
            ('+', 49),
            ('-', 50),
            ('*', 51),
            ('/', 52),
            ('_', 53),
            ('<', 54),
            ('>', 55),
            ('=', 56),
            ('(', 57),
            (')', 58),
            ('.', 59),
            (',', 60),
            ('!', 61),
            ('?', 62),
            (':', 63),
        ]);

        for (c, code) in mappings {
            forward_map.insert(c, code);
            reverse_map.insert(code, c);
        }

        Self {
            forward_map,
            reverse_map,
        }
    }
}

lazy_static! {
    /// The character table shared by string literals and keyboard input.
    pub static ref CHARSET: CharsetMapping = CharsetMapping::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        let tests = vec![(' ', 0), ('a', 13), ('z', 38), ('0', 39), ('9', 48), ('+', 49)];
        for (c, expected) in tests {
            assert_eq!(CHARSET.encode(c), Some(expected));
        }
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(CHARSET.encode('A'), CHARSET.encode('a'));
        assert_eq!(CHARSET.encode('Q'), CHARSET.encode('q'));
    }

    #[test]
    fn test_unknown_characters() {
        for c in ['~', '\n', '\t', '§'] {
            assert_eq!(CHARSET.encode(c), None);
        }
    }

    #[test]
    fn test_roundtrip() {
        for code in 0..64 {
            if let Some(c) = CHARSET.decode(code) {
                assert_eq!(CHARSET.encode(c), Some(code));
            }
        }
    }
}
