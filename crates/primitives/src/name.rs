use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;

/// A 64-bit base-32 chain name, used for accounts, scopes, tables and
/// permissions alike.
///
/// The text form packs up to 12 characters of `.12345a-z` at 5 bits each into
/// the high 60 bits, plus an optional 13th character restricted to the first
/// 16 symbols in the low 4 bits. Comparison order is the order of the packed
/// `u64`, which sorts names with their text form.
///
/// `Name::default()` is the empty name. It doubles as the "unset" sentinel in
/// the API: an unset payer on update means "keep the current payer".
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Name(u64);

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

fn char_to_symbol(c: u8) -> Option<u64> {
    match c {
        b'a'..=b'z' => Some((c - b'a') as u64 + 6),
        b'1'..=b'5' => Some((c - b'1') as u64 + 1),
        b'.' => Some(0),
        _ => None,
    }
}

impl Name {
    pub const EMPTY: Self = Self(0);

    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseNameError {
    #[error("name is longer than 13 characters")]
    TooLong,
    #[error("character `{0}` is not in the name alphabet `.12345a-z`")]
    InvalidChar(char),
    #[error("13th name character must be one of `.12345a-j`")]
    InvalidTailChar(char),
}

impl FromStr for Name {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() > 13 {
            return Err(ParseNameError::TooLong);
        }
        let mut value = 0u64;
        for (i, &c) in bytes.iter().enumerate() {
            let sym = char_to_symbol(c).ok_or(ParseNameError::InvalidChar(c as char))?;
            if i < 12 {
                value |= (sym & 0x1f) << (64 - 5 * (i + 1));
            } else {
                // The tail character only has 4 bits to live in.
                if sym > 0x0f {
                    return Err(ParseNameError::InvalidTailChar(c as char));
                }
                value |= sym;
            }
        }
        Ok(Self(value))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = [b'.'; 13];
        let mut v = self.0;
        for i in (0..13).rev() {
            if i == 12 {
                chars[i] = CHARMAP[(v & 0x0f) as usize];
                v >>= 4;
            } else {
                chars[i] = CHARMAP[(v & 0x1f) as usize];
                v >>= 5;
            }
        }
        let trimmed = chars.iter().rposition(|&c| c != b'.').map_or(0, |p| p + 1);
        // The packed form is always valid UTF-8.
        f.write_str(core::str::from_utf8(&chars[..trimmed]).unwrap())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0);
    }
}

impl nohash_hasher::IsEnabled for Name {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn packs_single_char() {
        // 'a' is symbol 6, placed in the top 5 bits.
        assert_eq!(name("a").raw(), 6 << 59);
        assert_eq!(name("").raw(), 0);
        assert!(name("").is_empty());
    }

    #[test]
    fn trims_trailing_dots_only() {
        assert_eq!(name("a.b").to_string(), "a.b");
        assert_eq!(name("a..").to_string(), "a");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("0abc".parse::<Name>(), Err(ParseNameError::InvalidChar('0')));
        assert_eq!(
            "abcdefghijklmn".parse::<Name>(),
            Err(ParseNameError::TooLong)
        );
        assert_eq!(
            "aaaaaaaaaaaaz".parse::<Name>(),
            Err(ParseNameError::InvalidTailChar('z'))
        );
    }

    #[test]
    fn tail_char_is_accepted() {
        let n = name("aaaaaaaaaaaaj");
        assert_eq!(n.to_string(), "aaaaaaaaaaaaj");
    }

    proptest! {
        #[test]
        fn prop_round_trip(s in "[a-z1-5][a-z1-5.]{0,10}[a-z1-5]") {
            let n: Name = s.parse().unwrap();
            prop_assert_eq!(n.to_string(), s);
        }

        #[test]
        fn prop_order_matches_text(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
            let (na, nb) = (name(&a), name(&b));
            // 5-bit packing is order-preserving for same-alphabet names.
            prop_assert_eq!(na.cmp(&nb), a.cmp(&b));
        }
    }
}
