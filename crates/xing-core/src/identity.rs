//! Crossing code identity: comparison keys and (prefix, number) decomposition

use std::fmt;

/// Prefix used when a code has no leading non-digit run
pub const DEFAULT_PREFIX: &str = "X";

/// Normalize a crossing code into its comparison key.
///
/// Two codes name the same crossing iff their keys are equal.
pub fn crossing_key(code: &str) -> String {
    code.trim().to_uppercase()
}

/// A crossing code split for renumbering arithmetic
///
/// Examples:
/// - "X7" -> ("X", 7)
/// - "CR12" -> ("CR", 12)
/// - "15" -> ("X", 15)
/// - "Xa" -> ("Xa", 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    pub prefix: String,
    pub number: u32,
}

impl IdentityKey {
    /// Parse a crossing code
    pub fn parse(code: &str) -> Self {
        let code = code.trim();
        let split = code
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(code.len());

        let prefix = code[..split].trim();
        let digits: String = code[split..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();

        Self {
            prefix: if prefix.is_empty() {
                DEFAULT_PREFIX.to_string()
            } else {
                prefix.to_string()
            },
            number: digits.parse().unwrap_or(0),
        }
    }

    /// Same prefix, different number
    pub fn with_number(&self, number: u32) -> Self {
        Self {
            prefix: self.prefix.clone(),
            number,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_key_ignores_case_and_padding() {
        assert_eq!(crossing_key(" x7 "), "X7");
        assert_eq!(crossing_key("x7"), crossing_key("X7"));
        assert_ne!(crossing_key("X7"), crossing_key("X70"));
    }

    #[test]
    fn test_parse_prefix_and_number() {
        assert_eq!(IdentityKey::parse("X7"), IdentityKey { prefix: "X".into(), number: 7 });
        assert_eq!(IdentityKey::parse("CR12"), IdentityKey { prefix: "CR".into(), number: 12 });
    }

    #[test]
    fn test_parse_defaults_prefix() {
        let key = IdentityKey::parse("15");
        assert_eq!(key.prefix, "X");
        assert_eq!(key.number, 15);
    }

    #[test]
    fn test_parse_without_digits() {
        let key = IdentityKey::parse("Xa");
        assert_eq!(key.prefix, "Xa");
        assert_eq!(key.number, 0);
    }

    #[test]
    fn test_display_round_trips_simple_codes() {
        assert_eq!(IdentityKey::parse("X7").to_string(), "X7");
        assert_eq!(IdentityKey::parse("X7").with_number(9).to_string(), "X9");
    }
}
