//! Static translation from MonetDB's SQLSTATE-like error prefixes to the
//! typed error kinds in [`crate::error::Error`].

use crate::error::Error;

/// (prefix, kind-constructor) pairs, checked in order. The prefix includes the
/// trailing `!` the server always emits after the 5-character SQLSTATE code.
const TABLE: &[(&str, fn(String) -> Error)] = &[
    ("42S02!", Error::Operational), // no such table
    ("M0M29!", Error::Integrity),   // UNIQUE constraint violated
    ("2D000!", Error::Integrity),   // COMMIT failed
    ("40000!", Error::Integrity),   // FOREIGN KEY constraint violated on DROP
];

/// Map a server error string to a typed `Error`, stripping the SQLSTATE prefix
/// when recognized. Unrecognized or too-short strings become `Operational`
/// with the text untouched — the same fallback the reference client uses.
pub fn handle_error(text: &str) -> Error {
    if text.len() > 6 {
        let prefix = &text[..6];
        for (key, kind) in TABLE {
            if *key == prefix {
                return kind(text[6..].to_string());
            }
        }
    }
    Error::Operational(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_prefixes() {
        assert!(matches!(
            handle_error("42S02!no such table"),
            Error::Operational(m) if m == "no such table"
        ));
        assert!(matches!(
            handle_error("M0M29!dup key"),
            Error::Integrity(m) if m == "dup key"
        ));
        assert!(matches!(
            handle_error("2D000!commit failed"),
            Error::Integrity(m) if m == "commit failed"
        ));
        assert!(matches!(
            handle_error("40000!fk violated"),
            Error::Integrity(m) if m == "fk violated"
        ));
    }

    #[test]
    fn falls_back_to_operational_for_unknown_or_short_text() {
        assert!(matches!(handle_error("FOO"), Error::Operational(m) if m == "FOO"));
        assert!(matches!(
            handle_error("ZZZZZZ!whatever"),
            Error::Operational(m) if m == "ZZZZZZ!whatever"
        ));
        // exactly 6 chars: len() > 6 is false, so no stripping happens.
        assert!(matches!(handle_error("42S02!"), Error::Operational(m) if m == "42S02!"));
    }
}
