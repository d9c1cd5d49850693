//! Identifier ↔ filename mapping
//!
//! Identifiers are URN-like keys (`1234:567`). The filesystem form replaces
//! every `:` with `-`, and the reverse replaces every `-` with `:`.
//! Identifiers that already contain `-` therefore do not survive the round
//! trip; [`round_trips`] detects them so callers can report the collision.

/// Character that cannot appear in stored filenames
pub const RESERVED: char = ':';

/// Filename stand-in for [`RESERVED`]
pub const SUBSTITUTE: char = '-';

pub fn identifier_to_filename(identifier: &str) -> String {
    identifier.replace(RESERVED, &SUBSTITUTE.to_string())
}

pub fn filename_to_identifier(filename: &str) -> String {
    filename.replace(SUBSTITUTE, &RESERVED.to_string())
}

/// Whether `identifier` comes back unchanged from a filename round trip.
pub fn round_trips(identifier: &str) -> bool {
    !identifier.contains(SUBSTITUTE)
}

/// Strip a resolver prefix: `https://host/resolve?urn=1234:5` → `1234:5`.
///
/// Plain identifiers pass through unchanged.
pub fn normalize_query_identifier(raw: &str) -> &str {
    raw.rsplit('=').next().unwrap_or(raw).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_basic_mapping() {
        assert_eq!(identifier_to_filename("1234:567"), "1234-567");
        assert_eq!(filename_to_identifier("1234-567"), "1234:567");
        assert_eq!(identifier_to_filename("plain"), "plain");
    }

    #[test]
    fn test_round_trip_random_identifiers() {
        let alphabet: Vec<char> = "abcXYZ0123456789:._".chars().collect();
        let mut rng = StdRng::seed_from_u64(17);

        for _ in 0..500 {
            let len = rng.gen_range(1..24);
            let id: String = (0..len)
                .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                .collect();
            assert!(round_trips(&id));
            assert_eq!(filename_to_identifier(&identifier_to_filename(&id)), id);
        }
    }

    #[test]
    fn test_hyphenated_identifier_is_ambiguous() {
        let id = "urn:abc-def";
        assert!(!round_trips(id));
        assert_ne!(filename_to_identifier(&identifier_to_filename(id)), id);
    }

    #[test]
    fn test_normalize_query_identifier() {
        assert_eq!(normalize_query_identifier("1234:567"), "1234:567");
        assert_eq!(
            normalize_query_identifier("http://resolver.example/?urn=1234:567"),
            "1234:567"
        );
        assert_eq!(normalize_query_identifier("a=b=c:1"), "c:1");
        assert_eq!(normalize_query_identifier(" 12:3 "), "12:3");
    }
}
