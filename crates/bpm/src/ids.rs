//! Bijective container identifier codec.
//!
//! Process identities contain bytes the runtime's identifier grammar
//! forbids, so they are escaped rather than hashed: the mapping stays
//! reversible and a container listing can be translated back to process
//! names without any side lookup.

use std::fmt::Write as _;

use crate::config::Identity;
use crate::error::{Error, Result};

/// Marker prepended to every encoded identifier.
const MARKER: &str = "bpm-";

/// Byte introducing a two-digit hex escape.
const ESCAPE: u8 = b'.';

/// Encode an arbitrary name into a runtime-legal container identifier.
///
/// Alphanumerics, `_` and `-` pass through unchanged; every other byte
/// (including the escape marker itself) becomes `.` followed by two
/// lowercase hex digits. The output never contains `/` or `..`, so it is
/// also safe as a file name.
pub fn encode(name: &str) -> String {
    let mut id = String::with_capacity(MARKER.len() + name.len());
    id.push_str(MARKER);
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            id.push(b as char);
        } else {
            // The write cannot fail on a String.
            let _ = write!(id, ".{b:02x}");
        }
    }
    id
}

/// Decode a container identifier back into the original name.
///
/// Fails with `InvalidId` when the marker is absent. Malformed escape
/// sequences (a truncated escape or non-hex digits) are dropped silently
/// rather than rejected; `encode` never produces them, so round-trips are
/// unaffected.
pub fn decode(id: &str) -> Result<String> {
    let Some(rest) = id.strip_prefix(MARKER) else {
        return Err(Error::InvalidId(id.to_string()));
    };

    let bytes = rest.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE {
            if let Some(digits) = bytes.get(i + 1..i + 3)
                && let Ok(b) = u8::from_str_radix(std::str::from_utf8(digits).unwrap_or(""), 16)
            {
                out.push(b);
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| Error::InvalidId(id.to_string()))
}

/// The container identifier for an identity.
///
/// When the process is the job's default process the bare job encoding is
/// used; otherwise job and process are joined with a `.` (which the
/// encoding escapes).
pub fn for_identity(identity: &Identity) -> String {
    if identity.process() == identity.job() {
        encode(identity.job())
    } else {
        encode(&format!("{}.{}", identity.job(), identity.process()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trip(name: &str) {
        let id = encode(name);
        assert_eq!(decode(&id).unwrap(), name, "round-trip of {name:?}");
    }

    #[test]
    fn test_encode_known_vector() {
        assert_eq!(
            encode("test-server.alt-test-server"),
            "bpm-test-server.2ealt-test-server"
        );
        assert_eq!(
            decode("bpm-test-server.2ealt-test-server").unwrap(),
            "test-server.alt-test-server"
        );
    }

    #[test]
    fn test_round_trips() {
        for name in [
            "",
            "server",
            "with spaces and\ttabs",
            "dots...dots",
            "unicode-ünïcødé",
            "slashes/and/../traversal",
            "all_legal-Chars_09",
            "\0binary\x7f",
        ] {
            assert_round_trip(name);
        }
    }

    #[test]
    fn test_encode_is_deterministic_and_legal() {
        for name in ["a b", "x/y", "weird\n"] {
            let first = encode(name);
            assert_eq!(first, encode(name));
            assert!(first.starts_with("bpm-"));
            assert!(
                first
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.'),
                "illegal byte in {first:?}"
            );
            assert!(!first.contains('/'));
            assert!(!first.contains(".."));
        }
    }

    #[test]
    fn test_decode_requires_marker() {
        assert!(matches!(decode("nats"), Err(Error::InvalidId(_))));
        assert!(matches!(decode(""), Err(Error::InvalidId(_))));
    }

    #[test]
    fn test_decode_drops_malformed_escapes() {
        // Truncated escape at the end of the identifier.
        assert_eq!(decode("bpm-abc.").unwrap(), "abc");
        assert_eq!(decode("bpm-abc.2").unwrap(), "abc");
        // Non-hex digits after the escape marker.
        assert_eq!(decode("bpm-a.zzb").unwrap(), "ab");
    }

    #[test]
    fn test_for_identity_uses_bare_job_encoding() {
        use crate::config::Identity;

        assert_eq!(ids_for("nats", "nats"), "bpm-nats");
        assert_eq!(ids_for("nats", "metrics"), "bpm-nats.2emetrics");

        fn ids_for(job: &str, process: &str) -> String {
            for_identity(&Identity::new(job, process))
        }
    }
}
