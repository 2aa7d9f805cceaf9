//! Property and table-driven tests for the path-decoding grammar.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use proptest::prelude::*;
use rstest::rstest;

use urlcast_proxy::decode::{build_url, decode_base64_url, normalize_url, parse_encoded_data};

fn encode_url_safe(plain: &str) -> String {
    B64.encode(plain.as_bytes()).replace('+', "-").replace('/', "_")
}

proptest! {
    /// Any string that survives a UTF-8 round trip through the url-safe
    /// base64 alphabet decodes back to exactly what was encoded.
    #[test]
    fn base64_url_round_trip_is_lossless(s in "[ -~]{0,200}") {
        let encoded = encode_url_safe(&s);
        let decoded = decode_base64_url(&encoded).unwrap();
        prop_assert_eq!(decoded, s);
    }

    /// `normalize_url` always yields a string starting with an explicit
    /// `http://` or `https://` scheme, for any non-empty ASCII host-ish input.
    #[test]
    fn normalize_url_always_adds_a_scheme(host in "[a-z0-9][a-z0-9.-]{0,40}") {
        let normalized = normalize_url(&host).unwrap();
        prop_assert!(normalized.starts_with("http://") || normalized.starts_with("https://"));
    }

    /// A single `param/key=value` override followed by a url-fragment tail
    /// survives `parse_encoded_data` with the key/value and tail intact.
    #[test]
    fn param_override_round_trips_through_encoded_data(
        key in "[A-Za-z][A-Za-z-]{0,20}",
        value in "[A-Za-z0-9]{1,20}",
        tail_segment in "[a-z0-9.]{1,20}",
    ) {
        let decoded = format!("param/{key}={value}/{tail_segment}");
        let (params, tail) = parse_encoded_data(&decoded);
        prop_assert_eq!(params.get(&key), Some(&value));
        prop_assert_eq!(tail, vec![tail_segment]);
    }
}

#[rstest]
#[case("example.com", "https://example.com")]
#[case("http://example.com", "http://example.com")]
#[case("https://http://example.com", "https://example.com")]
#[case("//example.com/path", "https://example.com/path")]
#[case("https:/example.com", "https://example.com")]
fn normalize_url_table(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(normalize_url(input).unwrap(), expected);
}

#[rstest]
#[case(vec!["https://example.com/a".to_string()], None, "https://example.com/a")]
#[case(vec!["example.com".to_string(), "a".to_string(), "b".to_string()], None, "https://example.com/a/b")]
#[case(vec!["https://example.com/a?x=1".to_string()], Some("y=2"), "https://example.com/a?x=1&y=2")]
#[case(vec!["https://example.com/a?x=1".to_string()], Some("x=2"), "https://example.com/a?x=2")]
fn build_url_table(#[case] segments: Vec<String>, #[case] extra_query: Option<&str>, #[case] expected: &str) {
    assert_eq!(build_url(&segments, extra_query).unwrap(), expected);
}
