//! Participant access URLs.
//!
//! The full URL carries the experimentee API key and must only ever reach the
//! participant. Everything that gets printed or logged uses the redacted copy.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;

use crate::error::CoreError;
use crate::ids::{ExperimentId, ParticipantId};

/// Token substituted for the secret in the redacted URL.
pub const REDACTED_PLACEHOLDER: &str = "[EXPERIMENTEE_API_KEY_HIDDEN]";

/// Length of the fallback mask used when the placeholder would spell the secret.
const MASK_LEN: usize = 8;

/// Everything except RFC 3986 unreserved characters is encoded.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A participant URL and its display-safe copy.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessUrl {
    full: String,
    redacted: String,
}

impl AccessUrl {
    /// The credential-bearing URL to hand to the participant.
    pub fn full(&self) -> &str {
        &self.full
    }

    /// The URL with the secret replaced by [`REDACTED_PLACEHOLDER`].
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl fmt::Debug for AccessUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessUrl")
            .field("redacted", &self.redacted)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for AccessUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// Build the participant URL for an experiment.
///
/// Appends `key`, `experiment_id` and `participant_id` query parameters to
/// `base_url` without touching it. Fails with [`CoreError::MissingCredential`]
/// when `secret` is absent or blank.
pub fn build_access_url(
    base_url: &str,
    experiment_id: &ExperimentId,
    participant_id: &ParticipantId,
    secret: Option<&str>,
) -> Result<AccessUrl, CoreError> {
    let secret = match secret {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Err(CoreError::MissingCredential),
    };

    let separator = if base_url.ends_with('?') || base_url.ends_with('&') {
        ""
    } else if base_url.contains('?') {
        "&"
    } else {
        "?"
    };
    let head = format!("{}{}key=", base_url, separator);
    let tail = format!(
        "&experiment_id={}&participant_id={}",
        encode(experiment_id.as_str()),
        encode(participant_id.as_str())
    );
    let encoded_secret = encode(secret);

    let full = format!("{}{}{}", head, encoded_secret, tail);
    let redacted = redact(&head, &tail, secret, &encoded_secret);

    Ok(AccessUrl { full, redacted })
}

fn exposes(text: &str, secret: &str, encoded_secret: &str) -> bool {
    text.contains(secret) || text.contains(encoded_secret)
}

/// Rebuild the URL with `marker` in the key slot. The surrounding parts are
/// scrubbed in case an id or the base URL repeats the secret.
fn assemble(head: &str, tail: &str, secret: &str, encoded_secret: &str, marker: &str) -> String {
    let scrub = |part: &str| part.replace(encoded_secret, marker).replace(secret, marker);
    format!("{}{}{}", scrub(head), marker, scrub(tail))
}

fn redact(head: &str, tail: &str, secret: &str, encoded_secret: &str) -> String {
    let redacted = assemble(head, tail, secret, encoded_secret, REDACTED_PLACEHOLDER);
    if !exposes(&redacted, secret, encoded_secret) {
        return redacted;
    }

    // The placeholder, alone or joined with its neighbours, spells the secret.
    // A mask made of a character absent from both forms of the secret cannot.
    let mask_char = ['*', '#']
        .into_iter()
        .chain((0x21..=0x10FFFF).filter_map(char::from_u32))
        .find(|c| !secret.contains(*c) && !encoded_secret.contains(*c));
    match mask_char {
        Some(c) => assemble(
            head,
            tail,
            secret,
            encoded_secret,
            &c.to_string().repeat(MASK_LEN),
        ),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use percent_encoding::percent_decode_str;
    use proptest::prelude::*;

    fn query_param(url: &str, name: &str) -> Option<String> {
        let (_, query) = url.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == name).then(|| percent_decode_str(v).decode_utf8_lossy().into_owned())
        })
    }

    fn build(base: &str, exp: &str, participant: &str, secret: &str) -> AccessUrl {
        build_access_url(
            base,
            &ExperimentId::new(exp),
            &ParticipantId::new(participant),
            Some(secret),
        )
        .unwrap()
    }

    #[test]
    fn encodes_secret_and_redacts_it() {
        let url = build("https://x/run", "exp1", "p1", "s3cr3t&key");
        assert_eq!(
            url.full(),
            "https://x/run?key=s3cr3t%26key&experiment_id=exp1&participant_id=p1"
        );
        assert!(url.redacted().contains(REDACTED_PLACEHOLDER));
        assert!(!url.redacted().contains("s3cr3t"));
        assert_eq!(
            url.redacted(),
            format!(
                "https://x/run?key={}&experiment_id=exp1&participant_id=p1",
                REDACTED_PLACEHOLDER
            )
        );
    }

    #[test]
    fn missing_or_blank_secret_fails() {
        let exp = ExperimentId::new("exp1");
        let participant = ParticipantId::new("p1");
        for secret in [None, Some(""), Some("   ")] {
            assert!(matches!(
                build_access_url("https://x/run", &exp, &participant, secret),
                Err(CoreError::MissingCredential)
            ));
        }
    }

    #[test]
    fn keeps_existing_query_on_base_url() {
        let url = build("https://x/run?lang=en", "exp1", "p1", "k");
        assert!(url.full().starts_with("https://x/run?lang=en&key=k&"));
        assert_eq!(query_param(url.full(), "lang").as_deref(), Some("en"));
    }

    #[test]
    fn scrubs_secret_repeated_in_ids() {
        let url = build("https://x/run", "abc", "token-42", "token-42");
        assert!(!url.redacted().contains("token-42"));
        assert_eq!(query_param(url.full(), "participant_id").as_deref(), Some("token-42"));
    }

    #[test]
    fn masks_secret_spelled_by_placeholder() {
        for secret in ["HIDDEN", "API_KEY", "N]&exp", "[EXPERIMENTEE_API_KEY_HIDDEN]"] {
            let url = build("https://x/run", "exp1", "p1", secret);
            assert!(!url.redacted().contains(secret), "{} leaked", secret);
            assert!(!url.redacted().contains(&encode(secret)), "{} leaked", secret);
        }

        let url = build("https://x/run", "exp1", "p1", "N]&exp");
        assert_eq!(
            url.redacted(),
            "https://x/run?key=********&experiment_id=exp1&participant_id=p1"
        );
        assert_eq!(query_param(url.full(), "key").as_deref(), Some("N]&exp"));
    }

    #[test]
    fn mask_avoids_characters_of_the_secret() {
        let url = build("https://x/run?a=*", "exp1", "p1", "*&key=[");
        assert!(!url.redacted().contains("*&key=["));
        assert_eq!(
            url.redacted(),
            "https://x/run?a=*&key=########&experiment_id=exp1&participant_id=p1"
        );
    }

    #[test]
    fn debug_and_display_hide_secret() {
        let url = build("https://x/run", "exp1", "p1", "hunter2");
        assert!(!format!("{:?}", url).contains("hunter2"));
        assert!(!url.to_string().contains("hunter2"));
    }

    proptest! {
        #[test]
        fn redacted_never_contains_secret(
            secret in "[A-Za-z0-9_\\[\\]&= %#+/?]{1,24}",
            exp in "[A-Za-z0-9_-]{1,16}",
            participant in "[A-Za-z0-9_-]{1,16}",
        ) {
            prop_assume!(!secret.trim().is_empty());
            let url = build("https://example.org/run", &exp, &participant, &secret);
            prop_assert!(!url.redacted().contains(&secret));
            prop_assert!(!url.redacted().contains(&encode(&secret)));
        }

        #[test]
        fn query_round_trips_ids(
            exp in "[ -~]{1,20}",
            participant in "[ -~]{1,20}",
            secret in "[ -~]{1,20}",
        ) {
            prop_assume!(!secret.trim().is_empty());
            let url = build("https://example.org/run", &exp, &participant, &secret);
            prop_assert_eq!(query_param(url.full(), "experiment_id"), Some(exp));
            prop_assert_eq!(query_param(url.full(), "participant_id"), Some(participant));
            prop_assert_eq!(query_param(url.full(), "key"), Some(secret));
        }
    }
}
