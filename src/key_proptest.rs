//! Property-based tests for cache keys and output sanitizing.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use crate::git::RepositoryKey;
    use crate::metadata::{escape_name, parse_request};
    use crate::registry::{validate_name, validate_realm};
    use crate::sanitize::replace_base_path;
    use proptest::prelude::*;
    use std::path::Path;

    // ============================================================================
    // registry key property tests
    // ============================================================================

    proptest! {
        /// Property: valid realms survive validation unchanged apart from trimming
        #[test]
        fn valid_realm_is_trimmed(realm in "[a-zA-Z0-9+_-]{1,20}", pad in " {0,3}") {
            let padded = format!("{}{}{}", pad, realm, pad);
            prop_assert_eq!(validate_realm(&padded).unwrap(), realm.as_str());
        }

        /// Property: every realm is also a valid name
        #[test]
        fn realm_is_valid_name(realm in "[a-zA-Z0-9+_-]{1,20}") {
            prop_assert!(validate_name(&realm).is_ok());
        }

        /// Property: a forbidden character anywhere invalidates the key
        #[test]
        fn forbidden_character_is_rejected(
            left in "[a-z]{1,5}",
            bad in "[ ,;*?\"<>|\\\\]",
            right in "[a-z]{1,5}",
        ) {
            let key = format!("{}{}{}", left, bad, right);
            prop_assert!(validate_realm(&key).is_err());
            prop_assert!(validate_name(&key).is_err());
        }

        /// Property: whitespace-only keys are rejected
        #[test]
        fn blank_key_is_rejected(blank in "[ \t\n]{0,5}") {
            prop_assert!(validate_realm(&blank).is_err());
            prop_assert!(validate_name(&blank).is_err());
        }
    }

    // ============================================================================
    // repository key property tests
    // ============================================================================

    proptest! {
        /// Property: all spellings of a GitHub repository share one key
        #[test]
        fn github_spellings_share_key(user in "[a-zA-Z0-9-]{1,12}", repo in "[a-zA-Z0-9_-]{1,12}") {
            let https = RepositoryKey::from_url(&format!("https://github.com/{}/{}", user, repo)).unwrap();
            let ssh = RepositoryKey::from_url(&format!("git@github.com:{}/{}.git", user, repo)).unwrap();
            let http = RepositoryKey::from_url(&format!("http://github.com/{}/{}/", user, repo)).unwrap();
            prop_assert_eq!(&https, &ssh);
            prop_assert_eq!(&https, &http);
        }

        /// Property: registry names derived from URLs are always valid names
        #[test]
        fn registry_name_is_valid(host in "[a-z]{1,8}\\.(com|org)", path in "[a-zA-Z0-9._/-]{1,30}") {
            let key = RepositoryKey::from_url(&format!("https://{}/{}", host, path)).unwrap();
            prop_assert!(validate_name(&key.registry_name()).is_ok());
        }
    }

    // ============================================================================
    // sanitizer and metadata property tests
    // ============================================================================

    proptest! {
        /// Property: text that does not mention the base path is returned unchanged
        #[test]
        fn text_without_base_is_unchanged(text in "[a-zA-Z0-9 .,;'\"(){}\\[\\]\n]{0,80}") {
            let result = replace_base_path(&text, Path::new("/texgit/base/path")).unwrap();
            prop_assert_eq!(result, text);
        }

        /// Property: lines without a request header are never requests
        #[test]
        fn plain_lines_are_not_requests(line in "[^\\\\]{0,60}") {
            prop_assert_eq!(parse_request(&line).unwrap(), None);
        }

        /// Property: escaped names contain no raw underscores or spaces
        #[test]
        fn escaped_name_has_no_raw_specials(name in "[a-z_ $]{0,20}") {
            let escaped = escape_name(&name);
            prop_assert!(!escaped.contains(' '));
            prop_assert!(!escaped.replace("\\_", "").contains('_'));
        }
    }
}
