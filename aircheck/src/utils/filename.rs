//! Filename derivation for recorded shows.
//!
//! Show titles come straight from the schedule provider and routinely contain
//! characters that are unsafe in filenames or in unquoted URLs, so anything
//! that is not alphanumeric is stripped outright.

/// Reduce a show title to a filename-safe stem.
///
/// Keeps Unicode letters and digits, drops everything else. Returns `None`
/// when nothing survives; callers fall back to the slot id.
pub fn sanitize_stem(title: &str) -> Option<String> {
    let stem: String = title.chars().filter(|c| c.is_alphanumeric()).collect();
    if stem.is_empty() { None } else { Some(stem) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_spaces() {
        assert_eq!(
            sanitize_stem("The Morning Show! (live)").as_deref(),
            Some("TheMorningShowlive")
        );
    }

    #[test]
    fn keeps_unicode_letters() {
        assert_eq!(sanitize_stem("Música 101").as_deref(), Some("Música101"));
    }

    #[test]
    fn no_path_separators_survive() {
        let stem = sanitize_stem("../../etc/passwd #1").unwrap();
        assert!(!stem.contains('/'));
        assert!(!stem.contains('\\'));
        assert!(!stem.contains('.'));
    }

    #[test]
    fn all_punctuation_is_none() {
        assert_eq!(sanitize_stem("?!*&"), None);
        assert_eq!(sanitize_stem(""), None);
    }
}
