//! Filename extraction and sanitization for retrieved products.

use std::sync::OnceLock;

use regex::Regex;

/// Extracts the filename from a `Content-Disposition` header value.
///
/// Handles `attachment; filename="x.fits.gz"` and the unquoted form. Any
/// path components the server sneaks in are stripped.
#[must_use]
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r#"filename="?([^";]+)"?"#).unwrap_or_else(|_| unreachable!())
    });
    let captured = pattern.captures(header)?.get(1)?.as_str().trim();
    let basename = captured
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(captured);
    let sanitized = sanitize_filename(basename);
    (!sanitized.is_empty()).then_some(sanitized)
}

/// Replaces path separators and control characters so the name is safe to
/// join onto the destination directory.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .trim_matches('.')
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_filename() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="SAF+NACO.fits.gz""#),
            Some("SAF+NACO.fits.gz".to_string())
        );
    }

    #[test]
    fn test_unquoted_filename() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=UVES.2003.fits.Z"),
            Some("UVES.2003.fits.Z".to_string())
        );
    }

    #[test]
    fn test_missing_filename_is_none() {
        assert!(filename_from_content_disposition("attachment").is_none());
        assert!(filename_from_content_disposition("").is_none());
    }

    #[test]
    fn test_path_components_stripped() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="../../etc/passwd""#),
            Some("passwd".to_string())
        );
    }

    #[test]
    fn test_sanitize_replaces_separators_and_controls() {
        assert_eq!(sanitize_filename("a/b\\c\nd"), "a_b_c_d");
        assert_eq!(sanitize_filename("..hidden.."), "hidden");
    }
}
