//! Upload filename sanitization.
//!
//! The controller rewrites every uploaded filename before storing it.
//! The client applies the same rules up front so its logs and local
//! metadata agree with what the server will actually keep.

use std::sync::OnceLock;

use regex::Regex;

/// Longest filename the controller will store.
pub const MAX_FILENAME_LEN: usize = 120;

/// Fallback name for empty or unusable inputs.
pub const DEFAULT_FILENAME: &str = "upload.bin";

fn unsafe_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w.\-]+").expect("static pattern"))
}

/// Sanitize an upload filename the way the controller does.
///
/// Keeps only the basename, collapses every run of characters outside
/// `[A-Za-z0-9_.\-]` into a single `_`, and truncates to
/// [`MAX_FILENAME_LEN`]. Empty input becomes [`DEFAULT_FILENAME`].
///
/// # Examples
///
/// ```
/// use darkroom_core::naming::safe_filename;
///
/// assert_eq!(safe_filename("selfie.jpg"), "selfie.jpg");
/// assert_eq!(safe_filename("../../etc/passwd"), "passwd");
/// assert_eq!(safe_filename("my photo (1).jpg"), "my_photo_1_.jpg");
/// assert_eq!(safe_filename(""), "upload.bin");
/// ```
pub fn safe_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();
    if base.is_empty() {
        return DEFAULT_FILENAME.to_string();
    }

    let cleaned = unsafe_runs().replace_all(base, "_").into_owned();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        return DEFAULT_FILENAME.to_string();
    }

    cleaned.chars().take(MAX_FILENAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_passes_through() {
        assert_eq!(safe_filename("portrait.png"), "portrait.png");
    }

    #[test]
    fn path_components_are_stripped() {
        assert_eq!(safe_filename("/tmp/uploads/face.jpg"), "face.jpg");
        assert_eq!(safe_filename(r"C:\Users\me\face.jpg"), "face.jpg");
    }

    #[test]
    fn special_characters_collapse_to_underscore() {
        assert_eq!(safe_filename("my photo (1).jpg"), "my_photo_1_.jpg");
        // \w is Unicode-aware: accented letters survive, the space does not.
        assert_eq!(safe_filename("naïve résumé.pdf"), "naïve_résumé.pdf");
    }

    #[test]
    fn empty_and_junk_fall_back() {
        assert_eq!(safe_filename(""), "upload.bin");
        assert_eq!(safe_filename("   "), "upload.bin");
        assert_eq!(safe_filename("???"), "upload.bin");
    }

    #[test]
    fn long_names_are_truncated() {
        let long = "a".repeat(300) + ".jpg";
        let cleaned = safe_filename(&long);
        assert_eq!(cleaned.len(), MAX_FILENAME_LEN);
        assert!(cleaned.starts_with("aaa"));
    }
}
