//! Canonical naming for downloaded reports.
//!
//! Output layout: `<root>/<YYYY>/<MM>/<DD>/<bank_tag>/<subject>_<bank_tag>_<ts>.pdf`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

/// Characters that are unsafe in filenames on at least one supported OS.
const ILLEGAL_FS_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Maximum length of the sanitized subject component, in characters.
const MAX_SUBJECT_CHARS: usize = 50;

/// Strip filesystem-illegal characters, trim, and truncate.
pub fn clean_filename(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !ILLEGAL_FS_CHARS.contains(c)).collect();
    cleaned.trim().chars().take(MAX_SUBJECT_CHARS).collect()
}

/// Derive a subject string from a saved email's HTML filename.
///
/// Saved emails are named `"<received stamp> - <subject>.html"`; everything
/// before the first `" - "` is dropped. Falls back to `"untitled"` when the
/// sanitized subject is empty.
pub fn subject_from_html(html_path: &Path) -> String {
    let stem = html_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let raw = stem
        .split_once(" - ")
        .map(|(_, rest)| rest.to_string())
        .unwrap_or(stem);
    let cleaned = clean_filename(&raw);
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// Deterministic output filename: `{subject}_{bank_tag}_{YYYYmmdd_HHMMSS}.pdf`.
pub fn output_basename(subject: &str, bank_tag: &str, received_ts: DateTime<Utc>) -> String {
    format!(
        "{subject}_{bank_tag}_{}.pdf",
        received_ts.format("%Y%m%d_%H%M%S")
    )
}

/// Output folder partitioned by date and bank: `<root>/<Y>/<m>/<d>/<tag>`.
pub fn output_folder(root: &Path, bank_tag: &str, received_ts: DateTime<Utc>) -> PathBuf {
    root.join(format!("{:04}", received_ts.year()))
        .join(format!("{:02}", received_ts.month()))
        .join(format!("{:02}", received_ts.day()))
        .join(bank_tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 9, 30, 15).unwrap()
    }

    #[test]
    fn strips_illegal_characters() {
        let cleaned = clean_filename("Q3: Macro/Outlook?");
        assert_eq!(cleaned, "Q3 MacroOutlook");
        assert!(cleaned.chars().all(|c| !ILLEGAL_FS_CHARS.contains(&c)));
        assert!(cleaned.chars().count() <= 50);
    }

    #[test]
    fn truncates_to_fifty_chars() {
        let long = "x".repeat(200);
        assert_eq!(clean_filename(&long).chars().count(), 50);
    }

    #[test]
    fn subject_drops_timestamp_prefix() {
        let path = Path::new("/emails/GS/20250307_093015 - FX Weekly.html");
        assert_eq!(subject_from_html(path), "FX Weekly");
    }

    #[test]
    fn subject_without_prefix_uses_whole_stem() {
        let path = Path::new("/emails/GS/FX Weekly.html");
        assert_eq!(subject_from_html(path), "FX Weekly");
    }

    #[test]
    fn empty_subject_becomes_untitled() {
        let path = Path::new("/emails/GS/20250307 - ???.html");
        assert_eq!(subject_from_html(path), "untitled");
    }

    #[test]
    fn basename_layout() {
        let name = output_basename("FX Weekly", "GS", ts());
        assert_eq!(name, "FX Weekly_GS_20250307_093015.pdf");
    }

    #[test]
    fn folder_partitioned_by_date_and_bank() {
        let folder = output_folder(Path::new("/reports"), "JPM", ts());
        assert_eq!(folder, PathBuf::from("/reports/2025/03/07/JPM"));
    }
}
