//! Artifact naming: sanitization, extension resolution, and path resolution.
//!
//! Artifact identity is extension-independent. A base name may arrive with or
//! without an extension, and the real extension may only be known once the
//! response headers are in, so everything here separates "stem" from
//! "recognized extension".

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::task::TaskKind;

/// Extensions we recognize as a real file extension on a base name.
///
/// Anything else after a dot is treated as part of the name
/// (e.g. `2024.01.05 holiday`).
const KNOWN_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".heic", ".avif", ".bmp", ".tif", ".tiff", ".mp4",
    ".m4v", ".mov", ".webm", ".mkv", ".avi", ".mp3", ".m4a", ".ogg", ".wav", ".pdf", ".zip",
    ".json", ".txt", ".html", ".bin",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".heic", ".avif", ".bmp", ".tif", ".tiff",
];

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".m4v", ".mov", ".webm", ".mkv", ".avi"];

/// Marker carried by every in-progress temp file name.
pub const TEMP_MARKER: &str = ".part";

/// Longest unlisted extension stripped from names already on disk.
const MAX_STORED_EXTENSION_LEN: usize = 5;

/// `.<stem>.<8 hex>.part`, optionally followed by `.meta.<ext>`.
#[allow(clippy::expect_used)]
static TEMP_FILE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\..+\.[0-9a-f]{8}\.part(?:\.meta\.[A-Za-z0-9]+)?$")
        .expect("temp file regex is valid") // Static pattern, safe to panic
});

/// Splits a name into `(stem, Some(".ext"))` when it ends in a recognized
/// extension, otherwise returns the whole name as stem.
#[must_use]
pub fn split_known_extension(name: &str) -> (&str, Option<&str>) {
    if let Some(dot) = name.rfind('.')
        && dot > 0
    {
        let ext = &name[dot..];
        if KNOWN_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
        {
            return (&name[..dot], Some(ext));
        }
    }
    (name, None)
}

/// Extension-independent identity of a logical artifact name.
#[must_use]
pub fn dedup_key(name: &str) -> String {
    split_known_extension(name.trim()).0.to_string()
}

/// Extension-independent identity of a file already in the destination.
///
/// Unlike [`dedup_key`], any trailing extension of one to five ASCII
/// alphanumerics is stripped, listed or not (`clip.3gp`, `pic.jfif`).
#[must_use]
pub fn stored_dedup_key(name: &str) -> String {
    let name = name.trim();
    if let (stem, Some(_)) = split_known_extension(name) {
        return stem.to_string();
    }
    if let Some(dot) = name.rfind('.')
        && dot > 0
    {
        let ext = &name[dot + 1..];
        if (1..=MAX_STORED_EXTENSION_LEN).contains(&ext.len())
            && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return name[..dot].to_string();
        }
    }
    name.to_string()
}

/// Guesses a file extension from a Content-Type header value.
///
/// Returns `None` for types that say nothing useful about the artifact
/// (e.g. `application/octet-stream`).
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let ext = match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/heic" => ".heic",
        "image/avif" => ".avif",
        "image/bmp" => ".bmp",
        "image/tiff" => ".tiff",
        "video/mp4" => ".mp4",
        "video/quicktime" => ".mov",
        "video/webm" => ".webm",
        "video/x-matroska" => ".mkv",
        "video/x-m4v" => ".m4v",
        "audio/mpeg" => ".mp3",
        "audio/mp4" => ".m4a",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/json" => ".json",
        "text/plain" => ".txt",
        "text/html" => ".html",
        _ => return None,
    };
    Some(ext)
}

/// Recognized extension of the last URL path segment, lowercased.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = split_known_extension(last_segment);
    ext.map(str::to_ascii_lowercase)
}

/// Infers the artifact kind from a URL's extension.
#[must_use]
pub fn kind_from_url(url: &str) -> TaskKind {
    match extension_from_url(url) {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => TaskKind::Image,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => TaskKind::Video,
        _ => TaskKind::Generic,
    }
}

/// Derives a base name from the last URL path segment.
///
/// Falls back to the host name when the path is empty.
#[must_use]
pub fn base_name_from_url(url: &Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded =
            urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
        return sanitize_filename(&decoded);
    }

    url.host_str()
        .map_or_else(|| "download".to_string(), sanitize_filename)
}

/// Picks the final file name for a task once the response is known.
///
/// Order: the base name's own recognized extension, then the response
/// Content-Type, then the URL path, then the kind default.
#[must_use]
pub fn resolve_file_name(
    base_name: &str,
    content_type: Option<&str>,
    source_url: &str,
    kind: TaskKind,
) -> String {
    let base_name = sanitize_filename(base_name);
    if split_known_extension(&base_name).1.is_some() {
        return base_name;
    }

    let ext = content_type
        .and_then(extension_from_content_type)
        .map(str::to_string)
        .or_else(|| extension_from_url(source_url))
        .unwrap_or_else(|| kind.default_extension().to_string());

    format!("{base_name}{ext}")
}

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Returns `dir/filename` if free, otherwise `stem_N.ext` starting at
/// `suffix_start`.
#[must_use]
pub fn resolve_unique_path_with_suffix_start(
    dir: &Path,
    filename: &str,
    suffix_start: usize,
) -> PathBuf {
    let base_path = dir.join(filename);
    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match split_known_extension(filename) {
        (stem, Some(ext)) => (stem, ext),
        (stem, None) => (stem, ""),
    };

    for i in suffix_start..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

/// True for names this crate writes while a transfer or metadata rewrite is
/// in flight (`.<stem>.<hash>.part` and `.<stem>.<hash>.part.meta.<ext>`).
#[must_use]
pub fn is_temp_file_name(name: &str) -> bool {
    TEMP_FILE_PATTERN.is_match(name)
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.jpg"), "file_name.jpg");
        assert_eq!(sanitize_filename("file\\name.jpg"), "file_name.jpg");
        assert_eq!(sanitize_filename("file:name.jpg"), "file_name.jpg");
        assert_eq!(sanitize_filename("file<name>.jpg"), "file_name_.jpg");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn test_split_known_extension_only_strips_recognized() {
        assert_eq!(split_known_extension("photo.JPG"), ("photo", Some(".JPG")));
        assert_eq!(
            split_known_extension("2024.01.05 holiday"),
            ("2024.01.05 holiday", None)
        );
        assert_eq!(split_known_extension(".mp4"), (".mp4", None));
    }

    #[test]
    fn test_dedup_key_is_extension_independent() {
        assert_eq!(dedup_key("clip.mp4"), dedup_key("clip"));
        assert_eq!(dedup_key("clip.webm"), "clip");
        assert_ne!(dedup_key("clip_2"), dedup_key("clip"));
    }

    #[test]
    fn test_extension_from_content_type_media_types() {
        assert_eq!(extension_from_content_type("image/jpeg"), Some(".jpg"));
        assert_eq!(
            extension_from_content_type("video/mp4; codecs=avc1"),
            Some(".mp4")
        );
        assert_eq!(extension_from_content_type("IMAGE/WEBP"), Some(".webp"));
        assert_eq!(extension_from_content_type("application/octet-stream"), None);
    }

    #[test]
    fn test_resolve_file_name_prefers_existing_extension() {
        let name = resolve_file_name(
            "photo.png",
            Some("image/jpeg"),
            "https://x.test/a",
            TaskKind::Image,
        );
        assert_eq!(name, "photo.png");
    }

    #[test]
    fn test_resolve_file_name_uses_content_type_then_url_then_kind() {
        assert_eq!(
            resolve_file_name("a", Some("video/webm"), "https://x.test/a.mp4", TaskKind::Video),
            "a.webm"
        );
        assert_eq!(
            resolve_file_name(
                "a",
                Some("application/octet-stream"),
                "https://x.test/a.mp4?sig=1",
                TaskKind::Video
            ),
            "a.mp4"
        );
        assert_eq!(
            resolve_file_name("a", None, "https://x.test/a", TaskKind::Image),
            "a.jpg"
        );
    }

    #[test]
    fn test_kind_from_url() {
        assert_eq!(kind_from_url("https://x.test/p/1.webp"), TaskKind::Image);
        assert_eq!(kind_from_url("https://x.test/v/1.MOV"), TaskKind::Video);
        assert_eq!(kind_from_url("https://x.test/file"), TaskKind::Generic);
    }

    #[test]
    fn test_base_name_from_url_decodes_segment() {
        let url = Url::parse("https://x.test/media/my%20photo.jpg?x=1").unwrap();
        assert_eq!(base_name_from_url(&url), "my photo.jpg");
        let url = Url::parse("https://cdn.x.test/").unwrap();
        assert_eq!(base_name_from_url(&url), "cdn.x.test");
    }

    #[test]
    fn test_resolve_unique_path_adds_suffix_when_taken() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        let path = resolve_unique_path_with_suffix_start(dir.path(), "a.jpg", 2);
        assert_eq!(path, dir.path().join("a_2.jpg"));

        let free = resolve_unique_path_with_suffix_start(dir.path(), "b.jpg", 2);
        assert_eq!(free, dir.path().join("b.jpg"));
    }

    #[test]
    fn test_is_temp_file_name() {
        assert!(is_temp_file_name(".a.1234abcd.part"));
        assert!(is_temp_file_name(".a.1234abcd.part.meta.mp4"));
        assert!(!is_temp_file_name("a.part"));
        assert!(!is_temp_file_name(".hidden"));
    }

    #[test]
    fn test_is_temp_file_name_rejects_lookalikes() {
        assert!(!is_temp_file_name(".partner-notes.txt"));
        assert!(!is_temp_file_name(".particles.cfg"));
        assert!(!is_temp_file_name(".a.part"));
        assert!(!is_temp_file_name(".a.1234ABCD.part"));
        assert!(!is_temp_file_name(".a.1234abcd.partial"));
    }

    #[test]
    fn test_stored_dedup_key_strips_unlisted_extensions() {
        assert_eq!(stored_dedup_key("clip.3gp"), "clip");
        assert_eq!(stored_dedup_key("pic.jfif"), "pic");
        assert_eq!(stored_dedup_key("2024.01.05 holiday.jpg"), "2024.01.05 holiday");
        assert_eq!(stored_dedup_key("notes"), "notes");
        assert_eq!(stored_dedup_key("archive.backup-old"), "archive.backup-old");
    }
}
