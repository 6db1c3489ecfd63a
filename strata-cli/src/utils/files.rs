use std::path::{Path, PathBuf};

use strata_engine::MediaType;

use crate::error::AppError;

/// Creates all directories in the given path, including parent directories if they don't exist.
#[inline]
pub async fn create_dirs(path: &Path) -> Result<(), AppError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(AppError::Io)?;
    Ok(())
}

/// Extracts the last path segment of a URL, split into stem and extension.
///
/// Long stems are truncated. Characters that are unsafe in file names are
/// replaced with `_`.
///
/// # Examples
///
/// ```ignore
/// let (stem, ext) = extract_filename_from_url("https://example.com/img/logo.png")?;
/// assert_eq!(stem, "logo");
/// assert_eq!(ext.as_deref(), Some("png"));
/// ```
pub fn extract_filename_from_url(url_str: &str) -> Result<(String, Option<String>), AppError> {
    let url = url_str
        .parse::<reqwest::Url>()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let file_name = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("resource");

    let (stem, extension) = match file_name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < file_name.len() => {
            (&file_name[..pos], Some(file_name[pos + 1..].to_ascii_lowercase()))
        }
        _ => (file_name, None),
    };

    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    // we dont want large filenames
    let stem = if stem.len() > 30 {
        format!("{}...", &stem[..27])
    } else {
        stem
    };

    Ok((stem, extension))
}

/// Output path for a loaded resource.
///
/// The URL's own extension wins; the sniffed media type fills in when the URL
/// has none. `index` keeps names unique when several URLs share a stem.
pub fn output_path(
    output_dir: &Path,
    url_str: &str,
    media_type: MediaType,
    index: usize,
) -> Result<PathBuf, AppError> {
    let (stem, extension) = extract_filename_from_url(url_str)?;
    let extension = extension.unwrap_or_else(|| media_type.extension().to_string());
    let name = if index == 0 {
        format!("{stem}.{extension}")
    } else {
        format!("{stem}_{index}.{extension}")
    };
    Ok(output_dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_filename() {
        let (stem, ext) = extract_filename_from_url("https://example.com/img/logo.PNG").unwrap();
        assert_eq!(stem, "logo");
        assert_eq!(ext.as_deref(), Some("png"));

        let (stem, ext) = extract_filename_from_url("https://example.com/avatar?id=3").unwrap();
        assert_eq!(stem, "avatar");
        assert_eq!(ext, None);

        let (stem, _) = extract_filename_from_url("https://example.com/").unwrap();
        assert_eq!(stem, "resource");
    }

    #[test]
    fn test_extract_filename_sanitizes_and_truncates() {
        let (stem, _) = extract_filename_from_url("https://example.com/a%20b.jpg").unwrap();
        assert_eq!(stem, "a_20b");

        let long = format!("https://example.com/{}.gif", "x".repeat(40));
        let (stem, _) = extract_filename_from_url(&long).unwrap();
        assert_eq!(stem.len(), 30);
        assert!(stem.ends_with("..."));
    }

    #[test]
    fn test_extract_filename_rejects_bad_url() {
        assert!(matches!(
            extract_filename_from_url("not a url"),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_output_path_uses_media_type_fallback() {
        let dir = Path::new("/tmp/out");
        let path = output_path(dir, "https://example.com/avatar", MediaType::Webp, 0).unwrap();
        assert_eq!(path, dir.join("avatar.webp"));

        let path = output_path(dir, "https://example.com/a.jpg", MediaType::Png, 2).unwrap();
        assert_eq!(path, dir.join("a_2.jpg"));
    }

    #[tokio::test]
    async fn test_create_dirs() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("a").join("b");
        create_dirs(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
