use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(path)?;
    Ok(path.to_path_buf())
}

/// Current Unix timestamp in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Random alphanumeric string of `len` characters.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Convert a string to a safe filename.
pub fn safe_filename(name: &str) -> String {
    const UNSAFE: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
    let mut result = name.to_string();
    for &c in UNSAFE {
        result = result.replace(c, "_");
    }
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("hello"), "hello");
        assert_eq!(safe_filename("file<name>"), "file_name_");
        assert_eq!(safe_filename("path/to\\file"), "path_to_file");
        assert_eq!(safe_filename("a:b|c?d*e"), "a_b_c_d_e");
    }

    #[test]
    fn test_random_string_length_and_charset() {
        let s = random_string(40);
        assert_eq!(s.len(), 40);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_string(40), s);
    }

    #[test]
    fn test_unix_now_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(unix_now() > 1_577_836_800);
    }

    #[test]
    fn test_ensure_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let subdir = tmp.path().join("a").join("b").join("c");
        assert!(!subdir.exists());
        ensure_dir(&subdir).unwrap();
        assert!(subdir.exists());
    }
}
