//! Day-bucketed scratch files
//!
//! Scratch files are grouped under `tmp_dir/<category>/<user>/<YYYY_MM_DD>/`
//! so that when a disk fills up an operator can delete every day except the
//! current one without touching in-flight files.

use crate::error::Result;
use chrono::Local;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Return `count` random lowercase hex characters.
///
/// Backed by v4 uuids; `count` may exceed one uuid's worth of entropy.
pub fn random_hex(count: usize) -> String {
    let mut out = String::with_capacity(count);
    while out.len() < count {
        out.push_str(&Uuid::new_v4().simple().to_string());
    }
    out.truncate(count);
    out
}

/// Create an empty scratch file under the current day's bucket and return
/// its path. `part_name` becomes the file name prefix.
pub fn by_day(tmp_dir: &Path, category: &str, part_name: &str) -> Result<PathBuf> {
    let dir = day_dir(tmp_dir, category);
    std::fs::create_dir_all(&dir)?;
    let file = dir.join(format!("{}_{}", part_name, random_hex(20)));
    std::fs::File::create(&file)?;
    Ok(file)
}

/// The current day's bucket directory for a category.
pub fn day_dir(tmp_dir: &Path, category: &str) -> PathBuf {
    let date_path = Local::now().format("%Y_%m_%d").to_string();
    tmp_dir.join(category).join(current_user()).join(date_path)
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_length_and_charset() {
        let s = random_hex(20);
        assert_eq!(s.len(), 20);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));

        // longer than a single uuid's 32 hex chars
        assert_eq!(random_hex(40).len(), 40);
    }

    #[test]
    fn test_random_hex_is_random() {
        assert_ne!(random_hex(16), random_hex(16));
    }

    #[test]
    fn test_by_day_creates_bucketed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = by_day(tmp.path(), "s3", "orgs.0").unwrap();

        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("orgs.0_"));

        // tmp/<category>/<user>/<YYYY_MM_DD>/<file>
        let date = path.parent().unwrap();
        assert!(date
            .file_name()
            .unwrap()
            .to_string_lossy()
            .chars()
            .all(|c| c.is_ascii_digit() || c == '_'));
        let user = date.parent().unwrap();
        let category = user.parent().unwrap();
        assert_eq!(category.file_name().unwrap(), "s3");
    }
}
