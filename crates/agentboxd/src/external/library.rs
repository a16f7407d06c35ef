//! Library listings for CLI completion (mcp servers and skills).

use std::path::{Path, PathBuf};

/// Names of the entries under one library subdirectory: directories keep
/// their name, files lose their extension. Missing directories are empty.
pub fn list_entries(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry_name(&entry.path()))
        .collect();
    names.sort();
    names
}

fn entry_name(path: &PathBuf) -> Option<String> {
    let name = if path.is_dir() {
        path.file_name()?.to_str()?
    } else {
        path.file_stem()?.to_str()?
    };
    if name.starts_with('.') {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_directories_and_file_stems_sorted() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("github")).unwrap();
        std::fs::create_dir(dir.path().join("analyst")).unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();

        assert_eq!(list_entries(dir.path()), vec!["analyst", "github", "notes"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        assert!(list_entries(Path::new("/does/not/exist")).is_empty());
    }
}
