//! Small helpers.

use std::path::PathBuf;

/// Locate an executable on PATH.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_ubiquitous_binary() {
        // `sh` exists on any unix host the daemon supports.
        assert!(find_in_path("sh").is_some());
    }

    #[test]
    fn unknown_binaries_are_none() {
        assert!(find_in_path("definitely-not-a-real-binary-42").is_none());
    }
}
