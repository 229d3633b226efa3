// 路径工具
use std::path::{Component, Path, PathBuf};

pub fn ensure_parent_dir<P: AsRef<Path>>(file_path: P) -> std::io::Result<()> {
    if let Some(parent) = file_path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Expands a leading `~` against the local home directory.
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home::home_dir() {
        Some(home) if rest.as_os_str().is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Absolute, lexically normalized form of a local path.
///
/// `~` is expanded, relative paths are joined onto the current directory,
/// and `.`, `..`, repeated and trailing separators are folded away. The file
/// system is not consulted, so the path need not exist.
pub fn absolute_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let expanded = expand_tilde(path);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => expanded,
        }
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Final path segment, for both local and remote (`/`-separated) paths.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Expands a leading `~` against the remote home directory.
pub fn expand_remote_tilde(path: &str, remote_home: &str) -> String {
    if path == "~" {
        remote_home.to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("{}/{}", remote_home.trim_end_matches('/'), rest)
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_path_folds_equivalent_spellings() {
        let a = absolute_path("/home/alice/.ssh/id_rsa");
        let b = absolute_path("/home/alice//.ssh/./keys/../id_rsa/");
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/home/alice/.ssh/id_rsa"));
    }

    #[test]
    fn absolute_path_joins_relative_onto_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolute_path("id_rsa"), cwd.join("id_rsa"));
    }

    #[test]
    fn base_name_of_remote_and_local_paths() {
        assert_eq!(base_name("/a/b/file.txt"), "file.txt");
        assert_eq!(base_name("x.txt"), "x.txt");
        assert_eq!(base_name("dir/sub/"), "sub");
    }

    #[test]
    fn remote_tilde_only_expands_prefix() {
        assert_eq!(expand_remote_tilde("~", "/home/bob"), "/home/bob");
        assert_eq!(expand_remote_tilde("~/data/x.csv", "/home/bob/"), "/home/bob/data/x.csv");
        assert_eq!(expand_remote_tilde("/tmp/a~b", "/home/bob"), "/tmp/a~b");
        assert_eq!(expand_remote_tilde("x.txt", "/home/bob"), "x.txt");
    }

    #[test]
    fn ensure_parent_dir_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/deeper/file.toml");
        ensure_parent_dir(&target).unwrap();
        assert!(target.parent().unwrap().is_dir());
    }
}
