use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding normal component.
///
/// The filesystem is never consulted, so symlinks are not resolved. Leading
/// `..` components of a relative path are kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_current_dir() {
        assert_eq!(normalize(Path::new("./src/./hal.rs")), PathBuf::from("src/hal.rs"));
    }

    #[test]
    fn folds_parent_dir() {
        assert_eq!(
            normalize(Path::new("/p/src/hal/../drivers/uart.rs")),
            PathBuf::from("/p/src/drivers/uart.rs")
        );
    }

    #[test]
    fn keeps_leading_parent_of_relative_path() {
        assert_eq!(normalize(Path::new("a/../../b.rs")), PathBuf::from("../b.rs"));
    }

    #[test]
    fn parent_of_root_is_root() {
        assert_eq!(normalize(Path::new("/../x.rs")), PathBuf::from("/x.rs"));
    }
}
