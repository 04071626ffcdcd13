//! Working-tree path safety.

use std::path::{Component, Path, PathBuf};

/// Join a proposal-supplied relative path onto `root`.
///
/// Returns `None` for absolute paths and for any path that climbs out of the
/// tree with `..`. Leading `./` components are dropped. No filesystem access.
pub fn resolve_in_tree(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel = rel.trim();
    if rel.is_empty() {
        return None;
    }

    let mut resolved = root.to_path_buf();
    let mut pushed = false;
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    pushed.then_some(resolved)
}
