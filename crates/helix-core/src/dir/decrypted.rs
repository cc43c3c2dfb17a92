use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::fs::tree::{FsTree, TreeOptions};

/// Per-pair state directory inside the plaintext root.
pub const SYNC_DIR_NAME: &str = ".helix";

/// The plaintext side of a pair.
pub struct DecryptedDirectory {
    tree: FsTree,
}

impl DecryptedDirectory {
    pub fn new(root: &Path, options: TreeOptions) -> Self {
        let case_sensitive = options.case_sensitive;
        let tree = FsTree::new(root, options).with_filter(Box::new(move |rel: &str| {
            let top = rel.split('/').next().unwrap_or(rel);
            if case_sensitive {
                top == SYNC_DIR_NAME
            } else {
                top.eq_ignore_ascii_case(SYNC_DIR_NAME)
            }
        }));
        DecryptedDirectory { tree }
    }

    pub fn root(&self) -> &Path {
        self.tree.root_path()
    }

    pub fn tree(&mut self) -> &mut FsTree {
        &mut self.tree
    }

    /// Location of the sync log shared with the encrypted directory `directory_id`.
    pub fn sync_log_path(&self, directory_id: Uuid) -> PathBuf {
        self.root()
            .join(SYNC_DIR_NAME)
            .join(format!("{}.sync.log", directory_id.hyphenated()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_dir_is_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".helix")).unwrap();
        std::fs::write(dir.path().join(".helix/x.sync.log"), b"").unwrap();
        std::fs::write(dir.path().join("visible"), b"").unwrap();

        let mut decr = DecryptedDirectory::new(dir.path(), TreeOptions { case_sensitive: true, what_if: false });
        let names: Vec<String> = decr.tree().entries().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["visible"]);
    }

    #[test]
    fn test_sync_log_path() {
        let decr = DecryptedDirectory::new(Path::new("/data"), TreeOptions { case_sensitive: true, what_if: false });
        let id = Uuid::nil();
        assert_eq!(
            decr.sync_log_path(id),
            Path::new("/data/.helix/00000000-0000-0000-0000-000000000000.sync.log")
        );
    }
}
