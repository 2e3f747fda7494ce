//! Reading file contents at a revision

use std::path::Path;

use tracing::debug;

use gantry_core::error::GitError;

use crate::repository::{GitRepo, Result};

impl GitRepo {
    /// Read `path` as it exists in `revision`. Returns `Ok(None)` when the
    /// path is absent from that revision's tree. Contents must be UTF-8.
    pub fn read_file_at(&self, revision: &str, path: &str) -> Result<Option<String>> {
        let commit = self.resolve_commit(revision)?;
        let tree = commit.tree()?;

        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                debug!(revision, path, "file not present at revision");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let object = entry.to_object(&self.repo)?;
        let blob = object.peel_to_blob()?;
        let contents =
            String::from_utf8(blob.content().to_vec()).map_err(|_| GitError::InvalidUtf8 {
                revision: revision.to_string(),
                path: path.to_string(),
            })?;
        Ok(Some(contents))
    }
}
