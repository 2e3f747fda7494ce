//! Gantry Git - Repository access for the scheduler
//!
//! This crate reads commit history and file contents at arbitrary revisions
//! and exposes them to the scheduler through [`gantry_core::RepoSource`].

mod commits;
mod files;
mod repo_map;
mod repository;

pub use repo_map::RepoMap;
pub use repository::{GitRepo, Result};

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use git2::{Repository, Signature, Time};
    use tempfile::TempDir;

    /// Commit `files` on top of HEAD with the given commit time
    pub fn commit_files(repo: &Repository, files: &[(&str, &str)], message: &str, secs: i64) -> String {
        let workdir = repo.workdir().unwrap().to_path_buf();
        let mut index = repo.index().unwrap();
        for (path, contents) in files {
            let full = workdir.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, contents).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();

        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::new("Test", "test@example.com", &Time::new(secs, 0)).unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
            .to_string()
    }

    pub fn init_repo() -> (TempDir, Repository) {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init(temp.path()).unwrap();
        (temp, repo)
    }
}
