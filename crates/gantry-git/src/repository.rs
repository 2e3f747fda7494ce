//! Git repository operations

use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::{debug, instrument};

use gantry_core::error::GitError;

/// Result type for git operations
pub type Result<T> = std::result::Result<T, GitError>;

/// Git repository wrapper
pub struct GitRepo {
    pub(crate) repo: Repository,
    path: PathBuf,
}

impl GitRepo {
    /// Open a repository at the given path
    #[instrument(fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                GitError::RepositoryNotFound(path.to_path_buf())
            } else {
                GitError::OpenFailed(e.to_string())
            }
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            repo,
        })
    }

    /// Discover and open a repository by searching parent directories
    #[instrument(fields(start_path = %start_path.display()))]
    pub fn discover(start_path: &Path) -> Result<Self> {
        debug!(start_path = %start_path.display(), "discovering git repository");
        let repo = Repository::discover(start_path).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                GitError::NotARepository(start_path.to_path_buf())
            } else {
                GitError::OpenFailed(e.to_string())
            }
        })?;

        let path = repo.workdir().unwrap_or_else(|| repo.path()).to_path_buf();

        Ok(Self { repo, path })
    }

    /// Get the repository path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the HEAD commit
    pub fn head_commit(&self) -> Result<git2::Commit<'_>> {
        let head = self.repo.head().map_err(|e| {
            if e.code() == git2::ErrorCode::UnbornBranch || e.code() == git2::ErrorCode::NotFound {
                GitError::NoCommits
            } else {
                GitError::Git2(e)
            }
        })?;
        head.peel_to_commit().map_err(GitError::Git2)
    }

    /// Resolve a revision (hash, branch or other rev-spec) to a commit
    pub(crate) fn resolve_commit(&self, revision: &str) -> Result<git2::Commit<'_>> {
        let object = self.repo.revparse_single(revision).map_err(|e| {
            if matches!(e.code(), git2::ErrorCode::NotFound | git2::ErrorCode::Ambiguous)
                || e.class() == git2::ErrorClass::Odb
            {
                GitError::RevisionNotFound {
                    repo: self.path.display().to_string(),
                    revision: revision.to_string(),
                }
            } else {
                GitError::Git2(e)
            }
        })?;
        object.peel_to_commit().map_err(GitError::Git2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{commit_files, init_repo};
    use tempfile::TempDir;

    #[test]
    fn test_open_repo() {
        let (temp, _repo) = init_repo();
        let repo = GitRepo::open(temp.path()).unwrap();
        assert_eq!(repo.path(), temp.path());
    }

    #[test]
    fn test_discover_repo() {
        let (temp, _repo) = init_repo();
        let subdir = temp.path().join("sub").join("dir");
        std::fs::create_dir_all(&subdir).unwrap();

        let repo = GitRepo::discover(&subdir).unwrap();
        let repo_path = repo.path().canonicalize().unwrap();
        let temp_path = temp.path().canonicalize().unwrap();
        assert_eq!(repo_path, temp_path);
    }

    #[test]
    fn test_not_a_repo() {
        let temp = TempDir::new().unwrap();
        let result = GitRepo::open(temp.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_head_commit_on_empty_repo() {
        let (temp, _repo) = init_repo();
        let repo = GitRepo::open(temp.path()).unwrap();
        assert!(matches!(repo.head_commit(), Err(GitError::NoCommits)));
    }

    #[test]
    fn test_resolve_unknown_revision() {
        let (temp, raw) = init_repo();
        commit_files(&raw, &[("a.txt", "a")], "first", 1_000);
        let repo = GitRepo::open(temp.path()).unwrap();

        let result = repo.resolve_commit("0000000000000000000000000000000000000001");
        assert!(matches!(result, Err(GitError::RevisionNotFound { .. })));
    }
}
