use std::env;
use std::fs;
use std::path::PathBuf;

const ROOT_ENV: &str = "RAG_AGENTS_ROOT";
const DATA_DIR_ENV: &str = "RAG_AGENTS_DATA_DIR";

/// Filesystem layout of a running service.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub project_root: PathBuf,
    pub user_data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub vector_db_path: PathBuf,
    pub credentials_path: PathBuf,
}

impl AppPaths {
    /// `RAG_AGENTS_ROOT` (default: working directory) and
    /// `RAG_AGENTS_DATA_DIR` (default: `<root>/data`).
    pub fn new() -> Self {
        let project_root = env_path(ROOT_ENV)
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let user_data_dir = env_path(DATA_DIR_ENV).unwrap_or_else(|| project_root.join("data"));
        Self::from_dirs(project_root, user_data_dir)
    }

    /// Lays out every path under an explicit data directory.
    pub fn from_dirs(project_root: PathBuf, user_data_dir: PathBuf) -> Self {
        let log_dir = user_data_dir.join("logs");
        for dir in [&user_data_dir, &log_dir] {
            if let Err(err) = fs::create_dir_all(dir) {
                tracing::warn!("Could not create {}: {}", dir.display(), err);
            }
        }

        AppPaths {
            db_path: user_data_dir.join("rag_agents.db"),
            vector_db_path: user_data_dir.join("vectors.db"),
            credentials_path: user_data_dir.join("credentials.yml"),
            project_root,
            user_data_dir,
            log_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_lives_under_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("nested").join("data");
        let paths = AppPaths::from_dirs(dir.path().to_path_buf(), data.clone());

        assert!(paths.log_dir.is_dir());
        assert_eq!(paths.db_path, data.join("rag_agents.db"));
        assert_eq!(paths.vector_db_path, data.join("vectors.db"));
        assert_eq!(paths.credentials_path, data.join("credentials.yml"));
        assert_eq!(paths.project_root, dir.path());
    }
}
