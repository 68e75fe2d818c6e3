use std::path::PathBuf;

use crate::config::DEFAULT_LOCAL_CONFIG_FILE_NAME;

/// Finds a project-level engine configuration file to pass via `--config`.
#[derive(Debug, Clone)]
pub struct LocalConfigDiscovery {
    file_name: String,
    search_paths: Option<Vec<PathBuf>>,
}

impl LocalConfigDiscovery {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            search_paths: None,
        }
    }

    /// Replace the default search order (package root, then working directory).
    pub fn with_search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Directories searched, in order.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        if let Some(paths) = &self.search_paths {
            return paths.clone();
        }

        let mut paths = Vec::new();
        // Set by cargo for tests and binaries run through it.
        if let Some(dir) = std::env::var_os("CARGO_MANIFEST_DIR") {
            paths.push(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::current_dir() {
            if !paths.contains(&dir) {
                paths.push(dir);
            }
        }
        paths
    }

    /// First existing configuration file, if any.
    pub fn discover(&self) -> Option<PathBuf> {
        self.search_paths()
            .into_iter()
            .map(|dir| dir.join(&self.file_name))
            .find(|candidate| candidate.is_file())
    }
}

impl Default for LocalConfigDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_CONFIG_FILE_NAME)
    }
}
