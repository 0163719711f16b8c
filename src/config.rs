use crate::errors::{ConfigError, FileOperation, IoError};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};

const DEFAULT_CONCURRENCY: usize = 16;

fn default_overwrite() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Options recognized by [`crate::dest::dest`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DestOptions {
    /// Directory a relative destination folder is resolved against. Defaults to
    /// the process working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Permission bits for written files. When unset, new files get the OS
    /// default and existing files keep their mode.
    #[serde(default)]
    pub mode: Option<u32>,
    /// Permission bits for created directories.
    #[serde(default)]
    pub dir_mode: Option<u32>,
    /// When `false`, existing files at the target path are left untouched.
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
    /// Upper bound on in-flight streaming writes and on buffered output items.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}
impl Default for DestOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            mode: None,
            dir_mode: None,
            overwrite: default_overwrite(),
            concurrency: default_concurrency(),
        }
    }
}
impl DestOptions {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .map_err(|error| IoError::new(FileOperation::Read, path.to_path_buf(), error))?;

        let parsed = toml::from_str(&content).map_err(|err| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source: err,
        })?;

        Ok(parsed)
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// Options recognized by [`crate::source::src`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcOptions {
    /// Directory globs are resolved against.
    pub cwd: Option<PathBuf>,
    /// When `false`, files are emitted without contents.
    pub read: bool,
    /// When `false`, read files carry streaming contents instead of a buffer.
    pub buffer: bool,
}
impl Default for SrcOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            read: true,
            buffer: true,
        }
    }
}
