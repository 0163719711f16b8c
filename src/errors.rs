use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FileOperation {
    #[error("reading a file")]
    Read,
    #[error("opening a file")]
    Open,
    #[error("writing a file")]
    Write,
    #[error("creating a directory")]
    Mkdir,
    #[error("reading metadata")]
    Stat,
}
#[derive(Debug, Error, Diagnostic)]
#[error("I/O error: {operation} on path '{path}'")]
#[diagnostic(
    code(destfs::io),
    help("Check file permissions, disk space, or that the path is correct.")
)]
pub struct IoError {
    pub operation: FileOperation,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
impl IoError {
    pub fn new(operation: FileOperation, path: PathBuf, error: std::io::Error) -> Self {
        Self {
            operation,
            path,
            source: error,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum SourceError {
    #[error("I/O error while enumerating source files")]
    #[diagnostic(code(destfs::source::io))]
    Io(#[from] IoError),

    #[error("invalid glob pattern: '{pattern}'")]
    #[diagnostic(
        code(destfs::source::invalid_glob),
        help("Supported wildcards are '*', '**', '?' and '[...]'")
    )]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("file not found with singular glob: '{pattern}'")]
    #[diagnostic(
        code(destfs::source::no_match),
        help("A glob without wildcards must name an existing file or directory")
    )]
    NoMatch { pattern: String },

    #[error("unable to walk source directory")]
    #[diagnostic(code(destfs::source::walk))]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Error, Diagnostic)]
pub enum DestError {
    #[error("unable to resolve '{path}' relative to base '{base}'")]
    #[diagnostic(
        code(destfs::dest::path_resolution),
        help("The file path must live strictly under its base directory")
    )]
    PathResolution { path: PathBuf, base: PathBuf },

    #[error("unable to create output directory")]
    #[diagnostic(code(destfs::dest::mkdir))]
    DirectoryCreation(#[source] IoError),

    #[error("unable to write output file")]
    #[diagnostic(code(destfs::dest::write))]
    Write(#[source] IoError),

    #[error("unable to resolve the working directory")]
    #[diagnostic(code(destfs::dest::cwd))]
    Cwd(#[source] IoError),

    #[error("invalid output folder provided")]
    #[diagnostic(
        code(destfs::dest::invalid_folder),
        help("Provide a non-empty destination directory")
    )]
    InvalidFolder,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),

    #[error("write task did not complete")]
    #[diagnostic(code(destfs::dest::task_join))]
    TaskJoin(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("I/O error while loading configuration")]
    #[diagnostic(code(destfs::config::io))]
    Io(#[from] IoError),

    #[error("Unable to parse toml file at '{path}': {source}")]
    #[diagnostic(code(destfs::config::parse_toml), help("Review toml file"))]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
