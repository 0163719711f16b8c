use crate::{
    config::SrcOptions,
    errors::{FileOperation, IoError, SourceError},
    utils::{normalize_path, GlobParts},
    vfs::{ContentStream, Contents, FileKind, Stat, VirtualFile},
};
use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use glob::{MatchOptions, Pattern};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A matched path, before its contents are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceEntry {
    path: PathBuf,
    base: PathBuf,
    stat: Stat,
}

/// A stream of [`VirtualFile`]s produced by [`src`], in glob order and then
/// file name order.
pub struct SrcStream {
    inner: BoxStream<'static, Result<VirtualFile, SourceError>>,
}
impl Stream for SrcStream {
    type Item = Result<VirtualFile, SourceError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

pub(crate) fn resolve_cwd(cwd: Option<&Path>) -> Result<PathBuf, IoError> {
    let current = || {
        std::env::current_dir()
            .map_err(|error| IoError::new(FileOperation::Stat, PathBuf::from("."), error))
    };

    let cwd = match cwd {
        Some(cwd) if cwd.is_absolute() => cwd.to_path_buf(),
        Some(cwd) => current()?.join(cwd),
        None => current()?,
    };

    Ok(normalize_path(&cwd))
}

/// Enumerates the files matching `globs` as [`VirtualFile`]s.
///
/// Matching happens eagerly; contents are loaded as the stream is polled. An
/// entry matched by several globs is emitted once.
///
/// # Errors
///
/// Returns a [`SourceError`] if a glob is invalid, a glob without wildcards
/// names nothing, or a directory cannot be walked.
pub fn src<I, S>(globs: I, options: SrcOptions) -> Result<SrcStream, SourceError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cwd = resolve_cwd(options.cwd.as_deref())?;

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for glob in globs {
        for entry in resolve_glob(&cwd, glob.as_ref())? {
            if seen.insert(entry.path.clone()) {
                entries.push(entry);
            }
        }
    }

    log::debug!(
        "matched {} source entries from {}",
        entries.len(),
        cwd.display()
    );

    let SrcOptions { read, buffer, .. } = options;

    let inner = stream::iter(entries)
        .then(move |entry| load(cwd.clone(), entry, read, buffer))
        .boxed();

    Ok(SrcStream { inner })
}

fn resolve_glob(cwd: &Path, glob: &str) -> Result<Vec<SourceEntry>, SourceError> {
    let parts = GlobParts::split(cwd, glob);

    let Some(pattern) = parts.pattern() else {
        let metadata = match std::fs::metadata(&parts.base) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NoMatch {
                    pattern: glob.to_string(),
                });
            }
            Err(error) => Err(IoError::new(FileOperation::Stat, parts.base.clone(), error))?,
        };

        let base = parts
            .base
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| parts.base.clone());

        return Ok(vec![SourceEntry {
            path: parts.base,
            base,
            stat: Stat::from_metadata(&metadata),
        }]);
    };

    let matcher = Pattern::new(&pattern).map_err(|err| SourceError::InvalidGlob {
        pattern: glob.to_string(),
        source: err,
    })?;

    if !parts.base.is_dir() {
        log::debug!("glob base {} does not exist", parts.base.display());
        return Ok(vec![]);
    }

    let mut entries = Vec::new();

    for entry in WalkDir::new(&parts.base).min_depth(1).sort_by_file_name() {
        let entry = entry?;

        if !matcher.matches_path_with(entry.path(), MATCH_OPTIONS) {
            continue;
        }

        let metadata = entry.metadata()?;

        entries.push(SourceEntry {
            path: entry.path().to_path_buf(),
            base: parts.base.clone(),
            stat: Stat::from_metadata(&metadata),
        });
    }

    Ok(entries)
}

async fn load(
    cwd: PathBuf,
    entry: SourceEntry,
    read: bool,
    buffer: bool,
) -> Result<VirtualFile, SourceError> {
    let SourceEntry { path, base, stat } = entry;

    let contents = if stat.kind == FileKind::Directory || !read {
        Contents::Null
    } else if buffer {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| IoError::new(FileOperation::Read, path.clone(), error))?;

        Contents::Buffer(bytes)
    } else {
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|error| IoError::new(FileOperation::Open, path.clone(), error))?;

        Contents::Stream(ContentStream::from_reader(file))
    };

    Ok(VirtualFile {
        cwd,
        base,
        path,
        contents,
        stat: Some(stat),
    })
}
