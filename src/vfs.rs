use crate::{errors::DestError, utils::normalize_path};
use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use std::{
    fmt, io,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 64 * 1024;

/// Whether a [`VirtualFile`] describes a regular file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// The subset of file metadata that travels with a [`VirtualFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: FileKind,
    /// Unix permission bits, when the platform has them.
    pub mode: Option<u32>,
}
impl Stat {
    pub fn file() -> Self {
        Self {
            kind: FileKind::File,
            mode: None,
        }
    }

    pub fn directory() -> Self {
        Self {
            kind: FileKind::Directory,
            mode: None,
        }
    }

    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let kind = if metadata.is_dir() {
            FileKind::Directory
        } else {
            FileKind::File
        };

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode() & 0o7777)
        };
        #[cfg(not(unix))]
        let mode = None;

        Self { kind, mode }
    }
}

/// Lazily produced file content, yielded in chunks.
pub struct ContentStream {
    inner: BoxStream<'static, io::Result<Vec<u8>>>,
}
impl ContentStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Reads `reader` in fixed size chunks until EOF or the first error.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(stream::unfold(Some(reader), |state| async move {
            let mut reader = state?;
            let mut chunk = vec![0u8; CHUNK_SIZE];
            match reader.read(&mut chunk).await {
                Ok(0) => None,
                Ok(n) => {
                    chunk.truncate(n);
                    Some((Ok(chunk), Some(reader)))
                }
                Err(error) => Some((Err(error), None)),
            }
        }))
    }

    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(chunks.into_iter().map(Ok)))
    }

    /// A stream that yields `error` and ends.
    pub fn failed(error: io::Error) -> Self {
        Self::new(stream::once(async move { Err(error) }))
    }

    /// Drains the stream into a single buffer.
    pub async fn read_to_end(mut self) -> io::Result<Vec<u8>> {
        let mut contents = Vec::new();
        while let Some(chunk) = self.next().await {
            contents.extend_from_slice(&chunk?);
        }
        Ok(contents)
    }
}
impl Stream for ContentStream {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStream").finish_non_exhaustive()
    }
}

/// The three states a file's content can be in. Exactly one holds at a time.
#[derive(Debug, Default)]
pub enum Contents {
    /// Content was never read.
    #[default]
    Null,
    Buffer(Vec<u8>),
    Stream(ContentStream),
}
impl Contents {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            Self::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }
}
impl From<Vec<u8>> for Contents {
    fn from(value: Vec<u8>) -> Self {
        Self::Buffer(value)
    }
}
impl From<ContentStream> for Contents {
    fn from(value: ContentStream) -> Self {
        Self::Stream(value)
    }
}

/// A file or directory flowing through a pipeline, independent of whether it
/// has been written to disk yet.
///
/// `path` is absolute and lives under `base`; the part of `path` below `base`
/// is what gets replicated under a destination folder.
#[derive(Debug)]
pub struct VirtualFile {
    /// The working directory the file was enumerated from.
    pub cwd: PathBuf,
    /// The root `path` is relative to.
    pub base: PathBuf,
    pub path: PathBuf,
    pub contents: Contents,
    /// `None` when the producer had no metadata; treated as a regular file.
    pub stat: Option<Stat>,
}
impl VirtualFile {
    pub fn new(
        cwd: impl Into<PathBuf>,
        base: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        contents: impl Into<Contents>,
    ) -> Self {
        Self {
            cwd: cwd.into(),
            base: base.into(),
            path: path.into(),
            contents: contents.into(),
            stat: None,
        }
    }

    pub fn with_stat(mut self, stat: Stat) -> Self {
        self.stat = Some(stat);
        self
    }

    pub fn is_directory(&self) -> bool {
        matches!(
            self.stat,
            Some(Stat {
                kind: FileKind::Directory,
                ..
            })
        )
    }

    /// The portion of `path` below `base`, with `.` and `..` segments resolved
    /// first so the result never climbs out of `base`.
    ///
    /// # Errors
    ///
    /// Returns [`DestError::PathResolution`] when `path` is empty, lies outside
    /// of `base` or is `base` itself.
    pub fn relative(&self) -> Result<PathBuf, DestError> {
        let unresolvable = || DestError::PathResolution {
            path: self.path.clone(),
            base: self.base.clone(),
        };

        if self.path.as_os_str().is_empty() {
            return Err(unresolvable());
        }

        let path = normalize_path(&self.path);
        let base = normalize_path(&self.base);

        match path.strip_prefix(&base) {
            Ok(relative) if !relative.as_os_str().is_empty() => Ok(relative.to_path_buf()),
            _ => Err(unresolvable()),
        }
    }
}
