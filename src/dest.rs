use crate::{
    config::DestOptions,
    errors::{DestError, FileOperation, IoError},
    source::resolve_cwd,
    vfs::{ContentStream, Contents, VirtualFile},
};
use futures::{stream, Stream, StreamExt, TryStreamExt};
use std::{
    collections::HashSet,
    fmt,
    future::Future,
    io,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};
use tokio::{
    fs::{DirBuilder, File, OpenOptions},
    io::AsyncWriteExt,
    sync::{mpsc, oneshot},
    task::{JoinHandle, JoinSet},
};

type FolderFn = dyn Fn(&VirtualFile) -> PathBuf + Send + Sync;

/// Where files are written: a fixed directory, or one chosen per file.
#[derive(Clone)]
pub enum Folder {
    Path(PathBuf),
    PerFile(Arc<FolderFn>),
}
impl Folder {
    pub fn per_file<F>(folder: F) -> Self
    where
        F: Fn(&VirtualFile) -> PathBuf + Send + Sync + 'static,
    {
        Self::PerFile(Arc::new(folder))
    }

    fn resolve(&self, file: &VirtualFile, cwd: &Path) -> Result<PathBuf, DestError> {
        let folder = match self {
            Self::Path(path) => path.clone(),
            Self::PerFile(folder) => folder(file),
        };

        if folder.as_os_str().is_empty() {
            return Err(DestError::InvalidFolder);
        }

        Ok(cwd.join(folder))
    }
}
impl fmt::Debug for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::PerFile(_) => f.write_str("PerFile(..)"),
        }
    }
}
impl From<PathBuf> for Folder {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}
impl From<&Path> for Folder {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}
impl From<&str> for Folder {
    fn from(value: &str) -> Self {
        Self::Path(PathBuf::from(value))
    }
}
impl From<String> for Folder {
    fn from(value: String) -> Self {
        Self::Path(PathBuf::from(value))
    }
}

/// A destination writing stage, ready to be piped a stream of files.
#[derive(Debug, Clone)]
pub struct Dest {
    folder: Folder,
    options: DestOptions,
}

/// Builds a stage writing files under `folder`.
///
/// A relative `folder` is resolved against [`DestOptions::cwd`] once the stage
/// runs.
///
/// # Errors
///
/// Returns [`DestError::InvalidFolder`] if `folder` is an empty path.
pub fn dest(folder: impl Into<Folder>, options: DestOptions) -> Result<Dest, DestError> {
    let folder = folder.into();

    if let Folder::Path(path) = &folder {
        if path.as_os_str().is_empty() {
            return Err(DestError::InvalidFolder);
        }
    }

    Ok(Dest { folder, options })
}

impl Dest {
    /// Spawns the stage on the current tokio runtime and returns its output.
    ///
    /// Each input file is written, then forwarded with its `path` rewritten to
    /// `folder/relative`. Output order matches input order. The output ends
    /// only once every write has settled; the first failure is yielded as the
    /// last item.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn pipe<S, E>(self, input: S) -> DestStream
    where
        S: Stream<Item = Result<VirtualFile, E>> + Send + 'static,
        E: Into<DestError> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(self.options.concurrency());

        let worker = tokio::spawn(async move {
            let mut writer = Writer::new(self.folder, self.options);

            if let Err(error) = writer.run(input, &sender).await {
                log::debug!("destination stream failed: {}", error);
                let _ = sender.send(Err(error)).await;
            }
        });

        DestStream {
            receiver,
            worker: Some(worker),
        }
    }
}

/// Output of [`Dest::pipe`]: every written file, then at most one error.
///
/// A worker that died without reporting (a panicking [`Folder::PerFile`]
/// closure, say) is yielded as [`DestError::TaskJoin`] before the end.
///
/// Dropping it aborts writes still in flight; their files may be left partial.
pub struct DestStream {
    receiver: mpsc::Receiver<Result<VirtualFile, DestError>>,
    // `None` once joined
    worker: Option<JoinHandle<()>>,
}
impl DestStream {
    /// Drains the stream, returning every forwarded file or the first error.
    pub async fn collect_files(self) -> Result<Vec<VirtualFile>, DestError> {
        self.try_collect().await
    }
}
impl Stream for DestStream {
    type Item = Result<VirtualFile, DestError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = ready!(self.receiver.poll_recv(cx)) {
            return Poll::Ready(Some(item));
        }

        let Some(worker) = self.worker.as_mut() else {
            return Poll::Ready(None);
        };

        let joined = ready!(Pin::new(worker).poll(cx));
        self.worker = None;

        match joined {
            Ok(()) => Poll::Ready(None),
            Err(error) => {
                log::debug!("destination worker did not finish: {}", error);
                Poll::Ready(Some(Err(DestError::TaskJoin(error))))
            }
        }
    }
}
impl Drop for DestStream {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.abort();
        }
    }
}

struct Writer {
    folder: Folder,
    options: DestOptions,
    // directories known to exist during this run
    known_dirs: HashSet<PathBuf>,
    in_flight: JoinSet<Result<(), DestError>>,
}
impl Writer {
    fn new(folder: Folder, options: DestOptions) -> Self {
        Self {
            folder,
            options,
            known_dirs: HashSet::new(),
            in_flight: JoinSet::new(),
        }
    }

    async fn run<S, E>(
        &mut self,
        input: S,
        output: &mpsc::Sender<Result<VirtualFile, DestError>>,
    ) -> Result<(), DestError>
    where
        S: Stream<Item = Result<VirtualFile, E>>,
        E: Into<DestError>,
    {
        let cwd = resolve_cwd(self.options.cwd.as_deref()).map_err(DestError::Cwd)?;

        let mut input = std::pin::pin!(input);

        while let Some(item) = input.next().await {
            self.reap_settled()?;

            let file = self.write(item.map_err(Into::into)?, &cwd).await?;

            if output.send(Ok(file)).await.is_err() {
                log::debug!("destination output dropped, stopping");
                return Ok(());
            }
        }

        while let Some(result) = self.in_flight.join_next().await {
            result??;
        }

        Ok(())
    }

    /// Surfaces failures of streaming writes that already settled.
    fn reap_settled(&mut self) -> Result<(), DestError> {
        while let Some(result) = self.in_flight.try_join_next() {
            result??;
        }

        Ok(())
    }

    async fn write(
        &mut self,
        mut file: VirtualFile,
        cwd: &Path,
    ) -> Result<VirtualFile, DestError> {
        let folder = self.folder.resolve(&file, cwd)?;
        let target = folder.join(file.relative()?);

        log::debug!("{} -> {}", file.path.display(), target.display());

        if file.is_directory() {
            self.create_directory(&target, &folder).await?;
        } else {
            if let Some(parent) = target.parent() {
                self.create_directory(parent, &folder).await?;
            }

            file.contents = match std::mem::take(&mut file.contents) {
                Contents::Null => Contents::Null,
                Contents::Buffer(bytes) => {
                    if self.may_write(&target).await? {
                        write_buffer(&target, &bytes, self.options.mode).await?;
                    }
                    Contents::Buffer(bytes)
                }
                Contents::Stream(stream) => {
                    if self.may_write(&target).await? {
                        self.spawn_stream_write(target.clone(), stream).await?
                    } else {
                        Contents::Stream(stream)
                    }
                }
            };
        }

        file.cwd = cwd.to_path_buf();
        file.base = folder;
        file.path = target;

        Ok(file)
    }

    async fn may_write(&self, target: &Path) -> Result<bool, DestError> {
        if self.options.overwrite {
            return Ok(true);
        }

        let exists = tokio::fs::try_exists(target).await.map_err(|error| {
            DestError::Write(IoError::new(FileOperation::Stat, target.into(), error))
        })?;

        if exists {
            log::debug!("keeping existing file: {}", target.display());
        }

        Ok(!exists)
    }

    /// Starts writing `stream` to `target` and returns contents that read the
    /// written file back once the write settles.
    async fn spawn_stream_write(
        &mut self,
        target: PathBuf,
        stream: ContentStream,
    ) -> Result<Contents, DestError> {
        while self.in_flight.len() >= self.options.concurrency() {
            if let Some(result) = self.in_flight.join_next().await {
                result??;
            }
        }

        let (settled, on_settled) = oneshot::channel();
        let mode = self.options.mode;
        let path = target.clone();

        self.in_flight.spawn(async move {
            let result = write_stream(&path, stream, mode).await;
            let outcome = match &result {
                Ok(()) => Ok(()),
                Err(error) => Err(io::Error::other(error.to_string())),
            };
            // the forwarded file may already be dropped
            let _ = settled.send(outcome);
            result
        });

        Ok(Contents::Stream(read_back(target, on_settled)))
    }

    /// Creates `path` and its ancestors unless already known to exist.
    ///
    /// Only directories at or below `folder` are remembered.
    async fn create_directory(&mut self, path: &Path, folder: &Path) -> Result<(), DestError> {
        if self.known_dirs.contains(path) {
            log::trace!("directory cached: {}", path.display());
            return Ok(());
        }

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            if let Some(mode) = self.options.dir_mode {
                builder.mode(mode);
            }
        }

        builder.create(path).await.map_err(|error| {
            DestError::DirectoryCreation(IoError::new(FileOperation::Mkdir, path.into(), error))
        })?;

        for ancestor in path.ancestors().take_while(|dir| dir.starts_with(folder)) {
            if !self.known_dirs.insert(ancestor.to_path_buf()) {
                break;
            }
        }

        Ok(())
    }
}

fn write_error(operation: FileOperation, path: &Path, error: io::Error) -> DestError {
    DestError::Write(IoError::new(operation, path.to_path_buf(), error))
}

/// Opens `path` for writing, creating or truncating it.
async fn open_for_write(path: &Path, mode: Option<u32>) -> Result<File, DestError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    let file = options
        .open(path)
        .await
        .map_err(|error| write_error(FileOperation::Open, path, error))?;

    // an existing file keeps its old mode unless it is set explicitly
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let Some(mode) = mode {
            file.set_permissions(std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|error| write_error(FileOperation::Write, path, error))?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(file)
}

async fn write_buffer(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), DestError> {
    let mut file = open_for_write(path, mode).await?;

    file.write_all(contents)
        .await
        .map_err(|error| write_error(FileOperation::Write, path, error))?;
    file.flush()
        .await
        .map_err(|error| write_error(FileOperation::Write, path, error))?;

    Ok(())
}

async fn write_stream(
    path: &Path,
    mut stream: ContentStream,
    mode: Option<u32>,
) -> Result<(), DestError> {
    let mut file = open_for_write(path, mode).await?;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| write_error(FileOperation::Read, path, error))?;

        file.write_all(&chunk)
            .await
            .map_err(|error| write_error(FileOperation::Write, path, error))?;
    }

    file.flush()
        .await
        .map_err(|error| write_error(FileOperation::Write, path, error))?;

    log::debug!("finished streaming {}", path.display());

    Ok(())
}

/// Contents that wait for the write of `path` to settle, then stream the file
/// from disk. Nothing is held in memory beyond the chunk being read.
fn read_back(path: PathBuf, on_settled: oneshot::Receiver<io::Result<()>>) -> ContentStream {
    let reopen = async move {
        let opened = match on_settled.await {
            Ok(Ok(())) => File::open(&path).await,
            Ok(Err(error)) => Err(error),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                format!("write of {} was cancelled", path.display()),
            )),
        };

        match opened {
            Ok(file) => ContentStream::from_reader(file),
            Err(error) => ContentStream::failed(error),
        }
    };

    ContentStream::new(stream::once(reopen).flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::fs;

    fn file(root: &Path, relative: &str, contents: Contents) -> VirtualFile {
        VirtualFile::new(root, root.join("src"), root.join("src").join(relative), contents)
    }

    #[test]
    fn empty_folder_is_rejected() {
        assert!(matches!(
            dest("", DestOptions::default()),
            Err(DestError::InvalidFolder)
        ));
    }

    #[test]
    fn relative_folder_resolves_against_cwd() {
        let folder = Folder::from("out");
        let vf = VirtualFile::new("/work", "/work/src", "/work/src/a", Contents::Null);

        assert_eq!(
            folder.resolve(&vf, Path::new("/work")).unwrap(),
            PathBuf::from("/work/out")
        );
    }

    #[tokio::test]
    async fn per_file_folder_routes_each_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let folder = Folder::per_file(|file: &VirtualFile| {
            if file.path.extension().is_some_and(|ext| ext == "md") {
                PathBuf::from("docs")
            } else {
                PathBuf::from("assets")
            }
        });
        let options = DestOptions {
            cwd: Some(root.to_path_buf()),
            ..DestOptions::default()
        };

        let input = stream::iter(vec![
            Ok::<_, DestError>(file(root, "readme.md", b"# hi".to_vec().into())),
            Ok(file(root, "logo.svg", b"<svg/>".to_vec().into())),
        ]);
        let files = dest(folder, options)
            .unwrap()
            .pipe(input)
            .collect_files()
            .await
            .unwrap();

        assert_eq!(files[0].path, root.join("docs/readme.md"));
        assert_eq!(files[1].path, root.join("assets/logo.svg"));
        assert_eq!(fs::read(root.join("docs/readme.md")).unwrap(), b"# hi");
        assert_eq!(files[1].base, root.join("assets"));
    }

    #[tokio::test]
    async fn per_file_folder_returning_empty_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let folder = Folder::per_file(|_: &VirtualFile| PathBuf::new());

        let input = stream::iter(vec![Ok::<_, DestError>(file(root, "a.txt", Contents::Null))]);
        let result = dest(folder, DestOptions::default())
            .unwrap()
            .pipe(input)
            .collect_files()
            .await;

        assert!(matches!(result, Err(DestError::InvalidFolder)));
    }

    #[tokio::test]
    async fn directory_cache_records_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Writer::new(Folder::from(dir.path()), DestOptions::default());
        let nested = dir.path().join("a/b/c");

        writer.create_directory(&nested, dir.path()).await.unwrap();

        assert!(nested.is_dir());
        assert!(writer.known_dirs.contains(&nested));
        assert!(writer.known_dirs.contains(&dir.path().join("a")));
        assert!(writer.known_dirs.contains(dir.path()));
    }

    #[tokio::test]
    async fn directory_cache_stops_at_destination_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Writer::new(Folder::from(dir.path()), DestOptions::default());

        writer
            .create_directory(&dir.path().join("a/b"), dir.path())
            .await
            .unwrap();

        let outside = dir.path().parent().unwrap();
        assert!(!writer.known_dirs.contains(outside));
        assert!(!writer.known_dirs.contains(Path::new("/")));
        assert_eq!(writer.known_dirs.len(), 3);
    }

    #[tokio::test]
    async fn failed_directory_creation_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let mut writer = Writer::new(Folder::from(dir.path()), DestOptions::default());

        let result = writer
            .create_directory(&blocker.join("child"), dir.path())
            .await;

        assert!(matches!(result, Err(DestError::DirectoryCreation(_))));
    }

    #[tokio::test]
    async fn upstream_error_is_forwarded_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let input = stream::iter(vec![
            Ok(file(root, "first.txt", b"1".to_vec().into())),
            Err(DestError::InvalidFolder),
            Ok(file(root, "third.txt", b"3".to_vec().into())),
        ]);

        let items: Vec<_> = dest(root.join("out"), DestOptions::default())
            .unwrap()
            .pipe(input)
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(DestError::InvalidFolder)));
        assert!(!root.join("out/third.txt").exists());
    }

    #[tokio::test]
    async fn failing_content_stream_surfaces_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let broken = ContentStream::new(stream::iter(vec![
            Ok(b"partial".to_vec()),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "upstream closed")),
        ]));

        let input = stream::iter(vec![Ok::<_, DestError>(file(root, "a.txt", broken.into()))]);
        let items: Vec<_> = dest(root.join("out"), DestOptions::default())
            .unwrap()
            .pipe(input)
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(DestError::Write(_))));
    }

    #[tokio::test]
    async fn panicking_folder_function_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let folder = Folder::per_file(|_: &VirtualFile| -> PathBuf {
            panic!("no folder for this file")
        });

        let input = stream::iter(vec![Ok::<_, DestError>(file(root, "a.txt", Contents::Null))]);
        let mut outstream = dest(folder, DestOptions::default()).unwrap().pipe(input);

        assert!(matches!(
            outstream.next().await,
            Some(Err(DestError::TaskJoin(_)))
        ));
        assert!(outstream.next().await.is_none());
    }

    #[tokio::test]
    async fn streamed_contents_are_read_back_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let chunks: Vec<io::Result<Vec<u8>>> = (0..32).map(|_| Ok(vec![b'x'; 1024])).collect();
        let contents = ContentStream::new(stream::iter(chunks));

        let input = stream::iter(vec![Ok::<_, DestError>(file(root, "big.bin", contents.into()))]);
        let mut files = dest(root.join("out"), DestOptions::default())
            .unwrap()
            .pipe(input)
            .collect_files()
            .await
            .unwrap();

        let target = root.join("out/big.bin");
        assert_eq!(fs::metadata(&target).unwrap().len(), 32 * 1024);

        fs::write(&target, "rewritten").unwrap();
        let Contents::Stream(replay) = std::mem::take(&mut files[0].contents) else {
            panic!("forwarded contents should be a stream");
        };

        assert_eq!(replay.read_to_end().await.unwrap(), b"rewritten");
    }

    #[tokio::test]
    async fn replay_of_failed_write_yields_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let broken = ContentStream::new(stream::iter(vec![
            Ok(b"partial".to_vec()),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "upstream closed")),
        ]));

        let input = stream::iter(vec![Ok::<_, DestError>(file(root, "a.txt", broken.into()))]);
        let mut items: Vec<_> = dest(root.join("out"), DestOptions::default())
            .unwrap()
            .pipe(input)
            .collect()
            .await;

        let Ok(mut forwarded) = items.remove(0) else {
            panic!("the file is forwarded before its write fails");
        };
        let Contents::Stream(replay) = std::mem::take(&mut forwarded.contents) else {
            panic!("forwarded contents should be a stream");
        };

        assert!(replay.read_to_end().await.is_err());
    }
}
