use crate::{
    config::{DestOptions, SrcOptions},
    dest::{self, Folder},
    errors::{ConfigError, DestError, SourceError},
    source,
    vfs::VirtualFile,
};
use futures::StreamExt;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DestfsError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dest(#[from] DestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

/// Copies every file matching `globs` under `folder`, calling `on_file` for each
/// file as it is forwarded by the destination stage.
///
/// Returns the number of forwarded files once every write has settled.
///
/// # Errors
///
/// Returns a [`DestfsError`] if:
///
/// - A glob is invalid or a glob without wildcards matches nothing.
/// - A source file cannot be read.
/// - `folder` is empty or a file cannot be placed under it.
/// - A directory or file cannot be created or written to.
pub async fn copy<I, S, F>(
    globs: I,
    folder: impl Into<Folder>,
    src_options: SrcOptions,
    dest_options: DestOptions,
    mut on_file: F,
) -> Result<usize, DestfsError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    F: FnMut(&VirtualFile),
{
    let files = source::src(globs, src_options)?;

    log::debug!("Attempting to write files with options: {:?}", dest_options);

    let mut output = dest::dest(folder, dest_options)?.pipe(files);

    let mut written = 0;
    while let Some(file) = output.next().await {
        let file = file?;
        on_file(&file);
        written += 1;
    }

    Ok(written)
}
