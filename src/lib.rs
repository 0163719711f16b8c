//! Write streams of virtual files to a destination directory.
//!
//! A [`VirtualFile`] carries a path relative to its `base` and contents that are
//! either absent, buffered or streamed. [`dest`] builds a stage that writes each
//! file under a destination folder, replicating the relative layout, and hands
//! the file on with its path rewritten. [`src`] produces such files from globs.
//!
//! ```no_run
//! use destfs::{dest, src, DestOptions, SrcOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let files = src(["fixtures/**/*.txt"], SrcOptions::default())?;
//! let written = dest("out", DestOptions::default())?
//!     .pipe(files)
//!     .collect_files()
//!     .await?;
//! println!("wrote {} files", written.len());
//! # Ok(())
//! # }
//! ```
pub mod api;
pub mod config;
pub mod dest;
pub mod errors;
pub mod source;
pub mod utils;
pub mod vfs;

pub use config::{DestOptions, SrcOptions};
pub use dest::{dest, Dest, DestStream, Folder};
pub use errors::{DestError, SourceError};
pub use source::{src, SrcStream};
pub use vfs::{ContentStream, Contents, FileKind, Stat, VirtualFile};
