use std::{
    ffi::OsStr,
    path::{Component, Path, PathBuf},
};

/// Lexically resolves `.` and `..` segments without touching the filesystem.
pub fn normalize_path(source: &Path) -> PathBuf {
    let mut new_path = PathBuf::new();

    for component in source.components() {
        match component {
            // Skip the current-dir marker "."
            Component::CurDir => {}

            // For "..", pop the last component if possible
            Component::ParentDir => {
                new_path.pop();
            }

            // For normal components, push them
            other => new_path.push(other.as_os_str()),
        }
    }

    new_path
}

pub fn is_glob_magic(segment: &OsStr) -> bool {
    lazy_static::lazy_static! {
        static ref GLOB_MAGIC_REGEX: regex::Regex = regex::Regex::new(
            r"(?x)        # Enable extended mode
            [*?]          # 1) wildcards
            |
            \[.*\]        # 2) character classes
            "
        ).expect("a valid regex pattern");
    }

    GLOB_MAGIC_REGEX.is_match(&segment.to_string_lossy())
}

/// A glob resolved against a working directory, split into the directory that
/// holds every possible match and the wildcard remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobParts {
    pub base: PathBuf,
    /// `None` when the glob names a single path.
    pub magic: Option<PathBuf>,
}
impl GlobParts {
    /// Only segments that come from `glob` itself are inspected for wildcards, so
    /// a `cwd` containing `[` or `*` is taken literally.
    pub fn split(cwd: &Path, glob: &str) -> Self {
        let cwd = normalize_path(cwd);
        let joined = normalize_path(&cwd.join(glob));

        let literal_prefix = if joined.starts_with(&cwd) {
            cwd.components().count()
        } else {
            0
        };

        let mut base = PathBuf::new();
        let mut magic = PathBuf::new();

        for (index, component) in joined.components().enumerate() {
            let is_literal = index < literal_prefix || !is_glob_magic(component.as_os_str());

            if magic.as_os_str().is_empty() && is_literal {
                base.push(component.as_os_str());
            } else {
                magic.push(component.as_os_str());
            }
        }

        if magic.as_os_str().is_empty() {
            Self { base, magic: None }
        } else {
            Self {
                base,
                magic: Some(magic),
            }
        }
    }

    /// The full pattern with the literal base escaped.
    pub fn pattern(&self) -> Option<String> {
        let magic = self.magic.as_ref()?;
        let escaped = PathBuf::from(glob::Pattern::escape(&self.base.to_string_lossy()));

        Some(escaped.join(magic).to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_drops_dots() {
        assert_eq!(
            normalize_path(Path::new("/work/./fixtures/../out")),
            PathBuf::from("/work/out")
        );
    }

    #[test]
    fn detects_magic_segments() {
        assert!(is_glob_magic(OsStr::new("*.txt")));
        assert!(is_glob_magic(OsStr::new("**")));
        assert!(is_glob_magic(OsStr::new("file?.rs")));
        assert!(is_glob_magic(OsStr::new("[abc].md")));
        assert!(!is_glob_magic(OsStr::new("fixtures")));
        assert!(!is_glob_magic(OsStr::new("example.txt")));
    }

    #[test]
    fn splits_recursive_glob() {
        let parts = GlobParts::split(Path::new("/work"), "./fixtures/**/*.txt");

        assert_eq!(parts.base, PathBuf::from("/work/fixtures"));
        assert_eq!(parts.magic, Some(PathBuf::from("**/*.txt")));
        assert_eq!(
            parts.pattern(),
            Some(String::from("/work/fixtures/**/*.txt"))
        );
    }

    #[test]
    fn literal_glob_has_no_magic() {
        let parts = GlobParts::split(Path::new("/work"), "./fixtures/stuff");

        assert_eq!(parts.base, PathBuf::from("/work/fixtures/stuff"));
        assert_eq!(parts.magic, None);
        assert_eq!(parts.pattern(), None);
    }

    #[test]
    fn cwd_wildcards_are_literal() {
        let parts = GlobParts::split(Path::new("/tmp/[build]"), "*.txt");

        assert_eq!(parts.base, PathBuf::from("/tmp/[build]"));
        assert_eq!(parts.pattern(), Some(String::from("/tmp/[[]build[]]/*.txt")));
    }

    #[test]
    fn absolute_glob_ignores_cwd() {
        let parts = GlobParts::split(Path::new("/work"), "/data/*.csv");

        assert_eq!(parts.base, PathBuf::from("/data"));
        assert_eq!(parts.magic, Some(PathBuf::from("*.csv")));
    }
}
