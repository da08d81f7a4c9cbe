//! Rendered site directory access.
//!
//! A [`SiteTree`] is the read-only view the cache and upload engine share of
//! a directory produced by the site generator. Files are discovered with an
//! async depth-first walk via `tokio::fs`.

use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::{path_key, validate_path};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::{self, DirEntry};
use tracing::instrument;

pub type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Read-only view of a rendered site directory.
///
/// # Examples
///
/// ```no_run
/// use sitedrop_storage::SiteTree;
///
/// # async fn example() -> sitedrop_storage::error::Result<()> {
/// let tree = SiteTree::open("public")?.exclude(".sitedrop");
/// for file in tree.list().await? {
///     println!("{} ({} bytes)", file.key, file.size);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SiteTree {
    root: PathBuf,
    /// Relative paths that are never walked into or listed.
    excluded: Vec<PathBuf>,
}
impl SiteTree {
    /// Open an existing site directory.
    ///
    /// Relative roots are resolved against the current working directory.
    /// Returns [`NotFound`](ErrorKind::NotFound) if the directory does not
    /// exist and [`NotADirectory`](ErrorKind::NotADirectory) if it is a file.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::path::absolute(root.as_ref()).map_err(|e| Self::map_io_error(e, root.as_ref()))?;
        let metadata = std::fs::metadata(&root).map_err(|e| Self::map_io_error(e, &root))?;
        if !metadata.is_dir() {
            exn::bail!(ErrorKind::NotADirectory(root));
        }
        Ok(Self { root, excluded: Vec::new() })
    }

    /// Never list anything at or below the given relative path.
    pub fn exclude(mut self, path: impl AsRef<Path>) -> Self {
        if let Ok(validated) = validate_path(path) {
            self.excluded.push(validated);
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the absolute path for a relative site path.
    pub fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn relative_path(&self, absolute: &Path) -> Result<PathBuf> {
        let relative = absolute
            .strip_prefix(&self.root)
            .or_raise(|| ErrorKind::InvalidPath(absolute.to_path_buf()))?;
        validate_path(relative)
    }

    fn is_excluded(&self, relative: &Path) -> bool {
        self.excluded.iter().any(|excluded| relative.starts_with(excluded))
    }

    fn file_info(&self, relative: PathBuf, absolute: PathBuf, metadata: &Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
        Ok(FileInfo {
            key: path_key(&relative)?,
            path: relative,
            absolute,
            size: metadata.len(),
            modified,
        })
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn process_entry(&self, entry: DirEntry) -> Result<WalkEntry> {
        let path = entry.path();
        let relative = self.relative_path(&path)?;
        if self.is_excluded(&relative) {
            return Ok(WalkEntry::Skip);
        }
        let file_type = entry.file_type().await.map_err(|e| Self::map_io_error(e, &path))?;
        let metadata = if file_type.is_symlink() {
            // Linked files are published like regular ones. Linked directories
            // are never descended into, so a link back up the tree cannot loop.
            match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_dir() => {
                    tracing::debug!(path = %relative.display(), "Skipping symlinked directory");
                    return Ok(WalkEntry::Skip);
                },
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::warn!(path = %relative.display(), error = %err, "Skipping broken symlink");
                    return Ok(WalkEntry::Skip);
                },
            }
        } else {
            entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?
        };
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if metadata.is_file() {
            return Ok(WalkEntry::File(self.file_info(relative, path, &metadata)?));
        }
        Ok(WalkEntry::Skip)
    }

    /// Stream every regular file below the root.
    ///
    /// Errors are yielded in place; walking continues with the next entry.
    /// Order is unspecified, use [`list()`](Self::list) for a stable order.
    pub fn list_stream(&self) -> FileInfoStream<'_> {
        let mut stack = vec![self.root.clone()];
        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };
                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    /// List every regular file below the root, sorted by key.
    ///
    /// The first walk error aborts the listing.
    #[instrument(skip(self), fields(root = %self.root.display()), err(Debug))]
    pub async fn list(&self) -> Result<Vec<FileInfo>> {
        let mut files: Vec<FileInfo> = self.list_stream().try_collect().await?;
        files.sort_by(|a, b| a.key.cmp(&b.key));
        tracing::debug!(files = files.len(), "Listed site tree");
        Ok(files)
    }

    /// Read a file's contents.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let absolute = self.absolute_path(path)?;
        Ok(fs::read(&absolute).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    /// Get metadata for a single file without reading it.
    pub async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let absolute = self.absolute_path(path)?;
        let metadata = fs::metadata(&absolute).await.map_err(|e| Self::map_io_error(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let relative = validate_path(path)?;
        self.file_info(relative, absolute, &metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, write};

    fn site(files: &[(&str, &[u8])]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, data) in files {
            let full = dir.path().join(path);
            create_dir_all(full.parent().unwrap()).unwrap();
            write(full, data).unwrap();
        }
        dir
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = SiteTree::open(dir.path().join("public")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_open_file_is_not_a_directory() {
        let dir = site(&[("index.html", b"<html></html>")]);
        let err = SiteTree::open(dir.path().join("index.html")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotADirectory(_)));
    }

    #[test]
    fn test_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SiteTree::open(dir.path()).unwrap();
        let expected = tree.root().join("blog/post.html");
        assert_eq!(tree.absolute_path("blog/post.html").unwrap(), expected);
        assert!(tree.absolute_path("../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_list_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SiteTree::open(dir.path()).unwrap();
        assert!(tree.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_recursive() {
        let dir = site(&[
            ("index.html", b"home"),
            ("blog/2024/post.html", b"post"),
            ("assets/site.css", b"body{}"),
        ]);
        let tree = SiteTree::open(dir.path()).unwrap();
        let keys: Vec<_> = tree.list().await.unwrap().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["assets/site.css", "blog/2024/post.html", "index.html"]);
    }

    #[tokio::test]
    async fn test_list_reports_sizes_and_absolute_paths() {
        let dir = site(&[("robots.txt", b"User-agent: *"), ("empty.txt", b"")]);
        let tree = SiteTree::open(dir.path()).unwrap();
        let files = tree.list().await.unwrap();
        assert_eq!(files[0].key, "empty.txt");
        assert_eq!(files[0].size, 0);
        assert_eq!(files[1].size, 13);
        assert_eq!(files[1].absolute, tree.root().join("robots.txt"));
    }

    #[tokio::test]
    async fn test_excluded_directories_are_skipped() {
        let dir = site(&[("index.html", b"home"), (".sitedrop/cache.db", b"sqlite")]);
        let tree = SiteTree::open(dir.path()).unwrap().exclude(".sitedrop");
        let files = tree.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].key, "index.html");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directory_loop_is_not_followed() {
        let dir = site(&[("index.html", b"home"), ("blog/post.html", b"post")]);
        std::os::unix::fs::symlink(".", dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink("..", dir.path().join("blog/up")).unwrap();
        let tree = SiteTree::open(dir.path()).unwrap();
        let keys: Vec<_> = tree.list().await.unwrap().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["blog/post.html", "index.html"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_files_are_listed_and_broken_links_skipped() {
        let dir = site(&[("index.html", b"home")]);
        std::os::unix::fs::symlink("index.html", dir.path().join("home.html")).unwrap();
        std::os::unix::fs::symlink("missing.html", dir.path().join("broken.html")).unwrap();
        let tree = SiteTree::open(dir.path()).unwrap();
        let files = tree.list().await.unwrap();
        let keys: Vec<_> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["home.html", "index.html"]);
        assert_eq!(files[0].size, 4);
    }

    #[tokio::test]
    async fn test_read_and_stat() {
        let dir = site(&[("about/index.html", b"about us")]);
        let tree = SiteTree::open(dir.path()).unwrap();
        let path = Path::new("about/index.html");
        assert_eq!(tree.read(path).await.unwrap(), b"about us");
        let info = tree.stat(path).await.unwrap();
        assert_eq!(info.key, "about/index.html");
        assert_eq!(info.size, 8);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SiteTree::open(dir.path()).unwrap();
        let err = tree.read(Path::new("missing.html")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_security() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SiteTree::open(dir.path()).unwrap();
        assert!(tree.read(Path::new("../etc/passwd")).await.is_err());
        assert!(tree.stat(Path::new("blog/../../passwd")).await.is_err());
    }
}
