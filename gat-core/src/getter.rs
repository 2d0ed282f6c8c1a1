//! The get-tool pipeline.
//!
//! Resolves the archive, claims the destination file, streams the download
//! through the extractor, and copies the tool executable out of the
//! extraction workspace. Both the workspace and a destination file created by
//! the call are released on every failure path, cancellation included.

use futures::{StreamExt, TryStreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::downloader::Downloader;
use crate::error::{GetToolError, Result};
use crate::extractor::{self, make_executable, ExtractionWorkspace};
use crate::paths;
use crate::progress::{ProgressEvent, ProgressTap};
use crate::types::{ArchiveDescriptor, GetToolResult, ToolRequest};

/// Downloads tools into destination folders.
#[derive(Debug, Clone)]
pub struct ToolGetter {
    catalog: Catalog,
    downloader: Downloader,
    temp_root: PathBuf,
}

impl ToolGetter {
    /// Creates a getter for the configured catalog.
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_catalog(settings.catalog(), settings)
    }

    /// Creates a getter with a custom catalog.
    pub fn with_catalog(catalog: Catalog, settings: &Settings) -> Result<Self> {
        Ok(Self {
            catalog,
            downloader: Downloader::new(settings)?,
            temp_root: settings.temp_root(),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Gets one tool.
    ///
    /// `on_progress` receives strictly increasing percentages covering the
    /// download and the extraction. Once `cancel` fires the call fails with
    /// `Cancelled`.
    ///
    /// # Errors
    ///
    /// - `UnsupportedTool`, `UnsupportedPlatform` or `UnsupportedArchiveType`
    ///   before anything touches the filesystem or network.
    /// - `AlreadyExists` if the destination exists and neither `force` nor
    ///   `ok_if_exists` is set. The existing file is left untouched.
    /// - `DownloadFailed`, `InvalidArchiveEntry`, `MissingFromArchive`,
    ///   `Extraction` or `Io` from the later stages.
    pub async fn get_tool<F>(
        &self,
        request: &ToolRequest,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<GetToolResult>
    where
        F: FnMut(ProgressEvent) + Send + 'static,
    {
        info!(
            "Getting {} {} for {} {}",
            request.tool, request.version, request.platform, request.arch
        );

        let archive = self.catalog.resolve(
            &request.tool,
            &request.version,
            &request.platform,
            &request.arch,
        )?;

        let folder = paths::absolute(&request.destination_folder)
            .map_err(|e| GetToolError::io("Failed to read the current directory", e))?;
        tokio::fs::create_dir_all(&folder).await.map_err(|e| {
            GetToolError::io(format!("Failed to create directory: {}", folder.display()), e)
        })?;

        let basename = paths::tool_basename(&request.tool, &request.platform);
        let tool_path = folder.join(&basename);

        let destination = match open_destination(&tool_path, request.force).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if request.ok_if_exists {
                    info!("{} already exists, skipping download", tool_path.display());
                    return Ok(GetToolResult { tool_path });
                }
                return Err(GetToolError::AlreadyExists(tool_path));
            }
            Err(e) => {
                return Err(GetToolError::io(
                    format!("Failed to open {}", tool_path.display()),
                    e,
                ))
            }
        };

        // An overwritten file is not ours to delete.
        let guard = DestinationGuard::new(&tool_path, !request.force);

        let outcome = self
            .fill(destination, &archive, &basename, on_progress, cancel)
            .await
            .and_then(|()| make_executable(&tool_path));

        match outcome {
            Ok(()) => {
                guard.disarm();
                info!("{} placed at {}", request.tool, tool_path.display());
                Ok(GetToolResult { tool_path })
            }
            Err(err) => {
                drop(guard);
                if cancel.is_cancelled() {
                    info!("Getting {} was cancelled", request.tool);
                    return Err(GetToolError::Cancelled);
                }
                warn!("Failed to get {} from {}: {}", request.tool, archive.url, err);
                Err(err)
            }
        }
    }

    /// Downloads, extracts and copies the tool into `destination`.
    ///
    /// Takes the file by value so it is closed before a failure removes it.
    async fn fill<F>(
        &self,
        mut destination: File,
        archive: &ArchiveDescriptor,
        basename: &str,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(ProgressEvent) + Send + 'static,
    {
        let download = self.downloader.open(&archive.url, cancel).await?;

        // Each archive byte is counted once on arrival and once on extraction.
        let tap = ProgressTap::new(download.length.saturating_mul(2), on_progress);
        let download_tap = tap.clone();
        let body = download
            .body
            .inspect_ok(move |chunk| download_tap.record(chunk.len() as u64))
            .boxed();

        let workspace = extractor::extract(
            body,
            archive.format,
            archive.strip,
            &self.temp_root,
            Some(tap),
        )
        .await?;

        let placed = place(&workspace, basename, &mut destination, cancel).await;
        workspace.dispose();
        placed
    }
}

/// Gets a tool with default settings, without progress or cancellation.
pub async fn get_tool(request: &ToolRequest) -> Result<GetToolResult> {
    ToolGetter::new(&Settings::default())?
        .get_tool(request, |_| {}, &CancellationToken::new())
        .await
}

// ============================================================================
// Destination
// ============================================================================

async fn open_destination(path: &Path, force: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    #[cfg(unix)]
    options.mode(0o777);

    debug!("Opening {} (force: {})", path.display(), force);
    options.open(path).await
}

/// Removes the destination file on drop unless disarmed.
struct DestinationGuard {
    path: PathBuf,
    armed: bool,
}

impl DestinationGuard {
    fn new(path: &Path, armed: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            armed,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

// ============================================================================
// Placement
// ============================================================================

async fn place(
    workspace: &ExtractionWorkspace,
    basename: &str,
    destination: &mut File,
    cancel: &CancellationToken,
) -> Result<()> {
    let source_path = locate(workspace.path(), basename).await?;
    let mut source = File::open(&source_path).await.map_err(|e| {
        GetToolError::io(format!("Failed to open {}", source_path.display()), e)
    })?;

    debug!("Copying {}", source_path.display());
    let copied = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(GetToolError::Cancelled),
        copied = tokio::io::copy(&mut source, destination) => copied.map_err(|e| {
            GetToolError::io(format!("Failed to copy {}", source_path.display()), e)
        })?,
    };
    destination
        .flush()
        .await
        .map_err(|e| GetToolError::io("Failed to flush the destination file", e))?;

    debug!("Copied {} bytes", copied);
    Ok(())
}

/// Finds the tool inside the workspace, preferring its root.
async fn locate(root: &Path, basename: &str) -> Result<PathBuf> {
    let direct = root.join(basename);
    if tokio::fs::metadata(&direct)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
    {
        return Ok(direct);
    }

    if let Some(found) = find_file_recursive(root, basename).await {
        info!("Found {} at {}", basename, found.display());
        return Ok(found);
    }

    Err(GetToolError::MissingFromArchive {
        name: basename.to_string(),
    })
}

async fn find_file_recursive(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        if let Ok(mut entries) = tokio::fs::read_dir(&current).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && path.file_name().and_then(|s| s.to_str()) == Some(name)
                {
                    return Some(path);
                }
            }
        }
    }

    None
}
