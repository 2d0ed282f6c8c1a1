//! Streaming archive extraction for downloaded tool packages.
//!
//! The body stream is bridged into a blocking task and never held in memory.
//! Tar archives are decompressed on the fly and each entry is written straight
//! into a fresh extraction workspace. Zip archives keep their sizes in the
//! central directory at the end, so the body is first spooled to an anonymous
//! file inside the workspace and read back with random access. Every entry
//! path must stay inside the workspace; a single escaping entry fails the
//! whole archive and the workspace is removed before the error is returned.

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::stream::BoxStream;
use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, warn};

use crate::downloader::transfer_failure;
use crate::error::{GetToolError, Result};
use crate::paths::WORKSPACE_PREFIX;
use crate::progress::ProgressTap;
use crate::types::ArchiveFormat;

// ============================================================================
// Extraction Workspace
// ============================================================================

/// A uniquely named temporary directory holding one extracted archive.
///
/// Dropping the workspace removes it; [`ExtractionWorkspace::dispose`] does
/// the same and logs the outcome.
#[derive(Debug)]
pub struct ExtractionWorkspace {
    dir: TempDir,
}

impl ExtractionWorkspace {
    pub(crate) fn create(temp_root: &Path) -> Result<Self> {
        fs::create_dir_all(temp_root).map_err(|e| {
            GetToolError::io(
                format!("Failed to create directory: {}", temp_root.display()),
                e,
            )
        })?;

        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(temp_root)
            .map_err(|e| {
                GetToolError::io(
                    format!(
                        "Failed to create extraction directory in {}",
                        temp_root.display()
                    ),
                    e,
                )
            })?;

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the workspace. Failures are logged, never returned.
    pub fn dispose(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Removed extraction directory {}", path.display()),
            Err(e) => warn!(
                "Failed to remove extraction directory {}: {}",
                path.display(),
                e
            ),
        }
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Extracts an archive body stream into a new workspace under `temp_root`.
///
/// # Arguments
///
/// * `source` - The archive bytes, typically a download body.
/// * `format` - The archive format.
/// * `strip` - Leading path segments to drop from tar entries.
/// * `temp_root` - Directory the workspace is created in.
/// * `tap` - Receives the archive bytes consumed as entries are written.
///
/// # Errors
///
/// - `InvalidArchiveEntry` if any entry would land outside the workspace.
/// - `DownloadFailed` if the body stream fails mid-transfer.
/// - `Extraction` if the archive data is corrupt or truncated.
pub async fn extract(
    source: BoxStream<'static, io::Result<Bytes>>,
    format: ArchiveFormat,
    strip: usize,
    temp_root: &Path,
    tap: Option<ProgressTap>,
) -> Result<ExtractionWorkspace> {
    let workspace = ExtractionWorkspace::create(temp_root)?;
    info!(
        "Extracting {} archive to {}",
        format,
        workspace.path().display()
    );

    // Raised if this future is dropped while the blocking task still runs.
    let abort = AbortFlag::default();
    let _abort_on_drop = AbortOnDrop(abort.clone());

    let root = workspace.path().to_path_buf();
    let reader = SyncIoBridge::new(StreamReader::new(source));
    let result = tokio::task::spawn_blocking(move || {
        unpack(reader, format, strip, &root, tap, abort)
    })
    .await
    .unwrap_or_else(|e| Err(GetToolError::Extraction(format!("extraction task failed: {e}"))));

    match result {
        Ok(()) => {
            info!("Extracted to {}", workspace.path().display());
            Ok(workspace)
        }
        Err(err) => {
            warn!("Error extracting to {}: {}", workspace.path().display(), err);
            workspace.dispose();
            Err(err)
        }
    }
}

fn unpack<R: Read>(
    reader: R,
    format: ArchiveFormat,
    strip: usize,
    root: &Path,
    tap: Option<ProgressTap>,
    abort: AbortFlag,
) -> Result<()> {
    let consumed = Rc::new(Cell::new(0));
    let mut source = MeteredReader {
        inner: reader,
        consumed: Rc::clone(&consumed),
        abort: abort.clone(),
    };
    let mut meter = ExtractMeter {
        consumed,
        settled: 0,
        ceiling: u64::MAX,
        tap,
        abort,
    };

    match format {
        ArchiveFormat::Zip => {
            let spool = spool_archive(&mut source, root)?;
            unpack_zip(spool, root, &mut meter)?
        }
        ArchiveFormat::GzipTar => {
            unpack_tar(GzDecoder::new(&mut source), root, strip, &mut meter)?
        }
        ArchiveFormat::Bzip2Tar => unpack_tar(
            bzip2::read::MultiBzDecoder::new(&mut source),
            root,
            strip,
            &mut meter,
        )?,
    }

    // Tar trailing padding is not parsed.
    io::copy(&mut source, &mut io::sink())
        .map_err(|e| read_error("Failed to drain the archive stream", e))?;
    meter.settle();

    Ok(())
}

// ============================================================================
// ZIP Extraction
// ============================================================================

/// Copies the whole archive into an unnamed file inside `root`.
fn spool_archive<R: Read>(source: &mut R, root: &Path) -> Result<File> {
    let mut spool = tempfile::tempfile_in(root).map_err(|e| {
        GetToolError::io(format!("Failed to create a spool file in {}", root.display()), e)
    })?;

    let length = io::copy(source, &mut spool)
        .map_err(|e| read_error("Failed to read zip archive", e))?;
    spool
        .rewind()
        .map_err(|e| GetToolError::io("Failed to rewind the zip spool file", e))?;

    debug!("Spooled {} zip bytes", length);
    Ok(spool)
}

fn unpack_zip(spool: File, root: &Path, meter: &mut ExtractMeter) -> Result<()> {
    let mut archive = zip::ZipArchive::new(BufReader::new(spool)).map_err(zip_error)?;

    for index in 0..archive.len() {
        meter
            .abort
            .check()
            .map_err(|e| read_error("Zip extraction stopped", e))?;
        let mut entry = archive.by_index(index).map_err(zip_error)?;

        let name = entry.name().replace('\\', "/");
        let destination = safe_destination(root, Path::new(&name))?;

        if entry.is_dir() {
            create_dir_below(root, &destination)?;
            continue;
        }

        // The entry's compressed span counts once its content reaches the disk.
        meter.ceiling = entry.data_start() + entry.compressed_size();
        let mode = entry.unix_mode();
        write_entry(&mut entry, root, &destination, mode, meter)?;
    }
    meter.ceiling = u64::MAX;

    debug!("ZIP extraction complete");
    Ok(())
}

fn zip_error(err: zip::result::ZipError) -> GetToolError {
    match err {
        zip::result::ZipError::Io(e) => read_error("Failed to read zip archive", e),
        e => GetToolError::Extraction(format!("invalid zip archive: {e}")),
    }
}

// ============================================================================
// TAR Extraction
// ============================================================================

fn unpack_tar<R: Read>(
    reader: R,
    root: &Path,
    strip: usize,
    meter: &mut ExtractMeter,
) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| read_error("Failed to read tar archive", e))?;

    for entry in entries {
        meter
            .abort
            .check()
            .map_err(|e| read_error("Tar extraction stopped", e))?;
        let mut entry = entry.map_err(|e| read_error("Failed to read tar entry", e))?;
        let entry_type = entry.header().entry_type();

        // Directories are created on demand for the files inside them.
        if entry_type.is_dir() {
            continue;
        }

        let name = entry
            .path()
            .map_err(|e| read_error("Invalid tar entry path", e))?
            .into_owned();
        if name.has_root() {
            return Err(GetToolError::InvalidArchiveEntry(name.display().to_string()));
        }
        let destination = safe_destination(root, &strip_components(&name, strip))?;

        // Links could point anywhere; they are never materialized.
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping link entry {} in tar archive", name.display());
            continue;
        }
        if !(entry_type.is_file() || entry_type.is_contiguous()) {
            debug!("Skipping {:?} entry {}", entry_type, name.display());
            continue;
        }

        let mode = entry.header().mode().ok();
        write_entry(&mut entry, root, &destination, mode, meter)?;
    }

    debug!("TAR extraction complete");
    Ok(())
}

/// Drops the first `strip` segments of a tar entry path.
///
/// A path with no segments left keeps its original name.
fn strip_components(path: &Path, strip: usize) -> PathBuf {
    if strip == 0 {
        return path.to_path_buf();
    }

    let stripped: PathBuf = path
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .skip(strip)
        .collect();

    if stripped.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        stripped
    }
}

// ============================================================================
// Entry Safety
// ============================================================================

/// Resolves an entry path inside `root`, rejecting anything that escapes it.
///
/// `.` segments are dropped and `..` segments pop the previous one; popping
/// past the root, absolute paths and drive prefixes are all invalid.
fn safe_destination(root: &Path, entry: &Path) -> Result<PathBuf> {
    let invalid = || GetToolError::InvalidArchiveEntry(entry.display().to_string());

    let mut normalized = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(invalid());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(invalid()),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(invalid());
    }

    let destination = root.join(&normalized);
    if !destination.starts_with(root) {
        return Err(invalid());
    }
    Ok(destination)
}

// ============================================================================
// Writing
// ============================================================================

/// Creates `dir` and its missing parents, never `root` itself.
///
/// A workspace removed mid-extraction stays removed.
fn create_dir_below(root: &Path, dir: &Path) -> Result<()> {
    let relative = dir
        .strip_prefix(root)
        .map_err(|_| GetToolError::InvalidArchiveEntry(dir.display().to_string()))?;

    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::create_dir(&current) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && current.is_dir() => {}
            Err(e) => {
                return Err(GetToolError::io(
                    format!("Failed to create directory: {}", current.display()),
                    e,
                ))
            }
        }
    }

    Ok(())
}

fn write_entry<R: Read>(
    entry: &mut R,
    root: &Path,
    destination: &Path,
    mode: Option<u32>,
    meter: &mut ExtractMeter,
) -> Result<()> {
    if let Some(parent) = destination.parent() {
        create_dir_below(root, parent)?;
    }

    debug!("Extracting {}", destination.display());
    let file = File::create(destination).map_err(|e| {
        GetToolError::io(format!("Failed to create: {}", destination.display()), e)
    })?;

    let mut writer = MeteredWriter { inner: file, meter };
    io::copy(entry, &mut writer).map_err(|e| {
        read_error(&format!("Failed to extract {}", destination.display()), e)
    })?;
    writer.flush().map_err(|e| {
        GetToolError::io(format!("Failed to write: {}", destination.display()), e)
    })?;

    #[cfg(unix)]
    set_unix_permissions(destination, mode)?;
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

fn read_error(context: &str, err: io::Error) -> GetToolError {
    transfer_failure(&err).unwrap_or_else(|| GetToolError::Extraction(format!("{context}: {err}")))
}

// ============================================================================
// Abort
// ============================================================================

/// Tells the blocking task that nobody waits for its result any more.
#[derive(Debug, Clone, Default)]
struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    fn check(&self) -> io::Result<()> {
        if self.0.load(Ordering::Relaxed) {
            return Err(io::Error::other("extraction abandoned"));
        }
        Ok(())
    }
}

struct AbortOnDrop(AbortFlag);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.raise();
    }
}

// ============================================================================
// Progress Metering
// ============================================================================

/// Counts the archive bytes pulled from the source.
struct MeteredReader<R> {
    inner: R,
    consumed: Rc<Cell<u64>>,
    abort: AbortFlag,
}

impl<R: Read> Read for MeteredReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.abort.check()?;
        let read = self.inner.read(buf)?;
        self.consumed.set(self.consumed.get() + read as u64);
        Ok(read)
    }
}

/// Reports consumed archive bytes to the progress tap once their content hits the disk.
struct ExtractMeter {
    consumed: Rc<Cell<u64>>,
    settled: u64,
    /// Upper bound on what may be settled so far.
    ceiling: u64,
    tap: Option<ProgressTap>,
    abort: AbortFlag,
}

impl ExtractMeter {
    fn settle(&mut self) {
        let reached = self.consumed.get().min(self.ceiling);
        if reached > self.settled {
            if let Some(tap) = &self.tap {
                tap.record(reached - self.settled);
            }
            self.settled = reached;
        }
    }
}

struct MeteredWriter<'a, W> {
    inner: W,
    meter: &'a mut ExtractMeter,
}

impl<W: Write> Write for MeteredWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.meter.abort.check()?;
        let written = self.inner.write(buf)?;
        self.meter.settle();
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ============================================================================
// Unix Permissions
// ============================================================================

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        if mode & 0o111 != 0 {
            let permissions = fs::Permissions::from_mode((mode & 0o777) | 0o755);
            fs::set_permissions(path, permissions).map_err(|e| {
                GetToolError::io(format!("Failed to set permissions on {}", path.display()), e)
            })?;
        }
    }

    Ok(())
}

/// Sets executable permission on a file (Unix only).
///
/// On Windows, this is a no-op.
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            GetToolError::io(format!("Failed to get metadata for {}", path.display()), e)
        })?;

        let mut permissions = metadata.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions).map_err(|e| {
            GetToolError::io(
                format!("Failed to set executable permission on {}", path.display()),
                e,
            )
        })?;

        debug!("Set executable permission on {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture<'a> {
        name: &'a str,
        data: &'a [u8],
        mode: u32,
    }

    const fn file<'a>(name: &'a str, data: &'a [u8]) -> Fixture<'a> {
        Fixture {
            name,
            data,
            mode: 0o644,
        }
    }

    const fn executable<'a>(name: &'a str, data: &'a [u8]) -> Fixture<'a> {
        Fixture {
            name,
            data,
            mode: 0o755,
        }
    }

    /// Header with a raw name; `Header::set_path` refuses `..` and absolute paths.
    fn tar_header(name: &str, size: u64, mode: u32, entry_type: tar::EntryType) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        let bytes = name.as_bytes();
        header.as_old_mut().name[..bytes.len()].copy_from_slice(bytes);
        header.set_size(size);
        header.set_mode(mode);
        header.set_entry_type(entry_type);
        header.set_cksum();
        header
    }

    fn write_tar<W: Write>(writer: W, fixtures: &[Fixture<'_>]) -> W {
        let mut builder = tar::Builder::new(writer);
        for fixture in fixtures {
            let entry_type = if fixture.name.ends_with('/') {
                tar::EntryType::Directory
            } else {
                tar::EntryType::Regular
            };
            let header = tar_header(
                fixture.name,
                fixture.data.len() as u64,
                fixture.mode,
                entry_type,
            );
            builder.append(&header, fixture.data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn tar_gz(fixtures: &[Fixture<'_>]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        write_tar(encoder, fixtures).finish().unwrap()
    }

    fn tar_bz2(fixtures: &[Fixture<'_>]) -> Vec<u8> {
        let encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        write_tar(encoder, fixtures).finish().unwrap()
    }

    fn zip_archive(fixtures: &[Fixture<'_>]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for fixture in fixtures {
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .unix_permissions(fixture.mode);
            if fixture.name.ends_with('/') {
                zip.add_directory(fixture.name, options).unwrap();
            } else {
                zip.start_file(fixture.name, options).unwrap();
                zip.write_all(fixture.data).unwrap();
            }
        }
        zip.finish().unwrap().into_inner()
    }

    /// A stored zip whose entries keep their sizes in a data descriptor after
    /// the file data, as streaming zip writers produce them.
    fn zip_with_data_descriptors(fixtures: &[Fixture<'_>]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for fixture in fixtures {
            let mut crc = flate2::Crc::new();
            crc.update(fixture.data);
            let crc = crc.sum();
            let size = fixture.data.len() as u32;
            let name = fixture.name.as_bytes();
            let offset = out.len() as u32;

            out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0x0008u16.to_le_bytes()); // sizes follow the data
            out.extend_from_slice(&0u16.to_le_bytes()); // stored
            out.extend_from_slice(&[0; 4]); // time, date
            out.extend_from_slice(&[0; 12]); // crc, sizes
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name);
            out.extend_from_slice(fixture.data);
            out.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());

            central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
            central.extend_from_slice(&(0x0300u16 | 20).to_le_bytes()); // made by unix
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&0x0008u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&[0; 4]);
            central.extend_from_slice(&crc.to_le_bytes());
            central.extend_from_slice(&size.to_le_bytes());
            central.extend_from_slice(&size.to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&[0; 8]); // extra, comment, disk, internal attributes
            central.extend_from_slice(&((0o100_000 | fixture.mode) << 16).to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(name);
        }

        let central_offset = out.len() as u32;
        let count = fixtures.len() as u16;
        out.extend_from_slice(&central);
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&central_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    /// Deterministic bytes that deflate cannot shrink much.
    fn incompressible(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761) | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    /// Yields the archive in 4 KiB chunks with a pause before each one.
    fn slow_stream_of(bytes: Vec<u8>) -> BoxStream<'static, io::Result<Bytes>> {
        let chunks: Vec<Bytes> = bytes.chunks(4096).map(Bytes::copy_from_slice).collect();
        futures::stream::iter(chunks)
            .then(|chunk| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, io::Error>(chunk)
            })
            .boxed()
    }

    fn stream_of(bytes: Vec<u8>) -> BoxStream<'static, io::Result<Bytes>> {
        let chunks: Vec<io::Result<Bytes>> = bytes
            .chunks(7)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        futures::stream::iter(chunks).boxed()
    }

    fn assert_empty(dir: &Path) {
        let leftovers: Vec<_> = fs::read_dir(dir).unwrap().collect();
        assert!(leftovers.is_empty(), "leftover entries: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_extract_tar_gz() {
        let temp = TempDir::new().unwrap();
        let archive = tar_gz(&[
            file("docs/", b""),
            executable("fake-tool", b"#!/bin/sh\necho fake\n"),
            file("docs/README.md", b"Hello from tar.gz!"),
        ]);

        let workspace = extract(stream_of(archive), ArchiveFormat::GzipTar, 0, temp.path(), None)
            .await
            .unwrap();

        assert!(workspace.path().starts_with(temp.path()));
        assert_eq!(
            fs::read(workspace.path().join("fake-tool")).unwrap(),
            b"#!/bin/sh\necho fake\n"
        );
        assert_eq!(
            fs::read_to_string(workspace.path().join("docs/README.md")).unwrap(),
            "Hello from tar.gz!"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(workspace.path().join("fake-tool"))
                .unwrap()
                .permissions()
                .mode();
            assert_ne!(mode & 0o111, 0);
        }

        workspace.dispose();
        assert_empty(temp.path());
    }

    #[tokio::test]
    async fn test_extract_tar_bz2_strips_wrapping_folder() {
        let temp = TempDir::new().unwrap();
        let archive = tar_bz2(&[
            file("fake-tool-clang/", b""),
            executable("fake-tool-clang/fake-tool", b"clang"),
            file("fake-tool-clang/lib/libfake.so", b"lib"),
            file("LICENSE", b"top level"),
        ]);

        let workspace = extract(stream_of(archive), ArchiveFormat::Bzip2Tar, 1, temp.path(), None)
            .await
            .unwrap();

        assert_eq!(fs::read(workspace.path().join("fake-tool")).unwrap(), b"clang");
        assert_eq!(
            fs::read(workspace.path().join("lib/libfake.so")).unwrap(),
            b"lib"
        );
        assert_eq!(fs::read(workspace.path().join("LICENSE")).unwrap(), b"top level");
        assert!(!workspace.path().join("fake-tool-clang").exists());
    }

    #[tokio::test]
    async fn test_extract_zip() {
        let temp = TempDir::new().unwrap();
        let archive = zip_archive(&[
            executable("fake-tool.bat", b"@echo fake"),
            file("subdir/", b""),
            file("subdir/nested.txt", b"Nested content"),
        ]);

        let workspace = extract(stream_of(archive), ArchiveFormat::Zip, 0, temp.path(), None)
            .await
            .unwrap();

        assert_eq!(
            fs::read(workspace.path().join("fake-tool.bat")).unwrap(),
            b"@echo fake"
        );
        assert_eq!(
            fs::read_to_string(workspace.path().join("subdir/nested.txt")).unwrap(),
            "Nested content"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(workspace.path().join("fake-tool.bat"))
                .unwrap()
                .permissions()
                .mode();
            assert_ne!(mode & 0o111, 0);
        }
    }

    #[tokio::test]
    async fn test_extract_zip_with_data_descriptors() {
        let temp = TempDir::new().unwrap();
        let archive = zip_with_data_descriptors(&[
            executable("fake-tool.exe", b"MZ fake exe"),
            file("docs/README.txt", b"readme"),
        ]);

        let workspace = extract(stream_of(archive), ArchiveFormat::Zip, 0, temp.path(), None)
            .await
            .unwrap();

        assert_eq!(
            fs::read(workspace.path().join("fake-tool.exe")).unwrap(),
            b"MZ fake exe"
        );
        assert_eq!(
            fs::read(workspace.path().join("docs/README.txt")).unwrap(),
            b"readme"
        );

        // The spool file has no name, so only the entries are visible.
        let mut names: Vec<_> = fs::read_dir(workspace.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(names, ["docs", "fake-tool.exe"]);

        workspace.dispose();
        assert_empty(temp.path());
    }

    #[tokio::test]
    async fn test_zip_slip_with_data_descriptors_is_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = zip_with_data_descriptors(&[
            file("good.txt", b"fine"),
            file("../evil.txt", b"escaped"),
        ]);

        let err = extract(stream_of(archive), ArchiveFormat::Zip, 0, temp.path(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, GetToolError::InvalidArchiveEntry(_)));
        assert_empty(temp.path());
    }

    #[tokio::test]
    async fn test_zip_slip_fails_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("workspaces");
        let archive = zip_archive(&[
            file("good.txt", b"fine"),
            file("../evil.txt", b"escaped"),
        ]);

        let err = extract(stream_of(archive), ArchiveFormat::Zip, 0, &root, None)
            .await
            .unwrap_err();

        assert!(matches!(err, GetToolError::InvalidArchiveEntry(ref name) if name == "../evil.txt"));
        assert!(!temp.path().join("evil.txt").exists());
        assert_empty(&root);
    }

    #[tokio::test]
    async fn test_zip_backslash_traversal_is_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = zip_archive(&[file("..\\..\\evil.txt", b"escaped")]);

        let err = extract(stream_of(archive), ArchiveFormat::Zip, 0, temp.path(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, GetToolError::InvalidArchiveEntry(_)));
        assert_empty(temp.path());
    }

    #[tokio::test]
    async fn test_tar_traversal_fails_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("workspaces");
        let archive = tar_gz(&[
            file("fake-tool", b"tool"),
            file("../../escaped.txt", b"escaped"),
        ]);

        let err = extract(stream_of(archive), ArchiveFormat::GzipTar, 0, &root, None)
            .await
            .unwrap_err();

        assert!(matches!(err, GetToolError::InvalidArchiveEntry(_)));
        assert!(!temp.path().join("escaped.txt").exists());
        assert_empty(&root);
    }

    #[tokio::test]
    async fn test_tar_traversal_after_strip_is_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = tar_bz2(&[file("wrapper/../../escaped.txt", b"escaped")]);

        let err = extract(stream_of(archive), ArchiveFormat::Bzip2Tar, 1, temp.path(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, GetToolError::InvalidArchiveEntry(_)));
        assert_empty(temp.path());
    }

    #[tokio::test]
    async fn test_tar_absolute_path_is_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = tar_bz2(&[file("/tmp/escaped.txt", b"escaped")]);

        let err = extract(stream_of(archive), ArchiveFormat::Bzip2Tar, 1, temp.path(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, GetToolError::InvalidArchiveEntry(_)));
        assert_empty(temp.path());
    }

    #[tokio::test]
    async fn test_tar_symlink_is_skipped() {
        let temp = TempDir::new().unwrap();

        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut link = tar_header("escape_link", 0, 0o777, tar::EntryType::Symlink);
        link.set_link_name("../escaped_file.txt").unwrap();
        link.set_cksum();
        builder.append(&link, io::empty()).unwrap();
        let data = b"regular";
        let header = tar_header("fake-tool", data.len() as u64, 0o755, tar::EntryType::Regular);
        builder.append(&header, &data[..]).unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let workspace = extract(stream_of(archive), ArchiveFormat::GzipTar, 0, temp.path(), None)
            .await
            .unwrap();

        assert!(fs::symlink_metadata(workspace.path().join("escape_link")).is_err());
        assert_eq!(fs::read(workspace.path().join("fake-tool")).unwrap(), b"regular");
    }

    #[tokio::test]
    async fn test_corrupt_archive_fails_and_cleans_up() {
        let temp = TempDir::new().unwrap();

        let err = extract(
            stream_of(b"definitely not gzip".to_vec()),
            ArchiveFormat::GzipTar,
            0,
            temp.path(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, GetToolError::Extraction(_)));
        assert_empty(temp.path());
    }

    #[tokio::test]
    async fn test_transfer_error_is_a_download_failure() {
        let temp = TempDir::new().unwrap();
        // Incompressible, so the cut lands well inside the deflate data.
        let payload = incompressible(65_536, 1);
        let archive = tar_gz(&[file("fake-tool", &payload)]);
        let head = Bytes::copy_from_slice(&archive[..archive.len() / 2]);

        let failing = futures::stream::iter(vec![
            Ok(head),
            Err(io::Error::other(crate::downloader::TransferError {
                url: "https://example.com/fake-tool.tar.gz".to_string(),
                message: "connection reset".to_string(),
            })),
        ])
        .boxed();

        let err = extract(failing, ArchiveFormat::GzipTar, 0, temp.path(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, GetToolError::DownloadFailed { .. }), "{err:?}");
        assert_empty(temp.path());
    }

    #[tokio::test]
    async fn test_extraction_reports_consumed_bytes() {
        let temp = TempDir::new().unwrap();
        let archive = tar_gz(&[
            executable("fake-tool", &[42u8; 10_000]),
            file("README", b"readme"),
        ]);
        let total = archive.len() as u64;

        let (tx, rx) = std::sync::mpsc::channel();
        let tap = ProgressTap::new(total, move |event| {
            let _ = tx.send(event.current);
        });

        let workspace = extract(
            stream_of(archive),
            ArchiveFormat::GzipTar,
            0,
            temp.path(),
            Some(tap.clone()),
        )
        .await
        .unwrap();
        drop(tap);

        let events: Vec<u8> = rx.iter().collect();
        assert!(events.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(events.last(), Some(&100));
        workspace.dispose();
    }

    #[tokio::test]
    async fn test_zip_extraction_reports_consumed_bytes() {
        let temp = TempDir::new().unwrap();
        let first = incompressible(20_000, 2);
        let second = incompressible(20_000, 3);
        let archive = zip_archive(&[
            executable("fake-tool.exe", &first),
            file("README", &second),
        ]);
        let total = archive.len() as u64;

        let (tx, rx) = std::sync::mpsc::channel();
        let tap = ProgressTap::new(total, move |event| {
            let _ = tx.send(event.current);
        });

        let workspace = extract(
            stream_of(archive),
            ArchiveFormat::Zip,
            0,
            temp.path(),
            Some(tap.clone()),
        )
        .await
        .unwrap();
        drop(tap);

        let events: Vec<u8> = rx.iter().collect();
        assert!(events.len() > 1, "{events:?}");
        assert!(events.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(events.last(), Some(&100));
        workspace.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_abandoned_extraction_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let payloads: Vec<Vec<u8>> = (0..64).map(|i| incompressible(8192, i)).collect();
        let names: Vec<String> = (0..64).map(|i| format!("lib/entry-{i}")).collect();
        let fixtures: Vec<Fixture<'_>> = names
            .iter()
            .zip(&payloads)
            .map(|(name, data)| file(name, data))
            .collect();
        let archive = tar_gz(&fixtures);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            extract(
                slow_stream_of(archive),
                ArchiveFormat::GzipTar,
                0,
                temp.path(),
                None,
            ),
        )
        .await;
        assert!(outcome.is_err(), "extraction finished before the timeout");

        // Long enough for the whole body to have arrived.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_empty(temp.path());
    }

    #[test]
    fn test_create_dir_below_never_recreates_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("workspace");
        fs::create_dir(&root).unwrap();

        create_dir_below(&root, &root.join("a/b")).unwrap();
        create_dir_below(&root, &root.join("a/b")).unwrap();
        assert!(root.join("a/b").is_dir());

        fs::remove_dir_all(&root).unwrap();
        assert!(create_dir_below(&root, &root.join("a/b")).is_err());
        assert!(!root.exists());
    }

    #[test]
    fn test_safe_destination() {
        let root = Path::new("/work");
        assert_eq!(
            safe_destination(root, Path::new("bin/tool")).unwrap(),
            PathBuf::from("/work/bin/tool")
        );
        assert_eq!(
            safe_destination(root, Path::new("./a/../tool")).unwrap(),
            PathBuf::from("/work/tool")
        );
        for bad in ["../tool", "a/../../tool", "/etc/passwd", ".", ""] {
            assert!(
                matches!(
                    safe_destination(root, Path::new(bad)),
                    Err(GetToolError::InvalidArchiveEntry(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_strip_components() {
        assert_eq!(
            strip_components(Path::new("clang_14/bin/clangd"), 1),
            PathBuf::from("bin/clangd")
        );
        assert_eq!(
            strip_components(Path::new("./clang_14/clangd"), 1),
            PathBuf::from("clangd")
        );
        assert_eq!(strip_components(Path::new("LICENSE"), 1), PathBuf::from("LICENSE"));
        assert_eq!(strip_components(Path::new("a/b"), 0), PathBuf::from("a/b"));
    }

    #[test]
    fn test_workspace_dispose_removes_directory() {
        let temp = TempDir::new().unwrap();
        let workspace = ExtractionWorkspace::create(&temp.path().join("nested")).unwrap();
        let path = workspace.path().to_path_buf();
        fs::write(path.join("file"), b"data").unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(WORKSPACE_PREFIX));

        workspace.dispose();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_make_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("script.sh");
        fs::write(&path, b"#!/bin/sh\necho hello").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        make_executable(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }
}
