// Staging Module - Scratch Volume and Write-back
// =======================================================
// When staging is enabled, every task writes its output under a scratch
// directory first. Once all tasks are done the staged tree is relocated to the
// real destination in a single-threaded second phase:
//
// - Same device: one atomic rename per top-level entry
// - Different device: chunked stream copy (directories walked recursively),
//   then removal of the staged original once the copy is verified
//
// Existing destination entries are removed first so a relocation never
// merges into stale content. The staging area is deleted only when every
// entry was relocated; otherwise it is kept and its location is logged.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::control::ControlSignal;
use crate::error::{CipherError, Result};
use crate::streaming::{partial_path, Engine};

/// Free space required on the staging volume, relative to planned output.
pub const SPACE_MARGIN: f64 = 1.2;

/// Name of the directory created inside the user-chosen scratch location.
pub const STAGING_DIR_NAME: &str = ".file-cipher-staging";

/// Source of free-space figures for the staging preflight.
pub trait SpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Queries the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskSpace;

impl SpaceProbe for DiskSpace {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Bytes the staging volume must have free for `planned` bytes of output.
pub fn required_space(planned: u64) -> u64 {
    (planned as f64 * SPACE_MARGIN).ceil() as u64
}

/// A freshly created staging directory.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Check free space under `scratch` and create a fresh staging directory
    /// there.
    ///
    /// Nothing is created or removed when the space check fails.
    pub fn prepare(scratch: &Path, planned: u64, probe: &dyn SpaceProbe) -> Result<Self> {
        let available = probe.available_space(&nearest_existing(scratch))?;
        let needed = required_space(planned);
        if available < needed {
            return Err(CipherError::InsufficientStagingSpace { needed, available });
        }

        let root = scratch.join(STAGING_DIR_NAME);
        if root.exists() {
            debug!(path = %root.display(), "wiping previous staging area");
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

/// Outcome of the write-back phase.
#[derive(Debug, Clone, Default)]
pub struct WriteBackReport {
    pub staging_root: PathBuf,
    pub target: PathBuf,
    /// Final paths of relocated top-level entries.
    pub relocated: Vec<PathBuf>,
    /// Staged entries that could not be relocated, with the reason.
    pub unresolved: Vec<(PathBuf, String)>,
    /// Whether the staging area was left on disk.
    pub retained: bool,
}

impl WriteBackReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Where a path inside the staging area ended up, if its top-level entry
    /// was relocated.
    pub fn final_path(&self, staged: &Path) -> Option<PathBuf> {
        let relative = staged.strip_prefix(&self.staging_root).ok()?;
        let top = relative.components().next()?;
        let relocated = self.target.join(top);
        self.relocated
            .contains(&relocated)
            .then(|| self.target.join(relative))
    }
}

/// Relocate everything under `area` into `target`.
///
/// Parameters:
/// - area: The staging area the batch wrote into; consumed
/// - target: The real output directory, created if missing
/// - control: Checked between top-level entries
/// - on_progress: Called with `(bytes relocated, total staged bytes)`
///
/// A stop
/// requested during the write-back halts it between entries; a stop that was
/// already set when the write-back began does not, so finished outputs are
/// never stranded in the staging area.
pub fn write_back(
    area: StagingArea,
    target: &Path,
    control: &dyn ControlSignal,
    on_progress: &mut dyn FnMut(u64, u64),
) -> WriteBackReport {
    let mut report = WriteBackReport {
        staging_root: area.root.clone(),
        target: target.to_path_buf(),
        ..WriteBackReport::default()
    };

    let entries = match top_level_entries(&area.root) {
        Ok(entries) => entries,
        Err(e) => {
            report.unresolved.push((area.root.clone(), e.to_string()));
            return retain(report);
        }
    };
    if let Err(e) = fs::create_dir_all(target) {
        report.unresolved = entries.into_iter().map(|entry| (entry, e.to_string())).collect();
        return retain(report);
    }

    let honour_stop = !control.is_stop_requested();
    let mut relocator = Relocator {
        target,
        total: staged_bytes(&area.root),
        moved: 0,
        on_progress,
    };

    for entry in entries {
        if honour_stop && control.is_stop_requested() {
            report.unresolved.push((entry, CipherError::UserStopped.to_string()));
            continue;
        }
        match relocator.relocate(&entry) {
            Ok(dest) => report.relocated.push(dest),
            Err(e) => {
                warn!(entry = %entry.display(), error = %e, "write-back failed");
                report.unresolved.push((entry, e.to_string()));
            }
        }
    }

    if !report.is_complete() {
        return retain(report);
    }
    if let Err(e) = fs::remove_dir_all(&area.root) {
        warn!(path = %area.root.display(), error = %e, "failed to remove staging area");
        report.retained = true;
    }
    report
}

fn retain(mut report: WriteBackReport) -> WriteBackReport {
    warn!(
        path = %report.staging_root.display(),
        unresolved = report.unresolved.len(),
        "write-back incomplete, staging area kept"
    );
    report.retained = true;
    report
}

struct Relocator<'a, 'p> {
    target: &'a Path,
    total: u64,
    moved: u64,
    on_progress: &'p mut dyn FnMut(u64, u64),
}

impl Relocator<'_, '_> {
    /// Move one top-level staged entry into the target directory.
    fn relocate(&mut self, entry: &Path) -> Result<PathBuf> {
        let name = entry
            .file_name()
            .ok_or_else(|| CipherError::InvalidInput(format!("{} has no file name", entry.display())))?;
        let dest = self.target.join(name);
        clear_destination(&dest)?;

        if same_device(entry, self.target)? {
            let size = staged_bytes(entry);
            fs::rename(entry, &dest)?;
            debug!(from = %entry.display(), to = %dest.display(), "renamed staged entry");
            self.advance(size);
        } else {
            self.move_across(entry, &dest)?;
            info!(from = %entry.display(), to = %dest.display(), "copied staged entry across devices");
        }
        Ok(dest)
    }

    /// Copy `entry` (file or directory tree) to `dest`, then remove it.
    fn move_across(&mut self, entry: &Path, dest: &Path) -> Result<()> {
        if entry.is_dir() {
            for item in WalkDir::new(entry) {
                let item = item.map_err(|e| write_back_error(entry, e))?;
                let relative = item.path().strip_prefix(entry).map_err(|e| write_back_error(entry, e))?;
                let item_dest = dest.join(relative);
                if item.file_type().is_dir() {
                    fs::create_dir_all(&item_dest).map_err(|e| write_back_error(item.path(), e))?;
                } else {
                    self.copy_file(item.path(), &item_dest)?;
                }
            }
            fs::remove_dir_all(entry).map_err(|e| write_back_error(entry, e))?;
        } else {
            self.copy_file(entry, dest)?;
            fs::remove_file(entry).map_err(|e| write_back_error(entry, e))?;
        }
        Ok(())
    }

    /// Stream-copy one file through a `.part` sibling, renamed into place only
    /// after the copied length matches the source.
    fn copy_file(&mut self, src: &Path, dest: &Path) -> Result<()> {
        let partial = partial_path(dest);
        match self.stream_copy(src, &partial) {
            Ok(()) => fs::rename(&partial, dest).map_err(|e| write_back_error(src, e)),
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %cleanup, "failed to remove partial copy");
                    }
                }
                Err(write_back_error(src, e))
            }
        }
    }

    fn stream_copy(&mut self, src: &Path, partial: &Path) -> io::Result<()> {
        let len = fs::metadata(src)?.len();
        let mut reader = File::open(src)?;
        let mut writer = BufWriter::new(File::create(partial)?);
        let mut buffer = vec![0u8; Engine::chunk_size_for(len)];
        let mut copied = 0u64;

        loop {
            let bytes = reader.read(&mut buffer)?;
            if bytes == 0 {
                break;
            }
            writer.write_all(&buffer[..bytes])?;
            copied += bytes as u64;
            self.advance(bytes as u64);
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        if copied != len || fs::metadata(partial)?.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("copied {copied} of {len} bytes"),
            ));
        }
        Ok(())
    }

    fn advance(&mut self, bytes: u64) {
        self.moved += bytes;
        (self.on_progress)(self.moved, self.total);
    }
}

fn write_back_error(path: &Path, err: impl ToString) -> CipherError {
    CipherError::CrossDeviceWriteBack {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn top_level_entries(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(root)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

/// Total size of the regular files under `path` (or of `path` itself).
fn staged_bytes(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn clear_destination(dest: &Path) -> io::Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest),
        Ok(_) => fs::remove_file(dest),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(unix)]
fn same_device(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::symlink_metadata(a)?.dev() == fs::metadata(b)?.dev())
}

#[cfg(not(unix))]
fn same_device(a: &Path, b: &Path) -> io::Result<bool> {
    // Same drive prefix is the best cheap approximation available here.
    let a = fs::canonicalize(a)?;
    let b = fs::canonicalize(b)?;
    Ok(a.components().next() == b.components().next())
}
