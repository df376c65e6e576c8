// Streaming Module - Per-file Cipher Engine
// =======================================================
// This module turns one source file into one container (encrypt) or one
// container back into the original file (decrypt). Content is processed in
// fixed-size chunks, so memory use stays bounded regardless of file size.
//
// Key features:
// - Chunk size scales with file size (1 MiB, 10 MiB or 64 MiB)
// - Progress callback after every chunk
// - The control signal is consulted before every chunk read: a stop request
//   cancels the operation, a pause blocks it
// - Output is written to a uniquely named `.part` sibling, created exclusively,
//   and renamed into place only once complete; on any failure the partial
//   file is removed
// - Outputs can be claimed through a shared registry, so two tasks of one
//   batch never write or rename onto the same path

use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::container::{self, Header};
use crate::control::ControlSignal;
use crate::crypto::{self, CbcDecryptor, CbcEncryptor, Key, BLOCK_SIZE};
use crate::error::{CipherError, Result};

const MIB: u64 = 1024 * 1024;

/// Direction of a cipher operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Encrypt,
    Decrypt,
}

impl Mode {
    /// "Encrypt" / "Decrypt", for log lines.
    pub fn verb(self) -> &'static str {
        match self {
            Mode::Encrypt => "Encrypt",
            Mode::Decrypt => "Decrypt",
        }
    }

    /// "Encrypting" / "Decrypting", for status text.
    pub fn progressive(self) -> &'static str {
        match self {
            Mode::Encrypt => "Encrypting",
            Mode::Decrypt => "Decrypting",
        }
    }
}

/// Hands out output paths that no other task of the same batch holds.
pub trait OutputClaims: Send + Sync {
    /// Reserve `wanted`, or a numbered variant of it if already taken.
    /// Returns the path the caller must write to.
    fn claim(&self, wanted: PathBuf) -> PathBuf;
}

/// In-memory claim registry shared by all workers of a batch.
///
/// Claims are keyed by canonical parent directory plus file name, so
/// `out/a.enc` and `./out/a.enc` count as the same output.
#[derive(Debug, Default)]
pub struct ClaimedOutputs {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl ClaimedOutputs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputClaims for ClaimedOutputs {
    fn claim(&self, wanted: PathBuf) -> PathBuf {
        let mut claimed = self.claimed.lock();
        let mut candidate = wanted.clone();
        let mut n = 1;
        while !claimed.insert(claim_key(&candidate)) {
            candidate = numbered_path(&wanted, n);
            n += 1;
        }
        candidate
    }
}

fn claim_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .unwrap_or_else(|_| parent.to_path_buf())
            .join(name),
        _ => path.to_path_buf(),
    }
}

/// `dir/report.pdf.enc` -> `dir/report.pdf (n).enc`
pub fn numbered_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.file_stem().unwrap_or_default().to_os_string();
    name.push(format!(" ({n})"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// Drives the container codec over a single source/destination pair.
///
/// An engine borrows the session key and the batch's control signal; the
/// orchestrator builds a fresh one for every task.
pub struct Engine<'a> {
    key: &'a Key,                           // Session key, shared by every task
    control: &'a dyn ControlSignal,         // Stop flag and pause gate
    chunk_size: Option<usize>,              // Fixed chunk size, or the size-based policy
    claims: Option<&'a dyn OutputClaims>,   // Output registry of the batch, if any
}

impl<'a> Engine<'a> {
    pub fn new(key: &'a Key, control: &'a dyn ControlSignal) -> Self {
        Self {
            key,
            control,
            chunk_size: None,
            claims: None,
        }
    }

    /// Use a fixed chunk size instead of the size-based policy.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    /// Reserve every output through `claims` before writing it.
    ///
    /// Without a registry the engine writes to the path it resolved and
    /// replaces whatever is there.
    pub fn with_claims(mut self, claims: &'a dyn OutputClaims) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Chunk size policy: 1 MiB below 100 MiB, 10 MiB below 2 GiB, 64 MiB
    /// beyond that.
    pub fn chunk_size_for(file_size: u64) -> usize {
        if file_size < 100 * MIB {
            MIB as usize
        } else if file_size < 2048 * MIB {
            10 * MIB as usize
        } else {
            64 * MIB as usize
        }
    }

    /// Process `source` into `out_dir`.
    ///
    /// Encryption names the container after the source (or a random token
    /// when `obfuscate_name` is set); decryption names the output after the
    /// name recovered from the header.
    ///
    /// Parameters:
    /// - source: The file to encrypt, or the container to decrypt
    /// - out_dir: Existing directory the output is written into
    /// - mode: Which direction to run
    /// - obfuscate_name: Use a random container name (encryption only)
    /// - on_progress: Called with `(processed, total)` after every chunk
    ///
    /// Returns the path actually written, which can differ from the
    /// resolved one when a claim registry renamed it.
    pub fn process(
        &self,
        source: &Path,
        out_dir: &Path,
        mode: Mode,
        obfuscate_name: bool,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| CipherError::InvalidInput(format!("{} has no file name", source.display())))?;
        let destination = match mode {
            Mode::Encrypt => out_dir.join(container::container_file_name(file_name, obfuscate_name)),
            Mode::Decrypt => out_dir.join(file_name),
        };
        self.run(source, &destination, mode, on_progress)
    }

    /// Process `source` into an already resolved destination.
    ///
    /// For encryption `destination` is the container path. For decryption only
    /// its directory is used: the file name is always replaced by the one
    /// recovered from the header.
    ///
    /// Parameters:
    /// - source: The input file
    /// - destination: Container path, or any path inside the output directory
    ///   when decrypting
    /// - mode: Which direction to run
    /// - on_progress: Called with `(processed, total)` after every chunk
    ///
    /// On any error nothing is left at the output path: the partial file is
    /// removed before returning, including when the stop flag cancelled the
    /// run (`CipherError::UserStopped`).
    pub fn run(
        &self,
        source: &Path,
        destination: &Path,
        mode: Mode,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<PathBuf> {
        match mode {
            Mode::Encrypt => self.encrypt(source, destination, on_progress),
            Mode::Decrypt => self.decrypt(source, destination, on_progress),
        }
    }

    fn encrypt(
        &self,
        source: &Path,
        destination: &Path,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<PathBuf> {
        let total = source_len(source)?;
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CipherError::InvalidInput(format!("{} has no UTF-8 file name", source.display())))?;

        let iv = crypto::random_iv();
        let header = Header::seal(self.key, iv, name, total);
        let reader = File::open(source)?;

        let destination = self.claim(destination.to_path_buf());
        let partial = task_partial_path(&destination);
        let result = self.write_encrypted(reader, &partial, &header, total, on_progress);
        finish(result, &partial, &destination)
    }

    fn write_encrypted(
        &self,
        mut reader: File,
        destination: &Path,
        header: &Header,
        total: u64,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<()> {
        let mut writer = BufWriter::new(create_partial(destination)?);
        header.write_to(&mut writer)?;

        let chunk_size = self.chunk_size.unwrap_or_else(|| Self::chunk_size_for(total));
        let mut buffer = vec![0u8; chunk_size];
        let mut output = Vec::with_capacity(chunk_size + BLOCK_SIZE);
        let mut encryptor = CbcEncryptor::new(self.key, &header.iv);
        let mut processed = 0u64;

        loop {
            self.checkpoint()?;
            let bytes = fill_buffer(&mut reader, &mut buffer)?;
            if bytes == 0 {
                break;
            }

            output.clear();
            encryptor.update(&buffer[..bytes], &mut output);
            writer.write_all(&output)?;

            processed += bytes as u64;
            on_progress(processed, total);
        }

        output.clear();
        encryptor.finalize(&mut output);
        writer.write_all(&output)?;
        writer.flush()?;

        // Empty sources never enter the loop body
        if processed == 0 {
            on_progress(0, total);
        }
        Ok(())
    }

    fn decrypt(
        &self,
        source: &Path,
        destination: &Path,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<PathBuf> {
        let container_len = source_len(source)?;
        let mut reader = File::open(source)?;
        let header = Header::read_from(&mut reader, container_len)?;
        let name = header.open_name(self.key)?;

        let output = self.claim(
            destination
                .parent()
                .map(|dir| dir.join(&name))
                .unwrap_or_else(|| PathBuf::from(&name)),
        );
        if same_file(source, &output) {
            return Err(CipherError::InvalidInput(format!(
                "decrypted name {name} would overwrite the container"
            )));
        }

        let content_len = container_len.saturating_sub(header.len());
        let partial = task_partial_path(&output);
        let result = self.write_decrypted(reader, &partial, &header, content_len, on_progress);
        finish(result, &partial, &output)
    }

    fn write_decrypted(
        &self,
        mut reader: File,
        output: &Path,
        header: &Header,
        content_len: u64,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<()> {
        let total = content_len.max(1);
        let mut writer = BufWriter::new(create_partial(output)?);

        let chunk_size = self.chunk_size.unwrap_or_else(|| Self::chunk_size_for(content_len));
        let mut buffer = vec![0u8; chunk_size];
        let mut plain = Vec::with_capacity(chunk_size + BLOCK_SIZE);
        let mut decryptor = CbcDecryptor::new(self.key, &header.iv);
        let mut processed = 0u64;

        loop {
            self.checkpoint()?;
            let bytes = fill_buffer(&mut reader, &mut buffer)?;
            if bytes == 0 {
                break;
            }

            plain.clear();
            decryptor.update(&buffer[..bytes], &mut plain);
            writer.write_all(&plain)?;

            processed += bytes as u64;
            on_progress(processed, total);
        }

        plain.clear();
        decryptor.finalize(&mut plain)?;
        writer.write_all(&plain)?;
        writer.flush()?;
        Ok(())
    }

    fn claim(&self, wanted: PathBuf) -> PathBuf {
        match self.claims {
            Some(claims) => claims.claim(wanted),
            None => wanted,
        }
    }

    /// Chunk boundary: honour stop, then block while paused, then honour a
    /// stop that arrived during the pause.
    fn checkpoint(&self) -> Result<()> {
        if self.control.is_stop_requested() {
            return Err(CipherError::UserStopped);
        }
        self.control.wait_if_paused();
        if self.control.is_stop_requested() {
            return Err(CipherError::UserStopped);
        }
        Ok(())
    }
}

fn source_len(source: &Path) -> Result<u64> {
    let metadata = fs::metadata(source).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CipherError::SourceNotFound(source.to_path_buf()),
        _ => CipherError::Io(e),
    })?;
    if !metadata.is_file() {
        return Err(CipherError::InvalidInput(format!("{} is not a regular file", source.display())));
    }
    Ok(metadata.len())
}

/// Read until `buf` is full or the reader is exhausted.
fn fill_buffer<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Sibling path the engine writes to before the output is complete.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    destination.with_file_name(name)
}

/// Partial path private to one engine invocation: `<name>.<token>.part`.
fn task_partial_path(destination: &Path) -> PathBuf {
    let mut name: OsString = destination.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.part", container::random_token()));
    destination.with_file_name(name)
}

/// Never opens a file some other writer already created.
fn create_partial(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Move a completed partial file into place, or remove it if anything went
/// wrong.
fn finish(result: Result<()>, partial: &Path, output: &Path) -> Result<PathBuf> {
    let result = result.and_then(|()| fs::rename(partial, output).map_err(CipherError::from));
    match result {
        Ok(()) => Ok(output.to_path_buf()),
        Err(err) => {
            discard_partial(partial);
            Err(err)
        }
    }
}

fn discard_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        // Cleanup failure never replaces the primary error
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial output"),
    }
}
