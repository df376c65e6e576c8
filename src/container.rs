// Container Module - On-disk Framing
// =======================================================
// An encrypted file is a single linear record:
//
//   IV (16) | NameLen (u32 BE) | EncryptedName (NameLen) | OriginalSize (u64 BE) | CipherStream
//
// The file name and the content are both AES-256-CBC under the same key and
// the same IV, each with its own PKCS#7 padding. `OriginalSize` is only used
// for progress reporting: the content length is self-delimited by the padding.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use rand::{RngCore, rngs::OsRng};

use crate::crypto::{self, Key, BLOCK_SIZE, IV_SIZE};
use crate::error::{CipherError, Result};

/// Extension appended to every container file name.
pub const EXTENSION: &str = "enc";

// Bytes of the header that do not depend on the name length
const FIXED_HEADER_SIZE: u64 = (IV_SIZE + 4 + 8) as u64;
// Width of the random token used for obfuscated file names
const TOKEN_BYTES: usize = 6;

/// Parsed (or about to be written) container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub iv: [u8; IV_SIZE],
    pub encrypted_name: Vec<u8>,
    pub original_size: u64,
}

impl Header {
    /// Build a header for `name`, encrypting it under `key`/`iv`.
    pub fn seal(key: &Key, iv: [u8; IV_SIZE], name: &str, original_size: u64) -> Self {
        Self {
            iv,
            encrypted_name: crypto::encrypt_bytes(key, &iv, name.as_bytes()),
            original_size,
        }
    }

    /// Serialized size of this header in bytes.
    pub fn len(&self) -> u64 {
        FIXED_HEADER_SIZE + self.encrypted_name.len() as u64
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let name_len = u32::try_from(self.encrypted_name.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file name too long"))?;
        writer.write_all(&self.iv)?;
        writer.write_all(&name_len.to_be_bytes())?;
        writer.write_all(&self.encrypted_name)?;
        writer.write_all(&self.original_size.to_be_bytes())?;
        Ok(())
    }

    /// Read a header from the start of a container that is `container_len`
    /// bytes long in total.
    pub fn read_from<R: Read>(reader: &mut R, container_len: u64) -> Result<Self> {
        let mut iv = [0u8; IV_SIZE];
        read_field(reader, &mut iv, "truncated IV")?;

        let mut len_bytes = [0u8; 4];
        read_field(reader, &mut len_bytes, "truncated name length")?;
        let name_len = u32::from_be_bytes(len_bytes) as u64;

        let remaining = container_len.saturating_sub(IV_SIZE as u64 + 4);
        if name_len > remaining {
            return Err(CipherError::CorruptHeader("name length exceeds file size"));
        }

        let mut encrypted_name = vec![0u8; name_len as usize];
        read_field(reader, &mut encrypted_name, "truncated file name")?;

        let mut size_bytes = [0u8; 8];
        read_field(reader, &mut size_bytes, "truncated size field")?;

        Ok(Self {
            iv,
            encrypted_name,
            original_size: u64::from_be_bytes(size_bytes),
        })
    }

    /// Decrypt the embedded file name.
    ///
    /// Padding failures, invalid UTF-8 and names that are not a single plain
    /// path segment all surface as `WrongKey`.
    pub fn open_name(&self, key: &Key) -> Result<String> {
        if self.encrypted_name.is_empty() || self.encrypted_name.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::CorruptHeader("invalid name block length"));
        }
        let plain = crypto::decrypt_bytes(key, &self.iv, &self.encrypted_name)
            .map_err(|_| CipherError::WrongKey)?;
        let name = String::from_utf8(plain).map_err(|_| CipherError::WrongKey)?;
        if !is_plain_file_name(&name) {
            return Err(CipherError::WrongKey);
        }
        Ok(name)
    }
}

/// Read just the header of a container and return the original file name and
/// recorded size, without touching the content.
pub fn read_header(path: &Path, key: &Key) -> Result<(String, u64)> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CipherError::SourceNotFound(path.to_path_buf()),
        _ => CipherError::Io(e),
    })?;
    let len = file.metadata()?.len();
    let header = Header::read_from(&mut file, len)?;
    let name = header.open_name(key)?;
    Ok((name, header.original_size))
}

/// Visible name for a new container.
///
/// With obfuscation the original name is replaced by a random 12-character hex
/// token; otherwise `.enc` is appended to the original name.
pub fn container_file_name(original: &OsStr, obfuscate: bool) -> OsString {
    if obfuscate {
        return OsString::from(format!("{}.{}", random_token(), EXTENSION));
    }
    let mut name = original.to_os_string();
    name.push(".");
    name.push(EXTENSION);
    name
}

pub(crate) fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn read_field<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CipherError::CorruptHeader(what),
        _ => CipherError::Io(e),
    })
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
