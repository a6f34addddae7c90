//! ustar header codec.
//!
//! Field layout (512 bytes, all numeric fields zero-padded octal ASCII
//! followed by a NUL):
//!
//! | Field      | Offset | Width |
//! |------------|--------|-------|
//! | `name`     | 0      | 100   |
//! | `mode`     | 100    | 8     |
//! | `uid`      | 108    | 8     |
//! | `gid`      | 116    | 8     |
//! | `size`     | 124    | 12    |
//! | `mtime`    | 136    | 12    |
//! | `chksum`   | 148    | 8     |
//! | `typeflag` | 156    | 1     |
//! | `magic`    | 257    | 6     |
//! | `version`  | 263    | 2     |
//! | `uname`    | 265    | 32    |
//! | `gname`    | 297    | 32    |
//! | `devmajor` | 329    | 8     |
//! | `devminor` | 337    | 8     |
//!
//! The checksum is the unsigned sum of all 512 bytes with the `chksum`
//! field counted as eight ASCII spaces.  It is always written last.

use std::fs::{self, Metadata};
use std::ops::Range;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::sys::stat::{major, minor};
use nix::unistd::{Gid, Group, Uid, User};
use serde::Serialize;
use thiserror::Error;

use crate::block::BLOCK_SIZE;
use crate::error::{TarError, TarResult};

// ── Layout ───────────────────────────────────────────────────────────────────

const NAME:     Range<usize> = 0..100;
const MODE:     Range<usize> = 100..108;
const UID:      Range<usize> = 108..116;
const GID:      Range<usize> = 116..124;
const SIZE:     Range<usize> = 124..136;
const MTIME:    Range<usize> = 136..148;
const CHKSUM:   Range<usize> = 148..156;
const TYPEFLAG: usize        = 156;
const MAGIC:    Range<usize> = 257..263;
const VERSION:  Range<usize> = 263..265;
const UNAME:    Range<usize> = 265..297;
const GNAME:    Range<usize> = 297..329;
const DEVMAJOR: Range<usize> = 329..337;
const DEVMINOR: Range<usize> = 337..345;

pub const USTAR_MAGIC:   &[u8; 6] = b"ustar\0";
pub const USTAR_VERSION: &[u8; 2] = b"00";
/// Regular file; the only member type this crate writes.
pub const REGTYPE:       u8       = b'0';
/// Pre-POSIX spelling of a regular file.
pub const AREGTYPE:      u8       = b'\0';

// ── Field errors ─────────────────────────────────────────────────────────────

/// A header field that could not be encoded or decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("{field} value {value} does not fit in {digits} octal digits")]
    Overflow { field: &'static str, value: u64, digits: usize },
    #[error("{field} is {len} bytes long, the limit is {max}")]
    TooLong { field: &'static str, len: usize, max: usize },
    #[error("{field} field is not octal: {raw:?}")]
    NotOctal { field: &'static str, raw: String },
}

// ── HeaderFields ─────────────────────────────────────────────────────────────

/// Everything that goes into a header, already resolved.
#[derive(Debug, Clone)]
pub struct HeaderFields<'a> {
    pub name:     &'a [u8],
    pub mode:     u32,
    pub uid:      u32,
    pub gid:      u32,
    pub uname:    &'a str,
    pub gname:    &'a str,
    pub size:     u64,
    pub mtime:    u64,
    pub devmajor: u64,
    pub devminor: u64,
}

// ── Member ───────────────────────────────────────────────────────────────────

/// Decoded view of a header read back from an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub name:     String,
    pub mode:     u32,
    pub uid:      u32,
    pub gid:      u32,
    pub uname:    String,
    pub gname:    String,
    pub size:     u64,
    pub mtime:    u64,
    pub typeflag: char,
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    bytes: [u8; BLOCK_SIZE],
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("name", &self.name())
            .field("size", &self.size())
            .field("chksum", &self.stored_checksum())
            .finish()
    }
}

impl Header {
    /// Encode the header for the file at `path`, following symlinks the
    /// way `stat(2)` does.  The path itself is stored as the member name.
    pub fn from_path<P: AsRef<Path>>(path: P) -> TarResult<Self> {
        let path = path.as_ref();
        let meta = fs::metadata(path).map_err(|e| TarError::Metadata {
            path:   path.to_owned(),
            reason: format!("stat failed: {e}"),
        })?;
        Self::from_metadata(path, &meta)
    }

    /// Encode a header named `name` from metadata obtained elsewhere,
    /// typically from the handle whose content is about to be streamed.
    pub fn from_metadata(name: &Path, meta: &Metadata) -> TarResult<Self> {
        let fail = |reason: String| TarError::Metadata { path: name.to_owned(), reason };

        if !meta.is_file() {
            return Err(fail("not a regular file".into()));
        }
        let uname = user_name(meta.uid()).map_err(fail)?;
        let gname = group_name(meta.gid()).map_err(fail)?;
        let mtime = u64::try_from(meta.mtime())
            .map_err(|_| fail(format!("modification time {} precedes the epoch", meta.mtime())))?;
        let dev = meta.dev();

        Self::encode(&HeaderFields {
            name:     name.as_os_str().as_bytes(),
            mode:     meta.mode(),
            uid:      meta.uid(),
            gid:      meta.gid(),
            uname:    &uname,
            gname:    &gname,
            size:     meta.len(),
            mtime,
            devmajor: major(dev),
            devminor: minor(dev),
        })
        .map_err(|e| fail(e.to_string()))
    }

    /// Lay out `fields` as a regular-file ustar header and seal it with
    /// its checksum.
    pub fn encode(fields: &HeaderFields<'_>) -> Result<Self, FieldError> {
        let mut bytes = [0u8; BLOCK_SIZE];

        put_bytes(&mut bytes[NAME], "name", fields.name)?;
        put_octal(&mut bytes[MODE], "mode", u64::from(fields.mode & 0o7777))?;
        put_octal(&mut bytes[UID], "uid", u64::from(fields.uid))?;
        put_octal(&mut bytes[GID], "gid", u64::from(fields.gid))?;
        put_bytes(&mut bytes[UNAME], "uname", fields.uname.as_bytes())?;
        put_bytes(&mut bytes[GNAME], "gname", fields.gname.as_bytes())?;
        put_octal(&mut bytes[SIZE], "size", fields.size)?;
        put_octal(&mut bytes[MTIME], "mtime", fields.mtime)?;
        bytes[TYPEFLAG] = REGTYPE;
        bytes[MAGIC].copy_from_slice(USTAR_MAGIC);
        bytes[VERSION].copy_from_slice(USTAR_VERSION);
        put_octal(&mut bytes[DEVMAJOR], "devmajor", fields.devmajor)?;
        put_octal(&mut bytes[DEVMINOR], "devminor", fields.devminor)?;

        let sum = checksum(&bytes);
        put_octal(&mut bytes[CHKSUM], "chksum", u64::from(sum))?;
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.bytes
    }

    /// True for an all-zero block (end-of-archive marker).
    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }

    // ── Decoding ─────────────────────────────────────────────────────────────

    pub fn name_bytes(&self) -> &[u8] {
        until_nul(&self.bytes[NAME])
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    pub fn size(&self) -> Result<u64, FieldError> {
        parse_octal(&self.bytes[SIZE], "size")
    }

    pub fn typeflag(&self) -> u8 {
        self.bytes[TYPEFLAG]
    }

    pub fn is_regular(&self) -> bool {
        matches!(self.typeflag(), REGTYPE | AREGTYPE)
    }

    /// Accepts both the POSIX `"ustar\0"` and the GNU `"ustar "` spelling.
    pub fn has_ustar_magic(&self) -> bool {
        &self.bytes[MAGIC.start..MAGIC.start + 5] == b"ustar"
    }

    pub fn stored_checksum(&self) -> Result<u32, FieldError> {
        let value = parse_octal(&self.bytes[CHKSUM], "chksum")?;
        u32::try_from(value).map_err(|_| FieldError::Overflow { field: "chksum", value, digits: 7 })
    }

    /// Compare the stored checksum with the one recomputed over the block.
    /// Returns the pair `(stored, computed)` on mismatch.
    pub fn verify_checksum(&self) -> Result<(), (u32, u32)> {
        let computed = checksum(&self.bytes);
        match self.stored_checksum() {
            Ok(stored) if stored == computed => Ok(()),
            Ok(stored) => Err((stored, computed)),
            Err(_) => Err((0, computed)),
        }
    }

    pub fn member(&self) -> Result<Member, FieldError> {
        Ok(Member {
            name:     self.name(),
            mode:     parse_octal(&self.bytes[MODE], "mode")? as u32,
            uid:      parse_octal(&self.bytes[UID], "uid")? as u32,
            gid:      parse_octal(&self.bytes[GID], "gid")? as u32,
            uname:    String::from_utf8_lossy(until_nul(&self.bytes[UNAME])).into_owned(),
            gname:    String::from_utf8_lossy(until_nul(&self.bytes[GNAME])).into_owned(),
            size:     self.size()?,
            mtime:    parse_octal(&self.bytes[MTIME], "mtime")?,
            typeflag: char::from(self.typeflag()),
        })
    }
}

/// Unsigned byte-sum of `block` with the checksum field read as spaces.
pub fn checksum(block: &[u8; BLOCK_SIZE]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| if CHKSUM.contains(&i) { u32::from(b' ') } else { u32::from(b) })
        .sum()
}

// ── Field helpers ────────────────────────────────────────────────────────────

/// Right-justified zero-padded octal filling all but the last byte, which
/// stays NUL.
fn put_octal(field: &mut [u8], name: &'static str, value: u64) -> Result<(), FieldError> {
    let digits = field.len() - 1;
    let text = format!("{value:0digits$o}");
    if text.len() > digits {
        return Err(FieldError::Overflow { field: name, value, digits });
    }
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
    Ok(())
}

/// NUL-padded string; a value exactly as wide as the field is stored
/// without a terminator.
fn put_bytes(field: &mut [u8], name: &'static str, value: &[u8]) -> Result<(), FieldError> {
    if value.len() > field.len() {
        return Err(FieldError::TooLong { field: name, len: value.len(), max: field.len() });
    }
    field[..value.len()].copy_from_slice(value);
    field[value.len()..].fill(0);
    Ok(())
}

fn until_nul(field: &[u8]) -> &[u8] {
    match field.iter().position(|&b| b == 0) {
        Some(end) => &field[..end],
        None => field,
    }
}

/// Octal digits surrounded by optional spaces/NULs; an empty field is 0.
fn parse_octal(field: &[u8], name: &'static str) -> Result<u64, FieldError> {
    let digits = until_nul(field);
    let trimmed = std::str::from_utf8(digits)
        .map(|s| s.trim_matches(' '))
        .map_err(|_| FieldError::NotOctal { field: name, raw: String::from_utf8_lossy(field).into_owned() })?;
    if trimmed.is_empty() {
        return Ok(0);
    }
    if !trimmed.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(FieldError::NotOctal { field: name, raw: trimmed.to_owned() });
    }
    u64::from_str_radix(trimmed, 8)
        .map_err(|_| FieldError::NotOctal { field: name, raw: trimmed.to_owned() })
}

// ── Identity lookup ──────────────────────────────────────────────────────────

fn user_name(uid: u32) -> Result<String, String> {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(format!("no user name for uid {uid}")),
        Err(e) => Err(format!("looking up owner of uid {uid}: {e}")),
    }
}

fn group_name(gid: u32) -> Result<String, String> {
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(Some(group)) => Ok(group.name),
        Ok(None) => Err(format!("no group name for gid {gid}")),
        Err(e) => Err(format!("looking up group of gid {gid}: {e}")),
    }
}
