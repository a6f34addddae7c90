//! Block-level I/O: the archive is read and written in 512-byte units and
//! terminated by a footer of two all-zero blocks.
//!
//! Append, list and extract all strip the footer first and rewrite it when
//! they are done, so at rest the archive is always footer-terminated.

use std::fs::File;
use std::io::{self, Cursor, ErrorKind, Read, Seek, SeekFrom, Write};

use log::debug;

use crate::error::{IoContext, TarError, TarResult};

pub const BLOCK_SIZE:    usize = 512;
pub const FOOTER_BLOCKS: usize = 2;
pub const FOOTER_SIZE:   u64   = (BLOCK_SIZE * FOOTER_BLOCKS) as u64;

pub static ZERO_BLOCK: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

// ── Block arithmetic ─────────────────────────────────────────────────────────

/// Number of content blocks occupied by `size` bytes of member data.
#[inline]
pub fn block_count(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE as u64)
}

/// Zero bytes following the last meaningful byte of a member.
#[inline]
pub fn padding_for(size: u64) -> u64 {
    block_count(size) * BLOCK_SIZE as u64 - size
}

// ── BlockStore ───────────────────────────────────────────────────────────────

/// A seekable byte store that can also be shortened in place.
pub trait BlockStore: Read + Write + Seek {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl BlockStore for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl BlockStore for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "length exceeds address space"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

// ── Footer ───────────────────────────────────────────────────────────────────

/// Truncate the two trailing zero blocks and leave the cursor at the new end.
///
/// Returns the length of the store after truncation.  Nothing is modified
/// when the store is shorter than the footer or its last 1024 bytes are
/// not all zero.
pub fn strip_footer<S: BlockStore>(store: &mut S) -> TarResult<u64> {
    let end = store.seek(SeekFrom::End(0)).action(|| "seeking to end of archive")?;
    if end < FOOTER_SIZE {
        return Err(TarError::Io {
            action: "seeking to archive footer".into(),
            source: io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("archive is {end} bytes long, shorter than its {FOOTER_SIZE}-byte footer"),
            ),
        });
    }

    let footer_start = end - FOOTER_SIZE;
    store.seek(SeekFrom::Start(footer_start)).action(|| "seeking to archive footer")?;
    let mut footer = [0u8; FOOTER_SIZE as usize];
    store.read_exact(&mut footer).action(|| "reading archive footer")?;
    if let Some(pos) = footer.iter().position(|&b| b != 0) {
        return Err(TarError::Format {
            offset: footer_start + pos as u64,
            reason: "archive does not end with two zero blocks".into(),
        });
    }

    store.set_len(footer_start).action(|| "truncating archive footer")?;
    store.seek(SeekFrom::Start(footer_start)).action(|| "seeking to end of archive content")?;
    debug!("stripped footer, content ends at {footer_start}");
    Ok(footer_start)
}

/// Append the two-zero-block footer at the end of the store.
pub fn write_footer<S: Write + Seek>(store: &mut S) -> TarResult<()> {
    let at = store.seek(SeekFrom::End(0)).action(|| "seeking to end of archive")?;
    for _ in 0..FOOTER_BLOCKS {
        store.write_all(&ZERO_BLOCK).action(|| "writing archive footer")?;
    }
    store.flush().action(|| "flushing archive footer")?;
    debug!("wrote footer at offset {at}");
    Ok(())
}

// ── Whole-block reads ────────────────────────────────────────────────────────

/// Fill `buf` with the next block.
///
/// Returns `Ok(false)` on a clean end of store (no bytes available) and
/// `UnexpectedEof` when the store ends part-way through a block.
pub fn read_block<R: Read>(reader: &mut R, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    match filled {
        0 => Ok(false),
        BLOCK_SIZE => Ok(true),
        n => Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("store ends {n} bytes into a {BLOCK_SIZE}-byte block"),
        )),
    }
}

/// Read up to one block from `reader`, stopping early only at end of input.
/// Bytes past the returned count are zeroed.
pub fn fill_block<R: Read>(reader: &mut R, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<usize> {
    buf.fill(0);
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(block_count(0), 0);
        assert_eq!(block_count(1), 1);
        assert_eq!(block_count(511), 1);
        assert_eq!(block_count(512), 1);
        assert_eq!(block_count(513), 2);
        assert_eq!(block_count(600), 2);
    }

    #[test]
    fn padding_completes_the_last_block() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(512), 0);
        assert_eq!(padding_for(600), 424);
        assert_eq!(padding_for(1), 511);
    }

    #[test]
    fn strip_then_write_restores_store() {
        let mut data = vec![7u8; BLOCK_SIZE];
        data.extend_from_slice(&[0u8; FOOTER_SIZE as usize]);
        let original = data.clone();
        let mut store = Cursor::new(data);

        assert_eq!(strip_footer(&mut store).unwrap(), BLOCK_SIZE as u64);
        assert_eq!(store.get_ref().len(), BLOCK_SIZE);
        assert_eq!(store.position(), BLOCK_SIZE as u64);

        write_footer(&mut store).unwrap();
        assert_eq!(store.into_inner(), original);
    }

    #[test]
    fn strip_rejects_short_store() {
        let mut store = Cursor::new(vec![0u8; 1000]);
        assert!(matches!(strip_footer(&mut store), Err(TarError::Io { .. })));
        assert_eq!(store.get_ref().len(), 1000);
    }

    #[test]
    fn strip_rejects_nonzero_footer() {
        let mut data = vec![0u8; 2048];
        data[2047] = 1;
        let mut store = Cursor::new(data);
        match strip_footer(&mut store) {
            Err(TarError::Format { offset, .. }) => assert_eq!(offset, 2047),
            other => panic!("expected format error, got {other:?}"),
        }
        assert_eq!(store.get_ref().len(), 2048);
    }

    #[test]
    fn read_block_distinguishes_eof_from_truncation() {
        let mut buf = [0u8; BLOCK_SIZE];
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(!read_block(&mut empty, &mut buf).unwrap());

        let mut full = Cursor::new(vec![3u8; BLOCK_SIZE]);
        assert!(read_block(&mut full, &mut buf).unwrap());
        assert_eq!(buf, [3u8; BLOCK_SIZE]);

        let mut short = Cursor::new(vec![3u8; 100]);
        let err = read_block(&mut short, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn fill_block_zero_pads() {
        let mut buf = [9u8; BLOCK_SIZE];
        let mut src = Cursor::new(b"abc".to_vec());
        assert_eq!(fill_block(&mut src, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert!(buf[3..].iter().all(|&b| b == 0));
    }
}
