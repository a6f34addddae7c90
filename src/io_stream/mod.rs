//! Streaming member engine: writer and reader.
//!
//! # Writer
//! [`TarWriter`] accepts files one at a time.  Each member is a 512-byte
//! header followed by the file content split into 512-byte blocks, the last
//! one zero-padded.  [`TarWriter::finish`] appends the two-zero-block
//! footer.
//!
//! # Reader
//! [`TarReader`] walks a footer-stripped archive header by header.  The
//! caller must consume each member's content with either
//! [`TarReader::skip_content`] or [`TarReader::copy_content`] before asking
//! for the next header.  The content block count is derived from the
//! header's `size` field alone.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, trace};

use crate::block::{self, fill_block, read_block, BLOCK_SIZE};
use crate::error::{IoContext, TarError, TarResult};
use crate::header::Header;

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct TarWriter<W: Write + Seek> {
    writer:  W,
    members: usize,
}

impl<W: Write + Seek> TarWriter<W> {
    /// Members are written at the current position of `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer, members: 0 }
    }

    /// Open `path`, encode its header from the open handle and stream its
    /// content.  The path is stored verbatim as the member name.
    pub fn add_file(&mut self, path: &Path) -> TarResult<()> {
        let mut source = File::open(path).map_err(|source| TarError::SourceOpen {
            path: path.to_owned(),
            source,
        })?;
        let meta = source.metadata().map_err(|e| TarError::Metadata {
            path:   path.to_owned(),
            reason: format!("stat failed: {e}"),
        })?;
        let header = Header::from_metadata(path, &meta)?;
        self.add_member(&header, &mut source)
    }

    /// Write `header` followed by exactly `header.size()` bytes of
    /// `content`.  A source that ends early is an error.
    pub fn add_member<R: Read>(&mut self, header: &Header, content: &mut R) -> TarResult<()> {
        let name = header.name();
        let size = header.size().map_err(|e| TarError::Metadata {
            path:   name.clone().into(),
            reason: e.to_string(),
        })?;

        self.writer
            .write_all(header.as_bytes())
            .action(|| format!("writing header of {name}"))?;

        let mut content = content.take(size);
        let mut buf = [0u8; BLOCK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let n = fill_block(&mut content, &mut buf).action(|| format!("reading {name}"))?;
            if (n as u64) < remaining.min(BLOCK_SIZE as u64) {
                return Err(TarError::Io {
                    action: format!("reading {name}"),
                    source: io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("file ended after {} of {size} bytes", size - remaining + n as u64),
                    ),
                });
            }
            self.writer
                .write_all(&buf)
                .action(|| format!("writing content of {name}"))?;
            remaining -= n as u64;
        }

        self.members += 1;
        debug!("added {name} ({size} bytes, {} blocks)", block::block_count(size));
        Ok(())
    }

    /// Number of members written through this writer.
    pub fn members(&self) -> usize {
        self.members
    }

    /// Write the footer and hand back the underlying store.
    pub fn finish(mut self) -> TarResult<W> {
        block::write_footer(&mut self.writer)?;
        Ok(self.writer)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// A header together with where it was found and its decoded size.
#[derive(Debug, Clone)]
pub struct Entry {
    pub header: Header,
    pub offset: u64,
    pub size:   u64,
}

pub struct TarReader<R: Read + Seek> {
    reader:          R,
    len:             u64,
    verify_checksum: bool,
}

impl<R: Read + Seek> TarReader<R> {
    /// Start reading at the beginning of `reader`.  `reader` must not
    /// contain the footer.
    pub fn new(mut reader: R, verify_checksum: bool) -> TarResult<Self> {
        let len = reader.seek(SeekFrom::End(0)).action(|| "seeking to end of archive")?;
        reader.seek(SeekFrom::Start(0)).action(|| "rewinding archive")?;
        Ok(Self { reader, len, verify_checksum })
    }

    /// Read the next header, or `None` at the end of the store.  An
    /// all-zero block also ends the scan.
    pub fn next_header(&mut self) -> TarResult<Option<Entry>> {
        let offset = self.reader.stream_position().action(|| "locating next header")?;
        let mut bytes = [0u8; BLOCK_SIZE];
        if !read_block(&mut self.reader, &mut bytes)
            .action(|| format!("reading header at offset {offset}"))?
        {
            return Ok(None);
        }

        let header = Header::from_bytes(bytes);
        if header.is_zero() {
            debug!("zero block at offset {offset}, ending scan");
            return Ok(None);
        }
        if self.verify_checksum {
            if !header.has_ustar_magic() {
                return Err(TarError::Format { offset, reason: "missing ustar magic".into() });
            }
            if let Err((stored, computed)) = header.verify_checksum() {
                return Err(TarError::Format {
                    offset,
                    reason: format!("checksum mismatch: stored {stored:o}, computed {computed:o}"),
                });
            }
        }
        let size = header
            .size()
            .map_err(|e| TarError::Format { offset, reason: e.to_string() })?;

        let end = offset + BLOCK_SIZE as u64 + block::block_count(size) * BLOCK_SIZE as u64;
        if end > self.len {
            return Err(TarError::Format {
                offset,
                reason: format!("member {} claims {size} bytes but the archive ends at {}", header.name(), self.len),
            });
        }

        trace!("header {} at offset {offset}, {size} bytes", header.name());
        Ok(Some(Entry { header, offset, size }))
    }

    /// Seek past the content blocks of a member of `size` bytes.
    pub fn skip_content(&mut self, size: u64) -> TarResult<()> {
        let blocks = block::block_count(size);
        let skip = blocks
            .checked_mul(BLOCK_SIZE as u64)
            .and_then(|bytes| i64::try_from(bytes).ok());
        let skip = skip.ok_or_else(|| TarError::Io {
            action: format!("skipping {blocks} content blocks"),
            source: io::Error::new(ErrorKind::InvalidInput, format!("member size {size} out of range")),
        })?;
        self.reader
            .seek(SeekFrom::Current(skip))
            .action(|| format!("skipping {blocks} content blocks"))?;
        Ok(())
    }

    /// Copy exactly `size` bytes of member content to `out`, consuming and
    /// discarding the padding of the last block.
    pub fn copy_content<W: Write>(&mut self, size: u64, out: &mut W) -> TarResult<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            if !read_block(&mut self.reader, &mut buf).action(|| "reading content block")? {
                return Err(TarError::Io {
                    action: "reading content block".into(),
                    source: io::Error::new(ErrorKind::UnexpectedEof, "archive ended inside a member"),
                });
            }
            let meaningful = remaining.min(BLOCK_SIZE as u64) as usize;
            out.write_all(&buf[..meaningful]).action(|| "writing extracted content")?;
            remaining -= meaningful as u64;
        }
        out.flush().action(|| "flushing extracted content")?;
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
