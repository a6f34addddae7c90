//! Path-level archive operations, the primary embedding surface.
//!
//! ```no_run
//! use minitar::archive::{create_archive, append_files_to_archive, get_archive_file_list};
//! use minitar::FileList;
//!
//! let files: FileList = ["a.txt"].into_iter().collect();
//! create_archive("out.tar", &files)?;
//! append_files_to_archive("out.tar", &["b.txt"].into_iter().collect())?;
//!
//! let mut names = FileList::new();
//! get_archive_file_list("out.tar", &mut names)?;
//! assert_eq!(names.as_slice(), ["a.txt", "b.txt"]);
//! # Ok::<(), minitar::TarError>(())
//! ```
//!
//! Append, list, update and extract strip the footer before touching the
//! archive and write it back when they finish.  A failed operation may
//! leave the archive partially written.

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{BufReader, BufWriter, ErrorKind, Seek, SeekFrom};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use log::{debug, info, warn};

use crate::block::{strip_footer, write_footer};
use crate::error::{IoContext, TarError, TarResult};
use crate::file_list::FileList;
use crate::header::Member;
use crate::io_stream::{Entry, TarReader, TarWriter};

// ── ReadOptions ───────────────────────────────────────────────────────────────

/// Configuration for the reading operations.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Check every header's checksum and magic; mismatches are
    /// [`TarError::Format`].
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { verify_checksums: true }
    }
}

// ── Write ─────────────────────────────────────────────────────────────────────

/// Write a new archive holding `files` in order, replacing any existing
/// file at `archive_path`.
pub fn create_archive<P: AsRef<Path>>(archive_path: P, files: &FileList) -> TarResult<()> {
    let path = archive_path.as_ref();
    let archive = File::create(path).map_err(|source| TarError::DestinationOpen {
        path: path.to_owned(),
        source,
    })?;

    let written = write_members(BufWriter::new(archive), files)?;
    info!("created {} with {written} member(s)", path.display());
    Ok(())
}

/// Add `files` after the last member of an existing archive.
pub fn append_files_to_archive<P: AsRef<Path>>(archive_path: P, files: &FileList) -> TarResult<()> {
    let path = archive_path.as_ref();
    let mut archive = open_existing(path)?;
    let end = strip_footer(&mut archive)?;
    debug!("appending to {} at offset {end}", path.display());

    let written = write_members(BufWriter::new(archive), files)?;
    info!("appended {written} member(s) to {}", path.display());
    Ok(())
}

/// Append `files`, but only if every one of them is already a member.
/// Otherwise fails with [`TarError::NotInArchive`] and leaves the archive
/// as it was.
pub fn update_files_in_archive<P: AsRef<Path>>(archive_path: P, files: &FileList) -> TarResult<()> {
    let path = archive_path.as_ref();
    let mut present = FileList::new();
    get_archive_file_list(path, &mut present)?;

    if let Some(missing) = files.iter().find(|f| !present.contains(f.as_str())) {
        return Err(TarError::NotInArchive(missing.clone()));
    }
    append_files_to_archive(path, files)
}

fn write_members(store: BufWriter<File>, files: &FileList) -> TarResult<usize> {
    let mut writer = TarWriter::new(store);
    for name in files {
        writer.add_file(Path::new(name))?;
    }
    let written = writer.members();
    let store = writer.finish()?;
    store
        .into_inner()
        .map_err(|e| e.into_error())
        .action(|| "flushing archive")?
        .sync_all()
        .action(|| "syncing archive")?;
    Ok(written)
}

// ── Read ──────────────────────────────────────────────────────────────────────

/// Append the name of every member, in archive order, to `files_out`.
pub fn get_archive_file_list<P: AsRef<Path>>(archive_path: P, files_out: &mut FileList) -> TarResult<()> {
    list_names(archive_path, &ReadOptions::default(), files_out)
}

pub fn list_names<P: AsRef<Path>>(
    archive_path: P,
    opts:         &ReadOptions,
    files_out:    &mut FileList,
) -> TarResult<()> {
    scan_archive(archive_path.as_ref(), opts, |entry, reader| {
        files_out.add(entry.header.name());
        reader.skip_content(entry.size)
    })
}

/// Decoded headers of every member, in archive order.
pub fn list_members<P: AsRef<Path>>(archive_path: P, opts: &ReadOptions) -> TarResult<Vec<Member>> {
    let mut members = Vec::new();
    scan_archive(archive_path.as_ref(), opts, |entry, reader| {
        let member = entry
            .header
            .member()
            .map_err(|e| TarError::Format { offset: entry.offset, reason: e.to_string() })?;
        members.push(member);
        reader.skip_content(entry.size)
    })?;
    Ok(members)
}

/// Extract every member into the current directory.
pub fn extract_files_from_archive<P: AsRef<Path>>(archive_path: P) -> TarResult<()> {
    extract_to(archive_path, ".", &ReadOptions::default())
}

/// Extract every member into `dest`.  Member names are joined onto `dest`
/// as stored, so only trusted archives should be extracted.
pub fn extract_to<P: AsRef<Path>, D: AsRef<Path>>(
    archive_path: P,
    dest:         D,
    opts:         &ReadOptions,
) -> TarResult<()> {
    let dest = dest.as_ref();
    let mut extracted = 0usize;
    scan_archive(archive_path.as_ref(), opts, |entry, reader| {
        if !entry.header.is_regular() {
            warn!(
                "skipping {}: unsupported member type {:?}",
                entry.header.name(),
                char::from(entry.header.typeflag())
            );
            return reader.skip_content(entry.size);
        }

        let mode = entry
            .header
            .member()
            .map_err(|e| TarError::Format { offset: entry.offset, reason: e.to_string() })?
            .mode;
        let target = dest.join(OsStr::from_bytes(entry.header.name_bytes()));

        // An earlier copy of this member may already be there with a
        // read-only mode.
        match fs::remove_file(&target) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                return Err(TarError::DestinationOpen { path: target, source: e });
            }
            _ => {}
        }
        let mut out = File::create(&target).map_err(|source| TarError::DestinationOpen {
            path: target.clone(),
            source,
        })?;
        reader.copy_content(entry.size, &mut out)?;
        drop(out);

        fs::set_permissions(&target, Permissions::from_mode(mode))
            .action(|| format!("setting mode {mode:o} on {}", target.display()))?;

        extracted += 1;
        debug!("extracted {} ({} bytes)", target.display(), entry.size);
        Ok(())
    })?;
    info!("extracted {extracted} member(s) into {}", dest.display());
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

type ArchiveReader<'a> = TarReader<BufReader<&'a mut File>>;

/// Strip the footer, hand every header to `visit`, then restore the
/// footer.  The footer is written back even when the scan fails.
fn scan_archive<F>(path: &Path, opts: &ReadOptions, mut visit: F) -> TarResult<()>
where
    F: FnMut(&Entry, &mut ArchiveReader<'_>) -> TarResult<()>,
{
    let mut archive = open_existing(path)?;
    strip_footer(&mut archive)?;

    let scanned = (|| -> TarResult<usize> {
        let mut reader = TarReader::new(BufReader::new(&mut archive), opts.verify_checksums)?;
        let mut count = 0usize;
        while let Some(entry) = reader.next_header()? {
            visit(&entry, &mut reader)?;
            count += 1;
        }
        Ok(count)
    })();

    let restored = write_footer(&mut archive);
    let count = scanned?;
    restored?;
    debug!("scanned {count} member(s) in {}", path.display());
    Ok(())
}

fn open_existing(path: &Path) -> TarResult<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .action(|| format!("opening archive {}", path.display()))?;
    file.seek(SeekFrom::Start(0)).action(|| format!("seeking in {}", path.display()))?;
    Ok(file)
}
