//! Line-level helpers over a single log segment file.
//!
//! A *complete* line is one terminated by `\n`. A trailing fragment without
//! a newline is what a power cut in the middle of an append leaves behind;
//! it is never reported as a record. Blank lines carry no record and are
//! skipped everywhere.
//!
//! Lines are handled as bytes so that a corrupted (non-UTF-8) line can be
//! counted, copied and discarded like any other malformed record instead of
//! wedging the queue.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::MAX_LINE_LEN;

/// Window read from the end of a log when looking for its last line.
const TAIL_WINDOW: u64 = (MAX_LINE_LEN as u64 + 2) * 2;

/// Path of the compaction segment that replaces `path`.
pub fn segment_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(crate::SEGMENT_SUFFIX);
    path.with_file_name(name)
}

fn open_if_exists(path: &Path) -> io::Result<Option<File>> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Visit each complete, non-blank line in order. The visitor returns
/// `false` to stop early.
fn for_each_line<F>(path: &Path, mut visit: F) -> io::Result<()>
where
    F: FnMut(&[u8]) -> bool,
{
    let Some(file) = open_if_exists(path)? else {
        return Ok(());
    };
    let mut reader = BufReader::new(file);
    let mut buf = Vec::with_capacity(MAX_LINE_LEN + 2);
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 || buf.last() != Some(&b'\n') {
            return Ok(());
        }
        let line = trim_line(&buf);
        if line.is_empty() {
            continue;
        }
        if !visit(line) {
            return Ok(());
        }
    }
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Number of complete, non-blank lines. A missing file counts as empty.
pub fn count_lines(path: &Path) -> io::Result<usize> {
    let mut count = 0;
    for_each_line(path, |_| {
        count += 1;
        true
    })?;
    Ok(count)
}

/// The first complete, non-blank line.
pub fn first_line(path: &Path) -> io::Result<Option<Vec<u8>>> {
    let mut first = None;
    for_each_line(path, |line| {
        first = Some(line.to_vec());
        false
    })?;
    Ok(first)
}

/// All complete, non-blank lines.
pub fn read_lines(path: &Path) -> io::Result<Vec<Vec<u8>>> {
    let mut lines = Vec::new();
    for_each_line(path, |line| {
        lines.push(line.to_vec());
        true
    })?;
    Ok(lines)
}

/// The last complete, non-blank line, read from a bounded tail window so
/// the cost does not grow with the size of the log.
pub fn last_line(path: &Path) -> io::Result<Option<Vec<u8>>> {
    let Some(mut file) = open_if_exists(path)? else {
        return Ok(None);
    };
    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;
    let mut tail = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut tail)?;

    // Drop a torn fragment after the final newline.
    let Some(end) = tail.iter().rposition(|b| *b == b'\n') else {
        return Ok(None);
    };
    let complete = &tail[..end];

    for candidate in complete.rsplit(|b| *b == b'\n') {
        let line = candidate.strip_suffix(b"\r").unwrap_or(candidate);
        if !line.is_empty() {
            // The window may have cut the first candidate mid-line; only
            // trust it when a newline or the start of the file precedes it.
            let offset = line.as_ptr() as usize - complete.as_ptr() as usize;
            if offset == 0 && start > 0 {
                return Ok(None);
            }
            return Ok(Some(line.to_vec()));
        }
    }
    Ok(None)
}

/// Whether the file is missing, empty, or ends in a newline.
fn ends_cleanly(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Append one line and make it durable.
///
/// Never truncates or rewrites existing bytes. If the file ends in a torn
/// fragment, a newline is written first so the fragment stays a separate
/// (malformed) line.
pub fn append_line(path: &Path, line: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;

    let mut out = Vec::with_capacity(line.len() + 2);
    if !ends_cleanly(&mut file)? {
        out.push(b'\n');
    }
    out.extend_from_slice(line);
    out.push(b'\n');

    file.write_all(&out)?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

/// Copy every complete line except the first non-blank one into the
/// compaction segment and swap it in place of `path`.
///
/// Returns the removed line, or `None` if there was nothing to remove (in
/// which case the file is left untouched). A torn trailing fragment is
/// carried over as its own line.
pub fn compact_without_first(path: &Path) -> io::Result<Option<Vec<u8>>> {
    let Some(file) = open_if_exists(path)? else {
        return Ok(None);
    };
    let segment = segment_path(path);

    let mut reader = BufReader::new(file);
    let mut writer = BufWriter::new(File::create(&segment)?);
    let mut removed: Option<Vec<u8>> = None;
    let mut buf = Vec::with_capacity(MAX_LINE_LEN + 2);

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        let line = trim_line(&buf);
        if line.is_empty() {
            continue;
        }
        let complete = buf.last() == Some(&b'\n');
        if removed.is_none() && complete {
            removed = Some(line.to_vec());
            continue;
        }
        writer.write_all(line)?;
        writer.write_all(b"\n")?;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    if removed.is_none() {
        fs::remove_file(&segment)?;
        return Ok(None);
    }

    swap_segment(&segment, path)?;
    Ok(removed)
}

/// Replace `target` with `segment`.
///
/// `rename` replaces atomically where the filesystem supports it. Where it
/// refuses to overwrite, fall back to delete-old then rename-new; recovery
/// handles a crash between those two steps.
pub fn swap_segment(segment: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(segment, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists || e.kind() == io::ErrorKind::PermissionDenied => {
            fs::remove_file(target)?;
            fs::rename(segment, target)
        }
        Err(e) => Err(e),
    }
}
