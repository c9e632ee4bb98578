//! Offset-tracked accounting-log tailing.
//!
//! Each tick reads the daemon's log from the last recorded offset and
//! consumes only complete lines, so every byte is accounted exactly
//! once. A file smaller than the offset means the log was rotated or
//! truncated; the offset resets to zero and reading starts over.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

/// Read complete lines appended since `offset`.
///
/// Returns the new lines and the offset to resume from next tick. A
/// trailing partial line is left in place (the offset does not advance
/// past it). A missing file resets the offset to zero.
pub fn read_new_lines(path: &Path, offset: u64) -> io::Result<(Vec<String>, u64)> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok((Vec::new(), 0));
        }
        Err(e) => return Err(e),
    };

    let len = metadata.len();
    let offset = if len < offset {
        debug!(
            "Log {} shrank ({} < {}), treating as rotation",
            path.display(),
            len,
            offset
        );
        0
    } else {
        offset
    };

    if len == offset {
        return Ok((Vec::new(), offset));
    }

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.take(len - offset).read_to_end(&mut buf)?;

    // Consume up to and including the last newline; anything after it is
    // an incomplete line still being written.
    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok((Vec::new(), offset));
    };
    let consumed = last_newline + 1;

    let lines = buf[..last_newline]
        .split(|&b| b == b'\n')
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect();

    Ok((lines, offset + consumed as u64))
}
