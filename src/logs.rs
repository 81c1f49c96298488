//! Reading back the bot's own log file.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Return the last `count` lines of `path`, each with its line terminator.
/// Invalid UTF-8 is replaced with U+FFFD rather than failing the read.
pub async fn tail(path: impl Into<PathBuf>, count: usize) -> io::Result<Vec<String>> {
    let path = path.into();
    tokio::task::spawn_blocking(move || read_tail(&path, count))
        .await
        .map_err(io::Error::other)?
}

fn read_tail(path: &Path, count: usize) -> io::Result<Vec<String>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut lines = VecDeque::with_capacity(count);
    let mut line = Vec::new();

    while reader.read_until(b'\n', &mut line)? > 0 {
        if lines.len() == count {
            lines.pop_front();
        }
        lines.push_back(std::mem::take(&mut line));
    }

    Ok(lines
        .iter()
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect())
}
