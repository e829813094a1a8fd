use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use tempfile::NamedTempFile;

use crate::config::HostRewrite;
use crate::error::TreeError;

fn temp_beside(dest: &Path) -> Result<NamedTempFile, TreeError> {
    let parent = dest
        .parent()
        .ok_or_else(|| TreeError::Filesystem("invalid destination path".to_string()))?;
    tempfile::Builder::new()
        .prefix(".protein-tree")
        .tempfile_in(parent)
        .map_err(|err| TreeError::Filesystem(err.to_string()))
}

/// Decompresses a gzip file. The destination only appears once fully written.
/// Returns the decompressed size.
pub fn gunzip_file(src: &Path, dest: &Path) -> Result<u64, TreeError> {
    let file = File::open(src)
        .map_err(|err| TreeError::Filesystem(format!("open {}: {err}", src.display())))?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let temp = temp_beside(dest)?;
    let mut writer = BufWriter::new(temp);
    let written = io::copy(&mut decoder, &mut writer)
        .map_err(|err| TreeError::Filesystem(format!("decompress {}: {err}", src.display())))?;
    let temp = writer
        .into_inner()
        .map_err(|err| TreeError::Filesystem(err.to_string()))?;
    temp.persist(dest)
        .map_err(|err| TreeError::Filesystem(err.to_string()))?;
    Ok(written)
}

/// Copies `src` to `dest` line by line, applying each host rewrite as a plain
/// substring substitution. Returns the number of lines that changed.
pub fn rewrite_hosts(src: &Path, dest: &Path, rewrites: &[HostRewrite]) -> Result<usize, TreeError> {
    let file = File::open(src)
        .map_err(|err| TreeError::Filesystem(format!("open {}: {err}", src.display())))?;
    let mut reader = BufReader::new(file);
    let temp = temp_beside(dest)?;
    let mut writer = BufWriter::new(temp);
    let mut changed = 0usize;
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|err| TreeError::Filesystem(format!("read {}: {err}", src.display())))?;
        if read == 0 {
            break;
        }
        let mut out = Cow::Borrowed(line.as_str());
        for rewrite in rewrites {
            if !rewrite.from.is_empty() && out.contains(&rewrite.from) {
                out = Cow::Owned(out.replace(&rewrite.from, &rewrite.to));
            }
        }
        if matches!(out, Cow::Owned(_)) {
            changed += 1;
        }
        writer
            .write_all(out.as_bytes())
            .map_err(|err| TreeError::Filesystem(err.to_string()))?;
    }
    let temp = writer
        .into_inner()
        .map_err(|err| TreeError::Filesystem(err.to_string()))?;
    temp.persist(dest)
        .map_err(|err| TreeError::Filesystem(err.to_string()))?;
    Ok(changed)
}
