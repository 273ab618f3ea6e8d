//! Line sources feeding the encoder: FASTA, FASTQ (optionally gzipped) and
//! tab-delimited k-mer tables.
//!
//! Every source serializes [`LineSource::next_line`] internally, so one source
//! can be shared by several counting workers; each line goes to exactly one
//! caller.

use flate2::read::MultiGzDecoder;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Leading columns of a k-mer table row; the compact key is column
/// `FIXCOL - 2` and is terminated by a tab.
pub const FIXCOL: usize = 6;

const READ_BUF: usize = 4 * 1024 * 1024;

/// Record-oriented text input.
pub trait LineSource: Sync {
    /// Replace `buf` with the next line, without its terminator.
    /// Returns `Ok(false)` at end of input.
    fn next_line(&self, buf: &mut Vec<u8>) -> io::Result<bool>;

    /// Whether one record spans several lines, in which case the k-mer window
    /// carries over line ends and headers mark record boundaries.
    fn multiline_records(&self) -> bool {
        false
    }
}

type BoxedRead = Box<dyn BufRead + Send>;

/// Open `path` for buffered reading, transparently inflating gzip input.
pub fn open_buffered(path: &Path) -> io::Result<BoxedRead> {
    let file = File::open(path)?;
    let mut buffered = BufReader::with_capacity(READ_BUF, file);
    let is_gzipped = {
        let peek = buffered.fill_buf()?;
        peek.len() >= 2 && peek[0] == 0x1f && peek[1] == 0x8b
    };
    if is_gzipped {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(buffered))))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Read one line into `buf`, dropping `\n` / `\r\n`.
fn read_line_into(reader: &mut BoxedRead, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(false);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(true)
}

/// FASTA: yields every line, headers included.
pub struct FastaReader {
    inner: Mutex<BoxedRead>,
}

impl FastaReader {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        Ok(Self::from_reader(open_buffered(path)?))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Mutex::new(Box::new(reader)),
        }
    }
}

impl LineSource for FastaReader {
    fn next_line(&self, buf: &mut Vec<u8>) -> io::Result<bool> {
        read_line_into(&mut self.inner.lock(), buf)
    }

    fn multiline_records(&self) -> bool {
        true
    }
}

/// FASTQ: yields only the sequence line of each four-line record.
pub struct FastqReader {
    inner: Mutex<(BoxedRead, Vec<u8>)>,
}

impl FastqReader {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        Ok(Self::from_reader(open_buffered(path)?))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Mutex::new((Box::new(reader), Vec::with_capacity(512))),
        }
    }
}

impl LineSource for FastqReader {
    fn next_line(&self, buf: &mut Vec<u8>) -> io::Result<bool> {
        let mut guard = self.inner.lock();
        let (reader, scratch) = &mut *guard;
        // header; blank lines between records are tolerated
        loop {
            if !read_line_into(reader, scratch)? {
                return Ok(false);
            }
            if !scratch.is_empty() {
                break;
            }
        }
        if !read_line_into(reader, buf)? {
            return Ok(false);
        }
        // '+' separator and quality
        read_line_into(reader, scratch)?;
        read_line_into(reader, scratch)?;
        Ok(true)
    }
}

/// K-mer table: yields data rows, skipping `#` comment lines.
pub struct KtableReader {
    inner: Mutex<BoxedRead>,
}

impl KtableReader {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        Ok(Self::from_reader(open_buffered(path)?))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Mutex::new(Box::new(reader)),
        }
    }

    /// Compact key field of a data row: the text after the `FIXCOL - 2`-th tab.
    pub fn key_field(row: &[u8]) -> Option<&[u8]> {
        let mut tabs = 0usize;
        for (i, &b) in row.iter().enumerate() {
            if b == b'\t' {
                tabs += 1;
                if tabs == FIXCOL - 2 {
                    return Some(&row[i + 1..]);
                }
            }
        }
        None
    }
}

impl LineSource for KtableReader {
    fn next_line(&self, buf: &mut Vec<u8>) -> io::Result<bool> {
        let mut reader = self.inner.lock();
        loop {
            if !read_line_into(&mut reader, buf)? {
                return Ok(false);
            }
            if !buf.is_empty() && buf[0] != b'#' {
                return Ok(true);
            }
        }
    }
}
