//! Newline-framed records.
//!
//! Streams between commands carry records, each terminated by a newline.
//! A final record without a terminator is still delivered.

use crate::stream::StreamHandle;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;

/// Iterator over the records of a stream, each with its newline still attached.
pub struct Records {
    reader: BufReader<ArcFile>,
}

struct ArcFile(Arc<File>);

impl io::Read for ArcFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut f: &File = &self.0;
        f.read(buf)
    }
}

impl Records {
    pub fn new(stream: &StreamHandle) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(ArcFile(stream.file()?)),
        })
    }
}

impl Iterator for Records {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => Some(Ok(String::from_utf8_lossy(&buf).into_owned())),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Strip one trailing newline.
pub fn trim_record(mut s: String) -> String {
    if s.ends_with('\n') {
        s.pop();
    }
    s
}

/// Read every record up to end of stream, without their newlines.
///
/// A read error ends the collection; the records read so far are returned
/// together with the error.
pub fn collect(stream: &StreamHandle) -> (Vec<String>, Option<io::Error>) {
    let records = match Records::new(stream) {
        Ok(r) => r,
        Err(e) => return (Vec::new(), Some(e)),
    };
    let mut names = Vec::new();
    for rec in records {
        match rec {
            Ok(s) => names.push(trim_record(s)),
            Err(e) => return (names, Some(e)),
        }
    }
    (names, None)
}

/// Write `s` as one record, adding the newline if it lacks one.
pub fn write_record(stream: &StreamHandle, s: &str) -> io::Result<()> {
    if s.ends_with('\n') {
        stream.write_all(s.as_bytes())
    } else {
        let mut rec = String::with_capacity(s.len() + 1);
        rec.push_str(s);
        rec.push('\n');
        stream.write_all(rec.as_bytes())
    }
}
