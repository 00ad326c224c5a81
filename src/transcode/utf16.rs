//! UTF-16 -> UTF-8 transcoding.
//!
//! `utf16` files are stored in the depot as UTF-8 without a byte order mark.
//! The decoder sniffs (and drops) a leading BOM and defaults to little-endian.

use encoding_rs::{CoderResult, Decoder, UTF_16LE};
use std::io::{self, Read};

use super::IO_BUFFER_SIZE;

pub struct Utf16ToUtf8Reader<R> {
    inner: R,
    decoder: Decoder,
    input: Vec<u8>,
    input_start: usize,
    input_end: usize,
    output: Vec<u8>,
    output_start: usize,
    output_end: usize,
    eof: bool,
    finished: bool,
}

impl<R: Read> Utf16ToUtf8Reader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(IO_BUFFER_SIZE, inner)
    }

    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        // Two UTF-16 bytes never expand to more than three UTF-8 bytes.
        let capacity = capacity.max(16);
        Self {
            inner,
            decoder: UTF_16LE.new_decoder(),
            input: vec![0; capacity],
            input_start: 0,
            input_end: 0,
            output: vec![0; capacity * 2],
            output_start: 0,
            output_end: 0,
            eof: false,
            finished: false,
        }
    }

    fn refill_input(&mut self) -> io::Result<()> {
        loop {
            match self.inner.read(&mut self.input) {
                Ok(n) => {
                    self.input_start = 0;
                    self.input_end = n;
                    self.eof = n == 0;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn decode_more(&mut self) -> io::Result<()> {
        if self.input_start == self.input_end && !self.eof {
            self.refill_input()?;
        }

        let (result, read, written, _) = self.decoder.decode_to_utf8(
            &self.input[self.input_start..self.input_end],
            &mut self.output,
            self.eof,
        );
        self.input_start += read;
        self.output_start = 0;
        self.output_end = written;

        if self.eof && result == CoderResult::InputEmpty {
            self.finished = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for Utf16ToUtf8Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.output_start < self.output_end {
                let n = buf.len().min(self.output_end - self.output_start);
                buf[..n].copy_from_slice(&self.output[self.output_start..self.output_start + n]);
                self.output_start += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            self.decode_more()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::P4TextReader;
    use std::io::BufReader;

    fn utf16le(text: &str, bom: bool) -> Vec<u8> {
        let mut out = Vec::new();
        if bom {
            out.extend_from_slice(&[0xFF, 0xFE]);
        }
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    fn transcode(bytes: &[u8], capacity: usize) -> Vec<u8> {
        let mut out = Vec::new();
        Utf16ToUtf8Reader::with_capacity(capacity, bytes)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_bom_is_not_emitted() {
        let out = transcode(&utf16le("héllo", true), 64);
        assert_eq!(out, "héllo".as_bytes());
    }

    #[test]
    fn test_without_bom_defaults_to_little_endian() {
        let out = transcode(&utf16le("plain", false), 64);
        assert_eq!(out, b"plain");
    }

    #[test]
    fn test_big_endian_bom_detected() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "über".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(transcode(&bytes, 64), "über".as_bytes());
    }

    #[test]
    fn test_surrogate_pair_split_across_reads() {
        // BOM + six units puts the pair across the 16-byte input boundary.
        let text = "aaaaaa\u{1F600}b";
        assert_eq!(transcode(&utf16le(text, true), 16), text.as_bytes());
    }

    #[test]
    fn test_composes_with_text_normalization() {
        let source = utf16le("line one\r\nline two\r\n", true);
        let utf8 = Utf16ToUtf8Reader::new(&source[..]);
        let mut out = Vec::new();
        P4TextReader::new(BufReader::new(utf8), false)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"line one\nline two\n");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(transcode(&[], 64), b"");
    }
}
