//! Line-ending normalization for depot text files.
//!
//! The depot stores text with bare LF line endings. A CR that is immediately
//! followed by LF is dropped; every other byte, including a lone CR, passes
//! through unchanged.

use std::io::{self, BufRead, Read};

/// Length of the UTF-8 byte order mark skipped for `utf8` files.
const BYTE_ORDER_MARK_LEN: usize = 3;

pub struct P4TextReader<R> {
    inner: R,
    bom_pending: bool,
}

impl<R: BufRead> P4TextReader<R> {
    /// Wraps `inner`. With `skip_byte_order_mark` the first three bytes of the
    /// stream are discarded unread.
    pub fn new(inner: R, skip_byte_order_mark: bool) -> Self {
        Self {
            inner,
            bom_pending: skip_byte_order_mark,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn skip_byte_order_mark(&mut self) -> io::Result<()> {
        let mut remaining = BYTE_ORDER_MARK_LEN;
        while remaining > 0 {
            let available = self.inner.fill_buf()?.len();
            if available == 0 {
                break;
            }
            let n = available.min(remaining);
            self.inner.consume(n);
            remaining -= n;
        }
        self.bom_pending = false;
        Ok(())
    }

    /// One byte of lookahead, refilling the inner buffer if needed.
    fn peek(&mut self) -> io::Result<Option<u8>> {
        Ok(self.inner.fill_buf()?.first().copied())
    }
}

impl<R: BufRead> Read for P4TextReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.bom_pending {
            self.skip_byte_order_mark()?;
        }

        let mut filled = 0;
        while filled < buf.len() {
            let chunk = self.inner.fill_buf()?;
            if chunk.is_empty() {
                break;
            }

            if chunk[0] == b'\r' {
                self.inner.consume(1);
                if self.peek()? != Some(b'\n') {
                    buf[filled] = b'\r';
                    filled += 1;
                }
                continue;
            }

            let run = chunk
                .iter()
                .position(|&b| b == b'\r')
                .unwrap_or(chunk.len())
                .min(buf.len() - filled);
            buf[filled..filled + run].copy_from_slice(&chunk[..run]);
            self.inner.consume(run);
            filled += run;
        }

        Ok(filled)
    }
}
