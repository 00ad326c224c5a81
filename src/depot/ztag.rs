//! Tagged output (`p4 -z tag`) parsing.
//!
//! Every informational line looks like `... key value`. A record is a run of
//! such pairs mapped onto a caller-supplied slot table; it ends when a key
//! already filled for the current record shows up again, or at end of stream.
//!
//! [`TaggedRecords`] is single-pass: reading the same output twice means
//! running the command twice.

use crate::error::{Result, SweepError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Prefix of a tagged line.
pub const ZTAG_PREFIX: &str = "... ";

/// Accumulates time spent blocked on depot output, shared by all readers.
#[derive(Debug, Default)]
pub struct WaitTimer {
    nanos: AtomicU64,
}

impl WaitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn time<F: Future>(&self, fut: F) -> F::Output {
        let start = Instant::now();
        let output = fut.await;
        self.add(start.elapsed());
        output
    }

    pub fn add(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

/// Splits a tagged line into `(key, value)`. Lines without the prefix yield `None`.
pub fn lex_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(ZTAG_PREFIX)?;
    match rest.split_once(' ') {
        Some((key, value)) => Some((key, value)),
        None => Some((rest, "")),
    }
}

/// One assembled record; slot `i` holds the value for `schema[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedRecord {
    values: Vec<Option<String>>,
}

impl TaggedRecord {
    pub fn get(&self, slot: usize) -> Option<&str> {
        self.values.get(slot).and_then(|v| v.as_deref())
    }

    pub fn take(&mut self, slot: usize) -> Option<String> {
        self.values.get_mut(slot).and_then(Option::take)
    }

    pub fn filled(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

pub struct TaggedRecords<R> {
    reader: R,
    schema: &'static [&'static str],
    all_required: bool,
    current: Vec<Option<String>>,
    line: Vec<u8>,
    timer: std::sync::Arc<WaitTimer>,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> TaggedRecords<R> {
    pub fn new(
        reader: R,
        schema: &'static [&'static str],
        all_required: bool,
        timer: std::sync::Arc<WaitTimer>,
    ) -> Self {
        Self {
            reader,
            schema,
            all_required,
            current: vec![None; schema.len()],
            line: Vec::new(),
            timer,
            finished: false,
        }
    }

    /// Next complete record, or `None` once the stream is exhausted.
    pub async fn next_record(&mut self) -> Result<Option<TaggedRecord>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            self.line.clear();
            let n = self
                .timer
                .time(self.reader.read_until(b'\n', &mut self.line))
                .await?;

            if n == 0 {
                self.finished = true;
                if self.current.iter().any(Option::is_some) {
                    return self.take_record().map(Some);
                }
                return Ok(None);
            }

            let Some((slot, value)) = self.match_line() else {
                continue;
            };

            if self.current[slot].is_some() {
                let record = self.take_record()?;
                self.current[slot] = Some(value);
                return Ok(Some(record));
            }
            self.current[slot] = Some(value);
        }
    }

    /// Slot and value of the buffered line, if it is a tag in the schema.
    fn match_line(&self) -> Option<(usize, String)> {
        let text = String::from_utf8_lossy(&self.line);
        let (key, value) = lex_line(text.trim_end_matches(['\r', '\n']))?;
        let slot = self.schema.iter().position(|k| *k == key)?;
        Some((slot, value.to_string()))
    }

    fn take_record(&mut self) -> Result<TaggedRecord> {
        let values = std::mem::replace(&mut self.current, vec![None; self.schema.len()]);
        let record = TaggedRecord { values };

        if self.all_required && record.filled() != self.schema.len() {
            self.finished = true;
            return Err(SweepError::Protocol {
                expected: self.schema.len(),
                received: record.filled(),
            });
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    const SCHEMA: &[&str] = &["clientFile", "haveRev", "digest"];

    async fn collect(input: &str, all_required: bool) -> Result<Vec<TaggedRecord>> {
        let timer = Arc::new(WaitTimer::new());
        let mut records = TaggedRecords::new(input.as_bytes(), SCHEMA, all_required, timer);
        let mut out = Vec::new();
        while let Some(record) = records.next_record().await? {
            out.push(record);
        }
        Ok(out)
    }

    #[test]
    fn test_lex_line() {
        assert_eq!(lex_line("... clientFile C:\\ws\\a b.txt"), Some(("clientFile", "C:\\ws\\a b.txt")));
        assert_eq!(lex_line("... isMapped"), Some(("isMapped", "")));
        assert_eq!(lex_line("clientFile foo"), None);
        assert_eq!(lex_line(""), None);
    }

    #[tokio::test]
    async fn test_records_split_on_repeated_key() {
        let input = "\
... clientFile /ws/a.txt
... haveRev 3
... digest AAAA

... clientFile /ws/b.txt
... haveRev 1
... digest BBBB
";
        let records = collect(input, true).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(0), Some("/ws/a.txt"));
        assert_eq!(records[0].get(1), Some("3"));
        assert_eq!(records[1].get(2), Some("BBBB"));
    }

    #[tokio::test]
    async fn test_unknown_keys_and_untagged_lines_ignored() {
        let input = "\
info: some banner
... depotFile //depot/a.txt
... clientFile /ws/a.txt\r
... haveRev 1\r
... digest CC\r
";
        let records = collect(input, true).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get(0), Some("/ws/a.txt"));
        assert_eq!(records[0].get(2), Some("CC"));
    }

    #[tokio::test]
    async fn test_partial_trailing_record_emitted_when_optional() {
        let input = "\
... clientFile /ws/a.txt
... haveRev 1
... digest AA
... clientFile /ws/b.txt
";
        let records = collect(input, false).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].filled(), 1);
        assert_eq!(records[1].get(1), None);
    }

    #[tokio::test]
    async fn test_empty_stream_yields_nothing() {
        assert!(collect("", true).await.unwrap().is_empty());
        assert!(collect("no tags here\n", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mandatory_schema_violation() {
        let input = "\
... clientFile /ws/a.txt
... clientFile /ws/b.txt
... haveRev 1
... digest AA
";
        let err = collect(input, true).await.unwrap_err();
        assert!(matches!(
            err,
            SweepError::Protocol {
                expected: 3,
                received: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_mandatory_schema_violation_on_trailing_record() {
        let input = "... clientFile /ws/a.txt\n... haveRev 1\n";
        let err = collect(input, true).await.unwrap_err();
        assert!(matches!(err, SweepError::Protocol { received: 2, .. }));
    }

    #[tokio::test]
    async fn test_take_moves_value_out() {
        let mut records = collect("... clientFile /ws/x\n... haveRev 2\n... digest D\n", true)
            .await
            .unwrap();
        let mut record = records.remove(0);
        assert_eq!(record.take(0).as_deref(), Some("/ws/x"));
        assert_eq!(record.get(0), None);
    }

    proptest! {
        #[test]
        fn record_count_follows_slot_count(n in 0usize..40, extra in 0usize..3) {
            let mut input = String::new();
            for i in 0..n {
                input.push_str(&format!("... clientFile /ws/f{i}\n... haveRev {i}\n... digest D{i}\n"));
            }
            for key in SCHEMA.iter().take(extra) {
                input.push_str(&format!("... {key} partial\n"));
            }
            let total_values = n * SCHEMA.len() + extra;

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let records = rt.block_on(collect(&input, false)).unwrap();
            prop_assert_eq!(records.len(), total_values / SCHEMA.len() + usize::from(extra > 0));
            for (i, record) in records.iter().take(n).enumerate() {
                let expected = format!("/ws/f{i}");
                prop_assert_eq!(record.get(0), Some(expected.as_str()));
            }

            let strict = rt.block_on(collect(&input, true));
            prop_assert_eq!(strict.is_ok(), extra == 0);
        }
    }
}
