//! Depot client subprocess.
//!
//! Runs the command-line client with tagged output and exposes its stdout as
//! a stream of [`TaggedRecord`]s. Long argument lists go through a temporary
//! args file (`-x <file>`) so command-line length limits never apply.

use crate::depot::ztag::{TaggedRecord, TaggedRecords, WaitTimer};
use crate::error::{Result, SweepError};
use std::io::{BufWriter, Write};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Handle for invoking the depot client. Cheap to clone; clones share the wait timer.
#[derive(Debug, Clone)]
pub struct DepotClient {
    program: String,
    timer: Arc<WaitTimer>,
}

impl DepotClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timer: Arc::new(WaitTimer::new()),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Total time spent blocked on depot output across every command so far.
    pub fn wait_timer(&self) -> &Arc<WaitTimer> {
        &self.timer
    }

    /// Runs `<program> -z tag <args...>`.
    pub async fn tagged(
        &self,
        args: &[&str],
        schema: &'static [&'static str],
        all_required: bool,
    ) -> Result<TaggedOutput> {
        self.spawn(args, None, schema, all_required)
    }

    /// Runs `<program> -z tag -x <file> <args...>` with one argument per line in `<file>`.
    pub async fn tagged_with_arg_file<I>(
        &self,
        args: &[&str],
        arg_lines: I,
        schema: &'static [&'static str],
        all_required: bool,
    ) -> Result<TaggedOutput>
    where
        I: IntoIterator<Item = String>,
    {
        let mut arg_file = NamedTempFile::new()?;
        {
            let mut writer = BufWriter::new(arg_file.as_file_mut());
            for line in arg_lines {
                writeln!(writer, "{}", line)?;
            }
            writer.flush()?;
        }
        self.spawn(args, Some(arg_file), schema, all_required)
    }

    fn spawn(
        &self,
        args: &[&str],
        arg_file: Option<NamedTempFile>,
        schema: &'static [&'static str],
        all_required: bool,
    ) -> Result<TaggedOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-z").arg("tag");
        if let Some(file) = &arg_file {
            cmd.arg("-x").arg(file.path());
        }
        cmd.args(args);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        info!(
            "Command: {} -z tag {}{}",
            self.program,
            arg_file
                .as_ref()
                .map(|f| format!("-x {} ", f.path().display()))
                .unwrap_or_default(),
            args.join(" ")
        );

        let mut child = cmd.spawn().map_err(|source| SweepError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SweepError::Task("depot client stdout was not captured".to_string()))?;

        Ok(TaggedOutput {
            records: TaggedRecords::new(
                BufReader::new(stdout),
                schema,
                all_required,
                self.timer.clone(),
            ),
            child,
            _arg_file: arg_file,
        })
    }
}

/// Output of one depot command. Dropping it abandons the subprocess.
pub struct TaggedOutput {
    records: TaggedRecords<BufReader<ChildStdout>>,
    child: Child,
    // Held so the args file outlives the subprocess reading it.
    _arg_file: Option<NamedTempFile>,
}

impl TaggedOutput {
    pub async fn next_record(&mut self) -> Result<Option<TaggedRecord>> {
        match self.records.next_record().await? {
            Some(record) => Ok(Some(record)),
            None => {
                self.reap().await;
                Ok(None)
            }
        }
    }

    /// Exit status is informational only; schema violations are caught from the output.
    async fn reap(&mut self) {
        match self.child.wait().await {
            Ok(status) => debug!("depot command exited with {}", status),
            Err(e) => warn!("failed to wait for depot command: {}", e),
        }
    }
}
