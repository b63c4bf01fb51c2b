use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use anyhow::Error as AnyhowError;
use portable_pty::Child;
use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::context::AssistantContext;
use crate::events::SessionEvent;

const DEFAULT_ROWS: u16 = 40;
const DEFAULT_COLS: u16 = 120;
const READ_BUFFER_SIZE: usize = 8192;

/// Shell program plus the flags that make it run a single command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellSpec {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            let comspec = std::env::var("COMSPEC")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "cmd.exe".to_string());
            Self::from_program(comspec)
        } else {
            Self::from_program("/bin/sh")
        }
    }

    pub fn from_program(program: impl Into<String>) -> Self {
        let program = program.into();
        let shell_name = Path::new(&program)
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or(&program)
            .to_ascii_lowercase();
        let args = if shell_name == "cmd" || shell_name == "cmd.exe" {
            vec!["/C".to_string()]
        } else if shell_name.starts_with("pwsh") || shell_name.starts_with("powershell") {
            vec!["-NoLogo".to_string(), "-Command".to_string()]
        } else {
            vec!["-c".to_string()]
        };
        Self { program, args }
    }

    fn command_builder(&self, command: &str, cwd: &Path) -> CommandBuilder {
        let mut builder = CommandBuilder::new(&self.program);
        builder.args(&self.args);
        builder.arg(command);
        builder.cwd(cwd);
        // The output pane does not interpret escape sequences.
        builder.env("TERM", "dumb");
        builder
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to allocate a pseudo-terminal: {source}")]
    PtyUnavailable {
        #[source]
        source: AnyhowError,
    },
    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: AnyhowError,
    },
    #[error("failed to attach to pseudo-terminal output: {source}")]
    ReaderUnavailable {
        #[source]
        source: AnyhowError,
    },
    #[error("failed to start session worker thread: {source}")]
    WorkerThread {
        #[source]
        source: std::io::Error,
    },
}

type RunningChildren = Arc<Mutex<HashMap<u64, Box<dyn ChildKiller + Send + Sync>>>>;

/// Runs shell commands inside fresh pseudo-terminals and streams their
/// output to a sink.
pub struct SessionLauncher {
    shell: ShellSpec,
    cwd: PathBuf,
    size: PtySize,
    next_session_id: AtomicU64,
    running: RunningChildren,
}

impl fmt::Debug for SessionLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLauncher")
            .field("shell", &self.shell)
            .field("cwd", &self.cwd)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl SessionLauncher {
    pub fn new(shell: ShellSpec, cwd: PathBuf) -> Self {
        Self {
            shell,
            cwd,
            size: PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            },
            next_session_id: AtomicU64::new(1),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_context(context: &AssistantContext) -> Self {
        let shell = context
            .config
            .terminal
            .shell
            .clone()
            .map_or_else(ShellSpec::platform_default, ShellSpec::from_program);
        Self::new(shell, context.cwd.clone())
    }

    /// Starts `command` through the shell and returns the new session id.
    ///
    /// Output is delivered as [`SessionEvent::Output`] chunks from a
    /// background thread; a single [`SessionEvent::Finished`] follows once
    /// the stream has closed and the child has been reaped.
    pub fn launch<F>(&self, command: &str, sink: F) -> Result<u64, SessionError>
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let pair = native_pty_system()
            .openpty(self.size)
            .map_err(|source| SessionError::PtyUnavailable { source })?;

        let builder = self.shell.command_builder(command, &self.cwd);
        let started_at = Instant::now();
        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|source| SessionError::SpawnFailed {
                command: command.to_string(),
                source,
            })?;
        // The reader only sees end-of-stream once every slave handle is gone.
        drop(pair.slave);

        let reader = match pair.master.try_clone_reader() {
            Ok(reader) => reader,
            Err(source) => {
                abort_child(child.as_mut());
                return Err(SessionError::ReaderUnavailable { source });
            }
        };

        lock_running(&self.running).insert(session_id, child.clone_killer());
        debug!(session_id, command, "session started");

        let sink = Arc::new(sink);
        let reader_sink = Arc::clone(&sink);
        let reader_thread = thread::Builder::new()
            .name(format!("autoterm-session-{session_id}-reader"))
            .spawn(move || pump_output(session_id, reader, reader_sink.as_ref()));
        let reader_thread = match reader_thread {
            Ok(handle) => handle,
            Err(source) => {
                abort_child(child.as_mut());
                lock_running(&self.running).remove(&session_id);
                return Err(SessionError::WorkerThread { source });
            }
        };

        let running = Arc::clone(&self.running);
        let master = pair.master;
        let waiter_thread = thread::Builder::new()
            .name(format!("autoterm-session-{session_id}-waiter"))
            .spawn(move || {
                let exit_code = match child.wait() {
                    Ok(status) => Some(status.exit_code()),
                    Err(error) => {
                        warn!(session_id, %error, "failed to wait for session child");
                        None
                    }
                };
                // On Windows the reader only sees end-of-stream once the master
                // is closed. On Unix the reader holds its own dup of the master
                // fd, so it ends only when every slave handle is closed; a
                // backgrounded grandchild that keeps the terminal holds back
                // `Finished` until it exits.
                drop(master);
                if reader_thread.join().is_err() {
                    warn!(session_id, "session reader thread panicked");
                }
                lock_running(&running).remove(&session_id);

                let duration_ms = started_at
                    .elapsed()
                    .as_millis()
                    .try_into()
                    .unwrap_or(u64::MAX);
                debug!(session_id, ?exit_code, duration_ms, "session finished");
                (*sink)(SessionEvent::Finished {
                    session_id,
                    exit_code,
                    duration_ms,
                });
            });

        if let Err(source) = waiter_thread {
            if let Some(mut killer) = lock_running(&self.running).remove(&session_id) {
                let _ = killer.kill();
            }
            return Err(SessionError::WorkerThread { source });
        }

        Ok(session_id)
    }

    pub fn is_running(&self, session_id: u64) -> bool {
        lock_running(&self.running).contains_key(&session_id)
    }

    pub fn running_count(&self) -> usize {
        lock_running(&self.running).len()
    }

    /// Kills every child that has not exited yet and returns how many were
    /// signalled.
    pub fn terminate_all(&self) -> usize {
        let killers: Vec<(u64, Box<dyn ChildKiller + Send + Sync>)> =
            lock_running(&self.running).drain().collect();
        let count = killers.len();
        for (session_id, mut killer) in killers {
            if let Err(error) = killer.kill() {
                warn!(session_id, %error, "failed to terminate session");
            }
        }
        count
    }
}

/// Kills a child that will not be handed to a waiter thread and reaps it so
/// it does not linger as a zombie.
fn abort_child(child: &mut (dyn Child + Send + Sync)) {
    if let Err(error) = child.kill() {
        debug!(%error, "failed to kill aborted session child");
    }
    if let Err(error) = child.wait() {
        debug!(%error, "failed to reap aborted session child");
    }
}

fn lock_running(
    running: &RunningChildren,
) -> MutexGuard<'_, HashMap<u64, Box<dyn ChildKiller + Send + Sync>>> {
    running
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn pump_output(session_id: u64, mut reader: Box<dyn Read + Send>, sink: &dyn Fn(SessionEvent)) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut decoder = Utf8ChunkDecoder::default();
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => {
                let chunk = decoder.decode(&buf[..read]);
                if !chunk.is_empty() {
                    sink(SessionEvent::Output { session_id, chunk });
                }
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => {
                // Linux reports EIO on the master once the slave side is gone.
                debug!(session_id, %error, "session stream closed");
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        sink(SessionEvent::Output {
            session_id,
            chunk: rest,
        });
    }
}

/// Incremental UTF-8 decoder that carries split multi-byte sequences over
/// to the next read.
#[derive(Debug, Default)]
struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut output = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    output.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(error) => {
                    let (valid, after) = rest.split_at(error.valid_up_to());
                    output.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match error.error_len() {
                        Some(invalid_len) => {
                            output.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid_len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        output
    }

    fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::path::PathBuf;
    use std::time::Duration;

    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use portable_pty::PtySize;
    use portable_pty::native_pty_system;

    use super::SessionError;
    use super::SessionLauncher;
    use super::abort_child;
    use super::ShellSpec;
    use super::Utf8ChunkDecoder;
    use crate::events::SessionEvent;

    fn launcher() -> SessionLauncher {
        SessionLauncher::new(ShellSpec::platform_default(), PathBuf::from("."))
    }

    fn channel_sink() -> (
        impl Fn(SessionEvent) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = move |event: SessionEvent| {
            let _ = tx.send(event);
        };
        (sink, rx)
    }

    fn long_running_script() -> &'static str {
        if cfg!(windows) {
            "ping -n 20 127.0.0.1 > NUL"
        } else {
            "sleep 20"
        }
    }

    /// Collects events for `session_id` until `Finished` or the deadline.
    async fn recv_until_finished(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
        session_id: u64,
        timeout_ms: u64,
    ) -> (String, Option<SessionEvent>) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        let mut output = String::new();
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return (output, None);
            }
            let remaining = deadline.saturating_duration_since(now);
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) if event.session_id() != session_id => continue,
                Ok(Some(SessionEvent::Output { chunk, .. })) => output.push_str(&chunk),
                Ok(Some(finished @ SessionEvent::Finished { .. })) => {
                    return (output, Some(finished));
                }
                Ok(None) | Err(_) => return (output, None),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn echo_output_reaches_the_sink_before_finished() -> Result<()> {
        let launcher = launcher();
        let (sink, mut rx) = channel_sink();

        let session_id = launcher.launch("echo hi", sink)?;
        let (output, finished) = recv_until_finished(&mut rx, session_id, 10_000).await;

        assert!(output.contains("hi"), "missing echo output: {output:?}");
        assert!(matches!(
            finished,
            Some(SessionEvent::Finished {
                exit_code: Some(0),
                ..
            })
        ));
        assert!(!launcher.is_running(session_id));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_zero_exit_code_is_reported() -> Result<()> {
        let launcher = launcher();
        let (sink, mut rx) = channel_sink();

        let session_id = launcher.launch("echo failing; exit 3", sink)?;
        let (output, finished) = recv_until_finished(&mut rx, session_id, 10_000).await;

        assert!(output.contains("failing"));
        assert!(matches!(
            finished,
            Some(SessionEvent::Finished {
                exit_code: Some(3),
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sessions_get_distinct_ids_and_can_overlap() -> Result<()> {
        let launcher = launcher();
        let (sink_a, mut rx_a) = channel_sink();
        let (sink_b, mut rx_b) = channel_sink();

        let first = launcher.launch("echo first_session", sink_a)?;
        let second = launcher.launch("echo second_session", sink_b)?;
        assert!(first != second);

        let (output_a, finished_a) = recv_until_finished(&mut rx_a, first, 10_000).await;
        let (output_b, finished_b) = recv_until_finished(&mut rx_b, second, 10_000).await;
        assert!(output_a.contains("first_session"));
        assert!(output_b.contains("second_session"));
        assert!(finished_a.is_some() && finished_b.is_some());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn terminate_all_stops_running_children() -> Result<()> {
        let launcher = launcher();
        let (sink, mut rx) = channel_sink();

        let session_id = launcher.launch(long_running_script(), sink)?;
        assert!(launcher.is_running(session_id));
        assert_eq!(launcher.running_count(), 1);

        assert_eq!(launcher.terminate_all(), 1);
        assert_eq!(launcher.running_count(), 0);

        let (_, finished) = recv_until_finished(&mut rx, session_id, 10_000).await;
        assert!(finished.is_some(), "terminated session never reported finished");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn background_grandchild_holding_the_terminal_delays_finished() -> Result<()> {
        let launcher = launcher();
        let (sink, mut rx) = channel_sink();

        // The subshell ignores SIGHUP so it outlives the shell and keeps the
        // slave end open for about two seconds.
        let session_id = launcher.launch("echo started; (trap '' HUP; sleep 2) &", sink)?;
        let (output, finished) = recv_until_finished(&mut rx, session_id, 15_000).await;

        assert!(output.contains("started"));
        let Some(SessionEvent::Finished {
            exit_code,
            duration_ms,
            ..
        }) = finished
        else {
            panic!("session never reported finished");
        };
        assert_eq!(exit_code, Some(0));
        assert!(
            duration_ms >= 1_500,
            "finished after {duration_ms}ms, before the grandchild released the terminal"
        );
        Ok(())
    }

    #[test]
    fn aborted_child_is_killed_and_reaped() -> Result<()> {
        let pair = native_pty_system().openpty(PtySize::default())?;
        let builder =
            ShellSpec::platform_default().command_builder(long_running_script(), Path::new("."));
        let mut child = pair.slave.spawn_command(builder)?;
        drop(pair.slave);

        abort_child(child.as_mut());

        assert!(child.try_wait()?.is_some(), "aborted child was not reaped");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn missing_shell_fails_to_spawn() {
        let launcher = SessionLauncher::new(
            ShellSpec::from_program("/definitely/not/a/shell"),
            PathBuf::from("."),
        );

        let result = launcher.launch("echo hi", |_event| {});
        assert!(matches!(
            result,
            Err(SessionError::SpawnFailed { ref command, .. }) if command == "echo hi"
        ));
        assert_eq!(launcher.running_count(), 0);
    }

    #[test]
    fn shell_flags_follow_the_program_name() {
        assert_eq!(ShellSpec::from_program("/bin/bash").args, vec!["-c"]);
        assert_eq!(
            ShellSpec::from_program(r"C:\Windows\System32\cmd.exe").args,
            vec!["/C"]
        );
        assert_eq!(
            ShellSpec::from_program("pwsh.exe").args,
            vec!["-NoLogo", "-Command"]
        );
    }

    #[test]
    fn decoder_carries_split_multibyte_sequences() {
        let mut decoder = Utf8ChunkDecoder::default();
        let bytes = "olá".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 1);

        assert_eq!(decoder.decode(head), "ol");
        assert_eq!(decoder.decode(tail), "á");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn decoder_replaces_invalid_bytes_and_keeps_going() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert_eq!(decoder.decode(b"ok\xffdone"), "ok\u{FFFD}done");
    }

    #[test]
    fn decoder_flushes_truncated_tail_lossily() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert_eq!(decoder.decode(b"end\xe2\x82"), "end");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
