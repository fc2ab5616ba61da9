use std::io::{Read, Write};
use std::time::Duration;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ShellydError;

const READ_CHUNK_SIZE: usize = 4096;
const OUTPUT_CHANNEL_CAPACITY: usize = 64;
const TERMINATE_GRACE: Duration = Duration::from_millis(200);

/// Tracks keystrokes written to the shell so committed lines can be handed
/// to the audit sink and to sudo-prompt inference (spec.md 4.4).
#[derive(Debug, Default)]
struct LineSniffer {
    buffer: String,
}

impl LineSniffer {
    /// Feeds raw input bytes, returning a committed command whenever the
    /// buffer sees an end-of-line byte.
    fn feed(&mut self, bytes: &[u8]) -> Option<String> {
        let mut committed = None;
        for &byte in bytes {
            match byte {
                b'\n' | b'\r' => {
                    if !self.buffer.is_empty() {
                        committed = Some(std::mem::take(&mut self.buffer));
                    }
                }
                0x03 => self.buffer.clear(),
                0x08 | 0x7f => {
                    self.buffer.pop();
                }
                _ => {
                    if let Ok(text) = std::str::from_utf8(&[byte]) {
                        self.buffer.push_str(text);
                    }
                }
            }
        }
        committed
    }
}

/// Case-insensitive scan for a privileged-command password prompt
/// (spec.md 4.4). Heuristic and idempotent under duplicate prompts.
pub fn detect_sudo_prompt(chunk: &[u8]) -> bool {
    let lower = String::from_utf8_lossy(chunk).to_lowercase();
    lower.contains("password:") || lower.contains("[sudo] password for") || lower.contains("password for")
}

/// A forked login shell under a PTY (spec.md 4.4). Owned exclusively by
/// the connection session that created it.
pub struct ShellSession {
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    sniffer: LineSniffer,
}

impl ShellSession {
    /// Allocates a PTY, forks the configured login shell, and starts a
    /// dedicated reader task that delivers output chunks over the returned
    /// channel (spec.md 5: PTY reads never block an event-loop thread).
    pub fn spawn(
        shell_path: &str,
        rows: u16,
        cols: u16,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), ShellydError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| ShellydError::PtyAllocation(err.to_string()))?;

        let mut command = CommandBuilder::new(shell_path);
        command.arg("-l");
        command.env("TERM", "xterm-256color");
        command.env("COLORTERM", "truecolor");
        command.env("LANG", "en_US.UTF-8");
        command.env("LC_ALL", "en_US.UTF-8");
        if let Some(home) = dirs::home_dir() {
            command.cwd(home);
        }

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|err| ShellydError::ShellSpawn(err.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| ShellydError::PtyAllocation(err.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| ShellydError::PtyAllocation(err.to_string()))?;

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || read_loop(reader, tx));

        Ok((
            Self {
                child,
                master: pair.master,
                writer,
                sniffer: LineSniffer::default(),
            },
            rx,
        ))
    }

    /// Writes bytes to the PTY master and feeds the line sniffer, returning
    /// a committed command if one was just completed.
    pub fn write_input(&mut self, bytes: &[u8]) -> Result<Option<String>, ShellydError> {
        self.writer
            .write_all(bytes)
            .map_err(ShellydError::ShellWrite)?;
        let _ = self.writer.flush();
        Ok(self.sniffer.feed(bytes))
    }

    /// Applies a resize; values <=0 are ignored (spec.md 4.4, 8).
    pub fn resize(&self, rows: i32, cols: i32) {
        if rows <= 0 || cols <= 0 {
            return;
        }
        if let Err(err) = self.master.resize(PtySize {
            rows: rows as u16,
            cols: cols as u16,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            warn!("failed to resize pty: {err}");
        }
    }

    /// Cancels the reader, closes the master, and terminates the child
    /// with SIGTERM then SIGKILL, reaping it (spec.md 4.4).
    pub async fn shutdown(mut self) {
        if let Some(pid) = self.child.process_id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
            tokio::time::sleep(TERMINATE_GRACE).await;
            if matches!(self.child.try_wait(), Ok(None)) {
                let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
            }
        }
        let _ = self.child.wait();
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(err) => {
                if err.kind() != std::io::ErrorKind::Interrupted {
                    break;
                }
            }
        }
    }
}
