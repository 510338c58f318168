//! External command execution utilities.
//!
//! Provides a Builder-based API for running a program with a fully
//! controlled environment and a bounded runtime.
//!
//! # Examples
//!
//! ```ignore
//! use crate::utils::exec::Cmd;
//!
//! let output = Cmd::new("/srv/pages/status.mu")
//!     .env_clear()
//!     .envs([("PATH", "/usr/bin:/bin")])
//!     .timeout(Some(Duration::from_secs(30)))
//!     .run()?;
//! ```

use std::{
    ffi::{OsStr, OsString},
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{self, RecvTimeoutError};
use thiserror::Error;

/// Errno for "text file busy" on Linux and the BSDs.
const ETXTBSY: i32 = 26;

/// Launch attempts when the executable is still open for writing.
const BUSY_RETRIES: u32 = 3;

/// Poll interval while waiting for the child to exit.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Subprocess failure.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch `{program}`")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` exited with {status}")]
    ExitStatus { program: String, status: ExitStatus },

    #[error("`{program}` did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("I/O error while running `{program}`")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Builder API
// ============================================================================

/// Command builder for external process execution.
#[derive(Default)]
pub struct Cmd {
    program: OsString,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    clear_env: bool,
    timeout: Option<Duration>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            ..Default::default()
        }
    }

    /// Set working directory.
    pub fn cwd<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }

    /// Start from an empty environment instead of inheriting ours.
    pub fn env_clear(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// Set environment variables for the subprocess.
    pub fn envs<K, V, I>(mut self, vars: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in vars {
            self.envs.push((k.as_ref().to_owned(), v.as_ref().to_owned()));
        }
        self
    }

    /// Kill the process (and anything it started) if the run, including
    /// draining its output, takes longer than `timeout`.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute the command and return its complete standard output.
    ///
    /// stdin is closed, stderr is inherited, a non-zero exit is an error.
    /// Output is read until every holder of the pipe has closed it, so a
    /// background process that keeps stdout open delays the result up to
    /// the deadline, after which the whole process group is killed.
    pub fn run(self) -> Result<Vec<u8>, ExecError> {
        let name = self.program_name();
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut child = self.spawn()?;

        let Some(mut stdout) = child.stdout.take() else {
            kill_tree(&mut child);
            return Err(ExecError::Io {
                program: name,
                source: io::Error::other("stdout was not captured"),
            });
        };

        // Drain stdout on its own thread so a chatty child never blocks on a full pipe
        let (tx, rx) = channel::bounded(1);
        thread::spawn(move || {
            let mut buf = Vec::new();
            let result = stdout.read_to_end(&mut buf).map(|_| buf);
            let _ = tx.send(result);
        });

        let status = self.wait(&mut child, &name, deadline)?;
        let read = match deadline {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let output = match read {
            Ok(result) => result.map_err(|source| ExecError::Io {
                program: name.clone(),
                source,
            })?,
            Err(RecvTimeoutError::Timeout) => {
                // A descendant still holds the pipe; killing the group releases the reader
                kill_tree(&mut child);
                return Err(self.timed_out(name));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ExecError::Io {
                    program: name,
                    source: io::Error::other("stdout reader stopped"),
                });
            }
        };

        if !status.success() {
            return Err(ExecError::ExitStatus {
                program: name,
                status,
            });
        }
        Ok(output)
    }
}

impl Cmd {
    /// Get the program name for error messages.
    fn program_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }

    fn timed_out(&self, program: String) -> ExecError {
        ExecError::Timeout {
            program,
            timeout: self.timeout.unwrap_or_default(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if self.clear_env {
            cmd.env_clear();
        }
        cmd.envs(self.envs.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        // Own process group, so a timeout reaches background children too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }

    /// Spawn, retrying briefly while the executable is busy being written.
    fn spawn(&self) -> Result<Child, ExecError> {
        let mut attempt = 0;
        loop {
            match self.command().spawn() {
                Ok(child) => return Ok(child),
                Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempt < BUSY_RETRIES => {
                    attempt += 1;
                    thread::sleep(WAIT_POLL * attempt);
                }
                Err(source) => {
                    return Err(ExecError::Launch {
                        program: self.program_name(),
                        source,
                    });
                }
            }
        }
    }

    /// Wait for exit, killing the process group once the deadline passes.
    fn wait(
        &self,
        child: &mut Child,
        name: &str,
        deadline: Option<Instant>,
    ) -> Result<ExitStatus, ExecError> {
        let io_err = |source| ExecError::Io {
            program: name.to_owned(),
            source,
        };

        let Some(deadline) = deadline else {
            return child.wait().map_err(io_err);
        };

        loop {
            if let Some(status) = child.try_wait().map_err(io_err)? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                kill_tree(child);
                let _ = child.wait();
                return Err(self.timed_out(name.to_owned()));
            }
            thread::sleep(WAIT_POLL);
        }
    }
}

/// Kill the child and every process in its group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    // The child leads its group, so the group id is its pid
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

// ============================================================================
// Tests
// ============================================================================
