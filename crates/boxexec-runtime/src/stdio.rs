//! Standard streams wired to a containerized process.

use std::fmt;
use std::io::{Read, Write};

/// Standard streams for a process run inside a container.
pub struct TaskIo {
    /// Input fed to the process; `None` leaves stdin closed.
    pub stdin: Option<Box<dyn Read + Send>>,
    /// Destination of the process's standard output.
    pub stdout: Box<dyn Write + Send>,
    /// Destination of the process's standard error.
    pub stderr: Box<dyn Write + Send>,
}

impl TaskIo {
    /// Streams that discard all output and provide no input.
    #[must_use]
    pub fn null() -> Self {
        Self {
            stdin: None,
            stdout: Box::new(std::io::sink()),
            stderr: Box::new(std::io::sink()),
        }
    }

    /// Streams connected to the current process's stdio.
    #[must_use]
    pub fn inherit() -> Self {
        Self {
            stdin: Some(Box::new(std::io::stdin())),
            stdout: Box::new(std::io::stdout()),
            stderr: Box::new(std::io::stderr()),
        }
    }

    /// Sets the input stream.
    #[must_use]
    pub fn stdin(mut self, reader: impl Read + Send + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    /// Sets the output stream.
    #[must_use]
    pub fn stdout(mut self, writer: impl Write + Send + 'static) -> Self {
        self.stdout = Box::new(writer);
        self
    }

    /// Sets the error stream.
    #[must_use]
    pub fn stderr(mut self, writer: impl Write + Send + 'static) -> Self {
        self.stderr = Box::new(writer);
        self
    }
}

impl Default for TaskIo {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for TaskIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskIo")
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}
