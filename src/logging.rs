//! File sink for the tracing subscriber.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt::MakeWriter;

/// Destination of the `vmclone.log` tracing layer.
///
/// The subscriber is installed before the command is known; events are
/// dropped until [`RunLog::open`] is called, which only `clone` does.
#[derive(Clone, Default)]
pub struct RunLog {
    file: Arc<Mutex<Option<File>>>,
}

impl RunLog {
    /// Start appending to `path`, creating its directory if needed.
    pub fn open(&self, path: &Path) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.lock() = Some(file);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    // A panic while formatting an event must not silence the rest of the run.
    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One event's writer; holds the lock so concurrent events don't interleave.
pub struct RunLogWriter<'a>(MutexGuard<'a, Option<File>>);

impl io::Write for RunLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RunLog {
    type Writer = RunLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter(self.lock())
    }
}
