//! Container log management.
//!
//! The first command of a container has its stdout and stderr copied both to
//! the caller's streams and to `<id>.log` inside the container snapshot.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread::JoinHandle;

use bunker_common::error::{BunkerError, Result};

/// Opens a log file for appending, creating it if needed.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub fn open_log(path: &Path) -> Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BunkerError::io(path, e))
}

/// A writer duplicating everything into two sinks.
#[derive(Debug)]
pub struct TeeWriter<A, B> {
    primary: A,
    copy: B,
}

impl<A: Write, B: Write> TeeWriter<A, B> {
    /// Writes go to `primary` first, then `copy`.
    pub const fn new(primary: A, copy: B) -> Self {
        Self { primary, copy }
    }
}

impl<A: Write, B: Write> Write for TeeWriter<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.primary.write_all(buf)?;
        self.copy.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.primary.flush()?;
        self.copy.flush()
    }
}

/// Copies `source` into both `console` and `log` on a background thread.
///
/// The thread ends when `source` reaches end of file and yields the number
/// of bytes copied.
pub fn spawn_pump<R, C, L>(source: R, console: C, log: L) -> JoinHandle<io::Result<u64>>
where
    R: Read + Send + 'static,
    C: Write + Send + 'static,
    L: Write + Send + 'static,
{
    std::thread::spawn(move || {
        let mut source = source;
        let mut tee = TeeWriter::new(console, log);
        let copied = io::copy(&mut source, &mut tee)?;
        tee.flush()?;
        Ok(copied)
    })
}

/// Waits for a pump and logs, rather than propagates, its failure.
pub fn join_pump(name: &str, pump: JoinHandle<io::Result<u64>>) {
    match pump.join() {
        Ok(Ok(bytes)) => tracing::debug!(stream = name, bytes, "output stream drained"),
        Ok(Err(e)) => tracing::warn!(stream = name, error = %e, "output stream copy failed"),
        Err(_) => tracing::warn!(stream = name, "output stream thread panicked"),
    }
}

/// Writes the log at `path` to `out`.
///
/// A container that never ran has no log yet; that streams nothing.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, or `out` fails.
pub fn stream(path: &Path, out: &mut impl Write) -> Result<u64> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(BunkerError::io(path, e)),
    };
    let copied = io::copy(&mut file, out).map_err(|e| BunkerError::io(path, e))?;
    out.flush().map_err(|e| BunkerError::io(path, e))?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Shared {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tee_duplicates_writes() {
        let mut tee = TeeWriter::new(Vec::new(), Vec::new());
        tee.write_all(b"hi\n").unwrap();
        assert_eq!(tee.primary, b"hi\n");
        assert_eq!(tee.copy, b"hi\n");
    }

    #[test]
    fn pump_copies_to_console_and_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("process_a.log");
        let console = Shared::default();

        let pump = spawn_pump(&b"hi\n"[..], console.clone(), open_log(&path).expect("open"));
        assert_eq!(pump.join().expect("join").expect("copy"), 3);

        assert_eq!(console.contents(), b"hi\n");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "hi\n");
    }

    #[test]
    fn two_pumps_share_one_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("process_b.log");
        let log = open_log(&path).expect("open");

        let out = spawn_pump(&b"out\n"[..], io::sink(), log.try_clone().expect("clone"));
        join_pump("stdout", out);
        let err = spawn_pump(&b"err\n"[..], io::sink(), log);
        join_pump("stderr", err);

        assert_eq!(std::fs::read_to_string(&path).expect("read"), "out\nerr\n");
    }

    #[test]
    fn stream_writes_existing_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("process_c.log");
        std::fs::write(&path, "line 1\nline 2\n").expect("write");

        let mut out = Vec::new();
        assert_eq!(stream(&path, &mut out).expect("stream"), 14);
        assert_eq!(out, b"line 1\nline 2\n");
    }

    #[test]
    fn stream_of_missing_log_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut out = Vec::new();
        assert_eq!(stream(&dir.path().join("nope.log"), &mut out).expect("stream"), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn open_log_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("process_d.log");
        open_log(&path).expect("open").write_all(b"a").expect("write");
        open_log(&path).expect("open").write_all(b"b").expect("write");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "ab");
    }
}
