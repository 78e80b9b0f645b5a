use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::error;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(windows)]
use std::sync::Arc;
#[cfg(windows)]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
#[cfg(windows)]
use std::time::Instant;

/// Timeout applied to writes; also bounds how long a connect handshake may stall a send.
#[cfg(unix)]
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// How often a pipe reader checks for pending bytes.
#[cfg(windows)]
const PIPE_POLL: Duration = Duration::from_millis(10);

/// Platform-local rendezvous the player listens on: a Unix socket path or a named pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes a stale socket left behind by a crashed player and makes sure the parent exists.
    pub fn prepare(&self) -> io::Result<()> {
        self.cleanup();
        #[cfg(unix)]
        {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    pub fn is_ready(&self) -> bool {
        self.path.exists()
    }

    // Probing a pipe would consume the player's only instance; the connect attempt is the probe.
    #[cfg(windows)]
    pub fn is_ready(&self) -> bool {
        true
    }

    #[cfg(unix)]
    pub fn connect(&self) -> io::Result<Channel> {
        let stream = UnixStream::connect(&self.path)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        Ok(Channel { inner: stream })
    }

    #[cfg(windows)]
    pub fn connect(&self) -> io::Result<Channel> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        Ok(Channel {
            inner: file,
            pipe: Arc::new(PipeState::default()),
        })
    }

    #[cfg(unix)]
    pub fn cleanup(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                error!(endpoint = %self.path.display(), error = %err, "failed to clean up socket");
            }
        }
    }

    #[cfg(windows)]
    pub fn cleanup(&self) {}
}

/// State shared by every clone of one pipe connection.
#[cfg(windows)]
#[derive(Debug, Default)]
struct PipeState {
    closed: AtomicBool,
    // Zero means reads wait until bytes arrive or the pipe closes.
    read_timeout_ms: AtomicU64,
}

/// Bidirectional byte stream to the player; clone it to get an independent reader.
#[derive(Debug)]
pub struct Channel {
    #[cfg(unix)]
    inner: UnixStream,
    #[cfg(windows)]
    inner: fs::File,
    #[cfg(windows)]
    pipe: Arc<PipeState>,
}

impl Channel {
    #[cfg(all(unix, test))]
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { inner: stream }
    }

    #[cfg(unix)]
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            inner: self.inner.try_clone()?,
        })
    }

    #[cfg(windows)]
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            inner: self.inner.try_clone()?,
            pipe: Arc::clone(&self.pipe),
        })
    }

    #[cfg(unix)]
    pub fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.inner.set_read_timeout(Some(timeout))
    }

    #[cfg(windows)]
    pub fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self.pipe.read_timeout_ms.store(millis, Ordering::SeqCst);
        Ok(())
    }

    #[cfg(unix)]
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown(std::net::Shutdown::Both);
    }

    /// Ends reads on every clone; the handle itself closes when the last clone drops.
    #[cfg(windows)]
    pub fn shutdown(&self) {
        self.pipe.closed.store(true, Ordering::SeqCst);
    }

    /// Bytes ready on the pipe, without consuming them.
    #[cfg(windows)]
    fn pending_bytes(&self) -> io::Result<usize> {
        use std::os::windows::io::AsRawHandle;
        use windows::Win32::Foundation::HANDLE;
        use windows::Win32::System::Pipes::PeekNamedPipe;

        let mut available: u32 = 0;
        // SAFETY: the handle is owned by `self.inner` and stays open for the call;
        // only the byte count is written back.
        unsafe {
            PeekNamedPipe(
                HANDLE(self.inner.as_raw_handle()),
                None,
                0,
                None,
                Some(&mut available as *mut u32),
                None,
            )
        }
        .map_err(io::Error::from)?;
        Ok(available as usize)
    }
}

#[cfg(unix)]
impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

// A synchronous pipe handle serialises reads and writes, so a read is only issued
// once bytes are pending; a blocked read would otherwise hold every write back.
#[cfg(windows)]
impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout_ms = self.pipe.read_timeout_ms.load(Ordering::SeqCst);
        let deadline = (timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(timeout_ms));
        loop {
            if self.pipe.closed.load(Ordering::SeqCst) {
                return Ok(0);
            }
            match self.pending_bytes() {
                Ok(0) => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                    std::thread::sleep(PIPE_POLL);
                }
                Ok(pending) => {
                    let len = buf.len().min(pending);
                    return self.inner.read(&mut buf[..len]);
                }
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => return Ok(0),
                Err(err) => return Err(err),
            }
        }
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn prepare_removes_stale_socket_and_creates_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let endpoint = Endpoint::new(dir.path().join("state").join("mpv.sock"));
        endpoint.prepare().expect("prepare");
        fs::write(endpoint.path(), b"stale").expect("write stale file");
        assert!(endpoint.is_ready());

        endpoint.prepare().expect("prepare again");
        assert!(!endpoint.is_ready());
        assert!(endpoint.path().parent().expect("parent").is_dir());
    }

    #[test]
    fn connect_reaches_a_listening_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let endpoint = Endpoint::new(dir.path().join("mpv.sock"));
        let listener = UnixListener::bind(endpoint.path()).expect("bind");

        let mut channel = endpoint.connect().expect("connect");
        let (mut server, _) = listener.accept().expect("accept");
        channel.write_all(b"ping\n").expect("write");

        let mut buf = [0_u8; 5];
        server.read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"ping\n");

        endpoint.cleanup();
        endpoint.cleanup();
        assert!(!endpoint.path().exists());
    }
}
