use std::io::{self, Read};
use std::process::{Child, ChildStderr};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

/// How much of the player's stderr is retained for diagnostics.
const STDERR_TAIL_BYTES: usize = 4096;
const EXIT_GRACE: Duration = Duration::from_secs(1);

#[cfg(unix)]
struct ScopedSigaction {
    signum: libc::c_int,
    old_action: libc::sigaction,
}

#[cfg(unix)]
impl ScopedSigaction {
    fn ignore(signum: libc::c_int) -> Result<Self> {
        unsafe {
            let mut new_action: libc::sigaction = std::mem::zeroed();
            new_action.sa_sigaction = libc::SIG_IGN;
            libc::sigemptyset(&mut new_action.sa_mask);
            new_action.sa_flags = 0;

            let mut old_action: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &new_action, &mut old_action) != 0 {
                return Err(anyhow!("failed to update signal action for {signum}"));
            }

            Ok(Self { signum, old_action })
        }
    }
}

#[cfg(unix)]
impl Drop for ScopedSigaction {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::sigaction(self.signum, &self.old_action, std::ptr::null_mut());
        }
    }
}

/// Runs `f` while Ctrl-C is left to the player sharing our process group.
#[cfg(unix)]
pub(crate) fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let _sigint_guard = ScopedSigaction::ignore(libc::SIGINT)?;
    f()
}

#[cfg(not(unix))]
pub(crate) fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    f()
}

/// Asks the player to quit, then kills it if it lingers. Always reaps.
pub(crate) fn terminate(child: &mut Child) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    send_terminate(child);
    let deadline = Instant::now() + EXIT_GRACE;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = child.id(), %status, "player exited");
                return;
            }
            Ok(None) => thread::sleep(Duration::from_millis(20)),
            Err(err) => {
                warn!(pid = child.id(), error = %err, "failed to poll player process");
                break;
            }
        }
    }

    warn!(pid = child.id(), "player ignored terminate; killing");
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        debug!(pid, error = %io::Error::last_os_error(), "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.kill();
}

/// Bounded tail of a child's stderr, filled by a drain thread so the pipe never fills up.
#[derive(Debug, Clone, Default)]
pub(crate) struct StderrTail {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl StderrTail {
    pub(crate) fn capture(stderr: ChildStderr) -> Self {
        let tail = Self::default();
        let sink = tail.clone();
        if let Err(err) = thread::Builder::new()
            .name("player-stderr".to_string())
            .spawn(move || sink.drain(stderr))
        {
            warn!(error = %err, "failed to start stderr drain");
        }
        tail
    }

    fn drain(&self, mut stderr: impl Read) {
        let mut chunk = [0_u8; 1024];
        loop {
            match stderr.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(read) => self.push(&chunk[..read]),
            }
        }
    }

    fn push(&self, bytes: &[u8]) {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        buf.extend_from_slice(bytes);
        if buf.len() > STDERR_TAIL_BYTES {
            let excess = buf.len() - STDERR_TAIL_BYTES;
            buf.drain(..excess);
        }
    }

    pub(crate) fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_only_the_last_bytes() {
        let tail = StderrTail::default();
        tail.drain(io::Cursor::new(vec![b'a'; STDERR_TAIL_BYTES]));
        tail.push(b"the end");

        let contents = tail.contents();
        assert_eq!(contents.len(), STDERR_TAIL_BYTES);
        assert!(contents.ends_with("the end"));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_stops_and_reaps_a_running_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");

        terminate(&mut child);
        assert!(child.try_wait().expect("poll child").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn sigint_guard_runs_closure() {
        let value = with_sigint_ignored(|| Ok(42)).expect("guard should install");
        assert_eq!(value, 42);
    }
}
