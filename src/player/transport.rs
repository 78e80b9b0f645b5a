use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::endpoint::{Channel, Endpoint};
use super::protocol::{LineFramer, Message, RequestId, encode_command, parse_message};
use super::{ExitHook, PlaybackSnapshot};
use crate::error::{Error, Result};

pub(crate) const CONNECT_ATTEMPTS: usize = 30;
pub(crate) const CONNECT_DELAY: Duration = Duration::from_millis(200);
const RECV_TIMEOUT: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 4096;

/// Polls `endpoint` until the player accepts a connection, giving up early once it dies.
pub(crate) fn connect_with_retry(
    endpoint: &Endpoint,
    mut is_alive: impl FnMut() -> bool,
    attempts: usize,
    delay: Duration,
) -> Result<Channel> {
    for attempt in 1..=attempts {
        if !is_alive() {
            error!(endpoint = %endpoint.path().display(), "player died while waiting for its socket");
            return Err(Error::Connect {
                endpoint: endpoint.path().to_path_buf(),
                attempts: attempt,
            });
        }
        if !endpoint.is_ready() {
            thread::sleep(delay);
            continue;
        }
        match endpoint.connect() {
            Ok(channel) => {
                info!(endpoint = %endpoint.path().display(), attempt, "connected to player socket");
                return Ok(channel);
            }
            Err(err) => {
                debug!(attempt, error = %err, "player socket not accepting yet");
                thread::sleep(delay);
            }
        }
    }

    Err(Error::Connect {
        endpoint: endpoint.path().to_path_buf(),
        attempts,
    })
}

/// Control channel of one player session and the values it has observed.
pub(crate) struct IpcTransport {
    running: AtomicBool,
    closed_locally: AtomicBool,
    position: Mutex<Option<f64>>,
    duration: Mutex<Option<f64>>,
    writer: Mutex<Option<Channel>>,
    waiters: Mutex<HashMap<RequestId, SyncSender<()>>>,
    on_exit: Mutex<Option<ExitHook>>,
    // Held while a progress report runs and while end-file or shutdown flips `running`.
    report_gate: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IpcTransport {
    pub(crate) fn new(on_exit: ExitHook) -> Self {
        Self {
            running: AtomicBool::new(false),
            closed_locally: AtomicBool::new(false),
            position: Mutex::new(None),
            duration: Mutex::new(None),
            writer: Mutex::new(None),
            waiters: Mutex::new(HashMap::new()),
            on_exit: Mutex::new(Some(on_exit)),
            report_gate: Mutex::new(()),
        }
    }

    /// Takes ownership of a connected channel and returns the reader half for the listener.
    pub(crate) fn attach(&self, channel: Channel) -> io::Result<Channel> {
        channel.set_read_timeout(RECV_TIMEOUT)?;
        let reader = channel.try_clone()?;
        *lock(&self.writer) = Some(channel);
        self.running.store(true, Ordering::SeqCst);
        Ok(reader)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            position: *lock(&self.position),
            duration: *lock(&self.duration),
        }
    }

    /// Reads until end-file, EOF or local shutdown.
    pub(crate) fn listen(&self, mut reader: Channel) {
        let mut framer = LineFramer::default();
        let mut buf = [0_u8; READ_CHUNK];

        while self.is_running() {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("player closed the control channel");
                    break;
                }
                Ok(read) => {
                    for line in framer.push(&buf[..read]) {
                        self.handle_line(&line);
                    }
                }
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut
                        || err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    if self.is_running() {
                        error!(error = %err, "IPC listener error");
                    }
                    break;
                }
            }
        }

        // A player that vanished without end-file still ends the session for its owner.
        if !self.closed_locally.load(Ordering::SeqCst) {
            self.handle_end_file();
        }
    }

    pub(crate) fn handle_line(&self, line: &str) {
        match parse_message(line) {
            Ok(message) => self.handle_message(message),
            Err(err) => warn!(error = %err, line, "dropping malformed IPC line"),
        }
    }

    fn handle_message(&self, message: Message) {
        match message {
            Message::Response { request_id, result } => {
                let Some(id) = RequestId::from_u64(request_id) else {
                    return;
                };
                if let Ok(Some(data)) = result {
                    match id {
                        RequestId::TimePos => *lock(&self.position) = data.as_f64(),
                        RequestId::Duration => *lock(&self.duration) = data.as_f64(),
                        RequestId::FireAndForget => {}
                    }
                }
                if let Some(waiter) = lock(&self.waiters).remove(&id) {
                    let _ = waiter.try_send(());
                }
            }
            Message::Event { name } if name == "end-file" => self.handle_end_file(),
            Message::Event { name } => debug!(event = %name, "ignoring player event"),
            Message::Other => {}
        }
    }

    fn handle_end_file(&self) {
        {
            let _gate = lock(&self.report_gate);
            self.running.store(false, Ordering::SeqCst);
        }
        let hook = lock(&self.on_exit).take();
        if let Some(hook) = hook {
            info!("player reported end of file");
            hook(self.snapshot());
        }
    }

    /// Writes one command; a no-op once the session stopped running.
    pub(crate) fn send(&self, command: &[Value], id: RequestId) {
        if !self.is_running() {
            return;
        }
        let payload = match encode_command(command, id) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to encode player command");
                return;
            }
        };

        let mut writer = lock(&self.writer);
        let Some(channel) = writer.as_mut() else {
            return;
        };
        if let Err(err) = channel.write_all(&payload).and_then(|()| channel.flush()) {
            if self.is_running() {
                error!(error = %err, "failed to send command");
            }
        }
    }

    fn register(&self, id: RequestId) -> Receiver<()> {
        let (tx, rx) = mpsc::sync_channel(1);
        lock(&self.waiters).insert(id, tx);
        rx
    }

    /// Queries position and duration, waiting up to `wait` for the replies.
    /// Whatever has been observed by then is returned, possibly stale.
    pub(crate) fn sample(&self, wait: Duration) -> PlaybackSnapshot {
        let position_rx = self.register(RequestId::TimePos);
        let duration_rx = self.register(RequestId::Duration);
        self.send(&[json!("get_property"), json!("time-pos")], RequestId::TimePos);
        self.send(&[json!("get_property"), json!("duration")], RequestId::Duration);

        let deadline = Instant::now() + wait;
        for rx in [position_rx, duration_rx] {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let _ = rx.recv_timeout(remaining);
        }
        self.snapshot()
    }

    /// Runs `report` unless end-file has already been seen; returns whether it ran.
    pub(crate) fn report_progress(&self, report: impl FnOnce()) -> bool {
        let _gate = lock(&self.report_gate);
        if !self.is_running() {
            return false;
        }
        report();
        true
    }

    /// Local teardown: stops the session without firing the exit hook.
    pub(crate) fn shutdown(&self) {
        {
            let _gate = lock(&self.report_gate);
            self.closed_locally.store(true, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }
        if let Some(channel) = lock(&self.writer).take() {
            channel.shutdown();
        }
    }
}
