use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

use super::endpoint::Endpoint;
use super::process::{StderrTail, terminate};
use super::transport::{CONNECT_ATTEMPTS, CONNECT_DELAY, IpcTransport, connect_with_retry};
use super::{LaunchRequest, MediaPlayer, PlaybackSnapshot, ProgressHook, SessionHooks, tracker};
use crate::error::{Error, Result};

const STARTUP_WAIT: Duration = Duration::from_secs(1);
const STARTUP_POLL: Duration = Duration::from_millis(50);
const REPLACE_SETTLE: Duration = Duration::from_millis(200);

/// Arguments for one player launch, in the order the player receives them.
pub fn player_args(url: &str, start_seconds: u64, endpoint: &Path, extra: &[String]) -> Vec<String> {
    let mut args = vec![
        url.to_string(),
        format!("--start={start_seconds}"),
        format!("--input-ipc-server={}", endpoint.display()),
        "--force-window=immediate".to_string(),
        "--no-terminal".to_string(),
        "--idle=no".to_string(),
        "--keep-open=no".to_string(),
    ];
    args.extend(extra.iter().cloned());
    args
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One launched player: its process, control channel and endpoint.
struct PlayerSession {
    endpoint: Endpoint,
    transport: Arc<IpcTransport>,
    child: Mutex<Option<Child>>,
    stderr: StderrTail,
    closed: AtomicBool,
}

impl PlayerSession {
    fn exit_status(&self) -> Option<String> {
        let mut child = lock(&self.child);
        match child.as_mut().map(Child::try_wait) {
            Some(Ok(Some(status))) => Some(status.to_string()),
            Some(Ok(None)) => None,
            Some(Err(err)) => Some(format!("unknown ({err})")),
            None => Some("reaped".to_string()),
        }
    }

    fn exited_error(&self, status: String) -> Error {
        // Let the drain thread catch the last words.
        thread::sleep(STARTUP_POLL);
        Error::PlayerExited {
            status,
            stderr: self.stderr.contents(),
        }
    }

    fn await_startup(&self) -> Result<()> {
        let deadline = Instant::now() + STARTUP_WAIT;
        while Instant::now() < deadline {
            if let Some(status) = self.exit_status() {
                return Err(self.exited_error(status));
            }
            if self.endpoint.is_ready() {
                break;
            }
            thread::sleep(STARTUP_POLL);
        }
        Ok(())
    }

    fn start_progress_tracker(self: &Arc<Self>, interval: Duration, on_progress: ProgressHook) {
        if let Err(err) = tracker::spawn(Arc::clone(&self.transport), interval, on_progress) {
            error!(error = %err, "failed to start progress tracker");
        }
    }

    /// Idempotent; never joins threads, so it is safe from the session's own listener.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.shutdown();
        if let Some(mut child) = lock(&self.child).take() {
            terminate(&mut child);
        }
        self.endpoint.cleanup();
    }
}

/// Owns at most one player session at a time.
pub struct Supervisor {
    binary: String,
    endpoint: Endpoint,
    active: Mutex<Option<Arc<PlayerSession>>>,
    // Serialises launches started from the UI and from an exit hook.
    launching: Mutex<()>,
}

impl Supervisor {
    pub fn new(binary: impl Into<String>, endpoint_path: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.into(),
            endpoint: Endpoint::new(endpoint_path.as_ref()),
            active: Mutex::new(None),
            launching: Mutex::new(()),
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .is_some_and(|session| session.transport.is_running())
    }

    fn replace_active(&self, next: Option<Arc<PlayerSession>>) -> Option<Arc<PlayerSession>> {
        std::mem::replace(&mut *lock(&self.active), next)
    }

    fn try_launch(&self, request: &LaunchRequest, hooks: SessionHooks) -> Result<()> {
        let SessionHooks {
            on_exit,
            progress_interval,
            on_progress,
        } = hooks;

        if let Some(previous) = self.replace_active(None) {
            let was_running = previous.transport.is_running();
            previous.close();
            if was_running {
                info!("closed previous player session");
                thread::sleep(REPLACE_SETTLE);
            }
        }

        self.endpoint.prepare()?;
        let args = player_args(
            &request.url,
            request.start_seconds,
            self.endpoint.path(),
            &request.extra_args,
        );
        info!(binary = %self.binary, start = request.start_seconds, "launching player");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                binary: self.binary.clone(),
                source,
            })?;
        let stderr = child
            .stderr
            .take()
            .map(StderrTail::capture)
            .unwrap_or_default();

        let session = Arc::new(PlayerSession {
            endpoint: self.endpoint.clone(),
            transport: Arc::new(IpcTransport::new(on_exit)),
            child: Mutex::new(Some(child)),
            stderr,
            closed: AtomicBool::new(false),
        });

        if let Err(err) = self.connect_session(&session) {
            session.close();
            return Err(err);
        }

        session.start_progress_tracker(progress_interval, on_progress);
        self.replace_active(Some(session));
        Ok(())
    }

    fn connect_session(&self, session: &Arc<PlayerSession>) -> Result<()> {
        session.await_startup()?;

        let channel = connect_with_retry(
            &session.endpoint,
            || session.exit_status().is_none(),
            CONNECT_ATTEMPTS,
            CONNECT_DELAY,
        )
        .map_err(|err| match session.exit_status() {
            Some(status) => session.exited_error(status),
            None => err,
        })?;

        let reader = session.transport.attach(channel)?;
        let listener_session = Arc::clone(session);
        thread::Builder::new()
            .name("ipc-listener".to_string())
            .spawn(move || {
                listener_session.transport.listen(reader);
                listener_session.close();
            })?;
        Ok(())
    }
}

impl MediaPlayer for Supervisor {
    fn launch(&self, request: LaunchRequest, hooks: SessionHooks) -> bool {
        let _launching = lock(&self.launching);
        match self.try_launch(&request, hooks) {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "failed to start player");
                false
            }
        }
    }

    fn close(&self) -> Option<PlaybackSnapshot> {
        let session = self.replace_active(None)?;
        let was_running = session.transport.is_running();
        session.close();
        was_running.then(|| session.transport.snapshot())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ExitHook;

    #[test]
    fn player_args_follow_fixed_order() {
        let args = player_args(
            "https://cdn.example/ep5.m3u8",
            305,
            Path::new("/tmp/ibuki/mpv.sock"),
            &["-fs".to_string(), "--referrer=https://allmanga.to".to_string()],
        );
        assert_eq!(
            args,
            vec![
                "https://cdn.example/ep5.m3u8",
                "--start=305",
                "--input-ipc-server=/tmp/ibuki/mpv.sock",
                "--force-window=immediate",
                "--no-terminal",
                "--idle=no",
                "--keep-open=no",
                "-fs",
                "--referrer=https://allmanga.to",
            ]
        );
    }

    fn request(url: &str) -> LaunchRequest {
        LaunchRequest {
            url: url.to_string(),
            start_seconds: 0,
            extra_args: Vec::new(),
        }
    }

    fn hooks(on_exit: ExitHook) -> SessionHooks {
        SessionHooks {
            on_exit,
            progress_interval: Duration::from_secs(1),
            on_progress: Box::new(|_, _| {}),
        }
    }

    #[test]
    fn launch_reports_missing_binary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = Supervisor::new(
            "ibuki-test-player-that-does-not-exist",
            dir.path().join("mpv.sock"),
        );
        let launched = supervisor.launch(
            request("https://cdn.example/ep1.m3u8"),
            hooks(Box::new(|_| panic!("exit hook must not run"))),
        );
        assert!(!launched);
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn launch_reports_player_that_exits_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("mpv.sock");
        let supervisor = Supervisor::new("false", &socket);
        let session_err = {
            let _launching = lock(&supervisor.launching);
            supervisor
                .try_launch(
                    &request("https://cdn.example/ep1.m3u8"),
                    hooks(Box::new(|_| {})),
                )
                .expect_err("player exits")
        };
        assert!(matches!(session_err, Error::PlayerExited { .. }));
        assert!(!socket.exists());
    }

    #[test]
    fn close_without_session_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = Supervisor::new("mpv", dir.path().join("mpv.sock"));
        assert!(supervisor.close().is_none());
        assert!(supervisor.close().is_none());
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    mod live {
        use super::*;
        use std::fs;
        use std::io::{self, BufRead, BufReader, Write};
        use std::os::unix::net::{UnixListener, UnixStream};
        use std::path::PathBuf;
        use std::sync::atomic::AtomicUsize;
        use std::sync::mpsc;

        const DEADLINE: Duration = Duration::from_secs(5);

        /// Stand-in player: `sh` runs the script passed as the url, which records the
        /// spawn and idles. The test thread plays the player's side of the socket.
        struct FakeMpv {
            _dir: tempfile::TempDir,
            script: PathBuf,
            marker: PathBuf,
            socket: PathBuf,
        }

        impl FakeMpv {
            fn new() -> Self {
                let dir = tempfile::tempdir().expect("tempdir");
                let script = dir.path().join("fake-mpv.sh");
                let marker = dir.path().join("spawns");
                fs::write(
                    &script,
                    format!("echo spawned >> '{}'\nexec sleep 30\n", marker.display()),
                )
                .expect("write player script");
                let socket = dir.path().join("mpv.sock");
                Self {
                    _dir: dir,
                    script,
                    marker,
                    socket,
                }
            }

            fn supervisor(&self) -> Supervisor {
                Supervisor::new("sh", &self.socket)
            }

            fn request(&self) -> LaunchRequest {
                request(&self.script.display().to_string())
            }

            fn spawns(&self) -> usize {
                fs::read_to_string(&self.marker)
                    .map(|text| text.lines().count())
                    .unwrap_or(0)
            }

            /// Waits for the `nth` spawn, then accepts the supervisor's connection.
            fn accept(&self, nth: usize) -> UnixStream {
                let deadline = Instant::now() + DEADLINE;
                while self.spawns() < nth {
                    assert!(Instant::now() < deadline, "player #{nth} never spawned");
                    thread::sleep(Duration::from_millis(10));
                }
                let listener = UnixListener::bind(&self.socket).expect("bind player socket");
                listener.set_nonblocking(true).expect("nonblocking listener");
                loop {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_nonblocking(false).expect("blocking stream");
                            stream.set_read_timeout(Some(DEADLINE)).expect("read timeout");
                            return stream;
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            assert!(Instant::now() < deadline, "supervisor never connected");
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(err) => panic!("accept failed: {err}"),
                    }
                }
            }
        }

        /// Answers property queries until the supervisor hangs up.
        fn answer_queries(stream: UnixStream, position: f64, duration: f64) {
            let mut writer = stream.try_clone().expect("clone player stream");
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else {
                    break;
                };
                let reply = if line.contains("time-pos") {
                    format!(r#"{{"error":"success","data":{position},"request_id":1}}"#)
                } else if line.contains("duration") {
                    format!(r#"{{"error":"success","data":{duration},"request_id":2}}"#)
                } else {
                    continue;
                };
                if writeln!(writer, "{reply}").is_err() {
                    break;
                }
            }
        }

        fn finish_immediately(mut stream: UnixStream) {
            writeln!(stream, r#"{{"event":"end-file"}}"#).expect("send end-file");
            let _ = io::copy(&mut stream, &mut io::sink());
        }

        fn counting_hook(calls: &Arc<AtomicUsize>) -> ExitHook {
            let calls = Arc::clone(calls);
            Box::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        }

        #[test]
        fn launch_connects_tracks_and_closes_live_session() {
            let fake = FakeMpv::new();
            let supervisor = fake.supervisor();
            let exits = Arc::new(AtomicUsize::new(0));
            let (ticks_tx, ticks) = mpsc::channel();

            thread::scope(|scope| {
                let player = scope.spawn(|| answer_queries(fake.accept(1), 61.5, 1400.0));

                let launched = supervisor.launch(
                    fake.request(),
                    SessionHooks {
                        on_exit: counting_hook(&exits),
                        progress_interval: Duration::from_millis(50),
                        on_progress: Box::new(move |elapsed, duration| {
                            let _ = ticks_tx.send((elapsed, duration));
                        }),
                    },
                );
                assert!(launched);
                assert!(supervisor.is_running());
                assert!(fake.socket.exists());
                assert_eq!(ticks.recv_timeout(DEADLINE).expect("tracker tick"), (61, 1400));

                let snapshot = supervisor.close().expect("live session snapshot");
                assert_eq!(snapshot.position, Some(61.5));
                assert_eq!(snapshot.duration, Some(1400.0));
                assert!(supervisor.close().is_none());
                player.join().expect("player thread");
            });

            thread::sleep(Duration::from_millis(100));
            assert!(!supervisor.is_running());
            assert!(!fake.socket.exists());
            assert_eq!(exits.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn launch_from_exit_hook_keeps_successor_session() {
            let fake = FakeMpv::new();
            let supervisor = Arc::new(fake.supervisor());
            let first_exits = Arc::new(AtomicUsize::new(0));
            let second_exits = Arc::new(AtomicUsize::new(0));
            let (ticks_tx, ticks) = mpsc::channel::<(&str, u64, u64)>();

            let next_request = fake.request();
            let next_supervisor = Arc::clone(&supervisor);
            let next_exits = Arc::clone(&second_exits);
            let next_ticks = ticks_tx.clone();
            let first_calls = Arc::clone(&first_exits);
            let on_first_exit: ExitHook = Box::new(move |_| {
                first_calls.fetch_add(1, Ordering::SeqCst);
                let launched = next_supervisor.launch(
                    next_request,
                    SessionHooks {
                        on_exit: counting_hook(&next_exits),
                        progress_interval: Duration::from_millis(50),
                        on_progress: Box::new(move |elapsed, duration| {
                            let _ = next_ticks.send(("second", elapsed, duration));
                        }),
                    },
                );
                assert!(launched);
            });

            thread::scope(|scope| {
                let first = scope.spawn(|| finish_immediately(fake.accept(1)));
                let second = scope.spawn(|| answer_queries(fake.accept(2), 61.5, 1400.0));

                assert!(supervisor.launch(
                    fake.request(),
                    SessionHooks {
                        on_exit: on_first_exit,
                        progress_interval: Duration::from_millis(50),
                        on_progress: Box::new(move |elapsed, duration| {
                            let _ = ticks_tx.send(("first", elapsed, duration));
                        }),
                    },
                ));

                let (owner, elapsed, duration) =
                    ticks.recv_timeout(DEADLINE).expect("successor tracker tick");
                assert_eq!((owner, elapsed, duration), ("second", 61, 1400));

                // Several more ticks: none may be credited to the finished session.
                for _ in 0..3 {
                    let (owner, _, _) = ticks.recv_timeout(DEADLINE).expect("tracker tick");
                    assert_eq!(owner, "second");
                }
                first.join().expect("first player thread");

                assert_eq!(first_exits.load(Ordering::SeqCst), 1);
                assert_eq!(second_exits.load(Ordering::SeqCst), 0);
                assert!(supervisor.is_running());
                assert!(fake.socket.exists());

                assert!(supervisor.close().is_some());
                assert!(supervisor.close().is_none());
                second.join().expect("second player thread");
            });

            thread::sleep(Duration::from_millis(100));
            assert!(!fake.socket.exists());
            assert_eq!(second_exits.load(Ordering::SeqCst), 0);
        }
    }
}
