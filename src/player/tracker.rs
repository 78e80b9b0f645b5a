use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use super::{PlaybackSnapshot, ProgressHook};
use super::transport::IpcTransport;

/// Time allowed for the position and duration replies before cached values are used.
pub(crate) const SAMPLE_WAIT: Duration = Duration::from_millis(100);
/// Stand-in length while the player does not know the duration yet.
pub(crate) const UNKNOWN_DURATION_PADDING: u64 = 300;
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Turns raw player values into whole-second `(elapsed, duration)`.
/// Nothing is reported until a position is known.
pub fn progress_sample(position: Option<f64>, duration: Option<f64>) -> Option<(u64, u64)> {
    let elapsed = whole_seconds(position?)?;
    let duration = match duration.and_then(whole_seconds) {
        Some(duration) => duration,
        None => elapsed + UNKNOWN_DURATION_PADDING,
    };
    Some((elapsed, duration))
}

/// `(elapsed, duration)` to record once playback ended; elapsed is 0 when no position was seen.
pub fn final_progress(snapshot: PlaybackSnapshot) -> (u64, u64) {
    let elapsed = snapshot.position.and_then(whole_seconds).unwrap_or(0);
    let duration = snapshot
        .duration
        .and_then(whole_seconds)
        .unwrap_or(elapsed + UNKNOWN_DURATION_PADDING);
    (elapsed, duration)
}

fn whole_seconds(value: f64) -> Option<u64> {
    if !value.is_finite() {
        return None;
    }
    Some(value.max(0.0).floor() as u64)
}

pub(crate) fn spawn(
    transport: Arc<IpcTransport>,
    interval: Duration,
    mut on_progress: ProgressHook,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("progress-tracker".to_string())
        .spawn(move || {
            while transport.is_running() {
                let snapshot = transport.sample(SAMPLE_WAIT);
                match progress_sample(snapshot.position, snapshot.duration) {
                    Some((elapsed, duration)) => {
                        let reported =
                            transport.report_progress(|| on_progress(elapsed, duration));
                        if reported {
                            debug!(elapsed, duration, "progress tick");
                        }
                    }
                    None if snapshot.position.is_some() => {
                        error!(?snapshot, "unusable progress sample; skipping tick");
                    }
                    None => debug!("position not known yet"),
                }
                sleep_while_running(&transport, interval);
            }
            debug!("progress tracker stopped");
        })
}

fn sleep_while_running(transport: &IpcTransport, interval: Duration) {
    let deadline = Instant::now() + interval;
    while transport.is_running() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_floors_known_values() {
        assert_eq!(progress_sample(Some(93.9), Some(1420.6)), Some((93, 1420)));
    }

    #[test]
    fn sample_pads_unknown_duration() {
        assert_eq!(progress_sample(Some(42.4), None), Some((42, 342)));
    }

    #[test]
    fn sample_requires_position() {
        assert_eq!(progress_sample(None, Some(1440.0)), None);
        assert_eq!(progress_sample(None, None), None);
    }

    #[test]
    fn sample_rejects_non_finite_position_and_clamps_negative() {
        assert_eq!(progress_sample(Some(f64::NAN), Some(10.0)), None);
        assert_eq!(progress_sample(Some(-0.04), Some(1440.0)), Some((0, 1440)));
        assert_eq!(progress_sample(Some(7.0), Some(f64::INFINITY)), Some((7, 307)));
    }

    #[test]
    fn final_progress_defaults_missing_values() {
        let unknown = PlaybackSnapshot::default();
        assert_eq!(final_progress(unknown), (0, 300));

        let position_only = PlaybackSnapshot {
            position: Some(600.8),
            duration: None,
        };
        assert_eq!(final_progress(position_only), (600, 900));

        let both = PlaybackSnapshot {
            position: Some(1419.2),
            duration: Some(1420.0),
        };
        assert_eq!(final_progress(both), (1419, 1420));
    }

    #[cfg(unix)]
    #[test]
    fn tracker_stops_reporting_after_end_file() {
        use super::super::endpoint::Channel;
        use std::io::{Read, Write};
        use std::os::unix::net::UnixStream;
        use std::sync::Mutex;

        let transport = Arc::new(IpcTransport::new(Box::new(|_| {})));
        let (client, player) = UnixStream::pair().expect("socket pair");
        let reader = transport
            .attach(Channel::from_stream(client))
            .expect("attach");
        let listener = {
            let transport = Arc::clone(&transport);
            thread::spawn(move || transport.listen(reader))
        };

        // Answers every query with the same values until told to stop.
        let fake_player = thread::spawn(move || {
            let mut reader = player.try_clone().expect("clone");
            let mut writer = player;
            let mut buf = [0_u8; 1024];
            let mut replies = 0;
            loop {
                let read = match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(read) => read,
                };
                let text = String::from_utf8_lossy(&buf[..read]).into_owned();
                for line in text.lines() {
                    let reply = if line.contains("time-pos") {
                        "{\"error\":\"success\",\"data\":61.2,\"request_id\":1}\n"
                    } else {
                        "{\"error\":\"success\",\"data\":1400.0,\"request_id\":2}\n"
                    };
                    if writer.write_all(reply.as_bytes()).is_err() {
                        return;
                    }
                    replies += 1;
                }
                if replies >= 4 {
                    let _ = writer.write_all(b"{\"event\":\"end-file\"}\n");
                    return;
                }
            }
        });

        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let handle = spawn(
            Arc::clone(&transport),
            Duration::from_millis(20),
            Box::new(move |elapsed, duration| {
                sink.lock().expect("lock reports").push((elapsed, duration));
            }),
        )
        .expect("spawn tracker");

        handle.join().expect("tracker thread");
        fake_player.join().expect("fake player");
        listener.join().expect("listener");

        let reports = reports.lock().expect("lock reports");
        assert!(!reports.is_empty());
        assert!(reports.iter().all(|report| *report == (61, 1400)));
        assert!(!transport.is_running());
    }
}
