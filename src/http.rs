use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(6),
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub(crate) fn get_text_with_retries(
    url: &str,
    referer: &str,
    query: &[(&str, &str)],
    policy: RetryPolicy,
) -> Result<String> {
    let attempts = policy.attempts.max(1);
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(policy.connect_timeout)
        .timeout_read(policy.read_timeout)
        .timeout_write(policy.read_timeout)
        .build();

    let mut last_error = None;
    for attempt in 1..=attempts {
        let mut request = agent.get(url).set("Referer", referer);
        for (key, value) in query {
            request = request.query(key, value);
        }

        let err = match request.call() {
            Ok(response) => {
                return response
                    .into_string()
                    .map_err(|err| Error::Transport(format!("response decode failed: {err}")));
            }
            Err(ureq::Error::Status(status, response)) => Error::HttpStatus {
                status,
                body: response.into_string().unwrap_or_default(),
            },
            Err(ureq::Error::Transport(err)) => Error::Transport(err.to_string()),
        };

        if !err.is_retryable() {
            return Err(err);
        }
        debug!(url, attempt, error = %err, "retryable request failure");
        last_error = Some(err);
        if attempt < attempts {
            thread::sleep(policy.retry_delay);
        }
    }

    Err(Error::RetriesExhausted {
        attempts,
        last: Box::new(
            last_error.unwrap_or_else(|| Error::Transport("no attempt was made".to_string())),
        ),
    })
}
