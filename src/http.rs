use std::thread;
use std::time::Duration;

use rand::seq::IndexedRandom;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";
// Only advertise encodings the agent can decode.
const ACCEPT_ENCODING: &str = "gzip, br";

#[derive(Debug, Clone, Copy)]
pub(crate) struct BrowserProfile {
    pub(crate) user_agent: &'static str,
    pub(crate) accept: &'static str,
}

pub(crate) const BROWSER_PROFILES: &[BrowserProfile] = &[
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    },
];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("request failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: usize,
        last: Box<FetchError>,
    },
}

/// Anything that can turn a page url into its body text.
pub trait PageSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub attempts: usize,
    pub retry_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

pub struct HttpFetcher {
    agent: ureq::Agent,
    policy: FetchPolicy,
}

impl HttpFetcher {
    pub fn new(policy: FetchPolicy) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(policy.timeout).build();
        Self { agent, policy }
    }

    fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let profile = pick_profile();
        let request = self
            .agent
            .get(url)
            .set("User-Agent", profile.user_agent)
            .set("Accept", profile.accept)
            .set("Accept-Language", ACCEPT_LANGUAGE)
            .set("Accept-Encoding", ACCEPT_ENCODING)
            .set("Connection", "keep-alive")
            .set("Upgrade-Insecure-Requests", "1");

        match request.call() {
            Ok(response) => response
                .into_string()
                .map_err(|err| FetchError::Decode(err.to_string())),
            Err(ureq::Error::Status(status, _)) => Err(FetchError::Status(status)),
            Err(ureq::Error::Transport(err)) => Err(FetchError::Transport(err.to_string())),
        }
    }
}

impl PageSource for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = FetchError::Transport("no attempt was made".to_string());

        for attempt in 1..=attempts {
            match self.fetch_once(url) {
                Ok(body) => {
                    debug!(url, attempt, bytes = body.len(), "fetched page");
                    return Ok(body);
                }
                Err(err) => {
                    warn!(url, attempt, attempts, error = %err, "page request failed");
                    last_error = err;
                }
            }
            if attempt < attempts {
                thread::sleep(backoff_delay(self.policy.retry_delay, attempt));
            }
        }

        Err(FetchError::Exhausted {
            attempts,
            last: Box::new(last_error),
        })
    }
}

pub(crate) fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    base.saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
}

fn pick_profile() -> &'static BrowserProfile {
    BROWSER_PROFILES
        .choose(&mut rand::rng())
        .unwrap_or(&BROWSER_PROFILES[0])
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{FetchError, PageSource};

    /// In-memory [`PageSource`] answering from a fixed url table.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedSource {
        pages: HashMap<String, Result<String, u16>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_page(mut self, url: &str, html: String) -> Self {
            self.pages.insert(url.to_string(), Ok(html));
            self
        }

        pub(crate) fn with_status(mut self, url: &str, status: u16) -> Self {
            self.pages.insert(url.to_string(), Err(status));
            self
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.requests.lock().expect("lock requests").clone()
        }
    }

    impl PageSource for ScriptedSource {
        fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requests.lock().expect("lock requests").push(url.to_string());
            match self.pages.get(url) {
                Some(Ok(html)) => Ok(html.clone()),
                Some(Err(status)) => Err(FetchError::Exhausted {
                    attempts: 3,
                    last: Box::new(FetchError::Status(*status)),
                }),
                None => Err(FetchError::Transport("connection refused".to_string())),
            }
        }
    }
}
