//! Article retrieval through an external `curl` subprocess.
//!
//! All HTTP happens by shelling out to `curl` rather than through an
//! in-process client. The subprocess presents a desktop browser fingerprint
//! that in-process clients do not, and the upstream rejects the latter.
//! [`Fetcher`] is the seam the rest of the pipeline sees; tests substitute
//! a scripted implementation.

use crate::utils::truncate_for_log;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

const USER_AGENT: &str = "User-Agent: Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT_HTML: &str =
    "Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_FEED: &str = "Accept: application/rss+xml, application/xml, text/xml";
const ACCEPT_LANGUAGE: &str = "Accept-Language: zh-CN,zh;q=0.9,en;q=0.8";
const CACHE_CONTROL: &str = "Cache-Control: no-cache";

/// Extra wall-clock allowance past curl's own `-m` before the subprocess is
/// presumed hung and killed.
const SUBPROCESS_GRACE: Duration = Duration::from_secs(5);

/// curl's exit code for an operation timeout.
const CURL_EXIT_TIMEOUT: i32 = 28;

/// Errors produced while retrieving a URL.
///
/// Every variant is transient from the pipeline's point of view: the fetch
/// may be retried up to the configured attempt limit.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("curl exited with code {code}: {stderr}")]
    Process { code: i32, stderr: String },
    #[error("curl is not available on PATH")]
    CurlMissing,
    #[error("curl output missing the status code trailer")]
    MissingStatus,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Capability to retrieve the body of a URL.
pub trait Fetcher {
    /// Retrieve `url`, returning the response body on a 2xx status.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Production fetcher: one `curl` subprocess per request.
///
/// `-w "%{http_code}"` appends the final status to stdout so redirects
/// (`-L`) are judged by where they land. The child is spawned with
/// `kill_on_drop`, so abandoning the fetch future reaps it.
#[derive(Debug, Clone)]
pub struct CurlFetcher {
    timeout: Duration,
    accept: &'static str,
}

impl CurlFetcher {
    /// Fetcher for article pages (HTML `Accept` header).
    pub fn for_pages(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            accept: ACCEPT_HTML,
        }
    }

    /// Fetcher for the feed itself (XML `Accept` header).
    pub fn for_feeds(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            accept: ACCEPT_FEED,
        }
    }

    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new("curl");
        cmd.arg("-sS")
            .arg("-L")
            .args(["-H", USER_AGENT])
            .args(["-H", self.accept])
            .args(["-H", ACCEPT_LANGUAGE])
            .args(["-H", CACHE_CONTROL])
            .args(["-m", &self.timeout.as_secs().to_string()])
            .args(["--connect-timeout", "10"])
            .args(["-w", "%{http_code}"])
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Fetcher for CurlFetcher {
    #[instrument(level = "info", skip_all, fields(url = %truncate_for_log(url, 120)))]
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let run = self.command(url).output();
        let output = match timeout(self.timeout + SUBPROCESS_GRACE, run).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "curl did not exit within the grace window"
                );
                return Err(FetchError::Timeout);
            }
        };

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            if code == CURL_EXIT_TIMEOUT {
                return Err(FetchError::Timeout);
            }
            let stderr = truncate_for_log(&String::from_utf8_lossy(&output.stderr), 200);
            return Err(FetchError::Process { code, stderr });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (body, status) = split_status(&stdout)?;
        if !(200..300).contains(&status) {
            return Err(FetchError::HttpStatus(status));
        }
        info!(
            status,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched"
        );
        Ok(body.to_string())
    }
}

/// Verify `curl` exists on PATH before any work begins.
pub async fn ensure_curl_available() -> Result<(), FetchError> {
    match Command::new("curl")
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            let first_line = version.lines().next().unwrap_or("unknown");
            info!(version = %first_line, "curl available");
            Ok(())
        }
        Ok(_) => Err(FetchError::CurlMissing),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::CurlMissing),
        Err(e) => Err(FetchError::Io(e)),
    }
}

/// Split the `%{http_code}` trailer off curl's stdout.
fn split_status(stdout: &str) -> Result<(&str, u16), FetchError> {
    if stdout.len() < 3 || !stdout.is_char_boundary(stdout.len() - 3) {
        return Err(FetchError::MissingStatus);
    }
    let (body, code) = stdout.split_at(stdout.len() - 3);
    let status = code.parse::<u16>().map_err(|_| FetchError::MissingStatus)?;
    Ok((body, status))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{FetchError, Fetcher};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Test fetcher that replays scripted responses per URL and tracks how
    /// many fetches run simultaneously.
    pub(crate) struct ScriptedFetcher {
        scripts: Mutex<HashMap<String, VecDeque<Result<String, FetchError>>>>,
        fetch_duration: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        total_calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        pub fn new() -> Self {
            Self::with_fetch_duration(Duration::ZERO)
        }

        /// Every fetch sleeps this long before resolving, so overlap is
        /// observable under a paused clock.
        pub fn with_fetch_duration(fetch_duration: Duration) -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                fetch_duration,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                total_calls: AtomicUsize::new(0),
            }
        }

        pub fn script(&self, url: &str, responses: Vec<Result<String, FetchError>>) {
            self.scripts
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .extend(responses);
        }

        pub fn total_calls(&self) -> usize {
            self.total_calls.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.total_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.fetch_duration.is_zero() {
                tokio::time::sleep(self.fetch_duration).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts
                .get_mut(url)
                .unwrap_or_else(|| panic!("no script registered for {url}"));
            queue
                .pop_front()
                .unwrap_or_else(|| panic!("script for {url} exhausted"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_status_normal() {
        let (body, status) = split_status("<html>hi</html>200").unwrap();
        assert_eq!(body, "<html>hi</html>");
        assert_eq!(status, 200);
    }

    #[test]
    fn test_split_status_empty_body() {
        let (body, status) = split_status("404").unwrap();
        assert_eq!(body, "");
        assert_eq!(status, 404);
    }

    #[test]
    fn test_split_status_too_short() {
        assert!(matches!(split_status("20"), Err(FetchError::MissingStatus)));
    }

    #[test]
    fn test_split_status_non_numeric_trailer() {
        assert!(matches!(
            split_status("body without a code"),
            Err(FetchError::MissingStatus)
        ));
    }

    #[test]
    fn test_split_status_multibyte_body() {
        let (body, status) = split_status("微信文章200").unwrap();
        assert_eq!(body, "微信文章");
        assert_eq!(status, 200);
    }

    #[test]
    fn test_command_shape() {
        let fetcher = CurlFetcher::for_pages(30);
        let cmd = fetcher.command("https://example.com/a");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"-L".to_string()));
        assert!(args.contains(&USER_AGENT.to_string()));
        assert!(args.contains(&ACCEPT_HTML.to_string()));
        assert!(args.contains(&"%{http_code}".to_string()));
        let m_pos = args.iter().position(|a| a == "-m").unwrap();
        assert_eq!(args[m_pos + 1], "30");
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/a"));
    }

    #[test]
    fn test_feed_fetcher_uses_feed_accept_header() {
        let fetcher = CurlFetcher::for_feeds(30);
        let cmd = fetcher.command("https://example.com/feed.xml");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&ACCEPT_FEED.to_string()));
    }

    #[tokio::test]
    async fn test_scripted_fetcher_replays_in_order() {
        use testing::ScriptedFetcher;

        let fetcher = ScriptedFetcher::new();
        fetcher.script(
            "https://example.com/a",
            vec![Err(FetchError::HttpStatus(500)), Ok("second".to_string())],
        );

        assert!(matches!(
            fetcher.fetch("https://example.com/a").await,
            Err(FetchError::HttpStatus(500))
        ));
        assert_eq!(
            fetcher.fetch("https://example.com/a").await.unwrap(),
            "second"
        );
        assert_eq!(fetcher.total_calls(), 2);
    }
}
