//! Retry policy shared by both fetchers.
//!
//! Up to `max_attempts` tries per request; backoff 1s, 2s, 3s capped at 3s.
//! HTTP 418/429 honor a server-advertised `Retry-After`; timeouts and 5xx
//! retry on the backoff; any other 4xx except 404 is terminal.

use std::future::Future;
use std::time::Duration;

use reqwest::Response;
use tracing::warn;

use glc_core::DataError;

const BACKOFF_CAP: Duration = Duration::from_secs(3);

/// Outcome of a single attempt.
pub(crate) enum Attempt<T> {
    Ok(T),
    /// Retry after the given delay (rate-limit hint) or the default backoff.
    Retry {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// Do not retry; surface immediately.
    Fatal(DataError),
}

/// Drive `op` through the retry budget. `op` is invoked once per attempt;
/// exhausting the budget yields `DataError::TransientSource`.
pub(crate) async fn with_retries<T, F, Fut>(
    what: &str,
    max_attempts: u32,
    mut op: F,
) -> Result<T, DataError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut last_reason = String::new();
    for attempt in 1..=max_attempts {
        match op().await {
            Attempt::Ok(v) => return Ok(v),
            Attempt::Fatal(e) => return Err(e),
            Attempt::Retry {
                reason,
                retry_after,
            } => {
                warn!(what, attempt, max_attempts, %reason, "retrying upstream request");
                last_reason = reason;
                if attempt < max_attempts {
                    let backoff = Duration::from_secs(u64::from(attempt)).min(BACKOFF_CAP);
                    tokio::time::sleep(retry_after.unwrap_or(backoff)).await;
                }
            }
        }
    }
    Err(DataError::TransientSource(format!(
        "{what}: {max_attempts} attempts exhausted, last error: {last_reason}"
    )))
}

/// Classify an HTTP response status for the retry loop. `Ok(resp)` means the
/// caller may consume the body; 404 is returned as a distinct marker because
/// the two fetchers apply different 404 policies.
pub(crate) enum Classified {
    Success(Response),
    NotFound,
    Retry {
        reason: String,
        retry_after: Option<Duration>,
    },
    Fatal(DataError),
}

pub(crate) fn classify(resp: Response) -> Classified {
    let status = resp.status();
    if status.is_success() {
        return Classified::Success(resp);
    }
    if status.as_u16() == 404 {
        return Classified::NotFound;
    }
    // 418 (the provider's IP-ban teapot) and 429 are rate limiting.
    if status.as_u16() == 418 || status.as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Classified::Retry {
            reason: format!("rate limited (http {})", status.as_u16()),
            retry_after,
        };
    }
    if status.is_client_error() {
        return Classified::Fatal(DataError::SourceRejected {
            status: status.as_u16(),
            message: format!("upstream rejected request with http {}", status.as_u16()),
        });
    }
    Classified::Retry {
        reason: format!("http {}", status.as_u16()),
        retry_after: None,
    }
}
