use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::api::{ApiKind, RequestDescriptor, ResponseInfo};
use crate::backend::{CompletedRequest, ModelServerClient, RequestError};

/// Model server client that answers after a fixed delay without any network
/// I/O. A configurable fraction of requests fails with a timeout error,
/// spread deterministically across the request sequence.
pub struct MockModelServerClient {
    delay: Duration,
    failure_ratio: f64,
    output_tokens: u64,
    time_to_first_token: Option<Duration>,
    sequence: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
}

impl MockModelServerClient {
    const SUPPORTED: &'static [ApiKind] = &[ApiKind::Completion, ApiKind::Chat];

    pub fn new(delay: Duration, failure_ratio: f64) -> Self {
        Self {
            delay,
            failure_ratio: failure_ratio.clamp(0.0, 1.0),
            output_tokens: 16,
            time_to_first_token: None,
            sequence: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            max_in_flight: AtomicU64::new(0),
        }
    }

    pub fn with_time_to_first_token(mut self, ttft: Duration) -> Self {
        self.time_to_first_token = Some(ttft);
        self
    }

    /// High-water mark of simultaneously in-flight requests.
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::Relaxed)
    }

    fn should_fail(&self, index: u64) -> bool {
        // Fails request n whenever floor((n+1)*ratio) advances past
        // floor(n*ratio), yielding exactly the configured fraction.
        let before = (index as f64 * self.failure_ratio).floor() as u64;
        let after = ((index + 1) as f64 * self.failure_ratio).floor() as u64;
        after > before
    }
}

struct InFlightGuard<'a>(&'a MockModelServerClient);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ModelServerClient for MockModelServerClient {
    fn supported_apis(&self) -> &[ApiKind] {
        Self::SUPPORTED
    }

    fn process_request(
        &self,
        _descriptor: &RequestDescriptor,
    ) -> impl Future<Output = Result<CompletedRequest, RequestError>> + Send {
        async move {
            let index = self.sequence.fetch_add(1, Ordering::Relaxed);

            let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
            self.max_in_flight.fetch_max(now, Ordering::AcqRel);
            let _guard = InFlightGuard(self);

            tokio::time::sleep(self.delay).await;

            if self.should_fail(index) {
                return Err(RequestError::Timeout(self.delay));
            }

            let mut info = ResponseInfo::new();
            info.insert("output_text", "this is a mock response");
            info.insert("output_len", self.output_tokens);
            Ok(CompletedRequest {
                info,
                time_to_first_token: self.time_to_first_token,
            })
        }
    }
}
