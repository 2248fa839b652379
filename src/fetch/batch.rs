use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn, Instrument};

use super::types::{Correlation, FetchError, FetchResult, RequestSpec};
use super::Fetch;

/// Per-batch jitter: one base delay is drawn from `[min, max]`, task `i` (1-based) waits `base * i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stagger {
    min: Duration,
    max: Duration,
}

impl Stagger {
    pub const fn none() -> Self {
        Self { min: Duration::ZERO, max: Duration::ZERO }
    }

    pub fn between(min: Duration, max: Duration) -> Self {
        if max < min {
            Self { min: max, max: min }
        } else {
            Self { min, max }
        }
    }

    pub fn base(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let micros = rand::thread_rng().gen_range(self.min.as_micros() as u64..=self.max.as_micros() as u64);
        Duration::from_micros(micros)
    }

    /// Delay for the task at `idx` (0-based); saturates instead of overflowing.
    pub fn slot_delay(base: Duration, idx: usize) -> Duration {
        let position = u32::try_from(idx).ok().and_then(|i| i.checked_add(1)).unwrap_or(u32::MAX);
        base.saturating_mul(position)
    }
}

impl Default for Stagger {
    fn default() -> Self {
        Self::none()
    }
}

/// Outcome of one batch entry, keyed by the logical target it was dispatched for.
#[derive(Debug)]
pub struct Slot<T> {
    pub key: String,
    pub outcome: FetchResult<T>,
}

impl Slot<Value> {
    /// Remove the injected correlation field and check it names this slot's key.
    pub fn into_attributed(self, correlation_key: &str) -> (String, FetchResult<Value>) {
        let Slot { key, outcome } = self;
        let outcome = outcome.and_then(|mut payload| {
            let found = payload.as_object_mut().and_then(|map| map.remove(correlation_key));
            match found {
                Some(Value::String(found)) if found == key => Ok(payload),
                Some(other) => Err(FetchError::Misattributed {
                    expected: key.clone(),
                    found: other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string()),
                }),
                None => Err(FetchError::Misattributed { expected: key.clone(), found: "<missing>".to_string() }),
            }
        });
        if let Err(err) = &outcome {
            debug!(key = %key, error = %err, "batch slot failed");
        }
        (key, outcome)
    }
}

/// Fan out one task per target and gather every outcome in input order.
///
/// A failing or panicking task only fills its own slot. When `correlation_key` is
/// given, each request carries its target key as the correlation value.
pub async fn dispatch_many<F: Fetch>(
    fetcher: &F,
    targets: IndexMap<String, RequestSpec>,
    stagger: Stagger,
    correlation_key: Option<&str>,
) -> Vec<Slot<F::Output>> {
    let base = stagger.base();
    let (keys, handles): (Vec<_>, Vec<_>) = targets
        .into_iter()
        .enumerate()
        .map(|(idx, (key, mut request))| {
            request.delay = Stagger::slot_delay(base, idx);
            if let Some(correlation_key) = correlation_key {
                request.correlation = Some(Correlation { key: correlation_key.to_string(), value: Some(key.clone()) });
            }
            let fetcher = fetcher.clone();
            let handle = tokio::spawn(async move { fetcher.fetch(request).await }.in_current_span());
            (key, handle)
        })
        .unzip();

    debug!(tasks = keys.len(), base_delay_ms = base.as_millis() as u64, "batch dispatched");
    let joined = join_all(handles).await;

    keys.into_iter()
        .zip(joined)
        .map(|(key, joined)| {
            let outcome = joined
                .map_err(|err| {
                    warn!(key = %key, error = %err, "batch task did not complete");
                    FetchError::Task(err.to_string())
                })
                .and_then(|result| result);
            Slot { key, outcome }
        })
        .collect()
}
