//! Bounded exponential backoff for transient token endpoint failures.
//!
//! Code exchanges and refreshes are not safe to replay once the provider has consumed the code
//! or rotated the refresh token, so only [`Error::Network`] failures are retried.

// std
use std::time::Duration as StdDuration;
// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, obs};

/// Backoff parameters applied to token endpoint calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Total attempts including the first one; `1` disables retries.
	pub max_attempts: u32,
	/// Delay before the first retry, in milliseconds.
	pub base_delay_ms: u64,
	/// Multiplier applied to the delay after every retry.
	pub factor: u32,
	/// Upper bound of the uniform random jitter added to each delay, in milliseconds.
	pub max_jitter_ms: u64,
}
impl RetryPolicy {
	/// Policy that performs a single attempt.
	pub fn none() -> Self {
		Self { max_attempts: 1, ..Default::default() }
	}

	/// Deterministic part of the delay before retry number `retry` (1-based).
	pub fn base_delay(&self, retry: u32) -> StdDuration {
		let exponent = retry.saturating_sub(1);
		let multiplier = u64::from(self.factor.max(1)).saturating_pow(exponent);

		StdDuration::from_millis(self.base_delay_ms.saturating_mul(multiplier))
	}

	/// Delay before retry number `retry` (1-based), jitter included.
	pub fn delay_for(&self, retry: u32) -> StdDuration {
		let jitter = if self.max_jitter_ms == 0 {
			0
		} else {
			rand::rng().random_range(0..=self.max_jitter_ms)
		};

		self.base_delay(retry) + StdDuration::from_millis(jitter)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_attempts: 3, base_delay_ms: 500, factor: 2, max_jitter_ms: 250 }
	}
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the attempt budget is spent.
pub(crate) async fn retry_network<T, F, Fut>(
	policy: &RetryPolicy,
	operation: &'static str,
	mut op: F,
) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let attempts = policy.max_attempts.max(1);
	let mut attempt = 1;

	loop {
		match op().await {
			Err(e) if e.is_retryable() && attempt < attempts => {
				let delay = policy.delay_for(attempt);

				obs::debug_event(
					"retry",
					&format_args!(
						"{operation} attempt {attempt}/{attempts} failed ({e}); retrying in {delay:?}."
					),
				);
				tokio::time::sleep(delay).await;

				attempt += 1;
			},
			result => return result,
		}
	}
}
