//! Single-flight refresh gate.
//!
//! The first caller that finds the access token expired moves the session to `Refreshing` and
//! spawns the refresh as a detached flight; it then waits on a oneshot receiver parked in the
//! state like every caller that arrives while the call is in flight, and all of them get a clone
//! of the same outcome. Callers that stop waiting never cancel the wire call. A generation
//! counter, bumped by logout, marks late results as stale so they are dropped instead of
//! resurrecting a logged-out session.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{TokenGrant, TokenSecret, TokenSet},
	error::{ConfigError, TransportError},
	http::TokenHttpClient,
	oauth::{TokenEndpointClient, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	retry::{self, RetryPolicy},
	session::{
		SessionController, SessionCore,
		state::{self, SessionState},
	},
};

pub(crate) enum Acquire {
	Ready(TokenSecret),
	Wait(oneshot::Receiver<Result<TokenSecret>>),
	Lead {
		rx: oneshot::Receiver<Result<TokenSecret>>,
		tokens: TokenSet,
		generation: u64,
		flight: u64,
	},
}

impl<C, M> SessionController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns a valid access token, refreshing through the single-flight gate when expired.
	///
	/// Fails with [`Error::NotAuthenticated`] unless a token set is held. Concurrent callers that
	/// find the token expired share one refresh call and all receive its outcome. Dropping the
	/// returned future does not cancel a refresh it started.
	pub async fn get_token(&self) -> Result<TokenSecret> {
		self.token(false).await
	}

	/// Refreshes even if the cached access token is still valid.
	///
	/// Shares the single-flight gate with [`SessionController::get_token`]: a refresh already in
	/// flight is joined rather than duplicated.
	pub async fn force_refresh(&self) -> Result<TokenSecret> {
		self.token(true).await
	}

	async fn token(&self, force: bool) -> Result<TokenSecret> {
		let rx = match self.acquire(force, OffsetDateTime::now_utc())? {
			Acquire::Ready(token) => return Ok(token),
			Acquire::Wait(rx) => rx,
			Acquire::Lead { rx, tokens, generation, flight } => {
				self.spawn_refresh(tokens, generation, flight);

				rx
			},
		};

		// The flight settles every waiter unless its task died (panic or runtime shutdown).
		rx.await.unwrap_or_else(|_| Err(TransportError::Interrupted.into()))
	}

	pub(crate) fn acquire(&self, force: bool, now: OffsetDateTime) -> Result<Acquire> {
		let mut inner = self.core.inner.lock();

		match inner.take_state() {
			SessionState::Authenticated(tokens) if !force && !tokens.is_expired_at(now) => {
				let token = tokens.access_token.clone();

				inner.state = SessionState::Authenticated(tokens);

				Ok(Acquire::Ready(token))
			},
			SessionState::Authenticated(tokens) => {
				let flight = inner.next_flight();
				let (tx, rx) = oneshot::channel();

				inner.state =
					SessionState::Refreshing { tokens: tokens.clone(), flight, waiters: vec![tx] };

				Ok(Acquire::Lead { rx, tokens, generation: inner.generation, flight })
			},
			SessionState::Refreshing { tokens, flight, mut waiters } => {
				let (tx, rx) = oneshot::channel();

				waiters.push(tx);
				inner.state = SessionState::Refreshing { tokens, flight, waiters };
				self.core.refresh_metrics.record_coalesced();

				Ok(Acquire::Wait(rx))
			},
			other => {
				inner.state = other;

				Err(Error::NotAuthenticated)
			},
		}
	}

	fn spawn_refresh(&self, tokens: TokenSet, generation: u64, flight: u64) {
		let refresh = RefreshFlight {
			core: self.core.clone(),
			client: self.client.clone(),
			retry: self.config.retry.clone(),
			safety_margin: self.config.safety_margin(),
			tokens,
			generation,
			flight,
		};
		let span = FlowSpan::new(FlowKind::Refresh, "refresh");

		tokio::spawn(span.instrument(refresh.run()));
	}
}

// Returns the session to its previous token set if the flight task dies before settling, and
// fails the queued waiters so none of them waits forever.
struct FlightReset<'a> {
	core: &'a SessionCore,
	flight: u64,
}
impl Drop for FlightReset<'_> {
	fn drop(&mut self) {
		let waiters = {
			let mut inner = self.core.inner.lock();

			if !matches!(inner.state, SessionState::Refreshing { flight, .. } if flight == self.flight)
			{
				return;
			}

			match inner.take_state() {
				SessionState::Refreshing { tokens, waiters, .. } => {
					inner.state = SessionState::Authenticated(tokens);

					waiters
				},
				_ => return,
			}
		};

		state::resolve_waiters(waiters, &Err(TransportError::Interrupted.into()));
	}
}

/// One refresh wire call together with everything needed to apply its outcome.
struct RefreshFlight<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	core: Arc<SessionCore>,
	client: TokenEndpointClient<C, M>,
	retry: RetryPolicy,
	safety_margin: Duration,
	tokens: TokenSet,
	generation: u64,
	flight: u64,
}
impl<C, M> RefreshFlight<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	async fn run(self) {
		const KIND: FlowKind = FlowKind::Refresh;

		let _reset = FlightReset { core: &self.core, flight: self.flight };

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = self.refresh().await;

		obs::record_flow_outcome(KIND, match &result {
			Ok(_) => FlowOutcome::Success,
			Err(Error::LoggedOutExplicitly) => FlowOutcome::Discarded,
			Err(_) => FlowOutcome::Failure,
		});
	}

	async fn refresh(&self) -> Result<TokenSecret> {
		let Some(refresh_token) = self.tokens.refresh_token.clone() else {
			obs::debug_event("refresh", &"Token set carries no refresh token; session expired.");

			return self.expire_session().await;
		};

		self.core.refresh_metrics.record_attempt();

		let outcome =
			retry::retry_network(&self.retry, "refresh", || self.client.refresh(&refresh_token))
				.await;

		match outcome {
			Ok(grant) => self.install(grant).await,
			Err(Error::InvalidGrant { reason }) => {
				self.core.refresh_metrics.record_failure();
				obs::debug_event(
					"refresh",
					&format_args!("Refresh token rejected ({reason}); session expired."),
				);

				self.expire_session().await
			},
			Err(e) => {
				self.core.refresh_metrics.record_failure();

				self.abort(e)
			},
		}
	}

	async fn install(&self, grant: TokenGrant) -> Result<TokenSecret> {
		let rotated =
			match self.tokens.rotate(grant, OffsetDateTime::now_utc(), self.safety_margin) {
				Ok(rotated) => rotated,
				Err(e) => {
					self.core.refresh_metrics.record_failure();

					return self.abort(ConfigError::from(e).into());
				},
			};
		let _persist = self.core.persist_gate.lock().await;
		let waiters = {
			let mut inner = self.core.inner.lock();

			if inner.generation != self.generation {
				self.core.refresh_metrics.record_discarded();
				obs::debug_event("refresh", &"Refresh finished after logout; result dropped.");

				return Err(Error::LoggedOutExplicitly);
			}

			let waiters = match inner.take_state() {
				SessionState::Refreshing { waiters, .. } => waiters,
				_ => Vec::new(),
			};

			inner.state = SessionState::Authenticated(rotated.clone());

			waiters
		};

		self.core.refresh_metrics.record_success();

		let outcome = Ok(rotated.access_token.clone());

		if let Err(e) = self.core.store.save(rotated).await {
			obs::warn_event(
				"refresh",
				&format_args!("Refreshed token set could not be persisted: {e}"),
			);
		}

		state::resolve_waiters(waiters, &outcome);

		outcome
	}

	// Unrecoverable credentials: tear the session down and fail every waiter.
	async fn expire_session(&self) -> Result<TokenSecret> {
		let _persist = self.core.persist_gate.lock().await;
		let waiters = {
			let mut inner = self.core.inner.lock();

			if inner.generation != self.generation {
				return Err(Error::LoggedOutExplicitly);
			}

			inner.tear_down()
		};

		if let Err(e) = self.core.store.clear().await {
			obs::warn_event(
				"refresh",
				&format_args!("Expired token set could not be cleared: {e}"),
			);
		}

		state::resolve_waiters(waiters, &Err(Error::SessionExpired));

		Err(Error::SessionExpired)
	}

	// Keeps the previous token set so a later call can retry the refresh.
	fn abort(&self, error: Error) -> Result<TokenSecret> {
		let mut inner = self.core.inner.lock();

		match inner.take_state() {
			SessionState::Refreshing { tokens, flight, waiters } if flight == self.flight => {
				inner.state = SessionState::Authenticated(tokens);

				let outcome = Err(error);

				state::resolve_waiters(waiters, &outcome);

				outcome
			},
			other => {
				inner.state = other;

				Err(Error::LoggedOutExplicitly)
			},
		}
	}
}
