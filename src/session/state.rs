//! Session state machine values owned by the controller.

// std
use std::mem;
// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret, TokenSet},
	pkce::{CsrfNonce, PkcePair},
};

pub(crate) type Waiter = oneshot::Sender<Result<TokenSecret>>;

/// Login attempt awaiting its redirect.
pub(crate) struct PendingAuthorization {
	pub(crate) pkce: PkcePair,
	pub(crate) nonce: CsrfNonce,
	pub(crate) scope: ScopeSet,
}

pub(crate) enum SessionState {
	LoggedOut,
	Authorizing(PendingAuthorization),
	// Nonce consumed; the code exchange is in flight.
	Exchanging,
	Authenticated(TokenSet),
	Refreshing { tokens: TokenSet, flight: u64, waiters: Vec<Waiter> },
}

/// State plus the counters used to detect stale asynchronous results.
///
/// `generation` changes whenever in-flight work must be discarded (logout, a new login attempt,
/// a torn-down session). `next_flight` tags each refresh so a flight only settles its own
/// `Refreshing` state.
pub(crate) struct Inner {
	pub(crate) state: SessionState,
	pub(crate) generation: u64,
	next_flight: u64,
}
impl Inner {
	pub(crate) fn new() -> Self {
		Self { state: SessionState::LoggedOut, generation: 0, next_flight: 0 }
	}

	pub(crate) fn take_state(&mut self) -> SessionState {
		mem::replace(&mut self.state, SessionState::LoggedOut)
	}

	pub(crate) fn bump_generation(&mut self) -> u64 {
		self.generation = self.generation.wrapping_add(1);

		self.generation
	}

	pub(crate) fn next_flight(&mut self) -> u64 {
		self.next_flight = self.next_flight.wrapping_add(1);

		self.next_flight
	}

	/// Moves to `LoggedOut`, invalidating in-flight work, and hands back any queued waiters.
	pub(crate) fn tear_down(&mut self) -> Vec<Waiter> {
		self.bump_generation();

		match self.take_state() {
			SessionState::Refreshing { waiters, .. } => waiters,
			_ => Vec::new(),
		}
	}

	pub(crate) fn status(&self, now: OffsetDateTime) -> SessionStatus {
		match &self.state {
			SessionState::LoggedOut => SessionStatus::LoggedOut,
			SessionState::Authorizing(_) | SessionState::Exchanging => SessionStatus::Authorizing,
			SessionState::Authenticated(tokens) => SessionStatus::Authenticated {
				expires_at: tokens.expires_at,
				expired: tokens.is_expired_at(now),
				scope: tokens.scope.clone(),
			},
			SessionState::Refreshing { waiters, .. } =>
				SessionStatus::Refreshing { waiters: waiters.len() },
		}
	}
}

/// Read-only snapshot of the session; never carries secrets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
	/// No token set; `login` is required.
	LoggedOut,
	/// A login attempt is waiting for its redirect or its code exchange.
	Authorizing,
	/// A token set is active.
	Authenticated {
		/// Expiry of the access token, safety margin applied.
		expires_at: OffsetDateTime,
		/// Whether the next `get_token` call will refresh.
		expired: bool,
		/// Scopes granted to the access token.
		scope: ScopeSet,
	},
	/// A refresh call is in flight.
	Refreshing {
		/// Callers waiting on the in-flight refresh, including the one that started it.
		waiters: usize,
	},
}
impl SessionStatus {
	/// Returns `true` when a token set is held (fresh, expired, or being refreshed).
	pub fn is_authenticated(&self) -> bool {
		matches!(self, Self::Authenticated { .. } | Self::Refreshing { .. })
	}
}

/// Resolves every queued waiter with a clone of the same outcome.
pub(crate) fn resolve_waiters(waiters: Vec<Waiter>, outcome: &Result<TokenSecret>) {
	for waiter in waiters {
		// A waiter whose caller went away has nothing left to notify.
		let _ = waiter.send(outcome.clone());
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn tokens() -> TokenSet {
		TokenSet::builder()
			.access_token("AT1")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token fixture should build.")
	}

	#[tokio::test]
	async fn tear_down_returns_waiters_and_bumps_generation() {
		let mut inner = Inner::new();
		let (tx, rx) = oneshot::channel();

		inner.state = SessionState::Refreshing { tokens: tokens(), flight: 1, waiters: vec![tx] };

		assert_eq!(inner.status(OffsetDateTime::now_utc()), SessionStatus::Refreshing { waiters: 1 });

		let waiters = inner.tear_down();

		resolve_waiters(waiters, &Err(Error::LoggedOutExplicitly));

		assert_eq!(inner.generation, 1);
		assert!(matches!(inner.state, SessionState::LoggedOut));
		assert!(matches!(
			rx.await.expect("Waiter should be resolved."),
			Err(Error::LoggedOutExplicitly)
		));
	}

	#[test]
	fn status_reports_expiry_without_secrets() {
		let mut inner = Inner::new();
		let tokens = tokens();
		let expires_at = tokens.expires_at;

		inner.state = SessionState::Authenticated(tokens);

		let status = inner.status(expires_at);

		assert!(matches!(status, SessionStatus::Authenticated { expired: true, .. }));
		assert!(status.is_authenticated());
		assert!(!format!("{status:?}").contains("AT1"));
	}
}
