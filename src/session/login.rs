//! Authorization Code + PKCE login: authorize URL construction and the code exchange.

// std
use std::panic;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSet},
	error::{ConfigError, TransportError},
	http::TokenHttpClient,
	oauth::{TokenEndpointClient, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	pkce::{self, CsrfNonce, PkceCodeChallengeMethod, PkcePair},
	provider::ProviderDescriptor,
	retry::{self, RetryPolicy},
	session::{
		AuthorizationCallback, SessionConfig, SessionController, SessionCore,
		state::{PendingAuthorization, SessionState},
	},
};

/// Browser redirect produced by [`SessionController::login`].
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
	/// Fully-formed authorize URL the user agent should open.
	pub authorize_url: Url,
	/// CSRF nonce sent as `state`; the redirect must echo it back.
	pub state: String,
	/// PKCE code challenge derived from the secret verifier.
	pub code_challenge: String,
	/// PKCE challenge method (always `S256`).
	pub code_challenge_method: PkceCodeChallengeMethod,
	/// Scopes requested by this attempt.
	pub scope: ScopeSet,
	/// Redirect URI the provider will send the user back to.
	pub redirect_uri: Url,
}
impl AuthorizationRequest {
	fn new(
		descriptor: &ProviderDescriptor,
		config: &SessionConfig,
		pkce: &PkcePair,
		nonce: &CsrfNonce,
	) -> Self {
		let mut authorize_url = descriptor.endpoints.authorization.clone();

		{
			let mut query = authorize_url.query_pairs_mut();

			query
				.append_pair("response_type", "code")
				.append_pair("client_id", &config.client_id)
				.append_pair("redirect_uri", config.redirect_uri.as_str());

			if let Some(scope) = config.scope.join(descriptor.quirks.scope_delimiter) {
				query.append_pair("scope", &scope);
			}

			query
				.append_pair("state", nonce.as_str())
				.append_pair("code_challenge", pkce.challenge())
				.append_pair("code_challenge_method", pkce.method().as_str());

			for (name, value) in &descriptor.quirks.authorize_params {
				query.append_pair(name, value);
			}
		}

		Self {
			authorize_url,
			state: nonce.as_str().to_owned(),
			code_challenge: pkce.challenge().to_owned(),
			code_challenge_method: pkce.method(),
			scope: config.scope.clone(),
			redirect_uri: config.redirect_uri.clone(),
		}
	}
}

impl<C, M> SessionController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Starts a login attempt and returns the authorize URL to open.
	///
	/// A fresh PKCE pair and nonce are generated every time; calling `login` again while a
	/// previous attempt is pending replaces it, so the old redirect fails with
	/// [`Error::CsrfMismatch`]. Fails with [`Error::AlreadyAuthenticated`] while a token set is
	/// held.
	pub fn login(&self) -> Result<AuthorizationRequest> {
		let mut inner = self.core.inner.lock();

		if matches!(inner.state, SessionState::Authenticated(_) | SessionState::Refreshing { .. }) {
			return Err(Error::AlreadyAuthenticated);
		}

		let (pkce, nonce) = pkce::generate();
		let request = AuthorizationRequest::new(&self.descriptor, &self.config, &pkce, &nonce);

		inner.bump_generation();
		inner.state = SessionState::Authorizing(PendingAuthorization {
			pkce,
			nonce,
			scope: self.config.scope.clone(),
		});

		obs::debug_event("session", &format_args!("Login attempt started for {}.", self.descriptor.name));

		Ok(request)
	}

	/// Completes the pending login with the code and `state` returned on the redirect.
	///
	/// The pending attempt is consumed before any network call: a missing or mismatched `state`
	/// fails with [`Error::CsrfMismatch`] without contacting the token endpoint, and any exchange
	/// failure leaves the session logged out. The exchange runs detached, so dropping this future
	/// does not lose the tokens issued for the single-use code.
	pub async fn complete_login(&self, code: &str, state: Option<&str>) -> Result<()> {
		const KIND: FlowKind = FlowKind::AuthorizationCode;

		let span = FlowSpan::new(KIND, "complete_login");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let (pending, generation) = match self.take_pending(state) {
			Ok(taken) => taken,
			Err(e) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);

				return Err(e);
			},
		};
		let exchange = ExchangeFlight {
			core: self.core.clone(),
			client: self.client.clone(),
			redirect_uri: self.config.redirect_uri.clone(),
			retry: self.config.retry.clone(),
			safety_margin: self.config.safety_margin(),
			code: code.to_owned(),
			pending,
			generation,
		};

		match tokio::spawn(span.instrument(exchange.run())).await {
			Ok(result) => result,
			Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
			Err(_) => Err(TransportError::Interrupted.into()),
		}
	}

	/// Parses the redirect URL and completes or abandons the pending login.
	///
	/// A denial (`?error=...`) ends the attempt with [`Error::UserDenied`]. A redirect carrying
	/// neither a code nor an error is rejected as a protocol error and leaves the attempt pending.
	pub async fn complete_login_from_redirect(&self, redirect: &Url) -> Result<()> {
		const KIND: FlowKind = FlowKind::AuthorizationCode;

		match AuthorizationCallback::from_redirect(redirect)? {
			AuthorizationCallback::Code { code, state } =>
				self.complete_login(&code, state.as_deref()).await,
			AuthorizationCallback::Denied { error, description, .. } => {
				let span = FlowSpan::new(KIND, "complete_login");

				obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

				let result =
					span.instrument(async move { self.abandon_on_denial(error, description) }).await;

				obs::record_flow_outcome(KIND, FlowOutcome::Failure);

				result
			},
		}
	}

	fn take_pending(&self, state: Option<&str>) -> Result<(PendingAuthorization, u64)> {
		let mut inner = self.core.inner.lock();

		match inner.take_state() {
			SessionState::Authorizing(pending) => {
				if !state.is_some_and(|returned| pending.nonce.matches(returned)) {
					// The attempt is spent either way; `take_state` already left `LoggedOut`.
					inner.bump_generation();

					return Err(Error::CsrfMismatch);
				}

				inner.state = SessionState::Exchanging;

				Ok((pending, inner.generation))
			},
			other => {
				inner.state = other;

				Err(Error::CsrfMismatch)
			},
		}
	}

	fn abandon_on_denial(&self, error: String, description: Option<String>) -> Result<()> {
		let mut inner = self.core.inner.lock();

		match inner.take_state() {
			SessionState::Authorizing(_) => {
				inner.bump_generation();

				let reason = match description {
					Some(description) => format!("{error}: {description}"),
					None => error,
				};

				Err(Error::UserDenied { reason })
			},
			other => {
				inner.state = other;

				Err(Error::CsrfMismatch)
			},
		}
	}
}

// Ends an exchange that stopped before installing a token set, unless the session moved on.
struct ExchangeReset<'a> {
	core: &'a SessionCore,
	generation: u64,
}
impl Drop for ExchangeReset<'_> {
	fn drop(&mut self) {
		let mut inner = self.core.inner.lock();

		if inner.generation == self.generation && matches!(inner.state, SessionState::Exchanging) {
			inner.state = SessionState::LoggedOut;
		}
	}
}

/// One code exchange together with everything needed to install its result.
struct ExchangeFlight<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	core: Arc<SessionCore>,
	client: TokenEndpointClient<C, M>,
	redirect_uri: Url,
	retry: RetryPolicy,
	safety_margin: Duration,
	code: String,
	pending: PendingAuthorization,
	generation: u64,
}
impl<C, M> ExchangeFlight<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	async fn run(self) -> Result<()> {
		let _reset = ExchangeReset { core: &self.core, generation: self.generation };
		let result = self.exchange().await;

		obs::record_flow_outcome(FlowKind::AuthorizationCode, match &result {
			Ok(()) => FlowOutcome::Success,
			Err(Error::LoggedOutExplicitly) => FlowOutcome::Discarded,
			Err(_) => FlowOutcome::Failure,
		});

		result
	}

	async fn exchange(&self) -> Result<()> {
		let tokens = retry::retry_network(&self.retry, "exchange_code", || {
			self.client.exchange_code(&self.code, self.pending.pkce.verifier(), &self.redirect_uri)
		})
		.await
		.and_then(|grant| {
			TokenSet::from_grant(
				grant,
				&self.pending.scope,
				OffsetDateTime::now_utc(),
				self.safety_margin,
			)
			.map_err(|e| ConfigError::from(e).into())
		})?;
		let _persist = self.core.persist_gate.lock().await;

		{
			let mut inner = self.core.inner.lock();

			if inner.generation != self.generation {
				obs::debug_event(
					"session",
					&"Code exchange finished after the attempt was abandoned; result dropped.",
				);

				return Err(Error::LoggedOutExplicitly);
			}

			inner.state = SessionState::Authenticated(tokens.clone());
		}

		if let Err(e) = self.core.store.save(tokens).await {
			obs::warn_event("session", &format_args!("Token set could not be persisted: {e}"));
		}

		Ok(())
	}
}
