//! Session controller: the state machine that owns the active token set.
//!
//! Every transition happens through [`SessionController`] operations. The in-memory state sits
//! behind a synchronous mutex that is never held across an `.await`; token store writes are
//! serialized by a separate async gate so a logout issued during a refresh always wins on disk.
//!
//! Code exchanges and refreshes run as detached Tokio tasks, so the controller must be driven
//! from inside a Tokio runtime. A caller that stops waiting does not cancel the wire call; the
//! result is still applied unless the session moved on in the meantime.

/// Authorization redirect parsing.
pub mod callback;
/// Host-supplied session configuration.
pub mod config;
pub mod login;
pub mod refresh;

mod state;

pub use callback::AuthorizationCallback;
pub use config::SessionConfig;
pub use login::AuthorizationRequest;
pub use refresh::RefreshMetrics;
pub use state::SessionStatus;

// self
use crate::{
	_prelude::*,
	http::TokenHttpClient,
	oauth::{TokenEndpointClient, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::{ProviderDescriptor, ProviderStrategy},
	session::state::{Inner, SessionState},
	store::TokenStore,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Controller specialized for the crate's default reqwest transport stack.
#[cfg(feature = "reqwest")]
pub type ReqwestSessionController = SessionController<ReqwestHttpClient, ReqwestTransportErrorMapper>;

#[cfg(feature = "reqwest")]
const DEFAULT_HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Owns the login state machine, the active token set, and the single-flight refresh gate.
///
/// One controller models one signed-in user per process. Share it behind an [`Arc`]; every
/// operation takes `&self`.
pub struct SessionController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	config: SessionConfig,
	descriptor: ProviderDescriptor,
	client: TokenEndpointClient<C, M>,
	core: Arc<SessionCore>,
}
impl<C, M> SessionController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a logged-out controller that reuses the caller-provided transport + mapper pair.
	///
	/// Call [`SessionController::restore`] afterwards to pick up a persisted session.
	pub fn with_http_client(
		config: SessionConfig,
		descriptor: ProviderDescriptor,
		store: Arc<dyn TokenStore>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		config.validate()?;

		let client =
			TokenEndpointClient::new(&descriptor, config.client_id.clone(), http_client, mapper);

		Ok(Self { config, descriptor, client, core: Arc::new(SessionCore::new(store)) })
	}

	/// Overrides the strategy that classifies token endpoint error responses.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.client = self.client.with_strategy(strategy);

		self
	}

	/// Session configuration in use.
	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	/// Provider descriptor in use.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// Counters for the refresh gate.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		&self.core.refresh_metrics
	}

	/// Secret-free snapshot of the current state.
	pub fn status(&self) -> SessionStatus {
		self.core.inner.lock().status(OffsetDateTime::now_utc())
	}

	/// Loads the persisted token set into a logged-out session.
	///
	/// An expired set is restored as-is; the next [`SessionController::get_token`] refreshes it.
	/// Unreadable records count as absent. Store backend failures are returned and the session
	/// stays logged out. Does nothing once any other operation has moved the session on.
	pub async fn restore(&self) -> Result<SessionStatus> {
		let generation = self.core.inner.lock().generation;
		let loaded = self.core.store.load().await;
		let mut inner = self.core.inner.lock();
		let now = OffsetDateTime::now_utc();

		if inner.generation != generation || !matches!(inner.state, SessionState::LoggedOut) {
			return Ok(inner.status(now));
		}

		match loaded {
			Ok(Some(tokens)) => {
				inner.state = SessionState::Authenticated(tokens);

				Ok(inner.status(now))
			},
			Ok(None) => Ok(SessionStatus::LoggedOut),
			Err(e) => {
				obs::warn_event("session", &format_args!("Persisted session could not be loaded: {e}"));

				Err(e.into())
			},
		}
	}

	/// Ends the session from any state.
	///
	/// In-memory state is cleared first, so an in-flight refresh neither blocks the logout nor
	/// survives it: its waiters fail with [`Error::LoggedOutExplicitly`] and its result is dropped
	/// on arrival. The persisted token set is removed afterwards.
	pub async fn logout(&self) -> Result<()> {
		const KIND: FlowKind = FlowKind::Logout;

		let span = FlowSpan::new(KIND, "logout");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let waiters = self.core.inner.lock().tear_down();

				state::resolve_waiters(waiters, &Err(Error::LoggedOutExplicitly));

				let _persist = self.core.persist_gate.lock().await;

				self.core.store.clear().await.map_err(Error::from)
			})
			.await;

		obs::record_flow_outcome(KIND, match &result {
			Ok(()) => FlowOutcome::Success,
			Err(_) => FlowOutcome::Failure,
		});

		result
	}
}
// State shared between the controller and the flights it spawns.
pub(crate) struct SessionCore {
	pub(crate) store: Arc<dyn TokenStore>,
	pub(crate) refresh_metrics: RefreshMetrics,
	pub(crate) inner: Mutex<Inner>,
	pub(crate) persist_gate: AsyncMutex<()>,
}
impl SessionCore {
	fn new(store: Arc<dyn TokenStore>) -> Self {
		Self {
			store,
			refresh_metrics: RefreshMetrics::default(),
			inner: Mutex::new(Inner::new()),
			persist_gate: AsyncMutex::new(()),
		}
	}
}

#[cfg(feature = "reqwest")]
impl SessionController<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a logged-out controller with its own reqwest transport (30 s timeout, no
	/// redirects).
	pub fn new(
		config: SessionConfig,
		descriptor: ProviderDescriptor,
		store: Arc<dyn TokenStore>,
	) -> Result<Self> {
		let http_client = ReqwestHttpClient::build(DEFAULT_HTTP_TIMEOUT)?;

		Self::with_http_client(config, descriptor, store, http_client, ReqwestTransportErrorMapper)
	}
}
impl<C, M> Debug for SessionController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionController")
			.field("provider", &self.descriptor.name)
			.field("client_id", &self.config.client_id)
			.field("status", &self.status())
			.finish()
	}
}
