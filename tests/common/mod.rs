//! Scripted transport, recording store, and fixtures shared by the integration tests.

#![allow(dead_code)]

// std
use std::{
	collections::{BTreeMap, VecDeque},
	error::Error as StdError,
	fmt::{Display, Formatter, Result as FmtResult},
	future::Future,
	pin::Pin,
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
};
// crates.io
use parking_lot::Mutex;
use spotify_auth::{
	auth::{ScopeSet, TokenSet},
	error::{ConfigError, Error, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	oauth::{
		TransportErrorMapper,
		oauth2::{
			AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
			http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
		},
	},
	provider::{GrantType, ProviderDescriptor},
	retry::RetryPolicy,
	session::{SessionConfig, SessionController},
	store::{MemoryStore, StoreError, StoreFuture, TokenStore},
	url::{Url, form_urlencoded},
};
use time::{Duration, OffsetDateTime};

pub const CLIENT_ID: &str = "album-shelf-client";
pub const REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

pub type ScriptedController = SessionController<ScriptedHttpClient, ScriptedErrorMapper>;

/// Canned token endpoint answer.
pub enum Reply {
	/// HTTP response with a JSON body.
	Json(u16, String),
	/// Connection failure before any response.
	NetworkDown,
}
impl Reply {
	pub fn tokens(access: &str, refresh: Option<&str>, expires_in: u64) -> Self {
		let body = match refresh {
			Some(refresh) => format!(
				r#"{{"access_token":"{access}","token_type":"Bearer","expires_in":{expires_in},"refresh_token":"{refresh}"}}"#
			),
			None => format!(
				r#"{{"access_token":"{access}","token_type":"Bearer","expires_in":{expires_in}}}"#
			),
		};

		Self::Json(200, body)
	}

	pub fn invalid_grant() -> Self {
		Self::Json(400, r#"{"error":"invalid_grant","error_description":"Invalid refresh token"}"#.into())
	}
}

#[derive(Debug)]
pub struct FakeTransportError;
impl Display for FakeTransportError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("Connection refused.")
	}
}
impl StdError for FakeTransportError {}

#[derive(Default)]
struct Script {
	replies: Mutex<VecDeque<Reply>>,
	requests: Mutex<Vec<BTreeMap<String, String>>>,
	held: AtomicBool,
}

/// In-process token endpoint that records form bodies and replays queued replies.
///
/// While held, calls are recorded but do not answer until [`ScriptedHttpClient::release`].
#[derive(Clone, Default)]
pub struct ScriptedHttpClient(Arc<Script>);
impl ScriptedHttpClient {
	pub fn push(&self, reply: Reply) {
		self.0.replies.lock().push_back(reply);
	}

	pub fn hold(&self) {
		self.0.held.store(true, Ordering::SeqCst);
	}

	pub fn release(&self) {
		self.0.held.store(false, Ordering::SeqCst);
	}

	pub fn calls(&self) -> usize {
		self.0.requests.lock().len()
	}

	pub fn requests(&self) -> Vec<BTreeMap<String, String>> {
		self.0.requests.lock().clone()
	}

	pub fn last_request(&self) -> BTreeMap<String, String> {
		self.0.requests.lock().last().cloned().expect("At least one request should be recorded.")
	}

	pub async fn wait_for_calls(&self, calls: usize) {
		wait_until(|| self.calls() >= calls).await;
	}
}
impl TokenHttpClient for ScriptedHttpClient {
	type Handle = ScriptedHandle;
	type TransportError = FakeTransportError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		ScriptedHandle { script: self.0.clone(), slot }
	}
}

pub struct ScriptedHandle {
	script: Arc<Script>,
	slot: ResponseMetadataSlot,
}
impl<'c> AsyncHttpClient<'c> for ScriptedHandle {
	type Error = HttpClientError<FakeTransportError>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			let form = form_urlencoded::parse(request.body())
				.into_owned()
				.collect::<BTreeMap<String, String>>();

			self.script.requests.lock().push(form);

			while self.script.held.load(Ordering::SeqCst) {
				tokio::task::yield_now().await;
			}

			let reply = self.script.replies.lock().pop_front().unwrap_or(Reply::NetworkDown);

			match reply {
				Reply::Json(status, body) => {
					self.slot.store(ResponseMetadata { status: Some(status) });

					let mut response = HttpResponse::new(body.into_bytes());

					*response.status_mut() =
						StatusCode::from_u16(status).expect("Scripted status should be valid.");
					response
						.headers_mut()
						.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

					Ok(response)
				},
				Reply::NetworkDown => Err(HttpClientError::Reqwest(Box::new(FakeTransportError))),
			}
		})
	}
}

#[derive(Clone, Debug, Default)]
pub struct ScriptedErrorMapper;
impl TransportErrorMapper<FakeTransportError> for ScriptedErrorMapper {
	fn map_transport_error(
		&self,
		grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<FakeTransportError>,
	) -> Error {
		let _ = (grant, meta);

		match err {
			HttpClientError::Reqwest(inner) => TransportError::network(*inner).into(),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::from(inner).into(),
			other => panic!("Unexpected scripted transport error: {other:?}."),
		}
	}
}

/// [`MemoryStore`] wrapper that counts writes and can be told to fail them.
#[derive(Default)]
pub struct RecordingStore {
	pub inner: MemoryStore,
	saves: AtomicUsize,
	clears: AtomicUsize,
	fail_saves: AtomicBool,
}
impl RecordingStore {
	pub fn with_tokens(tokens: TokenSet) -> Self {
		Self { inner: MemoryStore::with_tokens(tokens), ..Default::default() }
	}

	pub fn saves(&self) -> usize {
		self.saves.load(Ordering::SeqCst)
	}

	pub fn clears(&self) -> usize {
		self.clears.load(Ordering::SeqCst)
	}

	pub fn fail_saves(&self) {
		self.fail_saves.store(true, Ordering::SeqCst);
	}

	pub fn snapshot(&self) -> Option<TokenSet> {
		self.inner.snapshot()
	}
}
impl TokenStore for RecordingStore {
	fn save(&self, tokens: TokenSet) -> StoreFuture<'_, ()> {
		self.saves.fetch_add(1, Ordering::SeqCst);

		if self.fail_saves.load(Ordering::SeqCst) {
			return Box::pin(async {
				Err(StoreError::Backend { message: "Disk full.".into() })
			});
		}

		self.inner.save(tokens)
	}

	fn load(&self) -> StoreFuture<'_, Option<TokenSet>> {
		self.inner.load()
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		self.clears.fetch_add(1, Ordering::SeqCst);

		self.inner.clear()
	}
}

pub fn redirect_uri() -> Url {
	Url::parse(REDIRECT_URI).expect("Redirect URI fixture should parse.")
}

pub fn scope() -> ScopeSet {
	ScopeSet::new(["user-library-read", "user-read-private"]).expect("Scope fixture should be valid.")
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
	RetryPolicy { max_attempts, base_delay_ms: 1, factor: 2, max_jitter_ms: 0 }
}

pub fn config() -> SessionConfig {
	SessionConfig::new(CLIENT_ID, redirect_uri()).with_scope(scope()).with_retry(fast_retry(3))
}

pub fn descriptor() -> ProviderDescriptor {
	ProviderDescriptor::spotify().expect("Spotify descriptor should build.")
}

/// Token set that expired a minute ago.
pub fn expired_tokens(access: &str, refresh: Option<&str>) -> TokenSet {
	tokens_expiring_at(access, refresh, OffsetDateTime::now_utc() - Duration::minutes(1))
}

/// Token set valid for another hour.
pub fn fresh_tokens(access: &str, refresh: Option<&str>) -> TokenSet {
	tokens_expiring_at(access, refresh, OffsetDateTime::now_utc() + Duration::hours(1))
}

fn tokens_expiring_at(access: &str, refresh: Option<&str>, expires_at: OffsetDateTime) -> TokenSet {
	let mut builder = TokenSet::builder().access_token(access).scope(scope()).expires_at(expires_at);

	if let Some(refresh) = refresh {
		builder = builder.refresh_token(refresh);
	}

	builder.build().expect("Token set fixture should build.")
}

pub fn controller(
	http: &ScriptedHttpClient,
	store: Arc<dyn TokenStore>,
) -> ScriptedController {
	SessionController::with_http_client(config(), descriptor(), store, http.clone(), ScriptedErrorMapper)
		.expect("Controller should build from valid config.")
}

/// Controller already holding `tokens`, as after a restore.
pub async fn restored_controller(
	http: &ScriptedHttpClient,
	store: Arc<RecordingStore>,
	tokens: TokenSet,
) -> ScriptedController {
	store.inner.save(tokens).await.expect("Seeding the store should succeed.");

	let controller = controller(http, store);

	controller.restore().await.expect("Restore should succeed.");

	controller
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
	tokio::time::timeout(std::time::Duration::from_secs(5), async {
		while !condition() {
			tokio::task::yield_now().await;
		}
	})
	.await
	.expect("Condition should hold within five seconds.");
}
