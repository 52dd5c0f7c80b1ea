//! Token endpoint client performing the code exchange and the refresh call.
//!
//! Both calls are `application/x-www-form-urlencoded` POSTs sent through a [`TokenHttpClient`]
//! handle. Responses are decoded here and failures are classified into the session taxonomy:
//! transport faults become [`Error::Network`], a `400` carrying `error=invalid_grant` becomes
//! [`Error::InvalidGrant`], and anything else unusable becomes [`Error::Protocol`].

pub use oauth2;

// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
	basic::BasicErrorResponse,
	http::{
		Method,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenGrant, TokenSecret},
	error::{ConfigError, ProtocolError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	pkce::PkceVerifier,
	provider::{
		DefaultProviderStrategy, GrantType, ProviderDescriptor, ProviderErrorContext,
		ProviderErrorKind, ProviderStrategy,
	},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Boxed future returned by [`TokenEndpointClient`] calls.
pub type TokenEndpointFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenGrant>> + 'a + Send>>;

/// Token endpoint client specialized for the crate's default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestTokenEndpointClient =
	TokenEndpointClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

// Largest lifetime accepted from `expires_in`; keeps expiry arithmetic far from overflow.
const MAX_EXPIRES_IN_SECS: u64 = i32::MAX as u64;

/// Maps HTTP transport failures into session [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a session error.
	fn map_transport_error(
		&self,
		grant: GrantType,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		let _ = (grant, meta);

		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(*inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::from(inner).into(),
			HttpClientError::Other(message) =>
				TransportError::network(OtherTransportError(message)).into(),
			other => TransportError::network(OtherTransportError(other.to_string())).into(),
		}
	}
}

/// Client for the provider's token endpoint.
///
/// The client is public (no secret): `client_id` travels in the form body and possession is
/// proven through PKCE.
pub struct TokenEndpointClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	token_url: Url,
	client_id: String,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	strategy: Arc<dyn ProviderStrategy>,
}
impl<C, M> Clone for TokenEndpointClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			token_url: self.token_url.clone(),
			client_id: self.client_id.clone(),
			http_client: self.http_client.clone(),
			error_mapper: self.error_mapper.clone(),
			strategy: self.strategy.clone(),
		}
	}
}
impl<C, M> TokenEndpointClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client for the descriptor's token endpoint using the default strategy.
	pub fn new(
		descriptor: &ProviderDescriptor,
		client_id: impl Into<String>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			token_url: descriptor.endpoints.token.clone(),
			client_id: client_id.into(),
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			strategy: Arc::new(DefaultProviderStrategy),
		}
	}

	/// Overrides the provider strategy used to classify error responses.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Exchanges an authorization code, proving possession with the PKCE verifier.
	pub fn exchange_code<'a>(
		&'a self,
		code: &'a str,
		verifier: &'a PkceVerifier,
		redirect_uri: &'a Url,
	) -> TokenEndpointFuture<'a> {
		Box::pin(async move {
			let form = [
				("grant_type", GrantType::AuthorizationCode.as_str()),
				("code", code),
				("redirect_uri", redirect_uri.as_str()),
				("code_verifier", verifier.expose()),
				("client_id", self.client_id.as_str()),
			];

			self.post_form(GrantType::AuthorizationCode, encode_form(&form)).await
		})
	}

	/// Redeems a refresh token for a new access token.
	pub fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> TokenEndpointFuture<'a> {
		Box::pin(async move {
			let form = [
				("grant_type", GrantType::RefreshToken.as_str()),
				("refresh_token", refresh_token.expose()),
				("client_id", self.client_id.as_str()),
			];

			self.post_form(GrantType::RefreshToken, encode_form(&form)).await
		})
	}

	async fn post_form(&self, grant: GrantType, body: String) -> Result<TokenGrant> {
		let request: HttpRequest = oauth2::http::Request::builder()
			.method(Method::POST)
			.uri(self.token_url.as_str())
			.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
			.header(ACCEPT, "application/json")
			.body(body.into_bytes())
			.map_err(ConfigError::from)?;
		let meta = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(meta.clone());
		let response = handle
			.call(request)
			.await
			.map_err(|e| self.error_mapper.map_transport_error(grant, meta.take().as_ref(), e))?;

		decode_token_response(self.strategy.as_ref(), grant, response)
	}
}

#[cfg(feature = "reqwest")]
#[derive(Debug, ThisError)]
#[error("{0}")]
struct OtherTransportError(String);

#[derive(Deserialize)]
struct TokenEndpointResponse {
	access_token: String,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	expires_in: Option<u64>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	scope: Option<String>,
}
impl TokenEndpointResponse {
	fn into_grant(self) -> Result<TokenGrant, ProtocolError> {
		if self.access_token.is_empty() {
			return Err(ProtocolError::MissingAccessToken);
		}
		if let Some(token_type) = self.token_type.filter(|t| !t.eq_ignore_ascii_case("bearer")) {
			return Err(ProtocolError::UnsupportedTokenType { token_type });
		}

		let expires_in = self.expires_in.ok_or(ProtocolError::MissingExpiresIn)?;

		if expires_in == 0 {
			return Err(ProtocolError::NonPositiveExpiresIn);
		}
		if expires_in > MAX_EXPIRES_IN_SECS {
			return Err(ProtocolError::ExpiresInOutOfRange);
		}

		let scope = self
			.scope
			.map(|raw| ScopeSet::from_str(raw.trim()))
			.transpose()
			.map_err(ProtocolError::InvalidScope)?;

		Ok(TokenGrant {
			access_token: TokenSecret::new(self.access_token),
			refresh_token: self.refresh_token.filter(|t| !t.is_empty()).map(TokenSecret::new),
			expires_in: Duration::seconds(expires_in as i64),
			scope,
		})
	}
}

fn encode_form(pairs: &[(&str, &str)]) -> String {
	form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish()
}

fn decode_token_response(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	response: HttpResponse,
) -> Result<TokenGrant> {
	let status = response.status();
	let body = response.body();

	if status.is_success() {
		let mut deserializer = serde_json::Deserializer::from_slice(body);
		let raw: TokenEndpointResponse = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|e| ProtocolError::TokenResponseParse {
				source: Arc::new(e),
				status: Some(status.as_u16()),
			})?;

		return raw.into_grant().map_err(Error::from);
	}

	let mut ctx = ProviderErrorContext::new(grant).with_http_status(status.as_u16());

	match serde_json::from_slice::<BasicErrorResponse>(body) {
		Ok(oauth_error) => {
			ctx = ctx.with_oauth_error(oauth_error.error().as_ref());

			if let Some(description) = oauth_error.error_description() {
				ctx = ctx.with_error_description(description.clone());
			}
		},
		Err(_) => ctx = ctx.with_body_preview(String::from_utf8_lossy(body).into_owned()),
	}

	let reason = ctx.summary();

	Err(match strategy.classify_token_error(&ctx) {
		ProviderErrorKind::InvalidGrant => Error::InvalidGrant { reason },
		ProviderErrorKind::Rejected =>
			ProtocolError::TokenEndpoint { message: reason, status: ctx.http_status }.into(),
		ProviderErrorKind::Transient =>
			TransportError::Unavailable { message: reason, status: ctx.http_status }.into(),
	})
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransportError::Timeout.into();
	}

	TransportError::from(err).into()
}
