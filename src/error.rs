//! Session-level error taxonomy shared by the PKCE flow, the token endpoint client, and stores.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
///
/// The type is `Clone` so a single refresh outcome can be handed to every caller queued behind
/// the in-flight refresh.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeouts); retried with backoff before surfacing.
	#[error(transparent)]
	Network(#[from] TransportError),
	/// Token endpoint answered with something other than a usable token response.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),

	/// Returned `state` did not match the nonce of the pending login attempt.
	#[error("Authorization state does not match the pending login attempt.")]
	CsrfMismatch,
	/// User declined the authorization request at the provider.
	#[error("User denied the authorization request: {reason}.")]
	UserDenied {
		/// Provider-supplied error code or description.
		reason: String,
	},
	/// Provider rejected the grant (code reused/expired, verifier mismatch, spent refresh token).
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Refresh credentials are unrecoverable; the session was torn down.
	#[error("Session expired; sign in again.")]
	SessionExpired,
	/// No authenticated session is available.
	#[error("No authenticated session is available.")]
	NotAuthenticated,
	/// Session was logged out while the operation was pending.
	#[error("Session was logged out.")]
	LoggedOutExplicitly,
	/// A login was requested while a token set is already active.
	#[error("Session is already authenticated; log out before starting a new login.")]
	AlreadyAuthenticated,
}
impl Error {
	/// Returns the taxonomy bucket for this error.
	pub fn kind(&self) -> AuthErrorKind {
		match self {
			Self::Storage(_) => AuthErrorKind::Storage,
			Self::Config(_) => AuthErrorKind::Config,
			Self::Network(_) => AuthErrorKind::Network,
			Self::Protocol(_) => AuthErrorKind::Protocol,
			Self::CsrfMismatch => AuthErrorKind::CsrfMismatch,
			Self::UserDenied { .. } => AuthErrorKind::UserDenied,
			Self::InvalidGrant { .. } => AuthErrorKind::InvalidGrant,
			Self::SessionExpired => AuthErrorKind::SessionExpired,
			Self::NotAuthenticated => AuthErrorKind::NotAuthenticated,
			Self::LoggedOutExplicitly => AuthErrorKind::LoggedOutExplicitly,
			Self::AlreadyAuthenticated => AuthErrorKind::AlreadyAuthenticated,
		}
	}

	/// Only transient transport failures are safe to retry.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Network(_))
	}

	/// Returns `true` when the caller should send the user back through `login`.
	pub fn requires_login(&self) -> bool {
		matches!(self, Self::NotAuthenticated | Self::SessionExpired)
	}
}

/// Flat classification of [`Error`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
	/// See [`Error::CsrfMismatch`].
	CsrfMismatch,
	/// See [`Error::UserDenied`].
	UserDenied,
	/// See [`Error::InvalidGrant`].
	InvalidGrant,
	/// See [`Error::Network`].
	Network,
	/// See [`Error::Protocol`].
	Protocol,
	/// See [`Error::SessionExpired`].
	SessionExpired,
	/// See [`Error::NotAuthenticated`].
	NotAuthenticated,
	/// See [`Error::LoggedOutExplicitly`].
	LoggedOutExplicitly,
	/// See [`Error::AlreadyAuthenticated`].
	AlreadyAuthenticated,
	/// See [`Error::Config`].
	Config,
	/// See [`Error::Storage`].
	Storage,
}

/// Configuration and validation failures raised locally.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// HTTP request construction failed.
	#[error("HTTP request could not be constructed.")]
	HttpRequest {
		/// Underlying `http` crate failure.
		#[source]
		source: Arc<oauth2::http::Error>,
	},
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Provider descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Redirect URI cannot be used.
	#[error("Redirect URI is invalid: {reason}.")]
	InvalidRedirect {
		/// Why the redirect URI was rejected.
		reason: String,
	},
	/// Client identifier is empty or contains whitespace.
	#[error("Client identifier must be non-empty and contain no whitespace.")]
	InvalidClientId,
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token set builder validation failed.
	#[error("Unable to build token set.")]
	TokenBuild(#[from] crate::auth::TokenSetBuilderError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
impl From<oauth2::http::Error> for ConfigError {
	fn from(e: oauth2::http::Error) -> Self {
		Self::HttpRequest { source: Arc::new(e) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Token endpoint responses that cannot be turned into a token set.
#[derive(Clone, Debug, ThisError)]
pub enum ProtocolError {
	/// Provider returned an OAuth error other than `invalid_grant`, or an unexpected status.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or client-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint responded with a body that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::error::Error>>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint response carried an empty `access_token`.
	#[error("Token endpoint response is missing access_token.")]
	MissingAccessToken,
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Token endpoint issued something other than a bearer token.
	#[error("Token endpoint issued an unsupported token type: {token_type}.")]
	UnsupportedTokenType {
		/// Token type reported by the provider.
		token_type: String,
	},
	/// Token endpoint returned a scope string that cannot be normalized.
	#[error("Token endpoint returned invalid scopes.")]
	InvalidScope(#[source] crate::auth::ScopeValidationError),
	/// Authorization redirect carried neither a `code` nor an `error` parameter.
	#[error("Authorization redirect carries neither a code nor an error.")]
	MalformedCallback,
}

/// Transport-level failures (network, IO).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// Provider answered with a response its strategy classified as temporary.
	#[error("Token endpoint is temporarily unavailable: {message}.")]
	Unavailable {
		/// Provider- or client-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Request timed out before the token endpoint answered.
	#[error("Request timed out while calling the token endpoint.")]
	Timeout,
	/// The task driving the call died before it settled (panic or runtime shutdown).
	#[error("Token endpoint call was interrupted before it completed.")]
	Interrupted,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[source] Arc<std::io::Error>),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}
impl From<std::io::Error> for TransportError {
	fn from(e: std::io::Error) -> Self {
		Self::Io(Arc::new(e))
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
