//! Token secrets, the persisted token set, and the decoded token endpoint grant.

// self
use crate::{_prelude::*, auth::ScopeSet};

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Formats the value for an `Authorization` header.
	pub fn bearer_header_value(&self) -> String {
		format!("Bearer {}", self.0)
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Token types accepted from the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
	/// RFC 6750 bearer token.
	#[default]
	Bearer,
}
impl TokenType {
	/// Returns the wire label.
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenType::Bearer => "Bearer",
		}
	}
}

/// Errors produced by [`TokenSetBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenSetBuilderError {
	/// Issued when no (or an empty) access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// The active credentials of the session.
///
/// A token set is either complete or absent; the builder and the deserializer both refuse to
/// produce one without an access token and an expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PersistedTokenSet", into = "PersistedTokenSet")]
pub struct TokenSet {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Instant after which the access token is treated as expired (safety margin applied).
	pub expires_at: OffsetDateTime,
	/// Scopes granted to the access token.
	pub scope: ScopeSet,
	/// Token type, always bearer.
	pub token_type: TokenType,
}
impl TokenSet {
	/// Returns a builder for constructing token sets.
	pub fn builder() -> TokenSetBuilder {
		TokenSetBuilder::default()
	}

	/// Builds the first token set of a session from a code exchange grant.
	///
	/// `requested_scope` is kept when the provider does not echo a `scope` field.
	pub fn from_grant(
		grant: TokenGrant,
		requested_scope: &ScopeSet,
		issued_at: OffsetDateTime,
		safety_margin: Duration,
	) -> Result<Self, TokenSetBuilderError> {
		let mut builder = Self::builder()
			.access_token(grant.access_token)
			.scope(grant.scope.unwrap_or_else(|| requested_scope.clone()))
			.issued_at(issued_at)
			.expires_in(grant.expires_in)
			.safety_margin(safety_margin);

		if let Some(refresh) = grant.refresh_token {
			builder = builder.refresh_token(refresh);
		}

		builder.build()
	}

	/// Produces the replacement set after a refresh.
	///
	/// A grant without a new refresh token keeps the current one; a grant with one discards the
	/// current value.
	pub fn rotate(
		&self,
		grant: TokenGrant,
		issued_at: OffsetDateTime,
		safety_margin: Duration,
	) -> Result<Self, TokenSetBuilderError> {
		let refresh = grant.refresh_token.or_else(|| self.refresh_token.clone());
		let mut builder = Self::builder()
			.access_token(grant.access_token)
			.scope(grant.scope.unwrap_or_else(|| self.scope.clone()))
			.issued_at(issued_at)
			.expires_in(grant.expires_in)
			.safety_margin(safety_margin);

		if let Some(refresh) = refresh {
			builder = builder.refresh_token(refresh);
		}

		builder.build()
	}

	/// Returns `true` if the access token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` if the access token is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Remaining lifetime at `instant`, clamped to zero.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		let remaining = self.expires_at - instant;

		if remaining.is_negative() { Duration::ZERO } else { remaining }
	}
}
impl Debug for TokenSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSet")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.field("token_type", &self.token_type)
			.finish()
	}
}

#[derive(Clone, Serialize, Deserialize)]
struct PersistedTokenSet {
	access_token: TokenSecret,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	refresh_token: Option<TokenSecret>,
	#[serde(with = "time::serde::timestamp")]
	expires_at: OffsetDateTime,
	scope: ScopeSet,
	token_type: TokenType,
}
impl TryFrom<PersistedTokenSet> for TokenSet {
	type Error = TokenSetBuilderError;

	fn try_from(value: PersistedTokenSet) -> Result<Self, Self::Error> {
		let mut builder = TokenSet::builder()
			.access_token(value.access_token)
			.expires_at(value.expires_at)
			.scope(value.scope);

		if let Some(refresh) = value.refresh_token {
			builder = builder.refresh_token(refresh);
		}

		builder.build()
	}
}
impl From<TokenSet> for PersistedTokenSet {
	fn from(value: TokenSet) -> Self {
		Self {
			access_token: value.access_token,
			refresh_token: value.refresh_token,
			expires_at: value.expires_at,
			scope: value.scope,
			token_type: value.token_type,
		}
	}
}

/// Builder for [`TokenSet`].
#[derive(Clone, Debug, Default)]
pub struct TokenSetBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	scope: ScopeSet,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	safety_margin: Duration,
}
impl TokenSetBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<TokenSecret>) -> Self {
		self.access_token = Some(token.into());

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<TokenSecret>) -> Self {
		self.refresh_token = Some(token.into());

		self
	}

	/// Sets the granted scopes.
	pub fn scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}

	/// Sets the instant the provider response was received.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant; takes precedence over `expires_in`.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Subtracts `margin` from a relative expiry to absorb clock skew and latency.
	pub fn safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Consumes the builder and produces a [`TokenSet`].
	pub fn build(self) -> Result<TokenSet, TokenSetBuilderError> {
		let access_token = self
			.access_token
			.filter(|secret| !secret.expose().is_empty())
			.ok_or(TokenSetBuilderError::MissingAccessToken)?;
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => {
				let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
				let lifetime = delta - self.safety_margin;

				if lifetime.is_negative() { issued_at } else { issued_at + lifetime }
			},
			(None, None) => return Err(TokenSetBuilderError::MissingExpiry),
		};

		Ok(TokenSet {
			access_token,
			refresh_token: self.refresh_token,
			expires_at,
			scope: self.scope,
			token_type: TokenType::Bearer,
		})
	}
}

impl From<String> for TokenSecret {
	fn from(value: String) -> Self {
		Self(value)
	}
}
impl From<&str> for TokenSecret {
	fn from(value: &str) -> Self {
		Self(value.to_owned())
	}
}

/// Successful token endpoint response after validation, before expiry bookkeeping.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Newly issued refresh token; `None` means the previous one stays valid.
	pub refresh_token: Option<TokenSecret>,
	/// Lifetime reported by `expires_in`.
	pub expires_in: Duration,
	/// Scopes echoed by the provider, if any.
	pub scope: Option<ScopeSet>,
}
