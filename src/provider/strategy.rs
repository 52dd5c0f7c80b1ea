//! Provider strategy hooks that classify token endpoint failures.
//!
//! Implementations work on plain data (status codes, OAuth fields, body previews) so the
//! classification never depends on a particular HTTP client.

// self
use crate::{_prelude::*, provider::descriptor::GrantType};

/// Strategy hook that lets providers classify token endpoint errors.
pub trait ProviderStrategy: Send + Sync {
	/// Maps an unsuccessful token endpoint response into the session taxonomy.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;
}

/// Canonical provider error categories used by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Provider rejected the grant (code reused or expired, verifier mismatch, spent refresh
	/// token). Never retried.
	InvalidGrant,
	/// Provider answered with something the client cannot use. Never retried.
	Rejected,
	/// Failure is temporary and may be retried with backoff.
	Transient,
}

/// Context passed to provider strategies when classifying token errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Grant type associated with the failing request.
	pub grant_type: GrantType,
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates a new context scoped to the provided grant type.
	pub fn new(grant_type: GrantType) -> Self {
		Self {
			grant_type,
			http_status: None,
			oauth_error: None,
			error_description: None,
			body_preview: None,
		}
	}

	/// Adds an HTTP status code (e.g., 400, 401, 500).
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a body preview for responses that are not OAuth error documents.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}

	/// Short human-readable summary used in error messages.
	pub fn summary(&self) -> String {
		match (&self.oauth_error, &self.error_description) {
			(Some(error), Some(description)) => format!("{error} ({description})"),
			(Some(error), None) => error.clone(),
			(None, _) => match (self.http_status, &self.body_preview) {
				(Some(status), Some(body)) if !body.is_empty() => format!("HTTP {status}: {body}"),
				(Some(status), _) => format!("HTTP {status}"),
				(None, Some(body)) => body.clone(),
				(None, None) => "no details".into(),
			},
		}
	}
}

/// Default strategy: only a `400` carrying `error=invalid_grant` is a grant rejection; every other
/// error response is a protocol failure.
///
/// Transport failures never reach the strategy; the transport mapper reports them as network
/// errors directly.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		match (ctx.http_status, ctx.oauth_error.as_deref()) {
			(Some(400), Some(error)) if error.eq_ignore_ascii_case("invalid_grant") =>
				ProviderErrorKind::InvalidGrant,
			_ => ProviderErrorKind::Rejected,
		}
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ProviderErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(ProviderErrorContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}
