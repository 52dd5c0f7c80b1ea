// self
use crate::{_prelude::*, auth::ScopeSet, error::ConfigError, retry::RetryPolicy};

const DEFAULT_SAFETY_MARGIN_SECS: u32 = 60;

/// Client registration and session tuning loaded by the host application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
	/// Public client identifier registered with Spotify.
	pub client_id: String,
	/// Redirect URI registered for the client; the callback lands here.
	pub redirect_uri: Url,
	/// Scopes requested at login.
	#[serde(default)]
	pub scope: ScopeSet,
	/// Seconds subtracted from `expires_in` so a token is refreshed before the provider rejects it.
	#[serde(default = "default_safety_margin_secs")]
	pub safety_margin_secs: u32,
	/// Backoff applied to token endpoint calls that fail at the transport level.
	#[serde(default)]
	pub retry: RetryPolicy,
}
impl SessionConfig {
	/// Creates a config with no scopes, the default safety margin, and the default retry policy.
	pub fn new(client_id: impl Into<String>, redirect_uri: Url) -> Self {
		Self {
			client_id: client_id.into(),
			redirect_uri,
			scope: ScopeSet::default(),
			safety_margin_secs: DEFAULT_SAFETY_MARGIN_SECS,
			retry: RetryPolicy::default(),
		}
	}

	/// Replaces the requested scopes.
	pub fn with_scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}

	/// Replaces the retry policy.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Replaces the expiry safety margin.
	pub fn with_safety_margin_secs(mut self, secs: u32) -> Self {
		self.safety_margin_secs = secs;

		self
	}

	/// Safety margin as a [`Duration`].
	pub fn safety_margin(&self) -> Duration {
		Duration::seconds(i64::from(self.safety_margin_secs))
	}

	/// Checks the values the provider would reject anyway.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.client_id.is_empty() || self.client_id.chars().any(char::is_whitespace) {
			return Err(ConfigError::InvalidClientId);
		}
		if self.redirect_uri.fragment().is_some() {
			return Err(ConfigError::InvalidRedirect {
				reason: "redirect URI must not contain a fragment".into(),
			});
		}
		if self.redirect_uri.cannot_be_a_base() {
			return Err(ConfigError::InvalidRedirect {
				reason: "redirect URI must be hierarchical".into(),
			});
		}

		Ok(())
	}
}

fn default_safety_margin_secs() -> u32 {
	DEFAULT_SAFETY_MARGIN_SECS
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn redirect(raw: &str) -> Url {
		Url::parse(raw).expect("Redirect fixture should parse.")
	}

	#[test]
	fn config_deserializes_with_defaults() {
		let config: SessionConfig = serde_json::from_str(
			r#"{"client_id":"abc123","redirect_uri":"http://127.0.0.1:8888/callback","scope":["user-library-read"]}"#,
		)
		.expect("Minimal config should deserialize.");

		assert_eq!(config.safety_margin(), Duration::seconds(60));
		assert_eq!(config.retry, RetryPolicy::default());
		assert!(config.scope.contains("user-library-read"));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn invalid_values_are_rejected() {
		let callback = redirect("http://127.0.0.1:8888/callback");

		assert!(matches!(
			SessionConfig::new("", callback.clone()).validate(),
			Err(ConfigError::InvalidClientId)
		));
		assert!(matches!(
			SessionConfig::new("abc 123", callback).validate(),
			Err(ConfigError::InvalidClientId)
		));
		assert!(matches!(
			SessionConfig::new("abc123", redirect("http://127.0.0.1:8888/callback#frag")).validate(),
			Err(ConfigError::InvalidRedirect { .. })
		));
	}
}
