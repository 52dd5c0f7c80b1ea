// self
use crate::{_prelude::*, error::ProtocolError};

/// Parsed query of the authorization redirect.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthorizationCallback {
	/// User approved; the code is ready for the exchange.
	Code {
		/// Single-use authorization code.
		code: String,
		/// Returned `state`, compared against the pending nonce.
		state: Option<String>,
	},
	/// User declined, or the provider refused the request.
	Denied {
		/// OAuth `error` code (`access_denied` when the user declines).
		error: String,
		/// Optional `error_description`.
		description: Option<String>,
		/// Returned `state`, if any.
		state: Option<String>,
	},
}
impl AuthorizationCallback {
	/// Reads `code`, `error`, `error_description`, and `state` from the redirect query.
	///
	/// An `error` parameter wins over a `code` parameter.
	pub fn from_redirect(redirect: &Url) -> Result<Self, ProtocolError> {
		let mut code = None;
		let mut error = None;
		let mut description = None;
		let mut state = None;

		for (key, value) in redirect.query_pairs() {
			let slot = match &*key {
				"code" => &mut code,
				"error" => &mut error,
				"error_description" => &mut description,
				"state" => &mut state,
				_ => continue,
			};

			if slot.is_none() {
				*slot = Some(value.into_owned());
			}
		}

		match (error, code) {
			(Some(error), _) => Ok(Self::Denied { error, description, state }),
			(None, Some(code)) if !code.is_empty() => Ok(Self::Code { code, state }),
			_ => Err(ProtocolError::MalformedCallback),
		}
	}

	/// Returned `state`, if any.
	pub fn state(&self) -> Option<&str> {
		match self {
			Self::Code { state, .. } | Self::Denied { state, .. } => state.as_deref(),
		}
	}
}
impl Debug for AuthorizationCallback {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Code { state, .. } => f
				.debug_struct("Code")
				.field("code", &"<redacted>")
				.field("state", state)
				.finish(),
			Self::Denied { error, description, state } => f
				.debug_struct("Denied")
				.field("error", error)
				.field("description", description)
				.field("state", state)
				.finish(),
		}
	}
}
