//! PKCE verifier/challenge generation and the CSRF nonce bound to each authorization attempt.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{CryptoRng, Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Unreserved URL characters allowed in a code verifier (RFC 7636 section 4.1).
const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const VERIFIER_LEN: usize = 64;
const VERIFIER_MIN_LEN: usize = 43;
const VERIFIER_MAX_LEN: usize = 128;
const NONCE_LEN: usize = 32;

/// Errors raised when adopting an externally supplied verifier.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum PkceError {
	/// Verifier length falls outside `43..=128`.
	#[error("Code verifier must be 43 to 128 characters long, got {len}.")]
	InvalidLength {
		/// Observed length.
		len: usize,
	},
	/// Verifier contains a character outside the unreserved set.
	#[error("Code verifier contains a character outside the unreserved set.")]
	InvalidCharacter,
}

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	#[default]
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Secret half of a PKCE pair; only ever sent to the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);
impl PkceVerifier {
	/// Returns the raw verifier. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for PkceVerifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("PkceVerifier").field(&"<redacted>").finish()
	}
}

/// Verifier plus the S256 challenge derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PkcePair {
	verifier: PkceVerifier,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	/// Adopts an existing verifier after checking the RFC 7636 length and charset rules.
	pub fn from_verifier(verifier: impl Into<String>) -> Result<Self, PkceError> {
		let verifier = verifier.into();

		if !(VERIFIER_MIN_LEN..=VERIFIER_MAX_LEN).contains(&verifier.len()) {
			return Err(PkceError::InvalidLength { len: verifier.len() });
		}
		if !verifier.bytes().all(|b| UNRESERVED.contains(&b)) {
			return Err(PkceError::InvalidCharacter);
		}

		let challenge = challenge_for(&verifier);

		Ok(Self { verifier: PkceVerifier(verifier), challenge, method: PkceCodeChallengeMethod::S256 })
	}

	/// Secret verifier sent as `code_verifier` during the exchange.
	pub fn verifier(&self) -> &PkceVerifier {
		&self.verifier
	}

	/// Public challenge placed in the authorize URL.
	pub fn challenge(&self) -> &str {
		&self.challenge
	}

	/// Challenge method (always `S256`).
	pub fn method(&self) -> PkceCodeChallengeMethod {
		self.method
	}
}

/// Single-use `state` value guarding the redirect against cross-site request forgery.
#[derive(Clone, PartialEq, Eq)]
pub struct CsrfNonce(String);
impl CsrfNonce {
	/// Returns the nonce as sent in the `state` parameter.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Compares the returned `state` byte-for-byte without exiting early on the first difference.
	pub fn matches(&self, returned: &str) -> bool {
		let expected = self.0.as_bytes();
		let returned = returned.as_bytes();

		if expected.len() != returned.len() {
			return false;
		}

		expected.iter().zip(returned).fold(0_u8, |acc, (a, b)| acc | (a ^ b)) == 0
	}
}
impl Debug for CsrfNonce {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("CsrfNonce").field(&self.0).finish()
	}
}

/// Generates a fresh PKCE pair and CSRF nonce from the thread-local CSPRNG.
pub fn generate() -> (PkcePair, CsrfNonce) {
	generate_with(&mut rand::rng())
}

/// Generates a fresh PKCE pair and CSRF nonce from the provided cryptographic RNG.
pub fn generate_with<R>(rng: &mut R) -> (PkcePair, CsrfNonce)
where
	R: CryptoRng,
{
	let verifier = (0..VERIFIER_LEN)
		.map(|_| char::from(UNRESERVED[rng.random_range(0..UNRESERVED.len())]))
		.collect::<String>();
	let nonce = (0..NONCE_LEN).map(|_| char::from(rng.sample(Alphanumeric))).collect::<String>();
	let challenge = challenge_for(&verifier);

	(
		PkcePair { verifier: PkceVerifier(verifier), challenge, method: PkceCodeChallengeMethod::S256 },
		CsrfNonce(nonce),
	)
}

fn challenge_for(verifier: &str) -> String {
	let digest = Sha256::digest(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(digest)
}
