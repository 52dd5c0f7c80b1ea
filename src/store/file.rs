//! File-backed [`TokenStore`] that survives process restarts.

// std
use std::{
	ffi::OsString,
	fs::{self, File, OpenOptions},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
	process,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use fs2::FileExt;
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	obs,
	store::{DEFAULT_STORAGE_KEY, StoreError, StoreFuture, TokenStore},
};

type Records = Map<String, Value>;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persists the token set as one entry of a JSON object keyed by storage key.
///
/// Several application instances may share a file by using distinct keys, whether they live in one
/// process or several. Every mutation holds an exclusive advisory lock on a `<file>.lock` sibling
/// for its read-modify-write and rewrites the whole file through a uniquely named temporary sibling
/// and a rename, so readers see either the previous or the next document.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	key: String,
}
impl FileStore {
	/// Opens a store at the provided path, creating the parent directory when missing.
	///
	/// The file itself is created lazily on the first save.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		Ok(Self { path, key: DEFAULT_STORAGE_KEY.into() })
	}

	/// Overrides the storage key used to scope the record to one application instance.
	pub fn with_key(mut self, key: impl Into<String>) -> Self {
		self.key = key.into();

		self
	}

	/// Path of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Storage key of the record.
	pub fn key(&self) -> &str {
		&self.key
	}

	fn read_records(&self) -> Result<Option<Records>, StoreError> {
		let bytes = match fs::read(&self.path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) =>
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", self.path.display()),
				}),
		};

		if bytes.is_empty() {
			return Ok(None);
		}

		match serde_json::from_slice::<Records>(&bytes) {
			Ok(records) => Ok(Some(records)),
			Err(e) => {
				obs::warn_event(
					"store",
					&format_args!("Ignoring unreadable store file {}: {e}.", self.path.display()),
				);

				Ok(None)
			},
		}
	}

	fn load_now(&self) -> Result<Option<TokenSet>, StoreError> {
		let Some(mut records) = self.read_records()? else {
			return Ok(None);
		};
		let Some(value) = records.remove(&self.key) else {
			return Ok(None);
		};

		match serde_json::from_value::<TokenSet>(value) {
			Ok(tokens) => Ok(Some(tokens)),
			Err(e) => {
				obs::warn_event(
					"store",
					&format_args!("Treating corrupted record {} as absent: {e}.", self.key),
				);

				Ok(None)
			},
		}
	}

	fn mutate_now(&self, entry: Option<Value>) -> Result<(), StoreError> {
		let _lock = self.lock_exclusive()?;
		let mut records = self.read_records()?.unwrap_or_default();

		match entry {
			Some(value) => {
				records.insert(self.key.clone(), value);
			},
			None =>
				if records.remove(&self.key).is_none() {
					return Ok(());
				},
		}

		self.persist(&records)
	}

	fn persist(&self, records: &Records) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized = serde_json::to_vec_pretty(records).map_err(|e| {
			StoreError::Serialization { message: format!("Failed to serialize store file: {e}") }
		})?;
		let tmp_path = self.sibling(&format!(
			"{}.{}.tmp",
			process::id(),
			TMP_SEQ.fetch_add(1, Ordering::Relaxed)
		));

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| {
			let _ = fs::remove_file(&tmp_path);

			StoreError::Backend {
				message: format!("Failed to replace {}: {e}", self.path.display()),
			}
		})
	}

	// Blocks until no other store (in this process or another) is mutating the file. The lock is
	// released when the returned handle is dropped.
	fn lock_exclusive(&self) -> Result<File, StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let lock_path = self.sibling("lock");
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(false)
			.open(&lock_path)
			.map_err(|e| StoreError::Backend {
				message: format!("Failed to open {}: {e}", lock_path.display()),
			})?;

		file.lock_exclusive().map_err(|e| StoreError::Backend {
			message: format!("Failed to lock {}: {e}", lock_path.display()),
		})?;

		Ok(file)
	}

	// `<file>.<suffix>` next to the backing file.
	fn sibling(&self, suffix: &str) -> PathBuf {
		let mut name = self.path.file_name().map(OsString::from).unwrap_or_default();

		name.push(".");
		name.push(suffix);

		self.path.with_file_name(name)
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}
}
impl TokenStore for FileStore {
	fn save(&self, tokens: TokenSet) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let value = serde_json::to_value(&tokens).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize token set: {e}"),
			})?;

			self.mutate_now(Some(value))
		})
	}

	fn load(&self) -> StoreFuture<'_, Option<TokenSet>> {
		Box::pin(async move { self.load_now() })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate_now(None) })
	}
}
