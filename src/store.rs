use anyhow::Result;
use log::error;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::addr::DocAddr;
use crate::reader::DocReaderCache;
use crate::store::key_value::{load_key_value, write_key_value};

mod key_value;

const SETTINGS_FILE: &str = "settings.txt";
const ACTIVITY_FILE: &str = "activity.txt";
const BOOK_DATA_DIR: &str = "books";

const ACTIVITY_KEY_BROWSE_PATH: &str = "current_browse_path";
const ACTIVITY_KEY_BOOK_PATH: &str = "current_book_path";
const BOOK_KEY_ADDRESS: &str = "address";

/// On-disk state under one base directory: generic settings, browse
/// activity, and one cache file per book keyed by the package md5. All
/// writes stay in memory until `flush`; only dirty artifacts are
/// rewritten.
pub struct StateStore {
	settings_path: PathBuf,
	activity_path: PathBuf,
	book_data_dir: PathBuf,

	settings: HashMap<String, String>,
	settings_dirty: bool,

	activity: HashMap<String, String>,
	activity_dirty: bool,

	// loaded lazily, first read of each book
	book_caches: RefCell<HashMap<String, HashMap<String, String>>>,
	book_dirty: HashSet<String>,
}

impl StateStore {
	pub fn new(base_dir: impl Into<PathBuf>) -> Self
	{
		let base_dir = base_dir.into();
		let settings_path = base_dir.join(SETTINGS_FILE);
		let activity_path = base_dir.join(ACTIVITY_FILE);
		let settings = load_key_value(&settings_path);
		let activity = load_key_value(&activity_path);
		StateStore {
			settings_path,
			activity_path,
			book_data_dir: base_dir.join(BOOK_DATA_DIR),
			settings,
			settings_dirty: false,
			activity,
			activity_dirty: false,
			book_caches: RefCell::new(HashMap::new()),
			book_dirty: HashSet::new(),
		}
	}

	/// Conventional state location for a consumer of this crate.
	pub fn default_base_dir(app_name: &str) -> Option<PathBuf>
	{
		Some(dirs::data_dir()?.join(app_name))
	}

	// generic settings

	pub fn get_setting(&self, name: &str) -> Option<&str>
	{
		self.settings.get(name).map(|v| v.as_str())
	}

	pub fn set_setting(&mut self, name: &str, value: impl Into<String>)
	{
		let value = value.into();
		if self.settings.get(name) != Some(&value) {
			self.settings.insert(name.to_owned(), value);
			self.settings_dirty = true;
		}
	}

	// activity

	#[inline]
	pub fn get_current_browse_path(&self) -> Option<&str>
	{
		self.activity.get(ACTIVITY_KEY_BROWSE_PATH).map(|v| v.as_str())
	}

	#[inline]
	pub fn set_current_browse_path(&mut self, path: impl Into<String>)
	{
		self.set_activity(ACTIVITY_KEY_BROWSE_PATH, Some(path.into()));
	}

	#[inline]
	pub fn remove_current_browse_path(&mut self)
	{
		self.set_activity(ACTIVITY_KEY_BROWSE_PATH, None);
	}

	#[inline]
	pub fn get_current_book_path(&self) -> Option<&str>
	{
		self.activity.get(ACTIVITY_KEY_BOOK_PATH).map(|v| v.as_str())
	}

	#[inline]
	pub fn set_current_book_path(&mut self, path: impl Into<String>)
	{
		self.set_activity(ACTIVITY_KEY_BOOK_PATH, Some(path.into()));
	}

	#[inline]
	pub fn remove_current_book_path(&mut self)
	{
		self.set_activity(ACTIVITY_KEY_BOOK_PATH, None);
	}

	fn set_activity(&mut self, key: &str, value: Option<String>)
	{
		let changed = match &value {
			Some(value) => self.activity.get(key) != Some(value),
			None => self.activity.contains_key(key),
		};
		if changed {
			match value {
				Some(value) => self.activity.insert(key.to_owned(), value),
				None => self.activity.remove(key),
			};
			self.activity_dirty = true;
		}
	}

	// per-book reading position

	pub fn get_book_address(&self, book_id: &str) -> Option<DocAddr>
	{
		self.book_value(book_id, BOOK_KEY_ADDRESS)
			.and_then(|value| DocAddr::try_decode(&value))
	}

	pub fn set_book_address(&mut self, book_id: &str, address: DocAddr)
	{
		self.set_book_value(book_id, BOOK_KEY_ADDRESS, address.encode());
	}

	fn book_cache_path(&self, book_id: &str) -> PathBuf
	{
		self.book_data_dir.join(format!("{}.txt", book_id))
	}

	fn book_value(&self, book_id: &str, key: &str) -> Option<String>
	{
		let mut caches = self.book_caches.borrow_mut();
		let cache = caches
			.entry(book_id.to_owned())
			.or_insert_with(|| load_key_value(&self.book_cache_path(book_id)));
		cache.get(key).cloned()
	}

	fn set_book_value(&mut self, book_id: &str, key: &str, value: String)
	{
		let mut caches = self.book_caches.borrow_mut();
		// load first so a partial update keeps the other keys
		let cache = caches
			.entry(book_id.to_owned())
			.or_insert_with(|| load_key_value(&self.book_cache_path(book_id)));
		if cache.get(key) != Some(&value) {
			cache.insert(key.to_owned(), value);
			self.book_dirty.insert(book_id.to_owned());
		}
	}

	/// Rewrite every dirty artifact. Clean artifacts are left untouched.
	pub fn flush(&mut self) -> Result<()>
	{
		if self.settings_dirty {
			write_key_value(&self.settings_path, &self.settings)?;
			self.settings_dirty = false;
		}
		if self.activity_dirty {
			write_key_value(&self.activity_path, &self.activity)?;
			self.activity_dirty = false;
		}
		let caches = self.book_caches.borrow();
		for book_id in self.book_dirty.drain() {
			if let Some(cache) = caches.get(&book_id) {
				write_key_value(&self.book_data_dir.join(format!("{}.txt", book_id)), cache)?;
			}
		}
		Ok(())
	}
}

impl DocReaderCache for StateStore {
	#[inline]
	fn read(&self, book_id: &str, key: &str) -> Option<String>
	{
		self.book_value(book_id, key)
	}

	#[inline]
	fn write(&mut self, book_id: &str, key: &str, value: String)
	{
		self.set_book_value(book_id, key, value);
	}
}

impl Drop for StateStore {
	fn drop(&mut self)
	{
		if let Err(e) = self.flush() {
			error!("failed to flush state store: {}", e);
		}
	}
}
