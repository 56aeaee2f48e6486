use anyhow::Result;
use log::{error, warn};
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;

use crate::addr::DocAddr;
use crate::archive::{EpubArchive, EpubZipArchive};
use crate::common::{encode_u32_vector, plain_text, progress_percent, try_decode_u32_vector};
use crate::doc_index::EpubDocIndex;
use crate::error::EpubError;
use crate::iter::EPubTokenIter;
use crate::metadata::{self, APPLICATION_XHTML_XML, APPLICATION_X_DTBNCX_XML, EPUB_CONTAINER_PATH};
use crate::toc_index::EpubTocIndex;

const DOC_WIDTHS_CACHE_KEY: &str = "doc_widths";

/// One user-visible table-of-contents row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TocItem {
	pub display_name: String,
	pub indent_level: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TocPosition {
	pub toc_index: u32,
	pub percent: u32,
}

/// Per-book persistence the reader flushes its widths cache through.
/// Values are opaque strings scoped by the book id.
pub trait DocReaderCache {
	fn read(&self, book_id: &str, key: &str) -> Option<String>;
	fn write(&mut self, book_id: &str, key: &str, value: String);
}

struct OpenState {
	archive: Rc<dyn EpubArchive>,
	package_md5: String,
	doc_index: Rc<EpubDocIndex>,
	toc_index: EpubTocIndex,
	user_toc: Vec<TocItem>,
}

/// The reader façade: composes archive, indices and caches. All
/// methods on a closed (or failed) reader return defaulted data.
pub struct EPubReader {
	path: PathBuf,
	state: Option<OpenState>,
}

impl EPubReader {
	#[inline]
	pub fn new(path: impl Into<PathBuf>) -> Self
	{
		EPubReader { path: path.into(), state: None }
	}

	/// Open the book and build its indices. Returns false on a fatal
	/// condition (unreadable zip, encrypted book, no rootfile, broken
	/// package document); idempotent on an already-open reader.
	pub fn open(&mut self, cache: &mut dyn DocReaderCache) -> bool
	{
		if self.state.is_some() {
			return true;
		}
		match self.try_open(cache) {
			Ok(state) => {
				self.state = Some(state);
				true
			}
			Err(e) => {
				error!("failed to open {}: {}", self.path.display(), e);
				false
			}
		}
	}

	fn try_open(&self, cache: &mut dyn DocReaderCache) -> Result<OpenState>
	{
		let file = File::open(&self.path)
			.map_err(|e| EpubError::ZipOpen {
				path: self.path.display().to_string(),
				reason: e.to_string(),
			})?;
		let archive = EpubZipArchive::new(file)
			.map_err(|e| EpubError::ZipOpen {
				path: self.path.display().to_string(),
				reason: e.to_string(),
			})?;
		if archive.is_encrypted() {
			return Err(EpubError::Encrypted.into());
		}
		let archive: Rc<dyn EpubArchive> = Rc::new(archive);

		let container_xml = archive.string(EPUB_CONTAINER_PATH)
			.map_err(|_| EpubError::InvalidContainer)?;
		let rootfile_path = metadata::parse_rootfile_path(&container_xml)?;

		let package_xml = archive.content(&rootfile_path)
			.map_err(|_| EpubError::InvalidPackage {
				path: rootfile_path.clone(),
				reason: String::from("unreadable"),
			})?;
		let package_md5 = format!("{:x}", md5::compute(&package_xml));
		let package_text = plain_text(package_xml, false)
			.map_err(|e| EpubError::InvalidPackage {
				path: rootfile_path.clone(),
				reason: e.to_string(),
			})?;
		let package = metadata::parse_package_contents(&rootfile_path, &package_text)?;

		// toc: ncx first, nav document as fallback
		let mut navmap = vec![];
		if let Some(toc_id) = &package.toc_id {
			match package.id_to_manifest_item.get(toc_id) {
				Some(item) if item.media_type == APPLICATION_X_DTBNCX_XML => {
					match archive.string(&item.href_absolute)
						.and_then(|xml| metadata::parse_ncx(&item.href_absolute, &xml))
					{
						Ok(points) => navmap = points,
						Err(e) => warn!("{}", e),
					}
				}
				_ => warn!("toc document id {} missing or of unknown media type", toc_id),
			}
		}
		if navmap.is_empty() {
			let nav_item = package.id_to_manifest_item
				.values()
				.find(|item| item.media_type == APPLICATION_XHTML_XML
					&& item.properties.as_deref().map_or(false, |p| p.contains("nav")));
			if let Some(item) = nav_item {
				match archive.string(&item.href_absolute)
					.and_then(|xml| metadata::parse_nav_doc(&item.href_absolute, &xml))
				{
					Ok(points) => navmap = points,
					Err(e) => warn!("{}", e),
				}
			}
		}

		// widths cache, keyed by the package md5
		let spine_size = package.spine_ids.len();
		let mut doc_widths = vec![];
		let mut cache_is_valid = false;
		if let Some(encoded) = cache.read(&package_md5, DOC_WIDTHS_CACHE_KEY) {
			match try_decode_u32_vector(&encoded) {
				Some(widths) if widths.len() == spine_size && !widths.is_empty() => {
					doc_widths = widths;
					cache_is_valid = true;
				}
				_ => warn!("stale widths cache for {}, recomputing", package_md5),
			}
		}

		let doc_index = Rc::new(
			EpubDocIndex::new(&package, archive.clone(), doc_widths));
		let toc_index = EpubTocIndex::new(&package, navmap, doc_index.clone());

		if !cache_is_valid {
			let widths: Vec<u32> = (0..doc_index.spine_size())
				.map(|i| doc_index.address_width(i))
				.collect();
			cache.write(&package_md5, DOC_WIDTHS_CACHE_KEY, encode_u32_vector(&widths));
		}

		let user_toc = (0..toc_index.toc_size())
			.map(|i| TocItem {
				display_name: toc_index.toc_item_display_name(i).to_owned(),
				indent_level: toc_index.toc_item_indent_level(i),
			})
			.collect();

		Ok(OpenState { archive, package_md5, doc_index, toc_index, user_toc })
	}

	#[inline]
	pub fn is_open(&self) -> bool
	{
		self.state.is_some()
	}

	/// The per-book id: md5 of the raw package document bytes.
	pub fn get_id(&self) -> &str
	{
		self.state.as_ref().map_or("", |state| state.package_md5.as_str())
	}

	pub fn get_table_of_contents(&self) -> &[TocItem]
	{
		self.state.as_ref().map_or(&[], |state| state.user_toc.as_slice())
	}

	pub fn get_toc_position(&self, address: DocAddr) -> TocPosition
	{
		match &self.state {
			Some(state) => {
				let (pos, size) = state.toc_index.get_toc_item_progress(address);
				TocPosition {
					toc_index: state.toc_index.get_toc_item_index(address).unwrap_or(0),
					percent: progress_percent(pos, size),
				}
			}
			None => TocPosition { toc_index: 0, percent: 100 },
		}
	}

	pub fn get_toc_item_address(&self, toc_index: u32) -> DocAddr
	{
		self.state
			.as_ref()
			.map_or(DocAddr::default(), |state| state.toc_index.get_toc_item_address(toc_index))
	}

	pub fn get_global_progress_percent(&self, address: DocAddr) -> u32
	{
		match &self.state {
			Some(state) => {
				let (pos, size) = state.toc_index.get_global_progress(address);
				progress_percent(pos, size)
			}
			None => 100,
		}
	}

	/// A shared cursor anchored at `address`; stays valid across any
	/// further read-only use of this reader.
	pub fn get_iter(&self, address: DocAddr) -> Option<EPubTokenIter>
	{
		self.state
			.as_ref()
			.map(|state| EPubTokenIter::new(state.doc_index.clone(), address))
	}

	/// Raw bytes of an archive entry; empty when absent or unreadable.
	pub fn load_resource(&self, path: &str) -> Vec<u8>
	{
		match &self.state {
			Some(state) => match state.archive.content(path) {
				Ok(bytes) => bytes,
				Err(e) => {
					warn!("failed load resource {}: {}", path, e);
					vec![]
				}
			},
			None => vec![],
		}
	}
}
