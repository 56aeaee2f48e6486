use elsa::FrozenMap;
use log::{error, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::addr::DocAddr;
use crate::archive::EpubArchive;
use crate::metadata::{PackageContents, APPLICATION_XHTML_XML};
use crate::token::DocToken;
use crate::xhtml::{parse_xhtml_tokens, ChapterTokens};

/// One spine slot. A slot whose id is missing from the manifest or not
/// an XHTML item keeps its index but never yields tokens.
struct SpineRecord {
	zip_path: Option<String>,
}

/// Lazy per-chapter token index over the spine.
///
/// The accessors look read-only but populate caches behind the scenes,
/// so an index (and everything holding one) belongs to a single logical
/// caller at a time; parallel readers each build their own.
pub struct EpubDocIndex {
	archive: Rc<dyn EpubArchive>,
	entries: Vec<SpineRecord>,
	chapters: FrozenMap<u32, Box<ChapterTokens>>,
	widths: RefCell<Vec<Option<u32>>>,
	empty_chapter: ChapterTokens,
}

impl EpubDocIndex {
	/// `doc_widths` is adopted as the widths cache only when its length
	/// matches the spine.
	pub fn new(package: &PackageContents, archive: Rc<dyn EpubArchive>,
		doc_widths: Vec<u32>) -> Self
	{
		let mut entries = Vec::with_capacity(package.spine_ids.len());
		for doc_id in &package.spine_ids {
			let zip_path = match package.id_to_manifest_item.get(doc_id) {
				Some(item) if item.media_type == APPLICATION_XHTML_XML =>
					Some(item.href_absolute.clone()),
				_ => {
					warn!("skipping spine doc {} in manifest", doc_id);
					None
				}
			};
			entries.push(SpineRecord { zip_path });
		}

		let widths = if doc_widths.len() == entries.len() {
			doc_widths.into_iter().map(Some).collect()
		} else {
			vec![None; entries.len()]
		};
		EpubDocIndex {
			archive,
			entries,
			chapters: FrozenMap::new(),
			widths: RefCell::new(widths),
			empty_chapter: ChapterTokens::empty(),
		}
	}

	fn ensure_cached(&self, spine_index: u32) -> &ChapterTokens
	{
		let record = match self.entries.get(spine_index as usize) {
			Some(record) => record,
			None => {
				error!("requested tokens in invalid spine index: {}", spine_index);
				return &self.empty_chapter;
			}
		};
		if let Some(chapter) = self.chapters.get(&spine_index) {
			return chapter;
		}
		let chapter = match &record.zip_path {
			None => ChapterTokens::empty(),
			Some(zip_path) => match self.archive.content(zip_path) {
				Ok(bytes) if !bytes.is_empty() => {
					let chapter = parse_xhtml_tokens(bytes, zip_path, spine_index);
					if chapter.tokens.is_empty() {
						warn!("no tokens in chapter {}", zip_path);
					}
					chapter
				}
				_ => {
					error!("unable to read spine item {}", zip_path);
					ChapterTokens::empty()
				}
			},
		};
		self.chapters.insert(spine_index, Box::new(chapter))
	}

	#[inline]
	pub fn spine_size(&self) -> u32
	{
		self.entries.len() as u32
	}

	#[inline]
	pub fn token_count(&self, spine_index: u32) -> u32
	{
		self.ensure_cached(spine_index).tokens.len() as u32
	}

	#[inline]
	pub fn empty(&self, spine_index: u32) -> bool
	{
		self.token_count(spine_index) == 0
	}

	/// Address units in the chapter: the cached value if present, else
	/// the last token's end offset, memoized.
	pub fn address_width(&self, spine_index: u32) -> u32
	{
		let i = spine_index as usize;
		if i >= self.entries.len() {
			return 0;
		}
		if let Some(width) = self.widths.borrow()[i] {
			return width;
		}
		let width = match self.ensure_cached(spine_index).tokens.last() {
			Some(last) => last.address().offset() + last.width(),
			None => 0,
		};
		self.widths.borrow_mut()[i] = Some(width);
		width
	}

	#[inline]
	pub fn tokens(&self, spine_index: u32) -> &[DocToken]
	{
		&self.ensure_cached(spine_index).tokens
	}

	#[inline]
	pub fn elem_id_to_address(&self, spine_index: u32) -> &HashMap<String, DocAddr>
	{
		&self.ensure_cached(spine_index).id_to_addr
	}
}
