use log::warn;
use std::cmp::min;
use std::collections::HashMap;
use std::rc::Rc;

use crate::addr::DocAddr;
use crate::doc_index::EpubDocIndex;
use crate::metadata::{NavPoint, PackageContents};

struct TocEntry {
	display_name: String,
	indent_level: u32,
	address: DocAddr,
}

/// Flattened, addressed table of contents. Built after the doc index
/// and consults it for fragment anchors and chapter widths; shares it
/// through `Rc` under the single-caller contract of `EpubDocIndex`.
pub struct EpubTocIndex {
	doc: Rc<EpubDocIndex>,
	entries: Vec<TocEntry>,
}

impl EpubTocIndex {
	pub fn new(package: &PackageContents, navmap: Vec<NavPoint>,
		doc: Rc<EpubDocIndex>) -> Self
	{
		let mut href_to_spine = HashMap::new();
		for (i, doc_id) in package.spine_ids.iter().enumerate() {
			if let Some(item) = package.id_to_manifest_item.get(doc_id) {
				href_to_spine.entry(item.href_absolute.as_str()).or_insert(i as u32);
			}
		}

		let mut entries = vec![];
		for point in navmap {
			let src_file = match &point.src_file {
				Some(src_file) => src_file,
				None => {
					warn!("toc entry {:?} has no target, dropped", point.label);
					continue;
				}
			};
			let chapter = match href_to_spine.get(src_file.as_str()) {
				Some(chapter) => *chapter,
				None => {
					warn!("toc target {} not on spine, dropped", src_file);
					continue;
				}
			};
			let address = match &point.src_anchor {
				Some(anchor) => match doc.elem_id_to_address(chapter).get(anchor) {
					Some(address) => *address,
					None => {
						warn!("unknown fragment {}#{}", src_file, anchor);
						DocAddr::from_chapter(chapter)
					}
				},
				None => DocAddr::from_chapter(chapter),
			};
			let display_name = match point.label {
				Some(label) => label,
				None => src_file.clone(),
			};
			entries.push(TocEntry {
				display_name,
				indent_level: point.level,
				address,
			});
		}
		EpubTocIndex { doc, entries }
	}

	#[inline]
	pub fn toc_size(&self) -> u32
	{
		self.entries.len() as u32
	}

	pub fn toc_item_display_name(&self, toc_index: u32) -> &str
	{
		self.entries
			.get(toc_index as usize)
			.map_or("", |entry| entry.display_name.as_str())
	}

	pub fn toc_item_indent_level(&self, toc_index: u32) -> u32
	{
		self.entries
			.get(toc_index as usize)
			.map_or(0, |entry| entry.indent_level)
	}

	pub fn get_toc_item_address(&self, toc_index: u32) -> DocAddr
	{
		self.entries
			.get(toc_index as usize)
			.map_or(DocAddr::default(), |entry| entry.address)
	}

	/// Last TOC item whose address is at or before `address`. Entry
	/// addresses are scanned in document order: they need not be
	/// strictly monotone once unknown fragments degrade to chapter
	/// starts.
	pub fn get_toc_item_index(&self, address: DocAddr) -> Option<u32>
	{
		let mut found = None;
		for (i, entry) in self.entries.iter().enumerate() {
			if entry.address <= address {
				found = Some(i as u32);
			}
		}
		found
	}

	/// Position within the enclosing TOC item: offset from the item's
	/// address, and the span up to the next item (or end of book).
	pub fn get_toc_item_progress(&self, address: DocAddr) -> (u32, u32)
	{
		match self.get_toc_item_index(address) {
			Some(i) => {
				let start = self.entries[i as usize].address;
				let end = self.entries
					.get(i as usize + 1)
					.map_or(self.end_of_book(), |next| next.address);
				(self.address_units(start, address), self.address_units(start, end))
			}
			None => {
				if self.entries.is_empty() {
					return (0, 0);
				}
				// before the first item: measure against the book start
				let start = DocAddr::default();
				let end = self.entries[0].address;
				(self.address_units(start, address), self.address_units(start, end))
			}
		}
	}

	/// Address units read so far and the whole book's width.
	pub fn get_global_progress(&self, address: DocAddr) -> (u32, u32)
	{
		let spine_size = self.doc.spine_size();
		let chapter = address.chapter();
		let mut pos = 0;
		let mut size = 0;
		for i in 0..spine_size {
			let width = self.doc.address_width(i);
			if i < chapter {
				pos += width;
			} else if i == chapter {
				pos += min(address.offset(), width);
			}
			size += width;
		}
		if chapter >= spine_size {
			pos = size;
		}
		(pos, size)
	}

	/// One past the last token of the book.
	pub fn end_of_book(&self) -> DocAddr
	{
		let spine_size = self.doc.spine_size();
		if spine_size == 0 {
			DocAddr::default()
		} else {
			let last = spine_size - 1;
			DocAddr::new(last, self.doc.address_width(last))
		}
	}

	/// Span between two addresses in address units, crossing chapters
	/// by their cached widths.
	fn address_units(&self, from: DocAddr, to: DocAddr) -> u32
	{
		if to <= from {
			return 0;
		}
		let from_chapter = from.chapter();
		let to_chapter = to.chapter();
		if from_chapter == to_chapter {
			return to.offset() - from.offset();
		}
		let mut units = self.doc
			.address_width(from_chapter)
			.saturating_sub(from.offset());
		for i in from_chapter + 1..to_chapter {
			units += self.doc.address_width(i);
		}
		units + min(to.offset(), self.doc.address_width(to_chapter))
	}
}
