use std::rc::Rc;

use crate::addr::DocAddr;
use crate::doc_index::EpubDocIndex;
use crate::token::DocToken;

/// Bidirectional cursor over the virtual concatenation of all chapter
/// token streams. Cheap to clone; clones share the underlying index, so
/// a handle stays valid for as long as any holder keeps it.
#[derive(Clone)]
pub struct EPubTokenIter {
	index: Rc<EpubDocIndex>,
	/// `chapter == spine_size` means past the last token
	chapter: u32,
	token: u32,
}

impl EPubTokenIter {
	pub fn new(index: Rc<EpubDocIndex>, address: DocAddr) -> Self
	{
		let mut iter = EPubTokenIter { index, chapter: 0, token: 0 };
		iter.seek(address);
		iter
	}

	/// Position on the token whose half-open address interval contains
	/// `address`; past-the-chapter addresses land on the next non-empty
	/// chapter, past-the-book addresses clamp to the end.
	pub fn seek(&mut self, address: DocAddr)
	{
		let chapter = address.chapter();
		if chapter >= self.index.spine_size() {
			self.to_end();
			return;
		}
		let offset = address.offset();
		let tokens = self.index.tokens(chapter);
		let pos = tokens
			.partition_point(|t| t.address().offset() + t.width() <= offset);
		if pos < tokens.len() {
			self.chapter = chapter;
			self.token = pos as u32;
		} else {
			self.first_token_from(chapter + 1);
		}
	}

	#[inline]
	pub fn current(&self) -> Option<&DocToken>
	{
		if self.chapter >= self.index.spine_size() {
			return None;
		}
		self.index.tokens(self.chapter).get(self.token as usize)
	}

	/// Step forward one token, skipping empty chapters. Returns the new
	/// current token, or none when the end is reached.
	pub fn advance(&mut self) -> Option<&DocToken>
	{
		if self.chapter >= self.index.spine_size() {
			return None;
		}
		if self.token + 1 < self.index.token_count(self.chapter) {
			self.token += 1;
		} else {
			self.first_token_from(self.chapter + 1);
		}
		self.current()
	}

	/// Step back one token, skipping empty chapters. Returns the new
	/// current token, or none when already at the first token.
	pub fn retreat(&mut self) -> Option<&DocToken>
	{
		if self.token > 0 {
			self.token -= 1;
			return self.current();
		}
		let mut chapter = self.chapter;
		while chapter > 0 {
			chapter -= 1;
			let count = self.index.token_count(chapter);
			if count > 0 {
				self.chapter = chapter;
				self.token = count - 1;
				return self.current();
			}
		}
		None
	}

	/// Address of the current token, or one past the last token when at
	/// the end.
	pub fn address(&self) -> DocAddr
	{
		match self.current() {
			Some(token) => token.address(),
			None => {
				let spine_size = self.index.spine_size();
				if spine_size == 0 {
					DocAddr::default()
				} else {
					let last = spine_size - 1;
					DocAddr::new(last, self.index.address_width(last))
				}
			}
		}
	}

	fn first_token_from(&mut self, mut chapter: u32)
	{
		let spine_size = self.index.spine_size();
		while chapter < spine_size {
			if !self.index.empty(chapter) {
				self.chapter = chapter;
				self.token = 0;
				return;
			}
			chapter += 1;
		}
		self.to_end();
	}

	#[inline]
	fn to_end(&mut self)
	{
		self.chapter = self.index.spine_size();
		self.token = 0;
	}
}
