use log::warn;
use quick_xml::events::{BytesRef, BytesStart, Event};
use std::collections::HashMap;

use crate::addr::DocAddr;
use crate::common::{concat_path, path_parent, plain_text};
use crate::token::{DocToken, IMAGE_ADDRESS_WIDTH};

/// Named entities seen in book XHTML, mapped to their characters.
/// The XML builtins (amp, lt, gt, apos, quot) are left for the reader.
/// Sorted, for binary search.
const XHTML_ENTITIES: [(&str, char); 38] = [
	("&bull;", '\u{2022}'),
	("&cent;", '\u{a2}'),
	("&copy;", '\u{a9}'),
	("&dagger;", '\u{2020}'),
	("&deg;", '\u{b0}'),
	("&divide;", '\u{f7}'),
	("&emsp;", '\u{2003}'),
	("&ensp;", '\u{2002}'),
	("&frac12;", '\u{bd}'),
	("&frac14;", '\u{bc}'),
	("&frac34;", '\u{be}'),
	("&hellip;", '\u{2026}'),
	("&iexcl;", '\u{a1}'),
	("&iquest;", '\u{bf}'),
	("&laquo;", '\u{ab}'),
	("&ldquo;", '\u{201c}'),
	("&lsaquo;", '\u{2039}'),
	("&lsquo;", '\u{2018}'),
	("&mdash;", '\u{2014}'),
	("&micro;", '\u{b5}'),
	("&middot;", '\u{b7}'),
	("&nbsp;", '\u{a0}'),
	("&ndash;", '\u{2013}'),
	("&para;", '\u{b6}'),
	("&permil;", '\u{2030}'),
	("&plusmn;", '\u{b1}'),
	("&pound;", '\u{a3}'),
	("&prime;", '\u{2032}'),
	("&raquo;", '\u{bb}'),
	("&rdquo;", '\u{201d}'),
	("&reg;", '\u{ae}'),
	("&rsaquo;", '\u{203a}'),
	("&rsquo;", '\u{2019}'),
	("&sect;", '\u{a7}'),
	("&shy;", '\u{ad}'),
	("&sup2;", '\u{b2}'),
	("&sup3;", '\u{b3}'),
	("&times;", '\u{d7}'),
];

const ENTITY_MAX_LEN: usize = 10;

/// Replace the named entities above with their characters so the XML
/// layer only ever sees builtins and numeric references.
pub(crate) fn preprocess_entities(xml: &str) -> String
{
	let mut text = String::with_capacity(xml.len());
	let mut entity = String::with_capacity(ENTITY_MAX_LEN);
	for ch in xml.chars() {
		if entity.is_empty() {
			if ch == '&' {
				entity.push('&');
			} else {
				text.push(ch);
			}
		} else if ch == ';' {
			entity.push(';');
			match XHTML_ENTITIES.binary_search_by(|(name, _)| (*name).cmp(entity.as_str())) {
				Ok(idx) => text.push(XHTML_ENTITIES[idx].1),
				Err(_) => text.push_str(&entity),
			}
			entity.clear();
		} else if ch == '&' {
			// false start, keep accumulating from the new ampersand
			text.push_str(&entity);
			entity.clear();
			entity.push('&');
		} else if entity.len() >= ENTITY_MAX_LEN || ch == '<' || ch.is_whitespace() {
			text.push_str(&entity);
			text.push(ch);
			entity.clear();
		} else {
			entity.push(ch);
		}
	}
	if !entity.is_empty() {
		text.push_str(&entity);
	}
	text
}

/// Resolve a general entity reference event to a character: the XML
/// builtins plus decimal and hex character references.
pub(crate) fn resolve_ref(r: &BytesRef) -> Option<char>
{
	let entity = String::from_utf8_lossy(r.as_ref());
	match entity.as_ref() {
		"amp" => return Some('&'),
		"lt" => return Some('<'),
		"gt" => return Some('>'),
		"apos" => return Some('\''),
		"quot" => return Some('"'),
		_ => {}
	}
	let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
		u32::from_str_radix(hex, 16).ok()?
	} else if let Some(dec) = entity.strip_prefix('#') {
		dec.parse().ok()?
	} else {
		return None;
	};
	char::from_u32(code)
}

pub struct ChapterTokens {
	pub tokens: Vec<DocToken>,
	pub id_to_addr: HashMap<String, DocAddr>,
}

impl ChapterTokens {
	#[inline]
	pub fn empty() -> Self
	{
		ChapterTokens { tokens: vec![], id_to_addr: HashMap::new() }
	}
}

/// Whitespace-collapsing text accumulator: runs of whitespace become a
/// single interior space, leading and trailing whitespace drop.
#[derive(Default)]
struct TextBuf {
	text: String,
	space_pending: bool,
}

impl TextBuf {
	fn push_char(&mut self, ch: char)
	{
		if ch.is_whitespace() {
			if !self.text.is_empty() {
				self.space_pending = true;
			}
		} else {
			if self.space_pending {
				self.text.push(' ');
				self.space_pending = false;
			}
			self.text.push(ch);
		}
	}

	fn push_str(&mut self, text: &str)
	{
		for ch in text.chars() {
			self.push_char(ch);
		}
	}

	#[inline]
	fn take(&mut self) -> String
	{
		self.space_pending = false;
		std::mem::take(&mut self.text)
	}
}

enum CollectKind {
	Header,
	ListItem(u32),
}

struct Collector {
	kind: CollectKind,
	buf: TextBuf,
}

/// What to undo when the matching end tag arrives.
enum Frame {
	Plain,
	Block,
	Skip,
	Head,
	List,
	HeaderEnd,
	ListItemEnd,
}

struct Tokenizer<'a> {
	chapter_index: u32,
	cwd: &'a str,
	offset: u32,
	tokens: Vec<DocToken>,
	id_to_addr: HashMap<String, DocAddr>,
	run: TextBuf,
	collector: Option<Collector>,
	stack: Vec<Frame>,
	skip_count: u32,
	head_count: u32,
	list_depth: u32,
}

impl<'a> Tokenizer<'a> {
	fn new(chapter_index: u32, cwd: &'a str) -> Self
	{
		Tokenizer {
			chapter_index,
			cwd,
			offset: 0,
			tokens: vec![],
			id_to_addr: HashMap::new(),
			run: TextBuf::default(),
			collector: None,
			stack: vec![],
			skip_count: 0,
			head_count: 0,
			list_depth: 0,
		}
	}

	#[inline]
	fn here(&self) -> DocAddr
	{
		DocAddr::new(self.chapter_index, self.offset)
	}

	fn emit(&mut self, token: DocToken)
	{
		self.offset += token.width();
		self.tokens.push(token);
	}

	fn flush_run(&mut self)
	{
		let text = self.run.take();
		if !text.is_empty() {
			let token = DocToken::Text { address: self.here(), text };
			self.emit(token);
		}
	}

	fn finish_collector(&mut self)
	{
		if let Some(mut collector) = self.collector.take() {
			let text = collector.buf.take();
			if text.is_empty() {
				return;
			}
			let token = match collector.kind {
				CollectKind::Header =>
					DocToken::Header { address: self.here(), text },
				CollectKind::ListItem(nest_level) =>
					DocToken::ListItem { address: self.here(), text, nest_level },
			};
			self.emit(token);
		}
	}

	fn push_text(&mut self, text: &str)
	{
		if self.skip_count > 0 {
			return;
		}
		if let Some(collector) = &mut self.collector {
			collector.buf.push_str(text);
		} else if self.head_count == 0 {
			self.run.push_str(text);
		}
	}

	fn push_char(&mut self, ch: char)
	{
		if self.skip_count > 0 {
			return;
		}
		if let Some(collector) = &mut self.collector {
			collector.buf.push_char(ch);
		} else if self.head_count == 0 {
			self.run.push_char(ch);
		}
	}

	fn emit_image(&mut self, e: &BytesStart)
	{
		let src = attr_value(e, b"src")
			.or_else(|| attr_value(e, b"href"));
		if let Some(src) = src {
			let token = DocToken::Image {
				address: self.here(),
				path: concat_path(self.cwd, &src),
			};
			debug_assert_eq!(token.width(), IMAGE_ADDRESS_WIDTH);
			self.emit(token);
		}
	}

	/// A paragraph break: close the current text run.
	fn line_break(&mut self)
	{
		if self.collector.is_some() {
			self.push_char(' ');
		} else {
			self.flush_run();
		}
	}

	fn record_id(&mut self, e: &BytesStart)
	{
		if let Some(id) = attr_value(e, b"id") {
			// the run is closed first so the recorded address is the
			// address of the next emitted token
			self.flush_run();
			let address = self.here();
			self.id_to_addr.insert(id, address);
		}
	}

	fn start_element(&mut self, e: &BytesStart)
	{
		if self.skip_count > 0 {
			self.push_frame(Frame::Skip);
			return;
		}
		self.record_id(e);
		if has_attr(e, b"hidden") {
			self.push_frame(Frame::Skip);
			return;
		}
		match e.local_name().as_ref() {
			b"script" | b"style" => self.push_frame(Frame::Skip),
			b"head" => self.push_frame(Frame::Head),
			b"title" | b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" => {
				self.flush_run();
				self.collector = Some(Collector {
					kind: CollectKind::Header,
					buf: TextBuf::default(),
				});
				self.push_frame(Frame::HeaderEnd);
			}
			b"ol" | b"ul" => {
				self.flush_run();
				// a list opening inside a list item ends that item's text
				if matches!(self.collector, Some(Collector { kind: CollectKind::ListItem(_), .. })) {
					self.finish_collector();
				}
				self.list_depth += 1;
				self.push_frame(Frame::List);
			}
			b"li" => {
				self.flush_run();
				self.collector = Some(Collector {
					kind: CollectKind::ListItem(self.list_depth.saturating_sub(1)),
					buf: TextBuf::default(),
				});
				self.push_frame(Frame::ListItemEnd);
			}
			b"img" | b"image" => {
				self.emit_image(e);
				self.push_frame(Frame::Plain);
			}
			b"br" => {
				self.line_break();
				self.push_frame(Frame::Plain);
			}
			b"p" | b"div" | b"blockquote" | b"table" | b"tr" | b"td" | b"th"
			| b"section" | b"article" | b"aside" | b"figure" | b"figcaption"
			| b"dl" | b"dt" | b"dd" | b"pre" | b"hr" => {
				self.flush_run();
				self.push_frame(Frame::Block);
			}
			_ => self.push_frame(Frame::Plain),
		}
	}

	fn empty_element(&mut self, e: &BytesStart)
	{
		if self.skip_count > 0 {
			return;
		}
		self.record_id(e);
		if has_attr(e, b"hidden") {
			return;
		}
		match e.local_name().as_ref() {
			b"img" | b"image" => self.emit_image(e),
			b"br" => self.line_break(),
			b"hr" => self.flush_run(),
			_ => {}
		}
	}

	fn end_element(&mut self)
	{
		match self.stack.pop() {
			Some(Frame::Skip) => self.skip_count -= 1,
			Some(Frame::Head) => self.head_count -= 1,
			Some(Frame::List) => self.list_depth -= 1,
			Some(Frame::Block) => self.flush_run(),
			Some(Frame::HeaderEnd) | Some(Frame::ListItemEnd) => self.finish_collector(),
			Some(Frame::Plain) | None => {}
		}
	}

	fn push_frame(&mut self, frame: Frame)
	{
		match &frame {
			Frame::Skip => self.skip_count += 1,
			Frame::Head => self.head_count += 1,
			_ => {}
		}
		self.stack.push(frame);
	}

	fn finish(mut self) -> ChapterTokens
	{
		self.finish_collector();
		self.flush_run();
		ChapterTokens { tokens: self.tokens, id_to_addr: self.id_to_addr }
	}
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String>
{
	for attr in e.attributes().flatten() {
		if attr.key.local_name().as_ref() == name {
			if let Ok(value) = attr.unescape_value() {
				return Some(value.to_string());
			}
		}
	}
	None
}

#[inline]
fn has_attr(e: &BytesStart, name: &[u8]) -> bool
{
	e.attributes()
		.flatten()
		.any(|attr| attr.key.local_name().as_ref() == name)
}

/// Tokenize one chapter. Token addresses start at offset 0 of
/// `chapter_index`; `id_to_addr` maps element ids to the address of the
/// next token emitted inside that element. Malformed input yields the
/// tokens accumulated before the first error.
pub fn parse_xhtml_tokens(content: Vec<u8>, chapter_path: &str, chapter_index: u32)
	-> ChapterTokens
{
	let text = match plain_text(content, false) {
		Ok(text) => text,
		Err(e) => {
			warn!("failed decode {}: {}", chapter_path, e);
			return ChapterTokens::empty();
		}
	};
	let text = preprocess_entities(&text);
	let cwd = path_parent(chapter_path);
	let mut reader = quick_xml::Reader::from_str(&text);
	let mut tokenizer = Tokenizer::new(chapter_index, cwd);
	loop {
		match reader.read_event() {
			Ok(Event::Start(e)) => tokenizer.start_element(&e),
			Ok(Event::Empty(e)) => tokenizer.empty_element(&e),
			Ok(Event::End(_)) => tokenizer.end_element(),
			Ok(Event::Text(e)) =>
				tokenizer.push_text(&String::from_utf8_lossy(e.as_ref())),
			Ok(Event::CData(e)) =>
				tokenizer.push_text(&String::from_utf8_lossy(e.as_ref())),
			Ok(Event::GeneralRef(e)) => if let Some(ch) = resolve_ref(&e) {
				tokenizer.push_char(ch);
			}
			Ok(Event::Eof) => break,
			Ok(_) => {}
			Err(e) => {
				warn!("failed parse {}: {}", chapter_path, e);
				break;
			}
		}
	}
	tokenizer.finish()
}
