use anyhow::Result;
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Borrow;

/// Reduce a (pos, size) fraction to a clamped percent.
/// An empty span counts as fully read.
pub fn progress_percent(pos: u32, size: u32) -> u32
{
	if size == 0 {
		return 100;
	}
	let percent = pos as u64 * 100 / size as u64;
	if percent > 100 {
		100
	} else {
		percent as u32
	}
}

/// Directory part of a zip-internal path, without the trailing slash.
/// Top level entries have an empty parent.
pub fn path_parent(path: &str) -> &str
{
	match path.rfind('/') {
		Some(pos) => &path[..pos],
		None => "",
	}
}

/// Join a relative href onto a zip-internal directory, collapsing `.`
/// and `..` segments. Archive paths use forward slashes and no leading
/// slash, so this is plain segment algebra rather than OS paths.
pub fn concat_path(dir: &str, sub: &str) -> String
{
	let mut segments: Vec<&str> = dir
		.split('/')
		.filter(|s| !s.is_empty() && *s != ".")
		.collect();
	for segment in sub.split('/') {
		match segment {
			"" | "." => {}
			".." => { segments.pop(); }
			_ => segments.push(segment),
		}
	}
	segments.join("/")
}

/// Widths cache value format: the element count, then that many decimal
/// numbers, all space separated.
pub fn encode_u32_vector(values: &[u32]) -> String
{
	let mut text = values.len().to_string();
	for value in values {
		text.push(' ');
		text.push_str(&value.to_string());
	}
	text
}

pub fn try_decode_u32_vector(text: &str) -> Option<Vec<u32>>
{
	let mut parts = text.split_ascii_whitespace();
	let count: usize = parts.next()?.parse().ok()?;
	let mut values = Vec::with_capacity(count);
	for part in parts {
		values.push(part.parse().ok()?);
	}
	if values.len() == count {
		Some(values)
	} else {
		None
	}
}

#[inline]
pub fn try_decode_u32(text: &str) -> Option<u32>
{
	text.trim().parse().ok()
}

pub(crate) fn plain_text(content: Vec<u8>, full_scan: bool) -> Result<String>
{
	let encoding = detect_charset(&content, full_scan);
	let text = decode_text(content, encoding)?;
	// the utf-8 path keeps a BOM, and a BOM confuses the XML layer
	Ok(match text.strip_prefix('\u{feff}') {
		Some(stripped) => stripped.to_owned(),
		None => text,
	})
}

#[inline]
pub(crate) fn detect_charset(content: &[u8], full_scan: bool) -> &'static Encoding
{
	let mut detector = EncodingDetector::new();
	if detector.feed(content, full_scan) {
		detector.guess(None, true)
	} else {
		UTF_8
	}
}

#[inline]
pub(crate) fn decode_text(content: Vec<u8>, encoding: &'static Encoding) -> Result<String>
{
	let text = if encoding.eq(UTF_8) {
		String::from_utf8(content)?
	} else {
		let (cow, ..) = encoding.decode(content.borrow());
		String::from(cow)
	};
	Ok(text)
}
