use crate::addr::DocAddr;

/// Address units occupied by an image token.
pub const IMAGE_ADDRESS_WIDTH: u32 = 1;

/// One atomic unit of readable content. Stored inline in the chapter
/// token vector, so no per-token allocation beyond the carried strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocToken {
	Text { address: DocAddr, text: String },
	Header { address: DocAddr, text: String },
	ListItem { address: DocAddr, text: String, nest_level: u32 },
	Image { address: DocAddr, path: String },
}

impl DocToken {
	#[inline]
	pub fn address(&self) -> DocAddr
	{
		match self {
			DocToken::Text { address, .. }
			| DocToken::Header { address, .. }
			| DocToken::ListItem { address, .. }
			| DocToken::Image { address, .. } => *address,
		}
	}

	/// Number of address units the token occupies: code points for
	/// text-bearing variants, a constant for images.
	pub fn width(&self) -> u32
	{
		match self {
			DocToken::Text { text, .. }
			| DocToken::Header { text, .. }
			| DocToken::ListItem { text, .. } => text.chars().count() as u32,
			DocToken::Image { .. } => IMAGE_ADDRESS_WIDTH,
		}
	}

	#[inline]
	pub fn text(&self) -> Option<&str>
	{
		match self {
			DocToken::Text { text, .. }
			| DocToken::Header { text, .. }
			| DocToken::ListItem { text, .. } => Some(text),
			DocToken::Image { .. } => None,
		}
	}
}
