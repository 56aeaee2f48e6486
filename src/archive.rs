use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::io::{Read, Seek};
use zip::ZipArchive;

const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";

/// Byte-level access to the book container. Mutation of the underlying
/// zip cursor hides behind `&self`; access is single threaded (see the
/// ownership contract on `EpubDocIndex`).
pub trait EpubArchive {
	fn is_encrypted(&self) -> bool;
	fn content(&self, path: &str) -> Result<Vec<u8>>;
	fn string(&self, path: &str) -> Result<String>
	{
		let buf = self.content(path)?;
		crate::common::plain_text(buf, false)
	}
	fn exists(&self, path: &str) -> bool;
}

pub struct EpubZipArchive<R: Read + Seek> {
	zip: RefCell<ZipArchive<R>>,
}

impl<R: Read + Seek> EpubZipArchive<R> {
	#[inline]
	pub fn new(reader: R) -> Result<Self>
	{
		let zip = ZipArchive::new(reader)?;
		Ok(EpubZipArchive { zip: RefCell::new(zip) })
	}

	/// Entry lookup as named in the OPF, tolerating archives that store
	/// names with a leading `./` or without the leading directory
	/// component.
	fn resolve_name(&self, path: &str) -> Option<String>
	{
		let zip = self.zip.borrow();
		if zip.index_for_name(path).is_some() {
			return Some(path.to_owned());
		}
		let dotted = format!("./{}", path);
		if zip.index_for_name(&dotted).is_some() {
			return Some(dotted);
		}
		let tail = format!("/{}", path);
		let found = zip.file_names()
			.find(|name| name.ends_with(&tail))
			.map(|name| name.to_owned());
		found
	}
}

impl<R: Read + Seek> EpubArchive for EpubZipArchive<R> {
	#[inline]
	fn is_encrypted(&self) -> bool
	{
		self.exists(ENCRYPTION_PATH)
	}

	fn content(&self, path: &str) -> Result<Vec<u8>>
	{
		let name = self.resolve_name(path)
			.ok_or_else(|| anyhow!("no archive entry for {}", path))?;
		match self.zip.borrow_mut().by_name(&name) {
			Ok(mut file) => {
				let mut buf = vec![];
				file.read_to_end(&mut buf)?;
				Ok(buf)
			}
			Err(e) => Err(anyhow!("failed load {}: {}", path, e.to_string())),
		}
	}

	#[inline]
	fn exists(&self, path: &str) -> bool
	{
		self.resolve_name(path).is_some()
	}
}
