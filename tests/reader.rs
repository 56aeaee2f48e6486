use anyhow::Result;
use std::cell::Cell;
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use inkdoc::archive::{EpubArchive, EpubZipArchive};
use inkdoc::doc_index::EpubDocIndex;
use inkdoc::metadata::parse_package_contents;
use inkdoc::{DocAddr, DocReaderCache, DocToken, EPubReader, StateStore};

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

fn chapter_xml(body: &str) -> String
{
	format!(
		"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
		<html xmlns=\"http://www.w3.org/1999/xhtml\"><body>{}</body></html>",
		body)
}

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8>
{
	let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
	for (name, content) in entries {
		writer.start_file(name.to_string(), SimpleFileOptions::default()).unwrap();
		writer.write_all(content.as_bytes()).unwrap();
	}
	writer.finish().unwrap().into_inner()
}

fn write_epub(dir: &Path, entries: &[(&str, &str)]) -> PathBuf
{
	let path = dir.join("book.epub");
	fs::write(&path, zip_bytes(entries)).unwrap();
	path
}

#[derive(Default)]
struct MemoryCache {
	map: HashMap<(String, String), String>,
}

impl DocReaderCache for MemoryCache {
	fn read(&self, book_id: &str, key: &str) -> Option<String>
	{
		self.map.get(&(book_id.to_owned(), key.to_owned())).cloned()
	}

	fn write(&mut self, book_id: &str, key: &str, value: String)
	{
		self.map.insert((book_id.to_owned(), key.to_owned()), value);
	}
}

/// Counts zip reads so cache hits are observable.
struct CountingArchive {
	inner: EpubZipArchive<Cursor<Vec<u8>>>,
	reads: Cell<u32>,
}

impl CountingArchive {
	fn new(bytes: Vec<u8>) -> Self
	{
		CountingArchive {
			inner: EpubZipArchive::new(Cursor::new(bytes)).unwrap(),
			reads: Cell::new(0),
		}
	}
}

impl EpubArchive for CountingArchive {
	fn is_encrypted(&self) -> bool
	{
		self.inner.is_encrypted()
	}

	fn content(&self, path: &str) -> Result<Vec<u8>>
	{
		self.reads.set(self.reads.get() + 1);
		self.inner.content(path)
	}

	fn exists(&self, path: &str) -> bool
	{
		self.inner.exists(path)
	}
}

// fixtures

fn minimal_entries() -> Vec<(&'static str, String)>
{
	let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="c0" href="c0.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="c0"/>
  </spine>
</package>"#;
	vec![
		("META-INF/container.xml", CONTAINER_XML.to_owned()),
		("OEBPS/content.opf", opf.to_owned()),
		("OEBPS/c0.xhtml", chapter_xml("<p>Hello world</p>")),
	]
}

fn as_refs<'a>(entries: &'a [(&'a str, String)]) -> Vec<(&'a str, &'a str)>
{
	entries.iter().map(|(name, content)| (*name, content.as_str())).collect()
}

#[test]
fn minimal_epub_open_and_progress()
{
	let dir = tempfile::tempdir().unwrap();
	let entries = minimal_entries();
	let path = write_epub(dir.path(), &as_refs(&entries));

	let mut cache = MemoryCache::default();
	let mut reader = EPubReader::new(&path);
	assert!(reader.open(&mut cache));
	assert!(reader.is_open());
	assert!(!reader.get_id().is_empty());
	// idempotent
	assert!(reader.open(&mut cache));

	// no ncx and no nav document: the toc surface defaults
	assert!(reader.get_table_of_contents().is_empty());
	let position = reader.get_toc_position(DocAddr::new(0, 0));
	assert_eq!(position.toc_index, 0);
	assert_eq!(position.percent, 100);

	let mut iter = reader.get_iter(DocAddr::new(0, 0)).unwrap();
	match iter.current().unwrap() {
		DocToken::Text { address, text } => {
			assert_eq!(text, "Hello world");
			assert_eq!(*address, DocAddr::new(0, 0));
		}
		other => panic!("expected text token, got {:?}", other),
	}
	assert!(iter.advance().is_none());
	let end = iter.address();
	assert_eq!(end, DocAddr::new(0, 11));

	assert_eq!(reader.get_global_progress_percent(DocAddr::new(0, 0)), 0);
	assert_eq!(reader.get_global_progress_percent(end), 100);

	// widths cache written on first open
	let encoded = cache.read(reader.get_id(), "doc_widths").unwrap();
	assert_eq!(encoded, "1 11");
}

#[test]
fn open_failures_are_fatal_and_reported_as_false()
{
	let dir = tempfile::tempdir().unwrap();
	let mut cache = MemoryCache::default();

	// not a zip at all
	let path = dir.path().join("junk.epub");
	fs::write(&path, b"not a zip").unwrap();
	assert!(!EPubReader::new(&path).open(&mut cache));

	// missing container
	let path = write_epub(dir.path(), &[("mimetype", "application/epub+zip")]);
	assert!(!EPubReader::new(&path).open(&mut cache));

	// container without rootfile
	let path = write_epub(dir.path(), &[(
		"META-INF/container.xml",
		"<container><rootfiles/></container>",
	)]);
	assert!(!EPubReader::new(&path).open(&mut cache));

	// broken package document
	let path = write_epub(dir.path(), &[
		("META-INF/container.xml", CONTAINER_XML),
		("OEBPS/content.opf", "<package>no manifest here"),
	]);
	assert!(!EPubReader::new(&path).open(&mut cache));

	// encrypted book
	let entries = minimal_entries();
	let mut entries = as_refs(&entries);
	entries.push(("META-INF/encryption.xml", "<encryption/>"));
	let path = write_epub(dir.path(), &entries);
	let mut reader = EPubReader::new(&path);
	assert!(!reader.open(&mut cache));
	assert!(!reader.is_open());
	// defaulted surfaces on a failed reader
	assert_eq!(reader.get_id(), "");
	assert!(reader.get_table_of_contents().is_empty());
	assert_eq!(reader.get_global_progress_percent(DocAddr::new(0, 0)), 100);
	assert!(reader.get_iter(DocAddr::new(0, 0)).is_none());
	assert!(reader.load_resource("OEBPS/c0.xhtml").is_empty());
}

fn nav_only_entries() -> Vec<(&'static str, String)>
{
	let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="a" href="a.xhtml" media-type="application/xhtml+xml"/>
    <item id="b" href="b.xhtml" media-type="application/xhtml+xml"/>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
  </manifest>
  <spine>
    <itemref idref="a"/>
    <itemref idref="b"/>
  </spine>
</package>"#;
	let nav = r#"<?xml version="1.0"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body><nav epub:type="toc"><ol>
  <li><a href="a.xhtml">Alpha</a></li>
  <li><a href="b.xhtml">Beta</a></li>
</ol></nav></body></html>"#;
	vec![
		("META-INF/container.xml", CONTAINER_XML.to_owned()),
		("OEBPS/content.opf", opf.to_owned()),
		("OEBPS/nav.xhtml", nav.to_owned()),
		("OEBPS/a.xhtml", chapter_xml("<p>alpha text</p>")),
		("OEBPS/b.xhtml", chapter_xml("<p>beta text</p>")),
	]
}

#[test]
fn nav_fallback_when_no_ncx()
{
	let dir = tempfile::tempdir().unwrap();
	let entries = nav_only_entries();
	let path = write_epub(dir.path(), &as_refs(&entries));

	let mut cache = MemoryCache::default();
	let mut reader = EPubReader::new(&path);
	assert!(reader.open(&mut cache));

	let toc = reader.get_table_of_contents();
	assert_eq!(toc.len(), 2);
	assert_eq!(toc[0].display_name, "Alpha");
	assert_eq!(toc[0].indent_level, 0);
	assert_eq!(toc[1].display_name, "Beta");
	assert_eq!(toc[1].indent_level, 0);

	assert_eq!(reader.get_toc_item_address(0), DocAddr::new(0, 0));
	assert_eq!(reader.get_toc_item_address(1), DocAddr::new(1, 0));
	assert_eq!(reader.get_toc_position(DocAddr::new(1, 0)).toc_index, 1);
	assert_eq!(reader.get_toc_position(DocAddr::new(1, 0)).percent, 0);
	// halfway through chapter b ("beta text" is 9 units wide)
	assert_eq!(reader.get_toc_position(DocAddr::new(1, 4)).toc_index, 1);

	// toc item index round trip
	for i in 0..2 {
		let address = reader.get_toc_item_address(i);
		assert_eq!(reader.get_toc_position(address).toc_index, i);
		assert_eq!(reader.get_toc_position(address).percent, 0);
	}
}

fn fragment_entries() -> Vec<(&'static str, String)>
{
	let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="c0" href="c0.xhtml" media-type="application/xhtml+xml"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c0"/>
  </spine>
</package>"#;
	let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1"><navLabel><text>Ghost</text></navLabel><content src="c0.xhtml#nope"/></navPoint>
    <navPoint id="n2"><navLabel><text>Start</text></navLabel><content src="c0.xhtml"/></navPoint>
    <navPoint id="n3"><navLabel><text>Section Two</text></navLabel><content src="c0.xhtml#s2"/></navPoint>
    <navPoint id="n4"><navLabel><text>Offside</text></navLabel><content src="other.xhtml"/></navPoint>
  </navMap>
</ncx>"#;
	vec![
		("META-INF/container.xml", CONTAINER_XML.to_owned()),
		("OEBPS/content.opf", opf.to_owned()),
		("OEBPS/toc.ncx", ncx.to_owned()),
		("OEBPS/c0.xhtml",
			chapter_xml("<p>intro text</p><h2 id=\"s2\">S2</h2><p>after</p>")),
	]
}

#[test]
fn ncx_fragment_targets()
{
	let dir = tempfile::tempdir().unwrap();
	let entries = fragment_entries();
	let path = write_epub(dir.path(), &as_refs(&entries));

	let mut cache = MemoryCache::default();
	let mut reader = EPubReader::new(&path);
	assert!(reader.open(&mut cache));

	// the off-spine target is dropped, the rest survive
	let toc = reader.get_table_of_contents();
	assert_eq!(toc.len(), 3);

	// unknown fragment degrades to the chapter start
	assert_eq!(reader.get_toc_item_address(0), DocAddr::new(0, 0));

	// "intro text" spans offsets 0..10, the header starts at 10
	let header_address = reader.get_toc_item_address(2);
	assert_eq!(header_address, DocAddr::new(0, 10));
	let position = reader.get_toc_position(header_address);
	assert_eq!(position.toc_index, 2);
	assert_eq!(position.percent, 0);

	// the iterator seeks onto the header token itself
	let iter = reader.get_iter(header_address).unwrap();
	match iter.current().unwrap() {
		DocToken::Header { text, .. } => assert_eq!(text, "S2"),
		other => panic!("expected header token, got {:?}", other),
	}
}

fn skipped_slot_entries() -> Vec<(&'static str, String)>
{
	let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="c0" href="c0.xhtml" media-type="application/xhtml+xml"/>
    <item id="style" href="style.css" media-type="text/css"/>
    <item id="c2" href="c2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="c0"/>
    <itemref idref="style" linear="no"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;
	vec![
		("META-INF/container.xml", CONTAINER_XML.to_owned()),
		("OEBPS/content.opf", opf.to_owned()),
		("OEBPS/c0.xhtml", chapter_xml("<p>one</p>")),
		("OEBPS/style.css", "p { margin: 0 }".to_owned()),
		("OEBPS/c2.xhtml", chapter_xml("<p>two</p>")),
	]
}

#[test]
fn skipped_spine_slot_keeps_indexing()
{
	let entries = skipped_slot_entries();
	let bytes = zip_bytes(&as_refs(&entries));

	// index-level view: the slot exists, is empty, and has width zero
	let opf = &entries[1].1;
	let package = parse_package_contents("OEBPS/content.opf", opf).unwrap();
	let archive: Rc<dyn EpubArchive> =
		Rc::new(EpubZipArchive::new(Cursor::new(bytes.clone())).unwrap());
	let index = EpubDocIndex::new(&package, archive, vec![]);
	assert_eq!(index.spine_size(), 3);
	assert_eq!(index.token_count(1), 0);
	assert!(index.empty(1));
	assert_eq!(index.address_width(1), 0);
	assert_eq!(index.address_width(0), 3);
	// out of range is defaulted, not fatal
	assert_eq!(index.token_count(9), 0);
	assert_eq!(index.address_width(9), 0);
	assert!(index.tokens(9).is_empty());

	// reader-level view: traversal steps across the slot
	let dir = tempfile::tempdir().unwrap();
	let path = write_epub(dir.path(), &as_refs(&entries));
	let mut cache = MemoryCache::default();
	let mut reader = EPubReader::new(&path);
	assert!(reader.open(&mut cache));

	let mut iter = reader.get_iter(DocAddr::new(0, 0)).unwrap();
	assert_eq!(iter.current().unwrap().text(), Some("one"));
	let next = iter.advance().unwrap();
	assert_eq!(next.text(), Some("two"));
	assert_eq!(next.address(), DocAddr::new(2, 0));
	assert!(iter.advance().is_none());
	// and back again across the empty slot
	assert_eq!(iter.retreat().unwrap().text(), Some("two"));
	assert_eq!(iter.retreat().unwrap().text(), Some("one"));
	assert!(iter.retreat().is_none());

	// seeking into the empty slot lands on the next chapter
	let iter = reader.get_iter(DocAddr::new(1, 0)).unwrap();
	assert_eq!(iter.address(), DocAddr::new(2, 0));

	assert_eq!(cache.read(reader.get_id(), "doc_widths").unwrap(), "3 3 0 3");
}

#[test]
fn widths_cache_hit_skips_tokenization()
{
	let entries = skipped_slot_entries();
	let bytes = zip_bytes(&as_refs(&entries));
	let opf = &entries[1].1;
	let package = parse_package_contents("OEBPS/content.opf", opf).unwrap();

	let counting = Rc::new(CountingArchive::new(bytes));
	let archive: Rc<dyn EpubArchive> = counting.clone();
	let index = EpubDocIndex::new(&package, archive, vec![3, 0, 3]);
	for i in 0..index.spine_size() {
		assert_eq!(index.address_width(i), [3, 0, 3][i as usize]);
	}
	assert_eq!(counting.reads.get(), 0);

	// token access still tokenizes lazily
	assert_eq!(index.token_count(0), 1);
	assert_eq!(counting.reads.get(), 1);

	// a length-mismatched cache is ignored and widths recompute
	let entries = skipped_slot_entries();
	let bytes = zip_bytes(&as_refs(&entries));
	let counting = Rc::new(CountingArchive::new(bytes));
	let archive: Rc<dyn EpubArchive> = counting.clone();
	let index = EpubDocIndex::new(&package, archive, vec![3, 0]);
	assert_eq!(index.address_width(0), 3);
	assert!(counting.reads.get() > 0);
}

#[test]
fn reopen_reuses_widths_cache_through_state_store()
{
	let dir = tempfile::tempdir().unwrap();
	let entries = minimal_entries();
	let path = write_epub(dir.path(), &as_refs(&entries));
	let store_dir = dir.path().join("state");

	let book_id;
	{
		let mut store = StateStore::new(&store_dir);
		let mut reader = EPubReader::new(&path);
		assert!(reader.open(&mut store));
		book_id = reader.get_id().to_owned();
		store.flush().unwrap();
	}
	assert!(store_dir.join("books").join(format!("{}.txt", book_id)).exists());

	let mut store = StateStore::new(&store_dir);
	assert_eq!(store.read(&book_id, "doc_widths"), Some(String::from("1 11")));
	let mut reader = EPubReader::new(&path);
	assert!(reader.open(&mut store));
	assert_eq!(reader.get_id(), book_id);
	assert_eq!(reader.get_global_progress_percent(DocAddr::new(0, 11)), 100);
}

#[test]
fn malformed_chapter_is_empty_but_open_succeeds()
{
	let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="good" href="good.xhtml" media-type="application/xhtml+xml"/>
    <item id="bad" href="bad.xhtml" media-type="application/xhtml+xml"/>
    <item id="gone" href="gone.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="good"/>
    <itemref idref="bad"/>
    <itemref idref="gone"/>
  </spine>
</package>"#;
	let entries = vec![
		("META-INF/container.xml", CONTAINER_XML.to_owned()),
		("OEBPS/content.opf", opf.to_owned()),
		("OEBPS/good.xhtml", chapter_xml("<p>fine</p>")),
		("OEBPS/bad.xhtml", String::from("<<<bad")),
		// gone.xhtml is referenced but absent from the archive
	];
	let dir = tempfile::tempdir().unwrap();
	let path = write_epub(dir.path(), &as_refs(&entries));

	let mut cache = MemoryCache::default();
	let mut reader = EPubReader::new(&path);
	assert!(reader.open(&mut cache));

	let mut iter = reader.get_iter(DocAddr::new(0, 0)).unwrap();
	assert_eq!(iter.current().unwrap().text(), Some("fine"));
	assert!(iter.advance().is_none());

	// the empty chapters drop out of the progress arithmetic
	assert_eq!(cache.read(reader.get_id(), "doc_widths").unwrap(), "3 4 0 0");
	assert_eq!(reader.get_global_progress_percent(DocAddr::new(0, 4)), 100);
	assert_eq!(reader.get_global_progress_percent(DocAddr::new(0, 2)), 50);
}

#[test]
fn empty_spine_defaults()
{
	let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest/>
  <spine/>
</package>"#;
	let dir = tempfile::tempdir().unwrap();
	let path = write_epub(dir.path(), &[
		("META-INF/container.xml", CONTAINER_XML),
		("OEBPS/content.opf", opf),
	]);

	let mut cache = MemoryCache::default();
	let mut reader = EPubReader::new(&path);
	assert!(reader.open(&mut cache));
	assert!(reader.get_table_of_contents().is_empty());
	assert_eq!(reader.get_global_progress_percent(DocAddr::new(0, 0)), 100);

	let mut iter = reader.get_iter(DocAddr::new(0, 0)).unwrap();
	assert!(iter.current().is_none());
	assert!(iter.advance().is_none());
	assert!(iter.retreat().is_none());
	assert_eq!(iter.address(), DocAddr::new(0, 0));
}

#[test]
fn token_addresses_are_contiguous_per_chapter()
{
	let entries = nav_only_entries();
	let bytes = zip_bytes(&as_refs(&entries));
	let opf = &entries[1].1;
	let package = parse_package_contents("OEBPS/content.opf", opf).unwrap();
	let archive: Rc<dyn EpubArchive> =
		Rc::new(EpubZipArchive::new(Cursor::new(bytes)).unwrap());
	let index = EpubDocIndex::new(&package, archive, vec![]);

	for chapter in 0..index.spine_size() {
		let mut expected = DocAddr::new(chapter, 0);
		for token in index.tokens(chapter) {
			assert_eq!(token.address().chapter(), chapter);
			assert_eq!(token.address(), expected);
			expected = token.address() + token.width();
		}
		assert_eq!(expected, DocAddr::new(chapter, index.address_width(chapter)));
	}
}

#[test]
fn iterator_seek_lands_inside_token_intervals()
{
	let dir = tempfile::tempdir().unwrap();
	let entries = fragment_entries();
	let path = write_epub(dir.path(), &as_refs(&entries));
	let mut cache = MemoryCache::default();
	let mut reader = EPubReader::new(&path);
	assert!(reader.open(&mut cache));

	// tokens: "intro text" [0,10), "S2" [10,12), "after" [12,17)
	for offset in 0..17 {
		let address = DocAddr::new(0, offset);
		let iter = reader.get_iter(address).unwrap();
		let token = iter.current().unwrap();
		assert!(token.address() <= address);
		assert!(address < token.address() + token.width());
	}
	// one past the last token clamps to the end
	let iter = reader.get_iter(DocAddr::new(0, 17)).unwrap();
	assert!(iter.current().is_none());
	assert_eq!(iter.address(), DocAddr::new(0, 17));
	let iter = reader.get_iter(DocAddr::new(9, 0)).unwrap();
	assert!(iter.current().is_none());

	// load_resource passes through to the archive
	assert!(!reader.load_resource("OEBPS/toc.ncx").is_empty());
	assert!(reader.load_resource("OEBPS/absent.bin").is_empty());
}
