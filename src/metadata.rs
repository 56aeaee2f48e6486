use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use log::warn;
use quick_xml::events::{BytesStart, Event};
use serde_derive::Deserialize;
use std::borrow::Cow;

use crate::common::{concat_path, path_parent};
use crate::error::EpubError;
use crate::xhtml::{preprocess_entities, resolve_ref};

pub const EPUB_CONTAINER_PATH: &str = "META-INF/container.xml";
pub const APPLICATION_XHTML_XML: &str = "application/xhtml+xml";
pub const APPLICATION_X_DTBNCX_XML: &str = "application/x-dtbncx+xml";

pub type ItemId = String;

pub struct ManifestItem {
	pub id: ItemId,
	/// href from the OPF, resolved against the OPF's directory; a
	/// zip-internal path.
	pub href_absolute: String,
	pub media_type: String,
	pub properties: Option<String>,
}

pub struct PackageContents {
	pub spine_ids: Vec<ItemId>,
	pub id_to_manifest_item: IndexMap<ItemId, ManifestItem>,
	pub toc_id: Option<ItemId>,
}

/// One entry of the navigation tree, flattened in document order; the
/// tree shape survives in `level`.
pub struct NavPoint {
	pub label: Option<String>,
	pub level: u32,
	pub src_file: Option<String>,
	pub src_anchor: Option<String>,
}

/// epub container.xml
#[derive(Deserialize)]
struct RootFile<'a> {
	#[serde(borrow, rename = "@full-path")]
	full_path: Cow<'a, str>,
}
#[derive(Deserialize)]
struct RootFiles<'a> {
	#[serde(borrow, default)]
	rootfile: Vec<RootFile<'a>>,
}
#[derive(Deserialize)]
struct EpubContainer<'a> {
	#[serde(borrow)]
	rootfiles: RootFiles<'a>,
}

/// epub package document
#[derive(Deserialize)]
struct PackageManifestItem<'a> {
	#[serde(borrow, rename = "@id")]
	id: Cow<'a, str>,
	#[serde(borrow, rename = "@media-type")]
	media_type: Cow<'a, str>,
	#[serde(borrow, rename = "@href")]
	href: Cow<'a, str>,
	#[serde(borrow, rename = "@properties")]
	properties: Option<Cow<'a, str>>,
}
#[derive(Deserialize)]
struct PackageManifest<'a> {
	#[serde(borrow, default, rename = "item")]
	items: Vec<PackageManifestItem<'a>>,
}
#[derive(Deserialize)]
struct PackageSpineItem<'a> {
	#[serde(borrow, rename = "@idref")]
	idref: Cow<'a, str>,
}
#[derive(Deserialize)]
struct PackageSpine<'a> {
	#[serde(borrow, rename = "@toc")]
	toc: Option<Cow<'a, str>>,
	#[serde(borrow, default, rename = "itemref")]
	itemrefs: Vec<PackageSpineItem<'a>>,
}
#[derive(Deserialize)]
struct PackageDoc<'a> {
	#[serde(borrow)]
	manifest: PackageManifest<'a>,
	#[serde(borrow)]
	spine: PackageSpine<'a>,
}

/// epub 2 toc.ncx
#[derive(Deserialize)]
struct NcxNavLabel<'a> {
	#[serde(borrow)]
	text: Cow<'a, str>,
}
#[derive(Deserialize)]
struct NcxNavContent<'a> {
	#[serde(borrow, rename = "@src")]
	src: Cow<'a, str>,
}
#[derive(Deserialize)]
struct NcxNavPoint<'a> {
	#[serde(rename = "navLabel")]
	nav_label: Option<NcxNavLabel<'a>>,
	#[serde(borrow)]
	content: NcxNavContent<'a>,
	#[serde(borrow, rename = "navPoint")]
	nav_points: Option<Vec<NcxNavPoint<'a>>>,
}
#[derive(Deserialize)]
struct NcxNavMap<'a> {
	#[serde(borrow, default, rename = "navPoint")]
	nav_points: Vec<NcxNavPoint<'a>>,
}
#[derive(Deserialize)]
struct Ncx<'a> {
	#[serde(borrow, rename = "navMap")]
	nav_map: NcxNavMap<'a>,
}

/// First `rootfile/@full-path` of META-INF/container.xml.
pub fn parse_rootfile_path(container_xml: &str) -> Result<String, EpubError>
{
	let container = quick_xml::de::from_str::<EpubContainer>(container_xml)
		.map_err(|_| EpubError::InvalidContainer)?;
	let rootfile = container.rootfiles.rootfile
		.first()
		.ok_or(EpubError::InvalidContainer)?;
	if rootfile.full_path.is_empty() {
		return Err(EpubError::InvalidContainer);
	}
	Ok(rootfile.full_path.to_string())
}

/// Parse the OPF into PackageContents. The spine keeps every itemref,
/// `linear="no"` included, and also ids missing from the manifest, so
/// spine indices stay dense; unusable slots degrade later in the doc
/// index.
pub fn parse_package_contents(opf_path: &str, opf_xml: &str)
	-> Result<PackageContents, EpubError>
{
	let package = quick_xml::de::from_str::<PackageDoc>(opf_xml)
		.map_err(|e| EpubError::InvalidPackage {
			path: opf_path.to_owned(),
			reason: e.to_string(),
		})?;

	let opf_dir = path_parent(opf_path);
	let mut id_to_manifest_item = IndexMap::new();
	for item in package.manifest.items {
		let id = item.id.to_string();
		id_to_manifest_item.insert(id.clone(), ManifestItem {
			id,
			href_absolute: concat_path(opf_dir, &item.href),
			media_type: item.media_type.to_string(),
			properties: item.properties.map(|p| p.to_string()),
		});
	}

	let spine_ids = package.spine.itemrefs
		.into_iter()
		.map(|item| item.idref.to_string())
		.collect();
	let toc_id = package.spine.toc.map(|toc| toc.to_string());
	Ok(PackageContents { spine_ids, id_to_manifest_item, toc_id })
}

fn split_src(src: &str, cwd: &str) -> (Option<String>, Option<String>)
{
	let mut parts = src.splitn(2, '#');
	let file = match parts.next() {
		Some("") | None => None,
		Some(file) => Some(concat_path(cwd, file)),
	};
	let anchor = parts.next()
		.filter(|a| !a.is_empty())
		.map(String::from);
	(file, anchor)
}

fn push_ncx_points(points: &[NcxNavPoint], level: u32, cwd: &str, out: &mut Vec<NavPoint>)
{
	for point in points {
		let label = point.nav_label
			.as_ref()
			.map(|l| l.text.trim().to_string())
			.filter(|l| !l.is_empty());
		let (src_file, src_anchor) = split_src(&point.content.src, cwd);
		out.push(NavPoint { label, level, src_file, src_anchor });
		if let Some(children) = &point.nav_points {
			push_ncx_points(children, level + 1, cwd, out);
		}
	}
}

/// Flatten `navMap/navPoint` in document order; targets resolve
/// relative to the NCX file.
pub fn parse_ncx(ncx_path: &str, ncx_xml: &str) -> Result<Vec<NavPoint>>
{
	let text = preprocess_entities(ncx_xml);
	let ncx: Ncx = quick_xml::de::from_str(&text)
		.map_err(|e| anyhow!("failed parse ncx {}: {}", ncx_path, e.to_string()))?;
	let cwd = path_parent(ncx_path);
	let mut nav_points = vec![];
	push_ncx_points(&ncx.nav_map.nav_points, 0, cwd, &mut nav_points);
	if nav_points.is_empty() {
		Err(anyhow!("no navPoints found in {}", ncx_path))
	} else {
		Ok(nav_points)
	}
}

/// Read the first `nav[@epub:type='toc']` ordered-list structure of an
/// EPUB 3 navigation document. A streaming walk: serde fits neither the
/// namespaced `epub:type` attribute nor mixed content inside `a`.
pub fn parse_nav_doc(nav_path: &str, nav_xml: &str) -> Result<Vec<NavPoint>>
{
	let text = preprocess_entities(nav_xml);
	let cwd = path_parent(nav_path);
	let mut reader = quick_xml::Reader::from_str(&text);
	let mut toc = vec![];

	// depth of nav elements seen while searching, >0 once inside the
	// toc nav; ol_depth gives the entry level
	let mut in_toc_nav = false;
	let mut nav_depth = 0u32;
	let mut ol_depth = 0u32;
	let mut label: Option<String> = None;
	let mut href: Option<String> = None;
	let mut collecting_label = false;

	loop {
		let event = match reader.read_event() {
			Ok(event) => event,
			Err(e) => {
				warn!("malformed navigation document {}: {}", nav_path, e);
				break;
			}
		};
		match event {
			Event::Start(e) => match e.local_name().as_ref() {
				b"nav" => {
					nav_depth += 1;
					if !in_toc_nav && nav_type_is_toc(&e) {
						in_toc_nav = true;
						ol_depth = 0;
					}
				}
				b"ol" if in_toc_nav => ol_depth += 1,
				b"a" | b"span" if in_toc_nav && ol_depth > 0 => {
					collecting_label = true;
					label = Some(String::new());
					href = None;
					if e.local_name().as_ref() == b"a" {
						for attr in e.attributes().flatten() {
							if attr.key.local_name().as_ref() == b"href" {
								href = Some(attr.unescape_value()?.to_string());
							}
						}
					}
				}
				_ => {}
			},
			Event::End(e) => match e.local_name().as_ref() {
				b"nav" => {
					nav_depth = nav_depth.saturating_sub(1);
					if in_toc_nav && nav_depth == 0 {
						break;
					}
				}
				b"ol" if in_toc_nav => ol_depth = ol_depth.saturating_sub(1),
				b"a" | b"span" if collecting_label => {
					collecting_label = false;
					let text = label.take().unwrap_or_default();
					let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
					if text.is_empty() {
						warn!("navigation document entry with no text in {}", nav_path);
						continue;
					}
					let (src_file, src_anchor) = match &href {
						Some(href) => split_src(href, cwd),
						None => (None, None),
					};
					toc.push(NavPoint {
						label: Some(text),
						level: ol_depth.saturating_sub(1),
						src_file,
						src_anchor,
					});
				}
				_ => {}
			},
			Event::Text(e) => if collecting_label {
				if let Some(label) = &mut label {
					label.push_str(&String::from_utf8_lossy(e.as_ref()));
				}
			},
			Event::GeneralRef(e) => if collecting_label {
				if let (Some(ch), Some(label)) = (resolve_ref(&e), &mut label) {
					label.push(ch);
				}
			},
			Event::Eof => break,
			_ => {}
		}
	}
	if toc.is_empty() {
		Err(anyhow!("navigation document {} has no toc entries", nav_path))
	} else {
		Ok(toc)
	}
}

fn nav_type_is_toc(e: &BytesStart) -> bool
{
	for attr in e.attributes().flatten() {
		if attr.key.local_name().as_ref() == b"type" {
			let value = String::from_utf8_lossy(&attr.value);
			return value.split_ascii_whitespace().any(|v| v == "toc");
		}
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;

	const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

	const OPF: &str = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata><meta property="title">ignored</meta></metadata>
  <manifest>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style/main.css" media-type="text/css"/>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="css" linear="no"/>
    <itemref idref="ghost"/>
  </spine>
</package>"#;

	const NCX: &str = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="p1" playOrder="1">
      <navLabel><text>Chapter One</text></navLabel>
      <content src="text/ch1.xhtml"/>
      <navPoint id="p2" playOrder="2">
        <navLabel><text>Section 1.1</text></navLabel>
        <content src="text/ch1.xhtml#s11"/>
      </navPoint>
    </navPoint>
  </navMap>
</ncx>"#;

	const NAV: &str = r#"<?xml version="1.0"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>nav</title></head>
<body>
  <nav epub:type="landmarks"><ol><li><a href="x.xhtml">skip me</a></li></ol></nav>
  <nav epub:type="toc">
    <ol>
      <li><a href="text/ch1.xhtml">Chapter <i>One</i></a>
        <ol><li><a href="text/ch1.xhtml#s11">Section 1.1</a></li></ol>
      </li>
      <li><span>Part Two</span></li>
    </ol>
  </nav>
</body>
</html>"#;

	#[test]
	fn test_parse_rootfile_path()
	{
		assert_eq!(parse_rootfile_path(CONTAINER).unwrap(), "OEBPS/content.opf");
		assert!(matches!(
			parse_rootfile_path("<container><rootfiles/></container>"),
			Err(EpubError::InvalidContainer)));
		assert!(parse_rootfile_path("not xml <<").is_err());
	}

	#[test]
	fn test_parse_package_contents()
	{
		let package = parse_package_contents("OEBPS/content.opf", OPF).unwrap();
		assert_eq!(package.spine_ids, vec!["ch1", "css", "ghost"]);
		assert_eq!(package.toc_id.as_deref(), Some("ncx"));
		let item = &package.id_to_manifest_item["ch1"];
		assert_eq!(item.href_absolute, "OEBPS/text/ch1.xhtml");
		assert_eq!(item.media_type, APPLICATION_XHTML_XML);
		assert_eq!(package.id_to_manifest_item["nav"].properties.as_deref(), Some("nav"));
		assert!(parse_package_contents("content.opf", "<package/>").is_err());
	}

	#[test]
	fn test_parse_ncx()
	{
		let points = parse_ncx("OEBPS/toc.ncx", NCX).unwrap();
		assert_eq!(points.len(), 2);
		assert_eq!(points[0].label.as_deref(), Some("Chapter One"));
		assert_eq!(points[0].level, 0);
		assert_eq!(points[0].src_file.as_deref(), Some("OEBPS/text/ch1.xhtml"));
		assert_eq!(points[0].src_anchor, None);
		assert_eq!(points[1].level, 1);
		assert_eq!(points[1].src_anchor.as_deref(), Some("s11"));
		assert!(parse_ncx("toc.ncx", "<ncx><navMap/></ncx>").is_err());
	}

	#[test]
	fn test_parse_nav_doc()
	{
		let points = parse_nav_doc("OEBPS/nav.xhtml", NAV).unwrap();
		assert_eq!(points.len(), 3);
		assert_eq!(points[0].label.as_deref(), Some("Chapter One"));
		assert_eq!(points[0].level, 0);
		assert_eq!(points[0].src_file.as_deref(), Some("OEBPS/text/ch1.xhtml"));
		assert_eq!(points[1].label.as_deref(), Some("Section 1.1"));
		assert_eq!(points[1].level, 1);
		assert_eq!(points[1].src_anchor.as_deref(), Some("s11"));
		assert_eq!(points[2].label.as_deref(), Some("Part Two"));
		assert_eq!(points[2].src_file, None);
	}
}
