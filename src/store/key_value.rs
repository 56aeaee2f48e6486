use anyhow::Result;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Load a flat `key=value` line file. Lines without `=` are skipped,
/// keys and values are trimmed, the last duplicate wins. A missing or
/// unreadable file is an empty map.
pub(crate) fn load_key_value(path: &Path) -> HashMap<String, String>
{
	let mut map = HashMap::new();
	if let Ok(text) = fs::read_to_string(path) {
		for line in text.lines() {
			if let Some(pos) = line.find('=') {
				let key = line[..pos].trim();
				let value = line[pos + 1..].trim();
				if !key.is_empty() {
					map.insert(key.to_owned(), value.to_owned());
				}
			}
		}
	}
	map
}

/// Rewrite the whole map, keys sorted so rewrites are deterministic.
/// Unknown keys survive because the in-memory map carries everything
/// that was loaded.
pub(crate) fn write_key_value(path: &Path, map: &HashMap<String, String>) -> Result<()>
{
	let mut keys: Vec<&String> = map.keys().collect();
	keys.sort();
	let mut text = String::new();
	for key in keys {
		text.push_str(key);
		text.push('=');
		text.push_str(&map[key]);
		text.push('\n');
	}
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	fs::write(path, text)?;
	Ok(())
}
