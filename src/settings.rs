use log::warn;

use crate::common::try_decode_u32;
use crate::store::StateStore;

const SETTINGS_KEY_SHOW_TITLE_BAR: &str = "show_title_bar";
const SETTINGS_KEY_SHOULDER_KEYMAP: &str = "shoulder_keymap";
const SETTINGS_KEY_COLOR_THEME: &str = "color_theme";
const SETTINGS_KEY_FONT_NAME: &str = "font_name";
const SETTINGS_KEY_FONT_SIZE: &str = "font_size";
const SETTINGS_KEY_PROGRESS_REPORTING: &str = "progress_reporting";

/// How the shell reports reading progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressReporting {
	Hidden,
	TocPercent,
	GlobalPercent,
}

pub fn encode_progress_reporting(progress: ProgressReporting) -> &'static str
{
	match progress {
		ProgressReporting::Hidden => "hidden",
		ProgressReporting::TocPercent => "toc_percent",
		ProgressReporting::GlobalPercent => "global_percent",
	}
}

pub fn decode_progress_reporting(text: &str) -> Option<ProgressReporting>
{
	match text {
		"hidden" => Some(ProgressReporting::Hidden),
		"toc_percent" => Some(ProgressReporting::TocPercent),
		"global_percent" => Some(ProgressReporting::GlobalPercent),
		_ => {
			warn!("unknown progress reporting setting: {}", text);
			None
		}
	}
}

pub fn get_show_title_bar(store: &StateStore) -> Option<bool>
{
	store.get_setting(SETTINGS_KEY_SHOW_TITLE_BAR).map(|v| v == "true")
}

pub fn set_show_title_bar(store: &mut StateStore, show_title_bar: bool)
{
	let value = if show_title_bar { "true" } else { "false" };
	store.set_setting(SETTINGS_KEY_SHOW_TITLE_BAR, value);
}

#[inline]
pub fn get_shoulder_keymap(store: &StateStore) -> Option<&str>
{
	store.get_setting(SETTINGS_KEY_SHOULDER_KEYMAP)
}

#[inline]
pub fn set_shoulder_keymap(store: &mut StateStore, keymap: &str)
{
	store.set_setting(SETTINGS_KEY_SHOULDER_KEYMAP, keymap);
}

#[inline]
pub fn get_color_theme(store: &StateStore) -> Option<&str>
{
	store.get_setting(SETTINGS_KEY_COLOR_THEME)
}

#[inline]
pub fn set_color_theme(store: &mut StateStore, color_theme: &str)
{
	store.set_setting(SETTINGS_KEY_COLOR_THEME, color_theme);
}

#[inline]
pub fn get_font_name(store: &StateStore) -> Option<&str>
{
	store.get_setting(SETTINGS_KEY_FONT_NAME)
}

#[inline]
pub fn set_font_name(store: &mut StateStore, font_name: &str)
{
	store.set_setting(SETTINGS_KEY_FONT_NAME, font_name);
}

pub fn get_font_size(store: &StateStore) -> Option<u32>
{
	try_decode_u32(store.get_setting(SETTINGS_KEY_FONT_SIZE)?)
}

pub fn set_font_size(store: &mut StateStore, font_size: u32)
{
	store.set_setting(SETTINGS_KEY_FONT_SIZE, font_size.to_string());
}

pub fn get_progress_reporting(store: &StateStore) -> Option<ProgressReporting>
{
	decode_progress_reporting(store.get_setting(SETTINGS_KEY_PROGRESS_REPORTING)?)
}

pub fn set_progress_reporting(store: &mut StateStore, progress: ProgressReporting)
{
	store.set_setting(SETTINGS_KEY_PROGRESS_REPORTING, encode_progress_reporting(progress));
}
