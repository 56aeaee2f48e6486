use thiserror::Error;

/// Conditions fatal to `EPubReader::open`. Everything else in the
/// pipeline degrades to defaulted data plus one diagnostic line.
#[derive(Error, Debug)]
pub enum EpubError {
	#[error("failed to open archive {path}: {reason}")]
	ZipOpen { path: String, reason: String },

	#[error("archive is encrypted")]
	Encrypted,

	#[error("no rootfile declared in META-INF/container.xml")]
	InvalidContainer,

	#[error("malformed package document {path}: {reason}")]
	InvalidPackage { path: String, reason: String },
}
