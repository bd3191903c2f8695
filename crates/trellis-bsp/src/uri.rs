//! `file://` URI helpers.
//!
//! BSP reports every location as a URI; only `file` URIs map to paths.

use std::path::{Path, PathBuf};

use url::Url;

pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    let url = Url::parse(uri).ok()?;
    if url.scheme() != "file" {
        return None;
    }
    url.to_file_path().ok()
}

/// Requires an absolute path.
pub fn path_to_file_uri(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}

/// Like [`path_to_file_uri`] but with a trailing `/`, the BSP convention for directories.
pub fn dir_to_file_uri(path: &Path) -> Option<String> {
    Url::from_directory_path(path).ok().map(String::from)
}

/// URIs ending in `/` name directories.
pub fn is_directory_uri(uri: &str) -> bool {
    uri.ends_with('/')
}

/// Human-readable location for `uri`: the filesystem path for `file` URIs, the URI otherwise.
pub fn display_uri(uri: &str) -> String {
    match file_uri_to_path(uri) {
        Some(path) => path.display().to_string(),
        None => uri.to_string(),
    }
}
