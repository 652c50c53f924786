use crate::error::{NeighborError, Result};
use std::path::{Path, PathBuf};
use url::Url;

pub const FILE_SCHEME: &str = "file";

pub fn is_file_uri(uri: &str) -> bool {
    Url::parse(uri).is_ok_and(|url| url.scheme() == FILE_SCHEME)
}

pub fn file_uri_to_path(uri: &str) -> Result<PathBuf> {
    let url = Url::parse(uri).map_err(|e| NeighborError::invalid_uri(format!("{uri}: {e}")))?;
    if url.scheme() != FILE_SCHEME {
        return Err(NeighborError::invalid_uri(format!(
            "{uri}: scheme '{}' is not a file",
            url.scheme()
        )));
    }
    url.to_file_path()
        .map_err(|()| NeighborError::invalid_uri(format!("{uri}: no local path")))
}

pub fn path_to_file_uri(path: &Path) -> Result<String> {
    Url::from_file_path(path)
        .map(String::from)
        .map_err(|()| NeighborError::invalid_uri(path.display().to_string()))
}

/// Last path segment of a URI, percent-decoded when it is a file URI.
pub fn basename(uri: &str) -> String {
    if let Ok(path) = file_uri_to_path(uri) {
        if let Some(name) = path.file_name() {
            return name.to_string_lossy().into_owned();
        }
    }
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(uri)
        .to_string()
}

/// Path of `uri` relative to `root` with `/` separators, or the basename when
/// the URI lies outside it.
pub fn relative_path(uri: &str, root: &Path) -> String {
    let Ok(path) = file_uri_to_path(uri) else {
        return basename(uri);
    };
    match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => basename(uri),
    }
}
