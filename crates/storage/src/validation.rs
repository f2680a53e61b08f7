use crate::StorageError;

/// Normalizes a storage path relative to an adapter root.
///
/// Leading, trailing and repeated separators are dropped, as are `.`
/// components; both `/` and `\` separate components. The root itself
/// normalizes to the empty string.
///
/// Rejects parent directory traversal (`..`) and Windows drive prefixes.
pub fn normalize_storage_path(path: &str) -> Result<String, StorageError> {
    let mut parts = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                return Err(StorageError::InvalidPath(format!(
                    "parent directory traversal not allowed: {path}"
                )));
            }
            p if p.len() == 2 && p.ends_with(':') => {
                return Err(StorageError::InvalidPath(format!(
                    "path prefix not allowed: {path}"
                )));
            }
            p => parts.push(p),
        }
    }
    Ok(parts.join("/"))
}

/// Joins a normalized base with a relative storage path.
pub fn join_storage_path(base: &str, path: &str) -> Result<String, StorageError> {
    let rel = normalize_storage_path(path)?;
    let base = normalize_storage_path(base)?;
    Ok(match (base.is_empty(), rel.is_empty()) {
        (true, _) => rel,
        (false, true) => base,
        (false, false) => format!("{base}/{rel}"),
    })
}
