//! Path validation and splitting. A path is `/` (the root) or a slash
//! separated sequence of non-empty components drawn from letters, digits,
//! `-`, and `.` — no spaces, no `=`, no empty components, no trailing
//! slash except the root itself.

use crate::error::StoreError;

fn is_valid_component(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

pub fn check_path(path: &str) -> Result<(), StoreError> {
    if !path.starts_with('/') {
        return Err(StoreError::BadPath(path.to_string()));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(StoreError::BadPath(path.to_string()));
    }
    for comp in path[1..].split('/') {
        if !is_valid_component(comp) {
            return Err(StoreError::BadPath(path.to_string()));
        }
    }
    Ok(())
}

/// Splits a validated path into its components. `split("/")` is empty.
pub fn split(path: &str) -> Vec<&str> {
    if path == "/" {
        Vec::new()
    } else {
        path[1..].split('/').collect()
    }
}

pub fn join(components: &[&str]) -> String {
    if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}
