//! Node path checks applied before a path leaves the client.

/// Checks that `path` is an absolute node path.
///
/// A sequential create may end in `/`, since the server appends the
/// sequence number to whatever it is given. Returns the reason on failure.
pub(crate) fn check(path: &str, sequential: bool) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("path must not be empty");
    }
    if !path.starts_with('/') {
        return Err("path must start with /");
    }
    if path == "/" {
        return Ok(());
    }
    if path.contains('\0') {
        return Err("path must not contain a null character");
    }

    let body = &path[1..];
    let body = if sequential {
        body.strip_suffix('/').unwrap_or(body)
    } else {
        body
    };
    for segment in body.split('/') {
        match segment {
            "" => return Err("path must not contain an empty node name"),
            "." | ".." => return Err("relative paths are not allowed"),
            _ => {}
        }
    }
    Ok(())
}
