//! Canonical thread keys derived from the path segment of a request URL.

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ThreadPathError {
    #[error("path is not valid percent-encoded UTF-8")] BadEncoding,
    #[error("path is outside the allowed prefixes")] NotAllowed,
}

/// Percent-decode `raw`, force a leading slash, collapse slash runs and drop
/// the trailing slash (the root stays `/`).
pub fn normalize(raw: &str) -> Result<String, ThreadPathError> {
    let decoded = urlencoding::decode(raw).map_err(|_| ThreadPathError::BadEncoding)?;
    let mut key = String::with_capacity(decoded.len() + 1);
    for segment in decoded.split('/').filter(|s| !s.is_empty()) {
        key.push('/');
        key.push_str(segment);
    }
    if key.is_empty() {
        key.push('/');
    }
    Ok(key)
}

/// An empty allow-list admits everything. Otherwise `key` must equal a prefix
/// or continue it at a `/` boundary.
pub fn is_allowed(key: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    allowed.iter().any(|prefix| {
        prefix == "/"
            || key == prefix
            || (key.starts_with(prefix.as_str()) && key[prefix.len()..].starts_with('/'))
    })
}

/// Normalize and check against the allow-list in one step.
pub fn resolve(raw: &str, allowed: &[String]) -> Result<String, ThreadPathError> {
    let key = normalize(raw)?;
    if is_allowed(&key, allowed) { Ok(key) } else { Err(ThreadPathError::NotAllowed) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_and_duplicate_slashes_collapse() {
        assert_eq!(normalize("/sub/path/").unwrap(), "/sub/path");
        assert_eq!(normalize("sub//path").unwrap(), "/sub/path");
        assert_eq!(normalize("//sub/path//").unwrap(), "/sub/path");
    }

    #[test]
    fn root_variants() {
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("%2F%2F").unwrap(), "/");
    }

    #[test]
    fn percent_encoded_forms_share_a_key() {
        assert_eq!(normalize("%2Fpath/%2F").unwrap(), "/path");
        assert_eq!(normalize("/path").unwrap(), "/path");
        assert_eq!(normalize("/caf%C3%A9.html").unwrap(), "/café.html");
    }

    #[test]
    fn extensions_are_kept_distinct() {
        assert_ne!(normalize("/path.html").unwrap(), normalize("/path").unwrap());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert_eq!(normalize("/%FF%FE").unwrap_err(), ThreadPathError::BadEncoding);
    }

    #[test]
    fn allow_list_matches_on_segment_boundaries() {
        let allowed = vec!["/blog".to_string()];
        assert!(is_allowed("/blog", &allowed));
        assert!(is_allowed("/blog/first-post", &allowed));
        assert!(!is_allowed("/blogroll", &allowed));
        assert!(!is_allowed("/", &allowed));
        assert!(is_allowed("/anything", &[]));
        assert_eq!(resolve("/blogroll/", &allowed).unwrap_err(), ThreadPathError::NotAllowed);
    }
}
