use std::borrow::Cow;

/// Percent-encodes a package name for use as a URL path segment.
///
/// Scoped names keep their leading `@` literal, so `@scope/pkg` becomes
/// `@scope%2Fpkg` (the form npm clients and registries exchange).
pub fn encode_package(name: &str) -> String {
    let encoded = urlencoding::encode(name);
    match encoded {
        Cow::Borrowed(plain) => plain.to_string(),
        Cow::Owned(escaped) => {
            if let Some(rest) = escaped.strip_prefix("%40") {
                format!("@{rest}")
            } else {
                escaped
            }
        }
    }
}

/// Joins a base URL (stored without trailing slash) and a path with exactly
/// one separator.
pub fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Concatenates a base URL and a caller-supplied path, collapsing runs of
/// `/` everywhere except the scheme separator.
pub fn join_collapsing(base: &str, path: &str) -> String {
    let raw = format!("{base}{path}");
    let (scheme, rest) = match raw.find("://") {
        Some(idx) => raw.split_at(idx + 3),
        None => ("", raw.as_str()),
    };

    let mut collapsed = String::with_capacity(raw.len());
    collapsed.push_str(scheme);
    let mut last_was_slash = false;
    for c in rest.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(c);
    }
    collapsed
}
