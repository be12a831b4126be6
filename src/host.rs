//! Host derivation: the coarse logical partition key used as a directory name
//! and as the correlator/writer's grouping key.
//!
//! The stripping rule is intentionally coarse and kept in exactly one place
//! so that any future change stays uniform across writer, registry, and
//! correlator.

/// Derive the registrable host for a URL: lowercase the host, strip a single
/// leading `www.` or `m.` label, and fall back to `unknown` for anything
/// without a parseable host (data:, about:, chrome:, empty strings, ...).
pub fn derive_host(url: &str) -> String {
    let Some(host) = extract_host(url) else {
        return "unknown".to_owned();
    };
    if host.is_empty() {
        return "unknown".to_owned();
    }
    let lower = host.to_ascii_lowercase();
    let stripped = lower
        .strip_prefix("www.")
        .or_else(|| lower.strip_prefix("m."))
        .unwrap_or(&lower);
    if stripped.is_empty() {
        "unknown".to_owned()
    } else {
        stripped.to_owned()
    }
}

/// `true` for schemes the registry should observe (`http`/`https`); `false`
/// for the browser's internal pages and any other scheme.
pub fn is_observable_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn extract_host(url: &str) -> Option<&str> {
    let after_scheme = url.split_once("://")?.1;
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(after_scheme);
    // Strip userinfo and port; keep bracketed IPv6 literals intact.
    let authority = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next();
    }
    Some(authority.split_once(':').map_or(authority, |(h, _)| h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_www() {
        assert_eq!(derive_host("https://www.example.com/x"), "example.com");
    }

    #[test]
    fn strips_mobile_prefix() {
        assert_eq!(derive_host("https://m.b.test/y"), "b.test");
    }

    #[test]
    fn lowercases() {
        assert_eq!(derive_host("https://Example.COM/"), "example.com");
    }

    #[test]
    fn unknown_for_opaque_origin() {
        assert_eq!(derive_host("about:blank"), "unknown");
        assert_eq!(derive_host(""), "unknown");
        assert_eq!(derive_host("data:text/html,hi"), "unknown");
    }

    #[test]
    fn keeps_port_out_of_host() {
        assert_eq!(derive_host("https://example.com:8443/x"), "example.com");
    }

    #[test]
    fn observable_url_filters_schemes() {
        assert!(is_observable_url("https://example.com/"));
        assert!(is_observable_url("http://example.com/"));
        assert!(!is_observable_url("chrome://settings"));
        assert!(!is_observable_url("devtools://devtools/bundled/x"));
        assert!(!is_observable_url("about:blank"));
    }
}
