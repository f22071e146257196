use crate::config::{MainConfig, StringOrVec, UplinkConfig};
use tracing::debug;

/// Decides whether an explicit HTTP(S) proxy applies to `host`.
///
/// The uplink's own `http_proxy`/`https_proxy` wins over the main config's;
/// the `no_proxy` list (again uplink over main) can clear the decision via
/// dot-suffix matching, so an entry `example.com` excludes both
/// `example.com` and every subdomain.
pub fn resolve_proxy(
    host: &str,
    https: bool,
    uplink: &UplinkConfig,
    main: &MainConfig,
) -> Option<String> {
    let proxy = if https {
        uplink.https_proxy.as_ref().or(main.https_proxy.as_ref())
    } else {
        uplink.http_proxy.as_ref().or(main.http_proxy.as_ref())
    };
    let proxy = proxy.filter(|url| !url.trim().is_empty())?;

    let no_proxy = uplink.no_proxy.as_ref().or(main.no_proxy.as_ref());
    if let Some(list) = no_proxy {
        if matches_no_proxy(host, list) {
            return None;
        }
    }

    Some(proxy.clone())
}

fn matches_no_proxy(host: &str, list: &StringOrVec) -> bool {
    let normalized_host = dot_prefixed(host);
    for entry in list.entries() {
        let suffix = dot_prefixed(&entry);
        if normalized_host.ends_with(&suffix) {
            debug!(host, entry = entry.as_str(), "not using proxy, excluded by no_proxy");
            return true;
        }
    }
    false
}

fn dot_prefixed(value: &str) -> String {
    if value.starts_with('.') {
        value.to_string()
    } else {
        format!(".{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::resolve_proxy;
    use crate::config::{MainConfig, StringOrVec, UplinkConfig};

    fn main_config() -> MainConfig {
        MainConfig::new("test/1.0.0", "srv")
    }

    #[test]
    fn uplink_proxy_wins_over_main() {
        let mut uplink = UplinkConfig::new("http://pkg.example.com");
        uplink.http_proxy = Some("http://uplink-proxy:8080".to_string());
        let mut main = main_config();
        main.http_proxy = Some("http://main-proxy:8080".to_string());

        assert_eq!(
            resolve_proxy("pkg.example.com", false, &uplink, &main).as_deref(),
            Some("http://uplink-proxy:8080")
        );
    }

    #[test]
    fn falls_back_to_main_proxy_per_scheme() {
        let uplink = UplinkConfig::new("https://pkg.example.com");
        let mut main = main_config();
        main.https_proxy = Some("http://corp:8080".to_string());

        assert_eq!(
            resolve_proxy("pkg.example.com", true, &uplink, &main).as_deref(),
            Some("http://corp:8080")
        );
        assert_eq!(resolve_proxy("pkg.example.com", false, &uplink, &main), None);
    }

    #[test]
    fn no_proxy_suffix_clears_the_proxy() {
        let mut uplink = UplinkConfig::new("https://pkg.example.com");
        uplink.https_proxy = Some("http://corp:8080".to_string());
        uplink.no_proxy = Some(StringOrVec::One(".example.com".to_string()));

        assert_eq!(resolve_proxy("pkg.example.com", true, &uplink, &main_config()), None);
    }

    #[test]
    fn no_proxy_entry_without_dot_still_matches_subdomains() {
        let mut uplink = UplinkConfig::new("https://pkg.example.com");
        uplink.https_proxy = Some("http://corp:8080".to_string());
        uplink.no_proxy = Some(StringOrVec::One("example.com".to_string()));

        assert_eq!(resolve_proxy("pkg.example.com", true, &uplink, &main_config()), None);
        assert_eq!(resolve_proxy("example.com", true, &uplink, &main_config()), None);
    }

    #[test]
    fn unrelated_no_proxy_entries_keep_the_proxy() {
        let mut uplink = UplinkConfig::new("https://pkg.example.com");
        uplink.https_proxy = Some("http://corp:8080".to_string());
        uplink.no_proxy = Some(StringOrVec::One("other.org, internal".to_string()));

        assert_eq!(
            resolve_proxy("pkg.example.com", true, &uplink, &main_config()).as_deref(),
            Some("http://corp:8080")
        );
    }

    #[test]
    fn uplink_no_proxy_overrides_main_list() {
        let mut uplink = UplinkConfig::new("https://pkg.example.com");
        uplink.https_proxy = Some("http://corp:8080".to_string());
        uplink.no_proxy = Some(StringOrVec::Many(vec!["other.org".to_string()]));
        let mut main = main_config();
        main.no_proxy = Some(StringOrVec::One("example.com".to_string()));

        // The uplink list replaces (not extends) the main list.
        assert_eq!(
            resolve_proxy("pkg.example.com", true, &uplink, &main).as_deref(),
            Some("http://corp:8080")
        );
    }
}
