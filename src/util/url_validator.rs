use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Query parameters that newsletter links carry for campaign tracking.
///
/// They are stripped before a link becomes an article's natural key, so the
/// same story linked on two runs with different campaign tags stays one row.
const TRACKING_PARAMS: &[&str] = &["utm_source", "utm_medium", "utm_campaign", "utm_content", "utm_term", "ref"];

/// Errors that can occur while turning a digest link into an article URL.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The href could not be parsed or resolved.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The link uses a scheme other than http or https (mailto:, javascript:, ...).
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The link points to localhost or a private/internal address.
    #[error("Private or loopback host not allowed: {0}")]
    PrivateHost(String),
}

/// Resolves an href found in a digest page into an absolute article URL.
///
/// Relative links are joined onto `base` (the digest page URL). The result
/// must be http(s), must not point at loopback or private address space, and
/// has campaign tracking parameters and fragments removed.
///
/// # Examples
///
/// ```
/// use tldr_harvest::util::resolve_article_link;
/// use url::Url;
///
/// let base = Url::parse("https://tldr.tech/tech/2024-01-02").unwrap();
/// let url = resolve_article_link(&base, "https://example.com/post?utm_source=tldr").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/post");
///
/// assert!(resolve_article_link(&base, "mailto:hi@example.com").is_err());
/// ```
pub fn resolve_article_link(base: &Url, href: &str) -> Result<Url, LinkError> {
    let mut url = base.join(href.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(LinkError::UnsupportedScheme(scheme.to_owned())),
    }

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(LinkError::PrivateHost(host.to_owned()));
        }

        // IPv6 hosts come back bracketed from host_str()
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = bare.parse::<IpAddr>() {
            if is_private_ip(&ip) {
                return Err(LinkError::PrivateHost(ip.to_string()));
            }
        }
    }

    strip_tracking(&mut url);
    url.set_fragment(None);
    Ok(url)
}

fn strip_tracking(url: &mut Url) {
    if url.query().is_none() {
        return;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://tldr.tech/tech/2024-01-02").unwrap()
    }

    #[test]
    fn test_absolute_link_accepted() {
        let url = resolve_article_link(&base(), "https://example.com/a").unwrap();
        assert_eq!(url.as_str(), "https://example.com/a");
    }

    #[test]
    fn test_relative_link_resolved_against_page() {
        let url = resolve_article_link(&base(), "/tech/2024-01-02/item").unwrap();
        assert_eq!(url.as_str(), "https://tldr.tech/tech/2024-01-02/item");
    }

    #[test]
    fn test_non_http_schemes_rejected() {
        assert!(matches!(
            resolve_article_link(&base(), "mailto:editor@tldr.tech"),
            Err(LinkError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            resolve_article_link(&base(), "javascript:void(0)"),
            Err(LinkError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_private_hosts_rejected() {
        assert!(resolve_article_link(&base(), "http://localhost/x").is_err());
        assert!(resolve_article_link(&base(), "http://127.0.0.1/x").is_err());
        assert!(resolve_article_link(&base(), "http://192.168.1.1/x").is_err());
        assert!(resolve_article_link(&base(), "http://[::1]/x").is_err());
        assert!(resolve_article_link(&base(), "http://[fe80::1]/x").is_err());
    }

    #[test]
    fn test_tracking_params_stripped_others_kept() {
        let url = resolve_article_link(
            &base(),
            "https://example.com/post?id=7&utm_source=tldrnewsletter&utm_campaign=x#comments",
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://example.com/post?id=7");
    }

    #[test]
    fn test_only_tracking_params_drops_query() {
        let url =
            resolve_article_link(&base(), "https://example.com/post?utm_source=tldrai").unwrap();
        assert_eq!(url.query(), None);
    }
}
