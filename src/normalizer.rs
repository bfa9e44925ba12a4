//! Page URL parsing and normalization
//!
//! The tracker only needs a narrow slice of URL handling: split an absolute
//! `scheme://host/path?query#fragment` URL, resolve navigation targets against
//! the current page, read query parameters, and drop search/hash components
//! when the script tag asks for it.

use std::fmt;

use crate::error::PersonaError;

/// An absolute page URL split into its components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl {
    pub scheme: String,
    /// Host including any port
    pub host: String,
    /// Always starts with `/`
    pub path: String,
    /// Query without the leading `?`
    pub query: Option<String>,
    /// Fragment without the leading `#`
    pub fragment: Option<String>,
}

impl PageUrl {
    /// Parse an absolute URL
    pub fn parse(raw: &str) -> Result<Self, PersonaError> {
        let raw = raw.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| PersonaError::InvalidUrl(raw.to_string()))?;

        let valid_scheme = scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
        if scheme.is_empty() || !valid_scheme {
            return Err(PersonaError::InvalidUrl(raw.to_string()));
        }

        let (rest, fragment) = match rest.split_once('#') {
            Some((before, frag)) => (before, Some(frag.to_string())),
            None => (rest, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((before, q)) => (before, Some(q.to_string())),
            None => (rest, None),
        };
        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        if host.is_empty() {
            return Err(PersonaError::InvalidUrl(raw.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            path: path.to_string(),
            query,
            fragment,
        })
    }

    /// Resolve `reference` (absolute, protocol-relative, absolute-path,
    /// query-only, fragment-only or relative-path) against `self`.
    pub fn join(&self, reference: &str) -> Result<Self, PersonaError> {
        let reference = reference.trim();

        if reference.contains("://") {
            return Self::parse(reference);
        }
        if let Some(rest) = reference.strip_prefix("//") {
            return Self::parse(&format!("{}://{}", self.scheme, rest));
        }
        if reference.starts_with('/') {
            return Self::parse(&format!("{}{}", self.origin(), reference));
        }
        if reference.starts_with('?') {
            return Self::parse(&format!("{}{}{}", self.origin(), self.path, reference));
        }
        if reference.starts_with('#') {
            let mut joined = self.clone();
            joined.fragment = Some(reference[1..].to_string());
            return Ok(joined);
        }
        if reference.is_empty() {
            let mut joined = self.clone();
            joined.fragment = None;
            return Ok(joined);
        }

        let directory = match self.path.rfind('/') {
            Some(idx) => &self.path[..=idx],
            None => "/",
        };
        Self::parse(&format!("{}{}{}", self.origin(), directory, reference))
    }

    /// `scheme://host`
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    /// Host without port
    pub fn hostname(&self) -> &str {
        match self.host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => &self.host,
        }
    }

    /// First value of a query parameter, percent-decoded
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if percent_decode(key) == name {
                Some(percent_decode(value))
            } else {
                None
            }
        })
    }
}

impl fmt::Display for PageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}

/// Decode `+` and `%XX` escapes; invalid escapes are kept verbatim
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Applies the `exclude-search` / `exclude-hash` options to tracked URLs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrlNormalizer {
    pub exclude_search: bool,
    pub exclude_hash: bool,
}

impl UrlNormalizer {
    pub fn new(exclude_search: bool, exclude_hash: bool) -> Self {
        Self {
            exclude_search,
            exclude_hash,
        }
    }

    /// Resolve `raw` against `base` and strip excluded components.
    /// Unparseable input is returned unchanged.
    pub fn normalize(&self, raw: &str, base: Option<&PageUrl>) -> String {
        if raw.is_empty() {
            return String::new();
        }

        let parsed = match base {
            Some(base) => base.join(raw),
            None => PageUrl::parse(raw),
        };

        match parsed {
            Ok(mut url) => {
                if self.exclude_search {
                    url.query = None;
                }
                if self.exclude_hash {
                    url.fragment = None;
                }
                url.to_string()
            }
            Err(_) => raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_components() {
        let url = PageUrl::parse("https://Example.com:8080/pricing?utm_source=x#plans").unwrap();
        assert_eq!(url.scheme, "https");
        assert_eq!(url.host, "example.com:8080");
        assert_eq!(url.hostname(), "example.com");
        assert_eq!(url.path, "/pricing");
        assert_eq!(url.query.as_deref(), Some("utm_source=x"));
        assert_eq!(url.fragment.as_deref(), Some("plans"));
        assert_eq!(url.to_string(), "https://example.com:8080/pricing?utm_source=x#plans");
    }

    #[test]
    fn test_parse_without_path() {
        let url = PageUrl::parse("https://example.com").unwrap();
        assert_eq!(url.path, "/");
        assert!(PageUrl::parse("/relative").is_err());
        assert!(PageUrl::parse("https:///nohost").is_err());
    }

    #[test]
    fn test_join_references() {
        let base = PageUrl::parse("https://example.com/docs/intro?a=1#top").unwrap();
        assert_eq!(base.join("/pricing").unwrap().to_string(), "https://example.com/pricing");
        assert_eq!(
            base.join("setup").unwrap().to_string(),
            "https://example.com/docs/setup"
        );
        assert_eq!(
            base.join("?b=2").unwrap().to_string(),
            "https://example.com/docs/intro?b=2"
        );
        assert_eq!(
            base.join("#faq").unwrap().to_string(),
            "https://example.com/docs/intro?a=1#faq"
        );
        assert_eq!(
            base.join("//cdn.example.com/x").unwrap().to_string(),
            "https://cdn.example.com/x"
        );
        assert_eq!(
            base.join("http://other.test/").unwrap().host,
            "other.test"
        );
    }

    #[test]
    fn test_query_param_decoding() {
        let url = PageUrl::parse("https://e.com/?utm_campaign=spring%20sale&utm_medium=e+mail&x")
            .unwrap();
        assert_eq!(url.query_param("utm_campaign").as_deref(), Some("spring sale"));
        assert_eq!(url.query_param("utm_medium").as_deref(), Some("e mail"));
        assert_eq!(url.query_param("x").as_deref(), Some(""));
        assert_eq!(url.query_param("utm_source"), None);
    }

    #[test]
    fn test_percent_decode_keeps_bad_escapes() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz1"), "%zz1");
        assert_eq!(percent_decode("%41b"), "Ab");
    }

    #[test]
    fn test_normalizer_excludes_components() {
        let normalizer = UrlNormalizer::new(true, true);
        assert_eq!(
            normalizer.normalize("https://e.com/a?b=1#c", None),
            "https://e.com/a"
        );

        let keep = UrlNormalizer::default();
        assert_eq!(keep.normalize("https://e.com/a?b=1#c", None), "https://e.com/a?b=1#c");
        assert_eq!(keep.normalize("not a url", None), "not a url");
        assert_eq!(keep.normalize("", None), "");
    }
}
