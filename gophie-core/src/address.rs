//! Gopher addresses: `[gopher://]host[:port][/selector]`.
//!
//! Besides the plain RFC 1436 triple, an address may carry a local type
//! prefix at the head of its selector (`/1/docs` is the menu `/docs`). The
//! prefix only exists for display and round-tripping addresses through the
//! navigation bar; it is never sent to a server.

use std::fmt;

use serde::Serialize;

use crate::error::AddressError;

pub const DEFAULT_PORT: u16 = 70;

const SCHEME: &str = "gopher://";

/// Type codes allowed in a selector type prefix.
const PREFIX_CODES: &str = "0123456789+gIThis?";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Address {
    host: String,
    port: u16,
    selector: String,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16, selector: impl Into<String>) -> Self {
        Address {
            host: host.into(),
            port,
            selector: selector.into(),
        }
    }

    /// Parses an address string.
    ///
    /// A malformed or zero port is a hard error; there is no fallback to the
    /// default port here (menu lines behave differently, see `MenuItem`).
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let rest = input.strip_prefix(SCHEME).unwrap_or(input);

        let (authority, selector) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (host, parse_port(port)?),
            None => (authority, DEFAULT_PORT),
        };

        Ok(Address::new(host, port, selector))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The selector as stored, including any type prefix.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// The selector as sent over the wire: the type prefix is removed and
    /// its closing `/` becomes the selector's leading `/`.
    pub fn wire_selector(&self) -> &str {
        if self.has_type_prefix() {
            &self.selector[2..]
        } else {
            &self.selector
        }
    }

    pub fn type_prefix(&self) -> Option<char> {
        let bytes = self.selector.as_bytes();
        if bytes.len() < 3 || bytes[0] != b'/' || bytes[2] != b'/' {
            return None;
        }
        // bytes[0] and bytes[2] are ASCII, so bytes[1] is a whole character.
        let code = char::from(bytes[1]);
        PREFIX_CODES.contains(code).then_some(code)
    }

    pub fn has_type_prefix(&self) -> bool {
        self.type_prefix().is_some()
    }

    /// Sets or replaces the type prefix at the head of the selector.
    pub fn set_type_prefix(&mut self, prefix: char) -> Result<(), AddressError> {
        if !PREFIX_CODES.contains(prefix) {
            return Err(AddressError::InvalidTypePrefix(prefix));
        }

        self.selector = if self.has_type_prefix() {
            format!("/{}/{}", prefix, &self.selector[3..])
        } else if self.selector.is_empty() {
            format!("/{}/", prefix)
        } else if self.selector.starts_with('/') {
            format!("/{}{}", prefix, self.selector)
        } else {
            format!("/{}/{}", prefix, self.selector)
        };
        Ok(())
    }

    /// Canonical `host[:port][/selector]` form. The port is omitted when it
    /// is the default; the type prefix is only kept on request.
    pub fn url_string(&self, include_type_prefix: bool) -> String {
        let mut result = self.host.clone();
        if self.port != DEFAULT_PORT {
            result.push(':');
            result.push_str(&self.port.to_string());
        }

        let selector = if include_type_prefix {
            self.selector.as_str()
        } else {
            self.wire_selector()
        };

        if !selector.is_empty() {
            if !selector.starts_with('/') {
                result.push('/');
            }
            result.push_str(selector);
        }
        result
    }

    /// Full `gopher://` URI without the type prefix.
    pub fn to_uri(&self) -> String {
        format!("{}{}", SCHEME, self.url_string(false))
    }

    /// Address of a full-text search request against this selector.
    pub fn with_query(&self, query: &str) -> Address {
        Address {
            host: self.host.clone(),
            port: self.port,
            selector: format!("{}\t{}", self.selector, query),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url_string(false))
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

fn parse_port(value: &str) -> Result<u16, AddressError> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(AddressError::InvalidPort(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_port_and_prefixed_selector() {
        let address = Address::parse("gopher://host:105/1/foo").unwrap();
        assert_eq!(address.host(), "host");
        assert_eq!(address.port(), 105);
        assert_eq!(address.selector(), "/1/foo");
        assert_eq!(address.type_prefix(), Some('1'));
        assert_eq!(address.url_string(false), "host:105/foo");
        assert_eq!(address.url_string(true), "host:105/1/foo");
        assert_eq!(address.wire_selector(), "/foo");
    }

    #[test]
    fn bare_host_is_root_on_default_port() {
        let address = Address::parse("gopher.floodgap.com").unwrap();
        assert_eq!(address.host(), "gopher.floodgap.com");
        assert_eq!(address.port(), DEFAULT_PORT);
        assert_eq!(address.selector(), "");
        assert_eq!(address.type_prefix(), None);
        assert_eq!(address.url_string(true), "gopher.floodgap.com");
        assert_eq!(address.to_uri(), "gopher://gopher.floodgap.com");
    }

    #[test]
    fn malformed_port_is_a_hard_error() {
        assert_eq!(
            Address::parse("host:bad/foo"),
            Err(AddressError::InvalidPort("bad".to_string()))
        );
        assert!(Address::parse("host:/foo").is_err());
        assert!(Address::parse("host:0").is_err());
        assert!(Address::parse("host:70000").is_err());
    }

    #[test]
    fn default_port_never_appears_in_canonical_strings() {
        for input in ["host:70/docs", "gopher://host:70", "host:70/1/x", "host:70/"] {
            let address = Address::parse(input).unwrap();
            assert!(!address.url_string(true).contains(":70"), "{}", input);
            assert!(!address.url_string(false).contains(":70"), "{}", input);
        }
    }

    #[test]
    fn prefix_requires_known_code() {
        assert_eq!(Address::parse("host/z/foo").unwrap().type_prefix(), None);
        assert_eq!(Address::parse("host/ab/foo").unwrap().type_prefix(), None);
        assert_eq!(Address::parse("host/9/").unwrap().type_prefix(), Some('9'));
        assert_eq!(Address::parse("host/?/x").unwrap().type_prefix(), Some('?'));
        assert_eq!(Address::parse("host/é/x").unwrap().type_prefix(), None);
    }

    #[test]
    fn set_type_prefix_variants() {
        let mut root = Address::parse("host").unwrap();
        root.set_type_prefix('1').unwrap();
        assert_eq!(root.selector(), "/1/");

        let mut slashed = Address::parse("host/docs/readme").unwrap();
        slashed.set_type_prefix('0').unwrap();
        assert_eq!(slashed.selector(), "/0/docs/readme");

        let mut bare = Address::new("host", 70, "docs");
        bare.set_type_prefix('0').unwrap();
        assert_eq!(bare.selector(), "/0/docs");

        let mut replaced = Address::parse("host/1/docs").unwrap();
        replaced.set_type_prefix('h').unwrap();
        assert_eq!(replaced.selector(), "/h/docs");

        let mut only_prefix = Address::parse("host/1/").unwrap();
        only_prefix.set_type_prefix('9').unwrap();
        assert_eq!(only_prefix.selector(), "/9/");

        assert_eq!(
            root.set_type_prefix('x'),
            Err(AddressError::InvalidTypePrefix('x'))
        );
    }

    #[test]
    fn type_prefix_round_trips_for_every_code_and_selector() {
        let selectors = ["", "/", "docs", "/docs", "/1/docs", "/z/docs", "/a", "/1/", "/x//y"];
        for code in PREFIX_CODES.chars() {
            for selector in selectors {
                let mut address = Address::new("host", 70, selector);
                address.set_type_prefix(code).unwrap();
                assert_eq!(address.type_prefix(), Some(code), "{:?} {:?}", code, selector);
            }
        }
    }

    #[test]
    fn stripping_the_prefix_keeps_the_remainder() {
        let mut address = Address::parse("host:7070/docs/file.txt").unwrap();
        address.set_type_prefix('0').unwrap();
        assert_eq!(address.url_string(true), "host:7070/0/docs/file.txt");
        assert_eq!(address.url_string(false), "host:7070/docs/file.txt");
        assert_eq!(address.to_string(), "host:7070/docs/file.txt");
    }

    #[test]
    fn wire_selector_keeps_the_leading_slash() {
        for (input, wire) in [
            ("host/1/docs", "/docs"),
            ("host/0/docs/readme.txt", "/docs/readme.txt"),
            ("host/9/", "/"),
            ("host/docs", "/docs"),
            ("host", ""),
        ] {
            assert_eq!(Address::parse(input).unwrap().wire_selector(), wire, "{}", input);
        }

        let mut address = Address::new("host", 70, "file.bin");
        address.set_type_prefix('9').unwrap();
        assert_eq!(address.selector(), "/9/file.bin");
        assert_eq!(address.wire_selector(), "/file.bin");
    }

    #[test]
    fn search_query_is_tab_separated() {
        let address = Address::parse("host/7/search").unwrap();
        let query = address.with_query("rust");
        assert_eq!(query.wire_selector(), "/search\trust");
    }
}
