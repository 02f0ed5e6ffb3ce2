//! Cookie header parsing and `set-cookie` serialization (RFC 6265 style).

use crate::error::Error;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, SystemTime};

/// Parsed request cookies, name to decoded value.
pub type Cookies = HashMap<String, String>;

// everything `encodeURIComponent` would escape
const COOKIE_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes of a `set-cookie` assignment.
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    pub max_age: Option<Duration>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<SystemTime>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn expires(mut self, expires: SystemTime) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}

/// Parses a `cookie` request header. The first occurrence of a name wins.
pub fn parse(header: &str) -> Cookies {
    let mut cookies = Cookies::new();

    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };

        let name = name.trim();
        if name.is_empty() || cookies.contains_key(name) {
            continue;
        }

        let value = value.trim();
        let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
        let decoded = percent_decode_str(value).decode_utf8().map_or_else(|_| value.to_string(), |v| v.into_owned());

        cookies.insert(name.to_string(), decoded);
    }

    cookies
}

/// Serializes one cookie assignment into a `set-cookie` header value.
pub fn serialize(name: &str, value: &str, options: &CookieOptions) -> Result<String, Error> {
    if name.is_empty() || !name.bytes().all(is_token) {
        return Err(Error::internal(format!("cookie name '{name}' is invalid")));
    }

    let mut cookie = format!("{name}={}", utf8_percent_encode(value, COOKIE_VALUE));

    if let Some(max_age) = options.max_age {
        let _ = write!(cookie, "; Max-Age={}", max_age.as_secs());
    }

    if let Some(domain) = &options.domain {
        check_attribute("domain", domain)?;
        let _ = write!(cookie, "; Domain={domain}");
    }

    if let Some(path) = &options.path {
        check_attribute("path", path)?;
        let _ = write!(cookie, "; Path={path}");
    }

    if let Some(expires) = options.expires {
        let _ = write!(cookie, "; Expires={}", httpdate::fmt_http_date(expires));
    }

    if options.http_only {
        cookie.push_str("; HttpOnly");
    }

    if options.secure {
        cookie.push_str("; Secure");
    }

    if let Some(same_site) = options.same_site {
        let _ = write!(cookie, "; SameSite={}", same_site.as_str());
    }

    Ok(cookie)
}

fn check_attribute(attribute: &str, value: &str) -> Result<(), Error> {
    if value.bytes().all(|b| (0x20..0x7f).contains(&b) && b != b';') {
        Ok(())
    } else {
        Err(Error::internal(format!("cookie {attribute} '{value}' is invalid")))
    }
}

// token characters of RFC 7230
fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
