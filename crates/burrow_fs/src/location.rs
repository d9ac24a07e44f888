//! FileUrl - Location parsing and canonicalization
//!
//! Every file handle is identified by a `FileUrl`. Native paths (`/usr/lib`,
//! `C:\Windows`, `~/docs`) and UNC paths (`\\host\share`) are rewritten into
//! `scheme://` form first so there is a single parsing path.

use crate::{canonize, Credentials, FsError, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

/// Scheme of the local file system
pub const LOCAL_SCHEME: &str = "file";

/// Separator used by every path in URL form
pub const SEPARATOR: &str = "/";

const PASSWORD_MASK: &str = "********";

/// Characters escaped in the login and password parts
const CREDENTIAL_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'%')
    .add(b':')
    .add(b'@')
    .add(b'/')
    .add(b'?')
    .add(b'#');

/// Per-scheme parsing and grouping rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemeInfo {
    pub scheme: &'static str,
    /// Port used when the location does not name one
    pub default_port: Option<u16>,
    /// Does `?` start a query part?
    pub has_query: bool,
    /// Leading path segments that belong to the realm (the SMB share)
    pub realm_segments: usize,
    /// Login/password a server accepts without prompting
    pub guest: Option<(&'static str, &'static str)>,
}

const SCHEMES: &[SchemeInfo] = &[
    SchemeInfo {
        scheme: LOCAL_SCHEME,
        default_port: None,
        has_query: false,
        realm_segments: 0,
        guest: None,
    },
    SchemeInfo {
        scheme: "ftp",
        default_port: Some(21),
        has_query: false,
        realm_segments: 0,
        guest: Some(("anonymous", "")),
    },
    SchemeInfo {
        scheme: "sftp",
        default_port: Some(22),
        has_query: false,
        realm_segments: 0,
        guest: None,
    },
    SchemeInfo {
        scheme: "smb",
        default_port: None,
        has_query: false,
        realm_segments: 1,
        guest: Some(("guest", "")),
    },
    SchemeInfo {
        scheme: "http",
        default_port: Some(80),
        has_query: true,
        realm_segments: 0,
        guest: None,
    },
    SchemeInfo {
        scheme: "https",
        default_port: Some(443),
        has_query: true,
        realm_segments: 0,
        guest: None,
    },
];

static UNKNOWN_SCHEME: SchemeInfo = SchemeInfo {
    scheme: "",
    default_port: None,
    has_query: false,
    realm_segments: 0,
    guest: None,
};

impl SchemeInfo {
    /// Rules for a scheme; unknown schemes get neutral defaults
    pub fn for_scheme(scheme: &str) -> &'static SchemeInfo {
        SCHEMES
            .iter()
            .find(|info| info.scheme.eq_ignore_ascii_case(scheme))
            .unwrap_or(&UNKNOWN_SCHEME)
    }
}

/// Parsed location: scheme, host, port, credentials, path and query
///
/// Equality ignores credentials and properties, compares hosts
/// case-insensitively, treats the scheme's default port like an omitted one
/// and ignores a trailing separator on the path.
#[derive(Debug, Clone)]
pub struct FileUrl {
    scheme: String,
    host: Option<String>,
    port: Option<u16>,
    path: String,
    query: Option<String>,
    credentials: Option<Credentials>,
    properties: BTreeMap<String, String>,
}

impl FileUrl {
    /// Parse a location, expanding `~` to the user's home directory for local paths
    pub fn parse(raw: &str) -> Result<Self> {
        let home = home_dir();
        Self::parse_with_home(raw, home.as_deref())
    }

    /// Parse a location with an explicit tilde expansion
    pub fn parse_with_home(raw: &str, home: Option<&str>) -> Result<Self> {
        let normalized = normalize_location(raw)?;
        Self::parse_generic(&normalized, home)
    }

    /// Location of a native path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let url_path = native_to_url_path(path.as_ref());
        if !url_path.starts_with(SEPARATOR) {
            return Err(FsError::MalformedLocation(format!(
                "Not an absolute path: {}",
                path.as_ref().display()
            )));
        }
        Self::parse_generic(&format!("{}://{}", LOCAL_SCHEME, url_path), None)
    }

    fn parse_generic(url: &str, home: Option<&str>) -> Result<Self> {
        let scheme_end = url
            .find("://")
            .ok_or_else(|| FsError::MalformedLocation(format!("Missing scheme: {}", url)))?;
        let scheme = &url[..scheme_end];
        if !is_valid_scheme(scheme) {
            return Err(FsError::MalformedLocation(format!(
                "Invalid scheme '{}' in {}",
                scheme, url
            )));
        }
        let scheme = scheme.to_ascii_lowercase();
        let info = SchemeInfo::for_scheme(&scheme);

        let rest = &url[scheme_end + 3..];
        let query_start = if info.has_query { rest.find('?') } else { None };
        let before_query = &rest[..query_start.unwrap_or(rest.len())];
        let path_start = before_query.find('/').unwrap_or(before_query.len());

        // Authority is read right to left: credentials end at the last '@'
        let authority = &before_query[..path_start];
        let (user_info, host_port) = match authority.rfind('@') {
            Some(at) => (Some(&authority[..at]), &authority[at + 1..]),
            None => (None, authority),
        };

        let credentials = match user_info {
            Some(info) if !info.is_empty() => {
                let (login, password) = info.split_once(':').unwrap_or((info, ""));
                Some(Credentials::new(decode_part(login)?, decode_part(password)?))
            }
            _ => None,
        };

        let (host, port) = split_host_port(host_port, url)?;

        let raw_path = &before_query[path_start..];
        let tilde = if scheme == LOCAL_SCHEME { home } else { None };
        let mut path = canonize(
            if raw_path.is_empty() { SEPARATOR } else { raw_path },
            SEPARATOR,
            tilde,
        )?;
        if !path.starts_with(SEPARATOR) {
            path.insert_str(0, SEPARATOR);
        }

        Ok(Self {
            scheme,
            host: host.filter(|h| !h.is_empty()).map(str::to_string),
            port,
            path,
            query: query_start.map(|q| rest[q + 1..].to_string()),
            credentials,
            properties: BTreeMap::new(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn scheme_info(&self) -> &'static SchemeInfo {
        SchemeInfo::for_scheme(&self.scheme)
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port named in the location, if any
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port named in the location, or the scheme's default
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or(self.scheme_info().default_port)
    }

    /// Absolute path, always starting with `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn is_local(&self) -> bool {
        self.scheme == LOCAL_SCHEME
    }

    pub fn is_root(&self) -> bool {
        self.path == SEPARATOR
    }

    /// Last path segment without its trailing separator; `None` at the root
    pub fn filename(&self) -> Option<&str> {
        let trimmed = self.path.trim_end_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        trimmed.rsplit('/').next()
    }

    /// Extension of the filename, without the dot
    pub fn extension(&self) -> Option<&str> {
        let name = self.filename()?;
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Location of the enclosing directory; `None` at the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let trimmed = self.path.trim_end_matches('/');
        let cut = trimmed.rfind('/')?;

        let mut parent = self.clone();
        parent.path = trimmed[..=cut].to_string();
        parent.query = None;
        Some(parent)
    }

    /// Host, port and share root of this location, without credentials
    pub fn realm(&self) -> Self {
        let mut path = String::from(SEPARATOR);
        for segment in self
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .take(self.scheme_info().realm_segments)
        {
            path.push_str(segment);
            path.push_str(SEPARATOR);
        }

        Self {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            path,
            query: None,
            credentials: None,
            properties: BTreeMap::new(),
        }
    }

    /// Child location: `relative` is appended after a separator
    pub fn join(&self, relative: &str) -> Self {
        let mut child = self.clone();
        if !child.path.ends_with(SEPARATOR) {
            child.path.push_str(SEPARATOR);
        }
        child.path.push_str(relative.trim_start_matches('/'));
        child.query = None;
        child
    }

    /// Same location with another path
    pub fn with_path(&self, path: &str) -> Self {
        let mut url = self.clone();
        url.path = if path.starts_with(SEPARATOR) {
            path.to_string()
        } else {
            format!("{}{}", SEPARATOR, path)
        };
        url.query = None;
        url
    }

    /// Same location, ensuring the path ends with a separator
    pub fn as_directory(&self) -> Self {
        let mut url = self.clone();
        if !url.path.ends_with(SEPARATOR) {
            url.path.push_str(SEPARATOR);
        }
        url
    }

    pub fn with_credentials(&self, credentials: Option<Credentials>) -> Self {
        let mut url = self.clone();
        url.credentials = credentials;
        url
    }

    pub fn with_property(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.properties.insert(name.into(), value.into());
        url
    }

    /// String form of the location
    ///
    /// Credentials are only written when `include_credentials` is set; with
    /// `mask_password` the password is replaced by a fixed run of `*`.
    pub fn to_string_with(&self, include_credentials: bool, mask_password: bool) -> String {
        let mut out = format!("{}://", self.scheme);

        if include_credentials {
            if let Some(credentials) = &self.credentials {
                out.extend(utf8_percent_encode(credentials.login(), CREDENTIAL_SET));
                if !credentials.password().is_empty() {
                    out.push(':');
                    if mask_password {
                        out.push_str(PASSWORD_MASK);
                    } else {
                        out.extend(utf8_percent_encode(credentials.password(), CREDENTIAL_SET));
                    }
                }
                out.push('@');
            }
        }

        if let Some(host) = &self.host {
            out.push_str(host);
        }
        if let Some(port) = self.port {
            out.push(':');
            out.push_str(&port.to_string());
        }

        if !self.path.starts_with(SEPARATOR) {
            out.push_str(SEPARATOR);
        }
        out.push_str(&self.path);

        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }

        out
    }

    /// Hash-based ID for cache lookups, consistent with equality
    pub fn id(&self) -> u64 {
        xxh3_64(self.identity_key().as_bytes())
    }

    fn identity_key(&self) -> String {
        format!(
            "{}://{}:{}{}?{}",
            self.scheme,
            self.host.as_deref().unwrap_or("").to_ascii_lowercase(),
            self.effective_port().map(|p| p.to_string()).unwrap_or_default(),
            trim_trailing_separator(&self.path),
            self.query.as_deref().unwrap_or("")
        )
    }
}

impl PartialEq for FileUrl {
    fn eq(&self, other: &Self) -> bool {
        let hosts_match = match (&self.host, &other.host) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };

        self.scheme == other.scheme
            && hosts_match
            && self.effective_port() == other.effective_port()
            && trim_trailing_separator(&self.path) == trim_trailing_separator(&other.path)
            && self.query == other.query
    }
}

impl Eq for FileUrl {}

impl Hash for FileUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_key().hash(state);
    }
}

impl fmt::Display for FileUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with(false, false))
    }
}

impl FromStr for FileUrl {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn trim_trailing_separator(path: &str) -> &str {
    path.trim_end_matches('/')
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn decode_part(part: &str) -> Result<String> {
    percent_decode_str(part)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|e| FsError::MalformedLocation(format!("Invalid escape in credentials: {}", e)))
}

/// Split `host[:port]`, honoring bracketed IPv6 hosts
fn split_host_port<'a>(host_port: &'a str, url: &str) -> Result<(Option<&'a str>, Option<u16>)> {
    let (host, port) = if host_port.starts_with('[') {
        match host_port.find(']') {
            Some(end) => {
                let after = &host_port[end + 1..];
                let port = after.strip_prefix(':');
                if port.is_none() && !after.is_empty() {
                    return Err(FsError::MalformedLocation(format!("Invalid host in {}", url)));
                }
                (&host_port[..=end], port)
            }
            None => {
                return Err(FsError::MalformedLocation(format!("Unclosed IPv6 host in {}", url)));
            }
        }
    } else {
        match host_port.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };

    let port = match port {
        None | Some("") => None,
        Some(p) => Some(p.parse::<u16>().map_err(|_| {
            FsError::MalformedLocation(format!("Invalid port '{}' in {}", p, url))
        })?),
    };

    Ok((Some(host), port))
}

/// Rewrite native and UNC paths into `scheme://` form
fn normalize_location(raw: &str) -> Result<Cow<'_, str>> {
    if let Some(pos) = raw.find("://") {
        if is_valid_scheme(&raw[..pos]) {
            return Ok(Cow::Borrowed(raw));
        }
    }

    if let Some(unc) = raw.strip_prefix("\\\\") {
        let unc = unc.replace('\\', "/");
        let scheme = if cfg!(windows) { LOCAL_SCHEME } else { "smb" };
        return Ok(Cow::Owned(format!("{}://{}", scheme, unc)));
    }

    if raw.starts_with('/') {
        return Ok(Cow::Owned(format!("{}://{}", LOCAL_SCHEME, raw)));
    }

    if raw.starts_with('~') {
        return Ok(Cow::Owned(format!("{}:///{}", LOCAL_SCHEME, raw)));
    }

    if is_drive_path(raw) {
        let mut path = raw.replace('\\', "/");
        if path.len() == 2 {
            path.push('/');
        }
        return Ok(Cow::Owned(format!("{}:///{}", LOCAL_SCHEME, path)));
    }

    Err(FsError::MalformedLocation(format!("Not an absolute path: {}", raw)))
}

/// `C:`, `C:\...` or `C:/...`
fn is_drive_path(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Home directory in URL path form
fn home_dir() -> Option<String> {
    directories::BaseDirs::new().map(|dirs| native_to_url_path(dirs.home_dir()))
}

/// Native path to URL path (`C:\x` becomes `/C:/x` on Windows)
pub(crate) fn native_to_url_path(path: &Path) -> String {
    let display = path.to_string_lossy();

    #[cfg(windows)]
    {
        let display = display.strip_prefix(r"\\?\").unwrap_or(&display);
        let slashed = display.replace('\\', "/");
        if is_drive_path(&slashed) {
            return format!("/{}", slashed);
        }
        slashed
    }

    #[cfg(not(windows))]
    {
        display.into_owned()
    }
}

/// URL path to native path
pub(crate) fn url_path_to_native(url: &FileUrl) -> PathBuf {
    #[cfg(windows)]
    {
        let path = url.path().trim_start_matches('/').replace('/', "\\");
        match url.host() {
            Some(host) => PathBuf::from(format!(r"\\{}\{}", host, path)),
            None if path.len() == 2 => PathBuf::from(format!("{}\\", path)),
            None => PathBuf::from(path),
        }
    }

    #[cfg(not(windows))]
    {
        PathBuf::from(url.path())
    }
}
