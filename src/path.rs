use crate::error::{Result, ZsyncError};
use crate::transport::{self, HttpTransport};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use url::{ParseError, Url};

/// Where a control file comes from: a local path or an HTTP(S) URL
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Local(PathBuf),
    Remote(Url),
}

impl Location {
    /// Parse a command-line argument
    ///
    /// Anything with an `http://` or `https://` scheme is a URL; everything
    /// else, including Windows paths such as `C:\file.zsync`, is a local path.
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Url::parse(s)
                .map(Location::Remote)
                .map_err(|e| format!("invalid URL '{}': {}", s, e))
        } else {
            Ok(Location::Local(PathBuf::from(s)))
        }
    }

    /// Read the whole control file
    pub fn read<T: HttpTransport + ?Sized>(&self, transport: &T) -> Result<Vec<u8>> {
        match self {
            Location::Local(path) => {
                tracing::debug!("Reading control file {}", path.display());
                Ok(fs::read(path)?)
            }
            Location::Remote(url) => {
                tracing::debug!("Fetching control file {}", url);
                transport::fetch_all(transport, url)
            }
        }
    }

    /// Resolve the control file's `URL` header to an absolute URL
    ///
    /// Absolute values are used as-is. Relative ones are joined onto `base`,
    /// or onto this location when it is itself a URL.
    pub fn resolve_target(&self, reference: &str, base: Option<&Url>) -> Result<Url> {
        match Url::parse(reference) {
            Ok(url) => return Ok(url),
            Err(ParseError::RelativeUrlWithoutBase) => {}
            Err(e) => {
                return Err(ZsyncError::Format(format!(
                    "invalid URL {:?}: {}",
                    reference, e
                )))
            }
        }

        let base = match (base, self) {
            (Some(base), _) => base,
            (None, Location::Remote(url)) => url,
            (None, Location::Local(_)) => {
                return Err(ZsyncError::Config(format!(
                    "the target URL {:?} is relative; pass --base-url to resolve it",
                    reference
                )))
            }
        };

        base.join(reference)
            .map_err(|e| ZsyncError::Format(format!("cannot resolve URL {:?}: {}", reference, e)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote(url) => write!(f, "{}", url),
        }
    }
}
