//! Source and target addresses for copy jobs.
use std::{fmt, path::Path};

use crate::Error;

/// Schemes of servers able to move data between each other directly.
const SERVER_PAIR_SCHEMES: [&str; 4] = ["root", "xroot", "roots", "xroots"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    /// A path on the local filesystem.
    Local,
    /// A remote endpoint the client has to read from or write to itself.
    Remote,
    /// A remote endpoint that can take part in a third party copy.
    ServerPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    scheme: String,
    host: Option<String>,
    path: String,
}

impl Locator {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidLocator(s.to_string()));
        }

        let Some((scheme, rest)) = s.split_once("://") else {
            return Ok(Self::local(s));
        };

        let scheme = scheme.to_ascii_lowercase();
        if scheme == "file" {
            if rest.is_empty() {
                return Err(Error::InvalidLocator(s.to_string()));
            }
            return Ok(Self::local(rest));
        }

        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        if scheme.is_empty() || host.is_empty() {
            return Err(Error::InvalidLocator(s.to_string()));
        }

        Ok(Self {
            scheme,
            host: Some(host.to_string()),
            path: format!("/{path}"),
        })
    }

    pub fn local(path: impl Into<String>) -> Self {
        Self {
            scheme: "file".into(),
            host: None,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> LocatorKind {
        if self.scheme == "file" {
            LocatorKind::Local
        } else if SERVER_PAIR_SCHEMES.contains(&self.scheme.as_str()) {
            LocatorKind::ServerPair
        } else {
            LocatorKind::Remote
        }
    }

    pub fn is_local(&self) -> bool {
        self.kind() == LocatorKind::Local
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// `host[:port]` of a remote locator.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path component, if any.
    pub fn file_name(&self) -> Option<&str> {
        Path::new(&self.path).file_name().and_then(|n| n.to_str())
    }

    /// Locator of `name` inside this one, treated as a directory.
    pub fn join(&self, name: &str) -> Self {
        let mut joined = self.clone();
        joined.path = format!("{}/{}", self.path.trim_end_matches('/'), name);
        joined
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}://{}{}", self.scheme, host, self.path),
            None => write!(f, "{}://{}", self.scheme, self.path),
        }
    }
}

impl std::str::FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
