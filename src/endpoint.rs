//! Endpoint model.
//!
//! An [`Endpoint`] names a network-addressable service instance together with
//! its string parameters. Values are immutable; the `with_*` helpers return
//! new endpoints.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use url::form_urlencoded;
use url::Url;

use crate::{Error, Result};

/// Protocol of the synthetic "known empty" endpoint.
pub const EMPTY_PROTOCOL: &str = "empty";
/// Wildcard value for interface, group, version, category and classifier.
pub const ANY_VALUE: &str = "*";

pub const INTERFACE_KEY: &str = "interface";
pub const GROUP_KEY: &str = "group";
pub const VERSION_KEY: &str = "version";
pub const CLASSIFIER_KEY: &str = "classifier";
pub const CATEGORY_KEY: &str = "category";
pub const DEFAULT_CATEGORY: &str = "providers";
pub const ENABLED_KEY: &str = "enabled";
pub const DYNAMIC_KEY: &str = "dynamic";
pub const FILE_KEY: &str = "file";
pub const SAVE_FILE_SYNC_KEY: &str = "save.file";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    parameters: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        let path = path.into();
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: path.trim_start_matches('/').to_string(),
            parameters: BTreeMap::new(),
        }
    }

    /// Parses the form produced by [`Endpoint::to_full_string`].
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument("empty endpoint url".to_string()));
        }
        let url = Url::parse(trimmed)
            .map_err(|err| Error::InvalidArgument(format!("endpoint url {trimmed:?}: {err}")))?;
        let host = url
            .host_str()
            .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
            .unwrap_or_default();
        let path = percent_decode(url.path().trim_start_matches('/'));
        let parameters = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Ok(Self {
            protocol: url.scheme().to_string(),
            host,
            port: url.port().unwrap_or(0),
            path,
            parameters,
        })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Parameter value, falling back to `default` when absent or empty.
    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.parameter(key) {
            Some(value) if !value.is_empty() => value,
            _ => default,
        }
    }

    pub fn bool_parameter(&self, key: &str, default: bool) -> bool {
        match self.parameter(key) {
            Some(value) if !value.is_empty() => value.trim().eq_ignore_ascii_case("true"),
            _ => default,
        }
    }

    pub fn with_protocol(&self, protocol: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.protocol = protocol.into();
        next
    }

    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.parameters.insert(key.into(), value.into());
        next
    }

    /// The `interface` parameter when set, otherwise the path.
    pub fn service_interface(&self) -> &str {
        self.parameter_or(INTERFACE_KEY, &self.path)
    }

    pub fn category(&self) -> &str {
        self.parameter_or(CATEGORY_KEY, DEFAULT_CATEGORY)
    }

    pub fn is_empty_marker(&self) -> bool {
        self.protocol == EMPTY_PROTOCOL
    }

    pub fn is_dynamic(&self, default: bool) -> bool {
        self.bool_parameter(DYNAMIC_KEY, default)
    }

    /// `group/interface:version`, with group and version left out when unset.
    pub fn service_key(&self) -> String {
        let interface = self.service_interface();
        let mut key = String::with_capacity(interface.len() + 16);
        if let Some(group) = self.parameter(GROUP_KEY).filter(|group| !group.is_empty()) {
            key.push_str(group);
            key.push('/');
        }
        key.push_str(interface);
        if let Some(version) = self.parameter(VERSION_KEY).filter(|version| !version.is_empty()) {
            key.push(':');
            key.push_str(version);
        }
        key
    }

    pub fn address(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 0 {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    pub fn to_full_string(&self) -> String {
        let mut out = format!("{}://{}/{}", self.protocol, self.address(), self.path);
        if !self.parameters.is_empty() {
            let mut query = form_urlencoded::Serializer::new(String::new());
            for (key, value) in &self.parameters {
                query.append_pair(key, value);
            }
            out.push('?');
            out.push_str(&query.finish());
        }
        out
    }

    pub(crate) fn validate(&self, what: &str) -> Result<()> {
        if self.protocol.is_empty() {
            return Err(Error::InvalidArgument(format!("{what} url has no protocol")));
        }
        if self.host.is_empty() {
            return Err(Error::InvalidArgument(format!("{what} url has no host: {self}")));
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_full_string())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

fn percent_decode(input: &str) -> String {
    if !input.contains('%') {
        return input.to_string();
    }
    form_urlencoded::parse(format!("p={}", input.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| input.to_string())
}
