//! Archive credentials.
//!
//! CDS: config, then `CDSAPI_URL`/`CDSAPI_KEY`, then `$CDSAPI_RC` or `~/.cdsapirc`.
//! Earthdata: config token, then `EARTHDATA_TOKEN`, then
//! `EARTHDATA_USERNAME`/`EARTHDATA_PASSWORD`, then `$NETRC` or `~/.netrc`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::config::{expand_value, CdsSettings, EarthdataSettings};

pub const DEFAULT_CDS_URL: &str = "https://cds.climate.copernicus.eu/api";
pub const EARTHDATA_HOST: &str = "urs.earthdata.nasa.gov";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("No {0} credentials found")]
    Missing(&'static str),

    #[error("Failed to read credentials file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid credential value: {0}")]
    Invalid(String),
}

/// Climate Data Store endpoint and personal access token.
#[derive(Clone, PartialEq, Eq)]
pub struct CdsCredentials {
    pub url: String,
    pub key: String,
}

impl std::fmt::Debug for CdsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdsCredentials")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// How to authenticate against NASA Earthdata.
#[derive(Clone, PartialEq, Eq)]
pub enum EarthdataCredentials {
    Token(String),
    Login { username: String, password: String },
}

impl std::fmt::Debug for EarthdataCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EarthdataCredentials::Token(_) => f.write_str("Token(<redacted>)"),
            EarthdataCredentials::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn home_file(name: &str) -> Option<PathBuf> {
    let path = shellexpand::tilde(&format!("~/{}", name)).into_owned();
    if path.starts_with('~') {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

fn expand_setting(value: &Option<String>) -> Result<Option<String>, CredentialsError> {
    value
        .as_deref()
        .map(|v| expand_value(v).map_err(|e| CredentialsError::Invalid(e.to_string())))
        .transpose()
        .map(|v| v.filter(|s| !s.is_empty()))
}

fn read_optional(path: &Path) -> Result<Option<String>, CredentialsError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CredentialsError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl CdsCredentials {
    pub fn resolve(settings: &CdsSettings) -> Result<Self, CredentialsError> {
        let rc_path = process_env("CDSAPI_RC").map(PathBuf::from).or_else(|| home_file(".cdsapirc"));
        Self::resolve_with(settings, process_env, rc_path.as_deref())
    }

    /// Resolve with an injectable environment lookup and rc file location.
    pub fn resolve_with(
        settings: &CdsSettings,
        env: impl Fn(&str) -> Option<String>,
        rc_path: Option<&Path>,
    ) -> Result<Self, CredentialsError> {
        let mut url = expand_setting(&settings.url)?.or_else(|| env("CDSAPI_URL"));
        let mut key = expand_setting(&settings.key)?.or_else(|| env("CDSAPI_KEY"));

        if url.is_none() || key.is_none() {
            if let Some(path) = rc_path {
                if let Some(content) = read_optional(path)? {
                    debug!(path = %path.display(), "Reading CDS credentials file");
                    let (rc_url, rc_key) = parse_cdsapirc(&content);
                    url = url.or(rc_url);
                    key = key.or(rc_key);
                }
            }
        }

        let key = key.ok_or(CredentialsError::Missing("CDS API"))?;
        let url = url.unwrap_or_else(|| DEFAULT_CDS_URL.to_string());
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            key,
        })
    }
}

/// Parse the `url:` and `key:` lines of a `.cdsapirc` file.
pub fn parse_cdsapirc(content: &str) -> (Option<String>, Option<String>) {
    let mut url = None;
    let mut key = None;
    for line in content.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim() {
            "url" => url = Some(value),
            "key" => key = Some(value),
            _ => {}
        }
    }
    (url, key)
}

impl EarthdataCredentials {
    pub fn resolve(settings: &EarthdataSettings) -> Result<Self, CredentialsError> {
        let netrc_path = process_env("NETRC").map(PathBuf::from).or_else(|| home_file(".netrc"));
        Self::resolve_with(settings, process_env, netrc_path.as_deref())
    }

    /// Resolve with an injectable environment lookup and netrc location.
    pub fn resolve_with(
        settings: &EarthdataSettings,
        env: impl Fn(&str) -> Option<String>,
        netrc_path: Option<&Path>,
    ) -> Result<Self, CredentialsError> {
        if let Some(token) = expand_setting(&settings.token)?.or_else(|| env("EARTHDATA_TOKEN")) {
            return Ok(EarthdataCredentials::Token(token));
        }

        if let (Some(username), Some(password)) = (env("EARTHDATA_USERNAME"), env("EARTHDATA_PASSWORD")) {
            return Ok(EarthdataCredentials::Login { username, password });
        }

        if let Some(path) = netrc_path {
            if let Some(content) = read_optional(path)? {
                if let Some((username, password)) = parse_netrc(&content, EARTHDATA_HOST) {
                    debug!(path = %path.display(), "Using netrc Earthdata login");
                    return Ok(EarthdataCredentials::Login { username, password });
                }
            }
        }

        Err(CredentialsError::Missing("Earthdata"))
    }
}

/// Find the login/password pair for `host` in netrc text.
///
/// Falls back to a `default` entry when no machine matches.
pub fn parse_netrc(content: &str, host: &str) -> Option<(String, String)> {
    #[derive(Default)]
    struct Entry {
        machine: Option<String>,
        login: Option<String>,
        password: Option<String>,
    }

    let mut entries: Vec<Entry> = Vec::new();
    let mut tokens = content.split_whitespace();

    while let Some(token) = tokens.next() {
        match token {
            "machine" => entries.push(Entry {
                machine: tokens.next().map(str::to_string),
                ..Entry::default()
            }),
            "default" => entries.push(Entry::default()),
            "login" => {
                if let (Some(entry), Some(value)) = (entries.last_mut(), tokens.next()) {
                    entry.login = Some(value.to_string());
                }
            }
            "password" => {
                if let (Some(entry), Some(value)) = (entries.last_mut(), tokens.next()) {
                    entry.password = Some(value.to_string());
                }
            }
            "account" | "macdef" => {
                tokens.next();
            }
            _ => {}
        }
    }

    let entry = entries
        .iter()
        .find(|e| e.machine.as_deref() == Some(host))
        .or_else(|| entries.iter().find(|e| e.machine.is_none()))?;

    match (&entry.login, &entry.password) {
        (Some(login), Some(password)) => Some((login.clone(), password.clone())),
        _ => None,
    }
}
