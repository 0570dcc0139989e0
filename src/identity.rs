//! Participant identity: a durable id kept in a cookie jar and a one-time
//! submission token kept in session storage.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const PARTICIPANT_COOKIE: &str = "survey_uuid";
pub const FORM_TOKEN_KEY: &str = "survey_token";
pub const COOKIE_LIFETIME_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("cannot read cookie jar {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write cookie jar {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cookie jar {} is not valid JSON: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Durable, per-installation participant id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-scoped submission token.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FormToken(String);

impl FormToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cookie {
    pub value: String,
    pub path: String,
    pub expires_at: DateTime<Utc>,
}

impl Cookie {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Name → cookie map, written back to disk on every change when file-backed.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: BTreeMap<String, Cookie>,
    file: Option<PathBuf>,
}

impl CookieJar {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens a file-backed jar. A missing file is an empty jar; expired
    /// cookies are dropped on load.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let path = path.into();
        let cookies = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<BTreeMap<String, Cookie>>(&raw).map_err(|source| {
                IdentityError::Corrupt {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(IdentityError::Read { path, source }),
        };

        let now = Utc::now();
        let mut jar = Self {
            cookies,
            file: Some(path),
        };
        jar.cookies.retain(|_, cookie| cookie.is_live_at(now));
        Ok(jar)
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_at(name, Utc::now())
    }

    pub fn get_at(&self, name: &str, now: DateTime<Utc>) -> Option<&str> {
        self.cookies
            .get(name)
            .filter(|cookie| cookie.is_live_at(now))
            .map(|cookie| cookie.value.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str, lifetime: Duration) -> Result<(), IdentityError> {
        self.set_at(name, value, lifetime, Utc::now())
    }

    pub fn set_at(
        &mut self,
        name: &str,
        value: &str,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        self.cookies.insert(
            name.to_string(),
            Cookie {
                value: value.to_string(),
                path: "/".to_string(),
                expires_at: now + lifetime,
            },
        );
        self.persist()
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.get(name)
    }

    fn persist(&self) -> Result<(), IdentityError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IdentityError::Write {
                path: path.clone(),
                source,
            })?;
        }
        let raw = serde_json::to_string_pretty(&self.cookies).map_err(|source| {
            IdentityError::Corrupt {
                path: path.clone(),
                source,
            }
        })?;
        std::fs::write(path, raw).map_err(|source| IdentityError::Write {
            path: path.clone(),
            source,
        })
    }
}

/// Key/value storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct SessionStorage {
    items: HashMap<String, String>,
}

impl SessionStorage {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.items.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.items.remove(key)
    }
}

pub struct IdentityProvider {
    cookies: CookieJar,
    session: SessionStorage,
    cookie_name: String,
    token_key: String,
    lifetime: Duration,
}

impl IdentityProvider {
    pub fn new(cookies: CookieJar) -> Self {
        Self {
            cookies,
            session: SessionStorage::default(),
            cookie_name: PARTICIPANT_COOKIE.to_string(),
            token_key: FORM_TOKEN_KEY.to_string(),
            lifetime: Duration::days(COOKIE_LIFETIME_DAYS),
        }
    }

    pub fn with_names(
        mut self,
        cookie_name: impl Into<String>,
        token_key: impl Into<String>,
        lifetime_days: i64,
    ) -> Self {
        self.cookie_name = cookie_name.into();
        self.token_key = token_key.into();
        self.lifetime = Duration::days(lifetime_days);
        self
    }

    /// Returns the stored participant id, creating and persisting one if the
    /// cookie is missing or expired. A jar that cannot be written still yields
    /// an id for this run.
    pub fn participant_id(&mut self) -> ParticipantId {
        if let Some(existing) = self.cookies.get(&self.cookie_name) {
            return ParticipantId(existing.to_string());
        }
        let id = Uuid::new_v4().to_string();
        if let Err(err) = self.cookies.set(&self.cookie_name, &id, self.lifetime) {
            warn!(error = %err, "participant id not persisted");
        }
        debug!(participant = %id, "new participant id");
        ParticipantId(id)
    }

    /// Returns the session's submission token, creating one on first use.
    pub fn form_token(&mut self) -> FormToken {
        if let Some(existing) = self.session.get(&self.token_key) {
            return FormToken(existing.to_string());
        }
        let token = Uuid::new_v4().to_string();
        self.session.set(&self.token_key, &token);
        debug!("new form token");
        FormToken(token)
    }

    /// Forgets the session token; the next `form_token` call mints a new one.
    pub fn reset_session(&mut self) {
        self.session.remove(&self.token_key);
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }
}

/// Identifies this client in submitted records.
pub fn user_agent() -> String {
    format!(
        "markup-survey/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{CookieJar, IdentityProvider, PARTICIPANT_COOKIE};

    #[test]
    fn participant_id_is_stable_and_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cookies.json");

        let first = {
            let mut identity = IdentityProvider::new(CookieJar::open(&path).expect("open"));
            let id = identity.participant_id();
            assert_eq!(identity.participant_id(), id);
            id
        };

        let mut reopened = IdentityProvider::new(CookieJar::open(&path).expect("reopen"));
        assert_eq!(reopened.participant_id(), first);

        let cookie = reopened
            .cookies()
            .cookie(PARTICIPANT_COOKIE)
            .expect("cookie stored");
        assert_eq!(cookie.path, "/");
        let days_left = (cookie.expires_at - Utc::now()).num_days();
        assert!((364..=365).contains(&days_left));
    }

    #[test]
    fn expired_cookie_is_ignored() {
        let mut jar = CookieJar::in_memory();
        let long_ago = Utc::now() - Duration::days(400);
        jar.set_at("survey_uuid", "old", Duration::days(365), long_ago)
            .expect("set");
        assert_eq!(jar.get("survey_uuid"), None);

        let mut identity = IdentityProvider::new(jar);
        assert_ne!(identity.participant_id().as_str(), "old");
    }

    #[test]
    fn form_token_lives_until_session_reset() {
        let mut identity = IdentityProvider::new(CookieJar::in_memory());
        let token = identity.form_token();
        assert_eq!(identity.form_token(), token);

        identity.reset_session();
        assert_ne!(identity.form_token(), token);
    }

    #[test]
    fn corrupt_jar_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(CookieJar::open(&path).is_err());
    }
}
