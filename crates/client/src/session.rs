//! Credential and minimal identity, the only state persisted across runs.

use std::cell::RefCell;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

pub type SharedSession = Rc<RefCell<Session>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    token: Option<String>,
    username: Option<String>,
    user_id: Option<i64>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Session {
    /// In-memory session that is never written to disk.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(token: &str, username: &str, user_id: Option<i64>) -> Self {
        let mut session = Self::new();
        session.token = Some(token.to_string());
        session.username = Some(username.to_string());
        session.user_id = user_id;
        session
    }

    /// Load from `path`. A missing file yields an empty session bound to that path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut session = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<Session>(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No stored session");
                Session::new()
            }
            Err(e) => return Err(e.into()),
        };
        session.path = Some(path.to_path_buf());
        Ok(session)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            fs::write(path, serde_json::to_string(self)?)?;
        }
        Ok(())
    }

    pub fn set(&mut self, token: &str, username: &str, user_id: Option<i64>) -> Result<()> {
        self.token = Some(token.to_string());
        self.username = Some(username.to_string());
        self.user_id = user_id;
        self.save()
    }

    /// Forget the credential, e.g. after the server answered 401.
    pub fn clear(&mut self) -> Result<()> {
        info!("Clearing session credential");
        self.token = None;
        self.username = None;
        self.user_id = None;
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn credential(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn is_logged_in(&self) -> bool {
        self.credential().is_some()
    }

    pub fn shared(self) -> SharedSession {
        Rc::new(RefCell::new(self))
    }
}
