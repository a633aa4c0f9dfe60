use anyhow::Context;
use rand::RngCore;
use reqwest::header::{HeaderMap, SET_COOKIE};
use sha1::{Digest, Sha1};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("login rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub phone: String,
    pub password: String,
}

/// Cookie-backed account session. `__csrf` is the logged-in marker.
#[derive(Debug, Clone)]
pub struct Session {
    pub cookie_header: String,
    pub csrf: Option<String>,
}

impl Session {
    pub fn from_cookie_header(header: &str) -> Self {
        let csrf = header
            .split(';')
            .filter_map(|kv| kv.trim().split_once('='))
            .find(|(k, _)| *k == "__csrf")
            .map(|(_, v)| v.to_string());
        Self {
            cookie_header: header.trim().to_string(),
            csrf,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.csrf.is_some()
    }
}

/// Cellphone login. The password travels as a hex digest, never as typed.
pub async fn login(
    http: &reqwest::Client,
    credentials: &Credentials,
) -> Result<Session, AuthError> {
    let digest = hex::encode(Sha1::digest(credentials.password.as_bytes()));
    let resp = http
        .post(format!("{}/api/login/cellphone", super::api::BASE_URL))
        .form(&[
            ("phone", credentials.phone.as_str()),
            ("password", digest.as_str()),
            ("rememberLogin", "true"),
        ])
        .send()
        .await?;

    let cookie_header = cookies_from_headers(resp.headers());
    let v: serde_json::Value = resp.json().await?;
    let code = v.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
    if code != 200 {
        let message = v
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(AuthError::Rejected(message));
    }

    Ok(Session::from_cookie_header(&cookie_header))
}

/// Anonymous access: a random device id stands in for account cookies.
/// Searching and streaming work; account features do not.
pub fn anonymous() -> Session {
    let mut raw = [0u8; 16];
    rand::rng().fill_bytes(&mut raw);
    let device_id = hex::encode(raw);
    let check = hex::encode(Sha1::digest(device_id.as_bytes()));
    Session::from_cookie_header(&format!("NMTID={device_id}{}", &check[..8]))
}

fn cookies_from_headers(headers: &HeaderMap) -> String {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Stored-cookie login; None when there is no usable cookie file.
pub fn load_session(path: &Path) -> Option<Session> {
    let raw = std::fs::read_to_string(path).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Some(Session::from_cookie_header(raw))
}

pub fn save_session(session: &Session, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    std::fs::write(path, &session.cookie_header)
        .with_context(|| format!("write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

pub fn clear_session(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}
