//! Authenticated session: token pair, expiry and single-flight refresh.
//!
//! A session starts `Valid` and stays so across refreshes. A refresh the API
//! rejects moves it to `Revoked`; [`AuthSession::clear`] moves it to
//! `LoggedOut`. Both are terminal: every later call fails with
//! [`Error::Unauthorized`].

use std::fmt;
use std::io;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::headers;
use crate::request::Request;
use crate::transport::HttpClient;

/// Path of the token refresh endpoint.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Path of the session endpoint; `DELETE` logs out.
pub const AUTH_PATH: &str = "/auth";

/// Statuses with which the API rejects a refresh token.
const REJECTED_REFRESH: &[u16] = &[400, 401, 422];

/// Second factor settings of an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TwoFactorInfo {
    /// 0 disabled, 1 TOTP, 2 U2F, 3 both.
    #[serde(default)]
    pub enabled: i64,
    #[serde(default, rename = "TOTP")]
    pub totp: i64,
}

/// Credentials of one authenticated session.
pub struct Auth {
    pub user_id: String,
    pub uid: String,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Lifetime of the access token in seconds, as granted.
    pub expires_in: u64,
    pub scope: String,
    pub two_factor: Option<TwoFactorInfo>,
    pub password_mode: i64,
}

impl Auth {
    pub fn new(
        user_id: impl Into<String>,
        uid: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: u64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            uid: uid.into(),
            access_token: SecretString::new(access_token.into()),
            refresh_token: SecretString::new(refresh_token.into()),
            expires_in,
            scope: String::new(),
            two_factor: None,
            password_mode: 0,
        }
    }

    pub fn has_two_factor(&self) -> bool {
        self.two_factor.as_ref().is_some_and(|tf| tf.enabled > 0)
    }

    /// Whether the account uses a separate mailbox password.
    pub fn has_mailbox_password(&self) -> bool {
        self.password_mode == 2
    }

    pub fn has_full_scope(&self) -> bool {
        self.scope.contains("full")
    }

    /// `UID:RefreshToken`, the form in which sessions are persisted.
    pub fn token(&self) -> String {
        format!("{}:{}", self.uid, self.refresh_token.expose_secret())
    }

    fn zeroize_tokens(&mut self) {
        self.access_token = SecretString::new(String::new());
        self.refresh_token = SecretString::new(String::new());
    }
}

impl Clone for Auth {
    fn clone(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            uid: self.uid.clone(),
            access_token: SecretString::new(self.access_token.expose_secret().clone()),
            refresh_token: SecretString::new(self.refresh_token.expose_secret().clone()),
            expires_in: self.expires_in,
            scope: self.scope.clone(),
            two_factor: self.two_factor.clone(),
            password_mode: self.password_mode,
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("user_id", &self.user_id)
            .field("uid", &self.uid)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("password_mode", &self.password_mode)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RefreshRequest<'a> {
    #[serde(rename = "UID")]
    uid: &'a str,
    refresh_token: &'a str,
    response_type: &'static str,
    grant_type: &'static str,
    #[serde(rename = "RedirectURI")]
    redirect_uri: &'a str,
    state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    scope: String,
    #[serde(default, rename = "UID")]
    uid: Option<String>,
    #[serde(default, rename = "2FA")]
    two_factor: Option<TwoFactorInfo>,
    #[serde(default)]
    password_mode: i64,
}

/// Lifecycle of an [`AuthSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Valid,
    Revoked,
    LoggedOut,
}

/// Called with the new credentials after every successful refresh.
pub type AuthHandler = Arc<dyn Fn(&Auth) + Send + Sync>;

/// Called once when the session is revoked or logged out.
pub type DeauthHandler = Arc<dyn Fn() + Send + Sync>;

struct SessionState {
    auth: Auth,
    expires_at: Instant,
    status: SessionStatus,
    /// Bumped by every successful refresh.
    generation: u64,
}

/// Token pair of one user plus the machinery to keep it fresh.
pub struct AuthSession {
    http: HttpClient,
    redirect_uri: String,
    state: RwLock<SessionState>,
    refreshing: Mutex<()>,
    auth_handlers: RwLock<Vec<AuthHandler>>,
    deauth_handlers: RwLock<Vec<DeauthHandler>>,
}

impl AuthSession {
    /// Session from a full token pair whose access token expires in `auth.expires_in` seconds.
    pub fn new(http: HttpClient, redirect_uri: impl Into<String>, auth: Auth) -> Self {
        let expires_at = Instant::now() + Duration::from_secs(auth.expires_in);
        Self {
            http,
            redirect_uri: redirect_uri.into(),
            state: RwLock::new(SessionState {
                auth,
                expires_at,
                status: SessionStatus::Valid,
                generation: 0,
            }),
            refreshing: Mutex::new(()),
            auth_handlers: RwLock::new(Vec::new()),
            deauth_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Session from a refresh token only; the first call refreshes.
    pub fn from_refresh_token(
        http: HttpClient,
        redirect_uri: impl Into<String>,
        uid: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self::new(http, redirect_uri, Auth::new("", uid, "", refresh_token, 0))
    }

    pub fn add_auth_handler(&self, handler: AuthHandler) {
        self.auth_handlers
            .write()
            .expect("auth handlers lock poisoned")
            .push(handler);
    }

    pub fn add_deauth_handler(&self, handler: DeauthHandler) {
        self.deauth_handlers
            .write()
            .expect("deauth handlers lock poisoned")
            .push(handler);
    }

    pub fn status(&self) -> SessionStatus {
        self.state.read().expect("session lock poisoned").status
    }

    /// Snapshot of the current credentials.
    pub fn auth(&self) -> Result<Auth> {
        let state = self.state.read().expect("session lock poisoned");
        ensure_usable(&state)?;
        Ok(state.auth.clone())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.state.read().expect("session lock poisoned").expires_at
    }

    /// Set `x-pm-uid` and `Authorization` on `request`, refreshing first when
    /// the access token has expired.
    ///
    /// Returns the generation of the attached token, to be handed back to
    /// [`AuthSession::refresh_stale`] if the request is answered with 401.
    pub async fn attach(&self, ctx: &RequestContext, request: &mut Request) -> Result<u64> {
        let expired = {
            let state = self.state.read().expect("session lock poisoned");
            ensure_usable(&state)?;
            (Instant::now() >= state.expires_at).then_some(state.generation)
        };
        if let Some(seen) = expired {
            tracing::debug!("Access token expired, refreshing before request");
            self.refresh_stale(ctx, seen).await?;
        }

        let state = self.state.read().expect("session lock poisoned");
        ensure_usable(&state)?;
        headers::set_header(&mut request.headers, headers::UID, state.auth.uid.clone());
        headers::set_header(
            &mut request.headers,
            headers::AUTHORIZATION,
            headers::bearer(state.auth.access_token.expose_secret()),
        );
        Ok(state.generation)
    }

    /// Refresh the access token now.
    pub async fn refresh(&self, ctx: &RequestContext) -> Result<Auth> {
        let seen = self.state.read().expect("session lock poisoned").generation;
        self.refresh_stale(ctx, seen).await
    }

    /// Refresh unless a refresh completed since generation `seen` was
    /// observed, in which case its outcome is returned instead.
    pub async fn refresh_stale(&self, ctx: &RequestContext, seen: u64) -> Result<Auth> {
        let _refreshing = ctx.run(async { Ok(self.refreshing.lock().await) }).await?;

        let (uid, mut request) = {
            let state = self.state.read().expect("session lock poisoned");
            ensure_usable(&state)?;
            if state.generation != seen {
                return Ok(state.auth.clone());
            }
            let uid = state.auth.uid.clone();
            let request = Request::post(REFRESH_PATH)
                .header(headers::UID, uid.clone())
                .json(&RefreshRequest {
                    uid: &uid,
                    refresh_token: state.auth.refresh_token.expose_secret(),
                    response_type: "token",
                    grant_type: "refresh_token",
                    redirect_uri: &self.redirect_uri,
                    state: random_state()?,
                })?;
            (uid, request)
        };

        tracing::debug!(uid = %uid, "Refreshing access token");
        let sent = self.http.send(&request, ctx.cancellation()).await;
        if let Some(body) = request.body.take() {
            wipe(body);
        }
        let response = sent?;

        if !response.is_success() {
            let status = response.status;
            let err = response.into_api_error();
            if REJECTED_REFRESH.contains(&status) {
                tracing::warn!(uid = %uid, error = %err, "Refresh token rejected, revoking session");
                self.end(SessionStatus::Revoked);
                return Err(Error::unauthorized(format!("refresh rejected: {}", err)));
            }
            return Err(err);
        }

        let parsed = response.json::<RefreshResponse>();
        wipe(response.into_body());
        let refreshed = parsed?;
        let auth = {
            let mut state = self.state.write().expect("session lock poisoned");
            ensure_usable(&state)?;
            let auth = &mut state.auth;
            // The UID never changes across refreshes.
            if let Some(new_uid) = refreshed.uid.filter(|u| *u != auth.uid) {
                tracing::warn!(uid = %auth.uid, new_uid = %new_uid, "Ignoring UID change on refresh");
            }
            auth.access_token = SecretString::new(refreshed.access_token);
            auth.refresh_token = SecretString::new(refreshed.refresh_token);
            auth.expires_in = refreshed.expires_in;
            auth.scope = refreshed.scope;
            auth.two_factor = refreshed.two_factor;
            auth.password_mode = refreshed.password_mode;
            state.expires_at = Instant::now() + Duration::from_secs(refreshed.expires_in);
            state.generation += 1;
            state.auth.clone()
        };

        tracing::info!(uid = %auth.uid, expires_in = auth.expires_in, "Access token refreshed");
        let handlers = self
            .auth_handlers
            .read()
            .expect("auth handlers lock poisoned")
            .clone();
        for handler in handlers {
            handler(&auth);
        }
        Ok(auth)
    }

    /// Zero the tokens and mark the session logged out.
    pub fn clear(&self) {
        self.end(SessionStatus::LoggedOut);
    }

    fn end(&self, status: SessionStatus) {
        {
            let mut state = self.state.write().expect("session lock poisoned");
            if state.status != SessionStatus::Valid {
                return;
            }
            state.status = status;
            state.auth.zeroize_tokens();
        }

        let handlers = self
            .deauth_handlers
            .read()
            .expect("deauth handlers lock poisoned")
            .clone();
        for handler in handlers {
            handler();
        }
    }
}

fn ensure_usable(state: &SessionState) -> Result<()> {
    match state.status {
        SessionStatus::Valid => Ok(()),
        SessionStatus::Revoked => Err(Error::unauthorized("session revoked")),
        SessionStatus::LoggedOut => Err(Error::unauthorized("logged out")),
    }
}

/// Overwrite a body that carried credentials, when no other handle shares it.
fn wipe(body: Bytes) -> Option<BytesMut> {
    let mut body = body.try_into_mut().ok()?;
    body[..].zeroize();
    Some(body)
}

/// 32 hex characters of OS randomness.
fn random_state() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::fill(&mut bytes)
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
    Ok(hex::encode(bytes))
}
