//! Per-user API client: every call goes through [`Client::do_request`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{Auth, AuthSession, AUTH_PATH};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::transport::HttpClient;

/// Authenticated client of one user.
#[derive(Clone)]
pub struct Client {
    http: HttpClient,
    session: Arc<AuthSession>,
}

impl Client {
    pub fn new(http: HttpClient, session: Arc<AuthSession>) -> Self {
        Self { http, session }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Snapshot of the current credentials.
    pub fn auth(&self) -> Result<Auth> {
        self.session.auth()
    }

    /// Perform an authenticated API call.
    ///
    /// `build` is invoked once per attempt so a retry after a token refresh
    /// starts from a clean request. A 401 triggers one refresh and one retry
    /// unless `ctx` opts out; a 401 after that is [`Error::Unauthorized`].
    /// Any other non-2xx response becomes [`Error::ApiFailure`].
    pub async fn do_request<F>(&self, ctx: &RequestContext, build: F) -> Result<Response>
    where
        F: Fn() -> Request,
    {
        let mut request = build();
        let generation = self.session.attach(ctx, &mut request).await?;
        let response = self.http.send(&request, ctx.cancellation()).await?;
        if response.status != 401 {
            return check_status(response);
        }

        if !ctx.retry_unauthorized() {
            return Err(Error::unauthorized(format!(
                "{} {} answered 401",
                request.method, request.path
            )));
        }

        tracing::debug!(path = %request.path, "Got 401, refreshing token and retrying");
        self.session.refresh_stale(ctx, generation).await?;

        let mut request = build();
        self.session.attach(ctx, &mut request).await?;
        let response = self.http.send(&request, ctx.cancellation()).await?;
        if response.status == 401 {
            return Err(Error::unauthorized(format!(
                "{} {} answered 401 after refresh",
                request.method, request.path
            )));
        }
        check_status(response)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, ctx: &RequestContext, path: &str) -> Result<T> {
        self.do_request(ctx, || Request::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, ctx: &RequestContext, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = Request::post(path).json(body)?;
        self.do_request(ctx, || request.clone()).await?.json()
    }

    /// Revoke the session server-side, then zero the local tokens.
    ///
    /// The local session ends even when the `DELETE` fails; the error is
    /// still returned.
    pub async fn logout(&self, ctx: &RequestContext) -> Result<()> {
        let ctx = ctx.clone().without_unauthorized_retry();
        let result = self.do_request(&ctx, || Request::delete(AUTH_PATH)).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Logout request failed, clearing session anyway");
        }
        self.session.clear();
        result.map(|_| ())
    }
}

fn check_status(response: Response) -> Result<Response> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(response.into_api_error())
    }
}
