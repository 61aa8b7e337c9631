use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    db::handlers::Users,
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::{debug, instrument, trace};

/// Extract user from JWT session cookie if present and valid
/// Returns:
/// - None: No session cookie present
/// - Some(Ok(user)): Valid JWT found and verified
/// - Some(Err(error)): Cookie present but invalid/malformed
fn try_session_cookie_auth(parts: &Parts, config: &crate::config::Config) -> Option<Result<CurrentUser>> {
    let cookie_header = parts.headers.get(header::COOKIE)?;

    let cookie_str = match cookie_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid cookie header: {e}"),
            }));
        }
    };
    let cookie_name = &config.auth.cookie_name;

    let mut last_error = None;
    for cookie in cookie_str.split(';') {
        if let Some((name, value)) = cookie.trim().split_once('=')
            && name == cookie_name
        {
            match session::verify_session_token(value, config) {
                Ok(user) => return Some(Ok(user)),
                Err(e) => last_error = Some(e),
            }
        }
    }
    last_error.map(Err)
}

/// Extract user from an `Authorization: Bearer <jwt>` header
fn try_bearer_auth(parts: &Parts, config: &crate::config::Config) -> Option<Result<CurrentUser>> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    Some(session::verify_session_token(token.trim(), config))
}

/// Make sure the token's user has a local row, so orders and enrollments can reference it
async fn provision(state: &AppState, user: &CurrentUser) -> Result<()> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let provisioned = Users::new(&mut conn).ensure(user).await?;
    trace!(user_id = %provisioned.id, "User provisioned");
    Ok(())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let mut auth_error = None;

        for (method, attempt) in [
            ("bearer", try_bearer_auth(parts, &state.config)),
            ("session cookie", try_session_cookie_auth(parts, &state.config)),
        ] {
            match attempt {
                Some(Ok(user)) => {
                    debug!(user_id = %user.id, method, "Authenticated request");
                    provision(state, &user).await?;
                    return Ok(user);
                }
                Some(Err(e)) => {
                    trace!(method, error = ?e, "Authentication attempt failed");
                    auth_error.get_or_insert(e);
                }
                None => trace!(method, "No credentials presented"),
            }
        }

        match auth_error {
            // Surface server-side failures (missing secret) rather than masking them as 401
            Some(e @ Error::Internal { .. }) => Err(e),
            _ => Err(Error::Unauthenticated { message: None }),
        }
    }
}
