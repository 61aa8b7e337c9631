//! Authentication of API callers.
//!
//! Callers present a JWT issued with the shared `secret_key`, either in the session cookie named
//! by `auth.cookie_name` or as an `Authorization: Bearer` header. Handlers take a
//! [`CurrentUser`](crate::api::models::users::CurrentUser) argument to require authentication;
//! admin-only handlers additionally check [`CurrentUser::is_admin`](crate::api::models::users::CurrentUser::is_admin).
//!
//! The payment webhook is not authenticated this way; it is verified by the payment provider's
//! signature instead.

pub mod current_user;
pub mod session;
