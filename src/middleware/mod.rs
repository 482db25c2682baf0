/*
 * Responsibility
 * - middleware の公開インターフェース (re-export)
 * - auth: コールごとの Identity bind
 * - http: request id / trace / timeout
 */
pub mod auth;
pub mod http;

pub use auth::access::{CallAuth, CallAuthLayer, bearer_token};
