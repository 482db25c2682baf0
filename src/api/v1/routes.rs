/*
 * Responsibility
 * - v1 の URL 構造を定義
 * - auth layer はここで掛ける (handler は CurrentIdentity を受け取るだけ)
 */
use axum::{Router, routing::get};

use crate::api::v1::handlers::whoami::whoami;
use crate::middleware::auth::access;
use crate::state::AppState;

pub fn routes(state: &AppState) -> Router {
    let router = Router::new().route("/whoami", get(whoami));
    access::apply(router, state.auth.clone())
}
