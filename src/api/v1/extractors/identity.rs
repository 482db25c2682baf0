/*
 * Responsibility
 * - Handler で、現在のコールの Identity を受け取るための extractor
 * - CallAuth middleware が task-local に bind 済みである前提
 * - 見つからない場合は middleware 未設定なので 500 を返す (Anonymous とは区別する)
 */
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::services::auth::{Identity, identity};

pub struct CurrentIdentity(pub Arc<Identity>);

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity::current().map(CurrentIdentity).ok_or_else(|| {
            tracing::error!("no call identity bound; is the auth layer installed?");
            AppError::Internal
        })
    }
}
