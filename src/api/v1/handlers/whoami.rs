/*
 * Responsibility
 * - GET /whoami: 現在のコールに bind された Identity を返す
 * - token 自体は返さない
 */
use axum::Json;

use crate::api::v1::dto::identity::IdentityResponse;
use crate::api::v1::extractors::identity::CurrentIdentity;

pub async fn whoami(CurrentIdentity(identity): CurrentIdentity) -> Json<IdentityResponse> {
    Json(IdentityResponse::from(identity.as_ref()))
}
