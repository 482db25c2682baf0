/*
 * Responsibility
 * - プロセス起動時に組み立てる共有コンテキスト (AppState)
 * - Clone 前提で持つ (内部は Arc で cheap)
 * - コールごとの状態は持たない (Identity は task-local)
 */
use std::sync::Arc;

use crate::services::auth::CallAuthenticator;

#[derive(Clone, Debug)]
pub struct AppState {
    pub auth: Arc<CallAuthenticator>,
}

impl AppState {
    pub fn new(auth: Arc<CallAuthenticator>) -> Self {
        Self { auth }
    }
}
