//! Bearer-token authentication for RPC calls.
//!
//! Every call is authenticated independently: the bearer token is decoded
//! (issuer allow-list, signature and claim checks), converted into an
//! [`Identity`](services::auth::Identity), and bound to the call's task for
//! the duration of the handler. Anything that goes wrong during
//! authentication demotes the call to `Identity::Anonymous` instead of
//! rejecting it.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod services;
pub mod state;
