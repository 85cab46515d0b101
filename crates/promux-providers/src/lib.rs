//! Upstream provider machinery: the static catalogue, the HTTP client
//! abstraction, request executors and OAuth token refresh.

pub mod catalogue;
pub mod client;
pub mod executor;
pub mod refresh;
pub mod retry;

pub use catalogue::{AuthScheme, OAuthEncoding, OAuthSpec, ProviderSpec};
pub use client::{
    header_get, Headers, HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure,
    UpstreamRequest, UpstreamResponse, WreqUpstreamClient,
};
pub use executor::{execute, ExecutePlan};
pub use refresh::{needs_refresh, refresh, RefreshError, RefreshedTokens, REFRESH_WINDOW};
pub use retry::parse_retry_hint;
