//! HTTP surface: endpoint dispatch, machine-prefix rewriting, CORS and the
//! downstream auth hygiene layer.

mod proxy;

pub use proxy::{proxy_router, RouterState};
