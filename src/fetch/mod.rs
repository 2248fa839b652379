// Single-request fetchers (structured / text) and the staggered batch dispatcher.
pub mod batch;
pub mod client;
pub mod types;

pub use batch::{dispatch_many, Slot, Stagger};
pub use client::{build_http_client, JsonFetcher, TextFetcher};
pub use types::*;

/// One network request resolved into a decoded payload.
///
/// Implementations are cheap to clone (the connection pool is shared) so the
/// batch dispatcher can hand a copy to every task it spawns.
#[async_trait::async_trait]
pub trait Fetch: Clone + Send + Sync + 'static {
    type Output: Send + 'static;

    async fn fetch(&self, request: RequestSpec) -> FetchResult<Self::Output>;

    fn last_response(&self) -> Option<ResponseMeta>;
}
