use async_trait::async_trait;
use reqwest::{Request, Response};

/// Seam over the HTTP client so sources can be driven by a stub in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;

    /// Like [`execute`](Self::execute), but 4xx/5xx responses are errors.
    async fn execute_ok(&self, req: Request) -> reqwest::Result<Response> {
        self.execute(req).await?.error_for_status()
    }
}
