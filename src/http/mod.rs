pub mod api;
pub mod backoff;
pub mod client;
pub mod model;

pub use api::{ApiClient, ApiError, JobApi};
pub use client::{HttpClient, HttpClientError, HttpConfig, ReqwestHttpClient};
pub use model::{StatusUpdate, SubUnit};
