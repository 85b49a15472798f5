mod api;

pub use api::{DatabaseHealth, ErrorBody, HealthResponse, RootResponse};
