pub mod rest;

pub use rest::{create_rest_router, serve, AppState, HistoryRequest, HistoryResponse};
