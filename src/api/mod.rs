pub mod events;
pub mod response;
pub mod routes;

pub use response::{ApiError, ApiResponse};
pub use routes::{create_router, AppState};
