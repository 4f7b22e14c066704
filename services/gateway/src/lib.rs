pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;
pub mod state;
pub mod websocket;


pub use error::{ApiError, ApiResult};
pub use router::create_router;
pub use state::AppState;
