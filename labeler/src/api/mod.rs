//! HTTP API handlers for the labeler

pub mod health;
pub mod session;
pub mod trainer;

pub use health::health_routes;
pub use session::session_routes;
pub use trainer::trainer_routes;
