pub mod api_client;
pub mod colorimetry;
pub mod palette;
pub mod resolve;
pub mod service;
pub mod store;
pub mod types;
pub mod validator;
pub mod wizard;

pub use colorimetry::ColorimetryAnalyzer;
pub use service::{AvatarService, AvatarServiceError, AvatarSubmission};
pub use store::AvatarStore;
pub use validator::PhotoValidator;
