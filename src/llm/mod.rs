pub mod errors;
pub mod gemini;
pub mod vision;

pub use errors::AiError;
pub use gemini::{GeminiImageClient, GenerationRequest, ImageGenerationBackend, InlineImage};
pub use vision::{PhotoSource, PhotoUpload, VisionBackend, VisionClient, VisionRequest};
