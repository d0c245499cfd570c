use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::GenerationSettings;
use crate::llm::{AiError, GenerationRequest, ImageGenerationBackend, InlineImage};
use crate::utils::media::FetchedImage;
use crate::utils::retry::{retry_classified, RetryAction, RetryPolicy, Sleeper};

/// One pose requested from the image model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSpec {
    pub id: &'static str,
    pub label: &'static str,
    instructions: &'static str,
}

impl ViewSpec {
    fn prompt(&self, product_name: &str) -> String {
        self.instructions.replace("{product}", product_name)
    }
}

pub const FRONT_VIEW: ViewSpec = ViewSpec {
    id: "front",
    label: "Frontal",
    instructions: "Generate a FRONTAL view of the person wearing this \"{product}\".
The person should be facing the camera directly.
Show the full upper body with the garment clearly visible.
The background should be clean, neutral, and professional (like a fashion photoshoot).",
};

pub const SIDE_VIEW: ViewSpec = ViewSpec {
    id: "side",
    label: "Lateral",
    instructions: "Generate a SIDE/PROFILE view of the person wearing this \"{product}\".
The person should be turned 90 degrees, showing their profile.
Show how the garment fits from the side angle.
The background should be clean, neutral, and professional.",
};

pub fn default_views() -> Vec<ViewSpec> {
    vec![FRONT_VIEW, SIDE_VIEW]
}

/// `url` holds an inline `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedView {
    pub id: String,
    pub label: String,
    #[serde(rename = "url")]
    pub image_data: String,
}

pub(crate) fn try_on_prompt(product_name: &str, view: &ViewSpec) -> String {
    format!(
        "You are a professional virtual try-on AI. You have two images:
1. The first image is a photo of a person (the model/avatar)
2. The second image is a clothing item/garment called \"{product_name}\"

{view_prompt}

IMPORTANT INSTRUCTIONS:
- Generate a NEW photorealistic image showing the person wearing the garment
- The garment should fit naturally on the person's body
- Preserve the person's face, skin tone, hair, and body proportions exactly
- Make it look like a real professional photo, not a digital composite
- The lighting should be natural and consistent
- Output ONLY the generated image",
        view_prompt = view.prompt(product_name)
    )
}

fn inline(image: &FetchedImage) -> InlineImage {
    InlineImage {
        mime_type: image.mime_type.clone(),
        data: image.base64(),
    }
}

/// Why one attempt at a view produced nothing.
#[derive(Debug)]
enum ViewMiss {
    NoImage,
    Failed(AiError),
}

/// Renders each view strictly one after another. Rate-limited attempts are retried
/// after a fixed backoff and a stream without an image is retried at once; any other
/// error skips the view.
#[derive(Clone)]
pub struct TryOnGenerator {
    backend: Arc<dyn ImageGenerationBackend>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    view_pacing: Duration,
    views: Vec<ViewSpec>,
}

impl TryOnGenerator {
    pub fn new(
        backend: Arc<dyn ImageGenerationBackend>,
        sleeper: Arc<dyn Sleeper>,
        settings: &GenerationSettings,
    ) -> Self {
        Self {
            backend,
            sleeper,
            policy: RetryPolicy::fixed(settings.max_attempts, settings.rate_limit_backoff),
            view_pacing: settings.view_pacing,
            views: default_views(),
        }
    }

    pub fn views(&self) -> &[ViewSpec] {
        &self.views
    }

    /// Zero to N views; a view that never produced an image is simply absent.
    pub async fn generate(
        &self,
        avatar: &FetchedImage,
        product: &FetchedImage,
        product_name: &str,
    ) -> Vec<GeneratedView> {
        let images = vec![inline(avatar), inline(product)];
        let mut generated = Vec::with_capacity(self.views.len());

        for (index, view) in self.views.iter().enumerate() {
            info!("Generating {} view for \"{}\"", view.id, product_name);
            let request = GenerationRequest {
                operation: format!("tryon_{}", view.id),
                images: images.clone(),
                prompt: try_on_prompt(product_name, view),
            };

            match self.render_view(view, &request).await {
                Some(image) => {
                    info!("{} view generated", view.id);
                    generated.push(GeneratedView {
                        id: view.id.to_string(),
                        label: view.label.to_string(),
                        image_data: image.data_uri(),
                    });
                }
                None => warn!("No {} view produced for \"{}\"", view.id, product_name),
            }

            if index + 1 < self.views.len() {
                self.sleeper.sleep(self.view_pacing).await;
            }
        }

        generated
    }

    async fn render_view(
        &self,
        view: &ViewSpec,
        request: &GenerationRequest,
    ) -> Option<InlineImage> {
        let max_attempts = self.policy.max_attempts;
        let outcome = retry_classified(
            &self.policy,
            self.sleeper.as_ref(),
            |miss: &ViewMiss| match miss {
                ViewMiss::NoImage => RetryAction::Immediately,
                ViewMiss::Failed(err) if err.is_rate_limit() => {
                    info!(
                        "Rate limited on {} view, waiting {:?} before retrying",
                        view.id,
                        self.policy.backoff.delay_for(1)
                    );
                    RetryAction::Backoff
                }
                ViewMiss::Failed(_) => RetryAction::Stop,
            },
            |attempt| async move {
                match self.backend.generate_image(request).await {
                    Ok(Some(image)) => Ok(image),
                    Ok(None) => {
                        warn!(
                            "No image in {} view stream (attempt {}/{})",
                            view.id, attempt, max_attempts
                        );
                        Err(ViewMiss::NoImage)
                    }
                    Err(err) => {
                        warn!(
                            "Error generating {} view (attempt {}/{}): {}",
                            view.id, attempt, max_attempts, err
                        );
                        Err(ViewMiss::Failed(err))
                    }
                }
            },
        )
        .await;

        outcome.ok()
    }
}
