use tracing::{info, warn};

use crate::avatar::colorimetry::ColorimetryAnalyzer;
use crate::avatar::resolve::ResolutionSources;
use crate::avatar::store::AvatarStore;
use crate::avatar::types::{AvatarPayload, AvatarRecord, ColorimetryResult, PhotoScore, Swatch};
use crate::llm::vision::{PhotoSource, PhotoUpload};
use crate::storage::StorageError;

/// Fields of a create or update request; everything is optional at this level.
#[derive(Debug, Clone, Default)]
pub struct AvatarSubmission {
    pub image: Option<PhotoUpload>,
    pub photo_scores: Vec<PhotoScore>,
    pub season: Option<String>,
    pub skin_tone: Option<String>,
    pub undertone: Option<String>,
    pub recommended_colors: Vec<Swatch>,
    pub avoid_colors: Vec<Swatch>,
}

impl AvatarSubmission {
    fn lacks_color_profile(&self) -> bool {
        self.season.as_deref().map_or(true, |season| season.trim().is_empty())
            || self.recommended_colors.is_empty()
            || self.avoid_colors.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AvatarServiceError {
    #[error("{0}")]
    MissingImage(&'static str),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub avatar: AvatarRecord,
    /// The fixed color profile stood in for a missing analysis.
    pub colorimetry_fallback: bool,
}

/// Create, update, read and delete flows over the avatar store.
#[derive(Clone)]
pub struct AvatarService {
    store: AvatarStore,
    analyzer: ColorimetryAnalyzer,
}

impl AvatarService {
    pub fn new(store: AvatarStore, analyzer: ColorimetryAnalyzer) -> Self {
        Self { store, analyzer }
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<AvatarRecord>, AvatarServiceError> {
        Ok(self.store.get(user_id).await?)
    }

    pub async fn delete(&self, user_id: i64) -> Result<bool, AvatarServiceError> {
        Ok(self.store.delete(user_id).await?)
    }

    async fn analyze(&self, user_id: i64, image: &PhotoUpload) -> Option<ColorimetryResult> {
        self.analyzer
            .analyze(
                &PhotoSource::Upload(image.clone()),
                &[("userId", user_id.to_string())],
            )
            .await
    }

    pub async fn create(
        &self,
        user_id: i64,
        submission: AvatarSubmission,
    ) -> Result<CreateOutcome, AvatarServiceError> {
        let Some(image) = submission.image.as_ref() else {
            return Err(AvatarServiceError::MissingImage("avatarImage file is required"));
        };
        let previous = self.store.get(user_id).await?;
        let image_url = self.store.upload_image(user_id, image).await?;

        let needs_analysis = submission.lacks_color_profile();
        let analysis = if needs_analysis {
            self.analyze(user_id, image).await
        } else {
            None
        };
        let colorimetry_fallback = needs_analysis && analysis.is_none();
        if colorimetry_fallback {
            warn!(
                "Colorimetry unavailable for user {}; storing the default color profile",
                user_id
            );
        }

        let sources = ResolutionSources {
            form: &submission,
            analysis: analysis.as_ref(),
            existing: None,
            apply_defaults: true,
        };
        let avatar = self
            .write(user_id, &sources, image_url, previous.as_ref(), true)
            .await?;
        info!("Created avatar for user {}", user_id);
        Ok(CreateOutcome {
            avatar,
            colorimetry_fallback,
        })
    }

    /// Unset fields keep their stored values.
    pub async fn update(
        &self,
        user_id: i64,
        submission: AvatarSubmission,
    ) -> Result<AvatarRecord, AvatarServiceError> {
        let existing = self.store.get(user_id).await?;
        let existing_image = existing
            .as_ref()
            .and_then(|record| record.image_reference.clone());

        let (image_url, uploaded) = match submission.image.as_ref() {
            Some(image) => (self.store.upload_image(user_id, image).await?, true),
            None => match existing_image {
                Some(url) => (url, false),
                None => {
                    return Err(AvatarServiceError::MissingImage(
                        "an image is required to update the avatar",
                    ))
                }
            },
        };

        let analysis = match submission.image.as_ref() {
            Some(image) if submission.lacks_color_profile() => self.analyze(user_id, image).await,
            _ => None,
        };

        let sources = ResolutionSources {
            form: &submission,
            analysis: analysis.as_ref(),
            existing: existing.as_ref(),
            apply_defaults: false,
        };
        let avatar = self
            .write(user_id, &sources, image_url, existing.as_ref(), uploaded)
            .await?;
        info!("Updated avatar for user {}", user_id);
        Ok(avatar)
    }

    /// Upserts the resolved payload. A freshly uploaded image is released if the write fails,
    /// and the image it replaces is released once the write succeeds.
    async fn write(
        &self,
        user_id: i64,
        sources: &ResolutionSources<'_>,
        image_url: String,
        previous: Option<&AvatarRecord>,
        uploaded: bool,
    ) -> Result<AvatarRecord, AvatarServiceError> {
        let payload = AvatarPayload {
            image_reference: Some(image_url.clone()),
            photo_scores: sources.resolve_photo_scores(),
            color_profile: sources.resolve_color_profile(),
            recommended_colors: sources.resolve_recommended_colors(),
            avoid_colors: sources.resolve_avoid_colors(),
        };

        let avatar = match self.store.upsert(user_id, &payload).await {
            Ok(avatar) => avatar,
            Err(err) => {
                if uploaded {
                    self.store.release_image(&image_url).await;
                }
                return Err(err.into());
            }
        };

        if uploaded {
            let superseded = previous
                .and_then(|record| record.image_reference.as_deref())
                .filter(|old| *old != image_url);
            if let Some(old) = superseded {
                self.store.release_image(old).await;
            }
        }
        Ok(avatar)
    }
}
