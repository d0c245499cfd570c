use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::avatar::api_client::{AvatarApi, ClientError};
use crate::avatar::types::{AvatarRecord, PhotoScore, PhotoValidationResult};
use crate::llm::vision::PhotoUpload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WizardStep {
    Photo,
    Info,
    Measurements,
    Confirm,
}

impl WizardStep {
    fn next(self) -> Option<Self> {
        match self {
            WizardStep::Photo => Some(WizardStep::Info),
            WizardStep::Info => Some(WizardStep::Measurements),
            WizardStep::Measurements => Some(WizardStep::Confirm),
            WizardStep::Confirm => None,
        }
    }

    fn previous(self) -> Self {
        match self {
            WizardStep::Photo | WizardStep::Info => WizardStep::Photo,
            WizardStep::Measurements => WizardStep::Info,
            WizardStep::Confirm => WizardStep::Measurements,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Idle,
    Loading,
    Approved,
    Rejected,
    /// The check could not run; the user should retry, not retake the photo.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoValidationState {
    pub status: ValidationStatus,
    pub reasons: Vec<String>,
    pub tips: Vec<String>,
    pub scores: Vec<PhotoScore>,
}

impl Default for PhotoValidationState {
    fn default() -> Self {
        Self {
            status: ValidationStatus::Idle,
            reasons: Vec::new(),
            tips: Vec::new(),
            scores: default_photo_scores(),
        }
    }
}

pub fn default_photo_scores() -> Vec<PhotoScore> {
    vec![
        PhotoScore::new("Illumination", 95.0),
        PhotoScore::new("Sharpness", 88.0),
        PhotoScore::new("Posture", 94.0),
        PhotoScore::new("Framing", 90.0),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvatarInfo {
    pub gender: String,
    pub body_type: String,
    pub height: String,
    pub weight: String,
}

impl AvatarInfo {
    fn is_complete(&self) -> bool {
        [&self.gender, &self.body_type, &self.height, &self.weight]
            .iter()
            .all(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Measurements {
    pub bust: String,
    pub waist: String,
    pub hips: String,
    pub shoulders: String,
}

impl Measurements {
    fn is_complete(&self) -> bool {
        [&self.bust, &self.waist, &self.hips, &self.shoulders]
            .iter()
            .all(|value| !value.trim().is_empty())
    }
}

/// What the avatar preview currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    Placeholder,
    /// Bytes held by the wizard for the selected file.
    Local { file_name: String },
    Stored { url: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("upload a photo to build your avatar")]
    NoPhoto,
    #[error("the photo must be approved before creating the avatar")]
    PhotoNotApproved,
    #[error("complete the {0:?} step before continuing")]
    StepIncomplete(WizardStep),
    #[error(transparent)]
    Api(#[from] ClientError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Validated(ValidationStatus),
    /// A newer selection replaced this one before its check finished.
    Superseded,
}

struct WizardState {
    step: WizardStep,
    photo: Option<PhotoUpload>,
    preview: Preview,
    validation: PhotoValidationState,
    info: AvatarInfo,
    measurements: Measurements,
    selection: u64,
    in_flight: Option<CancellationToken>,
    saved: Option<AvatarRecord>,
}

/// Photo, info, measurements, confirm. Only an approved photo unlocks the later steps.
#[derive(Clone)]
pub struct AvatarWizard {
    api: Arc<dyn AvatarApi>,
    state: Arc<Mutex<WizardState>>,
}

impl AvatarWizard {
    pub fn new(api: Arc<dyn AvatarApi>) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(WizardState {
                step: WizardStep::Photo,
                photo: None,
                preview: Preview::Placeholder,
                validation: PhotoValidationState::default(),
                info: AvatarInfo::default(),
                measurements: Measurements::default(),
                selection: 0,
                in_flight: None,
                saved: None,
            })),
        }
    }

    pub fn step(&self) -> WizardStep {
        self.state.lock().step
    }

    pub fn validation(&self) -> PhotoValidationState {
        self.state.lock().validation.clone()
    }

    pub fn preview(&self) -> Preview {
        self.state.lock().preview.clone()
    }

    pub fn saved_avatar(&self) -> Option<AvatarRecord> {
        self.state.lock().saved.clone()
    }

    pub fn set_info(&self, info: AvatarInfo) {
        self.state.lock().info = info;
    }

    pub fn set_measurements(&self, measurements: Measurements) {
        self.state.lock().measurements = measurements;
    }

    /// Replaces the selected photo and validates it. Any check still running for an
    /// earlier selection is cancelled and its result discarded.
    pub async fn select_photo(&self, photo: PhotoUpload) -> SelectionOutcome {
        let token = CancellationToken::new();
        let selection = {
            let mut state = self.state.lock();
            if let Some(previous) = state.in_flight.replace(token.clone()) {
                previous.cancel();
            }
            state.selection += 1;
            if let Preview::Local { file_name } = &state.preview {
                debug!("Released local preview for {}", file_name);
            }
            state.preview = Preview::Local {
                file_name: photo.file_name.clone().unwrap_or_default(),
            };
            state.photo = Some(photo.clone());
            state.saved = None;
            state.validation = PhotoValidationState {
                status: ValidationStatus::Loading,
                reasons: Vec::new(),
                tips: Vec::new(),
                scores: Vec::new(),
            };
            state.selection
        };

        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            result = self.api.validate_photo(&photo) => Some(result),
        };

        let mut state = self.state.lock();
        if state.selection != selection || token.is_cancelled() {
            debug!("Discarding validation for superseded selection {}", selection);
            return SelectionOutcome::Superseded;
        }
        state.in_flight = None;
        let Some(result) = outcome else {
            return SelectionOutcome::Superseded;
        };
        state.validation = validation_state(result);
        SelectionOutcome::Validated(state.validation.status)
    }

    fn can_continue(state: &WizardState) -> bool {
        match state.step {
            WizardStep::Photo => {
                state.photo.is_some() && state.validation.status == ValidationStatus::Approved
            }
            WizardStep::Info => state.info.is_complete(),
            WizardStep::Measurements => state.measurements.is_complete(),
            WizardStep::Confirm => true,
        }
    }

    /// Moves one step forward; never skips.
    pub fn advance(&self) -> Result<WizardStep, WizardError> {
        let mut state = self.state.lock();
        if !Self::can_continue(&state) {
            return Err(WizardError::StepIncomplete(state.step));
        }
        if let Some(next) = state.step.next() {
            state.step = next;
        }
        Ok(state.step)
    }

    pub fn back(&self) -> WizardStep {
        let mut state = self.state.lock();
        state.step = state.step.previous();
        state.step
    }

    /// Rechecks the photo verdict, sending the wizard back to the first step if it is not approved.
    pub async fn create_avatar(&self) -> Result<AvatarRecord, WizardError> {
        let (photo, scores) = {
            let mut state = self.state.lock();
            let Some(photo) = state.photo.clone() else {
                return Err(WizardError::NoPhoto);
            };
            if state.validation.status != ValidationStatus::Approved {
                state.step = WizardStep::Photo;
                return Err(WizardError::PhotoNotApproved);
            }
            let scores = if state.validation.scores.is_empty() {
                default_photo_scores()
            } else {
                state.validation.scores.clone()
            };
            (photo, scores)
        };

        let avatar = self.api.create_avatar(&photo, &scores).await.map_err(|err| {
            warn!("Avatar creation failed: {}", err);
            WizardError::from(err)
        })?;

        let mut state = self.state.lock();
        if let Some(url) = avatar.image_reference.clone() {
            if let Preview::Local { file_name } = &state.preview {
                debug!("Released local preview for {}", file_name);
            }
            state.preview = Preview::Stored { url };
        }
        state.saved = Some(avatar.clone());
        info!("Avatar created for user {}", avatar.user_id);
        Ok(avatar)
    }
}

fn validation_state(result: Result<PhotoValidationResult, ClientError>) -> PhotoValidationState {
    match result {
        Ok(result) => {
            let status = if result.is_approved() {
                ValidationStatus::Approved
            } else {
                ValidationStatus::Rejected
            };
            let (reasons, tips) = match status {
                ValidationStatus::Approved => (Vec::new(), Vec::new()),
                _ => (result.reasons, result.tips),
            };
            let scores = if result.photo_scores.is_empty() {
                default_photo_scores()
            } else {
                result.photo_scores
            };
            PhotoValidationState {
                status,
                reasons,
                tips,
                scores,
            }
        }
        Err(err) => PhotoValidationState {
            status: ValidationStatus::Error,
            reasons: vec![err.to_string()],
            tips: Vec::new(),
            scores: default_photo_scores(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::api_client::testing::ScriptedAvatarApi;
    use crate::avatar::types::Verdict;

    fn photo(name: &str) -> PhotoUpload {
        PhotoUpload {
            bytes: vec![0xFF, 0xD8, 0xFF],
            mime_type: Some("image/jpeg".to_string()),
            file_name: Some(name.to_string()),
        }
    }

    fn verdict(verdict: Verdict, scores: Vec<PhotoScore>) -> Result<PhotoValidationResult, ClientError> {
        Ok(PhotoValidationResult {
            verdict,
            confidence: 0.9,
            reasons: vec!["too dark".to_string()],
            tips: vec!["use daylight".to_string()],
            photo_scores: scores,
        })
    }

    fn fill_details(wizard: &AvatarWizard) {
        wizard.set_info(AvatarInfo {
            gender: "female".to_string(),
            body_type: "hourglass".to_string(),
            height: "165".to_string(),
            weight: "60".to_string(),
        });
        wizard.set_measurements(Measurements {
            bust: "90".to_string(),
            waist: "70".to_string(),
            hips: "95".to_string(),
            shoulders: "40".to_string(),
        });
    }

    #[tokio::test]
    async fn approved_photo_walks_through_to_creation() {
        let api = Arc::new(ScriptedAvatarApi::default().validation(
            "me.jpg",
            verdict(Verdict::Approved, vec![PhotoScore::new("Illumination", 91.0)]),
        ));
        let wizard = AvatarWizard::new(api.clone());

        assert!(matches!(wizard.advance(), Err(WizardError::StepIncomplete(WizardStep::Photo))));
        assert_eq!(
            wizard.select_photo(photo("me.jpg")).await,
            SelectionOutcome::Validated(ValidationStatus::Approved)
        );
        assert!(wizard.validation().reasons.is_empty());
        assert_eq!(wizard.advance().unwrap(), WizardStep::Info);
        assert!(wizard.advance().is_err());

        fill_details(&wizard);
        assert_eq!(wizard.advance().unwrap(), WizardStep::Measurements);
        assert_eq!(wizard.advance().unwrap(), WizardStep::Confirm);

        let avatar = wizard.create_avatar().await.unwrap();
        assert_eq!(
            wizard.preview(),
            Preview::Stored {
                url: avatar.image_reference.clone().unwrap()
            }
        );
        assert_eq!(
            api.created(),
            vec![(
                Some("me.jpg".to_string()),
                vec![PhotoScore::new("Illumination", 91.0)]
            )]
        );
    }

    #[tokio::test]
    async fn rejected_photo_keeps_reasons_and_blocks_creation() {
        let api = Arc::new(
            ScriptedAvatarApi::default().validation("group.jpg", verdict(Verdict::Rejected, vec![])),
        );
        let wizard = AvatarWizard::new(api.clone());

        wizard.select_photo(photo("group.jpg")).await;
        let state = wizard.validation();
        assert_eq!(state.status, ValidationStatus::Rejected);
        assert_eq!(state.reasons, vec!["too dark".to_string()]);
        assert_eq!(state.scores, default_photo_scores());

        assert!(matches!(wizard.create_avatar().await, Err(WizardError::PhotoNotApproved)));
        assert_eq!(wizard.step(), WizardStep::Photo);
        assert!(api.created().is_empty());
    }

    #[tokio::test]
    async fn failed_check_is_an_error_state_not_a_rejection() {
        let api = Arc::new(ScriptedAvatarApi::default().validation(
            "me.jpg",
            Err(ClientError::Rejected {
                status: reqwest::StatusCode::BAD_GATEWAY,
                message: "vision service unavailable".to_string(),
            }),
        ));
        let wizard = AvatarWizard::new(api);

        wizard.select_photo(photo("me.jpg")).await;
        let state = wizard.validation();
        assert_eq!(state.status, ValidationStatus::Error);
        assert_eq!(state.reasons, vec!["vision service unavailable".to_string()]);
        assert!(state.tips.is_empty());
    }

    #[tokio::test]
    async fn new_selection_cancels_the_pending_check() {
        let api = Arc::new(
            ScriptedAvatarApi::default()
                .gated_validation("first.jpg", verdict(Verdict::Approved, vec![]))
                .validation("second.jpg", verdict(Verdict::Rejected, vec![])),
        );
        let wizard = AvatarWizard::new(api.clone());

        let pending = {
            let wizard = wizard.clone();
            tokio::spawn(async move { wizard.select_photo(photo("first.jpg")).await })
        };
        while wizard.validation().status != ValidationStatus::Loading {
            tokio::task::yield_now().await;
        }

        let second = wizard.select_photo(photo("second.jpg")).await;
        api.release();
        let first = pending.await.unwrap();

        assert_eq!(first, SelectionOutcome::Superseded);
        assert_eq!(second, SelectionOutcome::Validated(ValidationStatus::Rejected));
        assert_eq!(wizard.validation().status, ValidationStatus::Rejected);
        assert_eq!(
            wizard.preview(),
            Preview::Local {
                file_name: "second.jpg".to_string()
            }
        );
        assert!(matches!(wizard.advance(), Err(WizardError::StepIncomplete(WizardStep::Photo))));
    }

    #[tokio::test]
    async fn create_without_photo_is_refused() {
        let wizard = AvatarWizard::new(Arc::new(ScriptedAvatarApi::default()));
        assert!(matches!(wizard.create_avatar().await, Err(WizardError::NoPhoto)));
    }
}
