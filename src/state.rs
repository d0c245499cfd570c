use std::sync::Arc;

use tracing::warn;

use crate::avatar::{AvatarService, AvatarStore, ColorimetryAnalyzer, PhotoValidator};
use crate::config::{Config, ConfigError};
use crate::db::Database;
use crate::llm::{GeminiImageClient, ImageGenerationBackend, VisionBackend, VisionClient};
use crate::storage::{ObjectStore, S3ObjectStore};
use crate::tryon::TryOnGenerator;
use crate::utils::media::ImageFetcher;
use crate::utils::retry::{Sleeper, TokioSleeper};

fn report<T>(adapter: Result<T, ConfigError>) -> Result<T, ConfigError> {
    if let Err(err) = &adapter {
        warn!("{}; related endpoints will fail until it is set", err);
    }
    adapter
}

/// Everything a request handler needs. Adapters whose settings are incomplete are kept
/// as their `ConfigError` and reported on first use.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub objects: Result<Arc<dyn ObjectStore>, ConfigError>,
    pub avatars: AvatarService,
    pub validator: Result<PhotoValidator, ConfigError>,
    pub generator: Result<TryOnGenerator, ConfigError>,
    pub fetcher: ImageFetcher,
    pub sleeper: Arc<dyn Sleeper>,
}

impl AppState {
    pub fn new(config: &Config, db: Database) -> Self {
        let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
        let vision = report(VisionClient::from_settings(&config.vision))
            .map(|client| Arc::new(client) as Arc<dyn VisionBackend>);
        let objects = report(S3ObjectStore::from_settings(&config.storage))
            .map(|store| Arc::new(store) as Arc<dyn ObjectStore>);
        let generator = report(GeminiImageClient::from_settings(&config.generation)).map(|client| {
            let backend: Arc<dyn ImageGenerationBackend> = Arc::new(client);
            TryOnGenerator::new(backend, sleeper.clone(), &config.generation)
        });

        Self::from_parts(
            db,
            objects,
            vision,
            generator,
            ImageFetcher::new(&config.fetch),
            sleeper,
            &config.vision.reply_language,
        )
    }

    pub fn from_parts(
        db: Database,
        objects: Result<Arc<dyn ObjectStore>, ConfigError>,
        vision: Result<Arc<dyn VisionBackend>, ConfigError>,
        generator: Result<TryOnGenerator, ConfigError>,
        fetcher: ImageFetcher,
        sleeper: Arc<dyn Sleeper>,
        reply_language: &str,
    ) -> Self {
        let store = AvatarStore::new(db.clone(), objects.clone());
        let analyzer = ColorimetryAnalyzer::new(vision.clone(), reply_language);
        let validator = vision.map(|backend| PhotoValidator::new(backend, reply_language));
        Self {
            db,
            objects,
            avatars: AvatarService::new(store, analyzer),
            validator,
            generator,
            fetcher,
            sleeper,
        }
    }
}
