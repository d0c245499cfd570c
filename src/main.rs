use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use dotenvy::dotenv;
use tracing::{error, info};

mod api;
mod avatar;
mod config;
mod db;
mod llm;
mod state;
mod storage;
mod tryon;
mod utils;

use avatar::api_client::HttpAvatarApi;
use avatar::wizard::{AvatarInfo, AvatarWizard, Measurements, SelectionOutcome, ValidationStatus};
use config::Config;
use db::Database;
use llm::vision::PhotoUpload;
use state::AppState;
use utils::logging::init_logging;
use utils::media::{detect_mime_type, extension_for_mime};

fn create_avatar_usage() -> &'static str {
    "Usage: avatar_tryon_service create-avatar --server <url> --user-id <id> --photo <path> \
[--gender <g>] [--body-type <t>] [--height <cm>] [--weight <kg>] \
[--bust <cm>] [--waist <cm>] [--hips <cm>] [--shoulders <cm>]"
}

struct CreateAvatarArgs {
    server: String,
    user_id: i64,
    photo: PathBuf,
    info: AvatarInfo,
    measurements: Measurements,
}

fn parse_create_avatar_args(args: &[String]) -> anyhow::Result<Option<CreateAvatarArgs>> {
    if args.get(1).map(|value| value.as_str()) != Some("create-avatar") {
        return Ok(None);
    }

    let mut server: Option<String> = None;
    let mut user_id: Option<i64> = None;
    let mut photo: Option<PathBuf> = None;
    let mut info = AvatarInfo::default();
    let mut measurements = Measurements::default();

    let mut index = 2;
    while index < args.len() {
        let flag = args[index].as_str();
        if flag == "--help" || flag == "-h" {
            return Err(anyhow!(create_avatar_usage()));
        }
        index += 1;
        let value = args
            .get(index)
            .ok_or_else(|| anyhow!("Missing value for {flag}"))?
            .clone();
        match flag {
            "--server" => server = Some(value),
            "--user-id" => {
                user_id = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| anyhow!("Invalid --user-id value: {value}"))?,
                );
            }
            "--photo" => photo = Some(PathBuf::from(value)),
            "--gender" => info.gender = value,
            "--body-type" => info.body_type = value,
            "--height" => info.height = value,
            "--weight" => info.weight = value,
            "--bust" => measurements.bust = value,
            "--waist" => measurements.waist = value,
            "--hips" => measurements.hips = value,
            "--shoulders" => measurements.shoulders = value,
            other => {
                return Err(anyhow!(
                    "Unknown create-avatar argument: {other}\n{}",
                    create_avatar_usage()
                ));
            }
        }
        index += 1;
    }

    Ok(Some(CreateAvatarArgs {
        server: server.ok_or_else(|| anyhow!("--server is required"))?,
        user_id: user_id.ok_or_else(|| anyhow!("--user-id is required"))?,
        photo: photo.ok_or_else(|| anyhow!("--photo is required"))?,
        info,
        measurements,
    }))
}

async fn run_create_avatar(args: CreateAvatarArgs) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.photo).await?;
    let mime_type = detect_mime_type(&bytes);
    let file_name = args
        .photo
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .or_else(|| {
            mime_type
                .as_deref()
                .map(|mime| format!("avatar.{}", extension_for_mime(mime)))
        });
    let upload = PhotoUpload {
        bytes,
        mime_type,
        file_name,
    };

    let wizard = AvatarWizard::new(Arc::new(HttpAvatarApi::new(&args.server, args.user_id)));
    match wizard.select_photo(upload).await {
        SelectionOutcome::Validated(ValidationStatus::Approved) => {
            info!("Photo approved");
        }
        _ => {
            let validation = wizard.validation();
            for reason in &validation.reasons {
                error!("Reason: {}", reason);
            }
            for tip in &validation.tips {
                info!("Tip: {}", tip);
            }
            return Err(anyhow!("photo was not approved ({:?})", validation.status));
        }
    }

    wizard.advance()?;
    wizard.set_info(args.info);
    wizard.advance()?;
    wizard.set_measurements(args.measurements);
    wizard.advance()?;

    let avatar = wizard.create_avatar().await?;
    info!(
        "Avatar stored for user {}: {}",
        avatar.user_id,
        avatar.image_reference.as_deref().unwrap_or("-")
    );
    println!("{}", serde_json::to_string_pretty(&avatar)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Config::load()?;
    let _guards = init_logging(&config.log_level);

    let args: Vec<String> = std::env::args().collect();
    if let Some(create_args) = parse_create_avatar_args(&args)? {
        return run_create_avatar(create_args).await;
    }
    match args.get(1).map(|value| value.as_str()) {
        None | Some("serve") => {}
        Some(other) => {
            return Err(anyhow!(
                "Unknown command: {other}\nCommands: serve (default), create-avatar"
            ));
        }
    }

    info!("Starting avatar try-on service");
    let db = Database::init(&config.database_url).await?;
    let state = AppState::new(&config, db);
    api::serve(state, &config.bind_addr).await
}
