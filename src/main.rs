use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use landcover_seg::{
    config::{Cli, Command, ServeConfig, TrainConfig, ValidateConfig},
    dataset::{ensure_palette_colors, validate_subset},
    palette::ClassPalette,
    server,
    service::InferenceService,
};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("landcover_seg=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => serve(config).await,
        Command::Validate(config) => validate(&config),
        Command::Train(config) => {
            tokio::task::spawn_blocking(move || train(&config))
                .await
                .context("training task panicked")?
        }
    }
}

async fn serve(config: ServeConfig) -> Result<()> {
    let model_options = config.model_options();
    let service = tokio::task::spawn_blocking(move || {
        InferenceService::load(&model_options, ClassPalette::default())
    })
    .await
    .context("model loading task panicked")?;

    server::serve(service, config.server_options()).await
}

fn validate(config: &ValidateConfig) -> Result<()> {
    let summary = validate_subset(&config.root, &config.class_csv, config.subset)
        .with_context(|| format!("validation of {} failed", config.root.display()))?;
    ensure_palette_colors(&summary.palette, &ClassPalette::default())
        .context("class map does not describe the model classes")?;
    info!(
        subset = %summary.subset,
        pairs = summary.pairs,
        missing_masks = summary.missing_masks,
        missing_images = summary.missing_images,
        classes = ?summary.palette.names(),
        "dataset looks consistent"
    );
    Ok(())
}

#[cfg(feature = "training")]
fn train(config: &TrainConfig) -> Result<()> {
    use landcover_seg::dataset::{open_training_splits, Augmentation, DataLoader};
    use landcover_seg::training::{OrtTrainer, Trainer};
    use landcover_seg::MODEL_IMAGE_SIZE;

    let augmentation = (!config.no_augment).then(Augmentation::default);
    let (train_set, val_set) = open_training_splits(
        &config.data_dir,
        &config.class_csv,
        MODEL_IMAGE_SIZE,
        augmentation,
    )
    .context("dataset is not usable for training")?;
    let palette = train_set.palette().clone();

    let mut train_loader = DataLoader::new(train_set, config.batch_size, true, config.seed);
    let mut val_loader = DataLoader::new(val_set, config.batch_size, false, config.seed);

    let backend = OrtTrainer::from_artifacts(&config.artifacts_dir).with_context(|| {
        format!(
            "failed to load training artifacts from {}",
            config.artifacts_dir.display()
        )
    })?;
    let mut trainer = Trainer::new(backend, palette, config.trainer_config());
    let history = trainer.fit(&mut train_loader, &mut val_loader)?;

    info!(
        epochs = history.epochs(),
        best_val_loss = ?history.best_val_loss,
        "best model written to {}",
        trainer.best_model_path().display()
    );
    Ok(())
}

#[cfg(not(feature = "training"))]
fn train(config: &TrainConfig) -> Result<()> {
    anyhow::bail!(
        "training from {} needs the `training` feature (cargo build --features training)",
        config.artifacts_dir.display()
    )
}
