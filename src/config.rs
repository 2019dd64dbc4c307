use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::dataset::Subset;
use crate::model::{ModelOptions, DEFAULT_MODEL_PATH};
use crate::server::{Flavor, ServerOptions, DEFAULT_CORS_ORIGINS};
use crate::training::TrainerConfig;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Serve predictions over HTTP
    Serve(ServeConfig),
    /// Check image/mask pairing and sizes of a dataset split
    Validate(ValidateConfig),
    /// Train from ONNX Runtime training artifacts
    Train(TrainConfig),
}

#[derive(Args, Clone, Debug)]
pub struct ServeConfig {
    #[arg(long, env = "LANDCOVER_FLAVOR", value_enum, default_value = "api")]
    pub flavor: Flavor,

    #[arg(long, env = "LANDCOVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Defaults to 8000 for `api` and 5000 for `web`
    #[arg(short, long, env = "LANDCOVER_PORT")]
    pub port: Option<u16>,

    #[arg(short, long, env = "LANDCOVER_MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// CUDA device; CPU when omitted
    #[arg(short, long, env = "LANDCOVER_DEVICE_ID")]
    pub device_id: Option<i32>,

    #[arg(long, env = "LANDCOVER_THREADS", value_parser = check_positive)]
    pub threads: Option<usize>,

    #[arg(
        long,
        env = "LANDCOVER_BODY_LIMIT_MB",
        default_value_t = 20,
        value_parser = check_positive
    )]
    pub body_limit_mb: usize,

    #[arg(
        long = "cors-origin",
        env = "LANDCOVER_CORS_ORIGINS",
        value_delimiter = ',',
        default_values_t = DEFAULT_CORS_ORIGINS.map(String::from)
    )]
    pub cors_origins: Vec<String>,
}

impl ServeConfig {
    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            model_path: self.model_path.clone(),
            device_id: self.device_id,
            num_threads: self.threads,
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            flavor: self.flavor,
            host: self.host.clone(),
            port: self.port.unwrap_or_else(|| self.flavor.default_port()),
            body_limit: self.body_limit_mb * 1024 * 1024,
            cors_origins: self.cors_origins.clone(),
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct ValidateConfig {
    #[arg(long, env = "LANDCOVER_DATA_DIR", default_value = "data/bhuvan")]
    pub root: PathBuf,

    /// Relative paths are resolved against `--root`
    #[arg(long, env = "LANDCOVER_CLASS_CSV", default_value = "class_dict_seg.csv")]
    pub class_csv: PathBuf,

    #[arg(long, value_enum, default_value = "train")]
    pub subset: Subset,
}

#[derive(Args, Clone, Debug)]
pub struct TrainConfig {
    #[arg(long, env = "LANDCOVER_DATA_DIR", default_value = "data/bhuvan")]
    pub data_dir: PathBuf,

    #[arg(long, env = "LANDCOVER_CLASS_CSV", default_value = "class_dict_seg.csv")]
    pub class_csv: PathBuf,

    #[arg(long, env = "LANDCOVER_EPOCHS", default_value_t = 50, value_parser = check_positive)]
    pub epochs: usize,

    #[arg(
        short,
        long,
        env = "LANDCOVER_BATCH_SIZE",
        default_value_t = 8,
        value_parser = check_positive
    )]
    pub batch_size: usize,

    #[arg(long, env = "LANDCOVER_LR", default_value_t = 1e-3, value_parser = check_learning_rate)]
    pub lr: f32,

    #[arg(short, long, env = "LANDCOVER_OUTPUT_DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Directory with `checkpoint`, `training_model.onnx`, `eval_model.onnx`
    /// and `optimizer_model.onnx`
    #[arg(long, env = "LANDCOVER_ARTIFACTS_DIR", default_value = "artifacts")]
    pub artifacts_dir: PathBuf,

    #[arg(long, env = "LANDCOVER_SEED", default_value_t = 42)]
    pub seed: u64,

    #[arg(long, env = "LANDCOVER_NO_AUGMENT")]
    pub no_augment: bool,

    #[arg(long)]
    pub quiet: bool,
}

impl TrainConfig {
    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            epochs: self.epochs,
            learning_rate: self.lr,
            output_dir: self.output_dir.clone(),
            show_progress: !self.quiet,
            ..TrainerConfig::default()
        }
    }
}

fn check_positive(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("`{s}` is not a valid number"))?;
    if value == 0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(value)
}

fn check_learning_rate(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("`{s}` is not a valid learning rate"))?;
    if !(value.is_finite() && value > 0.0) {
        return Err(format!("learning rate must be positive, got {value}"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults_follow_flavor() {
        let cli = Cli::try_parse_from(["landcover-seg", "serve", "--flavor", "web"]).unwrap();
        let Command::Serve(config) = cli.command else {
            panic!("expected serve");
        };
        let options = config.server_options();
        assert_eq!(options.port, 5000);
        assert_eq!(options.body_limit, 20 * 1024 * 1024);
        assert_eq!(options.cors_origins, DEFAULT_CORS_ORIGINS.map(String::from).to_vec());
        assert_eq!(config.model_options().model_path, PathBuf::from(DEFAULT_MODEL_PATH));
    }

    #[test]
    fn test_train_arguments() {
        let cli = Cli::try_parse_from([
            "landcover-seg",
            "train",
            "--epochs",
            "3",
            "--lr",
            "0.01",
            "--output-dir",
            "runs/a",
        ])
        .unwrap();
        let Command::Train(config) = cli.command else {
            panic!("expected train");
        };
        let trainer = config.trainer_config();
        assert_eq!(trainer.epochs, 3);
        assert_eq!(trainer.learning_rate, 0.01);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_value_parsers() {
        assert!(check_positive("0").is_err());
        assert_eq!(check_positive("4"), Ok(4));
        assert!(check_learning_rate("-1").is_err());
        assert!(check_learning_rate("abc").is_err());
        assert!(Cli::try_parse_from(["landcover-seg", "validate", "--subset", "test"]).is_err());
    }
}
