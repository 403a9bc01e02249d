use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use signologos_core::SettingsPatch;

#[derive(Parser, Debug)]
#[command(name = "signologos", version, about = "Headless Signologos gesture translator")]
pub struct Cli {
    /// Configuration file (default: ~/.config/signologos/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the persisted store
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print camera, model, settings and corpus state as JSON
    Status,

    /// Show, change or reset the persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Write the training corpus to an export document
    Export {
        /// Output file (default: signologos-training-data-<date>.json)
        path: Option<PathBuf>,
    },

    /// Append the samples of an export document to the training corpus
    Import { path: PathBuf },

    /// Delete every training sample
    ClearTraining,

    /// Run the camera and model, printing predictions as they arrive
    Session {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<u64>,

        /// Train the model on the stored corpus before detecting
        #[arg(long)]
        train: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    Show,
    Set(SettingsArgs),
    Reset,
}

#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Detection rate, 5 to 30
    #[arg(long)]
    pub detection_fps: Option<u32>,

    /// Minimum prediction confidence, 0.1 to 1.0
    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long)]
    pub show_landmarks: Option<bool>,

    #[arg(long)]
    pub show_fps: Option<bool>,

    #[arg(long)]
    pub data_collection: Option<bool>,

    #[arg(long)]
    pub dark_mode: Option<bool>,
}

impl From<SettingsArgs> for SettingsPatch {
    fn from(args: SettingsArgs) -> Self {
        SettingsPatch {
            show_landmarks: args.show_landmarks,
            show_fps: args.show_fps,
            detection_fps: args.detection_fps,
            model_confidence_threshold: args.threshold,
            enable_data_collection: args.data_collection,
            dark_mode: args.dark_mode,
        }
    }
}
