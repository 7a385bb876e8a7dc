use std::path::PathBuf;

use clap::Parser;

use crate::config::{AppConfig, DEFAULT_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera index (overrides config)
    #[arg(short, long)]
    pub cam_index: Option<u32>,

    /// Mirror the camera image (overrides config)
    #[arg(long)]
    pub mirror: Option<bool>,

    /// Path of the JSON config file
    #[arg(long, default_value = DEFAULT_PATH)]
    pub config: PathBuf,

    /// Directory holding the dataset CSV and the trained model
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Run without the preview window
    #[arg(long, default_value_t = false)]
    pub headless: bool,

    /// Append the annotated stream to this file as multipart MJPEG
    #[arg(long)]
    pub mjpeg: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// List available cameras
    #[arg(long)]
    pub list: bool,
}

impl Args {
    /// Fold command line overrides into the loaded config.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(index) = self.cam_index {
            config.camera.index = index;
        }
        if let Some(mirror) = self.mirror {
            config.camera.mirror = mirror;
        }
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = dir.clone();
        }
        if self.headless {
            config.ui.show_window = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_only_what_was_given() {
        let args = Args::parse_from(["rusty-expressions", "--cam-index", "3", "--headless", "--mirror", "false"]);
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.camera.index, 3);
        assert!(!config.camera.mirror);
        assert!(!config.ui.show_window);
        assert_eq!(config.storage, AppConfig::default().storage);
        assert_eq!(args.config, PathBuf::from("config.json"));
    }
}
