pub mod broadcast;
pub mod capture;
pub mod error;
pub mod pipeline;
pub mod target;

use std::path::{Path, PathBuf};

use capture::frame::{ColourSpace, Region};
use serde::{Deserialize, Serialize};

pub use broadcast::{Observable, Observer, Publisher, Relay};
pub use capture::{Frame, VideoSource};
pub use error::{Error, Result};

/// Prefix of environment variables overriding configuration values,
/// e.g. `FRAMECAST__CAPTURE__WIDTH=1280`
pub const ENV_PREFIX: &str = "FRAMECAST";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub target: TargetConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Synthetic moving test pattern
    Pattern,
    /// Video4Linux2 device, needs the `v4l2` feature
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub backend: Backend,
    pub device: String,
    pub colour: ColourSpace,
    pub width: usize,
    pub height: usize,
    pub fps: f64,
    pub views: usize, // 2 for stereo
    pub buffer_count: u32,
    pub sub_frame: Option<Region>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub queue_size: usize,
    pub run_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                backend: Backend::Pattern,
                device: "/dev/video0".into(),
                colour: ColourSpace::Bgra,
                width: 640,
                height: 480,
                fps: 30.0,
                views: 1,
                buffer_count: 4,
                sub_frame: None,
            },
            pipeline: PipelineConfig {
                queue_size: 8,
                run_secs: 5,
            },
            target: TargetConfig { path: None },
        }
    }
}

impl Config {
    /// Layer defaults, the optional TOML file at `path` and `FRAMECAST__*`
    /// environment variables, later sources winning
    pub fn load(path: Option<&Path>) -> color_eyre::Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let config = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
