//! Command-line arguments for tools built on the pipeline.
//!
//! This module is only available when the `cli` feature is enabled.
//! Arguments override values loaded from an optional TOML file.
//!
//! # Examples
//!
//! ```no_run
//! use rfb_client::args::Args;
//! use rfb_client::Config;
//!
//! let args = Args::parse();
//! let config = Config::from_args(&args)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::Config;
use crate::errors::RfbClientError;
use clap::Parser;
use rfb_encodings::Encoding;
use std::path::PathBuf;

/// Decode pipeline options.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// File holding the server-to-client byte stream captured after ServerInit
    #[arg(value_name = "CAPTURE")]
    pub capture: PathBuf,

    /// Framebuffer width from ServerInit
    #[arg(long, default_value_t = 1024)]
    pub width: u16,

    /// Framebuffer height from ServerInit
    #[arg(long, default_value_t = 768)]
    pub height: u16,

    /// Pixel depth: 8 (BGR233 palette) or 32 (true colour)
    #[arg(short = 'd', long, value_name = "BITS")]
    pub depth: Option<u8>,

    /// Preferred encodings (comma-separated)
    ///
    /// Available: raw, copyrect, rre, corre, hextile, zlib, tight, zrle
    #[arg(short = 'e', long, value_name = "ENCODINGS", value_delimiter = ',')]
    pub encodings: Option<Vec<String>>,

    /// Tight JPEG quality level (0-9)
    #[arg(short = 'q', long, value_name = "LEVEL")]
    pub quality: Option<u8>,

    /// Compression level (0-9)
    #[arg(short = 'z', long, value_name = "LEVEL")]
    pub compress_level: Option<u8>,

    /// Skip cursor shape updates
    #[arg(long)]
    pub ignore_cursor: bool,

    /// Cursor scaling in percent
    #[arg(long, value_name = "PERCENT")]
    pub cursor_scale: Option<u32>,

    /// Repaint scaling factor in percent
    #[arg(long, value_name = "PERCENT")]
    pub scale: Option<u32>,

    /// Configuration file path (TOML format)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Parse command-line arguments.
    #[must_use]
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse arguments from an iterator.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are invalid.
    pub fn try_parse_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }
}

impl Config {
    /// Create a configuration from command-line arguments.
    ///
    /// If a config file is specified it is loaded first, then overridden by
    /// explicit arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, an
    /// encoding name is unknown, or validation fails.
    pub fn from_args(args: &Args) -> Result<Self, RfbClientError> {
        let mut config = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    RfbClientError::Config(format!(
                        "Failed to read config file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                Config::from_toml_str(&text)?
            }
            None => Config::default(),
        };

        if let Some(depth) = args.depth {
            config.display.pixel_depth = depth;
        }
        if let Some(scale) = args.scale {
            config.display.scaling_factor = scale;
        }
        if let Some(names) = &args.encodings {
            config.encodings.preferred = parse_encodings(names)?;
        }
        if args.quality.is_some() {
            config.encodings.jpeg_quality = args.quality;
        }
        if args.compress_level.is_some() {
            config.encodings.compress_level = args.compress_level;
        }
        if args.ignore_cursor {
            config.cursor.ignore_updates = true;
        }
        if let Some(percent) = args.cursor_scale {
            config.cursor.scale_percent = percent;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parse encoding names to encoding IDs.
fn parse_encodings(names: &[String]) -> Result<Vec<i32>, RfbClientError> {
    const ALL: [Encoding; 8] = [
        Encoding::Raw,
        Encoding::CopyRect,
        Encoding::Rre,
        Encoding::CoRre,
        Encoding::Hextile,
        Encoding::Zlib,
        Encoding::Tight,
        Encoding::Zrle,
    ];

    names
        .iter()
        .map(|name| {
            let wanted = name.trim().replace('-', "");
            ALL.iter()
                .find(|enc| enc.name().eq_ignore_ascii_case(&wanted))
                .map(|enc| enc.id())
                .ok_or_else(|| RfbClientError::Config(format!("Unknown encoding: {}", name)))
        })
        .collect()
}
