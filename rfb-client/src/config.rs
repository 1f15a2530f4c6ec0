//! Configuration types for the update pipeline.
//!
//! A [`Config`] can be built in code through [`ConfigBuilder`] or loaded from
//! TOML. Every section has defaults, so an empty document is valid:
//!
//! ```
//! use rfb_client::Config;
//!
//! let config = Config::from_toml_str(
//!     r#"
//!     [display]
//!     pixel_depth = 8
//!
//!     [encodings]
//!     jpeg_quality = 6
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.display.pixel_depth, 8);
//! ```

use crate::errors::RfbClientError;
use rfb_encodings::{DecoderSettings, PixelFormat};
use rfb_protocol::messages::types::{
    ENCODING_COPYRECT, ENCODING_CORRE, ENCODING_HEXTILE, ENCODING_RAW, ENCODING_RRE,
    ENCODING_TIGHT, ENCODING_ZLIB, ENCODING_ZRLE, PSEUDO_ENCODING_COMPRESS_LEVEL_0,
    PSEUDO_ENCODING_LAST_RECT, PSEUDO_ENCODING_NEW_FB_SIZE, PSEUDO_ENCODING_POINTER_POS,
    PSEUDO_ENCODING_QUALITY_LEVEL_0, PSEUDO_ENCODING_RICH_CURSOR, PSEUDO_ENCODING_XCURSOR,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pixel format and presentation scaling.
    pub display: DisplayConfig,
    /// Encoding preferences advertised to the server.
    pub encodings: EncodingsConfig,
    /// Cursor shape handling.
    pub cursor: CursorConfig,
    /// Decoder limits.
    pub decode: DecodeConfig,
    /// Update request pacing.
    pub updates: UpdatesConfig,
    /// Decode statistics window.
    pub stats: StatsConfig,
}

/// Display configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Bits per pixel requested from the server: 8 (BGR233) or 32.
    pub pixel_depth: u8,
    /// Repaint scaling in percent.
    pub scaling_factor: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            pixel_depth: 32,
            scaling_factor: 100,
        }
    }
}

/// Encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingsConfig {
    /// Preferred encodings in priority order.
    pub preferred: Vec<i32>,
    /// JPEG quality (0-9) for Tight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg_quality: Option<u8>,
    /// Compression level (0-9).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress_level: Option<u8>,
}

impl Default for EncodingsConfig {
    fn default() -> Self {
        Self {
            preferred: default_encodings(),
            jpeg_quality: None,
            compress_level: None,
        }
    }
}

fn default_encodings() -> Vec<i32> {
    vec![
        ENCODING_TIGHT,
        ENCODING_ZRLE,
        ENCODING_HEXTILE,
        ENCODING_ZLIB,
        ENCODING_CORRE,
        ENCODING_RRE,
        ENCODING_COPYRECT,
        ENCODING_RAW,
    ]
}

/// Cursor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    /// Skip cursor shape payloads instead of decoding them.
    pub ignore_updates: bool,
    /// Cursor scaling in percent.
    pub scale_percent: u32,
    /// Ask the server for cursor shapes and pointer positions.
    pub request_shape_updates: bool,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            ignore_updates: false,
            scale_percent: 100,
            request_shape_updates: true,
        }
    }
}

/// Decoder limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// How long a Tight JPEG rectangle may take to decode.
    pub jpeg_timeout_ms: u64,
    /// Largest accepted ZRLE payload in bytes.
    pub max_zrle_length: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            jpeg_timeout_ms: 3000,
            max_zrle_length: rfb_encodings::state::DEFAULT_MAX_ZRLE_LENGTH,
        }
    }
}

/// Update request pacing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatesConfig {
    /// Delay before each incremental request, in milliseconds.
    pub defer_ms: u64,
}

/// Statistics window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Updates to ignore before counting starts (0 = count from the start).
    pub exclude_updates: u64,
    /// Updates to measure before logging a summary (0 = never).
    pub measure_updates: u64,
}

impl Config {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, RfbClientError> {
        let config: Config =
            toml::from_str(s).map_err(|e| RfbClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), RfbClientError> {
        if !matches!(self.display.pixel_depth, 8 | 32) {
            return Err(RfbClientError::Config(format!(
                "Pixel depth must be 8 or 32, got {}",
                self.display.pixel_depth
            )));
        }

        if !(1..=1000).contains(&self.display.scaling_factor) {
            return Err(RfbClientError::Config(format!(
                "Scaling factor must be between 1 and 1000, got {}",
                self.display.scaling_factor
            )));
        }

        if self.encodings.preferred.is_empty() {
            return Err(RfbClientError::Config(
                "At least one encoding must be specified".to_string(),
            ));
        }

        if let Some(unknown) = self
            .encodings
            .preferred
            .iter()
            .find(|&&id| rfb_encodings::Encoding::from_id(id).is_none())
        {
            return Err(RfbClientError::Config(format!(
                "Encoding {} cannot be decoded",
                unknown
            )));
        }

        for (name, level) in [
            ("JPEG quality", self.encodings.jpeg_quality),
            ("Compression level", self.encodings.compress_level),
        ] {
            if let Some(level) = level.filter(|&l| l > 9) {
                return Err(RfbClientError::Config(format!(
                    "{} must be between 0 and 9, got {}",
                    name, level
                )));
            }
        }

        if !(1..=1000).contains(&self.cursor.scale_percent) {
            return Err(RfbClientError::Config(format!(
                "Cursor scale must be between 1 and 1000, got {}",
                self.cursor.scale_percent
            )));
        }

        if self.decode.jpeg_timeout_ms == 0 {
            return Err(RfbClientError::Config(
                "JPEG timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Pixel format sent in `SetPixelFormat` for the configured depth.
    pub fn pixel_format(&self) -> Result<PixelFormat, RfbClientError> {
        PixelFormat::for_depth(self.display.pixel_depth)
            .map_err(|e| RfbClientError::Config(e.to_string()))
    }

    /// The full `SetEncodings` list: preferred encodings followed by the
    /// pseudo-encodings this pipeline understands.
    #[must_use]
    pub fn effective_encodings(&self) -> Vec<i32> {
        let mut encodings = self.encodings.preferred.clone();

        if let Some(level) = self.encodings.compress_level {
            encodings.push(PSEUDO_ENCODING_COMPRESS_LEVEL_0 + i32::from(level));
        }
        if let Some(quality) = self.encodings.jpeg_quality {
            encodings.push(PSEUDO_ENCODING_QUALITY_LEVEL_0 + i32::from(quality));
        }
        if self.cursor.request_shape_updates {
            encodings.push(PSEUDO_ENCODING_XCURSOR);
            encodings.push(PSEUDO_ENCODING_RICH_CURSOR);
            encodings.push(PSEUDO_ENCODING_POINTER_POS);
        }
        encodings.push(PSEUDO_ENCODING_NEW_FB_SIZE);
        encodings.push(PSEUDO_ENCODING_LAST_RECT);

        encodings
    }

    /// Returns the JPEG decode timeout.
    #[must_use]
    pub fn jpeg_timeout(&self) -> Duration {
        Duration::from_millis(self.decode.jpeg_timeout_ms)
    }

    /// Returns the delay before incremental requests.
    #[must_use]
    pub fn defer(&self) -> Duration {
        Duration::from_millis(self.updates.defer_ms)
    }

    /// Settings handed to the decoders.
    #[must_use]
    pub fn decoder_settings(&self) -> DecoderSettings {
        DecoderSettings {
            jpeg_timeout: self.jpeg_timeout(),
            max_zrle_length: self.decode.max_zrle_length,
            ignore_cursor_updates: self.cursor.ignore_updates,
            cursor_scale_percent: self.cursor.scale_percent,
        }
    }
}

/// Builder for creating a `Config`.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Sets the pixel depth (8 or 32).
    #[must_use]
    pub fn pixel_depth(mut self, depth: u8) -> Self {
        self.config.display.pixel_depth = depth;
        self
    }

    /// Sets the repaint scaling factor in percent.
    #[must_use]
    pub fn scaling_factor(mut self, percent: u32) -> Self {
        self.config.display.scaling_factor = percent;
        self
    }

    /// Sets the preferred encodings in priority order.
    #[must_use]
    pub fn encodings(mut self, encodings: Vec<i32>) -> Self {
        self.config.encodings.preferred = encodings;
        self
    }

    /// Sets the Tight JPEG quality level.
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.encodings.jpeg_quality = Some(quality);
        self
    }

    /// Sets the compression level.
    #[must_use]
    pub fn compress_level(mut self, level: u8) -> Self {
        self.config.encodings.compress_level = Some(level);
        self
    }

    /// Skip cursor shape payloads.
    #[must_use]
    pub fn ignore_cursor_updates(mut self, ignore: bool) -> Self {
        self.config.cursor.ignore_updates = ignore;
        self
    }

    /// Sets the cursor scaling in percent.
    #[must_use]
    pub fn cursor_scale(mut self, percent: u32) -> Self {
        self.config.cursor.scale_percent = percent;
        self
    }

    /// Sets the JPEG decode timeout.
    #[must_use]
    pub fn jpeg_timeout(mut self, timeout: Duration) -> Self {
        self.config.decode.jpeg_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the delay before incremental requests.
    #[must_use]
    pub fn defer(mut self, delay: Duration) -> Self {
        self.config.updates.defer_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the statistics window.
    #[must_use]
    pub fn stats_window(mut self, exclude_updates: u64, measure_updates: u64) -> Self {
        self.config.stats = StatsConfig {
            exclude_updates,
            measure_updates,
        };
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<Config, RfbClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
