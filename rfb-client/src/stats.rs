//! Decode statistics (client-side).
//!
//! Counts what the pipeline decoded and how many wire bytes it took, so that
//! end-of-run logs show the effective compression ratio per session.
//! An optional window excludes a warm-up period and logs a summary after a
//! fixed number of measured updates.

use rfb_encodings::{Decoded, Encoding};

/// Rectangles decoded per encoding. Tight JPEG rectangles are counted both
/// under `tight` and `tight_jpeg`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EncodingCounts {
    pub raw: u64,
    pub copy_rect: u64,
    pub rre: u64,
    pub corre: u64,
    pub hextile: u64,
    pub zlib: u64,
    pub tight: u64,
    pub tight_jpeg: u64,
    pub zrle: u64,
}

impl EncodingCounts {
    fn bump(&mut self, encoding: Encoding, decoded: Decoded) {
        let slot = match encoding {
            Encoding::Raw => &mut self.raw,
            Encoding::CopyRect => &mut self.copy_rect,
            Encoding::Rre => &mut self.rre,
            Encoding::CoRre => &mut self.corre,
            Encoding::Hextile => &mut self.hextile,
            Encoding::Zlib => &mut self.zlib,
            Encoding::Tight => &mut self.tight,
            Encoding::Zrle => &mut self.zrle,
        };
        *slot = slot.saturating_add(1);
        if decoded == Decoded::TightJpeg {
            self.tight_jpeg = self.tight_jpeg.saturating_add(1);
        }
    }
}

/// Aggregate statistics for one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    /// Completed FramebufferUpdate messages.
    pub updates: u64,
    /// Rectangle headers read, pseudo-rectangles included.
    pub rects: u64,
    /// Rectangles that carried pixels.
    pub pixel_rects: u64,
    pub encodings: EncodingCounts,
    /// Stream bytes consumed by pixel payloads.
    pub bytes_encoded: u64,
    /// Framebuffer bytes those payloads produced (`w * h * bpp`).
    pub bytes_decoded: u64,
}

impl DecodeStats {
    pub fn record_rect(&mut self) {
        self.rects = self.rects.saturating_add(1);
    }

    pub fn record_pixels(
        &mut self,
        encoding: Encoding,
        decoded: Decoded,
        pixel_bytes: u64,
        wire_bytes: u64,
    ) {
        self.pixel_rects = self.pixel_rects.saturating_add(1);
        self.encodings.bump(encoding, decoded);
        self.bytes_decoded = self.bytes_decoded.saturating_add(pixel_bytes);
        self.bytes_encoded = self.bytes_encoded.saturating_add(wire_bytes);
    }

    /// Decoded bytes per wire byte; 0.0 before anything was decoded.
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_encoded == 0 {
            0.0
        } else {
            self.bytes_decoded as f64 / self.bytes_encoded as f64
        }
    }

    pub fn format_summary(&self) -> String {
        let e = &self.encodings;
        format!(
            "{} updates, {} rects ({} pixel), {} encoded -> {} decoded (ratio {:.1}); \
             Raw={} CopyRect={} RRE={} CoRRE={} Hextile={} Zlib={} Tight={} (JPEG={}) ZRLE={}",
            self.updates,
            self.rects,
            self.pixel_rects,
            human_bytes(self.bytes_encoded),
            human_bytes(self.bytes_decoded),
            self.compression_ratio(),
            e.raw,
            e.copy_rect,
            e.rre,
            e.corre,
            e.hextile,
            e.zlib,
            e.tight,
            e.tight_jpeg,
            e.zrle,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Excluding,
    Measuring { since: u64 },
    Done,
}

/// Warm-up exclusion and measurement window over completed updates.
#[derive(Debug, Clone)]
pub struct StatsWindow {
    exclude: u64,
    measure: u64,
    completed: u64,
    phase: Phase,
}

impl StatsWindow {
    /// `exclude == 0` measures from the first update; `measure == 0` never
    /// logs a summary.
    pub fn new(exclude: u64, measure: u64) -> Self {
        let phase = if exclude == 0 {
            Phase::Measuring { since: 0 }
        } else {
            Phase::Excluding
        };
        Self {
            exclude,
            measure,
            completed: 0,
            phase,
        }
    }

    /// Account for one completed update. Returns the summary when the
    /// measurement window closes.
    pub fn end_update(&mut self, stats: &mut DecodeStats) -> Option<String> {
        self.completed += 1;
        stats.updates = stats.updates.saturating_add(1);
        match self.phase {
            Phase::Excluding => {
                if self.completed >= self.exclude {
                    tracing::debug!("Excluded first {} updates from stats", self.completed);
                    *stats = DecodeStats::default();
                    self.phase = Phase::Measuring {
                        since: self.completed,
                    };
                }
                None
            }
            Phase::Measuring { since } => {
                if self.measure > 0 && self.completed - since >= self.measure {
                    self.phase = Phase::Done;
                    let summary = stats.format_summary();
                    tracing::info!("Decode stats: {}", summary);
                    Some(summary)
                } else {
                    None
                }
            }
            Phase::Done => None,
        }
    }
}

fn human_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GIB {
        format!("{:.3} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.3} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.3} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}
