//! Bitrate allocation across the encodings of a sender.
//!
//! Limits handed in by callers are in kbps; encoding caps are in bits per
//! second.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use str0m::media::MediaKind;
use tracing::error;

use crate::error::{Result, SessionError};
use crate::model::{BandwidthLimit, TrackEncoding};

const BITS_PER_KBPS: f64 = 1024.0;

pub const DEFAULT_AUDIO_BITRATE: f64 = 50_000.0;
pub const DEFAULT_VIDEO_BITRATE: f64 = 2_500_000.0;

/// Convert a kbps limit to a bitrate cap. Zero means uncapped.
pub fn kbps_to_bps(kbps: u32) -> Option<f64> {
    if kbps > 0 {
        Some(f64::from(kbps) * BITS_PER_KBPS)
    } else {
        None
    }
}

/// Send parameters of one encoding of a sender.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingParameters {
    pub rid: Option<TrackEncoding>,
    pub active: bool,
    pub scale_resolution_down_by: Option<f64>,
    /// Cap in bits per second, `None` when unlimited.
    pub max_bitrate: Option<f64>,
}

impl EncodingParameters {
    /// The only encoding of a non-simulcast sender.
    pub fn single() -> EncodingParameters {
        EncodingParameters {
            rid: None,
            active: true,
            scale_resolution_down_by: None,
            max_bitrate: None,
        }
    }

    pub fn layer(encoding: TrackEncoding, active: bool) -> EncodingParameters {
        EncodingParameters {
            rid: Some(encoding),
            active,
            scale_resolution_down_by: Some(encoding.scale_resolution_down_by()),
            max_bitrate: None,
        }
    }

    fn scale(&self) -> f64 {
        self.scale_resolution_down_by.unwrap_or(1.0)
    }
}

/// Sender encodings for a simulcast track, lowest tier first.
pub fn simulcast_encodings(active: &[TrackEncoding]) -> Vec<EncodingParameters> {
    TrackEncoding::ALL
        .iter()
        .map(|e| EncodingParameters::layer(*e, active.contains(e)))
        .collect()
}

/// Bitrates reported to the server for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackBitrates {
    Single(f64),
    Simulcast(BTreeMap<TrackEncoding, f64>),
}

pub fn default_bitrate(kind: MediaKind) -> f64 {
    match kind {
        MediaKind::Audio => DEFAULT_AUDIO_BITRATE,
        MediaKind::Video => DEFAULT_VIDEO_BITRATE,
    }
}

pub fn default_simulcast_bitrate(encoding: TrackEncoding) -> f64 {
    match encoding {
        TrackEncoding::High => 2_500_000.0,
        TrackEncoding::Medium => 500_000.0,
        TrackEncoding::Low => 150_000.0,
    }
}

/// Apply a track-level limit to its encodings.
pub fn apply_bandwidth_limitation(encodings: &mut [EncodingParameters], limit: &BandwidthLimit) {
    match limit {
        BandwidthLimit::Single(kbps) => split_bandwidth(encodings, f64::from(*kbps) * BITS_PER_KBPS),
        BandwidthLimit::Simulcast(limits) => {
            for encoding in encodings.iter_mut() {
                let Some(rid) = encoding.rid else {
                    continue;
                };
                encoding.max_bitrate = kbps_to_bps(limits.get(&rid).copied().unwrap_or(0));
            }
        }
    }
}

/// Split `total_bps` across encodings proportionally to their pixel count.
///
/// The first encoding is the reference: encoding `i` receives
/// `x · (scale₀ / scaleᵢ)²`, with `x` chosen so the caps sum to `total_bps`.
pub fn split_bandwidth(encodings: &mut [EncodingParameters], total_bps: f64) {
    if total_bps == 0.0 {
        for encoding in encodings.iter_mut() {
            encoding.max_bitrate = None;
        }
        return;
    }

    let Some(first) = encodings.first() else {
        error!("Attempted to limit bandwidth of a track that doesn't have any encodings");
        return;
    };

    let reference = first.scale();
    let weight = |e: &EncodingParameters| (reference / e.scale()).powi(2);
    let parts: f64 = encodings.iter().map(weight).sum();
    let x = total_bps / parts;

    for encoding in encodings.iter_mut() {
        encoding.max_bitrate = Some(x * weight(&*encoding));
    }
}

/// Effective bitrates of a sender, falling back to defaults where uncapped.
///
/// `encodings` is `None` for a muted track with no sender parameters.
pub fn track_bitrates(kind: MediaKind, encodings: Option<&[EncodingParameters]>) -> Result<TrackBitrates> {
    let Some(encodings) = encodings.filter(|e| !e.is_empty()) else {
        return Ok(TrackBitrates::Single(default_bitrate(kind)));
    };

    if let [only] = encodings {
        if only.rid.is_none() {
            return Ok(TrackBitrates::Single(only.max_bitrate.unwrap_or_else(|| default_bitrate(kind))));
        }
    }

    if kind == MediaKind::Audio {
        return Err(SessionError::AudioWithEncodings);
    }

    let bitrates = encodings
        .iter()
        .filter_map(|e| {
            let rid = e.rid?;
            Some((rid, e.max_bitrate.unwrap_or_else(|| default_simulcast_bitrate(rid))))
        })
        .collect();

    Ok(TrackBitrates::Simulcast(bitrates))
}
