//! Video frame handle passed through the cadence adapter.
//!
//! Frames are cheap-clone value handles: the pixel payload sits behind an
//! [`Arc`] and is shared between clones. The adapter never inspects pixel
//! data; it only reads and adjusts frame metadata (timestamps and the update
//! region).

use std::sync::Arc;

/// Rectangle describing which pixels changed since the previous frame.
///
/// An empty region (zero width or height) means "no change" and is what
/// repeated frames carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UpdateRegion {
    /// X coordinate of the region (pixels from left).
    pub x: u32,
    /// Y coordinate of the region (pixels from top).
    pub y: u32,
    /// Width of the region in pixels.
    pub width: u32,
    /// Height of the region in pixels.
    pub height: u32,
}

impl UpdateRegion {
    /// Create a new update region.
    #[inline]
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A region covering the entire frame.
    #[inline]
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// The empty region ("no pixels changed").
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if the region covers no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Area of the region in pixels.
    #[inline]
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A video frame entering or leaving the cadence adapter.
#[derive(Clone)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Pixel data, shared between clones.
    pub data: Arc<Vec<u8>>,

    /// Presentation timestamp in microseconds. Zero means unset.
    pub timestamp_us: i64,

    /// NTP capture timestamp in milliseconds. Zero means unset.
    pub ntp_time_ms: i64,

    /// Wire-level RTP timestamp. The adapter never touches this; the
    /// downstream encoder overwrites it from its own timestamp source.
    pub rtp_timestamp: u32,

    /// Which pixels changed since the previous frame.
    pub update_region: UpdateRegion,
}

impl VideoFrame {
    /// Create a frame with the given payload and a full-frame update region.
    ///
    /// Timestamps start unset (zero).
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: Arc::new(data),
            timestamp_us: 0,
            ntp_time_ms: 0,
            rtp_timestamp: 0,
            update_region: UpdateRegion::full(width, height),
        }
    }

    /// Set presentation and NTP timestamps.
    pub fn set_timing(&mut self, timestamp_us: i64, ntp_time_ms: i64) {
        self.timestamp_us = timestamp_us;
        self.ntp_time_ms = ntp_time_ms;
    }

    /// Mark the frame as unchanged relative to its predecessor.
    pub fn mark_unchanged(&mut self) {
        self.update_region = UpdateRegion::empty();
    }

    /// True if the update region reports no changed pixels.
    pub fn is_unchanged(&self) -> bool {
        self.update_region.is_empty()
    }

    /// Payload size in bytes.
    pub fn data_size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data_size", &self.data.len())
            .field("timestamp_us", &self.timestamp_us)
            .field("ntp_time_ms", &self.ntp_time_ms)
            .field("rtp_timestamp", &self.rtp_timestamp)
            .field("update_region", &self.update_region)
            .finish()
    }
}
