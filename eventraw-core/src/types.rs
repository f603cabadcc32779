//! Core types shared by every decoder.
//!
//! This module defines the canonical event structures produced by the
//! decoders and the sensor geometry they are validated against.

/// A decoded polarity (DVS) event.
///
/// Polarity events represent brightness changes detected by the sensor.
/// Coordinates are already flipped so that row 0 is the top of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PolarityEvent {
    /// Timestamp in microseconds
    pub t: u64,
    /// X coordinate of the pixel
    pub x: u16,
    /// Y coordinate of the pixel
    pub y: u16,
    /// `true` for an increase in brightness
    pub polarity: bool,
}

impl PolarityEvent {
    /// Creates a new polarity event.
    #[inline]
    pub fn new(t: u64, x: u16, y: u16, polarity: bool) -> Self {
        Self { t, x, y, polarity }
    }

    /// Reinterprets this event as an exposure event of the given channel.
    #[inline]
    pub fn into_exposure(self, channel: Channel) -> ExposureEvent {
        ExposureEvent {
            t: self.t,
            x: self.x,
            y: self.y,
            is_second_threshold_crossing: channel.is_second_threshold_crossing(),
            polarity: self.polarity,
        }
    }
}

/// A decoded exposure (ATIS) event.
///
/// With `is_second_threshold_crossing == false` the event is a change
/// detection sample. With `true` it marks the end of a per-pixel exposure
/// measurement, and `polarity` tells which of the two thresholds fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ExposureEvent {
    /// Timestamp in microseconds
    pub t: u64,
    /// X coordinate of the pixel
    pub x: u16,
    /// Y coordinate of the pixel
    pub y: u16,
    /// `true` for an exposure measurement, `false` for a change detection
    pub is_second_threshold_crossing: bool,
    /// Polarity (change detection) or threshold index (exposure)
    pub polarity: bool,
}

/// The two channels recorded side by side by legacy ATIS cameras.
///
/// Both channels share the legacy record layout; only the meaning of the
/// events differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Temporal difference (change detection) channel, usually `*_td.dat`
    ChangeDetection,
    /// Exposure measurement channel, usually `*_aps.dat`
    Exposure,
}

impl Channel {
    /// The `is_second_threshold_crossing` flag carried by events of this channel.
    #[inline]
    pub fn is_second_threshold_crossing(self) -> bool {
        matches!(self, Self::Exposure)
    }
}

/// Sensor dimensions used to validate decoded coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorGeometry {
    /// Sensor width in pixels
    pub width: u16,
    /// Sensor height in pixels
    pub height: u16,
}

impl SensorGeometry {
    /// ATIS geometry assumed by legacy DAT recordings.
    pub const DAT_DEFAULT: Self = Self::new(304, 240);
    /// Gen3 geometry, the usual EVT 2.0 sensor.
    pub const EVT2_DEFAULT: Self = Self::new(640, 480);
    /// Gen4 geometry, the usual EVT 3.0 sensor.
    pub const EVT3_DEFAULT: Self = Self::new(1280, 720);

    /// Creates a geometry from its dimensions.
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Returns `true` if both dimensions are non-zero.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Returns `true` if the pixel lies on the sensor.
    #[inline]
    pub fn contains(&self, x: u16, y: u16) -> bool {
        x < self.width && y < self.height
    }

    /// Maps a sensor row to an output row (row 0 becomes `height - 1`).
    ///
    /// Rows beyond the sensor wrap around to large values, which
    /// [`contains`](Self::contains) then rejects.
    #[inline]
    pub fn flip_y(&self, y: u16) -> u16 {
        self.height.wrapping_sub(1).wrapping_sub(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_y() {
        let geometry = SensorGeometry::new(304, 240);
        assert_eq!(geometry.flip_y(0), 239);
        assert_eq!(geometry.flip_y(239), 0);
        assert!(!geometry.contains(0, geometry.flip_y(240)));
    }

    #[test]
    fn test_into_exposure() {
        let event = PolarityEvent::new(42, 3, 4, true);
        let aps = event.into_exposure(Channel::Exposure);
        assert!(aps.is_second_threshold_crossing);
        assert!(aps.polarity);
        assert_eq!((aps.t, aps.x, aps.y), (42, 3, 4));
        assert!(!event.into_exposure(Channel::ChangeDetection).is_second_threshold_crossing);
    }

    #[test]
    fn test_geometry_validity() {
        assert!(SensorGeometry::EVT3_DEFAULT.is_valid());
        assert!(!SensorGeometry::new(0, 720).is_valid());
    }
}
