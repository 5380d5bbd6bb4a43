// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Port definitions and component parameter structures
//!
//! This module defines the typed parameter traffic a session performs against
//! a component:
//!
//! - [`PortDirection`] - Input or output side of a port
//! - [`VideoFormat`] - Raw and compressed video formats carried on a port
//! - [`PortDefinition`] - Per-port geometry, format, and buffer requirements
//! - [`ParamIndex`] - Index naming a parameter for get/set calls
//! - [`Param`] - Tagged parameter payload exchanged with the component
//!
//! Parameter structures are plain data. The component validates them on
//! `set_parameter` and reports `BadParameter`, `UnsupportedIndex`, or
//! `UnsupportedSetting` rather than adjusting values silently.

use std::fmt;

/// Default number of buffers on an input port
pub const DEFAULT_INPUT_BUFFER_COUNT: usize = 5;

/// Default number of buffers on an output port
pub const DEFAULT_OUTPUT_BUFFER_COUNT: usize = 3;

/// Default frame width
pub const DEFAULT_WIDTH: u32 = 640;

/// Default frame height
pub const DEFAULT_HEIGHT: u32 = 480;

/// Default frame rate in frames per second
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Direction of a component port
///
/// Every port moves buffers one way: the client fills input ports and the
/// component fills output ports. A camera-style component has output ports
/// only; an encoder has one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PortDirection {
    /// Client-filled port, consumed by the component
    Input = 0,

    /// Component-filled port, drained by the client
    Output = 1,
}

impl PortDirection {
    /// Convert from the raw wire value (0 = input, 1 = output)
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PortDirection::Input),
            1 => Some(PortDirection::Output),
            _ => None,
        }
    }

    /// Get human-readable name for this direction
    pub fn name(&self) -> &'static str {
        match self {
            PortDirection::Input => "Input",
            PortDirection::Output => "Output",
        }
    }
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Video format carried on a port
///
/// Raw formats describe uncompressed pixel layouts; compressed formats name
/// the bitstream a codec port produces or consumes. Components reject
/// formats they do not implement with `UnsupportedSetting`.
///
/// | Format | Kind | Bytes per pixel |
/// |--------|------|-----------------|
/// | [`VideoFormat::Yuv420Planar`] | Raw | 1.5 |
/// | [`VideoFormat::Yuv420SemiPlanar`] | Raw | 1.5 |
/// | [`VideoFormat::Yuyv`] | Raw | 2 |
/// | [`VideoFormat::Rgb565`] | Raw | 2 |
/// | [`VideoFormat::Avc`] | Compressed | n/a |
/// | [`VideoFormat::Hevc`] | Compressed | n/a |
/// | [`VideoFormat::Mjpeg`] | Compressed | n/a |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum VideoFormat {
    /// Planar YUV 4:2:0 (I420)
    Yuv420Planar = 0,

    /// Semi-planar YUV 4:2:0 (NV12), the common hardware-codec layout
    Yuv420SemiPlanar = 1,

    /// Packed YUV 4:2:2
    Yuyv = 2,

    /// Packed RGB 5:6:5
    Rgb565 = 3,

    /// H.264 / AVC bitstream
    Avc = 16,

    /// H.265 / HEVC bitstream
    Hevc = 17,

    /// Motion JPEG bitstream
    Mjpeg = 18,
}

impl VideoFormat {
    /// Convert from the raw wire value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(VideoFormat::Yuv420Planar),
            1 => Some(VideoFormat::Yuv420SemiPlanar),
            2 => Some(VideoFormat::Yuyv),
            3 => Some(VideoFormat::Rgb565),
            16 => Some(VideoFormat::Avc),
            17 => Some(VideoFormat::Hevc),
            18 => Some(VideoFormat::Mjpeg),
            _ => None,
        }
    }

    /// Get human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            VideoFormat::Yuv420Planar => "YUV420P",
            VideoFormat::Yuv420SemiPlanar => "NV12",
            VideoFormat::Yuyv => "YUYV",
            VideoFormat::Rgb565 => "RGB565",
            VideoFormat::Avc => "H264",
            VideoFormat::Hevc => "HEVC",
            VideoFormat::Mjpeg => "MJPG",
        }
    }

    /// True for compressed bitstream formats
    pub fn is_compressed(&self) -> bool {
        matches!(
            self,
            VideoFormat::Avc | VideoFormat::Hevc | VideoFormat::Mjpeg
        )
    }

    /// Buffer size in bytes for one frame of this format at the given
    /// geometry
    ///
    /// Raw formats use their exact pixel arithmetic. Compressed formats use
    /// one uncompressed luma plane as a conservative worst case, matching
    /// the sizing the reference encoder clients applied to their bitstream
    /// buffers.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            VideoFormat::Yuv420Planar | VideoFormat::Yuv420SemiPlanar => pixels * 3 / 2,
            VideoFormat::Yuyv | VideoFormat::Rgb565 => pixels * 2,
            VideoFormat::Avc | VideoFormat::Hevc | VideoFormat::Mjpeg => pixels,
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete definition of one component port
///
/// Carries everything the session needs to populate the port: direction,
/// frame geometry, format, and the buffer count the component requires
/// before it will confirm the Idle state. Obtained with
/// `get_parameter(ParamIndex::PortDefinition(port))` and adjusted with
/// `set_parameter` while the component is still Loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDefinition {
    /// Port index, unique per component
    pub port: u32,

    /// Which way buffers move through this port
    pub direction: PortDirection,

    /// Disabled ports take no buffers and confirm no transitions
    pub enabled: bool,

    /// Number of buffers the port requires to become populated
    pub buffer_count: usize,

    /// Capacity in bytes of each buffer on this port
    pub buffer_size: usize,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Line stride in bytes
    pub stride: u32,

    /// Video format carried on this port
    pub format: VideoFormat,

    /// Nominal frame rate in frames per second
    pub frame_rate: u32,
}

impl PortDefinition {
    /// Default input port definition: raw NV12 frames at 640x480
    pub fn input(port: u32) -> Self {
        let format = VideoFormat::Yuv420SemiPlanar;
        PortDefinition {
            port,
            direction: PortDirection::Input,
            enabled: true,
            buffer_count: DEFAULT_INPUT_BUFFER_COUNT,
            buffer_size: format.frame_size(DEFAULT_WIDTH, DEFAULT_HEIGHT),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            stride: DEFAULT_WIDTH,
            format,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    /// Default output port definition: H.264 bitstream at 640x480
    pub fn output(port: u32) -> Self {
        let format = VideoFormat::Avc;
        PortDefinition {
            port,
            direction: PortDirection::Output,
            enabled: true,
            buffer_count: DEFAULT_OUTPUT_BUFFER_COUNT,
            buffer_size: format.frame_size(DEFAULT_WIDTH, DEFAULT_HEIGHT),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            stride: DEFAULT_WIDTH,
            format,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    /// Rescale the port to a new geometry, recomputing stride and buffer
    /// size from the format
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self.stride = width;
        self.buffer_size = self.format.frame_size(width, height);
        self
    }

    /// Change the port format, recomputing the buffer size
    pub fn with_format(mut self, format: VideoFormat) -> Self {
        self.format = format;
        self.buffer_size = format.frame_size(self.width, self.height);
        self
    }

    /// Change the buffer count the port requires
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }
}

impl fmt::Display for PortDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "port {} {} {}x{} {} x{} ({} bytes)",
            self.port,
            self.direction,
            self.width,
            self.height,
            self.format,
            self.buffer_count,
            self.buffer_size
        )
    }
}

/// Port census of a component
///
/// The first call a session makes: how many ports exist and where their
/// indices start. Port indices then run contiguously from `start_port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortCountParam {
    /// Number of ports on the component
    pub ports: u32,

    /// Index of the first port
    pub start_port: u32,
}

/// Index naming a parameter for `get_parameter`/`set_parameter`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamIndex {
    /// Port census, see [`PortCountParam`]
    PortCount,

    /// Per-port definition, see [`PortDefinition`]
    PortDefinition(u32),

    /// Target bitrate, see [`BitrateParam`]
    Bitrate,

    /// Frame rate control, see [`FramerateParam`]
    Framerate,

    /// Codec profile and level, see [`ProfileLevelParam`]
    ProfileLevel,
}

impl fmt::Display for ParamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamIndex::PortCount => write!(f, "PortCount"),
            ParamIndex::PortDefinition(port) => write!(f, "PortDefinition({})", port),
            ParamIndex::Bitrate => write!(f, "Bitrate"),
            ParamIndex::Framerate => write!(f, "Framerate"),
            ParamIndex::ProfileLevel => write!(f, "ProfileLevel"),
        }
    }
}

/// Target bitrate for a compressed output port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateParam {
    /// Port the bitrate applies to
    pub port: u32,

    /// Target bitrate in bits per second
    pub target_bps: u32,

    /// Variable (true) or constant (false) rate control
    pub variable: bool,
}

/// Frame rate control parameter
///
/// The rate rides the wire in Q16 fixed point, the convention the component
/// ABI uses for fractional rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerateParam {
    /// Port the rate applies to
    pub port: u32,

    /// Frames per second in Q16 fixed point
    pub fps_q16: u32,
}

impl FramerateParam {
    /// Build from a whole frames-per-second value
    pub fn from_fps(port: u32, fps: u32) -> Self {
        FramerateParam {
            port,
            fps_q16: fps << 16,
        }
    }

    /// Whole frames-per-second value, truncating the fraction
    pub fn fps(&self) -> u32 {
        self.fps_q16 >> 16
    }
}

/// Codec profile and level selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileLevelParam {
    /// Port the profile applies to
    pub port: u32,

    /// Codec-specific profile identifier
    pub profile: u32,

    /// Codec-specific level identifier
    pub level: u32,
}

/// Tagged parameter payload for `get_parameter`/`set_parameter`
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Port census
    PortCount(PortCountParam),

    /// Per-port definition
    PortDefinition(PortDefinition),

    /// Target bitrate
    Bitrate(BitrateParam),

    /// Frame rate control
    Framerate(FramerateParam),

    /// Codec profile and level
    ProfileLevel(ProfileLevelParam),
}

impl Param {
    /// The index this payload answers to
    pub fn index(&self) -> ParamIndex {
        match self {
            Param::PortCount(_) => ParamIndex::PortCount,
            Param::PortDefinition(def) => ParamIndex::PortDefinition(def.port),
            Param::Bitrate(_) => ParamIndex::Bitrate,
            Param::Framerate(_) => ParamIndex::Framerate,
            Param::ProfileLevel(_) => ParamIndex::ProfileLevel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_direction_from_raw() {
        assert_eq!(PortDirection::from_raw(0), Some(PortDirection::Input));
        assert_eq!(PortDirection::from_raw(1), Some(PortDirection::Output));
        assert_eq!(PortDirection::from_raw(2), None);
    }

    #[test]
    fn test_video_format_round_trip() {
        for format in [
            VideoFormat::Yuv420Planar,
            VideoFormat::Yuv420SemiPlanar,
            VideoFormat::Yuyv,
            VideoFormat::Rgb565,
            VideoFormat::Avc,
            VideoFormat::Hevc,
            VideoFormat::Mjpeg,
        ] {
            assert_eq!(VideoFormat::from_raw(format as u32), Some(format));
        }
        assert_eq!(VideoFormat::from_raw(99), None);
    }

    #[test]
    fn test_video_format_frame_size() {
        assert_eq!(
            VideoFormat::Yuv420SemiPlanar.frame_size(640, 480),
            640 * 480 * 3 / 2
        );
        assert_eq!(VideoFormat::Yuyv.frame_size(640, 480), 640 * 480 * 2);
        assert_eq!(VideoFormat::Avc.frame_size(640, 480), 640 * 480);
    }

    #[test]
    fn test_default_port_definitions() {
        let input = PortDefinition::input(0);
        assert_eq!(input.direction, PortDirection::Input);
        assert_eq!(input.buffer_count, DEFAULT_INPUT_BUFFER_COUNT);
        assert!(input.enabled);

        let output = PortDefinition::output(1);
        assert_eq!(output.direction, PortDirection::Output);
        assert_eq!(output.buffer_count, DEFAULT_OUTPUT_BUFFER_COUNT);
        assert_eq!(output.format, VideoFormat::Avc);
    }

    #[test]
    fn test_port_definition_with_resolution() {
        let def = PortDefinition::input(0).with_resolution(1920, 1080);
        assert_eq!(def.width, 1920);
        assert_eq!(def.height, 1080);
        assert_eq!(def.buffer_size, 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn test_framerate_q16() {
        let rate = FramerateParam::from_fps(1, 30);
        assert_eq!(rate.fps_q16, 30 << 16);
        assert_eq!(rate.fps(), 30);
    }

    #[test]
    fn test_param_index_matches_payload() {
        let param = Param::PortDefinition(PortDefinition::output(1));
        assert_eq!(param.index(), ParamIndex::PortDefinition(1));

        let param = Param::Bitrate(BitrateParam {
            port: 1,
            target_bps: 4_000_000,
            variable: true,
        });
        assert_eq!(param.index(), ParamIndex::Bitrate);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(VideoFormat::Avc.to_string(), "H264");
        assert_eq!(PortDirection::Output.to_string(), "Output");
        let text = PortDefinition::output(1).to_string();
        assert!(text.contains("port 1"));
        assert!(text.contains("H264"));
    }
}
