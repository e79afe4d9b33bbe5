//! Coding standard and context identifiers.

use crate::HalError;
use serde::{Deserialize, Serialize};

/// Video compression formats, with their stable wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum CodingType {
    /// MPEG-2 video.
    Mpeg2 = 2,
    /// H.263.
    H263 = 3,
    /// MPEG-4 part 2.
    Mpeg4 = 4,
    /// H.264 / AVC.
    Avc = 7,
    /// Motion JPEG.
    Mjpeg = 8,
    /// VP8.
    Vp8 = 9,
    /// VP9.
    Vp9 = 10,
    /// H.265 / HEVC.
    Hevc = 0x0100_0004,
    /// AV1.
    Av1 = 0x0100_0008,
}

impl CodingType {
    const ALL: [Self; 9] = [
        Self::Mpeg2,
        Self::H263,
        Self::Mpeg4,
        Self::Avc,
        Self::Mjpeg,
        Self::Vp8,
        Self::Vp9,
        Self::Hevc,
        Self::Av1,
    ];

    /// Wire value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for CodingType {
    type Error = HalError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|c| c.raw() == raw)
            .ok_or_else(|| HalError::InvalidArgument(format!("unknown coding type {raw:#x}")))
    }
}

/// Class of a top-level context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtxType {
    /// Decoder.
    #[default]
    Dec,
    /// Encoder.
    Enc,
    /// Image signal processing.
    Isp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_convert_back() {
        assert_eq!(CodingType::try_from(7), Ok(CodingType::Avc));
        assert_eq!(CodingType::try_from(0x0100_0004), Ok(CodingType::Hevc));
        assert!(matches!(
            CodingType::try_from(0xffff),
            Err(HalError::InvalidArgument(_))
        ));
    }
}
