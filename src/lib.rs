// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-exact codecs for video stream auxiliary metadata.
//!
//! This crate packs and unpacks the structured metadata that travels next to
//! coded video frames: HDR10+ dynamic metadata, mastering display colour
//! volume, content light level, closed captions and user data (all framed as
//! SEI NAL units), plus the per-block ROI quantization map consumed by a
//! hardware encoder's side-channel frame metadata block.

pub mod bitstream;
pub mod hdr10;
pub mod hdr10plus;
pub mod rational;
pub mod roi;
pub mod sei;
pub mod session;
pub mod vui;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// The codec family an SEI message or ROI map is produced for. The family
/// decides the NAL unit header width and the ROI block grid resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CodecFormat {
    H264,
    H265,
}

impl CodecFormat {
    /// Size in bytes of the NAL unit header for this family.
    pub fn nal_header_len(self) -> usize {
        match self {
            CodecFormat::H264 => 1,
            CodecFormat::H265 => 2,
        }
    }

    /// ROI map block unit size in pixels: 16x16 for H.264, 64x64 for H.265.
    pub fn roi_block_unit(self) -> u32 {
        match self {
            CodecFormat::H264 => 16,
            CodecFormat::H265 => 64,
        }
    }
}
