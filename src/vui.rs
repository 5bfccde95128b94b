// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Colour and timing information from the decoder's side-channel VUI block.
//!
//! The decoder reports the stream's VUI colour description in a fixed
//! little-endian metadata block rather than as bitstream syntax. An
//! alternative transfer characteristics SEI, when present in the stream,
//! overrides the VUI transfer characteristic (the usual HLG signalling
//! arrangement).

use byteorder::ByteOrder;
use byteorder::LittleEndian;
use thiserror::Error;

/// Wire size of the decoder's VUI colour block.
pub const VUI_BLOCK_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum VuiError {
    #[error("VUI block too short: got {0} bytes, need {VUI_BLOCK_SIZE}")]
    TooShort(usize),
}

/// Colour description and timing as signalled by the stream's VUI.
/// The colour fields hold the H.273 code points, unvalidated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VuiColorInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub video_full_range: bool,
}

impl VuiColorInfo {
    /// Parses the decoder's fixed little-endian VUI block.
    pub fn parse(data: &[u8]) -> Result<Self, VuiError> {
        if data.len() < VUI_BLOCK_SIZE {
            return Err(VuiError::TooShort(data.len()));
        }
        Ok(Self {
            num_units_in_tick: LittleEndian::read_u32(&data[0..]),
            time_scale: LittleEndian::read_u32(&data[4..]),
            colour_primaries: data[8],
            transfer_characteristics: data[9],
            matrix_coefficients: data[10],
            video_full_range: data[11] != 0,
        })
    }

    /// Overrides the transfer characteristic with the preferred one from an
    /// alternative transfer characteristics SEI payload.
    pub fn apply_alternative_transfer(&mut self, preferred: u8) {
        if preferred != self.transfer_characteristics {
            log::debug!(
                "alternative transfer characteristics {} overrides VUI {}",
                preferred,
                self.transfer_characteristics
            );
            self.transfer_characteristics = preferred;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_vui_block() {
        let block = [
            0x01, 0x00, 0x00, 0x00, // num_units_in_tick = 1
            0x3c, 0x00, 0x00, 0x00, // time_scale = 60
            9,    // BT.2020 primaries
            16,   // PQ
            9,    // BT.2020 non-constant luminance
            0,    // limited range
        ];
        let info = VuiColorInfo::parse(&block).unwrap();
        assert_eq!(
            info,
            VuiColorInfo {
                num_units_in_tick: 1,
                time_scale: 60,
                colour_primaries: 9,
                transfer_characteristics: 16,
                matrix_coefficients: 9,
                video_full_range: false,
            }
        );

        assert!(VuiColorInfo::parse(&block[..11]).is_err());
    }

    #[test]
    fn alternative_transfer_overrides() {
        let mut info = VuiColorInfo {
            transfer_characteristics: 14,
            ..Default::default()
        };
        // HLG preferred over BT.2020 10-bit.
        info.apply_alternative_transfer(18);
        assert_eq!(info.transfer_characteristics, 18);
        info.apply_alternative_transfer(18);
        assert_eq!(info.transfer_characteristics, 18);
    }
}
