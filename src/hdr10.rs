// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Static HDR metadata: mastering display colour volume and content light
//! level.
//!
//! Both messages have fixed big-endian wire layouts. Chromaticity values
//! carry an implicit denominator of 50000 and luminance values one of 10000,
//! per the colour volume SEI definition.

use byteorder::BigEndian;
use byteorder::ByteOrder;
use thiserror::Error;

use crate::rational::Rational;

pub const CHROMA_DEN: u32 = 50000;
pub const LUMA_DEN: u32 = 10000;

/// Wire size of a mastering display colour volume payload.
pub const MDCV_PAYLOAD_SIZE: usize = 24;
/// Wire size of a content light level payload.
pub const CLL_PAYLOAD_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum Hdr10Error {
    #[error("payload too short: got {got} bytes, need {need}")]
    TooShort { got: usize, need: usize },
}

/// Mastering display colour volume (SEI payload type 137).
///
/// Primaries are stored in R, G, B order; the wire carries them in G, B, R
/// order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MasteringDisplayMetadata {
    pub display_primaries: [(Rational, Rational); 3],
    pub white_point: (Rational, Rational),
    pub max_luminance: Rational,
    pub min_luminance: Rational,
}

impl MasteringDisplayMetadata {
    /// Parses the 24-byte big-endian payload.
    pub fn parse(data: &[u8]) -> Result<Self, Hdr10Error> {
        if data.len() < MDCV_PAYLOAD_SIZE {
            return Err(Hdr10Error::TooShort {
                got: data.len(),
                need: MDCV_PAYLOAD_SIZE,
            });
        }

        let chroma =
            |off: usize| Rational::from_scaled(u32::from(BigEndian::read_u16(&data[off..])), CHROMA_DEN as i32);

        // Wire order is G, B, R.
        let g = (chroma(0), chroma(2));
        let b = (chroma(4), chroma(6));
        let r = (chroma(8), chroma(10));

        Ok(Self {
            display_primaries: [r, g, b],
            white_point: (chroma(12), chroma(14)),
            max_luminance: Rational::from_scaled(BigEndian::read_u32(&data[16..]), LUMA_DEN as i32),
            min_luminance: Rational::from_scaled(BigEndian::read_u32(&data[20..]), LUMA_DEN as i32),
        })
    }

    /// Serializes to the 24-byte big-endian payload.
    pub fn to_payload(&self) -> [u8; MDCV_PAYLOAD_SIZE] {
        let mut out = [0u8; MDCV_PAYLOAD_SIZE];
        let [r, g, b] = self.display_primaries;

        let mut put = |off: usize, v: Rational| {
            BigEndian::write_u16(&mut out[off..off + 2], v.to_scaled(CHROMA_DEN) as u16);
        };
        put(0, g.0);
        put(2, g.1);
        put(4, b.0);
        put(6, b.1);
        put(8, r.0);
        put(10, r.1);
        put(12, self.white_point.0);
        put(14, self.white_point.1);

        BigEndian::write_u32(&mut out[16..20], self.max_luminance.to_scaled(LUMA_DEN));
        BigEndian::write_u32(&mut out[20..24], self.min_luminance.to_scaled(LUMA_DEN));
        out
    }
}

/// Content light level information (SEI payload type 144).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentLightLevel {
    /// Maximum content light level, cd/m2.
    pub max_cll: u16,
    /// Maximum frame-average light level, cd/m2.
    pub max_fall: u16,
}

impl ContentLightLevel {
    pub fn parse(data: &[u8]) -> Result<Self, Hdr10Error> {
        if data.len() < CLL_PAYLOAD_SIZE {
            return Err(Hdr10Error::TooShort {
                got: data.len(),
                need: CLL_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            max_cll: BigEndian::read_u16(&data[0..]),
            max_fall: BigEndian::read_u16(&data[2..]),
        })
    }

    pub fn to_payload(&self) -> [u8; CLL_PAYLOAD_SIZE] {
        let mut out = [0u8; CLL_PAYLOAD_SIZE];
        BigEndian::write_u16(&mut out[0..2], self.max_cll);
        BigEndian::write_u16(&mut out[2..4], self.max_fall);
        out
    }
}
