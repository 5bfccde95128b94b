// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Region-of-interest QP map builder.
//!
//! The encoder consumes a per-frame map of one byte per 8x8 pixel block.
//! Rectangles arrive in order of decreasing importance, so the list is
//! applied in reverse: earlier entries overwrite later ones on overlap.
//! Building the map is the expensive part, so [`RoiState`] caches the last
//! rectangle list and rebuilds only when a frame carries a different one.

use crate::rational::Rational;
use crate::CodecFormat;
use crate::Resolution;

/// QP delta span mapped over the full rational offset range [-1, 1].
const INTRA_QP_RANGE: i32 = 25;
const MIN_QP_DELTA: i32 = -25;
const MAX_QP_DELTA: i32 = 25;
/// qp_info is a 6-bit field.
const MAX_QP_INFO: u32 = 63;
/// Base QP the average map delta is reported against.
const DEFAULT_INTRA_QP: u32 = 22;

/// A rectangle (pixel coordinates, exclusive right/bottom) with a quality
/// offset in the range [-1, 1]. Negative offsets request better quality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionOfInterest {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
    pub qp_offset: Rational,
}

/// One 8x8-block map entry: bit 0 is `roi_abs_qp_flag`, bits 1-6 carry
/// `qp_info`, bit 7 is `ipcm_flag`. The builder always emits delta-QP
/// entries with both flags clear.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QpMapEntry(pub u8);

impl QpMapEntry {
    fn from_qp_info(qp_info: u32) -> Self {
        Self(((qp_info & MAX_QP_INFO) << 1) as u8)
    }

    pub fn qp_info(self) -> u32 {
        (u32::from(self.0) >> 1) & MAX_QP_INFO
    }

    pub fn roi_abs_qp_flag(self) -> bool {
        self.0 & 0x01 != 0
    }

    pub fn ipcm_flag(self) -> bool {
        self.0 & 0x80 != 0
    }
}

/// Cached ROI map state, held per encoder session.
#[derive(Default)]
pub struct RoiState {
    rois: Vec<RegionOfInterest>,
    map: Vec<QpMapEntry>,
    avg_qp: u32,
}

impl RoiState {
    pub fn new() -> Self {
        Default::default()
    }

    /// The current map bytes, empty until the first [`Self::update`].
    pub fn map(&self) -> &[QpMapEntry] {
        &self.map
    }

    /// Average QP over the map relative to the default intra QP.
    pub fn avg_qp(&self) -> u32 {
        self.avg_qp
    }

    /// Rebuilds the map if `rois` differs from the cached list in count or
    /// content. Returns whether a rebuild happened.
    pub fn update(
        &mut self,
        codec: CodecFormat,
        resolution: Resolution,
        rois: &[RegionOfInterest],
    ) -> bool {
        if !self.map.is_empty() && self.rois == rois {
            return false;
        }

        let (map, avg_qp) = build_qp_map(codec, resolution, rois);
        self.rois = rois.to_vec();
        self.map = map;
        self.avg_qp = avg_qp;
        true
    }
}

fn align_up(v: u32, to: u32) -> u32 {
    (v + to - 1) & !(to - 1)
}

fn ceil_div(n: u32, d: u32) -> u32 {
    (n + d - 1) / d
}

/// Builds the QP map and its average QP for one frame.
///
/// The grid cell size is the codec's ROI block unit (16x16 for H.264, 64x64
/// for H.265); each cell expands to `(unit / 8)^2` consecutive 8x8-block
/// entries. The map length is padded up to a multiple of 64 bytes.
pub fn build_qp_map(
    codec: CodecFormat,
    resolution: Resolution,
    rois: &[RegionOfInterest],
) -> (Vec<QpMapEntry>, u32) {
    let unit = codec.roi_block_unit();
    let aligned_width = align_up(resolution.width, unit);
    let aligned_height = align_up(resolution.height, unit);
    let mb_width = aligned_width / unit;
    let mb_height = aligned_height / unit;
    let num_mbs = mb_width * mb_height;
    let sub_num_mbs = (unit / 8) * (unit / 8);

    let block_size = aligned_width * aligned_height / (8 * 8);
    let map_size = align_up(block_size, 64) as usize;
    let mut map = vec![QpMapEntry::default(); map_size];

    // Regions are listed in order of decreasing importance; walk in reverse
    // so earlier rectangles win on overlap.
    for roi in rois.iter().rev() {
        if roi.qp_offset.den == 0 {
            log::debug!("ROI qp_offset denominator must not be zero, skipping");
            continue;
        }

        let set_qp = (roi.qp_offset.as_f64() * f64::from(INTRA_QP_RANGE)) as i32;
        let set_qp = set_qp.clamp(MIN_QP_DELTA, MAX_QP_DELTA);
        // Map the delta range (-25..=25) onto the 6-bit field: 0 to 0, -1 to
        // 1, -2 to 2 ... 1 to 63, 2 to 62 ...
        let qp_info = ((MAX_QP_INFO as i32 + 1 - set_qp) % (MAX_QP_INFO as i32 + 1)) as u32;

        log::debug!(
            "roi map: left {} right {} top {} bottom {} num {} den {} qp_info {}",
            roi.left,
            roi.right,
            roi.top,
            roi.bottom,
            roi.qp_offset.num,
            roi.qp_offset.den,
            qp_info
        );

        let first_col = ceil_div(roi.left, unit) as i32 - 1;
        let last_col = ceil_div(roi.right, unit) as i32 - 1;
        let first_row = ceil_div(roi.top, unit) as i32 - 1;
        let last_row = ceil_div(roi.bottom, unit) as i32 - 1;

        for j in 0..mb_height {
            if (j as i32) < first_row || (j as i32) > last_row {
                continue;
            }
            for i in 0..mb_width {
                if (i as i32) < first_col || (i as i32) > last_col {
                    continue;
                }
                let k = ((j * mb_width + i) * sub_num_mbs) as usize;
                for entry in &mut map[k..k + sub_num_mbs as usize] {
                    *entry = QpMapEntry::from_qp_info(qp_info);
                }
            }
        }
    }

    // Average over the first 8x8 entry of every grid cell, rounded to
    // nearest, reported against the default intra QP. An empty grid has
    // nothing to average.
    let avg_qp = if num_mbs == 0 {
        DEFAULT_INTRA_QP
    } else {
        let sum_qp: u32 = (0..num_mbs)
            .map(|k| map[(k * sub_num_mbs) as usize].qp_info())
            .sum();
        (sum_qp + num_mbs / 2) / num_mbs + DEFAULT_INTRA_QP
    };

    (map, avg_qp)
}
