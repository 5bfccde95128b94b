// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! HDR10+ (SMPTE ST 2094-40) dynamic metadata codec.
//!
//! The metadata travels as an ITU-T T.35 registered SEI payload. Decode
//! consumes the raw payload bytes of such an SEI; encode produces payload
//! bytes ready to be framed by [`crate::sei::build_sei_nal`]. Both sides are
//! bit-exact with respect to each other: `decode(encode(m)) == m` for any
//! normalized metadata value.

use enumn::N;
use thiserror::Error;

use crate::bitstream::BitReaderError;
use crate::bitstream::BitstreamReader;
use crate::bitstream::BitstreamWriter;
use crate::rational::Rational;

/// T.35 prefix identifying an HDR10+ payload: country code 0xB5 (USA),
/// provider code 0x003C (Samsung), provider oriented code 0x0001,
/// application identifier 4, application version 0.
pub const T35_HEADER: [u8; 7] = [0xb5, 0x00, 0x3c, 0x00, 0x01, 0x04, 0x00];

/// Peak luminance grids are at most 25x25.
pub const MAX_LUMINANCE_GRID_SIZE: usize = 25;
/// At most 15 distribution percentiles and 15 Bezier anchors per window.
pub const MAX_PERCENTILES: usize = 15;
pub const MAX_BEZIER_CURVE_ANCHORS: usize = 15;

const LUMINANCE_DEN: i32 = 10000;
const RGB_DEN: i32 = 100000;
const FRACTION_DEN: i32 = 1000;
const KNEE_POINT_DEN: i32 = 4095;
const BEZIER_ANCHOR_DEN: i32 = 1023;
const PEAK_LUMINANCE_DEN: i32 = 15;
const SATURATION_WEIGHT_DEN: i32 = 8;

#[derive(Debug, Error)]
pub enum Hdr10PlusError {
    #[error("payload does not start with the HDR10+ T.35 header")]
    BadHeader,
    #[error("invalid number of processing windows: {0}")]
    BadNumWindows(u32),
    #[error("metadata not normalized: {0}")]
    Denormalized(&'static str),
    #[error("payload truncated")]
    Truncated,
}

impl From<BitReaderError> for Hdr10PlusError {
    fn from(_: BitReaderError) -> Self {
        Hdr10PlusError::Truncated
    }
}

/// How overlapping processing windows combine.
#[derive(N, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OverlapProcessOption {
    #[default]
    WeightedAveraging = 0,
    Layering = 1,
}

/// Geometry of processing windows 1 and 2. Window 0 always spans the whole
/// picture and carries no geometry block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WindowGeometry {
    pub upper_left_corner_x: u16,
    pub upper_left_corner_y: u16,
    pub lower_right_corner_x: u16,
    pub lower_right_corner_y: u16,
    pub center_of_ellipse_x: u16,
    pub center_of_ellipse_y: u16,
    pub rotation_angle: u8,
    pub semimajor_axis_internal_ellipse: u16,
    pub semimajor_axis_external_ellipse: u16,
    pub semiminor_axis_external_ellipse: u16,
    pub overlap_process_option: OverlapProcessOption,
}

/// One percentile of the linearized maxRGB distribution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistributionMaxRgb {
    pub percentage: u8,
    pub percentile: Rational,
}

/// Per-window Bezier tone mapping curve.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToneMapping {
    pub knee_point_x: Rational,
    pub knee_point_y: Rational,
    pub bezier_curve_anchors: Vec<Rational>,
}

/// A processing window and its colour volume transform parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessingWindow {
    /// `None` for window 0.
    pub geometry: Option<WindowGeometry>,
    pub maxscl: [Rational; 3],
    pub average_maxrgb: Rational,
    pub distribution_maxrgb: Vec<DistributionMaxRgb>,
    pub fraction_bright_pixels: Rational,
    pub tone_mapping: Option<ToneMapping>,
    pub color_saturation_weight: Option<Rational>,
}

/// A row-major actual-peak-luminance grid, at most 25x25 entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LuminanceGrid {
    pub num_rows: usize,
    pub num_cols: usize,
    pub entries: Vec<Rational>,
}

/// One frame's worth of HDR10+ dynamic metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hdr10PlusMetadata {
    /// 1 to 3 windows; window 0 has no geometry, windows 1 and 2 must.
    pub windows: Vec<ProcessingWindow>,
    pub targeted_system_display_maximum_luminance: Rational,
    pub targeted_system_display_actual_peak_luminance: Option<LuminanceGrid>,
    pub mastering_display_actual_peak_luminance: Option<LuminanceGrid>,
}

fn read_grid(r: &mut BitstreamReader) -> Result<LuminanceGrid, Hdr10PlusError> {
    let num_rows = (r.get_bits(5)? as usize).min(MAX_LUMINANCE_GRID_SIZE);
    let num_cols = (r.get_bits(5)? as usize).min(MAX_LUMINANCE_GRID_SIZE);
    let mut entries = Vec::with_capacity(num_rows * num_cols);
    for _ in 0..num_rows * num_cols {
        entries.push(Rational::from_scaled(r.get_bits(4)?, PEAK_LUMINANCE_DEN));
    }
    Ok(LuminanceGrid {
        num_rows,
        num_cols,
        entries,
    })
}

fn write_grid(w: &mut BitstreamWriter, grid: &LuminanceGrid) -> Result<(), Hdr10PlusError> {
    if grid.num_rows > MAX_LUMINANCE_GRID_SIZE
        || grid.num_cols > MAX_LUMINANCE_GRID_SIZE
        || grid.entries.len() != grid.num_rows * grid.num_cols
    {
        return Err(Hdr10PlusError::Denormalized("luminance grid dimensions"));
    }
    put(w, grid.num_rows as u32, 5);
    put(w, grid.num_cols as u32, 5);
    for entry in &grid.entries {
        put(w, entry.to_scaled(PEAK_LUMINANCE_DEN as u32), 4);
    }
    Ok(())
}

// Field widths here are all static and <= 32, so the writer cannot fail.
fn put(w: &mut BitstreamWriter, value: u32, bits: u8) {
    w.put(value, bits).unwrap_or_else(|_| unreachable!());
}

/// Decodes an HDR10+ SEI payload, T.35 header included.
pub fn decode(payload: &[u8]) -> Result<Hdr10PlusMetadata, Hdr10PlusError> {
    if payload.len() < T35_HEADER.len() || payload[..T35_HEADER.len()] != T35_HEADER {
        return Err(Hdr10PlusError::BadHeader);
    }

    let mut r = BitstreamReader::new(payload, payload.len() * 8);
    r.skip_bits(T35_HEADER.len() * 8);

    let num_windows = r.get_bits(2)?;
    log::debug!("hdr10+ num_windows {}", num_windows);
    if !(1..=3).contains(&num_windows) {
        return Err(Hdr10PlusError::BadNumWindows(num_windows));
    }
    let num_windows = num_windows as usize;

    let mut windows: Vec<ProcessingWindow> = vec![Default::default(); num_windows];

    for window in windows.iter_mut().skip(1) {
        window.geometry = Some(WindowGeometry {
            upper_left_corner_x: r.get_bits(16)? as u16,
            upper_left_corner_y: r.get_bits(16)? as u16,
            lower_right_corner_x: r.get_bits(16)? as u16,
            lower_right_corner_y: r.get_bits(16)? as u16,
            center_of_ellipse_x: r.get_bits(16)? as u16,
            center_of_ellipse_y: r.get_bits(16)? as u16,
            rotation_angle: r.get_bits(8)? as u8,
            semimajor_axis_internal_ellipse: r.get_bits(16)? as u16,
            semimajor_axis_external_ellipse: r.get_bits(16)? as u16,
            semiminor_axis_external_ellipse: r.get_bits(16)? as u16,
            // 1-bit read, both values covered.
            overlap_process_option: OverlapProcessOption::n(r.get_bits(1)? as u8)
                .unwrap_or_default(),
        });
    }

    let targeted_system_display_maximum_luminance =
        Rational::from_scaled(r.get_bits(27)?, LUMINANCE_DEN);

    let targeted_system_display_actual_peak_luminance = if r.get_bits(1)? != 0 {
        Some(read_grid(&mut r)?)
    } else {
        None
    };

    for (w, window) in windows.iter_mut().enumerate() {
        for i in 0..3 {
            window.maxscl[i] = Rational::from_scaled(r.get_bits(17)?, RGB_DEN);
            log::debug!("hdr10+ maxscl[{}][{}] {}", w, i, window.maxscl[i].num);
        }
        window.average_maxrgb = Rational::from_scaled(r.get_bits(17)?, RGB_DEN);

        let num_percentiles = (r.get_bits(4)? as usize).min(MAX_PERCENTILES);
        for _ in 0..num_percentiles {
            window.distribution_maxrgb.push(DistributionMaxRgb {
                percentage: r.get_bits(7)? as u8,
                percentile: Rational::from_scaled(r.get_bits(17)?, RGB_DEN),
            });
        }

        window.fraction_bright_pixels = Rational::from_scaled(r.get_bits(10)?, FRACTION_DEN);
    }

    let mastering_display_actual_peak_luminance = if r.get_bits(1)? != 0 {
        Some(read_grid(&mut r)?)
    } else {
        None
    };

    for window in windows.iter_mut() {
        if r.get_bits(1)? != 0 {
            let knee_point_x = Rational::from_scaled(r.get_bits(12)?, KNEE_POINT_DEN);
            let knee_point_y = Rational::from_scaled(r.get_bits(12)?, KNEE_POINT_DEN);
            let num_anchors = (r.get_bits(4)? as usize).min(MAX_BEZIER_CURVE_ANCHORS);
            let mut bezier_curve_anchors = Vec::with_capacity(num_anchors);
            for _ in 0..num_anchors {
                bezier_curve_anchors.push(Rational::from_scaled(
                    r.get_bits(10)?,
                    BEZIER_ANCHOR_DEN,
                ));
            }
            window.tone_mapping = Some(ToneMapping {
                knee_point_x,
                knee_point_y,
                bezier_curve_anchors,
            });
        }

        if r.get_bits(1)? != 0 {
            window.color_saturation_weight =
                Some(Rational::from_scaled(r.get_bits(6)?, SATURATION_WEIGHT_DEN));
        }
    }

    Ok(Hdr10PlusMetadata {
        windows,
        targeted_system_display_maximum_luminance,
        targeted_system_display_actual_peak_luminance,
        mastering_display_actual_peak_luminance,
    })
}

/// Encodes metadata into an HDR10+ SEI payload, T.35 header included and
/// byte-aligned at the end.
pub fn encode(m: &Hdr10PlusMetadata) -> Result<Vec<u8>, Hdr10PlusError> {
    let num_windows = m.windows.len();
    if !(1..=3).contains(&num_windows) {
        return Err(Hdr10PlusError::BadNumWindows(num_windows as u32));
    }
    if m.windows[0].geometry.is_some() {
        return Err(Hdr10PlusError::Denormalized("window 0 carries geometry"));
    }

    let mut w = BitstreamWriter::new();
    for byte in T35_HEADER {
        put(&mut w, u32::from(byte), 8);
    }

    put(&mut w, num_windows as u32, 2);

    for window in m.windows.iter().skip(1) {
        let geometry = window
            .geometry
            .as_ref()
            .ok_or(Hdr10PlusError::Denormalized("window 1+ without geometry"))?;
        put(&mut w, u32::from(geometry.upper_left_corner_x), 16);
        put(&mut w, u32::from(geometry.upper_left_corner_y), 16);
        put(&mut w, u32::from(geometry.lower_right_corner_x), 16);
        put(&mut w, u32::from(geometry.lower_right_corner_y), 16);
        put(&mut w, u32::from(geometry.center_of_ellipse_x), 16);
        put(&mut w, u32::from(geometry.center_of_ellipse_y), 16);
        put(&mut w, u32::from(geometry.rotation_angle), 8);
        put(&mut w, u32::from(geometry.semimajor_axis_internal_ellipse), 16);
        put(&mut w, u32::from(geometry.semimajor_axis_external_ellipse), 16);
        put(&mut w, u32::from(geometry.semiminor_axis_external_ellipse), 16);
        put(&mut w, geometry.overlap_process_option as u32, 1);
    }

    put(
        &mut w,
        m.targeted_system_display_maximum_luminance
            .to_scaled(LUMINANCE_DEN as u32),
        27,
    );

    match &m.targeted_system_display_actual_peak_luminance {
        Some(grid) => {
            put(&mut w, 1, 1);
            write_grid(&mut w, grid)?;
        }
        None => put(&mut w, 0, 1),
    }

    for window in &m.windows {
        for maxscl in &window.maxscl {
            put(&mut w, maxscl.to_scaled(RGB_DEN as u32), 17);
        }
        put(&mut w, window.average_maxrgb.to_scaled(RGB_DEN as u32), 17);

        if window.distribution_maxrgb.len() > MAX_PERCENTILES {
            return Err(Hdr10PlusError::Denormalized("too many percentiles"));
        }
        put(&mut w, window.distribution_maxrgb.len() as u32, 4);
        for d in &window.distribution_maxrgb {
            put(&mut w, u32::from(d.percentage), 7);
            put(&mut w, d.percentile.to_scaled(RGB_DEN as u32), 17);
        }

        put(
            &mut w,
            window.fraction_bright_pixels.to_scaled(FRACTION_DEN as u32),
            10,
        );
    }

    match &m.mastering_display_actual_peak_luminance {
        Some(grid) => {
            put(&mut w, 1, 1);
            write_grid(&mut w, grid)?;
        }
        None => put(&mut w, 0, 1),
    }

    for window in &m.windows {
        match &window.tone_mapping {
            Some(tm) => {
                put(&mut w, 1, 1);
                put(&mut w, tm.knee_point_x.to_scaled(KNEE_POINT_DEN as u32), 12);
                put(&mut w, tm.knee_point_y.to_scaled(KNEE_POINT_DEN as u32), 12);
                if tm.bezier_curve_anchors.len() > MAX_BEZIER_CURVE_ANCHORS {
                    return Err(Hdr10PlusError::Denormalized("too many Bezier anchors"));
                }
                put(&mut w, tm.bezier_curve_anchors.len() as u32, 4);
                for anchor in &tm.bezier_curve_anchors {
                    put(&mut w, anchor.to_scaled(BEZIER_ANCHOR_DEN as u32), 10);
                }
            }
            None => put(&mut w, 0, 1),
        }

        match window.color_saturation_weight {
            Some(weight) => {
                put(&mut w, 1, 1);
                put(&mut w, weight.to_scaled(SATURATION_WEIGHT_DEN as u32), 6);
            }
            None => put(&mut w, 0, 1),
        }
    }

    w.align_zero();
    Ok(w.to_vec())
}
