// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed-point rational values.
//!
//! Most metadata fields on the wire are integers carrying an implicit,
//! standard-mandated denominator (50000 for chromaticity, 10000 for
//! luminance, 100000 for percentiles and so on). The denominators are codec
//! constants, not data; [`Rational::from_scaled`] and [`Rational::to_scaled`]
//! convert between the wire integers and the in-memory rational form.

/// A rational number, numerator over denominator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Builds a rational from a wire integer and its fixed denominator.
    pub const fn from_scaled(num: u32, den: i32) -> Self {
        Self {
            num: num as i32,
            den,
        }
    }

    /// The value as a double, 0.0 if the denominator is zero.
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            f64::from(self.num) / f64::from(self.den)
        }
    }

    /// Rescales the value to the given fixed denominator, rounding to
    /// nearest, for writing back to the wire.
    pub fn to_scaled(self, den: u32) -> u32 {
        (f64::from(den) * self.as_f64()).round() as u32
    }
}
