use aligned::{Aligned, A16};

use crate::DssimError;

/// Marker passed in place of a gamma exponent to request the piecewise sRGB
/// transfer curve instead of a plain power function.
pub const SRGB_GAMMA: f64 = -47_571_492.0;

/// Lookup table mapping 8-bit encoded values to linear light in 0..=1.
///
/// Built once per image and never mutated afterwards.
#[derive(Clone)]
pub struct GammaTable {
    lut: Aligned<A16, [f32; 256]>,
}

impl GammaTable {
    /// Builds a table for `gamma`.
    ///
    /// `gamma` is the reciprocal of the decoding exponent (e.g. `0.45455` for
    /// a 2.2 power curve), as stored in PNG `gAMA` chunks. Pass [`SRGB_GAMMA`]
    /// for the true sRGB curve.
    ///
    /// # Errors
    /// - If `gamma` is not in the open interval (0, 1) and is not [`SRGB_GAMMA`]
    #[allow(clippy::float_cmp)]
    pub fn new(gamma: f64) -> Result<Self, DssimError> {
        if gamma == SRGB_GAMMA {
            return Ok(Self::srgb());
        }
        if gamma.is_nan() || gamma <= 0.0 || gamma >= 1.0 {
            return Err(DssimError::InvalidGamma(gamma));
        }

        let exponent = 1.0 / gamma;
        Ok(Self::from_fn(|s| s.powf(exponent)))
    }

    /// Table for the piecewise sRGB transfer curve.
    #[must_use]
    pub fn srgb() -> Self {
        Self::from_fn(srgb_to_linear)
    }

    fn from_fn(f: impl Fn(f64) -> f64) -> Self {
        let mut lut = [0f32; 256];
        for (i, out) in lut.iter_mut().enumerate() {
            *out = f(i as f64 / 255.0) as f32;
        }
        Self { lut: Aligned(lut) }
    }

    #[inline(always)]
    #[must_use]
    pub fn lookup(&self, value: u8) -> f32 {
        self.lut[usize::from(value)]
    }
}

impl std::fmt::Debug for GammaTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GammaTable")
            .field("mid", &self.lut[128])
            .finish_non_exhaustive()
    }
}

#[inline]
fn srgb_to_linear(s: f64) -> f64 {
    if s <= 0.04045 {
        s / 12.92
    } else {
        ((s + 0.055) / 1.055).powf(2.4)
    }
}
