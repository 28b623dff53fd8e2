use nalgebra::Vector3;

#[cfg(not(feature = "single-precision"))]
pub type Real = f64;
#[cfg(feature = "single-precision")]
pub type Real = f32;

pub type RVec = Vector3<Real>;

/// Electrostatic conversion factor 1/(4πε₀) in kJ·mol⁻¹·nm·e⁻².
pub const ONE_4PI_EPS0: Real = 138.935_458;

pub const FRAC_1_SQRT_PI: Real = 0.564_189_583_547_756_3;

/// Native lane count of the SIMD kernels: 256-bit registers hold four
/// doubles or eight floats.
#[cfg(not(feature = "single-precision"))]
pub const SIMD_WIDTH: usize = 4;
#[cfg(feature = "single-precision")]
pub const SIMD_WIDTH: usize = 8;

/// Pairs closer than this are dropped when forces on excluded pairs are
/// evaluated, keeping `r⁻⁶` finite.
pub const MIN_DISTANCE_SQUARED: Real = 1.0e-12;

#[inline(always)]
pub fn inv_sqrt(x: Real) -> Real {
    1.0 / x.sqrt()
}

#[inline]
pub fn erf(x: Real) -> Real {
    statrs::function::erf::erf(f64::from(x)) as Real
}

#[inline]
pub fn erfc(x: Real) -> Real {
    statrs::function::erf::erfc(f64::from(x)) as Real
}
