use crate::core::math::Real;
use statrs::function::erf::{erf, erfc};

const FRAC_2_SQRT_PI: f64 = std::f64::consts::FRAC_2_SQRT_PI;

/// Upper bound of `|(erf(x)/x)'''|`, which controls the linear
/// interpolation error of the force table.
const ERF_X_D3: f64 = 1.0522;

/// Below this `βr` the long-range functions switch to their Taylor series.
const SERIES_THRESHOLD: f64 = 1e-3;

/// Splitting coefficient β such that `erfc(β·rc) = rtol`, found by bisection.
pub fn calc_ewald_coeff_q(rc: Real, rtol: Real) -> Real {
    let (rc, rtol) = (f64::from(rc), f64::from(rtol));
    bisect_coefficient(|beta| erfc(beta * rc) > rtol) as Real
}

/// LJ-PME splitting coefficient such that `exp(-x²)(1 + x² + x⁴/2) = rtol`
/// with `x = β·rc`.
pub fn calc_ewald_coeff_lj(rc: Real, rtol: Real) -> Real {
    let (rc, rtol) = (f64::from(rc), f64::from(rtol));
    bisect_coefficient(|beta| {
        let x2 = beta * beta * rc * rc;
        (-x2).exp() * (1.0 + x2 + 0.5 * x2 * x2) > rtol
    }) as Real
}

fn bisect_coefficient(too_small: impl Fn(f64) -> bool) -> f64 {
    let mut beta = 5.0;
    let mut doublings = 0;
    loop {
        doublings += 1;
        beta *= 2.0;
        if !too_small(beta) {
            break;
        }
    }

    let (mut low, mut high) = (0.0, beta);
    for _ in 0..doublings + 60 {
        beta = 0.5 * (low + high);
        if too_small(beta) {
            low = beta;
        } else {
            high = beta;
        }
    }
    beta
}

/// Long-range Ewald potential `erf(βr)/r`, finite at `r = 0`.
pub fn ewald_lr_potential(beta: f64, r: f64) -> f64 {
    let x = beta * r;
    if x < SERIES_THRESHOLD {
        FRAC_2_SQRT_PI * beta * (1.0 - x * x / 3.0)
    } else {
        erf(x) / r
    }
}

/// Long-range Ewald force `-dV/dr` of [`ewald_lr_potential`], zero at `r = 0`.
pub fn ewald_lr_force(beta: f64, r: f64) -> f64 {
    let x = beta * r;
    if x < SERIES_THRESHOLD {
        2.0 / 3.0 * FRAC_2_SQRT_PI * beta * beta * x * (1.0 - 0.6 * x * x)
    } else {
        erf(x) / (r * r) - FRAC_2_SQRT_PI * beta * (-x * x).exp() / r
    }
}

/// Points per nm for the Coulomb correction table.
///
/// Two constraints are combined: a relative force error at single-precision
/// level, and an energy error of `energy_tolerance_factor` times the
/// potential jump at the cut-off.
pub fn ewald_table_scale(beta: Real, rc: Real, energy_tolerance_factor: Real) -> Real {
    let beta = f64::from(beta);
    let force_tolerance = f64::from(f32::EPSILON);
    let force_scale = (ERF_X_D3 / (6.0 * 4.0 * force_tolerance * beta)).sqrt() * beta;

    let energy_tolerance = f64::from(energy_tolerance_factor) * erfc(beta * f64::from(rc));
    let energy_scale =
        (ERF_X_D3 / (6.0 * 12.0 * 3.0_f64.sqrt() * energy_tolerance)).cbrt() * beta;

    force_scale.max(energy_scale) as Real
}

/// Tabulated long-range Ewald correction with linear force interpolation.
///
/// Each point `i` at `r = i / scale` stores `[F, dF, V, 0]` where
/// `dF = F[i + 1] - F[i]`; the energy between points is the integral of the
/// interpolated force, so force and energy stay consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct EwaldCorrectionTable {
    scale: Real,
    fdv0: Vec<Real>,
}

impl EwaldCorrectionTable {
    pub fn new(beta: Real, scale: Real, r_max: Real) -> Self {
        let num_points = (r_max * scale) as usize + 2;
        let (beta, scale_f64) = (f64::from(beta), f64::from(scale));

        let force: Vec<f64> = (0..=num_points)
            .map(|i| ewald_lr_force(beta, i as f64 / scale_f64))
            .collect();

        let mut fdv0 = Vec::with_capacity(4 * num_points);
        for i in 0..num_points {
            let r = i as f64 / scale_f64;
            fdv0.push(force[i] as Real);
            fdv0.push((force[i + 1] - force[i]) as Real);
            fdv0.push(ewald_lr_potential(beta, r) as Real);
            fdv0.push(0.0);
        }

        Self { scale, fdv0 }
    }

    #[inline]
    pub fn scale(&self) -> Real {
        self.scale
    }

    pub fn num_points(&self) -> usize {
        self.fdv0.len() / 4
    }

    /// Largest distance the table can interpolate.
    pub fn max_distance(&self) -> Real {
        (self.num_points() - 1) as Real / self.scale
    }

    /// Long-range potential at `r = 0`, `2β/√π`.
    #[inline]
    pub fn potential_at_zero(&self) -> Real {
        self.fdv0[2]
    }

    /// Returns `(F(r), V(r))` of the long-range part at distance `r`.
    /// Distances past [`Self::max_distance`] are extrapolated from the last
    /// interval.
    #[inline(always)]
    pub fn lookup(&self, r: Real) -> (Real, Real) {
        let rs = r * self.scale;
        let ri = (rs as usize).min(self.num_points() - 1);
        let frac = rs - ri as Real;
        let entry = &self.fdv0[4 * ri..4 * ri + 4];
        let f = entry[0] + frac * entry[1];
        let v = entry[2] - 0.5 / self.scale * frac * (entry[0] + f);
        (f, v)
    }
}
