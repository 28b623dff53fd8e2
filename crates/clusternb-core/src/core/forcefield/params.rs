use crate::core::math::Real;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Relative tolerance used when checking whether a C6/C12 matrix obeys a
/// combination rule.
const COMBINATION_RULE_TOLERANCE: Real = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombinationRule {
    None,
    Geometric,
    LorentzBerthelot,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LjTypeParam {
    pub name: String,
    pub sigma: Real,
    pub epsilon: Real,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct NonbondedParameterFile {
    pub combination_rule: CombinationRule,
    pub types: Vec<LjTypeParam>,
}

/// Explicit C6/C12 for one type pair, overriding the combination rule.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PairOverride {
    pub type_a: String,
    pub type_b: String,
    pub c6: Real,
    pub c12: Real,
}

#[derive(Debug, Error)]
pub enum ParamLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Unknown atom type '{0}' in pair override")]
    UnknownType(String),
    #[error("Combination rule 'none' cannot generate pair parameters")]
    NoCombinationRule,
    #[error("C6/C12 matrix must be {expected}x{expected} and symmetric")]
    MalformedMatrix { expected: usize },
}

/// Lennard-Jones parameter tables for all type pairs.
///
/// One extra all-zero type is appended after the user types; padding atoms
/// and masked perturbed atoms use it so that they never carry LJ.
///
/// `nbfp` stores `(6·C6, 12·C12)` per pair so the kernels can skip the
/// prefactors; `nbfp_grid` stores `6·C6` of the geometric LJ-PME grid
/// term.
#[derive(Debug, Clone, PartialEq)]
pub struct NonbondedParameters {
    names: Vec<String>,
    num_types: usize,
    nbfp: Vec<[Real; 2]>,
    nbfp_grid: Vec<Real>,
    combination_rule: CombinationRule,
    comb_params: Vec<[Real; 2]>,
    grid_params: Vec<Real>,
}

impl NonbondedParameters {
    /// Builds the tables from a symmetric `n × n` matrix of plain `(C6, C12)`.
    pub fn from_c6_c12(names: Vec<String>, c6_c12: &[[Real; 2]]) -> Result<Self, ParamLoadError> {
        let n = names.len();
        if c6_c12.len() != n * n {
            return Err(ParamLoadError::MalformedMatrix { expected: n });
        }
        for i in 0..n {
            for j in 0..i {
                if c6_c12[i * n + j] != c6_c12[j * n + i] {
                    return Err(ParamLoadError::MalformedMatrix { expected: n });
                }
            }
        }

        let num_types = n + 1;
        let mut nbfp = vec![[0.0; 2]; num_types * num_types];
        for i in 0..n {
            for j in 0..n {
                let [c6, c12] = c6_c12[i * n + j];
                nbfp[i * num_types + j] = [6.0 * c6, 12.0 * c12];
            }
        }

        let mut nbfp_grid = vec![0.0; num_types * num_types];
        for i in 0..n {
            for j in 0..n {
                let c6_i = c6_c12[i * n + i][0];
                let c6_j = c6_c12[j * n + j][0];
                nbfp_grid[i * num_types + j] = 6.0 * (c6_i * c6_j).sqrt();
            }
        }
        let grid_params = (0..num_types)
            .map(|t| nbfp_grid[t * num_types + t].sqrt())
            .collect();

        let (combination_rule, comb_params) = detect_combination_rule(num_types, &nbfp);

        Ok(Self {
            names,
            num_types,
            nbfp,
            nbfp_grid,
            combination_rule,
            comb_params,
            grid_params,
        })
    }

    /// Generates all pair parameters from per-type σ/ε with `rule`.
    pub fn from_sigma_epsilon(
        types: &[LjTypeParam],
        rule: CombinationRule,
    ) -> Result<Self, ParamLoadError> {
        let n = types.len();
        let mut matrix = Vec::with_capacity(n * n);
        for a in types {
            for b in types {
                matrix.push(combine_lj_params(a, b, rule)?);
            }
        }
        Self::from_c6_c12(types.iter().map(|t| t.name.clone()).collect(), &matrix)
    }

    pub fn from_parameter_file(
        file: &NonbondedParameterFile,
        overrides: &[PairOverride],
    ) -> Result<Self, ParamLoadError> {
        let n = file.types.len();
        let index: HashMap<&str, usize> = file
            .types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();

        let mut matrix = Vec::with_capacity(n * n);
        for a in &file.types {
            for b in &file.types {
                matrix.push(combine_lj_params(a, b, file.combination_rule)?);
            }
        }
        for o in overrides {
            let a = *index
                .get(o.type_a.as_str())
                .ok_or_else(|| ParamLoadError::UnknownType(o.type_a.clone()))?;
            let b = *index
                .get(o.type_b.as_str())
                .ok_or_else(|| ParamLoadError::UnknownType(o.type_b.clone()))?;
            matrix[a * n + b] = [o.c6, o.c12];
            matrix[b * n + a] = [o.c6, o.c12];
        }

        Self::from_c6_c12(file.types.iter().map(|t| t.name.clone()).collect(), &matrix)
    }

    /// Loads per-type parameters from TOML and optional pair overrides
    /// from a CSV file with columns `type_a,type_b,c6,c12`.
    pub fn load(types_path: &Path, overrides_path: Option<&Path>) -> Result<Self, ParamLoadError> {
        let file = Self::load_parameter_file(types_path)?;
        let overrides = match overrides_path {
            Some(path) => Self::load_pair_overrides(path)?,
            None => Vec::new(),
        };
        Self::from_parameter_file(&file, &overrides)
    }

    fn load_parameter_file(path: &Path) -> Result<NonbondedParameterFile, ParamLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ParamLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ParamLoadError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    fn load_pair_overrides(path: &Path) -> Result<Vec<PairOverride>, ParamLoadError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| ParamLoadError::Csv {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        reader
            .deserialize::<PairOverride>()
            .map(|record| {
                record.map_err(|e| ParamLoadError::Csv {
                    path: path.to_string_lossy().to_string(),
                    source: e,
                })
            })
            .collect()
    }

    /// Number of types including the trailing padding type.
    #[inline]
    pub fn num_types(&self) -> usize {
        self.num_types
    }

    #[inline]
    pub fn padding_type(&self) -> usize {
        self.num_types - 1
    }

    pub fn type_name(&self, t: usize) -> Option<&str> {
        self.names.get(t).map(String::as_str)
    }

    /// `(6·C6, 12·C12)` for the type pair.
    #[inline]
    pub fn c6_c12(&self, ti: usize, tj: usize) -> [Real; 2] {
        self.nbfp[ti * self.num_types + tj]
    }

    /// `6·C6` of the LJ-PME grid for the type pair.
    #[inline]
    pub fn c6_grid(&self, ti: usize, tj: usize) -> Real {
        self.nbfp_grid[ti * self.num_types + tj]
    }

    #[inline]
    pub fn has_lj(&self, t: usize) -> bool {
        let [c6, c12] = self.c6_c12(t, t);
        c6 != 0.0 || c12 != 0.0
    }

    pub fn combination_rule(&self) -> CombinationRule {
        self.combination_rule
    }

    /// Per-type parameters for on-the-fly combination: `[sqrt(6·C6),
    /// sqrt(12·C12)]` for geometric, `[σ/2, sqrt(ε)]` for Lorentz-Berthelot.
    #[inline]
    pub fn comb_params(&self, t: usize) -> [Real; 2] {
        self.comb_params[t]
    }

    /// Per-type geometric grid parameter `sqrt(6·C6_grid)`.
    #[inline]
    pub fn grid_param(&self, t: usize) -> Real {
        self.grid_params[t]
    }
}

fn combine_lj_params(
    a: &LjTypeParam,
    b: &LjTypeParam,
    rule: CombinationRule,
) -> Result<[Real; 2], ParamLoadError> {
    let sigma6 = match rule {
        CombinationRule::Geometric => (a.sigma * b.sigma).powi(3),
        CombinationRule::LorentzBerthelot => (0.5 * (a.sigma + b.sigma)).powi(6),
        CombinationRule::None => return Err(ParamLoadError::NoCombinationRule),
    };
    let c6 = 4.0 * (a.epsilon * b.epsilon).sqrt() * sigma6;
    Ok([c6, c6 * sigma6])
}

fn within_tolerance(a: Real, b: Real) -> bool {
    (a - b).abs() <= COMBINATION_RULE_TOLERANCE * a.abs().max(b.abs())
}

/// Checks the premultiplied matrix against the geometric rule first, then
/// Lorentz-Berthelot, and returns the matching per-type parameters.
fn detect_combination_rule(
    num_types: usize,
    nbfp: &[[Real; 2]],
) -> (CombinationRule, Vec<[Real; 2]>) {
    let diag = |t: usize| nbfp[t * num_types + t];

    let geometric: Vec<[Real; 2]> = (0..num_types)
        .map(|t| {
            let [c6, c12] = diag(t);
            [c6.sqrt(), c12.sqrt()]
        })
        .collect();
    let is_geometric = (0..num_types).all(|i| {
        (0..num_types).all(|j| {
            let [c6, c12] = nbfp[i * num_types + j];
            within_tolerance(c6, geometric[i][0] * geometric[j][0])
                && within_tolerance(c12, geometric[i][1] * geometric[j][1])
        })
    });
    if is_geometric {
        return (CombinationRule::Geometric, geometric);
    }

    let lorentz_berthelot: Vec<[Real; 2]> = (0..num_types)
        .map(|t| {
            let [c6, c12] = diag(t);
            let (c6, c12) = (c6 / 6.0, c12 / 12.0);
            if c6 > 0.0 && c12 > 0.0 {
                let sigma = (c12 / c6).powf(1.0 / 6.0);
                let epsilon = c6 * c6 / (4.0 * c12);
                [0.5 * sigma, epsilon.sqrt()]
            } else {
                [0.0, 0.0]
            }
        })
        .collect();
    let is_lorentz_berthelot = (0..num_types).all(|i| {
        (0..num_types).all(|j| {
            let [c6, c12] = nbfp[i * num_types + j];
            let [c6_lb, c12_lb] = lorentz_berthelot_pair(&lorentz_berthelot[i], &lorentz_berthelot[j]);
            within_tolerance(c6, c6_lb) && within_tolerance(c12, c12_lb)
        })
    });
    if is_lorentz_berthelot {
        return (CombinationRule::LorentzBerthelot, lorentz_berthelot);
    }

    (CombinationRule::None, vec![[0.0; 2]; num_types])
}

/// `(6·C6, 12·C12)` from two `[σ/2, sqrt(ε)]` entries.
#[inline]
pub fn lorentz_berthelot_pair(a: &[Real; 2], b: &[Real; 2]) -> [Real; 2] {
    let sigma = a[0] + b[0];
    let epsilon = a[1] * b[1];
    let sigma2 = sigma * sigma;
    let sigma6 = sigma2 * sigma2 * sigma2;
    [24.0 * epsilon * sigma6, 48.0 * epsilon * sigma6 * sigma6]
}
