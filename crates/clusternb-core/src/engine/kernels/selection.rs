use crate::core::forcefield::interaction_const::{
    CoulombInteraction, InteractionConst, InteractionModifier, VdwInteraction,
};
use crate::core::forcefield::params::CombinationRule;
use crate::core::math::SIMD_WIDTH;
use crate::engine::error::EngineError;
use phf::{Map, phf_map};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cluster layout of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelType {
    /// Scalar reference kernel with 4×4 clusters.
    #[serde(rename = "plain-4x4")]
    Plain4x4,
    /// Every i atom against a full register of j atoms.
    #[serde(rename = "simd-4xm")]
    Simd4xM,
    /// Two i atoms per register against half a register of j atoms each.
    #[serde(rename = "simd-2xmm")]
    Simd2xMM,
}

static KERNEL_TYPES: Map<&'static str, KernelType> = phf_map! {
    "plain-4x4" => KernelType::Plain4x4,
    "simd-4xm" => KernelType::Simd4xM,
    "simd-2xmm" => KernelType::Simd2xMM,
};

impl KernelType {
    pub const ALL: [KernelType; 3] = [Self::Plain4x4, Self::Simd4xM, Self::Simd2xMM];

    pub fn name(self) -> &'static str {
        match self {
            Self::Plain4x4 => "plain-4x4",
            Self::Simd4xM => "simd-4xm",
            Self::Simd2xMM => "simd-2xmm",
        }
    }

    /// Atoms per j-cluster in this layout.
    pub const fn j_cluster_size(self) -> usize {
        match self {
            Self::Plain4x4 => 4,
            Self::Simd4xM => SIMD_WIDTH,
            Self::Simd2xMM => SIMD_WIDTH / 2,
        }
    }

    #[inline]
    pub fn is_simd(self) -> bool {
        self != Self::Plain4x4
    }
}

impl fmt::Display for KernelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KernelType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KERNEL_TYPES
            .get(s)
            .copied()
            .ok_or_else(|| EngineError::UnsupportedKernel(format!("unknown kernel layout '{s}'")))
    }
}

/// How Ewald exclusion corrections are computed in the SIMD kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EwaldExclusionType {
    #[default]
    Table,
    Analytical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct KernelSetup {
    pub kernel_type: KernelType,
    pub ewald_exclusion: EwaldExclusionType,
}

impl Default for KernelSetup {
    fn default() -> Self {
        Self {
            kernel_type: KernelType::Simd4xM,
            ewald_exclusion: EwaldExclusionType::Table,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoulombKernelType {
    ReactionField,
    Table,
    TableTwin,
    Ewald,
    EwaldTwin,
}

static COULOMB_KERNEL_TYPES: Map<&'static str, CoulombKernelType> = phf_map! {
    "reaction-field" => CoulombKernelType::ReactionField,
    "table" => CoulombKernelType::Table,
    "table-twin" => CoulombKernelType::TableTwin,
    "ewald" => CoulombKernelType::Ewald,
    "ewald-twin" => CoulombKernelType::EwaldTwin,
};

impl CoulombKernelType {
    pub const ALL: [CoulombKernelType; 5] = [
        Self::ReactionField,
        Self::Table,
        Self::TableTwin,
        Self::Ewald,
        Self::EwaldTwin,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ReactionField => "reaction-field",
            Self::Table => "table",
            Self::TableTwin => "table-twin",
            Self::Ewald => "ewald",
            Self::EwaldTwin => "ewald-twin",
        }
    }

    #[inline]
    pub fn is_twin(self) -> bool {
        matches!(self, Self::TableTwin | Self::EwaldTwin)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        COULOMB_KERNEL_TYPES.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VdwKernelType {
    CutCombGeom,
    CutCombLB,
    CutCombNone,
    ForceSwitch,
    PotSwitch,
    EwaldCombGeom,
    EwaldCombLB,
}

static VDW_KERNEL_TYPES: Map<&'static str, VdwKernelType> = phf_map! {
    "cut-comb-geom" => VdwKernelType::CutCombGeom,
    "cut-comb-lb" => VdwKernelType::CutCombLB,
    "cut-comb-none" => VdwKernelType::CutCombNone,
    "force-switch" => VdwKernelType::ForceSwitch,
    "pot-switch" => VdwKernelType::PotSwitch,
    "ewald-comb-geom" => VdwKernelType::EwaldCombGeom,
    "ewald-comb-lb" => VdwKernelType::EwaldCombLB,
};

impl VdwKernelType {
    pub const ALL: [VdwKernelType; 7] = [
        Self::CutCombGeom,
        Self::CutCombLB,
        Self::CutCombNone,
        Self::ForceSwitch,
        Self::PotSwitch,
        Self::EwaldCombGeom,
        Self::EwaldCombLB,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CutCombGeom => "cut-comb-geom",
            Self::CutCombLB => "cut-comb-lb",
            Self::CutCombNone => "cut-comb-none",
            Self::ForceSwitch => "force-switch",
            Self::PotSwitch => "pot-switch",
            Self::EwaldCombGeom => "ewald-comb-geom",
            Self::EwaldCombLB => "ewald-comb-lb",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        VDW_KERNEL_TYPES.get(name).copied()
    }
}

/// A fully resolved kernel: layout plus physics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelVariant {
    pub layout: KernelType,
    pub coulomb: CoulombKernelType,
    pub vdw: VdwKernelType,
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {}",
            self.layout.name(),
            self.coulomb.name(),
            self.vdw.name()
        )
    }
}

/// Picks the kernel variant for a layout, the interaction constants and
/// the combination rule detected in the LJ parameter matrix.
pub fn select_kernel(
    setup: &KernelSetup,
    ic: &InteractionConst,
    combination_rule: CombinationRule,
) -> Result<KernelVariant, EngineError> {
    let layout = setup.kernel_type;
    let twin = ic.is_twin_cutoff();

    let coulomb = match ic.coulomb.interaction {
        CoulombInteraction::Cutoff | CoulombInteraction::ReactionField => {
            CoulombKernelType::ReactionField
        }
        CoulombInteraction::Ewald => match (setup.ewald_exclusion, twin) {
            (EwaldExclusionType::Table, false) => CoulombKernelType::Table,
            (EwaldExclusionType::Table, true) => CoulombKernelType::TableTwin,
            (EwaldExclusionType::Analytical, false) => CoulombKernelType::Ewald,
            (EwaldExclusionType::Analytical, true) => CoulombKernelType::EwaldTwin,
        },
    };

    let vdw = match (ic.vdw.interaction, ic.vdw.modifier) {
        (VdwInteraction::LjEwald, _) => VdwKernelType::EwaldCombGeom,
        (VdwInteraction::Cutoff, InteractionModifier::ForceSwitch) => VdwKernelType::ForceSwitch,
        (VdwInteraction::Cutoff, InteractionModifier::PotSwitch) => VdwKernelType::PotSwitch,
        (VdwInteraction::Cutoff, InteractionModifier::None | InteractionModifier::PotShift) => {
            if layout.is_simd() {
                match combination_rule {
                    CombinationRule::Geometric => VdwKernelType::CutCombGeom,
                    CombinationRule::LorentzBerthelot => VdwKernelType::CutCombLB,
                    CombinationRule::None => VdwKernelType::CutCombNone,
                }
            } else {
                VdwKernelType::CutCombNone
            }
        }
    };

    let variant = KernelVariant {
        layout,
        coulomb,
        vdw,
    };
    check_supported(&variant)?;
    Ok(variant)
}

/// Rejects variants no kernel implements.
pub fn check_supported(variant: &KernelVariant) -> Result<(), EngineError> {
    if variant.vdw == VdwKernelType::EwaldCombLB {
        return Err(EngineError::UnsupportedKernel(
            "LJ-Ewald with the Lorentz-Berthelot grid rule is not implemented".to_string(),
        ));
    }
    if !variant.layout.is_simd()
        && matches!(
            variant.vdw,
            VdwKernelType::CutCombGeom | VdwKernelType::CutCombLB
        )
    {
        return Err(EngineError::UnsupportedKernel(format!(
            "the plain kernel reads LJ parameters from the matrix, not {}",
            variant.vdw.name()
        )));
    }
    if !variant.layout.is_simd()
        && matches!(
            variant.coulomb,
            CoulombKernelType::Ewald | CoulombKernelType::EwaldTwin
        )
    {
        return Err(EngineError::UnsupportedKernel(
            "the plain kernel has no analytical Ewald exclusion correction".to_string(),
        ));
    }
    Ok(())
}
