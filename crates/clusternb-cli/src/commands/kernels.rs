use crate::error::Result;
use clusternb::engine::kernels::selection::{
    CoulombKernelType, KernelType, KernelVariant, VdwKernelType, check_supported,
};
use std::fmt::Write;

pub fn run() -> Result<()> {
    print!("{}", kernel_table());
    Ok(())
}

/// One block per layout listing the supported physics variants.
fn kernel_table() -> String {
    let mut out = String::new();
    for layout in KernelType::ALL {
        let _ = writeln!(
            out,
            "{layout} (j-cluster size {}{})",
            layout.j_cluster_size(),
            if layout.is_simd() { ", SIMD layout" } else { "" }
        );
        for coulomb in CoulombKernelType::ALL {
            let supported: Vec<&str> = VdwKernelType::ALL
                .into_iter()
                .filter(|&vdw| {
                    check_supported(&KernelVariant {
                        layout,
                        coulomb,
                        vdw,
                    })
                    .is_ok()
                })
                .map(VdwKernelType::name)
                .collect();
            if !supported.is_empty() {
                let _ = writeln!(out, "  {:<12} {}", coulomb.name(), supported.join(", "));
            }
        }
    }
    out
}
