use crate::cli::EvaluateArgs;
use crate::config::build_config;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use clusternb::engine::energy::FepCoupling;
use clusternb::engine::progress::ProgressReporter;
use clusternb::workflows::evaluate::{self, ForceReport};
use std::fmt::Write;
use tracing::info;

pub fn run(args: EvaluateArgs, threads: Option<usize>) -> Result<()> {
    info!("Merging configuration from defaults, file and command line...");
    let config = build_config(&args, threads)?;
    let water = config.build_system()?;
    info!(
        num_atoms = water.system.num_atoms(),
        box_length = water.system.periodic_box.min_length(),
        "Water box built."
    );

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let report = evaluate::run(&water.system, &water.params, &config, &reporter)?;

    print!("{}", format_summary(&report));

    if let Some(path) = &args.forces_out {
        report
            .write_forces_csv(path)
            .map_err(|source| CliError::ForcesOutput {
                path: path.clone(),
                source,
            })?;
        info!("Forces written to {:?}", path);
        println!("Forces written to: {}", path.display());
    }
    Ok(())
}

fn format_summary(report: &ForceReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Kernel:          {}", report.kernel);
    let _ = writeln!(out, "Threads:         {}", report.num_threads);
    let _ = writeln!(out, "Atoms:           {}", report.forces.len());
    let _ = writeln!(out, "Cluster pairs:   {}", report.num_cluster_pairs);
    let _ = writeln!(out, "LJ energy:       {:.6} kJ/mol", report.total_vdw());
    let _ = writeln!(out, "Coulomb energy:  {:.6} kJ/mol", report.total_coulomb());
    let _ = writeln!(out, "Potential:       {:.6} kJ/mol", report.potential());
    let _ = writeln!(out, "Max |F|:         {:.6} kJ/mol/nm", report.max_force());

    let n = report.energies.num_groups();
    if n > 1 {
        let _ = writeln!(out, "Group pairs (LJ, Coulomb):");
        for gi in 0..n {
            for gj in gi..n {
                let e = report.energies.get(gi, gj);
                let _ = writeln!(out, "  {gi}-{gj}: {:.6}, {:.6}", e.vdw, e.coulomb);
            }
        }
    }
    if let Some(virial) = &report.virial {
        let _ = writeln!(
            out,
            "Virial diagonal: {:.6} {:.6} {:.6}",
            virial[(0, 0)],
            virial[(1, 1)],
            virial[(2, 2)]
        );
    }
    if report.fep_pair_counts.num_pairs > 0 {
        let _ = writeln!(
            out,
            "Perturbed pairs: {} ({} within the cut-off)",
            report.fep_pair_counts.num_pairs, report.fep_pair_counts.num_pairs_within_cutoff
        );
        let _ = writeln!(
            out,
            "dV/dλ:           coul {:.6}, vdw {:.6}",
            report.dvdl[FepCoupling::Coul.index()],
            report.dvdl[FepCoupling::Vdw.index()]
        );
        for (k, energy) in report.foreign_lambda_energies.iter().enumerate().skip(1) {
            let _ = writeln!(out, "  foreign λ {}: {:.6}", k - 1, energy);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_args(set_values: &[&str]) -> EvaluateArgs {
        EvaluateArgs {
            waters: Some(8),
            steps: Some(2),
            set_values: set_values.iter().map(|s| s.to_string()).collect(),
            ..EvaluateArgs::default()
        }
    }

    #[test]
    fn evaluation_writes_the_forces_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forces.csv");
        let args = EvaluateArgs {
            forces_out: Some(path.clone()),
            ..small_args(&["interactions.rcoulomb=0.6", "interactions.rvdw=0.6"])
        };
        run(args, Some(2)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1 + 24);
        assert!(content.starts_with("atom,fx,fy,fz"));
    }

    #[test]
    fn summary_lists_group_pairs_and_perturbation() {
        let args = small_args(&[
            "system.num-energy-groups=2",
            "system.num-perturbed-waters=1",
            "interactions.coulomb-type=\"reaction-field\"",
            "interactions.rcoulomb=0.6",
            "interactions.rvdw=0.6",
        ]);
        let config = build_config(&args, Some(1)).unwrap();
        let water = config.build_system().unwrap();
        let report =
            evaluate::run(&water.system, &water.params, &config, &ProgressReporter::new()).unwrap();

        let summary = format_summary(&report);
        assert!(summary.contains("Kernel:"));
        assert!(summary.contains("0-1:"));
        assert!(summary.contains("Perturbed pairs:"));
        assert!(summary.contains("Virial diagonal:"));
    }

    #[test]
    fn invalid_physics_is_reported_as_an_engine_error() {
        let args = small_args(&[
            "interactions.coulomb-type=reaction-field",
            "interactions.rvdw=0.8",
        ]);
        assert!(matches!(run(args, Some(1)), Err(CliError::Engine(_))));
    }
}
