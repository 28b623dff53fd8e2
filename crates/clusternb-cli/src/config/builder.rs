use super::file::load_run_config;
use crate::cli::{CoulombArg, EvaluateArgs};
use crate::error::{CliError, Result};
use clusternb::core::forcefield::interaction_const::CoulombInteraction;
use clusternb::engine::kernels::selection::KernelType;
use clusternb::workflows::evaluate::RunConfig;
use toml::{Table, Value};

pub fn build_config(args: &EvaluateArgs, threads: Option<usize>) -> Result<RunConfig> {
    let mut config = load_run_config(args.config.as_deref())?;
    apply_cli_flags(&mut config, args, threads)?;
    apply_set_values(config, &args.set_values)
}

fn apply_cli_flags(config: &mut RunConfig, args: &EvaluateArgs, threads: Option<usize>) -> Result<()> {
    if let Some(waters) = args.waters {
        config.system.num_waters = waters;
    }
    if let Some(groups) = args.energy_groups {
        config.system.num_energy_groups = groups;
    }
    if let Some(steps) = args.steps {
        config.steps = steps;
    }
    if let Some(threads) = threads {
        config.threads = threads;
    }
    if let Some(name) = &args.kernel {
        config.kernel.kernel_type = name
            .parse::<KernelType>()
            .map_err(|e| CliError::Argument(e.to_string()))?;
    }
    if let Some(coulomb) = args.coulomb {
        config.interactions.coulomb_type = match coulomb {
            CoulombArg::Cutoff => CoulombInteraction::Cutoff,
            CoulombArg::ReactionField => CoulombInteraction::ReactionField,
            CoulombArg::Ewald => CoulombInteraction::Ewald,
        };
    }
    Ok(())
}

/// Applies `key=value` overrides by patching the serialized configuration,
/// so every key of the TOML file can be set.
fn apply_set_values(config: RunConfig, set_values: &[String]) -> Result<RunConfig> {
    if set_values.is_empty() {
        return Ok(config);
    }
    let mut value = Value::try_from(&config)
        .map_err(|e| CliError::Config(format!("Failed to serialize configuration: {e}")))?;
    let table = value
        .as_table_mut()
        .ok_or_else(|| CliError::Config("Configuration is not a table".to_string()))?;
    for kv_pair in set_values {
        let Some((key, value_str)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{kv_pair}'. Expected KEY=VALUE."
            )));
        };
        set_dotted_key(table, key.trim(), parse_value(value_str.trim()))?;
    }
    value
        .try_into()
        .map_err(|e| CliError::Config(format!("Invalid --set value: {e}")))
}

/// Parses a TOML value; anything that is not one is taken as a string.
fn parse_value(value: &str) -> Value {
    toml::from_str::<Table>(&format!("value = {value}"))
        .ok()
        .and_then(|mut t| t.remove("value"))
        .unwrap_or_else(|| Value::String(value.to_string()))
}

fn set_dotted_key(table: &mut Table, key: &str, value: Value) -> Result<()> {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(leaf) = parts.pop().filter(|leaf| !leaf.is_empty()) else {
        return Err(CliError::Config(format!("Invalid --set key: '{key}'")));
    };
    let mut current = table;
    for part in parts {
        current = current
            .entry(part)
            .or_insert_with(|| Value::Table(Table::new()))
            .as_table_mut()
            .ok_or_else(|| CliError::Config(format!("'{part}' in '{key}' is not a table")))?;
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusternb::engine::kernels::selection::EwaldExclusionType;
    use std::fs;
    use tempfile::tempdir;

    fn args_with(set_values: &[&str]) -> EvaluateArgs {
        EvaluateArgs {
            set_values: set_values.iter().map(|s| s.to_string()).collect(),
            ..EvaluateArgs::default()
        }
    }

    #[test]
    fn defaults_apply_without_file_or_flags() {
        let config = build_config(&EvaluateArgs::default(), None).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn file_values_are_read_and_flags_override_them() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(
            &path,
            r#"
            steps = 5
            threads = 2

            [system]
            num-waters = 8

            [interactions]
            coulomb-type = "reaction-field"
            rcoulomb = 0.7
            rvdw = 0.7
            "#,
        )
        .unwrap();

        let args = EvaluateArgs {
            config: Some(path),
            waters: Some(27),
            kernel: Some("plain-4x4".to_string()),
            coulomb: Some(CoulombArg::Ewald),
            ..EvaluateArgs::default()
        };
        let config = build_config(&args, Some(3)).unwrap();
        assert_eq!(config.steps, 5);
        assert_eq!(config.threads, 3);
        assert_eq!(config.system.num_waters, 27);
        assert_eq!(config.interactions.rcoulomb, 0.7);
        assert_eq!(config.interactions.coulomb_type, CoulombInteraction::Ewald);
        assert_eq!(config.kernel.kernel_type, KernelType::Plain4x4);
    }

    #[test]
    fn set_values_override_flags() {
        let args = EvaluateArgs {
            steps: Some(2),
            ..args_with(&[
                "steps=9",
                "interactions.rcoulomb=1.1",
                "interactions.rvdw = 1.0",
                "kernel.ewald-exclusion=analytical",
                "lambda=[0.25]",
                "fep.sc-alpha=0.5",
            ])
        };
        let config = build_config(&args, None).unwrap();
        assert_eq!(config.steps, 9);
        assert_eq!(config.interactions.rcoulomb, 1.1);
        assert_eq!(config.interactions.rvdw, 1.0);
        assert_eq!(config.kernel.ewald_exclusion, EwaldExclusionType::Analytical);
        assert_eq!(config.lambda, vec![0.25]);
        assert_eq!(config.fep.sc_alpha, 0.5);
    }

    #[test]
    fn optional_tables_can_be_created_by_set_values() {
        let config = build_config(&args_with(&["parameters.types=lj.toml"]), None).unwrap();
        let files = config.parameters.unwrap();
        assert_eq!(files.types.to_str(), Some("lj.toml"));
        assert!(files.overrides.is_none());
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        for set in ["interactions.rcutoff=1.0", "steps=many", "steps", "steps.x=1", "=3"] {
            let result = build_config(&args_with(&[set]), None);
            assert!(matches!(result, Err(CliError::Config(_))), "{set}");
        }
    }

    #[test]
    fn unknown_kernel_name_is_an_argument_error() {
        let args = EvaluateArgs {
            kernel: Some("avx-9000".to_string()),
            ..EvaluateArgs::default()
        };
        assert!(matches!(build_config(&args, None), Err(CliError::Argument(_))));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let args = EvaluateArgs {
            config: Some("/nonexistent/run.toml".into()),
            ..EvaluateArgs::default()
        };
        assert!(matches!(build_config(&args, None), Err(CliError::ConfigFile(_))));
    }
}
