use std::collections::HashMap;
use std::path::PathBuf;
use lazy_static::lazy_static;
use thiserror::Error;

use crate::cli::Arguments;

// External software
pub const GZIP_EXT: &str = "gz";
pub const RSCRIPT_TAG: &str = "Rscript";

// Stage scripts
pub const FILTER_SCRIPT: &str = "dada2_filter_and_trim.R";
pub const INFERENCE_SCRIPT: &str = "dada2_sample_inference.R";
pub const TAXONOMY_SCRIPT: &str = "dada2_assign_taxonomy.R";

lazy_static! {
    pub static ref TOOL_VERSIONS: HashMap<&'static str, f32> = {
        let mut m = HashMap::new();
        m.insert(RSCRIPT_TAG, 4.0);

        m
    };
}

// Input file naming
pub const FASTQ1_SUFFIX: &str = ".fastq.1.gz";
pub const FASTQ2_SUFFIX: &str = ".fastq.2.gz";

// Stage output tree, relative to the run directory
pub const FILTERED_DIR: &str = "filtered.dir";
pub const ABUNDANCE_DIR: &str = "abundance.dir";
pub const TAXONOMY_DIR: &str = "taxonomy.dir";

pub const ABUNDANCE_SUFFIX: &str = "_seq_abundance.tsv";
pub const TAXONOMY_SUFFIX: &str = "_seq_taxonomy.tsv";

pub const MERGED_ABUNDANCE: &str = "abundance.dir/merged_abundance.tsv";
pub const MERGED_TAXONOMY: &str = "taxonomy.dir/merged_taxonomy.tsv";
pub const MERGED_ABUNDANCE_ID: &str = "abundance.dir/merged_abundance_id.tsv";
pub const MERGED_ABUNDANCE_MAP: &str = "abundance.dir/merged_abundance_id.map";
pub const TAXA_ABUNDANCES: &str = "abundance.dir/taxa_abundances.tsv";

pub const TAXONOMY_HEADER: [&str; 8] = [
    "sequence", "Kingdom", "Phylum", "Class", "Order", "Family", "Genus", "Species",
];

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cycle detected in task graph at stage '{0}'")]
    CycleDetected(String),

    #[error("Output '{0}' is declared by more than one task")]
    AmbiguousOutput(String),

    #[error("Tool execution failed for {tool}: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("No entry for key '{key}' in {table}")]
    MissingJoinKey { key: String, table: String },

    #[error("Malformed table {path}: {reason}")]
    TableFormat { path: String, reason: String },

    #[error("IO error: {0}")]
    IOError(String),

    #[error("{0} task(s) failed")]
    TasksFailed(usize),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}

/// Filter/inference/taxonomy thresholds, validated once before any task is
/// built. Comma-pair options keep their raw string form; the stage scripts
/// take the pair verbatim.
#[derive(Debug, Clone, Default)]
pub struct PipelineParams {
    pub paired: bool,
    pub max_n: String,
    pub max_ee: String,
    pub trunc_q: String,
    pub trunc_len: String,
    pub nreads: usize,
    pub taxonomy_file: PathBuf,
    pub species_file: PathBuf,
    pub taxonomy_memory: String,
    pub scripts_dir: PathBuf,
}

impl PipelineParams {
    pub fn from_args(args: &Arguments) -> Result<Self, PipelineError> {
        let max_n = required(&args.max_n, "--max-n")?;
        let max_ee = required(&args.max_ee, "--max-ee")?;
        let trunc_q = required(&args.trunc_q, "--trunc-q")?;
        let trunc_len = required(&args.trunc_len, "--trunc-len")?;

        check_arity(&max_ee, "--max-ee", args.paired)?;
        check_arity(&trunc_len, "--trunc-len", args.paired)?;
        check_numeric(&max_n, "--max-n")?;
        check_numeric(&trunc_q, "--trunc-q")?;

        let taxonomy_file = required(&args.taxonomy_file, "--taxonomy-file")?;
        let species_file = required(&args.species_file, "--species-file")?;

        Ok(PipelineParams {
            paired: args.paired,
            max_n,
            max_ee,
            trunc_q,
            trunc_len,
            nreads: args.nreads,
            taxonomy_file: PathBuf::from(taxonomy_file),
            species_file: PathBuf::from(species_file),
            taxonomy_memory: args.taxonomy_memory.clone(),
            scripts_dir: PathBuf::from(&args.scripts_dir),
        })
    }
}

fn required(value: &Option<String>, flag: &str) -> Result<String, PipelineError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(PipelineError::InvalidConfig(format!(
            "{} must be specified",
            flag
        ))),
    }
}

/// Paired data takes exactly two comma-separated values, single-end exactly one.
fn check_arity(value: &str, flag: &str, paired: bool) -> Result<(), PipelineError> {
    let expected = if paired { 2 } else { 1 };
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != expected || parts.iter().any(|p| p.trim().is_empty()) {
        return Err(PipelineError::InvalidConfig(format!(
            "specify {} value(s) for {} ({} data)",
            expected,
            flag,
            if paired { "paired" } else { "single-end" }
        )));
    }
    for part in parts {
        check_numeric(part, flag)?;
    }
    Ok(())
}

fn check_numeric(value: &str, flag: &str) -> Result<(), PipelineError> {
    value.trim().parse::<f64>().map_err(|_| {
        PipelineError::InvalidConfig(format!("{}: '{}' is not numeric", flag, value))
    })?;
    Ok(())
}

pub struct RunConfig {
    pub cwd: PathBuf,
    pub args: Arguments,
    pub params: PipelineParams,
    pub jobs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Arguments {
        Arguments {
            max_n: Some("0".to_string()),
            max_ee: Some("2".to_string()),
            trunc_q: Some("2".to_string()),
            trunc_len: Some("240".to_string()),
            taxonomy_file: Some("train.fa.gz".to_string()),
            species_file: Some("species.fa.gz".to_string()),
            ..Arguments::default()
        }
    }

    #[test]
    fn single_end_params_validate() {
        let params = PipelineParams::from_args(&base_args()).unwrap();
        assert!(!params.paired);
        assert_eq!(params.trunc_len, "240");
    }

    #[test]
    fn paired_requires_two_values() {
        let mut args = base_args();
        args.paired = true;
        let err = PipelineParams::from_args(&args).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));

        args.max_ee = Some("2,2".to_string());
        args.trunc_len = Some("240,160".to_string());
        let params = PipelineParams::from_args(&args).unwrap();
        assert_eq!(params.trunc_len, "240,160");
    }

    #[test]
    fn single_end_rejects_pair() {
        let mut args = base_args();
        args.trunc_len = Some("240,160".to_string());
        assert!(PipelineParams::from_args(&args).is_err());
    }

    #[test]
    fn missing_threshold_is_fatal() {
        let mut args = base_args();
        args.max_n = None;
        assert!(PipelineParams::from_args(&args).is_err());
    }

    #[test]
    fn non_numeric_threshold_is_fatal() {
        let mut args = base_args();
        args.trunc_q = Some("high".to_string());
        assert!(PipelineParams::from_args(&args).is_err());
    }
}
