use std::path::Path;

use regex::Regex;

use crate::config::defs::{PipelineError, FASTQ1_SUFFIX, FASTQ2_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    RawRead1,
    RawRead2,
}

/// A raw input file tagged with its sample name. Paths are kept relative to
/// the run directory so stage patterns stay position-independent.
#[derive(Debug, Clone)]
pub struct SampleFile {
    pub path: String,
    pub sample: String,
    pub role: FileRole,
}

/// Scans the run directory for `<sample>.fastq.1.gz` files. Samples are
/// sorted by name so every downstream ordering is independent of directory
/// iteration order. In paired mode a missing read-2 mate is fatal.
pub fn discover_samples(dir: &Path, paired: bool) -> Result<Vec<SampleFile>, PipelineError> {
    let mut read1_names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(FASTQ1_SUFFIX) {
            read1_names.push(name);
        }
    }
    read1_names.sort();

    let mut files = Vec::new();
    for name in read1_names {
        let sample = name
            .strip_suffix(FASTQ1_SUFFIX)
            .unwrap_or(&name)
            .to_string();
        files.push(SampleFile {
            path: name.clone(),
            sample: sample.clone(),
            role: FileRole::RawRead1,
        });
        if paired {
            let mate = format!("{}{}", sample, FASTQ2_SUFFIX);
            if !dir.join(&mate).exists() {
                return Err(PipelineError::InvalidConfig(format!(
                    "no second read for {}: expected {}",
                    name, mate
                )));
            }
            files.push(SampleFile {
                path: mate,
                sample,
                role: FileRole::RawRead2,
            });
        }
    }
    Ok(files)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinOp {
    MergeAbundance,
    MergeTaxonomy,
    AssignIdentifiers,
    BuildDefinitive,
}

/// What a task does when it runs: spawn an external program, or run one of
/// the in-process table operations. External argument strings may carry
/// `{input}`/`{input2}`/`{output}`/`{outdir}`/`{tmpdir}` tokens which the
/// executor substitutes per task.
#[derive(Debug, Clone)]
pub enum StageAction {
    External {
        program: String,
        args: Vec<String>,
        /// Stage gzipped inputs decompressed into the scratch directory
        /// before substitution.
        gunzip_inputs: bool,
        /// Exported to the child as JOB_MEMORY when set.
        memory: Option<String>,
    },
    Builtin(BuiltinOp),
}

/// How a stage maps upstream files to tasks.
///
/// `Transform` creates one task per candidate file matching `pattern`;
/// `outputs` and `extra_inputs` are capture-group templates (`${1}`) expanded
/// against the match. `Merge` creates a single task collecting every
/// candidate matching `collect`, in first-seen order.
#[derive(Debug)]
pub enum StageKind {
    Transform {
        pattern: Regex,
        outputs: Vec<String>,
        extra_inputs: Vec<String>,
    },
    Merge {
        collect: Regex,
        outputs: Vec<String>,
    },
}

/// One declared processing step, consumed by the graph builder. Plain data:
/// no registration framework, no import-time magic.
#[derive(Debug)]
pub struct StageDescriptor {
    pub name: String,
    pub kind: StageKind,
    pub action: StageAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn discovery_sorts_and_names_samples() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zeta.fastq.1.gz", "alpha.fastq.1.gz", "notes.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }

        let files = discover_samples(dir.path(), false).unwrap();
        let samples: Vec<&str> = files.iter().map(|f| f.sample.as_str()).collect();
        assert_eq!(samples, vec!["alpha", "zeta"]);
        assert!(files.iter().all(|f| f.role == FileRole::RawRead1));
    }

    #[test]
    fn paired_discovery_requires_mate() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("s1.fastq.1.gz")).unwrap();

        let err = discover_samples(dir.path(), true).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(err.to_string().contains("s1.fastq.2.gz"));

        File::create(dir.path().join("s1.fastq.2.gz")).unwrap();
        let files = discover_samples(dir.path(), true).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].role, FileRole::RawRead2);
    }
}
