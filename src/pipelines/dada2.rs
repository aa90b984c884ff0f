use std::sync::Arc;

use log::info;
use regex::Regex;

use crate::config::defs::{
    PipelineError, PipelineParams, RunConfig, ABUNDANCE_DIR, ABUNDANCE_SUFFIX, FILTERED_DIR,
    FILTER_SCRIPT, INFERENCE_SCRIPT, MERGED_ABUNDANCE, MERGED_ABUNDANCE_ID, MERGED_ABUNDANCE_MAP,
    MERGED_TAXONOMY, RSCRIPT_TAG, TAXA_ABUNDANCES, TAXONOMY_DIR, TAXONOMY_SCRIPT, TAXONOMY_SUFFIX,
};
use crate::exec::execute;
use crate::graph::{
    build_graph, discover_samples, BuiltinOp, StageAction, StageDescriptor, StageKind,
};
use crate::utils::command::check_tool_versions;

pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    println!("\n-------------\n DADA2\n-------------\n");

    check_tool_versions()
        .await
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

    for reference in [&config.params.taxonomy_file, &config.params.species_file] {
        let resolved = if reference.is_absolute() {
            reference.clone()
        } else {
            config.cwd.join(reference)
        };
        if !resolved.exists() {
            return Err(PipelineError::InvalidConfig(format!(
                "reference file not found: {}",
                resolved.display()
            )));
        }
    }

    let samples = discover_samples(&config.cwd, config.params.paired)?;
    if samples.is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "no *.fastq.1.gz files found in {}",
            config.cwd.display()
        )));
    }
    info!(
        "{} input file(s) across {} sample(s)",
        samples.len(),
        samples
            .iter()
            .filter(|s| s.role == crate::graph::FileRole::RawRead1)
            .count()
    );

    let stages = stage_descriptors(&config.params)?;
    let graph = build_graph(&stages, &samples)?;
    info!(
        "task graph: {} task(s), {} edge(s)",
        graph.tasks.len(),
        graph.edges.len()
    );

    let report = execute(&graph, config.clone()).await?;
    report.log_summary();

    let failed = report.failed_count();
    if failed > 0 {
        return Err(PipelineError::TasksFailed(failed));
    }
    info!("final table written to {}", TAXA_ABUNDANCES);
    Ok(())
}

/// The DADA2 stage set, in declaration order. Filter, inference and
/// taxonomy assignment are external R scripts; the cross-sample merge,
/// identifier and definitive-table steps run in process but are ordinary
/// graph tasks so resumption treats them like any other stage.
pub fn stage_descriptors(params: &PipelineParams) -> Result<Vec<StageDescriptor>, PipelineError> {
    let script = |name: &str| params.scripts_dir.join(name).to_string_lossy().into_owned();
    let re = |pattern: &str| {
        Regex::new(pattern)
            .map_err(|e| PipelineError::InvalidConfig(format!("bad stage pattern: {}", e)))
    };

    let mut filter_args = vec![script(FILTER_SCRIPT), "--infile={input}".to_string()];
    if params.paired {
        filter_args.push("--paired".to_string());
    }
    filter_args.extend([
        format!("--maxN={}", params.max_n),
        format!("--maxEE={}", params.max_ee),
        format!("--truncQ={}", params.trunc_q),
        format!("--truncLen={}", params.trunc_len),
        format!("--filtered-directory={}", FILTERED_DIR),
    ]);
    let mut filter_outputs = vec![format!("{}/${{1}}.fastq.1.gz", FILTERED_DIR)];
    let mut filter_extra = Vec::new();
    if params.paired {
        filter_outputs.push(format!("{}/${{1}}.fastq.2.gz", FILTERED_DIR));
        filter_extra.push("${1}.fastq.2.gz".to_string());
    }

    let mut inference_args = vec![script(INFERENCE_SCRIPT), "--filtF={input}".to_string()];
    let mut inference_extra = Vec::new();
    if params.paired {
        inference_args.push("--filtR={input2}".to_string());
        inference_extra.push(format!("{}/${{1}}.fastq.2.gz", FILTERED_DIR));
    }
    inference_args.extend([
        format!("--nreads={}", params.nreads),
        "--outdir={outdir}".to_string(),
    ]);

    Ok(vec![
        StageDescriptor {
            name: "filter_and_trim".to_string(),
            kind: StageKind::Transform {
                pattern: re(r"^([^/]+)\.fastq\.1\.gz$")?,
                outputs: filter_outputs,
                extra_inputs: filter_extra,
            },
            action: StageAction::External {
                program: RSCRIPT_TAG.to_string(),
                args: filter_args,
                gunzip_inputs: true,
                memory: None,
            },
        },
        StageDescriptor {
            name: "sample_inference".to_string(),
            kind: StageKind::Transform {
                pattern: re(&format!(r"^{}/(.+)\.fastq\.1\.gz$", regex::escape(FILTERED_DIR)))?,
                outputs: vec![format!("{}/${{1}}_seq_abundance.tsv", ABUNDANCE_DIR)],
                extra_inputs: inference_extra,
            },
            action: StageAction::External {
                program: RSCRIPT_TAG.to_string(),
                args: inference_args,
                gunzip_inputs: false,
                memory: None,
            },
        },
        StageDescriptor {
            name: "assign_taxonomy".to_string(),
            kind: StageKind::Transform {
                pattern: re(&format!(
                    "^{}/(.+){}$",
                    regex::escape(ABUNDANCE_DIR),
                    regex::escape(ABUNDANCE_SUFFIX)
                ))?,
                outputs: vec![format!("{}/${{1}}{}", TAXONOMY_DIR, TAXONOMY_SUFFIX)],
                extra_inputs: Vec::new(),
            },
            action: StageAction::External {
                program: RSCRIPT_TAG.to_string(),
                args: vec![
                    script(TAXONOMY_SCRIPT),
                    "--seqfile={input}".to_string(),
                    format!("--training-set={}", params.taxonomy_file.display()),
                    format!("--species-file={}", params.species_file.display()),
                    "-o".to_string(),
                    "{output}".to_string(),
                ],
                gunzip_inputs: false,
                memory: Some(params.taxonomy_memory.clone()),
            },
        },
        StageDescriptor {
            name: "merge_abundance".to_string(),
            kind: StageKind::Merge {
                collect: re(&format!(
                    "^{}/.+{}$",
                    regex::escape(ABUNDANCE_DIR),
                    regex::escape(ABUNDANCE_SUFFIX)
                ))?,
                outputs: vec![MERGED_ABUNDANCE.to_string()],
            },
            action: StageAction::Builtin(BuiltinOp::MergeAbundance),
        },
        StageDescriptor {
            name: "merge_taxonomy".to_string(),
            kind: StageKind::Merge {
                collect: re(&format!(
                    "^{}/.+{}$",
                    regex::escape(TAXONOMY_DIR),
                    regex::escape(TAXONOMY_SUFFIX)
                ))?,
                outputs: vec![MERGED_TAXONOMY.to_string()],
            },
            action: StageAction::Builtin(BuiltinOp::MergeTaxonomy),
        },
        StageDescriptor {
            name: "add_identifiers".to_string(),
            kind: StageKind::Transform {
                pattern: re(&format!("^{}$", regex::escape(MERGED_ABUNDANCE)))?,
                outputs: vec![
                    MERGED_ABUNDANCE_ID.to_string(),
                    MERGED_ABUNDANCE_MAP.to_string(),
                ],
                extra_inputs: Vec::new(),
            },
            action: StageAction::Builtin(BuiltinOp::AssignIdentifiers),
        },
        StageDescriptor {
            name: "definitive_table".to_string(),
            kind: StageKind::Merge {
                collect: re(&format!(
                    "^({}|{}|{})$",
                    regex::escape(MERGED_ABUNDANCE_MAP),
                    regex::escape(MERGED_TAXONOMY),
                    regex::escape(MERGED_ABUNDANCE_ID)
                ))?,
                outputs: vec![TAXA_ABUNDANCES.to_string()],
            },
            action: StageAction::Builtin(BuiltinOp::BuildDefinitive),
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_graph, FileRole, SampleFile};

    fn params(paired: bool) -> PipelineParams {
        PipelineParams {
            paired,
            max_n: "0".to_string(),
            max_ee: if paired { "2,2" } else { "2" }.to_string(),
            trunc_q: "2".to_string(),
            trunc_len: if paired { "240,160" } else { "240" }.to_string(),
            nreads: 1000,
            taxonomy_file: "train.fa.gz".into(),
            species_file: "species.fa.gz".into(),
            taxonomy_memory: "4G".to_string(),
            scripts_dir: "scripts".into(),
        }
    }

    fn paired_samples(names: &[&str]) -> Vec<SampleFile> {
        let mut files = Vec::new();
        for name in names {
            files.push(SampleFile {
                path: format!("{}.fastq.1.gz", name),
                sample: name.to_string(),
                role: FileRole::RawRead1,
            });
            files.push(SampleFile {
                path: format!("{}.fastq.2.gz", name),
                sample: name.to_string(),
                role: FileRole::RawRead2,
            });
        }
        files
    }

    #[test]
    fn paired_two_sample_graph_shape() {
        let stages = stage_descriptors(&params(true)).unwrap();
        let graph = build_graph(&stages, &paired_samples(&["s1", "s2"])).unwrap();

        // 3 per-sample stages x 2 samples + 4 merge-side tasks
        assert_eq!(graph.tasks.len(), 10);

        let final_task = graph.tasks.last().unwrap();
        assert_eq!(final_task.stage, "definitive_table");
        assert_eq!(final_task.outputs, vec![TAXA_ABUNDANCES]);
        assert_eq!(final_task.inputs.len(), 3);

        let merge_ab = graph
            .tasks
            .iter()
            .find(|t| t.stage == "merge_abundance")
            .unwrap();
        assert_eq!(
            merge_ab.inputs,
            vec![
                "abundance.dir/s1_seq_abundance.tsv",
                "abundance.dir/s2_seq_abundance.tsv"
            ]
        );

        // filter tasks take both mates and declare both filtered outputs
        let filter = graph
            .tasks
            .iter()
            .find(|t| t.stage == "filter_and_trim")
            .unwrap();
        assert_eq!(filter.inputs, vec!["s1.fastq.1.gz", "s1.fastq.2.gz"]);
        assert_eq!(
            filter.outputs,
            vec!["filtered.dir/s1.fastq.1.gz", "filtered.dir/s1.fastq.2.gz"]
        );

        graph.topo_order().unwrap();
    }

    #[test]
    fn single_end_graph_has_no_mates() {
        let stages = stage_descriptors(&params(false)).unwrap();
        let samples = vec![SampleFile {
            path: "s1.fastq.1.gz".to_string(),
            sample: "s1".to_string(),
            role: FileRole::RawRead1,
        }];
        let graph = build_graph(&stages, &samples).unwrap();
        let filter = graph
            .tasks
            .iter()
            .find(|t| t.stage == "filter_and_trim")
            .unwrap();
        assert_eq!(filter.inputs, vec!["s1.fastq.1.gz"]);
        assert_eq!(filter.outputs, vec!["filtered.dir/s1.fastq.1.gz"]);
    }

    #[test]
    fn taxonomy_stage_does_not_match_merged_table() {
        let stages = stage_descriptors(&params(false)).unwrap();
        let samples = vec![SampleFile {
            path: "s1.fastq.1.gz".to_string(),
            sample: "s1".to_string(),
            role: FileRole::RawRead1,
        }];
        let graph = build_graph(&stages, &samples).unwrap();
        // merged_abundance.tsv must not spawn an assign_taxonomy task
        let taxonomy_tasks: Vec<_> = graph
            .tasks
            .iter()
            .filter(|t| t.stage == "assign_taxonomy")
            .collect();
        assert_eq!(taxonomy_tasks.len(), 1);
        assert_eq!(
            taxonomy_tasks[0].inputs,
            vec!["abundance.dir/s1_seq_abundance.tsv"]
        );
    }
}
