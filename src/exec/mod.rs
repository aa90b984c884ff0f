use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, error, info, warn};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::defs::{PipelineError, RunConfig, ABUNDANCE_SUFFIX, GZIP_EXT};
use crate::graph::{BuiltinOp, StageAction, Task, TaskGraph, TaskStatus};
use crate::utils::definitive::build_definitive;
use crate::utils::file::{decompress_gz, is_gzipped};
use crate::utils::ids::assign_identifiers;
use crate::utils::merge::{merge_tables, merge_taxonomy, sample_label};
use crate::utils::table::KeyedTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Outputs were already newer than every input; nothing ran.
    Fresh,
    Ran,
}

#[derive(Debug)]
pub struct TaskReport {
    pub id: usize,
    pub stage: String,
    pub outputs: Vec<String>,
    pub status: TaskStatus,
    pub ran: bool,
    pub stderr: Option<String>,
}

#[derive(Debug)]
pub struct ExecutionReport {
    pub tasks: Vec<TaskReport>,
}

impl ExecutionReport {
    pub fn failed_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Skipped)
            .count()
    }

    /// Tasks that actually ran, as opposed to being skipped as fresh.
    pub fn executed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.ran).count()
    }

    pub fn log_summary(&self) {
        info!(
            "run summary: {} task(s), {} executed, {} fresh, {} failed, {} skipped downstream",
            self.tasks.len(),
            self.executed_count(),
            self.tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Done && !t.ran)
                .count(),
            self.failed_count(),
            self.skipped_count()
        );
        for task in &self.tasks {
            match task.status {
                TaskStatus::Failed => {
                    error!("[{}] {}: FAILED", task.id, task.stage);
                    if let Some(stderr) = &task.stderr {
                        for line in stderr.lines() {
                            error!("[{}]   {}", task.id, line);
                        }
                    }
                }
                TaskStatus::Skipped => {
                    warn!("[{}] {}: skipped, upstream failure", task.id, task.stage)
                }
                _ => debug!("[{}] {}: {:?}", task.id, task.stage, task.status),
            }
        }
    }
}

/// Walks the graph in dependency order, running ready tasks concurrently up
/// to the configured job limit. A failed task poisons its transitive
/// dependents; independent branches keep going.
pub async fn execute(
    graph: &TaskGraph,
    config: Arc<RunConfig>,
) -> Result<ExecutionReport, PipelineError> {
    graph.topo_order()?;
    let deps = graph.dependencies();
    let dependents = graph.dependents();
    let n = graph.tasks.len();

    let mut status = vec![TaskStatus::Pending; n];
    let mut ran = vec![false; n];
    let mut stderr_of: Vec<Option<String>> = (0..n).map(|_| None).collect();
    let mut unmet: Vec<usize> = deps.iter().map(Vec::len).collect();

    let semaphore = Arc::new(Semaphore::new(config.jobs.max(1)));
    let mut join_set: JoinSet<(usize, Result<TaskOutcome, PipelineError>)> = JoinSet::new();

    for id in 0..n {
        if unmet[id] == 0 {
            spawn_task(
                &mut join_set,
                graph.tasks[id].clone(),
                config.clone(),
                semaphore.clone(),
            );
            status[id] = TaskStatus::Running;
        }
    }

    while let Some(joined) = join_set.join_next().await {
        let (id, outcome) =
            joined.map_err(|e| PipelineError::IOError(format!("task join failed: {}", e)))?;
        match outcome {
            Ok(TaskOutcome::Fresh) => {
                status[id] = TaskStatus::Done;
                debug!(
                    "[{}] {}: outputs up to date, not re-running",
                    id, graph.tasks[id].stage
                );
            }
            Ok(TaskOutcome::Ran) => {
                status[id] = TaskStatus::Done;
                ran[id] = true;
                info!("[{}] {}: done", id, graph.tasks[id].stage);
            }
            Err(e) => {
                status[id] = TaskStatus::Failed;
                error!("[{}] {}: {}", id, graph.tasks[id].stage, e);
                stderr_of[id] = Some(match e {
                    PipelineError::ToolExecution { error, .. } => error,
                    other => other.to_string(),
                });
                poison_dependents(id, &dependents, &mut status);
            }
        }
        if status[id] == TaskStatus::Done {
            for &d in &dependents[id] {
                unmet[d] -= 1;
                if unmet[d] == 0 && status[d] == TaskStatus::Pending {
                    spawn_task(
                        &mut join_set,
                        graph.tasks[d].clone(),
                        config.clone(),
                        semaphore.clone(),
                    );
                    status[d] = TaskStatus::Running;
                }
            }
        }
    }

    let tasks = graph
        .tasks
        .iter()
        .map(|t| TaskReport {
            id: t.id,
            stage: t.stage.clone(),
            outputs: t.outputs.clone(),
            status: status[t.id],
            ran: ran[t.id],
            stderr: stderr_of[t.id].take(),
        })
        .collect();
    Ok(ExecutionReport { tasks })
}

fn spawn_task(
    join_set: &mut JoinSet<(usize, Result<TaskOutcome, PipelineError>)>,
    task: Task,
    config: Arc<RunConfig>,
    semaphore: Arc<Semaphore>,
) {
    join_set.spawn(async move {
        let id = task.id;
        let permit = match semaphore.acquire_owned().await {
            Ok(p) => p,
            Err(e) => return (id, Err(PipelineError::IOError(e.to_string()))),
        };
        let result = run_task(&task, &config).await;
        drop(permit);
        (id, result)
    });
}

fn poison_dependents(id: usize, dependents: &[Vec<usize>], status: &mut [TaskStatus]) {
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        for &d in &dependents[current] {
            if status[d] == TaskStatus::Pending {
                status[d] = TaskStatus::Skipped;
                stack.push(d);
            }
        }
    }
}

async fn run_task(task: &Task, config: &RunConfig) -> Result<TaskOutcome, PipelineError> {
    if is_fresh(task, &config.cwd)? {
        return Ok(TaskOutcome::Fresh);
    }
    for out in &task.outputs {
        if let Some(parent) = Path::new(out).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(config.cwd.join(parent))?;
            }
        }
    }
    match &task.action {
        StageAction::External {
            program,
            args,
            gunzip_inputs,
            memory,
        } => run_external(task, config, program, args, *gunzip_inputs, memory.as_deref()).await,
        StageAction::Builtin(op) => run_builtin(op, task, config),
    }
}

/// A task is fresh when every output exists and the oldest output is no
/// older than the newest input. Missing inputs never count as fresh; the
/// task runs and reports its own failure.
fn is_fresh(task: &Task, root: &Path) -> Result<bool, PipelineError> {
    if task.outputs.is_empty() {
        return Ok(false);
    }
    let mut newest_input: Option<SystemTime> = None;
    for input in &task.inputs {
        let meta = match fs::metadata(root.join(input)) {
            Ok(m) => m,
            Err(_) => return Ok(false),
        };
        let modified = meta.modified()?;
        newest_input = Some(newest_input.map_or(modified, |t| t.max(modified)));
    }
    let mut oldest_output: Option<SystemTime> = None;
    for output in &task.outputs {
        let meta = match fs::metadata(root.join(output)) {
            Ok(m) => m,
            Err(_) => return Ok(false),
        };
        let modified = meta.modified()?;
        oldest_output = Some(oldest_output.map_or(modified, |t| t.min(modified)));
    }
    match (newest_input, oldest_output) {
        (Some(input), Some(output)) => Ok(output >= input),
        (None, Some(_)) => Ok(true),
        _ => Ok(false),
    }
}

async fn run_external(
    task: &Task,
    config: &RunConfig,
    program: &str,
    arg_templates: &[String],
    gunzip_inputs: bool,
    memory: Option<&str>,
) -> Result<TaskOutcome, PipelineError> {
    // Exclusive scratch, removed on drop whether the tool succeeds or not.
    let scratch = TempDir::new()?;

    let mut inputs: Vec<String> = task.inputs.clone();
    if gunzip_inputs {
        let mut staging: Vec<(PathBuf, PathBuf)> = Vec::new();
        for input in inputs.iter_mut() {
            let src = config.cwd.join(input.as_str());
            // staging is decided by the gzip magic, not the file name; a
            // plain or missing input goes to the tool as-is
            if !matches!(is_gzipped(&src), Ok(true)) {
                continue;
            }
            let name = Path::new(input.as_str())
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| input.clone());
            let dst = scratch
                .path()
                .join(name.trim_end_matches(&format!(".{}", GZIP_EXT)));
            staging.push((src, dst.clone()));
            *input = dst.to_string_lossy().into_owned();
        }
        tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
            for (src, dst) in &staging {
                decompress_gz(src, dst)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| PipelineError::IOError(e.to_string()))??;
    }

    let outdir = Path::new(&task.outputs[0])
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    let rendered = render_args(
        arg_templates,
        &inputs,
        &task.outputs,
        &outdir,
        &scratch.path().to_string_lossy(),
    );
    debug!("[{}] {} {}", task.id, program, rendered.join(" "));

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(&rendered).current_dir(&config.cwd);
    if let Some(mem) = memory {
        cmd.env("JOB_MEMORY", mem);
    }
    let output = cmd.output().await.map_err(|e| PipelineError::ToolExecution {
        tool: program.to_string(),
        error: format!("failed to spawn: {}. Is {} installed?", e, program),
    })?;

    if !output.status.success() {
        return Err(PipelineError::ToolExecution {
            tool: task.stage.clone(),
            error: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(TaskOutcome::Ran)
}

fn render_args(
    templates: &[String],
    inputs: &[String],
    outputs: &[String],
    outdir: &str,
    tmpdir: &str,
) -> Vec<String> {
    templates
        .iter()
        .map(|template| {
            let mut arg = template.clone();
            for (i, input) in inputs.iter().enumerate() {
                let token = if i == 0 {
                    "{input}".to_string()
                } else {
                    format!("{{input{}}}", i + 1)
                };
                arg = arg.replace(&token, input);
            }
            for (i, output) in outputs.iter().enumerate() {
                let token = if i == 0 {
                    "{output}".to_string()
                } else {
                    format!("{{output{}}}", i + 1)
                };
                arg = arg.replace(&token, output);
            }
            arg = arg.replace("{outdir}", outdir);
            arg.replace("{tmpdir}", tmpdir)
        })
        .collect()
}

fn find_path<'a, F>(paths: &'a [String], what: &str, pred: F) -> Result<&'a String, PipelineError>
where
    F: Fn(&str) -> bool,
{
    paths
        .iter()
        .find(|p| pred(p))
        .ok_or_else(|| PipelineError::InvalidConfig(format!("no {} among {:?}", what, paths)))
}

fn run_builtin(op: &BuiltinOp, task: &Task, config: &RunConfig) -> Result<TaskOutcome, PipelineError> {
    match op {
        BuiltinOp::MergeAbundance => {
            let mut tables = Vec::new();
            for input in &task.inputs {
                let path = config.cwd.join(input);
                let label = sample_label(&path, ABUNDANCE_SUFFIX);
                tables.push((label, KeyedTable::read_tsv(&path)?));
            }
            let merged = merge_tables(&tables, "0");
            merged.write_tsv(&config.cwd.join(&task.outputs[0]))?;
        }
        BuiltinOp::MergeTaxonomy => {
            let mut tables = Vec::new();
            for input in &task.inputs {
                tables.push(KeyedTable::read_tsv(&config.cwd.join(input))?);
            }
            let merged = merge_taxonomy(&tables);
            merged.write_tsv(&config.cwd.join(&task.outputs[0]))?;
        }
        BuiltinOp::AssignIdentifiers => {
            let table = KeyedTable::read_tsv(&config.cwd.join(&task.inputs[0]))?;
            let (map, rewritten) = assign_identifiers(&table);
            let map_out = find_path(&task.outputs, "identifier map output", |p| p.ends_with(".map"))?;
            let table_out = find_path(&task.outputs, "rewritten table output", |p| p.ends_with(".tsv"))?;
            map.write_tsv(&config.cwd.join(map_out))?;
            rewritten.write_tsv(&config.cwd.join(table_out))?;
        }
        BuiltinOp::BuildDefinitive => {
            let map_in = find_path(&task.inputs, "identifier map", |p| p.ends_with(".map"))?;
            let tax_in = find_path(&task.inputs, "merged taxonomy table", |p| {
                p.contains("taxonomy") && p.ends_with(".tsv")
            })?;
            let abundance_in = find_path(&task.inputs, "id-rewritten abundance table", |p| {
                p.ends_with("_id.tsv")
            })?;
            let map = KeyedTable::read_tsv(&config.cwd.join(map_in))?;
            let taxonomy = KeyedTable::read_tsv(&config.cwd.join(tax_in))?;
            let abundance = KeyedTable::read_tsv(&config.cwd.join(abundance_in))?;
            let definitive = build_definitive(&map, &taxonomy, &abundance)?;
            definitive.write_tsv(&config.cwd.join(&task.outputs[0]))?;
        }
    }
    Ok(TaskOutcome::Ran)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Arguments;
    use crate::config::defs::PipelineParams;
    use crate::graph::TaskGraph;

    fn test_config(dir: &Path) -> Arc<RunConfig> {
        Arc::new(RunConfig {
            cwd: dir.to_path_buf(),
            args: Arguments::default(),
            params: PipelineParams::default(),
            jobs: 2,
        })
    }

    fn sh_task(id: usize, stage: &str, cmd: &str, inputs: &[&str], outputs: &[&str]) -> Task {
        Task {
            id,
            stage: stage.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            action: StageAction::External {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), cmd.to_string()],
                gunzip_inputs: false,
                memory: None,
            },
        }
    }

    #[test]
    fn render_substitutes_tokens() {
        let args = render_args(
            &[
                "--infile={input}".to_string(),
                "--mate={input2}".to_string(),
                "--out={output}".to_string(),
                "--dir={outdir}".to_string(),
            ],
            &["a.fq".to_string(), "b.fq".to_string()],
            &["out.dir/a.tsv".to_string()],
            "out.dir",
            "/tmp/x",
        );
        assert_eq!(
            args,
            vec!["--infile=a.fq", "--mate=b.fq", "--out=out.dir/a.tsv", "--dir=out.dir"]
        );
    }

    #[tokio::test]
    async fn second_run_executes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.txt"), "hello\n")?;
        let config = test_config(dir.path());

        let tasks = vec![sh_task(
            0,
            "upcase",
            "tr a-z A-Z < {input} > {output}",
            &["a.txt"],
            &["out.dir/a.up"],
        )];

        let graph = TaskGraph::from_tasks(tasks.clone())?;
        let report = execute(&graph, config.clone()).await?;
        assert_eq!(report.executed_count(), 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.dir/a.up"))?,
            "HELLO\n"
        );

        let graph = TaskGraph::from_tasks(tasks)?;
        let report = execute(&graph, config).await?;
        assert_eq!(report.executed_count(), 0);
        assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Done));
        Ok(())
    }

    #[tokio::test]
    async fn failure_poisons_dependents_but_not_independents() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());

        let tasks = vec![
            sh_task(0, "broken", "echo boom >&2; exit 3", &[], &["a.out"]),
            sh_task(1, "downstream", "cp {input} {output}", &["a.out"], &["b.out"]),
            sh_task(2, "independent", "echo ok > {output}", &[], &["c.out"]),
        ];
        let graph = TaskGraph::from_tasks(tasks)?;
        let report = execute(&graph, config).await?;

        assert_eq!(report.tasks[0].status, TaskStatus::Failed);
        assert!(report.tasks[0].stderr.as_deref().unwrap_or("").contains("boom"));
        assert_eq!(report.tasks[1].status, TaskStatus::Skipped);
        assert_eq!(report.tasks[2].status, TaskStatus::Done);
        assert_eq!(report.failed_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn stale_output_triggers_rerun() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        std::fs::write(dir.path().join("in.txt"), "one\n")?;

        let tasks = vec![sh_task(
            0,
            "copy",
            "cp {input} {output}",
            &["in.txt"],
            &["out.txt"],
        )];
        let graph = TaskGraph::from_tasks(tasks.clone())?;
        execute(&graph, config.clone()).await?;

        // make the input strictly newer than the output
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        let file = std::fs::File::options()
            .write(true)
            .open(dir.path().join("in.txt"))?;
        file.set_modified(later)?;

        let graph = TaskGraph::from_tasks(tasks)?;
        let report = execute(&graph, config).await?;
        assert_eq!(report.executed_count(), 1);
        Ok(())
    }
}
