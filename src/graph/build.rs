use std::collections::HashMap;

use log::debug;

use crate::config::defs::PipelineError;
use crate::graph::stage::{SampleFile, StageAction, StageDescriptor, StageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    /// Not run because an upstream producer failed.
    Skipped,
}

/// One concrete unit of work. Immutable once built; status lives with the
/// executor, not here.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: usize,
    pub stage: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub action: StageAction,
}

#[derive(Debug)]
pub struct TaskGraph {
    pub tasks: Vec<Task>,
    /// (producer, consumer) pairs.
    pub edges: Vec<(usize, usize)>,
}

impl TaskGraph {
    /// Derives edges from output/input path equality and enforces that no
    /// two tasks claim the same output.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, PipelineError> {
        let mut producer: HashMap<&str, usize> = HashMap::new();
        for task in &tasks {
            for out in &task.outputs {
                if producer.insert(out.as_str(), task.id).is_some() {
                    return Err(PipelineError::AmbiguousOutput(out.clone()));
                }
            }
        }

        let mut edges = Vec::new();
        for task in &tasks {
            for inp in &task.inputs {
                if let Some(&from) = producer.get(inp.as_str()) {
                    if !edges.contains(&(from, task.id)) {
                        edges.push((from, task.id));
                    }
                }
            }
        }
        Ok(TaskGraph { tasks, edges })
    }

    pub fn dependencies(&self) -> Vec<Vec<usize>> {
        let mut deps = vec![Vec::new(); self.tasks.len()];
        for &(from, to) in &self.edges {
            deps[to].push(from);
        }
        deps
    }

    pub fn dependents(&self) -> Vec<Vec<usize>> {
        let mut deps = vec![Vec::new(); self.tasks.len()];
        for &(from, to) in &self.edges {
            deps[from].push(to);
        }
        deps
    }

    /// Kahn topological sort; ready tasks are taken in id order so the
    /// result is deterministic. Fails if any dependency cycle remains.
    pub fn topo_order(&self) -> Result<Vec<usize>, PipelineError> {
        let deps = self.dependencies();
        let mut indegree: Vec<usize> = deps.iter().map(Vec::len).collect();
        let dependents = self.dependents();

        let mut ready: Vec<usize> = (0..self.tasks.len())
            .filter(|&id| indegree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(id) = ready.first().copied() {
            ready.remove(0);
            order.push(id);
            for &d in &dependents[id] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    // keep id order stable
                    let pos = ready.partition_point(|&r| r < d);
                    ready.insert(pos, d);
                }
            }
        }

        if order.len() != self.tasks.len() {
            let stuck = (0..self.tasks.len())
                .find(|id| !order.contains(id))
                .map(|id| self.tasks[id].stage.clone())
                .unwrap_or_default();
            return Err(PipelineError::CycleDetected(stuck));
        }
        Ok(order)
    }
}

/// Expands stage descriptors against the discovered raw files into a
/// concrete task graph.
///
/// Candidates for each stage's pattern are the raw files plus the outputs of
/// every earlier stage, in declaration order; that order also fixes merge
/// input order.
pub fn build_graph(
    stages: &[StageDescriptor],
    raw_files: &[SampleFile],
) -> Result<TaskGraph, PipelineError> {
    let mut candidates: Vec<String> = raw_files.iter().map(|f| f.path.clone()).collect();
    let mut tasks: Vec<Task> = Vec::new();

    for stage in stages {
        let mut stage_outputs: Vec<String> = Vec::new();
        match &stage.kind {
            StageKind::Transform {
                pattern,
                outputs,
                extra_inputs,
            } => {
                for candidate in &candidates {
                    if !pattern.is_match(candidate) {
                        continue;
                    }
                    let mut inputs = vec![candidate.clone()];
                    for template in extra_inputs {
                        inputs.push(pattern.replace(candidate, template.as_str()).into_owned());
                    }
                    let outs: Vec<String> = outputs
                        .iter()
                        .map(|t| pattern.replace(candidate, t.as_str()).into_owned())
                        .collect();
                    stage_outputs.extend(outs.iter().cloned());
                    tasks.push(Task {
                        id: tasks.len(),
                        stage: stage.name.clone(),
                        inputs,
                        outputs: outs,
                        action: stage.action.clone(),
                    });
                }
            }
            StageKind::Merge { collect, outputs } => {
                let inputs: Vec<String> = candidates
                    .iter()
                    .filter(|c| collect.is_match(c))
                    .cloned()
                    .collect();
                if inputs.is_empty() {
                    return Err(PipelineError::InvalidConfig(format!(
                        "stage '{}' collected no inputs",
                        stage.name
                    )));
                }
                stage_outputs.extend(outputs.iter().cloned());
                tasks.push(Task {
                    id: tasks.len(),
                    stage: stage.name.clone(),
                    inputs,
                    outputs: outputs.clone(),
                    action: stage.action.clone(),
                });
            }
        }
        debug!(
            "stage '{}' contributed {} output file(s)",
            stage.name,
            stage_outputs.len()
        );
        candidates.extend(stage_outputs);
    }

    let graph = TaskGraph::from_tasks(tasks)?;
    graph.topo_order()?;
    Ok(graph)
}
