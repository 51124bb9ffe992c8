// src/dag/expand.rs

//! Expansion of tasks over cycles and members into concrete jobs, and
//! resolution of task dependencies into job dependencies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{TaskConfig, TasksConfig, WorkflowConfig};

/// Identity of one job: `(task, cycle token, member id)`.
///
/// Axes a task does not vary over are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub task: String,
    pub cycle: Option<String>,
    pub member: Option<u32>,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task)?;
        if let Some(cycle) = &self.cycle {
            write!(f, "[{cycle}]")?;
        }
        if let Some(member) = self.member {
            write!(f, "#{member}")?;
        }
        Ok(())
    }
}

/// A job with the positions of its cycle and member in the iteration spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    pub key: JobKey,
    pub cycle_index: Option<usize>,
    pub member_index: Option<usize>,
}

/// Whether `task` varies over cycles in this workflow.
pub fn is_cycling(task: &TaskConfig, workflow: &WorkflowConfig) -> bool {
    task.cycles && workflow.cycles.is_some()
}

/// Whether `task` varies over members in this workflow.
pub fn is_ensemble(task: &TaskConfig, workflow: &WorkflowConfig) -> bool {
    task.members && workflow.members.is_some()
}

fn cycle_axis(task: &TaskConfig, workflow: &WorkflowConfig) -> Vec<Option<usize>> {
    match (&workflow.cycles, task.cycles) {
        (Some(seq), true) => (0..seq.len()).map(Some).collect(),
        _ => vec![None],
    }
}

fn member_axis(task: &TaskConfig, workflow: &WorkflowConfig) -> Vec<Option<usize>> {
    match (&workflow.members, task.members) {
        (Some(members), true) => (0..members.len()).map(Some).collect(),
        _ => vec![None],
    }
}

/// Build the job for a task at given axis positions.
pub fn job_at(
    task: &TaskConfig,
    workflow: &WorkflowConfig,
    cycle_index: Option<usize>,
    member_index: Option<usize>,
) -> JobInstance {
    let cycle = cycle_index.and_then(|i| {
        workflow
            .cycles
            .as_ref()
            .and_then(|seq| seq.get(i))
            .map(|c| c.token.clone())
    });
    let member = member_index.and_then(|i| {
        workflow
            .members
            .as_ref()
            .and_then(|m| m.get(i))
            .map(|m| m.id)
    });
    JobInstance {
        key: JobKey {
            task: task.name.clone(),
            cycle,
            member,
        },
        cycle_index,
        member_index,
    }
}

/// Expand a task into its jobs, in increasing cycle then member order.
///
/// Axes the task does not vary over are expanded against a singleton.
pub fn expand(task: &TaskConfig, workflow: &WorkflowConfig) -> Vec<JobInstance> {
    let cycles = cycle_axis(task, workflow);
    let members = member_axis(task, workflow);
    let mut jobs = Vec::with_capacity(cycles.len() * members.len());
    for &c in &cycles {
        for &m in &members {
            jobs.push(job_at(task, workflow, c, m));
        }
    }
    jobs
}

/// Jobs that must succeed before `job` may be submitted.
///
/// - Both tasks cycle: the dependency's job at the same cycle shifted by
///   `cycle_offset`; an offset falling outside the sequence is satisfied.
/// - Only the dependency cycles: all its cycles.
/// - Same rules on the member axis, without offsets.
/// - Non-independent cycles: every cycling job of the previous cycle.
pub fn job_dependencies(
    job: &JobInstance,
    tasks: &TasksConfig,
    workflow: &WorkflowConfig,
) -> Vec<JobKey> {
    let Some(task) = tasks.get(&job.key.task) else {
        return Vec::new();
    };
    let ncycles = workflow.cycles.as_ref().map_or(0, |s| s.len());

    let mut deps = Vec::new();
    for dep in task.after.iter() {
        let Some(dep_task) = tasks.get(&dep.task) else {
            continue;
        };

        let cycles: Vec<Option<usize>> = match (job.cycle_index, is_cycling(dep_task, workflow)) {
            (Some(ci), true) => {
                let target = ci as i64 + dep.cycle_offset;
                if target < 0 || target >= ncycles as i64 {
                    continue;
                }
                vec![Some(target as usize)]
            }
            (None, true) => cycle_axis(dep_task, workflow),
            (_, false) => vec![None],
        };

        let members: Vec<Option<usize>> =
            match (job.member_index, is_ensemble(dep_task, workflow)) {
                (Some(mi), true) => vec![Some(mi)],
                (None, true) => member_axis(dep_task, workflow),
                (_, false) => vec![None],
            };

        for &c in &cycles {
            for &m in &members {
                deps.push(job_at(dep_task, workflow, c, m).key);
            }
        }
    }

    if !workflow.indep_cycles {
        if let Some(ci) = job.cycle_index.filter(|&ci| ci > 0) {
            for (_, other) in tasks.iter() {
                if !is_cycling(other, workflow) {
                    continue;
                }
                for m in member_axis(other, workflow) {
                    deps.push(job_at(other, workflow, Some(ci - 1), m).key);
                }
            }
        }
    }

    deps.sort();
    deps.dedup();
    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawTasksConfig, RawWorkflowConfig};

    fn setup(workflow: &str, tasks: &str) -> (WorkflowConfig, TasksConfig) {
        let raw_wf: RawWorkflowConfig = toml::from_str(workflow).unwrap();
        let raw_tasks: RawTasksConfig = toml::from_str(tasks).unwrap();
        (
            WorkflowConfig::try_from(raw_wf).unwrap(),
            TasksConfig::try_from(raw_tasks).unwrap(),
        )
    }

    const WF: &str = r#"
[cycles]
begin = "2024-01-01"
end = "2024-01-04"
freq = "1D"
indep = true

[ensemble]
size = 2
"#;

    #[test]
    fn expansion_orders_cycles_then_members() {
        let (wf, tasks) = setup(WF, "[task.a]\ncommandline = \"a\"\n");
        let jobs = expand(tasks.get("a").unwrap(), &wf);
        assert_eq!(jobs.len(), 6);
        assert_eq!(jobs[0].key.member, Some(1));
        assert_eq!(jobs[1].key.member, Some(2));
        assert_eq!(jobs[0].key.cycle, jobs[1].key.cycle);
        assert!(jobs[1].key.cycle < jobs[2].key.cycle);
    }

    #[test]
    fn non_varying_axes_are_singletons() {
        let (wf, tasks) = setup(
            WF,
            "[task.a]\ncommandline = \"a\"\ncycles = false\nmembers = false\n",
        );
        let jobs = expand(tasks.get("a").unwrap(), &wf);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].key.cycle, None);
        assert_eq!(jobs[0].key.member, None);
    }

    #[test]
    fn same_cycle_and_member_dependency() {
        let (wf, tasks) = setup(
            WF,
            r#"
[task.a]
commandline = "a"
[task.b]
commandline = "b"
after = ["a"]
"#,
        );
        let b_jobs = expand(tasks.get("b").unwrap(), &wf);
        let deps = job_dependencies(&b_jobs[3], &tasks, &wf);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].task, "a");
        assert_eq!(deps[0].cycle, b_jobs[3].key.cycle);
        assert_eq!(deps[0].member, b_jobs[3].key.member);
    }

    #[test]
    fn previous_cycle_offset_out_of_range_is_satisfied() {
        let (wf, tasks) = setup(
            WF,
            r#"
[task.model]
commandline = "m"
members = false
after = [{ task = "model", cycle_offset = -1 }]
"#,
        );
        let jobs = expand(tasks.get("model").unwrap(), &wf);
        assert!(job_dependencies(&jobs[0], &tasks, &wf).is_empty());
        let deps = job_dependencies(&jobs[1], &tasks, &wf);
        assert_eq!(deps, vec![jobs[0].key.clone()]);
    }

    #[test]
    fn non_cycling_dependent_waits_for_all_cycles() {
        let (wf, tasks) = setup(
            WF,
            r#"
[task.a]
commandline = "a"
members = false
[task.report]
commandline = "r"
cycles = false
members = false
after = ["a"]
"#,
        );
        let report = &expand(tasks.get("report").unwrap(), &wf)[0];
        assert_eq!(job_dependencies(report, &tasks, &wf).len(), 3);
    }

    #[test]
    fn sequential_cycles_add_previous_cycle_jobs() {
        let wf_src = WF.replace("indep = true", "indep = false");
        let (wf, tasks) = setup(
            &wf_src,
            r#"
[task.a]
commandline = "a"
[task.setup]
commandline = "s"
cycles = false
"#,
        );
        let jobs = expand(tasks.get("a").unwrap(), &wf);
        // Second cycle, first member: depends on both members of cycle 0.
        let deps = job_dependencies(&jobs[2], &tasks, &wf);
        assert_eq!(deps.len(), 2);
        assert!(deps.iter().all(|k| k.cycle == jobs[0].key.cycle));
    }
}
