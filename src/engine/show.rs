// src/engine/show.rs

//! Plain-text reports printed by `woom show`.

use crate::engine::Workflow;
use crate::errors::Result;
use crate::store::JobRecord;

/// Left-aligned columns, two spaces apart.
fn table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.len());
            }
        }
    }

    let mut out = String::new();
    push_row(&mut out, header.iter().copied(), &widths);
    for row in rows {
        push_row(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let text = cells
        .zip(widths.iter())
        .map(|(c, &w)| format!("{c:<w$}"))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(text.trim_end());
    out.push('\n');
}

fn opt(value: Option<impl ToString>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// App, host, tasks in submission order, cycles and ensemble.
pub fn overview(workflow: &Workflow) -> String {
    let config = workflow.config();
    let wf = &config.workflow;
    let app = wf.app.path();
    let mut lines = vec![
        format!("workflow dir: {}", config.workflow_dir.display()),
        format!("app: {}", if app.is_empty() { "-" } else { app.as_str() }),
        format!("host: {}", workflow.host_name()),
        String::new(),
        "tasks:".to_string(),
    ];
    for name in workflow.graph().order() {
        let deps: Vec<String> = workflow
            .graph()
            .dependencies_of(name)
            .iter()
            .map(|d| match d.cycle_offset {
                0 => d.task.clone(),
                off => format!("{}[{off}]", d.task),
            })
            .collect();
        if deps.is_empty() {
            lines.push(format!("  {name}"));
        } else {
            lines.push(format!("  {name} <- {}", deps.join(", ")));
        }
    }

    lines.push(String::new());
    match &wf.cycles {
        Some(cycles) => {
            let mode = if wf.indep_cycles { "independent" } else { "sequential" };
            lines.push(format!("cycles ({}, {mode}):", cycles.len()));
            lines.extend(cycles.iter().map(|c| format!("  {}", c.label)));
        }
        None => lines.push("cycles: none".to_string()),
    }

    lines.push(String::new());
    match &wf.members {
        Some(members) => {
            let labels: Vec<String> = members.iter().map(|m| m.label()).collect();
            lines.push(format!("ensemble ({}): {}", members.len(), labels.join(" ")));
        }
        None => lines.push("ensemble: none".to_string()),
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// One line per record; `running` keeps only live jobs.
pub fn status(records: &[JobRecord], running: bool) -> String {
    let rows: Vec<Vec<String>> = records
        .iter()
        .filter(|r| !running || r.status.is_active())
        .map(|r| {
            vec![
                r.key.task.clone(),
                opt(r.key.cycle.as_ref()),
                opt(r.key.member),
                r.host.clone(),
                opt(r.external_id.as_ref()),
                r.status.to_string(),
                opt(r.exit_code),
                r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    table(
        &[
            "TASK", "CYCLE", "MEMBER", "HOST", "JOBID", "STATUS", "EXIT", "UPDATED",
        ],
        &rows,
    )
}

/// Directory each job runs in.
pub fn run_dirs(workflow: &Workflow) -> Result<String> {
    let mut rows = Vec::new();
    for job in workflow.jobs() {
        let loc = workflow.locations(&job)?;
        rows.push(vec![
            job.key().task.clone(),
            opt(job.key().cycle.as_ref()),
            opt(job.key().member),
            loc.work_dir.display().to_string(),
        ]);
    }
    Ok(table(&["TASK", "CYCLE", "MEMBER", "RUN_DIR"], &rows))
}

/// Declared artifacts of each job and whether they exist.
pub fn artifacts(workflow: &Workflow) -> Result<String> {
    let mut rows = Vec::new();
    for job in workflow.jobs() {
        let loc = workflow.locations(&job)?;
        for (name, path) in loc.artifacts {
            rows.push(vec![
                job.key().task.clone(),
                opt(job.key().cycle.as_ref()),
                opt(job.key().member),
                name,
                if path.exists() { "yes" } else { "no" }.to_string(),
                path.display().to_string(),
            ]);
        }
    }
    Ok(table(
        &["TASK", "CYCLE", "MEMBER", "ARTIFACT", "EXISTS", "PATH"],
        &rows,
    ))
}
