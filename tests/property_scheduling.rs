mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use proptest::prelude::*;
use woom::engine::RunMode;
use woom::iter::cycle::{gen_cycles, CycleSpec, Freq};
use woom::store::MemoryJobStore;
use woom_test_utils::builders::{ConfigBuilder, TaskBuilder};
use woom_test_utils::fake_host::FakeHost;

// Acyclic by construction: task i only depends on tasks 0..i.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        let set: HashSet<usize> =
                            deps.into_iter().filter(|_| i > 0).map(|d| d % i.max(1)).collect();
                        let mut v: Vec<usize> = set.into_iter().collect();
                        v.sort();
                        v
                    })
                    .collect()
            },
        )
    })
}

proptest! {
    #[test]
    fn cycles_are_contiguous_and_cover_the_range(
        begin_day in 0i64..365,
        days in 1i64..60,
        step in 1i64..10,
    ) {
        let origin = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let begin = origin + TimeDelta::days(begin_day);
        let end = begin + TimeDelta::days(days);
        let spec = CycleSpec {
            begin: Some(begin),
            end: Some(end),
            freq: Some(format!("{step}D").parse::<Freq>().unwrap()),
            ..CycleSpec::default()
        };
        let seq = gen_cycles(&spec).unwrap();

        let cycles: Vec<_> = seq.iter().collect();
        prop_assert_eq!(cycles.first().unwrap().begin, begin);
        prop_assert_eq!(cycles.last().unwrap().end, end);
        for pair in cycles.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].begin);
            prop_assert!(pair[0].begin < pair[0].end);
        }
        prop_assert_eq!(cycles.len() as i64, (days + step - 1) / step);

        let (first, last) = (cycles[0], cycles[cycles.len() - 1]);
        prop_assert!(first.is_first && seq.prev(first).is_none());
        prop_assert!(last.is_last && seq.next(last).is_none());
        for c in &cycles[..cycles.len() - 1] {
            prop_assert!(!c.is_last);
            prop_assert_eq!(seq.next(c).and_then(|n| seq.prev(n)), Some(*c));
        }
    }

    #[test]
    fn dependencies_are_submitted_before_dependents(deps in dag_strategy(8)) {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ConfigBuilder::new(dir.path());
        for (i, task_deps) in deps.iter().enumerate() {
            let mut task = TaskBuilder::new(&format!("echo {i}"));
            for d in task_deps {
                task = task.after(&format!("t{d}"));
            }
            builder = builder.task(&format!("t{i}"), task.build());
        }
        let host = FakeHost::new("local").into_arc();
        let store = Arc::new(MemoryJobStore::new());
        let wf = common::workflow(builder.build(), host.clone(), store);

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let report = rt.block_on(wf.run(RunMode::default())).unwrap();

        prop_assert!(report.is_success());
        let order = host.submitted();
        prop_assert_eq!(order.len(), deps.len());
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        for (i, task_deps) in deps.iter().enumerate() {
            for d in task_deps {
                let (dep_name, task_name) = (format!("t{d}"), format!("t{i}"));
                prop_assert!(pos(&dep_name) < pos(&task_name));
            }
        }
    }
}
