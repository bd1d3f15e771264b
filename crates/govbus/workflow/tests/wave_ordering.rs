//! Property tests: every node lands in exactly one wave, after all of its
//! dependencies, and execution respects that order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use govbus_observability::MemoryAuditLedger;
use govbus_types::{IntegrityAnchor, CONSTITUTIONAL_HASH};
use govbus_workflow::*;
use proptest::prelude::*;
use serde_json::Value;

/// Random acyclic edge sets: node `i` may only depend on nodes `< i`.
fn arb_dag() -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1usize..12).prop_flat_map(|n| {
        (0..n)
            .map(|i| prop::collection::btree_set(0..i.max(1), 0..=i.min(3)))
            .collect::<Vec<_>>()
            .prop_map(|deps| {
                deps.into_iter()
                    .enumerate()
                    .map(|(i, d)| d.into_iter().filter(|dep| *dep < i).collect())
                    .collect()
            })
    })
}

fn build(deps: &[BTreeSet<usize>]) -> WorkflowDag {
    let mut builder = WorkflowDagBuilder::new("generated");
    for (i, d) in deps.iter().enumerate() {
        builder = builder.node(
            DagNode::new(
                format!("n{i:02}"),
                action_fn(|_| async { Ok(Value::Null) }),
            )
            .depends_on(d.iter().map(|dep| format!("n{dep:02}"))),
        );
    }
    builder.build().expect("generated graphs are acyclic")
}

proptest! {
    #[test]
    fn waves_respect_dependencies(deps in arb_dag()) {
        let dag = build(&deps);

        let mut wave_of = BTreeMap::new();
        for (index, wave) in dag.waves().iter().enumerate() {
            let mut sorted = wave.clone();
            sorted.sort();
            prop_assert_eq!(&sorted, wave);
            for id in wave {
                prop_assert!(wave_of.insert(id.clone(), index).is_none());
            }
        }
        prop_assert_eq!(wave_of.len(), deps.len());

        for node in dag.nodes() {
            for dep in &node.dependencies {
                prop_assert!(wave_of[dep] < wave_of[&node.id]);
            }
        }
    }

    #[test]
    fn execution_completes_dependencies_first(deps in arb_dag()) {
        let dag = build(&deps);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let executor = DagExecutor::new(
            ExecutorConfig::default(),
            IntegrityAnchor::default(),
            Arc::new(MemoryAuditLedger::new()),
        )
        .unwrap();

        let result = runtime.block_on(executor.execute(&dag, ExecutionContext::new(CONSTITUTIONAL_HASH)));
        prop_assert!(result.is_completed());

        let position: BTreeMap<&String, usize> = result
            .completion_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        prop_assert_eq!(position.len(), deps.len());
        for node in dag.nodes() {
            for dep in &node.dependencies {
                prop_assert!(position[dep] < position[&node.id]);
            }
        }
    }
}
