//! Property-Based Tests for the Whitelist Store
//!
//! - **Persistence**: saving then loading any valid whitelist yields it back
//! - **Model equivalence**: any sequence of add/remove/consume leaves the
//!   file in the same state as applying it to a plain in-memory whitelist
//! - **Concurrency**: concurrent consumers on disjoint clients each get
//!   exactly `min(attempts, quota)` admissions, and interleaved
//!   add/remove/consume sequences on disjoint clients each match the model

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

use super::entry::{Whitelist, WhitelistEntry};
use super::store::{ConsumeOutcome, WhitelistStore};

#[derive(Debug, Clone)]
enum Op {
    Add(String, u64),
    Remove(String),
    Consume(String),
}

fn arb_client_id() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u8..4).prop_map(|n| format!("10.0.0.{n}")),
        "[a-f0-9:]{2,12}",
    ]
}

fn arb_whitelist() -> impl Strategy<Value = Whitelist> {
    btree_map(arb_client_id(), (any::<u64>(), any::<u64>()), 0..12).prop_map(|map| Whitelist {
        entries: map
            .into_iter()
            .map(|(client_id, (max_requests, used_requests))| WhitelistEntry {
                client_id,
                max_requests,
                used_requests,
            })
            .collect(),
    })
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (arb_client_id(), 0u64..4).prop_map(|(id, n)| Op::Add(id, n)),
        arb_client_id().prop_map(Op::Remove),
        arb_client_id().prop_map(Op::Consume),
    ]
}

/// An operation against a client fixed by the task that runs it
#[derive(Debug, Clone)]
enum ClientOp {
    Add(u64),
    Remove,
    Consume,
}

fn arb_client_op() -> impl Strategy<Value = ClientOp> {
    prop_oneof![
        (0u64..4).prop_map(ClientOp::Add),
        Just(ClientOp::Remove),
        Just(ClientOp::Consume),
    ]
}

impl ClientOp {
    fn for_client(&self, id: &str) -> Op {
        match self {
            ClientOp::Add(n) => Op::Add(id.to_string(), *n),
            ClientOp::Remove => Op::Remove(id.to_string()),
            ClientOp::Consume => Op::Consume(id.to_string()),
        }
    }
}

async fn apply_to_store(store: &WhitelistStore, op: &Op) -> Option<ConsumeOutcome> {
    match op {
        Op::Add(id, n) => {
            store.add(id, *n).await.unwrap();
            None
        }
        Op::Remove(id) => {
            store.remove(id).await.unwrap();
            None
        }
        Op::Consume(id) => Some(store.try_consume(id).await.unwrap()),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

async fn create_store(dir: &TempDir) -> WhitelistStore {
    WhitelistStore::initialize(dir.path().join("whitelist.json"))
        .await
        .unwrap()
}

/// Reference semantics of a single operation
fn apply_to_model(model: &mut Whitelist, op: &Op) -> Option<ConsumeOutcome> {
    match op {
        Op::Add(id, n) => {
            model.insert(WhitelistEntry::new(id.clone(), *n));
            None
        }
        Op::Remove(id) => {
            model.remove(id);
            None
        }
        Op::Consume(id) => Some(match model.get_mut(id) {
            None => ConsumeOutcome::NotWhitelisted,
            Some(entry) if entry.used_requests < entry.max_requests => {
                entry.used_requests += 1;
                ConsumeOutcome::Accepted {
                    used_requests: entry.used_requests,
                    max_requests: entry.max_requests,
                }
            }
            Some(entry) => ConsumeOutcome::QuotaExceeded {
                used_requests: entry.used_requests,
                max_requests: entry.max_requests,
            },
        }),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_save_load_round_trip(state in arb_whitelist()) {
        let loaded = runtime().block_on(async {
            let dir = TempDir::new().unwrap();
            let store = create_store(&dir).await;
            store.save(&state).await.unwrap();
            store.load().await.unwrap()
        });
        prop_assert_eq!(loaded, state);
    }

    #[test]
    fn prop_store_matches_model(ops in vec(arb_op(), 0..40)) {
        let mut model = Whitelist::new();
        let expected: Vec<_> = ops.iter().map(|op| apply_to_model(&mut model, op)).collect();

        let (actual, persisted) = runtime().block_on(async {
            let dir = TempDir::new().unwrap();
            let store = create_store(&dir).await;
            let mut actual = Vec::new();
            for op in &ops {
                actual.push(apply_to_store(&store, op).await);
            }
            (actual, store.load().await.unwrap())
        });

        prop_assert_eq!(actual, expected);
        prop_assert_eq!(persisted, model);
    }

    #[test]
    fn prop_concurrent_consumers_get_exact_quota(
        quotas in vec((0u64..6, 0usize..10), 1..5)
    ) {
        let results = runtime().block_on(async {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(create_store(&dir).await);
            for (i, (quota, _)) in quotas.iter().enumerate() {
                store.add(&format!("client-{i}"), *quota).await.unwrap();
            }

            let mut handles = Vec::new();
            for (i, (_, attempts)) in quotas.iter().enumerate() {
                for _ in 0..*attempts {
                    let store = Arc::clone(&store);
                    let id = format!("client-{i}");
                    handles.push(tokio::spawn(async move {
                        (i, store.try_consume(&id).await.unwrap())
                    }));
                }
            }

            let mut accepted = vec![0u64; quotas.len()];
            for handle in handles {
                let (i, outcome) = handle.await.unwrap();
                if matches!(outcome, ConsumeOutcome::Accepted { .. }) {
                    accepted[i] += 1;
                }
            }
            (accepted, store.load().await.unwrap())
        });

        let (accepted, persisted) = results;
        for (i, (quota, attempts)) in quotas.iter().enumerate() {
            let expected = (*quota).min(*attempts as u64);
            prop_assert_eq!(accepted[i], expected);
            let entry = persisted.get(&format!("client-{i}")).unwrap();
            prop_assert_eq!(entry.used_requests, expected);
        }
    }

    #[test]
    fn prop_interleaved_clients_match_model(
        scripts in vec(vec(arb_client_op(), 0..12), 1..5)
    ) {
        // Each client's script runs sequentially in its own task; tasks interleave
        let mut model = Whitelist::new();
        let expected: Vec<Vec<_>> = scripts
            .iter()
            .enumerate()
            .map(|(i, script)| {
                let id = format!("client-{i}");
                script
                    .iter()
                    .map(|op| apply_to_model(&mut model, &op.for_client(&id)))
                    .collect()
            })
            .collect();

        let (actual, persisted) = runtime().block_on(async {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(create_store(&dir).await);

            let handles: Vec<_> = scripts
                .iter()
                .enumerate()
                .map(|(i, script)| {
                    let store = Arc::clone(&store);
                    let ops: Vec<Op> = script
                        .iter()
                        .map(|op| op.for_client(&format!("client-{i}")))
                        .collect();
                    tokio::spawn(async move {
                        let mut results = Vec::new();
                        for op in &ops {
                            results.push(apply_to_store(&store, op).await);
                        }
                        results
                    })
                })
                .collect();

            let mut actual = Vec::new();
            for handle in handles {
                actual.push(handle.await.unwrap());
            }
            (actual, store.load().await.unwrap())
        });

        prop_assert_eq!(actual, expected);
        prop_assert_eq!(persisted.len(), model.len());
        for entry in &model.entries {
            prop_assert_eq!(persisted.get(&entry.client_id), Some(entry));
        }
    }
}
