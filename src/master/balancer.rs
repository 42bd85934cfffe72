use crate::ipc::messages::{PoolEntry, PoolMap};
use std::collections::BTreeMap;

/// Per-contract usage record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractUsage {
    pub current_hits: u64,
    pub last_share: f64,
    pub assigned: Vec<usize>,
}

/// Result of one balancing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceOutcome {
    /// Contract, worker pairs that gained an assignment this pass.
    pub added: Vec<(String, usize)>,
    /// Contract, worker pairs that lost their assignment and must be told.
    pub removals: Vec<(String, usize)>,
    /// Snapshot broadcast to every deserializer after the pass.
    pub pool_map: PoolMap,
    /// Load placed on each pool worker, for observability.
    pub worker_shares: Vec<f64>,
}

/// Reassigns ds-pool workers to contracts from observed hit shares.
///
/// Every pass greedily fills workers in pool order under a per-worker cap of
/// `1 / pool_size`, so the assignment is deterministic and stable while the
/// workload is stable.
#[derive(Debug)]
pub struct UsageBalancer {
    pool_size: usize,
    total_hits: u64,
    contracts: BTreeMap<String, ContractUsage>,
}

impl UsageBalancer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            total_hits: 0,
            contracts: BTreeMap::new(),
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    pub fn contract(&self, code: &str) -> Option<&ContractUsage> {
        self.contracts.get(code)
    }

    /// Accumulates one `contract_usage_report` from a deserializer.
    pub fn record_report(&mut self, total_hits: u64, data: &BTreeMap<String, u64>) {
        self.total_hits += total_hits;
        for (code, hits) in data {
            self.contracts.entry(code.clone()).or_default().current_hits += hits;
        }
    }

    /// Runs one balancing pass; returns `None` when there is nothing to do.
    pub fn rebalance(&mut self) -> Option<RebalanceOutcome> {
        if self.pool_size == 0 || self.total_hits == 0 || self.contracts.is_empty() {
            return None;
        }

        let worker_max_pct = 1.0 / self.pool_size as f64;
        let mut worker_shares = vec![0.0f64; self.pool_size];
        let mut added = Vec::new();
        let mut removals = Vec::new();

        for (code, usage) in self.contracts.iter_mut() {
            let share = usage.current_hits as f64 / self.total_hits as f64;

            let mut proposed = Vec::new();
            let mut used = 0.0f64;
            for (worker, load) in worker_shares.iter_mut().enumerate() {
                if share - used <= f64::EPSILON {
                    break;
                }
                if *load >= worker_max_pct {
                    continue;
                }
                let remaining = share - used;
                let available = worker_max_pct - *load;
                let delta = remaining.min(available);
                *load += delta;
                used += delta;
                proposed.push(worker);
            }

            for worker in &proposed {
                if !usage.assigned.contains(worker) {
                    added.push((code.clone(), *worker));
                }
            }
            for worker in &usage.assigned {
                if !proposed.contains(worker) {
                    removals.push((code.clone(), *worker));
                }
            }

            usage.assigned = proposed;
            usage.last_share = share;
        }

        let pool_map = self
            .contracts
            .iter()
            .map(|(code, usage)| {
                (
                    code.clone(),
                    PoolEntry {
                        hits: usage.current_hits,
                        share: usage.last_share,
                        workers: usage.assigned.clone(),
                    },
                )
            })
            .collect();

        Some(RebalanceOutcome {
            added,
            removals,
            pool_map,
            worker_shares,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs
            .iter()
            .map(|(code, hits)| (code.to_string(), *hits))
            .collect()
    }

    #[test]
    fn two_worker_pool_splits_a_dominant_contract() {
        let mut balancer = UsageBalancer::new(2);
        balancer.record_report(100, &report(&[("X", 70), ("Y", 30)]));

        let outcome = balancer.rebalance().expect("pass should run");

        let x = balancer.contract("X").unwrap();
        let y = balancer.contract("Y").unwrap();
        assert_eq!(x.assigned, vec![0, 1], "X overflows worker 0 into worker 1");
        assert_eq!(y.assigned, vec![1], "Y lands on the remaining capacity");
        assert!((x.last_share - 0.7).abs() < 1e-9);
        assert!((y.last_share - 0.3).abs() < 1e-9);

        for load in &outcome.worker_shares {
            assert!(
                *load <= 0.5 + 1e-9,
                "no worker may exceed the 1/pool_size cap"
            );
        }
        let total: f64 = outcome.worker_shares.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "shares are conserved");
        assert!(outcome.removals.is_empty());
    }

    #[test]
    fn repeat_pass_with_identical_usage_changes_nothing() {
        let mut balancer = UsageBalancer::new(2);
        balancer.record_report(100, &report(&[("X", 70), ("Y", 30)]));

        let first = balancer.rebalance().expect("first pass");
        assert!(!first.added.is_empty());

        let second = balancer.rebalance().expect("second pass");
        assert!(second.added.is_empty(), "no new assignments to log");
        assert!(second.removals.is_empty(), "no workers to notify");
        assert_eq!(second.pool_map, first.pool_map);
    }

    #[test]
    fn shifted_usage_produces_removals_for_departed_workers() {
        let mut balancer = UsageBalancer::new(2);
        balancer.record_report(100, &report(&[("X", 70), ("Y", 30)]));
        balancer.rebalance().expect("first pass");

        // Y's traffic explodes; B-tree order still fills X first, but the
        // cumulative shares shift X off worker 1.
        balancer.record_report(900, &report(&[("Y", 900)]));
        let outcome = balancer.rebalance().expect("second pass");

        let x = balancer.contract("X").unwrap();
        let y = balancer.contract("Y").unwrap();
        assert_eq!(x.assigned, vec![0]);
        assert_eq!(y.assigned, vec![0, 1]);
        assert!(
            outcome.removals.contains(&("X".to_string(), 1)),
            "worker 1 must be told to drop X"
        );
        assert!(outcome.added.contains(&("Y".to_string(), 0)));
    }

    #[test]
    fn empty_state_short_circuits() {
        let mut balancer = UsageBalancer::new(2);
        assert!(balancer.rebalance().is_none(), "no hits yet");

        let mut no_pool = UsageBalancer::new(0);
        no_pool.record_report(10, &report(&[("X", 10)]));
        assert!(no_pool.rebalance().is_none(), "no pool workers to balance");
    }

    #[test]
    fn cap_bounds_every_worker_under_many_contracts() {
        let mut balancer = UsageBalancer::new(4);
        balancer.record_report(
            1_000,
            &report(&[("a", 400), ("b", 250), ("c", 200), ("d", 100), ("e", 50)]),
        );

        let outcome = balancer.rebalance().expect("pass should run");
        let cap = 0.25;
        for load in &outcome.worker_shares {
            assert!(*load <= cap + 1e-9);
        }
        let total: f64 = outcome.worker_shares.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);

        for code in ["a", "b", "c", "d", "e"] {
            assert!(
                !balancer.contract(code).unwrap().assigned.is_empty(),
                "{code} should be assigned somewhere"
            );
        }
    }

    #[test]
    fn pool_map_snapshot_carries_hits_shares_and_workers() {
        let mut balancer = UsageBalancer::new(2);
        balancer.record_report(10, &report(&[("X", 10)]));
        let outcome = balancer.rebalance().expect("pass should run");

        let entry = &outcome.pool_map["X"];
        assert_eq!(entry.hits, 10);
        assert!((entry.share - 1.0).abs() < 1e-9);
        assert_eq!(entry.workers, vec![0, 1]);
    }
}
