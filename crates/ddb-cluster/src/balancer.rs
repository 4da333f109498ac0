use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use ddb_proto::NodeId;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Response-time samples kept per node.
pub const RESPONSE_SAMPLES_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    LeastLoaded,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Strategy::RoundRobin),
            "least_loaded" => Ok(Strategy::LeastLoaded),
            other => Err(format!("unknown load balancing strategy: {other}")),
        }
    }
}

#[derive(Default)]
struct NodeLoad {
    active: u64,
    total: u64,
    samples: VecDeque<f64>,
}

impl NodeLoad {
    fn mean_response_time(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }

    /// `10 * active + mean response time`; lower is better.
    fn score(&self) -> f64 {
        self.active as f64 * 10.0 + self.mean_response_time()
    }
}

#[derive(Default)]
struct LbState {
    index: usize,
    loads: HashMap<NodeId, NodeLoad>,
}

// ---------------------------------------------------------------------------
// LoadBalancer
// ---------------------------------------------------------------------------

/// Read-path node selection. The strategy is fixed at construction; all
/// counters are mutated under one lock with small critical sections.
pub struct LoadBalancer {
    strategy: Strategy,
    state: Mutex<LbState>,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            state: Mutex::new(LbState::default()),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Pick a node from `available` minus `exclude`. Empty candidate set
    /// yields `None`.
    pub fn select(&self, available: &[NodeId], exclude: &[NodeId]) -> Option<NodeId> {
        let mut candidates: Vec<NodeId> = available
            .iter()
            .copied()
            .filter(|id| !exclude.contains(id))
            .collect();
        if candidates.is_empty() {
            warn!("no available nodes for load balancing");
            return None;
        }
        candidates.sort_unstable();
        candidates.dedup();

        let selected = match self.strategy() {
            Strategy::RoundRobin => {
                let mut state = self.state.lock().expect("balancer poisoned");
                let node = candidates[state.index % candidates.len()];
                state.index += 1;
                node
            }
            Strategy::LeastLoaded => {
                let state = self.state.lock().expect("balancer poisoned");
                // Candidates are sorted, so ties go to the lowest id.
                let mut best = candidates[0];
                let mut best_score = f64::INFINITY;
                for id in &candidates {
                    let score = state.loads.get(id).map_or(0.0, NodeLoad::score);
                    if score < best_score {
                        best = *id;
                        best_score = score;
                    }
                }
                best
            }
        };

        debug!("selected node {selected} for read dispatch");
        Some(selected)
    }

    pub fn record_start(&self, node: NodeId) {
        let mut state = self.state.lock().expect("balancer poisoned");
        let load = state.loads.entry(node).or_default();
        load.active += 1;
        load.total += 1;
    }

    pub fn record_end(&self, node: NodeId, elapsed_secs: f64) {
        let mut state = self.state.lock().expect("balancer poisoned");
        let load = state.loads.entry(node).or_default();
        load.active = load.active.saturating_sub(1);
        load.samples.push_back(elapsed_secs);
        while load.samples.len() > RESPONSE_SAMPLES_CAP {
            load.samples.pop_front();
        }
    }

    /// Aggregate statistics as JSON, for status reporting.
    pub fn stats(&self) -> Value {
        let strategy = match self.strategy() {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastLoaded => "least_loaded",
        };
        let state = self.state.lock().expect("balancer poisoned");
        let nodes: serde_json::Map<String, Value> = state
            .loads
            .iter()
            .map(|(id, load)| {
                (
                    id.to_string(),
                    json!({
                        "active_queries": load.active,
                        "total_queries": load.total,
                        "average_response_time": load.mean_response_time(),
                    }),
                )
            })
            .collect();
        json!({
            "strategy": strategy,
            "total_queries_routed": state.loads.values().map(|l| l.total).sum::<u64>(),
            "total_active_queries": state.loads.values().map(|l| l.active).sum::<u64>(),
            "current_round_robin_index": state.index,
            "nodes": nodes,
        })
    }
}
