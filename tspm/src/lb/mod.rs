//! Advisory instance selection for processes running multiple instances. Selection never
//! blocks and never touches the instance table directly: callers pass in a snapshot of
//! candidates and get back the chosen `instance_id`, if any are healthy.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

/// Point-in-time view of one instance, as seen by the load balancer. Built from the
/// `ManagedProcess`/`Monitor` snapshots by the caller on every selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceMetrics {
    pub instance_id: u32,
    pub healthy: bool,
    pub connections: u32,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    Random,
    LeastConnections,
    LeastCpu,
    LeastMemory,
    IpHash,
    Weighted,
}

impl From<crate::spec::LbStrategy> for Strategy {
    fn from(strategy: crate::spec::LbStrategy) -> Self {
        use crate::spec::LbStrategy as Spec;
        match strategy {
            Spec::RoundRobin => Strategy::RoundRobin,
            Spec::Random => Strategy::Random,
            Spec::LeastConnections => Strategy::LeastConnections,
            Spec::LeastCpu => Strategy::LeastCpu,
            Spec::LeastMemory => Strategy::LeastMemory,
            Spec::IpHash => Strategy::IpHash,
            Spec::Weighted => Strategy::Weighted,
        }
    }
}

#[derive(Default)]
struct State {
    round_robin_cursor: usize,
    /// Connection counts tracked regardless of strategy; only `LeastConnections` reads them.
    connections: HashMap<u32, u32>,
    /// Configured base weight per instance, set via `set_weights`/`reset_weights`.
    base_weight: HashMap<u32, u32>,
    /// Remaining weight for the current round; decremented on each `Weighted` pick.
    current_weight: HashMap<u32, i64>,
}

/// Selects among the healthy instances of a single process according to a fixed
/// `Strategy`. One `LoadBalancer` is owned per process; it has no knowledge of other
/// processes.
pub struct LoadBalancer {
    strategy: Strategy,
    state: Mutex<State>,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy, state: Mutex::new(State::default()) }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Sets (or resets) the base weight used by the `Weighted` strategy. Also resets the
    /// current-round remaining weight to match, mirroring the external `reset` the spec
    /// calls for.
    pub fn set_weights(&self, weights: &HashMap<u32, u32>) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.base_weight = weights.clone();
        state.current_weight = weights.iter().map(|(&id, &w)| (id, w as i64)).collect();
    }

    /// Picks one instance among `candidates`. Returns `None` if none are healthy.
    /// `client_ip` is only consulted by the `IpHash` strategy.
    pub fn select(&self, candidates: &[InstanceMetrics], client_ip: Option<IpAddr>) -> Option<u32> {
        let healthy: Vec<&InstanceMetrics> = candidates.iter().filter(|c| c.healthy).collect();
        if healthy.is_empty() {
            return None;
        }

        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        match self.strategy {
            Strategy::RoundRobin => {
                let index = state.round_robin_cursor % healthy.len();
                state.round_robin_cursor = state.round_robin_cursor.wrapping_add(1);
                Some(healthy[index].instance_id)
            }
            Strategy::Random => {
                use rand::Rng;
                let index = rand::thread_rng().gen_range(0..healthy.len());
                Some(healthy[index].instance_id)
            }
            Strategy::LeastConnections => healthy
                .iter()
                .min_by_key(|c| (state.connections.get(&c.instance_id).copied().unwrap_or(0), c.instance_id))
                .map(|c| c.instance_id),
            Strategy::LeastCpu => healthy
                .iter()
                .min_by(|a, b| a.cpu_percent.total_cmp(&b.cpu_percent).then(a.instance_id.cmp(&b.instance_id)))
                .map(|c| c.instance_id),
            Strategy::LeastMemory => {
                healthy.iter().min_by_key(|c| (c.memory_bytes, c.instance_id)).map(|c| c.instance_id)
            }
            Strategy::IpHash => {
                let hash = client_ip.map(hash_ip).unwrap_or(0);
                let index = (hash as usize) % healthy.len();
                Some(healthy[index].instance_id)
            }
            Strategy::Weighted => select_weighted(&mut state, &healthy),
        }
    }

    /// Records a new connection against `instance_id`. Meaningful only to
    /// `LeastConnections`; other strategies ignore the count but it is tracked anyway so
    /// switching strategies at runtime doesn't require re-seeding.
    pub fn record_connection(&self, instance_id: u32) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        *state.connections.entry(instance_id).or_insert(0) += 1;
    }

    pub fn release_connection(&self, instance_id: u32) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(count) = state.connections.get_mut(&instance_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn connection_count(&self, instance_id: u32) -> u32 {
        let state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.connections.get(&instance_id).copied().unwrap_or(0)
    }

    /// Drops bookkeeping for an instance that no longer exists (e.g. after scale-down).
    pub fn forget(&self, instance_id: u32) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.connections.remove(&instance_id);
        state.base_weight.remove(&instance_id);
        state.current_weight.remove(&instance_id);
    }
}

fn select_weighted(state: &mut State, healthy: &[&InstanceMetrics]) -> Option<u32> {
    // Instances with no configured weight default to 1 so an un-weighted pool behaves
    // like round-robin-by-ties.
    for c in healthy {
        state.current_weight.entry(c.instance_id).or_insert_with(|| *state.base_weight.get(&c.instance_id).unwrap_or(&1) as i64);
    }

    let chosen = healthy
        .iter()
        .max_by_key(|c| (state.current_weight.get(&c.instance_id).copied().unwrap_or(1), std::cmp::Reverse(c.instance_id)))
        .map(|c| c.instance_id)?;

    if let Some(weight) = state.current_weight.get_mut(&chosen) {
        *weight = (*weight - 1).max(0);
    }
    Some(chosen)
}

fn hash_ip(ip: IpAddr) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ip.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn metric(id: u32, healthy: bool) -> InstanceMetrics {
        InstanceMetrics { instance_id: id, healthy, connections: 0, cpu_percent: 0.0, memory_bytes: 0 }
    }

    #[test]
    fn round_robin_cycles_and_wraps_around() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let pool = vec![metric(1, true), metric(2, true), metric(3, true)];
        let picks: Vec<u32> = (0..4).map(|_| lb.select(&pool, None).unwrap()).collect();
        assert_eq!(picks, vec![1, 2, 3, 1]);
    }

    #[test]
    fn round_robin_skips_unhealthy_instances() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let pool = vec![metric(1, false), metric(2, true)];
        assert_eq!(lb.select(&pool, None), Some(2));
    }

    #[test]
    fn returns_none_when_nothing_is_healthy() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let pool = vec![metric(1, false), metric(2, false)];
        assert_eq!(lb.select(&pool, None), None);
    }

    #[test]
    fn least_connections_prefers_fewest_and_breaks_ties_by_id() {
        let lb = LoadBalancer::new(Strategy::LeastConnections);
        lb.record_connection(1);
        lb.record_connection(1);
        lb.record_connection(2);
        let pool = vec![metric(1, true), metric(2, true), metric(3, true)];
        assert_eq!(lb.select(&pool, None), Some(3));
    }

    #[test]
    fn least_cpu_breaks_ties_by_lowest_id() {
        let lb = LoadBalancer::new(Strategy::LeastCpu);
        let pool = vec![
            InstanceMetrics { instance_id: 2, healthy: true, connections: 0, cpu_percent: 10.0, memory_bytes: 0 },
            InstanceMetrics { instance_id: 1, healthy: true, connections: 0, cpu_percent: 10.0, memory_bytes: 0 },
        ];
        assert_eq!(lb.select(&pool, None), Some(1));
    }

    #[test]
    fn least_memory_picks_the_lowest_usage() {
        let lb = LoadBalancer::new(Strategy::LeastMemory);
        let pool = vec![
            InstanceMetrics { instance_id: 1, healthy: true, connections: 0, cpu_percent: 0.0, memory_bytes: 4096 },
            InstanceMetrics { instance_id: 2, healthy: true, connections: 0, cpu_percent: 0.0, memory_bytes: 1024 },
        ];
        assert_eq!(lb.select(&pool, None), Some(2));
    }

    #[test]
    fn ip_hash_is_deterministic_for_the_same_client() {
        let lb = LoadBalancer::new(Strategy::IpHash);
        let pool = vec![metric(1, true), metric(2, true), metric(3, true)];
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        let first = lb.select(&pool, Some(ip));
        let second = lb.select(&pool, Some(ip));
        assert_eq!(first, second);
    }

    #[test]
    fn weighted_prefers_higher_weight_then_decrements_it() {
        let lb = LoadBalancer::new(Strategy::Weighted);
        lb.set_weights(&HashMap::from([(1, 1), (2, 3)]));
        let pool = vec![metric(1, true), metric(2, true)];

        // instance 2 starts at weight 3, so it wins while it remains strictly ahead.
        assert_eq!(lb.select(&pool, None), Some(2)); // weights now 1/2
        assert_eq!(lb.select(&pool, None), Some(2)); // weights now 1/1
        // tied at 1/1: earliest id wins, same rule as the other strategies.
        assert_eq!(lb.select(&pool, None), Some(1)); // weights now 0/1
        assert_eq!(lb.select(&pool, None), Some(2)); // weights now 0/0
    }

    #[test]
    fn resetting_weights_restores_the_original_distribution() {
        let lb = LoadBalancer::new(Strategy::Weighted);
        lb.set_weights(&HashMap::from([(1, 1)]));
        let pool = vec![metric(1, true)];
        lb.select(&pool, None);
        lb.set_weights(&HashMap::from([(1, 1)]));
        assert_eq!(lb.select(&pool, None), Some(1));
    }

    #[test]
    fn forgetting_an_instance_clears_its_bookkeeping() {
        let lb = LoadBalancer::new(Strategy::LeastConnections);
        lb.record_connection(1);
        lb.forget(1);
        assert_eq!(lb.connection_count(1), 0);
    }
}
