//! Pure cost derivation. Every function maps usage and capacity to a
//! [`CostMetrics`] whose total is the sum of its components.

use std::collections::BTreeMap;

use crate::types::{CostMetrics, CpuMetrics, MemoryMetrics, BYTES_PER_GB, NANOCORES_PER_CORE};

pub const DEFAULT_CURRENCY: &str = "USD";

/// Hourly rates. Defaults are USD list prices; every field can be overridden.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRates {
    pub currency: String,
    pub cpu_per_core_hour: f64,
    pub memory_per_gb_hour: f64,
    pub storage_class_rates: BTreeMap<String, f64>,
    pub storage_default_per_gb_hour: f64,
    pub block_volume_multiplier: f64,
    pub load_balancer_per_hour: f64,
    pub node_port_per_hour: f64,
    pub session_affinity_multiplier: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        let mut storage_class_rates = BTreeMap::new();
        storage_class_rates.insert("premium-ssd".to_string(), 0.17);
        storage_class_rates.insert("standard-ssd".to_string(), 0.08);
        Self {
            currency: DEFAULT_CURRENCY.to_string(),
            cpu_per_core_hour: 0.04,
            memory_per_gb_hour: 0.01,
            storage_class_rates,
            storage_default_per_gb_hour: 0.04,
            block_volume_multiplier: 1.2,
            load_balancer_per_hour: 0.025,
            node_port_per_hour: 0.010,
            session_affinity_multiplier: 1.1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CostModel {
    rates: CostRates,
}

impl CostModel {
    pub fn new(rates: CostRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &CostRates {
        &self.rates
    }

    /// Pods pay for what they use.
    pub fn pod_cost(&self, cpu: &CpuMetrics, memory: &MemoryMetrics) -> CostMetrics {
        let cpu_cost = cpu.usage_cores() * self.rates.cpu_per_core_hour;
        let memory_cost = memory.usage_gb() * self.rates.memory_per_gb_hour;
        CostMetrics::new(self.rates.currency.clone(), cpu_cost, memory_cost, 0.0, 0.0)
    }

    /// Nodes are priced on allocatable capacity, scaled by observed utilization
    /// when usage is known.
    pub fn node_cost(
        &self,
        allocatable_nanocores: i64,
        allocatable_bytes: i64,
        cpu: &CpuMetrics,
        memory: &MemoryMetrics,
    ) -> CostMetrics {
        let cores = allocatable_nanocores.max(0) as f64 / NANOCORES_PER_CORE;
        let gb = allocatable_bytes.max(0) as f64 / BYTES_PER_GB;

        let mut cpu_cost = cores * self.rates.cpu_per_core_hour;
        if cpu.usage_nano_cores > 0 && cores > 0.0 {
            cpu_cost *= cpu.usage_cores() / cores;
        }

        let mut memory_cost = gb * self.rates.memory_per_gb_hour;
        if memory.usage_bytes > 0 && gb > 0.0 {
            memory_cost *= memory.usage_gb() / gb;
        }

        CostMetrics::new(self.rates.currency.clone(), cpu_cost, memory_cost, 0.0, 0.0)
    }

    pub fn storage_rate(&self, storage_class: Option<&str>) -> f64 {
        storage_class
            .and_then(|class| self.rates.storage_class_rates.get(class))
            .copied()
            .unwrap_or(self.rates.storage_default_per_gb_hour)
    }

    pub fn volume_cost(&self, capacity_bytes: i64, storage_class: Option<&str>, block_mode: bool) -> CostMetrics {
        let gb = capacity_bytes.max(0) as f64 / BYTES_PER_GB;
        let mut storage_cost = gb * self.storage_rate(storage_class);
        if block_mode {
            storage_cost *= self.rates.block_volume_multiplier;
        }
        CostMetrics::new(self.rates.currency.clone(), 0.0, 0.0, storage_cost, 0.0)
    }

    /// LoadBalancer > NodePort > ClusterIP (free). Multiple load-balancer
    /// ingress points are billed individually.
    pub fn service_cost(&self, service_type: &str, lb_ingress_count: usize, client_ip_affinity: bool) -> CostMetrics {
        let mut network_cost = match service_type {
            "LoadBalancer" => self.rates.load_balancer_per_hour * lb_ingress_count.max(1) as f64,
            "NodePort" => self.rates.node_port_per_hour,
            _ => 0.0,
        };
        if client_ip_affinity {
            network_cost *= self.rates.session_affinity_multiplier;
        }
        CostMetrics::new(self.rates.currency.clone(), 0.0, 0.0, 0.0, network_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: i64 = 1 << 30;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_pod_cost_uses_usage() {
        let model = CostModel::default();
        let cpu = CpuMetrics::from_nanocores(500_000_000);
        let memory = MemoryMetrics::from_bytes(2 * GIB);

        let cost = model.pod_cost(&cpu, &memory);
        assert!(approx(cost.cpu_cost, 0.02));
        assert!(approx(cost.memory_cost, 0.02));
        assert_eq!(cost.total_cost(), cost.cpu_cost + cost.memory_cost);
        assert_eq!(cost.currency, "USD");
    }

    #[test]
    fn test_node_cost_scaled_by_utilization() {
        let model = CostModel::default();
        let cpu = CpuMetrics::from_nanocores(2_000_000_000);
        let memory = MemoryMetrics::from_bytes(4 * GIB);

        let cost = model.node_cost(4_000_000_000, 8 * GIB, &cpu, &memory);
        assert!(approx(cost.cpu_cost, 0.08));
        assert!(approx(cost.memory_cost, 0.04));
        assert!(approx(cost.total_cost(), 0.12));
    }

    #[test]
    fn test_node_cost_without_usage_is_full_capacity() {
        let model = CostModel::default();
        let cost = model.node_cost(4_000_000_000, 8 * GIB, &CpuMetrics::default(), &MemoryMetrics::default());
        assert!(approx(cost.cpu_cost, 0.16));
        assert!(approx(cost.memory_cost, 0.08));
    }

    #[test]
    fn test_volume_cost_by_class_and_mode() {
        let model = CostModel::default();
        assert!(approx(model.volume_cost(10 * GIB, Some("premium-ssd"), false).storage_cost, 1.7));
        assert!(approx(model.volume_cost(10 * GIB, Some("standard-ssd"), false).storage_cost, 0.8));
        assert!(approx(model.volume_cost(10 * GIB, None, false).storage_cost, 0.4));
        assert!(approx(model.volume_cost(10 * GIB, Some("gp2"), true).storage_cost, 0.48));
    }

    #[test]
    fn test_service_cost_by_type() {
        let model = CostModel::default();
        assert!(approx(model.service_cost("LoadBalancer", 0, false).network_cost, 0.025));
        assert!(approx(model.service_cost("LoadBalancer", 2, false).network_cost, 0.05));
        assert!(approx(model.service_cost("NodePort", 0, false).network_cost, 0.010));
        assert!(approx(model.service_cost("NodePort", 0, true).network_cost, 0.011));
        assert_eq!(model.service_cost("ClusterIP", 0, true).total_cost(), 0.0);
    }

    #[test]
    fn test_rate_overrides() {
        let rates = CostRates {
            currency: "EUR".to_string(),
            cpu_per_core_hour: 0.1,
            ..Default::default()
        };
        let model = CostModel::new(rates);
        let cost = model.pod_cost(&CpuMetrics::from_nanocores(1_000_000_000), &MemoryMetrics::default());
        assert!(approx(cost.cpu_cost, 0.1));
        assert_eq!(cost.currency, "EUR");
    }
}
