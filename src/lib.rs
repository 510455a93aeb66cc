// Public modules
pub mod types;
pub mod error;
pub mod config;
pub mod parsing;
pub mod filter;
pub mod cost;
pub mod kubernetes;
pub mod metrics;
pub mod collector;
pub mod cluster;
pub mod sink;
pub mod orchestrator;

// Re-export commonly used items
pub use types::*;
pub use error::{Error, Result};
pub use config::{load_config, load_config_with_env, ConnectorConfig, EnvironmentProvider, MockEnvironment, SystemEnvironment};
pub use parsing::{parse_cpu_to_millicores, parse_cpu_to_nanocores, parse_interval, parse_memory_to_bytes};
pub use filter::included;
pub use cost::{CostModel, CostRates};
pub use kubernetes::{ClusterApi, KubeClusterApi, MockClusterApi};
pub use metrics::{MetricsApi, MetricsServerClient, PrometheusClient, TimeSeriesApi, UsageSources};
pub use collector::{build_collectors, Collector, CollectorKind};
pub use cluster::{ClusterContext, ContextProvider};
pub use sink::{BillingClient, BillingSinkFactory, MetricsSink, SinkFactory};
pub use orchestrator::{ClientBundle, ConnectorStatus, CyclePhase, Orchestrator, Scheduler};
