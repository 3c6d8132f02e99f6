//! Engine-level configuration. Purely a Rust value — loading it from a file
//! or CLI flags is an application concern outside this crate's scope.

/// Runtime configuration for an [`crate::engine::InspectionEngine`].
///
/// Groups the matrix-level publish-policy overrides together with the
/// queue sizing and idle timeout that make up the rest of the worker loop's
/// tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Applies the `consumed_bits` gate so a sample is never included in two
    /// snapshots of the same condition. Default `true`.
    pub send_only_once_per_condition: bool,
    /// Bypasses `probability_to_send` entirely; useful for deterministic
    /// debug runs. Default `false`.
    pub disable_probability: bool,
    /// Capacity of the bounded ingress queue shared by all producers.
    pub ingress_queue_capacity: usize,
    /// Capacity of the bounded egress queue drained by the sender.
    pub egress_queue_capacity: usize,
    /// How long the worker sleeps when it has no computable wait hint.
    pub idle_timeout_ms: u64,
    /// Seed for the engine's per-instance PRNG (probability gate draws).
    pub rng_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            send_only_once_per_condition: true,
            disable_probability: false,
            ingress_queue_capacity: 10_000,
            egress_queue_capacity: 256,
            idle_timeout_ms: 1_000,
            rng_seed: 0,
        }
    }
}

impl EngineConfig {
    /// A preset useful for replaying fixtures deterministically: the
    /// probability gate is disabled (every true verdict publishes, subject
    /// only to `min_publish_interval_ms`) and samples may be re-sent across
    /// conditions, matching a debug/replay workflow rather than production
    /// field collection.
    pub fn lenient() -> Self {
        EngineConfig {
            send_only_once_per_condition: false,
            disable_probability: true,
            ..EngineConfig::default()
        }
    }

    /// A preset for high-throughput producers: larger queues, same publish
    /// semantics as [`EngineConfig::default`].
    pub fn high_throughput() -> Self {
        EngineConfig {
            ingress_queue_capacity: 100_000,
            egress_queue_capacity: 4_096,
            ..EngineConfig::default()
        }
    }
}
