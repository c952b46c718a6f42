//! Network policy gate. `Offline` queues all non-cache operations,
//! `Expensive` answers from cache wherever a cached answer exists,
//! `Online` is unrestricted. Transitions never drop queued work.

pub use crate::modules::settings::NetworkPolicy;

/// Whether a task may touch the network right now.
pub fn allows_network(policy: NetworkPolicy) -> bool {
    !matches!(policy, NetworkPolicy::Offline)
}

/// Whether a cached answer should short-circuit a network fetch.
/// Cache-first reads are always preferred; under `Expensive` they are
/// mandatory.
pub fn prefers_cache(policy: NetworkPolicy) -> bool {
    matches!(
        policy,
        NetworkPolicy::Expensive | NetworkPolicy::Offline
    )
}
