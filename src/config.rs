//! Configuration keys recognized by the core (§6), parsed from a string map.
//!
//! Loading that map from a file is the descoped "scene/config loading"
//! collaborator (§1); this module only interprets the keys once they're in
//! hand, and fails fast on anything unknown (§7 Configuration errors).

use std::collections::HashMap;
use std::num::NonZeroUsize;

use crate::error::{Error, Result};
use crate::policy::HybridPolicy;

/// Which scheduler variant to run (§6 `scheduler` key). `AsyncDomain` is
/// accepted as a config value (the source distinguishes a non-blocking
/// domain variant) but maps onto the same [`crate::scheduler::Scheduler::Domain`]
/// core behavior here — the blocking/non-blocking distinction lives in the
/// `ClusterTransport` implementation, not in the scheduling core itself.
#[derive(Clone, Debug, PartialEq)]
pub enum SchedulerKind {
    Image,
    Domain,
    AsyncDomain,
    Hybrid(HybridPolicyKind),
}

/// Mirrors [`HybridPolicy`]'s variants as a plain, comparable config value;
/// converted to an actual `HybridPolicy` (which carries mutable state for
/// `AdaptiveSend`) when the scheduler is constructed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HybridPolicyKind {
    Greedy,
    Spread,
    RayWeightedSpread,
    LoadOnce,
    LoadAnyOnce,
    LoadAnother,
    LoadMany,
    AdaptiveSend,
}

impl HybridPolicyKind {
    pub fn build(self) -> HybridPolicy {
        match self {
            HybridPolicyKind::Greedy => HybridPolicy::Greedy,
            HybridPolicyKind::Spread => HybridPolicy::Spread,
            HybridPolicyKind::RayWeightedSpread => HybridPolicy::RayWeightedSpread,
            HybridPolicyKind::LoadOnce => HybridPolicy::LoadOnce,
            HybridPolicyKind::LoadAnyOnce => HybridPolicy::LoadAnyOnce,
            HybridPolicyKind::LoadAnother => HybridPolicy::LoadAnother,
            HybridPolicyKind::LoadMany => HybridPolicy::LoadMany,
            HybridPolicyKind::AdaptiveSend => HybridPolicy::adaptive_send(),
        }
    }
}

/// §6 `adapter` key: forwarded to [`crate::adapter::AdapterAPI`] construction,
/// opaque to the rest of the core. Back-ends themselves are out of scope
/// (§1); this enum exists only so unknown adapter names fail fast at
/// startup rather than surfacing as a mysterious runtime error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AdapterKind {
    Manta,
    Optix,
    Embree,
    OSPRay,
}

/// §6 `accel` key: whether the shuffler's global block BVH is enabled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Accel {
    None,
    Bvh,
}

/// Parsed, validated configuration for one run. Built from a flat string
/// map — the descoped boundary is *loading* that map, not parsing it.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub scheduler: SchedulerKind,
    pub adapter: AdapterKind,
    pub film_width: u32,
    pub film_height: u32,
    pub accel: Accel,
    pub threads: NonZeroUsize,
}

impl Config {
    /// Parse from the raw key/value map. Unknown `scheduler`/`adapter`/
    /// `accel` values, and malformed integer fields, all produce
    /// `Error::Configuration` per §7.
    pub fn from_map(raw: &HashMap<String, String>) -> Result<Config> {
        let scheduler = parse_scheduler(raw.get("scheduler").map(String::as_str).unwrap_or("Image"))?;
        let adapter = parse_adapter(raw.get("adapter").map(String::as_str).unwrap_or("Embree"))?;
        let film_width = parse_u32(raw, "film.width", 1024)?;
        let film_height = parse_u32(raw, "film.height", 1024)?;
        let accel = parse_accel(raw.get("accel").map(String::as_str).unwrap_or("BVH"))?;
        let threads = match raw.get("threads") {
            Some(v) => {
                let n: usize = v.parse().map_err(|_| Error::Configuration(format!("threads: not an integer: {v:?}")))?;
                NonZeroUsize::new(n).ok_or_else(|| Error::Configuration("threads: must be > 0".into()))?
            }
            None => std::thread::available_parallelism()
                .unwrap_or_else(|_| NonZeroUsize::new(1).unwrap()),
        };

        Ok(Config { scheduler, adapter, film_width, film_height, accel, threads })
    }
}

fn parse_u32(raw: &HashMap<String, String>, key: &str, default: u32) -> Result<u32> {
    match raw.get(key) {
        Some(v) => v.parse().map_err(|_| Error::Configuration(format!("{key}: not an integer: {v:?}"))),
        None => Ok(default),
    }
}

fn parse_scheduler(value: &str) -> Result<SchedulerKind> {
    if let Some(policy_name) = value.strip_prefix("Hybrid(").and_then(|s| s.strip_suffix(')')) {
        return Ok(SchedulerKind::Hybrid(parse_policy(policy_name)?));
    }
    match value {
        "Image" => Ok(SchedulerKind::Image),
        "Domain" => Ok(SchedulerKind::Domain),
        "AsyncDomain" => Ok(SchedulerKind::AsyncDomain),
        other => Err(Error::Configuration(format!("unknown scheduler: {other:?}"))),
    }
}

fn parse_policy(value: &str) -> Result<HybridPolicyKind> {
    match value {
        "Greedy" => Ok(HybridPolicyKind::Greedy),
        "Spread" => Ok(HybridPolicyKind::Spread),
        "RayWeightedSpread" => Ok(HybridPolicyKind::RayWeightedSpread),
        "LoadOnce" => Ok(HybridPolicyKind::LoadOnce),
        "LoadAnyOnce" => Ok(HybridPolicyKind::LoadAnyOnce),
        "LoadAnother" => Ok(HybridPolicyKind::LoadAnother),
        "LoadMany" => Ok(HybridPolicyKind::LoadMany),
        "AdaptiveSend" => Ok(HybridPolicyKind::AdaptiveSend),
        other => Err(Error::Configuration(format!("unknown hybrid policy: {other:?}"))),
    }
}

fn parse_adapter(value: &str) -> Result<AdapterKind> {
    match value {
        "Manta" => Ok(AdapterKind::Manta),
        "Optix" => Ok(AdapterKind::Optix),
        "Embree" => Ok(AdapterKind::Embree),
        "OSPRay" => Ok(AdapterKind::OSPRay),
        other => Err(Error::Configuration(format!("unknown adapter: {other:?}"))),
    }
}

fn parse_accel(value: &str) -> Result<Accel> {
    match value {
        "None" => Ok(Accel::None),
        "BVH" => Ok(Accel::Bvh),
        other => Err(Error::Configuration(format!("unknown accel: {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_to_image_scheduler_and_embree_adapter() {
        let cfg = Config::from_map(&HashMap::new()).unwrap();
        assert_eq!(cfg.scheduler, SchedulerKind::Image);
        assert_eq!(cfg.adapter, AdapterKind::Embree);
        assert_eq!(cfg.film_width, 1024);
    }

    #[test]
    fn parses_hybrid_with_nested_policy_name() {
        let cfg = Config::from_map(&map(&[("scheduler", "Hybrid(LoadOnce)")])).unwrap();
        assert_eq!(cfg.scheduler, SchedulerKind::Hybrid(HybridPolicyKind::LoadOnce));
    }

    #[test]
    fn unknown_scheduler_fails_fast() {
        let err = Config::from_map(&map(&[("scheduler", "QuantumTracer")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn unknown_adapter_fails_fast() {
        let err = Config::from_map(&map(&[("adapter", "RandomVendor")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_zero_threads() {
        let err = Config::from_map(&map(&[("threads", "0")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn film_dimensions_parse_as_integers() {
        let cfg = Config::from_map(&map(&[("film.width", "512"), ("film.height", "512")])).unwrap();
        assert_eq!(cfg.film_width, 512);
        assert_eq!(cfg.film_height, 512);
    }
}
