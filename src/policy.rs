//! Hybrid data-placement policies (§4.6): given each rank's current target
//! and per-block ray demand, decide which rank holds which block next
//! round.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ray::{BlockId, RankId};

/// What one rank reported to the coordinator this round (§4.5 step 1).
#[derive(Clone, Debug)]
pub struct RankReport {
    pub current_target: Option<BlockId>,
    pub demand: Vec<(BlockId, usize)>,
}

/// A rank's new target for the coming round, total over ranks (`None` =
/// idle), and the data-placement hint: which rank (if any) currently holds
/// that target's data, for [`crate::cache::BlockCache`] to consult before
/// falling back to loading from storage. Block *data* itself never crosses
/// this boundary (§EXPANDED-4.10).
pub struct Placement {
    pub map: Vec<Option<BlockId>>,
    pub data_send: Vec<Option<RankId>>,
}

fn currently_resident(reports: &[RankReport]) -> HashMap<BlockId, RankId> {
    let mut data2proc = HashMap::new();
    for (rank, report) in reports.iter().enumerate() {
        if let Some(block) = report.current_target {
            data2proc.insert(block, RankId(rank));
        }
    }
    data2proc
}

fn global_demand(reports: &[RankReport]) -> HashMap<BlockId, usize> {
    let mut totals = HashMap::new();
    for report in reports {
        for &(block, rays) in &report.demand {
            *totals.entry(block).or_insert(0) += rays;
        }
    }
    totals
}

fn data_send_hint(map: &[Option<BlockId>], resident: &HashMap<BlockId, RankId>) -> Vec<Option<RankId>> {
    map.iter()
        .map(|target| target.and_then(|b| resident.get(&b).copied()))
        .collect()
}

fn sorted_by_demand_desc_id_asc(demand: &HashMap<BlockId, usize>) -> Vec<(BlockId, usize)> {
    let mut blocks: Vec<_> = demand.iter().map(|(&b, &c)| (b, c)).collect();
    blocks.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    blocks
}

/// The eight interchangeable block→rank placement functions (§4.6 table).
/// Each is deterministic given identical input; `RayWeightedSpread` and
/// `LoadMany`'s rank-order tie-breaks fall out of iteration order alone, so
/// none of the eight actually consult the seeded RNG — it is threaded
/// through for policies an implementer adds later that do need one (the
/// coordinator broadcasts the seed each round so any such addition stays
/// deterministic cluster-wide, per §4.6's determinism requirement).
pub enum HybridPolicy {
    Greedy,
    Spread,
    RayWeightedSpread,
    LoadOnce,
    LoadAnyOnce,
    LoadAnother,
    LoadMany,
    AdaptiveSend { last_total_rays: Mutex<Option<usize>> },
}

impl HybridPolicy {
    pub fn adaptive_send() -> HybridPolicy {
        HybridPolicy::AdaptiveSend { last_total_rays: Mutex::new(None) }
    }

    pub fn compute(&self, reports: &[RankReport], seed: u64) -> Placement {
        let _rng = StdRng::seed_from_u64(seed);
        let resident = currently_resident(reports);
        let demand = global_demand(reports);
        let world_size = reports.len();

        let map = match self {
            HybridPolicy::Greedy => greedy(world_size, &demand),
            HybridPolicy::Spread => spread(world_size, &demand),
            HybridPolicy::RayWeightedSpread => ray_weighted_spread(world_size, &demand),
            HybridPolicy::LoadOnce => load_once(world_size, &resident, &demand),
            HybridPolicy::LoadAnyOnce => load_any_once(world_size, &resident, &demand),
            HybridPolicy::LoadAnother => load_another(world_size, reports, &demand),
            HybridPolicy::LoadMany => load_many(world_size, &demand),
            HybridPolicy::AdaptiveSend { last_total_rays } => {
                let total: usize = demand.values().sum();
                let mut last = last_total_rays.lock().unwrap();
                let grew = last.map(|prev| total > prev).unwrap_or(true);
                *last = Some(total);
                if grew {
                    greedy(world_size, &demand)
                } else {
                    load_once(world_size, &resident, &demand)
                }
            }
        };

        let data_send = data_send_hint(&map, &resident);
        Placement { map, data_send }
    }
}

/// Assign each rank the block with most global queued rays not yet
/// assigned this round; ties broken by lowest block id.
fn greedy(world_size: usize, demand: &HashMap<BlockId, usize>) -> Vec<Option<BlockId>> {
    let ordered = sorted_by_demand_desc_id_asc(demand);
    let mut map = vec![None; world_size];
    for (rank, (block, _)) in (0..world_size).zip(ordered.into_iter()) {
        map[rank] = Some(block);
    }
    map
}

/// Top-K blocks by global ray count, K = min(ranks, blocks-with-rays);
/// assign one per rank, ties broken by lowest block id.
fn spread(world_size: usize, demand: &HashMap<BlockId, usize>) -> Vec<Option<BlockId>> {
    greedy(world_size, demand)
}

/// Like Spread, but slots per block proportional to `ray_count/total_rays`;
/// ties broken by rank order (ranks are filled low-to-high against blocks
/// in demand order, so the tie-break falls out of iteration order).
fn ray_weighted_spread(world_size: usize, demand: &HashMap<BlockId, usize>) -> Vec<Option<BlockId>> {
    let ordered = sorted_by_demand_desc_id_asc(demand);
    let total_rays: usize = ordered.iter().map(|&(_, c)| c).sum();
    let mut map = vec![None; world_size];
    if total_rays == 0 || ordered.is_empty() {
        return map;
    }
    let mut slots: Vec<usize> = ordered
        .iter()
        .map(|&(_, c)| ((c as f64 / total_rays as f64) * world_size as f64).floor() as usize)
        .collect();
    let mut assigned: usize = slots.iter().sum();
    let mut i = 0;
    while assigned < world_size && !ordered.is_empty() {
        slots[i % slots.len()] += 1;
        assigned += 1;
        i += 1;
    }
    let mut rank = 0;
    for ((block, _), count) in ordered.into_iter().zip(slots.into_iter()) {
        for _ in 0..count {
            if rank >= world_size {
                break;
            }
            map[rank] = Some(block);
            rank += 1;
        }
    }
    map
}

/// Preserve current residency whenever possible; fill empty ranks with
/// highest-demand blocks not yet resident anywhere, most-rays-first.
/// Direct translation of the source `LoadOnceSchedule`.
fn load_once(world_size: usize, resident: &HashMap<BlockId, RankId>, demand: &HashMap<BlockId, usize>) -> Vec<Option<BlockId>> {
    let mut map: Vec<Option<BlockId>> = vec![None; world_size];
    let mut data2proc: HashMap<BlockId, RankId> = resident.clone();

    // Blocks with demand, increasing (size, id) so the homeless stack pops
    // largest-demand first.
    let mut by_size_asc: Vec<(BlockId, usize)> = demand.iter().map(|(&b, &c)| (b, c)).collect();
    by_size_asc.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

    let mut homeless: Vec<BlockId> = Vec::new();
    for (block, _) in &by_size_asc {
        if let Some(&rank) = data2proc.get(block) {
            map[rank.as_usize()] = Some(*block);
        } else {
            homeless.push(*block);
        }
    }

    for rank in 0..world_size {
        if map[rank].is_some() {
            continue;
        }
        while let Some(&candidate) = homeless.last() {
            if data2proc.contains_key(&candidate) {
                homeless.pop();
                continue;
            }
            break;
        }
        if let Some(candidate) = homeless.pop() {
            map[rank] = Some(candidate);
            data2proc.insert(candidate, RankId(rank));
        }
    }
    map
}

/// Like LoadOnce, but allows duplicating a block (instead of leaving a rank
/// idle) when no unplaced demand remains.
fn load_any_once(world_size: usize, resident: &HashMap<BlockId, RankId>, demand: &HashMap<BlockId, usize>) -> Vec<Option<BlockId>> {
    let mut map = load_once(world_size, resident, demand);
    if !demand.is_empty() {
        let busiest = sorted_by_demand_desc_id_asc(demand)[0].0;
        for slot in map.iter_mut() {
            if slot.is_none() {
                *slot = Some(busiest);
            }
        }
    }
    map
}

/// Like Greedy (most rays first, tie lowest id), but every newly assigned
/// block must differ from that rank's previous target.
fn load_another(world_size: usize, reports: &[RankReport], demand: &HashMap<BlockId, usize>) -> Vec<Option<BlockId>> {
    let ordered = sorted_by_demand_desc_id_asc(demand);
    let mut map = vec![None; world_size];
    let mut next = 0usize;
    for rank in 0..world_size {
        let previous = reports[rank].current_target;
        while next < ordered.len() && Some(ordered[next].0) == previous {
            next += 1;
        }
        if next < ordered.len() {
            map[rank] = Some(ordered[next].0);
            next += 1;
        }
    }
    map
}

/// Prefer placing the same block on multiple ranks proportional to demand;
/// ties broken by ray count (largest-remainder apportionment, distinct
/// rounding strategy from RayWeightedSpread's floor-then-fill).
fn load_many(world_size: usize, demand: &HashMap<BlockId, usize>) -> Vec<Option<BlockId>> {
    let ordered = sorted_by_demand_desc_id_asc(demand);
    let total_rays: usize = ordered.iter().map(|&(_, c)| c).sum();
    let mut map = vec![None; world_size];
    if total_rays == 0 || ordered.is_empty() {
        return map;
    }
    let mut quotas: Vec<(BlockId, usize, f64)> = ordered
        .iter()
        .map(|&(b, c)| {
            let exact = (c as f64 / total_rays as f64) * world_size as f64;
            (b, exact.floor() as usize, exact.fract())
        })
        .collect();
    let mut assigned: usize = quotas.iter().map(|&(_, q, _)| q).sum();
    quotas.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap().then(b.1.cmp(&a.1)));
    let mut i = 0;
    while assigned < world_size && !quotas.is_empty() {
        quotas[i % quotas.len()].1 += 1;
        assigned += 1;
        i += 1;
    }
    quotas.sort_by(|a, b| demand[&b.0].cmp(&demand[&a.0]).then(a.0.cmp(&b.0)));
    let mut rank = 0;
    for (block, count, _) in quotas {
        for _ in 0..count {
            if rank >= world_size {
                break;
            }
            map[rank] = Some(block);
            rank += 1;
        }
    }
    map
}
