// ── Simple placement strategies ──

/// Item `i` goes to shard `i mod shards`.
pub fn round_robin(items: usize, shards: usize) -> Vec<usize> {
    if shards == 0 {
        return Vec::new();
    }
    (0..items).map(|i| i % shards).collect()
}

/// Greedy weighted bin-packing: heaviest item first onto the least-loaded
/// shard. Equal weights keep input order and equal loads pick the lowest
/// shard, so the result is deterministic.
///
/// `initial` seeds the shard loads (work already pinned there); it must be
/// `shards` long or empty.
pub fn bin_pack(weights: &[f64], shards: usize, initial: &[f64]) -> Vec<usize> {
    if shards == 0 {
        return Vec::new();
    }
    let mut loads = if initial.len() == shards {
        initial.to_vec()
    } else {
        vec![0.0; shards]
    };
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]).then(a.cmp(&b)));

    let mut placement = vec![0; weights.len()];
    for item in order {
        let target = least_loaded(&loads);
        loads[target] += weights[item];
        placement[item] = target;
    }
    placement
}

fn least_loaded(loads: &[f64]) -> usize {
    let mut best = 0;
    for (idx, load) in loads.iter().enumerate().skip(1) {
        if *load < loads[best] {
            best = idx;
        }
    }
    best
}
