//! # Weave
//!
//! Merges the hits several instances produced for one ray into a single
//! non-overlapping list ordered by entry distance.
//!
//! Rules, applied after a stable sort by entry distance:
//! 1. A hit that ends at or before the previous kept hit's exit is dropped.
//! 2. A hit that starts inside the previous kept hit is clipped to start at
//!    its exit; the entry normal becomes the reverse of that exit normal.
//! 3. Anything else is kept unchanged.
//!
//! Equal entry distances keep instance order, so the earlier instance wins.

use rtserver_core::{Hit, Pooled, ResourceArena};

/// Weaves `hits` in place, returning dropped hits to `arena`.
///
/// Returns the number of overlaps resolved.
pub fn weave(hits: &mut Vec<Pooled<Hit>>, arena: &ResourceArena) -> usize {
    if hits.len() < 2 {
        return 0;
    }
    hits.sort_by(|a, b| a.hit_dist.total_cmp(&b.hit_dist));

    let mut kept = 0usize;
    let mut overlaps = 0usize;
    for i in 0..hits.len() {
        if kept > 0 {
            let prev_exit = hits[kept - 1].exit_dist();
            let prev_normal = hits[kept - 1].exit_normal;
            let hit = &mut hits[i];

            if hit.exit_dist() <= prev_exit {
                overlaps += 1;
                continue;
            }
            if hit.hit_dist < prev_exit {
                overlaps += 1;
                let exit = hit.exit_dist();
                hit.hit_dist = prev_exit;
                hit.los = exit - prev_exit;
                hit.enter_normal = -prev_normal;
            }
        }
        hits.swap(kept, i);
        kept += 1;
    }

    for dropped in hits.drain(kept..) {
        arena.release(dropped);
    }

    if overlaps > 0 {
        tracing::debug!(overlaps, kept, "weave resolved overlapping hits");
    }
    overlaps
}
