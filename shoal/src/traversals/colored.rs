// SPDX-License-Identifier: AGPL-3.0-only

//! Colored schedules: c01, c08, c18.
//!
//! A colored schedule partitions the base cells into color classes whose
//! base-step write footprints cannot overlap, then runs the colors
//! sequentially with the bases of one color in parallel:
//!
//! - **c08** — stride 2·2·2 (8 colors); footprint is the 2×2×2 block, so
//!   same-color bases differ by a multiple of two per axis and the blocks
//!   are disjoint.
//! - **c18** — stride 3·3·2 (18 colors); footprint is the forward
//!   half-stencil spanning x, y ∈ [−1, 1] and z ∈ [0, 1].
//! - **c01** — no colors at all: every base cell is processed in parallel
//!   and only the base cell is written; neighbor particles are read from a
//!   snapshot taken before the round. Compatible only with Newton-3 off.

use rayon::prelude::*;

use crate::cell::FullCell;
use crate::functor::PairFunctor;
use crate::soa::SoaBuffer;
use crate::traversals::cell_pair::{
    aos_cell_pair_oneway, aos_cell_self, offset_index, one_to_three, process_c08_base,
    process_c18_base, three_to_one, CellStepKernel,
};
use crate::traversals::DataLayout;

/// Runs the given base-step processor under a color partition.
///
/// `stride` is the per-axis color stride; bases whose coordinates are
/// congruent modulo the stride share a color and run in parallel.
fn run_colors<P>(dims: [usize; 3], stride: [usize; 3], process: P)
where
    P: Fn([usize; 3]) + Sync,
{
    for cz in 0..stride[2] {
        for cy in 0..stride[1] {
            for cx in 0..stride[0] {
                let bases: Vec<[usize; 3]> = (cz..dims[2])
                    .step_by(stride[2])
                    .flat_map(|z| {
                        (cy..dims[1]).step_by(stride[1]).flat_map(move |y| {
                            (cx..dims[0]).step_by(stride[0]).map(move |x| [x, y, z])
                        })
                    })
                    .collect();
                bases.par_iter().for_each(|&base| process(base));
            }
        }
    }
}

/// The c08 schedule over a cell-step kernel.
pub fn c08<K: CellStepKernel>(kernel: &K, dims: [usize; 3]) {
    run_colors(dims, [2, 2, 2], |base| {
        // SAFETY: stride 2 per axis keeps same-color 2×2×2 footprints
        // disjoint; colors run sequentially.
        unsafe { process_c08_base(kernel, base, dims) }
    });
}

/// The c18 schedule over a cell-step kernel.
pub fn c18<K: CellStepKernel>(kernel: &K, dims: [usize; 3]) {
    run_colors(dims, [3, 3, 2], |base| {
        // SAFETY: stride 3·3·2 keeps same-color forward-stencil footprints
        // disjoint; colors run sequentially.
        unsafe { process_c18_base(kernel, base, dims) }
    });
}

/// A c18-colored schedule that only issues per-cell steps (no cell pairs).
///
/// List-driven traversals use this: the work of one base cell walks its
/// particles' neighbor lists, whose partners lie in the forward
/// half-stencil, so the c18 color stride keeps the footprints disjoint.
pub fn c18_cell_only<P>(dims: [usize; 3], process: P)
where
    P: Fn(usize) + Sync,
{
    run_colors(dims, [3, 3, 2], |base| process(three_to_one(base, dims)));
}

/// The c01 schedule: parallel over all base cells, one-way writes.
///
/// Reads go to a position snapshot taken before the parallel round, so the
/// only written cell is the base. Requires Newton-3 off.
pub fn c01<F: PairFunctor>(
    functor: &F,
    cells: &mut [FullCell],
    halo: &[bool],
    dims: [usize; 3],
    layout: DataLayout,
) {
    // Snapshot of every cell's particles; positions are frozen during a
    // traversal, so reading stale forces is fine (one-way never reads
    // partner forces into the result).
    let snapshot: Vec<Vec<crate::particle::Particle>> =
        cells.iter().map(|c| c.particles().to_vec()).collect();

    cells
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, base_cell)| {
            if halo[index] || base_cell.is_empty() {
                return;
            }
            let base3 = one_to_three(index, dims);

            match layout {
                DataLayout::Aos => {
                    aos_cell_self(functor, base_cell, false);
                    for off in full_stencil() {
                        let Some(nb) = offset_index(base3, off, dims) else {
                            continue;
                        };
                        aos_cell_pair_oneway(functor, base_cell, &snapshot[three_to_one(nb, dims)]);
                    }
                }
                DataLayout::Soa => {
                    let n = base_cell.soa.len();
                    functor.soa_self(&mut base_cell.soa, 0..n, false);
                    // One combined neighborhood buffer per base keeps the
                    // pair call count at one instead of 26.
                    let mut hood = SoaBuffer::default();
                    for off in full_stencil() {
                        let Some(nb) = offset_index(base3, off, dims) else {
                            continue;
                        };
                        for p in &snapshot[three_to_one(nb, dims)] {
                            hood.push(p);
                        }
                    }
                    let m = hood.len();
                    if m > 0 {
                        functor.soa_pair(&mut base_cell.soa, 0..n, &mut hood, 0..m, false);
                    }
                }
            }
        });
}

/// All 26 neighbor offsets.
fn full_stencil() -> impl Iterator<Item = [i64; 3]> {
    (-1i64..=1).flat_map(|z| {
        (-1i64..=1).flat_map(move |y| {
            (-1i64..=1).filter_map(move |x| {
                if x == 0 && y == 0 && z == 0 {
                    None
                } else {
                    Some([x, y, z])
                }
            })
        })
    })
}
