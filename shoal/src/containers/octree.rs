// SPDX-License-Identifier: AGPL-3.0-only

//! Adaptive octree container.
//!
//! Two trees per container: one rooted on the owned box, one on the
//! halo-extended box. Nodes live in an arena and reference their leaf
//! particle cells by index, so neighbor relations are plain indices and a
//! rebuild is an arena reset — no parent or cross pointers.
//!
//! A leaf splits when it exceeds the split threshold *and* each would-be
//! child's smallest side stays at least `interaction_length ·
//! max(cell_size_factor, 1)`. Every leaf side is therefore at least one
//! interaction length, which is why box-touching neighbor leaves (face,
//! edge, or vertex contact) cover all in-range pairs.

use crate::cell::FullCell;
use crate::containers::{
    check_halo_intake, check_owned_intake, ContainerChoice, ParticleContainer,
};
use crate::error::{Result, ShoalError};
use crate::functor::PairFunctor;
use crate::geometry::{add_scalar, dist_sq, in_box, sub_scalar, Region};
use crate::particle::{IteratorBehavior, OwnershipState, Particle};
use crate::tolerances::TREE_SPLIT_THRESHOLD;
use crate::traversals::cell_pair::{aos_cell_pair, aos_cell_self};
use crate::traversals::{DataLayout, TraversalChoice, TraversalSelectorInfo, TraversalSpec};

#[derive(Debug, Clone)]
enum NodeKind {
    /// Eight children, octant-ordered (x fastest).
    Inner([usize; 8]),
    /// Index into the tree's leaf-cell arena.
    Leaf(usize),
}

#[derive(Debug, Clone)]
struct Node {
    box_min: [f64; 3],
    box_max: [f64; 3],
    kind: NodeKind,
}

/// One octree: structure arena plus leaf particle cells.
#[derive(Debug)]
struct Tree {
    nodes: Vec<Node>,
    leaf_cells: Vec<FullCell>,
    min_leaf_side: f64,
}

impl Tree {
    fn new(box_min: [f64; 3], box_max: [f64; 3], min_leaf_side: f64) -> Self {
        Self {
            nodes: vec![Node {
                box_min,
                box_max,
                kind: NodeKind::Leaf(0),
            }],
            leaf_cells: vec![FullCell::default()],
            min_leaf_side,
        }
    }

    fn reset(&mut self) {
        let (box_min, box_max) = (self.nodes[0].box_min, self.nodes[0].box_max);
        self.nodes.clear();
        self.nodes.push(Node {
            box_min,
            box_max,
            kind: NodeKind::Leaf(0),
        });
        self.leaf_cells.clear();
        self.leaf_cells.push(FullCell::default());
    }

    fn octant_of(node: &Node, pos: [f64; 3]) -> usize {
        let mut octant = 0;
        for d in 0..3 {
            let mid = 0.5 * (node.box_min[d] + node.box_max[d]);
            if pos[d] >= mid {
                octant |= 1 << d;
            }
        }
        octant
    }

    fn can_split(&self, node_index: usize) -> bool {
        let node = &self.nodes[node_index];
        (0..3).all(|d| 0.5 * (node.box_max[d] - node.box_min[d]) >= self.min_leaf_side)
    }

    /// Descends to the leaf containing `pos` and appends the particle,
    /// splitting overfull leaves on the way.
    fn insert(&mut self, p: Particle) {
        let mut current = 0;
        loop {
            match self.nodes[current].kind {
                NodeKind::Inner(children) => {
                    let octant = Self::octant_of(&self.nodes[current], p.pos);
                    current = children[octant];
                }
                NodeKind::Leaf(cell) => {
                    if self.leaf_cells[cell].len() < TREE_SPLIT_THRESHOLD
                        || !self.can_split(current)
                    {
                        self.leaf_cells[cell].push(p);
                        return;
                    }
                    self.split(current);
                }
            }
        }
    }

    /// Turns a leaf into an inner node with eight child leaves and
    /// redistributes its particles. The old leaf cell becomes child 0's.
    fn split(&mut self, node_index: usize) {
        let NodeKind::Leaf(old_cell) = self.nodes[node_index].kind else {
            return;
        };
        let (lo, hi) = (self.nodes[node_index].box_min, self.nodes[node_index].box_max);
        let mid = [
            0.5 * (lo[0] + hi[0]),
            0.5 * (lo[1] + hi[1]),
            0.5 * (lo[2] + hi[2]),
        ];

        let particles = self.leaf_cells[old_cell].drain_all();
        let mut children = [0usize; 8];
        for (octant, child) in children.iter_mut().enumerate() {
            let mut cmin = lo;
            let mut cmax = mid;
            for d in 0..3 {
                if octant & (1 << d) != 0 {
                    cmin[d] = mid[d];
                    cmax[d] = hi[d];
                }
            }
            let cell = if octant == 0 {
                old_cell
            } else {
                self.leaf_cells.push(FullCell::default());
                self.leaf_cells.len() - 1
            };
            self.nodes.push(Node {
                box_min: cmin,
                box_max: cmax,
                kind: NodeKind::Leaf(cell),
            });
            *child = self.nodes.len() - 1;
        }
        self.nodes[node_index].kind = NodeKind::Inner(children);

        for p in particles {
            let octant = Self::octant_of(&self.nodes[node_index], p.pos);
            let NodeKind::Leaf(cell) = self.nodes[children[octant]].kind else {
                continue;
            };
            self.leaf_cells[cell].push(p);
        }
    }

    /// All leaf node indices, in arena order.
    fn leaves(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&n| matches!(self.nodes[n].kind, NodeKind::Leaf(_)))
            .collect()
    }

    fn leaf_cell_index(&self, node: usize) -> usize {
        match self.nodes[node].kind {
            NodeKind::Leaf(cell) => cell,
            NodeKind::Inner(_) => unreachable!("leaf lists only hold leaves"),
        }
    }

    /// Leaf node indices whose boxes overlap `[min, max]` (closed: a box
    /// touching the query still counts).
    fn leaves_in_range(&self, min: [f64; 3], max: [f64; 3]) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![0usize];
        while let Some(n) = stack.pop() {
            let node = &self.nodes[n];
            let overlaps =
                (0..3).all(|d| node.box_min[d] <= max[d] && min[d] <= node.box_max[d]);
            if !overlaps {
                continue;
            }
            match node.kind {
                NodeKind::Inner(children) => stack.extend(children),
                NodeKind::Leaf(_) => out.push(n),
            }
        }
        out
    }

    fn num_particles(&self) -> usize {
        self.leaf_cells.iter().map(FullCell::len).sum()
    }

    fn collect_all(&mut self) -> Vec<Particle> {
        let mut all = Vec::with_capacity(self.num_particles());
        for cell in &mut self.leaf_cells {
            all.extend(cell.drain_all());
        }
        all
    }
}

/// Two distinct leaf cells, mutably.
fn two_cells_mut(cells: &mut [FullCell], a: usize, b: usize) -> (&mut FullCell, &mut FullCell) {
    debug_assert_ne!(a, b);
    let (lo, hi) = (a.min(b), a.max(b));
    let (left, right) = cells.split_at_mut(hi);
    if a < b {
        (&mut left[lo], &mut right[0])
    } else {
        (&mut right[0], &mut left[lo])
    }
}

/// The dual-octree container.
#[derive(Debug)]
pub struct OctreeContainer {
    owned: Tree,
    halo: Tree,
    box_min: [f64; 3],
    box_max: [f64; 3],
    cutoff: f64,
    skin: f64,
    cell_size_factor: f64,
    strict: bool,
}

impl OctreeContainer {
    /// Creates an empty container for the given box.
    #[must_use]
    pub fn new(
        box_min: [f64; 3],
        box_max: [f64; 3],
        cutoff: f64,
        skin: f64,
        cell_size_factor: f64,
        strict: bool,
    ) -> Self {
        let il = cutoff + skin;
        // The split predicate: children must keep at least this side.
        let min_leaf_side = il * cell_size_factor.max(1.0);
        let halo_min = sub_scalar(box_min, il);
        let halo_max = add_scalar(box_max, il);
        Self {
            owned: Tree::new(box_min, box_max, min_leaf_side),
            halo: Tree::new(halo_min, halo_max, min_leaf_side),
            box_min,
            box_max,
            cutoff,
            skin,
            cell_size_factor,
            strict,
        }
    }

    /// Number of owned-tree leaves (diagnostic; grows with splits).
    #[must_use]
    pub fn num_owned_leaves(&self) -> usize {
        self.owned.leaves().len()
    }

    /// Touching-box neighbor relation over owned leaves: boxes in contact
    /// through a face, edge, or vertex.
    fn owned_leaf_neighbors(&self, leaves: &[usize]) -> Vec<Vec<usize>> {
        // Positional tolerance well below any leaf side.
        let eps = 1e-9 * self.interaction_length();
        leaves
            .iter()
            .map(|&leaf| {
                let node = &self.owned.nodes[leaf];
                let min = sub_scalar(node.box_min, eps);
                let max = add_scalar(node.box_max, eps);
                self.owned
                    .leaves_in_range(min, max)
                    .into_iter()
                    .filter(|&n| n != leaf)
                    .collect()
            })
            .collect()
    }
}

impl ParticleContainer for OctreeContainer {
    fn choice(&self) -> ContainerChoice {
        ContainerChoice::Octree
    }

    fn box_min(&self) -> [f64; 3] {
        self.box_min
    }

    fn box_max(&self) -> [f64; 3] {
        self.box_max
    }

    fn cutoff(&self) -> f64 {
        self.cutoff
    }

    fn skin(&self) -> f64 {
        self.skin
    }

    fn selector_info(&self) -> TraversalSelectorInfo {
        TraversalSelectorInfo {
            dims: [2, 1, 1],
            interaction_length: self.interaction_length(),
            cell_length: [
                self.box_max[0] - self.box_min[0],
                self.box_max[1] - self.box_min[1],
                self.box_max[2] - self.box_min[2],
            ],
            cluster_size: 0,
        }
    }

    fn num_particles(&self) -> usize {
        self.owned.num_particles() + self.halo.num_particles()
    }

    fn add(&mut self, p: Particle) -> Result<()> {
        check_owned_intake(&p, self.box_min, self.box_max, self.strict)?;
        self.owned.insert(p);
        Ok(())
    }

    fn add_halo(&mut self, p: Particle) -> Result<()> {
        check_halo_intake(
            &p,
            self.box_min,
            self.box_max,
            self.interaction_length(),
            self.strict,
        )?;
        let mut p = p;
        p.ownership = OwnershipState::Halo;
        self.halo.insert(p);
        Ok(())
    }

    fn update_halo(&mut self, p: &Particle) -> bool {
        let skin_sq = self.skin * self.skin;
        let candidates = self
            .halo
            .leaves_in_range(sub_scalar(p.pos, self.skin), add_scalar(p.pos, self.skin));
        for leaf in candidates {
            let cell = self.halo.leaf_cell_index(leaf);
            for stored in self.halo.leaf_cells[cell].particles_mut() {
                if stored.id == p.id && dist_sq(stored.pos, p.pos) <= skin_sq {
                    *stored = *p;
                    stored.ownership = OwnershipState::Halo;
                    return true;
                }
            }
        }
        false
    }

    fn delete_halo(&mut self) {
        self.halo.reset();
    }

    fn update_container(&mut self, _keep_lists: bool) -> Vec<Particle> {
        self.delete_halo();
        // Primitive but robust: flatten the owned tree and reinsert the
        // particles that stayed in the box.
        let all = self.owned.collect_all();
        self.owned.reset();
        let mut leavers = Vec::new();
        for p in all {
            if p.is_dummy() {
                continue;
            }
            if in_box(p.pos, self.box_min, self.box_max) {
                self.owned.insert(p);
            } else {
                leavers.push(p);
            }
        }
        leavers
    }

    fn delete_all(&mut self) {
        self.owned.reset();
        self.halo.reset();
    }

    fn iterate<F: PairFunctor>(&mut self, functor: &F, spec: &TraversalSpec) -> Result<()> {
        let il = self.interaction_length();
        let owned_leaves = self.owned.leaves();
        let neighbors = self.owned_leaf_neighbors(&owned_leaves);

        match spec.traversal {
            TraversalChoice::OctreeC18 => {
                // Leaf ids are positions in the enumeration; halo leaves
                // come after all owned leaves, so owned < halo always
                // holds and the `id <` tie-break visits each pair once.
                if spec.layout == DataLayout::Soa {
                    for cell in self
                        .owned
                        .leaf_cells
                        .iter_mut()
                        .chain(self.halo.leaf_cells.iter_mut())
                    {
                        let mut soa = std::mem::take(&mut cell.soa);
                        functor.soa_load(cell.particles(), &mut soa);
                        cell.soa = soa;
                    }
                }
                for (lid, &leaf) in owned_leaves.iter().enumerate() {
                    let base_cell = self.owned.leaf_cell_index(leaf);
                    match spec.layout {
                        DataLayout::Aos => {
                            aos_cell_self(functor, &mut self.owned.leaf_cells[base_cell], true);
                        }
                        DataLayout::Soa => {
                            let cell = &mut self.owned.leaf_cells[base_cell];
                            let n = cell.soa.len();
                            functor.soa_self(&mut cell.soa, 0..n, true);
                        }
                    }
                    for &nb in &neighbors[lid] {
                        let nb_id = owned_leaves.iter().position(|&l| l == nb);
                        let Some(nb_id) = nb_id else { continue };
                        if lid >= nb_id {
                            continue;
                        }
                        let nb_cell = self.owned.leaf_cell_index(nb);
                        let (ca, cb) =
                            two_cells_mut(&mut self.owned.leaf_cells, base_cell, nb_cell);
                        match spec.layout {
                            DataLayout::Aos => aos_cell_pair(functor, ca, cb, true),
                            DataLayout::Soa => {
                                let (la, lb) = (ca.soa.len(), cb.soa.len());
                                functor.soa_pair(&mut ca.soa, 0..la, &mut cb.soa, 0..lb, true);
                            }
                        }
                    }
                    // halo leaves in range of this leaf's expanded box
                    let node_min =
                        sub_scalar(self.owned.nodes[leaf].box_min, il);
                    let node_max = add_scalar(self.owned.nodes[leaf].box_max, il);
                    for halo_leaf in self.halo.leaves_in_range(node_min, node_max) {
                        let halo_cell = self.halo.leaf_cell_index(halo_leaf);
                        let ca = &mut self.owned.leaf_cells[base_cell];
                        let cb = &mut self.halo.leaf_cells[halo_cell];
                        if cb.is_empty() {
                            continue;
                        }
                        match spec.layout {
                            DataLayout::Aos => aos_cell_pair(functor, ca, cb, true),
                            DataLayout::Soa => {
                                let (la, lb) = (ca.soa.len(), cb.soa.len());
                                functor.soa_pair(&mut ca.soa, 0..la, &mut cb.soa, 0..lb, true);
                            }
                        }
                    }
                }
                if spec.layout == DataLayout::Soa {
                    for cell in self
                        .owned
                        .leaf_cells
                        .iter_mut()
                        .chain(self.halo.leaf_cells.iter_mut())
                    {
                        let soa = std::mem::take(&mut cell.soa);
                        functor.soa_extract(&soa, cell.particles_mut());
                        cell.soa = soa;
                    }
                }
            }
            TraversalChoice::OctreeNaive => {
                if spec.layout == DataLayout::Soa {
                    return Err(ShoalError::InvalidArgument(
                        "octree-naive supports aos only".into(),
                    ));
                }
                // One-way writes against each neighbor, both directions
                // over the whole enumeration.
                for (lid, &leaf) in owned_leaves.iter().enumerate() {
                    let base_cell = self.owned.leaf_cell_index(leaf);
                    aos_cell_self(functor, &mut self.owned.leaf_cells[base_cell], false);
                    for &nb in &neighbors[lid] {
                        let nb_cell = self.owned.leaf_cell_index(nb);
                        let (ca, cb) =
                            two_cells_mut(&mut self.owned.leaf_cells, base_cell, nb_cell);
                        for pi in ca.particles_mut() {
                            if pi.is_dummy() {
                                continue;
                            }
                            for pj in cb.particles_mut() {
                                if pj.is_dummy() {
                                    continue;
                                }
                                functor.aos_pair(pi, pj, false);
                            }
                        }
                    }
                    let node_min = sub_scalar(self.owned.nodes[leaf].box_min, il);
                    let node_max = add_scalar(self.owned.nodes[leaf].box_max, il);
                    for halo_leaf in self.halo.leaves_in_range(node_min, node_max) {
                        let halo_cell = self.halo.leaf_cell_index(halo_leaf);
                        let ca = &mut self.owned.leaf_cells[base_cell];
                        let cb = &mut self.halo.leaf_cells[halo_cell];
                        for pi in ca.particles_mut() {
                            if pi.is_dummy() {
                                continue;
                            }
                            for pj in cb.particles_mut() {
                                if pj.is_dummy() {
                                    continue;
                                }
                                functor.aos_pair(pi, pj, false);
                            }
                        }
                    }
                }
            }
            other => {
                return Err(ShoalError::InvalidArgument(format!(
                    "octree container cannot run {other}"
                )));
            }
        }
        Ok(())
    }

    fn for_each_particle(
        &self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    ) {
        for tree in [&self.owned, &self.halo] {
            for cell in &tree.leaf_cells {
                for p in cell.particles() {
                    if behavior.matches(p.ownership) && region.map_or(true, |r| r.contains(p.pos))
                    {
                        f(p);
                    }
                }
            }
        }
    }

    fn for_each_particle_mut(
        &mut self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&mut Particle),
    ) {
        for tree in [&mut self.owned, &mut self.halo] {
            for cell in &mut tree.leaf_cells {
                for p in cell.particles_mut() {
                    if behavior.matches(p.ownership) && region.map_or(true, |r| r.contains(p.pos))
                    {
                        f(p);
                    }
                }
            }
        }
    }
}
