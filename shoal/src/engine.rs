// SPDX-License-Identifier: AGPL-3.0-only

//! The engine facade.
//!
//! [`Shoal`] owns the active container, the auto-tuner, and the rebuild
//! cadence. Each `iterate_pairwise` call:
//!
//! 1. opens a tuning phase when the interval elapsed (filtering the search
//!    space through the runtime applicability predicates),
//! 2. migrates the particles into a different container when the active
//!    configuration asks for one — always a rebuild boundary,
//! 3. rebuilds neighbor lists when the cadence or the half-skin
//!    displacement bound demands it,
//! 4. runs the traversal under the active configuration, timed,
//! 5. feeds the measurement back to the tuner (if the functor is relevant
//!    for tuning).
//!
//! Configuration switches never happen mid-evaluation; the active
//! configuration is fixed before the traversal starts.

use std::time::Instant;

use crate::config::EngineConfig;
use crate::containers::{
    ContainerChoice, DirectSum, LinkedCells, LinkedCellsReferences, OctreeContainer,
    ParticleContainer, VerletClusterLists, VerletLists, VerletListsCells,
};
use crate::error::Result;
use crate::functor::PairFunctor;
use crate::geometry::{in_box, Region};
use crate::particle::{IteratorBehavior, Particle};
use crate::traversals::{check_applicable, TraversalSelectorInfo, TraversalSpec};
use crate::tuning::{
    bayesian::Bayesian, enumerate_search_space, full_search::FullSearch, predictive::Predictive,
    rule_based::{default_rules, RuleBased}, AutoTuner, Configuration, LiveInfo, TuningStrategy,
    TuningStrategyChoice,
};

/// The closed set of containers, dispatched by tag.
enum AnyContainer {
    DirectSum(DirectSum),
    LinkedCells(LinkedCells),
    LinkedCellsReferences(LinkedCellsReferences),
    VerletLists(VerletLists),
    VerletListsCells(VerletListsCells),
    VerletClusterLists(VerletClusterLists),
    Octree(OctreeContainer),
}

macro_rules! dispatch {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            AnyContainer::DirectSum($c) => $body,
            AnyContainer::LinkedCells($c) => $body,
            AnyContainer::LinkedCellsReferences($c) => $body,
            AnyContainer::VerletLists($c) => $body,
            AnyContainer::VerletListsCells($c) => $body,
            AnyContainer::VerletClusterLists($c) => $body,
            AnyContainer::Octree($c) => $body,
        }
    };
}

impl AnyContainer {
    fn build(config: &EngineConfig, tuning: &Configuration) -> Result<Self> {
        let (lo, hi) = (config.box_min, config.box_max);
        let (cutoff, skin, csf, strict) = (
            config.cutoff,
            config.skin,
            tuning.cell_size_factor,
            config.strict,
        );
        Ok(match tuning.container {
            ContainerChoice::DirectSum => {
                Self::DirectSum(DirectSum::new(lo, hi, cutoff, skin, strict))
            }
            ContainerChoice::LinkedCells => {
                Self::LinkedCells(LinkedCells::new(lo, hi, cutoff, skin, csf, strict)?)
            }
            ContainerChoice::LinkedCellsReferences => Self::LinkedCellsReferences(
                LinkedCellsReferences::new(lo, hi, cutoff, skin, csf, strict)?,
            ),
            ContainerChoice::VerletLists => {
                Self::VerletLists(VerletLists::new(lo, hi, cutoff, skin, csf, strict)?)
            }
            ContainerChoice::VerletListsCells => {
                Self::VerletListsCells(VerletListsCells::new(lo, hi, cutoff, skin, csf, strict)?)
            }
            ContainerChoice::VerletClusterLists => {
                Self::VerletClusterLists(VerletClusterLists::new(lo, hi, cutoff, skin, strict))
            }
            ContainerChoice::Octree => {
                Self::Octree(OctreeContainer::new(lo, hi, cutoff, skin, csf, strict))
            }
        })
    }

    fn choice(&self) -> ContainerChoice {
        dispatch!(self, c => c.choice())
    }

    fn num_particles(&self) -> usize {
        dispatch!(self, c => c.num_particles())
    }

    fn add(&mut self, p: Particle) -> Result<()> {
        dispatch!(self, c => c.add(p))
    }

    fn add_halo(&mut self, p: Particle) -> Result<()> {
        dispatch!(self, c => c.add_halo(p))
    }

    fn update_halo(&mut self, p: &Particle) -> bool {
        dispatch!(self, c => c.update_halo(p))
    }

    fn delete_halo(&mut self) {
        dispatch!(self, c => c.delete_halo());
    }

    fn update_container(&mut self, keep_lists: bool) -> Vec<Particle> {
        dispatch!(self, c => c.update_container(keep_lists))
    }

    fn delete_all(&mut self) {
        dispatch!(self, c => c.delete_all());
    }

    fn rebuild_neighbor_lists(&mut self, newton3: bool) {
        dispatch!(self, c => c.rebuild_neighbor_lists(newton3));
    }

    fn lists_valid(&self, skin_half: f64) -> bool {
        dispatch!(self, c => c.lists_valid(skin_half))
    }

    fn iterate<F: PairFunctor>(&mut self, functor: &F, spec: &TraversalSpec) -> Result<()> {
        dispatch!(self, c => c.iterate(functor, spec))
    }

    fn for_each_particle(
        &self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    ) {
        dispatch!(self, c => c.for_each_particle(behavior, region, f));
    }

    fn for_each_particle_mut(
        &mut self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&mut Particle),
    ) {
        dispatch!(self, c => c.for_each_particle_mut(behavior, region, f));
    }
}

/// The auto-tuning particle engine.
pub struct Shoal {
    config: EngineConfig,
    container: AnyContainer,
    tuner: AutoTuner,
    active: Configuration,
    iterations_since_rebuild: usize,
}

impl Shoal {
    /// Builds an engine from validated options.
    ///
    /// # Errors
    ///
    /// [`crate::ShoalError::Configuration`] for contradictory options or an empty
    /// search space.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let space = enumerate_search_space(&config.search_space)?;
        let strategy: Box<dyn TuningStrategy> = match config.tuning_strategy {
            TuningStrategyChoice::FullSearch => Box::new(FullSearch::new()),
            TuningStrategyChoice::Predictive => Box::new(Predictive::new()),
            TuningStrategyChoice::Bayesian => Box::new(Bayesian::new(config.tuning_max_evidence)),
            TuningStrategyChoice::RuleBased => Box::new(RuleBased::new(default_rules())),
        };
        let tuner = AutoTuner::new(
            space,
            strategy,
            config.selector_strategy,
            config.tuning_interval,
            config.tuning_samples,
        )?;
        let active = tuner.current_configuration();
        let container = AnyContainer::build(&config, &active)?;
        Ok(Self {
            config,
            container,
            tuner,
            active,
            iterations_since_rebuild: 0,
        })
    }

    /// The engine options.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The configuration the engine currently runs under.
    #[must_use]
    pub fn active_configuration(&self) -> Configuration {
        self.active
    }

    /// Number of completed tuning phases.
    #[must_use]
    pub fn tuning_phases_completed(&self) -> usize {
        self.tuner.phases_completed()
    }

    /// Number of actual (owned + halo) particles.
    #[must_use]
    pub fn num_particles(&self) -> usize {
        self.container.num_particles()
    }

    /// Adds an owned particle.
    ///
    /// # Errors
    ///
    /// [`crate::ShoalError::InvalidArgument`] in strict mode when the position
    /// lies outside the box.
    pub fn add(&mut self, p: Particle) -> Result<()> {
        self.container.add(p)
    }

    /// Adds a halo particle.
    ///
    /// # Errors
    ///
    /// [`crate::ShoalError::InvalidArgument`] in strict mode when the position
    /// lies outside the halo shell.
    pub fn add_halo(&mut self, p: Particle) -> Result<()> {
        self.container.add_halo(p)
    }

    /// Overwrites a stored halo copy by id near the given position.
    pub fn update_halo(&mut self, p: &Particle) -> bool {
        self.container.update_halo(p)
    }

    /// Deletes all halo particles.
    pub fn delete_halo(&mut self) {
        self.container.delete_halo();
    }

    /// Step-boundary sweep; returns the particles that left the box.
    pub fn update_container(&mut self, keep_lists: bool) -> Vec<Particle> {
        self.container.update_container(keep_lists)
    }

    /// Removes every particle.
    pub fn delete_all(&mut self) {
        self.container.delete_all();
    }

    /// Whether `pos` lies inside the local (owned) box.
    #[must_use]
    pub fn is_inside_local_domain(&self, pos: [f64; 3]) -> bool {
        in_box(pos, self.config.box_min, self.config.box_max)
    }

    /// Visits particles under a behavior mask and optional region filter.
    pub fn for_each_particle(
        &self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&Particle),
    ) {
        self.container.for_each_particle(behavior, region, f);
    }

    /// Mutable particle visitation; the integrator seam.
    pub fn for_each_particle_mut(
        &mut self,
        behavior: IteratorBehavior,
        region: Option<&Region>,
        f: &mut dyn FnMut(&mut Particle),
    ) {
        self.container.for_each_particle_mut(behavior, region, f);
    }

    /// Collects matching particles (copies).
    #[must_use]
    pub fn particles(&self, behavior: IteratorBehavior) -> Vec<Particle> {
        let mut out = Vec::new();
        self.for_each_particle(behavior, None, &mut |p| out.push(*p));
        out
    }

    /// Runtime applicability of one configuration under the current
    /// functor capabilities and geometry.
    fn applicability(
        config: &EngineConfig,
        tuning: &Configuration,
        allows_newton3: bool,
        allows_non_newton3: bool,
    ) -> std::result::Result<(), String> {
        if tuning.newton3 && !allows_newton3 {
            return Err("functor disallows newton3".into());
        }
        if !tuning.newton3 && !allows_non_newton3 {
            return Err("functor disallows non-newton3".into());
        }
        let spec = TraversalSpec {
            traversal: tuning.traversal,
            layout: tuning.layout,
            newton3: tuning.newton3,
            load_estimator: tuning.load_estimator,
            num_threads: config.effective_threads(),
        };
        let info = Self::synthesized_info(config, tuning);
        check_applicable(tuning.container, &spec, &info)
    }

    /// Geometry estimate for a configuration whose container may not be
    /// built yet. Cell-based containers get exact grid dimensions; the
    /// adaptive ones (clusters, octree) only see their structural checks.
    fn synthesized_info(config: &EngineConfig, tuning: &Configuration) -> TraversalSelectorInfo {
        let il = config.interaction_length();
        let side = il * tuning.cell_size_factor.max(1.0);
        let mut dims = [0usize; 3];
        for d in 0..3 {
            let extent = config.box_max[d] - config.box_min[d];
            dims[d] = ((extent / side).floor() as usize).max(1) + 2;
        }
        match tuning.container {
            ContainerChoice::VerletClusterLists => TraversalSelectorInfo {
                dims: [usize::MAX, usize::MAX, 1],
                interaction_length: il,
                cell_length: [il; 3],
                cluster_size: crate::tolerances::CLUSTER_SIZE,
            },
            ContainerChoice::DirectSum | ContainerChoice::Octree => TraversalSelectorInfo {
                dims: [2, 1, 1],
                interaction_length: il,
                cell_length: [side; 3],
                cluster_size: 0,
            },
            _ => TraversalSelectorInfo {
                dims,
                interaction_length: il,
                cell_length: [side; 3],
                cluster_size: 0,
            },
        }
    }

    /// Rebuilds the container for a changed configuration, carrying every
    /// particle over. Always a rebuild boundary.
    fn migrate_to(&mut self, tuning: &Configuration) -> Result<()> {
        let owned = self.particles(IteratorBehavior::Owned);
        let halo = self.particles(IteratorBehavior::Halo);
        let mut next = AnyContainer::build(&self.config, tuning)?;
        for p in owned {
            next.add(p)?;
        }
        for p in halo {
            next.add_halo(p)?;
        }
        log::debug!(
            "container migration {} -> {} ({} particles)",
            self.container.choice(),
            next.choice(),
            next.num_particles()
        );
        self.container = next;
        self.iterations_since_rebuild = 0;
        Ok(())
    }

    /// Evaluates the pair functor over all particle pairs within the
    /// cutoff, under the currently active (or currently sampled)
    /// configuration.
    ///
    /// # Errors
    ///
    /// - [`crate::ShoalError::NoApplicableConfiguration`] when a tuning phase
    ///   finds no runnable candidate;
    /// - errors from container construction when a configuration switch
    ///   cannot build its container.
    pub fn iterate_pairwise<F: PairFunctor>(&mut self, functor: &F) -> Result<()> {
        let relevant = functor.is_relevant_for_tuning();

        if relevant && self.tuner.needs_tuning() {
            let positions: Vec<[f64; 3]> = self
                .particles(IteratorBehavior::Owned)
                .iter()
                .map(|p| p.pos)
                .collect();
            let live = LiveInfo::gather(
                &positions,
                self.config.box_min,
                self.config.box_max,
                self.config.cutoff,
            );
            self.tuner.update_live_info(&live);
            let config = &self.config;
            let (n3, non3) = (functor.allows_newton3(), functor.allows_non_newton3());
            self.tuner
                .start_phase(|candidate| Self::applicability(config, candidate, n3, non3))?;
        }

        // Commit to one configuration before touching the container; a
        // switch is a rebuild boundary.
        let desired = if relevant {
            self.tuner.current_configuration()
        } else {
            self.active
        };
        if desired.container != self.active.container
            || (desired.cell_size_factor - self.active.cell_size_factor).abs() > f64::EPSILON
        {
            self.migrate_to(&desired)?;
        }
        self.active = desired;

        let skin_half = self.config.skin / 2.0;
        if self.iterations_since_rebuild >= self.config.rebuild_frequency
            || !self.container.lists_valid(skin_half)
        {
            self.container.rebuild_neighbor_lists(desired.newton3);
            self.iterations_since_rebuild = 0;
        }

        let spec = TraversalSpec {
            traversal: desired.traversal,
            layout: desired.layout,
            newton3: desired.newton3,
            load_estimator: desired.load_estimator,
            num_threads: self.config.effective_threads(),
        };

        let start = Instant::now();
        self.container.iterate(functor, &spec)?;
        let elapsed = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);

        if relevant {
            if self.tuner.in_tuning_phase() {
                self.tuner.record_sample(elapsed);
                // Whatever the phase decided, the next call re-reads the
                // active configuration; nothing switches mid-evaluation.
            } else {
                self.tuner.advance_iteration();
            }
        }
        self.iterations_since_rebuild += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functors::{LennardJones, PairCounter};
    use crate::tuning::SearchSpaceOptions;

    fn engine_with(space: SearchSpaceOptions) -> Shoal {
        let config = EngineConfig {
            box_min: [0.0; 3],
            box_max: [6.0; 3],
            cutoff: 1.0,
            skin: 0.2,
            tuning_interval: 8,
            tuning_samples: 2,
            search_space: space,
            ..EngineConfig::default()
        };
        match Shoal::new(config) {
            Ok(s) => s,
            Err(e) => panic!("engine must build: {e}"),
        }
    }

    fn lattice(engine: &mut Shoal) {
        let mut id = 0;
        for x in 0..6 {
            for y in 0..6 {
                for z in 0..6 {
                    let p = Particle::new(id, [x as f64 + 0.5, y as f64 + 0.5, z as f64 + 0.5]);
                    let Ok(()) = engine.add(p) else { panic!("in box") };
                    id += 1;
                }
            }
        }
    }

    #[test]
    fn engine_runs_a_full_tuning_phase() {
        let mut engine = engine_with(SearchSpaceOptions {
            containers: vec![ContainerChoice::LinkedCells],
            ..SearchSpaceOptions::default()
        });
        lattice(&mut engine);
        let lj = LennardJones::new(1.0, 1.0, 1.0);
        for _ in 0..200 {
            let Ok(()) = engine.iterate_pairwise(&lj) else {
                panic!("iteration must run");
            };
            if engine.tuning_phases_completed() > 0 {
                break;
            }
        }
        assert!(engine.tuning_phases_completed() > 0, "phase must complete");
    }

    #[test]
    fn container_migration_preserves_particles() {
        let mut engine = engine_with(SearchSpaceOptions::default());
        lattice(&mut engine);
        let before = engine.num_particles();
        // walk through a whole phase: every candidate container is built
        let lj = LennardJones::new(1.0, 1.0, 1.0);
        for _ in 0..500 {
            let Ok(()) = engine.iterate_pairwise(&lj) else {
                panic!("iteration must run");
            };
            assert_eq!(engine.num_particles(), before, "migration loses nothing");
            if engine.tuning_phases_completed() > 0 {
                break;
            }
        }
        assert!(engine.tuning_phases_completed() > 0);
    }

    #[test]
    fn irrelevant_functor_does_not_tune(){
        let mut engine = engine_with(SearchSpaceOptions {
            containers: vec![ContainerChoice::LinkedCells],
            ..SearchSpaceOptions::default()
        });
        lattice(&mut engine);
        let counter = PairCounter::new(1.0);
        for _ in 0..20 {
            let Ok(()) = engine.iterate_pairwise(&counter) else {
                panic!("iteration must run");
            };
        }
        assert_eq!(
            engine.tuning_phases_completed(),
            0,
            "diagnostic functors must not drive tuning"
        );
    }

    #[test]
    fn displacement_forces_rebuild_between_iterations() {
        let mut engine = engine_with(SearchSpaceOptions {
            containers: vec![ContainerChoice::VerletListsCells],
            ..SearchSpaceOptions::default()
        });
        lattice(&mut engine);
        let lj = LennardJones::new(1.0, 1.0, 1.0);
        let Ok(()) = engine.iterate_pairwise(&lj) else {
            panic!("first iteration");
        };
        // push one particle beyond skin/2; the next iteration must not
        // silently use stale lists (it rebuilds and still computes forces)
        engine.for_each_particle_mut(IteratorBehavior::Owned, None, &mut |p| {
            if p.id == 0 {
                p.pos[0] += 0.3;
            }
        });
        let Ok(()) = engine.iterate_pairwise(&lj) else {
            panic!("second iteration");
        };
        assert_eq!(engine.iterations_since_rebuild, 1, "rebuild happened just now");
    }

    #[test]
    fn is_inside_local_domain_matches_box() {
        let engine = engine_with(SearchSpaceOptions {
            containers: vec![ContainerChoice::LinkedCells],
            ..SearchSpaceOptions::default()
        });
        assert!(engine.is_inside_local_domain([3.0; 3]));
        assert!(!engine.is_inside_local_domain([6.0, 3.0, 3.0]));
    }
}
