// SPDX-License-Identifier: AGPL-3.0-only

//! Rule-based tuning strategy.
//!
//! A small expression program evaluated over the current [`LiveInfo`]
//! produces a preferred ordering of the search space: each rule pairs a
//! condition over the scenario statistics with a configuration pattern,
//! and candidates matched by an earlier firing rule are measured first.
//! Non-matching candidates are only deprioritized, never excluded — every
//! candidate is still measured each phase and can win it, the rules just
//! front-load the likely winners.

use crate::containers::ContainerChoice;
use crate::traversals::{DataLayout, TraversalChoice};
use crate::tuning::configuration::Configuration;
use crate::tuning::live_info::LiveInfo;
use crate::tuning::TuningStrategy;

/// A scenario statistic an expression can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    /// Owned particle count.
    NumParticles,
    /// Mean density.
    Density,
    /// Density standard deviation.
    Homogeneity,
    /// Peak bin density.
    MaxDensity,
}

impl Variable {
    fn read(self, info: &LiveInfo) -> f64 {
        match self {
            Self::NumParticles => info.num_particles as f64,
            Self::Density => info.density,
            Self::Homogeneity => info.homogeneity,
            Self::MaxDensity => info.max_density,
        }
    }
}

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Less than.
    Lt,
    /// Greater than.
    Gt,
}

/// A boolean expression over scenario statistics.
#[derive(Debug, Clone)]
pub enum Expr {
    /// `variable <op> threshold`
    Cmp(Variable, CmpOp, f64),
    /// Conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Negation.
    Not(Box<Expr>),
}

impl Expr {
    /// Evaluates the expression against a scenario.
    #[must_use]
    pub fn eval(&self, info: &LiveInfo) -> bool {
        match self {
            Self::Cmp(var, op, threshold) => {
                let value = var.read(info);
                match op {
                    CmpOp::Lt => value < *threshold,
                    CmpOp::Gt => value > *threshold,
                }
            }
            Self::And(a, b) => a.eval(info) && b.eval(info),
            Self::Or(a, b) => a.eval(info) || b.eval(info),
            Self::Not(a) => !a.eval(info),
        }
    }
}

/// A configuration pattern: unset axes match anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigPattern {
    /// Required container, if any.
    pub container: Option<ContainerChoice>,
    /// Required traversal, if any.
    pub traversal: Option<TraversalChoice>,
    /// Required layout, if any.
    pub layout: Option<DataLayout>,
    /// Required Newton-3 mode, if any.
    pub newton3: Option<bool>,
}

impl ConfigPattern {
    /// Whether a configuration matches the pattern.
    #[must_use]
    pub fn matches(&self, config: &Configuration) -> bool {
        self.container.map_or(true, |c| c == config.container)
            && self.traversal.map_or(true, |t| t == config.traversal)
            && self.layout.map_or(true, |l| l == config.layout)
            && self.newton3.map_or(true, |n| n == config.newton3)
    }
}

/// One rule of the program: when `condition` holds, prefer configurations
/// matching `pattern`. Earlier rules take priority.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Scenario condition.
    pub condition: Expr,
    /// Preferred configuration shape.
    pub pattern: ConfigPattern,
}

/// The default rule program: tiny systems direct-sum, inhomogeneous
/// scenarios balanced, everything else cluster- or cell-based.
#[must_use]
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            condition: Expr::Cmp(Variable::NumParticles, CmpOp::Lt, 64.0),
            pattern: ConfigPattern {
                container: Some(ContainerChoice::DirectSum),
                ..ConfigPattern::default()
            },
        },
        Rule {
            condition: Expr::And(
                Box::new(Expr::Cmp(Variable::Homogeneity, CmpOp::Gt, 1.0)),
                Box::new(Expr::Cmp(Variable::NumParticles, CmpOp::Gt, 1000.0)),
            ),
            pattern: ConfigPattern {
                traversal: Some(TraversalChoice::BalancedSliced),
                ..ConfigPattern::default()
            },
        },
    ]
}

/// The program-driven strategy.
#[derive(Debug)]
pub struct RuleBased {
    rules: Vec<Rule>,
    info: LiveInfo,
    times: Vec<Option<u64>>,
    to_test: Vec<usize>,
    cursor: usize,
}

impl RuleBased {
    /// A strategy over the given rule program.
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            info: LiveInfo::default(),
            times: Vec::new(),
            to_test: Vec::new(),
            cursor: 0,
        }
    }

    /// Updates the scenario statistics the rules are evaluated against.
    pub fn set_live_info(&mut self, info: LiveInfo) {
        self.info = info;
    }
}

impl TuningStrategy for RuleBased {
    fn name(&self) -> &'static str {
        "rule-based"
    }

    fn reset(&mut self, candidates: &[Configuration]) {
        self.times = vec![None; candidates.len()];
        self.cursor = 0;
        // Rank, don't exclude: a candidate's priority is the position of
        // the first firing rule whose pattern matches it; unmatched
        // candidates rank behind every match, in enumeration order.
        let firing: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|rule| rule.condition.eval(&self.info))
            .collect();
        let priority = |i: usize| {
            firing
                .iter()
                .position(|rule| rule.pattern.matches(&candidates[i]))
                .unwrap_or(firing.len())
        };
        self.to_test = (0..candidates.len()).collect();
        self.to_test.sort_by_key(|&i| (priority(i), i));
    }

    fn current(&self) -> usize {
        self.to_test[self.cursor.min(self.to_test.len() - 1)]
    }

    fn add_evidence(&mut self, time: u64) -> bool {
        let candidate = self.current();
        self.times[candidate] = Some(time);
        self.cursor += 1;
        self.cursor < self.to_test.len()
    }

    fn optimum(&self) -> usize {
        self.times
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.map(|t| (i, t)))
            .min_by_key(|&(_, t)| t)
            .map_or(0, |(i, _)| i)
    }

    fn update_live_info(&mut self, info: &LiveInfo) {
        self.set_live_info(*info);
    }
}
