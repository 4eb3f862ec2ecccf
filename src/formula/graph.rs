// src/formula/graph.rs

//! Requirement resolution
//!
//! Produces the install order for a formula's requirement closure: every
//! requirement before its dependents, each formula once, the root last.
//!
//! The walk is a depth-first topological sort that keeps the current path
//! on a stack. Reaching a node that is already on the path means the graph
//! has a cycle, and resolution fails with the cycle spelled out
//! (`a -> b -> a`); a partial order is never returned.
//!
//! Which edges are followed depends on the [`Phase`]:
//!
//! | phase     | root follows              | everything else follows |
//! |-----------|---------------------------|-------------------------|
//! | `Install` | build, runtime            | build, runtime          |
//! | `Test`    | build, runtime, test      | build, runtime          |
//!
//! Requirements of requirements are only ever installed, so their test
//! requirements never enter the closure.

use crate::error::{Error, Result};
use crate::formula::format::{Formula, RequirementKind};
use crate::index::FormulaIndex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Lifecycle phase a resolution is performed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Install,
    Test,
}

impl Phase {
    /// Requirement kinds followed from the root formula
    pub fn root_kinds(&self) -> &'static [RequirementKind] {
        match self {
            Phase::Install => INSTALL_KINDS,
            Phase::Test => TEST_KINDS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Install => "install",
            Phase::Test => "test",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const INSTALL_KINDS: &[RequirementKind] = &[RequirementKind::Build, RequirementKind::Runtime];
const TEST_KINDS: &[RequirementKind] = &[
    RequirementKind::Build,
    RequirementKind::Runtime,
    RequirementKind::Test,
];

/// Resolves requirement closures against a [`FormulaIndex`]
pub struct Resolver<'a> {
    index: &'a dyn FormulaIndex,
}

struct Walk {
    order: Vec<Arc<Formula>>,
    done: HashSet<String>,
    path: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a dyn FormulaIndex) -> Self {
        Self { index }
    }

    /// Total order over the closure of `root` for `phase`, root last
    pub fn resolve(&self, root: &Arc<Formula>, phase: Phase) -> Result<Vec<Arc<Formula>>> {
        let mut walk = Walk {
            order: Vec::new(),
            done: HashSet::new(),
            path: Vec::new(),
        };
        self.visit(Arc::clone(root), phase.root_kinds(), &mut walk)?;
        Ok(walk.order)
    }

    /// Like [`resolve`](Self::resolve) but returns names only
    pub fn resolve_names(&self, root: &Arc<Formula>, phase: Phase) -> Result<Vec<String>> {
        Ok(self
            .resolve(root, phase)?
            .into_iter()
            .map(|f| f.name.clone())
            .collect())
    }

    fn visit(
        &self,
        formula: Arc<Formula>,
        kinds: &[RequirementKind],
        walk: &mut Walk,
    ) -> Result<()> {
        if walk.done.contains(&formula.name) {
            return Ok(());
        }
        if let Some(start) = walk.path.iter().position(|n| *n == formula.name) {
            let mut cycle = walk.path[start..].to_vec();
            cycle.push(formula.name.clone());
            return Err(Error::CyclicDependency { cycle });
        }

        walk.path.push(formula.name.clone());

        for req in formula.requirements_of(kinds) {
            let dep = self
                .index
                .lookup(&req.name)?
                .ok_or_else(|| Error::UnresolvedRequirement {
                    name: req.name.clone(),
                    required_by: formula.name.clone(),
                })?;
            self.visit(dep, INSTALL_KINDS, walk)?;
        }

        walk.path.pop();
        walk.done.insert(formula.name.clone());
        walk.order.push(formula);
        Ok(())
    }
}
