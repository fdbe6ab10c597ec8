// src/solver.rs

//! The internal solver: goals in, ordered action plan out
//!
//! Greedy backtracking over a frontier of unsatisfied compound
//! dependencies. Candidates are ranked by (prefer flag, already installed,
//! version, architecture priority); a candidate that introduces a conflict
//! is rejected and the next one tried. All checks run against the tentative
//! world, so conflicts surface before anything touches the filesystem. On
//! failure the frontier at the last backtrack is reported as the blocking
//! chain.

use crate::config::Config;
use crate::depend::{
    ensure_abstract_dependencies, ensure_dependencies, possibility_satisfied, CompoundDep,
    DepKind, Possibility,
};
use crate::error::{Error, Result};
use crate::index::{AbsId, PkgId, PkgIndex};
use crate::pkg::StateFlags;
use crate::version::{constraint_satisfied, PkgVersion, VersionOp};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Operation the transaction engine performs for one package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgOp {
    Install,
    Configure,
    Remove,
    Purge,
    Noop,
}

/// One step of the plan, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanAction {
    pub pkg: PkgId,
    pub op: PkgOp,
}

/// The solver's output: a linear plan honoring the ordering guarantees
#[derive(Debug, Default)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions
            .iter()
            .all(|a| a.op == PkgOp::Noop)
    }

    pub fn ops_for(&self, pkg: PkgId) -> Vec<PkgOp> {
        self.actions
            .iter()
            .filter(|a| a.pkg == pkg)
            .map(|a| a.op)
            .collect()
    }
}

/// What the user asked for
#[derive(Debug, Clone)]
pub enum Goal {
    Install {
        name: String,
        version: Option<PkgVersion>,
    },
    Remove {
        name: String,
        purge: bool,
    },
    /// Upgrade one name, or everything installed when None
    Upgrade { name: Option<String> },
}

pub struct Solver<'a> {
    index: &'a mut PkgIndex,
    config: &'a Config,
    tentative: Vec<PkgId>,
    removals: Vec<(PkgId, bool)>,
    noops: Vec<PkgId>,
}

impl<'a> Solver<'a> {
    pub fn new(index: &'a mut PkgIndex, config: &'a Config) -> Self {
        Self {
            index,
            config,
            tentative: Vec::new(),
            removals: Vec::new(),
            noops: Vec::new(),
        }
    }

    /// Compute a plan satisfying every goal, or the blocking chain
    pub fn solve(mut self, goals: &[Goal]) -> Result<Plan> {
        for goal in goals {
            match goal {
                Goal::Install { name, version } => self.goal_install(name, version.as_ref())?,
                Goal::Remove { name, purge } => self.goal_remove(name, *purge)?,
                Goal::Upgrade { name } => self.goal_upgrade(name.as_deref())?,
            }
        }
        self.into_plan()
    }

    fn arch_priority(&self, id: PkgId) -> u32 {
        let pkg = self.index.pkg(id);
        if pkg.arch_priority > 0 {
            pkg.arch_priority
        } else {
            self.config.arch_priority(pkg.architecture.as_deref())
        }
    }

    fn is_removal_scheduled(&self, id: PkgId) -> bool {
        self.removals.iter().any(|(r, _)| *r == id)
    }

    /// Is this possibility already met by the installed plus tentative world?
    fn possibility_met(&self, poss: &Possibility) -> bool {
        let entry = self.index.abs(poss.target);
        // The rolled-up status says whether any provider is on disk at
        // all; when it says no, only tentative members can satisfy.
        let anything_installed = entry.state_status.has_files();
        entry.providers.iter().any(|&p| {
            let live = (anything_installed
                && self.index.pkg(p).state_status.has_files()
                && !self.is_removal_scheduled(p))
                || self.tentative.contains(&p);
            live && possibility_satisfied(self.index, poss, p)
        })
    }

    fn compound_met(&self, dep: &CompoundDep) -> bool {
        dep.possibilities.iter().any(|p| self.possibility_met(p))
    }

    /// Rank and collect candidates for a compound term, best first
    ///
    /// Every possibility contributes its providers; the prefer flag beats
    /// installedness beats version beats arch priority beats pipe position.
    fn candidates_for(&mut self, dep: &CompoundDep) -> Result<Vec<PkgId>> {
        let mut scored: Vec<(bool, bool, PkgVersion, u32, usize, PkgId)> = Vec::new();

        for (pipe_pos, poss) in dep.possibilities.iter().enumerate() {
            ensure_abstract_dependencies(self.index, poss.target)?;
            for &cand in self.index.abs(poss.target).providers.clone().iter() {
                if self.arch_priority(cand) == 0 {
                    continue;
                }
                if !possibility_satisfied(self.index, poss, cand) {
                    continue;
                }
                let pkg = self.index.pkg(cand);
                // Held candidates only count while already satisfying,
                // which possibility_met handles before we get here.
                if pkg.is_held() && !pkg.state_status.has_files() {
                    continue;
                }
                scored.push((
                    pkg.state_flags.contains(StateFlags::PREFER),
                    pkg.state_status.has_files(),
                    pkg.version.clone(),
                    self.arch_priority(cand),
                    pipe_pos,
                    cand,
                ));
            }
        }

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(b.2.cmp(&a.2))
                .then(b.3.cmp(&a.3))
                .then(a.4.cmp(&b.4))
        });
        scored.dedup_by_key(|entry| entry.5);
        Ok(scored.into_iter().map(|entry| entry.5).collect())
    }

    /// Check a tentative candidate's Conflicts against the live world
    fn find_conflict(&mut self, cand: PkgId) -> Result<Option<String>> {
        ensure_dependencies(self.index, cand)?;
        let conflicts = self.index.pkg(cand).conflicts.clone();
        for dep in &conflicts {
            for poss in &dep.possibilities {
                for &victim in self.index.abs(poss.target).providers.clone().iter() {
                    if victim == cand {
                        continue;
                    }
                    let live = (self.index.pkg(victim).state_status.has_files()
                        && !self.is_removal_scheduled(victim))
                        || self.tentative.contains(&victim);
                    if live && possibility_satisfied(self.index, poss, victim) {
                        return Ok(Some(format!(
                            "{} conflicts with {} {}",
                            self.index.pkg(cand).name,
                            self.index.pkg(victim).name,
                            self.index.pkg(victim).version_str()
                        )));
                    }
                }
            }
        }

        // Mirror image: something live conflicts with the candidate.
        let cand_name = self.index.pkg(cand).name.clone();
        let live_ids: Vec<PkgId> = self
            .index
            .all_with_files()
            .into_iter()
            .filter(|&p| !self.is_removal_scheduled(p))
            .chain(self.tentative.iter().copied())
            .collect();
        for holder in live_ids {
            if holder == cand {
                continue;
            }
            ensure_dependencies(self.index, holder)?;
            let conflicts = self.index.pkg(holder).conflicts.clone();
            for dep in &conflicts {
                for poss in &dep.possibilities {
                    if possibility_satisfied(self.index, poss, cand) {
                        return Ok(Some(format!(
                            "installed {} conflicts with {}",
                            self.index.pkg(holder).name,
                            cand_name
                        )));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Tentatively add a candidate and satisfy its dependencies, undoing
    /// the addition if anything beneath it fails
    fn schedule(&mut self, cand: PkgId, chain: &mut Vec<String>) -> Result<()> {
        if self.tentative.contains(&cand) {
            return Ok(());
        }

        if let Some(conflict) = self.find_conflict(cand)? {
            chain.push(conflict.clone());
            return Err(Error::Resolution {
                chain: chain.clone(),
            });
        }

        let mark = self.tentative.len();
        self.tentative.push(cand);
        // Until a goal claims it, anything scheduled here was pulled in as
        // a dependency.
        self.index.pkg_mut(cand).auto_installed = true;
        ensure_dependencies(self.index, cand)?;

        let deps = self.index.pkg(cand).deps.clone();
        for dep in deps {
            let wanted = match dep.kind {
                DepKind::PreDepend | DepKind::Depend | DepKind::GreedyDepend => true,
                DepKind::Recommend => self.config.add_recommends,
                DepKind::Suggest => false,
                DepKind::Conflict | DepKind::Replace => false,
            };
            if !wanted {
                continue;
            }
            let requester = format!(
                "{} {}",
                self.index.pkg(cand).name,
                self.index.pkg(cand).version_str()
            );
            if let Err(e) = self.satisfy(&dep, &requester, chain) {
                // Backtrack: drop this candidate and everything scheduled
                // beneath it.
                self.tentative.truncate(mark);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Satisfy one compound term, trying ranked candidates in turn
    ///
    /// A failed candidate's chain entries are rolled back before the next
    /// try, so only the final failure's frontier is reported.
    fn satisfy(&mut self, dep: &CompoundDep, requester: &str, chain: &mut Vec<String>) -> Result<()> {
        if self.compound_met(dep) {
            return Ok(());
        }

        let rendered = crate::depend::compound_to_string(self.index, dep);
        chain.push(format!("{} requires {}", requester, rendered));
        let depth = chain.len();

        let candidates = self.candidates_for(dep)?;
        let mut last_err: Option<Error> = None;
        for cand in candidates {
            debug!(
                "trying {} {} for '{}'",
                self.index.pkg(cand).name,
                self.index.pkg(cand).version_str(),
                rendered
            );
            match self.schedule(cand, chain) {
                Ok(()) => {
                    chain.truncate(depth - 1);
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(e);
                    chain.truncate(depth);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Resolution {
            chain: chain.clone(),
        }))
    }

    fn goal_install(&mut self, name: &str, version: Option<&PkgVersion>) -> Result<()> {
        let abs = self.index.intern_abstract(name);
        ensure_abstract_dependencies(self.index, abs)?;

        // Already satisfied and not held back by a version request?
        if let Some(installed) = self.index.installed_version_of(name) {
            let ok = match version {
                Some(v) => &self.index.pkg(installed).version == v,
                None => true,
            };
            if ok {
                info!("{} is already installed", name);
                self.noops.push(installed);
                return Ok(());
            }
        }

        let dep = goal_compound(abs, version);
        let mut chain = Vec::new();
        self.satisfy(&dep, "requested goal", &mut chain)?;

        // The package that directly satisfies the goal was asked for by
        // the user, not pulled in.
        if let Some(chosen) = self
            .tentative
            .iter()
            .copied()
            .find(|&t| self.index.pkg(t).provides.contains(&abs))
        {
            let pkg = self.index.pkg_mut(chosen);
            pkg.auto_installed = false;
            pkg.state_flags.set(StateFlags::USER);
        }
        Ok(())
    }

    fn goal_remove(&mut self, name: &str, purge: bool) -> Result<()> {
        // Purge also applies to packages already reduced to config-files.
        let target = self.index.installed_version_of(name).or_else(|| {
            if purge {
                self.index
                    .versions_of(name)
                    .iter()
                    .copied()
                    .find(|&id| {
                        self.index.pkg(id).state_status == crate::pkg::StateStatus::ConfigFiles
                    })
            } else {
                None
            }
        });
        let Some(installed) = target else {
            return Err(Error::Resolution {
                chain: vec![format!("{} is not installed", name)],
            });
        };

        if self.index.pkg(installed).essential && !self.config.force_removal_of_essential {
            return Err(Error::Resolution {
                chain: vec![format!(
                    "{} is essential and cannot be removed without force",
                    name
                )],
            });
        }

        // Warn about dependants that will lose this package.
        let abs = self.index.intern_abstract(name);
        for &dependant in self.index.abs(abs).depended_upon_by.clone().iter() {
            if self.index.pkg(dependant).state_status.has_files() {
                warn!(
                    "removing {} leaves {} with an unsatisfied dependency",
                    name,
                    self.index.pkg(dependant).name
                );
            }
        }

        self.removals.push((installed, purge));
        Ok(())
    }

    fn goal_upgrade(&mut self, name: Option<&str>) -> Result<()> {
        let targets: Vec<String> = match name {
            Some(n) => vec![n.to_string()],
            None => self
                .index
                .all_with_files()
                .into_iter()
                .map(|id| self.index.pkg(id).name.clone())
                .collect(),
        };

        for name in targets {
            let Some(installed) = self.index.installed_version_of(&name) else {
                continue;
            };
            if self.index.pkg(installed).is_held() {
                info!("not upgrading {}: held", name);
                continue;
            }
            let best = self
                .index
                .sorted_versions_of(&name)
                .into_iter()
                .find(|&id| self.arch_priority(id) > 0);
            let Some(best) = best else { continue };
            if self.index.pkg(best).version <= self.index.pkg(installed).version {
                continue;
            }
            let was_auto = self.index.pkg(installed).auto_installed;
            let mut chain = Vec::new();
            self.schedule(best, &mut chain)?;
            // An upgrade keeps the install reason of what it replaces.
            self.index.pkg_mut(best).auto_installed = was_auto;
        }
        Ok(())
    }

    /// Order the tentative set and append removals
    ///
    /// Dependencies sort before dependants; pre-depends edges are hard
    /// (a cycle through them is an error), depends cycles are broken
    /// arbitrarily. Configure steps follow all unpacks unless
    /// `configure_on_unpack`; removals run last, after replacing unpacks.
    fn into_plan(mut self) -> Result<Plan> {
        let order = self.topo_order()?;
        let mut plan = Plan::default();

        for &id in &order {
            plan.actions.push(PlanAction {
                pkg: id,
                op: PkgOp::Install,
            });
            if self.config.configure_on_unpack {
                plan.actions.push(PlanAction {
                    pkg: id,
                    op: PkgOp::Configure,
                });
            }
        }
        if !self.config.configure_on_unpack {
            for &id in &order {
                plan.actions.push(PlanAction {
                    pkg: id,
                    op: PkgOp::Configure,
                });
            }
        }
        for &(id, purge) in &self.removals {
            if self.index.pkg(id).state_status.has_files() {
                plan.actions.push(PlanAction {
                    pkg: id,
                    op: PkgOp::Remove,
                });
            }
            if purge {
                plan.actions.push(PlanAction {
                    pkg: id,
                    op: PkgOp::Purge,
                });
            }
        }
        for id in self.noops.drain(..) {
            plan.actions.push(PlanAction {
                pkg: id,
                op: PkgOp::Noop,
            });
        }
        Ok(plan)
    }

    fn topo_order(&mut self) -> Result<Vec<PkgId>> {
        let set: HashSet<PkgId> = self.tentative.iter().copied().collect();
        let mut order: Vec<PkgId> = Vec::new();
        let mut done: HashSet<PkgId> = HashSet::new();

        // Edges within the tentative set: id needs -> provider ids
        let mut edges: Vec<(PkgId, Vec<PkgId>, Vec<PkgId>)> = Vec::new();
        for &id in &self.tentative {
            ensure_dependencies(self.index, id)?;
            let mut pre = Vec::new();
            let mut soft = Vec::new();
            for dep in self.index.pkg(id).deps.clone() {
                let hard = dep.kind == DepKind::PreDepend;
                if !matches!(
                    dep.kind,
                    DepKind::PreDepend | DepKind::Depend | DepKind::GreedyDepend
                ) {
                    continue;
                }
                for poss in &dep.possibilities {
                    for &prov in self.index.abs(poss.target).providers.clone().iter() {
                        if prov != id
                            && set.contains(&prov)
                            && possibility_satisfied(self.index, poss, prov)
                        {
                            if hard {
                                pre.push(prov);
                            } else {
                                soft.push(prov);
                            }
                        }
                    }
                }
            }
            edges.push((id, pre, soft));
        }

        // Kahn-style peeling; prefer nodes with no pending edges at all,
        // fall back to breaking a depends cycle, never a pre-depends one.
        while done.len() < set.len() {
            let pick_free = edges.iter().find(|(id, pre, soft)| {
                !done.contains(id)
                    && pre.iter().all(|p| done.contains(p))
                    && soft.iter().all(|p| done.contains(p))
            });
            let pick = match pick_free {
                Some((id, _, _)) => Some(*id),
                None => {
                    let cycle_break = edges.iter().find(|(id, pre, _)| {
                        !done.contains(id) && pre.iter().all(|p| done.contains(p))
                    });
                    match cycle_break {
                        Some((id, _, _)) => {
                            debug!("breaking dependency cycle at {}", self.index.pkg(*id).name);
                            Some(*id)
                        }
                        None => None,
                    }
                }
            };
            match pick {
                Some(id) => {
                    done.insert(id);
                    order.push(id);
                }
                None => {
                    let stuck: Vec<String> = edges
                        .iter()
                        .filter(|(id, _, _)| !done.contains(id))
                        .map(|(id, _, _)| self.index.pkg(*id).name.clone())
                        .collect();
                    return Err(Error::Resolution {
                        chain: vec![format!(
                            "pre-dependency cycle among: {}",
                            stuck.join(", ")
                        )],
                    });
                }
            }
        }
        Ok(order)
    }
}

/// Build the compound term representing a user goal
fn goal_compound(abs: AbsId, version: Option<&PkgVersion>) -> CompoundDep {
    CompoundDep {
        kind: DepKind::Depend,
        possibilities: vec![Possibility {
            target: abs,
            constraint: version.map(|v| crate::version::VersionConstraint {
                op: VersionOp::Equal,
                version: v.clone(),
            }),
        }],
    }
}

/// Does `new_pkg`'s Replaces cover `victim`?
///
/// Used when file ownership collides during unpack: replacement may adopt
/// a non-conffile file only when declared.
pub fn replaces_covers(index: &PkgIndex, new_pkg: PkgId, victim: PkgId) -> bool {
    let victim_version = &index.pkg(victim).version;
    index.pkg(new_pkg).replaces.iter().any(|dep| {
        dep.possibilities.iter().any(|poss| {
            index.pkg(victim).provides.contains(&poss.target)
                && poss
                    .constraint
                    .as_ref()
                    .map(|c| constraint_satisfied(c.op, victim_version, &c.version))
                    .unwrap_or(true)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::{Package, StateStatus, StateWant};

    fn pkg(name: &str, ver: &str) -> Package {
        let mut p = Package::new(name, PkgVersion::parse(ver).unwrap());
        p.arch_priority = 1;
        p
    }

    fn installed(name: &str, ver: &str) -> Package {
        let mut p = pkg(name, ver);
        p.state_status = StateStatus::Installed;
        p.state_want = StateWant::Install;
        p
    }

    fn names(index: &PkgIndex, plan: &Plan, op: PkgOp) -> Vec<String> {
        plan.actions
            .iter()
            .filter(|a| a.op == op)
            .map(|a| index.pkg(a.pkg).name.clone())
            .collect()
    }

    #[test]
    fn test_install_picks_satisfying_version() {
        // A depends on B (>= 1.2); repo has B 1.2-1 and B 1.1-5.
        let mut index = PkgIndex::new();
        let mut a = pkg("a", "1.0-1");
        a.depends_str = Some("b (>= 1.2)".to_string());
        index.insert(a);
        index.insert(pkg("b", "1.2-1"));
        index.insert(pkg("b", "1.1-5"));

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "a".to_string(),
                version: None,
            }])
            .unwrap();

        let installs = names(&index, &plan, PkgOp::Install);
        assert_eq!(installs, vec!["b", "a"]);
        let b = plan.actions[0].pkg;
        assert_eq!(index.pkg(b).version_str(), "1.2-1");
    }

    #[test]
    fn test_upgrade_respects_hold() {
        let mut index = PkgIndex::new();
        let mut x = installed("x", "2.0-1");
        x.state_flags.set(StateFlags::HOLD);
        index.insert(x);
        index.insert(pkg("x", "3.0-1"));

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Upgrade { name: None }])
            .unwrap();

        assert!(plan.actions.is_empty());
    }

    #[test]
    fn test_prefer_flag_beats_pipe_order() {
        let mut index = PkgIndex::new();
        let mut top = pkg("top", "1.0-1");
        top.depends_str = Some("p | q".to_string());
        index.insert(top);
        index.insert(pkg("p", "1.0-1"));
        let mut q = pkg("q", "1.0-1");
        q.state_flags.set(StateFlags::PREFER);
        index.insert(q);

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "top".to_string(),
                version: None,
            }])
            .unwrap();

        let installs = names(&index, &plan, PkgOp::Install);
        assert_eq!(installs, vec!["q", "top"]);
    }

    #[test]
    fn test_pipe_order_breaks_ties() {
        let mut index = PkgIndex::new();
        let mut top = pkg("top", "1.0-1");
        top.depends_str = Some("p | q".to_string());
        index.insert(top);
        index.insert(pkg("p", "1.0-1"));
        index.insert(pkg("q", "1.0-1"));

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "top".to_string(),
                version: None,
            }])
            .unwrap();

        assert_eq!(names(&index, &plan, PkgOp::Install), vec!["p", "top"]);
    }

    #[test]
    fn test_conflict_with_installed_rejected() {
        let mut index = PkgIndex::new();
        index.insert(installed("s", "1.0-1"));
        let mut r = pkg("r", "1.0-1");
        r.conflicts_str = Some("s".to_string());
        index.insert(r);

        let config = Config::default();
        let err = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "r".to_string(),
                version: None,
            }])
            .unwrap_err();

        match err {
            Error::Resolution { chain } => {
                assert!(chain.iter().any(|l| l.contains("conflicts with")));
            }
            other => panic!("expected resolution error, got {}", other),
        }
    }

    #[test]
    fn test_backtracks_around_conflicting_alternative() {
        // top depends on "p | q"; p conflicts with installed s, q is clean.
        let mut index = PkgIndex::new();
        index.insert(installed("s", "1.0-1"));
        let mut top = pkg("top", "1.0-1");
        top.depends_str = Some("p | q".to_string());
        index.insert(top);
        let mut p = pkg("p", "2.0-1");
        p.conflicts_str = Some("s".to_string());
        index.insert(p);
        index.insert(pkg("q", "1.0-1"));

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "top".to_string(),
                version: None,
            }])
            .unwrap();

        assert_eq!(names(&index, &plan, PkgOp::Install), vec!["q", "top"]);
    }

    #[test]
    fn test_pre_depends_order_and_configure_phase() {
        let mut index = PkgIndex::new();
        let mut app = pkg("app", "1.0-1");
        app.pre_depends_str = Some("loader".to_string());
        app.depends_str = Some("lib".to_string());
        index.insert(app);
        index.insert(pkg("loader", "1.0-1"));
        index.insert(pkg("lib", "1.0-1"));

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "app".to_string(),
                version: None,
            }])
            .unwrap();

        let installs = names(&index, &plan, PkgOp::Install);
        let app_pos = installs.iter().position(|n| n == "app").unwrap();
        let loader_pos = installs.iter().position(|n| n == "loader").unwrap();
        assert!(loader_pos < app_pos);

        // All unpacks precede all configures
        let last_install = plan
            .actions
            .iter()
            .rposition(|a| a.op == PkgOp::Install)
            .unwrap();
        let first_configure = plan
            .actions
            .iter()
            .position(|a| a.op == PkgOp::Configure)
            .unwrap();
        assert!(last_install < first_configure);
    }

    #[test]
    fn test_provider_satisfies_unversioned_dep() {
        let mut index = PkgIndex::new();
        let mut app = pkg("app", "1.0-1");
        app.depends_str = Some("ssh-server".to_string());
        index.insert(app);
        let mut db = pkg("dropbear", "2022.83-1");
        db.provides_str = Some("ssh-server".to_string());
        index.insert(db);

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "app".to_string(),
                version: None,
            }])
            .unwrap();

        assert_eq!(names(&index, &plan, PkgOp::Install), vec!["dropbear", "app"]);
    }

    #[test]
    fn test_installed_provider_satisfies_dep() {
        let mut index = PkgIndex::new();
        let mut app = pkg("app", "1.0-1");
        app.depends_str = Some("ssh-server".to_string());
        index.insert(app);
        let mut db = installed("dropbear", "2022.83-1");
        db.provides_str = Some("ssh-server".to_string());
        index.insert(db);

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "app".to_string(),
                version: None,
            }])
            .unwrap();

        // dropbear already covers the dependency; only app is unpacked
        assert_eq!(names(&index, &plan, PkgOp::Install), vec!["app"]);
    }

    #[test]
    fn test_missing_dep_reports_chain() {
        let mut index = PkgIndex::new();
        let mut app = pkg("app", "1.0-1");
        app.depends_str = Some("nowhere (>= 2.0)".to_string());
        index.insert(app);

        let config = Config::default();
        let err = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "app".to_string(),
                version: None,
            }])
            .unwrap_err();

        match err {
            Error::Resolution { ref chain } => {
                assert!(chain.iter().any(|l| l.contains("app 1.0-1 requires nowhere (>= 2.0)")));
            }
            ref other => panic!("unexpected error {}", other),
        }
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_essential_removal_blocked() {
        let mut index = PkgIndex::new();
        let mut base = installed("base-files", "1.0-1");
        base.essential = true;
        index.insert(base);

        let config = Config::default();
        let err = Solver::new(&mut index, &config)
            .solve(&[Goal::Remove {
                name: "base-files".to_string(),
                purge: false,
            }])
            .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));

        let mut forced = Config::default();
        forced.force_removal_of_essential = true;
        let plan = Solver::new(&mut index, &forced)
            .solve(&[Goal::Remove {
                name: "base-files".to_string(),
                purge: false,
            }])
            .unwrap();
        assert_eq!(names(&index, &plan, PkgOp::Remove), vec!["base-files"]);
    }

    #[test]
    fn test_already_installed_is_noop() {
        let mut index = PkgIndex::new();
        index.insert(installed("a", "1.0-1"));

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "a".to_string(),
                version: None,
            }])
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].op, PkgOp::Noop);
    }

    #[test]
    fn test_recommends_only_with_policy() {
        let mut index = PkgIndex::new();
        let mut app = pkg("app", "1.0-1");
        app.recommends_str = Some("extra".to_string());
        index.insert(app);
        index.insert(pkg("extra", "1.0-1"));

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "app".to_string(),
                version: None,
            }])
            .unwrap();
        assert_eq!(names(&index, &plan, PkgOp::Install), vec!["app"]);

        let mut index2 = PkgIndex::new();
        let mut app = pkg("app", "1.0-1");
        app.recommends_str = Some("extra".to_string());
        index2.insert(app);
        index2.insert(pkg("extra", "1.0-1"));

        let mut with_rec = Config::default();
        with_rec.add_recommends = true;
        let plan = Solver::new(&mut index2, &with_rec)
            .solve(&[Goal::Install {
                name: "app".to_string(),
                version: None,
            }])
            .unwrap();
        assert_eq!(names(&index2, &plan, PkgOp::Install), vec!["extra", "app"]);
    }

    #[test]
    fn test_unsupported_arch_filtered() {
        let mut index = PkgIndex::new();
        let mut app = pkg("app", "1.0-1");
        app.depends_str = Some("lib".to_string());
        index.insert(app);
        let mut lib_foreign = Package::new("lib", PkgVersion::parse("2.0-1").unwrap());
        lib_foreign.architecture = Some("mips".to_string());
        index.insert(lib_foreign);
        index.insert(pkg("lib", "1.0-1"));

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "app".to_string(),
                version: None,
            }])
            .unwrap();

        let lib = plan.actions[0].pkg;
        assert_eq!(index.pkg(lib).name, "lib");
        assert_eq!(index.pkg(lib).version_str(), "1.0-1");
    }

    #[test]
    fn test_dependency_marked_auto_installed() {
        let mut index = PkgIndex::new();
        let mut a = pkg("a", "1.0-1");
        a.depends_str = Some("b".to_string());
        index.insert(a);
        index.insert(pkg("b", "1.0-1"));

        let config = Config::default();
        let plan = Solver::new(&mut index, &config)
            .solve(&[Goal::Install {
                name: "a".to_string(),
                version: None,
            }])
            .unwrap();

        let b = plan.actions[0].pkg;
        let a = plan.actions[1].pkg;
        assert!(index.pkg(b).auto_installed);
        assert!(!index.pkg(a).auto_installed);
        assert!(index.pkg(a).state_flags.contains(StateFlags::USER));
    }

    #[test]
    fn test_replaces_covers() {
        let mut index = PkgIndex::new();
        let victim = index.insert(installed("oldtool", "1.0-1"));
        let mut new = pkg("newtool", "2.0-1");
        new.replaces_str = Some("oldtool (<< 2.0)".to_string());
        let new_id = index.insert(new);
        ensure_dependencies(&mut index, new_id).unwrap();

        assert!(replaces_covers(&index, new_id, victim));

        let mut unrelated = pkg("other", "1.0-1");
        unrelated.replaces_str = Some("somethingelse".to_string());
        let other_id = index.insert(unrelated);
        ensure_dependencies(&mut index, other_id).unwrap();
        assert!(!replaces_covers(&index, other_id, victim));
    }
}
