//! Execution planning: dependency DAG, ordering edges, and waves.

use crate::error::ConfigError;
use crate::scenario::Suite;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Placement of one scenario in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedScenario {
    pub id: String,
    /// Declared dependencies. A dependency that does not pass skips this scenario.
    pub depends_on: Vec<String>,
    /// Scenarios sharing this one's static resource key that must finish first.
    /// Ordering only; their outcome never causes a skip.
    pub ordered_after: Vec<String>,
    /// Resource key known at load time, if any.
    pub static_key: Option<String>,
    /// Zero-based wave index.
    pub wave: usize,
}

impl PlannedScenario {
    /// Every scenario that must complete before this one starts.
    pub fn predecessors(&self) -> impl Iterator<Item = &str> {
        self.depends_on
            .iter()
            .chain(&self.ordered_after)
            .map(String::as_str)
    }
}

/// A cycle-free execution order for a suite.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Scenarios in topological order, ties broken by declaration order.
    scenarios: Vec<PlannedScenario>,
    waves: Vec<Vec<String>>,
}

impl Plan {
    /// Builds the plan, failing on a dependency cycle.
    pub fn build(suite: &Suite) -> Result<Self, ConfigError> {
        let index: HashMap<&str, usize> = suite
            .scenarios
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(suite.scenarios.len());
        for scenario in &suite.scenarios {
            let mut edges = Vec::new();
            for dependency in &scenario.depends_on {
                let dep = index.get(dependency.as_str()).copied().ok_or_else(|| {
                    ConfigError::UnknownDependency {
                        scenario: scenario.id.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                edges.push(dep);
            }
            deps.push(edges);
        }

        if let Some(cycle) = find_cycle(&deps) {
            return Err(ConfigError::CyclicDependency {
                cycle: cycle
                    .into_iter()
                    .map(|i| suite.scenarios[i].id.clone())
                    .collect(),
            });
        }

        let order = topological_order(&deps);

        // Chain scenarios that share a static key in topological order.
        let static_keys: Vec<Option<String>> = suite
            .scenarios
            .iter()
            .map(|s| s.static_resource_key())
            .collect();
        let mut ordered_after: Vec<Vec<usize>> = vec![Vec::new(); suite.scenarios.len()];
        let mut last_on_key: HashMap<&str, usize> = HashMap::new();
        for &i in &order {
            if let Some(key) = static_keys[i].as_deref() {
                if let Some(prev) = last_on_key.insert(key, i)
                    && !deps[i].contains(&prev)
                {
                    ordered_after[i].push(prev);
                }
            }
        }

        // Wave = longest path from a root over both edge kinds.
        let mut wave = vec![0usize; suite.scenarios.len()];
        for &i in &order {
            wave[i] = deps[i]
                .iter()
                .chain(&ordered_after[i])
                .map(|&p| wave[p] + 1)
                .max()
                .unwrap_or(0);
        }

        let wave_count = wave.iter().max().map_or(0, |w| w + 1);
        let mut waves = vec![Vec::new(); wave_count];
        for &i in &order {
            waves[wave[i]].push(suite.scenarios[i].id.clone());
        }

        let scenarios = order
            .iter()
            .map(|&i| {
                let scenario = &suite.scenarios[i];
                PlannedScenario {
                    id: scenario.id.clone(),
                    depends_on: scenario.depends_on.clone(),
                    ordered_after: ordered_after[i]
                        .iter()
                        .map(|&p| suite.scenarios[p].id.clone())
                        .collect(),
                    static_key: static_keys[i].clone(),
                    wave: wave[i],
                }
            })
            .collect();

        Ok(Self { scenarios, waves })
    }

    /// Scenarios in execution priority order.
    pub fn scenarios(&self) -> &[PlannedScenario] {
        &self.scenarios
    }

    /// Scenario ids grouped by wave.
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Looks up a planned scenario.
    pub fn get(&self, id: &str) -> Option<&PlannedScenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, wave) in self.waves.iter().enumerate() {
            writeln!(f, "wave {}:", n + 1)?;
            for id in wave {
                let Some(planned) = self.get(id) else {
                    continue;
                };
                write!(f, "  {id}")?;
                if let Some(key) = &planned.static_key {
                    write!(f, " [key {key}]")?;
                }
                if !planned.depends_on.is_empty() {
                    write!(f, " after {}", planned.depends_on.join(", "))?;
                }
                if !planned.ordered_after.is_empty() {
                    write!(f, " (serialized after {})", planned.ordered_after.join(", "))?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Returns the scenario indices forming a cycle, first index repeated at the end.
fn find_cycle(deps: &[Vec<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit(
        node: usize,
        deps: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::OnStack;
        stack.push(node);
        for &next in &deps[node] {
            match marks[next] {
                Mark::OnStack => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    // Edges point at dependencies; reverse to read in execution order.
                    let mut cycle: Vec<usize> = stack[start..].iter().rev().copied().collect();
                    cycle.push(cycle[0]);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, deps, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; deps.len()];
    let mut stack = Vec::new();
    for node in 0..deps.len() {
        if marks[node] == Mark::Unvisited
            && let Some(cycle) = visit(node, deps, &mut marks, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}

/// Kahn's algorithm, always taking the earliest-declared ready scenario.
fn topological_order(deps: &[Vec<usize>]) -> Vec<usize> {
    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); deps.len()];
    for (node, edges) in deps.iter().enumerate() {
        for &dep in edges {
            dependents[dep].push(node);
        }
    }

    let mut ready: BTreeSet<usize> = (0..deps.len()).filter(|&n| remaining[n] == 0).collect();
    let mut order = Vec::with_capacity(deps.len());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &dependents[node] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.insert(next);
            }
        }
    }
    order
}
