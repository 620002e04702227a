// Process registry - the dependency graph of supervised programs

use crate::config::EventConfig;
use crate::error::{OverseerError, Result};
use crate::process::Process;
use std::collections::HashMap;

/// Target name that addresses every registered process
pub const ALL_TARGET: &str = "all";

/// Named set of processes plus the rules attached to them
#[derive(Debug, Clone)]
pub struct ProcessGroup {
    pub name: String,
    pub processes: Vec<String>,
    pub events: Vec<EventConfig>,
}

/// In-memory registry of processes keyed by name, iterated in insertion order
#[derive(Debug, Default)]
pub struct Registry {
    processes: Vec<Process>,
    index: HashMap<String, usize>,
    groups: Vec<ProcessGroup>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, process: Process) -> Result<()> {
        if self.index.contains_key(process.name()) {
            return Err(OverseerError::ProcessAlreadyExists(
                process.name().to_string(),
            ));
        }

        self.index
            .insert(process.name().to_string(), self.processes.len());
        self.processes.push(process);
        Ok(())
    }

    pub fn add_group(&mut self, group: ProcessGroup) -> Result<()> {
        if self.groups.iter().any(|g| g.name == group.name) {
            return Err(OverseerError::ConfigValidationError(format!(
                "Duplicate group name: {}",
                group.name
            )));
        }
        self.groups.push(group);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Result<&Process> {
        self.index
            .get(name)
            .map(|&i| &self.processes[i])
            .ok_or_else(|| OverseerError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn group(&self, name: &str) -> Option<&ProcessGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn groups(&self) -> &[ProcessGroup] {
        &self.groups
    }

    pub fn for_each_process<F>(&self, mut visitor: F)
    where
        F: FnMut(&Process),
    {
        for process in &self.processes {
            visitor(process);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.processes.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Processes that list `name` directly in their dependency list
    pub fn dependents_of(&self, name: &str) -> Vec<&Process> {
        self.processes
            .iter()
            .filter(|p| p.depends_on().iter().any(|d| d == name))
            .collect()
    }

    /// Resolve `all`, a group name or a process name into process names
    pub fn resolve_target(&self, target: &str) -> Result<Vec<String>> {
        if target == ALL_TARGET {
            return Ok(self.names());
        }

        if self.contains(target) {
            return Ok(vec![target.to_string()]);
        }

        if let Some(group) = self.group(target) {
            return Ok(group.processes.clone());
        }

        Err(OverseerError::NotFound(target.to_string()))
    }

    /// Ensure every dependency exists and the graph is acyclic
    pub fn validate_dependencies(&self) -> Result<()> {
        validate_graph(
            self.processes
                .iter()
                .map(|p| (p.name(), p.depends_on())),
        )
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Check a dependency graph given as (name, dependencies) pairs
pub fn validate_graph<'a, I>(nodes: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let edges: HashMap<&str, &[String]> = nodes.into_iter().collect();

    for (&name, deps) in &edges {
        for dep in deps.iter() {
            if !edges.contains_key(dep.as_str()) {
                return Err(OverseerError::UnknownDependency(
                    name.to_string(),
                    dep.clone(),
                ));
            }
        }
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();

    // Sorted roots keep the reported cycle stable
    let mut roots: Vec<&str> = edges.keys().copied().collect();
    roots.sort_unstable();

    for root in roots {
        visit(root, &edges, &mut marks, &mut path)?;
    }

    Ok(())
}

fn visit<'a>(
    name: &'a str,
    edges: &HashMap<&'a str, &'a [String]>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle: Vec<&str> = path[start..].to_vec();
            cycle.push(name);
            return Err(OverseerError::DependencyCycle(cycle.join(" -> ")));
        }
        None => {}
    }

    marks.insert(name, Mark::Visiting);
    path.push(name);

    if let Some(deps) = edges.get(name) {
        for dep in deps.iter() {
            visit(dep.as_str(), edges, marks, path)?;
        }
    }

    path.pop();
    marks.insert(name, Mark::Done);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;
    use crate::process::testing::FakeProcess;
    use std::sync::Arc;

    fn process(name: &str, deps: &[&str]) -> Process {
        let mut config = ProcessConfig::new(name, "exec sleep 10");
        config.depends_on = deps.iter().map(|d| d.to_string()).collect();
        Process::new("default", config, Arc::new(FakeProcess::new(name)))
    }

    fn graph(nodes: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        nodes
            .iter()
            .map(|(n, deps)| (n.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    fn check(nodes: &[(String, Vec<String>)]) -> Result<()> {
        validate_graph(nodes.iter().map(|(n, d)| (n.as_str(), d.as_slice())))
    }

    #[test]
    fn test_add_and_find() {
        let mut registry = Registry::new();
        registry.add(process("db", &[])).unwrap();
        registry.add(process("api", &["db"])).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find("api").unwrap().depends_on(), ["db".to_string()]);
        assert!(matches!(
            registry.find("missing"),
            Err(OverseerError::NotFound(_))
        ));
    }

    #[test]
    fn test_add_duplicate() {
        let mut registry = Registry::new();
        registry.add(process("db", &[])).unwrap();
        assert!(matches!(
            registry.add(process("db", &[])),
            Err(OverseerError::ProcessAlreadyExists(_))
        ));
    }

    #[test]
    fn test_insertion_order() {
        let mut registry = Registry::new();
        for name in ["c", "a", "b"] {
            registry.add(process(name, &[])).unwrap();
        }

        let mut seen = Vec::new();
        registry.for_each_process(|p| seen.push(p.name().to_string()));
        assert_eq!(seen, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_dependents_of() {
        let mut registry = Registry::new();
        registry.add(process("db", &[])).unwrap();
        registry.add(process("api", &["db"])).unwrap();
        registry.add(process("worker", &["db", "api"])).unwrap();
        registry.add(process("cron", &[])).unwrap();

        let dependents: Vec<&str> = registry.dependents_of("db").iter().map(|p| p.name()).collect();
        assert_eq!(dependents, vec!["api", "worker"]);
        assert!(registry.dependents_of("cron").is_empty());
    }

    #[test]
    fn test_resolve_target() {
        let mut registry = Registry::new();
        registry.add(process("db", &[])).unwrap();
        registry.add(process("api", &[])).unwrap();
        registry
            .add_group(ProcessGroup {
                name: "backend".to_string(),
                processes: vec!["api".to_string()],
                events: vec![],
            })
            .unwrap();

        assert_eq!(registry.resolve_target("all").unwrap(), vec!["db", "api"]);
        assert_eq!(registry.resolve_target("backend").unwrap(), vec!["api"]);
        assert_eq!(registry.resolve_target("db").unwrap(), vec!["db"]);
        assert!(registry.resolve_target("nothing").is_err());
    }

    #[test]
    fn test_validate_graph_acyclic() {
        let nodes = graph(&[("db", &[]), ("api", &["db"]), ("web", &["api", "db"])]);
        assert!(check(&nodes).is_ok());
    }

    #[test]
    fn test_validate_graph_unknown_dependency() {
        let nodes = graph(&[("api", &["db"])]);
        match check(&nodes) {
            Err(OverseerError::UnknownDependency(name, dep)) => {
                assert_eq!(name, "api");
                assert_eq!(dep, "db");
            }
            other => panic!("Expected UnknownDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_graph_cycle() {
        let nodes = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        match check(&nodes) {
            Err(OverseerError::DependencyCycle(path)) => {
                assert_eq!(path, "a -> b -> c -> a");
            }
            other => panic!("Expected DependencyCycle, got {:?}", other),
        }
    }
}
