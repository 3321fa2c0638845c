//! Validation and ordering of initializer declarations.
//!
//! Works on `(name, dependencies)` pairs only, so it can be exercised without
//! constructing initializers.

use std::collections::{HashMap, VecDeque};

use crate::error::GraphError;

/// A declared initializer, identified by its position in declaration order.
#[derive(Debug, Clone)]
pub(crate) struct Declaration {
    pub(crate) name: String,
    pub(crate) dependencies: Vec<String>,
}

impl Declaration {
    pub(crate) fn new(name: impl Into<String>, dependencies: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            if !unique.contains(&dependency) {
                unique.push(dependency);
            }
        }
        Self {
            name: name.into(),
            dependencies: unique,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Checks the declarations and returns their indices in execution order.
///
/// Duplicates are reported before dangling dependencies, and dangling
/// dependencies before cycles.
pub(crate) fn resolve(declarations: &[Declaration]) -> Result<Vec<usize>, GraphError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(declarations.len());
    for (position, declaration) in declarations.iter().enumerate() {
        if index.insert(declaration.name.as_str(), position).is_some() {
            return Err(GraphError::duplicate(declaration.name.as_str()));
        }
    }

    let mut edges: Vec<Vec<usize>> = Vec::with_capacity(declarations.len());
    for declaration in declarations {
        let mut targets = Vec::with_capacity(declaration.dependencies.len());
        for dependency in &declaration.dependencies {
            let target = index.get(dependency.as_str()).copied().ok_or_else(|| {
                GraphError::missing_dependency(declaration.name.as_str(), dependency.as_str())
            })?;
            targets.push(target);
        }
        edges.push(targets);
    }

    if let Some(path) = find_cycle(declarations, &edges) {
        return Err(GraphError::Cycle { path });
    }
    Ok(kahn(&edges))
}

/// Kahn's algorithm with a FIFO queue seeded in declaration order.
fn kahn(edges: &[Vec<usize>]) -> Vec<usize> {
    let mut pending: Vec<usize> = edges.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); edges.len()];
    for (node, targets) in edges.iter().enumerate() {
        for &target in targets {
            if let Some(list) = dependents.get_mut(target) {
                list.push(node);
            }
        }
    }

    let mut ready: VecDeque<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(node, _)| node)
        .collect();
    let mut order = Vec::with_capacity(edges.len());
    while let Some(node) = ready.pop_front() {
        order.push(node);
        for &dependent in dependents.get(node).map_or(&[][..], Vec::as_slice) {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dependent);
                }
            }
        }
    }
    order
}

/// Three-colour depth-first search returning the first cycle found, rendered
/// from the node the back edge points at round to itself.
fn find_cycle(declarations: &[Declaration], edges: &[Vec<usize>]) -> Option<Vec<String>> {
    let mut search = CycleSearch {
        edges,
        marks: vec![Mark::Unvisited; edges.len()],
        parent: vec![None; edges.len()],
    };
    let back_edge = (0..edges.len()).find_map(|start| {
        if search.mark(start) == Mark::Unvisited {
            search.visit(start)
        } else {
            None
        }
    })?;
    Some(search.render(back_edge, declarations))
}

struct CycleSearch<'a> {
    edges: &'a [Vec<usize>],
    marks: Vec<Mark>,
    parent: Vec<Option<usize>>,
}

impl CycleSearch<'_> {
    fn mark(&self, node: usize) -> Mark {
        self.marks.get(node).copied().unwrap_or(Mark::Done)
    }

    fn set_mark(&mut self, node: usize, mark: Mark) {
        if let Some(slot) = self.marks.get_mut(node) {
            *slot = mark;
        }
    }

    /// Returns `(from, to)` for the first back edge reachable from `node`.
    fn visit(&mut self, node: usize) -> Option<(usize, usize)> {
        self.set_mark(node, Mark::OnPath);
        let targets = self.edges.get(node).map_or(&[][..], Vec::as_slice);
        for &next in targets {
            match self.mark(next) {
                Mark::Unvisited => {
                    if let Some(slot) = self.parent.get_mut(next) {
                        *slot = Some(node);
                    }
                    if let Some(found) = self.visit(next) {
                        return Some(found);
                    }
                }
                Mark::OnPath => return Some((node, next)),
                Mark::Done => {}
            }
        }
        self.set_mark(node, Mark::Done);
        None
    }

    fn render(&self, (from, to): (usize, usize), declarations: &[Declaration]) -> Vec<String> {
        let mut nodes = vec![from];
        let mut current = from;
        while current != to {
            match self.parent.get(current).copied().flatten() {
                Some(previous) => {
                    nodes.push(previous);
                    current = previous;
                }
                None => break,
            }
        }
        nodes.reverse();
        nodes.push(to);
        nodes
            .into_iter()
            .filter_map(|node| declarations.get(node))
            .map(|declaration| declaration.name.clone())
            .collect()
    }
}
