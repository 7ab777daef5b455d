use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;

use crate::definition::StepSpec;
use crate::error::DefinitionError;

/// Level-order execution plan derived from declared inputs.
///
/// Layer 0 holds the steps that depend only on initial input; every other
/// step sits one layer past its deepest step ancestor. Layers execute
/// strictly in sequence, so by the time a layer starts every ancestor of
/// its steps is terminal. Building is pure: the same definition always
/// yields the same plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    layers: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    pub fn step_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }
}

/// Validates step references and produces the execution plan.
///
/// Every declared input must resolve to an initial-input key or another
/// step's name; step names share one namespace with initial keys. Cycles
/// are reported with the member step names in path order.
pub fn build_plan(
    initial_inputs: &[String],
    steps: &[StepSpec],
) -> Result<ExecutionPlan, DefinitionError> {
    let initial: HashSet<&str> = initial_inputs.iter().map(String::as_str).collect();

    let mut graph: StableDiGraph<String, ()> = StableDiGraph::new();
    let mut node_index_map: HashMap<String, NodeIndex> = HashMap::new();
    let mut indices: Vec<NodeIndex> = Vec::with_capacity(steps.len());

    for step in steps {
        if initial.contains(step.name.as_str()) || node_index_map.contains_key(&step.name) {
            return Err(DefinitionError::DuplicateStep(step.name.clone()));
        }
        let idx = graph.add_node(step.name.clone());
        node_index_map.insert(step.name.clone(), idx);
        indices.push(idx);
    }

    for (step, &target_idx) in steps.iter().zip(&indices) {
        // Repeated declarations of the same input collapse to one edge,
        // otherwise the in-degree bookkeeping below would never drain.
        let mut seen: HashSet<&str> = HashSet::new();
        for input in &step.inputs {
            if !seen.insert(input.as_str()) {
                continue;
            }
            if let Some(&source_idx) = node_index_map.get(input) {
                graph.add_edge(source_idx, target_idx, ());
            } else if !initial.contains(input.as_str()) {
                return Err(DefinitionError::UnknownInput {
                    step: step.name.clone(),
                    input: input.clone(),
                });
            }
        }

        if let Some(target) = step.condition.as_ref().and_then(|c| c.target()) {
            if !step.inputs.iter().any(|input| input == target) {
                return Err(DefinitionError::ConditionTargetNotDeclared {
                    step: step.name.clone(),
                    target: target.to_string(),
                });
            }
        }
    }

    detect_cycle(&graph)?;

    // Kahn wavefront assigning each step one level past its deepest
    // step ancestor.
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    for &idx in &indices {
        in_degree.insert(idx, graph.neighbors_directed(idx, Direction::Incoming).count());
    }

    let mut level: HashMap<NodeIndex, usize> = HashMap::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();
    for &idx in &indices {
        if in_degree[&idx] == 0 {
            level.insert(idx, 0);
            queue.push_back(idx);
        }
    }

    let mut max_level = 0;
    while let Some(node) = queue.pop_front() {
        let node_level = level.get(&node).copied().unwrap_or(0);
        max_level = max_level.max(node_level);
        for succ in graph.neighbors_directed(node, Direction::Outgoing) {
            let succ_level = level.entry(succ).or_insert(0);
            *succ_level = (*succ_level).max(node_level + 1);
            if let Some(degree) = in_degree.get_mut(&succ) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(succ);
                }
            }
        }
    }

    let mut layers: Vec<Vec<String>> = vec![Vec::new(); max_level + 1];
    for (step, idx) in steps.iter().zip(&indices) {
        let step_level = level.get(idx).copied().unwrap_or(0);
        layers[step_level].push(step.name.clone());
    }

    Ok(ExecutionPlan { layers })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Depth-first search with recursion-stack coloring. Gray nodes are
/// exactly the current path, so a gray successor is a back edge and the
/// gray run of the stack names the cycle in order.
fn detect_cycle(graph: &StableDiGraph<String, ()>) -> Result<(), DefinitionError> {
    let mut colors: HashMap<NodeIndex, Color> =
        graph.node_indices().map(|idx| (idx, Color::White)).collect();

    for start in graph.node_indices() {
        if colors[&start] != Color::White {
            continue;
        }
        let mut stack: Vec<(NodeIndex, bool)> = vec![(start, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                colors.insert(node, Color::Black);
                continue;
            }
            if colors[&node] != Color::White {
                continue;
            }
            colors.insert(node, Color::Gray);
            stack.push((node, true));

            for succ in graph.neighbors_directed(node, Direction::Outgoing) {
                match colors[&succ] {
                    Color::White => stack.push((succ, false)),
                    Color::Gray => {
                        let mut cycle: Vec<String> = stack
                            .iter()
                            .filter(|(_, on_path)| *on_path)
                            .map(|(idx, _)| graph[*idx].clone())
                            .collect();
                        let entry = &graph[succ];
                        if let Some(position) = cycle.iter().position(|name| name == entry) {
                            cycle.drain(..position);
                        }
                        return Err(DefinitionError::CycleDetected(cycle));
                    }
                    Color::Black => {}
                }
            }
        }
    }
    Ok(())
}
