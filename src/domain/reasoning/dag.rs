//! Chain structure validation and dependency ordering

use std::collections::{BTreeSet, HashMap};

use super::error::ReasoningError;
use super::node::NodeConfig;

/// Reject empty chains, duplicate ids, dangling inputs and cycles
pub fn validate_dag(nodes: &[NodeConfig]) -> Result<(), ReasoningError> {
    DependencyGraph::build(nodes).map(|_| ())
}

/// Node ids in an order where every node follows all of its inputs
///
/// Ready nodes are emitted in the order they were declared.
pub fn topological_order(nodes: &[NodeConfig]) -> Result<Vec<String>, ReasoningError> {
    let graph = DependencyGraph::build(nodes)?;
    let order = graph.topological_order()?;

    Ok(order.into_iter().map(|i| graph.id(i).to_string()).collect())
}

/// Index-based view of a validated chain
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    inputs: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn build(nodes: &[NodeConfig]) -> Result<Self, ReasoningError> {
        if nodes.is_empty() {
            return Err(ReasoningError::EmptyChain);
        }

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());

        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id(), i).is_some() {
                return Err(ReasoningError::duplicate_node_id(node.id()));
            }
        }

        let mut inputs = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];

        for (i, node) in nodes.iter().enumerate() {
            for input in node.inputs() {
                let dep = *index
                    .get(input.as_str())
                    .ok_or_else(|| ReasoningError::unknown_input(node.id(), input))?;

                // Repeated inputs count once
                if !inputs[i].contains(&dep) {
                    inputs[i].push(dep);
                    dependents[dep].push(i);
                }
            }
        }

        let graph = Self {
            ids: nodes.iter().map(|n| n.id().to_string()).collect(),
            inputs,
            dependents,
        };

        if let Some(path) = graph.find_cycle() {
            return Err(ReasoningError::cycle(path));
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    pub fn inputs(&self, index: usize) -> &[usize] {
        &self.inputs[index]
    }

    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    pub fn in_degrees(&self) -> Vec<usize> {
        self.inputs.iter().map(Vec::len).collect()
    }

    /// Kahn's algorithm, lowest declaration index first among ready nodes
    pub fn topological_order(&self) -> Result<Vec<usize>, ReasoningError> {
        let mut in_degree = self.in_degrees();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(current) = ready.pop_first() {
            order.push(current);

            for &dependent in &self.dependents[current] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.len() {
            return Err(ReasoningError::cycle(self.find_cycle().unwrap_or_default()));
        }

        Ok(order)
    }

    /// Depth-first search along input edges, tracking the nodes on the current path
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnPath,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.len()];

        for start in 0..self.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            marks[start] = Mark::OnPath;
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

            while let Some(frame) = stack.last_mut() {
                let (current, cursor) = *frame;

                if cursor >= self.inputs[current].len() {
                    marks[current] = Mark::Done;
                    stack.pop();
                    continue;
                }

                frame.1 += 1;
                let dep = self.inputs[current][cursor];

                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::OnPath;
                        stack.push((dep, 0));
                    }
                    Mark::OnPath => {
                        let from = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[from..].iter().map(|(n, _)| self.ids[*n].clone()).collect();
                        path.push(self.ids[dep].clone());
                        return Some(path);
                    }
                    Mark::Done => {}
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reasoning::node::NodeType;

    fn node(id: &str, inputs: &[&str]) -> NodeConfig {
        NodeConfig::new(id, NodeType::Transform).with_inputs(inputs.iter().copied())
    }

    #[test]
    fn test_empty_chain() {
        assert_eq!(validate_dag(&[]), Err(ReasoningError::EmptyChain));
    }

    #[test]
    fn test_duplicate_ids() {
        let nodes = vec![node("a", &[]), node("a", &[])];
        assert_eq!(
            validate_dag(&nodes),
            Err(ReasoningError::duplicate_node_id("a"))
        );
    }

    #[test]
    fn test_unknown_input() {
        let nodes = vec![node("a", &[]), node("b", &["ghost"])];
        assert_eq!(
            validate_dag(&nodes),
            Err(ReasoningError::unknown_input("b", "ghost"))
        );
    }

    #[test]
    fn test_two_node_cycle() {
        let nodes = vec![node("a", &["b"]), node("b", &["a"])];
        match validate_dag(&nodes) {
            Err(ReasoningError::CycleDetected { path }) => {
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_loop_and_deep_cycle() {
        let nodes = vec![node("a", &["a"])];
        assert!(matches!(
            validate_dag(&nodes),
            Err(ReasoningError::CycleDetected { .. })
        ));

        let nodes = vec![
            node("root", &[]),
            node("a", &["root", "c"]),
            node("b", &["a"]),
            node("c", &["b"]),
        ];
        match validate_dag(&nodes) {
            Err(ReasoningError::CycleDetected { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_order_respects_inputs_and_declaration() {
        let nodes = vec![
            node("out", &["sum"]),
            node("sum", &["a", "b"]),
            node("b", &[]),
            node("a", &[]),
        ];

        let order = topological_order(&nodes).unwrap();
        assert_eq!(order, vec!["b", "a", "sum", "out"]);
    }

    #[test]
    fn test_repeated_inputs_count_once() {
        let nodes = vec![node("a", &[]), node("b", &["a", "a"])];
        let graph = DependencyGraph::build(&nodes).unwrap();

        assert_eq!(graph.inputs(1), &[0]);
        assert_eq!(graph.dependents(0), &[1]);
        assert_eq!(graph.topological_order().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_diamond() {
        let nodes = vec![
            node("src", &[]),
            node("left", &["src"]),
            node("right", &["src"]),
            node("join", &["left", "right"]),
        ];

        let order = topological_order(&nodes).unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();

        assert!(pos("src") < pos("left"));
        assert!(pos("src") < pos("right"));
        assert!(pos("left") < pos("join"));
        assert!(pos("right") < pos("join"));
    }
}
