//! Individual validation stages.
//!
//! Each stage checks for a specific category of errors.

use crate::core::error::{ValidationError, ValidationWarning};
use crate::core::port::Direction;
use crate::graph::structure::NodeGraph;
use crate::graph::topology::TopologyAnalyzer;

/// Trait for validation stages.
pub trait ValidationStage: Send + Sync {
    /// Name of this validation stage.
    fn name(&self) -> &str;

    /// Validate the graph.
    ///
    /// Returns Ok with warnings, or Err with errors.
    fn validate(&self, graph: &NodeGraph) -> Result<Vec<ValidationWarning>, Vec<ValidationError>>;
}

/// Structural validation - checks graph structure.
///
/// Verifies:
/// - Every edge joins live nodes on declared channels
/// - Graph is a DAG (no cycles)
pub struct StructuralValidation;

impl ValidationStage for StructuralValidation {
    fn name(&self) -> &str {
        "Structural Validation"
    }

    fn validate(&self, graph: &NodeGraph) -> Result<Vec<ValidationWarning>, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if graph.is_empty() {
            warnings.push(ValidationWarning {
                message: "Graph is empty".to_string(),
                node: None,
            });
            return Ok(warnings);
        }

        for edge in graph.edges() {
            let declared = |port: &crate::core::port::Port| {
                graph.slot(port.node).is_some_and(|slot| {
                    let metadata = slot.metadata();
                    match port.direction {
                        Direction::In => metadata.get_input(&port.channel).is_some(),
                        Direction::Out => metadata.get_output(&port.channel).is_some(),
                    }
                })
            };
            if !declared(&edge.from) || !declared(&edge.to) {
                errors.push(ValidationError::DanglingEdge { edge: edge.id });
            }
        }

        let analyzer = TopologyAnalyzer::new(graph);
        if let Err(err) = analyzer.topological_sort() {
            errors.push(err);
        }

        let subgraphs = analyzer.find_subgraphs();
        if subgraphs.len() > 1 {
            warnings.push(ValidationWarning {
                message: format!("Graph contains {} disconnected subgraphs", subgraphs.len()),
                node: None,
            });
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(errors)
        }
    }
}

/// Arity validation - runs each node's own validation hook.
pub struct ArityValidation;

impl ValidationStage for ArityValidation {
    fn name(&self) -> &str {
        "Arity Validation"
    }

    fn validate(&self, graph: &NodeGraph) -> Result<Vec<ValidationWarning>, Vec<ValidationError>> {
        let errors: Vec<ValidationError> = graph
            .node_ids()
            .filter_map(|id| graph.validate_node(id).err())
            .collect();

        if errors.is_empty() {
            Ok(Vec::new())
        } else {
            Err(errors)
        }
    }
}

/// Connectivity validation - flags inputs that will fail at evaluation.
///
/// An unconnected required input is only a warning: the graph is still being
/// edited and the node fails with "missing input" when evaluated.
pub struct ConnectivityValidation;

impl ValidationStage for ConnectivityValidation {
    fn name(&self) -> &str {
        "Connectivity Validation"
    }

    fn validate(&self, graph: &NodeGraph) -> Result<Vec<ValidationWarning>, Vec<ValidationError>> {
        let mut warnings = Vec::new();

        for (id, slot) in graph.nodes() {
            let Some(links) = graph.link_counts(id) else {
                continue;
            };
            for channel in &slot.metadata().inputs {
                if channel.arity.is_required() && links.input_count(&channel.name) == 0 {
                    warnings.push(ValidationWarning {
                        message: format!(
                            "Input '{}' of {} node {} is not connected",
                            channel.name,
                            slot.metadata().kind,
                            id
                        ),
                        node: Some(id),
                    });
                }
            }
        }

        Ok(warnings)
    }
}
