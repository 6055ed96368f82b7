//! Execution order for a flow
//!
//! Kahn's algorithm over step dependencies. Among steps that are ready at
//! the same time, the one authored first runs first, so the order is
//! reproducible from run to run.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::GraphCycleError;
use crate::types::StepId;

/// Compute a linear execution order
///
/// `steps` is the authoring order; each dependency `(a, b)` means `a` must
/// run before `b`. Dependencies naming unknown steps are ignored.
pub fn compile_order(
    steps: &[StepId],
    dependencies: &[(StepId, StepId)],
) -> Result<Vec<StepId>, GraphCycleError> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; steps.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (source, target) in dependencies {
        let (Some(&s), Some(&t)) = (index.get(source.as_str()), index.get(target.as_str())) else {
            continue;
        };
        adjacency[s].push(t);
        in_degree[t] += 1;
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);
        for &next in &adjacency[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < steps.len() {
        return Err(GraphCycleError {
            step_ids: cycle_members(steps, &adjacency, &in_degree),
        });
    }

    Ok(order.into_iter().map(|i| steps[i].clone()).collect())
}

/// Steps left after Kahn's pass that actually sit on a cycle
///
/// Kahn's leftovers also include steps merely downstream of a cycle; those
/// are peeled off by repeatedly dropping leftovers with no leftover
/// successor.
fn cycle_members(steps: &[StepId], adjacency: &[Vec<usize>], in_degree: &[usize]) -> Vec<StepId> {
    let mut remaining: Vec<bool> = in_degree.iter().map(|&deg| deg > 0).collect();

    loop {
        let mut changed = false;
        for i in 0..steps.len() {
            if remaining[i] && !adjacency[i].iter().any(|&next| remaining[next]) {
                remaining[i] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    steps
        .iter()
        .enumerate()
        .filter(|(i, _)| remaining[*i])
        .map(|(_, id)| id.clone())
        .collect()
}
