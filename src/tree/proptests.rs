//! Property-based tests for the conversation tree
//!
//! Random sequences of appends, edits, and branch selections must never
//! break the rooted-tree invariant, and linearization must always walk a
//! finite parent chain back to the root.

use super::*;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

#[derive(Debug, Clone)]
enum TreeOp {
    /// Append a user node under the node picked by this seed
    Append(usize, String),
    /// Edit the node picked by this seed into a sibling
    Edit(usize, String),
    /// Move the current pointer to the node picked by this seed
    Select(usize),
}

fn arb_op() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        (any::<usize>(), "[a-z ]{1,12}").prop_map(|(seed, text)| TreeOp::Append(seed, text)),
        (any::<usize>(), "[a-z ]{1,12}").prop_map(|(seed, text)| TreeOp::Edit(seed, text)),
        any::<usize>().prop_map(TreeOp::Select),
    ]
}

/// Pick a live node id deterministically from a seed.
fn pick_node(tree: &ChatTree, seed: usize) -> String {
    let mut ids: Vec<&String> = tree.nodes.keys().collect();
    ids.sort();
    ids[seed % ids.len()].clone()
}

fn apply_op(tree: &mut ChatTree, op: &TreeOp) {
    match op {
        TreeOp::Append(seed, text) => {
            let parent_id = pick_node(tree, *seed);
            let node = ChatNode::new(
                Role::User,
                text.clone(),
                ChatMessage::user(text.clone(), vec![]),
                Some(parent_id.clone()),
            );
            tree.append_child(&parent_id, node).unwrap();
        }
        TreeOp::Edit(seed, text) => {
            let node_id = pick_node(tree, *seed);
            // Root edits are rejected; that rejection is part of the contract
            let _ = tree.edit_as_sibling(&node_id, text, vec![]);
        }
        TreeOp::Select(seed) => {
            let node_id = pick_node(tree, *seed);
            tree.set_current(&node_id).unwrap();
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// The rooted-tree invariant survives any operation sequence.
    #[test]
    fn invariants_hold_under_random_ops(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut tree = ChatTree::new(DEFAULT_SYSTEM_PROMPT);
        for op in &ops {
            apply_op(&mut tree, op);
            prop_assert!(tree.check_invariants().is_ok(), "{:?}", tree.check_invariants());
        }
    }

    /// Every node linearizes: the parent chain is finite and acyclic.
    #[test]
    fn every_node_linearizes(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut tree = ChatTree::new(DEFAULT_SYSTEM_PROMPT);
        for op in &ops {
            apply_op(&mut tree, op);
        }

        for id in tree.nodes.keys() {
            let path = tree.linearize(id).unwrap();
            prop_assert!(!path.is_empty());
            prop_assert!(path.len() <= tree.nodes.len());
            prop_assert_eq!(path[0].role, Role::System);
        }
    }

    /// Edits strictly add: node count grows by exactly one per successful
    /// edit and existing nodes are never removed.
    #[test]
    fn edits_only_add(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut tree = ChatTree::new(DEFAULT_SYSTEM_PROMPT);
        for op in &ops {
            let before: std::collections::HashSet<String> =
                tree.nodes.keys().cloned().collect();
            apply_op(&mut tree, op);

            for id in &before {
                prop_assert!(tree.contains(id), "node {} disappeared", id);
            }
            prop_assert!(tree.nodes.len() - before.len() <= 1);
        }
    }
}
