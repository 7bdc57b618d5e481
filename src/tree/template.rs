//! Templatization rewrites variable-reference and literal leaves into typed
//! placeholder nodes so that grammar rules generalize across concrete
//! identifiers and literals; detemplatization is the inverse collapse.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::symbol::{Symbol, SymbolId, SymbolRegistry};
use super::TreeNode;

/// Template category for character literals.
pub const CHAR_LITERAL: &str = "%CHAR_LITERAL%";
/// Template category for string literals.
pub const STRING_LITERAL: &str = "%STRING_LITERAL%";
/// Template category for numeric literals.
pub const NUM_LITERAL: &str = "%NUM_LITERAL%";

/// Annotation key carrying the parser-assigned node kind.
pub const NODE_KIND: &str = "KIND";
/// Annotation key carrying a leaf's token text.
pub const TOKEN: &str = "TOKEN";

/// Node kinds the templatizer recognizes.
pub const CHAR_LITERAL_KIND: &str = "CharacterLiteral";
pub const STRING_LITERAL_KIND: &str = "StringLiteral";
pub const NUM_LITERAL_KIND: &str = "NumberLiteral";
pub const VARIABLE_KIND: &str = "Identifier";

static LITERAL_CATEGORIES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (CHAR_LITERAL_KIND, CHAR_LITERAL),
        (STRING_LITERAL_KIND, STRING_LITERAL),
        (NUM_LITERAL_KIND, NUM_LITERAL),
    ])
});

/// A variable binding visible at some node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub type_name: String,
}

/// Variables declared or visible at each node, keyed by the node's pre-order
/// index within its tree. Produced by an external scope/type resolver.
pub type ScopeMap = HashMap<usize, Vec<Variable>>;

/// Rewrite a raw syntax tree into canonical, templatized form.
///
/// Literal leaves are wrapped in a template node carrying the literal-class
/// category; a leaf whose token matches a variable in scope is replaced by a
/// childless template node tagged with the variable's declared type (the
/// identifier text is discarded). Everything else passes through unchanged.
/// Template symbols are interned through `registry`, so the same category
/// always maps to the same symbol id. Nodes without scope information are
/// treated as non-variables.
pub fn templatize(
    registry: &SymbolRegistry,
    tree: &TreeNode<SymbolId>,
    scopes: &ScopeMap,
) -> TreeNode<SymbolId> {
    let mut next_index = 0usize;
    templatize_at(registry, tree, scopes, &mut next_index)
}

fn templatize_at(
    registry: &SymbolRegistry,
    node: &TreeNode<SymbolId>,
    scopes: &ScopeMap,
    next_index: &mut usize,
) -> TreeNode<SymbolId> {
    let index = *next_index;
    *next_index += 1;

    let mut children = Vec::with_capacity(node.n_slots());
    for slot in node.slots() {
        let mut rebuilt = Vec::with_capacity(slot.len());
        for child in slot {
            rebuilt.push(templatize_at(registry, child, scopes, next_index));
        }
        children.push(rebuilt);
    }
    let rebuilt = TreeNode::new(*node.value(), children);

    let symbol = match registry.get(*node.value()) {
        Some(symbol) => symbol,
        None => return rebuilt,
    };
    let kind = match symbol.annotation(NODE_KIND) {
        Some(kind) => kind,
        None => return rebuilt,
    };

    if let Some(category) = LITERAL_CATEGORIES.get(kind) {
        let template = registry.intern(Symbol::template(category));
        return TreeNode::new(template, vec![vec![rebuilt]]);
    }
    if kind == VARIABLE_KIND {
        if let Some(token) = symbol.annotation(TOKEN) {
            let binding = scopes
                .get(&index)
                .into_iter()
                .flatten()
                .find(|variable| variable.name == token);
            if let Some(variable) = binding {
                let template = registry.intern(Symbol::template(&variable.type_name));
                return TreeNode::leaf(template, 1);
            }
        }
    }
    rebuilt
}

/// During assembly a detemplatized child is either an already-spliced leaf
/// copy or a reference to a node still under construction.
enum Child {
    Done(TreeNode<SymbolId>),
    Pending(usize),
}

/// Collapse every maximal chain of template wrapper nodes to the single
/// concrete node it wraps, leaving non-template structure and slot
/// partitioning unchanged.
///
/// The spliced node is a childless copy: template leaves only ever wrap
/// terminal nodes, so any grandchildren below the unwrapped node are
/// stripped. Chains that never reach a non-template node are omitted from
/// the result. Idempotent.
pub fn detemplatize(registry: &SymbolRegistry, tree: &TreeNode<SymbolId>) -> TreeNode<SymbolId> {
    if registry.is_template(*tree.value()) {
        if let Some(child) = tree.child(0, 0) {
            return detemplatize(registry, child);
        }
        return TreeNode::leaf(*tree.value(), tree.n_slots());
    }

    // Iterative structural copy. Nodes under construction live in an arena;
    // children always land at larger indices than their parents, so a single
    // reverse pass assembles the immutable result bottom-up.
    let mut arena: Vec<(SymbolId, Vec<Vec<Child>>)> = vec![(*tree.value(), empty(tree.n_slots()))];
    let mut stack: Vec<(&TreeNode<SymbolId>, usize)> = vec![(tree, 0)];

    while let Some((from, to)) = stack.pop() {
        for (slot_index, slot) in from.slots().enumerate() {
            for from_child in slot {
                if registry.is_template(*from_child.value()) {
                    let mut current = from_child;
                    while !current.is_leaf() && registry.is_template(*current.value()) {
                        assert_eq!(
                            current.n_slots(),
                            1,
                            "template symbol holds more than one slot"
                        );
                        current = current.child(0, 0).unwrap();
                    }
                    if current.is_leaf() && registry.is_template(*current.value()) {
                        // chain never reaches a concrete node
                        continue;
                    }
                    let copy = TreeNode::leaf(*current.value(), current.n_slots());
                    arena[to].1[slot_index].push(Child::Done(copy));
                } else {
                    let index = arena.len();
                    arena.push((*from_child.value(), empty(from_child.n_slots())));
                    arena[to].1[slot_index].push(Child::Pending(index));
                    stack.push((from_child, index));
                }
            }
        }
    }

    let mut built: Vec<Option<TreeNode<SymbolId>>> = (0..arena.len()).map(|_| None).collect();
    for (index, (value, slots)) in arena.into_iter().enumerate().rev() {
        let mut children = Vec::with_capacity(slots.len());
        for slot in slots {
            let mut assembled = Vec::with_capacity(slot.len());
            for child in slot {
                assembled.push(match child {
                    Child::Done(node) => node,
                    Child::Pending(i) => built[i].take().unwrap(),
                });
            }
            children.push(assembled);
        }
        built[index] = Some(TreeNode::new(value, children));
    }
    built[0].take().unwrap()
}

fn empty(n_slots: usize) -> Vec<Vec<Child>> {
    (0..n_slots).map(|_| Vec::new()).collect()
}
