use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;

use tsginduction::tree::{templatize, ScopeMap, Symbol, SymbolRegistry, TreeNode, NODE_KIND, TOKEN};
use tsginduction::tsg::{all_fragments_of, GrammarCounts, TsgGrammar, TsgNode};

fn chain(registry: &SymbolRegistry) -> TreeNode<usize> {
    let module = registry.intern(Symbol::ordinary(["decls"]).with_annotation(NODE_KIND, "Module"));
    let func = registry.intern(Symbol::ordinary(["body"]).with_annotation(NODE_KIND, "Function"));
    let ret = registry.intern(
        Symbol::ordinary(Vec::<&str>::new())
            .with_annotation(NODE_KIND, "Return")
            .with_annotation(TOKEN, "return"),
    );
    TreeNode::new(
        module,
        vec![vec![TreeNode::new(
            func,
            vec![vec![TreeNode::leaf(ret, 0)]],
        )]],
    )
}

#[test]
fn converting_without_random_roots_yields_one_whole_tree_fragment() {
    let registry = SymbolRegistry::new();
    let tree = chain(&registry);
    let mut rng = SmallRng::seed_from_u64(7);

    let marked = TsgNode::convert_tree(&tree, 0.0, &mut rng);
    assert_eq!(marked.size(), tree.size());
    assert!(marked.value().is_root);

    let fragments = all_fragments_of(&marked);
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].size(), tree.size());
}

#[test]
fn converting_with_certain_roots_marks_every_node() {
    let registry = SymbolRegistry::new();
    let tree = chain(&registry);
    let mut rng = SmallRng::seed_from_u64(7);

    let marked = TsgNode::convert_tree(&tree, 1.0, &mut rng);
    assert_eq!(all_fragments_of(&marked).len(), tree.size());
}

#[test]
fn fragments_cut_at_boundaries_and_keep_boundary_leaves() {
    let registry = SymbolRegistry::new();
    let a = registry.intern(Symbol::ordinary(["x"]).with_annotation(NODE_KIND, "A"));
    let b = registry.intern(Symbol::ordinary(["y"]).with_annotation(NODE_KIND, "B"));
    let c = registry.intern(Symbol::ordinary(Vec::<&str>::new()).with_annotation(NODE_KIND, "C"));

    // a is the tree root; b is an interior fragment boundary
    let tree = TreeNode::new(
        TsgNode {
            symbol: a,
            is_root: true,
        },
        vec![vec![TreeNode::new(
            TsgNode {
                symbol: b,
                is_root: true,
            },
            vec![vec![TreeNode::leaf(
                TsgNode {
                    symbol: c,
                    is_root: false,
                },
                0,
            )]],
        )]],
    );

    let fragments = all_fragments_of(&tree);
    assert_eq!(fragments.len(), 2);

    let upper = &fragments[0];
    assert_eq!(upper.size(), 2);
    let boundary = upper.child(0, 0).unwrap();
    assert_eq!(boundary.value().symbol, b);
    assert!(boundary.value().is_root);
    assert!(boundary.is_leaf());

    let lower = &fragments[1];
    assert_eq!(lower.size(), 2);
    assert_eq!(lower.value().symbol, b);
    assert_eq!(lower.child(0, 0).unwrap().value().symbol, c);
}

#[test]
fn grammar_counts_track_additions_and_removals() {
    let grammar = TsgGrammar::new();
    let stmt = grammar.registry().intern(Symbol::ordinary(["child"]));
    let a = grammar
        .registry()
        .intern(Symbol::ordinary(Vec::<&str>::new()).with_annotation(NODE_KIND, "A"));
    let b = grammar
        .registry()
        .intern(Symbol::ordinary(Vec::<&str>::new()).with_annotation(NODE_KIND, "B"));

    let fragment = |leaf| {
        TreeNode::new(
            TsgNode {
                symbol: stmt,
                is_root: true,
            },
            vec![vec![TreeNode::leaf(
                TsgNode {
                    symbol: leaf,
                    is_root: false,
                },
                0,
            )]],
        )
    };

    grammar.add_rule(fragment(a));
    grammar.add_rule(fragment(a));
    grammar.add_rule(fragment(b));

    assert_eq!(grammar.count_tree_occurrences(&fragment(a)), 2);
    assert_eq!(grammar.count_tree_occurrences(&fragment(b)), 1);
    assert_eq!(grammar.count_trees_with_root(stmt), 3);
    assert_eq!(grammar.n_rules(), 2);

    grammar.remove_rule(&fragment(a));
    assert_eq!(grammar.count_tree_occurrences(&fragment(a)), 1);
    assert_eq!(grammar.count_trees_with_root(stmt), 2);

    // removals saturate at zero
    grammar.remove_rule(&fragment(b));
    grammar.remove_rule(&fragment(b));
    assert_eq!(grammar.count_tree_occurrences(&fragment(b)), 0);
    assert_eq!(grammar.count_trees_with_root(stmt), 1);
}

#[test]
fn reparametrization_is_idempotent_and_preserves_node_counts() {
    let registry = SymbolRegistry::new();
    let tree = chain(&registry);
    let templatized = templatize(&registry, &tree, &ScopeMap::new());
    let mut rng = SmallRng::seed_from_u64(0);
    let marked = TsgNode::convert_tree(&templatized, 0.0, &mut rng);

    let grammar = Arc::new(TsgGrammar::new());
    let once = grammar.reparametrize_tree(&marked, &registry);
    let twice = grammar.reparametrize_tree(&once, grammar.registry());

    assert_eq!(once.size(), templatized.size());
    assert_eq!(once, twice);
}
