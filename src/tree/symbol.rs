use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Integer handle of a symbol descriptor in a [`SymbolRegistry`].
pub type SymbolId = usize;

/// What a symbol stands for in the grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    /// A plain grammar symbol produced by the parser.
    Ordinary,
    /// A placeholder minted during templatization. `category` is the coarse
    /// class the placeholder stands in for: a variable's declared type, or a
    /// literal-class tag such as `%STRING_LITERAL%`.
    Template { category: String },
}

/// A symbol descriptor: kind, ordered child-slot names, and free-form string
/// annotations (node kind, token text, ...).
///
/// Template symbols always carry exactly one slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub slots: Vec<String>,
    pub annotations: BTreeMap<String, String>,
}

impl Symbol {
    pub fn ordinary<I, S>(slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Symbol {
            kind: SymbolKind::Ordinary,
            slots: slots.into_iter().map(Into::into).collect(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn template(category: &str) -> Self {
        Symbol {
            kind: SymbolKind::Template {
                category: category.to_string(),
            },
            slots: vec!["child".to_string()],
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn is_template(&self) -> bool {
        matches!(self.kind, SymbolKind::Template { .. })
    }

    /// The template category, if this is a template symbol.
    pub fn category(&self) -> Option<&str> {
        match &self.kind {
            SymbolKind::Template { category } => Some(category),
            SymbolKind::Ordinary => None,
        }
    }
}

/// Append-only registry mapping symbol descriptors to integer ids.
///
/// Ids are assigned on first use; interning a descriptor equal to one already
/// registered returns the existing id, so repeated templatization of the same
/// category always yields the same symbol and rule counting recognizes the
/// repeated shapes as one fragment. Safe to share across threads.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    symbols: Vec<Arc<Symbol>>,
    ids: HashMap<Arc<Symbol>, SymbolId>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        SymbolRegistry::default()
    }

    /// The id for `symbol`, minting a new entry on first use.
    pub fn intern(&self, symbol: Symbol) -> SymbolId {
        let mut inner = self.inner.write().unwrap();
        if let Some(&id) = inner.ids.get(&symbol) {
            return id;
        }
        let id = inner.symbols.len();
        let symbol = Arc::new(symbol);
        inner.symbols.push(Arc::clone(&symbol));
        inner.ids.insert(symbol, id);
        id
    }

    pub fn get(&self, id: SymbolId) -> Option<Arc<Symbol>> {
        self.inner.read().unwrap().symbols.get(id).cloned()
    }

    pub fn is_template(&self, id: SymbolId) -> bool {
        self.get(id).map_or(false, |symbol| symbol.is_template())
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{Symbol, SymbolRegistry};

    #[test]
    fn interning_is_idempotent_per_descriptor() {
        let registry = SymbolRegistry::new();
        let a = registry.intern(Symbol::template("%STRING_LITERAL%"));
        let b = registry.intern(Symbol::template("%STRING_LITERAL%"));
        let c = registry.intern(Symbol::template("List<String>"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn descriptors_round_trip_through_serde() {
        let symbol = Symbol::ordinary(["cond", "then", "else"]).with_annotation("KIND", "If");
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(symbol, serde_json::from_str(&json).unwrap());
    }

    #[test]
    fn template_symbols_have_one_slot() {
        let symbol = Symbol::template("int");
        assert!(symbol.is_template());
        assert_eq!(symbol.category(), Some("int"));
        assert_eq!(symbol.slots.len(), 1);
    }
}
