use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Free,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// Compile-time name resolution. One table per function body, chained to
/// the table of the enclosing body.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    pub num_definitions: usize,
    pub free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..Self::default()
        }
    }

    /// Defines `name` in this table. A name already defined here keeps its
    /// slot, so rebinding overwrites the same global or local.
    pub fn define(&mut self, name: &str) -> Symbol {
        if let Some(existing) = self.store.get(name) {
            if matches!(existing.scope, SymbolScope::Global | SymbolScope::Local) {
                return existing.clone();
            }
        }

        let scope = if self.outer.is_none() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    /// Registers the name of the function being compiled so its body can
    /// refer to itself.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
        };
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }

        let outer = self.outer.as_mut()?;
        let symbol = outer.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global => Some(symbol),
            _ => Some(self.define_free(symbol)),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use crate::symbol_table::{Symbol, SymbolScope, SymbolTable};

    fn symbol(name: &str, scope: SymbolScope, index: usize) -> Symbol {
        Symbol { name: name.to_string(), scope, index }
    }

    #[test]
    fn test_define_and_resolve_global() {
        let mut global = SymbolTable::new();
        assert_eq!(global.define("a"), symbol("a", SymbolScope::Global, 0));
        assert_eq!(global.define("b"), symbol("b", SymbolScope::Global, 1));

        assert_eq!(global.resolve("a"), Some(symbol("a", SymbolScope::Global, 0)));
        assert_eq!(global.resolve("b"), Some(symbol("b", SymbolScope::Global, 1)));
        assert_eq!(global.resolve("c"), None);
    }

    #[test]
    fn test_redefine_reuses_slot() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");
        assert_eq!(global.define("a"), symbol("a", SymbolScope::Global, 0));
        assert_eq!(global.num_definitions, 2);
    }

    #[test]
    fn test_resolve_nested_local_and_free() {
        let mut global = SymbolTable::new();
        global.define("a");

        let mut first = SymbolTable::new_enclosed(global);
        first.define("c");

        let mut second = SymbolTable::new_enclosed(first);
        second.define("e");

        assert_eq!(second.resolve("a"), Some(symbol("a", SymbolScope::Global, 0)));
        assert_eq!(second.resolve("c"), Some(symbol("c", SymbolScope::Free, 0)));
        assert_eq!(second.resolve("e"), Some(symbol("e", SymbolScope::Local, 0)));
        assert_eq!(second.free_symbols, vec![symbol("c", SymbolScope::Local, 0)]);
        assert_eq!(second.resolve("nope"), None);
    }

    #[test]
    fn test_function_name_is_shadowable() {
        let mut table = SymbolTable::new_enclosed(SymbolTable::new());
        table.define_function_name("a");
        assert_eq!(table.resolve("a"), Some(symbol("a", SymbolScope::Function, 0)));

        table.define("a");
        assert_eq!(table.resolve("a"), Some(symbol("a", SymbolScope::Local, 0)));
    }
}
