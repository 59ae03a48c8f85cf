use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::assembly::symbols::{Pointer, SymbolTable};
use crate::compiler::types::Type;

/// A source variable bound to its home pointer.
///
/// The constant flag is set at declaration and cleared by the first
/// assignment; while it holds, reads may inline the initializer value.
#[derive(Debug)]
pub struct Variable {
    name: String,
    pointer: Pointer,
    ty: Type,
    constant: Cell<bool>,
    initial: Cell<Option<i32>>,
    usages: Cell<u32>,
}

impl Variable {
    pub fn new(name: &str, pointer: Pointer, ty: Type) -> Variable {
        Variable {
            name: name.to_string(),
            pointer,
            ty,
            constant: Cell::new(true),
            initial: Cell::new(None),
            usages: Cell::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pointer(&self) -> Pointer {
        self.pointer
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn set_initial(&self, value: i32) {
        self.initial.set(Some(value));
    }

    /// The value reads may be folded to, while the variable is constant.
    pub fn constant_value(&self) -> Option<i32> {
        if self.constant.get() {
            self.initial.get()
        } else {
            None
        }
    }

    pub fn clear_constant(&self) {
        self.constant.set(false);
    }

    pub fn register_usage(&self) {
        self.usages.set(self.usages.get() + 1);
    }

    pub fn usages(&self) -> u32 {
        self.usages.get()
    }
}

/// An ordered set of data pointers serving one placement region:
/// globals, top-level temporaries, or the call-spilled stack slots.
#[derive(Debug, Default)]
pub struct PointerCollection {
    pointers: Vec<Pointer>,
}

impl PointerCollection {
    pub fn get_next(
        &mut self,
        symbols: &mut SymbolTable,
        name: Option<&str>,
        size: u16,
    ) -> Pointer {
        let pointer = symbols.create_pointer(name);
        symbols.set_size(pointer, size);
        self.pointers.push(pointer);
        pointer
    }

    pub fn iter(&self) -> impl Iterator<Item = Pointer> + '_ {
        self.pointers.iter().copied()
    }

    pub fn total_words(&self, symbols: &SymbolTable) -> u16 {
        self.pointers
            .iter()
            .map(|pointer| symbols.get(pointer.id()).size)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }
}

/// One lexical scope frame.
#[derive(Debug)]
struct Scope {
    /// The function whose body this scope belongs to, if any
    function: Option<usize>,
    is_global: bool,
    variables: HashMap<String, Rc<Variable>>,
    /// Temporaries released inside this scope, ready for reuse
    free_temporaries: Vec<Pointer>,
}

/// The chain of lexical scopes, walked innermost-first by name lookup.
#[derive(Debug)]
pub struct BlockStack {
    scopes: Vec<Scope>,
}

impl BlockStack {
    pub fn new() -> BlockStack {
        BlockStack {
            scopes: vec![Scope {
                function: None,
                is_global: true,
                variables: HashMap::new(),
                free_temporaries: Vec::new(),
            }],
        }
    }

    /// Enter a block. `function` starts a function body; plain blocks
    /// inherit the enclosing function.
    pub fn push(&mut self, function: Option<usize>) {
        let function = function.or_else(|| self.current_function());
        self.scopes.push(Scope {
            function,
            is_global: false,
            variables: HashMap::new(),
            free_temporaries: Vec::new(),
        });
    }

    /// Leave a block. Free temporaries flow to the parent scope so sibling
    /// blocks reuse the same cells, but never across a function boundary:
    /// function temporaries are stack slots and must stay with their frame.
    pub fn pop(&mut self) {
        let scope = self.scopes.pop().expect("the global scope is never popped");
        if let Some(parent) = self.scopes.last_mut() {
            if parent.function == scope.function {
                parent.free_temporaries.extend(scope.free_temporaries);
            }
        }
    }

    /// Register a variable in the innermost scope. `false` when the name is
    /// already taken in this scope.
    pub fn declare(&mut self, variable: Rc<Variable>) -> bool {
        let scope = self.scopes.last_mut().expect("scope chain is never empty");
        if scope.variables.contains_key(variable.name()) {
            return false;
        }
        scope.variables.insert(variable.name().to_string(), variable);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<Rc<Variable>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(name).cloned())
    }

    pub fn current_function(&self) -> Option<usize> {
        self.scopes.last().and_then(|scope| scope.function)
    }

    pub fn in_global_scope(&self) -> bool {
        self.scopes.last().map(|scope| scope.is_global).unwrap_or(true)
    }

    /// Reuse a released temporary of the current frame, if one is free.
    pub fn take_free_temporary(&mut self) -> Option<Pointer> {
        let function = self.current_function();
        for scope in self.scopes.iter_mut().rev() {
            if scope.function != function {
                break;
            }
            if let Some(pointer) = scope.free_temporaries.pop() {
                return Some(pointer);
            }
        }
        None
    }

    pub fn release_temporary(&mut self, pointer: Pointer) {
        self.scopes
            .last_mut()
            .expect("scope chain is never empty")
            .free_temporaries
            .push(pointer);
    }
}

impl Default for BlockStack {
    fn default() -> Self {
        BlockStack::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::symbols::SymbolTable;

    #[test]
    fn test_shadowing_and_lookup() {
        let mut symbols = SymbolTable::new();
        let mut blocks = BlockStack::new();

        let outer = Rc::new(Variable::new("x", symbols.create_pointer(None), Type::Int));
        assert!(blocks.declare(outer.clone()));
        assert!(!blocks.declare(outer.clone()));

        blocks.push(None);
        let inner = Rc::new(Variable::new("x", symbols.create_pointer(None), Type::Bool));
        assert!(blocks.declare(inner));
        assert_eq!(*blocks.lookup("x").unwrap().ty(), Type::Bool);

        blocks.pop();
        assert_eq!(*blocks.lookup("x").unwrap().ty(), Type::Int);
        assert!(blocks.lookup("y").is_none());
    }

    #[test]
    fn test_constant_flag() {
        let mut symbols = SymbolTable::new();
        let variable = Variable::new("v", symbols.create_pointer(None), Type::Int);
        variable.set_initial(7);
        assert_eq!(variable.constant_value(), Some(7));

        variable.clear_constant();
        assert_eq!(variable.constant_value(), None);
    }

    #[test]
    fn test_temporary_reuse_within_a_frame() {
        let mut blocks = BlockStack::new();
        let mut symbols = SymbolTable::new();
        let temp = symbols.create_pointer(None);

        blocks.push(None);
        blocks.release_temporary(temp);
        blocks.pop();

        // Released temporaries of a sibling block are reusable afterwards.
        assert_eq!(blocks.take_free_temporary(), Some(temp));
        assert_eq!(blocks.take_free_temporary(), None);
    }

    #[test]
    fn test_temporaries_stay_inside_their_function() {
        let mut blocks = BlockStack::new();
        let mut symbols = SymbolTable::new();
        let temp = symbols.create_pointer(None);

        blocks.release_temporary(temp);
        blocks.push(Some(0));
        // The global free temporary is not visible from a function frame.
        assert_eq!(blocks.take_free_temporary(), None);
        blocks.pop();
        assert_eq!(blocks.take_free_temporary(), Some(temp));
    }
}
