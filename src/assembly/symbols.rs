use std::fmt;

/// Index of a symbol in its [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(usize);

/// Handle to a data-address symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer(SymbolId);

/// Handle to a code-position symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(SymbolId);

impl Pointer {
    pub fn id(&self) -> SymbolId {
        self.0
    }

    /// A view over this pointer displaced by `offset` words.
    pub fn with_offset(&self, offset: u16) -> SymbolRef {
        SymbolRef {
            id: self.0,
            offset,
        }
    }
}

impl Label {
    pub fn id(&self) -> SymbolId {
        self.0
    }
}

impl From<Pointer> for SymbolId {
    fn from(pointer: Pointer) -> Self {
        pointer.0
    }
}

impl From<Label> for SymbolId {
    fn from(label: Label) -> Self {
        label.0
    }
}

/// A symbol reference as it appears in an instruction operand: a symbol plus
/// a constant word offset. The offset shares the symbol's bank and locality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRef {
    pub id: SymbolId,
    pub offset: u16,
}

impl From<Pointer> for SymbolRef {
    fn from(pointer: Pointer) -> Self {
        pointer.with_offset(0)
    }
}

impl From<Label> for SymbolRef {
    fn from(label: Label) -> Self {
        SymbolRef {
            id: label.0,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Pointer,
    Label,
}

/// A named machine address, resolved by the linker.
#[derive(Debug)]
pub struct Symbol {
    /// Name of the symbol
    pub name: String,
    pub kind: SymbolKind,
    /// Memory bank the symbol addresses
    pub bank: u8,
    /// Size in words of the data the symbol heads
    pub size: u16,
    /// Forced address, for memory-mapped locations
    pub fixed: Option<u16>,
    /// Resolved address, filled in by the linker
    pub address: Option<u16>,
    /// Source variables living at this address, for listing comments
    pub assigned: Vec<String>,
}

/// Owner of every symbol a compilation creates.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    #[tracing::instrument(skip(self))]
    pub fn create_pointer(&mut self, name: Option<&str>) -> Pointer {
        let id = self.push(name, SymbolKind::Pointer, 0, None);
        Pointer(id)
    }

    /// A pointer with a forced address, used for memory-mapped devices.
    #[tracing::instrument(skip(self))]
    pub fn create_fixed_pointer(&mut self, name: Option<&str>, index: u16, bank: u8) -> Pointer {
        let id = self.push(name, SymbolKind::Pointer, bank, Some(index));
        Pointer(id)
    }

    #[tracing::instrument(skip(self))]
    pub fn create_label(&mut self, name: Option<&str>) -> Label {
        let id = self.push(name, SymbolKind::Label, 0, None);
        Label(id)
    }

    fn push(&mut self, name: Option<&str>, kind: SymbolKind, bank: u8, fixed: Option<u16>) -> SymbolId {
        let index = self.symbols.len();
        let name = match name {
            Some(name) => name.to_string(),
            None => match kind {
                SymbolKind::Pointer => format!("p{}", index),
                SymbolKind::Label => format!("l{}", index),
            },
        };
        self.symbols.push(Symbol {
            name,
            kind,
            bank,
            size: 1,
            fixed,
            address: fixed,
            assigned: Vec::new(),
        });
        SymbolId(index)
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    pub fn set_size(&mut self, pointer: Pointer, size: u16) {
        self.get_mut(pointer.0).size = size;
    }

    pub fn bank(&self, id: SymbolId) -> u8 {
        self.get(id).bank
    }

    /// Record that a source variable lives at this pointer.
    pub fn assign_variable(&mut self, pointer: Pointer, variable: &str) {
        self.get_mut(pointer.0).assigned.push(variable.to_string());
    }

    /// Resolved address of a reference, once the linker has run.
    pub fn address(&self, reference: SymbolRef) -> Option<u16> {
        self.get(reference.id)
            .address
            .map(|address| address.wrapping_add(reference.offset))
    }

    /// Look up the address of the pointer a named variable was assigned to.
    pub fn address_of_variable(&self, variable: &str) -> Option<u16> {
        self.symbols
            .iter()
            .find(|symbol| symbol.assigned.iter().any(|name| name == variable))
            .and_then(|symbol| symbol.address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(index, symbol)| (SymbolId(index), symbol))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "{}({:#06x})", self.name, address),
            None => write!(f, "{}(?)", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names() {
        let mut symbols = SymbolTable::new();
        let pointer = symbols.create_pointer(None);
        let label = symbols.create_label(Some("start"));
        assert_eq!(symbols.get(pointer.id()).name, "p0");
        assert_eq!(symbols.get(label.id()).name, "start");
    }

    #[test]
    fn test_fixed_pointer_resolves_immediately() {
        let mut symbols = SymbolTable::new();
        let screen = symbols.create_fixed_pointer(Some("screen"), 0xD26F, 1);
        assert_eq!(symbols.address(screen.into()), Some(0xD26F));
        assert_eq!(symbols.bank(screen.id()), 1);
    }

    #[test]
    fn test_offset_addressing() {
        let mut symbols = SymbolTable::new();
        let base = symbols.create_fixed_pointer(None, 0x0100, 0);
        assert_eq!(symbols.address(base.with_offset(3)), Some(0x0103));
    }

    #[test]
    fn test_assigned_variable_lookup() {
        let mut symbols = SymbolTable::new();
        let pointer = symbols.create_fixed_pointer(None, 0x0010, 0);
        symbols.assign_variable(pointer, "counter");
        assert_eq!(symbols.address_of_variable("counter"), Some(0x0010));
        assert_eq!(symbols.address_of_variable("missing"), None);
    }
}
