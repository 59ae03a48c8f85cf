use crate::assembly::instruction::{Mnemonic, SHORT_OPERAND_MAX};
use crate::assembly::symbols::{SymbolId, SymbolRef};

/// Operand of a buffered instruction.
///
/// Symbol operands always use the two-word instruction form, so the layout of
/// the buffer is fixed before any address is known; only literal data gets to
/// pick the short form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Data(u16),
    Symbol(SymbolRef),
}

impl Operand {
    /// Words the operand adds on top of the instruction word.
    pub fn extra_words(&self) -> u16 {
        match self {
            Operand::None => 0,
            Operand::Data(value) if *value <= SHORT_OPERAND_MAX => 0,
            Operand::Data(_) => 1,
            Operand::Symbol(_) => 1,
        }
    }
}

/// A single entry of an instruction buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// An instruction with its operand
    Instruction {
        mnemonic: Mnemonic,
        operand: Operand,
        comment: Option<String>,
    },
    /// A literal data word, used for the data region and the literal pools
    Word {
        value: u16,
        comment: Option<String>,
    },
    /// Bind a symbol to the current emission position
    Mark(SymbolId),
}

impl Entry {
    /// Size of the entry in machine words.
    pub fn width(&self) -> u16 {
        match self {
            Entry::Instruction { operand, .. } => 1 + operand.extra_words(),
            Entry::Word { .. } => 1,
            Entry::Mark(_) => 0,
        }
    }
}

/// An append-only sequence of instructions, data words and symbol marks.
///
/// Emission is purely local: referencing a symbol never requires the symbol
/// to be resolved, and forward references are the norm. The linker walks the
/// finished buffer once to assign mark addresses and patch operands.
#[derive(Debug, Default)]
pub struct InstructionBuffer {
    entries: Vec<Entry>,
}

impl InstructionBuffer {
    pub fn new() -> InstructionBuffer {
        InstructionBuffer::default()
    }

    pub fn emit(&mut self, mnemonic: Mnemonic) {
        self.entries.push(Entry::Instruction {
            mnemonic,
            operand: Operand::None,
            comment: None,
        });
    }

    pub fn emit_data(&mut self, mnemonic: Mnemonic, value: u16) {
        self.entries.push(Entry::Instruction {
            mnemonic,
            operand: Operand::Data(value),
            comment: None,
        });
    }

    pub fn emit_ref(&mut self, mnemonic: Mnemonic, reference: impl Into<SymbolRef>) {
        self.entries.push(Entry::Instruction {
            mnemonic,
            operand: Operand::Symbol(reference.into()),
            comment: None,
        });
    }

    pub fn emit_word(&mut self, value: u16) {
        self.entries.push(Entry::Word {
            value,
            comment: None,
        });
    }

    /// Bind a symbol to the position of the next emitted word.
    pub fn mark(&mut self, symbol: impl Into<SymbolId>) {
        self.entries.push(Entry::Mark(symbol.into()));
    }

    /// Attach a listing comment to the most recent instruction or data word.
    pub fn comment(&mut self, text: impl Into<String>) {
        for entry in self.entries.iter_mut().rev() {
            match entry {
                Entry::Instruction { comment, .. } | Entry::Word { comment, .. } => {
                    *comment = Some(text.into());
                    return;
                }
                Entry::Mark(_) => continue,
            }
        }
    }

    /// Move every entry of `other` to the end of this buffer.
    pub fn append(&mut self, other: &mut InstructionBuffer) {
        self.entries.append(&mut other.entries);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total size in machine words.
    pub fn len_words(&self) -> u16 {
        self.entries.iter().map(Entry::width).sum()
    }

    /// Symbols referenced by any operand in this buffer.
    pub fn referenced_symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Instruction {
                operand: Operand::Symbol(reference),
                ..
            } => Some(reference.id),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::symbols::SymbolTable;

    #[test]
    fn test_entry_widths() {
        let mut symbols = SymbolTable::new();
        let label = symbols.create_label(None);

        let mut buffer = InstructionBuffer::new();
        buffer.emit(Mnemonic::ADD);
        buffer.emit_data(Mnemonic::LDIA, 5);
        buffer.emit_data(Mnemonic::LDIA, 0x1234);
        buffer.emit_ref(Mnemonic::JMP, label);
        buffer.mark(label);
        buffer.emit_word(0);

        let widths: Vec<u16> = buffer.entries().iter().map(Entry::width).collect();
        assert_eq!(widths, vec![1, 1, 2, 2, 0, 1]);
        assert_eq!(buffer.len_words(), 7);
    }

    #[test]
    fn test_comment_attaches_to_last_word() {
        let mut symbols = SymbolTable::new();
        let label = symbols.create_label(None);

        let mut buffer = InstructionBuffer::new();
        buffer.emit(Mnemonic::HLT);
        buffer.mark(label);
        buffer.comment("stop");

        match &buffer.entries()[0] {
            Entry::Instruction { comment, .. } => assert_eq!(comment.as_deref(), Some("stop")),
            entry => panic!("unexpected entry {:?}", entry),
        }
    }

    #[test]
    fn test_referenced_symbols() {
        let mut symbols = SymbolTable::new();
        let pointer = symbols.create_pointer(None);
        let other = symbols.create_pointer(None);

        let mut buffer = InstructionBuffer::new();
        buffer.emit_ref(Mnemonic::AIN, pointer);
        buffer.emit_data(Mnemonic::LDIA, 1);

        let referenced: Vec<_> = buffer.referenced_symbols().collect();
        assert_eq!(referenced, vec![pointer.id()]);
        assert!(!referenced.contains(&other.id()));
    }
}
