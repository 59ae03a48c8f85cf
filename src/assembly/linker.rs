use thiserror::Error;

use crate::assembly::buffer::{Entry, InstructionBuffer, Operand};
use crate::assembly::symbols::{SymbolTable, SymbolRef};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LinkError {
    #[error("symbol `{0}` marked more than once")]
    DuplicateMark(String),
    #[error("unresolved symbol `{0}`")]
    UnresolvedSymbol(String),
    #[error("program of {0} words does not fit in the address space")]
    ProgramOverflow(usize),
}

/// Resolve every symbol of a finished buffer and render it to machine words.
///
/// Two passes: the first assigns an address to every mark (symbols with a
/// fixed index already carry theirs), the second encodes entries and patches
/// operand words. A reference to a symbol that is still unaddressed after the
/// first pass is an internal error: the layout failed to place it.
#[tracing::instrument(skip(buffer, symbols))]
pub fn resolve(
    buffer: &InstructionBuffer,
    symbols: &mut SymbolTable,
    offset: u16,
) -> Result<Vec<u16>, LinkError> {
    let mut address = offset;
    for entry in buffer.entries() {
        match entry {
            Entry::Mark(id) => {
                let symbol = symbols.get_mut(*id);
                if symbol.address.is_some() {
                    return Err(LinkError::DuplicateMark(symbol.name.clone()));
                }
                symbol.address = Some(address);
            }
            entry => {
                address = address
                    .checked_add(entry.width())
                    .ok_or(LinkError::ProgramOverflow(buffer.len_words() as usize))?;
            }
        }
    }

    let resolve_ref = |symbols: &SymbolTable, reference: &SymbolRef| {
        symbols
            .address(*reference)
            .ok_or_else(|| LinkError::UnresolvedSymbol(symbols.get(reference.id).name.clone()))
    };

    let mut words = Vec::with_capacity(buffer.len_words() as usize);
    for entry in buffer.entries() {
        match entry {
            Entry::Mark(_) => (),
            Entry::Word { value, .. } => words.push(*value),
            Entry::Instruction {
                mnemonic, operand, ..
            } => match operand {
                Operand::None => words.push(mnemonic.encode_short(0)),
                Operand::Data(value) if operand.extra_words() == 0 => {
                    words.push(mnemonic.encode_short(*value))
                }
                Operand::Data(value) => {
                    words.push(mnemonic.encode_long());
                    words.push(*value);
                }
                Operand::Symbol(reference) => {
                    words.push(mnemonic.encode_long());
                    words.push(resolve_ref(symbols, reference)?);
                }
            },
        }
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::instruction::Mnemonic;

    #[test]
    fn test_forward_reference() {
        let mut symbols = SymbolTable::new();
        let end = symbols.create_label(None);

        let mut buffer = InstructionBuffer::new();
        buffer.emit_ref(Mnemonic::JMP, end); // words 0..2
        buffer.emit(Mnemonic::NOP); // word 2
        buffer.mark(end);
        buffer.emit(Mnemonic::HLT); // word 3

        let words = resolve(&buffer, &mut symbols, 0).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[0], Mnemonic::JMP.encode_long());
        assert_eq!(words[1], 3);
        assert_eq!(symbols.address(end.into()), Some(3));
    }

    #[test]
    fn test_offset_shifts_addresses() {
        let mut symbols = SymbolTable::new();
        let label = symbols.create_label(None);

        let mut buffer = InstructionBuffer::new();
        buffer.mark(label);
        buffer.emit(Mnemonic::NOP);

        resolve(&buffer, &mut symbols, 0x100).unwrap();
        assert_eq!(symbols.address(label.into()), Some(0x100));
    }

    #[test]
    fn test_duplicate_mark_rejected() {
        let mut symbols = SymbolTable::new();
        let label = symbols.create_label(Some("twice"));

        let mut buffer = InstructionBuffer::new();
        buffer.mark(label);
        buffer.emit(Mnemonic::NOP);
        buffer.mark(label);

        assert_eq!(
            resolve(&buffer, &mut symbols, 0),
            Err(LinkError::DuplicateMark("twice".to_string()))
        );
    }

    #[test]
    fn test_unmarked_symbol_rejected() {
        let mut symbols = SymbolTable::new();
        let label = symbols.create_label(Some("nowhere"));

        let mut buffer = InstructionBuffer::new();
        buffer.emit_ref(Mnemonic::JMP, label);

        assert_eq!(
            resolve(&buffer, &mut symbols, 0),
            Err(LinkError::UnresolvedSymbol("nowhere".to_string()))
        );
    }

    #[test]
    fn test_fixed_symbol_needs_no_mark() {
        let mut symbols = SymbolTable::new();
        let device = symbols.create_fixed_pointer(Some("screen"), 0xD26F, 1);

        let mut buffer = InstructionBuffer::new();
        buffer.emit_ref(Mnemonic::STA, device);

        let words = resolve(&buffer, &mut symbols, 0).unwrap();
        assert_eq!(words, vec![Mnemonic::STA.encode_long(), 0xD26F]);
    }

    #[test]
    fn test_short_and_long_data() {
        let mut symbols = SymbolTable::new();
        let mut buffer = InstructionBuffer::new();
        buffer.emit_data(Mnemonic::LDIA, 7);
        buffer.emit_data(Mnemonic::LDIA, 0xBEEF);

        let words = resolve(&buffer, &mut symbols, 0).unwrap();
        assert_eq!(
            words,
            vec![
                Mnemonic::LDIA.encode_short(7),
                Mnemonic::LDIA.encode_long(),
                0xBEEF,
            ]
        );
    }
}
