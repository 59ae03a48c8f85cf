use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;

use crate::assembly::buffer::{Entry, InstructionBuffer, Operand};
use crate::assembly::instruction::{Mnemonic, SHORT_OPERAND_MAX};
use crate::assembly::symbols::SymbolTable;

/// File renderings of a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Assembly text, one mnemonic per line
    Asm,
    /// Assembly text with trailing comments
    Asmc,
    /// Flat hex words for the emulator
    Aexe,
    /// Logisim memory image
    Hex,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Asm => "asm",
            OutputFormat::Asmc => "asmc",
            OutputFormat::Aexe => "aexe",
            OutputFormat::Hex => "hex",
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ListingError {
    #[error("unknown mnemonic `{0}` on line {1}")]
    UnknownMnemonic(String, usize),
    #[error("bad operand `{0}` on line {1}")]
    BadOperand(String, usize),
    #[error("operand {0:#x} does not fit the short form on line {1}")]
    ShortOperandOverflow(u16, usize),
    #[error("missing operand on line {0}")]
    MissingOperand(usize),
}

/// Render a resolved buffer as assembly text.
///
/// Short operands render as `$XX`, long ones as `$XXXX`; the digit width is
/// what lets [`assemble_listing`] reproduce the exact encoding. Raw words
/// render as `.word` lines. With `with_comments`, marks show up as comment
/// lines and entry comments are appended in a column.
#[tracing::instrument(skip(buffer, symbols))]
pub fn render_asm(buffer: &InstructionBuffer, symbols: &SymbolTable, with_comments: bool) -> String {
    let mut out = String::new();
    for entry in buffer.entries() {
        let (line, comment) = match entry {
            Entry::Mark(id) => {
                if with_comments {
                    let _ = writeln!(out, "; {}:", symbols.get(*id).name);
                }
                continue;
            }
            Entry::Word { value, comment } => (format!(".word ${:04x}", value), comment),
            Entry::Instruction {
                mnemonic,
                operand,
                comment,
            } => {
                let line = match operand {
                    Operand::None => format!("{}", mnemonic),
                    Operand::Data(value) if operand.extra_words() == 0 => {
                        format!("{} ${:02x}", mnemonic, value)
                    }
                    Operand::Data(value) => format!("{} ${:04x}", mnemonic, value),
                    Operand::Symbol(reference) => {
                        let address = symbols
                            .address(*reference)
                            .expect("rendered buffers are resolved");
                        format!("{} ${:04x}", mnemonic, address)
                    }
                };
                (line, comment)
            }
        };

        match comment {
            Some(comment) if with_comments => {
                let _ = writeln!(out, "{:<24}; {}", line, comment);
            }
            _ => {
                let _ = writeln!(out, "{}", line);
            }
        }
    }
    out
}

/// Assemble `asm`/`asmc` text back into machine words.
#[tracing::instrument(skip(text))]
pub fn assemble_listing(text: &str) -> Result<Vec<u16>, ListingError> {
    let mut words = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let number = index + 1;
        let line = line.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let (head, operand) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, Some(rest.trim())),
            None => (line, None),
        };

        if head == ".word" {
            let operand = operand.ok_or(ListingError::MissingOperand(number))?;
            words.push(parse_operand(operand, number)?.0);
            continue;
        }

        let mnemonic = Mnemonic::from_str(head)
            .map_err(|_| ListingError::UnknownMnemonic(head.to_string(), number))?;
        match operand {
            None => words.push(mnemonic.encode_short(0)),
            Some(operand) => {
                let (value, long) = parse_operand(operand, number)?;
                if long {
                    words.push(mnemonic.encode_long());
                    words.push(value);
                } else if value > SHORT_OPERAND_MAX {
                    return Err(ListingError::ShortOperandOverflow(value, number));
                } else {
                    words.push(mnemonic.encode_short(value));
                }
            }
        }
    }
    Ok(words)
}

/// Parse a `$XX` or `$XXXX` operand; the digit width selects the form.
fn parse_operand(text: &str, line: usize) -> Result<(u16, bool), ListingError> {
    let digits = text
        .strip_prefix('$')
        .ok_or_else(|| ListingError::BadOperand(text.to_string(), line))?;
    let value = u16::from_str_radix(digits, 16)
        .map_err(|_| ListingError::BadOperand(text.to_string(), line))?;
    Ok((value, digits.len() > 2))
}

/// Render words as flat hex, 16 to a line.
pub fn render_aexe(words: &[u16]) -> String {
    let mut out = String::new();
    for (index, word) in words.iter().enumerate() {
        if index % 16 == 0 {
            if index != 0 {
                out.push('\n');
            }
        } else {
            out.push(' ');
        }
        let _ = write!(out, "{:04x}", word);
    }
    if !words.is_empty() {
        out.push('\n');
    }
    out
}

/// Render a Logisim memory image: run-length encoded hex words, padded with
/// zeros up to `min_size` when given.
pub fn render_logisim(words: &[u16], min_size: Option<usize>) -> String {
    let mut padded = words.to_vec();
    if let Some(min_size) = min_size {
        if padded.len() < min_size {
            padded.resize(min_size, 0);
        }
    }

    let mut out = String::from("v3.0 hex words plain\n");
    let mut tokens: Vec<String> = Vec::new();
    let mut iter = padded.iter().peekable();
    while let Some(word) = iter.next() {
        let mut run = 1usize;
        while iter.peek() == Some(&word) {
            iter.next();
            run += 1;
        }
        if run > 1 {
            tokens.push(format!("{}*{:04x}", run, word));
        } else {
            tokens.push(format!("{:04x}", word));
        }
    }

    for chunk in tokens.chunks(8) {
        out.push_str(&chunk.join(" "));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::linker::resolve;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_asm_roundtrip() {
        let mut symbols = SymbolTable::new();
        let end = symbols.create_label(None);

        let mut buffer = InstructionBuffer::new();
        buffer.emit_data(Mnemonic::LDIA, 2);
        buffer.emit_data(Mnemonic::LDIB, 0x1234);
        buffer.emit(Mnemonic::ADD);
        buffer.emit_ref(Mnemonic::JMP, end);
        buffer.mark(end);
        buffer.emit(Mnemonic::HLT);
        buffer.emit_word(0xBEEF);

        let words = resolve(&buffer, &mut symbols, 0).unwrap();
        let listing = render_asm(&buffer, &symbols, false);
        assert_eq!(
            listing,
            "LDIA $02\nLDIB $1234\nADD\nJMP $0006\nHLT\n.word $beef\n"
        );
        assert_eq!(assemble_listing(&listing).unwrap(), words);
    }

    #[test]
    fn test_render_asm_with_comments() {
        let mut symbols = SymbolTable::new();
        let start = symbols.create_label(Some("start"));

        let mut buffer = InstructionBuffer::new();
        buffer.mark(start);
        buffer.emit(Mnemonic::HLT);
        buffer.comment("all done");

        resolve(&buffer, &mut symbols, 0).unwrap();
        let listing = render_asm(&buffer, &symbols, true);
        let expected = format!("; start:\n{:<24}; all done\n", "HLT");
        assert_eq!(listing, expected);
        assert_eq!(
            assemble_listing(&listing).unwrap(),
            vec![Mnemonic::HLT.encode_short(0)]
        );
    }

    #[test]
    fn test_assemble_listing_errors() {
        let tests = vec![
            ("FLY $01", ListingError::UnknownMnemonic("FLY".to_string(), 1)),
            ("LDIA 12", ListingError::BadOperand("12".to_string(), 1)),
            ("LDIA $ff", ListingError::ShortOperandOverflow(0xFF, 1)),
            (".word", ListingError::MissingOperand(1)),
        ];
        for (input, expected) in tests {
            assert_eq!(assemble_listing(input), Err(expected));
        }
    }

    #[test]
    fn test_render_aexe() {
        let words: Vec<u16> = (0..18).collect();
        let text = render_aexe(&words);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000 0001"));
        assert_eq!(lines[1], "0010 0011");
    }

    #[test]
    fn test_render_logisim_run_length() {
        let words = vec![7, 7, 7, 7, 1];
        let text = render_logisim(&words, Some(9));
        assert_eq!(text, "v3.0 hex words plain\n4*0007 0001 4*0000\n");
    }
}
