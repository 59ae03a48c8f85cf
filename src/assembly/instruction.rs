use std::fmt;

/// Number of bits the opcode occupies at the top of an instruction word.
pub const OPCODE_SHIFT: u16 = 11;

/// Flag bit marking an instruction whose operand lives in the next word.
pub const LONG_OPERAND_BIT: u16 = 1 << 10;

/// Largest operand value the single-word instruction form can carry.
pub const SHORT_OPERAND_MAX: u16 = 0x1F;

/// Mnemonic of an instruction.
///
/// This represents the operation that is performed by the instruction.
/// The machine is a three-register accumulator design: every ALU operation
/// reads A and B and writes A, and only ADD/SUB/MULT touch the carry flag.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, strum_macros::EnumString)]
pub enum Mnemonic {
    /// Do nothing
    NOP,
    /// A = mem[operand]
    AIN,
    /// B = mem[operand]
    BIN,
    /// C = mem[operand]
    CIN,
    /// A = operand
    LDIA,
    /// B = operand
    LDIB,
    /// mem[operand] = A
    STA,
    /// A = A + B, carry on overflow
    ADD,
    /// A = A - B, carry when A >= B
    SUB,
    /// A = A * B (wrapping), carry on overflow
    MULT,
    /// A = A / B, zero when B is zero
    DIV,
    /// A = A & B
    AND,
    /// A = A | B
    OR,
    /// A = !A (bitwise)
    NOT,
    /// A = A << B
    BSL,
    /// A = A >> B
    BSR,
    /// PC = operand
    JMP,
    /// PC = operand when A is zero
    JMPZ,
    /// PC = operand when the carry flag is set
    JMPC,
    /// PC = A
    JREG,
    /// A = mem[A]
    LDAIN,
    /// mem[A] = B
    STAOUT,
    /// Swap A and B
    SWP,
    /// Swap A and C
    SWPC,
    /// Select the memory bank for loads and stores
    BNK,
    /// Stop the clock
    HLT,
}

/// All mnemonics in opcode order.
const MNEMONICS: [Mnemonic; 26] = [
    Mnemonic::NOP,
    Mnemonic::AIN,
    Mnemonic::BIN,
    Mnemonic::CIN,
    Mnemonic::LDIA,
    Mnemonic::LDIB,
    Mnemonic::STA,
    Mnemonic::ADD,
    Mnemonic::SUB,
    Mnemonic::MULT,
    Mnemonic::DIV,
    Mnemonic::AND,
    Mnemonic::OR,
    Mnemonic::NOT,
    Mnemonic::BSL,
    Mnemonic::BSR,
    Mnemonic::JMP,
    Mnemonic::JMPZ,
    Mnemonic::JMPC,
    Mnemonic::JREG,
    Mnemonic::LDAIN,
    Mnemonic::STAOUT,
    Mnemonic::SWP,
    Mnemonic::SWPC,
    Mnemonic::BNK,
    Mnemonic::HLT,
];

impl Mnemonic {
    pub fn opcode(&self) -> u16 {
        MNEMONICS
            .iter()
            .position(|m| m == self)
            .expect("every mnemonic has an opcode") as u16
    }

    pub fn from_opcode(opcode: u16) -> Option<Mnemonic> {
        MNEMONICS.get(opcode as usize).copied()
    }

    /// Whether the instruction word carries an operand at all.
    pub fn takes_operand(&self) -> bool {
        matches!(
            self,
            Mnemonic::AIN
                | Mnemonic::BIN
                | Mnemonic::CIN
                | Mnemonic::LDIA
                | Mnemonic::LDIB
                | Mnemonic::STA
                | Mnemonic::JMP
                | Mnemonic::JMPZ
                | Mnemonic::JMPC
                | Mnemonic::BNK
        )
    }

    /// Encode the single-word form. The operand must fit in five bits.
    pub fn encode_short(&self, operand: u16) -> u16 {
        debug_assert!(operand <= SHORT_OPERAND_MAX);
        (self.opcode() << OPCODE_SHIFT) | operand
    }

    /// Encode the head word of the two-word form; the operand follows as a
    /// full word of its own.
    pub fn encode_long(&self) -> u16 {
        (self.opcode() << OPCODE_SHIFT) | LONG_OPERAND_BIT
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A decoded instruction word, as the listing assembler and the tests see it.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DecodedOperand {
    None,
    Short(u16),
    /// The operand is the word following the instruction word.
    Long,
}

/// Split an instruction word into its mnemonic and operand form.
pub fn decode(word: u16) -> Option<(Mnemonic, DecodedOperand)> {
    let mnemonic = Mnemonic::from_opcode(word >> OPCODE_SHIFT)?;
    let operand = if !mnemonic.takes_operand() {
        DecodedOperand::None
    } else if word & LONG_OPERAND_BIT != 0 {
        DecodedOperand::Long
    } else {
        DecodedOperand::Short(word & SHORT_OPERAND_MAX)
    };
    Some((mnemonic, operand))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_opcode_roundtrip() {
        for mnemonic in MNEMONICS {
            assert_eq!(Mnemonic::from_opcode(mnemonic.opcode()), Some(mnemonic));
        }
        assert_eq!(Mnemonic::from_opcode(26), None);
    }

    #[test]
    fn test_from_str() {
        let tests = vec![
            ("AIN", Mnemonic::AIN),
            ("STA", Mnemonic::STA),
            ("JMPZ", Mnemonic::JMPZ),
            ("STAOUT", Mnemonic::STAOUT),
        ];
        for (input, expected) in tests {
            assert_eq!(Mnemonic::from_str(input), Ok(expected));
        }
        assert!(Mnemonic::from_str("XYZ").is_err());
    }

    #[test]
    fn test_encode_decode() {
        let short = Mnemonic::LDIA.encode_short(5);
        assert_eq!(decode(short), Some((Mnemonic::LDIA, DecodedOperand::Short(5))));

        let long = Mnemonic::JMP.encode_long();
        assert_eq!(decode(long), Some((Mnemonic::JMP, DecodedOperand::Long)));

        let implied = Mnemonic::ADD.encode_short(0);
        assert_eq!(decode(implied), Some((Mnemonic::ADD, DecodedOperand::None)));
    }
}
