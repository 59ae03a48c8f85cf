//! A minimal stepper for the 16-bit accumulator machine, just enough to run
//! compiled images in integration tests. The real emulator lives outside
//! this crate; this one only honors the instruction semantics the compiler
//! relies on.

use yabal::assembly::instruction::{decode, DecodedOperand, Mnemonic};

const BANK_SIZE: usize = 0x10000;

pub struct Machine {
    pub a: u16,
    pub b: u16,
    pub c: u16,
    pc: u16,
    bank: u8,
    carry: bool,
    halted: bool,
    banks: Vec<Vec<u16>>,
}

impl Machine {
    pub fn load(words: &[u16]) -> Machine {
        let mut bank0 = vec![0u16; BANK_SIZE];
        bank0[..words.len()].copy_from_slice(words);
        Machine {
            a: 0,
            b: 0,
            c: 0,
            pc: 0,
            bank: 0,
            carry: false,
            halted: false,
            banks: vec![bank0, vec![0u16; BANK_SIZE]],
        }
    }

    pub fn read(&self, bank: u8, address: u16) -> u16 {
        self.banks
            .get(bank as usize)
            .map(|memory| memory[address as usize])
            .unwrap_or(0)
    }

    fn memory(&mut self) -> &mut Vec<u16> {
        let bank = self.bank as usize;
        while self.banks.len() <= bank {
            self.banks.push(vec![0u16; BANK_SIZE]);
        }
        &mut self.banks[bank]
    }

    /// Run until HLT; panics when the program does not halt in `max_steps`.
    pub fn run(&mut self, max_steps: usize) {
        for _ in 0..max_steps {
            if self.halted {
                return;
            }
            self.step();
        }
        panic!("program did not halt after {} steps", max_steps);
    }

    fn step(&mut self) {
        let word = self.banks[0][self.pc as usize];
        let (mnemonic, form) = decode(word).unwrap_or_else(|| {
            panic!("invalid instruction {:#06x} at {:#06x}", word, self.pc)
        });
        let (operand, width) = match form {
            DecodedOperand::None => (0, 1),
            DecodedOperand::Short(value) => (value, 1),
            DecodedOperand::Long => (self.banks[0][self.pc as usize + 1], 2),
        };
        let next = self.pc.wrapping_add(width);

        let mut jump = None;
        match mnemonic {
            Mnemonic::NOP => (),
            Mnemonic::AIN => self.a = self.memory()[operand as usize],
            Mnemonic::BIN => self.b = self.memory()[operand as usize],
            Mnemonic::CIN => self.c = self.memory()[operand as usize],
            Mnemonic::LDIA => self.a = operand,
            Mnemonic::LDIB => self.b = operand,
            Mnemonic::STA => {
                let a = self.a;
                self.memory()[operand as usize] = a;
            }
            Mnemonic::ADD => {
                let sum = self.a as u32 + self.b as u32;
                self.carry = sum > 0xFFFF;
                self.a = sum as u16;
            }
            Mnemonic::SUB => {
                self.carry = self.a >= self.b;
                self.a = self.a.wrapping_sub(self.b);
            }
            Mnemonic::MULT => {
                let product = self.a as u32 * self.b as u32;
                self.carry = product > 0xFFFF;
                self.a = product as u16;
            }
            Mnemonic::DIV => self.a = self.a.checked_div(self.b).unwrap_or(0),
            Mnemonic::AND => self.a &= self.b,
            Mnemonic::OR => self.a |= self.b,
            Mnemonic::NOT => self.a = !self.a,
            Mnemonic::BSL => self.a = if self.b >= 16 { 0 } else { self.a << self.b },
            Mnemonic::BSR => self.a = if self.b >= 16 { 0 } else { self.a >> self.b },
            Mnemonic::JMP => jump = Some(operand),
            Mnemonic::JMPZ => {
                if self.a == 0 {
                    jump = Some(operand);
                }
            }
            Mnemonic::JMPC => {
                if self.carry {
                    jump = Some(operand);
                }
            }
            Mnemonic::JREG => jump = Some(self.a),
            Mnemonic::LDAIN => {
                let a = self.a;
                self.a = self.memory()[a as usize];
            }
            Mnemonic::STAOUT => {
                let (a, b) = (self.a, self.b);
                self.memory()[a as usize] = b;
            }
            Mnemonic::SWP => std::mem::swap(&mut self.a, &mut self.b),
            Mnemonic::SWPC => std::mem::swap(&mut self.a, &mut self.c),
            Mnemonic::BNK => self.bank = operand as u8,
            Mnemonic::HLT => self.halted = true,
        }

        self.pc = jump.unwrap_or(next);
    }
}

/// Compile a source string, panicking on any error, and return the program.
pub fn compile(source: &str) -> yabal::compiler::LinkedProgram {
    let output = yabal::compiler::compile_source(source);
    assert!(
        !output.diagnostics.has_errors(),
        "compile failed:\n{}",
        output.diagnostics
    );
    output.program.expect("no image despite a clean compile")
}

/// Compile and run a source string, returning the halted machine.
pub fn run(source: &str) -> (Machine, yabal::compiler::LinkedProgram) {
    let program = compile(source);
    let mut machine = Machine::load(&program.words);
    machine.run(500_000);
    (machine, program)
}

/// The word a named variable holds after the program ran.
pub fn variable(machine: &Machine, program: &yabal::compiler::LinkedProgram, name: &str) -> u16 {
    let address = program
        .address_of(name)
        .unwrap_or_else(|| panic!("variable `{}` has no address", name));
    machine.read(0, address)
}
