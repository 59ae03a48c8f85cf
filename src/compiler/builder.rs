use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::assembly::buffer::InstructionBuffer;
use crate::assembly::instruction::Mnemonic;
use crate::assembly::symbols::{Label, Pointer, SymbolId, SymbolRef, SymbolTable};
use crate::assembly::{MAX_CALL_DEPTH, PROGRAM_SIZE};
use crate::charset::CHARSET;
use crate::compiler::ast::FileKind;
use crate::compiler::diagnostics::{Diagnostics, Message};
use crate::compiler::source::SourceRange;
use crate::compiler::types::{StructLayout, Type};
use crate::compiler::FileLoader;

use self::scope::{BlockStack, PointerCollection, Variable};

/// Lexical scopes, variables and pointer placement.
pub mod scope;

/// Expression emission: values are computed into register A.
pub mod expression;

/// Statement emission and the visitor pipeline over the tree.
pub mod statement;

/// A function registered during the declare phase.
#[derive(Debug)]
pub struct FunctionDef {
    pub name: String,
    pub parameter_types: Vec<(String, Type)>,
    pub return_type: Type,
    /// Label of the first body instruction
    pub entry: Label,
    /// Number of call sites; bodies of unreferenced functions are dropped
    pub references: u32,
    /// Buffer the body is emitted into
    pub buffer_index: usize,
    /// Parameter variables, filled during the initialize phase
    pub parameters: Vec<Rc<Variable>>,
    pub range: SourceRange,
}

/// An embedded binary file, loaded before emission.
#[derive(Debug)]
pub struct FileEntry {
    pub path: String,
    pub kind: FileKind,
    pub pointer: Pointer,
    pub data: Vec<u8>,
}

/// Jump targets of the innermost loop, for `continue` and `break`.
#[derive(Debug, Clone, Copy)]
pub struct LoopLabels {
    pub continue_label: Label,
    pub break_label: Label,
}

/// Everything `finish` hands to the linker.
pub struct BuildArtifacts {
    pub buffer: InstructionBuffer,
    pub symbols: SymbolTable,
    pub diagnostics: Diagnostics,
}

/// The code-generation context threaded through the whole tree.
///
/// One builder exists per compilation. Function bodies do not get builders of
/// their own; they get instruction buffers of their own, and the builder is
/// switched onto them while a body is built, so every table (symbols, scopes,
/// pools, diagnostics) is naturally shared.
pub struct Builder<'a> {
    pub symbols: SymbolTable,
    pub diagnostics: Diagnostics,
    pub(crate) loader: &'a dyn FileLoader,

    buffers: Vec<InstructionBuffer>,
    current: usize,

    pub(crate) globals: PointerCollection,
    pub(crate) temporaries: PointerCollection,
    pub(crate) stack: PointerCollection,
    pub(crate) blocks: BlockStack,

    pub(crate) functions: Vec<FunctionDef>,
    structs: HashMap<String, Rc<StructLayout>>,
    strings: Vec<(String, Pointer)>,
    files: Vec<FileEntry>,

    pub(crate) call_used: bool,
    pub(crate) call_label: Label,
    pub(crate) return_label: Label,
    pub(crate) sp_cell: Pointer,
    pub(crate) ret_cell: Pointer,
    pub(crate) scratch_cell: Pointer,

    pub(crate) loop_stack: Vec<LoopLabels>,
    /// Loop nesting during the initialize phase, for break/continue checks
    pub(crate) loop_depth: usize,
}

impl<'a> Builder<'a> {
    pub fn new(loader: &'a dyn FileLoader, diagnostics: Diagnostics) -> Builder<'a> {
        let mut symbols = SymbolTable::new();
        let call_label = symbols.create_label(Some("__call"));
        let return_label = symbols.create_label(Some("__return"));
        let sp_cell = symbols.create_pointer(Some("__sp"));
        let ret_cell = symbols.create_pointer(Some("__ret"));
        let scratch_cell = symbols.create_pointer(Some("__temp"));

        Builder {
            symbols,
            diagnostics,
            loader,
            buffers: vec![InstructionBuffer::new()],
            current: 0,
            globals: PointerCollection::default(),
            temporaries: PointerCollection::default(),
            stack: PointerCollection::default(),
            blocks: BlockStack::new(),
            functions: Vec::new(),
            structs: HashMap::new(),
            strings: Vec::new(),
            files: Vec::new(),
            call_used: false,
            call_label,
            return_label,
            sp_cell,
            ret_cell,
            scratch_cell,
            loop_stack: Vec::new(),
            loop_depth: 0,
        }
    }

    // --- Buffers ---

    pub fn buffer(&mut self) -> &mut InstructionBuffer {
        &mut self.buffers[self.current]
    }

    /// Switch emission onto another buffer, returning the previous one for
    /// `restore_buffer`.
    pub(crate) fn select_buffer(&mut self, index: usize) -> usize {
        std::mem::replace(&mut self.current, index)
    }

    pub(crate) fn restore_buffer(&mut self, index: usize) {
        self.current = index;
    }

    // --- Diagnostics ---

    pub fn error(&mut self, range: SourceRange, message: Message) {
        self.diagnostics.error(range, message);
    }

    // --- Variables and temporaries ---

    /// Place a variable on a fresh pointer of the region its scope dictates
    /// and register it in the innermost block.
    pub fn declare_variable(&mut self, name: &str, ty: Type, range: SourceRange) -> Rc<Variable> {
        let size = ty.size().max(1);
        let collection = if self.blocks.current_function().is_some() {
            &mut self.stack
        } else {
            &mut self.globals
        };
        let pointer = collection.get_next(&mut self.symbols, None, size);
        self.symbols.assign_variable(pointer, name);

        let variable = Rc::new(Variable::new(name, pointer, ty));
        if !self.blocks.declare(variable.clone()) {
            self.diagnostics
                .error(range, Message::DuplicateDeclaration(name.to_string()));
        }
        variable
    }

    pub fn lookup_variable(&self, name: &str) -> Option<Rc<Variable>> {
        self.blocks.lookup(name)
    }

    /// A one-word scratch cell. Function frames draw from the call-spilled
    /// stack region so held temporaries survive nested calls.
    pub fn get_temporary(&mut self) -> Pointer {
        if let Some(pointer) = self.blocks.take_free_temporary() {
            return pointer;
        }
        let collection = if self.blocks.current_function().is_some() {
            &mut self.stack
        } else {
            &mut self.temporaries
        };
        collection.get_next(&mut self.symbols, None, 1)
    }

    pub fn release_temporary(&mut self, pointer: Pointer) {
        self.blocks.release_temporary(pointer);
    }

    // --- Functions and structs ---

    pub fn register_function(
        &mut self,
        name: &str,
        parameter_types: Vec<(String, Type)>,
        return_type: Type,
        range: SourceRange,
    ) -> usize {
        if self.find_function(name).is_some() {
            self.diagnostics
                .error(range, Message::DuplicateDeclaration(name.to_string()));
        }
        let entry = self.symbols.create_label(Some(name));
        self.buffers.push(InstructionBuffer::new());
        let index = self.functions.len();
        self.functions.push(FunctionDef {
            name: name.to_string(),
            parameter_types,
            return_type,
            entry,
            references: 0,
            buffer_index: self.buffers.len() - 1,
            parameters: Vec::new(),
            range,
        });
        index
    }

    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|def| def.name == name)
    }

    pub fn register_struct(&mut self, layout: StructLayout, range: SourceRange) {
        if self.structs.contains_key(&layout.name) {
            self.diagnostics
                .error(range, Message::DuplicateDeclaration(layout.name.clone()));
            return;
        }
        self.structs.insert(layout.name.clone(), Rc::new(layout));
    }

    pub fn find_struct(&self, name: &str) -> Option<Rc<StructLayout>> {
        self.structs.get(name).cloned()
    }

    /// Replace parser-produced struct names with their layouts.
    pub fn resolve_type(&mut self, ty: &mut Type, range: SourceRange) {
        match ty {
            Type::Named(name) => match self.find_struct(name) {
                Some(layout) => *ty = Type::Struct(layout),
                None => {
                    let name = name.clone();
                    self.diagnostics.error(range, Message::UnknownType(name));
                    *ty = Type::Unknown;
                }
            },
            Type::Pointer { element, .. } => self.resolve_type(element, range),
            Type::Reference(inner) => self.resolve_type(inner, range),
            Type::Array { element, .. } => self.resolve_type(element, range),
            _ => (),
        }
    }

    // --- Literal pools ---

    /// Deduplicated string pool entry for a literal.
    pub fn intern_string(&mut self, value: &str) -> Pointer {
        if let Some((_, pointer)) = self.strings.iter().find(|(text, _)| text == value) {
            return *pointer;
        }
        let pointer = self.symbols.create_pointer(Some("str"));
        self.strings.push((value.to_string(), pointer));
        pointer
    }

    /// Load and pool a binary file. Entries are keyed by path and kind.
    pub fn include_file(&mut self, path: &str, kind: FileKind, range: SourceRange) -> Pointer {
        if let Some(entry) = self
            .files
            .iter()
            .find(|entry| entry.path == path && entry.kind == kind)
        {
            return entry.pointer;
        }
        let data = match self.loader.read(path) {
            Ok(data) => data,
            Err(error) => {
                self.diagnostics
                    .error(range, Message::FileError(path.to_string(), error.to_string()));
                Vec::new()
            }
        };
        let pointer = self.symbols.create_pointer(Some("file"));
        self.files.push(FileEntry {
            path: path.to_string(),
            kind,
            pointer,
            data,
        });
        pointer
    }

    // --- Emission helpers ---

    /// Load A from a symbol, switching banks around the access when needed.
    pub fn emit_load_a(&mut self, reference: SymbolRef) {
        let bank = self.symbols.bank(reference.id);
        self.emit_banked(bank, Mnemonic::AIN, reference);
    }

    pub fn emit_load_b(&mut self, reference: SymbolRef) {
        let bank = self.symbols.bank(reference.id);
        self.emit_banked(bank, Mnemonic::BIN, reference);
    }

    pub fn emit_store_a(&mut self, reference: SymbolRef) {
        let bank = self.symbols.bank(reference.id);
        self.emit_banked(bank, Mnemonic::STA, reference);
    }

    fn emit_banked(&mut self, bank: u8, mnemonic: Mnemonic, reference: SymbolRef) {
        if bank != 0 {
            self.buffer().emit_data(Mnemonic::BNK, bank as u16);
        }
        self.buffer().emit_ref(mnemonic, reference);
        if bank != 0 {
            self.buffer().emit_data(Mnemonic::BNK, 0);
        }
    }

    // --- Layout ---

    /// Every stack slot word, in collection order, as the trampolines spill
    /// and reload them.
    fn stack_slot_words(&self) -> Vec<SymbolRef> {
        self.stack
            .iter()
            .flat_map(|pointer| {
                let size = self.symbols.get(pointer.id()).size;
                (0..size).map(move |word| pointer.with_offset(word))
            })
            .collect()
    }

    /// The shared `__call` / `__return` sequences. The machine has no call
    /// instruction: `__call` saves the return address at [SP], spills every
    /// stack slot above it, bumps SP and jumps to the callee held in C;
    /// `__return` undoes all of it and jumps to the saved return address.
    fn build_trampolines(&mut self, out: &mut InstructionBuffer) {
        let slots = self.stack_slot_words();
        let frame = slots.len() as u16 + 1;

        // On entry: A = SP, B = return address, C = callee.
        out.mark(self.call_label);
        out.emit(Mnemonic::STAOUT);
        out.comment("mem[SP] = return address");
        for (index, slot) in slots.iter().enumerate() {
            out.emit_ref(Mnemonic::AIN, self.sp_cell);
            out.emit_data(Mnemonic::LDIB, index as u16 + 1);
            out.emit(Mnemonic::ADD);
            out.emit(Mnemonic::SWP);
            out.emit_ref(Mnemonic::AIN, *slot);
            out.emit(Mnemonic::SWP);
            out.emit(Mnemonic::STAOUT);
            out.comment(&format!("spill slot {}", index));
        }
        out.emit_ref(Mnemonic::AIN, self.sp_cell);
        out.emit_data(Mnemonic::LDIB, frame);
        out.emit(Mnemonic::ADD);
        out.emit_ref(Mnemonic::STA, self.sp_cell);
        out.emit(Mnemonic::SWPC);
        out.emit(Mnemonic::JREG);
        out.comment("enter the callee");

        // On entry: A = return value.
        out.mark(self.return_label);
        out.emit_ref(Mnemonic::STA, self.ret_cell);
        out.emit_ref(Mnemonic::AIN, self.sp_cell);
        out.emit_data(Mnemonic::LDIB, frame);
        out.emit(Mnemonic::SUB);
        out.emit_ref(Mnemonic::STA, self.sp_cell);
        for (index, slot) in slots.iter().enumerate() {
            out.emit_ref(Mnemonic::AIN, self.sp_cell);
            out.emit_data(Mnemonic::LDIB, index as u16 + 1);
            out.emit(Mnemonic::ADD);
            out.emit(Mnemonic::LDAIN);
            out.emit_ref(Mnemonic::STA, *slot);
            out.comment(&format!("reload slot {}", index));
        }
        out.emit_ref(Mnemonic::AIN, self.sp_cell);
        out.emit(Mnemonic::LDAIN);
        out.emit(Mnemonic::JREG);
        out.comment("jump to the return address");
    }

    /// Append the string pool and the binary file pool.
    fn build_pools(&mut self, out: &mut InstructionBuffer) {
        let strings = std::mem::take(&mut self.strings);
        for (text, pointer) in &strings {
            out.mark(*pointer);
            for c in text.chars() {
                let code = CHARSET.encode(c).unwrap_or(0);
                out.emit_word(code);
                out.comment(&format!("{:?}", c));
            }
            out.emit_word(crate::charset::STRING_TERMINATOR);
            out.comment(&format!("end of {:?}", text));
        }

        let files = std::mem::take(&mut self.files);
        for entry in &files {
            let mut words = vec![entry.data.len() as u16];
            words.extend(entry.data.chunks(2).map(|pair| {
                let low = *pair.get(1).unwrap_or(&0);
                u16::from_be_bytes([pair[0], low])
            }));

            let offset = entry.kind.label_offset() as usize;
            let mut marked = false;
            for (index, word) in words.iter().enumerate() {
                if index == offset {
                    out.mark(entry.pointer);
                    marked = true;
                }
                out.emit_word(*word);
                if index == 0 {
                    out.comment(&format!("{} ({} bytes)", entry.path, entry.data.len()));
                }
            }
            if !marked {
                out.mark(entry.pointer);
            }
        }
    }

    /// Lay the final image out and hand it to the linker, in the fixed
    /// order: jump-over, data region, function bodies, trampolines and their
    /// cells, stack pointer setup, main program, literal pools.
    #[tracing::instrument(skip(self))]
    pub fn finish(mut self) -> BuildArtifacts {
        let mut trampolines = InstructionBuffer::new();
        if self.call_used {
            self.build_trampolines(&mut trampolines);
        }

        // Dead functions are dropped with a note; everything else is kept in
        // declaration order. When no call survived to emission, every body is
        // unreachable and the trampolines the bodies return through do not
        // exist, so all of them go.
        let call_used = self.call_used;
        let included: Vec<usize> = (0..self.functions.len())
            .filter(|&index| {
                let def = &self.functions[index];
                if call_used && def.references > 0 {
                    true
                } else {
                    self.diagnostics
                        .debug(def.range, Message::UnusedFunction(def.name.clone()));
                    false
                }
            })
            .collect();

        // Program start: initialize SP when calls exist, then the main code
        // and the literal pools behind a jump-over.
        let start = self.symbols.create_label(Some("start"));
        let mut tail = InstructionBuffer::new();
        tail.mark(start);
        if self.call_used {
            let stack_words = self.stack.total_words(&self.symbols);
            let initial_sp = PROGRAM_SIZE - (1 + stack_words * MAX_CALL_DEPTH);
            tail.emit_data(Mnemonic::LDIA, initial_sp);
            tail.comment("initial stack pointer");
            tail.emit_ref(Mnemonic::STA, self.sp_cell);
        }
        let mut main = std::mem::take(&mut self.buffers[0]);
        tail.append(&mut main);

        if !self.strings.is_empty() || !self.files.is_empty() {
            let end = self.symbols.create_label(Some("end"));
            tail.emit_ref(Mnemonic::JMP, end);
            tail.comment("jump over the literal pools");
            self.build_pools(&mut tail);
            tail.mark(end);
        }
        tail.emit(Mnemonic::HLT);

        // Only symbols some included code actually references get a slot in
        // the data region; elided variables vanish with their stores.
        let mut referenced: HashSet<SymbolId> = tail
            .referenced_symbols()
            .chain(trampolines.referenced_symbols())
            .collect();
        for &index in &included {
            let buffer = &self.buffers[self.functions[index].buffer_index];
            referenced.extend(buffer.referenced_symbols());
        }

        let mut data = InstructionBuffer::new();
        let region = self
            .globals
            .iter()
            .chain(self.temporaries.iter())
            .chain(self.stack.iter())
            .collect::<Vec<_>>();
        for pointer in region {
            if !referenced.contains(&pointer.id()) {
                continue;
            }
            let symbol = self.symbols.get(pointer.id());
            let comment = if symbol.assigned.is_empty() {
                symbol.name.clone()
            } else {
                symbol.assigned.join(", ")
            };
            let size = symbol.size;
            data.mark(pointer);
            for _ in 0..size {
                data.emit_word(0);
                data.comment(&comment);
            }
        }

        let mut cells = InstructionBuffer::new();
        for cell in [self.sp_cell, self.ret_cell, self.scratch_cell] {
            if referenced.contains(&cell.id()) {
                let comment = self.symbols.get(cell.id()).name.clone();
                cells.mark(cell);
                cells.emit_word(0);
                cells.comment(&comment);
            }
        }

        let mut out = InstructionBuffer::new();
        let header_present =
            !data.is_empty() || !cells.is_empty() || !included.is_empty() || self.call_used;
        if header_present {
            out.emit_ref(Mnemonic::JMP, start);
            out.comment("jump over the header");
        }
        out.append(&mut data);
        for index in included {
            let buffer_index = self.functions[index].buffer_index;
            out.append(&mut self.buffers[buffer_index]);
        }
        out.append(&mut trampolines);
        out.append(&mut cells);
        out.append(&mut tail);

        BuildArtifacts {
            buffer: out,
            symbols: self.symbols,
            diagnostics: self.diagnostics,
        }
    }
}

impl std::fmt::Debug for Builder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("functions", &self.functions.len())
            .field("call_used", &self.call_used)
            .finish()
    }
}
