/// Instruction set and machine word encoding.
pub mod instruction;

/// Pointer and label symbols, owned by the symbol table.
pub mod symbols;

/// The append-only instruction buffer code generation emits into.
pub mod buffer;

/// Single-pass symbol resolution of a finished buffer.
pub mod linker;

/// Renderings of a linked program: assembly text, hex words, Logisim image.
pub mod output;

/// Size in words of the default program memory.
pub const PROGRAM_SIZE: u16 = 0xEF6E;

/// Deepest supported call nesting; the initial stack pointer leaves room for
/// this many spilled frames below the top of program memory.
pub const MAX_CALL_DEPTH: u16 = 16;

/// Memory-mapped device locations of the reference machine. The compiler
/// embeds nothing on its own; programs reach the devices through
/// `create_pointer` and these are the addresses device handlers listen on.
pub mod memory_map {
    /// Pixel framebuffer, bank 1
    pub const SCREEN: u16 = 0xD26F;
    /// Character buffer, bank 1
    pub const CHARACTERS: u16 = 0xD12A;
    /// Last pressed key, bank 1
    pub const KEYBOARD: u16 = 0xD0FC;
    /// Packed mouse state, bank 1
    pub const MOUSE: u16 = 0xD0FD;
    /// Bank the devices live in
    pub const DEVICE_BANK: u8 = 1;
}
