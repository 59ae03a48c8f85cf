/// Transforms Yabal source code into a machine image for the 16-bit
/// accumulator machine.
///
/// The steps are:
/// 1. **Lexing** - converting a string into tokens
/// 2. **Parsing** - converting tokens into an AST
/// 3. **Building** - walking the tree in four phases
///     - Phase 1: Declare - registering structs and functions
///     - Phase 2: Initialize - resolving names, placing variables, typing
///     - Phase 3: Optimize - constant folding and dead-code pruning
///     - Phase 4: Build - emitting symbolic instructions
/// 4. **Linking** - resolving every symbol and rendering machine words
pub mod compiler;

/// Instruction set, symbolic instruction buffer, linker and output formats.
pub mod assembly;

/// Character table shared by string literals and keyboard input.
pub mod charset;
