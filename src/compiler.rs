use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use crate::assembly::buffer::InstructionBuffer;
use crate::assembly::linker;
use crate::assembly::output::{self, OutputFormat};
use crate::assembly::symbols::SymbolTable;
use crate::assembly::PROGRAM_SIZE;
use crate::compiler::ast::{Statement, StatementKind};
use crate::compiler::builder::Builder;
use crate::compiler::diagnostics::{Diagnostics, Message};
use crate::compiler::lexer::Lexer;
use crate::compiler::parser::Parser;
use crate::compiler::source::SourceRange;

/// Statement and expression tree.
pub mod ast;

/// The code-generation context and the visitor pipeline.
pub mod builder;

/// Range-keyed error accumulation.
pub mod diagnostics;

/// Tokenization.
pub mod lexer;

/// Token stream to AST.
pub mod parser;

/// Source positions and ranges.
pub mod source;

/// The type system.
pub mod types;

/// Where imports and embedded binary files come from. The compiler core
/// never touches the filesystem directly; tests substitute maps.
pub trait FileLoader {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    fn read_text(&self, path: &str) -> io::Result<String> {
        String::from_utf8(self.read(path)?)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
    }
}

/// Loads paths relative to a base directory.
pub struct FsLoader {
    base: PathBuf,
}

impl FsLoader {
    pub fn new(base: impl Into<PathBuf>) -> FsLoader {
        FsLoader { base: base.into() }
    }
}

impl FileLoader for FsLoader {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.base.join(path))
    }
}

/// Rejects every read; for sources that stand alone.
pub struct NoLoader;

impl FileLoader for NoLoader {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no loader for `{}`", path),
        ))
    }
}

/// A linked program image plus everything needed to render it.
pub struct LinkedProgram {
    pub words: Vec<u16>,
    pub buffer: InstructionBuffer,
    pub symbols: SymbolTable,
}

impl LinkedProgram {
    /// Resolved address of a named source variable.
    pub fn address_of(&self, variable: &str) -> Option<u16> {
        self.symbols.address_of_variable(variable)
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Asm => output::render_asm(&self.buffer, &self.symbols, false),
            OutputFormat::Asmc => output::render_asm(&self.buffer, &self.symbols, true),
            OutputFormat::Aexe => output::render_aexe(&self.words),
            OutputFormat::Hex => {
                output::render_logisim(&self.words, Some(PROGRAM_SIZE as usize))
            }
        }
    }
}

/// Result of a compilation: the image, unless any error was recorded.
pub struct CompileOutput {
    pub program: Option<LinkedProgram>,
    pub diagnostics: Diagnostics,
}

/// Compile a root source file. Imports and embedded files resolve through
/// `loader`; all of them are read before code generation begins.
#[tracing::instrument(skip(source, loader))]
pub fn compile(source: &str, loader: &dyn FileLoader) -> CompileOutput {
    let mut diagnostics = Diagnostics::new();
    let mut lexer = Lexer::new(source);
    let mut program = Parser::new(&mut lexer, &mut diagnostics).parse_program();

    let mut visited = HashSet::new();
    resolve_imports(&mut program, loader, &mut visited, &mut diagnostics);

    let mut builder = Builder::new(loader, diagnostics);
    for statement in program.iter_mut() {
        statement.declare(&mut builder);
    }
    for statement in program.iter_mut() {
        statement.initialize(&mut builder);
    }
    for statement in program.iter_mut() {
        statement.optimize();
    }
    for statement in program.iter_mut() {
        statement.build(&mut builder);
    }

    let artifacts = builder.finish();
    let mut diagnostics = artifacts.diagnostics;
    if diagnostics.has_errors() {
        return CompileOutput {
            program: None,
            diagnostics,
        };
    }

    let mut symbols = artifacts.symbols;
    match linker::resolve(&artifacts.buffer, &mut symbols, 0) {
        Ok(words) => CompileOutput {
            program: Some(LinkedProgram {
                words,
                buffer: artifacts.buffer,
                symbols,
            }),
            diagnostics,
        },
        Err(error) => {
            diagnostics.error(SourceRange::default(), Message::Link(error.to_string()));
            CompileOutput {
                program: None,
                diagnostics,
            }
        }
    }
}

/// Compile a source string that imports nothing.
pub fn compile_source(source: &str) -> CompileOutput {
    compile(source, &NoLoader)
}

/// Eagerly inline every `import` at the top level. A file is included once;
/// repeats (and with them, cycles) are skipped.
fn resolve_imports(
    statements: &mut [Statement],
    loader: &dyn FileLoader,
    visited: &mut HashSet<String>,
    diagnostics: &mut Diagnostics,
) {
    for statement in statements {
        let StatementKind::Import { path, body } = &mut statement.kind else {
            continue;
        };
        if !visited.insert(path.clone()) {
            continue;
        }
        match loader.read_text(path) {
            Ok(text) => {
                let mut lexer = Lexer::new(&text);
                let mut imported = Parser::new(&mut lexer, diagnostics).parse_program();
                resolve_imports(&mut imported, loader, visited, diagnostics);
                *body = imported;
            }
            Err(error) => {
                diagnostics.error(
                    statement.range,
                    Message::FileError(path.clone(), error.to_string()),
                );
            }
        }
    }
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[clap(help = "Source file to compile")]
    input: PathBuf,
    #[clap(long)]
    #[clap(help = "Directory the outputs are written to")]
    out: Option<PathBuf>,
    #[clap(long, value_enum)]
    #[clap(help = "Output formats to emit (defaults to aexe)")]
    format: Vec<OutputFormat>,
}

#[tracing::instrument]
pub fn build(args: &BuildArgs) -> Result<()> {
    let source = std::fs::read_to_string(&args.input)
        .with_context(|| format!("unable to read {}", args.input.display()))?;
    let base = args.input.parent().unwrap_or(Path::new(".")).to_path_buf();
    let output = compile(&source, &FsLoader::new(base.clone()));

    if !output.diagnostics.is_empty() {
        eprint!("{}", output.diagnostics);
    }
    let program = output.program.context("compilation failed")?;

    let stem = args
        .input
        .file_stem()
        .context("input path has no file name")?
        .to_string_lossy()
        .to_string();
    let out_dir = args.out.clone().unwrap_or(base);
    let formats = if args.format.is_empty() {
        vec![OutputFormat::Aexe]
    } else {
        args.format.clone()
    };

    for format in formats {
        let path = out_dir.join(format!("{}.{}", stem, format.extension()));
        std::fs::write(&path, program.render(format))
            .with_context(|| format!("unable to write {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapLoader(HashMap<&'static str, &'static str>);

    impl FileLoader for MapLoader {
        fn read(&self, path: &str) -> io::Result<Vec<u8>> {
            self.0
                .get(path)
                .map(|text| text.as_bytes().to_vec())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
        }
    }

    #[test]
    fn test_errors_suppress_the_image() {
        let output = compile_source("var a = missing;");
        assert!(output.diagnostics.has_errors());
        assert!(output.program.is_none());
    }

    #[test]
    fn test_clean_compile_produces_words() {
        let output = compile_source("var a = 2; a += 1;");
        assert!(!output.diagnostics.has_errors(), "{}", output.diagnostics);
        let program = output.program.unwrap();
        assert!(!program.words.is_empty());
        assert!(program.address_of("a").is_some());
    }

    #[test]
    fn test_import_inlines_once() {
        let loader = MapLoader(HashMap::from([(
            "lib.yabal",
            "var shared = 3;\nimport \"lib.yabal\"",
        )]));
        let output = compile("import \"lib.yabal\"\nvar x = shared;", &loader);
        assert!(!output.diagnostics.has_errors(), "{}", output.diagnostics);
        assert!(output.program.unwrap().address_of("shared").is_some());
    }

    #[test]
    fn test_missing_import_reports() {
        let output = compile("import \"gone.yabal\"", &NoLoader);
        assert!(output.diagnostics.has_errors());
    }
}
