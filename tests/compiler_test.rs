//! Image-level tests: what the compiler emits, reports and renders, without
//! executing anything.

mod common;

use common::compile;
use pretty_assertions::assert_eq;
use yabal::assembly::output::assemble_listing;
use yabal::assembly::output::OutputFormat;
use yabal::compiler::compile_source;
use yabal::compiler::diagnostics::{Message, Severity};

#[test]
fn test_asm_listing_roundtrips_to_the_image() {
    let program = compile(
        "
var total = 0;
int add(int x, int y) {
    return x + y
}
total = add(19, 23);
var banner = \"done\";
total += banner[0];
",
    );
    let listing = program.render(OutputFormat::Asm);
    assert_eq!(assemble_listing(&listing).unwrap(), program.words);

    // The commented rendering assembles to the same words.
    let commented = program.render(OutputFormat::Asmc);
    assert_eq!(assemble_listing(&commented).unwrap(), program.words);
}

#[test]
fn test_unused_function_is_dropped_with_a_note() {
    let output = compile_source("var keep = 1; void never() { keep = 2; } keep += 0;");
    assert!(!output.diagnostics.has_errors());
    let dropped = output.diagnostics.iter().any(|(_, diagnostic)| {
        diagnostic.severity == Severity::Debug
            && matches!(&diagnostic.message, Message::UnusedFunction(name) if name == "never")
    });
    assert!(dropped, "expected a debug note, got:\n{}", output.diagnostics);

    // No call was ever emitted, so no trampoline code either; the image
    // stays tiny.
    let program = output.program.unwrap();
    assert!(program.words.len() < 32);
}

#[test]
fn test_unused_variable_is_elided() {
    let output = compile_source("var used = 1; var dead = 2; used += 1;");
    let program = output.program.unwrap();
    assert!(program.address_of("used").is_some());
    assert!(program.address_of("dead").is_none());
    let noted = output.diagnostics.iter().any(|(_, diagnostic)| {
        matches!(&diagnostic.message, Message::UnusedVariable(name) if name == "dead")
    });
    assert!(noted);
}

#[test]
fn test_string_pool_deduplicates() {
    let program = compile("var a = \"hello\"; var b = \"hello\"; var c = a[0] + b[0];");
    let hello_words = program
        .render(OutputFormat::Asmc)
        .lines()
        .filter(|line| line.contains("'h'"))
        .count();
    assert_eq!(hello_words, 1);
}

#[test]
fn test_bad_string_character_is_an_error() {
    let output = compile_source("var s = \"na\u{ef}ve\";");
    assert!(output.diagnostics.has_errors());
    assert!(output.program.is_none());
}

#[test]
fn test_unknown_identifier_reports_its_range() {
    let output = compile_source("var a = 1;\nvar b = missing;");
    let found = output
        .diagnostics
        .iter()
        .any(|(range, diagnostic)| {
            range.start.line == 2
                && matches!(&diagnostic.message, Message::UnknownVariable(name) if name == "missing")
        });
    assert!(found, "got:\n{}", output.diagnostics);
}

#[test]
fn test_duplicate_declaration_is_an_error() {
    let output = compile_source("var a = 1; var a = 2;");
    assert!(output.diagnostics.has_errors());
}

#[test]
fn test_break_outside_a_loop_is_an_error() {
    let output = compile_source("break;");
    assert!(output.diagnostics.has_errors());
}

#[test]
fn test_return_outside_a_function_is_an_error() {
    let output = compile_source("return 1;");
    assert!(output.diagnostics.has_errors());
}

#[test]
fn test_non_constant_create_pointer_is_rejected() {
    let output = compile_source("var a = 1; a += 1; var p = create_pointer(a);");
    let found = output
        .diagnostics
        .iter()
        .any(|(_, diagnostic)| diagnostic.message == Message::NonConstantPointer);
    assert!(found, "got:\n{}", output.diagnostics);
}

#[test]
fn test_type_mismatch_is_reported_but_compilation_continues() {
    let output = compile_source("struct P { int x }\nP p = { x: 1 }\nvar n = 1 + p;\nvar later = missing;");
    // Both the type error and the later resolution error surface in one run.
    assert!(output.diagnostics.has_errors());
    let messages: Vec<_> = output
        .diagnostics
        .iter()
        .map(|(_, diagnostic)| diagnostic.message.clone())
        .collect();
    assert!(messages
        .iter()
        .any(|message| matches!(message, Message::TypeMismatch { .. })));
    assert!(messages
        .iter()
        .any(|message| matches!(message, Message::UnknownVariable(_))));
}

#[test]
fn test_every_jump_target_resolves() {
    // Forward calls, loops and conditionals all leave no unresolved symbol.
    let program = compile(
        "
var n = 10;
var steps = 0;
while (n > 1) {
    if (n % 2 == 0) { n /= 2 } else { n = 3 * n + 1 }
    steps += 1;
}
",
    );
    assert!(!program.words.is_empty());
}

#[test]
fn test_aexe_and_hex_renderings() {
    let program = compile("var a = 1; a += 1;");
    let aexe = program.render(OutputFormat::Aexe);
    let parsed: Vec<u16> = aexe
        .split_whitespace()
        .map(|word| u16::from_str_radix(word, 16).unwrap())
        .collect();
    assert_eq!(parsed, program.words);

    let hex = program.render(OutputFormat::Hex);
    assert!(hex.starts_with("v3.0 hex words plain\n"));
    // Padded up to the default program size with a zero run.
    assert!(hex.contains("*0000"));
}

#[test]
fn test_program_starts_with_a_jump_over_the_header() {
    use yabal::assembly::instruction::{decode, DecodedOperand, Mnemonic};

    let program = compile("var a = 1; a += 1;");
    let (mnemonic, operand) = decode(program.words[0]).unwrap();
    assert_eq!(mnemonic, Mnemonic::JMP);
    assert_eq!(operand, DecodedOperand::Long);
    let start = program.words[1] as usize;
    assert!(start > 1 && start < program.words.len());
}
