//! End-to-end scenarios: compile a source program, execute the image on the
//! test machine and look at memory afterwards.

mod common;

use common::{run, variable};
use yabal::charset::CHARSET;

#[test]
fn test_addition_of_two_variables() {
    let (machine, program) = run("var a = 2; var b = 2; a = a + b;");
    assert_eq!(variable(&machine, &program, "a"), 4);
}

#[test]
fn test_compound_subtraction() {
    let (machine, program) = run("var a = 2; a -= 2;");
    assert_eq!(variable(&machine, &program, "a"), 0);
}

#[test]
fn test_nested_calls_update_a_global() {
    let source = "
var a = 0;
void f(int x) {
    a += x;
    g();
}
void g() {
    var v = 1;
    a += v;
}
f(2);
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "a"), 3);
}

#[test]
fn test_inline_assembly_reads_source_variables() {
    let source = "
var r = 0;
void inc(int amount) {
    asm { AIN @r; BIN @amount; ADD; STA @r }
}
inc(1);
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "r"), 1);
}

#[test]
fn test_pointer_returned_from_a_function() {
    let source = "
int[] mem(int a) {
    return asm { AIN @a }
}
var i = 1;
var v = 2;
var m = mem(4095);
m[i] = v;
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "m"), 4095);
    assert_eq!(machine.read(0, 4096), 2);
}

#[test]
fn test_while_loop_with_wrapping_decrement() {
    let (machine, program) = run("var v = 10; while (v > 0) v += -1;");
    assert_eq!(variable(&machine, &program, "v"), 0);
}

#[test]
fn test_for_loop_with_step_and_body_increment() {
    let (machine, program) = run("var v = 0; for (; v < 10; v++) { v += 1 }");
    assert_eq!(variable(&machine, &program, "v"), 10);
}

#[test]
fn test_constant_folding_matches_runtime_arithmetic() {
    let source = "
var folded = (3 + 4) * 2 - 1;
var mixed = 100 / 7 + 100 % 7;
var x = 3;
x = (x + 4) * 2 - 1;
var check = folded + mixed + x;
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "folded"), 13);
    assert_eq!(variable(&machine, &program, "mixed"), 16);
    assert_eq!(variable(&machine, &program, "x"), 13);
}

#[test]
fn test_assignment_stops_initializer_inlining() {
    // `a` starts out constant; the assignment must stop reads of `a` from
    // folding to the initializer value.
    let source = "
var a = 5;
a = 1;
var b = a + 1;
var check = b + 0;
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "b"), 2);
}

#[test]
fn test_signed_comparison_with_negative_values() {
    let source = "
var below = 0;
var v = 0;
v -= 3;
if (v < 2) { below = 1 }
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "below"), 1);
}

#[test]
fn test_struct_bitfields_pack_and_unpack() {
    let source = "
struct Flags {
    int live : 1;
    int kind : 3;
    int rest;
}
Flags f = { live: 1, kind: 5, rest: 9 }
var k = f.kind;
f.kind = 2;
var j = f.kind;
var check = k + j;
";
    let (machine, program) = run(source);
    let base = program.address_of("f").unwrap();
    assert_eq!(machine.read(0, base), 1 | (2 << 1));
    assert_eq!(machine.read(0, base + 1), 9);
    assert_eq!(variable(&machine, &program, "k"), 5);
    assert_eq!(variable(&machine, &program, "j"), 2);
}

#[test]
fn test_sizeof_struct_counts_bitfield_hosts_once() {
    let source = "
struct Flags {
    int live : 1;
    int kind : 3;
    int rest;
}
Flags f = { live: 1, kind: 5, rest: 9 }
var s = sizeof(f);
var check = s + 0;
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "s"), 2);
}

#[test]
fn test_string_literals_use_the_character_table() {
    let (machine, program) = run("var s = \"hi\"; var c = s[0]; var check = c + 0;");
    let pool = variable(&machine, &program, "s");
    assert_eq!(machine.read(0, pool), CHARSET.encode('h').unwrap());
    assert_eq!(machine.read(0, pool + 1), CHARSET.encode('i').unwrap());
    assert_eq!(machine.read(0, pool + 2), 0);
    assert_eq!(
        variable(&machine, &program, "c"),
        CHARSET.encode('h').unwrap()
    );
}

#[test]
fn test_arguments_are_written_left_to_right() {
    let source = "
var result = 0;
void pair(int high, int low) {
    result = high * 256 + low;
}
pair(2, 3);
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "result"), 2 * 256 + 3);
}

#[test]
fn test_return_value_flows_back_to_the_caller() {
    let source = "
int double(int x) {
    return x + x
}
var y = double(21);
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "y"), 42);
}

#[test]
fn test_locals_survive_nested_calls() {
    let source = "
var out = 0;
int deep(int n) {
    var mine = n + 1;
    if (n > 0) { deep(0) }
    return mine
}
out = deep(5);
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "out"), 6);
}

#[test]
fn test_fixed_array_indexing() {
    let source = "
int[3] cells
cells[0] = 7;
cells[2] = 9;
var sum = cells[0] + cells[2];
var check = sum + 0;
";
    let (machine, program) = run(source);
    let base = program.address_of("cells").unwrap();
    assert_eq!(machine.read(0, base), 7);
    assert_eq!(machine.read(0, base + 2), 9);
    assert_eq!(variable(&machine, &program, "sum"), 16);
}

#[test]
fn test_break_and_continue() {
    let source = "
var evens = 0;
var i = 0;
while (true) {
    i += 1;
    if (i > 10) { break }
    if (i % 2 == 1) { continue }
    evens += 1;
}
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "evens"), 5);
}

#[test]
fn test_banked_pointer_store() {
    let source = "
var screen = create_pointer(0xD26F, 1);
screen[2] = 77;
";
    let (machine, _program) = run(source);
    assert_eq!(machine.read(1, 0xD26F + 2), 77);
    assert_eq!(machine.read(0, 0xD26F + 2), 0);
}

#[test]
fn test_references_act_as_pointers() {
    let source = "
var x = 5;
var p = ref x;
p[0] = 9;
var y = p[0];
var check = y + 0;
";
    let (machine, program) = run(source);
    assert_eq!(variable(&machine, &program, "x"), 9);
    assert_eq!(variable(&machine, &program, "y"), 9);
}
