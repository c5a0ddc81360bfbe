//! End-to-end scenarios exercising the VM and assembler together: plain
//! arithmetic, shape-typed field access, in-VM failure propagation,
//! bounded-depth tail recursion, assembler type-check rejection, and
//! tuple-shape synthesis.

use shapevm::asm::{assemble, AsmToken};
use shapevm::code::{Label, LabelDisplay, Opcode, VmCode};
use shapevm::error::AsmError;
use shapevm::shape::{Kind, Shape, ShapeRegistry, Struct};
use shapevm::value::Val;
use shapevm::vm::Vm;
use shapevm_symtab::SymbolTable;

/// Re-tokenizes the handful of mnemonics this test suite's round-trip
/// scenario prints — a stand-in for the host-side lexer the spec assumes
/// delivers pre-tokenized input; `VmAsm` itself never parses text.
fn retokenize(symbols: &SymbolTable, text: &str) -> Vec<AsmToken> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < words.len() {
        match words[i] {
            "PUSH" => {
                out.push(AsmToken::Word(symbols.intern("PUSH")));
                out.push(AsmToken::Type(Kind::Uint));
                out.push(AsmToken::Uint(words[i + 2].parse().unwrap()));
                i += 3;
            }
            "GET_FRAMEHEAD_FIELDS" => {
                out.push(AsmToken::Word(symbols.intern(words[i])));
                out.push(AsmToken::Uint(words[i + 1].parse().unwrap()));
                out.push(AsmToken::Uint(words[i + 2].parse().unwrap()));
                i += 3;
            }
            w => {
                out.push(AsmToken::Word(symbols.intern(w)));
                i += 1;
            }
        }
    }
    out
}

/// Registers the `unit` (empty struct) and `IntBox` (single Int field)
/// shapes most of these scenarios use as their call boundary.
fn base_registry(symbols: &SymbolTable) -> ShapeRegistry {
    let mut shapes = ShapeRegistry::new();
    shapes.add(symbols.empty(), Shape::new()).unwrap();
    let mut int_box = Shape::new();
    int_box.add_field(symbols.intern("value"), Kind::Int);
    shapes.add(symbols.intern("IntBox"), int_box).unwrap();
    shapes
}

#[test]
fn arithmetic_adds_two_pushed_literals() {
    let symbols = SymbolTable::new();
    let mut shapes = base_registry(&symbols);
    let mut code = VmCode::new();

    let entry = Label::new(symbols.intern("main"), symbols.empty(), symbols.intern("IntBox"));
    code.define(
        entry,
        vec![
            Opcode::Push(Val::from_int(3)),
            Opcode::Push(Val::from_int(4)),
            Opcode::AddInt,
            Opcode::Exit,
        ],
    );

    let mut vm = Vm::new(symbols.clone(), &code, &mut shapes);
    let outcome = vm.run(entry, Struct::new(vec![])).unwrap();
    assert!(!outcome.failed);
    assert_eq!(outcome.output.as_slice()[0].as_int(), 7);
}

#[test]
fn field_access_sums_a_points_coordinates() {
    let symbols = SymbolTable::new();
    let mut shapes = base_registry(&symbols);

    let mut point = Shape::new();
    point.add_field(symbols.intern("x"), Kind::Int);
    point.add_field(symbols.intern("y"), Kind::Int);
    shapes.add(symbols.intern("Point"), point).unwrap();

    let mut code = VmCode::new();
    let entry = Label::new(symbols.intern("sumxy"), symbols.intern("Point"), symbols.intern("IntBox"));
    code.define(
        entry,
        vec![
            Opcode::GetFrameheadFields { ix_beg: 0, ix_end: 1 },
            Opcode::GetFrameheadFields { ix_beg: 1, ix_end: 2 },
            Opcode::AddInt,
            Opcode::Exit,
        ],
    );

    let mut vm = Vm::new(symbols.clone(), &code, &mut shapes);
    let input = Struct::new(vec![Val::from_int(18), Val::from_int(24)]);
    let outcome = vm.run(entry, input).unwrap();
    assert!(!outcome.failed);
    assert_eq!(outcome.output.as_slice()[0].as_int(), 42);
}

/// `halver`: fails on zero, otherwise halves its input. Exercises `FAIL`,
/// `IF_NOT` and the fail bit surviving into the run's outcome.
#[test]
fn halver_fails_on_zero_and_halves_otherwise() {
    let symbols = SymbolTable::new();
    let mut shapes = base_registry(&symbols);
    let mut code = VmCode::new();

    let entry = Label::new(symbols.intern("halver"), symbols.intern("IntBox"), symbols.intern("IntBox"));
    let body = vec![
        Opcode::GetFrameheadFields { ix_beg: 0, ix_end: 1 }, // 0: [n]
        Opcode::PushDup,                                     // 1: [n n]
        Opcode::Push(Val::from_int(0)),                      // 2: [n n 0]
        Opcode::EqInt,                                       // 3: [n eq]
        Opcode::IfNot(2),                                    // 4: pops eq; jump to 6 if n != 0
        Opcode::Fail,                                         // 5: n == 0
        Opcode::Push(Val::from_int(2)),                       // 6: [n 2]
        Opcode::DivInt,                                       // 7: [n/2]
        Opcode::Exit,                                         // 8
    ];
    code.define(entry, body);

    let mut vm = Vm::new(symbols.clone(), &code, &mut shapes);
    let failed = vm.run(entry, Struct::new(vec![Val::from_int(0)])).unwrap();
    assert!(failed.failed);

    let mut vm = Vm::new(symbols.clone(), &code, &mut shapes);
    let ok = vm.run(entry, Struct::new(vec![Val::from_int(10)])).unwrap();
    assert!(!ok.failed);
    assert_eq!(ok.output.as_slice()[0].as_int(), 5);
}

/// A self tail-calling countdown: every iteration replaces the current
/// frame instead of pushing a new one, so frame depth never grows no
/// matter how many times it recurses.
#[test]
fn tail_recursive_countdown_reaches_zero_without_growing_frames() {
    let symbols = SymbolTable::new();
    let mut shapes = base_registry(&symbols);
    let mut code = VmCode::new();

    let loop_name = symbols.intern("countdown");
    let int_box = symbols.intern("IntBox");
    let entry = Label::new(loop_name, int_box, int_box);
    let body = vec![
        Opcode::GetFrameheadFields { ix_beg: 0, ix_end: 1 }, // 0: [n]
        Opcode::PushDup,                                     // 1: [n n]
        Opcode::Push(Val::from_int(0)),                       // 2: [n n 0]
        Opcode::EqInt,                                        // 3: [n eq]
        Opcode::IfNot(2),                                     // 4: jump to 6 if n != 0
        Opcode::Exit,                                         // 5: n == 0, stack [n]
        Opcode::Push(Val::from_int(1)),                       // 6: [n 1]
        Opcode::SubInt,                                       // 7: [n-1]
        Opcode::Push(Val::from_sym(loop_name)),               // 8
        Opcode::Push(Val::from_sym(int_box)),                 // 9
        Opcode::Push(Val::from_sym(int_box)),                 // 10
        Opcode::TailCall,                                     // 11
    ];
    code.define(entry, body);

    let mut vm = Vm::new(symbols.clone(), &code, &mut shapes);
    let outcome = vm.run(entry, Struct::new(vec![Val::from_int(25)])).unwrap();
    assert!(!outcome.failed);
    assert_eq!(outcome.output.as_slice()[0].as_int(), 0);
}

/// `CALL_LIGHT` re-dispatches to a same-shape overload by name, but it is a
/// genuine frame push (reusing the caller's `stack_base`/`struct_size`) with
/// a real return continuation, not a frameless jump: the callee's `EXIT`
/// must resume execution right after the `CALL_LIGHT`, inside the caller.
#[test]
fn call_light_dispatches_to_a_same_shape_overload_and_returns() {
    let symbols = SymbolTable::new();
    let mut shapes = base_registry(&symbols);
    let mut code = VmCode::new();

    let int_box = symbols.intern("IntBox");
    let doubled = symbols.intern("doubled");
    let entry = Label::new(symbols.intern("main"), symbols.empty(), int_box);
    code.define(
        entry,
        vec![
            Opcode::Push(Val::from_int(9)),
            Opcode::Push(Val::from_sym(doubled)),
            Opcode::CallLight,
            Opcode::Push(Val::from_int(1)),
            Opcode::AddInt,
            Opcode::Exit,
        ],
    );

    // `doubled` shares `main`'s (fromShape, toShape) pair — that's what makes
    // CALL_LIGHT's reused stack_base/struct_size well-formed.
    let doubled_label = Label::new(doubled, symbols.empty(), int_box);
    code.define(
        doubled_label,
        vec![Opcode::Push(Val::from_int(2)), Opcode::MulInt, Opcode::Exit],
    );

    let mut vm = Vm::new(symbols.clone(), &code, &mut shapes);
    let outcome = vm.run(entry, Struct::new(vec![])).unwrap();
    assert!(!outcome.failed);
    // (9 * 2) + 1, where the "+1" only runs if CALL_LIGHT truly returned.
    assert_eq!(outcome.output.as_slice()[0].as_int(), 19);
}

/// `_push_funlabel`/`_pop_funlabel` open and close a real function body
/// through the assembler's directive layer (as opposed to building the
/// catalog by hand via `VmCode::define`): the body's opcodes land under the
/// label the directive registered, and `_pop_funlabel` enforces that the
/// type stack's current top matches the declared return shape.
#[test]
fn push_and_pop_funlabel_register_and_close_a_function_body() {
    let symbols = SymbolTable::new();
    let w = |s: &str| AsmToken::Word(symbols.intern(s));
    let push_sym = |s: &str| vec![w("PUSH"), AsmToken::Type(Kind::Symbol), w(s)];
    let push_kind_tag = |k: Kind| vec![w("PUSH"), AsmToken::Type(Kind::Uint), AsmToken::Uint(k.to_u64())];

    let mut tokens = vec![w("_cmode_on")];
    tokens.push(w("NEW_SHAPE"));
    tokens.extend(push_sym("value"));
    tokens.extend(push_kind_tag(Kind::Int));
    tokens.push(w("DEF_FIELD"));
    tokens.extend(push_sym("IntBox"));
    tokens.push(w("DEF_SHAPE"));
    tokens.push(w("_cmode_off"));

    tokens.push(w("_push_funlabel"));
    tokens.push(w("double"));
    tokens.push(w("IntBox"));
    tokens.push(w("IntBox"));

    tokens.push(w("GET_FRAMEHEAD_FIELDS"));
    tokens.push(AsmToken::Uint(0));
    tokens.push(AsmToken::Uint(1));
    tokens.push(w("PUSH"));
    tokens.push(AsmToken::Type(Kind::Int));
    tokens.push(AsmToken::Int(2));
    tokens.push(w("MUL_INT"));
    tokens.push(w("EXIT"));

    tokens.push(w("_push_type"));
    tokens.push(w("IntBox"));
    tokens.push(w("_pop_funlabel"));

    let assembled = assemble(symbols.clone(), tokens).unwrap();
    let double = Label::new(
        symbols.intern("double"),
        symbols.intern("IntBox"),
        symbols.intern("IntBox"),
    );
    assert_eq!(
        assembled.code.body(double).unwrap(),
        &[
            Opcode::GetFrameheadFields { ix_beg: 0, ix_end: 1 },
            Opcode::Push(Val::from_int(2)),
            Opcode::MulInt,
            Opcode::Exit,
        ]
    );

    let mut shapes = assembled.shapes;
    let mut vm = Vm::new(symbols, &assembled.code, &mut shapes);
    let outcome = vm.run(double, Struct::new(vec![Val::from_int(21)])).unwrap();
    assert!(!outcome.failed);
    assert_eq!(outcome.output.as_slice()[0].as_int(), 42);
}

/// Round-trip: printing an assembled function body via `Opcode`'s `Display`
/// impl and its label via `LabelDisplay`, then re-tokenizing and
/// reassembling that text, reproduces a catalog that runs identically.
#[test]
fn printing_and_reassembling_a_function_body_reproduces_its_behavior() {
    let symbols = SymbolTable::new();
    let w = |s: &str| AsmToken::Word(symbols.intern(s));
    let push_sym = |s: &str| vec![w("PUSH"), AsmToken::Type(Kind::Symbol), w(s)];
    let push_kind_tag = |k: Kind| vec![w("PUSH"), AsmToken::Type(Kind::Uint), AsmToken::Uint(k.to_u64())];

    let double = Label::new(
        symbols.intern("double"),
        symbols.intern("IntBox"),
        symbols.intern("IntBox"),
    );
    let body = vec![
        Opcode::GetFrameheadFields { ix_beg: 0, ix_end: 1 },
        Opcode::Push(Val::from_int(2)),
        Opcode::MulInt,
        Opcode::Exit,
    ];

    let printed_label = format!(
        "{}",
        LabelDisplay {
            label: double,
            symbols: &symbols,
        }
    );
    assert_eq!(printed_label, "double IntBox->IntBox");
    let printed_body: Vec<String> = body.iter().map(|op| op.to_string()).collect();
    assert_eq!(
        printed_body,
        vec!["GET_FRAMEHEAD_FIELDS 0 1", "PUSH UInt 2", "MUL_INT", "EXIT"]
    );

    // Shape registration isn't itself part of the printed program (cmode's
    // mirrored NEW_SHAPE/DEF_FIELD/DEF_SHAPE sequence already covers that
    // round trip via ordinary opcode printing); set it up directly here.
    let mut tokens = vec![w("_cmode_on")];
    tokens.push(w("NEW_SHAPE"));
    tokens.extend(push_sym("value"));
    tokens.extend(push_kind_tag(Kind::Int));
    tokens.push(w("DEF_FIELD"));
    tokens.extend(push_sym("IntBox"));
    tokens.push(w("DEF_SHAPE"));
    tokens.push(w("_cmode_off"));

    tokens.push(w("_push_funlabel"));
    tokens.push(w("double"));
    tokens.push(w("IntBox"));
    tokens.push(w("IntBox"));
    tokens.extend(retokenize(&symbols, &printed_body.join(" ")));
    tokens.push(w("_push_type"));
    tokens.push(w("IntBox"));
    tokens.push(w("_pop_funlabel"));

    let assembled = assemble(symbols.clone(), tokens).unwrap();
    assert_eq!(assembled.code.body(double).unwrap(), body.as_slice());

    let mut shapes = assembled.shapes;
    let mut vm = Vm::new(symbols, &assembled.code, &mut shapes);
    let outcome = vm.run(double, Struct::new(vec![Val::from_int(9)])).unwrap();
    assert!(!outcome.failed);
    assert_eq!(outcome.output.as_slice()[0].as_int(), 18);
}

/// `_pop_funlabel` rejects closing a function whose body leaves the type
/// stack pointing at the wrong shape (or nothing, when `Void` wasn't
/// declared) — `MismatchedPopFunlabel` is reachable, not dead code.
#[test]
fn pop_funlabel_rejects_a_return_shape_mismatch() {
    let symbols = SymbolTable::new();
    let w = |s: &str| AsmToken::Word(symbols.intern(s));
    let push_sym = |s: &str| vec![w("PUSH"), AsmToken::Type(Kind::Symbol), w(s)];
    let push_kind_tag = |k: Kind| vec![w("PUSH"), AsmToken::Type(Kind::Uint), AsmToken::Uint(k.to_u64())];

    let mut tokens = vec![w("_cmode_on")];
    tokens.push(w("NEW_SHAPE"));
    tokens.extend(push_sym("value"));
    tokens.extend(push_kind_tag(Kind::Int));
    tokens.push(w("DEF_FIELD"));
    tokens.extend(push_sym("IntBox"));
    tokens.push(w("DEF_SHAPE"));

    tokens.push(w("NEW_SHAPE"));
    tokens.extend(push_sym("v"));
    tokens.extend(push_kind_tag(Kind::Int));
    tokens.push(w("DEF_FIELD"));
    tokens.extend(push_sym("Other"));
    tokens.push(w("DEF_SHAPE"));
    tokens.push(w("_cmode_off"));

    tokens.push(w("_push_funlabel"));
    tokens.push(w("bogus"));
    tokens.push(w("IntBox"));
    tokens.push(w("IntBox"));
    tokens.push(w("EXIT"));

    // Declares a return of `Other`, not `IntBox` — must be rejected.
    tokens.push(w("_push_type"));
    tokens.push(w("Other"));
    tokens.push(w("_pop_funlabel"));

    let err = assemble(symbols, tokens).unwrap_err();
    assert!(matches!(err, AsmError::MismatchedPopFunlabel));
}

/// Assembling a field assignment whose value shape doesn't match the
/// target field's declared nested shape must be rejected before any code
/// runs, not discovered later as a VM fault.
///
/// Shapes are registered here the way a real program would at assemble
/// time: `_cmode_on` mirrors `NEW_SHAPE`/`DEF_FIELD`/`DEF_STRUCT_FIELD`/
/// `DEF_SHAPE` into the assembler's own registry as they're emitted.
#[test]
fn fieldtype_check_rejects_a_mismatched_assignment() {
    let symbols = SymbolTable::new();
    let w = |s: &str| AsmToken::Word(symbols.intern(s));
    let push_sym = |s: &str| vec![w("PUSH"), AsmToken::Type(Kind::Symbol), w(s)];
    let push_kind_tag = |k: Kind| vec![w("PUSH"), AsmToken::Type(Kind::Uint), AsmToken::Uint(k.to_u64())];

    let mut tokens = vec![w("_cmode_on")];

    // Point { x: Int }
    tokens.push(w("NEW_SHAPE"));
    tokens.extend(push_sym("x"));
    tokens.extend(push_kind_tag(Kind::Int));
    tokens.push(w("DEF_FIELD"));
    tokens.extend(push_sym("Point"));
    tokens.push(w("DEF_SHAPE"));

    // Other { v: Int } — a distinct shape, used as the wrong value type.
    tokens.push(w("NEW_SHAPE"));
    tokens.extend(push_sym("v"));
    tokens.extend(push_kind_tag(Kind::Int));
    tokens.push(w("DEF_FIELD"));
    tokens.extend(push_sym("Other"));
    tokens.push(w("DEF_SHAPE"));

    // Line { a: Point }
    tokens.push(w("NEW_SHAPE"));
    tokens.extend(push_sym("a"));
    tokens.extend(push_sym("Point"));
    tokens.push(w("DEF_STRUCT_FIELD"));
    tokens.extend(push_sym("Line"));
    tokens.push(w("DEF_SHAPE"));

    tokens.push(w("_cmode_off"));

    // Target `Line.a` (wants a Point), attempted assignment is an `Other`.
    tokens.push(w("_push_type"));
    tokens.push(w("Line"));
    tokens.push(w("_push_type"));
    tokens.push(w("Other"));
    tokens.push(w("_fieldtype_check"));
    tokens.push(w("a"));

    let err = assemble(symbols, tokens).unwrap_err();
    match err {
        AsmError::TypeCheckFailed { .. } => {}
        other => panic!("expected TypeCheckFailed, got {other:?}"),
    }
}

/// `_mark_tuple` / `_make_tupletype` synthesize `"[ Int Int ]"`; the
/// assembler rejects `_push_type` for a shape that was never registered.
#[test]
fn tuple_shape_name_matches_the_synthesized_tuple_and_push_type_rejects_unknown_shapes() {
    use shapevm::shape::tuple_shape_name;

    assert_eq!(tuple_shape_name(&["Int", "Int"]), "[ Int Int ]");

    let symbols = SymbolTable::new();
    let tokens = vec![
        AsmToken::Word(symbols.intern("_push_type")),
        AsmToken::Word(symbols.intern("NeverRegistered")),
    ];
    let err = assemble(symbols, tokens).unwrap_err();
    assert!(matches!(err, AsmError::UnknownShape(_)));
}
