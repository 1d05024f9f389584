use super::*;
use crate::error::SiteColor;

/// Helper function that expects parsing to succeed and runs a check function on the program.
/// If the check fails, outputs the parsed AST for debugging.
fn expect_parse<F>(input: &str, check_fn: F)
where
    F: FnOnce(&Program) -> std::result::Result<(), String>,
{
    let _ = env_logger::builder().is_test(true).try_init();
    let program = match Parser::new(input).parse() {
        Ok(program) => program,
        Err(e) => {
            println!("Parse failed with error: {:?}", e);
            panic!("Failed to parse input: {}", e);
        }
    };

    if let Err(msg) = check_fn(&program) {
        println!("Check failed: {}", msg);
        println!("Parsed AST: {:#?}", program.decls);
        panic!("Test assertion failed: {}", msg);
    }
}

/// Helper function that expects parsing to fail with a specific error.
/// If parsing succeeds when it shouldn't, outputs the parsed AST.
fn expect_parse_error<F>(input: &str, error_check: F)
where
    F: FnOnce(&CompilerError) -> std::result::Result<(), String>,
{
    let _ = env_logger::builder().is_test(true).try_init();
    match Parser::new(input).parse() {
        Ok(program) => {
            println!("Expected parse error, but parsing succeeded");
            println!("Parsed AST: {:#?}", program.decls);
            panic!("Expected parse to fail, but it succeeded");
        }
        Err(ref error) => {
            if let Err(msg) = error_check(error) {
                println!("Error check failed: {}", msg);
                println!("Actual error: {:?}", error);
                panic!("Error assertion failed: {}", msg);
            }
        }
    }
}

/// Checks the error kind and that its message contains `needle`.
fn type_error_containing(error: &CompilerError, needle: &str) -> std::result::Result<(), String> {
    match error {
        CompilerError::TypeError(msg, _) if msg.contains(needle) => Ok(()),
        other => Err(format!("Expected type error containing {:?}, got {:?}", needle, other)),
    }
}

fn span_of(input: &str, needle: &str, nth: usize) -> Span {
    let start = input.match_indices(needle).nth(nth).map(|(i, _)| i).expect("needle not in input");
    Span::new(start, start + needle.len())
}

/// Type of the value returned by the last statement of `function`.
fn returned_type(program: &Program, function: &str) -> std::result::Result<TypeId, String> {
    let f = program.find_function(function).ok_or_else(|| format!("No function '{}'", function))?;
    let body = program.functions[f].body.ok_or("Function has no body")?;
    let StmtKind::Block(stmts) = &program.stmts[body].kind else {
        return Err("Body is not a block".to_string());
    };
    match stmts.last().map(|s| &program.stmts[*s].kind) {
        Some(StmtKind::Return(Some(expr))) => Ok(program.exprs[*expr].ty),
        other => Err(format!("Expected a return statement, got {:?}", other)),
    }
}

const SCENARIO_B: &str =
    "[[fragment]] float4 main(float* t [[mtl_buffer(0)]] [[vk_uniform(0)]]) { return float4(*t,*t,*t,*t); }";

#[test]
fn test_return_expression_type() {
    expect_parse("int main() { return 1 + 2; }", |program| {
        let ty = returned_type(program, "main")?;
        if ty != program.builtins.s32 {
            return Err(format!("Expected s32, got {}", program.type_name(ty)));
        }
        match program.decls[..] {
            [Decl::Function(_)] => Ok(()),
            _ => Err(format!("Expected one function declaration, got {:?}", program.decls)),
        }
    });
}

#[test]
fn test_arithmetic_keeps_operand_type() {
    for (ty, a, b) in [("s32", "1", "2"), ("f32", "1.0f", "2.0f"), ("f64", "1.0", "2.0"), ("u8", "x", "x")] {
        for op in ["+", "-", "*", "/"] {
            let input = format!("{ty} f({ty} x) {{ return {a} {op} {b}; }}");
            expect_parse(&input, |program| {
                let got = returned_type(program, "f")?;
                if program.type_name(got) != ty {
                    return Err(format!("{}: expected {}, got {}", input, ty, program.type_name(got)));
                }
                Ok(())
            });
        }
    }
}

#[test]
fn test_comparisons_are_bool() {
    for op in ["==", "!=", "<", "<=", ">", ">="] {
        for (ty, a, b) in [("int", "1", "2"), ("float", "1.0f", "2.0f")] {
            let input = format!("bool f({ty} x) {{ return {a} {op} {b}; }}");
            expect_parse(&input, |program| {
                let got = returned_type(program, "f")?;
                if got != program.builtins.bool {
                    return Err(format!("{}: expected bool, got {}", input, program.type_name(got)));
                }
                Ok(())
            });
        }
    }
}

#[test]
fn test_precedence() {
    expect_parse("int f(int a, int b) { return a + b * 2 - 1; }", |program| {
        let f = program.find_function("f").ok_or("no f")?;
        let body = program.functions[f].body.ok_or("no body")?;
        let StmtKind::Block(stmts) = &program.stmts[body].kind else {
            return Err("no block".to_string());
        };
        let StmtKind::Return(Some(ret)) = program.stmts[stmts[0]].kind else {
            return Err("no return".to_string());
        };
        let printed = crate::diags::AstFormatter::format_expression(program, ret);
        if printed != "((a + (b * 2)) - 1)" {
            return Err(format!("Unexpected grouping {}", printed));
        }
        Ok(())
    });
}

#[test]
fn test_assignment_is_right_associative() {
    expect_parse("int f(int a, int b) { a = b = 3; return a; }", |program| {
        let f = program.find_function("f").ok_or("no f")?;
        let body = program.functions[f].body.ok_or("no body")?;
        let StmtKind::Block(stmts) = &program.stmts[body].kind else {
            return Err("no block".to_string());
        };
        let StmtKind::Expr(expr) = program.stmts[stmts[0]].kind else {
            return Err("no expression".to_string());
        };
        let printed = crate::diags::AstFormatter::format_expression(program, expr);
        if printed != "(a = (b = 3))" {
            return Err(format!("Unexpected grouping {}", printed));
        }
        Ok(())
    });
}

#[test]
fn test_fragment_bindings() {
    expect_parse(SCENARIO_B, |program| {
        let main = program.find_function("main").ok_or("no main")?;
        let f = &program.functions[main];
        if f.kind != FunctionKind::Fragment {
            return Err(format!("Expected fragment, got {:?}", f.kind));
        }
        let mtl: Vec<u32> = f.mtl_buffers.keys().copied().collect();
        let vk: Vec<(u32, u32)> = f.vk_bindings.keys().copied().collect();
        if mtl != vec![0] || vk != vec![(0, 0)] {
            return Err(format!("Unexpected bindings mtl={:?} vk={:?}", mtl, vk));
        }
        if f.mtl_buffers[&0].arg != f.args[0] || f.vk_bindings[&(0, 0)].arg != f.args[0] {
            return Err("Bindings do not point at 't'".to_string());
        }
        let t_ty = program.vars[f.args[0]].ty;
        if program.pointee(t_ty) != Some(program.builtins.f32) {
            return Err(format!("Expected pointer to f32, got {}", program.type_name(t_ty)));
        }
        Ok(())
    });
}

#[test]
fn test_duplicate_metal_buffer_names_both_args() {
    let input = "[[fragment]] float4 main(float* t [[mtl_buffer(0)]] [[vk_uniform(0)]], \
                 float* u [[mtl_buffer(0)]] [[vk_uniform(1)]]) { return float4(*t,*t,*t,*u); }";
    expect_parse_error(input, |error| {
        type_error_containing(error, "Metal buffer index (0) is already used.")?;
        let sites = error.sites();
        let first = span_of(input, "[[mtl_buffer(0)]]", 0);
        let second = span_of(input, "[[mtl_buffer(0)]]", 1);
        if sites.len() != 2 {
            return Err(format!("Expected two sites, got {:?}", sites));
        }
        if sites[0].span != first || sites[0].color != SiteColor::Green {
            return Err(format!("First site should be the earlier attribute, got {:?}", sites[0]));
        }
        if sites[1].span != second || sites[1].color != SiteColor::Red {
            return Err(format!("Second site should be the later attribute, got {:?}", sites[1]));
        }
        if error.span() != Some(second) {
            return Err("Primary site should be the later attribute".to_string());
        }
        Ok(())
    });
}

#[test]
fn test_duplicate_vulkan_binding() {
    let input = "[[fragment]] float4 main(float* t [[mtl_buffer(0)]] [[vk_uniform(0, 2)]], \
                 float* u [[mtl_buffer(1)]] [[vk_uniform(0, 2)]]) { return float4(*t,*t,*t,*u); }";
    expect_parse_error(input, |error| {
        type_error_containing(error, "Vulkan set/binding (0, 2) is already used.")?;
        if error.sites().len() != 2 {
            return Err(format!("Expected two sites, got {:?}", error.sites()));
        }
        Ok(())
    });
}

#[test]
fn test_metal_constant_binding() {
    let input = "[[fragment]] float4 main(float* t [[mtl_constant(3)]] [[vk_uniform(0)]]) { return float4(*t,*t,*t,*t); }";
    expect_parse(input, |program| {
        let main = program.find_function("main").ok_or("no main")?;
        let f = &program.functions[main];
        let mtl: Vec<u32> = f.mtl_buffers.keys().copied().collect();
        if mtl != vec![3] {
            return Err(format!("Expected metal index 3, got {:?}", mtl));
        }
        if f.mtl_buffers[&3].span != span_of(input, "[[mtl_constant(3)]]", 0) {
            return Err("Binding should point at the constant attribute".to_string());
        }
        Ok(())
    });
}

#[test]
fn test_metal_buffer_and_constant_on_one_arg() {
    let input = "[[fragment]] float4 main(float* t [[mtl_buffer(0)]] [[mtl_constant(1)]] [[vk_uniform(0)]]) \
                 { return float4(*t,*t,*t,*t); }";
    expect_parse_error(input, |error| {
        type_error_containing(error, "Metal constant attribute is already specified.")?;
        let sites = error.sites();
        if sites.len() != 2
            || sites[0].span != span_of(input, "[[mtl_buffer(0)]]", 0)
            || sites[1].span != span_of(input, "[[mtl_constant(1)]]", 0)
        {
            return Err(format!("Expected both attributes as sites, got {:?}", sites));
        }
        Ok(())
    });
}

#[test]
fn test_metal_constant_collides_with_buffer_index() {
    let input = "[[fragment]] float4 main(float* t [[mtl_buffer(2)]] [[vk_uniform(0)]], \
                 float* u [[mtl_constant(2)]] [[vk_uniform(1)]]) { return float4(*t,*t,*t,*u); }";
    expect_parse_error(input, |error| {
        type_error_containing(error, "Metal buffer index (2) is already used.")?;
        let sites = error.sites();
        if sites.len() != 2 || sites[1].span != span_of(input, "[[mtl_constant(2)]]", 0) {
            return Err(format!("Expected the constant as the primary site, got {:?}", sites));
        }
        Ok(())
    });
}

#[test]
fn test_assign_to_literal() {
    let input = "void f() { 1 = 2; }";
    expect_parse_error(input, |error| {
        type_error_containing(error, "must be an lvalue")?;
        let literal = Span::new(11, 12);
        let primary = error.sites().iter().find(|s| s.color == SiteColor::Red).map(|s| s.span);
        if primary != Some(literal) || error.span() != Some(literal) {
            return Err(format!("Expected the literal span {:?}, got {:?}", literal, error.sites()));
        }
        Ok(())
    });
}

#[test]
fn test_lvalue_errors() {
    expect_parse_error("void f(int a) { (a + 1)++; }", |error| type_error_containing(error, "can only be applied to lvalues"));
    expect_parse_error("void f(int a) { ++3; }", |error| type_error_containing(error, "can only be applied to lvalues"));
    expect_parse_error("void f(float4 v) { v.xx = v.zw; }", |error| type_error_containing(error, "must be an lvalue"));
    expect_parse("void f(float4 v) { v.xy = v.zw; v.x = 1.0f; }", |_| Ok(()));
}

#[test]
fn test_type_mismatches() {
    expect_parse_error("int f(int a, float b) { return a + b; }", |error| {
        type_error_containing(error, "Binary expression type mismatch, expected 's32' but got 'f32'")?;
        if error.sites().len() != 3 {
            return Err(format!("Expected three sites, got {:?}", error.sites()));
        }
        Ok(())
    });
    expect_parse_error("int f() { int a = 1.0f; return a; }", |error| type_error_containing(error, "Initializer type mismatch"));
    expect_parse_error("int f() { return 1.0f; }", |error| match error {
        CompilerError::TypeError(..) => Ok(()),
        other => Err(format!("Expected a type error, got {:?}", other)),
    });
    expect_parse_error("int f(bool c) { return c ? 1 : 2.0f; }", |error| type_error_containing(error, "Ternary expression type mismatch"));
    expect_parse_error("void f(int a) { if (a) { } }", |error| type_error_containing(error, "Condition must be bool"));
    expect_parse_error("float f(float a) { return a & a; }", |error| type_error_containing(error, "integer types"));
}

#[test]
fn test_vector_arithmetic() {
    expect_parse("float4 f(float4 a, float4 b) { return a * 2.0f + b; }", |program| {
        let ty = returned_type(program, "f")?;
        if ty != program.builtins.float4 {
            return Err(format!("Expected float4, got {}", program.type_name(ty)));
        }
        Ok(())
    });
    expect_parse_error("float4 f(float4 a) { return a % a; }", |error| type_error_containing(error, "cannot be applied to 'float4'"));
    expect_parse_error("float4 f(float4 a) { return a * 2; }", |error| type_error_containing(error, "requires rhs to be float"));
}

#[test]
fn test_swizzles() {
    expect_parse("float3 f(float4 v) { return v.bgr; }", |program| {
        let ty = returned_type(program, "f")?;
        if ty != program.builtins.float3 {
            return Err(format!("Expected float3, got {}", program.type_name(ty)));
        }
        Ok(())
    });
    expect_parse_error("float2 f(float2 v) { return v.zw; }", |error| type_error_containing(error, "not found in struct"));
}

#[test]
fn test_duplicate_globals() {
    let input = "int g; float g;";
    expect_parse_error(input, |error| {
        type_error_containing(error, "Duplicate global variable 'g'")?;
        let sites = error.sites();
        if sites.len() != 2 || sites[0].span != span_of(input, "g", 1) || sites[1].span != span_of(input, "g", 0) {
            return Err(format!("Unexpected sites {:?}", sites));
        }
        Ok(())
    });
    expect_parse_error("int sin;", |error| type_error_containing(error, "Duplicate global variable 'sin'"));
}

#[test]
fn test_duplicate_locals() {
    expect_parse_error("void f() { int a; int a; }", |error| type_error_containing(error, "already declared in this scope"));
    expect_parse("void f() { int a; { int a; } }", |_| Ok(()));
}

#[test]
fn test_unused_attribute() {
    expect_parse_error("[[color(0)]] int g;", |error| type_error_containing(error, "Attribute 'color' is not used."));
    expect_parse_error("int f() [[position]] { return 0; }", |error| type_error_containing(error, "is not used"));
}

#[test]
fn test_attribute_arguments() {
    expect_parse_error("[[fragment]] float4 main(float* t [[mtl_buffer(-1)]] [[vk_uniform(0)]]) { return float4(*t,*t,*t,*t); }", |error| {
        type_error_containing(error, "Expected >= 0, got -1.")
    });
    expect_parse_error("[[fragment(1)]] void main() { }", |error| type_error_containing(error, "Expected 0 arguments"));
    expect_parse_error("[[bogus]] void main() { }", |error| type_error_containing(error, "Unknown attribute"));
    expect_parse_error("[[vertex]] [[fragment]] void main() { }", |error| {
        type_error_containing(error, "Function kind already defined.")?;
        if error.sites().len() != 2 {
            return Err("Expected both kind attributes to be cited".to_string());
        }
        Ok(())
    });
}

#[test]
fn test_nested_brackets_in_expression() {
    // `]]` closes an index and then the enclosing one.
    let input = "[[fragment]] float4 main(float* p [[mtl_buffer(0)]] [[vk_uniform(0)]], \
                 int* i [[mtl_buffer(1)]] [[vk_uniform(1)]]) { float x = p[i[0]]; return float4(x, x, x, x); }";
    expect_parse(input, |program| {
        let main = program.find_function("main").ok_or("no main")?;
        let f = &program.functions[main];
        if f.mtl_buffers.len() != 2 || f.vk_bindings.len() != 2 {
            return Err(format!("Expected two bindings, got {:?}", f.mtl_buffers.keys().collect::<Vec<_>>()));
        }
        Ok(())
    });
}

#[test]
fn test_struct_outputs() {
    let input = "struct Out { float4 a [[color(0)]]; float4 b [[color(1)]]; } \
                 [[fragment]] Out main() { Out o; o.a = float4(1.0f, 0.0f, 0.0f, 1.0f); o.b = o.a; return o; }";
    expect_parse(input, |program| {
        let main = program.find_function("main").ok_or("no main")?;
        let ret = program.functions[main].return_type;
        let colors: Vec<Option<u32>> = program.struct_members(ret).unwrap_or(&[]).iter().map(|m| m.color()).collect();
        if colors != vec![Some(0), Some(1)] {
            return Err(format!("Unexpected colors {:?}", colors));
        }
        Ok(())
    });

    let clash = "struct Out { float4 a [[color(0)]]; float4 b [[color(0)]]; } \
                 [[fragment]] Out main() { Out o; return o; }";
    expect_parse_error(clash, |error| type_error_containing(error, "Color index (0) is already used."));

    let missing = "struct Out { float4 a [[color(0)]]; float4 b; } [[fragment]] Out main() { Out o; return o; }";
    expect_parse_error(missing, |error| type_error_containing(error, "Color attribute must be specified."));
}

#[test]
fn test_stage_in() {
    let input = "struct V { float4 pos [[position]]; float2 uv; } \
                 [[fragment]] float4 main(V v [[stage_in]]) { return float4(v.uv.x, v.uv.y, 0.0f, 1.0f); }";
    expect_parse(input, |program| {
        let main = program.find_function("main").ok_or("no main")?;
        let f = &program.functions[main];
        if f.stage_in != Some(f.args[0]) {
            return Err("stage_in argument not recorded".to_string());
        }
        Ok(())
    });
    expect_parse_error("[[fragment]] float4 main(float a) { return float4(a, a, a, a); }", |error| {
        type_error_containing(error, "Unexpected entry point argument.")
    });
}

#[test]
fn test_entry_point_rules() {
    expect_parse_error("[[vertex]] int main() { return 0; }", |error| type_error_containing(error, "Vertex function must return void."));
    expect_parse_error("[[fragment]] void main() { } void g() { main(); }", |error| {
        type_error_containing(error, "Entry point 'main' cannot be called.")
    });
}

#[test]
fn test_missing_return() {
    expect_parse_error("int f(int a) { if (a > 0) return 1; }", |error| type_error_containing(error, "Expected return statement"));
}

#[test]
fn test_calls() {
    expect_parse("int sq(int x) { return x * x; } int f() { return sq(3); }", |program| {
        let ty = returned_type(program, "f")?;
        if ty != program.builtins.s32 {
            return Err(format!("Expected s32, got {}", program.type_name(ty)));
        }
        Ok(())
    });
    expect_parse("float f(float a) { return sin(a) + cos(a); }", |_| Ok(()));
    expect_parse_error("int sq(int x) { return x * x; } int f() { return sq(); }", |error| {
        type_error_containing(error, "Expected 1 arguments in call to 'sq' but got 0.")
    });
    expect_parse_error("int sq(int x) { return x * x; } int f() { return sq(1.0f); }", |error| {
        type_error_containing(error, "Argument type mismatch")
    });
}

#[test]
fn test_syntax_errors() {
    for input in ["int f() { return 1 }", "int f(int a { }", "int x = ;", "void f() { if (true) }"] {
        expect_parse_error(input, |error| match error {
            CompilerError::SyntaxError(..) => Ok(()),
            other => Err(format!("{}: expected a syntax error, got {:?}", input, other)),
        });
    }
}

#[test]
fn test_partial_parse_keeps_completed_declarations() {
    let (program, error) = Parser::new("int a; int f() { return a; } int g() { return b; }").parse_partial();
    let error = error.expect("expected an error");
    assert!(error.to_string().contains("Unknown identifier."));
    assert!(program.find_function("f").is_some());
    assert_eq!(program.decls.len(), 2);
}
