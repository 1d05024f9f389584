use cshade_core::error::CompilerError;
use cshade_core::{report, CompileOptions, Compiler, ReportOptions};
use rspirv::binary::Disassemble;

const FRAGMENT: &str =
    "[[fragment]] float4 main(float* t [[mtl_buffer(0)]] [[vk_uniform(0)]]) { return float4(*t,*t,*t,*t); }";

fn compile(source: &str) -> Vec<u32> {
    let _ = env_logger::builder().is_test(true).try_init();
    Compiler::default().compile(source).unwrap_or_else(|e| panic!("failed to compile {:?}: {}", source, e))
}

fn disassemble(words: &[u32]) -> String {
    rspirv::dr::load_words(words).expect("Produced invalid SPIR-V").disassemble()
}

#[test]
fn test_fragment_with_uniform() {
    let words = compile(FRAGMENT);
    assert_eq!(words[0], 0x0723_0203);
    assert_eq!(words[1], 0x0001_0000);

    let module = rspirv::dr::load_words(&words).unwrap();
    assert_eq!(module.entry_points.len(), 1);
    assert_eq!(module.functions.len(), 1);

    let text = module.disassemble();
    assert!(text.contains("OpEntryPoint Fragment"), "{}", text);
    assert!(text.contains("\"main\""), "{}", text);
    assert!(text.contains("OpStore"), "{}", text);
}

#[test]
fn test_options_reach_the_header() {
    let compiler = Compiler::new(CompileOptions { spirv_version: (1, 5), generator_id: 0x1234 });
    let words = compiler.compile("int main() { return 0; }").unwrap();
    assert_eq!(&words[1..3], &[0x0001_0500, 0x1234]);
}

#[test]
fn test_duplicate_binding_is_reported() {
    let source = "[[fragment]] float4 main(float* t [[mtl_buffer(0)]] [[vk_uniform(0)]], \
                  float* u [[mtl_buffer(0)]] [[vk_uniform(1)]]) { return float4(*t,*t,*t,*u); }";
    let err = Compiler::default().compile(source).unwrap_err();
    assert!(matches!(err, CompilerError::TypeError(..)), "{:?}", err);
    assert_eq!(err.message(), "Metal buffer index (0) is already used.");
    assert_eq!(err.sites().len(), 2);
}

#[test]
fn test_error_report_marks_the_span() {
    let source = "void f() {\n    1 = 2;\n}\n";
    let err = Compiler::default().compile(source).unwrap_err();
    assert_eq!(err.message(), "Left side of '=' must be an lvalue.");
    let span = err.span().unwrap();
    assert_eq!(&source[span.start..span.end], "1");
    assert_eq!(report::line_col(source, span.start), (2, 5));

    let rendered = report::render(source, &err, &ReportOptions { context_lines: 1, color: false });
    assert!(rendered.starts_with("Type error: Left side of '=' must be an lvalue."), "{}", rendered);
    assert!(rendered.contains("  --> 2:5"), "{}", rendered);
    assert!(rendered.contains("2 |     1 = 2;"), "{}", rendered);
    assert!(rendered.contains("  |     ^"), "{}", rendered);
    assert!(!rendered.contains('\x1b'));

    let colored = report::render(source, &err, &ReportOptions::default());
    assert!(colored.contains("\x1b[1m\x1b[31m1\x1b[0m"), "{:?}", colored);
}

#[test]
fn test_control_flow_compiles() {
    let source = "int clamp_sum(int n, bool neg) {\n\
                  \x20   int s = 0;\n\
                  \x20   int i;\n\
                  \x20   for (i = 0; i < n; i++) {\n\
                  \x20       if (s > 100) s = 100; else s += i;\n\
                  \x20   }\n\
                  \x20   return neg ? -s : s;\n\
                  }";
    let text = disassemble(&compile(source));
    assert!(text.contains("OpLoopMerge"), "{}", text);
    assert!(text.contains("OpSelectionMerge"), "{}", text);
    assert!(text.contains("OpPhi"), "{}", text);
    assert!(text.contains("OpSNegate"), "{}", text);
}

#[test]
fn test_stage_in_fragment() {
    let source = "struct V { float4 pos [[position]]; float2 uv; } \
                  [[fragment]] float4 main(V v [[stage_in]]) { return float4(v.uv.x, v.uv.y, 0.0f, 1.0f); }";
    let text = disassemble(&compile(source));
    assert!(text.contains("BuiltIn FragCoord"), "{}", text);
    assert!(text.contains("Location 0"), "{}", text);
    assert!(text.contains("Input"), "{}", text);
}

#[test]
fn test_struct_return_writes_each_color() {
    let source = "struct Out { float4 a [[color(0)]]; float4 b [[color(1)]]; } \
                  [[fragment]] Out main() { Out o; o.a = float4(1.0f, 0.0f, 0.0f, 1.0f); o.b = o.a; return o; }";
    let text = disassemble(&compile(source));
    assert!(text.contains("\"out_a\""), "{}", text);
    assert!(text.contains("\"out_b\""), "{}", text);
    assert!(text.contains("Location 1"), "{}", text);
    assert!(text.contains("OpCompositeExtract"), "{}", text);
}

#[test]
fn test_vertex_entry_point() {
    let text = disassemble(&compile("[[vertex]] void main() { }"));
    assert!(text.contains("OpEntryPoint Vertex"), "{}", text);
}

#[test]
fn test_codegen_error_names_the_function() {
    let source = "float3 f(float a) { return hsv(a, a, a); }";
    let err = Compiler::default().compile(source).unwrap_err();
    assert!(matches!(err, CompilerError::Context { .. }), "{:?}", err);
    assert_eq!(err.message(), "In function 'f'");
    assert!(matches!(err.root(), CompilerError::CodegenError(..)), "{:?}", err.root());

    let rendered = report::render(source, &err, &ReportOptions { context_lines: 0, color: false });
    assert!(rendered.starts_with("In function 'f'\n"), "{}", rendered);
}

#[test]
fn test_check_only() {
    let compiler = Compiler::default();
    compiler.check_only(FRAGMENT).unwrap();
    compiler.check_only("float3 f(float a) { return hsv(a, a, a); }").unwrap();
    assert!(compiler.check_only("int f() { return true; }").is_err());
}

#[test]
fn test_compile_bytes_is_little_endian() {
    let compiler = Compiler::default();
    let words = compiler.compile(FRAGMENT).unwrap();
    let bytes = compiler.compile_bytes(FRAGMENT).unwrap();
    assert_eq!(bytes.len(), words.len() * 4);
    assert_eq!(&bytes[..4], &[0x03, 0x02, 0x23, 0x07]);
}

#[test]
fn test_partial_parse_keeps_earlier_declarations() {
    let (program, err) = cshade_core::parse_partial("int a; int f() { return a; } int g( {");
    assert!(err.is_some());
    assert!(program.find_function("f").is_some());
}
