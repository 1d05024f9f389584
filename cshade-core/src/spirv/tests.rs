use super::*;
use crate::parser::Parser;
use crate::ssa::{emit_function_ssa, Op as SsaOp, SsaContext};
use rspirv::binary::Disassemble;

fn parse(source: &str) -> Program {
    let _ = env_logger::builder().is_test(true).try_init();
    Parser::new(source).parse().unwrap_or_else(|e| panic!("failed to parse {:?}: {}", source, e))
}

/// Runs every function of `program` through the emitter.
fn emit_all(emitter: &mut SpirvEmitter, program: &Program) -> Result<()> {
    for function in program.defined_functions() {
        emit_entry_point_header(emitter, function)?;
        let mut ctx = emit_function_ssa(program, function)?;
        emit_function(emitter, &mut ctx)?;
    }
    Ok(())
}

fn compile(source: &str) -> Result<Vec<Word>> {
    let program = parse(source);
    let mut emitter = SpirvEmitter::new(&program, CompileOptions::default());
    emit_all(&mut emitter, &program)?;
    finalize_module(&mut emitter)
}

fn disassemble(words: &[Word]) -> String {
    rspirv::dr::load_words(words).expect("Produced invalid SPIR-V").disassemble()
}

fn ssa_ops(ctx: &SsaContext) -> Vec<SsaOp> {
    ctx.live_values().map(|v| ctx.values[v].op).collect()
}

const UNIFORM_FRAGMENT: &str =
    "[[fragment]] float4 main(float* t [[mtl_buffer(0)]] [[vk_uniform(0)]]) { return float4(*t,*t,*t,*t); }";

#[test]
fn test_string_words() {
    assert_eq!(string_words("main"), vec![0x6e69_616d, 0]);
    assert_eq!(string_words("abc"), vec![0x0063_6261]);
    assert_eq!(string_words(""), vec![0]);
}

#[test]
fn test_instruction_framing() {
    let mut out = Vec::new();
    write_instruction(&mut out, Op::TypeFloat, &[3, 32]);
    assert_eq!(out, vec![(3 << 16) | Op::TypeFloat as u32, 3, 32]);
}

#[test]
fn test_header() {
    let program = parse("");
    let options = CompileOptions { spirv_version: (1, 3), generator_id: 7 };
    let mut emitter = SpirvEmitter::new(&program, options);
    let words = emitter.finalize().unwrap();
    assert_eq!(&words[..5], &[0x0723_0203, 0x0001_0300, 7, 1, 0]);
    assert_eq!(&words[5..7], &[(2 << 16) | Op::Capability as u32, Capability::Shader as u32]);

    let module = rspirv::dr::load_words(&words).unwrap();
    let header = module.header.as_ref().unwrap();
    assert_eq!(header.version(), (1, 3));
    assert_eq!(header.bound, 1);
}

#[test]
fn test_bound_exceeds_every_id() {
    let words = compile("int sq(int x) { return x * x; } int main() { return sq(3) + 1; }").unwrap();
    let module = rspirv::dr::load_words(&words).unwrap();
    let bound = module.header.as_ref().unwrap().bound;
    let ids = module
        .all_inst_iter()
        .filter_map(|inst| inst.result_id)
        .chain(module.functions.iter().flat_map(|f| f.blocks.iter().filter_map(|b| b.label.as_ref()?.result_id)));
    for id in ids {
        assert!(id > 0 && id < bound, "id {} outside bound {}", id, bound);
    }
}

#[test]
fn test_types_and_constants_are_interned() {
    let program = parse("");
    let b = program.builtins;
    let mut emitter = SpirvEmitter::new(&program, CompileOptions::default());

    let f32_id = emitter.type_id(b.f32).unwrap();
    assert_eq!(emitter.type_id(b.f32).unwrap(), f32_id);
    let vec4 = emitter.type_id(b.float4).unwrap();
    assert_eq!(emitter.type_id(b.float4).unwrap(), vec4);

    let ptr = emitter.pointer_type(sp::StorageClass::Function, f32_id);
    assert_eq!(emitter.pointer_type(sp::StorageClass::Function, f32_id), ptr);
    assert_ne!(emitter.pointer_type(sp::StorageClass::Private, f32_id), ptr);

    let one = emitter.constant(b.s32, Literal::Int(1)).unwrap();
    assert_eq!(emitter.constant(b.s32, Literal::Int(1)).unwrap(), one);
    assert_ne!(emitter.constant(b.u32, Literal::Int(1)).unwrap(), one);
    assert_eq!(emitter.constant_u32_index(1).unwrap(), one);

    // An f64 literal stored into an f32 is the same constant as the f32 literal.
    let half = emitter.constant(b.f32, Literal::F32(0.5)).unwrap();
    assert_eq!(emitter.constant(b.f32, Literal::F64(0.5)).unwrap(), half);

    let null = emitter.constant_null(b.float4).unwrap();
    assert_eq!(emitter.constant_null(b.float4).unwrap(), null);
    assert!(emitter.constant(b.bool, Literal::Int(1)).is_err());

    let words = emitter.finalize().unwrap();
    let module = rspirv::dr::load_words(&words).unwrap();
    let floats = module.types_global_values.iter().filter(|i| i.class.opcode == Op::TypeFloat).count();
    assert_eq!(floats, 1);
}

#[test]
fn test_wide_types_require_capabilities() {
    let program = parse("");
    let b = program.builtins;
    let mut emitter = SpirvEmitter::new(&program, CompileOptions::default());
    emitter.type_id(b.s64).unwrap();
    emitter.type_id(b.u8).unwrap();
    emitter.type_id(b.f64).unwrap();
    let negative = emitter.constant(b.s64, Literal::Int(-2i64 as u64)).unwrap();
    let words = emitter.finalize().unwrap();
    // Low word first.
    assert!(words.windows(2).any(|w| w == [0xFFFF_FFFE, 0xFFFF_FFFF]));
    let module = rspirv::dr::load_words(&words).unwrap();

    let capabilities: Vec<String> = module.capabilities.iter().map(|c| format!("{:?}", c.operands[0])).collect();
    for expected in ["Shader", "Int64", "Int8", "Float64"] {
        assert!(capabilities.iter().any(|c| c.contains(expected)), "missing {} in {:?}", expected, capabilities);
    }
    assert!(module.types_global_values.iter().any(|i| i.result_id == Some(negative)));
}

#[test]
fn test_plain_function() {
    let words = compile("int main() { return 1 + 2; }").unwrap();
    let text = disassemble(&words);
    assert!(text.contains("OpIAdd"), "{}", text);
    assert!(text.contains("OpReturnValue"), "{}", text);
    assert!(text.contains("OpName %"), "{}", text);
    assert!(!text.contains("OpEntryPoint"), "{}", text);
}

#[test]
fn test_control_flow() {
    let source = "int f(int n) { int s = 0; int i; for (i = 0; i < n; i++) { if (i > 2) s += i; else s -= 1; } return s; }";
    let text = disassemble(&compile(source).unwrap());
    assert!(text.contains("OpLoopMerge"), "{}", text);
    assert!(text.contains("OpSelectionMerge"), "{}", text);
    assert!(text.contains("OpPhi"), "{}", text);
    assert!(text.contains("OpSLessThan"), "{}", text);
    assert!(text.contains("OpBranchConditional"), "{}", text);
}

#[test]
fn test_back_edge_targets_the_loop_merge_block() {
    use rspirv::dr::Operand;

    let id_ref = |operand: &Operand| match *operand {
        Operand::IdRef(id) => id,
        ref other => panic!("expected an id, got {:?}", other),
    };
    let source = "int f(int n) { int s = 0; int i; for (i = 0; (i < n ? 1 : 0) != 0; i = i + 1) s += i; return s; }";
    let module = rspirv::dr::load_words(&compile(source).unwrap()).unwrap();
    let blocks = &module.functions[0].blocks;
    let label = |block: &rspirv::dr::Block| block.label.as_ref().and_then(|l| l.result_id).unwrap();

    let headers: Vec<_> = blocks
        .iter()
        .filter(|b| b.instructions.iter().any(|i| i.class.opcode == Op::LoopMerge))
        .collect();
    assert_eq!(headers.len(), 1);
    let header = headers[0];
    assert!(!header.instructions.iter().any(|i| i.class.opcode == Op::SelectionMerge));
    let loop_merge = header.instructions.iter().find(|i| i.class.opcode == Op::LoopMerge).unwrap();
    let continue_target = id_ref(&loop_merge.operands[1]);

    let continue_block = blocks.iter().find(|b| label(b) == continue_target).unwrap();
    let branch = continue_block.instructions.last().unwrap();
    assert_eq!(branch.class.opcode, Op::Branch);
    assert_eq!(id_ref(&branch.operands[0]), label(header));
}

#[test]
fn test_uniform_argument_is_rewritten() {
    let program = parse(UNIFORM_FRAGMENT);
    let main = program.find_function("main").unwrap();
    let mut emitter = SpirvEmitter::new(&program, CompileOptions::default());
    emit_entry_point_header(&mut emitter, main).unwrap();
    let mut ctx = emit_function_ssa(&program, main).unwrap();
    emit_function(&mut emitter, &mut ctx).unwrap();

    let ops = ssa_ops(&ctx);
    assert!(!ops.contains(&SsaOp::FunctionArg));
    assert_eq!(ops.iter().filter(|op| **op == SsaOp::UniformPtr).count(), 1);
    ctx.verify_use_def().unwrap();

    let text = disassemble(&finalize_module(&mut emitter).unwrap());
    assert!(text.contains("OpEntryPoint Fragment"), "{}", text);
    assert!(text.contains("OriginUpperLeft"), "{}", text);
    assert!(text.contains("DescriptorSet 0"), "{}", text);
    assert!(text.contains("Binding 0"), "{}", text);
    assert!(text.contains("Block"), "{}", text);
    assert!(text.contains("OpAccessChain"), "{}", text);
    assert!(text.contains("\"f32_block\""), "{}", text);
    assert!(text.contains("\"out_color\""), "{}", text);
}

#[test]
fn test_stage_in_member_reads_are_forwarded() {
    let source = "struct V { float4 pos [[position]]; float2 uv; } \
                  [[fragment]] float4 main(V v [[stage_in]]) { float4 p = v.pos; return p; }";
    let program = parse(source);
    let main = program.find_function("main").unwrap();
    let mut emitter = SpirvEmitter::new(&program, CompileOptions::default());
    emit_entry_point_header(&mut emitter, main).unwrap();
    let mut ctx = emit_function_ssa(&program, main).unwrap();
    emit_function(&mut emitter, &mut ctx).unwrap();

    let ops = ssa_ops(&ctx);
    assert_eq!(ops.iter().filter(|op| **op == SsaOp::StageInput).count(), 2);
    assert!(!ops.contains(&SsaOp::FunctionArg));
    assert!(!ops.contains(&SsaOp::ExtractValue));
    assert!(!ops.contains(&SsaOp::MakeStruct));
    ctx.verify_use_def().unwrap();

    let text = disassemble(&finalize_module(&mut emitter).unwrap());
    assert!(text.contains("BuiltIn FragCoord"), "{}", text);
    assert!(text.contains("Location 0"), "{}", text);
    assert!(text.contains("\"v.uv\""), "{}", text);
}

#[test]
fn test_stage_in_nested_reads_rebuild_the_struct() {
    let source = "struct V { float4 pos [[position]]; float2 uv; } \
                  [[fragment]] float4 main(V v [[stage_in]]) { return float4(v.uv.x, v.uv.y, 0.0f, 1.0f); }";
    let program = parse(source);
    let main = program.find_function("main").unwrap();
    let mut emitter = SpirvEmitter::new(&program, CompileOptions::default());
    emit_entry_point_header(&mut emitter, main).unwrap();
    let mut ctx = emit_function_ssa(&program, main).unwrap();
    emit_function(&mut emitter, &mut ctx).unwrap();

    let ops = ssa_ops(&ctx);
    assert!(ops.contains(&SsaOp::MakeStruct));
    assert!(!ops.contains(&SsaOp::FunctionArg));
    ctx.verify_use_def().unwrap();
    let text = disassemble(&finalize_module(&mut emitter).unwrap());
    assert!(text.contains("OpCompositeConstruct"), "{}", text);
}

#[test]
fn test_entry_point_needs_header() {
    let program = parse(UNIFORM_FRAGMENT);
    let main = program.find_function("main").unwrap();
    let mut emitter = SpirvEmitter::new(&program, CompileOptions::default());
    let mut ctx = emit_function_ssa(&program, main).unwrap();
    let err = emit_function(&mut emitter, &mut ctx).unwrap_err();
    assert!(err.to_string().contains("has no declared interface"), "{}", err);
}

#[test]
fn test_vertex_entry_point() {
    let text = disassemble(&compile("[[vertex]] void main() { }").unwrap());
    assert!(text.contains("OpEntryPoint Vertex"), "{}", text);
    assert!(!text.contains("OpExecutionMode"), "{}", text);
}

#[test]
fn test_intrinsics() {
    let text = disassemble(&compile("float f(float a) { return sin(a) + abs(a); }").unwrap());
    assert!(text.contains("GLSL.std.450"), "{}", text);
    assert!(text.contains("OpExtInst"), "{}", text);

    let text = disassemble(&compile("float f(float3 a) { return dot_vec3(a, a) + length(a); }").unwrap());
    assert!(text.contains("OpDot"), "{}", text);

    let err = compile("float3 f(float a) { return hsv(a, a, a); }").unwrap_err();
    assert!(err.to_string().contains("hsv"), "{}", err);
}

#[test]
fn test_globals() {
    let text = disassemble(&compile("int g = -3; int f() { g += 1; return g; }").unwrap());
    assert!(text.contains("Private"), "{}", text);
    assert!(text.contains("\"g\""), "{}", text);

    let err = compile("int a = 1; int b = a; int f() { return b; }").unwrap_err();
    assert!(err.to_string().contains("Global initializers must be constant"), "{}", err);
}

#[test]
fn test_called_but_undefined() {
    let err = compile("int g(int x); int f() { return g(1); }").unwrap_err();
    assert!(err.to_string().contains("Function 'g' is called but never defined"), "{}", err);
    assert!(err.span().is_some());
}

#[test]
fn test_module_bytes() {
    let program = parse("int main() { return 0; }");
    let mut emitter = SpirvEmitter::new(&program, CompileOptions::default());
    emit_all(&mut emitter, &program).unwrap();
    let bytes = finalize_module_bytes(&mut emitter).unwrap();
    assert_eq!(&bytes[..4], &[0x03, 0x02, 0x23, 0x07]);
    assert_eq!(bytes.len() % 4, 0);
}
