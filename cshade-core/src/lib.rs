pub mod arena;
pub mod ast;
pub mod config;
pub mod diags;
pub mod error;
pub mod lexer;
pub mod operators;
pub mod parser;
pub mod report;
pub mod spirv;
pub mod ssa;

pub use config::{CompileOptions, ReportOptions};
pub use error::{CompilerError, Result};

use ast::Program;
use error::ResultExt;
use log::debug;

/// Parses and type-checks `source`.
pub fn parse(source: &str) -> Result<Program> {
    parser::Parser::new(source).parse()
}

/// Parses `source` up to the first error, keeping every declaration
/// completed before it.
pub fn parse_partial(source: &str) -> (Program, Option<CompilerError>) {
    parser::Parser::new(source).parse_partial()
}

pub struct Compiler {
    options: CompileOptions,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Compiler { options }
    }

    /// Type check source code without generating SPIR-V
    pub fn check_only(&self, source: &str) -> Result<()> {
        let program = parse(source)?;
        for function in program.defined_functions() {
            let name = &program.functions[function].name;
            ssa::emit_function_ssa(&program, function).context(format!("In function '{}'", name))?;
        }
        Ok(())
    }

    pub fn compile(&self, source: &str) -> Result<Vec<u32>> {
        // Parse and type check
        let program = parse(source)?;

        let mut emitter = spirv::SpirvEmitter::new(&program, self.options.clone());
        for function in program.defined_functions() {
            let name = &program.functions[function].name;
            debug!("Compiling function '{}'", name);

            // Interface variables first, so the body can refer to them
            spirv::emit_entry_point_header(&mut emitter, function).context(format!("In function '{}'", name))?;

            // Build SSA
            let mut ctx = ssa::emit_function_ssa(&program, function).context(format!("In function '{}'", name))?;

            // Lower SSA to SPIR-V
            spirv::emit_function(&mut emitter, &mut ctx).context(format!("In function '{}'", name))?;
        }

        spirv::finalize_module(&mut emitter)
    }

    /// Like [`Compiler::compile`], with the words laid out little-endian.
    pub fn compile_bytes(&self, source: &str) -> Result<Vec<u8>> {
        let words = self.compile(source)?;
        Ok(words.iter().flat_map(|w| w.to_le_bytes()).collect())
    }
}
