//! Options for code generation and diagnostic rendering.

/// Settings that affect the emitted module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// `(major, minor)` written into the module header.
    pub spirv_version: (u8, u8),
    /// Generator magic; 0 means unregistered.
    pub generator_id: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { spirv_version: (1, 0), generator_id: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    /// Source lines shown before and after each site.
    pub context_lines: usize,
    /// Paint sites with ANSI colors instead of underlining them with carets.
    pub color: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions { context_lines: 2, color: true }
    }
}
