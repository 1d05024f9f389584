//! SSA form for one function.
//!
//! Values and blocks live in arenas owned by an [`SsaContext`], which borrows
//! the typed [`Program`]. Construction follows Braun et al., "Simple and
//! Efficient Construction of Static Single Assignment Form": variables are
//! renamed on the fly, blocks are sealed once their predecessors are known,
//! and trivial phis are pruned as soon as their operands are filled.

use crate::arena::{Arena, Handle};
use crate::ast::{FunctionId, Literal, Program, TypeId, VarId, VarKind};
use log::debug;
use std::collections::HashMap;

mod builder;
mod rewrite;


pub use builder::emit_function_ssa;
pub use rewrite::Rewrite;

pub type ValueId = Handle<Value>;
pub type BlockId = Handle<Block>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Const,
    ZeroInit,
    Undef,
    FunctionArg,
    GlobalVar,
    Alloca,
    Load,
    Store,
    /// `args[0]` is the base pointer; the rest are indices and path markers.
    GetElementPtr,
    /// `args[0]` is the aggregate; the rest are path markers.
    ExtractValue,
    /// `args[0]` is the aggregate, `args[1]` the new element, then path markers.
    InsertValue,
    /// Path marker selecting a struct member or vector component.
    MemberAccess,
    /// Path marker holding swizzle components. Only valid as the last index.
    SwizzleIndices,
    SwizzleExpr,
    /// Broadcasts a scalar into every component of a vector.
    Splat,
    Call,
    Phi,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    LogicalAnd,
    LogicalOr,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    UnaryNeg,
    UnaryNot,
    BitNot,
    Jump,
    CondJump,
    Return,
    ReturnVoid,
    Unreachable,
    /// Pointer to the contents of an entry point's uniform buffer.
    UniformPtr,
    /// One member of a `stage_in` argument, read from its interface variable.
    StageInput,
    /// A struct rebuilt from its member values.
    MakeStruct,
}

impl Op {
    pub fn is_ending(self) -> bool {
        matches!(self, Op::Jump | Op::CondJump | Op::Return | Op::ReturnVoid | Op::Unreachable)
    }

    pub fn is_marker(self) -> bool {
        matches!(self, Op::MemberAccess | Op::SwizzleIndices)
    }
}

/// Payload that does not fit in `args`.
#[derive(Debug, Clone, PartialEq)]
pub enum Aux {
    None,
    Const(Literal),
    Var(VarId),
    Function(FunctionId),
    Block(BlockId),
    CondJump { then: BlockId, els: BlockId },
    Member(u32),
    Swizzle(Vec<u32>),
    Arg(u32),
    Input { member: u32 },
}

#[derive(Debug, Clone)]
pub struct Value {
    pub op: Op,
    pub block: BlockId,
    pub args: Vec<ValueId>,
    pub uses: Vec<ValueId>,
    pub aux: Aux,
    /// For pointer-producing values this is the pointee type.
    pub ty: Option<TypeId>,
    pub removed: bool,
    /// Set on a phi removed as trivial.
    pub replaced_by: Option<ValueId>,
}

/// Structured control flow annotation for a selection head or a loop header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Selection { merge: BlockId },
    Loop { merge: BlockId, continue_target: BlockId },
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub values: Vec<ValueId>,
    pub ending: Option<ValueId>,
    pub sealed: bool,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    pub merge: Option<Merge>,
    vars: HashMap<VarId, ValueId>,
    incomplete_phis: Vec<(VarId, ValueId)>,
}

impl Block {
    fn new(name: String) -> Self {
        Block {
            name,
            values: Vec::new(),
            ending: None,
            sealed: false,
            preds: Vec::new(),
            succs: Vec::new(),
            merge: None,
            vars: HashMap::new(),
            incomplete_phis: Vec::new(),
        }
    }
}

/// SSA graph of one function. Dropping it frees every value and block.
pub struct SsaContext<'a> {
    pub program: &'a Program,
    pub function: FunctionId,
    pub values: Arena<Value>,
    pub blocks: Arena<Block>,
    pub entry: BlockId,
    pub current: BlockId,
    /// Memory slots of variables that are not renamed.
    non_ssa: HashMap<VarId, ValueId>,
    construct_id: u32,
    rewriting: bool,
}

impl<'a> SsaContext<'a> {
    /// Creates a context with a sealed, empty entry block.
    pub fn new(program: &'a Program, function: FunctionId) -> Self {
        let mut blocks = Arena::new();
        let mut entry_block = Block::new("entry".to_string());
        entry_block.sealed = true;
        let entry = blocks.append(entry_block);
        SsaContext {
            program,
            function,
            values: Arena::new(),
            blocks,
            entry,
            current: entry,
            non_ssa: HashMap::new(),
            construct_id: 0,
            rewriting: false,
        }
    }

    pub fn next_construct_id(&mut self) -> u32 {
        self.construct_id += 1;
        self.construct_id
    }

    pub fn new_block(&mut self, construct_id: u32, name: &str) -> BlockId {
        self.blocks.append(Block::new(format!("{}_{}", construct_id, name)))
    }

    /// Live values, in block order.
    pub fn live_values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.blocks.iter().flat_map(|(_, block)| block.values.iter().copied())
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.blocks[block].ending.is_some()
    }

    /// Not the entry block and nothing jumps here.
    pub fn is_unreachable(&self, block: BlockId) -> bool {
        block != self.entry && self.blocks[block].preds.is_empty()
    }

    /// Creates a value and places it in `block`: phis first, endings last,
    /// everything else just before the ending.
    pub fn make_value(&mut self, block: BlockId, op: Op, args: &[ValueId], aux: Aux, ty: Option<TypeId>) -> ValueId {
        assert!(!self.rewriting, "make_value called while a rewrite is open");
        let value = self.alloc_value(block, op, args, aux, ty);
        self.place_value(block, value);
        value
    }

    fn alloc_value(&mut self, block: BlockId, op: Op, args: &[ValueId], aux: Aux, ty: Option<TypeId>) -> ValueId {
        let value = self.values.append(Value {
            op,
            block,
            args: Vec::with_capacity(args.len()),
            uses: Vec::new(),
            aux,
            ty,
            removed: false,
            replaced_by: None,
        });
        for &arg in args {
            self.add_arg(value, arg);
        }
        value
    }

    fn place_value(&mut self, block: BlockId, value: ValueId) {
        let op = self.values[value].op;
        let values = &self.values;
        let b = &mut self.blocks[block];
        if op == Op::Phi {
            let at = b.values.iter().position(|v| values[*v].op != Op::Phi).unwrap_or(b.values.len());
            b.values.insert(at, value);
        } else if op.is_ending() {
            assert!(b.ending.is_none(), "block '{}' is already terminated", b.name);
            b.values.push(value);
            b.ending = Some(value);
        } else if let Some(ending) = b.ending {
            let at = b.values.iter().position(|v| *v == ending).unwrap_or(b.values.len());
            b.values.insert(at, value);
        } else {
            b.values.push(value);
        }
    }

    /// Appends a def→use edge and its back-edge.
    pub fn add_arg(&mut self, user: ValueId, arg: ValueId) {
        self.values[user].args.push(arg);
        self.values[arg].uses.push(user);
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        assert!(!self.blocks[to].sealed, "cannot add a predecessor to sealed block '{}'", self.blocks[to].name);
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    // Endings

    pub fn end_jump(&mut self, block: BlockId, target: BlockId) -> ValueId {
        self.add_edge(block, target);
        self.make_value(block, Op::Jump, &[], Aux::Block(target), None)
    }

    pub fn end_cond_jump(&mut self, block: BlockId, cond: ValueId, then: BlockId, els: BlockId) -> ValueId {
        self.add_edge(block, then);
        self.add_edge(block, els);
        self.make_value(block, Op::CondJump, &[cond], Aux::CondJump { then, els }, None)
    }

    pub fn end_return(&mut self, block: BlockId, value: ValueId) -> ValueId {
        self.make_value(block, Op::Return, &[value], Aux::None, None)
    }

    pub fn end_return_void(&mut self, block: BlockId) -> ValueId {
        self.make_value(block, Op::ReturnVoid, &[], Aux::None, None)
    }

    pub fn end_unreachable(&mut self, block: BlockId) -> ValueId {
        self.make_value(block, Op::Unreachable, &[], Aux::None, None)
    }

    // Variables

    /// Arguments and non-global primitives are renamed; everything else
    /// lives in memory.
    pub fn can_ssa(&self, var: VarId) -> bool {
        let var = &self.program.vars[var];
        match var.kind {
            VarKind::Global => false,
            VarKind::Arg(_) => true,
            VarKind::Local => self.program.is_primitive(var.ty),
        }
    }

    pub fn non_ssa_slot(&self, var: VarId) -> Option<ValueId> {
        self.non_ssa.get(&var).copied()
    }

    pub fn set_non_ssa_slot(&mut self, var: VarId, slot: ValueId) {
        self.non_ssa.insert(var, slot);
    }

    pub fn write_var(&mut self, block: BlockId, var: VarId, value: ValueId) {
        self.blocks[block].vars.insert(var, value);
    }

    pub fn read_var(&mut self, block: BlockId, var: VarId) -> ValueId {
        match self.blocks[block].vars.get(&var) {
            Some(&value) => value,
            None => self.read_var_recursive(block, var),
        }
    }

    pub fn read_var_recursive(&mut self, block: BlockId, var: VarId) -> ValueId {
        let ty = Some(self.program.vars[var].ty);
        let value = if !self.blocks[block].sealed {
            let phi = self.make_value(block, Op::Phi, &[], Aux::Var(var), ty);
            self.blocks[block].incomplete_phis.push((var, phi));
            phi
        } else {
            let preds = self.blocks[block].preds.clone();
            match preds[..] {
                [] => self.make_value(block, Op::Undef, &[], Aux::Var(var), ty),
                [pred] => self.read_var(pred, var),
                _ => {
                    let phi = self.make_value(block, Op::Phi, &[], Aux::Var(var), ty);
                    self.write_var(block, var, phi);
                    self.add_phi_args(var, phi)
                }
            }
        };
        self.write_var(block, var, value);
        value
    }

    /// Fills `phi` with one operand per predecessor, in predecessor order.
    pub fn add_phi_args(&mut self, var: VarId, phi: ValueId) -> ValueId {
        let block = self.values[phi].block;
        for pred in self.blocks[block].preds.clone() {
            let value = self.read_var(pred, var);
            self.add_arg(phi, value);
        }
        let preds = self.blocks[block].preds.len();
        assert_eq!(self.values[phi].args.len(), preds, "phi %{} has the wrong number of operands", phi.index());
        self.try_remove_trivial_phi(phi)
    }

    pub fn seal_block(&mut self, block: BlockId) {
        assert!(!self.blocks[block].sealed, "block '{}' sealed twice", self.blocks[block].name);
        let incomplete = std::mem::take(&mut self.blocks[block].incomplete_phis);
        for (var, phi) in incomplete {
            self.add_phi_args(var, phi);
        }
        self.blocks[block].sealed = true;
        debug!("Sealed block '{}'", self.blocks[block].name);
    }

    /// Replaces `phi` by its only distinct non-self operand, if it has one,
    /// then re-examines the phis that used it. Returns the surviving value.
    pub fn try_remove_trivial_phi(&mut self, phi: ValueId) -> ValueId {
        let mut same = None;
        for &operand in &self.values[phi].args {
            if Some(operand) == same || operand == phi {
                continue;
            }
            if same.is_some() {
                return phi;
            }
            same = Some(operand);
        }
        let same = match same {
            Some(same) => same,
            None => {
                let (block, aux, ty) = {
                    let v = &self.values[phi];
                    (v.block, v.aux.clone(), v.ty)
                };
                self.make_value(block, Op::Undef, &[], aux, ty)
            }
        };

        let mut users: Vec<ValueId> = Vec::new();
        for &user in &self.values[phi].uses {
            if user != phi && self.values[user].op == Op::Phi && !users.contains(&user) {
                users.push(user);
            }
        }

        let tx = self.start_rewrite();
        self.replace_uses(phi, same);
        self.finish_rewrite(tx);

        let mut tx = self.start_rewrite();
        self.remove(&mut tx, phi);
        self.finish_rewrite(tx);
        self.values[phi].replaced_by = Some(same);
        debug!("Removed trivial phi %{} in favor of %{}", phi.index(), same.index());

        for user in users {
            if !self.values[user].removed {
                self.try_remove_trivial_phi(user);
            }
        }
        // `same` may itself have been removed by the recursion above.
        let survivor = self.resolve_replaced(same);
        debug_assert!(!self.values[survivor].removed, "%{} was removed without a replacement", survivor.index());
        survivor
    }

    /// Follows trivial-phi replacements from `value` to a live value.
    pub fn resolve_replaced(&self, mut value: ValueId) -> ValueId {
        while let Some(next) = self.values[value].replaced_by {
            value = next;
        }
        value
    }

    /// Runs trivial-phi removal over every live phi. Returns how many were
    /// removed.
    pub fn prune_trivial_phis(&mut self) -> usize {
        let phis: Vec<ValueId> = self.live_values().filter(|v| self.values[*v].op == Op::Phi).collect();
        let mut removed = 0;
        for phi in phis {
            if !self.values[phi].removed && self.try_remove_trivial_phi(phi) != phi {
                removed += 1;
            }
        }
        removed
    }

    /// Rewires every variable binding that points at `old`.
    fn rebind_vars(&mut self, old: ValueId, new: ValueId) {
        for (_, block) in self.blocks.iter_mut() {
            for value in block.vars.values_mut() {
                if *value == old {
                    *value = new;
                }
            }
        }
        for value in self.non_ssa.values_mut() {
            if *value == old {
                *value = new;
            }
        }
    }
}
