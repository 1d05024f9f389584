//! Transactional edits of an SSA graph.
//!
//! Inserts and removals are queued on a [`Rewrite`] and applied together by
//! [`SsaContext::finish_rewrite`]. `replace_uses` takes effect immediately,
//! so a chain of replacements can run before anything is deleted.

use super::{Aux, BlockId, Op, SsaContext, ValueId};
use crate::ast::TypeId;

#[derive(Debug)]
struct PendingInsert {
    value: ValueId,
    block: BlockId,
    before: ValueId,
}

/// An open rewrite transaction. At most one exists per context.
#[derive(Debug, Default)]
#[must_use = "a rewrite must be committed with finish_rewrite"]
pub struct Rewrite {
    inserts: Vec<PendingInsert>,
    removals: Vec<ValueId>,
}

impl<'a> SsaContext<'a> {
    pub fn start_rewrite(&mut self) -> Rewrite {
        assert!(!self.rewriting, "a rewrite is already in progress");
        self.rewriting = true;
        Rewrite::default()
    }

    /// Creates a value now. It is placed just before `before` on commit.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_before(
        &mut self,
        tx: &mut Rewrite,
        block: BlockId,
        op: Op,
        args: &[ValueId],
        aux: Aux,
        ty: Option<TypeId>,
        before: ValueId,
    ) -> ValueId {
        assert!(self.rewriting, "insert_before called outside of a rewrite");
        let value = self.alloc_value(block, op, args, aux, ty);
        tx.inserts.push(PendingInsert { value, block, before });
        value
    }

    /// Points every use of `old` at `new`, including variable bindings.
    /// `old` itself stays in place with no uses.
    pub fn replace_uses(&mut self, old: ValueId, new: ValueId) {
        assert!(self.rewriting, "replace_uses called outside of a rewrite");
        let mut users: Vec<ValueId> = Vec::new();
        for &user in &self.values[old].uses {
            if user != old && !users.contains(&user) {
                users.push(user);
            }
        }
        for user in users {
            let mut moved = 0;
            for arg in self.values[user].args.iter_mut() {
                if *arg == old {
                    *arg = new;
                    moved += 1;
                }
            }
            for _ in 0..moved {
                self.values[new].uses.push(user);
            }
        }
        // Self-uses stay with `old`; they go away when it is removed.
        let self_uses = self.values[old].uses.iter().filter(|u| **u == old).count();
        self.values[old].uses = vec![old; self_uses];
        self.rebind_vars(old, new);
    }

    pub fn remove(&mut self, tx: &mut Rewrite, value: ValueId) {
        assert!(self.rewriting, "remove called outside of a rewrite");
        if !tx.removals.contains(&value) {
            tx.removals.push(value);
        }
    }

    pub fn finish_rewrite(&mut self, tx: Rewrite) {
        assert!(self.rewriting, "finish_rewrite called without an open rewrite");
        for insert in tx.inserts {
            let values = &mut self.blocks[insert.block].values;
            let at = values
                .iter()
                .position(|v| *v == insert.before)
                .unwrap_or_else(|| panic!("insert anchor %{} is not in its block", insert.before.index()));
            values.insert(at, insert.value);
        }
        for value in tx.removals {
            let foreign_uses = self.values[value].uses.iter().any(|u| *u != value);
            assert!(!foreign_uses, "removing %{} which still has uses", value.index());
            for arg in std::mem::take(&mut self.values[value].args) {
                let uses = &mut self.values[arg].uses;
                if let Some(at) = uses.iter().position(|u| *u == value) {
                    uses.remove(at);
                }
            }
            self.values[value].uses.clear();
            let block_id = self.values[value].block;
            let block = &mut self.blocks[block_id];
            block.values.retain(|v| *v != value);
            if block.ending == Some(value) {
                block.ending = None;
            }
            self.values[value].removed = true;
        }
        self.rewriting = false;
    }

    /// Checks that every arg edge has a matching use edge and vice versa,
    /// counting multiplicity, over all live values.
    pub fn verify_use_def(&self) -> Result<(), String> {
        for value in self.live_values() {
            let v = &self.values[value];
            for &arg in &v.args {
                let a = &self.values[arg];
                if a.removed {
                    return Err(format!("%{} uses removed value %{}", value.index(), arg.index()));
                }
                let forward = v.args.iter().filter(|x| **x == arg).count();
                let backward = a.uses.iter().filter(|u| **u == value).count();
                if forward != backward {
                    return Err(format!(
                        "%{} lists %{} as an arg {} times, but %{} lists it as a user {} times",
                        value.index(),
                        arg.index(),
                        forward,
                        arg.index(),
                        backward
                    ));
                }
            }
            for &user in &v.uses {
                let u = &self.values[user];
                if u.removed {
                    return Err(format!("%{} is used by removed value %{}", value.index(), user.index()));
                }
                if !u.args.contains(&value) {
                    return Err(format!("%{} lists %{} as a user, but it is not an arg", value.index(), user.index()));
                }
            }
        }
        Ok(())
    }
}
