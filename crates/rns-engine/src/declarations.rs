//! Global (ownerless) declarations from the flat API.
//!
//! Every flat call is recorded here with a sequence number before it is
//! applied. The engine keeps a watermark of the last flushed sequence, so a
//! flush only applies what was declared since the previous one.
//!
//! Global keymaps shadowed by a plugin claim are held instead: they stay
//! pending across flushes until no live plugin claims their identity.

use std::collections::BTreeSet;

use rns_core::Operation;

/// One recorded flat call.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub seq: u64,
    pub operation: Operation,
}

/// Ordered table of global declarations.
#[derive(Debug, Default)]
pub struct GlobalDeclarations {
    entries: Vec<Declaration>,
    next_seq: u64,
    flushed_through: u64,
    held: BTreeSet<u64>,
}

impl GlobalDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a declaration and return its sequence number.
    ///
    /// Idempotent operations replace an earlier declaration with the same
    /// key. A clearing augroup drops the autocmds previously declared for
    /// that group.
    pub fn declare(&mut self, operation: Operation) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;

        if operation.is_idempotent() {
            let key = operation.key();
            self.entries.retain(|d| d.operation.key() != key);
        }
        if let Operation::CreateAugroup(group) = &operation {
            if group.clear {
                let before = self.entries.len();
                self.entries.retain(|d| match &d.operation {
                    Operation::CreateAutocmd(au) => {
                        au.group.as_deref() != Some(group.name.as_str())
                    }
                    _ => true,
                });
                let dropped = before - self.entries.len();
                if dropped > 0 {
                    tracing::debug!("Augroup '{}' cleared {} autocmds", group.name, dropped);
                }
            }
        }

        tracing::debug!("Declared global #{}: {}", seq, operation.key());
        self.entries.push(Declaration { seq, operation });
        seq
    }

    /// Declarations in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &Declaration> {
        self.entries.iter()
    }

    /// Whether `seq` still has to reach the host: declared after the last
    /// flush, or held back by a plugin claim.
    pub fn is_pending(&self, seq: u64) -> bool {
        self.is_new(seq) || self.held.contains(&seq)
    }

    /// Whether `seq` was declared after the last flush.
    pub fn is_new(&self, seq: u64) -> bool {
        seq > self.flushed_through
    }

    /// Replace the set of held declarations.
    pub fn hold(&mut self, seqs: impl IntoIterator<Item = u64>) {
        self.held = seqs.into_iter().collect();
    }

    /// Highest sequence number handed out.
    pub fn last_seq(&self) -> u64 {
        self.next_seq
    }

    /// Advance the watermark and retire one-shot exec requests it covers.
    pub fn mark_flushed(&mut self, through: u64) {
        self.flushed_through = self.flushed_through.max(through);
        let watermark = self.flushed_through;
        self.entries.retain(|d| {
            d.seq > watermark
                || !matches!(d.operation, Operation::ExecCommand(_) | Operation::ExecCode(_))
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
