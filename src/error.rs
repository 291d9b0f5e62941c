//! Error types for the translation pipeline.
//!
//! Two families exist, matching the split described for the pipeline:
//! [`TranslationError`] is a bug in the translator itself (fatal, propagated
//! with `?`), while [`GuestException`] is an architecturally observable
//! condition that the generated code raises and the dispatcher resolves by
//! entering the guest's own exception handler.

use thiserror::Error;

use crate::state::cop0::Exception as Cop0Exception;

/// A failure of the translation pipeline. None of these should occur on a
/// well-formed guest binary; all are propagated to the caller of
/// [`crate::translator::Translator::translate_and_run`].
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum TranslationError {
    #[error("unimplemented host lowering for ir kind {0:?}")]
    UnimplementedIrKind(&'static str),

    #[error("ir cache overflow: block produced more than {capacity} ir nodes")]
    IrCacheOverflow { capacity: usize },

    #[error("flush cache overflow: block produced more than {capacity} pending flushes")]
    FlushCacheOverflow { capacity: usize },

    #[error("block compiled without a terminating exit instruction")]
    MissingBlockExit,

    #[error("reserved or unimplemented opcode 0x{word:08x} at pc 0x{pc:08x}")]
    ReservedInstruction { pc: u32, word: u32 },
}

/// An exception raised by the guest program itself while running compiled
/// code. Recovered by the dispatcher: it is turned into a write into CP0's
/// `cause`/`epc`/`bad_vaddr` registers and a jump to the exception vector,
/// never into a process abort.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum GuestException {
    Cop0(Cop0Exception),
    TlbMiss { bad_vaddr: u64 },
    TlbInvalid { bad_vaddr: u64 },
    TlbModified { bad_vaddr: u64 },
    FloatingPoint,
}
