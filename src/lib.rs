//! Dynamic binary translator core for a 64-bit MIPS III cartridge-console
//! CPU: decode, SSA IR, optimization, linear-scan allocation, and a
//! portable threaded-code host, wired together by [`translator::Translator`].

pub mod cache;
pub mod config;
pub mod decode;
pub mod emit;
pub mod error;
pub mod ir;
pub mod mmu;
pub mod regalloc;
pub mod state;
pub mod translator;

pub use config::DynarecConfig;
pub use emit::GuestBus;
pub use error::{GuestException, TranslationError};
pub use state::GuestState;
pub use translator::Translator;
