//! Crash recovery for Arbor trees.
//!
//! Replays a recovery log against cached tree nodes after an unclean
//! shutdown, and undoes the logged mutations of aborting transactions.

pub mod access;
pub mod driver;
pub mod redo;
pub mod registry;
pub mod rollback;
pub mod session;

pub use access::PinnedNode;
pub use driver::{recover_or_abort, RecoveryDriver, RecoveryStats};
pub use redo::redo;
pub use registry::{CacheFileRegistry, RegistryEntry};
pub use rollback::{abort, rollback, Transaction, TransactionEnv};
pub use session::RecoverySession;
