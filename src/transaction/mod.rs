// ============================================================================
// Transaction Module
// ============================================================================
//
// Undo-log based rollback for the memory backend, and the coordinator that
// wraps a unit of work in BEGIN / COMMIT / ROLLBACK on any connection.
//
// ============================================================================

pub mod change;
pub mod coordinator;

pub use change::{Change, UndoLog};
pub use coordinator::transactional;
