//! Client-side session engine pieces
//!
//! - [`state`]: the session store and its identity stamp
//! - [`dispatcher`]: the per-turn event state machine
//! - [`reconcile`]: finalizing a turn and adopting the server's view
//! - [`pagination`]: cursor-based backward paging with deduplication

pub mod dispatcher;
pub mod pagination;
pub mod reconcile;
pub mod state;

pub use dispatcher::{apply_frame, Dispatch};
pub use pagination::{apply_initial_page, begin_page_load, merge_older_page, PageOutcome, SkipReason};
pub use reconcile::{finalize_turn, reconcile_window, ReconcileSummary};
pub use state::{is_local_id, LocalIdSequence, PendingSources, Session, TurnPhase, LOCAL_ID_PREFIX};
