//! Broadcasting of document progress for real-time streaming to any
//! transport (SSE, websockets, a CLI printer).

pub mod progress;

pub use progress::{DocumentProgressEvent, ProgressBroadcaster, ProgressPhase};
