//! Shared utilities for folio integration tests.
//!
//! - `TestHarness` gives each test its own storage root and database
//! - `PdfFixture` builds real PDFs through `lopdf`

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{ManualPipeline, TestHarness};
