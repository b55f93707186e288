pub mod document;
pub mod page;
pub mod pagination;

pub use document::{Document, DocumentFilter, DocumentStatus, Metadata, NewDocument};
pub use page::{
    Page, PageCompletion, PageContent, PageFilter, PageStatus, PageStatusCounts,
};
pub use pagination::Paginated;
