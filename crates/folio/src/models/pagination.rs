use serde::{Deserialize, Serialize};

/// One page of a larger result set. Page numbers start at 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub last_page: u32,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, per_page: u32) -> Self {
        let per_page = per_page.max(1);
        let last_page = total.div_ceil(u64::from(per_page)).max(1) as u32;
        Self {
            items,
            total,
            page: page.max(1),
            per_page,
            last_page,
        }
    }

    /// Slices an already-ordered result list.
    pub fn from_ranked(all: Vec<T>, page: u32, per_page: u32) -> Self {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total = all.len() as u64;
        let skip = (page as usize - 1).saturating_mul(per_page as usize);
        let items = all.into_iter().skip(skip).take(per_page as usize).collect();
        Self::new(items, total, page, per_page)
    }

    /// Offset for a store query serving `page`.
    pub fn offset(page: u32, per_page: u32) -> u64 {
        u64::from(page.max(1) - 1) * u64::from(per_page.max(1))
    }
}
