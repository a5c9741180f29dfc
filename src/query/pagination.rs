//! Choosing between offset and keyset pagination and computing the
//! navigation metadata for a page.

use serde::Serialize;
use strum_macros::Display;

pub const DEFAULT_KEYSET_THRESHOLD: u64 = 1_000_000;
pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 1000;

/// Pages shown on either side of the current one
const WINDOW_RADIUS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaginationStrategy {
    Offset,
    Keyset,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageRequest {
    /// 1-based; ignored in keyset mode
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    /// Keyset mode only: the last identity value already seen
    pub cursor: Option<String>,
    /// Relative page jump, applied to `page`
    pub jump: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PagePlan {
    pub strategy: PaginationStrategy,
    pub page: u64,
    pub page_size: u64,
    #[serde(skip)]
    pub offset: u64,
    pub total_pages: u64,
    pub has_previous: bool,
    pub has_next: bool,
    pub window: Vec<u64>,
    #[serde(skip)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaginationPlanner {
    keyset_threshold: u64,
    default_page_size: u64,
    max_page_size: u64,
}

impl Default for PaginationPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_KEYSET_THRESHOLD, DEFAULT_PAGE_SIZE, DEFAULT_MAX_PAGE_SIZE)
    }
}

impl PaginationPlanner {
    pub fn new(keyset_threshold: u64, default_page_size: u64, max_page_size: u64) -> Self {
        Self {
            keyset_threshold,
            default_page_size,
            max_page_size,
        }
    }

    pub fn keyset_threshold(&self) -> u64 {
        self.keyset_threshold
    }

    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .filter(|size| *size > 0)
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size)
            .max(1)
    }

    pub fn strategy(&self, total_count: u64) -> PaginationStrategy {
        if total_count > self.keyset_threshold {
            PaginationStrategy::Keyset
        } else {
            PaginationStrategy::Offset
        }
    }

    pub fn plan(&self, total_count: u64, request: &PageRequest) -> PagePlan {
        let page_size = self.page_size(request.page_size);
        let total_pages = total_count.div_ceil(page_size);

        match self.strategy(total_count) {
            PaginationStrategy::Offset => {
                let last_page = total_pages.max(1);
                let requested = i64::try_from(request.page.unwrap_or(1)).unwrap_or(i64::MAX);
                let page = match request.jump {
                    Some(jump) => requested.saturating_add(jump),
                    None => requested,
                }
                .clamp(1, i64::try_from(last_page).unwrap_or(i64::MAX)) as u64;

                let window = (page.saturating_sub(WINDOW_RADIUS).max(1)
                    ..=(page + WINDOW_RADIUS).min(last_page))
                    .collect();

                PagePlan {
                    strategy: PaginationStrategy::Offset,
                    page,
                    page_size,
                    offset: (page - 1) * page_size,
                    total_pages,
                    has_previous: page > 1,
                    has_next: page < total_pages,
                    window,
                    cursor: None,
                }
            }
            PaginationStrategy::Keyset => {
                let cursor = request
                    .cursor
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string);

                // Only an estimate: the executor probes for one extra row
                // and settles has_next from what actually came back
                PagePlan {
                    strategy: PaginationStrategy::Keyset,
                    page: request.page.unwrap_or(1).max(1),
                    page_size,
                    offset: 0,
                    total_pages,
                    has_previous: cursor.is_some(),
                    has_next: total_count > page_size,
                    window: vec![],
                    cursor,
                }
            }
        }
    }
}
