//! Page walking shared by every paginated endpoint.
//!
//! Providers page their collections three different ways: a numeric offset
//! advanced by the page size, an opaque continuation token echoed back in
//! the next request, and a cursor that behaves like a token but lives under
//! a different field. [`fetch_all_pages`] runs one loop for all of them; the
//! caller supplies a closure that turns the current [`PageState`] into a
//! request and reports what came back.

use tracing::{debug, warn};

use crate::error::ExtractError;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound on pages per collection, in case a server keeps handing back
/// a continuation token.
const MAX_PAGES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    Offset { size: usize },
    ContinuationToken,
    Cursor,
}

impl Pagination {
    pub fn offset() -> Self {
        Pagination::Offset {
            size: DEFAULT_PAGE_SIZE,
        }
    }

    fn initial(&self) -> PageState {
        match *self {
            Pagination::Offset { size } => PageState::Offset { start: 0, size },
            Pagination::ContinuationToken => PageState::ContinuationToken(None),
            Pagination::Cursor => PageState::Cursor(None),
        }
    }
}

/// Where the next request should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    Offset { start: usize, size: usize },
    ContinuationToken(Option<String>),
    Cursor(Option<String>),
}

impl PageState {
    /// The token or cursor to send, if any.
    pub fn marker(&self) -> Option<&str> {
        match self {
            PageState::Offset { .. } => None,
            PageState::ContinuationToken(token) | PageState::Cursor(token) => token.as_deref(),
        }
    }

    /// `(start, size)` of an offset request.
    pub fn offset(&self) -> Option<(usize, usize)> {
        match self {
            PageState::Offset { start, size } => Some((*start, *size)),
            _ => None,
        }
    }

    /// Computes the state for the following request, or `None` once the
    /// collection is exhausted.
    fn advance(&self, page_len: usize, next: Option<String>) -> Option<PageState> {
        let next = next.filter(|t| !t.is_empty());
        match self {
            PageState::Offset { start, size } => {
                if page_len == 0 || page_len < *size {
                    None
                } else {
                    Some(PageState::Offset {
                        start: start + size,
                        size: *size,
                    })
                }
            }
            PageState::ContinuationToken(_) => next.map(|t| PageState::ContinuationToken(Some(t))),
            PageState::Cursor(_) => next.map(|c| PageState::Cursor(Some(c))),
        }
    }
}

/// What a single page request produced.
#[derive(Debug)]
pub enum PageOutcome<T> {
    Page { items: Vec<T>, next: Option<String> },
    /// The provider signalled "no more data" out of band (e.g. a status
    /// code). Ends the walk without an error.
    Exhausted,
}

impl<T> PageOutcome<T> {
    pub fn page(items: Vec<T>, next: Option<String>) -> Self {
        PageOutcome::Page { items, next }
    }
}

/// Items gathered by a page walk, plus the failure that stopped it early.
#[derive(Debug)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub pages: usize,
    pub failure: Option<ExtractError>,
}

impl<T> Paged<T> {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Walks every page of a collection, concatenating items in arrival order.
///
/// A failed request stops the walk; items collected before it are kept and
/// the error is returned alongside them. Nothing is retried here.
pub fn fetch_all_pages<T, F>(pagination: Pagination, operation: &str, mut fetch_page: F) -> Paged<T>
where
    F: FnMut(&PageState) -> Result<PageOutcome<T>, ExtractError>,
{
    let mut state = pagination.initial();
    let mut items = Vec::new();
    let mut pages = 0;

    loop {
        if pages >= MAX_PAGES {
            let failure = ExtractError::Transport {
                operation: operation.to_string(),
                status: None,
                message: format!("gave up after {} pages", MAX_PAGES),
            };
            warn!(operation, pages, "{}", failure);
            return Paged {
                items,
                pages,
                failure: Some(failure),
            };
        }

        match fetch_page(&state) {
            Err(e) => {
                warn!(operation, pages, collected = items.len(), "{}", e);
                return Paged {
                    items,
                    pages,
                    failure: Some(e),
                };
            }
            Ok(PageOutcome::Exhausted) => {
                debug!(operation, pages, "provider reported no more data");
                break;
            }
            Ok(PageOutcome::Page { items: page, next }) => {
                pages += 1;
                let page_len = page.len();
                items.extend(page);
                debug!(operation, page = pages, received = page_len, "fetched page");

                match state.advance(page_len, next) {
                    Some(following) => state = following,
                    None => break,
                }
            }
        }
    }

    Paged {
        items,
        pages,
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    type Script = VecDeque<Result<PageOutcome<u32>, ExtractError>>;

    fn run(pagination: Pagination, script: Script) -> (Paged<u32>, Vec<PageState>) {
        let mut script = script;
        let mut seen = Vec::new();
        let paged = fetch_all_pages(pagination, "test", |state| {
            seen.push(state.clone());
            script.pop_front().expect("fetcher called past the end of the script")
        });
        (paged, seen)
    }

    fn numbered(from: u32, count: u32) -> Vec<u32> {
        (from..from + count).collect()
    }

    fn failure() -> ExtractError {
        ExtractError::Transport {
            operation: "test".into(),
            status: Some(500),
            message: "boom".into(),
        }
    }

    #[test]
    fn offset_stops_on_short_page() {
        let script = VecDeque::from(vec![
            Ok(PageOutcome::page(numbered(0, 100), None)),
            Ok(PageOutcome::page(numbered(100, 40), None)),
        ]);
        let (paged, seen) = run(Pagination::offset(), script);

        assert!(paged.is_complete());
        assert_eq!(paged.pages, 2);
        assert_eq!(paged.items, numbered(0, 140));
        assert_eq!(
            seen,
            vec![
                PageState::Offset { start: 0, size: 100 },
                PageState::Offset { start: 100, size: 100 },
            ]
        );
    }

    #[test]
    fn offset_stops_on_empty_page_after_full_pages() {
        let script = VecDeque::from(vec![
            Ok(PageOutcome::page(numbered(0, 3), None)),
            Ok(PageOutcome::page(numbered(3, 3), None)),
            Ok(PageOutcome::page(vec![], None)),
        ]);
        let (paged, seen) = run(Pagination::Offset { size: 3 }, script);

        assert_eq!(seen.len(), 3);
        assert_eq!(paged.items, numbered(0, 6));
        assert_eq!(seen[2], PageState::Offset { start: 6, size: 3 });
    }

    #[test]
    fn continuation_token_is_echoed_until_absent() {
        let script = VecDeque::from(vec![
            Ok(PageOutcome::page(vec![1, 2], Some("t1".into()))),
            Ok(PageOutcome::page(vec![3], Some("t2".into()))),
            Ok(PageOutcome::page(vec![4, 5], None)),
        ]);
        let (paged, seen) = run(Pagination::ContinuationToken, script);

        assert_eq!(paged.items, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            seen,
            vec![
                PageState::ContinuationToken(None),
                PageState::ContinuationToken(Some("t1".into())),
                PageState::ContinuationToken(Some("t2".into())),
            ]
        );
    }

    #[test]
    fn single_call_when_first_response_has_no_token() {
        let script = VecDeque::from(vec![Ok(PageOutcome::page(vec![7, 8, 9], None))]);
        let (paged, seen) = run(Pagination::ContinuationToken, script);

        assert_eq!(seen.len(), 1);
        assert_eq!(paged.items, vec![7, 8, 9]);
    }

    #[test]
    fn empty_token_ends_the_walk() {
        let script = VecDeque::from(vec![Ok(PageOutcome::page(vec![1], Some(String::new())))]);
        let (paged, seen) = run(Pagination::ContinuationToken, script);

        assert_eq!(seen.len(), 1);
        assert_eq!(paged.items, vec![1]);
    }

    #[test]
    fn cursor_advances_and_keeps_duplicates() {
        let script = VecDeque::from(vec![
            Ok(PageOutcome::page(vec![1, 1], Some("c1".into()))),
            Ok(PageOutcome::page(vec![1], None)),
        ]);
        let (paged, seen) = run(Pagination::Cursor, script);

        assert_eq!(paged.items, vec![1, 1, 1]);
        assert_eq!(seen[1].marker(), Some("c1"));
        assert_eq!(seen[1], PageState::Cursor(Some("c1".into())));
    }

    #[test]
    fn exhausted_signal_ends_cleanly() {
        let script = VecDeque::from(vec![
            Ok(PageOutcome::page(vec![1, 2], Some("c1".into()))),
            Ok(PageOutcome::Exhausted),
        ]);
        let (paged, seen) = run(Pagination::Cursor, script);

        assert!(paged.is_complete());
        assert_eq!(seen.len(), 2);
        assert_eq!(paged.items, vec![1, 2]);
    }

    #[test]
    fn failure_keeps_items_gathered_so_far() {
        let script = VecDeque::from(vec![
            Ok(PageOutcome::page(numbered(0, 100), None)),
            Err(failure()),
        ]);
        let (paged, seen) = run(Pagination::offset(), script);

        assert_eq!(seen.len(), 2);
        assert_eq!(paged.pages, 1);
        assert_eq!(paged.items.len(), 100);
        assert!(matches!(paged.failure, Some(ExtractError::Transport { status: Some(500), .. })));
    }

    #[test]
    fn endless_tokens_stop_at_the_page_ceiling() {
        let mut calls = 0;
        let paged = fetch_all_pages(Pagination::ContinuationToken, "test", |_| {
            calls += 1;
            Ok(PageOutcome::page(vec![calls], Some("again".to_string())))
        });

        assert_eq!(calls, MAX_PAGES as u32);
        assert_eq!(paged.pages, MAX_PAGES);
        assert_eq!(paged.items.len(), MAX_PAGES);
        assert_eq!(paged.items.last(), Some(&(MAX_PAGES as u32)));
        match paged.failure {
            Some(ExtractError::Transport { status: None, message, .. }) => {
                assert!(message.contains("10000 pages"))
            }
            other => panic!("expected page ceiling failure, got {:?}", other),
        }
    }

    #[test]
    fn failure_on_first_page_yields_nothing() {
        let script = VecDeque::from(vec![Err(failure())]);
        let (paged, _) = run(Pagination::ContinuationToken, script);

        assert_eq!(paged.pages, 0);
        assert!(paged.items.is_empty());
        assert!(!paged.is_complete());
    }
}
