//! Pagination over the two provider listing conventions
//!
//! Describe calls page by number and size and report a total count; tag
//! queries hand out an opaque continuation token. Both are expressed as
//! [`PageRequest`] / [`Page`] so a single driver can exhaust either.

use crate::error::{CloudError, Result};
use std::future::Future;

/// Default page size for numbered listings
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound on pages fetched by one listing, guards against a provider
/// that keeps handing out continuation tokens.
const MAX_PAGES: usize = 1000;

/// Position of a page within a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// 1-based page number and page size
    Number { number: u32, size: u32 },
    /// Continuation token; `None` requests the first page
    Token(Option<String>),
}

impl PageRequest {
    /// First page of a numbered listing
    pub fn first_numbered() -> Self {
        PageRequest::Number {
            number: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }

    /// First page of a token listing
    pub fn first_token() -> Self {
        PageRequest::Token(None)
    }
}

/// One page of results plus the request for the following page
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageRequest>,
}

impl<T> Page<T> {
    /// Page of a numbered listing; there is a next page while fewer than
    /// `total` items have been handed out.
    pub fn numbered(items: Vec<T>, number: u32, size: u32, total: u32) -> Self {
        let seen = u64::from(number) * u64::from(size);
        let next = if !items.is_empty() && seen < u64::from(total) {
            Some(PageRequest::Number {
                number: number + 1,
                size,
            })
        } else {
            None
        };
        Self { items, next }
    }

    /// Page of a token listing; an empty or missing token ends the listing.
    pub fn tokened(items: Vec<T>, next_token: Option<String>) -> Self {
        let next = next_token
            .filter(|t| !t.is_empty())
            .map(|t| PageRequest::Token(Some(t)));
        Self { items, next }
    }

    /// Single page holding everything
    pub fn complete(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Drive a listing to exhaustion and concatenate all pages
///
/// The convention is chosen by the shape of `first`.
pub async fn collect_all<T, F, Fut>(first: PageRequest, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut request = Some(first);
    let mut pages = 0usize;

    while let Some(current) = request.take() {
        pages += 1;
        if pages > MAX_PAGES {
            return Err(CloudError::UnexpectedStatus(format!(
                "listing did not terminate after {} pages",
                MAX_PAGES
            )));
        }

        let page = fetch(current.clone()).await?;
        items.extend(page.items);

        // A provider echoing the same cursor would loop forever.
        request = page.next.filter(|next| *next != current);
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_next() {
        let page = Page::numbered(vec![1, 2], 1, 2, 5);
        assert_eq!(page.next, Some(PageRequest::Number { number: 2, size: 2 }));

        let last = Page::numbered(vec![5], 3, 2, 5);
        assert!(last.next.is_none());

        let empty: Page<i32> = Page::numbered(vec![], 1, 2, 5);
        assert!(empty.next.is_none());
    }

    #[tokio::test]
    async fn test_collect_numbered() {
        let data: Vec<u32> = (0..7).collect();
        let all = collect_all(PageRequest::Number { number: 1, size: 3 }, |req| {
            let data = data.clone();
            async move {
                let PageRequest::Number { number, size } = req else {
                    panic!("unexpected request {:?}", req);
                };
                let start = ((number - 1) * size) as usize;
                let end = (start + size as usize).min(data.len());
                Ok(Page::numbered(
                    data[start..end].to_vec(),
                    number,
                    size,
                    data.len() as u32,
                ))
            }
        })
        .await
        .unwrap();
        assert_eq!(all, data);
    }

    #[tokio::test]
    async fn test_collect_token() {
        let all = collect_all(PageRequest::first_token(), |req| async move {
            match req {
                PageRequest::Token(None) => Ok(Page::tokened(vec!["a"], Some("t1".into()))),
                PageRequest::Token(Some(t)) if t == "t1" => {
                    Ok(Page::tokened(vec!["b", "c"], Some(String::new())))
                }
                other => panic!("unexpected request {:?}", other),
            }
        })
        .await
        .unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_collect_stops_on_repeated_cursor() {
        let all = collect_all(PageRequest::Token(Some("same".into())), |_| async {
            Ok(Page::tokened(vec![1], Some("same".into())))
        })
        .await
        .unwrap();
        assert_eq!(all, vec![1]);
    }

    #[tokio::test]
    async fn test_collect_propagates_error() {
        let result: Result<Vec<i32>> = collect_all(PageRequest::first_numbered(), |_| async {
            Err(CloudError::api("Forbidden", "nope"))
        })
        .await;
        assert!(result.is_err());
    }
}
