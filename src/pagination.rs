use std::future::Future;

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_next_page: bool,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next_cursor: None, has_next_page: false }
    }

    pub fn with_next(items: Vec<T>, cursor: impl Into<String>) -> Self {
        Self { items, next_cursor: Some(cursor.into()), has_next_page: true }
    }
}

/// GitHub GraphQL caps repository connections at 100; 50 keeps responses
/// small enough to avoid server-side timeouts on large organizations.
pub const GRAPHQL_PAGE_SIZE: usize = 50;
pub const REST_PAGE_SIZE: usize = 100;

/// Drive `fetch` from an empty cursor until no next page remains, awaiting
/// `on_page` for each page before fetching the next. A fetch error aborts the
/// walk; nothing about the cursor is kept, so a retry starts over.
pub async fn paginate<T, E, F, Fut, H, HFut>(mut fetch: F, mut on_page: H) -> Result<usize, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
    H: FnMut(Vec<T>) -> HFut,
    HFut: Future<Output = ()>,
{
    let mut cursor = None;
    let mut seen = 0;
    loop {
        let page = fetch(cursor.take()).await?;
        seen += page.items.len();
        on_page(page.items).await;
        if !page.has_next_page {
            break;
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(seen)
}

/// Accumulate every item of a paginated listing.
pub async fn collect_pages<T, E, F, Fut>(fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    let mut all = Vec::new();
    paginate(fetch, |items| {
        all.extend(items);
        std::future::ready(())
    })
    .await?;
    Ok(all)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn numbered(cursor: Option<String>) -> Result<Page<u32>, String> {
        match cursor.as_deref() {
            None => Ok(Page::with_next(vec![1, 2], "c1")),
            Some("c1") => Ok(Page::with_next(vec![3], "c2")),
            Some("c2") => Ok(Page::last(vec![4, 5])),
            Some(other) => Err(format!("unexpected cursor {other}")),
        }
    }

    #[tokio::test]
    async fn walks_until_last_page() {
        let items = collect_pages(|c| async move { numbered(c) }).await.unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn pages_are_handled_in_order() {
        let seen = Mutex::new(Vec::new());
        let total = paginate(
            |c| async move { numbered(c) },
            |items| {
                seen.lock().unwrap().push(items.len());
                async {}
            },
        )
        .await
        .unwrap();
        assert_eq!(total, 5);
        assert_eq!(*seen.lock().unwrap(), vec![2, 1, 2]);
    }

    #[tokio::test]
    async fn fetch_error_aborts() {
        let calls = Mutex::new(0);
        let result = collect_pages(|c| {
            *calls.lock().unwrap() += 1;
            async move {
                match c {
                    None => Ok(Page::with_next(vec![1u32], "bad")),
                    Some(_) => Err("rate limited".to_string()),
                }
            }
        })
        .await;
        assert_eq!(result.unwrap_err(), "rate limited");
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
