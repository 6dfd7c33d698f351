//! Page streams over the three pagination styles the GitHub API uses.
//!
//! Each function returns a lazy `Stream` of pages: nothing is requested until the stream is
//! polled, every request waits for the previous one, and the stream ends on the API's own
//! termination signal or after `max_pages` requests, whichever comes first. Streams are not
//! restartable; build a new one to walk the listing again.

use crate::config::RepoId;
use crate::error::{MetricsError, Result};
use crate::github::{GitHubClient, HistoryEdge};
use crate::transport::Transport;
use futures::stream::{self, Stream, TryStreamExt};
use serde::de::DeserializeOwned;

/// Offset pagination: pages `first_page, first_page + 1, ...` until one comes back empty.
pub fn offset_pages<'a, T, R, F>(
    client: &'a GitHubClient<T>,
    page_url: F,
    first_page: u32,
    max_pages: u32,
) -> impl Stream<Item = Result<Vec<R>>> + Send + 'a
where
    T: Transport,
    R: DeserializeOwned + Send + 'a,
    F: Fn(u32) -> String + Send + 'a,
{
    stream::try_unfold((first_page, 0u32), move |(page, fetched)| {
        next_offset_page(client, page_url(page), page, fetched, max_pages)
    })
}

async fn next_offset_page<T: Transport, R: DeserializeOwned>(
    client: &GitHubClient<T>,
    url: String,
    page: u32,
    fetched: u32,
    max_pages: u32,
) -> Result<Option<(Vec<R>, (u32, u32))>> {
    if fetched >= max_pages {
        tracing::warn!(
            url = %url,
            max_pages,
            "Hit page limit before an empty page. Data may be incomplete."
        );
        return Ok(None);
    }

    let items: Vec<R> = client.get_json(&url).await?;
    tracing::debug!(url = %url, items = items.len(), "Fetched offset page");
    if items.is_empty() {
        return Ok(None);
    }

    Ok(Some((items, (page + 1, fetched + 1))))
}

/// Link-header pagination: follow `rel="next"` verbatim until the server stops sending it.
pub fn link_pages<'a, T, R>(
    client: &'a GitHubClient<T>,
    first_url: String,
    max_pages: u32,
) -> impl Stream<Item = Result<Vec<R>>> + Send + 'a
where
    T: Transport,
    R: DeserializeOwned + Send + 'a,
{
    stream::try_unfold((Some(first_url), 0u32), move |(next, fetched)| {
        next_linked_page(client, next, fetched, max_pages)
    })
}

async fn next_linked_page<T: Transport, R: DeserializeOwned>(
    client: &GitHubClient<T>,
    next: Option<String>,
    fetched: u32,
    max_pages: u32,
) -> Result<Option<(Vec<R>, (Option<String>, u32))>> {
    let Some(url) = next else {
        return Ok(None);
    };
    if fetched >= max_pages {
        tracing::warn!(
            url = %url,
            max_pages,
            "Hit page limit with a next link still present. Data may be incomplete."
        );
        return Ok(None);
    }

    let page = client.get_page::<R>(&url).await?;
    tracing::debug!(url = %url, items = page.items.len(), "Fetched linked page");

    Ok(Some((page.items, (page.next, fetched + 1))))
}

#[derive(Clone, Debug)]
enum Cursor {
    Start,
    After(String),
}

/// Cursor pagination over a branch's commit history. Yields the author email of each commit
/// that has one.
///
/// Each request resumes after the last edge cursor of the previous page; the walk stops when
/// `pageInfo.hasNextPage` is false.
pub fn history_pages<'a, T>(
    client: &'a GitHubClient<T>,
    repo_id: &'a RepoId,
    branch: Option<&'a str>,
    max_pages: u32,
) -> impl Stream<Item = Result<Vec<String>>> + Send + 'a
where
    T: Transport,
{
    stream::try_unfold((Some(Cursor::Start), 0u32), move |(cursor, fetched)| {
        next_history_page(client, repo_id, branch, cursor, fetched, max_pages)
    })
}

async fn next_history_page<T: Transport>(
    client: &GitHubClient<T>,
    repo_id: &RepoId,
    branch: Option<&str>,
    cursor: Option<Cursor>,
    fetched: u32,
    max_pages: u32,
) -> Result<Option<(Vec<String>, (Option<Cursor>, u32))>> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };
    if fetched >= max_pages {
        tracing::warn!(
            repo_id = %repo_id,
            max_pages,
            "Hit page limit with more history remaining. Data may be incomplete."
        );
        return Ok(None);
    }

    let after = match &cursor {
        Cursor::Start => None,
        Cursor::After(after) => Some(after.as_str()),
    };
    let history = client.commit_history(repo_id, branch, after).await?;
    tracing::debug!(repo_id = %repo_id, edges = history.edges.len(), "Fetched history page");

    let next = if history.page_info.has_next_page {
        let last = history.edges.last().ok_or_else(|| MetricsError::Shape {
            url: client.graphql_url(),
            detail: "hasNextPage is set on a page without edges".to_string(),
        })?;
        Some(Cursor::After(last.cursor.clone()))
    } else {
        None
    };

    // Commits without an author email do not count towards anyone's share.
    let emails = history
        .edges
        .into_iter()
        .filter_map(HistoryEdge::author_email)
        .collect();

    Ok(Some((emails, (next, fetched + 1))))
}

/// Drains a page stream into one sequence, in page order.
pub async fn collect_pages<R>(pages: impl Stream<Item = Result<Vec<R>>>) -> Result<Vec<R>> {
    pages.try_concat().await
}
