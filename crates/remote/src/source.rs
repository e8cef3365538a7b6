//! The remote listing collaborator.

use crate::error::Result;
use crate::models::{Library, Page, RemoteItem, Site};
use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

pub type ItemStream<'a> = Pin<Box<dyn Stream<Item = Result<RemoteItem>> + Send + 'a>>;

/// Read-only, paginated access to a tenant's content tree.
///
/// Implementations own their retry policy: rate limits and transient
/// failures should be retried internally, and only surface once the client
/// has given up. Whatever reaches the caller is treated as final for the node
/// it concerned.
///
/// # Examples
///
/// ```
/// use futures::TryStreamExt;
/// # use rove_remote::{TreeSource, error::Result};
/// # async fn example(source: &dyn TreeSource) -> Result<()> {
/// for site in source.list_sites().await? {
///     for library in source.list_libraries(&site.id).await? {
///         let mut children = source.children_stream(&library.root_folder_id, 200);
///         while let Some(item) = children.try_next().await? {
///             println!("{}: {}", library.name, item.path);
///         }
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait TreeSource: Send + Sync {
    /// Name of the source (used for logging only).
    fn name(&self) -> &str;

    async fn list_sites(&self) -> Result<Vec<Site>>;

    async fn list_libraries(&self, site_id: &str) -> Result<Vec<Library>>;

    /// Fetch one page of a node's direct children.
    ///
    /// Pass the previous page's `next_page_token` to continue; `None` starts
    /// from the beginning.
    async fn fetch_children(&self, node_id: &str, page_size: u32, page_token: Option<&str>) -> Result<Page>;

    /// Stream every direct child of a node, following page tokens.
    ///
    /// Items are yielded as each page arrives; an error ends the stream.
    fn children_stream<'a>(&'a self, node_id: &'a str, page_size: u32) -> ItemStream<'a> {
        Box::pin(stream! {
            let mut token: Option<String> = None;
            loop {
                let page = match self.fetch_children(node_id, page_size, token.as_deref()).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };
                for item in page.items {
                    yield Ok(item);
                }
                match page.next_page_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        })
    }

    /// Collect every direct child of a node into memory.
    ///
    /// Convenience wrapper around [`children_stream()`](Self::children_stream).
    async fn list_children(&self, node_id: &str, page_size: u32) -> Result<Vec<RemoteItem>> {
        self.children_stream(node_id, page_size).try_collect().await
    }
}
