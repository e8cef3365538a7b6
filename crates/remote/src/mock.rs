//! In-memory content tree for testing.

use crate::error::{ErrorKind, Result};
use crate::models::{Library, Page, RemoteItem, Site};
use crate::source::TreeSource;
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory content tree for testing.
///
/// The tree is assembled with builder methods before being shared; listings
/// are paginated for real (page tokens are offsets), and every
/// `fetch_children` call is counted per node so tests can assert what was,
/// and was not, fetched.
///
/// # Examples
///
/// ```
/// use rove_remote::{Library, MockTree, RemoteItem, Site, TreeSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let tree = MockTree::default()
///     .with_site(Site::new("s1", "Finance", "https://contoso.example/sites/finance"))
///     .with_library(Library::new("l1", "s1", "Documents", "root"))
///     .with_children("root", [RemoteItem::file("f1", "q1.xlsx", "/q1.xlsx", 1024)]);
/// let children = tree.list_children("root", 100).await.unwrap();
/// assert_eq!(children.len(), 1);
/// assert_eq!(tree.fetch_count("root").await, 1);
/// # }
/// ```
#[derive(Default)]
pub struct MockTree {
    sites: Vec<Site>,
    libraries: HashMap<String, Vec<Library>>,
    children: HashMap<String, Vec<RemoteItem>>,
    failing: HashMap<String, ErrorKind>,
    latency: Option<Duration>,
    fetches: RwLock<HashMap<String, u64>>,
    site_listings: AtomicU64,
    library_listings: AtomicU64,
}

impl MockTree {
    pub fn with_site(mut self, site: Site) -> Self {
        self.sites.push(site);
        self
    }

    pub fn with_library(mut self, library: Library) -> Self {
        self.libraries.entry(library.site_id.clone()).or_default().push(library);
        self
    }

    /// Append children to a node (the node itself need not be listed anywhere).
    pub fn with_children(mut self, parent_id: impl Into<String>, items: impl IntoIterator<Item = RemoteItem>) -> Self {
        self.children.entry(parent_id.into()).or_default().extend(items);
        self
    }

    /// Every listing of this node fails with the given error.
    pub fn with_failure(mut self, node_id: impl Into<String>, kind: ErrorKind) -> Self {
        self.failing.insert(node_id.into(), kind);
        self
    }

    /// Delay every listing call, to make concurrency observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// How many times `fetch_children` was called for a node (every page counts).
    pub async fn fetch_count(&self, node_id: &str) -> u64 {
        self.fetches.read().await.get(node_id).copied().unwrap_or(0)
    }

    /// Total `fetch_children` calls across all nodes.
    pub async fn total_fetches(&self) -> u64 {
        self.fetches.read().await.values().sum()
    }

    /// Nodes that were fetched at least once.
    pub async fn fetched_nodes(&self) -> HashSet<String> {
        self.fetches.read().await.keys().cloned().collect()
    }

    pub fn site_listings(&self) -> u64 {
        self.site_listings.load(Ordering::SeqCst)
    }

    pub fn library_listings(&self) -> u64 {
        self.library_listings.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl TreeSource for MockTree {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_sites(&self) -> Result<Vec<Site>> {
        self.site_listings.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        Ok(self.sites.clone())
    }

    async fn list_libraries(&self, site_id: &str) -> Result<Vec<Library>> {
        self.library_listings.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(kind) = self.failing.get(site_id) {
            exn::bail!(kind.clone());
        }
        Ok(self.libraries.get(site_id).cloned().unwrap_or_default())
    }

    async fn fetch_children(&self, node_id: &str, page_size: u32, page_token: Option<&str>) -> Result<Page> {
        *self.fetches.write().await.entry(node_id.to_string()).or_default() += 1;
        self.simulate_latency().await;
        if let Some(kind) = self.failing.get(node_id) {
            exn::bail!(kind.clone());
        }
        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .or_raise(|| ErrorKind::InvalidResponse(format!("bad page token {token:?}")))?,
            None => 0,
        };
        let children = self.children.get(node_id).map(Vec::as_slice).unwrap_or_default();
        let end = offset.saturating_add(page_size.max(1) as usize).min(children.len());
        let items = children.get(offset..end).map(<[RemoteItem]>::to_vec).unwrap_or_default();
        let next_page_token = (end < children.len()).then(|| end.to_string());
        Ok(Page { items, next_page_token })
    }
}
