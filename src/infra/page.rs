use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::extract::extract_task_ids;
use crate::domain::ticket::TicketId;
use crate::error::{AppError, AppResult};
use crate::services::PageService;

static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<script\b[^>]*\bsrc\s*=\s*["']([^"']+)["']"#).expect("script pattern")
});
static LINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<link\b[^>]*>").expect("link pattern"));
static STYLESHEET_REL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\brel\s*=\s*["']?stylesheet\b"#).expect("rel pattern")
});
static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']+)["']"#).expect("href pattern"));

/// Picks a scanner for `source`: URLs are fetched, anything else is a path.
pub fn open_page(source: &str) -> AppResult<Arc<dyn PageService>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        Ok(Arc::new(HttpPageScanner::new(source)?))
    } else {
        Ok(Arc::new(FilePageScanner::new(source)))
    }
}

pub struct HttpPageScanner {
    http: Client,
    url: Url,
    resources: Mutex<HashMap<Url, BTreeSet<TicketId>>>,
}

impl HttpPageScanner {
    pub fn new(url: &str) -> AppResult<Self> {
        let url = Url::parse(url)
            .map_err(|err| AppError::Configuration(format!("invalid page URL '{url}': {err}")))?;
        Ok(Self {
            http: Client::new(),
            url,
            resources: Mutex::new(HashMap::new()),
        })
    }

    async fn fetch_text(&self, url: &Url) -> AppResult<String> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| AppError::Network(format!("failed to fetch {url}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Network(format!("{url} responded with {status}")));
        }
        response
            .text()
            .await
            .map_err(|err| AppError::Network(format!("failed to read {url}: {err}")))
    }
}

#[async_trait]
impl PageService for HttpPageScanner {
    async fn scan_for_task_ids(&self) -> AppResult<BTreeSet<TicketId>> {
        let html = self.fetch_text(&self.url).await?;
        let mut ids = extract_task_ids(&html);

        let mut resources = self.resources.lock().await;
        for resource in resource_urls(&html, &self.url) {
            if !resources.contains_key(&resource) {
                let found = match self.fetch_text(&resource).await {
                    Ok(text) => extract_task_ids(&text),
                    Err(error) => {
                        warn!(resource = %resource, error = %error, "failed to fetch page resource");
                        BTreeSet::new()
                    }
                };
                debug!(resource = %resource, count = found.len(), "scanned page resource");
                resources.insert(resource.clone(), found);
            }
            if let Some(found) = resources.get(&resource) {
                ids.extend(found.iter().cloned());
            }
        }
        Ok(ids)
    }

    async fn highlight_selector(&self, selector: &str) {
        info!(page = %self.url, selector, "highlight requested");
    }
}

/// Absolute URLs of every `<script src>` and stylesheet `<link href>` in `html`.
pub fn resource_urls(html: &str, base: &Url) -> Vec<Url> {
    let scripts = SCRIPT_SRC
        .captures_iter(html)
        .filter_map(|captures| captures.get(1).map(|m| m.as_str()));
    let stylesheets = LINK_TAG
        .find_iter(html)
        .map(|tag| tag.as_str())
        .filter(|tag| STYLESHEET_REL.is_match(tag))
        .filter_map(|tag| HREF.captures(tag).and_then(|c| c.get(1)).map(|m| m.as_str()));

    let mut urls = Vec::new();
    for reference in scripts.chain(stylesheets) {
        match base.join(reference.trim()) {
            Ok(url) if !urls.contains(&url) => urls.push(url),
            Ok(_) => {}
            Err(err) => debug!(reference, error = %err, "skipping unresolvable resource"),
        }
    }
    urls
}

pub struct FilePageScanner {
    root: PathBuf,
}

impl FilePageScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PageService for FilePageScanner {
    async fn scan_for_task_ids(&self) -> AppResult<BTreeSet<TicketId>> {
        let mut ids = BTreeSet::new();
        let mut pending = vec![self.root.clone()];

        while let Some(path) = pending.pop() {
            let metadata = tokio::fs::metadata(&path).await?;
            if metadata.is_dir() {
                let mut entries = tokio::fs::read_dir(&path).await?;
                while let Some(entry) = entries.next_entry().await? {
                    pending.push(entry.path());
                }
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            ids.extend(extract_task_ids(&String::from_utf8_lossy(&bytes)));
        }
        Ok(ids)
    }

    async fn highlight_selector(&self, selector: &str) {
        info!(page = %self.root.display(), selector, "highlight requested");
    }
}
