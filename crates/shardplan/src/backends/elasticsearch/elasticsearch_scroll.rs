//! 📜 ElasticsearchScroll: one scroll cursor, one page in hand at a time.
//!
//! Opening runs the initial search (restricted by `preference`), so the first page is already
//! buffered. Later pages come from `POST /_search/scroll`. An empty page ends the cursor.
//! `close()` clears the server-side context once; a 404 there means it already expired,
//! which is the same outcome.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, trace, warn};

use super::{Credentials, json_body};
use crate::backends::ScrollStream;
use crate::cluster::NodeAddress;
use crate::common::Record;
use crate::query::QueryBuilder;
use crate::readers::ScrollReader;

#[derive(Debug)]
pub struct ElasticsearchScroll {
    http: reqwest::Client,
    credentials: Credentials,
    target: NodeAddress,
    reader: ScrollReader,
    keep_alive: String,
    scroll_id: Option<String>,
    buffer: VecDeque<Record>,
    exhausted: bool,
    closed: bool,
}

impl ElasticsearchScroll {
    pub(crate) async fn open(
        http: reqwest::Client,
        credentials: Credentials,
        target: NodeAddress,
        query: &QueryBuilder,
        reader: ScrollReader,
    ) -> Result<Self> {
        let path = query.search_path();
        debug!("📜 Opening scroll on [{}]: {}", target, path);
        let response = credentials
            .apply(http.post(format!("{}{}", target.base_url(), path)))
            .header("Content-Type", "application/json")
            .body(query.body().to_string())
            .send()
            .await
            .with_context(|| format!("💀 Initial scroll search to [{target}] never made it"))?;
        let body = json_body(response, "POST /_search?scroll").await?;
        let page = match reader.read_page(&body) {
            Ok(page) => page,
            Err(err) => {
                // -- 🧹 the server already holds a cursor for this search; nobody else can clear it
                if let Some(scroll_id) = body.get("_scroll_id").and_then(|id| id.as_str()) {
                    if let Err(clear_err) = clear_scroll(&http, &credentials, &target, scroll_id).await {
                        warn!("⚠️ Unreadable first page, and the scroll did not clear either: {:#}", clear_err);
                    }
                }
                return Err(err);
            }
        };
        trace!("📄 First page: {} record(s)", page.records.len());
        Ok(Self {
            http,
            credentials,
            target,
            reader,
            keep_alive: query.keep_alive().to_string(),
            exhausted: page.records.is_empty(),
            scroll_id: page.scroll_id,
            buffer: page.records.into(),
            closed: false,
        })
    }

    async fn fetch_next_page(&mut self) -> Result<()> {
        let Some(scroll_id) = self.scroll_id.clone() else {
            self.exhausted = true;
            return Ok(());
        };
        let response = self
            .credentials
            .apply(self.http.post(format!("{}/_search/scroll", self.target.base_url())))
            .header("Content-Type", "application/json")
            .body(json!({"scroll": self.keep_alive, "scroll_id": scroll_id}).to_string())
            .send()
            .await
            .with_context(|| format!("💀 Scroll continuation to [{}] never made it", self.target))?;
        let body = json_body(response, "POST /_search/scroll").await?;
        let page = self.reader.read_page(&body)?;
        trace!("📄 Next page: {} record(s)", page.records.len());
        if page.scroll_id.is_some() {
            self.scroll_id = page.scroll_id;
        }
        self.exhausted = page.records.is_empty();
        self.buffer.extend(page.records);
        Ok(())
    }
}

#[async_trait]
impl ScrollStream for ElasticsearchScroll {
    async fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_next_page().await?;
        }
        Ok(!self.buffer.is_empty())
    }

    async fn next(&mut self) -> Result<Option<Record>> {
        if self.closed {
            anyhow::bail!("💀 Pulled from a scroll on [{}] after close", self.target);
        }
        if self.has_next().await? {
            Ok(self.buffer.pop_front())
        } else {
            Ok(None)
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();
        let Some(scroll_id) = self.scroll_id.take() else {
            return Ok(());
        };
        clear_scroll(&self.http, &self.credentials, &self.target, &scroll_id).await
    }
}

/// 🗑️ `DELETE /_search/scroll` for one cursor. A 404 means it already expired.
async fn clear_scroll(
    http: &reqwest::Client,
    credentials: &Credentials,
    target: &NodeAddress,
    scroll_id: &str,
) -> Result<()> {
    let response = credentials
        .apply(http.delete(format!("{}/_search/scroll", target.base_url())))
        .header("Content-Type", "application/json")
        .body(json!({"scroll_id": [scroll_id]}).to_string())
        .send()
        .await
        .with_context(|| format!("💀 Clearing the scroll on [{target}] never made it"))?;
    match response.status() {
        status if status.is_success() => Ok(()),
        StatusCode::NOT_FOUND => {
            warn!("⚠️ Scroll context on [{}] had already expired", target);
            Ok(())
        }
        status => anyhow::bail!("💀 Clearing the scroll answered with status {status}"),
    }
}
