//! Source platform API

use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::json;
use crate::pagination::{NextPage, PageCursor};
use crate::platforms::{CheckEndpoint, DownloadEndpoint, EntityEndpoints, ParentListEndpoint};
use crate::store::NewEntity;
use crate::template::{self, TemplateContext};
use crate::types::{EntityRef, EntityType};
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Read side of the migration: paginated listings and binary downloads
pub struct SourceApi {
    client: HttpClient,
    project: String,
}

impl SourceApi {
    /// Create a source API wrapper scoped to one project
    pub fn new(client: HttpClient, project: impl Into<String>) -> Self {
        Self {
            client,
            project: project.into(),
        }
    }

    /// Verify connectivity and credentials
    pub async fn check(&self, endpoint: &CheckEndpoint) -> Result<()> {
        super::run_check(&self.client, &self.context(), endpoint).await
    }

    /// Fetch one page of an entity listing
    ///
    /// Pagination parameters come from the cursor, which is advanced in
    /// place; the caller persists it with the page in one transaction.
    pub async fn fetch_page(
        &self,
        entity_type: EntityType,
        endpoints: &EntityEndpoints,
        cursor: &mut PageCursor,
    ) -> Result<(Vec<NewEntity>, NextPage)> {
        let list = endpoints.list.as_ref().ok_or_else(|| {
            Error::config(format!("no list endpoint for entity type '{entity_type}'"))
        })?;

        let ctx = self.context();
        let path = template::render(&list.path, &ctx)?;
        let mut req = RequestConfig::new();
        for (key, value) in &list.params {
            let rendered = template::render(value, &ctx)?;
            if !rendered.is_empty() {
                req = req.query(key, &rendered);
            }
        }
        for (key, value) in list.pagination.params(cursor) {
            req = req.query(&key, &value);
        }

        let body: Value = self
            .client
            .request_json(list.method.into(), &path, req)
            .await?;

        let items = json::extract_array(&body, &list.items_path)?;
        let fetched = items.len();
        let entities = items
            .into_iter()
            .filter_map(|item| entity_from_item(entity_type, endpoints, item))
            .collect();
        let next = list.pagination.advance(&body, fetched, cursor);
        Ok((entities, next))
    }

    /// List child entities under one parent (attachment listings)
    ///
    /// The parent is injected as a reference on every returned entity, since
    /// parent-scoped listings rarely repeat it in the items.
    pub async fn list_children(
        &self,
        entity_type: EntityType,
        endpoints: &EntityEndpoints,
        endpoint: &ParentListEndpoint,
        parent: &EntityRef,
    ) -> Result<Vec<NewEntity>> {
        let mut ctx = self.context();
        ctx.set_vars(json!({
            "project": self.project,
            "parent_id": parent.source_id,
        }));

        let path = template::render(&endpoint.path, &ctx)?;
        let mut req = RequestConfig::new();
        for (key, value) in &endpoint.params {
            let rendered = template::render(value, &ctx)?;
            if !rendered.is_empty() {
                req = req.query(key, &rendered);
            }
        }

        let body: Value = self
            .client
            .request_json(reqwest::Method::GET, &path, req)
            .await?;

        let items = json::extract_array(&body, &endpoint.items_path)?;
        Ok(items
            .into_iter()
            .filter_map(|item| entity_from_item(entity_type, endpoints, item))
            .map(|entity| {
                let mut refs = vec![parent.clone()];
                refs.extend(entity.parent_refs.clone());
                entity.with_refs(refs)
            })
            .collect())
    }

    /// Stream a binary download to a local file, returning the byte count
    pub async fn download(
        &self,
        endpoint: &DownloadEndpoint,
        source_id: &str,
        target: &Path,
    ) -> Result<u64> {
        let mut ctx = self.context();
        ctx.set_vars(json!({
            "project": self.project,
            "id": source_id,
        }));
        let path = template::render(&endpoint.path, &ctx)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(&path).await?;
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Error::Http)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    fn context(&self) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        ctx.set_vars(json!({ "project": self.project }));
        ctx
    }
}

/// Build a stageable entity from one listed item
///
/// Items without a resolvable source ID cannot be staged or reported; they
/// are skipped with a warning rather than failing the page.
fn entity_from_item(
    entity_type: EntityType,
    endpoints: &EntityEndpoints,
    item: Value,
) -> Option<NewEntity> {
    let Some(source_id) = json::extract_string(&item, &endpoints.id_path) else {
        warn!(
            entity_type = %entity_type,
            id_path = %endpoints.id_path,
            "skipping item without a source ID"
        );
        return None;
    };

    let refs: Vec<EntityRef> = endpoints
        .refs
        .iter()
        .filter_map(|ref_path| {
            json::extract_string(&item, &ref_path.path)
                .map(|parent_id| EntityRef::new(ref_path.entity_type, parent_id))
        })
        .collect();

    Some(NewEntity::new(source_id, item).with_refs(refs))
}
