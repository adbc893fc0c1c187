//! Destination platform API

use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::json;
use crate::platforms::{CheckEndpoint, CreateEndpoint, DeleteEndpoint, ParentUploadEndpoint};
use crate::template::{self, TemplateContext};
use bytes::Bytes;
use serde_json::{json, Value};

/// Write side of the migration: creates, uploads and compensating deletes
pub struct DestinationApi {
    client: HttpClient,
    project: String,
}

impl DestinationApi {
    /// Create a destination API wrapper scoped to one project
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

    /// Submit one entity payload, returning the new destination ID
    pub async fn create(&self, endpoint: &CreateEndpoint, payload: &Value) -> Result<String> {
        let ctx = self.context();
        let path = template::render(&endpoint.path, &ctx)?;

        let body: Value = self
            .client
            .request_json(
                endpoint.method.into(),
                &path,
                RequestConfig::new().json(payload.clone()),
            )
            .await?;

        json::extract_string(&body, &endpoint.id_path).ok_or_else(|| {
            Error::validation(format!(
                "create response from '{path}' has no ID at '{}'",
                endpoint.id_path
            ))
        })
    }

    /// Upload one binary under a parent entity, returning the new ID
    pub async fn upload(
        &self,
        endpoint: &ParentUploadEndpoint,
        parent_id: &str,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String> {
        let mut ctx = self.context();
        ctx.set_vars(json!({
            "project": self.project,
            "parent_id": parent_id,
        }));
        let path = template::render(&endpoint.path, &ctx)?;

        let req = RequestConfig::new()
            .bytes(data)
            .header("Content-Type", content_type)
            .header(
                "Content-Disposition",
                format!("attachment; filename=\"{name}\""),
            );

        let body: Value = self
            .client
            .request_json(reqwest::Method::POST, &path, req)
            .await?;

        json::extract_string(&body, &endpoint.id_path).ok_or_else(|| {
            Error::validation(format!(
                "upload response from '{path}' has no ID at '{}'",
                endpoint.id_path
            ))
        })
    }

    /// Compensating delete of an already-created entity
    ///
    /// A 404 is treated as success so a rollback that partially ran before a
    /// crash can be repeated.
    pub async fn delete(&self, endpoint: &DeleteEndpoint, dest_id: &str) -> Result<()> {
        let mut ctx = self.context();
        ctx.set_vars(json!({
            "project": self.project,
            "id": dest_id,
        }));
        let path = template::render(&endpoint.path, &ctx)?;

        match self.client.delete(&path).await {
            Ok(_) => Ok(()),
            Err(Error::HttpStatus { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn context(&self) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        ctx.set_vars(json!({ "project": self.project }));
        ctx
    }
}
