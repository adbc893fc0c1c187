//! Platform API wrappers
//!
//! [`SourceApi`] and [`DestinationApi`] sit between the pipeline and the
//! [`HttpClient`](crate::http::HttpClient). They render endpoint templates
//! from the platform profile, attach pagination parameters, and turn raw
//! response bodies into typed values: new entities on the way out of the
//! source, destination IDs on the way into the destination. Retries, rate
//! limiting and auth all live a level below, in the client.

mod dest;
mod source;

pub use dest::DestinationApi;
pub use source::SourceApi;

use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::platforms::CheckEndpoint;
use crate::template::{self, TemplateContext};

/// Hit a profile's check endpoint and verify the expected status
async fn run_check(
    client: &HttpClient,
    ctx: &TemplateContext,
    endpoint: &CheckEndpoint,
) -> Result<()> {
    let path = template::render(&endpoint.path, ctx)?;
    let mut req = RequestConfig::new();
    for (key, value) in &endpoint.params {
        req = req.query(key, template::render(value, ctx)?);
    }

    let response = client.get_with_config(&path, req).await?;
    let status = response.status().as_u16();
    if status != endpoint.expect_status {
        return Err(Error::auth(format!(
            "connectivity check to '{path}' returned {status}, expected {}",
            endpoint.expect_status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
