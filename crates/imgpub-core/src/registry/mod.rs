//! Docker registry v2 tag listing with basic and bearer authentication.
//!
//! Any non-success answer from the registry or its token realm resolves to
//! an empty tag set: when registry state is unknown the safe decision is to
//! rebuild. Transport failures still propagate.

pub mod challenge;

pub use challenge::BearerChallenge;

use async_trait::async_trait;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::error::Result;
use crate::domain::{RegistryEndpoint, TagSet};

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Source of the tags currently published at a registry path.
#[async_trait]
pub trait TagLookup: Send + Sync {
    async fn tags(&self, path: &str) -> Result<TagSet>;
}

/// Client for `/v2/<path>/tags/list`.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
}

impl RegistryClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Bind the client to one endpoint for repeated lookups.
    pub fn bind<'a>(&'a self, endpoint: &'a RegistryEndpoint) -> EndpointTags<'a> {
        EndpointTags {
            client: self,
            endpoint,
        }
    }

    /// Tags published at `path` on `endpoint`.
    pub async fn tags(&self, endpoint: &RegistryEndpoint, path: &str) -> Result<TagSet> {
        let url = format!("{}/v2/{path}/tags/list", base_url(&endpoint.address));
        let response = self
            .client
            .get(&url)
            .basic_auth(&endpoint.user, Some(endpoint.password.expose()))
            .send()
            .await?;

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerChallenge::parse);

        let response = match challenge {
            Some(challenge) => {
                debug!(realm = %challenge.realm, scope = %challenge.scope, "Registry issued bearer challenge");
                let Some(token) = self.bearer_token(endpoint, &challenge).await? else {
                    return Ok(TagSet::new());
                };
                self.client.get(&url).bearer_auth(token).send().await?
            }
            None => response,
        };

        tag_set_from(response, &url).await
    }

    async fn bearer_token(
        &self,
        endpoint: &RegistryEndpoint,
        challenge: &BearerChallenge,
    ) -> Result<Option<String>> {
        let response = self
            .client
            .get(&challenge.realm)
            .query(&[
                ("service", challenge.service.as_str()),
                ("scope", challenge.scope.as_str()),
            ])
            .basic_auth(&endpoint.user, Some(endpoint.password.expose()))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(realm = %challenge.realm, status = status.as_u16(), body = %body, "Registry token request failed");
            return Ok(None);
        }

        match serde_json::from_str::<TokenResponse>(&body) {
            Ok(TokenResponse { token: Some(token), .. })
            | Ok(TokenResponse { access_token: Some(token), .. }) => Ok(Some(token)),
            Ok(_) => {
                warn!(realm = %challenge.realm, "Registry token response carried no token");
                Ok(None)
            }
            Err(e) => {
                warn!(realm = %challenge.realm, error = %e, "Registry token response is not valid JSON");
                Ok(None)
            }
        }
    }
}

async fn tag_set_from(response: Response, url: &str) -> Result<TagSet> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        warn!(url = %url, status = status.as_u16(), body = %body, "Registry request failed, assuming no tags");
        return Ok(TagSet::new());
    }

    match serde_json::from_str::<TagList>(&body) {
        Ok(list) => Ok(list.tags.unwrap_or_default().into_iter().collect()),
        Err(e) => {
            warn!(url = %url, error = %e, body = %body, "Registry tag list is not valid JSON, assuming no tags");
            Ok(TagSet::new())
        }
    }
}

/// Registry base URL; bare hosts are reached over https.
fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("https://{address}")
    }
}

/// A [`RegistryClient`] bound to one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointTags<'a> {
    client: &'a RegistryClient,
    endpoint: &'a RegistryEndpoint,
}

#[async_trait]
impl TagLookup for EndpointTags<'_> {
    async fn tags(&self, path: &str) -> Result<TagSet> {
        self.client.tags(self.endpoint, path).await
    }
}
