//! reqwest-backed [`ProfileApi`].

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{OwnProfile, ProfileApi};
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::escrow::EscrowPayload;
use crate::peers::PeerProfile;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactRequest<'a> {
    contact_id: &'a str,
}

/// Profile API over HTTPS with a cookie session
pub struct HttpProfileApi {
    client: Client,
    config: CoreConfig,
}

impl HttpProfileApi {
    /// Create a client for the node in `config`
    pub fn new(config: CoreConfig) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Use an existing client, e.g. one sharing a cookie jar with the host
    pub fn with_client(client: Client, config: CoreConfig) -> Self {
        Self { client, config }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.config.endpoint(path))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        tracing::debug!("{} {}", response.status(), response.url().path());
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let response = response.error_for_status()?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

#[async_trait]
impl ProfileApi for HttpProfileApi {
    async fn fetch_profile(&self) -> Result<Option<OwnProfile>> {
        let response = self.send(self.request(Method::POST, "/profile")).await?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        ) {
            return Ok(None);
        }
        Self::json(response).await
    }

    async fn fetch_escrow(&self) -> Result<EscrowPayload> {
        let response = self.send(self.request(Method::GET, "/profile/key")).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(EscrowPayload::Empty);
        }
        Self::json(response).await
    }

    async fn publish_escrow(&self, payload: &EscrowPayload) -> Result<()> {
        let response = self
            .send(self.request(Method::POST, "/profile/key").json(payload))
            .await?;
        response.error_for_status()?;
        Ok(())
    }

    async fn fetch_user_profile(&self, user_id: &str) -> Result<PeerProfile> {
        let path = format!("/api/user/{}/profile", user_id);
        let response = self.send(self.request(Method::POST, &path)).await?;
        Self::json(response).await
    }

    async fn fetch_contacts(&self) -> Result<Vec<String>> {
        let response = self
            .send(self.request(Method::POST, "/profile/contacts"))
            .await?;
        let contacts: Option<Vec<String>> = Self::json(response).await?;
        Ok(contacts.unwrap_or_default())
    }

    async fn add_contact(&self, contact_id: &str) -> Result<()> {
        let response = self
            .send(
                self.request(Method::POST, "/profile/addcontact")
                    .json(&ContactRequest { contact_id }),
            )
            .await?;
        response.error_for_status()?;
        Ok(())
    }

    async fn remove_contact(&self, contact_id: &str) -> Result<()> {
        let response = self
            .send(
                self.request(Method::POST, "/profile/removecontact")
                    .json(&ContactRequest { contact_id }),
            )
            .await?;
        response.error_for_status()?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let response = self
            .send(self.request(Method::DELETE, "/profile/logout"))
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}
