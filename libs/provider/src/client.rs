//! HTTP client for the provider API.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{
    Action, CreateDropletRequest, Droplet, DropletCreated, Image, Region, Size, SshKey,
};
use crate::ProviderError;

/// Production API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.digitalocean.com/v2";

/// Page size for list endpoints. One page is enough for a single-target
/// pipeline; nothing here paginates further.
const PAGE_SIZE: u32 = 250;

/// Error ids the provider embeds in response bodies, sometimes with a 2xx
/// status around them.
const SENTINEL_IDS: &[&str] = &["unauthorized", "unprocessable_entity", "forbidden"];

/// Provider API client.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl Client {
    /// Create a client against the production endpoint.
    pub fn new(token: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_base_url(token, DEFAULT_API_URL)
    }

    /// Create a client against an arbitrary endpoint (tests, mocks).
    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// List all droplets.
    pub async fn list_droplets(&self) -> Result<Vec<Droplet>, ProviderError> {
        let list: DropletList = self
            .get_json(&format!("/droplets?per_page={PAGE_SIZE}"), "droplet list")
            .await?;
        Ok(list.droplets)
    }

    /// Fetch one droplet by id.
    pub async fn get_droplet(&self, id: u64) -> Result<Droplet, ProviderError> {
        let envelope: DropletEnvelope =
            self.get_json(&format!("/droplets/{id}"), "droplet").await?;
        Ok(envelope.droplet)
    }

    /// Create a droplet. The response carries the creation action link.
    pub async fn create_droplet(
        &self,
        request: &CreateDropletRequest,
    ) -> Result<DropletCreated, ProviderError> {
        debug!(name = %request.name, region = %request.region, size = %request.size, "creating droplet");
        self.post_json("/droplets", request, "droplet create").await
    }

    /// Delete a droplet by id.
    pub async fn delete_droplet(&self, id: u64) -> Result<(), ProviderError> {
        self.delete(&format!("/droplets/{id}")).await
    }

    /// Fetch the status of a droplet action.
    pub async fn get_action(&self, droplet_id: u64, action_id: u64) -> Result<Action, ProviderError> {
        let envelope: ActionEnvelope = self
            .get_json(&format!("/droplets/{droplet_id}/actions/{action_id}"), "action")
            .await?;
        Ok(envelope.action)
    }

    /// List all uploaded SSH keys.
    pub async fn list_keys(&self) -> Result<Vec<SshKey>, ProviderError> {
        let list: KeyList = self
            .get_json(&format!("/account/keys?per_page={PAGE_SIZE}"), "key list")
            .await?;
        Ok(list.ssh_keys)
    }

    /// Upload a public key under the given name.
    pub async fn create_key(
        &self,
        name: &str,
        public_key: &str,
    ) -> Result<SshKey, ProviderError> {
        debug!(name = %name, "uploading ssh key");
        let envelope: KeyEnvelope = self
            .post_json(
                "/account/keys",
                &CreateKeyRequest { name, public_key },
                "key create",
            )
            .await?;
        Ok(envelope.ssh_key)
    }

    /// Delete an uploaded key by fingerprint.
    pub async fn delete_key(&self, fingerprint: &str) -> Result<(), ProviderError> {
        debug!(fingerprint = %fingerprint, "deleting ssh key");
        self.delete(&format!("/account/keys/{fingerprint}")).await
    }

    /// List all droplet sizes.
    pub async fn list_sizes(&self) -> Result<Vec<Size>, ProviderError> {
        let list: SizeList = self
            .get_json(&format!("/sizes?per_page={PAGE_SIZE}"), "size list")
            .await?;
        Ok(list.sizes)
    }

    /// List all base images.
    pub async fn list_images(&self) -> Result<Vec<Image>, ProviderError> {
        let list: ImageList = self
            .get_json(&format!("/images?per_page={PAGE_SIZE}"), "image list")
            .await?;
        Ok(list.images)
    }

    /// List all regions.
    pub async fn list_regions(&self) -> Result<Vec<Region>, ProviderError> {
        let list: RegionList = self
            .get_json(&format!("/regions?per_page={PAGE_SIZE}"), "region list")
            .await?;
        Ok(list.regions)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &'static str,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::decode(response, what).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        what: &'static str,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::decode(response, what).await
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .delete(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        Self::ensure_ok(status, &text)
    }

    /// Decode a response body, translating sentinel `id` fields and
    /// non-success statuses into [`ProviderError::Api`].
    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &'static str,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let text = response.text().await?;
        Self::ensure_ok(status, &text)?;
        serde_json::from_str(&text).map_err(|source| ProviderError::Decode { what, source })
    }

    /// Translate sentinel `id` fields and non-success statuses into
    /// [`ProviderError::Api`]. This is the single place sentinel ids are
    /// checked, for every verb including bodyless deletes.
    fn ensure_ok(status: reqwest::StatusCode, text: &str) -> Result<(), ProviderError> {
        // Sentinel bodies carry a string `id`; real resources carry a
        // numeric one, so this parse fails for them.
        if let Ok(body) = serde_json::from_str::<ErrorBody>(text) {
            if !status.is_success() || SENTINEL_IDS.contains(&body.id.as_str()) {
                return Err(ProviderError::Api {
                    id: body.id,
                    message: body.message,
                });
            }
        }

        if !status.is_success() {
            return Err(Self::api_error(status, text));
        }

        Ok(())
    }

    fn api_error(status: reqwest::StatusCode, text: &str) -> ProviderError {
        if let Ok(body) = serde_json::from_str::<ErrorBody>(text) {
            return ProviderError::Api {
                id: body.id,
                message: body.message,
            };
        }
        ProviderError::Api {
            id: status.as_u16().to_string(),
            message: text.to_string(),
        }
    }
}

/// Sentinel-shaped error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct CreateKeyRequest<'a> {
    name: &'a str,
    public_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct DropletList {
    droplets: Vec<Droplet>,
}

#[derive(Debug, Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    action: Action,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Deserialize)]
struct KeyEnvelope {
    ssh_key: SshKey,
}

#[derive(Debug, Deserialize)]
struct SizeList {
    sizes: Vec<Size>,
}

#[derive(Debug, Deserialize)]
struct ImageList {
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct RegionList {
    regions: Vec<Region>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use wiremock::matchers::{body_json_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> Client {
        Client::with_base_url("test-token", server.uri()).unwrap()
    }

    #[tokio::test]
    async fn lists_droplets_with_bearer_auth() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/droplets"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "droplets": [
                    {"id": 3164444, "name": "alpha", "status": "active",
                     "networks": {"v4": [{"ip_address": "104.131.186.241", "type": "public"}]}}
                ]
            })))
            .mount(&server)
            .await;

        let droplets = client(&server).await.list_droplets().await.unwrap();
        assert_eq!(droplets.len(), 1);
        assert_eq!(droplets[0].name, "alpha");
    }

    #[tokio::test]
    async fn sentinel_id_in_ok_body_is_an_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/droplets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "unauthorized",
                "message": "Unable to authenticate you."
            })))
            .mount(&server)
            .await;

        let err = client(&server).await.list_droplets().await.unwrap_err();
        match err {
            ProviderError::Api { id, message } => {
                assert_eq!(id, "unauthorized");
                assert!(message.contains("authenticate"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_success_status_is_an_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/droplets"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "id": "unprocessable_entity",
                "message": "You specified an invalid region for Droplet creation."
            })))
            .mount(&server)
            .await;

        let request = CreateDropletRequest {
            name: "alpha".into(),
            region: "nowhere9".into(),
            size: "1gb".into(),
            image: 1,
            ssh_keys: vec![],
            private_networking: false,
            backups: false,
            ipv6: false,
        };
        let err = client(&server)
            .await
            .create_droplet(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { ref id, .. } if id == "unprocessable_entity"));
    }

    #[tokio::test]
    async fn uploads_key_with_expected_body() {
        let server = MockServer::start().await;

        let expected = json!({"name": "deploy", "public_key": "ssh-rsa AAAA deploy"});
        Mock::given(method("POST"))
            .and(path("/account/keys"))
            .and(body_json_string(expected.to_string()))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "ssh_key": {"id": 512190, "name": "deploy", "fingerprint": "3b:16:bf:e4"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = client(&server)
            .await
            .create_key("deploy", "ssh-rsa AAAA deploy")
            .await
            .unwrap();
        assert_eq!(key.fingerprint, "3b:16:bf:e4");
    }

    #[tokio::test]
    async fn delete_key_accepts_no_content() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/account/keys/3b:16:bf:e4"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .await
            .delete_key("3b:16:bf:e4")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sentinel_id_in_ok_delete_body_is_an_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/account/keys/3b:16:bf:e4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "forbidden",
                "message": "You are not allowed to delete this key."
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .delete_key("3b:16:bf:e4")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { ref id, .. } if id == "forbidden"));
    }

    #[tokio::test]
    async fn action_status_round_trips() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/droplets/3164444/actions/36804636"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "action": {"id": 36804636, "status": "completed"}
            })))
            .mount(&server)
            .await;

        let action = client(&server)
            .await
            .get_action(3164444, 36804636)
            .await
            .unwrap();
        assert!(action.is_completed());
    }
}
