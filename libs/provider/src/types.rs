//! Wire types for the provider API.

use serde::{Deserialize, Serialize};

/// Droplet lifecycle status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropletStatus {
    New,
    Active,
    Off,
    Archive,
    #[serde(other)]
    Unknown,
}

impl DropletStatus {
    /// Returns true once the droplet has finished booting.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for DropletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropletStatus::New => write!(f, "new"),
            DropletStatus::Active => write!(f, "active"),
            DropletStatus::Off => write!(f, "off"),
            DropletStatus::Archive => write!(f, "archive"),
            DropletStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A droplet as returned by list/get endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    pub status: DropletStatus,
    #[serde(default)]
    pub networks: Networks,
}

impl Droplet {
    /// Project the droplet into the record the pipeline works with.
    ///
    /// IPs come from the first v4 network entry tagged `public` and
    /// `private` respectively. A droplet with neither tag yields empty IPs
    /// rather than an error; some providers omit typed entries.
    pub fn to_record(&self) -> VmRecord {
        let mut public_ip = String::new();
        let mut private_ip = String::new();

        for network in &self.networks.v4 {
            match network.kind.as_str() {
                "public" if public_ip.is_empty() => public_ip = network.ip_address.clone(),
                "private" if private_ip.is_empty() => private_ip = network.ip_address.clone(),
                _ => {}
            }
        }

        VmRecord {
            id: self.id,
            name: self.name.clone(),
            public_ip,
            private_ip,
            status: self.status,
        }
    }
}

/// Networks attached to a droplet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

/// One v4 network entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkV4 {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// The pipeline's view of a droplet: identity plus addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRecord {
    pub id: u64,
    pub name: String,
    pub public_ip: String,
    pub private_ip: String,
    pub status: DropletStatus,
}

/// An uploaded SSH key.
#[derive(Debug, Clone, Deserialize)]
pub struct SshKey {
    pub id: u64,
    pub name: String,
    pub fingerprint: String,
}

/// A base image.
#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub id: u64,
    pub name: String,
    pub distribution: String,
}

/// A datacenter region.
#[derive(Debug, Clone, Deserialize)]
pub struct Region {
    pub slug: String,
    pub name: String,
}

/// A droplet size, with the regions that offer it.
#[derive(Debug, Clone, Deserialize)]
pub struct Size {
    pub slug: String,
    #[serde(default)]
    pub regions: Vec<String>,
}

/// A provider-tracked asynchronous operation.
#[derive(Debug, Clone, Deserialize)]
pub struct Action {
    pub id: u64,
    pub status: String,
}

impl Action {
    /// Returns true once the action has run to completion.
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

/// Request body for droplet creation.
#[derive(Debug, Clone, Serialize)]
pub struct CreateDropletRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: u64,
    pub ssh_keys: Vec<String>,
    pub private_networking: bool,
    pub backups: bool,
    pub ipv6: bool,
}

/// Droplet creation response: the droplet plus the creation action link.
///
/// This shape differs from list/get responses, which is why the resolver
/// re-fetches by name after creation instead of adopting this directly.
#[derive(Debug, Clone, Deserialize)]
pub struct DropletCreated {
    pub droplet: Droplet,
    pub links: ActionLinks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionLinks {
    #[serde(default)]
    pub actions: Vec<ActionLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionLink {
    pub id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_projection_picks_tagged_entries() {
        let json = r#"{
            "id": 3164444,
            "name": "alpha",
            "status": "active",
            "networks": {
                "v4": [
                    {"ip_address": "10.0.0.4", "type": "private"},
                    {"ip_address": "104.131.186.241", "type": "public"}
                ]
            }
        }"#;

        let droplet: Droplet = serde_json::from_str(json).unwrap();
        let record = droplet.to_record();
        assert_eq!(record.public_ip, "104.131.186.241");
        assert_eq!(record.private_ip, "10.0.0.4");
        assert!(record.status.is_active());
    }

    #[test]
    fn record_projection_tolerates_untyped_networks() {
        let json = r#"{
            "id": 1,
            "name": "alpha",
            "status": "new",
            "networks": {"v4": [{"ip_address": "1.2.3.4", "type": "floating"}]}
        }"#;

        let droplet: Droplet = serde_json::from_str(json).unwrap();
        let record = droplet.to_record();
        assert_eq!(record.public_ip, "");
        assert_eq!(record.private_ip, "");
    }

    #[test]
    fn unknown_status_deserializes() {
        let droplet: Droplet =
            serde_json::from_str(r#"{"id": 1, "name": "a", "status": "migrating"}"#).unwrap();
        assert_eq!(droplet.status, DropletStatus::Unknown);
        assert!(!droplet.status.is_active());
    }

    #[test]
    fn create_request_serializes_options() {
        let req = CreateDropletRequest {
            name: "alpha".into(),
            region: "sfo1".into(),
            size: "1gb".into(),
            image: 9801950,
            ssh_keys: vec!["aa:bb".into()],
            private_networking: false,
            backups: false,
            ipv6: false,
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"region\":\"sfo1\""));
        assert!(json.contains("\"ssh_keys\":[\"aa:bb\"]"));
        assert!(json.contains("\"private_networking\":false"));
    }
}
