//! Declared component description and the resources derived from it

use std::collections::{BTreeMap, BTreeSet};

use devpush_fs::checksum::compute_bytes_checksum;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::resource::{COMPONENT_LABEL, Resource, ResourceKind};
use crate::{Error, Result};

fn default_sync_path() -> String {
    "/projects".to_string()
}

/// Where the component's source comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Local,
    Binary,
    Git,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMount {
    pub name: String,
    /// Quantity such as `1Gi` or `500M`
    pub size: String,
    pub mount_path: String,
}

/// The user's declared intent for one component.
///
/// Read-only input to reconciliation. Field order is stable, so the JSON
/// rendering (and with it [`ComponentSpec::spec_hash`]) is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub source_type: SourceType,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub storage: Vec<StorageMount>,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub run_command: Option<String>,
    #[serde(default = "default_sync_path")]
    pub sync_path: String,
}

impl ComponentSpec {
    /// Minimal spec with defaults for everything but name and image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::default(),
            image: image.into(),
            ports: Vec::new(),
            env: BTreeMap::new(),
            storage: Vec::new(),
            build_command: None,
            run_command: None,
            sync_path: default_sync_path(),
        }
    }

    /// Reject specs that cannot be turned into valid resources.
    pub fn validate(&self) -> Result<()> {
        check_dns_label("component name", &self.name)?;
        if self.image.trim().is_empty() {
            return Err(Error::invalid_spec("image must not be empty"));
        }
        check_absolute("sync_path", &self.sync_path)?;

        let mut port_names = BTreeSet::new();
        let mut port_numbers = BTreeSet::new();
        for port in &self.ports {
            check_dns_label("port name", &port.name)?;
            if port.container_port == 0 {
                return Err(Error::invalid_spec(format!(
                    "port '{}' must be non-zero",
                    port.name
                )));
            }
            if !port_names.insert(port.name.as_str()) {
                return Err(Error::invalid_spec(format!(
                    "duplicate port name '{}'",
                    port.name
                )));
            }
            if !port_numbers.insert((port.container_port, port.protocol as u8)) {
                return Err(Error::invalid_spec(format!(
                    "duplicate container port {}",
                    port.container_port
                )));
            }
        }

        let mut storage_names = BTreeSet::new();
        for mount in &self.storage {
            check_dns_label("storage name", &mount.name)?;
            if !storage_names.insert(mount.name.as_str()) {
                return Err(Error::invalid_spec(format!(
                    "duplicate storage name '{}'",
                    mount.name
                )));
            }
            check_absolute("mount_path", &mount.mount_path)?;
            if !is_quantity(&mount.size) {
                return Err(Error::invalid_spec(format!(
                    "storage '{}' has invalid size '{}'",
                    mount.name, mount.size
                )));
            }
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(Error::invalid_spec(format!("invalid env name '{key}'")));
            }
        }
        Ok(())
    }

    /// `sha256:<hex>` over the canonical JSON rendering.
    pub fn spec_hash(&self) -> Result<String> {
        Ok(compute_bytes_checksum(&serde_json::to_vec(self)?))
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(COMPONENT_LABEL.to_string(), self.name.clone())])
    }

    fn claim_name(&self, mount: &StorageMount) -> String {
        format!("{}-{}", self.name, mount.name)
    }

    /// Resources this spec deploys as, in apply order.
    ///
    /// One claim per storage mount, one deployment, and a service only when
    /// ports are declared.
    pub fn desired_resources(&self) -> Vec<Resource> {
        let labels = self.labels();
        let mut desired = Vec::new();

        for mount in &self.storage {
            desired.push(Resource {
                kind: ResourceKind::PersistentVolumeClaim,
                name: self.claim_name(mount),
                labels: labels.clone(),
                spec: json!({
                    "accessModes": ["ReadWriteOnce"],
                    "resources": { "requests": { "storage": mount.size } },
                }),
            });
        }

        desired.push(Resource {
            kind: ResourceKind::Deployment,
            name: self.name.clone(),
            labels: labels.clone(),
            spec: self.deployment_spec(&labels),
        });

        if !self.ports.is_empty() {
            let ports: Vec<Value> = self
                .ports
                .iter()
                .map(|p| {
                    json!({
                        "name": p.name,
                        "port": p.container_port,
                        "targetPort": p.container_port,
                        "protocol": p.protocol,
                    })
                })
                .collect();
            desired.push(Resource {
                kind: ResourceKind::Service,
                name: self.name.clone(),
                labels: labels.clone(),
                spec: json!({ "selector": labels, "ports": ports }),
            });
        }

        desired
    }

    fn deployment_spec(&self, labels: &BTreeMap<String, String>) -> Value {
        let env: Vec<Value> = self
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        let ports: Vec<Value> = self
            .ports
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "containerPort": p.container_port,
                    "protocol": p.protocol,
                })
            })
            .collect();
        let mounts: Vec<Value> = self
            .storage
            .iter()
            .map(|m| json!({ "name": m.name, "mountPath": m.mount_path }))
            .collect();
        let volumes: Vec<Value> = self
            .storage
            .iter()
            .map(|m| {
                json!({
                    "name": m.name,
                    "persistentVolumeClaim": { "claimName": self.claim_name(m) },
                })
            })
            .collect();

        let mut container = json!({
            "name": self.name,
            "image": self.image,
            "env": env,
            "ports": ports,
            "volumeMounts": mounts,
            "workingDir": self.sync_path,
        });
        if let Some(run) = &self.run_command {
            container["command"] = json!(["sh", "-c", run]);
        }

        json!({
            "replicas": 1,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": {
                    "labels": labels,
                    "annotations": { "devpush.io/source-type": self.source_type },
                },
                "spec": {
                    "containers": [container],
                    "volumes": volumes,
                },
            },
        })
    }
}

fn check_dns_label(what: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= 63
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_spec(format!(
            "{what} '{value}' must be a lowercase DNS label"
        )))
    }
}

/// Absolute, no `..` segments, portable filename characters only.
fn check_absolute(what: &str, value: &str) -> Result<()> {
    if !value.starts_with('/') || value.split('/').any(|seg| seg == "..") {
        return Err(Error::invalid_spec(format!(
            "{what} '{value}' must be an absolute path"
        )));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-')))
    {
        return Err(Error::invalid_spec(format!(
            "{what} '{value}' contains unsupported character {bad:?}"
        )));
    }
    Ok(())
}

/// Digits with an optional decimal or binary unit suffix.
fn is_quantity(value: &str) -> bool {
    const SUFFIXES: [&str; 13] = [
        "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "k", "M", "G", "T", "P", "E", "",
    ];
    SUFFIXES.iter().any(|suffix| {
        value
            .strip_suffix(suffix)
            .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
    })
}
