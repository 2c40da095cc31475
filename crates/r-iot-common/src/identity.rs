//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Shared primitives and utilities for the simulation runtime."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while deriving an identity from a connection descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("connection string is empty")]
    Empty,
    #[error("connection string does not contain a {0} entry")]
    MissingKey(&'static str),
}

/// Identity of a simulated device or module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub host_name: String,
    pub device_id: String,
    #[serde(default)]
    pub module_id: Option<String>,
}

impl EntityIdentity {
    pub fn new(
        host_name: impl Into<String>,
        device_id: impl Into<String>,
        module_id: Option<String>,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            device_id: device_id.into(),
            module_id: module_id.filter(|id| !id.is_empty()),
        }
    }

    /// Parse a `HostName=...;DeviceId=...;[ModuleId=...;]SharedAccessKey=...`
    /// descriptor. Credentials are ignored.
    pub fn from_connection_string(descriptor: &str) -> Result<Self, IdentityError> {
        if descriptor.trim().is_empty() {
            return Err(IdentityError::Empty);
        }
        let host_name =
            extract_value(descriptor, "HostName").ok_or(IdentityError::MissingKey("HostName"))?;
        let device_id =
            extract_value(descriptor, "DeviceId").ok_or(IdentityError::MissingKey("DeviceId"))?;
        let module_id = extract_value(descriptor, "ModuleId");
        Ok(Self::new(host_name, device_id, module_id))
    }

    /// `deviceId`, or `deviceId/moduleId` for modules.
    pub fn artifact_id(&self) -> String {
        match &self.module_id {
            Some(module_id) => format!("{}/{}", self.device_id, module_id),
            None => self.device_id.clone(),
        }
    }

    pub fn is_module(&self) -> bool {
        self.module_id.is_some()
    }
}

impl fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.artifact_id(), self.host_name)
    }
}

fn extract_value(descriptor: &str, key: &str) -> Option<String> {
    descriptor
        .split(';')
        .filter_map(|segment| segment.split_once('='))
        .find(|(name, _)| name.trim() == key)
        .map(|(_, value)| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
