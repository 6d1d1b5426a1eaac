//! Registry credentials from docker-config pull secrets.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;

use crate::{EdgeTaskError, Result, ShareLock, edge::backend::CredentialProvider};

const DEFAULT_REGISTRY: &str = "docker.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Default)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Deserialize, Default)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl DockerAuthEntry {
    fn credentials(&self) -> Result<Option<RegistryAuth>> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(Some(RegistryAuth {
                username: username.clone(),
                password: password.clone(),
            }));
        }
        let Some(auth) = &self.auth else {
            return Ok(None);
        };
        let decoded = STANDARD.decode(auth).map_err(|e| EdgeTaskError::Convert(format!("invalid registry auth: {}", e)))?;
        let decoded = String::from_utf8(decoded)?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| EdgeTaskError::Convert("registry auth is not user:password".to_string()))?;
        Ok(Some(RegistryAuth {
            username: username.to_string(),
            password: password.to_string(),
        }))
    }
}

/// Registry host of an image reference; `nginx:latest` lives on docker.io.
fn registry_of(image: &str) -> &str {
    match image.split_once('/') {
        Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => host,
        _ => DEFAULT_REGISTRY,
    }
}

/// Strips scheme and path from a docker-config `auths` key.
fn normalize_registry(key: &str) -> &str {
    let key = key.trim_start_matches("https://").trim_start_matches("http://");
    let host = key.split('/').next().unwrap_or(key);
    if host == "index.docker.io" || host == "registry-1.docker.io" { DEFAULT_REGISTRY } else { host }
}

/// Pull secrets keyed by `namespace/name`, holding `.dockerconfigjson` documents.
#[derive(Clone, Default)]
pub struct DockerConfigCredentials {
    secrets: ShareLock<HashMap<String, String>>,
}

impl DockerConfigCredentials {
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert(
        &self,
        secret: &str,
        docker_config_json: &str,
    ) {
        self.secrets.write().unwrap().insert(secret.to_string(), docker_config_json.to_string());
    }
}

impl CredentialProvider for DockerConfigCredentials {
    fn lookup(
        &self,
        secret: &str,
        image: &str,
    ) -> Result<Option<RegistryAuth>> {
        let raw = self.secrets.read().unwrap().get(secret).cloned().ok_or_else(|| EdgeTaskError::NotFound(format!("pull secret {}", secret)))?;
        let config: DockerConfig = serde_json::from_str(&raw)?;

        let registry = registry_of(image);
        match config.auths.iter().find(|(key, _)| normalize_registry(key) == registry) {
            Some((_, entry)) => entry.credentials(),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use base64::{Engine, engine::general_purpose::STANDARD};

    use super::{DockerConfigCredentials, registry_of};
    use crate::edge::backend::CredentialProvider;

    #[test]
    fn test_registry_of() {
        assert_eq!(registry_of("nginx:latest"), "docker.io");
        assert_eq!(registry_of("library/nginx"), "docker.io");
        assert_eq!(registry_of("harbor.example.com/app/web:1.0"), "harbor.example.com");
        assert_eq!(registry_of("localhost:5000/web"), "localhost:5000");
    }

    #[test]
    fn test_lookup() {
        let creds = DockerConfigCredentials::new();
        let auth = STANDARD.encode("robot:s3cret");
        creds.insert(
            "default/pull-secret",
            &format!(r#"{{"auths":{{"https://index.docker.io/v1/":{{"auth":"{}"}},"harbor.example.com":{{"username":"u","password":"p"}}}}}}"#, auth),
        );

        let hub = creds.lookup("default/pull-secret", "nginx:latest").unwrap().unwrap();
        assert_eq!(hub.username, "robot");
        assert_eq!(hub.password, "s3cret");

        let harbor = creds.lookup("default/pull-secret", "harbor.example.com/app/web:1.0").unwrap().unwrap();
        assert_eq!(harbor.username, "u");

        assert_eq!(creds.lookup("default/pull-secret", "quay.io/app").unwrap(), None);
        assert!(creds.lookup("default/missing", "nginx:latest").is_err());
    }
}
