use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

pub const DEFAULT_DOCUMENT_PATH: &str = "custom-recipes.json";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Document path cannot be empty")]
    EmptyDocumentPath,

    #[error("Branch cannot be empty")]
    EmptyBranch,

    #[error("Filesystem store base_dir cannot be empty")]
    EmptyBaseDir,

    #[error("Invalid {name}: {reason}")]
    InvalidOverride { name: &'static str, reason: String },
}

/// Recipe upsert service configuration
#[derive(Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener for upsert requests
    pub listener: Listener,
    /// Listener for health and readiness probes
    pub admin_listener: Listener,
    /// Shared secret the admin UI submits as `password`. Requests are always
    /// rejected while this is unset.
    pub admin_password: Option<String>,
    pub cors: CorsConfig,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::new("127.0.0.1", 8080),
            admin_listener: Listener::new("127.0.0.1", 8081),
            admin_password: None,
            cors: CorsConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listener", &self.listener)
            .field("admin_listener", &self.admin_listener)
            .field("admin_password", &redacted(&self.admin_password))
            .field("cors", &self.cors)
            .field("store", &self.store)
            .finish()
    }
}

impl Config {
    /// Validates the service configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.store.validate()
    }

    /// Applies environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ValidationError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    /// Empty values are treated as unset.
    ///
    /// Recognized variables: `ADMIN_PASSWORD`, `ALLOWED_ORIGINS` (comma
    /// separated), `GITHUB_PATH`, `GITHUB_BRANCH`, and for the GitHub store
    /// `GITHUB_TOKEN`, `GITHUB_OWNER`, `GITHUB_REPO`, `GITHUB_API_URL`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(password) = get("ADMIN_PASSWORD") {
            self.admin_password = Some(password);
        }

        if let Some(origins) = get("ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(path) = get("GITHUB_PATH") {
            self.store.path = path;
        }

        if let Some(branch) = get("GITHUB_BRANCH") {
            self.store.branch = branch;
        }

        match &mut self.store.backend {
            StoreBackend::Github(github) => {
                if let Some(token) = get("GITHUB_TOKEN") {
                    github.token = Some(token);
                }
                if let Some(owner) = get("GITHUB_OWNER") {
                    github.owner = Some(owner);
                }
                if let Some(repo) = get("GITHUB_REPO") {
                    github.repo = Some(repo);
                }
                if let Some(api_url) = get("GITHUB_API_URL") {
                    github.api_url =
                        Url::parse(&api_url).map_err(|e| ValidationError::InvalidOverride {
                            name: "GITHUB_API_URL",
                            reason: e.to_string(),
                        })?;
                }
            }
            StoreBackend::Filesystem { .. } => {
                if get("GITHUB_TOKEN").is_some() || get("GITHUB_OWNER").is_some() {
                    tracing::debug!("Ignoring GitHub overrides for the filesystem store");
                }
            }
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn new(host: &str, port: u16) -> Self {
        Listener {
            host: host.into(),
            port,
        }
    }

    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Cross-origin policy. An empty allowlist allows every origin.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

/// Where the recipe document lives.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Path of the document inside the store
    #[serde(default = "default_document_path")]
    pub path: String,
    /// Branch the document is read from and committed to
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(flatten)]
    pub backend: StoreBackend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: default_document_path(),
            branch: default_branch(),
            backend: StoreBackend::Github(GitHubConfig::default()),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.path.trim_matches('/').is_empty() {
            return Err(ValidationError::EmptyDocumentPath);
        }
        if self.branch.is_empty() {
            return Err(ValidationError::EmptyBranch);
        }
        if let StoreBackend::Filesystem { base_dir } = &self.backend
            && base_dir.as_os_str().is_empty()
        {
            return Err(ValidationError::EmptyBaseDir);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreBackend {
    /// Contents API of a GitHub repository
    Github(GitHubConfig),
    /// Local directory, one subdirectory per branch
    Filesystem { base_dir: PathBuf },
}

/// GitHub coordinates. Every field may be missing at startup; requests fail
/// with a configuration error until token, owner and repo are all set.
#[derive(Clone, Deserialize, PartialEq)]
pub struct GitHubConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: Url,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        GitHubConfig {
            token: None,
            owner: None,
            repo: None,
            api_url: default_api_url(),
        }
    }
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &redacted(&self.token))
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("api_url", &self.api_url.as_str())
            .finish()
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

fn default_document_path() -> String {
    DEFAULT_DOCUMENT_PATH.into()
}

fn default_branch() -> String {
    DEFAULT_BRANCH.into()
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_GITHUB_API_URL).expect("default GitHub API URL is valid")
}
