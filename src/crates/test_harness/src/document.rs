//! Typed model of the engine's plugin configuration file.
//!
//! Field names serialize to the engine's JSON format (`plugin`, `specFile`,
//! `resources`, `statusCode`, `staticData`, ...). Documents are checked by
//! [`PluginConfig::validate`] before they are written, so a malformed
//! configuration fails in the test process instead of inside the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Level key for requests that omit a required security scheme.
pub const SECURITY_MISSING_LEVEL: &str = "validation.request.security.missing";
/// Level key for requests that present an invalid security scheme.
pub const SECURITY_INVALID_LEVEL: &str = "validation.request.security.invalid";

/// Engine behaviour mode, selected once per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Rest,
    OpenApi,
    Soap,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Rest => "rest",
            PluginKind::OpenApi => "openapi",
            PluginKind::Soap => "soap",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = HarnessError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rest" => Ok(PluginKind::Rest),
            "openapi" => Ok(PluginKind::OpenApi),
            "soap" => Ok(PluginKind::Soap),
            other => Err(HarnessError::UnknownPlugin(other.to_string())),
        }
    }
}

/// HTTP method a resource responds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a captured value is read from in the incoming request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureSource {
    PathParam(String),
    QueryParam(String),
    RequestHeader(String),
    JsonPath(String),
}

impl CaptureSource {
    fn selector(&self) -> &str {
        match self {
            CaptureSource::PathParam(name)
            | CaptureSource::QueryParam(name)
            | CaptureSource::RequestHeader(name)
            | CaptureSource::JsonPath(name) => name,
        }
    }
}

/// A named extraction rule, optionally redirected into a named store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(flatten)]
    pub source: CaptureSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

/// The single body source of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseBody {
    StaticData(String),
    StaticFile(String),
    /// Only meaningful with the `openapi` plugin.
    ExampleName(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(flatten)]
    pub body: Option<ResponseBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    pub path: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capture: BTreeMap<String, CaptureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseConfig>,
}

impl ResourceConfig {
    pub fn new(path: impl Into<String>, method: Method) -> Self {
        Self {
            path: path.into(),
            method,
            capture: BTreeMap::new(),
            response: None,
        }
    }
}

/// Severity the engine assigns to a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationLevel {
    Error,
    Warn,
    Ignore,
}

/// Request validation policy of the `openapi` plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub request: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub levels: BTreeMap<String, ValidationLevel>,
}

impl ValidationConfig {
    /// Validate requests, reporting security-scheme findings at the given levels.
    pub fn requests(missing: ValidationLevel, invalid: ValidationLevel) -> Self {
        let mut levels = BTreeMap::new();
        levels.insert(SECURITY_MISSING_LEVEL.to_string(), missing);
        levels.insert(SECURITY_INVALID_LEVEL.to_string(), invalid);
        Self {
            request: true,
            levels,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self::requests(ValidationLevel::Warn, ValidationLevel::Warn)
    }
}

const DOCUMENT_KEYS: &[&str] = &["plugin", "specFile", "resources", "validation"];
const RESOURCE_KEYS: &[&str] = &["path", "method", "capture", "response"];
const VALIDATION_KEYS: &[&str] = &["request", "levels"];
const RESPONSE_BODY_KEYS: &[&str] = &["staticData", "staticFile", "exampleName"];
const RESPONSE_KEYS: &[&str] = &["statusCode", "headers", "template"];
const CAPTURE_SOURCE_KEYS: &[&str] = &["pathParam", "queryParam", "requestHeader", "jsonPath"];
const CAPTURE_KEYS: &[&str] = &["store"];

/// Reject keys outside the modelled set and ambiguous flattened variants.
///
/// Serde drops unknown keys next to a flattened field and keeps only the first
/// matching variant, so raw documents are checked before deserializing.
fn check_keys(document: &serde_json::Value) -> HarnessResult<()> {
    check_object(document, "document", &[DOCUMENT_KEYS])?;
    if let Some(validation) = document.get("validation") {
        check_object(validation, "validation", &[VALIDATION_KEYS])?;
    }

    let Some(resources) = document.get("resources").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    for (index, resource) in resources.iter().enumerate() {
        let context = format!("resources[{index}]");
        check_object(resource, &context, &[RESOURCE_KEYS])?;

        if let Some(response) = resource.get("response") {
            let context = format!("{context}.response");
            check_object(response, &context, &[RESPONSE_KEYS, RESPONSE_BODY_KEYS])?;
            if count_keys(response, RESPONSE_BODY_KEYS) > 1 {
                return Err(HarnessError::invalid(format!(
                    "{context} has more than one of {}",
                    RESPONSE_BODY_KEYS.join("/")
                )));
            }
        }

        let Some(captures) = resource.get("capture").and_then(|c| c.as_object()) else {
            continue;
        };
        for (item, capture) in captures {
            let context = format!("{context}.capture.{item}");
            check_object(capture, &context, &[CAPTURE_KEYS, CAPTURE_SOURCE_KEYS])?;
            if count_keys(capture, CAPTURE_SOURCE_KEYS) != 1 {
                return Err(HarnessError::invalid(format!(
                    "{context} needs exactly one of {}",
                    CAPTURE_SOURCE_KEYS.join("/")
                )));
            }
        }
    }
    Ok(())
}

/// Non-objects are left for serde to report.
fn check_object(value: &serde_json::Value, context: &str, allowed: &[&[&str]]) -> HarnessResult<()> {
    let Some(object) = value.as_object() else {
        return Ok(());
    };
    match object
        .keys()
        .find(|key| !allowed.iter().any(|keys| keys.contains(&key.as_str())))
    {
        Some(key) => Err(HarnessError::invalid(format!("unknown key '{key}' in {context}"))),
        None => Ok(()),
    }
}

fn count_keys(value: &serde_json::Value, keys: &[&str]) -> usize {
    keys.iter().filter(|key| value.get(*key).is_some()).count()
}

/// Complete engine configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    pub plugin: PluginKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConfig>,
}

impl PluginConfig {
    pub fn new(plugin: PluginKind) -> Self {
        Self {
            plugin,
            spec_file: None,
            resources: Vec::new(),
            validation: None,
        }
    }

    /// Parse and validate a raw JSON document.
    pub fn from_value(value: serde_json::Value) -> HarnessResult<Self> {
        match value.get("plugin") {
            Some(serde_json::Value::String(name)) => {
                name.parse::<PluginKind>()?;
            }
            Some(other) => {
                return Err(HarnessError::invalid(format!(
                    "plugin must be a string, got {other}"
                )))
            }
            None => return Err(HarnessError::MissingPlugin),
        }

        check_keys(&value)?;
        let config: PluginConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> HarnessResult<()> {
        let openapi = self.plugin == PluginKind::OpenApi;

        if let Some(spec_file) = &self.spec_file {
            if !openapi {
                return Err(HarnessError::invalid(format!(
                    "specFile requires the openapi plugin, not {}",
                    self.plugin
                )));
            }
            if spec_file.is_empty() || spec_file.contains(['/', '\\']) {
                return Err(HarnessError::invalid(format!(
                    "specFile must be a file name, got '{spec_file}'"
                )));
            }
        }

        if self.validation.is_some() && !openapi {
            return Err(HarnessError::invalid(format!(
                "request validation requires the openapi plugin, not {}",
                self.plugin
            )));
        }

        for resource in &self.resources {
            if !resource.path.starts_with('/') {
                return Err(HarnessError::invalid(format!(
                    "resource path must start with '/': '{}'",
                    resource.path
                )));
            }

            for (item, capture) in &resource.capture {
                if item.is_empty() || capture.source.selector().is_empty() {
                    return Err(HarnessError::invalid(format!(
                        "capture on {} {} needs an item name and a source",
                        resource.method, resource.path
                    )));
                }
            }

            let Some(response) = &resource.response else {
                continue;
            };
            if let Some(code) = response.status_code {
                if !(100..=599).contains(&code) {
                    return Err(HarnessError::invalid(format!(
                        "status code {code} on {} {} is not a valid HTTP status",
                        resource.method, resource.path
                    )));
                }
            }
            if matches!(response.body, Some(ResponseBody::ExampleName(_))) && !openapi {
                return Err(HarnessError::invalid(format!(
                    "exampleName on {} {} requires the openapi plugin",
                    resource.method, resource.path
                )));
            }
        }

        Ok(())
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> HarnessResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the document to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> HarnessResult<()> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Read and validate a document previously written with [`PluginConfig::write_to`].
    pub fn read_from(path: &Path) -> HarnessResult<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_value(serde_json::from_str(&data)?)
    }
}
