//! Fluent construction of mock configurations.
//!
//! ```no_run
//! use imposter_harness::{Method, MockManager};
//!
//! # async fn run() -> imposter_harness::HarnessResult<()> {
//! let mocks = MockManager::new();
//! let mut builder = mocks.builder()?.with_plugin("rest")?;
//! let mut users = builder.add_resource("/users/{userName}", Method::Post);
//! users.captures().from_path("userName");
//! users.responds(201).with_template_data("${request.userName} registered");
//!
//! let mock = builder.start().await?;
//! println!("mock listening at {}", mock.base_url()?);
//! mocks.stop_all();
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tracing::debug;

use crate::document::{
    CaptureConfig, CaptureSource, Method, PluginConfig, PluginKind, ResourceConfig,
    ResponseBody, ResponseConfig, ValidationConfig, ValidationLevel,
};
use crate::error::{HarnessError, HarnessResult};
use crate::manager::MockManager;
use crate::mock::ConfiguredMock;

/// Options applied when a builder writes its configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Include the serialized document in the debug log line.
    pub log_config: bool,
}

/// Describes one mock; [`MockBuilder::build`] writes it out and prepares the mock.
///
/// The configuration directory is allocated when the builder is created and
/// removed once the builder, or the mock built from it, is dropped.
#[derive(Debug)]
pub struct MockBuilder {
    manager: MockManager,
    workdir: TempDir,
    port: Option<u16>,
    env: BTreeMap<String, String>,
    plugin: Option<PluginKind>,
    spec_file: Option<String>,
    resources: Vec<ResourceConfig>,
    validation: Option<ValidationConfig>,
}

impl MockBuilder {
    pub(crate) fn new(manager: MockManager) -> HarnessResult<Self> {
        let workdir = tempfile::Builder::new().prefix("imposter").tempdir()?;
        Ok(Self {
            manager,
            workdir,
            port: None,
            env: BTreeMap::new(),
            plugin: None,
            spec_file: None,
            resources: Vec::new(),
            validation: None,
        })
    }

    /// Directory the configuration file and copied spec files are written to.
    pub fn config_dir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the environment passed to the engine, replacing earlier values.
    ///
    /// The engine only reads `IMPOSTER_*` variables and `JAVA_TOOL_OPTIONS`;
    /// other names are passed through with a warning.
    pub fn with_env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = env
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self
    }

    /// Add a single environment variable.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Select the plugin by name (`rest`, `openapi`, `soap`).
    pub fn with_plugin(self, plugin: &str) -> HarnessResult<Self> {
        let kind = plugin.parse()?;
        self.with_plugin_kind(kind)
    }

    /// Select the plugin. A document keeps the first plugin it was given.
    pub fn with_plugin_kind(mut self, plugin: PluginKind) -> HarnessResult<Self> {
        match self.plugin {
            Some(current) if current != plugin => Err(HarnessError::PluginConflict {
                current,
                requested: plugin,
            }),
            _ => {
                self.plugin = Some(plugin);
                Ok(self)
            }
        }
    }

    /// Copy an OpenAPI spec into the configuration directory and serve it.
    pub fn with_open_api_spec(self, spec_path: impl AsRef<Path>) -> HarnessResult<Self> {
        let spec_path = spec_path.as_ref();
        let mut builder = self.with_plugin_kind(PluginKind::OpenApi)?;

        let file_name = spec_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                HarnessError::invalid(format!("no file name in spec path {}", spec_path.display()))
            })?
            .to_string();
        fs::copy(spec_path, builder.workdir.path().join(&file_name))?;
        builder.spec_file = Some(file_name);
        Ok(builder)
    }

    /// Validate requests against the OpenAPI spec, reporting security findings as warnings.
    pub fn with_request_validation(self) -> HarnessResult<Self> {
        self.with_request_validation_levels(ValidationLevel::Warn, ValidationLevel::Warn)
    }

    /// Validate requests with explicit levels for missing and invalid security schemes.
    pub fn with_request_validation_levels(
        self,
        missing: ValidationLevel,
        invalid: ValidationLevel,
    ) -> HarnessResult<Self> {
        let mut builder = self.with_plugin_kind(PluginKind::OpenApi)?;
        builder.validation = Some(ValidationConfig::requests(missing, invalid));
        Ok(builder)
    }

    /// Replace the whole document.
    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.plugin = Some(config.plugin);
        self.spec_file = config.spec_file;
        self.resources = config.resources;
        self.validation = config.validation;
        self
    }

    /// Replace the whole document with raw engine JSON, validated first.
    pub fn with_raw_config(self, config: serde_json::Value) -> HarnessResult<Self> {
        Ok(self.with_config(PluginConfig::from_value(config)?))
    }

    /// Append a resource and return a handle for its captures and response.
    pub fn add_resource(&mut self, path: impl Into<String>, method: Method) -> ResourceHandle<'_> {
        let index = self.resources.len();
        self.resources.push(ResourceConfig::new(path, method));
        ResourceHandle {
            resource: &mut self.resources[index],
        }
    }

    /// Validated snapshot of the document as it would be written.
    pub fn document(&self) -> HarnessResult<PluginConfig> {
        let plugin = self.plugin.ok_or(HarnessError::MissingPlugin)?;
        let config = PluginConfig {
            plugin,
            spec_file: self.spec_file.clone(),
            resources: self.resources.clone(),
            validation: self.validation.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration file and prepare an unstarted mock for it.
    pub fn build(self) -> HarnessResult<ConfiguredMock> {
        self.build_with(BuildOptions::default())
    }

    pub fn build_with(self, options: BuildOptions) -> HarnessResult<ConfiguredMock> {
        let config = self.document()?;
        let MockBuilder {
            manager,
            workdir,
            port,
            env,
            ..
        } = self;

        let config_path = workdir
            .path()
            .join(&manager.engine_config().config_file_name);
        config.write_to(&config_path)?;
        if options.log_config {
            debug!(path = %config_path.display(), config = %config.to_json_pretty()?, "wrote mock config");
        } else {
            debug!(path = %config_path.display(), "wrote mock config");
        }

        Ok(manager.prepare_owned(workdir, port, env))
    }

    /// Convenience for `build()?.start()`.
    pub async fn start(self) -> HarnessResult<ConfiguredMock> {
        self.build()?.start().await
    }
}

/// A resource appended by [`MockBuilder::add_resource`].
#[derive(Debug)]
pub struct ResourceHandle<'a> {
    resource: &'a mut ResourceConfig,
}

impl<'a> ResourceHandle<'a> {
    pub fn with_path(self, path: impl Into<String>) -> Self {
        self.resource.path = path.into();
        self
    }

    pub fn with_method(self, method: Method) -> Self {
        self.resource.method = method;
        self
    }

    /// Capture rules for this resource; rules accumulate across calls.
    pub fn captures(&mut self) -> CaptureRules<'_> {
        CaptureRules {
            capture: &mut self.resource.capture,
        }
    }

    /// Start a fresh response with the given status code.
    pub fn responds(&mut self, status_code: u16) -> ResponseBuilder<'_> {
        let response = self.resource.response.insert(ResponseConfig::default());
        ResponseBuilder { response }.with_status_code(status_code)
    }
}

/// Named extraction rules of one resource.
#[derive(Debug)]
pub struct CaptureRules<'a> {
    capture: &'a mut BTreeMap<String, CaptureConfig>,
}

impl<'a> CaptureRules<'a> {
    /// Capture a path parameter under its own name.
    pub fn from_path(self, param: &str) -> Self {
        self.capture(param, CaptureSource::PathParam(param.to_string()), None)
    }

    /// Capture a query parameter under its own name.
    pub fn from_query(self, param: &str) -> Self {
        self.capture(param, CaptureSource::QueryParam(param.to_string()), None)
    }

    /// Capture a request header under its own name.
    pub fn from_header(self, header: &str) -> Self {
        self.capture(header, CaptureSource::RequestHeader(header.to_string()), None)
    }

    /// Capture a JSONPath expression evaluated against the body, as `body`.
    pub fn from_body_json_path(self, json_path: &str) -> Self {
        self.capture("body", CaptureSource::JsonPath(json_path.to_string()), None)
    }

    /// Capture a path parameter as `item`, optionally into a named store.
    pub fn from_path_into(self, param: &str, item: &str, store: Option<&str>) -> Self {
        self.capture(item, CaptureSource::PathParam(param.to_string()), store)
    }

    pub fn from_query_into(self, param: &str, item: &str, store: Option<&str>) -> Self {
        self.capture(item, CaptureSource::QueryParam(param.to_string()), store)
    }

    pub fn from_header_into(self, header: &str, item: &str, store: Option<&str>) -> Self {
        self.capture(item, CaptureSource::RequestHeader(header.to_string()), store)
    }

    pub fn from_body_json_path_into(self, json_path: &str, item: &str, store: Option<&str>) -> Self {
        self.capture(item, CaptureSource::JsonPath(json_path.to_string()), store)
    }

    /// Capture `source` as `item`, optionally into a named store instead of the request store.
    pub fn capture(self, item: &str, source: CaptureSource, store: Option<&str>) -> Self {
        self.capture.insert(
            item.to_string(),
            CaptureConfig {
                source,
                store: store.map(str::to_string),
            },
        );
        self
    }
}

/// Response of one resource.
#[derive(Debug)]
pub struct ResponseBuilder<'a> {
    response: &'a mut ResponseConfig,
}

impl<'a> ResponseBuilder<'a> {
    pub fn with_status_code(self, status_code: u16) -> Self {
        self.response.status_code = Some(status_code);
        self
    }

    pub fn with_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.insert(name.into(), value.into());
        self
    }

    /// Respond with inline data.
    pub fn with_data(self, data: impl Into<String>) -> Self {
        self.response.body = Some(ResponseBody::StaticData(data.into()));
        self
    }

    /// Respond with a file relative to the configuration directory.
    pub fn with_file(self, file_path: impl Into<String>) -> Self {
        self.response.body = Some(ResponseBody::StaticFile(file_path.into()));
        self
    }

    /// Respond with a named example from the OpenAPI spec.
    pub fn with_example_name(self, example_name: impl Into<String>) -> Self {
        self.response.body = Some(ResponseBody::ExampleName(example_name.into()));
        self
    }

    /// Render the body as a template using captured values.
    pub fn template(self, is_template: bool) -> Self {
        self.response.template = Some(is_template);
        self
    }

    /// Same as `with_data(data).template(true)`.
    pub fn with_template_data(self, data: impl Into<String>) -> Self {
        self.with_data(data).template(true)
    }

    /// Same as `with_file(path).template(true)`.
    pub fn with_template_file(self, file_path: impl Into<String>) -> Self {
        self.with_file(file_path).template(true)
    }
}
