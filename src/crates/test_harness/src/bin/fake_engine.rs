//! Stand-in for the `imposter` CLI used by the integration tests.
//!
//! Supports `version` and `up <dir> --port=<port>`, serving the resources of
//! the configuration file in `<dir>` plus the `/system/status` endpoint.
//!
//! Behaviour switches, read from the environment:
//! - `IMPOSTER_FAKE_VERSION`: CLI version reported by `version` (default `0.6.2`).
//! - `IMPOSTER_FAKE_EXIT_CODE`: exit with this code instead of serving.
//! - `IMPOSTER_FAKE_STARTUP_DELAY_MS`: answer 503 on the status endpoint for this long.
//! - `CUSTOM_FLAG`: echoed to stdout by `up`.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use imposter_harness::{
    CaptureSource, PluginConfig, ResourceConfig, ResponseBody, DEFAULT_CONFIG_FILE_NAME,
};
use tokio::net::TcpListener;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const REQUEST_STORE: &str = "request";

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("version") => {
            let version =
                std::env::var("IMPOSTER_FAKE_VERSION").unwrap_or_else(|_| "0.6.2".to_string());
            println!("imposter-cli {version}");
            println!("imposter-engine 4.2.1");
            Ok(())
        }
        Some("up") => up(&args[1..]).await,
        other => {
            eprintln!("unsupported command: {other:?}");
            std::process::exit(2);
        }
    }
}

async fn up(args: &[String]) -> Result<(), BoxError> {
    println!("fake engine args: {}", args.join(" "));

    let mut config_dir = None;
    let mut port = None;
    for arg in args {
        if let Some(value) = arg.strip_prefix("--port=") {
            port = Some(value.parse::<u16>()?);
        } else if let Some(value) = arg.strip_prefix("--config=") {
            println!("using project config {value}");
        } else if !arg.starts_with("--") {
            config_dir = Some(PathBuf::from(arg));
        }
    }
    let config_dir = config_dir.ok_or("missing configuration directory")?;
    let port = port.ok_or("missing --port")?;

    // Not an engine variable; echoed so callers can see it was passed through.
    if let Ok(flag) = std::env::var("CUSTOM_FLAG") {
        println!("CUSTOM_FLAG={flag}");
    }

    if let Ok(code) = std::env::var("IMPOSTER_FAKE_EXIT_CODE") {
        eprintln!("fake engine failing on purpose");
        std::process::exit(code.parse().unwrap_or(1));
    }

    let config = match PluginConfig::read_from(&config_dir.join(DEFAULT_CONFIG_FILE_NAME)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("cannot load configuration: {err}");
            std::process::exit(1);
        }
    };

    let delay = std::env::var("IMPOSTER_FAKE_STARTUP_DELAY_MS")
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or_default();

    let engine = Arc::new(Engine {
        config_dir,
        config,
        ready_at: Instant::now() + delay,
        stores: Mutex::new(BTreeMap::new()),
    });

    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
    println!("listening on http://localhost:{port}");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let engine = Arc::clone(&engine);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let engine = Arc::clone(&engine);
                async move { engine.handle(req).await }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                eprintln!("connection error: {err}");
            }
        });
    }
}

struct Engine {
    config_dir: PathBuf,
    config: PluginConfig,
    ready_at: Instant,
    // Named stores outlive a single request.
    stores: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl Engine {
    async fn handle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let path = req.uri().path().to_string();
        println!("{} {}", req.method(), path);

        if path == "/system/status" {
            return Ok(if Instant::now() >= self.ready_at {
                text(StatusCode::OK, "ok")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "starting")
            });
        }

        let matched = self.config.resources.iter().find_map(|resource| {
            (resource.method.as_str() == req.method().as_str())
                .then(|| match_path(&resource.path, &path))
                .flatten()
                .map(|params| (resource, params))
        });
        let Some((resource, params)) = matched else {
            return Ok(text(StatusCode::NOT_FOUND, "not found"));
        };

        let query = parse_query(req.uri().query());
        let headers: BTreeMap<String, String> = req
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => return Ok(text(StatusCode::BAD_REQUEST, &err.to_string())),
        };

        let request_store = self.capture(resource, &params, &query, &headers, &body);
        Ok(self.respond(resource, &request_store))
    }

    fn capture(
        &self,
        resource: &ResourceConfig,
        params: &BTreeMap<String, String>,
        query: &BTreeMap<String, String>,
        headers: &BTreeMap<String, String>,
        body: &Bytes,
    ) -> BTreeMap<String, String> {
        let json: Option<serde_json::Value> = serde_json::from_slice(body).ok();
        let mut request_store = BTreeMap::new();

        for (item, capture) in &resource.capture {
            let value = match &capture.source {
                CaptureSource::PathParam(name) => params.get(name).cloned(),
                CaptureSource::QueryParam(name) => query.get(name).cloned(),
                CaptureSource::RequestHeader(name) => headers.get(&name.to_ascii_lowercase()).cloned(),
                CaptureSource::JsonPath(expr) => json.as_ref().and_then(|json| json_path(json, expr)),
            };
            let Some(value) = value else { continue };

            match capture.store.as_deref() {
                None | Some(REQUEST_STORE) => {
                    request_store.insert(item.clone(), value);
                }
                Some(store) => {
                    let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
                    stores
                        .entry(store.to_string())
                        .or_default()
                        .insert(item.clone(), value);
                }
            }
        }
        request_store
    }

    fn respond(
        &self,
        resource: &ResourceConfig,
        request_store: &BTreeMap<String, String>,
    ) -> Response<Full<Bytes>> {
        let Some(response) = &resource.response else {
            return text(StatusCode::OK, "");
        };

        let body = match &response.body {
            Some(ResponseBody::StaticData(data)) => data.clone(),
            Some(ResponseBody::StaticFile(file)) => match read_file(&self.config_dir, file) {
                Ok(data) => data,
                Err(err) => return text(StatusCode::INTERNAL_SERVER_ERROR, &err),
            },
            Some(ResponseBody::ExampleName(name)) => name.clone(),
            None => String::new(),
        };
        let body = if response.template.unwrap_or(false) {
            let stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
            render(&body, |store, key| {
                if store == REQUEST_STORE {
                    request_store.get(key).cloned()
                } else {
                    stores.get(store).and_then(|items| items.get(key)).cloned()
                }
            })
        } else {
            body
        };

        let status = response
            .status_code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK);
        let mut builder = Response::builder().status(status);
        for (name, value) in &response.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| text(StatusCode::INTERNAL_SERVER_ERROR, "bad response headers"))
    }
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
}

fn read_file(config_dir: &Path, file: &str) -> Result<String, String> {
    std::fs::read_to_string(config_dir.join(file)).map_err(|err| format!("{file}: {err}"))
}

/// Match `/users/{name}` style templates, returning the bound parameters.
fn match_path(template: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let template_segments: Vec<&str> = template.trim_end_matches('/').split('/').collect();
    let path_segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    if template_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = BTreeMap::new();
    for (expected, actual) in template_segments.iter().zip(&path_segments) {
        match expected.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => {
                params.insert(name.to_string(), actual.to_string());
            }
            None if expected == actual => {}
            None => return None,
        }
    }
    Some(params)
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Evaluate `$.a.b.0` style expressions.
fn json_path(json: &serde_json::Value, expr: &str) -> Option<String> {
    let mut current = json;
    for segment in expr.strip_prefix('$')?.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            other => other.get(segment)?,
        };
    }
    Some(match current {
        serde_json::Value::String(value) => value.clone(),
        other => other.to_string(),
    })
}

/// Replace `${store.key}` placeholders; unknown keys render empty.
fn render(template: &str, lookup: impl Fn(&str, &str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let expr = &after[..end];
        if let Some(value) = expr
            .split_once('.')
            .and_then(|(store, key)| lookup(store, key))
        {
            out.push_str(&value);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}
