use crate::config::EffectiveConfig;
use crate::params::{FlatParams, ParamValue, flatten};
use crate::render::{Record, RenderValue};
use anyhow::{Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const USER_AGENT_VALUE: &str = concat!("baasctl/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message} (HTTP {status}{})", kind_suffix(.kind))]
    Status {
        status: u16,
        message: String,
        kind: Option<String>,
    },
}

fn kind_suffix(kind: &Option<String>) -> String {
    kind.as_deref().map(|k| format!(", {k}")).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ResponseData {
    pub status: u16,
    pub value: RenderValue,
}

/// How a request with a body sends its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    /// JSON, unless the parameters carry a file.
    Auto,
    Multipart,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
    project: String,
    key: Option<String>,
}

impl ApiClient {
    pub fn new(config: &EffectiveConfig) -> Result<Self> {
        let mut base = config.endpoint.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let parsed = Url::parse(&base).context("parsing endpoint URL")?;

        if config.self_signed {
            warn!(endpoint = %parsed, "TLS certificate verification is disabled");
        }
        let http = Client::builder()
            .user_agent(HeaderValue::from_static(USER_AGENT_VALUE))
            .danger_accept_invalid_certs(config.self_signed)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            base_url: parsed,
            http,
            project: config.project.clone(),
            key: config.key.clone(),
        })
    }

    pub fn send(
        &self,
        method: Method,
        path: &str,
        params: &ParamValue,
        encoding: BodyEncoding,
    ) -> Result<ResponseData> {
        let normalized = path.trim_start_matches('/');
        let url = self
            .base_url
            .join(normalized)
            .with_context(|| format!("joining path `{}` to endpoint", path))?;

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header("X-Project-Id", &self.project)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        if let Some(key) = &self.key {
            request = request.header("X-Api-Key", key);
        }

        request = attach_params(request, &method, params, encoding)?;

        debug!(%method, %url, "sending request");
        let response = request.send().context("sending request")?;

        let status = response.status();
        let text = response.text().context("reading response body")?;
        debug!(status = status.as_u16(), bytes = text.len(), "received response");

        if !status.is_success() {
            return Err(error_from_body(status, &text).into());
        }

        Ok(ResponseData {
            status: status.as_u16(),
            value: decode_body(&text),
        })
    }
}

fn attach_params(
    request: RequestBuilder,
    method: &Method,
    params: &ParamValue,
    encoding: BodyEncoding,
) -> Result<RequestBuilder> {
    if *method == Method::GET {
        let pairs = flatten(params, "").to_query_pairs()?;
        return Ok(if pairs.is_empty() {
            request
        } else {
            request.query(&pairs)
        });
    }

    if encoding == BodyEncoding::Multipart || params.contains_file() {
        let flat = flatten(params, "");
        debug!(fields = ?flat.keys().collect::<Vec<_>>(), "encoding multipart form");
        return Ok(request.multipart(multipart_form(&flat)?));
    }

    Ok(request.json(&params.to_json_value()?))
}

fn multipart_form(flat: &FlatParams) -> Result<Form> {
    let mut form = Form::new();
    for (key, value) in flat.iter() {
        if let ParamValue::File(file) = value {
            let part = Part::file(&file.path)
                .with_context(|| format!("opening {}", file.path.display()))?
                .file_name(file.file_name());
            form = form.part(key.to_string(), part);
        } else if let Some(text) = value.as_text() {
            form = form.text(key.to_string(), text);
        }
    }
    Ok(form)
}

/// Decodes a success body. Non-JSON bodies are kept as a plain string.
fn decode_body(text: &str) -> RenderValue {
    if text.trim().is_empty() {
        return RenderValue::Record(Record::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(json) => RenderValue::from_json(json),
        Err(err) => {
            debug!(error = %err, "response body is not JSON");
            RenderValue::Scalar(crate::render::Scalar::String(text.to_string()))
        }
    }
}

fn error_from_body(status: StatusCode, body: &str) -> ApiError {
    let json = serde_json::from_str::<Value>(body).ok();
    let message = json
        .as_ref()
        .and_then(|j| j.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    let kind = json
        .as_ref()
        .and_then(|j| j.get("type"))
        .and_then(|t| t.as_str())
        .map(str::to_string);

    ApiError::Status {
        status: status.as_u16(),
        message,
        kind,
    }
}
