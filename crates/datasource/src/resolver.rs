use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::{debug, instrument};

use weft_core::{
    ActionError, AuthDescriptor, AuthType, BindingResolver, BodyEncoding, DataSource,
    GraphqlOperation, GraphqlRequest, HttpMethod, IdentityTranslator, MultipartPart, PartValue,
    RequestBody, ResolvedRequest, TemplateBindingResolver, TokenProvider, Translator,
};

use crate::config::GlobalConfig;
use crate::registry::DataSourceRegistry;

const AUTHORIZATION: &str = "Authorization";
const CONTENT_TYPE: &str = "Content-Type";
const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Turns data-source descriptors into concrete request plans.
///
/// Resolution reads the descriptor and never writes to it.
#[derive(Clone)]
pub struct DataSourceResolver {
    bindings: Arc<dyn BindingResolver>,
    translator: Arc<dyn Translator>,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl std::fmt::Debug for DataSourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceResolver")
            .field("tokens", &self.tokens.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for DataSourceResolver {
    fn default() -> Self {
        Self::new(Arc::new(TemplateBindingResolver), Arc::new(IdentityTranslator))
    }
}

impl DataSourceResolver {
    pub fn new(bindings: Arc<dyn BindingResolver>, translator: Arc<dyn Translator>) -> Self {
        Self {
            bindings,
            translator,
            tokens: None,
        }
    }

    /// Use `tokens` as the source of the live session token.
    #[must_use]
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Look up `id` (screen-local first) and resolve it.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotFound`] before any other work when `id` is
    /// unknown.
    pub fn resolve_id(
        &self,
        registry: &DataSourceRegistry,
        local: &[DataSource],
        id: &str,
        global: &GlobalConfig,
        scope: &Value,
        body_override: Option<Value>,
    ) -> Result<ResolvedRequest, ActionError> {
        let ds = registry.find(id, local)?;
        self.resolve(&ds, global, scope, body_override)
    }

    /// Resolve `ds` against `scope`.
    ///
    /// `body_override` replaces the descriptor's body template (for GraphQL
    /// it is merged into the variables).
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Validation`] for descriptors that cannot form
    /// a request (no URL, GraphQL without a query).
    #[instrument(skip_all, fields(ds_id = %ds.id))]
    pub fn resolve(
        &self,
        ds: &DataSource,
        global: &GlobalConfig,
        scope: &Value,
        body_override: Option<Value>,
    ) -> Result<ResolvedRequest, ActionError> {
        let is_graphql = ds.method == Some(HttpMethod::Graphql) || ds.query.is_some();
        let body_template = body_override.clone().or_else(|| ds.body.clone());

        let method = match ds.method {
            Some(method) => method,
            None if is_graphql => HttpMethod::Graphql,
            None if body_template.is_some() => HttpMethod::Post,
            None => HttpMethod::Get,
        };

        let url = self.build_url(ds, global, scope)?;
        let mut request = ResolvedRequest::new(ds.id.clone(), method, url);
        request.credentials = ds.credentials;
        request.timeout = ds.timeout().or(global.default_timeout);
        request.retry = ds.retry.clone().or_else(|| global.default_retry.clone());
        request.subscription_protocol = ds.subscription_protocol;

        for (name, value) in &global.headers {
            request.set_header(name, self.resolve_str(value, scope));
        }
        for (name, value) in &ds.headers {
            request.set_header(name, self.resolve_str(value, scope));
        }

        if is_graphql {
            let query = ds.query.as_deref().ok_or_else(|| {
                ActionError::Validation(format!("data source '{}' has no GraphQL query", ds.id))
            })?;
            let mut variables = ds
                .variables
                .as_ref()
                .map(|v| self.resolve_value(v, scope))
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            if let Some(extra) = body_override.map(|v| self.resolve_value(&v, scope)) {
                merge_objects(&mut variables, extra);
            }
            let graphql = GraphqlRequest {
                operation: ds.operation.unwrap_or(GraphqlOperation::Query),
                query: query.to_owned(),
                variables,
            };
            if method != HttpMethod::Websocket {
                request.body = RequestBody::Json(graphql.wire_body());
                if !request.has_header(CONTENT_TYPE) {
                    request.set_header(CONTENT_TYPE, "application/json");
                }
            }
            request.graphql = Some(graphql);
        } else if method.has_body() {
            if let Some(template) = body_template {
                let body = self.resolve_value(&template, scope);
                self.apply_body(&mut request, ds.body_encoding, body)?;
            }
        }

        self.apply_auth(&mut request, ds.auth.as_ref(), global, scope);
        debug!(method = %request.method, url = %request.url, "resolved data source");
        Ok(request)
    }

    /// Attach the live session token as a bearer `Authorization` header
    /// unless one is already present. Returns whether a header was added.
    pub fn attach_session_token(&self, request: &mut ResolvedRequest) -> bool {
        if request.has_header(AUTHORIZATION) {
            return false;
        }
        match self.tokens.as_ref().and_then(|t| t.access_token()) {
            Some(token) if !token.is_empty() => {
                request.set_header(AUTHORIZATION, format!("Bearer {token}"));
                true
            }
            _ => false,
        }
    }

    fn resolve_value(&self, template: &Value, scope: &Value) -> Value {
        self.bindings.resolve(template, scope, self.translator.as_ref())
    }

    fn resolve_str(&self, template: &str, scope: &Value) -> String {
        match self.resolve_value(&Value::String(template.to_owned()), scope) {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn build_url(
        &self,
        ds: &DataSource,
        global: &GlobalConfig,
        scope: &Value,
    ) -> Result<String, ActionError> {
        let path = self.resolve_str(&ds.path, scope);
        let mut url = if is_absolute(&path) {
            path
        } else {
            let base = ds
                .base_url
                .as_deref()
                .map(|b| self.resolve_str(b, scope))
                .or_else(|| global.base_url.clone())
                .unwrap_or_default();
            join_url(&base, &path)
        };
        if url.is_empty() {
            return Err(ActionError::Validation(format!(
                "data source '{}' has no URL",
                ds.id
            )));
        }

        let mut pairs: Vec<(String, String)> = Vec::new();
        for (key, template) in &ds.query_params {
            match self.resolve_value(template, scope) {
                Value::Null => {}
                Value::Array(items) => {
                    pairs.extend(
                        items
                            .iter()
                            .filter(|v| !v.is_null())
                            .map(|v| (key.clone(), scalar_string(v))),
                    );
                }
                other => pairs.push((key.clone(), scalar_string(&other))),
            }
        }
        if !pairs.is_empty() {
            let encoded = serde_urlencoded::to_string(&pairs)
                .map_err(|e| ActionError::Serialization(e.to_string()))?;
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&encoded);
        }
        Ok(url)
    }

    fn apply_body(
        &self,
        request: &mut ResolvedRequest,
        encoding: BodyEncoding,
        body: Value,
    ) -> Result<(), ActionError> {
        match encoding {
            BodyEncoding::Json => {
                request.body = RequestBody::Json(body);
                if !request.has_header(CONTENT_TYPE) {
                    request.set_header(CONTENT_TYPE, "application/json");
                }
            }
            BodyEncoding::Form => {
                let pairs = match body {
                    Value::Object(map) => map
                        .into_iter()
                        .filter(|(_, v)| !v.is_null())
                        .map(|(k, v)| (k, scalar_string(&v)))
                        .collect(),
                    other => {
                        return Err(ActionError::Validation(format!(
                            "form body must be an object, got {other}"
                        )));
                    }
                };
                request.body = RequestBody::Form(pairs);
                request.set_header(CONTENT_TYPE, "application/x-www-form-urlencoded");
            }
            BodyEncoding::Raw => {
                request.body = RequestBody::Raw(scalar_string(&body));
                if !request.has_header(CONTENT_TYPE) {
                    request.set_header(CONTENT_TYPE, "text/plain");
                }
            }
            BodyEncoding::Multipart => {
                request.body = RequestBody::Multipart(multipart_parts(body)?);
                // The transport sets the boundary-bearing content type.
                request.remove_header(CONTENT_TYPE);
            }
        }
        Ok(())
    }

    fn apply_auth(
        &self,
        request: &mut ResolvedRequest,
        declared: Option<&AuthDescriptor>,
        global: &GlobalConfig,
        scope: &Value,
    ) {
        let effective = declared
            .filter(|auth| !auth.is_none())
            .or_else(|| global.endpoint_auth_for(&request.url));
        let live = self.tokens.as_ref().and_then(|t| t.access_token());

        match effective {
            Some(auth) => {
                let value = auth.value.as_deref().map(|v| self.resolve_str(v, scope));
                match auth.auth_type {
                    AuthType::Bearer => {
                        if !request.has_header(AUTHORIZATION) {
                            if let Some(token) = live.or(value).filter(|t| !t.is_empty()) {
                                request.set_header(AUTHORIZATION, format!("Bearer {token}"));
                            }
                        }
                    }
                    AuthType::Basic => {
                        if let Some(credentials) = value.filter(|v| !v.is_empty()) {
                            if !request.has_header(AUTHORIZATION) {
                                let encoded = basic_credentials(&credentials);
                                request.set_header(AUTHORIZATION, format!("Basic {encoded}"));
                            }
                        }
                    }
                    AuthType::ApiKey => {
                        let header = auth.header.as_deref().unwrap_or(DEFAULT_API_KEY_HEADER);
                        if let Some(key) = value.filter(|v| !v.is_empty()) {
                            if !request.has_header(header) {
                                request.set_header(header, key);
                            }
                        }
                    }
                    AuthType::None => {}
                }
            }
            None => {
                if global.inject_session_token && !request.has_header(AUTHORIZATION) {
                    if let Some(token) = live {
                        request.set_header(AUTHORIZATION, format!("Bearer {token}"));
                    }
                }
            }
        }
    }
}

fn is_absolute(url: &str) -> bool {
    ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

fn join_url(base: &str, path: &str) -> String {
    match (base.is_empty(), path.is_empty()) {
        (true, _) => path.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `user:pass` is encoded; anything else is taken as already encoded.
fn basic_credentials(value: &str) -> String {
    if value.contains(':') {
        STANDARD.encode(value)
    } else {
        value.to_owned()
    }
}

fn merge_objects(target: &mut Value, extra: Value) {
    match (target, extra) {
        (Value::Object(into), Value::Object(from)) => into.extend(from),
        (target, extra) => *target = extra,
    }
}

/// Object keys become parts. `{filename, data (base64) | content, contentType}`
/// objects become file parts; everything else becomes a text part.
fn multipart_parts(body: Value) -> Result<Vec<MultipartPart>, ActionError> {
    let Value::Object(map) = body else {
        return Err(ActionError::Validation("multipart body must be an object".into()));
    };
    let mut parts = Vec::with_capacity(map.len());
    for (name, value) in map {
        let part = match &value {
            Value::Object(file) if file.contains_key("filename") => {
                let filename = file.get("filename").map(scalar_string).unwrap_or_default();
                let content_type = file
                    .get("contentType")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                let data = match (file.get("data"), file.get("content")) {
                    (Some(Value::String(encoded)), _) => STANDARD
                        .decode(encoded)
                        .map_err(|e| ActionError::Validation(format!("part '{name}': {e}")))?,
                    (_, Some(content)) => scalar_string(content).into_bytes(),
                    _ => Vec::new(),
                };
                PartValue::File {
                    filename,
                    content_type,
                    data,
                }
            }
            other => PartValue::Text(scalar_string(other)),
        };
        parts.push(MultipartPart { name, value: part });
    }
    Ok(parts)
}
