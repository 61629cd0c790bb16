//! HTTP JSON API.
//!
//! A blocking `tiny_http` server. Each request is handled on its own thread
//! against a shared [`AppContext`]; bounded query workers are forked from
//! that thread. Responses use the CLI's `{success, data, error}` envelope.

use crate::cli::output::CliResponse;
use crate::core::context::AppContext;
use crate::core::error::{ErrorCategory, MotifStudioError, Result};
use crate::core::models::{DownloadGraphRequest, HostQueryRequest, MotifQueryRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

const ORIGIN: &str = "server:handle_api_request";

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
    Delete,
    Options,
}

impl ApiMethod {
    fn from_http(method: &tiny_http::Method) -> Option<Self> {
        match method {
            tiny_http::Method::Get => Some(Self::Get),
            tiny_http::Method::Post => Some(Self::Post),
            tiny_http::Method::Delete => Some(Self::Delete),
            tiny_http::Method::Options => Some(Self::Options),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status_code: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub extra_headers: Vec<tiny_http::Header>,
}

impl ApiResponse {
    fn json<T: Serialize>(status_code: u16, value: &T) -> Result<Self> {
        let body = serde_json::to_vec_pretty(value).map_err(|e| {
            MotifStudioError::system("json_serialize_failed", e.to_string(), "server:json")
        })?;
        Ok(Self {
            status_code,
            content_type: "application/json",
            body,
            extra_headers: cors_headers(),
        })
    }

    fn text(status_code: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            content_type,
            body: body.into(),
            extra_headers: cors_headers(),
        }
    }

    fn ok<T: Serialize>(data: T) -> Result<Self> {
        Self::json(200, &CliResponse::success(data))
    }

    fn error(err: &MotifStudioError) -> Result<Self> {
        Self::json(status_for(err), &CliResponse::<()>::error(err))
    }
}

/// HTTP status for an error that escaped a handler.
fn status_for(err: &MotifStudioError) -> u16 {
    if err.is_not_found() {
        return 404;
    }
    match err.category {
        ErrorCategory::User | ErrorCategory::Query | ErrorCategory::Aggregation => 400,
        _ => 500,
    }
}

fn parse_query(url: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some((_path, qs)) = url.split_once('?') else {
        return out;
    };

    for part in qs.split('&') {
        if part.trim().is_empty() {
            continue;
        }

        let (k, v) = part.split_once('=').unwrap_or((part, ""));
        out.insert(k.to_string(), v.to_string());
    }

    out
}

fn cors_headers() -> Vec<tiny_http::Header> {
    [
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS"),
        ("Access-Control-Allow-Headers", "Content-Type"),
    ]
    .into_iter()
    .filter_map(|(name, value)| tiny_http::Header::from_bytes(name, value).ok())
    .collect()
}

fn parse_json_body<T: for<'de> Deserialize<'de>>(body: Option<&[u8]>, origin: &str) -> Result<T> {
    let raw = body.ok_or_else(|| {
        MotifStudioError::user("request_body_required", "Request body is required", origin)
    })?;

    serde_json::from_slice(raw).map_err(|e| {
        MotifStudioError::user(
            "invalid_json_body",
            format!("Invalid JSON body: {e}"),
            origin,
        )
    })
}

fn method_not_allowed(path: &str, method: ApiMethod, allowed: &'static str) -> Result<ApiResponse> {
    let err = MotifStudioError::user(
        "method_not_allowed",
        format!("Method '{method:?}' is not allowed for '{path}'"),
        ORIGIN,
    )
    .with_hint(format!("Allowed method(s): {allowed}"));
    ApiResponse::json(405, &CliResponse::<()>::error(&err))
}

#[derive(Debug, Serialize)]
struct ApiCatalog {
    read_endpoints: Vec<&'static str>,
    query_endpoints: Vec<&'static str>,
    upload_endpoints: Vec<&'static str>,
}

fn api_catalog() -> ApiCatalog {
    ApiCatalog {
        read_endpoints: vec!["/", "/providers/", "/providers/hostlist", "/queries/"],
        query_endpoints: vec![
            "/queries/vertices/count",
            "/queries/vertices/attributes",
            "/queries/edges/count",
            "/queries/edges/attributes",
            "/queries/motifs/_parse",
            "/queries/motifs/count",
            "/queries/motifs",
            "/queries/graph/download",
        ],
        upload_endpoints: vec![
            "/uploads/graph?filename=<name>&name=<display name>",
            "/uploads/temporary",
            "/uploads/temporary/<id>/info",
            "/uploads/temporary/<id>",
        ],
    }
}

/// Routes one request. Errors from the context become enveloped error
/// responses with a matching status; only serialization failures escape.
pub fn handle_api_request(
    method: ApiMethod,
    url: &str,
    body: Option<&[u8]>,
    context: &AppContext,
) -> Result<ApiResponse> {
    match route(method, url, body, context) {
        Ok(response) => Ok(response),
        Err(err) => {
            debug!(url, code = %err.code, "request failed");
            ApiResponse::error(&err)
        }
    }
}

#[allow(clippy::too_many_lines)]
fn route(
    method: ApiMethod,
    url: &str,
    body: Option<&[u8]>,
    context: &AppContext,
) -> Result<ApiResponse> {
    if method == ApiMethod::Options {
        return Ok(ApiResponse::text(204, "text/plain", ""));
    }

    let (path, _qs) = url.split_once('?').unwrap_or((url, ""));

    if let Some(rest) = path
        .strip_prefix("/uploads/temporary/")
        .filter(|rest| !rest.is_empty())
    {
        return match (rest.strip_suffix("/info"), method) {
            (Some(temp_id), ApiMethod::Get) => ApiResponse::ok(context.upload_info(temp_id)?),
            (Some(_), _) => method_not_allowed(path, method, "GET"),
            (None, ApiMethod::Delete) => ApiResponse::ok(context.cleanup_upload(rest)?),
            (None, _) => method_not_allowed(path, method, "DELETE"),
        };
    }

    match path {
        "/" if method == ApiMethod::Get => ApiResponse::ok(serde_json::json!({
            "status": "ok",
            "name": "motifstudio",
            "version": env!("CARGO_PKG_VERSION"),
        })),
        "/providers/" | "/providers" if method == ApiMethod::Get => {
            ApiResponse::ok(context.list_providers())
        }
        "/providers/hostlist" if method == ApiMethod::Get => ApiResponse::ok(context.list_hosts()),
        "/queries/" | "/queries" if method == ApiMethod::Get => ApiResponse::ok(api_catalog()),
        "/queries/vertices/count" if method == ApiMethod::Post => {
            let req: HostQueryRequest = parse_json_body(body, ORIGIN)?;
            ApiResponse::ok(context.vertex_count(&req.host_id)?)
        }
        "/queries/vertices/attributes" if method == ApiMethod::Post => {
            let req: HostQueryRequest = parse_json_body(body, ORIGIN)?;
            ApiResponse::ok(context.vertex_attributes(&req.host_id)?)
        }
        "/queries/edges/count" if method == ApiMethod::Post => {
            let req: HostQueryRequest = parse_json_body(body, ORIGIN)?;
            ApiResponse::ok(context.edge_count(&req.host_id)?)
        }
        "/queries/edges/attributes" if method == ApiMethod::Post => {
            let req: HostQueryRequest = parse_json_body(body, ORIGIN)?;
            ApiResponse::ok(context.edge_attributes(&req.host_id)?)
        }
        "/queries/motifs/_parse" if method == ApiMethod::Post => {
            let req: MotifQueryRequest = parse_json_body(body, ORIGIN)?;
            ApiResponse::ok(context.motif_parse(&req.host_id, &req.query, req.query_type))
        }
        "/queries/motifs/count" if method == ApiMethod::Post => {
            let req: MotifQueryRequest = parse_json_body(body, ORIGIN)?;
            ApiResponse::ok(context.motif_count(&req.host_id, &req.query, req.query_type)?)
        }
        "/queries/motifs" | "/queries/motifs/" if method == ApiMethod::Post => {
            let req: MotifQueryRequest = parse_json_body(body, ORIGIN)?;
            ApiResponse::ok(context.motif_search(
                &req.host_id,
                &req.query,
                req.query_type,
                req.aggregation_type.as_deref(),
            )?)
        }
        "/queries/graph/download" if method == ApiMethod::Post => {
            let req: DownloadGraphRequest = parse_json_body(body, ORIGIN)?;
            ApiResponse::ok(context.download_graph(&req.host_id, &req.format)?)
        }
        "/uploads/graph" if method == ApiMethod::Post => {
            let query = parse_query(url);
            let content = body.unwrap_or_default();
            let filename = query
                .get("filename")
                .map_or("upload.graphml", String::as_str);
            ApiResponse::ok(context.upload_graph(
                content,
                filename,
                query.get("name").map(String::as_str),
            )?)
        }
        "/uploads/temporary" | "/uploads/temporary/" if method == ApiMethod::Get => {
            ApiResponse::ok(context.list_uploads()?)
        }
        "/" | "/providers/" | "/providers" | "/providers/hostlist" | "/queries/" | "/queries"
        | "/uploads/temporary" | "/uploads/temporary/" => method_not_allowed(path, method, "GET"),
        "/queries/vertices/count"
        | "/queries/vertices/attributes"
        | "/queries/edges/count"
        | "/queries/edges/attributes"
        | "/queries/motifs/_parse"
        | "/queries/motifs/count"
        | "/queries/motifs"
        | "/queries/motifs/"
        | "/queries/graph/download"
        | "/uploads/graph" => method_not_allowed(path, method, "POST"),
        _ => Err(MotifStudioError::user(
            "endpoint_not_found",
            format!("Unknown endpoint '{path}'"),
            ORIGIN,
        )),
    }
}

fn respond(mut req: tiny_http::Request, context: &AppContext) {
    let Some(method) = ApiMethod::from_http(req.method()) else {
        let _ = req.respond(tiny_http::Response::empty(405));
        return;
    };

    let mut request_body = Vec::new();
    if method == ApiMethod::Post {
        if let Err(e) = req.as_reader().read_to_end(&mut request_body) {
            warn!(error = %e, "failed to read request body");
        }
    }

    let url = req.url().to_string();
    let response = match handle_api_request(
        method,
        &url,
        if request_body.is_empty() {
            None
        } else {
            Some(request_body.as_slice())
        },
        context,
    ) {
        Ok(r) => r,
        Err(_) => ApiResponse::text(500, "text/plain", "internal error\n"),
    };
    debug!(method = ?method, url = %url, status = response.status_code, "handled request");

    let mut tiny = tiny_http::Response::from_data(response.body).with_status_code(response.status_code);
    if let Ok(header) = tiny_http::Header::from_bytes(&b"Content-Type"[..], response.content_type.as_bytes()) {
        tiny = tiny.with_header(header);
    }
    for h in response.extra_headers {
        tiny = tiny.with_header(h);
    }

    let _ = req.respond(tiny);
}

/// Serves until the listener fails.
pub fn serve(config: &ServeConfig, context: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let server = tiny_http::Server::http(&addr)
        .map_err(|e| MotifStudioError::system("server_bind_failed", e.to_string(), "server:serve"))?;

    info!(addr = %addr, "motifstudio serve listening");

    for req in server.incoming_requests() {
        let context = Arc::clone(&context);
        thread::spawn(move || respond(req, &context));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ProviderConfig, QueryLimitsConfig, ServerConfig};
    use crate::core::models::HostListing;
    use crate::graph::formats::write_graphml;
    use crate::graph::HostGraph;
    use serde_json::{json, Value};
    use std::path::Path;

    fn test_context(dir: &Path) -> Arc<AppContext> {
        let path = dir.join("k4.graphml");
        std::fs::write(&path, write_graphml(&HostGraph::complete(4, true)).expect("graphml"))
            .expect("write");
        let config = ServerConfig {
            providers: vec![
                ProviderConfig {
                    id: "fs".to_string(),
                    provider_type: "FilesystemGraphHostProvider".to_string(),
                    arguments: json!({}),
                },
                ProviderConfig {
                    id: "tmp".to_string(),
                    provider_type: "TemporaryGraphHostProvider".to_string(),
                    arguments: json!({ "temp_dir": dir.join("uploads") }),
                },
            ],
            hosts: vec![HostListing::new("H1", format!("file://{}", path.display()), "K4")],
            query_limits: QueryLimitsConfig {
                max_ram_pct: 0.5,
                max_ram_bytes: Some(8 << 30),
                max_duration_seconds: Some(30.0),
            },
        };
        AppContext::from_config(&config).expect("context")
    }

    fn json_value(body: &[u8]) -> Value {
        serde_json::from_slice(body).expect("json")
    }

    fn post(context: &AppContext, url: &str, body: &Value) -> ApiResponse {
        let body = serde_json::to_vec(body).expect("json body");
        handle_api_request(ApiMethod::Post, url, Some(&body), context).unwrap()
    }

    #[test]
    fn root_and_listings_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = test_context(dir.path());

        let resp = handle_api_request(ApiMethod::Get, "/", None, &context).unwrap();
        assert_eq!(resp.status_code, 200);
        assert!(json_value(&resp.body)["data"]["version"].is_string());

        let resp = handle_api_request(ApiMethod::Get, "/providers/", None, &context).unwrap();
        let v = json_value(&resp.body);
        assert_eq!(v["data"][0]["id"], "fs");
        assert_eq!(v["data"][1]["provider_type"], "TemporaryGraphHostProvider");

        let resp =
            handle_api_request(ApiMethod::Get, "/providers/hostlist", None, &context).unwrap();
        assert_eq!(json_value(&resp.body)["data"], json!([{"id": "H1", "name": "K4"}]));
    }

    #[test]
    fn motif_count_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = test_context(dir.path());

        let resp = post(
            &context,
            "/queries/motifs/count",
            &json!({"host_id": "H1", "query": "A -> B"}),
        );
        assert_eq!(resp.status_code, 200);
        let v = json_value(&resp.body);
        assert_eq!(v["success"], true);
        assert_eq!(v["data"]["motif_count"], 12);
        assert_eq!(v["data"]["host_id"], "H1");
        assert_eq!(v["data"]["query_type"], "dotmotif");
    }

    #[test]
    fn cypher_query_type_is_honored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = test_context(dir.path());

        let resp = post(
            &context,
            "/queries/motifs/count",
            &json!({
                "host_id": "H1",
                "query": "MATCH (a)-->(b), (b)-->(c) RETURN a, c",
                "query_type": "cypher"
            }),
        );
        let v = json_value(&resp.body);
        assert_eq!(v["data"]["query_type"], "cypher");
        assert_eq!(v["data"]["motif_count"], 24);
        assert_eq!(v["data"]["motif_entities"], json!(["a", "c"]));

        let resp = post(
            &context,
            "/queries/motifs/count",
            &json!({"host_id": "H1", "query": "A -> B", "query_type": "sparql"}),
        );
        assert_eq!(resp.status_code, 400);
    }

    #[test]
    fn aggregated_motif_search_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = test_context(dir.path());

        let resp = post(
            &context,
            "/queries/motifs",
            &json!({"host_id": "H1", "query": "A -> B", "aggregation_type": "host.vertex"}),
        );
        let v = json_value(&resp.body);
        assert_eq!(v["data"]["motif_count"], 12);
        assert_eq!(v["data"]["motif_results"]["0"]["A"], 3);
    }

    #[test]
    fn unknown_host_is_404() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = test_context(dir.path());

        let resp = post(&context, "/queries/edges/count", &json!({"host_id": "H9"}));
        assert_eq!(resp.status_code, 404);
        let v = json_value(&resp.body);
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "host_not_found");
    }

    #[test]
    fn malformed_body_is_400() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = test_context(dir.path());

        let resp = handle_api_request(
            ApiMethod::Post,
            "/queries/vertices/count",
            Some(b"{not json"),
            &context,
        )
        .unwrap();
        assert_eq!(resp.status_code, 400);
        assert_eq!(json_value(&resp.body)["error"]["code"], "invalid_json_body");

        let resp =
            handle_api_request(ApiMethod::Post, "/queries/vertices/count", None, &context).unwrap();
        assert_eq!(resp.status_code, 400);
    }

    #[test]
    fn wrong_method_is_405_and_unknown_route_is_404() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = test_context(dir.path());

        let resp =
            handle_api_request(ApiMethod::Get, "/queries/motifs/count", None, &context).unwrap();
        assert_eq!(resp.status_code, 405);

        let resp = handle_api_request(ApiMethod::Get, "/nope", None, &context).unwrap();
        assert_eq!(resp.status_code, 404);
        assert_eq!(json_value(&resp.body)["error"]["code"], "endpoint_not_found");
    }

    #[test]
    fn upload_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = test_context(dir.path());

        let resp = handle_api_request(
            ApiMethod::Post,
            "/uploads/graph?filename=pair.csv&name=Pair",
            Some(b"source,target\na,b\n"),
            &context,
        )
        .unwrap();
        assert_eq!(resp.status_code, 200);
        let temp_id = json_value(&resp.body)["data"]["temp_id"]
            .as_str()
            .expect("temp_id")
            .to_string();

        let resp = post(&context, "/queries/vertices/count", &json!({"host_id": temp_id}));
        assert_eq!(json_value(&resp.body)["data"]["vertex_count"], 2);

        let resp = handle_api_request(ApiMethod::Get, "/uploads/temporary", None, &context).unwrap();
        assert_eq!(json_value(&resp.body)["data"][0]["name"], "Pair");

        let info = format!("/uploads/temporary/{temp_id}/info");
        let resp = handle_api_request(ApiMethod::Get, &info, None, &context).unwrap();
        assert_eq!(json_value(&resp.body)["data"]["original_filename"], "pair.csv");

        let item = format!("/uploads/temporary/{temp_id}");
        let resp = handle_api_request(ApiMethod::Delete, &item, None, &context).unwrap();
        assert_eq!(resp.status_code, 200);
        let resp = handle_api_request(ApiMethod::Delete, &item, None, &context).unwrap();
        assert_eq!(resp.status_code, 404);
    }

    #[test]
    fn empty_upload_is_400() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = test_context(dir.path());
        let resp =
            handle_api_request(ApiMethod::Post, "/uploads/graph?filename=g.graphml", None, &context)
                .unwrap();
        assert_eq!(resp.status_code, 400);
        assert_eq!(json_value(&resp.body)["error"]["code"], "empty_upload");
    }
}
