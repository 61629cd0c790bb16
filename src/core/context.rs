//! Application context and query pipeline.
//!
//! [`AppContext`] owns the provider router, the host registry, and the
//! resolved query limits. It is built once from a [`ServerConfig`] and shared
//! as `Arc<AppContext>` by every serving thread.
//!
//! Each query resolves its host to a URI, the URI to a provider, lets the
//! provider prepare a worker-side view, and then runs the call in a bounded
//! worker. Unknown hosts and unroutable
//! URIs come back as `Err`; every later failure comes back as a response
//! with `error` set and a count of `-1`.

use crate::core::aggregation::{AggregatedResults, Aggregation};
use crate::core::config::ServerConfig;
use crate::core::error::{ErrorCategory, MotifStudioError, Result};
use crate::core::executor::{run_bounded, ResourceLimits};
use crate::core::models::{
    AttributeSchemaResponse, DownloadGraphResponse, EdgeCountResponse, GraphUploadCleanupResponse,
    GraphUploadResponse, HostListing, HostProviderPublicListing, HostSummary, MotifCountResponse,
    MotifParseResponse, MotifSearchResponse, QueryClock, QueryType, TemporaryHostListing,
    VertexCountResponse, FAILED_COUNT,
};
use crate::core::registry::HostRegistry;
use crate::core::router::HostProviderRouter;
use crate::graph::cypher::CypherQuery;
use crate::graph::formats::{export_graph, EXPORT_FORMATS};
use crate::graph::motif::{Motif, MotifMatch};
use crate::graph::AttributeSchema;
use crate::providers::{build_provider, HostProvider, UploadStore, UploadedFile};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const ORIGIN: &str = "context";

/// Routing status of one public host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostValidation {
    pub id: String,
    pub uri: String,
    pub provider_id: Option<String>,
    pub valid: bool,
}

/// A motif or Cypher query, compiled on the serving thread so syntax errors
/// never reach a worker.
enum CompiledQuery {
    DotMotif(Motif),
    Cypher(CypherQuery),
}

impl CompiledQuery {
    fn compile(query: &str, query_type: QueryType) -> Result<Self> {
        match query_type {
            QueryType::Dotmotif => Motif::parse(query).map(Self::DotMotif),
            QueryType::Cypher => CypherQuery::parse(query).map(Self::Cypher),
        }
    }

    fn motif(&self) -> &Motif {
        match self {
            Self::DotMotif(motif) => motif,
            Self::Cypher(cypher) => cypher.motif(),
        }
    }

    /// Motif vertices, or the returned columns of a Cypher query.
    fn entities(&self) -> Vec<String> {
        match self {
            Self::DotMotif(motif) => motif.entities().to_vec(),
            Self::Cypher(cypher) => cypher.columns().to_vec(),
        }
    }
}

/// What a motif-search worker sends back.
#[derive(Debug, Serialize, Deserialize)]
struct SearchPayload {
    matches: Vec<MotifMatch>,
    vertex_attributes: BTreeMap<String, Value>,
}

#[derive(Debug)]
pub struct AppContext {
    router: HostProviderRouter,
    registry: HostRegistry,
    limits: ResourceLimits,
}

impl AppContext {
    #[must_use]
    pub fn new(router: HostProviderRouter, registry: HostRegistry, limits: ResourceLimits) -> Self {
        Self {
            router,
            registry,
            limits,
        }
    }

    /// Builds providers, registers hosts, resolves limits, reports unroutable
    /// hosts, and re-registers surviving uploads.
    pub fn from_config(config: &ServerConfig) -> Result<Arc<Self>> {
        let router = HostProviderRouter::new();
        for provider in &config.providers {
            router.add_provider(provider.id.clone(), build_provider(&provider.kind()?)?);
        }
        let limits = config.query_limits.resolve()?;
        let context = Self::new(router, HostRegistry::new(config.hosts.clone()), limits);

        let report = context.validate_hosts();
        let invalid = report.iter().filter(|h| !h.valid).count();
        for host in report.iter().filter(|h| !h.valid) {
            warn!(host_id = %host.id, uri = %host.uri, "no provider accepts host");
        }
        info!(
            hosts = report.len(),
            invalid,
            max_ram_bytes = ?limits.max_ram_bytes,
            max_duration = ?limits.max_duration,
            "application context ready"
        );

        context.restore_uploads();
        Ok(Arc::new(context))
    }

    fn restore_uploads(&self) {
        for (provider_id, provider) in self.router.providers() {
            let Some(store) = provider.upload_store() else {
                continue;
            };
            match store.list_files() {
                Ok(files) => {
                    for file in &files {
                        self.registry.add_temporary_host(upload_listing(
                            file,
                            &file.original_filename,
                            &provider_id,
                        ));
                    }
                }
                Err(e) => warn!(provider_id = %provider_id, error = %e, "cannot list uploads"),
            }
        }
    }

    #[must_use]
    pub fn router(&self) -> &HostProviderRouter {
        &self.router
    }

    #[must_use]
    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    #[must_use]
    pub fn list_hosts(&self) -> Vec<HostSummary> {
        self.registry.list_hosts()
    }

    #[must_use]
    pub fn list_providers(&self) -> Vec<HostProviderPublicListing> {
        self.router.list_providers()
    }

    /// Routing report for every public host, in listing order.
    #[must_use]
    pub fn validate_hosts(&self) -> Vec<HostValidation> {
        self.registry
            .public_listings()
            .into_iter()
            .map(|listing| {
                let provider_id = self.router.provider_id_for(&listing.uri);
                HostValidation {
                    valid: provider_id.is_some(),
                    id: listing.id,
                    uri: listing.uri,
                    provider_id,
                }
            })
            .collect()
    }

    pub fn resolve_host(&self, host_id: &str) -> Result<HostListing> {
        self.registry
            .get_listing_from_id(host_id)
            .ok_or_else(|| MotifStudioError::host_not_found(host_id, ORIGIN))
    }

    pub fn provider_for(&self, uri: &str) -> Result<Arc<dyn HostProvider>> {
        self.router
            .provider_for(uri)
            .ok_or_else(|| MotifStudioError::provider_not_found(uri, ORIGIN))
    }

    fn route(&self, host_id: &str) -> Result<(HostListing, Arc<dyn HostProvider>)> {
        let listing = self.resolve_host(host_id)?;
        let provider = self.provider_for(&listing.uri)?;
        Ok((listing, provider))
    }

    /// Runs `job` in a bounded worker against the provider's prepared view
    /// of `listing`. Preparation happens here, on the calling thread.
    fn run_on<T>(
        &self,
        operation: &str,
        listing: &HostListing,
        provider: &Arc<dyn HostProvider>,
        job: impl FnOnce(&dyn HostProvider, &str) -> Result<T>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let worker = provider
            .prepare(&listing.uri)?
            .unwrap_or_else(|| Arc::clone(provider));
        run_bounded(operation, &self.limits, || job(worker.as_ref(), &listing.uri)).into_result()
    }

    pub fn vertex_count(&self, host_id: &str) -> Result<VertexCountResponse> {
        let clock = QueryClock::start();
        let (listing, provider) = self.route(host_id)?;
        let result = self.run_on("vertex_count", &listing, &provider, |provider, uri| {
            provider.vertex_count(uri)
        });
        let (vertex_count, error) = count_or_error(result);
        Ok(VertexCountResponse {
            meta: clock.finish(host_id),
            vertex_count,
            error,
        })
    }

    pub fn edge_count(&self, host_id: &str) -> Result<EdgeCountResponse> {
        let clock = QueryClock::start();
        let (listing, provider) = self.route(host_id)?;
        let result = self.run_on("edge_count", &listing, &provider, |provider, uri| {
            provider.edge_count(uri)
        });
        let (edge_count, error) = count_or_error(result);
        Ok(EdgeCountResponse {
            meta: clock.finish(host_id),
            edge_count,
            error,
        })
    }

    pub fn vertex_attributes(&self, host_id: &str) -> Result<AttributeSchemaResponse> {
        self.attribute_schema(host_id, "vertex_attributes", |provider, uri| {
            provider.vertex_attribute_schema(uri)
        })
    }

    pub fn edge_attributes(&self, host_id: &str) -> Result<AttributeSchemaResponse> {
        self.attribute_schema(host_id, "edge_attributes", |provider, uri| {
            provider.edge_attribute_schema(uri)
        })
    }

    fn attribute_schema(
        &self,
        host_id: &str,
        operation: &str,
        fetch: impl FnOnce(&dyn HostProvider, &str) -> Result<AttributeSchema>,
    ) -> Result<AttributeSchemaResponse> {
        let clock = QueryClock::start();
        let (listing, provider) = self.route(host_id)?;
        let (attributes, error) = match self.run_on(operation, &listing, &provider, fetch) {
            Ok(attributes) => (attributes, None),
            Err(e) => (AttributeSchema::new(), Some(e.message)),
        };
        Ok(AttributeSchemaResponse {
            meta: clock.finish(host_id),
            attributes,
            error,
        })
    }

    /// Compiles a query without touching any host.
    #[must_use]
    pub fn motif_parse(
        &self,
        host_id: &str,
        query: &str,
        query_type: QueryType,
    ) -> MotifParseResponse {
        let clock = QueryClock::start();
        let parsed = CompiledQuery::compile(query, query_type).and_then(|compiled| {
            let nodelink = serde_json::to_string(&compiled.motif().to_node_link()).map_err(|e| {
                MotifStudioError::system("serialization_failed", e.to_string(), ORIGIN)
            })?;
            Ok((compiled, nodelink))
        });
        let (motif_entities, motif_edges, motif_nodelink_json, error) = match parsed {
            Ok((compiled, nodelink)) => (
                compiled.entities(),
                compiled.motif().required_edges(),
                nodelink,
                None,
            ),
            Err(e) => (Vec::new(), Vec::new(), "{}".to_string(), Some(e.message)),
        };
        MotifParseResponse {
            meta: clock.finish(host_id),
            query: query.to_string(),
            query_type,
            motif_entities,
            motif_edges,
            motif_nodelink_json,
            error,
        }
    }

    pub fn motif_count(
        &self,
        host_id: &str,
        query: &str,
        query_type: QueryType,
    ) -> Result<MotifCountResponse> {
        let clock = QueryClock::start();
        let (listing, provider) = self.route(host_id)?;

        let (motif_entities, result) = match CompiledQuery::compile(query, query_type) {
            Ok(compiled) => {
                let result = self.run_on("motif_count", &listing, &provider, |provider, uri| {
                    match &compiled {
                        CompiledQuery::DotMotif(_) => provider.motif_count(uri, query),
                        CompiledQuery::Cypher(cypher) => {
                            Ok(cypher.count_in(&provider.load_graph(uri)?))
                        }
                    }
                });
                (compiled.entities(), result)
            }
            Err(e) => (Vec::new(), Err(e)),
        };
        let (motif_count, error) = count_or_error(result);
        Ok(MotifCountResponse {
            meta: clock.finish(host_id),
            query: query.to_string(),
            query_type,
            motif_count,
            motif_entities,
            error,
        })
    }

    /// Enumerates matches in a worker, then aggregates them here.
    pub fn motif_search(
        &self,
        host_id: &str,
        query: &str,
        query_type: QueryType,
        aggregation_type: Option<&str>,
    ) -> Result<MotifSearchResponse> {
        let clock = QueryClock::start();
        let (listing, provider) = self.route(host_id)?;
        let host_volumetric_data =
            (!listing.volumetric_data.is_empty()).then(|| listing.volumetric_data.clone());

        let mut motif_entities = Vec::new();
        let searched = CompiledQuery::compile(query, query_type).and_then(|compiled| {
            motif_entities = compiled.entities();
            let aggregation = Aggregation::parse(aggregation_type)?;
            let attribute = aggregation.required_vertex_attribute().map(str::to_string);
            let payload = self.run_on("motif_search", &listing, &provider, |provider, uri| {
                let matches = match &compiled {
                    CompiledQuery::DotMotif(_) => provider.motif_search(uri, query)?,
                    CompiledQuery::Cypher(cypher) => cypher.find_in(&provider.load_graph(uri)?),
                };
                let vertex_attributes = match &attribute {
                    Some(attribute) => provider.vertex_attribute_values(uri, attribute)?,
                    None => BTreeMap::new(),
                };
                Ok(SearchPayload {
                    matches,
                    vertex_attributes,
                })
            })?;
            let results = aggregation.apply(&payload.matches, &payload.vertex_attributes)?;
            Ok((payload.matches.len(), results))
        });

        let (motif_count, motif_results, error) = match searched {
            Ok((count, results)) => (i64::try_from(count).unwrap_or(i64::MAX), results, None),
            Err(e) => (FAILED_COUNT, AggregatedResults::empty(), Some(e.message)),
        };
        Ok(MotifSearchResponse {
            meta: clock.finish(host_id),
            query: query.to_string(),
            query_type,
            motif_count,
            aggregation_type: aggregation_type.map(str::to_string),
            motif_results,
            motif_entities,
            host_volumetric_data,
            error,
        })
    }

    pub fn download_graph(&self, host_id: &str, format: &str) -> Result<DownloadGraphResponse> {
        let clock = QueryClock::start();
        let (listing, provider) = self.route(host_id)?;

        let exported = if EXPORT_FORMATS.contains(&format) {
            self.run_on("download_graph", &listing, &provider, |provider, uri| {
                export_graph(&provider.load_graph(uri)?, format)
            })
        } else {
            Err(MotifStudioError::invalid_query(
                format!(
                    "Unsupported download format '{format}'. Supported: {}",
                    EXPORT_FORMATS.join(", ")
                ),
                ORIGIN,
            ))
        };
        let (graph, error) = match exported {
            Ok(graph) => (graph, None),
            Err(e) => (String::new(), Some(e.message)),
        };
        Ok(DownloadGraphResponse {
            meta: clock.finish(host_id),
            format: format.to_string(),
            graph,
            error,
        })
    }

    /// First provider that can hold uploads, with its id.
    fn upload_provider(&self) -> Result<(String, Arc<dyn HostProvider>)> {
        self.router
            .providers()
            .into_iter()
            .find(|(_, provider)| provider.upload_store().is_some())
            .ok_or_else(|| {
                MotifStudioError::new(
                    ErrorCategory::Provider,
                    "upload_provider_not_found",
                    "No configured provider accepts uploads",
                    ORIGIN,
                )
                .with_hint("Add a provider of type `temporary` to the configuration")
            })
    }

    fn with_upload_store<T>(
        &self,
        action: impl FnOnce(&str, &dyn UploadStore) -> Result<T>,
    ) -> Result<T> {
        let (provider_id, provider) = self.upload_provider()?;
        let store = provider.upload_store().ok_or_else(|| {
            MotifStudioError::system("upload_store_missing", "Upload store vanished", ORIGIN)
        })?;
        action(&provider_id, store)
    }

    /// Stores an uploaded graph and registers it as an unlisted host whose id
    /// is the returned `temp_id`.
    pub fn upload_graph(
        &self,
        content: &[u8],
        original_filename: &str,
        name: Option<&str>,
    ) -> Result<GraphUploadResponse> {
        if content.is_empty() {
            return Err(MotifStudioError::user("empty_upload", "Empty file uploaded", ORIGIN));
        }
        self.with_upload_store(|provider_id, store| {
            let file = store.store_file(content, original_filename)?;
            let display_name = name.filter(|n| !n.is_empty()).unwrap_or(original_filename);
            self.registry
                .add_temporary_host(upload_listing(&file, display_name, provider_id));
            Ok(GraphUploadResponse {
                temp_id: file.temp_id,
                original_filename: file.original_filename,
                file_size: file.file_size,
                success: true,
                error: None,
            })
        })
    }

    pub fn list_uploads(&self) -> Result<Vec<TemporaryHostListing>> {
        self.with_upload_store(|_, store| {
            Ok(store
                .list_files()?
                .into_iter()
                .map(|file| self.temporary_listing(file))
                .collect())
        })
    }

    pub fn upload_info(&self, temp_id: &str) -> Result<TemporaryHostListing> {
        self.with_upload_store(|_, store| {
            store
                .file_info(temp_id)?
                .map(|file| self.temporary_listing(file))
                .ok_or_else(|| upload_not_found(temp_id))
        })
    }

    /// Deletes an upload and its listing.
    pub fn cleanup_upload(&self, temp_id: &str) -> Result<GraphUploadCleanupResponse> {
        self.with_upload_store(|_, store| {
            let listed = self.registry.remove_temporary_host(temp_id);
            let stored = store.cleanup_file(temp_id)?;
            if !listed && !stored {
                return Err(upload_not_found(temp_id));
            }
            Ok(GraphUploadCleanupResponse {
                temp_id: temp_id.to_string(),
                success: true,
                error: None,
            })
        })
    }

    fn temporary_listing(&self, file: UploadedFile) -> TemporaryHostListing {
        let name = self
            .registry
            .temporary_host(&file.temp_id)
            .map_or_else(|| file.original_filename.clone(), |listing| listing.name);
        TemporaryHostListing {
            temp_id: file.temp_id,
            name,
            original_filename: file.original_filename,
            file_size: file.file_size,
            created_at: file.created_at,
            expires_at: file.expires_at,
        }
    }
}

fn upload_listing(file: &UploadedFile, name: &str, provider_id: &str) -> HostListing {
    let mut listing = HostListing::new(file.temp_id.clone(), file.uri(), name);
    listing
        .provider
        .insert("id".to_string(), provider_id.to_string());
    listing
}

fn upload_not_found(temp_id: &str) -> MotifStudioError {
    MotifStudioError::new(
        ErrorCategory::Host,
        "upload_not_found",
        format!("No uploaded graph with ID {temp_id}"),
        ORIGIN,
    )
    .recoverable(true)
}

fn count_or_error(result: Result<u64>) -> (i64, Option<String>) {
    match result {
        Ok(count) => (i64::try_from(count).unwrap_or(i64::MAX), None),
        Err(e) => (FAILED_COUNT, Some(e.message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ProviderConfig, QueryLimitsConfig};
    use crate::graph::formats::write_graphml;
    use crate::graph::{Attributes, HostGraph};
    use crate::providers::temporary::{TemporaryGraphHostProvider, TemporaryOptions};
    use crate::providers::MockProvider;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    const GIB: u64 = 1 << 30;

    fn limits() -> QueryLimitsConfig {
        QueryLimitsConfig {
            max_ram_pct: 0.5,
            max_ram_bytes: Some(8 * GIB),
            max_duration_seconds: Some(30.0),
        }
    }

    fn k4_context(dir: &Path) -> Arc<AppContext> {
        let path = dir.join("k4.graphml");
        std::fs::write(&path, write_graphml(&HostGraph::complete(4, true)).expect("graphml"))
            .expect("write");
        let mut listing = HostListing::new("H1", format!("file://{}", path.display()), "K4");
        listing
            .volumetric_data
            .insert("uri".to_string(), json!("precomputed://k4"));
        let config = ServerConfig {
            providers: vec![ProviderConfig {
                id: "fs".to_string(),
                provider_type: "filesystem".to_string(),
                arguments: Value::Null,
            }],
            hosts: vec![
                listing,
                HostListing::new("H2", "file:///missing/graph.graphml", "Missing"),
                HostListing::new("H3", "gexf:///graph.gexf", "Unroutable"),
            ],
            query_limits: limits(),
        };
        AppContext::from_config(&config).expect("context")
    }

    fn mock_context(provider: MockProvider, limits: ResourceLimits) -> AppContext {
        let router = HostProviderRouter::new();
        router.add_provider("mock", Arc::new(provider));
        AppContext::new(
            router,
            HostRegistry::new(vec![HostListing::new("M", "mock://graph", "Mock")]),
            limits,
        )
    }

    #[test]
    fn counts_edges_and_motifs_on_a_file_host() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = k4_context(dir.path());

        assert_eq!(context.vertex_count("H1").expect("vertices").vertex_count, 4);
        assert_eq!(context.edge_count("H1").expect("edges").edge_count, 12);

        let response = context
            .motif_count("H1", "A -> B", QueryType::Dotmotif)
            .expect("motifs");
        assert_eq!(response.motif_count, 12);
        assert_eq!(response.motif_entities, vec!["A", "B"]);
        assert!(response.error.is_none());
        assert_eq!(response.meta.host_id, "H1");
    }

    #[test]
    fn unknown_hosts_and_unroutable_uris_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = k4_context(dir.path());

        let err = context.vertex_count("H9").expect_err("unknown host");
        assert_eq!(err.code, "host_not_found");
        let err = context
            .motif_count("H3", "A -> B", QueryType::Dotmotif)
            .expect_err("no provider");
        assert_eq!(err.code, "provider_not_found");
    }

    #[test]
    fn validation_reports_unroutable_hosts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = k4_context(dir.path()).validate_hosts();
        let valid: Vec<bool> = report.iter().map(|h| h.valid).collect();
        assert_eq!(valid, vec![true, true, false]);
        assert_eq!(report[0].provider_id.as_deref(), Some("fs"));
    }

    #[test]
    fn backend_failures_become_error_responses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let response = k4_context(dir.path()).edge_count("H2").expect("response");
        assert_eq!(response.edge_count, FAILED_COUNT);
        assert!(response.error.is_some());
    }

    #[test]
    fn invalid_motif_and_aggregation_fail_without_a_worker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = k4_context(dir.path());

        let response = context
            .motif_count("H1", "A B", QueryType::Dotmotif)
            .expect("response");
        assert_eq!(response.motif_count, FAILED_COUNT);
        assert!(response.error.is_some());

        let response = context
            .motif_search("H1", "A -> B", QueryType::Dotmotif, Some("nonsense"))
            .expect("response");
        assert_eq!(response.motif_count, FAILED_COUNT);
        assert_eq!(response.motif_results, AggregatedResults::empty());
        assert!(response.error.expect("error").contains("nonsense"));
    }

    #[test]
    fn motif_search_aggregates_in_the_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = k4_context(dir.path());

        let plain = context
            .motif_search("H1", "A -> B", QueryType::Dotmotif, None)
            .expect("search");
        assert_eq!(plain.motif_count, 12);
        assert!(matches!(&plain.motif_results, AggregatedResults::Matches(m) if m.len() == 12));
        assert_eq!(
            plain.host_volumetric_data.expect("volumetric")["uri"],
            json!("precomputed://k4")
        );

        let grouped = context
            .motif_search("H1", "A -> B", QueryType::Dotmotif, Some("motif.vertex"))
            .expect("search");
        assert_eq!(grouped.motif_count, 12);
        let AggregatedResults::Grouped(groups) = grouped.motif_results else {
            panic!("expected grouped results");
        };
        assert_eq!(groups["A"].len(), 4);
        assert_eq!(groups["A"]["0"], 3);

        let sampled = context
            .motif_search(
                "H1",
                "A -> B",
                QueryType::Dotmotif,
                Some(r#"sample|{"limit": 2}"#),
            )
            .expect("search");
        assert_eq!(sampled.motif_count, 12);
        assert!(matches!(&sampled.motif_results, AggregatedResults::Matches(m) if m.len() == 2));
    }

    #[test]
    fn attribute_aggregation_reads_host_values() {
        let mut graph = HostGraph::new(true);
        let kind = |k: &str| Attributes::from([("kind".to_string(), json!(k))]);
        graph.add_vertex("a", kind("excitatory"));
        graph.add_vertex("b", kind("inhibitory"));
        graph.add_vertex("c", Attributes::new());
        graph.add_edge("a", "b", Attributes::new());
        graph.add_edge("b", "c", Attributes::new());
        let context = mock_context(
            MockProvider::new("mock").with_graph(graph),
            ResourceLimits::unbounded().with_max_duration(Duration::from_secs(30)),
        );

        let response = context
            .motif_search(
                "M",
                "A -> B",
                QueryType::Dotmotif,
                Some(r#"motif.vertex.attribute|{"attribute": "kind"}"#),
            )
            .expect("search");
        let AggregatedResults::Grouped(groups) = response.motif_results else {
            panic!("expected grouped results");
        };
        assert_eq!(groups["A"]["excitatory"], 1);
        assert_eq!(groups["A"]["inhibitory"], 1);
        assert_eq!(groups["B"]["null"], 1);
    }

    #[derive(Debug)]
    struct SlowProvider;

    impl HostProvider for SlowProvider {
        fn provider_type(&self) -> &str {
            "SlowProvider"
        }

        fn accepts(&self, _uri: &str) -> bool {
            true
        }

        fn load_graph(&self, _uri: &str) -> Result<HostGraph> {
            std::thread::sleep(Duration::from_secs(30));
            Ok(HostGraph::new(true))
        }
    }

    #[test]
    fn timed_out_queries_report_an_error_and_sentinel() {
        let router = HostProviderRouter::new();
        router.add_provider("slow", Arc::new(SlowProvider));
        let context = AppContext::new(
            router,
            HostRegistry::new(vec![HostListing::new("S", "slow://graph", "Slow")]),
            ResourceLimits::unbounded().with_max_duration(Duration::from_millis(300)),
        );

        let response = context.vertex_count("S").expect("response");
        assert_eq!(response.vertex_count, FAILED_COUNT);
        assert!(response.error.expect("error").contains("timed out"));
    }

    #[test]
    fn parse_describes_the_motif_without_a_host() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = k4_context(dir.path());

        let response = context.motif_parse("nobody", "A -> B\nB !> A", QueryType::Dotmotif);
        assert!(response.error.is_none());
        assert_eq!(response.motif_entities, vec!["A", "B"]);
        assert_eq!(response.motif_edges, vec![["A".to_string(), "B".to_string()]]);
        let nodelink: Value = serde_json::from_str(&response.motif_nodelink_json).expect("json");
        assert_eq!(nodelink["nodes"].as_array().expect("nodes").len(), 2);

        let failed = context.motif_parse("nobody", "A ->", QueryType::Dotmotif);
        assert!(failed.error.is_some());
    }

    #[test]
    fn cypher_queries_run_through_the_same_pipeline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = k4_context(dir.path());
        let query = "MATCH (a)-[]->(b) RETURN a, b";

        let count = context
            .motif_count("H1", query, QueryType::Cypher)
            .expect("count");
        assert!(count.error.is_none(), "{:?}", count.error);
        assert_eq!(count.motif_count, 12);
        assert_eq!(count.motif_entities, vec!["a", "b"]);
        assert_eq!(count.query_type, QueryType::Cypher);

        let search = context
            .motif_search(
                "H1",
                "MATCH (a)-->(b) RETURN b LIMIT 3",
                QueryType::Cypher,
                Some("motif.vertex"),
            )
            .expect("search");
        assert_eq!(search.motif_count, 3);
        let AggregatedResults::Grouped(groups) = search.motif_results else {
            panic!("expected grouped results");
        };
        assert_eq!(groups.keys().map(String::as_str).collect::<Vec<_>>(), ["b"]);

        let parsed = context.motif_parse("H1", query, QueryType::Cypher);
        assert!(parsed.error.is_none());
        assert_eq!(parsed.motif_edges, vec![["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn query_type_selects_the_parser() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = k4_context(dir.path());

        let response = context
            .motif_count("H1", "A -> B", QueryType::Cypher)
            .expect("response");
        assert_eq!(response.motif_count, FAILED_COUNT);
        assert!(response.error.expect("error").contains("MATCH"));

        let response = context
            .motif_count("H1", "MATCH (a)-->(b) RETURN a", QueryType::Dotmotif)
            .expect("response");
        assert_eq!(response.motif_count, FAILED_COUNT);
        assert!(response.error.is_some());

        let response = context
            .motif_search("H1", "MATCH (a)--(b) RETURN a", QueryType::Cypher, None)
            .expect("response");
        assert_eq!(response.motif_count, FAILED_COUNT);
        assert!(response.error.expect("error").contains("undirected"));
    }

    #[test]
    fn download_exports_graphml_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = k4_context(dir.path());

        let response = context.download_graph("H1", "graphml").expect("download");
        assert!(response.error.is_none());
        assert!(response.graph.contains("<graphml"));

        let response = context.download_graph("H1", "gexf").expect("download");
        assert!(response.graph.is_empty());
        assert!(response.error.expect("error").contains("gexf"));
    }

    fn upload_context(dir: &Path) -> AppContext {
        let router = HostProviderRouter::new();
        let provider = TemporaryGraphHostProvider::new(TemporaryOptions {
            temp_dir: Some(dir.to_path_buf()),
            expiration_days: 14,
        })
        .expect("provider");
        router.add_provider("tmp", Arc::new(provider));
        AppContext::new(
            router,
            HostRegistry::new(Vec::new()),
            ResourceLimits::unbounded().with_max_duration(Duration::from_secs(30)),
        )
    }

    #[test]
    fn uploads_are_queryable_but_unlisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = upload_context(dir.path());

        let upload = context
            .upload_graph(b"source,target\na,b\nb,c\nc,a\n", "triangle.csv", Some("Triangle"))
            .expect("upload");
        assert!(upload.success);

        assert!(context.list_hosts().is_empty());
        assert_eq!(context.edge_count(&upload.temp_id).expect("edges").edge_count, 3);

        let uploads = context.list_uploads().expect("list");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].name, "Triangle");
        assert_eq!(
            context.upload_info(&upload.temp_id).expect("info").original_filename,
            "triangle.csv"
        );

        assert!(context.cleanup_upload(&upload.temp_id).expect("cleanup").success);
        assert_eq!(
            context.vertex_count(&upload.temp_id).expect_err("gone").code,
            "host_not_found"
        );
        assert!(context.cleanup_upload(&upload.temp_id).expect_err("gone").is_not_found());
    }

    #[test]
    fn uploads_require_content_and_a_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = upload_context(dir.path())
            .upload_graph(b"", "g.graphml", None)
            .expect_err("empty");
        assert_eq!(err.code, "empty_upload");

        let context = mock_context(MockProvider::new("mock"), ResourceLimits::unbounded());
        let err = context
            .upload_graph(b"a,b\n", "g.csv", None)
            .expect_err("no store");
        assert_eq!(err.code, "upload_provider_not_found");
    }

    #[test]
    fn surviving_uploads_are_reregistered_on_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let temp_id = upload_context(dir.path())
            .upload_graph(b"source,target\na,b\n", "pair.csv", None)
            .expect("upload")
            .temp_id;

        let config = ServerConfig {
            providers: vec![ProviderConfig {
                id: "tmp".to_string(),
                provider_type: "temporary".to_string(),
                arguments: json!({ "temp_dir": dir.path() }),
            }],
            hosts: Vec::new(),
            query_limits: limits(),
        };
        let context = AppContext::from_config(&config).expect("context");
        assert_eq!(context.vertex_count(&temp_id).expect("vertices").vertex_count, 2);
    }
}
