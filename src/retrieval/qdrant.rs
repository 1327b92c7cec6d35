//! Qdrant-backed neighbor retrieval over the HTTP API.

use super::{MetricInfo, Neighbor, NeighborRetriever, RetrievalError, SimilarityMetric};
use crate::chunks::chunk_from_value;
use crate::config::RetrievalConfig;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;

/// Neighbor retriever that queries a Qdrant collection by point id.
///
/// Chunks are located by an exact payload match on the configured chunk-id field, then the
/// collection is queried with that point as the query vector.
pub struct QdrantRetriever {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    chunk_id_field: String,
    metric: OnceCell<MetricInfo>,
}

impl QdrantRetriever {
    /// Construct a retriever from configuration.
    pub fn new(config: &RetrievalConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder().user_agent("qacurator/0.1").build()?;
        let base_url =
            normalize_base_url(&config.qdrant_url).map_err(RetrievalError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %config.collection,
            has_api_key = config
                .api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant retriever"
        );
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
            chunk_id_field: config.chunk_id_field.clone(),
            metric: OnceCell::new(),
        })
    }

    async fn fetch_metric(&self) -> Result<MetricInfo, RetrievalError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = RetrievalError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Failed to read collection info");
            return Err(error);
        }
        let info: Value = response.json().await?;
        let distance = find_distance(&info["result"]["config"]["params"]["vectors"]).ok_or_else(
            || RetrievalError::InvalidResponse("collection info carries no vector distance".into()),
        )?;
        metric_from_distance(&distance)
    }

    async fn resolve_point_id(&self, chunk_id: &str) -> Result<Option<Value>, RetrievalError> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": self.chunk_id_field, "match": { "value": chunk_id } }
                ]
            },
            "limit": 1,
            "with_payload": false,
            "with_vector": false,
        });
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/scroll", self.collection),
            )
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = RetrievalError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, chunk_id, error = %error, "Failed to resolve chunk point");
            return Err(error);
        }
        let ScrollResponse { result } = response.json().await?;
        Ok(result.points.into_iter().next().and_then(|point| point.id))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }
}

#[async_trait]
impl NeighborRetriever for QdrantRetriever {
    async fn metric(&self) -> Result<MetricInfo, RetrievalError> {
        self.metric
            .get_or_try_init(|| self.fetch_metric())
            .await
            .copied()
    }

    async fn get_neighbors(
        &self,
        chunk_id: &str,
        top_k: usize,
    ) -> Result<Vec<Neighbor>, RetrievalError> {
        let Some(point_id) = self.resolve_point_id(chunk_id).await? else {
            tracing::debug!(chunk_id, "Chunk not present in vector index");
            return Ok(Vec::new());
        };

        // One extra slot because the query point usually comes back as its own best match.
        let body = json!({
            "query": point_id,
            "limit": top_k + 1,
            "with_payload": true,
        });
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = RetrievalError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, chunk_id, error = %error, "Qdrant neighbor query failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        let neighbors = points
            .into_iter()
            .filter_map(|point| {
                let chunk = chunk_from_value(Value::Object(point.payload?))?;
                Some(Neighbor {
                    chunk,
                    score: point.score,
                })
            })
            .filter(|neighbor| neighbor.chunk.chunk_id != chunk_id)
            .take(top_k)
            .collect();
        Ok(neighbors)
    }
}

/// Map a Qdrant distance name onto the metric family.
fn metric_from_distance(distance: &str) -> Result<MetricInfo, RetrievalError> {
    match distance {
        "Cosine" => Ok(MetricInfo {
            metric: SimilarityMetric::InnerProduct,
            normalized: true,
        }),
        "Dot" => Ok(MetricInfo {
            metric: SimilarityMetric::InnerProduct,
            normalized: false,
        }),
        "Euclid" | "Manhattan" => Ok(MetricInfo {
            metric: SimilarityMetric::L2,
            normalized: false,
        }),
        other => Err(RetrievalError::InvalidResponse(format!(
            "unsupported vector distance {other}"
        ))),
    }
}

/// Read the distance from a single unnamed vector config or the first named vector.
fn find_distance(vectors: &Value) -> Option<String> {
    if let Some(distance) = vectors.get("distance").and_then(Value::as_str) {
        return Some(distance.to_string());
    }
    vectors
        .as_object()?
        .values()
        .find_map(|named| named.get("distance").and_then(Value::as_str))
        .map(str::to_string)
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
struct QueryPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Deserialize)]
struct ScrollResult {
    #[serde(default)]
    points: Vec<ScrollPoint>,
}

#[derive(Deserialize)]
struct ScrollPoint {
    #[serde(default)]
    id: Option<Value>,
}
