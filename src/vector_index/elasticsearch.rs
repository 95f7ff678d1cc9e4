//! Elasticsearch vector index.
//!
//! Segments live in one index with a `dense_vector` field; search uses a
//! `script_score` query over `cosineSimilarity`, shifted by +1.0 on the server
//! (scores must be non-negative) and shifted back here. Keyword search is a
//! `multi_match` over the segment text scored by BM25.
//!
//! Transport failures and 5xx answers mean the cluster is unavailable; any
//! other rejected request is reported as a store error, since retrying it
//! cannot help.

use super::{rank_hits, IndexEntry, SearchFilter, SegmentHit, VectorIndex};
use crate::error::{Result, TubeqaError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// Documents fetched per page when listing a video's segment ids.
const SEGMENT_PAGE_SIZE: usize = 1_000;

/// Fields searched by keyword queries.
const TEXT_FIELDS: [&str; 1] = ["content"];

/// Elasticsearch-backed vector index.
pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
    index_name: String,
    dimensions: usize,
    ready: OnceCell<()>,
}

impl ElasticsearchIndex {
    /// Create a client for the given cluster. No request is made until first use.
    pub fn new(base_url: &str, index_name: &str, dimensions: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TubeqaError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index_name: index_name.to_string(),
            dimensions,
            ready: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}{}", self.base_url, self.index_name, path)
    }

    /// Send a request and decode the JSON body. `None` means the index does not exist.
    async fn send(&self, request: RequestBuilder) -> Result<Option<Value>> {
        let response = request
            .send()
            .await
            .map_err(|e| TubeqaError::IndexUnavailable(format!("Elasticsearch request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| TubeqaError::IndexUnavailable(format!("Invalid Elasticsearch response: {}", e)))?;
        Ok(Some(body))
    }

    /// Create the index with its mapping if it does not exist yet.
    async fn ensure_index(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                let exists = self.send(self.client.get(self.url(""))).await?.is_some();
                if !exists {
                    self.send(self.client.put(self.url("")).json(&mapping(self.dimensions)))
                        .await?;
                    info!("Created Elasticsearch index {}", self.index_name);
                }
                Ok::<(), TubeqaError>(())
            })
            .await?;
        Ok(())
    }

    async fn delete_by_query(&self, query: Value) -> Result<usize> {
        let body = self
            .send(
                self.client
                    .post(self.url("/_delete_by_query?refresh=true"))
                    .json(&json!({ "query": query })),
            )
            .await?;
        Ok(body
            .and_then(|b| b["deleted"].as_u64())
            .unwrap_or(0) as usize)
    }
}

/// Error for a non-success status other than 404.
fn status_error(status: StatusCode, body: &str) -> TubeqaError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        TubeqaError::IndexUnavailable(format!("Elasticsearch returned HTTP {}: {}", status, body))
    } else {
        TubeqaError::Store(format!("Elasticsearch rejected request with HTTP {}: {}", status, body))
    }
}

fn mapping(dimensions: usize) -> Value {
    json!({
        "mappings": {
            "properties": {
                "video_id": { "type": "keyword" },
                "segment_id": { "type": "keyword" },
                "start_seconds": { "type": "float" },
                "content": { "type": "text" },
                "embedding": {
                    "type": "dense_vector",
                    "dims": dimensions,
                    "index": true,
                    "similarity": "cosine"
                }
            }
        }
    })
}

fn document_id(video_id: &str, segment_id: &str) -> String {
    format!("{}:{}", video_id, segment_id)
}

/// Newline-delimited `_bulk` body indexing every entry.
fn bulk_body(index_name: &str, video_id: &str, entries: &[IndexEntry]) -> String {
    let mut body = String::new();
    for entry in entries {
        let action = json!({
            "index": {
                "_index": index_name,
                "_id": document_id(video_id, &entry.segment.segment_id),
            }
        });
        let doc = json!({
            "video_id": video_id,
            "segment_id": entry.segment.segment_id,
            "start_seconds": entry.segment.start_seconds,
            "content": entry.segment.content,
            "embedding": entry.embedding,
        });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&doc.to_string());
        body.push('\n');
    }
    body
}

fn filter_query(filter: &SearchFilter) -> Value {
    match &filter.video_id {
        Some(video_id) => json!({ "bool": { "filter": [{ "term": { "video_id": video_id } }] } }),
        None => json!({ "match_all": {} }),
    }
}

fn search_body(query: &[f32], k: usize, filter: &SearchFilter) -> Value {
    json!({
        "size": k,
        "query": {
            "script_score": {
                "query": filter_query(filter),
                "script": {
                    "source": "cosineSimilarity(params.query_vector, 'embedding') + 1.0",
                    "params": { "query_vector": query }
                }
            }
        },
        "_source": ["video_id", "segment_id", "start_seconds", "content"]
    })
}

fn text_search_body(query: &str, k: usize, filter: &SearchFilter) -> Value {
    let mut bool_query = json!({
        "must": [{ "multi_match": { "query": query, "fields": TEXT_FIELDS } }]
    });
    if let Some(video_id) = &filter.video_id {
        bool_query["filter"] = json!([{ "term": { "video_id": video_id } }]);
    }
    json!({
        "size": k,
        "query": { "bool": bool_query },
        "_source": ["video_id", "segment_id", "start_seconds", "content"]
    })
}

/// One page of a video's segment ids, after the sort values of the previous page.
fn segment_ids_body(video_id: &str, after: Option<&Value>) -> Value {
    let mut body = json!({
        "size": SEGMENT_PAGE_SIZE,
        "query": filter_query(&SearchFilter::video(video_id)),
        "sort": [{ "start_seconds": "asc" }, { "segment_id": "asc" }],
        "_source": ["segment_id"]
    });
    if let Some(after) = after {
        body["search_after"] = after.clone();
    }
    body
}

/// Segment ids of a page and the sort values to continue from.
fn parse_segment_page(body: &Value) -> (Vec<String>, Option<Value>) {
    let hits = body["hits"]["hits"].as_array().cloned().unwrap_or_default();
    let ids = hits
        .iter()
        .filter_map(|h| h["_source"]["segment_id"].as_str().map(String::from))
        .collect();
    let last_sort = hits.last().map(|h| h["sort"].clone()).filter(|s| !s.is_null());
    (ids, last_sort)
}

/// Hits of a search response, with `offset` subtracted from each score.
fn parse_hits(body: &Value, offset: f64) -> Vec<SegmentHit> {
    body["hits"]["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let source = &hit["_source"];
                    Some(SegmentHit {
                        video_id: source["video_id"].as_str()?.to_string(),
                        segment_id: source["segment_id"].as_str()?.to_string(),
                        start_seconds: source["start_seconds"].as_f64().unwrap_or(0.0),
                        content: source["content"].as_str().unwrap_or_default().to_string(),
                        score: (hit["_score"].as_f64()? - offset) as f32,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn first_bulk_error(body: &Value) -> Option<String> {
    if !body["errors"].as_bool().unwrap_or(false) {
        return None;
    }
    body["items"]
        .as_array()?
        .iter()
        .find_map(|item| {
            let error = &item["index"]["error"];
            (!error.is_null()).then(|| error.to_string())
        })
        .or_else(|| Some("unknown bulk error".to_string()))
}

#[async_trait]
impl VectorIndex for ElasticsearchIndex {
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn index_segments(&self, video_id: &str, entries: &[IndexEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        self.ensure_index().await?;

        let body = self
            .send(
                self.client
                    .post(format!("{}/_bulk?refresh=true", self.base_url))
                    .header("Content-Type", "application/x-ndjson")
                    .body(bulk_body(&self.index_name, video_id, entries)),
            )
            .await?
            .unwrap_or_default();

        if let Some(error) = first_bulk_error(&body) {
            return Err(TubeqaError::IndexUnavailable(format!(
                "Elasticsearch bulk indexing failed: {}",
                error
            )));
        }

        debug!("Indexed {} segments for {}", entries.len(), video_id);
        Ok(entries.len())
    }

    #[instrument(skip(self, query))]
    async fn search(&self, query: &[f32], k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let body = self
            .send(
                self.client
                    .post(self.url("/_search"))
                    .json(&search_body(query, k, filter)),
            )
            .await?;

        // The server only orders by score; apply the full tie-break locally.
        Ok(body.map(|b| rank_hits(parse_hits(&b, 1.0), k)).unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn text_search(&self, query: &str, k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let body = self
            .send(
                self.client
                    .post(self.url("/_search"))
                    .json(&text_search_body(query, k, filter)),
            )
            .await?;

        Ok(body.map(|b| rank_hits(parse_hits(&b, 0.0), k)).unwrap_or_default())
    }

    async fn segment_ids(&self, video_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut after: Option<Value> = None;

        loop {
            let body = self
                .send(
                    self.client
                        .post(self.url("/_search"))
                        .json(&segment_ids_body(video_id, after.as_ref())),
                )
                .await?;
            let Some(body) = body else { break };

            let (page, last_sort) = parse_segment_page(&body);
            let full_page = page.len() == SEGMENT_PAGE_SIZE;
            ids.extend(page);
            match last_sort {
                Some(sort) if full_page => after = Some(sort),
                _ => break,
            }
        }

        debug!("Listed {} indexed segments for {}", ids.len(), video_id);
        Ok(ids)
    }

    async fn delete_segments(&self, video_id: &str, segment_ids: &[String]) -> Result<usize> {
        if segment_ids.is_empty() {
            return Ok(0);
        }
        self.delete_by_query(json!({
            "bool": {
                "filter": [
                    { "term": { "video_id": video_id } },
                    { "terms": { "segment_id": segment_ids } }
                ]
            }
        }))
        .await
    }

    async fn delete_video(&self, video_id: &str) -> Result<usize> {
        self.delete_by_query(filter_query(&SearchFilter::video(video_id)))
            .await
    }

    async fn len(&self) -> Result<usize> {
        let body = self.send(self.client.get(self.url("/_count"))).await?;
        Ok(body.and_then(|b| b["count"].as_u64()).unwrap_or(0) as usize)
    }

    fn name(&self) -> &'static str {
        "elasticsearch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TranscriptSegment;

    #[test]
    fn test_bulk_body_is_ndjson_keyed_by_segment() {
        let entries = vec![IndexEntry::new(
            TranscriptSegment::new("v1", "s0", "hello", 1.5, 2.0),
            vec![0.5, 0.5],
        )];
        let body = bulk_body("segments", "v1", &entries);
        let lines: Vec<Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["index"]["_id"], "v1:s0");
        assert_eq!(lines[1]["segment_id"], "s0");
        assert_eq!(lines[1]["embedding"][1], 0.5);
    }

    #[test]
    fn test_search_body_filters_before_scoring() {
        let body = search_body(&[1.0, 0.0], 3, &SearchFilter::video("v9"));
        assert_eq!(body["size"], 3);
        let script_score = &body["query"]["script_score"];
        assert_eq!(
            script_score["query"]["bool"]["filter"][0]["term"]["video_id"],
            "v9"
        );
        assert!(script_score["script"]["source"]
            .as_str()
            .unwrap()
            .contains("cosineSimilarity"));

        let unfiltered = search_body(&[1.0], 1, &SearchFilter::all());
        assert!(unfiltered["query"]["script_score"]["query"]["match_all"].is_object());
    }

    #[test]
    fn test_parse_hits_shifts_scores_back() {
        let body = json!({
            "hits": { "hits": [
                { "_score": 1.9, "_source": { "video_id": "v", "segment_id": "a", "start_seconds": 4.0, "content": "x" } },
                { "_score": 1.2, "_source": { "video_id": "v", "segment_id": "b", "start_seconds": 8.0, "content": "y" } },
                { "_score": 1.1, "_source": { "content": "missing ids" } }
            ]}
        });
        let hits = parse_hits(&body, 1.0);
        assert_eq!(hits.len(), 2);
        assert!((hits[0].score - 0.9).abs() < 1e-6);
        assert_eq!(hits[1].segment_id, "b");
    }

    #[test]
    fn test_text_search_body_matches_content() {
        let body = text_search_body("closures capture", 4, &SearchFilter::video("v2"));
        assert_eq!(body["size"], 4);
        let bool_query = &body["query"]["bool"];
        assert_eq!(bool_query["must"][0]["multi_match"]["query"], "closures capture");
        assert_eq!(bool_query["must"][0]["multi_match"]["fields"][0], "content");
        assert_eq!(bool_query["filter"][0]["term"]["video_id"], "v2");

        let unfiltered = text_search_body("closures", 4, &SearchFilter::all());
        assert!(unfiltered["query"]["bool"]["filter"].is_null());
    }

    #[test]
    fn test_keyword_scores_are_not_shifted() {
        let body = json!({
            "hits": { "hits": [
                { "_score": 3.5, "_source": { "video_id": "v", "segment_id": "a", "start_seconds": 0.0, "content": "x" } }
            ]}
        });
        assert!((parse_hits(&body, 0.0)[0].score - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_segment_listing_pages_with_search_after() {
        let first = segment_ids_body("v1", None);
        assert_eq!(first["size"], SEGMENT_PAGE_SIZE);
        assert!(first["search_after"].is_null());

        let page = json!({
            "hits": { "hits": [
                { "_source": { "segment_id": "s0" }, "sort": [0.0, "s0"] },
                { "_source": { "segment_id": "s1" }, "sort": [5.0, "s1"] }
            ]}
        });
        let (ids, last_sort) = parse_segment_page(&page);
        assert_eq!(ids, vec!["s0", "s1"]);
        let last_sort = last_sort.unwrap();
        assert_eq!(last_sort, json!([5.0, "s1"]));

        let next = segment_ids_body("v1", Some(&last_sort));
        assert_eq!(next["search_after"], json!([5.0, "s1"]));

        let (empty, none) = parse_segment_page(&json!({ "hits": { "hits": [] } }));
        assert!(empty.is_empty());
        assert!(none.is_none());
    }

    #[test]
    fn test_client_errors_are_not_outages() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "shards").is_index_unavailable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "busy").is_index_unavailable());

        let rejected = status_error(StatusCode::BAD_REQUEST, "parsing_exception");
        assert!(!rejected.is_index_unavailable());
        assert!(matches!(rejected, TubeqaError::Store(ref m) if m.contains("parsing_exception")));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            TubeqaError::Store(_)
        ));
    }

    #[test]
    fn test_first_bulk_error() {
        assert_eq!(first_bulk_error(&json!({ "errors": false, "items": [] })), None);
        let failed = json!({
            "errors": true,
            "items": [
                { "index": { "status": 201 } },
                { "index": { "error": { "type": "mapper_parsing_exception" } } }
            ]
        });
        assert!(first_bulk_error(&failed).unwrap().contains("mapper_parsing_exception"));
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_unavailable() {
        let index = ElasticsearchIndex::new(
            "http://127.0.0.1:1",
            "segments",
            2,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = index
            .search(&[1.0, 0.0], 5, &SearchFilter::all())
            .await
            .unwrap_err();
        assert!(err.is_index_unavailable());
    }
}
