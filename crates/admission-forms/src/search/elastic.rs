use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{SearchBackend, SearchError, SearchResponse};
use crate::config::SearchConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ElasticsearchClient {
    client: reqwest::Client,
    node: String,
    alias: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchClient {
    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        let node = config
            .node
            .as_deref()
            .map(|node| node.trim_end_matches('/').to_string())
            .filter(|node| !node.is_empty())
            .ok_or(SearchError::NotConfigured)?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!config.tls_reject_unauthorized)
            .build()
            .map_err(|err| SearchError::Client(err.to_string()))?;

        Ok(Self {
            client,
            node,
            alias: config.alias.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn search_url(&self) -> String {
        format!("{}/{}/_search", self.node, self.alias)
    }
}

/// Wraps the caller's query so only documents of `locale` match.
pub fn locale_filtered(query: Value, locale: &str) -> Value {
    json!({
        "query": {
            "bool": {
                "must": [
                    query,
                    { "term": { "locale": locale } }
                ]
            }
        }
    })
}

#[async_trait]
impl SearchBackend for ElasticsearchClient {
    async fn search(&self, query: Value, locale: &str) -> Result<SearchResponse, SearchError> {
        let mut request = self
            .client
            .post(self.search_url())
            .json(&locale_filtered(query, locale));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "search backend rejected query");
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result: SearchResponse = response.json().await?;
        debug!(locale, took = result.took, hits = result.hits.hits.len(), "search completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(node: &str) -> SearchConfig {
        SearchConfig {
            node: Some(node.to_string()),
            username: Some("elastic".to_string()),
            password: Some("changeme".to_string()),
            alias: "site-index".to_string(),
            tls_reject_unauthorized: true,
        }
    }

    #[tokio::test]
    async fn posts_locale_filtered_query_and_reshapes_hits() {
        let server = MockServer::start().await;
        let query = json!({"match": {"title": "admission"}});
        Mock::given(method("POST"))
            .and(path("/site-index/_search"))
            .and(header_exists("authorization"))
            .and(body_json(locale_filtered(query.clone(), "ur")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "took": 4,
                "timed_out": false,
                "_shards": {"total": 1},
                "hits": {
                    "total": {"value": 1, "relation": "eq"},
                    "max_score": 1.7,
                    "hits": [{
                        "_index": "site-index-v2",
                        "_id": "event-3",
                        "_score": 1.7,
                        "_source": {"title": "Admission Open Day", "locale": "ur"}
                    }]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ElasticsearchClient::from_config(&config(&server.uri())).expect("client");
        let result = client.search(query, "ur").await.expect("search succeeds");

        assert_eq!(result.took, 4);
        assert_eq!(result.hits.total, json!({"value": 1, "relation": "eq"}));
        assert_eq!(result.hits.hits[0].id, "event-3");
        assert_eq!(result.hits.hits[0].source["title"], json!("Admission Open Day"));
    }

    #[tokio::test]
    async fn backend_errors_carry_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("parsing_exception"))
            .mount(&server)
            .await;

        let client = ElasticsearchClient::from_config(&config(&server.uri())).expect("client");
        let err = client
            .search(json!({"bogus": {}}), "en")
            .await
            .expect_err("backend rejects query");
        match err {
            SearchError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "parsing_exception");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_node_is_not_configured() {
        let mut config = config("http://localhost:9200");
        config.node = None;
        assert!(matches!(
            ElasticsearchClient::from_config(&config),
            Err(SearchError::NotConfigured)
        ));
    }
}
