//! Elasticsearch bulk API client.

use crate::{BulkSummary, Sink, SinkError};
use async_trait::async_trait;
use chrono::SecondsFormat;
use pbsdash_state::Snapshot;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ElasticsearchSink {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<Value>,
}

impl ElasticsearchSink {
    pub fn new(url: &str) -> Result<Self, SinkError> {
        let mut base_url = Url::parse(url).map_err(|error| SinkError::InvalidUrl {
            url: url.to_string(),
            error,
        })?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SinkError> {
        self.base_url
            .join(path)
            .map_err(|error| SinkError::InvalidUrl {
                url: path.to_string(),
                error,
            })
    }

    /// Create or replace the index template covering `{prefix}-*`.
    pub async fn install_template(&self, prefix: &str) -> Result<(), SinkError> {
        let url = self.endpoint(&format!("_index_template/{}", prefix))?;
        let response = self
            .client
            .put(url)
            .json(&index_template(prefix))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::info!("Installed index template for {}-*", prefix);
        Ok(())
    }
}

/// Mappings for the numeric fields, so the first document of a day cannot
/// make them strings.
pub fn index_template(prefix: &str) -> Value {
    json!({
        "index_patterns": [format!("{}-*", prefix)],
        "template": {
            "mappings": {
                "properties": {
                    "@timestamp": { "type": "date" },
                    "cpu_efficiency": { "type": "float" },
                    "elap_time": { "type": "float" },
                    "nodes": { "type": "integer" },
                    "tasks": { "type": "integer" },
                    "reqd_mem": { "type": "long" },
                    "reqd_time": { "type": "integer" },
                    "resources_used.cput": { "type": "long" },
                    "resources_used.walltime": { "type": "long" },
                    "resources_used.ncpus": { "type": "integer" },
                    "resources_used.cpupercent": { "type": "float" },
                    "resources_used.mem": { "type": "long" },
                    "resources_used.vmem": { "type": "long" }
                }
            }
        }
    })
}

/// Build the NDJSON body of a bulk request.
///
/// Document IDs combine job ID and cycle time, so resending a cycle
/// overwrites instead of duplicating.
pub fn bulk_body(snapshot: &Snapshot, index: &str) -> Result<String, SinkError> {
    let timestamp = snapshot
        .taken_at
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    let millis = snapshot.taken_at.timestamp_millis();

    let mut body = String::new();
    for record in &snapshot.records {
        let action = json!({
            "index": {
                "_index": index,
                "_id": format!("{}@{}", record.jobid(), millis),
            }
        });

        let mut document = serde_json::to_value(record)?;
        if let Value::Object(fields) = &mut document {
            fields.insert("@timestamp".to_string(), Value::String(timestamp.clone()));
        }

        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&document)?);
        body.push('\n');
    }

    Ok(body)
}

/// Count per-item outcomes of a bulk response.
fn summarize_response(response: &BulkResponse) -> BulkSummary {
    let mut summary = BulkSummary::default();

    for item in &response.items {
        let error = item
            .as_object()
            .and_then(|ops| ops.values().next())
            .and_then(|outcome| outcome.get("error"));
        match error {
            Some(error) => {
                if summary.failed == 0 {
                    tracing::warn!("Search sink rejected a document: {}", error);
                }
                summary.failed += 1;
            }
            None => summary.indexed += 1,
        }
    }

    summary
}

#[async_trait]
impl Sink for ElasticsearchSink {
    async fn bulk_upsert(
        &self,
        snapshot: &Snapshot,
        index: &str,
    ) -> Result<BulkSummary, SinkError> {
        if snapshot.records.is_empty() {
            return Ok(BulkSummary::default());
        }

        let body = bulk_body(snapshot, index)?;
        let response = self
            .client
            .post(self.endpoint("_bulk")?)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: BulkResponse = response.json().await?;
        Ok(summarize_response(&parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pbsdash_pbs::{JobState, JobSummary};
    use pbsdash_state::CanonicalJobRecord;
    use std::collections::BTreeMap;

    fn record(jobid: &str) -> CanonicalJobRecord {
        CanonicalJobRecord {
            summary: JobSummary {
                jobid: jobid.to_string(),
                username: "abc123".to_string(),
                queue: "normal".to_string(),
                jobname: "job.sh".to_string(),
                session_id: None,
                nodes: 1,
                tasks: 48,
                reqd_mem: None,
                reqd_time: None,
                state: JobState::Queued,
                elap_time: None,
            },
            usage: None,
            cpu_efficiency: Some(f64::NAN),
            full_name: None,
            attributes: BTreeMap::new(),
        }
    }

    fn snapshot() -> Snapshot {
        let taken_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Snapshot::new(taken_at, vec![record("1.gadi"), record("2.gadi")])
    }

    #[test]
    fn test_bulk_body() {
        let body = bulk_body(&snapshot(), "pbs-jobs-2024-05-01").unwrap();
        let lines: Vec<Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);

        assert_eq!(lines[0]["index"]["_index"], "pbs-jobs-2024-05-01");
        assert_eq!(lines[0]["index"]["_id"], "1.gadi@1714557600000");
        assert_eq!(lines[1]["jobid"], "1.gadi");
        assert_eq!(lines[1]["@timestamp"], "2024-05-01T10:00:00.000000Z");
        assert!(lines[1]["cpu_efficiency"].is_null());
        assert_eq!(lines[2]["index"]["_id"], "2.gadi@1714557600000");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_summarize_response() {
        let response: BulkResponse = serde_json::from_value(json!({
            "took": 3,
            "errors": true,
            "items": [
                { "index": { "_id": "a", "status": 201 } },
                { "index": { "_id": "b", "status": 400, "error": { "type": "mapper_parsing_exception" } } },
                { "index": { "_id": "c", "status": 200 } }
            ]
        }))
        .unwrap();
        assert_eq!(
            summarize_response(&response),
            BulkSummary {
                indexed: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let sink = ElasticsearchSink::new("http://search.example:9200/es").unwrap();
        assert_eq!(
            sink.endpoint("_bulk").unwrap().as_str(),
            "http://search.example:9200/es/_bulk"
        );
        assert!(ElasticsearchSink::new("not a url").is_err());
    }

    #[test]
    fn test_index_template() {
        let template = index_template("pbs-jobs");
        assert_eq!(template["index_patterns"][0], "pbs-jobs-*");
        assert_eq!(
            template["template"]["mappings"]["properties"]["reqd_mem"]["type"],
            "long"
        );
    }
}
