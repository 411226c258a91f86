//! Checkpoint publication backends, configured from a YAML list of
//! `{method, config}` entries.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use super::Checkpoint;
use crate::error::{HighwayError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    /// The dns-checkpoints mutation API
    HighwayDns,
    /// Cloudflare's dns_records batch API
    Cloudflare,
    /// Njalla's JSON-RPC API
    Njalla,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PushTarget {
    pub method: Method,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl PushTarget {
    fn config_value(&self, key: &str) -> Result<&str> {
        self.config
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| HighwayError::ConfigInvalid(format!("missing config key '{key}'")))
    }

    pub async fn send(&self, client: &reqwest::Client, checkpoints: &[Checkpoint]) -> Result<()> {
        match self.method {
            Method::HighwayDns => self.send_highway(client, checkpoints).await,
            Method::Cloudflare => self.send_cloudflare(client, checkpoints).await,
            Method::Njalla => Err(HighwayError::UnknownMethod("njalla".into())),
        }
    }

    /// POST the checkpoints to the dns-checkpoints mutation API, replacing
    /// any `txt` parameters already present in the configured URL.
    async fn send_highway(&self, client: &reqwest::Client, checkpoints: &[Checkpoint]) -> Result<()> {
        let mut url = reqwest::Url::parse(self.config_value("url")?)
            .map_err(|e| HighwayError::ConfigInvalid(format!("invalid url: {e}")))?;

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "txt")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in &kept {
                pairs.append_pair(key, value);
            }
            for checkpoint in checkpoints {
                pairs.append_pair("txt", &checkpoint.to_string());
            }
        }

        let response = client
            .post(url)
            .send()
            .await
            .map_err(|e| HighwayError::BackendPublish(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HighwayError::BackendPublish(format!(
                "checkpointer returned non-200 status code: {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    /// Replace the TXT record set at the configured name: batch-delete every
    /// existing TXT record, then post the new set.
    async fn send_cloudflare(
        &self,
        client: &reqwest::Client,
        checkpoints: &[Checkpoint],
    ) -> Result<()> {
        let api_token = match std::env::var("CLOUDFLARE_API_TOKEN") {
            Ok(token) => token,
            Err(_) => self.config_value("api-token")?.to_string(),
        };
        let zone_id = self.config_value("zone-id")?;
        let name = self.config_value("name")?;
        let ttl: u32 = self
            .config_value("ttl")?
            .parse()
            .map_err(|_| HighwayError::ConfigInvalid("invalid cloudflare ttl".into()))?;

        let records_url =
            format!("https://api.cloudflare.com/client/v4/zones/{zone_id}/dns_records");

        // collect existing record ids to remove
        let mut deletes = Vec::new();
        let mut page = 1u32;
        loop {
            let page_param = page.to_string();
            let response: CfListResponse = client
                .get(&records_url)
                .bearer_auth(&api_token)
                .query(&[
                    ("type", "TXT"),
                    ("name", name),
                    ("match", "all"),
                    ("per_page", "100"),
                    ("page", page_param.as_str()),
                ])
                .send()
                .await
                .map_err(|e| HighwayError::BackendPublish(e.to_string()))?
                .json()
                .await
                .map_err(|e| HighwayError::BackendPublish(e.to_string()))?;

            if !response.success {
                return Err(HighwayError::BackendPublish(format!(
                    "cloudflare list failed: {:?}",
                    response.errors
                )));
            }

            for record in &response.result {
                if record.name != name || record.record_type != "TXT" {
                    continue;
                }
                deletes.push(CfDelete {
                    id: record.id.clone(),
                });
            }

            let done = response
                .result_info
                .map(|info| info.page >= info.total_pages)
                .unwrap_or(true);
            if done {
                break;
            }
            page += 1;
        }

        let posts: Vec<CfTxtRecord> = checkpoints
            .iter()
            .map(|checkpoint| CfTxtRecord {
                name: name.to_string(),
                ttl,
                record_type: "TXT".to_string(),
                content: format!("\"{checkpoint}\""),
                comment: "managed by monero-highway".to_string(),
            })
            .collect();

        debug!(
            "cloudflare batch: {} deletes, {} posts",
            deletes.len(),
            posts.len()
        );

        let response: CfBatchResponse = client
            .post(format!("{records_url}/batch"))
            .bearer_auth(&api_token)
            .json(&CfBatchRequest { deletes, posts })
            .send()
            .await
            .map_err(|e| HighwayError::BackendPublish(e.to_string()))?
            .json()
            .await
            .map_err(|e| HighwayError::BackendPublish(e.to_string()))?;

        if !response.success {
            return Err(HighwayError::BackendPublish(format!(
                "cloudflare batch failed: {:?}",
                response.errors
            )));
        }
        Ok(())
    }
}

/// Parse the YAML push configuration.
pub fn parse_push_config(data: &str) -> Result<Vec<PushTarget>> {
    serde_yaml::from_str(data).map_err(|e| HighwayError::ConfigInvalid(e.to_string()))
}

#[derive(Deserialize)]
struct CfListResponse {
    success: bool,
    #[serde(default)]
    result: Vec<CfRecord>,
    result_info: Option<CfResultInfo>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct CfRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
}

#[derive(Deserialize)]
struct CfResultInfo {
    page: u32,
    total_pages: u32,
}

#[derive(serde::Serialize)]
struct CfBatchRequest {
    deletes: Vec<CfDelete>,
    posts: Vec<CfTxtRecord>,
}

#[derive(serde::Serialize)]
struct CfDelete {
    id: String,
}

#[derive(serde::Serialize)]
struct CfTxtRecord {
    name: String,
    ttl: u32,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    comment: String,
}

#[derive(Deserialize)]
struct CfBatchResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_push_config() {
        let yaml = r#"
- method: highway-dns
  config:
    url: "http://127.0.0.1:19080/"
- method: cloudflare
  config:
    api-token: "token"
    zone-id: "zone"
    name: "checkpoints.example.com"
    ttl: "300"
"#;
        let targets = parse_push_config(yaml).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].method, Method::HighwayDns);
        assert_eq!(targets[1].method, Method::Cloudflare);
        assert_eq!(
            targets[1].config.get("name").unwrap(),
            "checkpoints.example.com"
        );
    }

    #[test]
    fn test_parse_push_config_rejects_unknown_method() {
        assert!(parse_push_config("- method: carrier-pigeon\n").is_err());
    }

    #[test]
    fn test_njalla_unimplemented() {
        let target = PushTarget {
            method: Method::Njalla,
            config: HashMap::new(),
        };
        let client = reqwest::Client::new();
        let result = block_on(target.send(&client, &[]));
        assert!(matches!(result, Err(HighwayError::UnknownMethod(_))));
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }
}
