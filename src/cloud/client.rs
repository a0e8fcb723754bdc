use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use super::types::{flatten_subnet_record, CloudSubnet, SubnetPage};

/// Cloud subnet inventory, as the reconciler consumes it. Implementations
/// must treat `describe_vpc` as the reachability probe: any error means the
/// VPC's sync is skipped for the cycle.
#[async_trait]
pub trait CloudSubnetApi: Send + Sync {
    async fn describe_vpc(&self, provider_vpc_id: &str) -> Result<()>;

    /// All subnet CIDR records of a VPC, fetched with pagination. One entry
    /// per IPv4 CIDR plus one per associated IPv6 CIDR, capped at
    /// `max_subnets` per VPC.
    async fn list_subnets(
        &self,
        provider_vpc_id: &str,
        page_size: usize,
        max_subnets: usize,
    ) -> Result<Vec<CloudSubnet>>;
}

/// EC2-style JSON gateway client
pub struct Ec2ApiClient {
    base_url: String,
    token: String,
    region: String,
    client: Client,
}

impl Ec2ApiClient {
    pub fn new(url: String, token: String, region: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            token,
            client,
            region,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }
}

#[async_trait]
impl CloudSubnetApi for Ec2ApiClient {
    async fn describe_vpc(&self, provider_vpc_id: &str) -> Result<()> {
        let resp = self
            .client
            .get(self.api_url(&format!("/vpcs/{}", provider_vpc_id)))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .query(&[("region", self.region.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "describe-vpc {} failed: {} {}",
                provider_vpc_id,
                status,
                body
            ));
        }
        Ok(())
    }

    async fn list_subnets(
        &self,
        provider_vpc_id: &str,
        page_size: usize,
        max_subnets: usize,
    ) -> Result<Vec<CloudSubnet>> {
        let mut subnets = Vec::new();
        let mut next_token: Option<String> = None;
        let mut total_pages = 0usize;

        let page_size_param = page_size.to_string();
        loop {
            let mut request = self
                .client
                .get(self.api_url(&format!("/vpcs/{}/subnets", provider_vpc_id)))
                .header("Authorization", self.auth_header())
                .header("Accept", "application/json")
                .query(&[
                    ("region", self.region.as_str()),
                    ("page_size", page_size_param.as_str()),
                ]);
            if let Some(token) = &next_token {
                request = request.query(&[("next_token", token.as_str())]);
            }

            let resp = request.send().await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(anyhow::anyhow!(
                    "describe-subnets {} failed: {} {}",
                    provider_vpc_id,
                    status,
                    body
                ));
            }

            let page: SubnetPage = resp.json().await?;
            total_pages += 1;
            tracing::debug!(
                "Processing page {} for VPC {}",
                total_pages,
                provider_vpc_id
            );

            for record in &page.subnets {
                subnets.extend(flatten_subnet_record(record));
                if subnets.len() >= max_subnets {
                    tracing::warn!(
                        "VPC {} hit the {}-subnet cap; truncating",
                        provider_vpc_id,
                        max_subnets
                    );
                    subnets.truncate(max_subnets);
                    return Ok(subnets);
                }
            }

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        tracing::info!(
            "Fetched {} subnets across {} pages for VPC {}",
            subnets.len(),
            total_pages,
            provider_vpc_id
        );
        Ok(subnets)
    }
}
