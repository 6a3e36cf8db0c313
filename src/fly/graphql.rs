//! Fly control-plane API client.
//!
//! [`ControlApi`] is the seam the application and IP address reconcilers are
//! written against; [`FlyGraphqlClient`] implements it over the Fly GraphQL
//! endpoint.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::error::{ApiError, FlyrecError, Result};

use super::types::{
    AllocateIpInput, AppRecord, AutoscaleRegionInput, BackendError, CreateAppInput,
    IpAddressRecord, Organization,
};

/// Fly GraphQL API URL.
pub const FLY_GRAPHQL_URL: &str = "https://api.fly.io/graphql";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Error returned by control API operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlApiError {
    /// The backend answered with a structured, ordered error list.
    #[error("{}", join_messages(.0))]
    Backend(Vec<BackendError>),

    /// The request did not produce a usable GraphQL response.
    #[error("{0}")]
    Transport(String),
}

fn join_messages(errors: &[BackendError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Control-plane operations on applications and IP addresses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Resolves the organization used when none is declared.
    async fn default_organization(&self) -> std::result::Result<Organization, ControlApiError>;

    /// Creates an application.
    async fn create_app(
        &self,
        input: &CreateAppInput,
    ) -> std::result::Result<AppRecord, ControlApiError>;

    /// Creates an application and sets its autoscale regions in one request.
    async fn create_app_with_autoscale(
        &self,
        input: &CreateAppInput,
        regions: Vec<AutoscaleRegionInput>,
    ) -> std::result::Result<AppRecord, ControlApiError>;

    /// Queries a full application by name.
    async fn get_app(&self, name: &str) -> std::result::Result<AppRecord, ControlApiError>;

    /// Replaces the autoscale regions of an application.
    async fn update_autoscale_regions(
        &self,
        app: &str,
        regions: Vec<AutoscaleRegionInput>,
        reset_regions: bool,
    ) -> std::result::Result<AppRecord, ControlApiError>;

    /// Deletes an application by name.
    async fn delete_app(&self, name: &str) -> std::result::Result<(), ControlApiError>;

    /// Allocates an IP address.
    async fn allocate_ip(
        &self,
        input: &AllocateIpInput,
    ) -> std::result::Result<IpAddressRecord, ControlApiError>;

    /// Queries an IP address of an application.
    async fn get_ip(
        &self,
        app: &str,
        address: &str,
    ) -> std::result::Result<IpAddressRecord, ControlApiError>;

    /// Releases an IP address by ID.
    async fn release_ip(&self, id: &str) -> std::result::Result<(), ControlApiError>;
}

/// Fly GraphQL API client.
#[derive(Debug, Clone)]
pub struct FlyGraphqlClient {
    /// HTTP client.
    client: Client,
    /// GraphQL endpoint.
    endpoint: String,
    /// API token.
    token: String,
    /// Attempts per request.
    max_retries: u32,
}

/// GraphQL request structure.
#[derive(Debug, Serialize)]
struct GraphQLRequest {
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<serde_json::Value>,
}

/// GraphQL response structure.
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<BackendError>>,
}

impl<T> GraphQLResponse<T> {
    /// Splits the response into data or the structured error list.
    fn into_result(self) -> std::result::Result<T, ControlApiError> {
        if let Some(errors) = self.errors.filter(|e| !e.is_empty()) {
            return Err(ControlApiError::Backend(errors));
        }

        self.data
            .ok_or_else(|| ControlApiError::Transport(String::from("No data in response")))
    }
}

const APP_FIELDS: &str = r"
    fragment AppFields on App {
        name
        network
        organization {
            id
        }
        autoscaling {
            preferredRegion
            regions {
                code
            }
        }
    }
";

/// Wire shape of an application.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppNode {
    name: String,
    #[serde(default)]
    network: Option<String>,
    organization: OrganizationRef,
    #[serde(default)]
    autoscaling: Option<AutoscalingNode>,
}

#[derive(Debug, Deserialize)]
struct OrganizationRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoscalingNode {
    #[serde(default)]
    preferred_region: Option<String>,
    #[serde(default)]
    regions: Vec<RegionNode>,
}

#[derive(Debug, Deserialize)]
struct RegionNode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct AppPayload {
    app: AppNode,
}

impl From<AppNode> for AppRecord {
    fn from(node: AppNode) -> Self {
        let (preferred_region, regions) = node.autoscaling.map_or_else(
            || (String::new(), Vec::new()),
            |a| {
                (
                    a.preferred_region.unwrap_or_default(),
                    a.regions.into_iter().map(|r| r.code).collect(),
                )
            },
        );

        Self {
            name: node.name,
            network: node.network.unwrap_or_default(),
            organization_id: node.organization.id,
            preferred_region,
            regions,
        }
    }
}

impl FlyGraphqlClient {
    /// Creates a client against the public Fly GraphQL endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: &str) -> Result<Self> {
        Self::with_endpoint(FLY_GRAPHQL_URL, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client against a custom endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_endpoint(endpoint: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::ClientBuild {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token: token.to_string(),
            max_retries: MAX_RETRIES,
        })
    }

    /// Sets the number of attempts per request.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Executes a GraphQL document, retrying transient transport failures.
    async fn execute<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> std::result::Result<T, ControlApiError> {
        let request = GraphQLRequest {
            query: query.to_string(),
            variables,
        };

        let mut last_error: Option<FlyrecError> = None;

        for attempt in 0..self.max_retries.max(1) {
            if attempt > 0 {
                let backoff = Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt));
                let hinted = last_error
                    .as_ref()
                    .and_then(FlyrecError::retry_delay_secs)
                    .map_or(Duration::ZERO, Duration::from_secs);
                let delay = backoff.max(hinted);
                debug!("Retry attempt {attempt} of {} in {delay:?}", self.max_retries);
                tokio::time::sleep(delay).await;
            }

            match self.execute_once::<T>(&request).await {
                Ok(response) => return response.into_result(),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(ControlApiError::Transport(e.to_string())),
            }
        }

        Err(ControlApiError::Transport(last_error.map_or_else(
            || String::from("Max retries exceeded"),
            |e| e.to_string(),
        )))
    }

    /// Executes a single GraphQL request.
    async fn execute_once<T: for<'de> Deserialize<'de>>(
        &self,
        request: &GraphQLRequest,
    ) -> Result<GraphQLResponse<T>> {
        trace!("Executing GraphQL query: {}", request.query);

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(FlyrecError::Api(ApiError::RateLimited {
                retry_after_secs: retry_after,
            }));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FlyrecError::Api(ApiError::AuthenticationFailed {
                message: String::from("Invalid API token"),
            }));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FlyrecError::Api(ApiError::RequestFailed {
                status: status.as_u16(),
                message: body,
            }));
        }

        response.json().await.map_err(|e| {
            FlyrecError::Api(ApiError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })
    }
}

#[async_trait]
impl ControlApi for FlyGraphqlClient {
    async fn default_organization(&self) -> std::result::Result<Organization, ControlApiError> {
        #[derive(Deserialize)]
        struct Response {
            organizations: Nodes,
        }
        #[derive(Deserialize)]
        struct Nodes {
            nodes: Vec<Organization>,
        }

        let query = r"
            query {
                organizations {
                    nodes {
                        id
                        slug
                        type
                    }
                }
            }
        ";

        let response: Response = self.execute(query, None).await?;
        let mut orgs = response.organizations.nodes;

        match orgs.iter().position(Organization::is_personal) {
            Some(index) => Ok(orgs.swap_remove(index)),
            None if !orgs.is_empty() => Ok(orgs.swap_remove(0)),
            None => Err(ControlApiError::Transport(String::from(
                "No organizations are visible to this token",
            ))),
        }
    }

    async fn create_app(
        &self,
        input: &CreateAppInput,
    ) -> std::result::Result<AppRecord, ControlApiError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            create_app: AppPayload,
        }

        let query = format!(
            r"
            mutation CreateApp($input: CreateAppInput!) {{
                createApp(input: $input) {{
                    app {{
                        ...AppFields
                    }}
                }}
            }}
            {APP_FIELDS}"
        );

        let variables = serde_json::json!({ "input": input });
        let response: Response = self.execute(&query, Some(variables)).await?;

        Ok(response.create_app.app.into())
    }

    async fn create_app_with_autoscale(
        &self,
        input: &CreateAppInput,
        regions: Vec<AutoscaleRegionInput>,
    ) -> std::result::Result<AppRecord, ControlApiError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            create_app: AppPayload,
            update_autoscale_config: AppPayload,
        }

        let query = format!(
            r"
            mutation CreateAppWithAutoscale(
                $input: CreateAppInput!,
                $autoscale: UpdateAutoscaleConfigInput!
            ) {{
                createApp(input: $input) {{
                    app {{
                        ...AppFields
                    }}
                }}
                updateAutoscaleConfig(input: $autoscale) {{
                    app {{
                        ...AppFields
                    }}
                }}
            }}
            {APP_FIELDS}"
        );

        let variables = serde_json::json!({
            "input": input,
            "autoscale": {
                "appId": input.name,
                "regions": regions,
                "resetRegions": true,
            },
        });
        let response: Response = self.execute(&query, Some(variables)).await?;

        let mut record = AppRecord::from(response.create_app.app);
        record.regions = AppRecord::from(response.update_autoscale_config.app).regions;
        Ok(record)
    }

    async fn get_app(&self, name: &str) -> std::result::Result<AppRecord, ControlApiError> {
        #[derive(Deserialize)]
        struct Response {
            app: Option<AppNode>,
        }

        let query = format!(
            r"
            query GetFullApp($name: String!) {{
                app(name: $name) {{
                    ...AppFields
                }}
            }}
            {APP_FIELDS}"
        );

        let variables = serde_json::json!({ "name": name });
        let response: Response = self.execute(&query, Some(variables)).await?;

        response
            .app
            .map(AppRecord::from)
            .ok_or_else(|| ControlApiError::Backend(vec![BackendError::not_found("app")]))
    }

    async fn update_autoscale_regions(
        &self,
        app: &str,
        regions: Vec<AutoscaleRegionInput>,
        reset_regions: bool,
    ) -> std::result::Result<AppRecord, ControlApiError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            update_autoscale_config: AppPayload,
        }

        let query = format!(
            r"
            mutation UpdateAutoscaleConfig($input: UpdateAutoscaleConfigInput!) {{
                updateAutoscaleConfig(input: $input) {{
                    app {{
                        ...AppFields
                    }}
                }}
            }}
            {APP_FIELDS}"
        );

        let variables = serde_json::json!({
            "input": {
                "appId": app,
                "regions": regions,
                "resetRegions": reset_regions,
            }
        });
        let response: Response = self.execute(&query, Some(variables)).await?;

        Ok(response.update_autoscale_config.app.into())
    }

    async fn delete_app(&self, name: &str) -> std::result::Result<(), ControlApiError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            #[serde(rename = "deleteApp")]
            _delete_app: Option<serde_json::Value>,
        }

        let query = r"
            mutation DeleteApp($appId: ID!) {
                deleteApp(appId: $appId) {
                    organization {
                        id
                    }
                }
            }
        ";

        let variables = serde_json::json!({ "appId": name });
        let _: Response = self.execute(query, Some(variables)).await?;

        Ok(())
    }

    async fn allocate_ip(
        &self,
        input: &AllocateIpInput,
    ) -> std::result::Result<IpAddressRecord, ControlApiError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            allocate_ip_address: Payload,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload {
            ip_address: IpAddressRecord,
        }

        let query = r"
            mutation AllocateIpAddress($input: AllocateIPAddressInput!) {
                allocateIpAddress(input: $input) {
                    ipAddress {
                        id
                        address
                        type
                        region
                    }
                }
            }
        ";

        let variables = serde_json::json!({ "input": input });
        let response: Response = self.execute(query, Some(variables)).await?;

        Ok(response.allocate_ip_address.ip_address)
    }

    async fn get_ip(
        &self,
        app: &str,
        address: &str,
    ) -> std::result::Result<IpAddressRecord, ControlApiError> {
        #[derive(Deserialize)]
        struct Response {
            app: Option<AppIps>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct AppIps {
            ip_address: Option<IpAddressRecord>,
        }

        let query = r"
            query GetIpAddress($app: String!, $address: String!) {
                app(name: $app) {
                    ipAddress(address: $address) {
                        id
                        address
                        type
                        region
                    }
                }
            }
        ";

        let variables = serde_json::json!({ "app": app, "address": address });
        let response: Response = self.execute(query, Some(variables)).await?;

        response
            .app
            .and_then(|a| a.ip_address)
            .ok_or_else(|| ControlApiError::Backend(vec![BackendError::not_found("ipAddress")]))
    }

    async fn release_ip(&self, id: &str) -> std::result::Result<(), ControlApiError> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "releaseIpAddress")]
            _release: Option<serde_json::Value>,
        }

        let query = r"
            mutation ReleaseIpAddress($input: ReleaseIPAddressInput!) {
                releaseIpAddress(input: $input) {
                    app {
                        name
                    }
                }
            }
        ";

        let variables = serde_json::json!({ "input": { "ipAddressId": id } });
        let _: Response = self.execute(query, Some(variables)).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fly::types::{IpAddressType, NOT_FOUND_MARKER};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> FlyGraphqlClient {
        FlyGraphqlClient::with_endpoint(&format!("{}/graphql", server.uri()), "test-token", 5)
            .expect("client builds")
            .with_max_retries(1)
    }

    fn app_json(name: &str, regions: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "network": "default",
            "organization": { "id": "org-1" },
            "autoscaling": {
                "preferredRegion": "ord",
                "regions": regions.iter().map(|c| serde_json::json!({ "code": c })).collect::<Vec<_>>()
            }
        })
    }

    #[tokio::test]
    async fn test_get_app_sends_token_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_string_contains("GetFullApp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "app": app_json("hello", &["ord", "ams"]) }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let app = client_for(&server).get_app("hello").await.expect("app");

        assert_eq!(app.name, "hello");
        assert_eq!(app.organization_id, "org-1");
        assert_eq!(app.preferred_region, "ord");
        assert_eq!(app.regions, vec!["ord", "ams"]);
    }

    #[tokio::test]
    async fn test_error_list_is_structured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": null,
                "errors": [
                    { "message": "first", "path": ["app"] },
                    { "message": "second", "path": ["app", "network"] }
                ]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).get_app("hello").await.expect_err("errors");

        match err {
            ControlApiError::Backend(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].message, "first");
                assert_eq!(entries[1].path_string(), "app.network");
            }
            ControlApiError::Transport(message) => panic!("unexpected transport error: {message}"),
        }
    }

    #[tokio::test]
    async fn test_null_app_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "data": { "app": null } })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).get_app("gone").await.expect_err("missing");

        assert_eq!(
            err,
            ControlApiError::Backend(vec![BackendError::new(NOT_FOUND_MARKER, "app")])
        );
    }

    #[tokio::test]
    async fn test_http_failure_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let err = client_for(&server).delete_app("hello").await.expect_err("fails");

        match err {
            ControlApiError::Transport(message) => assert!(message.contains("500")),
            ControlApiError::Backend(_) => panic!("expected a transport error"),
        }
    }

    #[tokio::test]
    async fn test_create_with_autoscale_takes_regions_from_update() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("CreateAppWithAutoscale"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "createApp": { "app": app_json("hello", &[]) },
                    "updateAutoscaleConfig": { "app": app_json("hello", &["ams", "ord"]) }
                }
            })))
            .mount(&server)
            .await;

        let input = CreateAppInput {
            name: String::from("hello"),
            organization_id: String::from("org-1"),
            preferred_region: None,
            network: None,
        };
        let regions = AutoscaleRegionInput::from_codes(&[String::from("ams"), String::from("ord")]);

        let app = client_for(&server)
            .create_app_with_autoscale(&input, regions)
            .await
            .expect("created");

        assert_eq!(app.regions, vec!["ams", "ord"]);
    }

    #[tokio::test]
    async fn test_default_organization_prefers_personal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "organizations": { "nodes": [
                    { "id": "org-shared", "slug": "team", "type": "SHARED" },
                    { "id": "org-personal", "slug": "personal", "type": "PERSONAL" }
                ] } }
            })))
            .mount(&server)
            .await;

        let org = client_for(&server).default_organization().await.expect("org");

        assert_eq!(org.id, "org-personal");
    }

    #[tokio::test]
    async fn test_allocate_ip_decodes_address() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("allocateIpAddress"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "allocateIpAddress": { "ipAddress": {
                    "id": "ip_1", "address": "2a09:8280::1", "type": "v6", "region": "global"
                } } }
            })))
            .mount(&server)
            .await;

        let input = AllocateIpInput {
            app_id: String::from("hello"),
            address_type: IpAddressType::V6,
            region: None,
        };
        let ip = client_for(&server).allocate_ip(&input).await.expect("allocated");

        assert_eq!(ip.id, "ip_1");
        assert_eq!(ip.address_type, IpAddressType::V6);
        assert_eq!(ip.region, "global");
    }
}
