//! API client
//!
//! Action-style API: every call is `GET {endpoint}/?Action=..&Version=..`
//! followed by the flat wire parameters. Actions are routed to a service,
//! which selects the endpoint host when the endpoint is a `{service}`
//! template.

use super::http::HttpClient;
use super::projects::LIST_PROJECTS_ACTION;
use crate::config::Config;
use crate::engine::executor::ActionExecutor;
use crate::engine::tags::{LIST_TAGS_ACTION, REPLACE_TAGS_ACTION};
use crate::engine::wire::{to_query_pairs, WireParams};
use crate::error::ActionError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Service and API version an action is sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub service: String,
    pub version: String,
}

impl Route {
    pub fn new(service: &str, version: &str) -> Self {
        Self {
            service: service.to_string(),
            version: version.to_string(),
        }
    }
}

/// Main API client
#[derive(Clone)]
pub struct ApiClient {
    http: HttpClient,
    endpoint: String,
    region: Option<String>,
    token: Option<String>,
    default_route: Route,
    routes: BTreeMap<String, Route>,
}

impl ApiClient {
    /// Client for one service; tag and project actions are routed to their
    /// own services
    pub fn new(endpoint: &str, service: &str, version: &str) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        Url::parse(&endpoint.replace("{service}", service))
            .with_context(|| format!("Invalid endpoint: {}", endpoint))?;

        let http = HttpClient::new(Duration::from_secs(60))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            region: None,
            token: None,
            default_route: Route::new(service, version),
            routes: BTreeMap::new(),
        }
        .route(LIST_TAGS_ACTION, Route::new("tagv2", "2020-09-01"))
        .route(REPLACE_TAGS_ACTION, Route::new("tagv2", "2020-09-01"))
        .route(LIST_PROJECTS_ACTION, Route::new("iam", "2015-11-01")))
    }

    pub fn from_config(config: &Config, service: &str) -> Result<Self> {
        Ok(Self::new(&config.effective_endpoint(), service, &config.effective_api_version())?
            .with_region(config.effective_region())
            .with_token(config.effective_token()))
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn route(mut self, action: &str, route: Route) -> Self {
        self.routes.insert(action.to_string(), route);
        self
    }

    pub fn route_for(&self, action: &str) -> &Route {
        self.routes.get(action).unwrap_or(&self.default_route)
    }

    /// Base URL of a service
    pub fn service_url(&self, service: &str) -> String {
        format!("{}/", self.endpoint.replace("{service}", service))
    }

    fn query(&self, action: &str, route: &Route, params: &WireParams) -> Vec<(String, String)> {
        let mut query = vec![
            ("Action".to_string(), action.to_string()),
            ("Version".to_string(), route.version.clone()),
        ];
        if let Some(region) = &self.region {
            query.push(("Region".to_string(), region.clone()));
        }
        query.extend(to_query_pairs(params));
        query
    }
}

#[async_trait]
impl ActionExecutor for ApiClient {
    async fn execute(&self, action: &str, params: &WireParams) -> std::result::Result<Value, ActionError> {
        let route = self.route_for(action);
        let url = self.service_url(&route.service);
        let query = self.query(action, route, params);
        tracing::debug!(action, service = %route.service, "execute action");
        self.http.get(&url, &query, self.token.as_deref()).await
    }
}
