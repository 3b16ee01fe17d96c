use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use gd_schemas::{CartItemInput, ProductRef, RemoteCart, SubmitResult};
use serde_json::{json, Value};

use crate::graphql::{self, GqlEnvelope};
use crate::{CommerceCart, RyeError};

/// GraphQL client for the commerce API.
///
/// The API key is passed in by the caller (resolved from the env var named in
/// config); it is never logged.
#[derive(Clone)]
pub struct RyeClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    shopper_ip: String,
}

impl fmt::Debug for RyeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RyeClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("shopper_ip", &self.shopper_ip)
            .finish()
    }
}

impl RyeClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        shopper_ip: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RyeError> {
        let endpoint = endpoint.into();
        let api_key = api_key.into();
        if endpoint.trim().is_empty() {
            return Err(RyeError::Config("endpoint is empty".to_string()));
        }
        if api_key.trim().is_empty() {
            return Err(RyeError::Config("api key is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RyeError::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            shopper_ip: shopper_ip.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, op: &'static str, query: &str, variables: Value) -> Result<GqlEnvelope, RyeError> {
        tracing::debug!(op, endpoint = %self.endpoint, "commerce api request");

        let resp = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Basic {}", self.api_key))
            .header("Rye-Shopper-IP", &self.shopper_ip)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| RyeError::Transport(format!("{op} request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RyeError::Transport(format!(
                "{op} http error status={} body={}",
                status.as_u16(),
                truncate(&body, 256)
            )));
        }

        resp.json::<GqlEnvelope>()
            .await
            .map_err(|e| RyeError::Decode(format!("{op} response json decode failed: {e}")))
    }

    async fn cart_mutation(
        &self,
        op: &'static str,
        doc: String,
        input: Value,
        cart_id: Option<&str>,
    ) -> Result<RemoteCart, RyeError> {
        let env = self.post(op, &doc, json!({ "input": input })).await?;
        let data = graphql::payload(env, op, cart_id)?;
        let cart = graphql::decode_cart_payload(data, cart_id)?;
        tracing::debug!(op, cart_id = %cart.cart_id, stores = cart.stores.len(), "commerce api response");
        Ok(cart)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[async_trait]
impl CommerceCart for RyeClient {
    fn name(&self) -> &'static str {
        "rye"
    }

    async fn create_cart(&self, items: &[CartItemInput]) -> Result<RemoteCart, RyeError> {
        let input = json!({ "items": graphql::items_input(items) });
        self.cart_mutation("createCart", graphql::create_cart_doc(), input, None)
            .await
    }

    async fn add_items(&self, cart_id: &str, items: &[CartItemInput]) -> Result<RemoteCart, RyeError> {
        let input = json!({ "id": cart_id, "items": graphql::items_input(items) });
        self.cart_mutation("addCartItems", graphql::add_items_doc(), input, Some(cart_id))
            .await
    }

    async fn update_items(&self, cart_id: &str, items: &[CartItemInput]) -> Result<RemoteCart, RyeError> {
        let input = json!({ "id": cart_id, "items": graphql::items_input(items) });
        self.cart_mutation("updateCartItems", graphql::update_items_doc(), input, Some(cart_id))
            .await
    }

    async fn remove_items(&self, cart_id: &str, products: &[ProductRef]) -> Result<RemoteCart, RyeError> {
        let input = json!({ "id": cart_id, "items": graphql::delete_input(products) });
        self.cart_mutation("deleteCartItems", graphql::delete_items_doc(), input, Some(cart_id))
            .await
    }

    async fn get_cart(&self, cart_id: &str) -> Result<RemoteCart, RyeError> {
        let env = self
            .post("getCart", &graphql::get_cart_doc(), json!({ "id": cart_id }))
            .await?;
        let data = graphql::payload(env, "getCart", Some(cart_id))?;
        graphql::decode_cart_payload(data, Some(cart_id))
    }

    async fn submit_cart(&self, cart_id: &str, payment_token: &str) -> Result<SubmitResult, RyeError> {
        let input = json!({ "id": cart_id, "token": payment_token });
        let env = self
            .post("submitCart", graphql::SUBMIT_CART_DOC, json!({ "input": input }))
            .await?;
        let data = graphql::payload(env, "submitCart", Some(cart_id))?;
        let res = graphql::decode_submit_payload(data, cart_id)?;
        tracing::info!(
            cart_id = %res.cart_id,
            stores = res.stores.len(),
            "commerce cart submitted"
        );
        Ok(res)
    }
}
