//! GraphQL documents and response decoding for the commerce API.
//!
//! Only the fields the cart service reads are selected. Response shapes are
//! decoded into private serde types and converted to `gd-schemas` types here
//! so nothing vendor-shaped leaks out of the crate.

use gd_schemas::{
    CartItemInput, ProductRef, RemoteCart, RemoteCartLine, RemoteStoreCart, RemoteStoreError,
    Store, StoreSubmitResult, StoreSubmitStatus, SubmitResult,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::RyeError;

const CART_FIELDS: &str = r#"
  id
  stores {
    __typename
    ... on AmazonStore {
      store
      errors { code message details { productId } }
      cartLines { quantity product { id } }
    }
    ... on ShopifyStore {
      store
      errors { code message details { variantIds } }
      cartLines { quantity variant { id } }
    }
  }
"#;

pub(crate) fn create_cart_doc() -> String {
    format!(
        "mutation CreateCart($input: CartCreateInput!) {{ createCart(input: $input) {{ cart {{ {CART_FIELDS} }} errors {{ code message }} }} }}"
    )
}

pub(crate) fn add_items_doc() -> String {
    format!(
        "mutation AddCartItems($input: CartItemsAddInput!) {{ addCartItems(input: $input) {{ cart {{ {CART_FIELDS} }} errors {{ code message }} }} }}"
    )
}

pub(crate) fn update_items_doc() -> String {
    format!(
        "mutation UpdateCartItems($input: CartItemsUpdateInput!) {{ updateCartItems(input: $input) {{ cart {{ {CART_FIELDS} }} errors {{ code message }} }} }}"
    )
}

pub(crate) fn delete_items_doc() -> String {
    format!(
        "mutation DeleteCartItems($input: CartItemsDeleteInput!) {{ deleteCartItems(input: $input) {{ cart {{ {CART_FIELDS} }} errors {{ code message }} }} }}"
    )
}

pub(crate) fn get_cart_doc() -> String {
    format!("query GetCart($id: ID!) {{ getCart(id: $id) {{ cart {{ {CART_FIELDS} }} errors {{ code message }} }} }}")
}

pub(crate) const SUBMIT_CART_DOC: &str = r#"
mutation SubmitCart($input: CartSubmitInput!) {
  submitCart(input: $input) {
    cart {
      id
      stores {
        status
        requestId
        store {
          __typename
          ... on AmazonStore { store }
          ... on ShopifyStore { store }
        }
        errors { code message }
      }
    }
    errors { code message }
  }
}
"#;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

pub(crate) fn items_input(items: &[CartItemInput]) -> Value {
    let amazon: Vec<Value> = items
        .iter()
        .filter(|i| i.product.store.is_amazon())
        .map(|i| json!({"productId": i.product.product_id, "quantity": i.quantity}))
        .collect();
    let shopify: Vec<Value> = items
        .iter()
        .filter(|i| !i.product.store.is_amazon())
        .map(|i| json!({"variantId": i.product.product_id, "quantity": i.quantity}))
        .collect();
    json!({
        "amazonCartItemsInput": amazon,
        "shopifyCartItemsInput": shopify,
    })
}

pub(crate) fn delete_input(products: &[ProductRef]) -> Value {
    let amazon: Vec<Value> = products
        .iter()
        .filter(|p| p.store.is_amazon())
        .map(|p| json!({"productId": p.product_id}))
        .collect();
    let shopify: Vec<Value> = products
        .iter()
        .filter(|p| !p.store.is_amazon())
        .map(|p| json!({"variantId": p.product_id}))
        .collect();
    json!({
        "amazonProducts": amazon,
        "shopifyProducts": shopify,
    })
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct GqlEnvelope {
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GqlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GqlError {
    pub message: String,
    pub extensions: Option<GqlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GqlErrorExtensions {
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserError {
    code: Option<String>,
    message: String,
}

const EXPIRED_CODES: &[&str] = &["CART_EXPIRED", "CART_NOT_FOUND", "NOT_FOUND"];

fn looks_expired(code: Option<&str>, message: &str) -> bool {
    if let Some(c) = code {
        if EXPIRED_CODES.contains(&c) {
            return true;
        }
    }
    let m = message.to_ascii_lowercase();
    m.contains("cart") && (m.contains("expired") || m.contains("not found"))
}

/// Map a GraphQL or payload-level error to [`RyeError`], recognizing the
/// expired/not-found cart family.
fn classify(code: Option<String>, message: String, cart_id: Option<&str>) -> RyeError {
    match cart_id {
        Some(id) if looks_expired(code.as_deref(), &message) => RyeError::CartExpired {
            cart_id: id.to_string(),
        },
        _ => RyeError::Api { code, message },
    }
}

/// Unwrap `data.<field>` from an envelope, surfacing top-level errors.
pub(crate) fn payload(env: GqlEnvelope, field: &str, cart_id: Option<&str>) -> Result<Value, RyeError> {
    if let Some(first) = env.errors.into_iter().next() {
        let code = first.extensions.and_then(|e| e.code);
        return Err(classify(code, first.message, cart_id));
    }
    let data = env
        .data
        .ok_or_else(|| RyeError::Decode("response has neither data nor errors".to_string()))?;
    match data.get(field) {
        Some(v) if !v.is_null() => Ok(v.clone()),
        _ => Err(RyeError::Decode(format!("response missing data.{field}"))),
    }
}

// ---------------------------------------------------------------------------
// Cart payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CartPayload {
    cart: Option<CartNode>,
    #[serde(default)]
    errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct CartNode {
    id: String,
    #[serde(default)]
    stores: Vec<StoreNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreNode {
    #[serde(rename = "__typename")]
    typename: String,
    store: String,
    #[serde(default)]
    errors: Vec<StoreErrorNode>,
    #[serde(default)]
    cart_lines: Vec<CartLineNode>,
}

#[derive(Debug, Deserialize)]
struct StoreErrorNode {
    code: String,
    message: String,
    details: Option<StoreErrorDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreErrorDetails {
    product_id: Option<String>,
    #[serde(default)]
    variant_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CartLineNode {
    quantity: i64,
    product: Option<IdNode>,
    variant: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
struct IdNode {
    id: String,
}

fn store_from_node(typename: &str, store: &str) -> Result<Store, RyeError> {
    match typename {
        "AmazonStore" => Ok(Store::Amazon),
        "ShopifyStore" => Store::from_key(store)
            .ok_or_else(|| RyeError::Decode("shopify store without domain".to_string())),
        other => Err(RyeError::Decode(format!("unknown store type: {other}"))),
    }
}

fn store_errors(nodes: Vec<StoreErrorNode>) -> Vec<RemoteStoreError> {
    let mut out = Vec::new();
    for e in nodes {
        let products: Vec<Option<String>> = match e.details {
            Some(d) if d.product_id.is_some() => vec![d.product_id],
            Some(d) if !d.variant_ids.is_empty() => d.variant_ids.into_iter().map(Some).collect(),
            _ => vec![None],
        };
        for p in products {
            out.push(RemoteStoreError {
                code: e.code.clone(),
                message: e.message.clone(),
                product_id: p,
            });
        }
    }
    out
}

fn cart_from_node(node: CartNode) -> Result<RemoteCart, RyeError> {
    let mut stores = Vec::with_capacity(node.stores.len());
    for s in node.stores {
        let store = store_from_node(&s.typename, &s.store)?;
        let lines = s
            .cart_lines
            .into_iter()
            .map(|l| {
                let id = l
                    .product
                    .or(l.variant)
                    .map(|n| n.id)
                    .ok_or_else(|| RyeError::Decode("cart line without product/variant".to_string()))?;
                Ok(RemoteCartLine {
                    product_id: id,
                    quantity: l.quantity,
                })
            })
            .collect::<Result<Vec<_>, RyeError>>()?;
        stores.push(RemoteStoreCart {
            store,
            lines,
            errors: store_errors(s.errors),
        });
    }
    Ok(RemoteCart {
        cart_id: node.id,
        stores,
    })
}

/// Decode a cart mutation/query payload. Payload-level errors win over a
/// partially returned cart.
pub(crate) fn decode_cart_payload(v: Value, cart_id: Option<&str>) -> Result<RemoteCart, RyeError> {
    let p: CartPayload =
        serde_json::from_value(v).map_err(|e| RyeError::Decode(format!("cart payload: {e}")))?;
    if let Some(first) = p.errors.into_iter().next() {
        return Err(classify(first.code, first.message, cart_id));
    }
    let node = p
        .cart
        .ok_or_else(|| RyeError::Decode("cart payload without cart".to_string()))?;
    cart_from_node(node)
}

// ---------------------------------------------------------------------------
// Submit payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitPayload {
    cart: Option<SubmitCartNode>,
    #[serde(default)]
    errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct SubmitCartNode {
    id: String,
    #[serde(default)]
    stores: Vec<SubmitStoreNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitStoreNode {
    status: String,
    request_id: Option<String>,
    store: SubmitStoreRef,
    #[serde(default)]
    errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct SubmitStoreRef {
    #[serde(rename = "__typename")]
    typename: String,
    store: String,
}

fn submit_status(s: &str) -> StoreSubmitStatus {
    match s {
        "COMPLETED" => StoreSubmitStatus::Completed,
        "PENDING" | "PROCESSING" => StoreSubmitStatus::Pending,
        _ => StoreSubmitStatus::Failed,
    }
}

pub(crate) fn decode_submit_payload(v: Value, cart_id: &str) -> Result<SubmitResult, RyeError> {
    let p: SubmitPayload =
        serde_json::from_value(v).map_err(|e| RyeError::Decode(format!("submit payload: {e}")))?;
    if let Some(first) = p.errors.into_iter().next() {
        return Err(classify(first.code, first.message, Some(cart_id)));
    }
    let node = p
        .cart
        .ok_or_else(|| RyeError::Decode("submit payload without cart".to_string()))?;

    let mut stores = Vec::with_capacity(node.stores.len());
    for s in node.stores {
        stores.push(StoreSubmitResult {
            store: store_from_node(&s.store.typename, &s.store.store)?,
            status: submit_status(&s.status),
            request_id: s.request_id,
            errors: s
                .errors
                .into_iter()
                .map(|e| RemoteStoreError {
                    code: e.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                    message: e.message,
                    product_id: None,
                })
                .collect(),
        });
    }
    Ok(SubmitResult {
        cart_id: node.id,
        stores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_input_splits_amazon_and_shopify() {
        let items = vec![
            CartItemInput::new(ProductRef::new(Store::Amazon, "B01"), 2),
            CartItemInput::new(ProductRef::new(Store::shopify("toys.myshopify.com"), "4455"), 1),
        ];
        let v = items_input(&items);
        assert_eq!(v["amazonCartItemsInput"][0]["productId"], "B01");
        assert_eq!(v["amazonCartItemsInput"][0]["quantity"], 2);
        assert_eq!(v["shopifyCartItemsInput"][0]["variantId"], "4455");
    }

    #[test]
    fn decode_cart_maps_store_types_and_line_ids() {
        let v = json!({
            "cart": {
                "id": "cart_1",
                "stores": [
                    {
                        "__typename": "AmazonStore",
                        "store": "amazon",
                        "errors": [],
                        "cartLines": [{"quantity": 2, "product": {"id": "B01"}}]
                    },
                    {
                        "__typename": "ShopifyStore",
                        "store": "toys.myshopify.com",
                        "errors": [{"code": "VARIANT_UNAVAILABLE", "message": "gone", "details": {"variantIds": ["4455"]}}],
                        "cartLines": [{"quantity": 1, "variant": {"id": "4455"}}]
                    }
                ]
            },
            "errors": []
        });
        let cart = decode_cart_payload(v, None).unwrap();
        assert_eq!(cart.cart_id, "cart_1");
        assert_eq!(cart.quantity_of(&ProductRef::new(Store::Amazon, "B01")), 2);
        let shop = cart.store(&Store::shopify("toys.myshopify.com")).unwrap();
        assert_eq!(shop.errors[0].product_id.as_deref(), Some("4455"));
    }

    #[test]
    fn payload_error_with_expired_code_maps_to_cart_expired() {
        let v = json!({"cart": null, "errors": [{"code": "CART_EXPIRED", "message": "Cart has expired"}]});
        let err = decode_cart_payload(v, Some("cart_9")).unwrap_err();
        assert_eq!(
            err,
            RyeError::CartExpired {
                cart_id: "cart_9".to_string()
            }
        );
    }

    #[test]
    fn submit_status_mapping() {
        assert_eq!(submit_status("COMPLETED"), StoreSubmitStatus::Completed);
        assert_eq!(submit_status("PROCESSING"), StoreSubmitStatus::Pending);
        assert_eq!(submit_status("PAYMENT_FAILED"), StoreSubmitStatus::Failed);
    }
}
