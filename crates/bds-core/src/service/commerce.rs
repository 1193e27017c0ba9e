// ── B2C commerce: cart, catalog, orders ──

use std::sync::Arc;

use bds_api::{ApiClient, RequestOptions};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::debug;

use crate::config::ConfigService;
use crate::error::CoreError;
use crate::model::{Cart, Order, ProductOffersResponse, Review, SearchEntityResponse};

const B2C_PATH: &str = "api/cs/v1/b2c";

/// Projection used by catalog search.
pub const CATALOG_SEARCH_FILTERS: [&str; 8] = [
    "Facet:name|localName",
    "FacetValue:name|localName",
    "PIM.Category:name|localName",
    "PIM.CategoryType:name|localName",
    "CRM.Price:displayName",
    "CRM.ProductOffer:unitPriceWithTax|isSalePromotion",
    "CRM.Product:name|localName|description|localDescription|assets|brand|id",
    concat!(
        "CRM.ProductOffers:fullProduct|currentOffer|reviewScore|reviewNumber|isInStock",
        "|isSalePromotion|canBeSold|isPopular|isNew|isPopular|isChoice|key",
    ),
];

pub struct CommerceService {
    api: Arc<ApiClient>,
    config: Arc<ConfigService>,
    cart: watch::Sender<Option<Arc<Cart>>>,
}

impl CommerceService {
    pub fn new(api: Arc<ApiClient>, config: Arc<ConfigService>) -> Self {
        let (cart, _) = watch::channel(None);
        Self { api, config, cart }
    }

    pub fn cart(&self) -> Option<Arc<Cart>> {
        self.cart.borrow().clone()
    }

    pub fn watch_cart(&self) -> watch::Receiver<Option<Arc<Cart>>> {
        self.cart.subscribe()
    }

    fn catalog_id(&self) -> Result<String, CoreError> {
        self.config
            .current()
            .catalog_id
            .clone()
            .ok_or_else(|| CoreError::Config {
                message: "catalogId is not configured".into(),
            })
    }

    /// Id of the loaded cart; `None` means cart operations are no-ops.
    fn cart_id(&self) -> Option<String> {
        self.cart.borrow().as_ref().and_then(|c| c.entity.id.clone())
    }

    fn store_cart(&self, cart: Option<Cart>) -> Option<Arc<Cart>> {
        let cart = cart.map(Arc::new);
        self.cart.send_replace(cart.clone());
        cart
    }

    // ── Cart ─────────────────────────────────────────────────────────

    pub async fn refresh_cart(&self) -> Result<Option<Arc<Cart>>, CoreError> {
        let path = format!("{B2C_PATH}/{}/cart", self.catalog_id()?);
        let cart = self
            .api
            .get::<Option<Cart>>(&path, &RequestOptions::default())
            .await?
            .into_data();
        Ok(self.store_cart(cart))
    }

    pub async fn add_line_to_cart(
        &self,
        product_offers_id: &str,
        quantity: f64,
        offer_id: Option<&str>,
    ) -> Result<Option<Arc<Cart>>, CoreError> {
        let Some(cart_id) = self.cart_id() else {
            debug!("no cart loaded, add ignored");
            return Ok(None);
        };
        let body = json!({
            "productOffersId": product_offers_id,
            "quantity": quantity,
            "offerId": offer_id,
        });
        let cart = self
            .api
            .put::<Option<Cart>, _>(
                &format!("{B2C_PATH}/{cart_id}/cart/"),
                &body,
                &RequestOptions::default(),
            )
            .await?
            .into_data();
        Ok(self.store_cart(cart))
    }

    pub async fn update_line_from_cart(
        &self,
        line_number: &str,
        quantity: f64,
    ) -> Result<Option<Arc<Cart>>, CoreError> {
        let Some(cart_id) = self.cart_id() else {
            debug!("no cart loaded, update ignored");
            return Ok(None);
        };
        let cart = self
            .api
            .post::<Option<Cart>, _>(
                &format!("{B2C_PATH}/{cart_id}/cart/{line_number}"),
                &json!({ "quantity": quantity }),
                &RequestOptions::default(),
            )
            .await?
            .into_data();
        Ok(self.store_cart(cart))
    }

    pub async fn remove_line_from_cart(
        &self,
        line_number: &str,
    ) -> Result<Option<Arc<Cart>>, CoreError> {
        let Some(cart_id) = self.cart_id() else {
            debug!("no cart loaded, remove ignored");
            return Ok(None);
        };
        let cart = self
            .api
            .delete::<Option<Cart>>(
                &format!("{B2C_PATH}/{cart_id}/cart/{line_number}"),
                &RequestOptions::default(),
            )
            .await?
            .into_data();
        Ok(self.store_cart(cart))
    }

    /// Turn the cart into an order, then reload the (now empty) cart.
    pub async fn create_order(&self, payment_data: &str) -> Result<Option<Order>, CoreError> {
        let Some(cart_id) = self.cart_id() else {
            debug!("no cart loaded, order not created");
            return Ok(None);
        };
        let order = self
            .api
            .put::<Option<Order>, _>(
                &format!("{B2C_PATH}/{cart_id}/order"),
                &json!({ "paymentData": payment_data }),
                &RequestOptions::default(),
            )
            .await?
            .into_data();
        self.refresh_cart().await?;
        Ok(order)
    }

    // ── Catalog ──────────────────────────────────────────────────────

    pub async fn get_product_offers(
        &self,
        product_offers_id: &str,
    ) -> Result<Option<ProductOffersResponse>, CoreError> {
        Ok(self
            .api
            .get(&format!("{B2C_PATH}/product/{product_offers_id}"), &RequestOptions::default())
            .await?
            .into_data())
    }

    pub async fn get_product_offers_reviews(
        &self,
        product_offers_id: &str,
        limit: u32,
        scroll_id: Option<&str>,
    ) -> Result<Vec<Review>, CoreError> {
        let resp = self
            .api
            .get::<Option<Vec<Review>>>(
                &format!("{B2C_PATH}/product/{product_offers_id}/reviews"),
                &RequestOptions::new().paged(limit, scroll_id),
            )
            .await?;
        Ok(resp.into_data().unwrap_or_default())
    }

    pub async fn search_catalog<R: Serialize + Sync>(
        &self,
        request: &R,
    ) -> Result<Option<SearchEntityResponse>, CoreError> {
        let path = format!("{B2C_PATH}/{}/search", self.catalog_id()?);
        let opts = RequestOptions::new().filters(CATALOG_SEARCH_FILTERS);
        Ok(self.api.post(&path, request, &opts).await?.into_data())
    }

    pub async fn get_main_navigation<R: Serialize + Sync>(
        &self,
        request: &R,
    ) -> Result<Option<SearchEntityResponse>, CoreError> {
        let path = format!("{B2C_PATH}/{}/navigation", self.catalog_id()?);
        Ok(self.api.post(&path, request, &RequestOptions::default()).await?.into_data())
    }

    // ── Orders ───────────────────────────────────────────────────────

    pub async fn get_orders(
        &self,
        limit: u32,
        scroll_id: Option<&str>,
    ) -> Result<Vec<Order>, CoreError> {
        let path = format!("{B2C_PATH}/{}/orders", self.catalog_id()?);
        let resp = self
            .api
            .get::<Option<Vec<Order>>>(&path, &RequestOptions::new().paged(limit, scroll_id))
            .await?;
        Ok(resp.into_data().unwrap_or_default())
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>, CoreError> {
        Ok(self
            .api
            .get(&format!("{B2C_PATH}/{order_id}/order"), &RequestOptions::default())
            .await?
            .into_data())
    }
}
