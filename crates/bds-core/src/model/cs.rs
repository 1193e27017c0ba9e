// ── Commerce: carts, product offers, orders ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity::{BdsEntity, impl_entity};
use super::soc::MessageBody;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Offer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductAsset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<ProductAsset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ProductAsset>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductOffers {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_offer: Option<Offer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_product: Option<Product>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub offers: Vec<Offer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductOffersResponse {
    pub product_offers: ProductOffers,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductQuantity {
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CartLine {
    pub line_number: String,
    pub quantity: ProductQuantity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_offers: Option<ProductOffers>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cart {
    #[serde(flatten)]
    pub entity: BdsEntity,
    pub lines: Vec<CartLine>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cart {
    pub fn line(&self, line_number: &str) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.line_number == line_number)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Product review; same shape as any other message.
pub type Review = MessageBody;

impl_entity!(Product, ProductOffers, Cart, Order);
