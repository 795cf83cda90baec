use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A normalised affiliate product, independent of which API method produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub product_id: String,
    pub title: String,
    pub original_price: f64,
    pub sale_price: f64,
    /// Percent off the original price, computed locally.
    pub discount: f64,
    pub commission_rate: f64,
    pub shop_title: String,
    pub image_url: String,
    pub product_url: String,
    pub shop_url: String,
    pub volume: u64,
    pub rating: f64,
    pub review_count: u64,
    pub affiliate_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub category_id: String,
    pub category_name: String,
    pub parent_category_id: String,
}

const PRODUCT_RESPONSE_KEYS: [&str; 3] = [
    "aliexpress_affiliate_product_smartmatch_response",
    "aliexpress_affiliate_product_search_response",
    "aliexpress_affiliate_product_detail_response",
];

const CATEGORY_RESPONSE_KEY: &str = "aliexpress_affiliate_category_get_response";

pub fn discount_percent(original_price: f64, sale_price: f64) -> f64 {
    if original_price <= 0.0 {
        return 0.0;
    }
    (original_price - sale_price) / original_price * 100.0
}

/// Append the tracking parameters to a product URL.
pub fn affiliate_url(product_url: &str, tracking_id: &str) -> String {
    if product_url.is_empty() {
        return String::new();
    }
    let separator = if product_url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}tracking_id={}&aff_platform=api",
        product_url, separator, tracking_id
    )
}

/// The `result` object of a response, whether or not it is wrapped in `resp_result`.
fn result_object<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let wrapper = keys.iter().find_map(|k| data.get(*k))?;
    wrapper
        .get("resp_result")
        .and_then(|r| r.get("result"))
        .or_else(|| wrapper.get("result"))
}

/// Lists come either as a bare array or as `{ "<item>": [...] }`.
fn list_items<'a>(value: Option<&'a Value>, item_key: &str) -> &'a [Value] {
    match value {
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => match map.get(item_key) {
            Some(Value::Array(items)) => items,
            _ => &[],
        },
        _ => &[],
    }
}

fn text_field(product: &Value, key: &str) -> String {
    match product.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Numbers arrive as JSON numbers or as strings such as "4.7" or "95.0%".
fn number_field(product: &Value, key: &str) -> Option<f64> {
    match product.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

/// Normalise one raw product. Returns None when the product lacks an id, a
/// title or positive prices.
pub fn process_product(product: &Value, tracking_id: &str) -> Option<Product> {
    let product_id = text_field(product, "product_id");
    let title = text_field(product, "product_title");
    let original_price = number_field(product, "target_original_price").unwrap_or(0.0);
    let sale_price = number_field(product, "target_sale_price").unwrap_or(0.0);

    if product_id.is_empty() || title.is_empty() || original_price <= 0.0 || sale_price <= 0.0 {
        return None;
    }

    let product_url = text_field(product, "product_url");
    let rating = number_field(product, "rating")
        .or_else(|| {
            // Positive-feedback percentage mapped onto a five star scale
            number_field(product, "evaluate_rate").map(|pct| pct / 20.0)
        })
        .unwrap_or(0.0);

    Some(Product {
        affiliate_url: affiliate_url(&product_url, tracking_id),
        discount: discount_percent(original_price, sale_price),
        commission_rate: number_field(product, "commission_rate").unwrap_or(0.0),
        shop_title: text_field(product, "shop_title"),
        image_url: text_field(product, "product_main_image_url"),
        shop_url: text_field(product, "shop_url"),
        volume: number_field(product, "volume").unwrap_or(0.0).max(0.0) as u64,
        review_count: number_field(product, "review_count").unwrap_or(0.0).max(0.0) as u64,
        product_id,
        title,
        original_price,
        sale_price,
        product_url,
        rating,
    })
}

/// Extract products from a smartmatch, search or detail response.
pub fn parse_products_response(data: &Value, tracking_id: &str) -> Vec<Product> {
    let Some(result) = result_object(data, &PRODUCT_RESPONSE_KEYS) else {
        if let Some(err) = data.get("error_response") {
            warn!("AliExpress API error response: {}", err);
        }
        return Vec::new();
    };

    list_items(result.get("products"), "product")
        .iter()
        .filter_map(|p| process_product(p, tracking_id))
        .collect()
}

pub fn parse_categories_response(data: &Value) -> Vec<Category> {
    let Some(result) = result_object(data, &[CATEGORY_RESPONSE_KEY]) else {
        return Vec::new();
    };

    list_items(result.get("categories"), "category")
        .iter()
        .map(|c| Category {
            category_id: text_field(c, "category_id"),
            category_name: text_field(c, "category_name"),
            parent_category_id: text_field(c, "parent_category_id"),
        })
        .collect()
}

pub fn filter_by_discount(products: Vec<Product>, min_discount: f64) -> Vec<Product> {
    products
        .into_iter()
        .filter(|p| p.discount >= min_discount)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_affiliate_url_separator() {
        assert_eq!(
            affiliate_url("https://a.com/item/1.html", "T"),
            "https://a.com/item/1.html?tracking_id=T&aff_platform=api"
        );
        assert_eq!(
            affiliate_url("https://a.com/item/1.html?spm=x", "T"),
            "https://a.com/item/1.html?spm=x&tracking_id=T&aff_platform=api"
        );
        assert_eq!(affiliate_url("", "T"), "");
    }

    #[test]
    fn test_parse_search_response_with_string_numbers() {
        let data = json!({
            "aliexpress_affiliate_product_search_response": {
                "resp_result": {
                    "result": {
                        "products": {
                            "product": [
                                {
                                    "product_id": 1005001,
                                    "product_title": "USB-C cable",
                                    "target_original_price": "20.00",
                                    "target_sale_price": "10.00",
                                    "commission_rate": "7.0%",
                                    "product_url": "https://pt.aliexpress.com/item/1005001.html",
                                    "volume": 321,
                                    "evaluate_rate": "96.0%"
                                },
                                {
                                    "product_id": "1005002",
                                    "product_title": "",
                                    "target_original_price": "20.00",
                                    "target_sale_price": "10.00"
                                }
                            ]
                        }
                    }
                }
            }
        });

        let products = parse_products_response(&data, "TRK");
        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.product_id, "1005001");
        assert!((p.discount - 50.0).abs() < 1e-9);
        assert!((p.commission_rate - 7.0).abs() < 1e-9);
        assert!((p.rating - 4.8).abs() < 1e-9);
        assert_eq!(p.volume, 321);
        assert!(p.affiliate_url.ends_with("?tracking_id=TRK&aff_platform=api"));
    }

    #[test]
    fn test_parse_flat_result_list() {
        let data = json!({
            "aliexpress_affiliate_product_smartmatch_response": {
                "result": {
                    "products": [{
                        "product_id": "9",
                        "product_title": "Lamp",
                        "target_original_price": 100.0,
                        "target_sale_price": 25.0,
                        "rating": 4.6
                    }]
                }
            }
        });
        let products = parse_products_response(&data, "TRK");
        assert_eq!(products.len(), 1);
        assert!((products[0].discount - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_price_is_dropped() {
        let raw = json!({
            "product_id": "1",
            "product_title": "Free thing",
            "target_original_price": 0,
            "target_sale_price": 0
        });
        assert!(process_product(&raw, "T").is_none());
    }

    #[test]
    fn test_unknown_response_yields_nothing() {
        let data = json!({"error_response": {"code": 27, "msg": "Invalid signature"}});
        assert!(parse_products_response(&data, "T").is_empty());
    }

    #[test]
    fn test_parse_categories() {
        let data = json!({
            "aliexpress_affiliate_category_get_response": {
                "resp_result": {
                    "result": {
                        "categories": {
                            "category": [
                                {"category_id": 3, "category_name": "Apparel"},
                                {"category_id": 44, "category_name": "Electronics", "parent_category_id": 3}
                            ]
                        }
                    }
                }
            }
        });
        let categories = parse_categories_response(&data);
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[1].category_name, "Electronics");
        assert_eq!(categories[1].parent_category_id, "3");
        assert_eq!(categories[0].parent_category_id, "");
    }
}
