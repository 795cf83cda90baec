//! Turning an AliExpress link pasted by the admin into a channel
//! announcement.

use std::sync::LazyLock;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::aliexpress::Product;
use crate::poster::truncate_chars;

/// Prefix of the preview message; stripped again when the admin approves.
pub const PREVIEW_PREFIX: &str = "📝 Announcement preview:\n\n";

static LINK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)https?://[a-z]+\.aliexpress\.com/item/\d+(\.html)?",
        r"(?i)https?://[a-z]+\.aliexpress\.com/store/product/\d+",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"/item/(\d+)", r"product_id=(\d+)", r"/(\d+)\.html"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// (category, emoji, price band)
const CATEGORIES: [(&str, &str, (u32, u32)); 10] = [
    ("Smartphone", "📱", (800, 2000)),
    ("Bluetooth Earbuds", "🎧", (50, 300)),
    ("Smartwatch", "⌚", (100, 500)),
    ("Camera", "📷", (200, 800)),
    ("Tablet", "📱", (300, 1000)),
    ("Notebook", "💻", (1500, 4000)),
    ("Mouse", "🖱️", (20, 100)),
    ("Keyboard", "⌨️", (50, 200)),
    ("Charger", "🔌", (15, 80)),
    ("USB Cable", "🔌", (10, 50)),
];

const BRANDS: [&str; 10] = [
    "Xiaomi", "Samsung", "Huawei", "OnePlus", "Realme", "Oppo", "Vivo", "Honor", "Redmi", "Poco",
];

const UNKNOWN_ID: &str = "0000000000";

pub fn is_aliexpress_link(text: &str) -> bool {
    LINK_PATTERNS.iter().any(|re| re.is_match(text))
}

pub fn extract_product_id(link: &str) -> Option<String> {
    ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(link))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// What an announcement shows about a product.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductInfo {
    pub product_id: String,
    pub title: String,
    pub category: String,
    pub original_price: f64,
    pub sale_price: f64,
    pub discount: f64,
    pub rating: f64,
    pub sales: u64,
}

impl ProductInfo {
    /// Plausible product details derived from the id alone. The same id
    /// always yields the same details.
    pub fn synthetic(product_id: &str) -> Self {
        let digits: String = product_id.chars().filter(char::is_ascii_digit).collect();
        let seed = digits[digits.len().saturating_sub(6)..]
            .parse::<u64>()
            .unwrap_or(0);
        let mut rng = StdRng::seed_from_u64(seed);

        let (category, _, (low, high)) = *CATEGORIES
            .choose(&mut rng)
            .unwrap_or(&CATEGORIES[0]);
        let brand = BRANDS.choose(&mut rng).copied().unwrap_or(BRANDS[0]);

        let original_price = rng.gen_range(low..=high);
        let discount = rng.gen_range(20..=70u32);
        let sale_price = original_price * (100 - discount) / 100;
        let rating = (rng.gen_range(4.0..=4.9f64) * 10.0).round() / 10.0;

        Self {
            product_id: product_id.to_string(),
            title: format!("{} {} Premium", brand, category),
            category: category.to_string(),
            original_price: original_price as f64,
            sale_price: sale_price as f64,
            discount: discount as f64,
            rating,
            sales: rng.gen_range(100..=5000),
        }
    }

    pub fn from_product(product: &Product) -> Self {
        Self {
            product_id: product.product_id.clone(),
            title: truncate_chars(&product.title, 100),
            category: crate::ranking::category_of(&product.title).to_string(),
            original_price: product.original_price,
            sale_price: product.sale_price,
            discount: product.discount,
            rating: product.rating,
            sales: product.volume,
        }
    }
}

/// Synthetic details for whatever id `link` carries.
pub fn product_info_for_link(link: &str) -> ProductInfo {
    let id = extract_product_id(link).unwrap_or_else(|| UNKNOWN_ID.to_string());
    ProductInfo::synthetic(&id)
}

fn category_emoji(category: &str) -> &'static str {
    CATEGORIES
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(category))
        .map(|(_, emoji, _)| *emoji)
        .unwrap_or("🛍️")
}

fn announcement_highlights(info: &ProductInfo) -> String {
    let mut tags = Vec::new();
    if info.discount > 60.0 {
        tags.push("🔥 Super deal");
    }
    if info.discount > 50.0 {
        tags.push("⚡ Flash discount");
    }
    if info.rating > 4.5 {
        tags.push("⭐ Highly rated");
    }
    if info.sales > 1000 {
        tags.push("📈 Best seller");
    }
    if tags.is_empty() {
        "Special promotion".to_string()
    } else {
        tags.join(" | ")
    }
}

pub fn announcement(info: &ProductInfo, link: &str, currency: &str) -> String {
    let hashtag: String = info.category.split_whitespace().collect();
    format!(
        "{emoji} {title} | {highlights}\n\
         \n\
         💵 From {cur} {original:.2} ➜ {cur} {sale:.2}\n\
         🎯 Discount: {discount:.0}% | Cashback available\n\
         🚚 Free shipping | Fast delivery\n\
         ⭐ Rating: {rating:.1} | {sales} sold\n\
         \n\
         🔗 Discount link (affiliate):\n\
         {link}\n\
         \n\
         🏪 Official AliExpress store\n\
         \n\
         #AliExpress #Deals #Discount #{hashtag}",
        emoji = category_emoji(&info.category),
        title = info.title,
        highlights = announcement_highlights(info),
        cur = currency,
        original = info.original_price,
        sale = info.sale_price,
        discount = info.discount,
        rating = info.rating,
        sales = info.sales,
        link = link.trim(),
        hashtag = hashtag,
    )
}

/// Recover the announcement from the preview message text.
pub fn strip_preview(text: &str) -> &str {
    text.strip_prefix(PREVIEW_PREFIX).unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: &str =
        "https://pt.aliexpress.com/item/1005001234567890.html?spm=a2g0o.home.BOT_TELEGRAM";

    #[test]
    fn test_link_recognition() {
        assert!(is_aliexpress_link(LINK));
        assert!(is_aliexpress_link("see https://www.aliexpress.com/item/123"));
        assert!(is_aliexpress_link(
            "HTTPS://PT.ALIEXPRESS.COM/store/product/998877"
        ));
        assert!(!is_aliexpress_link("https://example.com/item/123.html"));
        assert!(!is_aliexpress_link("hello"));
    }

    #[test]
    fn test_extract_product_id() {
        assert_eq!(extract_product_id(LINK).as_deref(), Some("1005001234567890"));
        assert_eq!(
            extract_product_id("https://s.click.aliexpress.com/x?product_id=42").as_deref(),
            Some("42")
        );
        assert_eq!(
            extract_product_id("https://a.aliexpress.com/77.html").as_deref(),
            Some("77")
        );
        assert_eq!(extract_product_id("https://aliexpress.com/"), None);
    }

    #[test]
    fn test_synthetic_info_is_stable_and_plausible() {
        let a = product_info_for_link(LINK);
        let b = product_info_for_link(LINK);
        assert_eq!(a, b);

        assert_eq!(a.product_id, "1005001234567890");
        assert!((20.0..=70.0).contains(&a.discount));
        assert!((4.0..=4.9).contains(&a.rating));
        assert!((100..=5000).contains(&a.sales));
        assert!(a.sale_price < a.original_price);
        assert!(a.title.ends_with("Premium"));
    }

    #[test]
    fn test_unknown_id_still_produces_info() {
        let info = product_info_for_link("https://pt.aliexpress.com/store/product/abc");
        assert_eq!(info.product_id, UNKNOWN_ID);
        let short = ProductInfo::synthetic("12");
        assert_eq!(short.product_id, "12");
    }

    #[test]
    fn test_announcement_round_trips_through_preview() {
        let info = ProductInfo {
            product_id: "1".to_string(),
            title: "Poco Bluetooth Earbuds Premium".to_string(),
            category: "Bluetooth Earbuds".to_string(),
            original_price: 200.0,
            sale_price: 70.0,
            discount: 65.0,
            rating: 4.8,
            sales: 2500,
        };
        let text = announcement(&info, LINK, "R$");
        assert!(text.starts_with("🎧 Poco Bluetooth Earbuds Premium | 🔥 Super deal"));
        assert!(text.contains("From R$ 200.00 ➜ R$ 70.00"));
        assert!(text.contains("📈 Best seller"));
        assert!(text.ends_with("#BluetoothEarbuds"));

        let preview = format!("{}{}", PREVIEW_PREFIX, text);
        assert_eq!(strip_preview(&preview), text);
    }
}
