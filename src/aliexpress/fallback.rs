use super::types::Product;

struct Sample {
    id: &'static str,
    title: &'static str,
    original_price: f64,
    sale_price: f64,
    commission_rate: f64,
    shop_title: &'static str,
    volume: u64,
    rating: f64,
    review_count: u64,
}

const SAMPLES: [Sample; 5] = [
    Sample {
        id: "1005001234567890",
        title: "Smartphone Android 128GB 4G Dual SIM",
        original_price: 599.99,
        sale_price: 399.99,
        commission_rate: 8.0,
        shop_title: "TechStore BR",
        volume: 1500,
        rating: 4.5,
        review_count: 234,
    },
    Sample {
        id: "1005002345678901",
        title: "Bluetooth TWS 5.0 Earbuds with Noise Cancelling",
        original_price: 299.99,
        sale_price: 149.99,
        commission_rate: 7.0,
        shop_title: "AudioMax",
        volume: 2000,
        rating: 4.7,
        review_count: 456,
    },
    Sample {
        id: "1005003456789012",
        title: "Smartwatch Fitness Tracker",
        original_price: 399.99,
        sale_price: 249.99,
        commission_rate: 9.0,
        shop_title: "SmartGadgets",
        volume: 1200,
        rating: 4.6,
        review_count: 189,
    },
    Sample {
        id: "1005004567890123",
        title: "Android Tablet 10\" 64GB Quad Core",
        original_price: 899.99,
        sale_price: 499.99,
        commission_rate: 8.5,
        shop_title: "TechWorld",
        volume: 800,
        rating: 4.4,
        review_count: 145,
    },
    Sample {
        id: "1005005678901234",
        title: "WiFi IP Security Camera 1080P",
        original_price: 249.99,
        sale_price: 129.99,
        commission_rate: 7.5,
        shop_title: "SmartHome",
        volume: 3000,
        rating: 4.8,
        review_count: 678,
    },
];

/// Fixed sample catalogue used while the affiliate API is unusable.
pub fn sample_products(tracking_id: &str, limit: usize) -> Vec<Product> {
    SAMPLES
        .iter()
        .enumerate()
        .take(limit)
        .map(|(i, s)| {
            let url = format!(
                "https://pt.aliexpress.com/item/{}.html?spm=a2g0o.home.{}",
                s.id, tracking_id
            );
            Product {
                product_id: s.id.to_string(),
                title: s.title.to_string(),
                original_price: s.original_price,
                sale_price: s.sale_price,
                discount: super::types::discount_percent(s.original_price, s.sale_price),
                commission_rate: s.commission_rate,
                shop_title: s.shop_title.to_string(),
                image_url: format!("https://via.placeholder.com/300?text=Product+{}", i + 1),
                product_url: url.clone(),
                shop_url: String::new(),
                volume: s.volume,
                rating: s.rating,
                review_count: s.review_count,
                affiliate_url: url,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_respect_limit_and_tracking_id() {
        let products = sample_products("MYTRACK", 3);
        assert_eq!(products.len(), 3);
        assert!(products
            .iter()
            .all(|p| p.affiliate_url.ends_with("spm=a2g0o.home.MYTRACK")));

        assert_eq!(sample_products("X", 50).len(), 5);
    }

    #[test]
    fn test_sample_discount_is_computed() {
        let products = sample_products("X", 2);
        assert!((products[1].discount - 50.0).abs() < 0.01);
    }
}
