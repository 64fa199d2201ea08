use chrono::Duration;
use folio_catalog::CurrencyCode;

/// Business knobs shared by the lifecycle services, built from the `orders` config section.
#[derive(Debug, Clone)]
pub struct OrderPolicy {
    /// Currency every order is charged in.
    pub base_currency: CurrencyCode,
    pub payment_method: String,
    pub max_downloads: i32,
    /// Added to the approval time to get the link expiry.
    pub link_ttl: Duration,
    pub pending_ttl: Duration,
    pub gateway_timeout: std::time::Duration,
    pub notify_timeout: std::time::Duration,
    /// Token is appended as `?token=...`.
    pub download_base_url: String,
}

impl OrderPolicy {
    /// Defaults for everything but the charging currency.
    pub fn new(base_currency: CurrencyCode) -> Self {
        Self {
            base_currency,
            payment_method: "razorpay".to_string(),
            max_downloads: 3,
            link_ttl: Duration::days(30),
            pending_ttl: Duration::minutes(60),
            gateway_timeout: std::time::Duration::from_secs(10),
            notify_timeout: std::time::Duration::from_secs(5),
            download_base_url: "http://localhost:3000/v1/orders/download".to_string(),
        }
    }

    pub fn download_link(&self, token: &str) -> String {
        let separator = if self.download_base_url.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.download_base_url, separator, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_link_appends_token() {
        let policy = OrderPolicy::new(CurrencyCode::parse("INR").unwrap());
        assert_eq!(
            policy.download_link("abc"),
            "http://localhost:3000/v1/orders/download?token=abc"
        );

        let policy = OrderPolicy {
            download_base_url: "https://shop.test/dl?src=mail".into(),
            ..policy
        };
        assert_eq!(policy.download_link("abc"), "https://shop.test/dl?src=mail&token=abc");
    }
}
