//! Storefront-specific assertions.
//!
//! Every failure is a [`HarnessError::AssertionFailed`]. These are
//! correctness checks: [`RetryHelper`](crate::RetryHelper) never retries them.

use crate::network::ResponseEvent;
use crate::page::BrowserPage;
use crate::result::{HarnessError, HarnessResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Selector of the header link shown to signed-in users
pub const LOGGED_IN_SELECTOR: &str = r#"a:has-text("Logged in as")"#;

const VISIBILITY_POLL: Duration = Duration::from_millis(100);

/// A product as listed on the storefront
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Display name
    pub name: String,
    /// Displayed price, e.g. `Rs. 500`
    pub price: String,
    /// Category label
    #[serde(default)]
    pub category: Option<String>,
}

impl Product {
    /// Create a product without category
    #[must_use]
    pub fn new(name: &str, price: &str) -> Self {
        Self {
            name: name.to_string(),
            price: price.to_string(),
            category: None,
        }
    }

    /// Set the category
    #[must_use]
    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }
}

fn default_quantity() -> u32 {
    1
}

/// A line of the shopping cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product name
    pub name: String,
    /// Unit price as displayed
    pub price: String,
    /// Quantity
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

impl CartItem {
    /// Create a cart line
    #[must_use]
    pub fn new(name: &str, price: &str, quantity: u32) -> Self {
        Self {
            name: name.to_string(),
            price: price.to_string(),
            quantity,
        }
    }
}

/// Product search constraints (config key `productCriteria`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCriteria {
    /// Search box query
    #[serde(default)]
    pub search_query: Option<String>,
    /// Accepted product types, matched against name or category
    #[serde(default)]
    pub product_types: Vec<String>,
    /// Inclusive lower price bound
    #[serde(default)]
    pub min_price: Option<f64>,
    /// Inclusive upper price bound
    #[serde(default)]
    pub max_price: Option<f64>,
}

/// Result of placing an order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmation {
    /// Whether the storefront reported success
    pub success: bool,
    /// Confirmation message
    pub message: String,
    /// Additional order details, if any were scraped
    #[serde(default)]
    pub order_details: Option<Value>,
}

fn price_pattern() -> Option<&'static Regex> {
    static PRICE: OnceLock<Option<Regex>> = OnceLock::new();
    PRICE
        .get_or_init(|| Regex::new(r"-?[0-9][0-9,]*(?:\.[0-9]+)?").ok())
        .as_ref()
}

/// Numeric value of a displayed price: currency prefixes such as `Rs. ` and
/// thousands separators are ignored
#[must_use]
pub fn parse_price(text: &str) -> Option<f64> {
    let found = price_pattern()?.find(text)?;
    found.as_str().replace(',', "").parse().ok()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn check(condition: bool, message: impl FnOnce() -> String) -> HarnessResult<()> {
    if condition {
        Ok(())
    } else {
        Err(HarnessError::assertion(message()))
    }
}

/// Domain assertions bound to a page
pub struct CustomAssertions {
    page: Arc<dyn BrowserPage>,
    expect_timeout: Duration,
}

impl std::fmt::Debug for CustomAssertions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomAssertions")
            .field("expect_timeout", &self.expect_timeout)
            .finish_non_exhaustive()
    }
}

impl CustomAssertions {
    /// Bind to a page; visibility checks wait up to 5 seconds
    #[must_use]
    pub fn new(page: Arc<dyn BrowserPage>) -> Self {
        Self {
            page,
            expect_timeout: Duration::from_secs(5),
        }
    }

    /// How long visibility checks wait before failing
    #[must_use]
    pub const fn with_expect_timeout(mut self, timeout: Duration) -> Self {
        self.expect_timeout = timeout;
        self
    }

    /// Visibility wait budget
    #[must_use]
    pub const fn expect_timeout(&self) -> Duration {
        self.expect_timeout
    }

    /// The "Logged in as" link is present, and names `username` if given
    pub async fn assert_user_logged_in(&self, username: Option<&str>) -> HarnessResult<()> {
        let text = self
            .page
            .text_content(LOGGED_IN_SELECTOR)
            .await?
            .unwrap_or_default();
        check(!text.trim().is_empty(), || {
            "User should be logged in".to_string()
        })?;
        if let Some(username) = username {
            check(text.contains(username), || {
                format!("Expected \"{}\" to contain username \"{username}\"", text.trim())
            })?;
        }
        Ok(())
    }

    /// Product type and price lie within `criteria`
    pub fn assert_product_matches_criteria(
        &self,
        product: &Product,
        criteria: &ProductCriteria,
    ) -> HarnessResult<()> {
        if !criteria.product_types.is_empty() {
            let name = product.name.to_lowercase();
            let category = product.category.as_deref().unwrap_or_default().to_lowercase();
            let matches_type = criteria.product_types.iter().any(|kind| {
                let kind = kind.to_lowercase();
                name.contains(&kind) || (!category.is_empty() && category.contains(&kind))
            });
            check(matches_type, || {
                format!(
                    "Product \"{}\" should match one of types: {}",
                    product.name,
                    criteria.product_types.join(", ")
                )
            })?;
        }

        if let (Some(min), Some(max)) = (criteria.min_price, criteria.max_price) {
            let price = parse_price(&product.price).ok_or_else(|| {
                HarnessError::assertion(format!(
                    "Product \"{}\" has no numeric price: \"{}\"",
                    product.name, product.price
                ))
            })?;
            check(price >= min && price <= max, || {
                format!(
                    "Price {price} of \"{}\" is outside [{min}, {max}]",
                    product.name
                )
            })?;
        }
        Ok(())
    }

    /// Same number of lines, names contain the expected names and prices are equal
    pub fn assert_cart_contents(&self, cart: &[CartItem], expected: &[Product]) -> HarnessResult<()> {
        check(cart.len() == expected.len(), || {
            format!(
                "Expected {} cart items, found {}",
                expected.len(),
                cart.len()
            )
        })?;
        for (index, (item, product)) in cart.iter().zip(expected).enumerate() {
            check(item.name.contains(&product.name), || {
                format!(
                    "Cart item {}: \"{}\" should contain \"{}\"",
                    index + 1,
                    item.name,
                    product.name
                )
            })?;
            check(item.price == product.price, || {
                format!(
                    "Cart item {}: price \"{}\" should be \"{}\"",
                    index + 1,
                    item.price,
                    product.price
                )
            })?;
        }
        Ok(())
    }

    /// `total` equals the sum of price × quantity
    pub fn assert_cart_total_correct(&self, total: &str, cart: &[CartItem]) -> HarnessResult<()> {
        let mut expected = 0.0;
        for item in cart {
            let price = parse_price(&item.price).ok_or_else(|| {
                HarnessError::assertion(format!(
                    "Cart item \"{}\" has no numeric price: \"{}\"",
                    item.name, item.price
                ))
            })?;
            expected += price * f64::from(item.quantity);
        }
        let actual = parse_price(total)
            .ok_or_else(|| HarnessError::assertion(format!("Cart total \"{total}\" is not numeric")))?;
        check((actual - expected).abs() < 0.005, || {
            format!("Cart total {actual} should be {expected}")
        })
    }

    /// The order succeeded with a message, and any details are non-empty
    pub fn assert_order_confirmed(&self, confirmation: &OrderConfirmation) -> HarnessResult<()> {
        check(confirmation.success, || "Order should be successful".to_string())?;
        check(!confirmation.message.trim().is_empty(), || {
            "Order confirmation should carry a message".to_string()
        })?;
        if let Some(details) = &confirmation.order_details {
            check(is_truthy(details), || "Order details should not be empty".to_string())?;
        }
        Ok(())
    }

    /// Every selector becomes visible within the expect timeout
    pub async fn assert_page_has_elements(&self, selectors: &[&str]) -> HarnessResult<()> {
        for selector in selectors {
            let deadline = Instant::now() + self.expect_timeout;
            loop {
                if self.page.is_visible(selector).await? {
                    break;
                }
                if Instant::now() >= deadline {
                    return Err(HarnessError::assertion(format!(
                        "Expected element \"{selector}\" to be visible within {}ms",
                        self.expect_timeout.as_millis()
                    )));
                }
                sleep(VISIBILITY_POLL).await;
            }
        }
        Ok(())
    }

    /// Response carries `expected_status`
    pub fn assert_api_response(&self, response: &ResponseEvent, expected_status: u16) -> HarnessResult<()> {
        check(response.status == expected_status, || {
            format!(
                "Expected status {expected_status} from {}, got {} {}",
                response.url, response.status, response.status_text
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockElement, MockPage};
    use crate::network::{NetworkFilter, NetworkLogger};
    use crate::page::ResourceType;

    fn assertions(page: &Arc<MockPage>) -> CustomAssertions {
        CustomAssertions::new(page.clone()).with_expect_timeout(Duration::ZERO)
    }

    fn criteria() -> ProductCriteria {
        ProductCriteria {
            search_query: Some("Sleeves Top and Short".to_string()),
            product_types: vec!["top".to_string(), "short".to_string()],
            min_price: Some(0.0),
            max_price: Some(1000.0),
        }
    }

    mod price_tests {
        use super::*;

        #[test]
        fn test_parse_price() {
            assert_eq!(parse_price("Rs. 500"), Some(500.0));
            assert_eq!(parse_price("Rs. 1,250"), Some(1250.0));
            assert_eq!(parse_price("12.75"), Some(12.75));
            assert_eq!(parse_price("free"), None);
        }
    }

    mod login_tests {
        use super::*;

        #[tokio::test]
        async fn test_logged_in_with_username() {
            let page = Arc::new(
                MockPage::new().with_element(LOGGED_IN_SELECTOR, MockElement::visible(" Logged in as qa_user")),
            );
            let a = assertions(&page);
            assert!(a.assert_user_logged_in(None).await.is_ok());
            assert!(a.assert_user_logged_in(Some("qa_user")).await.is_ok());
            assert!(a.assert_user_logged_in(Some("someone")).await.unwrap_err().is_assertion());
        }

        #[tokio::test]
        async fn test_not_logged_in() {
            let page = Arc::new(MockPage::new());
            let err = assertions(&page).assert_user_logged_in(None).await.unwrap_err();
            assert!(err.to_string().contains("User should be logged in"));
        }
    }

    mod product_tests {
        use super::*;

        #[test]
        fn test_matching_product() {
            let page = Arc::new(MockPage::new());
            let product = Product::new("Sleeveless Top", "Rs. 400");
            assert!(assertions(&page)
                .assert_product_matches_criteria(&product, &criteria())
                .is_ok());
        }

        #[test]
        fn test_category_can_satisfy_type() {
            let page = Arc::new(MockPage::new());
            let product = Product::new("Summer Comfort", "Rs. 300").with_category("Women > Tops");
            assert!(assertions(&page)
                .assert_product_matches_criteria(&product, &criteria())
                .is_ok());
        }

        #[test]
        fn test_wrong_type_and_price() {
            let page = Arc::new(MockPage::new());
            let a = assertions(&page);
            assert!(a
                .assert_product_matches_criteria(&Product::new("Blue Jeans", "Rs. 400"), &criteria())
                .is_err());
            assert!(a
                .assert_product_matches_criteria(&Product::new("Fancy Top", "Rs. 1500"), &criteria())
                .is_err());
        }

        #[test]
        fn test_price_bounds_need_both_ends() {
            let page = Arc::new(MockPage::new());
            let open_ended = ProductCriteria {
                max_price: None,
                ..criteria()
            };
            assert!(assertions(&page)
                .assert_product_matches_criteria(&Product::new("Fancy Top", "Rs. 1500"), &open_ended)
                .is_ok());
        }

        #[test]
        fn test_criteria_deserialise_from_config() {
            let config = crate::config::ConfigManager::from_value(
                crate::config::ConfigManager::base_config().unwrap(),
            );
            let parsed: ProductCriteria = config.get_or("productCriteria", ProductCriteria::default());
            assert_eq!(parsed, criteria());
        }
    }

    mod cart_tests {
        use super::*;

        #[test]
        fn test_cart_contents() {
            let page = Arc::new(MockPage::new());
            let a = assertions(&page);
            let expected = vec![Product::new("Blue Top", "Rs. 500"), Product::new("Men Tshirt", "Rs. 400")];
            let cart = vec![
                CartItem::new("Blue Top (Women)", "Rs. 500", 1),
                CartItem::new("Men Tshirt", "Rs. 400", 2),
            ];
            assert!(a.assert_cart_contents(&cart, &expected).is_ok());
            assert!(a.assert_cart_contents(&cart[..1], &expected).is_err());

            let mispriced = vec![cart[0].clone(), CartItem::new("Men Tshirt", "Rs. 450", 2)];
            assert!(a.assert_cart_contents(&mispriced, &expected).is_err());
        }

        #[test]
        fn test_cart_total() {
            let page = Arc::new(MockPage::new());
            let a = assertions(&page);
            let cart = vec![
                CartItem::new("Blue Top", "Rs. 500", 1),
                CartItem::new("Men Tshirt", "Rs. 400", 2),
            ];
            assert!(a.assert_cart_total_correct("Rs. 1300", &cart).is_ok());
            assert!(a.assert_cart_total_correct("1300", &cart).is_ok());
            assert!(a.assert_cart_total_correct("Rs. 1200", &cart).unwrap_err().is_assertion());
            assert!(a.assert_cart_total_correct("Rs. 0", &[]).is_ok());
        }

        #[test]
        fn test_quantity_defaults_to_one() {
            let item: CartItem = serde_json::from_str(r#"{"name": "Blue Top", "price": "Rs. 500"}"#).unwrap();
            assert_eq!(item.quantity, 1);
        }
    }

    mod order_tests {
        use super::*;

        #[test]
        fn test_order_confirmation() {
            let page = Arc::new(MockPage::new());
            let a = assertions(&page);
            let ok = OrderConfirmation {
                success: true,
                message: "Congratulations! Your order has been confirmed!".to_string(),
                order_details: Some(serde_json::json!({"invoice": true})),
            };
            assert!(a.assert_order_confirmed(&ok).is_ok());

            let empty_details = OrderConfirmation {
                order_details: Some(serde_json::json!("")),
                ..ok.clone()
            };
            assert!(a.assert_order_confirmed(&empty_details).is_err());
            assert!(a
                .assert_order_confirmed(&OrderConfirmation {
                    success: false,
                    ..ok
                })
                .is_err());
        }
    }

    mod page_tests {
        use super::*;

        #[tokio::test]
        async fn test_page_has_elements() {
            let page = Arc::new(
                MockPage::new()
                    .with_element("#cart", MockElement::visible("Cart"))
                    .with_element("#hidden", MockElement::hidden()),
            );
            let a = assertions(&page);
            assert!(a.assert_page_has_elements(&["#cart"]).await.is_ok());
            let err = a.assert_page_has_elements(&["#cart", "#hidden"]).await.unwrap_err();
            assert!(err.to_string().contains("#hidden"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_visibility_is_awaited() {
            let page = Arc::new(MockPage::new());
            let delayed = page.clone();
            let reveal = tokio::spawn(async move {
                sleep(Duration::from_millis(300)).await;
                delayed.set_element(".modal", MockElement::visible("Added!"));
            });
            let a = CustomAssertions::new(page.clone()).with_expect_timeout(Duration::from_secs(1));
            assert!(a.assert_page_has_elements(&[".modal"]).await.is_ok());
            reveal.await.unwrap();
        }

        #[tokio::test]
        async fn test_api_response() {
            let page = Arc::new(MockPage::new());
            let logger = NetworkLogger::attach(page.clone());
            page.emit_exchange("https://shop.test/api/productsList", "GET", 200, ResourceType::Xhr);
            let response = logger.responses(&NetworkFilter::new().url("productsList")).remove(0);
            let a = assertions(&page);
            assert!(a.assert_api_response(&response, 200).is_ok());
            assert!(a.assert_api_response(&response, 201).unwrap_err().is_assertion());
        }
    }
}
