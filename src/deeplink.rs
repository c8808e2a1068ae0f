//! Checkout callbacks delivered to the app as custom-scheme URLs.
//!
//! The payment page redirects to `<scheme>://checkout-success?session_id=...`
//! or `<scheme>://checkout-canceled`. The scheme itself is not checked.

use reqwest::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutCallback {
    Success { session_id: String },
    Canceled,
}

/// Parse a checkout callback URL.
///
/// Returns `None` for anything that is not a checkout callback, including a
/// success link without a usable `session_id`.
pub fn parse_checkout_callback(link: &str) -> Option<CheckoutCallback> {
    let url = Url::parse(link.trim()).ok()?;

    // `app://checkout-success` puts the action in the host, while
    // `app:checkout-success` leaves it in the path.
    let action = url
        .host_str()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| url.path())
        .trim_matches('/');

    match action {
        "checkout-success" => url
            .query_pairs()
            .find(|(key, _)| key == "session_id")
            .map(|(_, value)| value.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(|session_id| CheckoutCallback::Success { session_id }),
        "checkout-canceled" | "checkout-cancelled" => Some(CheckoutCallback::Canceled),
        _ => None,
    }
}
