use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("avatar-tryon-service/", env!("CARGO_PKG_VERSION"));

// Callers override the total timeout per request; generation streams run long.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| Client::new())
});

pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
