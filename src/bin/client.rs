//! Terminal watcher: connects to a running server, mirrors its pushed state,
//! and prints the subscribed symbols once a second.
//!
//! Expects `WS_URL` (default `ws://127.0.0.1:8080/ws`) and either `TOKEN`
//! or a `USER_ID`/`EMAIL` pair plus `JWT_SECRET` to mint one locally.

use std::env;
use std::time::Duration;

use log::info;

use ticker_socket::auth::JwtIssuer;
use ticker_socket::client::StreamClient;
use ticker_socket::config::DEFAULT_JWT_SECRET;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let url = env::var("WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8080/ws".to_string());
    let token = match env::var("TOKEN") {
        Ok(token) => token,
        Err(_) => {
            let user_id = env::var("USER_ID").unwrap_or_else(|_| "demo-user".to_string());
            let email = env::var("EMAIL").unwrap_or_else(|_| "demo@example.com".to_string());
            let secret = env::var("JWT_SECRET").unwrap_or_else(|_| DEFAULT_JWT_SECRET.to_string());
            JwtIssuer::new(&secret).issue(&user_id, &email)?
        }
    };

    let (client, handle) = StreamClient::new(url, token);
    tokio::spawn(client.run());

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;

        let state = handle.state();
        if !state.is_connected() {
            info!("(disconnected - showing last known prices)");
        }

        for symbol in state.subscriptions().iter() {
            if let Some(price) = state.price(*symbol) {
                let points = state.history(*symbol).map(|h| h.len()).unwrap_or(0);
                println!("{symbol:>6} {price:>10.2}  ({points} points)");
            }
        }
    }
}
