//! Refresh an expired token, then fetch again.
use futures::stream;
use retry_on::prelude::*;
use retry_on::MemorySubscriber;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum ApiError {
    TokenExpired,
    RateLimited,
}

#[tokio::main]
async fn main() {
    let token_valid = Arc::new(AtomicBool::new(false));

    let fetch = {
        let token_valid = token_valid.clone();
        move || {
            let page = if token_valid.load(Ordering::SeqCst) {
                vec![Ok("page 1"), Ok("page 2")]
            } else {
                vec![Err(ApiError::TokenExpired)]
            };
            stream::iter(page)
        }
    };

    let refresh = {
        let token_valid = token_valid.clone();
        move || {
            token_valid.store(true, Ordering::SeqCst);
            // Replace with a real token exchange; values emitted here are ignored
            stream::iter(vec![Ok::<_, ApiError>("new-token")])
        }
    };

    let sink = MemorySubscriber::new();
    let mut pages = fetch.retry_on_with(ApiError::TokenExpired, 1, refresh);
    let (_subscription, delivery) = pages.deliver(sink.clone());

    match delivery.await {
        Ok(Termination::Completed) => println!("pages: {:?}", sink.values()),
        Ok(other) => println!("stopped: {:?} after {:?}", other, sink.signals()),
        Err(e) => println!("sink failed: {}", e),
    }

    // Other failures pass straight through.
    let limited = || stream::iter(vec![Err::<&str, _>(ApiError::RateLimited)]);
    let sink = MemorySubscriber::new();
    let mut limited = limited.retry_on(ApiError::TokenExpired, 3);
    let (_subscription, delivery) = limited.deliver(sink.clone());
    match delivery.await {
        Ok(termination) => println!("{:?}: {:?}", termination, sink.signals()),
        Err(e) => println!("sink failed: {}", e),
    }
}
