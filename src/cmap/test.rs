use std::time::Duration;

use pretty_assertions::assert_eq;

use super::options::ConnectionPoolOptions;
use crate::{
    error::ErrorKind,
    options::{ClientOptions, ServerAddress},
};

#[test]
fn pool_options_derive_from_client_options() {
    let client_options = ClientOptions::builder()
        .max_pool_size(25u32)
        .min_pool_size(5u32)
        .max_idle_time(Duration::from_secs(60))
        .wait_queue_timeout(Duration::from_millis(250))
        .connect_timeout(Duration::from_secs(5))
        .build();

    let pool_options = ConnectionPoolOptions::from_client_options(&client_options);
    assert_eq!(pool_options.max_pool_size, Some(25));
    assert_eq!(pool_options.min_pool_size, Some(5));
    assert_eq!(pool_options.max_idle_time, Some(Duration::from_secs(60)));
    assert_eq!(
        pool_options.wait_queue_timeout,
        Some(Duration::from_millis(250))
    );
    assert_eq!(pool_options.connect_timeout, Some(Duration::from_secs(5)));
}

#[tokio::test]
async fn checkout_from_closed_pool_fails() {
    let pool = super::ConnectionPool::new_mocked(ServerAddress::Tcp {
        host: "localhost".to_string(),
        port: None,
    });

    // The mocked pool has no worker behind it, equivalent to a pool whose worker has shut
    // down; checkouts must fail rather than hang.
    let err = pool.check_out().await.unwrap_err();
    assert!(matches!(
        err.kind.as_ref(),
        ErrorKind::ConnectionPoolCleared { .. } | ErrorKind::Internal { .. }
    ));
}
