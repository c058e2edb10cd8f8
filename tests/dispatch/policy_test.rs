//! Route selection.

use unsend_mailer::config::DeliveryConfig;
use unsend_mailer::dispatch::{decide, Route};

#[test]
fn override_disabled_always_routes_native() {
    for test_mode in [false, true] {
        for key in [false, true] {
            let delivery = DeliveryConfig {
                override_enabled: false,
                test_mode,
            };
            assert_eq!(decide(&delivery, key), Route::Native);
        }
    }
}

#[test]
fn override_without_key_routes_native() {
    let delivery = DeliveryConfig {
        override_enabled: true,
        test_mode: false,
    };
    assert_eq!(decide(&delivery, false), Route::Native);
    assert_eq!(decide(&delivery, true), Route::Provider);
}
