use std::time::Duration;

use quietboard::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};

const RL_VARS: [&str; 5] = ["RL_ENABLED", "RL_THREAD_LIMIT", "RL_THREAD_WINDOW", "RL_COMMENT_LIMIT", "RL_COMMENT_WINDOW"];

fn clear_env() {
    for name in RL_VARS {
        std::env::remove_var(name);
    }
}

#[test]
#[serial_test::serial]
fn defaults_without_env() {
    clear_env();
    let cfg = RateLimitConfig::from_env();
    assert!(cfg.enabled);
    assert_eq!(cfg.thread_limit, 1);
    assert_eq!(cfg.thread_window, Duration::from_secs(300));
    assert_eq!(cfg.comment_limit, 10);
    assert_eq!(cfg.comment_window, Duration::from_secs(60));
    assert_eq!(cfg.longest_window(), Duration::from_secs(300));
}

#[test]
#[serial_test::serial]
fn env_overrides_limits() {
    clear_env();
    std::env::set_var("RL_COMMENT_LIMIT", "2");
    std::env::set_var("RL_COMMENT_WINDOW", "900");
    std::env::set_var("RL_THREAD_LIMIT", "not a number");
    let cfg = RateLimitConfig::from_env();
    clear_env();

    assert_eq!(cfg.comment_limit, 2);
    assert_eq!(cfg.comment_window, Duration::from_secs(900));
    assert_eq!(cfg.thread_limit, 1);
    assert_eq!(cfg.longest_window(), Duration::from_secs(900));

    let facade = RateLimiterFacade::from_config(cfg);
    assert!(facade.allow_comment("s").is_ok());
    assert!(facade.allow_comment("s").is_ok());
    let retry = facade.allow_comment("s").unwrap_err();
    assert!(retry <= Duration::from_secs(900) && retry > Duration::from_secs(890));
}

#[test]
#[serial_test::serial]
fn env_can_disable_limiting() {
    clear_env();
    std::env::set_var("RL_ENABLED", "false");
    let facade = RateLimiterFacade::from_config(RateLimitConfig::from_env());
    clear_env();
    for _ in 0..20 {
        assert!(facade.allow_thread("s").is_ok());
    }
    assert_eq!(facade.limiter.tracked_keys(), 0);
}

#[test]
fn thread_and_comment_allowances_are_separate() {
    let facade = RateLimiterFacade::new(InMemoryRateLimiter::new(true), RateLimitConfig::default());
    assert!(facade.allow_thread("s").is_ok());
    assert!(facade.allow_thread("s").is_err());
    for _ in 0..10 {
        assert!(facade.allow_comment("s").is_ok());
    }
    assert!(facade.allow_comment("s").is_err());
    assert_eq!(facade.limiter.tracked_keys(), 2);
}

#[test]
fn clones_share_state() {
    let limiter = InMemoryRateLimiter::new(true);
    let other = limiter.clone();
    assert!(limiter.check("k", 1, Duration::from_secs(60)).is_ok());
    assert!(other.check("k", 1, Duration::from_secs(60)).is_err());
}
