use marquee_core::repository::RulesSource;
use marquee_core::{BookingResult, BookingRules, RulesHolder};
use marquee_store::app_config::WorkerConfig;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::state::AppState;

/// Rebuild the rules from `base` plus every override in the store and swap them
/// in. Returns whether the rules in force changed.
pub async fn refresh_rules(
    source: &dyn RulesSource,
    base: &BookingRules,
    holder: &RulesHolder,
) -> BookingResult<bool> {
    let overrides = source.rule_overrides().await?;

    let mut next = base.clone();
    for (key, value) in &overrides {
        next.apply_override(key, value);
    }

    if next == holder.current() {
        return Ok(false);
    }

    info!("Booking rules changed: {:?}", next);
    holder.replace(next);
    Ok(true)
}

/// Start the expiry sweep, the terminal purge and the rules refresh loops.
pub fn spawn_workers(state: AppState, config: &WorkerConfig) -> Vec<JoinHandle<()>> {
    info!(
        "Starting workers: reclaim every {}s, purge every {}s, rules refresh every {}s",
        config.reclaim_interval_seconds, config.purge_interval_seconds, config.rules_refresh_seconds
    );

    let reclaim_state = state.clone();
    let purge_state = state.clone();
    let rules_state = state;

    vec![
        spawn_loop("reclaim-expired", config.reclaim_interval_seconds, move || {
            let state = reclaim_state.clone();
            async move {
                retry_with_backoff(&RetryPolicy::default(), "reclaim-expired", || {
                    state.engine.reclaimer.reclaim_expired()
                })
                .await
                .map(|_| ())
            }
        }),
        spawn_loop("purge-terminal", config.purge_interval_seconds, move || {
            let state = purge_state.clone();
            async move {
                retry_with_backoff(&RetryPolicy::default(), "purge-terminal", || {
                    state.engine.reclaimer.purge_terminal()
                })
                .await
                .map(|_| ())
            }
        }),
        spawn_loop("rules-refresh", config.rules_refresh_seconds, move || {
            let state = rules_state.clone();
            async move {
                refresh_rules(state.rules_source.as_ref(), &state.base_rules, &state.rules)
                    .await
                    .map(|_| ())
            }
        }),
    ]
}

fn spawn_loop<F, Fut>(name: &'static str, every_seconds: u64, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = BookingResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(every_seconds.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = job().await {
                error!("{} job failed: {}", name, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_refresh_layers_overrides_on_base() {
        let store = MemoryStore::new();
        let base = BookingRules::default();
        let holder = RulesHolder::new(base.clone());

        assert!(!refresh_rules(&store, &base, &holder).await.unwrap());

        store.set_rule_override("hold_timeout_minutes", json!({"value": 5})).await;
        assert!(refresh_rules(&store, &base, &holder).await.unwrap());
        assert_eq!(holder.current().hold_timeout_minutes, 5);
        assert_eq!(holder.current().advance_sale_days, base.advance_sale_days);

        // Unchanged store means nothing to swap
        assert!(!refresh_rules(&store, &base, &holder).await.unwrap());
    }

    #[tokio::test]
    async fn test_configured_rules_stand_without_overrides() {
        let store = MemoryStore::new();
        let mut configured = BookingRules::default();
        configured.hold_timeout_minutes = 25;
        configured.room_break_time_minutes = 10;
        let holder = RulesHolder::new(configured.clone());

        refresh_rules(&store, &configured, &holder).await.unwrap();
        assert_eq!(holder.current(), configured);
    }

    #[tokio::test]
    async fn test_refresh_keeps_rules_when_store_is_down() {
        let store = MemoryStore::new();
        let base = BookingRules::default();
        let holder = RulesHolder::new(base.clone());
        store.set_offline(true);

        assert!(refresh_rules(&store, &base, &holder).await.is_err());
        assert_eq!(holder.current(), base);
    }
}
