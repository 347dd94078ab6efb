//! Connection pool gauges, refreshed by the task spawned in `create_pool`

use once_cell::sync::Lazy;
use prometheus::{register_int_gauge_vec, IntGaugeVec};
use sqlx::PgPool;

static POOL_CONNECTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "db_pool_connections",
        "Connections in the pool by state (idle/active/max)",
        &["service", "state"]
    )
    .expect("Prometheus metrics registration should succeed at startup")
});

pub(crate) fn update_pool_metrics(pool: &PgPool, service: &str) {
    let size = i64::from(pool.size());
    let idle = pool.num_idle() as i64;
    let max = i64::from(pool.options().get_max_connections());

    for (state, value) in [("idle", idle), ("active", size - idle), ("max", max)] {
        POOL_CONNECTIONS
            .with_label_values(&[service, state])
            .set(value);
    }
}
