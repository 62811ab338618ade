//! Prometheus text exposition format.
//!
//! Renders the process counters and per-pool gauges into the Prometheus
//! text exposition format for scraping by an external collector.

use crate::registry::{Metrics, PoolSnapshot};

/// Render counters and pool snapshots into Prometheus text format.
pub fn render_prometheus(metrics: &Metrics, pools: &[PoolSnapshot]) -> String {
    let mut out = String::new();

    let counters: [(&str, &str, &std::sync::atomic::AtomicU64); 11] = [
        (
            "corral_instance_create_attempts_total",
            "Instance create operations attempted.",
            &metrics.instance_create_attempts,
        ),
        (
            "corral_instance_create_failures_total",
            "Instance create operations that failed.",
            &metrics.instance_create_failures,
        ),
        (
            "corral_instance_delete_attempts_total",
            "Instance delete operations attempted.",
            &metrics.instance_delete_attempts,
        ),
        (
            "corral_instance_delete_failures_total",
            "Instance delete operations that failed.",
            &metrics.instance_delete_failures,
        ),
        (
            "corral_provider_operation_attempts_total",
            "Provider calls attempted.",
            &metrics.provider_op_attempts,
        ),
        (
            "corral_provider_operation_failures_total",
            "Provider calls that failed.",
            &metrics.provider_op_failures,
        ),
        (
            "corral_jobs_received_total",
            "Job events received from the demand signal.",
            &metrics.jobs_received,
        ),
        (
            "corral_jobs_deduplicated_total",
            "Duplicate job deliveries dropped.",
            &metrics.jobs_deduplicated,
        ),
        (
            "corral_sweep_orphans_removed_total",
            "Provider-side orphans removed by the consistency sweep.",
            &metrics.sweep_orphans_removed,
        ),
        (
            "corral_sweep_lost_instances_total",
            "Store instances found missing at the provider.",
            &metrics.sweep_lost_instances,
        ),
        (
            "corral_force_deletes_total",
            "Operator force-deletes bypassing provider confirmation.",
            &metrics.force_deletes,
        ),
    ];

    for (name, help, counter) in counters {
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} counter\n"));
        out.push_str(&format!("{name} {}\n", Metrics::get(counter)));
    }

    out.push_str("# HELP corral_pool_enabled Pool enablement (1 enabled, 0 disabled).\n");
    out.push_str("# TYPE corral_pool_enabled gauge\n");
    for p in pools {
        out.push_str(&format!(
            "corral_pool_enabled{{pool=\"{}\"}} {}\n",
            p.pool_id,
            if p.enabled { 1 } else { 0 }
        ));
    }

    out.push_str("# HELP corral_pool_min_idle_runners Configured idle floor.\n");
    out.push_str("# TYPE corral_pool_min_idle_runners gauge\n");
    for p in pools {
        out.push_str(&format!(
            "corral_pool_min_idle_runners{{pool=\"{}\"}} {}\n",
            p.pool_id, p.min_idle_runners
        ));
    }

    out.push_str("# HELP corral_pool_max_runners Configured instance cap.\n");
    out.push_str("# TYPE corral_pool_max_runners gauge\n");
    for p in pools {
        out.push_str(&format!(
            "corral_pool_max_runners{{pool=\"{}\"}} {}\n",
            p.pool_id, p.max_runners
        ));
    }

    out.push_str("# HELP corral_pool_instances Non-terminal instances in the pool.\n");
    out.push_str("# TYPE corral_pool_instances gauge\n");
    for p in pools {
        out.push_str(&format!(
            "corral_pool_instances{{pool=\"{}\"}} {}\n",
            p.pool_id, p.current
        ));
    }

    out.push_str("# HELP corral_pool_idle_instances Instances in running/idle.\n");
    out.push_str("# TYPE corral_pool_idle_instances gauge\n");
    for p in pools {
        out.push_str(&format!(
            "corral_pool_idle_instances{{pool=\"{}\"}} {}\n",
            p.pool_id, p.idle
        ));
    }

    out.push_str("# HELP corral_pool_errored_instances Instances stuck in error.\n");
    out.push_str("# TYPE corral_pool_errored_instances gauge\n");
    for p in pools {
        out.push_str(&format!(
            "corral_pool_errored_instances{{pool=\"{}\"}} {}\n",
            p.pool_id, p.errored
        ));
    }

    out.push_str("# HELP corral_up Controller liveness.\n");
    out.push_str("# TYPE corral_up gauge\n");
    out.push_str("corral_up 1\n");

    out
}
