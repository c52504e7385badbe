//! Prometheus text exposition format.
//!
//! Renders a metrics poll into the Prometheus text exposition format so
//! the control plane's `/metrics` endpoint can be scraped directly.

use std::fmt::Write;

use farm_core::MetricsPoll;

/// Render a metrics poll into Prometheus text format.
///
/// Farm-wide gauges are unlabelled; per-instance gauges carry an
/// `instance` label with the instance id.
pub fn render_prometheus(poll: &MetricsPoll) -> String {
    let r = &poll.report;
    let mut out = String::new();

    gauge(
        &mut out,
        "farm_instances_total",
        "Registered instances polled.",
        r.total_instances as f64,
    );
    gauge(
        &mut out,
        "farm_instances_responding",
        "Instances that answered the poll.",
        r.responding_instances as f64,
    );
    gauge(
        &mut out,
        "farm_instances_healthy",
        "Instances reporting healthy.",
        r.healthy_count as f64,
    );
    gauge(
        &mut out,
        "farm_instances_degraded",
        "Instances reporting degraded.",
        r.degraded_count as f64,
    );
    gauge(&mut out, "farm_cpu_percent_average", "Mean CPU percent over responders.", r.cpu.average);
    gauge(
        &mut out,
        "farm_memory_mb_average",
        "Mean memory MB over responders.",
        r.memory_mb.average,
    );
    gauge(
        &mut out,
        "farm_requests_total",
        "Sum of instance request counters.",
        r.total_requests as f64,
    );

    out.push_str("# HELP farm_instance_cpu_percent CPU percent reported by the instance.\n");
    out.push_str("# TYPE farm_instance_cpu_percent gauge\n");
    for s in &poll.samples {
        let _ = writeln!(
            out,
            "farm_instance_cpu_percent{{instance=\"{}\"}} {:.2}",
            s.instance_id, s.cpu_percent
        );
    }

    out.push_str("# HELP farm_instance_memory_mb Memory in use reported by the instance.\n");
    out.push_str("# TYPE farm_instance_memory_mb gauge\n");
    for s in &poll.samples {
        let _ = writeln!(
            out,
            "farm_instance_memory_mb{{instance=\"{}\"}} {:.2}",
            s.instance_id, s.memory_mb
        );
    }

    out.push_str("# HELP farm_instance_requests_total Request counter reported by the instance.\n");
    out.push_str("# TYPE farm_instance_requests_total counter\n");
    for s in &poll.samples {
        let _ = writeln!(
            out,
            "farm_instance_requests_total{{instance=\"{}\"}} {}",
            s.instance_id, s.request_count
        );
    }

    out
}

fn gauge(out: &mut String, name: &str, help: &str, value: f64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}
