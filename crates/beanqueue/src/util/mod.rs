mod metrics;

pub(crate) use self::metrics::MetricSpan;
