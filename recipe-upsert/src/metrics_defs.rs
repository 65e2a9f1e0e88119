use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "requests",
    metric_type: MetricType::Counter,
    description: "Upsert requests handled. Tagged with outcome (ok or the error code).",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with outcome.",
};

pub const RECIPES_UPSERTED: MetricDef = MetricDef {
    name: "recipes.upserted",
    metric_type: MetricType::Counter,
    description: "Recipes merged into a committed collection",
};

pub const RECIPES_SKIPPED: MetricDef = MetricDef {
    name: "recipes.skipped",
    metric_type: MetricType::Counter,
    description: "Recipe inputs dropped because they had no usable name",
};

pub const STORE_FETCH_DURATION: MetricDef = MetricDef {
    name: "store.fetch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch the recipe document in seconds. Tagged with store.",
};

pub const STORE_COMMIT_DURATION: MetricDef = MetricDef {
    name: "store.commit.duration",
    metric_type: MetricType::Histogram,
    description: "Time to commit the recipe document in seconds. Tagged with store.",
};

/// Every metric this crate emits, for catalogue checks.
pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    REQUEST_DURATION,
    RECIPES_UPSERTED,
    RECIPES_SKIPPED,
    STORE_FETCH_DURATION,
    STORE_COMMIT_DURATION,
];
