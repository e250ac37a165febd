use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};
use std::sync::OnceLock;

static OPTIMIZATIONS: OnceLock<IntCounterVec> = OnceLock::new();
static RATIO_EVALUATIONS: OnceLock<IntCounter> = OnceLock::new();
static SITE_ALLOCATIONS: OnceLock<IntCounter> = OnceLock::new();
static RATIO_APPLICATIONS: OnceLock<IntCounterVec> = OnceLock::new();

static QUOTE_CACHE_HITS: OnceLock<IntCounter> = OnceLock::new();
static QUOTE_CACHE_MISSES: OnceLock<IntCounter> = OnceLock::new();
static QUOTE_FETCH_ERRORS: OnceLock<IntCounter> = OnceLock::new();

fn optimizations() -> &'static IntCounterVec {
    OPTIMIZATIONS.get_or_init(|| {
        let vec = IntCounterVec::new(
            Opts::new("hashwatt_optimizations_total", "Ratio optimizations run, by objective"),
            &["objective"],
        )
        .unwrap();
        // empty families fail text encoding
        for objective in ["profit", "technical_efficiency", "sats_per_hour"] {
            vec.with_label_values(&[objective]);
        }
        vec
    })
}

fn ratio_evaluations() -> &'static IntCounter {
    RATIO_EVALUATIONS.get_or_init(|| {
        IntCounter::new(
            "hashwatt_ratio_evaluations_total",
            "Grid points scored by the optimizer",
        )
        .unwrap()
    })
}

fn site_allocations() -> &'static IntCounter {
    SITE_ALLOCATIONS.get_or_init(|| {
        IntCounter::new("hashwatt_site_allocations_total", "Site allocations computed").unwrap()
    })
}

fn ratio_applications() -> &'static IntCounterVec {
    RATIO_APPLICATIONS.get_or_init(|| {
        let vec = IntCounterVec::new(
            Opts::new("hashwatt_ratio_applications_total", "Instance ratios recorded, by kind"),
            &["kind"],
        )
        .unwrap();
        for kind in ["manual", "optimal", "nominal"] {
            vec.with_label_values(&[kind]);
        }
        vec
    })
}

fn quote_cache_hits() -> &'static IntCounter {
    QUOTE_CACHE_HITS.get_or_init(|| {
        IntCounter::new("hashwatt_quote_cache_hits_total", "Market quotes served from cache").unwrap()
    })
}

fn quote_cache_misses() -> &'static IntCounter {
    QUOTE_CACHE_MISSES.get_or_init(|| {
        IntCounter::new(
            "hashwatt_quote_cache_misses_total",
            "Market quote lookups that required a fetch",
        )
        .unwrap()
    })
}

fn quote_fetch_errors() -> &'static IntCounter {
    QUOTE_FETCH_ERRORS.get_or_init(|| {
        IntCounter::new("hashwatt_quote_fetch_errors_total", "Failed market quote fetches").unwrap()
    })
}

pub fn inc_optimization(objective: &str) {
    optimizations().with_label_values(&[objective]).inc();
}

pub fn add_ratio_evaluations(count: usize) {
    ratio_evaluations().inc_by(count as u64);
}

pub fn inc_site_allocations() {
    site_allocations().inc();
}

pub fn add_ratio_applications(kind: &str, count: usize) {
    ratio_applications().with_label_values(&[kind]).inc_by(count as u64);
}

pub fn inc_quote_cache_hits() {
    quote_cache_hits().inc();
}

pub fn inc_quote_cache_misses() {
    quote_cache_misses().inc();
}

pub fn inc_quote_fetch_errors() {
    quote_fetch_errors().inc();
}

pub fn render() -> String {
    let enc = TextEncoder::new();
    let mut mfs = Vec::new();

    mfs.extend(optimizations().collect());
    mfs.extend(ratio_evaluations().collect());
    mfs.extend(site_allocations().collect());
    mfs.extend(ratio_applications().collect());
    mfs.extend(quote_cache_hits().collect());
    mfs.extend(quote_cache_misses().collect());
    mfs.extend(quote_fetch_errors().collect());

    let mut buf = Vec::new();
    let _ = enc.encode(&mfs, &mut buf);
    String::from_utf8_lossy(&buf).to_string()
}
