//! # Hashwatt Planner
//!
//! Application shell around `hashwatt-core`: loads configuration and a JSON
//! dataset, serves market quotes through a cache, counts work in prometheus
//! metrics and exposes the engine operations to the `hashwatt` CLI.

pub mod config;
pub mod dataset;
pub mod market;
pub mod metrics;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashwatt_core::{
    AvailableRatios, MachineId, MarketQuoteProvider, Objective, OptimizationResult, PowerPoint,
    ProfitabilityService, RatioAnalysis, RatioApplication, RatioEvaluation, RatioKind,
    RatioTarget, SiteAllocationResult, SiteId, SiteStatistics,
};

use crate::config::Config;
use crate::dataset::InMemoryStore;
use crate::market::{CachedQuoteProvider, StaticQuoteSource};

/// Engine service wired to a dataset file
pub struct Planner {
    service: ProfitabilityService,
    store: Arc<InMemoryStore>,
    dataset_path: PathBuf,
}

impl Planner {
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(
            InMemoryStore::load(&config.dataset.path)
                .with_context(|| format!("Failed to load dataset {}", config.dataset.path.display()))?,
        );
        let source = StaticQuoteSource::from_config(&config.market, store.market());
        let quotes = Arc::new(CachedQuoteProvider::from_config(source, &config.market));
        Ok(Self::new(store, quotes, &config.dataset.path))
    }

    pub fn new(store: Arc<InMemoryStore>, quotes: Arc<dyn MarketQuoteProvider>, dataset_path: &Path) -> Self {
        let service = ProfitabilityService::new(
            store.clone(),
            store.clone(),
            quotes,
            store.clone(),
            store.clone(),
            store.clone(),
        );
        Self {
            service,
            store,
            dataset_path: dataset_path.to_path_buf(),
        }
    }

    pub fn service(&self) -> &ProfitabilityService {
        &self.service
    }

    pub fn optimal_ratio(&self, machine: MachineId, objective: Objective) -> Result<OptimizationResult> {
        let result = self.service.get_optimal_ratio(machine, objective)?;
        metrics::inc_optimization(objective.as_str());
        metrics::add_ratio_evaluations(result.evaluations.len());
        Ok(result)
    }

    pub fn ratio_analysis(&self, machine: MachineId) -> Result<RatioAnalysis> {
        let analysis = self.service.get_ratio_analysis(machine)?;
        metrics::add_ratio_evaluations(analysis.evaluations.len());
        Ok(analysis)
    }

    pub fn available_ratios(&self, machine: MachineId) -> Result<AvailableRatios> {
        Ok(self.service.get_available_ratios(machine)?)
    }

    pub fn efficiency_at_ratio(&self, machine: MachineId, ratio: Decimal) -> Result<RatioEvaluation> {
        let evaluation = self.service.get_efficiency_at_ratio(machine, ratio)?;
        metrics::add_ratio_evaluations(1);
        Ok(evaluation)
    }

    pub fn efficiency_at_power(&self, machine: MachineId, watts: Decimal) -> Result<PowerPoint> {
        Ok(self.service.get_efficiency_at_power(machine, watts)?)
    }

    pub fn site_allocation(&self, site: SiteId, objective: Objective) -> Result<SiteAllocationResult> {
        let result = self.service.get_site_allocation(site, objective)?;
        metrics::inc_site_allocations();
        Ok(result)
    }

    pub fn site_statistics(&self, site: SiteId) -> Result<SiteStatistics> {
        Ok(self.service.get_site_statistics(site)?)
    }

    /// Record a ratio and write the dataset back
    pub fn apply_ratio(&self, target: RatioTarget, ratio: Decimal, kind: RatioKind) -> Result<Vec<RatioApplication>> {
        let applied = self.service.apply_ratio(target, ratio, kind)?;
        metrics::add_ratio_applications(kind_label(kind), applied.len());
        self.persist()?;
        Ok(applied)
    }

    /// Record each affected machine's optimum and write the dataset back
    pub fn apply_optimal(&self, target: RatioTarget, objective: Objective) -> Result<Vec<RatioApplication>> {
        let applied = self.service.apply_optimal(target, objective)?;
        metrics::inc_optimization(objective.as_str());
        metrics::add_ratio_applications(kind_label(RatioKind::Optimal), applied.len());
        self.persist()?;
        Ok(applied)
    }

    fn persist(&self) -> Result<()> {
        self.store
            .snapshot()
            .save(&self.dataset_path)
            .with_context(|| format!("Failed to save dataset {}", self.dataset_path.display()))
    }
}

fn kind_label(kind: RatioKind) -> &'static str {
    match kind {
        RatioKind::Manual => "manual",
        RatioKind::Optimal => "optimal",
        RatioKind::Nominal => "nominal",
    }
}
