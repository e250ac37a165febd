//! JSON dataset and the in-memory store built from it
//!
//! The dataset carries the machine catalog with its measured curves, the
//! sites with their deployed instances, and tariffs. [`InMemoryStore`]
//! serves it through the engine's provider traits and keeps applied ratios
//! behind a lock so they can be written back.

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use hashwatt_core::{
    AppliedRatio, CurveStore, EfficiencyCurve, ElectricityTariff, EngineError, InstanceId,
    MachineCatalog, MachineId, MachineInstance, MachineSpec, MarketQuote, RatioStore, Site,
    SiteDirectory, SiteId, TariffProvider,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub machines: Vec<MachineRecord>,
    #[serde(default)]
    pub sites: Vec<SiteRecord>,
    #[serde(default)]
    pub default_tariff: ElectricityTariff,
    /// Last known market snapshot, used when no quote is configured
    #[serde(default)]
    pub market: Option<MarketQuote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    #[serde(flatten)]
    pub spec: MachineSpec,
    #[serde(default)]
    pub curve: Option<EfficiencyCurve>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: SiteId,
    pub name: String,
    /// Overrides the default tariff for this site
    #[serde(default)]
    pub tariff: Option<ElectricityTariff>,
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub machine_id: MachineId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub applied: Option<AppliedRatio>,
}

fn default_quantity() -> u32 {
    1
}

impl Dataset {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset {}", path.display()))?;
        let dataset: Dataset = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse dataset JSON {}", path.display()))?;
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize dataset")?;
        fs::write(path.as_ref(), json).context("Failed to write dataset")?;
        Ok(())
    }

    /// Ids are unique and every instance points at a known machine
    pub fn validate(&self) -> Result<()> {
        let mut machine_ids = HashSet::new();
        for m in &self.machines {
            if !machine_ids.insert(m.spec.id) {
                bail!("Duplicate machine id {}", m.spec.id);
            }
        }

        let mut site_ids = HashSet::new();
        let mut instance_ids = HashSet::new();
        for site in &self.sites {
            if !site_ids.insert(site.id) {
                bail!("Duplicate site id {}", site.id);
            }
            for instance in &site.instances {
                if !instance_ids.insert(instance.id) {
                    bail!("Duplicate instance id {}", instance.id);
                }
                if !machine_ids.contains(&instance.machine_id) {
                    bail!(
                        "Instance {} on site {} references unknown machine {}",
                        instance.id,
                        site.id,
                        instance.machine_id
                    );
                }
            }
        }

        self.default_tariff.rates().context("Invalid default tariff")?;
        for site in &self.sites {
            if let Some(tariff) = &site.tariff {
                tariff
                    .rates()
                    .with_context(|| format!("Invalid tariff for site {}", site.id))?;
            }
        }
        Ok(())
    }
}

pub struct InMemoryStore {
    machines: HashMap<MachineId, MachineSpec>,
    curves: HashMap<MachineId, EfficiencyCurve>,
    sites: BTreeMap<SiteId, Site>,
    site_tariffs: HashMap<SiteId, ElectricityTariff>,
    default_tariff: ElectricityTariff,
    market: Option<MarketQuote>,
    /// instance -> owning site
    owners: HashMap<InstanceId, SiteId>,
    applied: RwLock<HashMap<InstanceId, AppliedRatio>>,
}

impl InMemoryStore {
    pub fn from_dataset(dataset: Dataset) -> Result<Self> {
        dataset.validate()?;

        let mut machines = HashMap::new();
        let mut curves = HashMap::new();
        for record in dataset.machines {
            if let Some(curve) = record.curve {
                curves.insert(record.spec.id, curve);
            }
            machines.insert(record.spec.id, record.spec);
        }

        let mut sites = BTreeMap::new();
        let mut site_tariffs = HashMap::new();
        let mut owners = HashMap::new();
        let mut applied = HashMap::new();
        for record in dataset.sites {
            if let Some(tariff) = record.tariff {
                site_tariffs.insert(record.id, tariff);
            }
            let instances = record
                .instances
                .into_iter()
                .map(|i| {
                    owners.insert(i.id, record.id);
                    if let Some(a) = &i.applied {
                        applied.insert(i.id, a.clone());
                    }
                    MachineInstance {
                        id: i.id,
                        site_id: record.id,
                        machine_id: i.machine_id,
                        quantity: i.quantity,
                        custom_name: i.custom_name,
                        applied: None,
                    }
                })
                .collect();
            sites.insert(
                record.id,
                Site {
                    id: record.id,
                    name: record.name,
                    instances,
                },
            );
        }

        info!(
            "Loaded dataset: {} machines ({} with curves), {} sites",
            machines.len(),
            curves.len(),
            sites.len()
        );

        Ok(Self {
            machines,
            curves,
            sites,
            site_tariffs,
            default_tariff: dataset.default_tariff,
            market: dataset.market,
            owners,
            applied: RwLock::new(applied),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_dataset(Dataset::from_file(path)?)
    }

    pub fn market(&self) -> Option<&MarketQuote> {
        self.market.as_ref()
    }

    /// Current state, applied ratios included, in dataset form
    pub fn snapshot(&self) -> Dataset {
        let applied = self.applied.read();

        let mut machines: Vec<MachineRecord> = self
            .machines
            .values()
            .map(|spec| MachineRecord {
                spec: spec.clone(),
                curve: self.curves.get(&spec.id).cloned(),
            })
            .collect();
        machines.sort_by_key(|m| m.spec.id);

        let sites = self
            .sites
            .values()
            .map(|site| SiteRecord {
                id: site.id,
                name: site.name.clone(),
                tariff: self.site_tariffs.get(&site.id).cloned(),
                instances: site
                    .instances
                    .iter()
                    .map(|i| InstanceRecord {
                        id: i.id,
                        machine_id: i.machine_id,
                        quantity: i.quantity,
                        custom_name: i.custom_name.clone(),
                        applied: applied.get(&i.id).cloned(),
                    })
                    .collect(),
            })
            .collect();

        Dataset {
            machines,
            sites,
            default_tariff: self.default_tariff.clone(),
            market: self.market.clone(),
        }
    }

    fn with_applied(&self, mut instance: MachineInstance) -> MachineInstance {
        instance.applied = self.applied.read().get(&instance.id).cloned();
        instance
    }
}

impl MachineCatalog for InMemoryStore {
    fn machine(&self, id: MachineId) -> Option<MachineSpec> {
        self.machines.get(&id).cloned()
    }
}

impl CurveStore for InMemoryStore {
    fn curve(&self, machine: MachineId) -> Option<EfficiencyCurve> {
        self.curves.get(&machine).cloned()
    }
}

impl TariffProvider for InMemoryStore {
    fn default_tariff(&self) -> ElectricityTariff {
        self.default_tariff.clone()
    }

    fn site_tariff(&self, site: SiteId) -> Option<ElectricityTariff> {
        self.site_tariffs.get(&site).cloned()
    }
}

impl SiteDirectory for InMemoryStore {
    fn site(&self, id: SiteId) -> Option<Site> {
        let mut site = self.sites.get(&id)?.clone();
        site.instances = site
            .instances
            .into_iter()
            .map(|i| self.with_applied(i))
            .collect();
        Some(site)
    }

    fn instance(&self, id: InstanceId) -> Option<MachineInstance> {
        let site = self.owners.get(&id)?;
        self.sites
            .get(site)?
            .instances
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .map(|i| self.with_applied(i))
    }
}

impl RatioStore for InMemoryStore {
    fn record_ratios(&self, batch: &[(InstanceId, AppliedRatio)]) -> hashwatt_core::Result<()> {
        if let Some((unknown, _)) = batch.iter().find(|(id, _)| !self.owners.contains_key(id)) {
            return Err(EngineError::InstanceNotFound(*unknown));
        }

        let mut applied = self.applied.write();
        for (instance, ratio) in batch {
            debug!("Instance {} -> ratio {} ({:?})", instance, ratio.ratio, ratio.kind);
            applied.insert(*instance, ratio.clone());
        }
        Ok(())
    }
}
