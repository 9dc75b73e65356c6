//! Size and variety catalog
//!
//! Built once at startup and shared by reference. Every component resolves
//! sizes and varieties through this service, so there is exactly one copy of
//! the catalog in a running engine.

use std::collections::{BTreeMap, HashSet};

use shared::{
    allocate, merge_demand, validate_known_varieties, validate_variety_selection, OrderItem,
    SelectionError, SizeConfig, SliceAllocation,
};
use uuid::Uuid;
use validator::Validate;

use crate::config::CatalogConfig;
use crate::error::{AppError, AppResult};
use crate::store::{fetch_all, save, DocumentStore, Query};

#[derive(Debug, Clone)]
pub struct CatalogService {
    sizes: BTreeMap<String, SizeConfig>,
    varieties: Vec<String>,
}

impl CatalogService {
    /// Validate and index a catalog. An empty variety list disables the
    /// known-variety check.
    pub fn new(sizes: Vec<SizeConfig>, varieties: Vec<String>) -> AppResult<Self> {
        let mut seen = HashSet::new();
        for variety in &varieties {
            if !seen.insert(variety.as_str()) {
                return Err(AppError::DuplicateEntry(format!("variety '{}'", variety)));
            }
        }

        let mut indexed = BTreeMap::new();
        for mut size in sizes {
            size.validate()?;
            if size.id.is_nil() {
                size.id = SizeConfig::stable_id(&size.name);
            }
            if !varieties.is_empty() {
                for constrained in size
                    .allowed_varieties
                    .iter()
                    .chain(size.excluded_varieties.iter())
                {
                    validate_known_varieties(&varieties, constrained)?;
                }
            }
            if indexed.contains_key(&size.name) {
                return Err(AppError::DuplicateEntry(format!("size '{}'", size.name)));
            }
            indexed.insert(size.name.clone(), size);
        }

        Ok(Self {
            sizes: indexed,
            varieties,
        })
    }

    pub fn from_config(config: &CatalogConfig) -> AppResult<Self> {
        Self::new(config.sizes.clone(), config.varieties.clone())
    }

    /// Build from the sizes collection; varieties still come from configuration
    pub async fn load(store: &dyn DocumentStore, varieties: Vec<String>) -> AppResult<Self> {
        let sizes = fetch_all::<SizeConfig>(store, &Query::new().order_by("name", false)).await?;
        Self::new(sizes, varieties)
    }

    /// Write every size to the sizes collection. Ids are stable, so seeding
    /// twice leaves one document per size.
    pub async fn seed(&self, store: &dyn DocumentStore) -> AppResult<usize> {
        for size in self.sizes.values() {
            save(store, size).await?;
        }
        tracing::info!(sizes = self.sizes.len(), "Catalog seeded");
        Ok(self.sizes.len())
    }

    pub fn size(&self, name: &str) -> AppResult<&SizeConfig> {
        self.sizes
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("Size '{}'", name)))
    }

    pub fn size_by_id(&self, id: Uuid) -> Option<&SizeConfig> {
        self.sizes.values().find(|s| s.id == id)
    }

    pub fn sizes(&self) -> impl Iterator<Item = &SizeConfig> {
        self.sizes.values()
    }

    pub fn varieties(&self) -> &[String] {
        &self.varieties
    }

    pub fn knows_variety(&self, name: &str) -> bool {
        self.varieties.is_empty() || self.varieties.iter().any(|v| v == name)
    }

    pub fn validate_selection(&self, size: &str, varieties: &[String]) -> AppResult<()> {
        let size = self.size(size)?;
        validate_variety_selection(size, varieties)?;
        if !self.varieties.is_empty() {
            validate_known_varieties(&self.varieties, varieties)?;
        }
        Ok(())
    }

    /// Per-variety slice demand for one order line
    pub fn allocate(&self, size: &str, varieties: &[String], quantity: u32) -> AppResult<SliceAllocation> {
        self.validate_selection(size, varieties)?;
        Ok(allocate(self.size(size)?, varieties, quantity)?)
    }

    /// Summed per-variety demand across every line of an order
    pub fn demand_for(&self, items: &[OrderItem]) -> AppResult<SliceAllocation> {
        let mut demand = SliceAllocation::new();
        for item in items {
            let allocation = self.allocate(&item.size, &item.varieties, item.quantity)?;
            merge_demand(&mut demand, &allocation);
        }
        Ok(demand)
    }

    pub fn require_variety(&self, name: &str) -> AppResult<()> {
        if self.knows_variety(name) {
            Ok(())
        } else {
            Err(SelectionError::UnknownVariety(name.to_string()).into())
        }
    }
}
