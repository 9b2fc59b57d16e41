//! Active product profile and its hot-swap on product-code changes.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{CameraTable, ProductMode};
use crate::error::{Result, StationError};
use crate::rules::{RuleSet, RuleStore};

/// Product code, its rules, and the cameras a batch needs. Never mutated.
#[derive(Debug, Clone)]
pub struct ProductProfile {
    pub product_code: String,
    pub rules: RuleSet,
    pub required_cameras: Vec<String>,
}

impl ProductProfile {
    /// Derive the required cameras from the rules, dropping cameras that have
    /// no enabled folder configuration.
    pub fn build(product_code: &str, rules: RuleSet, cameras: &CameraTable) -> Self {
        let mut required_cameras = Vec::new();
        for camera in rules.cameras() {
            match cameras.get(&camera) {
                Ok(_) => required_cameras.push(camera),
                Err(e) => warn!("product {}: {}; its rules will not run", product_code, e),
            }
        }
        if required_cameras.is_empty() {
            error!("product {}: no configured camera left, no batch can run", product_code);
        }

        Self {
            product_code: product_code.to_string(),
            rules,
            required_cameras,
        }
    }
}

/// Result of one [`ProfileManager::refresh`].
#[derive(Debug, Clone)]
pub enum ProfileChange {
    Unchanged,
    Swapped {
        previous: Option<String>,
        profile: Arc<ProductProfile>,
    },
    /// The wanted code could not be loaded; the previous profile stays active.
    LoadFailed { wanted: String },
}

pub struct ProfileManager {
    mode: ProductMode,
    static_code: String,
    default_code: String,
    store: Box<dyn RuleStore>,
    cameras: CameraTable,
    active: Option<Arc<ProductProfile>>,
    failed_code: Option<String>,
}

impl ProfileManager {
    pub fn new(
        mode: ProductMode,
        static_code: impl Into<String>,
        default_code: impl Into<String>,
        store: Box<dyn RuleStore>,
        cameras: CameraTable,
    ) -> Self {
        Self {
            mode,
            static_code: static_code.into(),
            default_code: default_code.into(),
            store,
            cameras,
            active: None,
            failed_code: None,
        }
    }

    pub fn mode(&self) -> ProductMode {
        self.mode
    }

    pub fn cameras(&self) -> &CameraTable {
        &self.cameras
    }

    pub fn active(&self) -> Option<&Arc<ProductProfile>> {
        self.active.as_ref()
    }

    pub fn active_code(&self) -> Option<&str> {
        self.active.as_ref().map(|p| p.product_code.as_str())
    }

    /// The product code that should be active: the live feed's latest value
    /// (or the default until one arrives) in live mode, the configured code otherwise.
    pub fn wanted_code(&self, live_code: Option<&str>) -> String {
        match self.mode {
            ProductMode::Static => self.static_code.clone(),
            ProductMode::Live => live_code
                .filter(|code| !code.is_empty())
                .unwrap_or(&self.default_code)
                .to_string(),
        }
    }

    fn load(&self, product_code: &str) -> Result<Arc<ProductProfile>> {
        let rules = self.store.load(product_code)?;
        Ok(Arc::new(ProductProfile::build(product_code, rules, &self.cameras)))
    }

    /// Load the initial profile. Failing here is fatal for the station.
    pub fn initialize(&mut self, live_code: Option<&str>) -> Result<Arc<ProductProfile>> {
        let code = self.wanted_code(live_code);
        let profile = self.load(&code).map_err(|e| match e {
            StationError::Config { path, message } => StationError::Config {
                path,
                message: format!("product {}: {}", code, message),
            },
            other => other,
        })?;
        info!(
            "product {} active: {} rules, cameras {:?} ({})",
            code,
            profile.rules.len(),
            profile.required_cameras,
            self.store.describe(&code)
        );
        self.active = Some(profile.clone());
        self.failed_code = None;
        Ok(profile)
    }

    /// Swap profiles when the wanted code differs from the active one.
    ///
    /// On a load failure the previous profile stays active and the load is
    /// retried on later calls; the failure is logged once per code.
    pub fn refresh(&mut self, live_code: Option<&str>) -> ProfileChange {
        let wanted = self.wanted_code(live_code);
        if self.active_code() == Some(wanted.as_str()) {
            self.failed_code = None;
            return ProfileChange::Unchanged;
        }

        let first_attempt = self.failed_code.as_deref() != Some(wanted.as_str());
        if first_attempt {
            info!(
                "product change: {} -> {}",
                self.active_code().unwrap_or("<none>"),
                wanted
            );
        }

        match self.load(&wanted) {
            Ok(profile) => {
                info!(
                    "product {} loaded from {}: cameras {:?}",
                    wanted,
                    self.store.describe(&wanted),
                    profile.required_cameras
                );
                let previous = self.active.replace(profile.clone()).map(|p| p.product_code.clone());
                self.failed_code = None;
                ProfileChange::Swapped { previous, profile }
            }
            Err(e) => {
                if first_attempt {
                    error!(
                        "cannot load product {}: {}; keeping {}",
                        wanted,
                        e,
                        self.active_code().unwrap_or("<none>")
                    );
                } else {
                    debug!("product {} still unavailable: {}", wanted, e);
                }
                self.failed_code = Some(wanted.clone());
                ProfileChange::LoadFailed { wanted }
            }
        }
    }
}
