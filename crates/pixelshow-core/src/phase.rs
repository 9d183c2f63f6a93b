//! Device identity and phase assignment.
//!
//! Each device draws a phase offset once, uniformly from `[0, PHASE_RANGE)`,
//! and keeps it for its lifetime. Periodic effects shift their clock by this
//! offset, so a crowd of phones running the same wave command lights up in a
//! staggered pattern without any device-to-device clock exchange.

use crate::error::{CoreError, Result};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Phases are drawn from `[0, PHASE_RANGE)`
pub const PHASE_RANGE: u32 = 1000;

/// Persisted identity of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable random token, used as the presence key
    #[serde(rename = "deviceKey")]
    pub device_key: String,
    /// Phase offset in `[0, PHASE_RANGE)`
    pub phase: u32,
}

impl DeviceIdentity {
    /// Draw a fresh identity
    pub fn generate() -> Self {
        let phase = rand::rng().random_range(0..PHASE_RANGE);
        Self {
            device_key: format!("client-{}", uuid::Uuid::new_v4().simple()),
            phase,
        }
    }
}

/// Key-value persistence for a single [`DeviceIdentity`]
pub trait IdentityStore: Send + Sync {
    /// Read the stored identity, `None` if nothing is stored yet
    fn load(&self) -> Result<Option<DeviceIdentity>>;
    /// Persist the identity
    fn save(&self, identity: &DeviceIdentity) -> Result<()>;
    /// Forget the stored identity
    fn clear(&self) -> Result<()>;
}

/// Identity store that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    slot: Mutex<Option<DeviceIdentity>>,
}

impl MemoryIdentityStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with an identity
    pub fn with_identity(identity: DeviceIdentity) -> Self {
        Self {
            slot: Mutex::new(Some(identity)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<DeviceIdentity>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, identity: &DeviceIdentity) -> Result<()> {
        *self.slot.lock() = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

/// Identity store backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    /// Store at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the platform data directory
    pub fn default_location() -> Result<Self> {
        let mut path = dirs::data_dir().ok_or_else(|| {
            CoreError::IdentityStore("no data directory on this platform".to_string())
        })?;
        path.push("PixelShow");
        path.push("device.json");
        Ok(Self { path })
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<DeviceIdentity>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, identity: &DeviceIdentity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(identity)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Hands out the device identity, generating and persisting it on first use
pub struct PhaseAssigner<S: IdentityStore> {
    store: S,
    cached: Option<DeviceIdentity>,
}

impl<S: IdentityStore> PhaseAssigner<S> {
    /// Wrap a store
    pub fn new(store: S) -> Self {
        Self {
            store,
            cached: None,
        }
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The device identity.
    ///
    /// Store failures degrade to an identity kept in memory, which is still
    /// stable for the lifetime of this assigner.
    pub fn identity(&mut self) -> DeviceIdentity {
        if let Some(identity) = &self.cached {
            return identity.clone();
        }

        let identity = match self.store.load() {
            Ok(Some(identity)) if identity.phase < PHASE_RANGE => {
                debug!("Loaded device identity {}", identity.device_key);
                identity
            }
            Ok(loaded) => {
                if loaded.is_some() {
                    warn!("Stored phase out of range, drawing a new identity");
                }
                self.generate_and_save()
            }
            Err(e) => {
                warn!("Failed to load device identity: {}", e);
                self.generate_and_save()
            }
        };

        self.cached = Some(identity.clone());
        identity
    }

    /// The phase offset of this device
    pub fn get_phase(&mut self) -> u32 {
        self.identity().phase
    }

    /// Discard the stored identity and draw a new one
    pub fn reset(&mut self) -> Result<DeviceIdentity> {
        self.store.clear()?;
        self.cached = None;
        Ok(self.identity())
    }

    fn generate_and_save(&self) -> DeviceIdentity {
        let identity = DeviceIdentity::generate();
        info!(
            "Generated device identity {} (phase {})",
            identity.device_key, identity.phase
        );
        if let Err(e) = self.store.save(&identity) {
            warn!("Failed to persist device identity: {}", e);
        }
        identity
    }
}
