use tracing::{debug, warn};

use crate::compute::{ComputeApi, Disk, Instance, Location};
use crate::error::ClaimError;

/// First instance that exposes `device_name`. The control plane allows a
/// single holder, so later matches are only reported, never acted upon.
pub fn find_holder<'a>(instances: &'a [Instance], device_name: &str) -> Option<&'a Instance> {
    let mut holders = instances.iter().filter(|i| i.has_device(device_name));
    let first = holders.next()?;

    let extra: Vec<&str> = holders.map(|i| i.name.as_str()).collect();
    if !extra.is_empty() {
        warn!(
            "Disk {} reported on several instances; using {} and ignoring {:?}",
            device_name, first.name, extra
        );
    }

    Some(first)
}

/// Read-only queries about where a disk currently lives.
pub struct DiskLocator<'a, C: ComputeApi + ?Sized> {
    compute: &'a C,
    location: &'a Location,
}

impl<'a, C: ComputeApi + ?Sized> DiskLocator<'a, C> {
    pub fn new(compute: &'a C, location: &'a Location) -> Self {
        Self { compute, location }
    }

    pub async fn ensure_exists(&self, disk: &str) -> Result<Disk, ClaimError> {
        self.compute.get_disk(self.location, disk).await
    }

    /// Name of the instance the disk is attached to, if any.
    pub async fn current_holder(&self, disk: &str) -> Result<Option<String>, ClaimError> {
        let instances = self.compute.list_instances(self.location).await?;
        debug!("Scanned {} instance(s) in {}", instances.len(), self.location);

        Ok(find_holder(&instances, disk).map(|i| i.name.clone()))
    }
}
