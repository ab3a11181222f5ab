use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::paths;

/// One managed instance.
///
/// The address and work directory are set together: an instance either has
/// neither (not yet created) or both, with the directory derived from the
/// address under the state root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    pub ram_mb: u32,
    pub cpu_count: u32,
    pub ssh_public_key: String,
    address: Option<Ipv4Addr>,
    work_dir: Option<PathBuf>,
}

impl InstanceSpec {
    /// An instance that has not been provisioned yet.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ram_mb: 512,
            cpu_count: 1,
            ssh_public_key: String::new(),
            address: None,
            work_dir: None,
        }
    }

    /// An instance that already exists under `state_dir` at `address`.
    pub fn existing(name: impl Into<String>, address: Ipv4Addr, state_dir: &Path) -> Self {
        let mut spec = Self::new(name, String::new());
        spec.assign_address(address, state_dir);
        spec
    }

    /// Ask for `address` when this instance is created. The allocator keeps
    /// it if it is free and moves on otherwise.
    pub fn at_address(mut self, address: Ipv4Addr, state_dir: &Path) -> Self {
        self.assign_address(address, state_dir);
        self
    }

    pub fn with_resources(mut self, ram_mb: u32, cpu_count: u32) -> Self {
        self.ram_mb = ram_mb;
        self.cpu_count = cpu_count;
        self
    }

    pub fn with_ssh_public_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_public_key = key.into();
        self
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    pub(crate) fn assign_address(&mut self, address: Ipv4Addr, state_dir: &Path) {
        self.address = Some(address);
        self.work_dir = Some(paths::instance_dir(state_dir, address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_has_no_address_or_dir() {
        let spec = InstanceSpec::new("web", "trusty64");
        assert_eq!(spec.address(), None);
        assert_eq!(spec.work_dir(), None);
    }

    #[test]
    fn existing_instance_derives_dir_from_address() {
        let addr = Ipv4Addr::new(192, 168, 22, 11);
        let spec = InstanceSpec::existing("web", addr, Path::new("/state"));
        assert_eq!(spec.address(), Some(addr));
        assert_eq!(spec.work_dir(), Some(Path::new("/state/192.168.22.11")));
    }
}
