//! Create, start, stop and destroy for a single instance.
//!
//! Each operation is a short linear state machine. A step runs only after the
//! previous one succeeded; the first error ends the operation. Completed steps
//! are never rolled back, so an image imported before a failed provision is
//! reused on the next attempt.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::address::{self, AddressLedger, FIRST_ADDRESS};
use crate::error::VagabondError;
use crate::image::{ImageCatalog, ImageRegistry, KnownImageSet};
use crate::instance::InstanceSpec;
use crate::output::{OutputMultiplexer, Palette};
use crate::process::{Launch, Runner};

/// Script run when no custom provisioning script is configured. Receives the
/// instance parameters through `VM_*` variables.
pub const BUNDLED_PROVISION_SCRIPT: &str = include_str!("../scripts/provision.sh");

/// How the provisioning step is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionScript {
    Bundled,
    File(PathBuf),
}

impl ProvisionScript {
    fn launch(&self) -> Launch {
        match self {
            ProvisionScript::Bundled => {
                Launch::new("bash").args(["-c", BUNDLED_PROVISION_SCRIPT, "vagabond-provision"])
            }
            ProvisionScript::File(path) => {
                Launch::new("bash").args([path.to_string_lossy().into_owned()])
            }
        }
    }
}

// ── State machines ──────────────────────────────────────────────────

/// Steps of the create operation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    ResolveImage,
    AllocateAddress,
    Provision,
    Done,
}

impl CreateStep {
    /// The step that follows a successful `self`.
    pub fn next(self) -> CreateStep {
        match self {
            CreateStep::ResolveImage => CreateStep::AllocateAddress,
            CreateStep::AllocateAddress => CreateStep::Provision,
            CreateStep::Provision | CreateStep::Done => CreateStep::Done,
        }
    }
}

/// Single-step operations on an existing instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceAction {
    Start,
    Stop,
    Destroy,
}

impl InstanceAction {
    pub fn tool_args(self) -> &'static [&'static str] {
        match self {
            InstanceAction::Start => &["up"],
            InstanceAction::Stop => &["halt"],
            InstanceAction::Destroy => &["destroy", "-f"],
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            InstanceAction::Start => "started",
            InstanceAction::Stop => "stopped",
            InstanceAction::Destroy => "destroyed",
        }
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

pub struct Lifecycle {
    tool: String,
    state_dir: PathBuf,
    provision: ProvisionScript,
    images: ImageRegistry,
    runner: Arc<dyn Runner>,
    output: Arc<OutputMultiplexer>,
    palette: Arc<Palette>,
}

impl Lifecycle {
    pub fn new(
        tool: impl Into<String>,
        state_dir: impl Into<PathBuf>,
        provision: ProvisionScript,
        catalog: ImageCatalog,
        runner: Arc<dyn Runner>,
        output: Arc<OutputMultiplexer>,
        palette: Arc<Palette>,
    ) -> Self {
        let tool = tool.into();
        let images = ImageRegistry::new(
            tool.clone(),
            catalog,
            runner.clone(),
            output.clone(),
            palette.clone(),
        );
        Self {
            tool,
            state_dir: state_dir.into(),
            provision,
            images,
            runner,
            output,
            palette,
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn images(&self) -> &ImageRegistry {
        &self.images
    }

    /// Resolve the image, allocate an address and run the provisioning
    /// script. On success `spec` carries its address and work directory.
    ///
    /// An address already set on `spec` is used as the allocation candidate.
    pub async fn create(&self, spec: &mut InstanceSpec) -> Result<(), VagabondError> {
        let mut step = CreateStep::ResolveImage;

        loop {
            tracing::debug!(instance = %spec.name, ?step, "create");
            match step {
                CreateStep::ResolveImage => {
                    let known: KnownImageSet = self.images.known_images().await?;
                    self.images.ensure_image(&spec.image, &known, &spec.name).await?;
                }
                CreateStep::AllocateAddress => {
                    let address = self.allocate(spec.address().unwrap_or(FIRST_ADDRESS))?;
                    spec.assign_address(address, &self.state_dir);
                }
                CreateStep::Provision => {
                    self.provision(spec).await?;
                }
                CreateStep::Done => return Ok(()),
            }
            step = step.next();
        }
    }

    /// Bring an existing instance up.
    pub async fn start(&self, spec: &InstanceSpec) -> Result<(), VagabondError> {
        self.run_action(spec, InstanceAction::Start).await
    }

    /// Halt an existing instance.
    pub async fn stop(&self, spec: &InstanceSpec) -> Result<(), VagabondError> {
        self.run_action(spec, InstanceAction::Stop).await
    }

    /// Force-destroy an instance, then remove its work directory.
    ///
    /// Removal is best effort: a directory that is already gone is fine, and
    /// any other removal failure is only logged.
    pub async fn destroy(&self, spec: &InstanceSpec) -> Result<(), VagabondError> {
        self.run_action(spec, InstanceAction::Destroy).await?;

        let dir = require_work_dir(spec)?;
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "could not remove instance directory");
            }
        }
        Ok(())
    }

    pub async fn run_action(
        &self,
        spec: &InstanceSpec,
        action: InstanceAction,
    ) -> Result<(), VagabondError> {
        let dir = require_work_dir(spec)?;
        let slot = self.palette.next_slot();
        let launch = Launch::new(&self.tool)
            .args(action.tool_args().iter().copied())
            .working_dir(dir);

        let handle = self.runner.spawn(&launch)?;
        self.output.attach(handle, &spec.name, slot).await?;
        tracing::info!(instance = %spec.name, "{}", action.verb());
        Ok(())
    }

    fn allocate(&self, candidate: Ipv4Addr) -> Result<Ipv4Addr, VagabondError> {
        let ledger = AddressLedger::snapshot(&self.state_dir)?;
        let address = address::next_available_address(candidate, &ledger)?;
        tracing::info!(address = %address, "using address");
        Ok(address)
    }

    async fn provision(&self, spec: &InstanceSpec) -> Result<(), VagabondError> {
        let (Some(address), Some(dir)) = (spec.address(), spec.work_dir()) else {
            return Err(VagabondError::Validation {
                message: format!("instance '{}' has no address to provision", spec.name),
            });
        };

        let slot = self.palette.next_slot();
        let launch = self
            .provision
            .launch()
            .env("VM_BOX", &spec.image)
            .env("VM_IP", address.to_string())
            .env("VM_RAM", spec.ram_mb.to_string())
            .env("VM_CPUS", spec.cpu_count.to_string())
            .env("VM_PUB_KEY", &spec.ssh_public_key)
            .env("VM_DIR", dir.to_string_lossy())
            .env("VM_TOOL", &self.tool);

        let handle = self.runner.spawn(&launch)?;
        self.output.attach(handle, &spec.name, slot).await
    }
}

fn require_work_dir(spec: &InstanceSpec) -> Result<&Path, VagabondError> {
    spec.work_dir().ok_or_else(|| VagabondError::Validation {
        message: format!("instance '{}' has no address", spec.name),
    })
}
