//! Resolving symbolic image names against the provisioning tool.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::VagabondError;
use crate::output::{OutputMultiplexer, Palette};
use crate::process::{Launch, Runner};

/// Record type that marks an image entry in `box list --machine-readable`.
const BOX_NAME_MARKER: &str = "box-name";

const BUNDLED_IMAGES: &[(&str, &str)] = &[
    (
        "trusty64",
        "https://cloud-images.ubuntu.com/vagrant/trusty/current/trusty-server-cloudimg-amd64-vagrant-disk1.box",
    ),
    (
        "precise64",
        "https://cloud-images.ubuntu.com/vagrant/precise/current/precise-server-cloudimg-amd64-vagrant-disk1.box",
    ),
];

/// Image names the tool can use without a download.
pub type KnownImageSet = BTreeSet<String>;

/// Symbolic image name → download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCatalog {
    urls: BTreeMap<String, String>,
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self {
            urls: BUNDLED_IMAGES
                .iter()
                .map(|(name, url)| (name.to_string(), url.to_string()))
                .collect(),
        }
    }
}

impl ImageCatalog {
    /// Built-in images with `extra` entries layered on top.
    pub fn with_extra(extra: &BTreeMap<String, String>) -> Self {
        let mut catalog = Self::default();
        catalog
            .urls
            .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        catalog
    }

    pub fn url(&self, name: &str) -> Option<&str> {
        self.urls.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.urls.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Outcome of [`ImageRegistry::ensure_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Present,
    Fetched,
}

/// Split comma-separated records, one per non-blank line.
///
/// Quoting and escaped commas are not understood; a field containing a comma
/// is split like any other.
pub fn parse_records(text: &str) -> Vec<Vec<&str>> {
    text.lines()
        .map(str::trim)
        .filter(|row| !row.is_empty())
        .map(|row| row.split(',').collect())
        .collect()
}

/// Image names from machine-readable listing output. Rows that are not
/// `box-name` records are skipped.
pub fn parse_known_images(listing: &str) -> KnownImageSet {
    parse_records(listing)
        .into_iter()
        .filter(|row| row.get(2) == Some(&BOX_NAME_MARKER))
        .filter_map(|row| row.get(3).map(|name| name.to_string()))
        .filter(|name| !name.is_empty())
        .collect()
}

pub struct ImageRegistry {
    tool: String,
    catalog: ImageCatalog,
    runner: Arc<dyn Runner>,
    output: Arc<OutputMultiplexer>,
    palette: Arc<Palette>,
}

impl ImageRegistry {
    pub fn new(
        tool: impl Into<String>,
        catalog: ImageCatalog,
        runner: Arc<dyn Runner>,
        output: Arc<OutputMultiplexer>,
        palette: Arc<Palette>,
    ) -> Self {
        Self {
            tool: tool.into(),
            catalog,
            runner,
            output,
            palette,
        }
    }

    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    /// Ask the tool which images it already has.
    pub async fn known_images(&self) -> Result<KnownImageSet, VagabondError> {
        let launch = Launch::new(&self.tool).args(["box", "list", "--machine-readable"]);
        let listing = self.runner.spawn(&launch)?.capture().await?;
        let images = parse_known_images(&listing);
        tracing::debug!(count = images.len(), "queried known images");
        Ok(images)
    }

    /// Make sure `name` is available to the tool, importing it from the
    /// catalog if needed. Import output is shown under `label`.
    ///
    /// An image that is neither known nor in the catalog is
    /// [`VagabondError::UnknownImage`].
    pub async fn ensure_image(
        &self,
        name: &str,
        known: &KnownImageSet,
        label: &str,
    ) -> Result<ImageStatus, VagabondError> {
        if known.contains(name) {
            tracing::info!(image = name, "image found");
            return Ok(ImageStatus::Present);
        }

        let Some(url) = self.catalog.url(name) else {
            return Err(VagabondError::UnknownImage {
                name: name.to_string(),
            });
        };

        tracing::info!(image = name, url, "importing image");
        let slot = self.palette.next_slot();
        let launch = Launch::new(&self.tool).args(["box", "add", "--name", name, url]);
        let handle = self.runner.spawn(&launch)?;
        self.output.attach(handle, label, slot).await?;
        Ok(ImageStatus::Fetched)
    }
}
