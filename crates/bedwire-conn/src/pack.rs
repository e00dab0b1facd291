//! The resource pack container, treated as an opaque blob.

use std::fmt;

/// A resource pack held by a connection: a byte-addressable blob with a
/// stable UUID, a version, and classifiers for behaviours and scripts.
///
/// Servers construct packs up front and serve them in 512 kB chunks;
/// clients reassemble downloaded chunks into new packs. The container
/// format itself is never interpreted here.
pub struct ResourcePack {
    uuid: String,
    version: String,
    content: Vec<u8>,
    behaviours: bool,
    scripts: bool,
}

impl ResourcePack {
    /// Creates a pack from its metadata and raw content.
    pub fn new(
        uuid: impl Into<String>,
        version: impl Into<String>,
        content: Vec<u8>,
        behaviours: bool,
        scripts: bool,
    ) -> Self {
        Self { uuid: uuid.into(), version: version.into(), content, behaviours, scripts }
    }

    /// The stable identifier of the pack, shared across versions.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The version string of the pack.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Returns true for a pack without content.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Whether the pack ships behaviours, putting it on the behaviour pack
    /// lists of info and stack packets.
    pub fn has_behaviours(&self) -> bool {
        self.behaviours
    }

    /// Whether the pack ships scripts.
    pub fn has_scripts(&self) -> bool {
        self.scripts
    }

    /// The raw pack content.
    pub fn contents(&self) -> &[u8] {
        &self.content
    }

    /// Copies pack content at `offset` into `buf`, returning how many bytes
    /// were available. A short return means the end of the pack.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> usize {
        let start = (offset as usize).min(self.content.len());
        let end = (start + buf.len()).min(self.content.len());
        buf[..end - start].copy_from_slice(&self.content[start..end]);
        end - start
    }
}

impl fmt::Debug for ResourcePack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePack")
            .field("uuid", &self.uuid)
            .field("version", &self.version)
            .field("len", &self.content.len())
            .field("behaviours", &self.behaviours)
            .field("scripts", &self.scripts)
            .finish()
    }
}
