//! Typed hardware wiring: endpoints, bindings, and the binding registry.
//!
//! A [`ModuleGraph`] mirrors the bindings it has asked the hardware to
//! make, so occupancy and enablement can be checked before the chip is
//! touched and teardown can walk bindings newest-first.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{MediaError, Result};
use crate::hal::{Hal, HalResultExt};
use crate::media::Codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Sensor,
    /// Video capture front end between sensor and ISP.
    Capture,
    Isp,
    Scaler,
    Encoder,
}

impl ModuleKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::Capture => "capture",
            Self::Isp => "isp",
            Self::Scaler => "scaler",
            Self::Encoder => "encoder",
        }
    }
}

/// One attachment point in the hardware graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleEndpoint {
    pub kind: ModuleKind,
    pub device: u8,
    pub channel: u8,
    pub port: u8,
}

impl ModuleEndpoint {
    pub const fn new(kind: ModuleKind, device: u8, channel: u8, port: u8) -> Self {
        Self {
            kind,
            device,
            channel,
            port,
        }
    }

    /// The channel that owns this endpoint, port ignored.
    pub fn owner(&self) -> ChannelKey {
        ChannelKey {
            kind: self.kind,
            device: self.device,
            channel: self.channel,
        }
    }
}

impl fmt::Display for ModuleEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            self.kind.as_str(),
            self.device,
            self.channel,
            self.port
        )
    }
}

/// Module channel identity, independent of port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub kind: ModuleKind,
    pub device: u8,
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Pass-through, no buffering.
    Realtime,
    /// Through a shared frame pool with bounded depth.
    RingBuffered,
}

impl LinkMode {
    /// Scaler to encoder link for `codec`.
    pub fn from_codec(codec: Codec) -> Self {
        if codec.is_jpeg() {
            Self::Realtime
        } else {
            Self::RingBuffered
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub source: ModuleEndpoint,
    pub dest: ModuleEndpoint,
    pub mode: LinkMode,
    pub fps_in: u32,
    pub fps_out: u32,
}

/// Registry of enabled channels and live bindings over one [`Hal`].
pub struct ModuleGraph {
    hal: Arc<dyn Hal>,
    enabled: HashSet<ChannelKey>,
    /// Creation order; teardown pops from the back.
    bindings: Vec<Binding>,
}

impl ModuleGraph {
    pub fn new(hal: Arc<dyn Hal>) -> Self {
        Self {
            hal,
            enabled: HashSet::new(),
            bindings: Vec::new(),
        }
    }

    /// Record that the channel owning `endpoint` is enabled in hardware.
    pub fn mark_enabled(&mut self, endpoint: ModuleEndpoint) {
        self.enabled.insert(endpoint.owner());
    }

    /// Record that the channel owning `endpoint` is going away.
    ///
    /// Fails with [`MediaError::HardwareBusy`] while any binding still
    /// touches that channel.
    pub fn mark_disabled(&mut self, endpoint: ModuleEndpoint) -> Result<()> {
        let owner = endpoint.owner();
        if let Some(b) = self
            .bindings
            .iter()
            .find(|b| b.source.owner() == owner || b.dest.owner() == owner)
        {
            let held = if b.source.owner() == owner { b.source } else { b.dest };
            return Err(MediaError::HardwareBusy(held));
        }
        self.enabled.remove(&owner);
        Ok(())
    }

    pub fn is_enabled(&self, endpoint: &ModuleEndpoint) -> bool {
        self.enabled.contains(&endpoint.owner())
    }

    pub fn bind(
        &mut self,
        source: ModuleEndpoint,
        dest: ModuleEndpoint,
        fps_in: u32,
        fps_out: u32,
        mode: LinkMode,
    ) -> Result<()> {
        for endpoint in [source, dest] {
            if !self.is_enabled(&endpoint) {
                return Err(MediaError::InvalidEndpoint(endpoint));
            }
        }
        if self.bindings.iter().any(|b| b.source == source) {
            return Err(MediaError::HardwareBusy(source));
        }
        if self.bindings.iter().any(|b| b.dest == dest) {
            return Err(MediaError::HardwareBusy(dest));
        }

        let binding = Binding {
            source,
            dest,
            mode,
            fps_in,
            fps_out,
        };
        self.hal.bind(&binding).or_rejected("sys.bind")?;
        tracing::debug!(%source, %dest, ?mode, fps_in, fps_out, "bound");
        self.bindings.push(binding);
        Ok(())
    }

    /// Remove the binding from `source` to `dest`.
    ///
    /// The binding is forgotten even when the hardware rejects the unbind,
    /// so a retry reports [`MediaError::NotBound`] instead of hitting the
    /// chip again.
    pub fn unbind(&mut self, source: ModuleEndpoint, dest: ModuleEndpoint) -> Result<()> {
        let pos = self
            .bindings
            .iter()
            .position(|b| b.source == source && b.dest == dest)
            .ok_or(MediaError::NotBound {
                from: source,
                to: dest,
            })?;
        self.bindings.remove(pos);
        self.hal.unbind(&source, &dest).or_rejected("sys.unbind")?;
        tracing::debug!(%source, %dest, "unbound");
        Ok(())
    }

    /// Unbind everything, newest first. Every binding is attempted; the
    /// first failure is returned.
    pub fn unbind_all(&mut self) -> Result<()> {
        let mut first = None;
        while let Some(b) = self.bindings.last().copied() {
            if let Err(e) = self.unbind(b.source, b.dest) {
                tracing::warn!(source = %b.source, dest = %b.dest, error = %e, "unbind failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn is_bound(&self, source: &ModuleEndpoint, dest: &ModuleEndpoint) -> bool {
        self.bindings
            .iter()
            .any(|b| b.source == *source && b.dest == *dest)
    }

    /// Live bindings in creation order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn hal(&self) -> &Arc<dyn Hal> {
        &self.hal
    }
}
