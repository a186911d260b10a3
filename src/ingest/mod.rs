//! Ingest endpoints and the fixed pool of named slots on each of them.
//!
//! A slot carries at most one live stream. Streams that need transcoded
//! output (COMB) may only use slots that support it. Reservation and binding
//! happen under one `&mut self` borrow, so a slot is never handed out twice.

pub mod endpoint;

use std::collections::HashSet;

use chrono::Utc;

use crate::error::{FleetError, Result};

pub use endpoint::{IngestEndpoint, Slot, SlotBinding};

/// A slot bound to a stream, with the URLs derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLease {
    pub endpoint_id: String,
    pub slot: String,
    pub ingest_url: String,
    pub playlist_url: String,
}

#[derive(Debug, Default)]
pub struct IngestSlotAllocator {
    endpoints: Vec<IngestEndpoint>,
}

impl IngestSlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(endpoints: Vec<IngestEndpoint>) -> Result<Self> {
        let mut allocator = Self::new();
        for endpoint in endpoints {
            allocator.add_endpoint(endpoint)?;
        }
        Ok(allocator)
    }

    /// Add an endpoint. Endpoint ids and slot names within an endpoint must be unique.
    pub fn add_endpoint(&mut self, endpoint: IngestEndpoint) -> Result<()> {
        if self.endpoints.iter().any(|e| e.id == endpoint.id) {
            return Err(FleetError::InvalidConfig(format!(
                "duplicate ingest endpoint {}",
                endpoint.id
            )));
        }
        let duplicate = {
            let mut names = HashSet::new();
            endpoint
                .slots
                .iter()
                .find(|s| !names.insert(s.name.as_str()))
                .map(|s| s.name.clone())
        };
        if let Some(dup) = duplicate {
            return Err(FleetError::InvalidConfig(format!(
                "duplicate slot {dup} on endpoint {}",
                endpoint.id
            )));
        }
        tracing::info!(endpoint = %endpoint.id, slots = endpoint.slots.len(), "Ingest endpoint added");
        self.endpoints.push(endpoint);
        Ok(())
    }

    pub fn endpoints(&self) -> &[IngestEndpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, id: &str) -> Result<&IngestEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| FleetError::EndpointNotFound(id.to_string()))
    }

    fn endpoint_mut(&mut self, id: &str) -> Result<&mut IngestEndpoint> {
        self.endpoints
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| FleetError::EndpointNotFound(id.to_string()))
    }

    /// Endpoint with the fewest bound slots; ties go to the first configured.
    pub fn best_endpoint(&self) -> Result<&IngestEndpoint> {
        self.endpoints
            .iter()
            .reduce(|best, e| {
                if e.bound_count() < best.bound_count() {
                    e
                } else {
                    best
                }
            })
            .ok_or(FleetError::NoEndpoint)
    }

    /// First unbound slot on `endpoint_id` whose transcode capability matches.
    pub fn reserve_slot(&self, endpoint_id: &str, needs_transcode: bool) -> Result<&Slot> {
        let endpoint = self.endpoint(endpoint_id)?;
        endpoint
            .slots
            .iter()
            .find(|s| s.is_free() && s.transcoding == needs_transcode)
            .ok_or_else(|| FleetError::NoFreeSlot {
                endpoint: endpoint_id.to_string(),
                needs_transcode,
            })
    }

    pub fn bind(&mut self, endpoint_id: &str, slot: &str, binding: SlotBinding) -> Result<()> {
        let endpoint = self.endpoint_mut(endpoint_id)?;
        let entry = endpoint
            .slots
            .iter_mut()
            .find(|s| s.name == slot)
            .ok_or_else(|| FleetError::EndpointNotFound(format!("{endpoint_id}/{slot}")))?;
        if let Some(current) = entry.bound {
            if current != binding {
                return Err(FleetError::SlotAlreadyBound {
                    endpoint: endpoint_id.to_string(),
                    slot: slot.to_string(),
                });
            }
            return Ok(());
        }
        entry.bound = Some(binding);
        tracing::debug!(
            endpoint = endpoint_id,
            slot,
            stream_id = binding.stream_id,
            version = %binding.version,
            "Slot bound"
        );
        Ok(())
    }

    /// Free a slot. It is allocatable again immediately.
    pub fn release(&mut self, endpoint_id: &str, slot: &str) -> Result<()> {
        let endpoint = self.endpoint_mut(endpoint_id)?;
        let entry = endpoint
            .slots
            .iter_mut()
            .find(|s| s.name == slot)
            .ok_or_else(|| FleetError::EndpointNotFound(format!("{endpoint_id}/{slot}")))?;
        if entry.bound.take().is_some() {
            entry.freed_at = Some(Utc::now());
            tracing::debug!(endpoint = endpoint_id, slot, "Slot released");
        }
        Ok(())
    }

    /// The slot currently carrying `binding`, if any.
    pub fn lease_for(&self, binding: SlotBinding) -> Option<SlotLease> {
        self.endpoints.iter().find_map(|e| {
            e.slots
                .iter()
                .find(|s| s.bound == Some(binding))
                .map(|s| lease(e, s, binding))
        })
    }

    /// Bind a slot for `binding`, or return the one it already holds.
    ///
    /// Endpoints are tried from least to most loaded; the first is
    /// [`best_endpoint`](Self::best_endpoint). Fails with `NoFreeSlot` when no
    /// endpoint has a free slot of the required kind; nothing is bound then.
    pub fn reserve_and_bind(&mut self, binding: SlotBinding) -> Result<SlotLease> {
        if let Some(existing) = self.lease_for(binding) {
            return Ok(existing);
        }

        let best = self.best_endpoint()?.id.clone();
        let needs_transcode = binding.version.needs_transcode();

        let mut order: Vec<(usize, usize)> = self
            .endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| (e.bound_count(), i))
            .collect();
        order.sort();

        for (_, idx) in order {
            let endpoint_id = self.endpoints[idx].id.clone();
            let slot = match self.reserve_slot(&endpoint_id, needs_transcode) {
                Ok(slot) => slot.name.clone(),
                Err(FleetError::NoFreeSlot { .. }) => continue,
                Err(e) => return Err(e),
            };
            self.bind(&endpoint_id, &slot, binding)?;
            let endpoint = &self.endpoints[idx];
            let entry = endpoint
                .slot(&slot)
                .ok_or_else(|| FleetError::Internal(format!("slot {slot} vanished")))?;
            return Ok(lease(endpoint, entry, binding));
        }

        Err(FleetError::NoFreeSlot {
            endpoint: best,
            needs_transcode,
        })
    }

    /// Release whatever slot `binding` holds. Returns whether one was held.
    pub fn release_binding(&mut self, binding: SlotBinding) -> bool {
        let Some(held) = self.lease_for(binding) else {
            return false;
        };
        self.release(&held.endpoint_id, &held.slot).is_ok()
    }
}

fn lease(endpoint: &IngestEndpoint, slot: &Slot, binding: SlotBinding) -> SlotLease {
    SlotLease {
        endpoint_id: endpoint.id.clone(),
        slot: slot.name.clone(),
        ingest_url: endpoint.ingest_url(&slot.name),
        playlist_url: endpoint.playlist_url(&slot.name, binding),
    }
}
