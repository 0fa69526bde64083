//! The contact and device registry.
//!
//! Contacts and devices are managed by an external source (forms, pairing
//! flows); the engine only mirrors what it is told and inspects roles, device
//! kinds and connection states to decide whether escalation is meaningful and
//! whether a heart rate can be trusted.

use crate::common::{ContactId, DeviceId};
use crate::model::{ConnectionState, Contact, ContactRole, Device};
use slotmap::SlotMap;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    contacts: SlotMap<ContactId, Contact>,
    devices: SlotMap<DeviceId, Device>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from separately persisted halves.
    pub fn from_parts(
        contacts: SlotMap<ContactId, Contact>,
        devices: SlotMap<DeviceId, Device>,
    ) -> Self {
        Self { contacts, devices }
    }

    pub fn add_contact(&mut self, contact: Contact) -> ContactId {
        self.contacts.insert(contact)
    }

    /// Returns the removed contact, if the handle was still live.
    pub fn remove_contact(&mut self, id: ContactId) -> Option<Contact> {
        self.contacts.remove(id)
    }

    /// Replaces a contact in place, returning the previous entry.
    pub fn update_contact(&mut self, id: ContactId, contact: Contact) -> Option<Contact> {
        self.contacts
            .get_mut(id)
            .map(|slot| std::mem::replace(slot, contact))
    }

    pub fn add_device(&mut self, device: Device) -> DeviceId {
        self.devices.insert(device)
    }

    pub fn remove_device(&mut self, id: DeviceId) -> Option<Device> {
        self.devices.remove(id)
    }

    /// Updates a device's connection state. Returns `false` for a stale handle.
    pub fn set_connection(&mut self, id: DeviceId, state: ConnectionState) -> bool {
        match self.devices.get_mut(id) {
            Some(device) => {
                device.connection = state;
                true
            }
            None => false,
        }
    }

    pub fn contacts(&self) -> impl Iterator<Item = (ContactId, &Contact)> {
        self.contacts.iter()
    }

    pub fn devices(&self) -> impl Iterator<Item = (DeviceId, &Device)> {
        self.devices.iter()
    }

    pub fn contact_map(&self) -> &SlotMap<ContactId, Contact> {
        &self.contacts
    }

    pub fn device_map(&self) -> &SlotMap<DeviceId, Device> {
        &self.devices
    }

    pub fn has_role(&self, role: ContactRole) -> bool {
        self.contacts.values().any(|c| c.role == role)
    }

    pub fn has_connected_watch(&self) -> bool {
        self.devices.values().any(Device::is_connected_watch)
    }
}
