use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, SlotKey};

#[derive(Debug, Clone, Copy)]
struct Hold {
    appointment_id: Uuid,
    /// False while the owning write is still in flight.
    committed: bool,
}

/// Index of occupied slots, keyed by (provider, date, start).
///
/// Insert-if-absent runs under the shard lock of the key, so callers racing for the
/// same slot serialize while unrelated slots never contend.
#[derive(Debug, Default)]
pub struct SlotRegistry {
    slots: DashMap<SlotKey, Hold>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` to `appointment_id` if the slot is free. Re-reserving for the same
    /// appointment is a no-op. New bindings start uncommitted.
    pub fn try_reserve(&self, key: SlotKey, appointment_id: Uuid) -> Result<(), AppointmentError> {
        self.bind(key, appointment_id, false)
    }

    fn bind(&self, key: SlotKey, appointment_id: Uuid, committed: bool) -> Result<(), AppointmentError> {
        match self.slots.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(Hold { appointment_id, committed });
                debug!("Reserved slot {} for appointment {}", key, appointment_id);
                Ok(())
            }
            Entry::Occupied(entry) if entry.get().appointment_id == appointment_id => Ok(()),
            Entry::Occupied(entry) => {
                debug!("Slot {} already held by appointment {}", key, entry.get().appointment_id);
                Err(AppointmentError::SlotUnavailable(key))
            }
        }
    }

    /// Like `try_reserve`, but the binding is undone when the guard drops uncommitted.
    pub fn reserve(self: &Arc<Self>, key: SlotKey, appointment_id: Uuid) -> Result<Reservation, AppointmentError> {
        if self.holder(key) == Some(appointment_id) {
            // Already ours; a guard must not undo a binding it did not create.
            return Ok(Reservation::held(Arc::clone(self), key, appointment_id));
        }

        self.try_reserve(key, appointment_id)?;
        Ok(Reservation {
            registry: Arc::clone(self),
            key,
            appointment_id,
            armed: true,
        })
    }

    /// Marks the binding as backed by a stored appointment.
    pub fn commit(&self, key: SlotKey, appointment_id: Uuid) {
        if let Some(mut hold) = self.slots.get_mut(&key) {
            if hold.appointment_id == appointment_id {
                hold.committed = true;
            }
        }
    }

    /// Idempotent.
    pub fn release(&self, key: SlotKey) {
        if self.slots.remove(&key).is_some() {
            debug!("Released slot {}", key);
        }
    }

    /// Releases `key` only while it is still bound to `appointment_id`.
    pub fn release_for(&self, key: SlotKey, appointment_id: Uuid) -> bool {
        let released = self
            .slots
            .remove_if(&key, |_, hold| hold.appointment_id == appointment_id)
            .is_some();

        if released {
            debug!("Released slot {} held by appointment {}", key, appointment_id);
        }
        released
    }

    /// Hint only; a later `try_reserve` may still fail.
    pub fn is_available(&self, key: SlotKey) -> bool {
        !self.slots.contains_key(&key)
    }

    pub fn holder(&self, key: SlotKey) -> Option<Uuid> {
        self.slots.get(&key).map(|entry| entry.appointment_id)
    }

    /// The holder of `key` if its write has completed. Pending holders belong to an
    /// operation still running in this process and are never second-guessed.
    pub fn committed_holder(&self, key: SlotKey) -> Option<Uuid> {
        self.slots
            .get(&key)
            .filter(|entry| entry.committed)
            .map(|entry| entry.appointment_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Replaces the index with the slots held by the given appointments.
    pub fn rebuild<'a>(&self, appointments: impl IntoIterator<Item = &'a Appointment>) -> usize {
        self.slots.clear();

        for appointment in appointments {
            if !appointment.status.is_active() {
                continue;
            }
            if let Err(e) = self.bind(appointment.slot_key(), appointment.id, true) {
                warn!("Store holds two active appointments for one slot, keeping the first: {}", e);
            }
        }

        info!("Slot registry rebuilt with {} reservations", self.slots.len());
        self.slots.len()
    }
}

/// A pending reservation. Dropping it without `commit` releases the slot.
#[derive(Debug)]
pub struct Reservation {
    registry: Arc<SlotRegistry>,
    key: SlotKey,
    appointment_id: Uuid,
    armed: bool,
}

impl Reservation {
    fn held(registry: Arc<SlotRegistry>, key: SlotKey, appointment_id: Uuid) -> Self {
        Self { registry, key, appointment_id, armed: false }
    }

    pub fn commit(mut self) {
        self.registry.commit(self.key, self.appointment_id);
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release_for(self.key, self.appointment_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;
    use assert_matches::assert_matches;
    use chrono::{NaiveDate, NaiveTime, Utc};

    fn key(provider_id: Uuid, hour: u32) -> SlotKey {
        SlotKey::new(
            provider_id,
            NaiveDate::from_ymd_opt(2030, 1, 9).unwrap(),
            NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_second_reservation_conflicts() {
        let registry = SlotRegistry::new();
        let slot = key(Uuid::new_v4(), 9);
        let first = Uuid::new_v4();

        assert!(registry.try_reserve(slot, first).is_ok());
        assert_matches!(registry.try_reserve(slot, Uuid::new_v4()), Err(AppointmentError::SlotUnavailable(k)) if k == slot);
        assert!(registry.try_reserve(slot, first).is_ok());
        assert_eq!(registry.holder(slot), Some(first));
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = SlotRegistry::new();
        let slot = key(Uuid::new_v4(), 9);

        registry.release(slot);
        registry.try_reserve(slot, Uuid::new_v4()).unwrap();
        registry.release(slot);
        registry.release(slot);
        assert!(registry.is_available(slot));
    }

    #[test]
    fn test_release_for_ignores_other_holders() {
        let registry = SlotRegistry::new();
        let slot = key(Uuid::new_v4(), 9);
        let holder = Uuid::new_v4();
        registry.try_reserve(slot, holder).unwrap();

        assert!(!registry.release_for(slot, Uuid::new_v4()));
        assert!(!registry.is_available(slot));
        assert!(registry.release_for(slot, holder));
    }

    #[test]
    fn test_uncommitted_reservation_releases_on_drop() {
        let registry = Arc::new(SlotRegistry::new());
        let slot = key(Uuid::new_v4(), 9);

        {
            let _reservation = registry.reserve(slot, Uuid::new_v4()).unwrap();
            assert!(!registry.is_available(slot));
        }
        assert!(registry.is_available(slot));

        registry.reserve(slot, Uuid::new_v4()).unwrap().commit();
        assert!(!registry.is_available(slot));
    }

    #[test]
    fn test_guard_over_existing_binding_does_not_release_it() {
        let registry = Arc::new(SlotRegistry::new());
        let slot = key(Uuid::new_v4(), 9);
        let id = Uuid::new_v4();
        registry.try_reserve(slot, id).unwrap();

        drop(registry.reserve(slot, id).unwrap());
        assert_eq!(registry.holder(slot), Some(id));
    }

    #[test]
    fn test_only_committed_holders_are_reported() {
        let registry = Arc::new(SlotRegistry::new());
        let slot = key(Uuid::new_v4(), 9);
        let id = Uuid::new_v4();

        let reservation = registry.reserve(slot, id).unwrap();
        assert_eq!(registry.holder(slot), Some(id));
        assert_eq!(registry.committed_holder(slot), None);

        reservation.commit();
        assert_eq!(registry.committed_holder(slot), Some(id));
    }

    #[test]
    fn test_concurrent_reservations_have_one_winner() {
        let registry = Arc::new(SlotRegistry::new());
        let slot = key(Uuid::new_v4(), 9);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.try_reserve(slot, Uuid::new_v4()).is_ok())
            })
            .collect();

        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_rebuild_skips_cancelled() {
        let registry = SlotRegistry::new();
        let provider_id = Uuid::new_v4();
        let make = |hour, status| Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            provider_id,
            appointment_date: NaiveDate::from_ymd_opt(2030, 1, 9).unwrap(),
            start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            duration_minutes: 30,
            status,
            symptoms: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let appointments = vec![
            make(9, AppointmentStatus::Confirmed),
            make(10, AppointmentStatus::Cancelled),
            make(11, AppointmentStatus::Completed),
        ];
        registry.try_reserve(key(provider_id, 15), Uuid::new_v4()).unwrap();

        assert_eq!(registry.rebuild(&appointments), 2);
        assert!(registry.is_available(key(provider_id, 10)));
        assert!(registry.is_available(key(provider_id, 15)));
        assert_eq!(registry.holder(key(provider_id, 9)), Some(appointments[0].id));
        assert_eq!(registry.committed_holder(key(provider_id, 9)), Some(appointments[0].id));
    }
}
