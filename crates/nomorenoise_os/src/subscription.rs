#![forbid(unsafe_code)]

use nomorenoise_kernel_contracts::feed::ChangeEvent;
use nomorenoise_storage::feed::{FeedSubscription, SubscriptionId};
use nomorenoise_storage::repo::ComplaintRepo;

use crate::lifecycle::{LifecycleController, LifecycleError, ViewAccess};
use crate::view::MaterializedView;

/// One client's live view: a snapshot plus the feed subscription that keeps it current.
///
/// Opening takes the snapshot first and subscribes second. Events committed in
/// between are missed until the next [`SubscriptionManager::resnapshot`]; events
/// committed just before the snapshot may arrive twice and are merged idempotently.
/// The subscription is released by [`SubscriptionManager::close`] or on drop.
#[derive(Debug)]
pub struct SubscriptionManager {
    access: ViewAccess,
    view: MaterializedView,
    subscription: FeedSubscription,
    applied_events: u64,
}

impl SubscriptionManager {
    pub fn open<R: ComplaintRepo>(
        controller: &LifecycleController<R>,
        access: ViewAccess,
    ) -> Result<Self, LifecycleError> {
        let snapshot = controller.snapshot(&access)?;
        let view = MaterializedView::from_snapshot(access.scope(), snapshot);
        let subscription = controller.subscribe(&access)?;
        tracing::info!(
            subscription_id = %subscription.id(),
            rows = view.len(),
            "materialized view opened"
        );
        Ok(Self {
            access,
            view,
            subscription,
            applied_events: 0,
        })
    }

    pub fn view(&self) -> &MaterializedView {
        &self.view
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    pub fn applied_events(&self) -> u64 {
        self.applied_events
    }

    fn fold(&mut self, event: &ChangeEvent) {
        self.applied_events = self.applied_events.saturating_add(1);
        if self.view.apply(event) {
            tracing::trace!(
                seq = event.seq,
                kind = event.kind.as_str(),
                complaint_id = %event.record.complaint_id,
                "view updated"
            );
        }
    }

    /// Applies every event already delivered, without waiting. Returns how many.
    pub fn pump(&mut self) -> Result<usize, LifecycleError> {
        let mut applied = 0;
        while let Some(next) = self.subscription.try_recv() {
            let event = next?;
            self.fold(&event);
            applied += 1;
        }
        Ok(applied)
    }

    /// Waits for one event and applies it.
    pub async fn next_event(&mut self) -> Result<ChangeEvent, LifecycleError> {
        let event = self.subscription.recv().await?;
        self.fold(&event);
        Ok(event)
    }

    /// Re-reads the snapshot to close the gap left at open time or by any missed
    /// delivery. Events already queued are applied on top afterwards.
    pub fn resnapshot<R: ComplaintRepo>(
        &mut self,
        controller: &LifecycleController<R>,
    ) -> Result<(), LifecycleError> {
        let snapshot = controller.snapshot(&self.access)?;
        self.view.reset(snapshot);
        self.pump()?;
        Ok(())
    }

    pub fn close(mut self) {
        self.subscription.cancel();
        tracing::info!(
            subscription_id = %self.subscription.id(),
            applied_events = self.applied_events,
            "materialized view closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use nomorenoise_kernel_contracts::complaint::{ComplaintStatus, NoiseIntensity};
    use nomorenoise_kernel_contracts::feed::ChangeEventKind;
    use nomorenoise_storage::complaints::ComplaintStore;

    use super::*;
    use crate::identity::{AdminGate, Credentials, Identity, InMemoryIdentityProvider};
    use crate::lifecycle::ComplaintFields;

    fn fields(noise_type: &str, intensity: NoiseIntensity) -> ComplaintFields {
        ComplaintFields {
            noise_type: noise_type.to_string(),
            description: "still going".to_string(),
            intensity,
            location: "Elm St".to_string(),
            contact: None,
            latitude: None,
            longitude: None,
        }
    }

    fn setup() -> (LifecycleController, Arc<Mutex<ComplaintStore>>, Identity, Identity) {
        let store = Arc::new(Mutex::new(ComplaintStore::new_in_memory()));
        let provider = InMemoryIdentityProvider::new();
        let u1 = provider
            .sign_up(&Credentials::new("u1@example.com", "password1"), None)
            .unwrap();
        let u2 = provider
            .sign_up(&Credentials::new("u2@example.com", "password2"), None)
            .unwrap();
        (LifecycleController::new(store.clone()), store, u1, u2)
    }

    #[test]
    fn at_subscription_01_view_tracks_creates_and_updates() {
        let (controller, _store, u1, _u2) = setup();
        let admin = AdminGate::default().login("admin", "1234").unwrap();
        let existing = controller
            .submit(Some(&u1), fields("traffic", NoiseIntensity::Low))
            .unwrap();

        let mut manager =
            SubscriptionManager::open(&controller, ViewAccess::Admin(admin.clone())).unwrap();
        assert_eq!(manager.view().len(), 1);

        let fresh = controller
            .submit(Some(&u1), fields("construction", NoiseIntensity::High))
            .unwrap();
        controller
            .update_status(Some(&admin), &existing.complaint_id, ComplaintStatus::InProgress)
            .unwrap();

        assert_eq!(manager.pump().unwrap(), 2);
        let view = manager.view();
        assert_eq!(view.all()[0].complaint_id, fresh.complaint_id);
        assert_eq!(view.all()[1].status, ComplaintStatus::InProgress);
        assert_eq!(view.counts_by_status().in_progress, 1);
        assert_eq!(view.counts_by_intensity().high, 1);
    }

    #[test]
    fn at_subscription_02_racing_admins_converge_on_later_commit() {
        let (controller, _store, u1, _u2) = setup();
        let gate = AdminGate::default();
        let admin_a = gate.login("admin", "1234").unwrap();
        let admin_b = gate.login("admin", "1234").unwrap();
        let created = controller
            .submit(Some(&u1), fields("traffic", NoiseIntensity::High))
            .unwrap();

        let mut one =
            SubscriptionManager::open(&controller, ViewAccess::Admin(admin_a.clone())).unwrap();
        let mut two =
            SubscriptionManager::open(&controller, ViewAccess::Admin(admin_b.clone())).unwrap();

        controller
            .update_status(Some(&admin_a), &created.complaint_id, ComplaintStatus::InProgress)
            .unwrap();
        controller
            .update_status(Some(&admin_b), &created.complaint_id, ComplaintStatus::Resolved)
            .unwrap();

        for manager in [&mut one, &mut two] {
            assert_eq!(manager.pump().unwrap(), 2);
            assert_eq!(
                manager.view().get(&created.complaint_id).unwrap().status,
                ComplaintStatus::Resolved
            );
        }
    }

    #[test]
    fn at_subscription_03_owner_view_only_folds_own_records() {
        let (controller, _store, u1, u2) = setup();
        let mut manager =
            SubscriptionManager::open(&controller, ViewAccess::Owner(u1.clone())).unwrap();
        controller
            .submit(Some(&u2), fields("traffic", NoiseIntensity::Low))
            .unwrap();
        controller
            .submit(Some(&u1), fields("neighbors", NoiseIntensity::Medium))
            .unwrap();
        assert_eq!(manager.pump().unwrap(), 2);
        assert_eq!(manager.view().len(), 1);
        assert_eq!(manager.applied_events(), 2);
    }

    #[test]
    fn at_subscription_04_close_releases_feed_slot() {
        let (controller, store, _u1, _u2) = setup();
        let admin = AdminGate::default().login("admin", "1234").unwrap();
        let manager = SubscriptionManager::open(&controller, ViewAccess::Admin(admin)).unwrap();
        assert_eq!(store.lock().unwrap().feed().subscriber_count(), 1);
        manager.close();
        assert_eq!(store.lock().unwrap().feed().subscriber_count(), 0);
    }

    #[test]
    fn at_subscription_05_resnapshot_recovers_missed_commits() {
        let (controller, store, u1, _u2) = setup();
        let admin = AdminGate::default().login("admin", "1234").unwrap();
        let mut manager =
            SubscriptionManager::open(&controller, ViewAccess::Admin(admin)).unwrap();

        // Simulate a commit the feed never delivered to this client.
        let missed = controller
            .submit(Some(&u1), fields("industrial", NoiseIntensity::High))
            .unwrap();
        while let Some(Ok(_)) = manager.subscription.try_recv() {}
        assert!(manager.view().get(&missed.complaint_id).is_none());

        manager.resnapshot(&controller).unwrap();
        assert!(manager.view().get(&missed.complaint_id).is_some());
        assert_eq!(manager.view().len(), store.lock().unwrap().len());
    }

    #[test]
    fn at_subscription_06_duplicate_delivery_after_snapshot_is_harmless() {
        let (controller, _store, u1, _u2) = setup();
        let admin = AdminGate::default().login("admin", "1234").unwrap();
        let mut manager =
            SubscriptionManager::open(&controller, ViewAccess::Admin(admin)).unwrap();
        let created = controller
            .submit(Some(&u1), fields("traffic", NoiseIntensity::Low))
            .unwrap();
        manager.resnapshot(&controller).unwrap();
        assert_eq!(manager.view().len(), 1);
        assert_eq!(manager.view().all()[0].complaint_id, created.complaint_id);
    }

    #[tokio::test]
    async fn at_subscription_07_next_event_awaits_delivery() {
        let (controller, _store, u1, _u2) = setup();
        let admin = AdminGate::default().login("admin", "1234").unwrap();
        let mut manager =
            SubscriptionManager::open(&controller, ViewAccess::Admin(admin)).unwrap();
        let writer = controller.clone();
        let task = tokio::spawn(async move {
            writer
                .submit(Some(&u1), fields("loudspeaker", NoiseIntensity::Medium))
                .unwrap()
        });
        let event = manager.next_event().await.unwrap();
        let created = task.await.unwrap();
        assert_eq!(event.kind, ChangeEventKind::Created);
        assert_eq!(event.complaint_id(), &created.complaint_id);
        assert_eq!(manager.view().len(), 1);
    }
}
