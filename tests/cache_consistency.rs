use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use uuid::Uuid;

use verdant::application::content::{Audience, ContentService, InvalidationSink};
use verdant::application::sessions::{
    AdminAccount, AdminSessionGuard, Credentials, SessionPolicy, hash_password,
};
use verdant::application::store::{Committed, EntityStore, Listing};
use verdant::cache::{
    CacheConfig, CacheKey, ContentCache, ContentSource, FetchError, LocalSource,
};
use verdant::domain::{
    AppointmentDraft, AppointmentRecord, AppointmentStatus, BlogPostRecord, Entity, EntityKind,
    ListFilter, PublishStatus, Revision, ServiceDraft, ServiceRecord,
};
use verdant::infra::memory::InMemoryRepositories;
use verdant_api_types::DashboardSummary;

/// Wraps a [`LocalSource`], counting reads and optionally holding list
/// fetches until released.
struct CountingSource {
    inner: LocalSource,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    hold: AtomicBool,
    gate: Semaphore,
    fail: AtomicBool,
    report_revision: bool,
}

impl CountingSource {
    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    fn release(&self, fetches: usize) {
        self.gate.add_permits(fetches);
    }

    fn unhold(&self) {
        self.hold.store(false, Ordering::SeqCst);
    }

    fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), FetchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentSource for CountingSource {
    async fn list<E: Entity>(
        &self,
        audience: Audience,
        filter: &ListFilter,
    ) -> Result<Listing<E>, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .map_err(|_| FetchError::Aborted)?
                .forget();
        }
        self.check_failure()?;
        self.inner.list::<E>(audience, filter).await
    }

    async fn get<E: Entity>(&self, audience: Audience, id: Uuid) -> Result<E, FetchError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.inner.get::<E>(audience, id).await
    }

    async fn create<E: Entity>(&self, draft: E::Draft) -> Result<Committed<E>, FetchError> {
        self.inner.create::<E>(draft).await
    }

    async fn update<E: Entity>(
        &self,
        id: Uuid,
        draft: E::Draft,
    ) -> Result<Committed<E>, FetchError> {
        self.inner.update::<E>(id, draft).await
    }

    async fn patch<E: Entity>(
        &self,
        id: Uuid,
        patch: &Value,
    ) -> Result<Committed<E>, FetchError> {
        self.inner.patch::<E>(id, patch).await
    }

    async fn delete<E: Entity>(&self, id: Uuid) -> Result<Revision, FetchError> {
        self.inner.delete::<E>(id).await
    }

    async fn set_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Committed<AppointmentRecord>, FetchError> {
        self.inner.set_appointment_status(id, status).await
    }

    async fn set_post_status(
        &self,
        id: Uuid,
        status: PublishStatus,
    ) -> Result<Committed<BlogPostRecord>, FetchError> {
        self.inner.set_post_status(id, status).await
    }

    async fn dashboard(&self) -> Result<DashboardSummary, FetchError> {
        self.inner.dashboard().await
    }

    fn latest_revision(&self, kind: EntityKind) -> Option<Revision> {
        if self.report_revision {
            self.inner.latest_revision(kind)
        } else {
            None
        }
    }
}

struct Harness {
    content: ContentService,
    token: String,
    cache: ContentCache<CountingSource>,
}

impl Harness {
    fn source(&self) -> &CountingSource {
        self.cache.source()
    }
}

async fn harness(report_revision: bool, config: CacheConfig) -> Harness {
    let store = EntityStore::open(Arc::new(InMemoryRepositories::new()))
        .await
        .expect("open store");
    let account = AdminAccount::from_hex_digest("admin", &hash_password("pw")).expect("account");
    let guard = AdminSessionGuard::new(
        account,
        SessionPolicy {
            ttl: Duration::from_secs(3600),
            login_window: Duration::from_secs(60),
            login_max_failures: 5,
        },
    );
    let content = ContentService::new(Arc::new(store), guard);
    let token = content
        .login(&Credentials {
            username: "admin".to_string(),
            password: "pw".to_string(),
        })
        .expect("login")
        .token;

    let source = CountingSource {
        inner: LocalSource::with_token(content.clone(), token.clone()),
        list_calls: AtomicUsize::new(0),
        get_calls: AtomicUsize::new(0),
        hold: AtomicBool::new(false),
        gate: Semaphore::new(0),
        fail: AtomicBool::new(false),
        report_revision,
    };
    Harness {
        content,
        token,
        cache: ContentCache::new(source, config),
    }
}

fn long_lived() -> CacheConfig {
    CacheConfig {
        stale_after: Duration::from_secs(3600),
        max_entries: 64,
    }
}

fn lawn_mowing(price: &str) -> ServiceDraft {
    ServiceDraft {
        name: "Lawn Mowing".to_string(),
        description: "Weekly cut".to_string(),
        price: price.to_string(),
        image_url: None,
        rank: 1,
    }
}

fn appointment(name: &str) -> AppointmentDraft {
    AppointmentDraft {
        service_id: None,
        customer_name: name.to_string(),
        customer_email: format!("{}@example.com", name.to_lowercase()),
        customer_phone: None,
        requested_at: time::macros::datetime!(2026-06-01 09:00 UTC),
        notes: None,
        status: AppointmentStatus::Pending,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}

fn public_services(harness: &Harness) -> Option<Arc<Vec<ServiceRecord>>> {
    harness
        .cache
        .peek_list::<ServiceRecord>(Audience::Public, &ListFilter::default())
}

fn services_key(audience: Audience) -> CacheKey {
    CacheKey::list(EntityKind::Service, audience, ListFilter::default())
}

#[tokio::test]
async fn concurrent_reads_share_one_fetch() {
    let harness = harness(true, long_lived()).await;
    harness
        .cache
        .create::<ServiceRecord>(lawn_mowing("$40"))
        .await
        .expect("create");
    harness.source().hold();

    let readers: Vec<_> = (0..5)
        .map(|_| {
            let cache = harness.cache.clone();
            tokio::spawn(async move {
                cache
                    .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
                    .await
            })
        })
        .collect();

    wait_until(|| harness.source().list_calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.source().release(1);

    let mut results = Vec::new();
    for reader in readers {
        results.push(reader.await.expect("join").expect("list"));
    }
    assert_eq!(harness.source().list_calls(), 1);
    assert!(results.iter().all(|list| Arc::ptr_eq(list, &results[0])));
    assert_eq!(results[0][0].price, "$40");
}

#[tokio::test]
async fn price_change_is_visible_after_refresh() {
    let harness = harness(true, long_lived()).await;
    let created = harness
        .cache
        .create::<ServiceRecord>(lawn_mowing("$40"))
        .await
        .expect("create");

    let public = harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("public list");
    let admin = harness
        .cache
        .list::<ServiceRecord>(Audience::Admin, &ListFilter::default())
        .await
        .expect("admin list");
    assert_eq!(public[0].price, "$40");
    assert_eq!(admin[0].price, "$40");
    assert!(!harness.cache.is_stale(&services_key(Audience::Public)));

    harness
        .cache
        .update::<ServiceRecord>(created.entity.id, lawn_mowing("$45"))
        .await
        .expect("update");
    assert!(harness.cache.is_stale(&services_key(Audience::Public)));
    assert!(harness.cache.is_stale(&services_key(Audience::Admin)));

    // Stale value first, refreshed in the background.
    let stale = harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("stale read");
    assert_eq!(stale[0].price, "$40");

    wait_until(|| public_services(&harness).is_some_and(|list| list[0].price == "$45")).await;
    assert!(!harness.cache.is_stale(&services_key(Audience::Public)));

    let fresh = harness
        .cache
        .refresh_list::<ServiceRecord>(Audience::Admin, &ListFilter::default())
        .await
        .expect("refresh");
    assert_eq!(fresh[0].price, "$45");
}

#[tokio::test]
async fn invalidation_during_refetch_leaves_entry_stale() {
    let harness = harness(false, long_lived()).await;
    let created = harness
        .cache
        .create::<ServiceRecord>(lawn_mowing("$40"))
        .await
        .expect("create");
    harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("initial load");
    assert_eq!(harness.source().list_calls(), 1);

    harness.source().hold();
    harness.cache.invalidate(EntityKind::Service);
    harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("stale hit");
    wait_until(|| harness.source().list_calls() == 2).await;

    // A write lands while the refetch is still waiting on the source.
    harness
        .content
        .update::<ServiceRecord>(Some(&harness.token), created.entity.id, lawn_mowing("$45"))
        .await
        .expect("direct update");
    harness.cache.invalidate(EntityKind::Service);

    harness.source().release(1);
    wait_until(|| public_services(&harness).is_some_and(|list| list[0].price == "$45")).await;
    assert!(harness.cache.is_stale(&services_key(Audience::Public)));

    harness.source().unhold();
    harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("read after race");
    wait_until(|| harness.source().list_calls() == 3).await;
    wait_until(|| !harness.cache.is_stale(&services_key(Audience::Public))).await;
}

#[tokio::test]
async fn background_failure_keeps_last_good_value() {
    let harness = harness(true, long_lived()).await;
    harness
        .cache
        .create::<ServiceRecord>(lawn_mowing("$40"))
        .await
        .expect("create");
    harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("initial load");

    harness.source().fail(true);
    harness.cache.invalidate(EntityKind::Service);
    let served = harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("stale value is still served");
    assert_eq!(served[0].price, "$40");

    let err = harness
        .cache
        .refresh_list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect_err("explicit refresh reports the failure");
    assert_eq!(err, FetchError::Transport("connection refused".to_string()));
    assert_eq!(
        public_services(&harness).expect("value kept")[0].price,
        "$40"
    );
}

#[tokio::test]
async fn initial_load_failure_leaves_no_entry() {
    let harness = harness(true, long_lived()).await;
    harness.source().fail(true);

    let err = harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect_err("load fails");
    assert!(err.is_retryable());
    assert!(harness.cache.is_empty());

    harness.source().fail(false);
    let listed = harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("retry succeeds");
    assert!(listed.is_empty());
    assert_eq!(harness.source().list_calls(), 2);
}

#[tokio::test]
async fn admin_reads_without_session_fail_and_cache_nothing() {
    let harness = harness(true, long_lived()).await;
    harness.source().inner.set_token(None);

    let err = harness
        .cache
        .list::<AppointmentRecord>(Audience::Admin, &ListFilter::default())
        .await
        .expect_err("unauthorized");
    assert!(err.is_unauthorized());
    assert!(harness.cache.is_empty());
}

#[tokio::test]
async fn server_side_writes_reach_the_cache_as_a_sink() {
    let harness = harness(false, long_lived()).await;
    let sink: Arc<dyn InvalidationSink> = Arc::new(harness.cache.clone());
    harness.content.subscribe(sink);

    harness
        .cache
        .list::<AppointmentRecord>(Audience::Admin, &ListFilter::default())
        .await
        .expect("empty list");
    let key = CacheKey::list(EntityKind::Appointment, Audience::Admin, ListFilter::default());
    assert!(!harness.cache.is_stale(&key));

    harness
        .content
        .create::<AppointmentRecord>(Some(&harness.token), appointment("Robin"))
        .await
        .expect("direct create");
    assert!(harness.cache.is_stale(&key));

    harness
        .cache
        .list::<AppointmentRecord>(Audience::Admin, &ListFilter::default())
        .await
        .expect("stale hit");
    wait_until(|| {
        harness
            .cache
            .peek_list::<AppointmentRecord>(Audience::Admin, &ListFilter::default())
            .is_some_and(|list| list.len() == 1)
    })
    .await;
}

#[tokio::test]
async fn store_revision_ahead_of_entry_marks_it_stale() {
    let harness = harness(true, long_lived()).await;
    harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("empty list");
    assert!(!harness.cache.is_stale(&services_key(Audience::Public)));

    // Not routed through the cache and no sink registered.
    harness
        .content
        .create::<ServiceRecord>(Some(&harness.token), lawn_mowing("$40"))
        .await
        .expect("direct create");
    assert!(harness.cache.is_stale(&services_key(Audience::Public)));
}

#[tokio::test]
async fn filtered_lists_are_invalidated_together() {
    let harness = harness(true, long_lived()).await;
    let pending = ListFilter::with_status(AppointmentStatus::Pending);
    let confirmed = ListFilter::with_status(AppointmentStatus::Confirmed);

    let created = harness
        .cache
        .create::<AppointmentRecord>(appointment("Robin"))
        .await
        .expect("create");
    let before = harness
        .cache
        .list::<AppointmentRecord>(Audience::Admin, &pending)
        .await
        .expect("pending");
    assert_eq!(before.len(), 1);
    harness
        .cache
        .list::<AppointmentRecord>(Audience::Admin, &confirmed)
        .await
        .expect("confirmed");

    harness
        .cache
        .set_appointment_status(created.entity.id, AppointmentStatus::Confirmed)
        .await
        .expect("confirm");

    let pending_key = CacheKey::list(EntityKind::Appointment, Audience::Admin, pending.clone());
    let confirmed_key =
        CacheKey::list(EntityKind::Appointment, Audience::Admin, confirmed.clone());
    assert!(harness.cache.is_stale(&pending_key));
    assert!(harness.cache.is_stale(&confirmed_key));

    let now_pending = harness
        .cache
        .refresh_list::<AppointmentRecord>(Audience::Admin, &pending)
        .await
        .expect("refresh pending");
    let now_confirmed = harness
        .cache
        .refresh_list::<AppointmentRecord>(Audience::Admin, &confirmed)
        .await
        .expect("refresh confirmed");
    assert!(now_pending.is_empty());
    assert_eq!(now_confirmed[0].customer_name, "Robin");
}

#[tokio::test]
async fn records_are_cached_and_deletes_surface_not_found() {
    let harness = harness(true, long_lived()).await;
    let created = harness
        .cache
        .create::<ServiceRecord>(lawn_mowing("$40"))
        .await
        .expect("create");
    let id = created.entity.id;

    let first = harness
        .cache
        .get::<ServiceRecord>(Audience::Public, id)
        .await
        .expect("first get");
    let second = harness
        .cache
        .get::<ServiceRecord>(Audience::Public, id)
        .await
        .expect("cached get");
    assert_eq!(first, second);
    assert_eq!(harness.source().get_calls(), 1);

    harness
        .cache
        .delete::<ServiceRecord>(id)
        .await
        .expect("delete");
    let err = harness
        .cache
        .refresh_record::<ServiceRecord>(Audience::Public, id)
        .await
        .expect_err("gone");
    assert!(err.is_not_found());

    let listed = harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("list");
    assert!(listed.iter().all(|service| service.id != id));
}

#[tokio::test]
async fn deleting_a_missing_record_changes_nothing() {
    let harness = harness(true, long_lived()).await;
    harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("empty list");

    let err = harness
        .cache
        .delete::<ServiceRecord>(Uuid::new_v4())
        .await
        .expect_err("missing");
    assert!(err.is_not_found());
    assert!(!harness.cache.is_stale(&services_key(Audience::Public)));
}

#[tokio::test]
async fn patch_through_cache_invalidates() {
    let harness = harness(true, long_lived()).await;
    let created = harness
        .cache
        .create::<ServiceRecord>(lawn_mowing("$40"))
        .await
        .expect("create");
    harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("list");

    let patched = harness
        .cache
        .patch::<ServiceRecord>(created.entity.id, &json!({ "price": "$42" }))
        .await
        .expect("patch");
    assert_eq!(patched.entity.price, "$42");
    assert!(harness.cache.is_stale(&services_key(Audience::Public)));
}

#[tokio::test]
async fn stale_after_elapses() {
    let harness = harness(
        true,
        CacheConfig {
            stale_after: Duration::from_millis(30),
            max_entries: 8,
        },
    )
    .await;
    harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("list");
    assert!(!harness.cache.is_stale(&services_key(Audience::Public)));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(harness.cache.is_stale(&services_key(Audience::Public)));

    harness
        .cache
        .list::<ServiceRecord>(Audience::Public, &ListFilter::default())
        .await
        .expect("stale hit");
    wait_until(|| harness.source().list_calls() == 2).await;
}

#[tokio::test]
async fn capacity_is_bounded() {
    let harness = harness(
        true,
        CacheConfig {
            stale_after: Duration::from_secs(3600),
            max_entries: 2,
        },
    )
    .await;
    for filter in [
        ListFilter::with_status(AppointmentStatus::Pending),
        ListFilter::with_status(AppointmentStatus::Confirmed),
        ListFilter::with_status(AppointmentStatus::Cancelled),
    ] {
        harness
            .cache
            .list::<AppointmentRecord>(Audience::Admin, &filter)
            .await
            .expect("list");
    }
    assert_eq!(harness.cache.len(), 2);
}

#[tokio::test]
async fn dashboard_is_never_cached_and_clear_empties() {
    let harness = harness(true, long_lived()).await;
    harness
        .cache
        .create::<AppointmentRecord>(appointment("Robin"))
        .await
        .expect("create");

    let first = harness.cache.dashboard().await.expect("dashboard");
    assert_eq!(first.pending_appointments, 1);
    harness
        .content
        .create::<AppointmentRecord>(Some(&harness.token), appointment("Ash"))
        .await
        .expect("direct create");
    let second = harness.cache.dashboard().await.expect("dashboard");
    assert_eq!(second.pending_appointments, 2);

    harness
        .cache
        .list::<AppointmentRecord>(Audience::Admin, &ListFilter::default())
        .await
        .expect("list");
    assert!(!harness.cache.is_empty());
    harness.cache.clear();
    assert!(harness.cache.is_empty());
}
