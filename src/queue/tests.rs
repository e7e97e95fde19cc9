use super::*;
use crate::persistence::MemoryStateStore;

fn store(max_concurrent: usize) -> QueueStore {
    QueueStore::new(Quality::Lossless, max_concurrent, None).unwrap()
}

fn inputs(sources: &[&str]) -> Vec<NewJob> {
    sources.iter().map(|s| NewJob::new(*s)).collect()
}

/// Enqueue one job and move it to downloading
async fn downloading_job(store: &QueueStore, source: &str) -> JobId {
    let id = store.enqueue(inputs(&[source])).await[0].id;
    store.dequeue_to_downloading(id).await.unwrap();
    id
}

// -----------------------------------------------------------------------
// enqueue
// -----------------------------------------------------------------------

#[tokio::test]
async fn enqueue_assigns_unique_ids_in_input_order() {
    let store = store(2);

    let admitted = store.enqueue(inputs(&["a", "b", "c"])).await;

    assert_eq!(admitted.len(), 3);
    let ids: Vec<JobId> = admitted.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![JobId(1), JobId(2), JobId(3)]);

    let snapshot = store.snapshot().await;
    let sources: Vec<&str> = snapshot
        .queued
        .iter()
        .map(|j| j.source_ref.as_str())
        .collect();
    assert_eq!(sources, vec!["a", "b", "c"]);
    assert!(snapshot.queued.iter().all(|j| j.status == Status::Queued));
}

#[tokio::test]
async fn enqueue_skips_duplicates_of_active_jobs() {
    let store = store(2);
    store.enqueue(inputs(&["queued"])).await;
    downloading_job(&store, "downloading").await;
    let done = downloading_job(&store, "done").await;
    store.complete_downloading(done, "done.flac", None).await.unwrap();

    let admitted = store
        .enqueue(inputs(&["queued", "downloading", "done", "fresh"]))
        .await;

    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].source_ref, "fresh");
}

#[tokio::test]
async fn enqueue_skips_duplicates_within_a_batch() {
    let store = store(2);

    let admitted = store.enqueue(inputs(&["a", "a", "b", "a"])).await;

    assert_eq!(admitted.len(), 2);
    assert_eq!(store.stats().await.queued, 2);
}

#[tokio::test]
async fn enqueue_allows_a_track_whose_previous_job_failed() {
    let store = store(2);
    let first = downloading_job(&store, "a").await;
    store.fail_downloading(first, "boom").await.unwrap();

    let admitted = store.enqueue(inputs(&["a"])).await;

    assert_eq!(admitted.len(), 1);
    assert_ne!(admitted[0].id, first, "a new enqueue gets a new id");
    let stats = store.stats().await;
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.failed, 1);
}

// -----------------------------------------------------------------------
// dequeue_to_downloading
// -----------------------------------------------------------------------

#[tokio::test]
async fn dequeue_moves_job_and_stamps_start() {
    let store = store(2);
    let id = store.enqueue(inputs(&["a"])).await[0].id;

    let job = store.dequeue_to_downloading(id).await.unwrap();

    assert_eq!(job.status, Status::Downloading);
    assert_eq!(job.progress, 0);
    assert!(job.started_at.is_some());
    let stats = store.stats().await;
    assert_eq!((stats.queued, stats.downloading), (0, 1));
}

#[tokio::test]
async fn dequeue_of_removed_job_is_not_found() {
    let store = store(2);
    let id = store.enqueue(inputs(&["a"])).await[0].id;
    store.remove(id).await.unwrap();

    let err = store.dequeue_to_downloading(id).await.unwrap_err();

    assert!(matches!(
        err,
        Error::NotFound {
            expected: Status::Queued,
            ..
        }
    ));
    assert_eq!(store.stats().await.total, 0);
}

// -----------------------------------------------------------------------
// update_progress
// -----------------------------------------------------------------------

#[tokio::test]
async fn progress_is_monotonic_and_clamped() {
    let store = store(1);
    let id = downloading_job(&store, "a").await;

    assert_eq!(store.update_progress(id, 30).await, Some(30));
    assert_eq!(store.update_progress(id, 10).await, None);
    assert_eq!(store.get(id).await.unwrap().progress, 30);
    assert_eq!(store.update_progress(id, 30).await, None);
    assert_eq!(store.update_progress(id, 250).await, Some(100));
    assert_eq!(store.get(id).await.unwrap().progress, 100);
}

#[tokio::test]
async fn progress_for_non_downloading_job_is_ignored() {
    let store = store(1);
    let id = store.enqueue(inputs(&["a"])).await[0].id;

    assert_eq!(store.update_progress(id, 50).await, None);
    assert_eq!(store.get(id).await.unwrap().progress, 0);
    assert_eq!(store.update_progress(JobId(99), 50).await, None);
}

// -----------------------------------------------------------------------
// terminal transitions
// -----------------------------------------------------------------------

#[tokio::test]
async fn complete_sets_artifact_and_full_progress() {
    let store = store(1);
    let id = downloading_job(&store, "a").await;
    store.update_progress(id, 60).await;

    let job = store
        .complete_downloading(id, "a.flac", Some("/music/a.flac".into()))
        .await
        .unwrap();

    assert_eq!(job.status, Status::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.artifact.as_deref(), Some("a.flac"));
    assert_eq!(job.location.as_deref(), Some("/music/a.flac"));
    assert!(job.completed_at.is_some());
    assert_eq!(store.snapshot().await.completed, vec![job]);
}

#[tokio::test]
async fn terminal_transitions_require_downloading() {
    let store = store(1);
    let id = store.enqueue(inputs(&["a"])).await[0].id;

    assert!(
        store
            .complete_downloading(id, "a.flac", None)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(store.fail_downloading(id, "boom").await.unwrap_err().is_not_found());
    assert_eq!(store.get(id).await.unwrap().status, Status::Queued);
}

#[tokio::test]
async fn job_leaves_downloading_exactly_once() {
    let store = store(1);
    let id = downloading_job(&store, "a").await;

    store.fail_downloading(id, "disk full").await.unwrap();
    assert!(
        store
            .complete_downloading(id, "a.flac", None)
            .await
            .unwrap_err()
            .is_not_found()
    );

    let snapshot = store.snapshot().await;
    assert!(snapshot.completed.is_empty());
    assert_eq!(snapshot.failed.len(), 1);
    assert_eq!(snapshot.failed[0].error.as_deref(), Some("disk full"));
}

// -----------------------------------------------------------------------
// retry
// -----------------------------------------------------------------------

#[tokio::test]
async fn retry_requeues_failed_job_with_same_id() {
    let store = store(1);
    store.enqueue(inputs(&["first"])).await;
    let id = downloading_job(&store, "a").await;
    store.update_progress(id, 70).await;
    let failed = store.fail_downloading(id, "disk full").await.unwrap();

    let job = store.retry(id).await.unwrap();

    assert_eq!(job.id, id);
    assert_eq!(job.status, Status::Queued);
    assert_eq!(job.progress, 0);
    assert!(job.error.is_none());
    assert!(job.failed_at.is_none());
    assert!(job.started_at.is_none());
    assert!(job.added_at >= failed.added_at);

    let snapshot = store.snapshot().await;
    assert!(snapshot.failed.is_empty());
    assert_eq!(snapshot.queued.last().unwrap().id, id, "retried job goes last");
}

#[tokio::test]
async fn retry_of_non_failed_job_mutates_nothing() {
    let store = store(2);
    let queued = store.enqueue(inputs(&["q"])).await[0].id;
    let downloading = downloading_job(&store, "d").await;
    let completed = downloading_job(&store, "c").await;
    store
        .complete_downloading(completed, "c.flac", None)
        .await
        .unwrap();
    let before = store.snapshot().await;

    for id in [queued, downloading, completed] {
        let err = store.retry(id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                expected: Status::Failed,
                ..
            }
        ));
    }

    assert_eq!(store.snapshot().await, before);
}

#[tokio::test]
async fn retry_refuses_when_track_was_queued_again() {
    let store = store(1);
    let id = downloading_job(&store, "a").await;
    store.fail_downloading(id, "boom").await.unwrap();
    store.enqueue(inputs(&["a"])).await;

    let err = store.retry(id).await.unwrap_err();

    assert!(matches!(err, Error::Duplicate(ref s) if s == "a"));
    assert_eq!(store.stats().await.failed, 1);
}

// -----------------------------------------------------------------------
// remove / clear
// -----------------------------------------------------------------------

#[tokio::test]
async fn remove_only_applies_to_queued_jobs() {
    let store = store(1);
    let queued = store.enqueue(inputs(&["q"])).await[0].id;
    let downloading = downloading_job(&store, "d").await;

    assert!(store.remove(downloading).await.unwrap_err().is_not_found());
    let removed = store.remove(queued).await.unwrap();

    assert_eq!(removed.source_ref, "q");
    assert!(store.get(queued).await.is_none());
    assert!(store.remove(queued).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn clear_completed_and_failed_report_counts() {
    let store = store(3);
    let a = downloading_job(&store, "a").await;
    let b = downloading_job(&store, "b").await;
    let c = downloading_job(&store, "c").await;
    store.complete_downloading(a, "a.flac", None).await.unwrap();
    store.complete_downloading(b, "b.flac", None).await.unwrap();
    store.fail_downloading(c, "boom").await.unwrap();

    assert_eq!(store.clear_completed().await, 2);
    assert_eq!(store.clear_completed().await, 0);
    assert_eq!(store.clear_failed().await, 1);
    assert_eq!(store.stats().await.total, 0);

    let readmitted = store.enqueue(inputs(&["a"])).await;
    assert_eq!(readmitted.len(), 1, "cleared tracks can be queued again");
}

// -----------------------------------------------------------------------
// settings and lookups
// -----------------------------------------------------------------------

#[tokio::test]
async fn settings_are_validated_and_reported() {
    let store = store(3);

    store.set_quality(Quality::HiResLossless).await;
    store.set_max_concurrent(5).await.unwrap();
    assert!(store.set_max_concurrent(0).await.is_err());

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.quality, Quality::HiResLossless);
    assert_eq!(snapshot.max_concurrent, 5);
}

#[tokio::test]
async fn find_by_source_prefers_active_jobs() {
    let store = store(1);
    let old = downloading_job(&store, "a").await;
    store.fail_downloading(old, "boom").await.unwrap();
    let new = store.enqueue(inputs(&["a"])).await[0].id;

    assert_eq!(store.find_by_source("a").await.unwrap().id, new);
    store.remove(new).await.unwrap();
    assert_eq!(store.find_by_source("a").await.unwrap().id, old);
    assert!(store.find_by_source("missing").await.is_none());
}

#[tokio::test]
async fn admission_view_reports_head_and_counts() {
    let store = store(2);
    let ids: Vec<JobId> = store
        .enqueue(inputs(&["a", "b"]))
        .await
        .into_iter()
        .map(|j| j.id)
        .collect();
    store.dequeue_to_downloading(ids[0]).await.unwrap();

    let view = store.admission_view().await;

    assert_eq!(view.head, Some(ids[1]));
    assert_eq!((view.queued, view.downloading, view.max_concurrent), (1, 1, 2));
}

// -----------------------------------------------------------------------
// persistence
// -----------------------------------------------------------------------

#[tokio::test]
async fn mutations_are_saved_to_the_state_store() {
    let backend = Arc::new(MemoryStateStore::new());
    let store = QueueStore::new(Quality::High, 2, Some(backend.clone())).unwrap();

    let id = store.enqueue(inputs(&["a"])).await[0].id;
    store.dequeue_to_downloading(id).await.unwrap();
    store.update_progress(id, 10).await;
    store.update_progress(id, 5).await; // dropped, not saved

    assert_eq!(backend.save_count(), 3);
    let saved = backend.saved().await.unwrap();
    assert_eq!(saved.downloading.len(), 1);
    assert_eq!(saved.downloading[0].progress, 10);
    assert_eq!(saved.quality, Quality::High);
}

#[tokio::test]
async fn no_op_mutations_are_not_saved() {
    let backend = Arc::new(MemoryStateStore::new());
    let store = QueueStore::new(Quality::High, 2, Some(backend.clone())).unwrap();

    store.enqueue(Vec::new()).await;
    store.clear_completed().await;
    store.clear_failed().await;
    store.set_quality(Quality::High).await;
    store.set_max_concurrent(2).await.unwrap();

    assert_eq!(backend.save_count(), 0);
}

#[tokio::test]
async fn restored_store_continues_id_sequence() {
    let now = Utc::now();
    let mut state = PersistedState::empty(Quality::Low, 4);
    state
        .queued
        .push(Job::queued(JobId(41), NewJob::new("a"), now));

    let store = QueueStore::from_persisted(state, None).unwrap();
    let admitted = store.enqueue(inputs(&["a", "b"])).await;

    assert_eq!(admitted.len(), 1, "restored jobs still block duplicates");
    assert_eq!(admitted[0].id, JobId(42));
    assert_eq!(store.max_concurrent().await, 4);
    assert_eq!(store.quality().await, Quality::Low);
}

#[tokio::test]
async fn restored_store_rejects_zero_concurrency() {
    let state = PersistedState::empty(Quality::Low, 0);
    assert!(QueueStore::from_persisted(state, None).is_err());
}

#[tokio::test]
async fn restored_state_is_deduplicated_and_clamped() {
    let now = Utc::now();
    let mut state = PersistedState::empty(Quality::Low, 2);
    let mut done = Job::queued(JobId(1), NewJob::new("a"), now);
    done.progress = 100;
    state.completed.push(done);
    let mut queued = Job::queued(JobId(2), NewJob::new("b"), now);
    queued.progress = 250;
    state.queued.push(queued);
    state
        .queued
        .push(Job::queued(JobId(3), NewJob::new("a"), now));
    state
        .queued
        .push(Job::queued(JobId(4), NewJob::new("b"), now));
    let mut failed = Job::queued(JobId(5), NewJob::new("a"), now);
    failed.error = Some("gone".to_string());
    state.failed.push(failed);

    let store = QueueStore::from_persisted(state, None).unwrap();
    let snapshot = store.snapshot().await;

    let queued: Vec<JobId> = snapshot.queued.iter().map(|job| job.id).collect();
    assert_eq!(queued, vec![JobId(2)]);
    assert_eq!(snapshot.queued[0].progress, 100);
    assert_eq!(snapshot.completed.len(), 1);
    assert_eq!(snapshot.failed.len(), 1, "failed jobs may share a track");
    assert_eq!(snapshot.failed[0].status, Status::Failed);

    // Dropped ids are not reused
    let admitted = store.enqueue(inputs(&["c"])).await;
    assert_eq!(admitted[0].id, JobId(6));
}
